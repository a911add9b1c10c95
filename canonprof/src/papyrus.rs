//! Import of Papyrus script profiling logs.
//!
//! ```text
//! 0:Log opened (PC)
//! 1200:Push:12:[Actor < (00000014)>]:Actor:OnUpdate
//! 1250:Push:12:[Actor < (00000014)>]:Utility:Wait
//! 1300:Pop:12:[Actor < (00000014)>]:Utility:Wait
//! 1310:Pop:12:[Actor < (00000014)>]:Actor:OnUpdate
//! ```
//!
//! Fields are `time:event:stack id:…:script:function` with times in
//! milliseconds. Each stack id is an independent call stack and becomes its
//! own profile.

use crate::data_source::TextFileContent;
use crate::{ImportError, Result};
use canonprof_model::{FrameInfo, ProfileBuilder, ProfileGroup, ValueUnit};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static LOG_OPENED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\d+:Log opened \(PC\)").unwrap());

pub fn looks_like(first_chunk: &str) -> bool {
    LOG_OPENED.is_match(first_chunk)
}

#[derive(Debug, PartialEq)]
enum Event {
    Push,
    Pop,
}

struct Record<'a> {
    at: f64,
    event: Event,
    stack_id: &'a str,
    frame: FrameInfo,
}

fn parse_record(line: &str) -> Option<Record<'_>> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 5 {
        return None;
    }
    let event = match fields[1] {
        "Push" => Event::Push,
        "Pop" => Event::Pop,
        _ => return None,
    };
    let at = fields[0].parse().ok()?;
    let script = fields[fields.len() - 2];
    let function = fields[fields.len() - 1];
    Some(Record {
        at,
        event,
        stack_id: fields[2],
        frame: FrameInfo::new(format!("{script}.{function}")),
    })
}

pub fn import(content: &TextFileContent) -> Result<Option<ProfileGroup>> {
    let mut order: Vec<String> = Vec::new();
    let mut builders: HashMap<String, ProfileBuilder> = HashMap::new();

    for (index, line) in content.split_lines().enumerate() {
        let Some(record) = parse_record(&line) else {
            continue;
        };
        if !builders.contains_key(record.stack_id) {
            order.push(record.stack_id.to_string());
        }
        let builder = builders.entry(record.stack_id.to_string()).or_default();
        let applied = match record.event {
            Event::Push => builder.enter_frame(record.frame, record.at),
            Event::Pop => match builder
                .evented_stack()
                .iter()
                .rposition(|f| f.key() == record.frame.key())
            {
                Some(position) => {
                    let to_close: Vec<FrameInfo> =
                        builder.evented_stack()[position..].iter().rev().cloned().collect();
                    to_close
                        .iter()
                        .try_for_each(|frame| builder.leave_frame(frame, record.at))
                }
                // The log may start inside a call.
                None => Ok(()),
            },
        };
        applied.map_err(|e| ImportError::Parse {
            line: index + 1,
            message: e.to_string(),
        })?;
    }

    let mut profiles = Vec::new();
    for stack_id in order {
        let Some(mut builder) = builders.remove(&stack_id) else {
            continue;
        };
        if builder.sample_count() == 0 {
            continue;
        }
        builder.set_name(format!("stack {stack_id}"));
        builder.set_unit(ValueUnit::Milliseconds);
        profiles.push(builder.build());
    }

    let heaviest = profiles
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_weight().total_cmp(&b.total_weight()))
        .map_or(0, |(i, _)| i);
    Ok(ProfileGroup::new("", profiles).map(|group| group.with_index_to_view(heaviest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = r#"0:Log opened (PC)
1200:Push:12:[Actor < (00000014)>]:Actor:OnUpdate
1250:Push:12:[Actor < (00000014)>]:Utility:Wait
1260:Push:7:None:Quest:OnInit
1300:Pop:12:[Actor < (00000014)>]:Utility:Wait
1310:Pop:12:[Actor < (00000014)>]:Actor:OnUpdate
1400:Pop:7:None:Quest:Setup
1500:Pop:7:None:Quest:OnInit
1600:Log closed
"#;

    fn import_text(text: &str) -> Result<Option<ProfileGroup>> {
        import(&TextFileContent::from_bytes(text.as_bytes()))
    }

    #[test]
    fn detects_log_header() {
        assert!(looks_like(LOG));
        assert!(looks_like("\n15:Log opened (PC)\n"));
        assert!(!looks_like("Log opened (PC)"));
    }

    #[test]
    fn parses_records() {
        let record = parse_record("1200:Push:12:[Actor < (00000014)>]:Actor:OnUpdate").unwrap();
        assert_eq!(record.at, 1200.0);
        assert_eq!(record.event, Event::Push);
        assert_eq!(record.stack_id, "12");
        assert_eq!(record.frame.name, "Actor.OnUpdate");
        assert!(parse_record("1600:Log closed").is_none());
    }

    #[test]
    fn imports_one_profile_per_stack() {
        let group = import_text(LOG).unwrap().unwrap();
        assert_eq!(group.profiles().len(), 2);

        let twelve = &group.profiles()[0];
        assert_eq!(twelve.name(), "stack 12");
        assert_eq!(twelve.unit(), ValueUnit::Milliseconds);
        let on_update = twelve.frame_by_name("Actor.OnUpdate").unwrap();
        assert_eq!((on_update.self_weight(), on_update.total_weight()), (60.0, 110.0));

        // Unmatched pops are ignored.
        let seven = &group.profiles()[1];
        assert_eq!(seven.total_weight(), 240.0);
        assert_eq!(group.index_to_view(), 1);
    }
}
