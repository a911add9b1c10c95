//! Import of preprocessed V8 tick logs (`node --prof-process --preprocess`).

use crate::{Result, from_json};
use canonprof_model::{FrameInfo, ProfileBuilder, ProfileGroup, ValueUnit};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

/// `[*~]name file:line:col` as V8 prints JavaScript code entries.
static JS_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*(\S+):(\d+):(\d+)$").unwrap());

#[derive(Debug, Deserialize)]
struct CodeEntry {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Tick {
    /// Microseconds.
    tm: f64,
    /// `[code index, offset]*`, leaf first. Index -1 is an unknown pc.
    #[serde(default)]
    s: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct TickLog {
    code: Vec<CodeEntry>,
    ticks: Vec<Tick>,
}

pub fn looks_like(value: &Value) -> bool {
    value.get("code").is_some() && value.get("ticks").is_some()
}

fn frame_for_code(code: &CodeEntry) -> FrameInfo {
    if code.kind == "JS" {
        if let Some(captures) = JS_LOCATION.captures(&code.name) {
            let name = captures[1].trim_start_matches(['*', '~']);
            let name = if name.is_empty() { "(anonymous)" } else { name };
            let mut frame = FrameInfo::new(name).with_file(&captures[2]);
            frame.line = captures[3].parse().ok();
            frame.col = captures[4].parse().ok();
            return frame;
        }
    }
    if code.name.is_empty() {
        FrameInfo::new(format!("({})", code.kind))
    } else {
        FrameInfo::new(code.name.as_str())
    }
}

pub fn import(value: &Value) -> Result<Option<ProfileGroup>> {
    let log: TickLog = from_json(value)?;
    if log.ticks.is_empty() {
        return Ok(None);
    }

    let frames: Vec<FrameInfo> = log.code.iter().map(frame_for_code).collect();
    let mut builder = ProfileBuilder::new();
    builder.set_unit(ValueUnit::Microseconds);

    let mut stack = Vec::new();
    for (i, tick) in log.ticks.iter().enumerate() {
        stack.clear();
        for &index in tick.s.iter().step_by(2) {
            if let Some(frame) = usize::try_from(index).ok().and_then(|i| frames.get(i)) {
                stack.push(frame.clone());
            }
        }
        stack.reverse();
        let weight = log.ticks.get(i + 1).map_or(0.0, |next| next.tm - tick.tm);
        builder.append_sample_with_weight(&stack, weight)?;
    }

    Ok(Some(ProfileGroup::from_profile(builder.build())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_LOG: &str = r#"{
        "code": [
            {"name": "/usr/lib/libc.so.6", "type": "SHARED_LIB"},
            {"name": "*main /app/index.js:1:1", "type": "JS", "kind": "Opt"},
            {"name": "~ /app/index.js:7:12", "type": "JS", "kind": "Baseline"},
            {"name": "v8::internal::Runtime_StackGuard", "type": "CPP"}
        ],
        "ticks": [
            {"tm": 100, "vm": 0, "s": [2, 10, 1, 4]},
            {"tm": 150, "vm": 0, "s": [3, 0, 2, 10, 1, 4]},
            {"tm": 175, "vm": 0, "s": [-1, 0, 1, 4]},
            {"tm": 200, "vm": 0, "s": []}
        ]
    }"#;

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn detects_tick_log() {
        assert!(looks_like(&parse(TICK_LOG)));
        assert!(!looks_like(&parse(r#"{"code": []}"#)));
    }

    #[test]
    fn imports_ticks() {
        let group = import(&parse(TICK_LOG)).unwrap().unwrap();
        let profile = group.default_profile();
        assert_eq!(profile.unit(), ValueUnit::Microseconds);
        assert_eq!(profile.total_weight(), 100.0);

        let main = profile.frame_by_name("main").unwrap();
        assert_eq!((main.self_weight(), main.total_weight()), (25.0, 100.0));
        assert_eq!(main.file(), Some("/app/index.js"));
        assert_eq!((main.line(), main.col()), (Some(1), Some(1)));

        let anonymous = profile.frame_by_name("(anonymous)").unwrap();
        assert_eq!((anonymous.self_weight(), anonymous.total_weight()), (50.0, 75.0));
        assert_eq!(anonymous.line(), Some(7));

        let guard = profile.frame_by_name("v8::internal::Runtime_StackGuard").unwrap();
        assert_eq!(guard.self_weight(), 25.0);
    }

    #[test]
    fn no_ticks_is_not_a_profile() {
        assert!(import(&parse(r#"{"code": [], "ticks": []}"#)).unwrap().is_none());
    }
}
