//! Import of Ruby stackprof JSON dumps (`stackprof --json` or
//! `StackProf.results` serialized with `raw: true`).

use crate::{ImportError, Result, from_json};
use canonprof_model::{FrameInfo, ProfileBuilder, ProfileGroup, ValueUnit};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct StackprofFrame {
    name: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StackprofProfile {
    mode: String,
    /// Frame table keyed by frame id.
    frames: HashMap<String, StackprofFrame>,
    /// `[len, frame ids (root first)…, count]` repeated.
    #[serde(default)]
    raw: Vec<u64>,
    /// Microseconds between consecutive samples.
    #[serde(default)]
    raw_timestamp_deltas: Vec<f64>,
}

pub fn looks_like(value: &Value) -> bool {
    value.get("mode").is_some()
        && value.get("frames").is_some()
        && value.get("raw_timestamp_deltas").is_some()
}

pub fn import(value: &Value) -> Result<Option<ProfileGroup>> {
    let profile: StackprofProfile = from_json(value)?;
    let weigh_by_count = profile.mode == "object";

    let mut builder = ProfileBuilder::new();
    builder.set_name(format!("stackprof ({} mode)", profile.mode));
    builder.set_unit(if weigh_by_count {
        ValueUnit::None
    } else {
        ValueUnit::Microseconds
    });

    let truncated = || ImportError::InvalidProfile("truncated raw stack data".to_string());
    let mut raw = profile.raw.iter().copied();
    let mut deltas = profile.raw_timestamp_deltas.iter().copied();
    let mut stack = Vec::new();

    while let Some(height) = raw.next() {
        stack.clear();
        for _ in 0..height {
            let id = raw.next().ok_or_else(truncated)?;
            let frame = profile.frames.get(&id.to_string()).ok_or_else(|| {
                ImportError::InvalidProfile(format!("raw stack references unknown frame {id}"))
            })?;
            let mut info = FrameInfo::new(frame.name.as_str()).with_optional_file(frame.file.as_deref());
            info.line = frame.line.filter(|&line| line > 0);
            stack.push(info);
        }
        let count = raw.next().ok_or_else(truncated)?;

        let weight = if weigh_by_count {
            count as f64
        } else {
            // A count past the recorded deltas only consumes what is left.
            let take = usize::try_from(count).unwrap_or(usize::MAX);
            deltas.by_ref().take(take).sum()
        };
        builder.append_sample_with_weight(&stack, weight)?;
    }

    if builder.sample_count() == 0 {
        return Ok(None);
    }
    Ok(Some(ProfileGroup::from_profile(builder.build())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALL_PROFILE: &str = r#"{
        "version": 1.2,
        "mode": "wall",
        "interval": 1000,
        "frames": {
            "70": {"name": "Object#main", "file": "app.rb", "line": 1},
            "71": {"name": "Object#slow", "file": "app.rb", "line": 5},
            "72": {"name": "Kernel#sleep"}
        },
        "raw": [2, 70, 71, 2, 3, 70, 71, 72, 1, 1, 70, 1],
        "raw_timestamp_deltas": [1000, 1100, 900, 1200]
    }"#;

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn detects_stackprof() {
        assert!(looks_like(&parse(WALL_PROFILE)));
        assert!(!looks_like(&parse(r#"{"mode": "wall", "frames": {}}"#)));
    }

    #[test]
    fn weights_by_timestamp_deltas() {
        let group = import(&parse(WALL_PROFILE)).unwrap().unwrap();
        let profile = group.default_profile();
        assert_eq!(profile.unit(), ValueUnit::Microseconds);
        assert_eq!(profile.total_weight(), 4200.0);

        let slow = profile.frame_by_name("Object#slow").unwrap();
        assert_eq!((slow.self_weight(), slow.total_weight()), (2100.0, 3000.0));
        assert_eq!(slow.line(), Some(5));
        assert_eq!(profile.frame_by_name("Object#main").unwrap().self_weight(), 1200.0);
    }

    #[test]
    fn object_mode_weights_by_count() {
        let text = WALL_PROFILE.replace("\"wall\"", "\"object\"");
        let group = import(&parse(&text)).unwrap().unwrap();
        let profile = group.default_profile();
        assert_eq!(profile.unit(), ValueUnit::None);
        assert_eq!(profile.total_weight(), 4.0);
    }

    #[test]
    fn count_beyond_deltas_uses_remaining_deltas() {
        let value = parse(
            r#"{"mode": "wall", "frames": {"1": {"name": "a"}},
                "raw": [1, 1, 100000000000, 1, 1, 1], "raw_timestamp_deltas": [250]}"#,
        );
        let group = import(&value).unwrap().unwrap();
        let profile = group.default_profile();
        assert_eq!(profile.total_weight(), 250.0);
        assert_eq!(profile.frame_by_name("a").unwrap().self_weight(), 250.0);
    }

    #[test]
    fn unknown_frame_is_an_error() {
        let value = parse(r#"{"mode": "cpu", "frames": {}, "raw": [1, 9, 1], "raw_timestamp_deltas": [1]}"#);
        assert!(matches!(import(&value), Err(ImportError::InvalidProfile(_))));
    }

    #[test]
    fn truncated_raw_is_an_error() {
        let value = parse(
            r#"{"mode": "cpu", "frames": {"1": {"name": "a"}}, "raw": [2, 1], "raw_timestamp_deltas": []}"#,
        );
        assert!(import(&value).is_err());
    }
}
