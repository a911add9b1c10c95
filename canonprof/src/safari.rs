//! Import of Safari Web Inspector timeline recordings (`*-recording.json`).

use crate::{ImportError, Result, from_json};
use canonprof_model::{FrameInfo, ProfileBuilder, ProfileGroup, ValueUnit};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackFrame {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    column: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackTrace {
    /// Seconds.
    timestamp: f64,
    /// Leaf first.
    #[serde(default)]
    stack_frames: Vec<StackFrame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recording {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    sample_stack_traces: Vec<StackTrace>,
    /// Seconds, one per stack trace.
    #[serde(default)]
    sample_durations: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RecordingFile {
    recording: Recording,
}

pub fn looks_like(value: &Value) -> bool {
    value
        .get("recording")
        .is_some_and(|recording| recording.get("sampleStackTraces").is_some())
}

impl StackFrame {
    fn to_frame_info(&self) -> FrameInfo {
        let name = if self.name.is_empty() {
            "(anonymous)"
        } else {
            &self.name
        };
        let mut frame = FrameInfo::new(name).with_optional_file(Some(&self.url));
        frame.line = self.line;
        frame.col = self.column;
        frame
    }
}

pub fn import(value: &Value) -> Result<Option<ProfileGroup>> {
    let file: RecordingFile = from_json(value)?;
    let recording = file.recording;
    if recording.sample_stack_traces.is_empty() {
        return Ok(None);
    }
    if recording.sample_durations.len() != recording.sample_stack_traces.len() {
        return Err(ImportError::InvalidProfile(format!(
            "{} stack traces but {} sample durations",
            recording.sample_stack_traces.len(),
            recording.sample_durations.len()
        )));
    }

    let mut builder = ProfileBuilder::new();
    builder.set_name(recording.display_name.as_str());
    builder.set_unit(ValueUnit::Seconds);

    let traces = &recording.sample_stack_traces;
    for (i, (trace, &duration)) in traces.iter().zip(&recording.sample_durations).enumerate() {
        let stack: Vec<FrameInfo> = trace
            .stack_frames
            .iter()
            .rev()
            .map(StackFrame::to_frame_info)
            .collect();
        builder.append_sample_with_weight(&stack, duration)?;

        // Time between the end of this sample and the next is idle.
        if let Some(next) = traces.get(i + 1) {
            let gap = next.timestamp - (trace.timestamp + duration);
            if gap > 0.0 {
                builder.append_sample_with_weight(&[], gap)?;
            }
        }
    }

    Ok(Some(ProfileGroup::from_profile(builder.build())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDING: &str = r#"{
        "version": 1,
        "type": "web-inspector-recording",
        "recording": {
            "displayName": "Recording 1",
            "sampleStackTraces": [
                {"timestamp": 1.0, "stackFrames": [
                    {"name": "draw", "url": "https://example.com/app.js", "line": 20, "column": 3},
                    {"name": "", "url": "https://example.com/app.js", "line": 2, "column": 1}
                ]},
                {"timestamp": 1.25, "stackFrames": [
                    {"name": "", "url": "https://example.com/app.js", "line": 2, "column": 1}
                ]},
                {"timestamp": 2.0, "stackFrames": []}
            ],
            "sampleDurations": [0.25, 0.5, 0.125]
        }
    }"#;

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn detects_recording() {
        assert!(looks_like(&parse(RECORDING)));
        assert!(!looks_like(&parse(r#"{"recording": {}}"#)));
    }

    #[test]
    fn imports_leaf_first_stacks() {
        let group = import(&parse(RECORDING)).unwrap().unwrap();
        let profile = group.default_profile();
        assert_eq!(profile.name(), "Recording 1");
        assert_eq!(profile.unit(), ValueUnit::Seconds);
        assert_eq!(profile.total_weight(), 0.75);

        let anonymous = profile.frame_by_name("(anonymous)").unwrap();
        assert_eq!((anonymous.self_weight(), anonymous.total_weight()), (0.5, 0.75));
        let root = profile.node(profile.roots()[0]);
        assert_eq!(profile.frame(root.frame()).name(), "(anonymous)");
        assert_eq!(profile.frame_by_name("draw").unwrap().line(), Some(20));

        // 0.25s of idle between the second and third samples.
        assert_eq!(profile.end_value() - profile.start_value(), 1.125);
    }

    #[test]
    fn mismatched_durations_are_an_error() {
        let text = RECORDING.replace("[0.25, 0.5, 0.125]", "[0.25]");
        assert!(import(&parse(&text)).is_err());
    }
}
