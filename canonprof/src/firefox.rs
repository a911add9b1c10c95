//! Import of Firefox profiles.
//!
//! Two layouts are accepted, both with a `threads` array whose tables map
//! samples to stacks, stacks to `(prefix, frame)` pairs and frames to
//! strings:
//!
//! 1. **Gecko profiles** as written by the Gecko profiler and the old
//!    DevTools performance panel (`{"systemHost": …, "profile": {…}}`).
//!    Tables are `{"schema": {column: index}, "data": [[row]…]}` and a frame's
//!    `location` indexes `stringTable`. Subprocess profiles under `processes`
//!    are included.
//!
//! 2. **Processed profiles** as saved from the Firefox Profiler or written by
//!    `fxprof-processed-profile`. Tables are columnar (`{"length": n,
//!    column: [values]}`) and frames resolve through `funcTable` into
//!    `stringArray`.

use crate::Result;
use canonprof_model::{FrameInfo, Profile, ProfileBuilder, ProfileGroup, ValueUnit};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

/// `name (file:line:col)` as Gecko formats JavaScript frame locations.
static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\s+\((.+?)(?::(\d+))?(?::(\d+))?\)$").unwrap());

pub fn looks_like(value: &Value) -> bool {
    let system_host = value.get("systemHost");
    let host_is_firefox = system_host.and_then(Value::as_str) == Some("Firefox")
        || system_host
            .and_then(|host| host.get("name"))
            .and_then(Value::as_str)
            == Some("Firefox");
    if host_is_firefox {
        return true;
    }
    let is_gecko = |profile: &Value| profile.get("meta").is_some() && profile.get("threads").is_some();
    value.get("profile").is_some_and(is_gecko) || is_gecko(value)
}

/// A table in either the schema/data or the columnar layout.
enum Table<'a> {
    Rows {
        schema: &'a Map<String, Value>,
        data: &'a [Value],
    },
    Columns(&'a Map<String, Value>),
}

impl<'a> Table<'a> {
    fn new(value: Option<&'a Value>) -> Option<Self> {
        let object = value?.as_object()?;
        match (object.get("schema"), object.get("data")) {
            (Some(Value::Object(schema)), Some(Value::Array(data))) => Some(Table::Rows { schema, data }),
            _ => Some(Table::Columns(object)),
        }
    }

    fn len(&self) -> usize {
        match self {
            Table::Rows { data, .. } => data.len(),
            Table::Columns(columns) => columns
                .get("length")
                .and_then(Value::as_u64)
                .map(|len| len as usize)
                .or_else(|| {
                    columns
                        .values()
                        .find_map(Value::as_array)
                        .map(Vec::len)
                })
                .unwrap_or(0),
        }
    }

    fn has_column(&self, column: &str) -> bool {
        match self {
            Table::Rows { schema, .. } => schema.contains_key(column),
            Table::Columns(columns) => columns.contains_key(column),
        }
    }

    fn get(&self, row: usize, column: &str) -> Option<&'a Value> {
        let value = match self {
            Table::Rows { schema, data } => {
                let index = schema.get(column)?.as_u64()? as usize;
                data.get(row)?.get(index)?
            }
            Table::Columns(columns) => columns.get(column)?.get(row)?,
        };
        (!value.is_null()).then_some(value)
    }

    fn index(&self, row: usize, column: &str) -> Option<usize> {
        self.get(row, column)?.as_u64().map(|v| v as usize)
    }

    fn number(&self, row: usize, column: &str) -> Option<f64> {
        self.get(row, column)?.as_f64()
    }
}

/// One thread's tables and strings.
struct Thread<'a> {
    name: String,
    strings: Vec<&'a str>,
    samples: Table<'a>,
    stacks: Table<'a>,
    frames: Table<'a>,
    funcs: Option<Table<'a>>,
}

impl<'a> Thread<'a> {
    fn new(thread: &'a Value, shared_strings: Option<&'a Value>) -> Option<Self> {
        let strings = thread
            .get("stringTable")
            .or_else(|| thread.get("stringArray"))
            .or(shared_strings)
            .and_then(Value::as_array)
            .map(|strings| strings.iter().map(|s| s.as_str().unwrap_or("")).collect())
            .unwrap_or_default();
        Some(Self {
            name: thread
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Thread")
                .to_string(),
            strings,
            samples: Table::new(thread.get("samples"))?,
            stacks: Table::new(thread.get("stackTable"))?,
            frames: Table::new(thread.get("frameTable"))?,
            funcs: Table::new(thread.get("funcTable")),
        })
    }

    fn string(&self, index: Option<usize>) -> Option<&'a str> {
        index.and_then(|i| self.strings.get(i).copied())
    }

    fn frame_info(&self, frame: usize) -> FrameInfo {
        if let Some(location) = self.string(self.frames.index(frame, "location")) {
            return frame_from_location(location);
        }

        // Processed layout.
        let func = self.frames.index(frame, "func");
        let func_table = self.funcs.as_ref();
        let name = func
            .and_then(|f| self.string(func_table?.index(f, "name")))
            .unwrap_or("(unknown)");
        let file = func.and_then(|f| self.string(func_table?.index(f, "fileName")));
        let mut info = FrameInfo::new(name).with_optional_file(file);
        info.line = self
            .frames
            .index(frame, "line")
            .or_else(|| func.and_then(|f| func_table?.index(f, "lineNumber")))
            .and_then(|line| u32::try_from(line).ok());
        info.col = self
            .frames
            .index(frame, "column")
            .and_then(|col| u32::try_from(col).ok());
        info
    }

    /// Sample timestamps in milliseconds.
    fn sample_times(&self) -> Vec<f64> {
        let len = self.samples.len();
        if self.samples.has_column("time") {
            return (0..len)
                .map(|i| self.samples.number(i, "time").unwrap_or(0.0))
                .collect();
        }
        let mut t = 0.0;
        (0..len)
            .map(|i| {
                t += self.samples.number(i, "timeDeltas").unwrap_or(0.0);
                t
            })
            .collect()
    }
}

fn frame_from_location(location: &str) -> FrameInfo {
    let Some(captures) = LOCATION.captures(location) else {
        return FrameInfo::new(location);
    };
    let mut info = FrameInfo::new(&captures[1]).with_file(&captures[2]);
    info.line = captures.get(3).and_then(|m| m.as_str().parse().ok());
    info.col = captures.get(4).and_then(|m| m.as_str().parse().ok());
    info
}

fn import_thread(thread: &Thread<'_>) -> Result<Option<Profile>> {
    let times = thread.sample_times();
    if times.is_empty() {
        return Ok(None);
    }

    let mut builder = ProfileBuilder::new();
    builder.set_name(thread.name.as_str());
    builder.set_unit(ValueUnit::Milliseconds);

    let mut stack_cache: HashMap<usize, Vec<FrameInfo>> = HashMap::new();
    for (i, &time) in times.iter().enumerate() {
        let weight = times.get(i + 1).map_or(0.0, |next| next - time);
        let Some(stack_index) = thread.samples.index(i, "stack") else {
            builder.append_sample_with_weight(&[], weight)?;
            continue;
        };
        if !stack_cache.contains_key(&stack_index) {
            let mut stack = Vec::new();
            let mut current = Some(stack_index);
            while let Some(index) = current {
                if stack.len() > thread.stacks.len() {
                    break;
                }
                if let Some(frame) = thread.stacks.index(index, "frame") {
                    let info = thread.frame_info(frame);
                    // Gecko roots every stack in a "(root)" pseudo-frame.
                    if info.name != "(root)" {
                        stack.push(info);
                    }
                }
                current = thread.stacks.index(index, "prefix");
            }
            stack.reverse();
            stack_cache.insert(stack_index, stack);
        }
        let stack = stack_cache.get(&stack_index).map(Vec::as_slice).unwrap_or(&[]);
        builder.append_sample_with_weight(stack, weight)?;
    }

    Ok(Some(builder.build()))
}

/// Collect the profiles of a Gecko or processed profile and its subprocesses.
fn collect_profiles(profile: &Value, out: &mut Vec<Profile>) -> Result<()> {
    let shared_strings = profile.get("shared").and_then(|s| s.get("stringArray"));
    if let Some(threads) = profile.get("threads").and_then(Value::as_array) {
        for raw in threads {
            let Some(thread) = Thread::new(raw, shared_strings) else {
                log::debug!("firefox: skipping thread without sample tables");
                continue;
            };
            if let Some(imported) = import_thread(&thread)? {
                out.push(imported);
            }
        }
    }
    if let Some(processes) = profile.get("processes").and_then(Value::as_array) {
        for process in processes {
            collect_profiles(process, out)?;
        }
    }
    Ok(())
}

pub fn import(value: &Value) -> Result<Option<ProfileGroup>> {
    let profile = value.get("profile").unwrap_or(value);
    let mut profiles = Vec::new();
    collect_profiles(profile, &mut profiles)?;

    let main_thread = profiles
        .iter()
        .position(|p| p.name() == "GeckoMain")
        .unwrap_or(0);
    Ok(ProfileGroup::new("", profiles).map(|group| group.with_index_to_view(main_thread)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GECKO_PROFILE: &str = r#"{
        "systemHost": {"name": "Firefox"},
        "profile": {
            "meta": {"interval": 1},
            "threads": [
                {
                    "name": "Compositor",
                    "samples": {"schema": {"stack": 0, "time": 1}, "data": [[0, 0.0], [0, 2.0]]},
                    "stackTable": {"schema": {"prefix": 0, "frame": 1}, "data": [[null, 0]]},
                    "frameTable": {"schema": {"location": 0}, "data": [[0]]},
                    "stringTable": ["Compose"]
                },
                {
                    "name": "GeckoMain",
                    "samples": {"schema": {"stack": 0, "time": 1}, "data": [
                        [1, 10.0], [2, 11.5], [1, 12.0], [null, 13.0], [0, 14.0]
                    ]},
                    "stackTable": {"schema": {"prefix": 0, "frame": 1}, "data": [
                        [null, 0], [0, 1], [1, 2]
                    ]},
                    "frameTable": {"schema": {"location": 0, "line": 1}, "data": [[0], [1], [2]]},
                    "stringTable": [
                        "(root)",
                        "onLoad (https://example.com/app.js:10:5)",
                        "layout (resource://gre/layout.js:3)"
                    ]
                }
            ]
        }
    }"#;

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn detects_firefox_profiles() {
        assert!(looks_like(&parse(GECKO_PROFILE)));
        assert!(looks_like(&parse(r#"{"systemHost": "Firefox"}"#)));
        assert!(looks_like(&parse(r#"{"meta": {}, "threads": []}"#)));
        assert!(!looks_like(&parse(r#"{"threads": []}"#)));
    }

    #[test]
    fn parses_locations() {
        let frame = frame_from_location("onLoad (https://example.com/app.js:10:5)");
        assert_eq!(frame.name, "onLoad");
        assert_eq!(frame.file.as_deref(), Some("https://example.com/app.js"));
        assert_eq!((frame.line, frame.col), (Some(10), Some(5)));

        let frame = frame_from_location("0x7ffdb4824837");
        assert_eq!(frame.name, "0x7ffdb4824837");
        assert_eq!(frame.file, None);
    }

    #[test]
    fn imports_gecko_threads() {
        let group = import(&parse(GECKO_PROFILE)).unwrap().unwrap();
        assert_eq!(group.profiles().len(), 2);
        assert_eq!(group.index_to_view(), 1);

        let main = group.default_profile();
        assert_eq!(main.name(), "GeckoMain");
        assert_eq!(main.unit(), ValueUnit::Milliseconds);

        let on_load = main.frame_by_name("onLoad").unwrap();
        assert_eq!(on_load.self_weight(), 2.5);
        assert_eq!(on_load.total_weight(), 3.0);
        let layout = main.frame_by_name("layout").unwrap();
        assert_eq!((layout.self_weight(), layout.line()), (0.5, Some(3)));
        // One idle millisecond between 13 and 14.
        assert_eq!(main.total_weight(), 3.0);
        assert!(main.frame_by_name("(root)").is_none());
        assert_eq!(main.frames().len(), 2);
    }

    #[test]
    fn imports_processed_profile() {
        let value = parse(
            r#"{
            "meta": {"preprocessedProfileVersion": 41},
            "threads": [{
                "name": "samply",
                "samples": {"length": 3, "stack": [1, 1, 0], "time": [0, 1, 2]},
                "stackTable": {"length": 2, "prefix": [null, 0], "frame": [0, 1]},
                "frameTable": {"length": 2, "func": [0, 1], "line": [null, 42], "column": [null, null]},
                "funcTable": {"length": 2, "name": [0, 1], "fileName": [null, 2]},
                "stringArray": ["main", "compute", "src/lib.rs"]
            }]
        }"#,
        );
        let group = import(&value).unwrap().unwrap();
        let profile = group.default_profile();
        let compute = profile.frame_by_name("compute").unwrap();
        assert_eq!(compute.self_weight(), 2.0);
        assert_eq!(compute.file(), Some("src/lib.rs"));
        assert_eq!(compute.line(), Some(42));
        assert_eq!(profile.frame_by_name("main").unwrap().total_weight(), 2.0);
    }

    #[test]
    fn profile_without_samples_is_none() {
        assert!(import(&parse(r#"{"meta": {}, "threads": []}"#)).unwrap().is_none());
    }
}
