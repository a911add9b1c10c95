//! Import of Chrome DevTools profiles.
//!
//! # Supported Formats
//!
//! 1. **Performance timeline** (`Trace-*.json`, `.chrome.json`): trace events
//!    containing `Profile` and `ProfileChunk` events (or older `CpuProfile`
//!    events). One profile per (process, profile id).
//!
//! 2. **cpuprofile** (`.cpuprofile`): the V8 JSON format with `nodes`,
//!    `samples` and `timeDeltas` at the top level.
//!
//! 3. **Legacy cpuprofile**: a nested `head` tree with `samples` and absolute
//!    `timestamps`.
//!
//! 4. **Heap profile** (`.heapprofile`): sampling heap profiler output, a
//!    nested `head` tree whose nodes carry `selfSize` in bytes.
//!
//! # Example
//!
//! ```no_run
//! use canonprof::chrome;
//! use canonprof::{DefaultDependencies, Dependencies};
//!
//! let bytes = std::fs::read("profile.cpuprofile").unwrap();
//! let value = DefaultDependencies.parse_json(&bytes).unwrap();
//! if chrome::looks_like_cpu_profile(&value) {
//!     let group = chrome::import_cpu_profile(&value).unwrap();
//! }
//! ```

use crate::{ImportError, Result, from_json};
use canonprof_model::{FrameInfo, Profile, ProfileBuilder, ProfileGroup, ValueUnit};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// cpuprofile format types
// ============================================================================

/// A Chrome DevTools CPU profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuProfile {
    /// Call tree nodes.
    pub nodes: Vec<ProfileNode>,
    /// Profile start time in microseconds.
    #[serde(default)]
    pub start_time: f64,
    /// Profile end time in microseconds.
    #[serde(default)]
    pub end_time: Option<f64>,
    /// Node ID at the top of the stack for each sample.
    #[serde(default)]
    pub samples: Vec<u64>,
    /// Time deltas between samples in microseconds.
    #[serde(default)]
    pub time_deltas: Vec<f64>,
}

/// A node in the profile call tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileNode {
    pub id: u64,
    pub call_frame: CallFrame,
    #[serde(default)]
    pub hit_count: u64,
    /// Child node IDs (standalone format).
    #[serde(default)]
    pub children: Vec<u64>,
    /// Parent node ID (trace chunk format uses this instead of children).
    #[serde(default)]
    pub parent: Option<u64>,
}

/// Information about a call frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub function_name: String,
    /// Script ID (internal V8 identifier) - can be string or number.
    #[serde(default, deserialize_with = "deserialize_script_id")]
    pub script_id: String,
    #[serde(default)]
    pub url: String,
    /// Line number (0-based, -1 if unknown).
    #[serde(default = "default_line")]
    pub line_number: i64,
    /// Column number (0-based, -1 if unknown).
    #[serde(default = "default_line")]
    pub column_number: i64,
}

fn default_line() -> i64 {
    -1
}

/// Deserialize script_id which can be either a string or number.
fn deserialize_script_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value: Value = Deserialize::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(D::Error::custom("expected string or number for scriptId")),
    }
}

impl CallFrame {
    fn to_frame_info(&self) -> FrameInfo {
        let name = if self.function_name.is_empty() {
            "(anonymous)"
        } else {
            &self.function_name
        };
        let mut frame = FrameInfo::new(name).with_optional_file(Some(&self.url));
        // 0-based in the file, 1-based in the model.
        if self.line_number >= 0 {
            frame.line = u32::try_from(self.line_number + 1).ok();
        }
        if self.column_number >= 0 {
            frame.col = u32::try_from(self.column_number + 1).ok();
        }
        frame
    }
}

// ============================================================================
// Performance timeline format types
// ============================================================================

/// A trace event, reduced to the fields the timeline importer reads.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceEvent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ph: String,
    #[serde(default)]
    pub pid: u64,
    #[serde(default)]
    pub tid: u64,
    /// Timestamp in microseconds.
    #[serde(default)]
    pub ts: f64,
    #[serde(default)]
    pub args: Value,
    /// Event ID (for async events) - can be string or number.
    #[serde(default, deserialize_with = "deserialize_optional_string_or_number")]
    pub id: Option<String>,
}

/// Deserialize an optional field that can be either a string or number.
fn deserialize_optional_string_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<Value> = Deserialize::deserialize(deserializer)?;
    match value {
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        _ => Ok(None),
    }
}

/// Data from a Profile event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEventData {
    #[serde(default)]
    pub start_time: f64,
}

/// Data from a ProfileChunk event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChunkData {
    #[serde(default)]
    pub cpu_profile: Option<ProfileChunkCpuProfile>,
    #[serde(default)]
    pub time_deltas: Vec<f64>,
}

/// CPU profile data within a ProfileChunk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChunkCpuProfile {
    #[serde(default)]
    pub nodes: Vec<ProfileNode>,
    #[serde(default)]
    pub samples: Vec<u64>,
}

// ============================================================================
// Legacy and heap formats
// ============================================================================

/// Node of the legacy nested cpuprofile tree. Lines are 1-based.
///
/// Nested trees are walked from the JSON value one node at a time, so
/// `children` is read separately (see [`child_nodes`]).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OldProfileNode {
    id: u64,
    #[serde(default)]
    function_name: String,
    #[serde(default, deserialize_with = "deserialize_script_id")]
    script_id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    line_number: i64,
    #[serde(default)]
    column_number: i64,
    #[serde(default)]
    hit_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OldCpuProfile {
    /// Seconds.
    #[serde(default)]
    start_time: f64,
    /// Seconds.
    #[serde(default)]
    end_time: Option<f64>,
    #[serde(default)]
    samples: Vec<u64>,
    /// Microseconds.
    #[serde(default)]
    timestamps: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeapProfileNode {
    call_frame: CallFrame,
    #[serde(default)]
    self_size: f64,
}

/// Children of a node in a nested tree.
fn child_nodes(node: &Value) -> impl DoubleEndedIterator<Item = &Value> {
    node.get("children")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn tree_head(value: &Value) -> Result<&Value> {
    value
        .get("head")
        .ok_or_else(|| ImportError::InvalidProfile("profile has no head node".to_string()))
}

// ============================================================================
// Detection
// ============================================================================

fn trace_event_list(value: &Value) -> Option<&Vec<Value>> {
    value
        .as_array()
        .or_else(|| value.get("traceEvents").and_then(Value::as_array))
}

fn is_profile_event(event: &Value) -> bool {
    matches!(
        event.get("name").and_then(Value::as_str),
        Some("Profile" | "ProfileChunk" | "CpuProfile")
    )
}

/// Trace events carrying sampled CPU profiles.
pub fn looks_like_timeline(value: &Value) -> bool {
    trace_event_list(value).is_some_and(|events| events.iter().any(is_profile_event))
}

pub fn looks_like_cpu_profile(value: &Value) -> bool {
    value.get("nodes").is_some() && value.get("samples").is_some() && value.get("timeDeltas").is_some()
}

pub fn looks_like_old_cpu_profile(value: &Value) -> bool {
    value.get("head").is_some() && value.get("samples").is_some() && value.get("timestamps").is_some()
}

pub fn looks_like_heap_profile(value: &Value) -> bool {
    value
        .get("head")
        .is_some_and(|head| head.get("selfSize").is_some())
}

// ============================================================================
// Conversion
// ============================================================================

/// Root-first stacks for cpuprofile nodes.
struct NodeStacks<'a> {
    nodes: HashMap<u64, &'a ProfileNode>,
    /// Map from node ID to parent node ID.
    parent_map: HashMap<u64, u64>,
    cache: HashMap<u64, Vec<FrameInfo>>,
}

impl<'a> NodeStacks<'a> {
    fn new(nodes: &'a [ProfileNode]) -> Self {
        let mut parent_map = HashMap::new();
        for node in nodes {
            for &child_id in &node.children {
                parent_map.insert(child_id, node.id);
            }
            if let Some(parent_id) = node.parent {
                parent_map.insert(node.id, parent_id);
            }
        }
        Self {
            nodes: nodes.iter().map(|n| (n.id, n)).collect(),
            parent_map,
            cache: HashMap::new(),
        }
    }

    fn is_idle(&self, node_id: u64) -> bool {
        self.nodes
            .get(&node_id)
            .is_some_and(|n| n.call_frame.function_name == "(idle)")
    }

    /// Stack for a node, root first, without the synthetic `(root)` frame.
    fn stack_for_node(&mut self, node_id: u64) -> Result<&[FrameInfo]> {
        if !self.cache.contains_key(&node_id) {
            let mut stack = Vec::new();
            let mut current_id = node_id;
            loop {
                let node = self.nodes.get(&current_id).ok_or_else(|| {
                    ImportError::InvalidProfile(format!("sample references unknown node {current_id}"))
                })?;
                if node.call_frame.function_name != "(root)" {
                    stack.push(node.call_frame.to_frame_info());
                }
                if stack.len() > self.nodes.len() {
                    return Err(ImportError::InvalidProfile(format!(
                        "node {node_id} has a cyclic parent chain"
                    )));
                }
                match self.parent_map.get(&current_id) {
                    Some(&parent_id) => current_id = parent_id,
                    None => break,
                }
            }
            stack.reverse();
            self.cache.insert(node_id, stack);
        }
        Ok(self.cache.get(&node_id).map(Vec::as_slice).unwrap_or(&[]))
    }
}

/// Build a profile from cpuprofile data. Each sample lasts until the next
/// one; the last lasts until `end_time` when that is known.
fn build_cpu_profile(profile: &CpuProfile, name: &str) -> Result<Profile> {
    let mut stacks = NodeStacks::new(&profile.nodes);

    let mut timestamps = Vec::with_capacity(profile.samples.len());
    let mut t = profile.start_time;
    for i in 0..profile.samples.len() {
        t += profile.time_deltas.get(i).copied().unwrap_or(0.0);
        timestamps.push(t);
    }

    let mut builder = ProfileBuilder::new();
    builder.set_name(name);
    builder.set_unit(ValueUnit::Microseconds);

    for (i, &node_id) in profile.samples.iter().enumerate() {
        let weight = match timestamps.get(i + 1) {
            Some(next) => next - timestamps[i],
            None => profile
                .end_time
                .map(|end| end - timestamps[i])
                .filter(|w| *w > 0.0)
                .unwrap_or(0.0),
        };
        if stacks.is_idle(node_id) {
            builder.append_sample_with_weight(&[], weight)?;
        } else {
            let stack = stacks.stack_for_node(node_id)?;
            builder.append_sample_with_weight(stack, weight)?;
        }
    }

    Ok(builder.build())
}

pub fn import_cpu_profile(value: &Value) -> Result<Option<ProfileGroup>> {
    let profile: CpuProfile = from_json(value)?;
    if profile.samples.is_empty() {
        return Ok(None);
    }
    Ok(Some(ProfileGroup::from_profile(build_cpu_profile(&profile, "")?)))
}

/// Flatten the nested legacy tree into modern nodes.
fn flatten_old_nodes(head: &Value) -> Result<Vec<ProfileNode>> {
    let mut nodes = Vec::new();
    let mut work = vec![head];
    while let Some(raw) = work.pop() {
        let node: OldProfileNode = from_json(raw)?;
        let children = child_nodes(raw)
            .map(|child| {
                child.get("id").and_then(Value::as_u64).ok_or_else(|| {
                    ImportError::InvalidProfile(format!("child of node {} has no id", node.id))
                })
            })
            .collect::<Result<Vec<u64>>>()?;
        nodes.push(ProfileNode {
            id: node.id,
            call_frame: CallFrame {
                function_name: node.function_name,
                script_id: node.script_id,
                url: node.url,
                line_number: node.line_number - 1,
                column_number: node.column_number - 1,
            },
            hit_count: node.hit_count,
            children,
            parent: None,
        });
        work.extend(child_nodes(raw).rev());
    }
    Ok(nodes)
}

pub fn import_old_cpu_profile(value: &Value) -> Result<Option<ProfileGroup>> {
    let old: OldCpuProfile = from_json(value)?;
    if old.samples.is_empty() {
        return Ok(None);
    }
    let start_time = old.start_time * 1e6;
    let mut previous = start_time;
    let time_deltas = old
        .timestamps
        .iter()
        .map(|&ts| {
            let delta = ts - previous;
            previous = ts;
            delta
        })
        .collect();
    let profile = CpuProfile {
        nodes: flatten_old_nodes(tree_head(value)?)?,
        start_time,
        end_time: old.end_time.map(|end| end * 1e6),
        samples: old.samples,
        time_deltas,
    };
    Ok(Some(ProfileGroup::from_profile(build_cpu_profile(&profile, "")?)))
}

pub fn import_heap_profile(value: &Value) -> Result<Option<ProfileGroup>> {
    let mut builder = ProfileBuilder::new();
    builder.set_unit(ValueUnit::Bytes);

    let mut path: Vec<FrameInfo> = Vec::new();
    let mut work: Vec<(&Value, usize)> = vec![(tree_head(value)?, 0)];
    while let Some((raw, depth)) = work.pop() {
        let node: HeapProfileNode = from_json(raw)?;
        path.truncate(depth);
        if node.call_frame.function_name != "(root)" {
            path.push(node.call_frame.to_frame_info());
        }
        if node.self_size > 0.0 {
            builder.append_sample_with_weight(&path, node.self_size)?;
        }
        let child_depth = path.len();
        work.extend(child_nodes(raw).rev().map(|child| (child, child_depth)));
    }

    if builder.sample_count() == 0 {
        return Ok(None);
    }
    Ok(Some(ProfileGroup::from_profile(builder.build())))
}

/// Samples of one `Profile`/`ProfileChunk` series.
#[derive(Debug, Default)]
struct ChunkedProfile {
    pid: u64,
    tid: u64,
    start_time: Option<f64>,
    nodes: Vec<ProfileNode>,
    samples: Vec<u64>,
    time_deltas: Vec<f64>,
}

fn event_data<'a, T: Deserialize<'a>>(event: &'a TraceEvent) -> Option<T> {
    event
        .args
        .get("data")
        .and_then(|data| T::deserialize(data).ok())
}

pub fn import_timeline(value: &Value) -> Result<Option<ProfileGroup>> {
    let Some(raw_events) = trace_event_list(value) else {
        return Ok(None);
    };

    let mut thread_names: HashMap<(u64, u64), String> = HashMap::new();
    let mut events: Vec<TraceEvent> = Vec::new();
    for raw in raw_events {
        let is_thread_name = raw.get("ph").and_then(Value::as_str) == Some("M")
            && raw.get("name").and_then(Value::as_str) == Some("thread_name");
        if !is_thread_name && !is_profile_event(raw) {
            continue;
        }
        let event: TraceEvent = from_json(raw)?;
        if is_thread_name {
            if let Some(name) = event.args.get("name").and_then(Value::as_str) {
                thread_names.insert((event.pid, event.tid), name.to_string());
            }
        } else {
            events.push(event);
        }
    }
    events.sort_by(|a, b| a.ts.total_cmp(&b.ts));

    let mut series: Vec<ChunkedProfile> = Vec::new();
    let mut series_index: HashMap<(u64, String), usize> = HashMap::new();
    let mut whole_profiles: Vec<(u64, u64, CpuProfile)> = Vec::new();

    for event in &events {
        if event.name == "CpuProfile" {
            let Some(data) = event.args.get("data") else {
                continue;
            };
            let Some(cpu_profile) = data.get("cpuProfile") else {
                continue;
            };
            let mut profile: CpuProfile = from_json(cpu_profile)?;
            if profile.time_deltas.is_empty() {
                if let Some(deltas) = data.get("timeDeltas") {
                    profile.time_deltas = from_json(deltas)?;
                }
            }
            whole_profiles.push((event.pid, event.tid, profile));
            continue;
        }

        let key = (event.pid, event.id.clone().unwrap_or_default());
        let index = *series_index.entry(key).or_insert_with(|| {
            series.push(ChunkedProfile {
                pid: event.pid,
                tid: event.tid,
                ..ChunkedProfile::default()
            });
            series.len() - 1
        });
        let chunked = &mut series[index];

        match event.name.as_str() {
            "Profile" => {
                chunked.tid = event.tid;
                if let Some(data) = event_data::<ProfileEventData>(event) {
                    chunked.start_time = Some(data.start_time);
                }
            }
            "ProfileChunk" => {
                if let Some(chunk) = event_data::<ProfileChunkData>(event) {
                    if let Some(cpu_profile) = chunk.cpu_profile {
                        chunked.nodes.extend(cpu_profile.nodes);
                        chunked.samples.extend(cpu_profile.samples);
                    }
                    chunked.time_deltas.extend(chunk.time_deltas);
                    if chunked.start_time.is_none() {
                        chunked.start_time = Some(event.ts);
                    }
                }
            }
            _ => {}
        }
    }

    let name_for = |pid: u64, tid: u64| match thread_names.get(&(pid, tid)) {
        Some(thread) => format!("{thread} (pid {pid}, tid {tid})"),
        None => format!("pid {pid}, tid {tid}"),
    };

    let mut profiles = Vec::new();
    for chunked in series {
        if chunked.samples.is_empty() {
            continue;
        }
        let cpu_profile = CpuProfile {
            nodes: chunked.nodes,
            start_time: chunked.start_time.unwrap_or(0.0),
            end_time: None,
            samples: chunked.samples,
            time_deltas: chunked.time_deltas,
        };
        profiles.push(build_cpu_profile(&cpu_profile, &name_for(chunked.pid, chunked.tid))?);
    }
    for (pid, tid, cpu_profile) in &whole_profiles {
        if cpu_profile.samples.is_empty() {
            continue;
        }
        profiles.push(build_cpu_profile(cpu_profile, &name_for(*pid, *tid))?);
    }

    let heaviest = profiles
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_weight().total_cmp(&b.total_weight()))
        .map(|(i, _)| i)
        .unwrap_or(0);
    log::debug!("chrome timeline: {} profiles", profiles.len());
    Ok(ProfileGroup::new("", profiles).map(|group| group.with_index_to_view(heaviest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CPUPROFILE: &str = r#"{
        "nodes": [
            {"id": 1, "callFrame": {"functionName": "(root)", "scriptId": 0, "url": "", "lineNumber": -1, "columnNumber": -1}, "children": [2, 4]},
            {"id": 2, "callFrame": {"functionName": "main", "scriptId": "3", "url": "app.js", "lineNumber": 0, "columnNumber": 0}, "children": [3]},
            {"id": 3, "callFrame": {"functionName": "work", "scriptId": "3", "url": "app.js", "lineNumber": 9, "columnNumber": 4}},
            {"id": 4, "callFrame": {"functionName": "(idle)", "scriptId": 0, "url": "", "lineNumber": -1, "columnNumber": -1}}
        ],
        "startTime": 1000,
        "endTime": 1100,
        "samples": [3, 3, 2, 4, 2],
        "timeDeltas": [0, 10, 20, 30, 20]
    }"#;

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn detects_cpu_profile() {
        let value = parse(SAMPLE_CPUPROFILE);
        assert!(looks_like_cpu_profile(&value));
        assert!(!looks_like_old_cpu_profile(&value));
        assert!(!looks_like_timeline(&value));
    }

    #[test]
    fn imports_cpu_profile() {
        let group = import_cpu_profile(&parse(SAMPLE_CPUPROFILE)).unwrap().unwrap();
        let profile = group.default_profile();
        assert_eq!(profile.unit(), ValueUnit::Microseconds);

        // Timestamps 1000, 1010, 1030, 1060, 1080; end 1100.
        let work = profile.frame_by_name("work").unwrap();
        assert_eq!((work.self_weight(), work.total_weight()), (30.0, 30.0));
        assert_eq!(work.line(), Some(10));
        assert_eq!(work.col(), Some(5));
        assert_eq!(work.file(), Some("app.js"));

        let main = profile.frame_by_name("main").unwrap();
        assert_eq!((main.self_weight(), main.total_weight()), (50.0, 80.0));

        // (root) is dropped and (idle) is a gap.
        assert!(profile.frame_by_name("(root)").is_none());
        assert!(profile.frame_by_name("(idle)").is_none());
        assert_eq!(profile.total_weight(), 80.0);
        assert_eq!(profile.end_value() - profile.start_value(), 100.0);
    }

    #[test]
    fn unknown_sample_node_is_an_error() {
        let value = parse(
            r#"{"nodes": [{"id": 1, "callFrame": {"functionName": "a"}}],
                "samples": [7], "timeDeltas": [0]}"#,
        );
        assert!(matches!(
            import_cpu_profile(&value),
            Err(ImportError::InvalidProfile(_))
        ));
    }

    #[test]
    fn imports_old_cpu_profile() {
        let value = parse(
            r#"{
            "head": {"id": 1, "functionName": "(root)", "url": "", "lineNumber": 0, "children": [
                {"id": 2, "functionName": "", "url": "x.js", "lineNumber": 3, "columnNumber": 1, "children": [
                    {"id": 3, "functionName": "leaf", "url": "x.js", "lineNumber": 8, "children": []}
                ]}
            ]},
            "startTime": 1.0,
            "endTime": 1.00005,
            "samples": [3, 2],
            "timestamps": [1000000, 1000020]
        }"#,
        );
        assert!(looks_like_old_cpu_profile(&value));

        let group = import_old_cpu_profile(&value).unwrap().unwrap();
        let profile = group.default_profile();
        let anonymous = profile.frame_by_name("(anonymous)").unwrap();
        assert_eq!(anonymous.line(), Some(3));
        let leaf = profile.frame_by_name("leaf").unwrap();
        assert_eq!(leaf.self_weight(), 20.0);
        assert!((anonymous.total_weight() - 50.0).abs() < 1e-6);
    }

    #[test]
    fn imports_deep_old_cpu_profile() {
        use crate::{DefaultDependencies, Dependencies};

        let depth = 300;
        let mut head = String::from(r#"{"id": 1, "functionName": "(root)", "children": ["#);
        for id in 2..=depth {
            head.push_str(&format!(
                r#"{{"id": {id}, "functionName": "f{id}", "url": "x.js", "lineNumber": {id}, "children": ["#
            ));
        }
        head.push_str(&"]}".repeat(depth));
        let text = format!(
            r#"{{"head": {head}, "startTime": 1.0, "endTime": 1.5, "samples": [{depth}], "timestamps": [1000000]}}"#
        );
        let value = DefaultDependencies.parse_json(text.as_bytes()).unwrap();

        let group = import_old_cpu_profile(&value).unwrap().unwrap();
        let profile = group.default_profile();
        assert_eq!(profile.frames().len(), depth as usize - 1);
        let outer = profile.frame_by_name("f2").unwrap();
        let leaf = profile.frame_by_name(&format!("f{depth}")).unwrap();
        assert!((outer.total_weight() - 500000.0).abs() < 1e-6);
        assert!((leaf.self_weight() - 500000.0).abs() < 1e-6);
        assert_eq!(leaf.line(), Some(depth as u32));
    }

    #[test]
    fn imports_heap_profile() {
        let value = parse(
            r#"{"head": {"callFrame": {"functionName": "(root)"}, "selfSize": 0, "children": [
                {"callFrame": {"functionName": "alloc", "url": "a.js", "lineNumber": 1}, "selfSize": 1024, "children": [
                    {"callFrame": {"functionName": "inner", "url": "a.js", "lineNumber": 5}, "selfSize": 512, "children": []}
                ]},
                {"callFrame": {"functionName": "other"}, "selfSize": 256, "children": []}
            ]}, "samples": []}"#,
        );
        assert!(looks_like_heap_profile(&value));

        let group = import_heap_profile(&value).unwrap().unwrap();
        let profile = group.default_profile();
        assert_eq!(profile.unit(), ValueUnit::Bytes);
        assert_eq!(profile.total_weight(), 1792.0);
        let alloc = profile.frame_by_name("alloc").unwrap();
        assert_eq!((alloc.self_weight(), alloc.total_weight()), (1024.0, 1536.0));
        assert_eq!(profile.roots().len(), 2);
    }

    #[test]
    fn imports_timeline_chunks() {
        let value = parse(
            r#"{"traceEvents": [
            {"ph": "M", "name": "thread_name", "pid": 1, "tid": 7, "args": {"name": "CrRendererMain"}},
            {"ph": "P", "name": "Profile", "pid": 1, "tid": 7, "ts": 100, "id": "0x1", "args": {"data": {"startTime": 100}}},
            {"ph": "P", "name": "ProfileChunk", "pid": 1, "tid": 9, "ts": 200, "id": "0x1", "args": {"data": {
                "cpuProfile": {
                    "nodes": [
                        {"id": 1, "callFrame": {"functionName": "(root)"}},
                        {"id": 2, "callFrame": {"functionName": "main", "url": "m.js", "lineNumber": 0}, "parent": 1},
                        {"id": 3, "callFrame": {"functionName": "tick", "url": "m.js", "lineNumber": 4}, "parent": 2}
                    ],
                    "samples": [2, 3]
                },
                "timeDeltas": [5, 10]
            }}},
            {"ph": "P", "name": "ProfileChunk", "pid": 1, "tid": 9, "ts": 300, "id": "0x1", "args": {"data": {
                "cpuProfile": {"samples": [3, 2]},
                "timeDeltas": [10, 10]
            }}},
            {"ph": "X", "name": "RunTask", "pid": 1, "tid": 7, "ts": 100, "dur": 5}
        ]}"#,
        );
        assert!(looks_like_timeline(&value));
        assert!(!looks_like_cpu_profile(&value));

        let group = import_timeline(&value).unwrap().unwrap();
        assert_eq!(group.profiles().len(), 1);
        let profile = group.default_profile();
        assert_eq!(profile.name(), "CrRendererMain (pid 1, tid 7)");
        // Samples at 105, 115, 125, 135; the last has no successor.
        let tick = profile.frame_by_name("tick").unwrap();
        assert_eq!(tick.self_weight(), 20.0);
        assert_eq!(profile.frame_by_name("main").unwrap().total_weight(), 30.0);
    }

    #[test]
    fn timeline_without_samples_has_no_profile() {
        let value = parse(r#"[{"name": "Profile", "pid": 1, "tid": 1, "ts": 0, "id": 1, "args": {"data": {"startTime": 0}}}]"#);
        assert!(looks_like_timeline(&value));
        assert!(import_timeline(&value).unwrap().is_none());
    }
}
