//! Import of generic Trace Event Format files: duration (`B`/`E`) and
//! complete (`X`) events, one profile per (pid, tid).

use crate::{Result, from_json};
use canonprof_model::{FrameInfo, Profile, ProfileBuilder, ProfileGroup, ValueUnit};
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(default)]
    name: String,
    #[serde(default)]
    ph: String,
    #[serde(default)]
    pid: Value,
    #[serde(default)]
    tid: Value,
    /// Microseconds.
    #[serde(default)]
    ts: f64,
    #[serde(default)]
    dur: Option<f64>,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MarkerKind {
    // Closes sort before opens at the same timestamp.
    Close,
    Open,
}

/// One open or close on a thread's timeline.
#[derive(Debug)]
struct Marker {
    at: f64,
    kind: MarkerKind,
    /// For opens the matching close time, for closes the matching open time,
    /// when known.
    partner: Option<f64>,
    name: String,
    thread: (String, String),
}

fn event_list(value: &Value) -> Option<&Vec<Value>> {
    value
        .as_array()
        .or_else(|| value.get("traceEvents").and_then(Value::as_array))
}

pub fn looks_like(value: &Value) -> bool {
    if value.get("traceEvents").is_some_and(Value::is_array) {
        return true;
    }
    value
        .as_array()
        .and_then(|events| events.first())
        .is_some_and(|event| event.get("ph").is_some())
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "0".to_string(),
        other => other.to_string(),
    }
}

/// Outer frames open first and close last when timestamps tie.
fn compare_markers(a: &Marker, b: &Marker) -> Ordering {
    // Opens: the later close opens first. Closes: the later open closes first.
    let a_partner = a.partner.unwrap_or(f64::NEG_INFINITY);
    let b_partner = b.partner.unwrap_or(f64::NEG_INFINITY);
    a.at
        .total_cmp(&b.at)
        .then(a.kind.cmp(&b.kind))
        .then_with(|| b_partner.total_cmp(&a_partner))
}

fn close(builder: &mut ProfileBuilder, name: &str, at: f64) -> Result<()> {
    let stack = builder.evented_stack();
    let Some(position) = stack.iter().rposition(|frame| name.is_empty() || frame.name == name) else {
        log::debug!("trace events: ignoring unmatched end of '{name}' at {at}");
        return Ok(());
    };
    let to_close: Vec<FrameInfo> = stack[position..].iter().rev().cloned().collect();
    for frame in &to_close {
        builder.leave_frame(frame, at)?;
    }
    Ok(())
}

pub fn import(value: &Value) -> Result<Option<ProfileGroup>> {
    let Some(raw_events) = event_list(value) else {
        return Ok(None);
    };

    let mut thread_names: HashMap<(String, String), String> = HashMap::new();
    let mut markers: Vec<Marker> = Vec::new();
    for raw in raw_events {
        let event: Event = from_json(raw)?;
        let thread = (id_string(&event.pid), id_string(&event.tid));
        match event.ph.as_str() {
            "B" => markers.push(Marker {
                at: event.ts,
                kind: MarkerKind::Open,
                partner: None,
                name: event.name,
                thread,
            }),
            "E" => markers.push(Marker {
                at: event.ts,
                kind: MarkerKind::Close,
                partner: None,
                name: event.name,
                thread,
            }),
            "X" => {
                let dur = event.dur.unwrap_or(0.0);
                if dur <= 0.0 {
                    continue;
                }
                let end = event.ts + dur;
                markers.push(Marker {
                    at: event.ts,
                    kind: MarkerKind::Open,
                    partner: Some(end),
                    name: event.name.clone(),
                    thread: thread.clone(),
                });
                markers.push(Marker {
                    at: end,
                    kind: MarkerKind::Close,
                    partner: Some(event.ts),
                    name: event.name,
                    thread,
                });
            }
            "M" if event.name == "thread_name" => {
                if let Some(name) = event.args.get("name").and_then(Value::as_str) {
                    thread_names.insert(thread, name.to_string());
                }
            }
            _ => {}
        }
    }
    markers.sort_by(compare_markers);

    let mut order: Vec<(String, String)> = Vec::new();
    let mut builders: HashMap<(String, String), ProfileBuilder> = HashMap::new();
    for marker in markers {
        let builder = builders.entry(marker.thread.clone()).or_insert_with(|| {
            order.push(marker.thread.clone());
            ProfileBuilder::new()
        });
        match marker.kind {
            MarkerKind::Open => builder.enter_frame(FrameInfo::new(marker.name), marker.at)?,
            MarkerKind::Close => close(builder, &marker.name, marker.at)?,
        }
    }

    let mut profiles: Vec<Profile> = Vec::new();
    for thread in order {
        let Some(mut builder) = builders.remove(&thread) else {
            continue;
        };
        if builder.sample_count() == 0 {
            continue;
        }
        let (pid, tid) = &thread;
        builder.set_name(match thread_names.get(&thread) {
            Some(name) => format!("{name} (pid {pid}, tid {tid})"),
            None => format!("pid {pid}, tid {tid}"),
        });
        builder.set_unit(ValueUnit::Microseconds);
        profiles.push(builder.build());
    }
    Ok(ProfileGroup::new("", profiles))
}
