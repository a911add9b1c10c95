//! Import of GHC JSON cost-centre profiles (`+RTS -pj`).
//!
//! The cost-centre tree carries self ticks and self allocation per node, so
//! one file yields two profiles: time and allocation.

use crate::{ImportError, Result, from_json};
use canonprof_model::{FrameInfo, ProfileBuilder, ProfileGroup, ValueUnit};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// `File.hs:12:3-8` or `File.hs:(12,3)-(14,8)`.
static SRC_LOC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+?):\(?(\d+)").unwrap());

#[derive(Debug, Deserialize)]
struct CostCentre {
    id: u64,
    label: String,
    module: String,
    #[serde(default)]
    src_loc: String,
}

#[derive(Debug, Deserialize)]
struct CostCentreNode {
    id: u64,
    #[serde(default)]
    ticks: u64,
    #[serde(default)]
    alloc: u64,
}

#[derive(Debug, Deserialize)]
struct GhcProfile {
    program: String,
    /// Microseconds per tick.
    #[serde(default)]
    tick_interval: f64,
    cost_centres: Vec<CostCentre>,
}

pub fn looks_like(value: &Value) -> bool {
    let has = |key: &str| value.get(key).is_some();
    (has("program") && has("cost_centres") && has("profile"))
        || (has("rts_arguments") && has("initial_capabilities"))
}

impl CostCentre {
    fn to_frame_info(&self) -> FrameInfo {
        let mut frame = FrameInfo::new(format!("{}.{}", self.module, self.label));
        if let Some(captures) = SRC_LOC.captures(&self.src_loc) {
            if !captures[1].starts_with('<') {
                frame = frame.with_file(&captures[1]);
                frame.line = captures[2].parse().ok();
            }
        }
        frame
    }
}

pub fn import(value: &Value) -> Result<Option<ProfileGroup>> {
    let ghc: GhcProfile = from_json(value)?;
    let frames: HashMap<u64, FrameInfo> = ghc
        .cost_centres
        .iter()
        .map(|cc| (cc.id, cc.to_frame_info()))
        .collect();

    let mut time = ProfileBuilder::new();
    time.set_name(format!("{} time", ghc.program));
    time.set_unit(ValueUnit::Microseconds);
    let mut alloc = ProfileBuilder::new();
    alloc.set_name(format!("{} allocation", ghc.program));
    alloc.set_unit(ValueUnit::Bytes);

    let root = value
        .get("profile")
        .ok_or_else(|| ImportError::InvalidProfile("missing cost-centre tree".to_string()))?;

    // The tree is walked one node at a time; only the node's own fields are
    // deserialized.
    let mut path: Vec<FrameInfo> = Vec::new();
    let mut work: Vec<(&Value, usize)> = vec![(root, 0)];
    while let Some((raw, depth)) = work.pop() {
        let node: CostCentreNode = from_json(raw)?;
        path.truncate(depth);
        let frame = frames.get(&node.id).ok_or_else(|| {
            ImportError::InvalidProfile(format!("profile references unknown cost centre {}", node.id))
        })?;
        path.push(frame.clone());

        time.append_sample_with_weight(&path, node.ticks as f64 * ghc.tick_interval)?;
        alloc.append_sample_with_weight(&path, node.alloc as f64)?;

        let children = raw.get("children").and_then(Value::as_array).into_iter().flatten();
        work.extend(children.rev().map(|child| (child, depth + 1)));
    }

    Ok(ProfileGroup::new(
        ghc.program.as_str(),
        vec![time.build(), alloc.build()],
    ))
}
