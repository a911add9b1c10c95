//! Import of callgrind output (`valgrind --tool=callgrind`, and the many tools
//! that write the same format).
//!
//! Callgrind records a call graph, not stacks: self cost per function and
//! inclusive cost per call edge, for each event named in the `events:`
//! header. Each event becomes one profile by expanding the graph into a tree
//! from its roots, splitting every function's cost among its callers in
//! proportion to the edge costs. A call back into a function already on the
//! stack is charged to the caller as self cost.

use crate::data_source::TextFileContent;
use crate::{ImportError, Result};
use canonprof_model::{FrameInfo, Profile, ProfileBuilder, ProfileGroup, ValueUnit};
use std::collections::HashMap;

pub fn looks_like(first_chunk: &str) -> bool {
    if first_chunk.starts_with("# callgrind format") {
        return true;
    }
    let mut has_events = false;
    let mut has_fn = false;
    for line in first_chunk.lines() {
        has_events |= line.starts_with("events:");
        has_fn |= line.starts_with("fn=");
        if has_events && has_fn {
            return true;
        }
    }
    false
}

/// Names compressed as `(id) name` and referenced later as `(id)`.
#[derive(Default)]
struct NameTable {
    names: HashMap<String, String>,
}

impl NameTable {
    fn resolve(&mut self, spec: &str) -> String {
        let spec = spec.trim();
        let Some(rest) = spec.strip_prefix('(') else {
            return spec.to_string();
        };
        let Some(close) = rest.find(')') else {
            return spec.to_string();
        };
        let id = &rest[..close];
        let name = rest[close + 1..].trim();
        if name.is_empty() {
            self.names.get(id).cloned().unwrap_or_else(|| spec.to_string())
        } else {
            self.names.insert(id.to_string(), name.to_string());
            name.to_string()
        }
    }
}

/// The call graph, with one cost per event.
#[derive(Default)]
struct CallGraph {
    frames: Vec<FrameInfo>,
    frame_index: HashMap<(String, String), usize>,
    self_costs: Vec<Vec<f64>>,
    /// Callees per frame, in first-seen order.
    edges: Vec<Vec<(usize, Vec<f64>)>>,
    edge_index: HashMap<(usize, usize), usize>,
    has_callers: Vec<bool>,
}

impl CallGraph {
    fn frame(&mut self, name: &str, file: &str, events: usize) -> usize {
        let key = (name.to_string(), file.to_string());
        if let Some(&index) = self.frame_index.get(&key) {
            return index;
        }
        let index = self.frames.len();
        let file = (!file.is_empty()).then_some(file);
        self.frames.push(FrameInfo::new(name).with_optional_file(file));
        self.self_costs.push(vec![0.0; events]);
        self.edges.push(Vec::new());
        self.has_callers.push(false);
        self.frame_index.insert(key, index);
        index
    }

    fn add_self(&mut self, frame: usize, costs: &[f64]) {
        for (total, cost) in self.self_costs[frame].iter_mut().zip(costs) {
            *total += cost;
        }
    }

    fn add_edge(&mut self, from: usize, to: usize, costs: &[f64]) {
        let slot = *self.edge_index.entry((from, to)).or_insert_with(|| {
            self.edges[from].push((to, vec![0.0; costs.len()]));
            self.edges[from].len() - 1
        });
        for (total, cost) in self.edges[from][slot].1.iter_mut().zip(costs) {
            *total += cost;
        }
        if from != to {
            self.has_callers[to] = true;
        }
    }

    /// Self cost plus the cost of every outgoing call.
    fn total(&self, frame: usize, event: usize) -> f64 {
        self.self_costs[frame][event]
            + self.edges[frame]
                .iter()
                .map(|(_, costs)| costs[event])
                .sum::<f64>()
    }

    fn to_profile(&self, event: usize, name: &str) -> Result<Profile> {
        enum Step {
            Visit(usize, f64),
            Leave(f64),
        }

        let mut builder = ProfileBuilder::new();
        builder.set_name(name);
        builder.set_unit(ValueUnit::None);

        let mut visited = vec![false; self.frames.len()];
        let mut on_path = vec![false; self.frames.len()];
        let mut path: Vec<usize> = Vec::new();
        let mut stack: Vec<FrameInfo> = Vec::new();

        let roots: Vec<usize> = (0..self.frames.len()).filter(|&f| !self.has_callers[f]).collect();
        // Frames only reachable through cycles get visited as roots last.
        let stragglers = 0..self.frames.len();

        for root in roots.into_iter().chain(stragglers) {
            if visited[root] {
                continue;
            }
            let mut work = vec![Step::Visit(root, self.total(root, event))];
            while let Some(step) = work.pop() {
                match step {
                    Step::Visit(frame, weight) => {
                        if weight <= 0.0 {
                            continue;
                        }
                        if on_path[frame] {
                            builder.append_sample_with_weight(&stack, weight)?;
                            continue;
                        }
                        visited[frame] = true;
                        let total = self.total(frame, event);
                        if total <= 0.0 {
                            continue;
                        }
                        let ratio = weight / total;
                        on_path[frame] = true;
                        path.push(frame);
                        stack.push(self.frames[frame].clone());
                        work.push(Step::Leave(self.self_costs[frame][event] * ratio));
                        for (child, costs) in self.edges[frame].iter().rev() {
                            work.push(Step::Visit(*child, costs[event] * ratio));
                        }
                    }
                    Step::Leave(self_weight) => {
                        builder.append_sample_with_weight(&stack, self_weight)?;
                        if let Some(frame) = path.pop() {
                            on_path[frame] = false;
                        }
                        stack.pop();
                    }
                }
            }
        }

        Ok(builder.build())
    }
}

/// Parse a cost line: `positions… costs…`.
fn parse_costs(line: &str, positions: usize, events: usize) -> Option<Vec<f64>> {
    let mut tokens = line.split_whitespace();
    for _ in 0..positions {
        tokens.next()?;
    }
    let mut costs = vec![0.0; events];
    for (slot, token) in costs.iter_mut().zip(tokens) {
        *slot = token.parse::<u64>().ok()? as f64;
    }
    Some(costs)
}

fn is_cost_line(line: &str) -> bool {
    line.starts_with(|c: char| c.is_ascii_digit() || c == '+' || c == '-' || c == '*')
}

pub fn import(content: &TextFileContent) -> Result<Option<ProfileGroup>> {
    let mut events: Vec<String> = Vec::new();
    let mut positions = 1usize;
    let mut command = String::new();

    let mut graph = CallGraph::default();
    let mut files = NameTable::default();
    let mut functions = NameTable::default();

    let mut current_file = String::new();
    let mut current_fn: Option<usize> = None;
    let mut callee_file: Option<String> = None;
    let mut callee: Option<usize> = None;
    let mut pending_call = false;

    for (index, line) in content.split_lines().enumerate() {
        let line_num = index + 1;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parse_error = |message: &str| ImportError::Parse {
            line: line_num,
            message: message.to_string(),
        };

        if is_cost_line(line) {
            let costs = parse_costs(line, positions, events.len())
                .ok_or_else(|| parse_error("malformed cost line"))?;
            let caller = current_fn.ok_or_else(|| parse_error("cost line before any fn="))?;
            if pending_call {
                let target = callee.ok_or_else(|| parse_error("calls= without cfn="))?;
                graph.add_edge(caller, target, &costs);
                pending_call = false;
            } else {
                graph.add_self(caller, &costs);
            }
            continue;
        }

        let Some((key, value)) = line.split_once(['=', ':']) else {
            log::debug!("callgrind: skipping line {line_num}");
            continue;
        };
        match key {
            "events" => {
                events = value.split_whitespace().map(str::to_string).collect();
            }
            "positions" => {
                positions = value.split_whitespace().count().max(1);
            }
            "cmd" => command = value.trim().to_string(),
            "fl" => {
                current_file = files.resolve(value);
            }
            // Inlined code: costs still belong to the current function.
            "fi" | "fe" => {
                files.resolve(value);
            }
            "fn" => {
                if events.is_empty() {
                    return Err(parse_error("fn= before events: header"));
                }
                let name = functions.resolve(value);
                current_fn = Some(graph.frame(&name, &current_file, events.len()));
                callee_file = None;
            }
            "cfl" | "cfi" => {
                callee_file = Some(files.resolve(value));
            }
            "cfn" => {
                let name = functions.resolve(value);
                let file = callee_file.clone().unwrap_or_else(|| current_file.clone());
                callee = Some(graph.frame(&name, &file, events.len()));
            }
            "calls" => pending_call = true,
            _ => {}
        }
    }

    if events.is_empty() || graph.frames.is_empty() {
        return Ok(None);
    }

    let mut profiles = Vec::with_capacity(events.len());
    for (event, name) in events.iter().enumerate() {
        profiles.push(graph.to_profile(event, name)?);
    }
    log::debug!(
        "callgrind: {} functions, {} events",
        graph.frames.len(),
        events.len()
    );
    Ok(ProfileGroup::new(command, profiles))
}
