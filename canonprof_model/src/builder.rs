//! Stack-sample accumulation.
//!
//! [`ProfileBuilder`] turns an ordered sequence of `(stack, weight)` samples
//! into a [`Profile`]. It keeps the stack of call tree nodes that were open
//! for the previous sample; each new sample reuses the common prefix, closes
//! the nodes below it and opens fresh nodes for the remainder. Self weight
//! goes to the leaf, total weight to every frame on the stack (once per
//! sample, even under recursion).
//!
//! Evented sources (open/close at a timestamp) go through
//! [`ProfileBuilder::enter_frame`] and [`ProfileBuilder::leave_frame`], which
//! convert each elapsed interval into a sample of the currently open stack.

use crate::{
    CallTreeNode, Frame, FrameId, FrameInfo, FrameKey, NodeId, Profile, ValueUnit,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur while building a profile.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("sample weight {0} is not a finite number")]
    NonFiniteWeight(f64),

    #[error("event timestamp {0} is not a finite number")]
    NonFiniteTimestamp(f64),

    #[error("event at {at} is earlier than the previous event at {previous}")]
    TimeWentBackwards { at: f64, previous: f64 },

    #[error("cannot leave frame '{found}': innermost open frame is '{expected}'")]
    MismatchedLeave { expected: String, found: String },

    #[error("cannot leave frame '{0}': no frame is open")]
    UnbalancedLeave(String),
}

pub type Result<T> = std::result::Result<T, BuildError>;

/// Accumulates samples into a [`Profile`].
#[derive(Debug, Default)]
pub struct ProfileBuilder {
    name: String,
    unit: ValueUnit,
    frames: Vec<Frame>,
    frame_index: HashMap<FrameKey, FrameId>,
    /// Sample sequence number that last counted each frame's total.
    frame_stamps: Vec<u64>,
    nodes: Vec<CallTreeNode>,
    roots: Vec<NodeId>,
    /// Nodes open for the previous sample, root first.
    open: Vec<NodeId>,
    sample_seq: u64,
    total_weight: f64,
    /// Timeline position, including idle gaps.
    offset: f64,
    start_value: Option<f64>,
    evented_stack: Vec<FrameInfo>,
    last_event_at: Option<f64>,
}

impl ProfileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_unit(&mut self, unit: ValueUnit) {
        self.unit = unit;
    }

    /// Timeline origin for appended samples. Evented input takes it from the
    /// first event when unset.
    pub fn set_start_value(&mut self, at: f64) {
        self.start_value = Some(at);
    }

    /// Number of samples appended with a non-empty stack.
    pub fn sample_count(&self) -> u64 {
        self.sample_seq
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Append one sample. `stack` is ordered root first.
    ///
    /// Empty stacks are idle time: they advance the timeline and close every
    /// open node. Negative weights are ignored.
    pub fn append_sample_with_weight(&mut self, stack: &[FrameInfo], weight: f64) -> Result<()> {
        if !weight.is_finite() {
            return Err(BuildError::NonFiniteWeight(weight));
        }
        if weight < 0.0 {
            return Ok(());
        }
        if stack.is_empty() {
            self.open.clear();
            self.offset += weight;
            return Ok(());
        }

        let ids: Vec<FrameId> = stack.iter().map(|info| self.frame_id_for(info)).collect();
        self.sample_seq += 1;
        let seq = self.sample_seq;

        let prefix = self
            .open
            .iter()
            .zip(&ids)
            .take_while(|(node, frame)| self.nodes[node.0].frame == **frame)
            .count();
        self.open.truncate(prefix);

        for &frame in &ids[prefix..] {
            let id = NodeId(self.nodes.len());
            let parent = self.open.last().copied();
            self.nodes.push(CallTreeNode {
                frame,
                parent,
                children: Vec::new(),
                self_weight: 0.0,
                total_weight: 0.0,
                start: self.offset,
                end: self.offset,
            });
            match parent {
                Some(p) => self.nodes[p.0].children.push(id),
                None => self.roots.push(id),
            }
            self.open.push(id);
        }

        let end = self.offset + weight;
        for node in &self.open {
            let node = &mut self.nodes[node.0];
            node.total_weight += weight;
            node.end = end;
        }
        if let Some(leaf) = self.open.last() {
            self.nodes[leaf.0].self_weight += weight;
        }

        for id in &ids {
            if self.frame_stamps[id.0] != seq {
                self.frame_stamps[id.0] = seq;
                let frame = &mut self.frames[id.0];
                frame.total_weight += weight;
                frame.sample_count += 1;
            }
        }
        if let Some(leaf) = ids.last() {
            self.frames[leaf.0].self_weight += weight;
        }

        self.total_weight += weight;
        self.offset = end;
        Ok(())
    }

    /// Open `frame` at timestamp `at` on top of the evented stack.
    pub fn enter_frame(&mut self, frame: FrameInfo, at: f64) -> Result<()> {
        self.advance_to(at)?;
        self.evented_stack.push(frame);
        Ok(())
    }

    /// Close `frame` at timestamp `at`; it must be the innermost open frame.
    pub fn leave_frame(&mut self, frame: &FrameInfo, at: f64) -> Result<()> {
        self.advance_to(at)?;
        match self.evented_stack.last() {
            Some(top) if top.key() == frame.key() => {
                self.evented_stack.pop();
                Ok(())
            }
            Some(top) => Err(BuildError::MismatchedLeave {
                expected: top.name.clone(),
                found: frame.name.clone(),
            }),
            None => Err(BuildError::UnbalancedLeave(frame.name.clone())),
        }
    }

    /// Frames currently open through [`ProfileBuilder::enter_frame`], root first.
    pub fn evented_stack(&self) -> &[FrameInfo] {
        &self.evented_stack
    }

    fn advance_to(&mut self, at: f64) -> Result<()> {
        if !at.is_finite() {
            return Err(BuildError::NonFiniteTimestamp(at));
        }
        match self.last_event_at {
            None => {
                if self.start_value.is_none() {
                    self.start_value = Some(at);
                }
            }
            Some(previous) => {
                if at < previous {
                    return Err(BuildError::TimeWentBackwards { at, previous });
                }
                if at > previous {
                    let stack = std::mem::take(&mut self.evented_stack);
                    let appended = self.append_sample_with_weight(&stack, at - previous);
                    self.evented_stack = stack;
                    appended?;
                }
            }
        }
        self.last_event_at = Some(at);
        Ok(())
    }

    fn frame_id_for(&mut self, info: &FrameInfo) -> FrameId {
        let key = info.key();
        if let Some(&id) = self.frame_index.get(&key) {
            return id;
        }
        let id = FrameId(self.frames.len());
        self.frames.push(Frame::from_info(id, info));
        self.frame_stamps.push(0);
        self.frame_index.insert(key, id);
        id
    }

    /// Finish the profile. Frames still open on the evented stack are dropped.
    pub fn build(self) -> Profile {
        let start_value = self.start_value.unwrap_or(0.0);
        Profile {
            name: self.name,
            unit: self.unit,
            frames: self.frames,
            frame_index: self.frame_index,
            nodes: self.nodes,
            roots: self.roots,
            total_weight: self.total_weight,
            start_value,
            end_value: start_value + self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(name: &str) -> FrameInfo {
        FrameInfo::new(name)
    }

    fn assert_invariants(profile: &Profile) {
        let mut self_sum = 0.0;
        for frame in profile.frames() {
            assert!(frame.total_weight() >= frame.self_weight(), "{}", frame.name());
            self_sum += frame.self_weight();
        }
        assert!(self_sum <= profile.total_weight() + 1e-9);
        assert_eq!(profile.root_total_weight(), profile.total_weight());
    }

    #[test]
    fn flat_samples_accumulate() {
        let mut builder = ProfileBuilder::new();
        builder.append_sample_with_weight(&[f("A")], 10.0).unwrap();
        builder.append_sample_with_weight(&[f("A")], 5.0).unwrap();
        let profile = builder.build();

        let a = profile.frame_by_name("A").unwrap();
        assert_eq!(a.self_weight(), 15.0);
        assert_eq!(a.total_weight(), 15.0);
        assert_eq!(a.sample_count(), 2);
        assert_eq!(profile.frames().len(), 1);
        assert_eq!(profile.nodes().len(), 1);
        assert_invariants(&profile);
    }

    #[test]
    fn nested_samples_split_self_and_total() {
        let mut builder = ProfileBuilder::new();
        builder.append_sample_with_weight(&[f("A"), f("B")], 10.0).unwrap();
        builder.append_sample_with_weight(&[f("A"), f("C")], 5.0).unwrap();
        let profile = builder.build();

        let a = profile.frame_by_name("A").unwrap();
        let b = profile.frame_by_name("B").unwrap();
        let c = profile.frame_by_name("C").unwrap();
        assert_eq!((a.self_weight(), a.total_weight()), (0.0, 15.0));
        assert_eq!((b.self_weight(), b.total_weight()), (10.0, 10.0));
        assert_eq!((c.self_weight(), c.total_weight()), (5.0, 5.0));

        // A is shared by both samples, B and C hang off it.
        assert_eq!(profile.roots().len(), 1);
        let root = profile.node(profile.roots()[0]);
        assert_eq!(root.children().len(), 2);
        assert_invariants(&profile);
    }

    #[test]
    fn identical_frames_share_identity() {
        let mut builder = ProfileBuilder::new();
        let main = FrameInfo::new("main").with_file("a.c").with_line(4);
        builder
            .append_sample_with_weight(&[main.clone(), f("x")], 1.0)
            .unwrap();
        builder.append_sample_with_weight(&[f("y")], 1.0).unwrap();
        builder
            .append_sample_with_weight(&[main.clone(), f("z")], 1.0)
            .unwrap();
        let profile = builder.build();

        let main_frames: Vec<_> = profile
            .frames()
            .iter()
            .filter(|fr| fr.name() == "main")
            .collect();
        assert_eq!(main_frames.len(), 1);
        let id = main_frames[0].id();
        let roots_with_main = profile
            .roots()
            .iter()
            .filter(|r| profile.node(**r).frame() == id)
            .count();
        // Two distinct call tree roots, one frame identity.
        assert_eq!(roots_with_main, 2);
        assert_eq!(main_frames[0].total_weight(), 2.0);
    }

    #[test]
    fn recursion_counts_total_once() {
        let mut builder = ProfileBuilder::new();
        builder
            .append_sample_with_weight(&[f("fib"), f("fib"), f("fib")], 4.0)
            .unwrap();
        let profile = builder.build();

        let fib = profile.frame_by_name("fib").unwrap();
        assert_eq!(fib.total_weight(), 4.0);
        assert_eq!(fib.self_weight(), 4.0);
        assert_eq!(profile.nodes().len(), 3);
        assert_invariants(&profile);
    }

    #[test]
    fn idle_sample_closes_open_nodes() {
        let mut builder = ProfileBuilder::new();
        builder.append_sample_with_weight(&[f("A")], 2.0).unwrap();
        builder.append_sample_with_weight(&[], 3.0).unwrap();
        builder.append_sample_with_weight(&[f("A")], 2.0).unwrap();
        let profile = builder.build();

        assert_eq!(profile.roots().len(), 2);
        let second = profile.node(profile.roots()[1]);
        assert_eq!(second.start(), 5.0);
        assert_eq!(second.end(), 7.0);
        assert_eq!(profile.total_weight(), 4.0);
        assert_eq!(profile.end_value(), 7.0);
        assert_invariants(&profile);
    }

    #[test]
    fn root_conservation_over_mixed_stacks() {
        let stacks: Vec<(Vec<&str>, f64)> = vec![
            (vec!["a", "b", "c"], 3.0),
            (vec!["a", "b"], 1.0),
            (vec!["d"], 2.5),
            (vec!["a", "e", "a"], 7.0),
            (vec!["a", "b", "c"], 0.5),
        ];
        let mut builder = ProfileBuilder::new();
        for (stack, weight) in &stacks {
            let stack: Vec<FrameInfo> = stack.iter().map(|n| f(n)).collect();
            builder.append_sample_with_weight(&stack, *weight).unwrap();
        }
        let profile = builder.build();
        assert_eq!(profile.total_weight(), 14.0);
        assert_invariants(&profile);
    }

    #[test]
    fn non_finite_weight_is_rejected() {
        let mut builder = ProfileBuilder::new();
        let err = builder
            .append_sample_with_weight(&[f("A")], f64::NAN)
            .unwrap_err();
        assert!(matches!(err, BuildError::NonFiniteWeight(_)));
    }

    #[test]
    fn negative_weight_is_ignored() {
        let mut builder = ProfileBuilder::new();
        builder.append_sample_with_weight(&[f("A")], -3.0).unwrap();
        let profile = builder.build();
        assert!(profile.is_empty());
        assert_eq!(profile.total_weight(), 0.0);
    }

    #[test]
    fn evented_frames_become_samples() {
        let mut builder = ProfileBuilder::new();
        builder.enter_frame(f("A"), 100.0).unwrap();
        builder.enter_frame(f("B"), 102.0).unwrap();
        builder.leave_frame(&f("B"), 105.0).unwrap();
        builder.leave_frame(&f("A"), 106.0).unwrap();
        let profile = builder.build();

        let a = profile.frame_by_name("A").unwrap();
        let b = profile.frame_by_name("B").unwrap();
        assert_eq!((a.self_weight(), a.total_weight()), (3.0, 6.0));
        assert_eq!((b.self_weight(), b.total_weight()), (3.0, 3.0));
        assert_eq!(profile.start_value(), 100.0);
        assert_eq!(profile.end_value(), 106.0);
        assert_invariants(&profile);
    }

    #[test]
    fn mismatched_leave_is_an_error() {
        let mut builder = ProfileBuilder::new();
        builder.enter_frame(f("A"), 0.0).unwrap();
        let err = builder.leave_frame(&f("B"), 1.0).unwrap_err();
        assert_eq!(
            err,
            BuildError::MismatchedLeave {
                expected: "A".into(),
                found: "B".into()
            }
        );
    }

    #[test]
    fn events_must_not_go_backwards() {
        let mut builder = ProfileBuilder::new();
        builder.enter_frame(f("A"), 10.0).unwrap();
        let err = builder.leave_frame(&f("A"), 5.0).unwrap_err();
        assert!(matches!(err, BuildError::TimeWentBackwards { .. }));
    }
}
