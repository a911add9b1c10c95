//! Canonical call-stack sample profile model.
//!
//! Every importer in the `canonprof` crate reduces its source format to the
//! types in this crate: a [`ProfileGroup`] holding one or more [`Profile`]s,
//! each of which owns a deduplicated [`Frame`] registry and an append-order
//! call tree. Profiles are produced by [`ProfileBuilder`] and are read-only
//! afterwards.
//!
//! # Example
//!
//! ```
//! use canonprof_model::{FrameInfo, ProfileBuilder};
//!
//! let main = FrameInfo::new("main").with_file("app.rs").with_line(3);
//! let work = FrameInfo::new("work").with_file("app.rs").with_line(10);
//!
//! let mut builder = ProfileBuilder::new();
//! builder.append_sample_with_weight(&[main.clone(), work], 10.0).unwrap();
//! builder.append_sample_with_weight(&[main.clone()], 5.0).unwrap();
//! let profile = builder.build();
//!
//! let main_frame = profile.frame_by_key(&main.key()).unwrap();
//! assert_eq!(main_frame.self_weight(), 5.0);
//! assert_eq!(main_frame.total_weight(), 15.0);
//! ```

mod builder;
pub mod file_format;
mod value_formatter;

pub use builder::{BuildError, ProfileBuilder};
pub use value_formatter::{ValueFormatter, ValueUnit, format_percentage};

use std::collections::HashMap;

// ============================================================================
// Frame types
// ============================================================================

/// Identity of a logical frame. Two stack entries with equal keys are the
/// same [`Frame`] within one profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey {
    pub name: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Description of one stack entry as handed to the builder by an importer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameInfo {
    pub name: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub col: Option<u32>,
}

impl FrameInfo {
    /// Create a frame description with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: None,
            line: None,
            col: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_col(mut self, col: u32) -> Self {
        self.col = Some(col);
        self
    }

    /// Set the file only when it is non-empty.
    pub fn with_optional_file(mut self, file: Option<&str>) -> Self {
        self.file = file.filter(|f| !f.is_empty()).map(str::to_string);
        self
    }

    /// The deduplication key: name, file and line.
    pub fn key(&self) -> FrameKey {
        FrameKey {
            name: self.name.clone(),
            file: self.file.clone(),
            line: self.line,
        }
    }
}

/// Index of a [`Frame`] inside its profile's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);

/// A deduplicated stack location with its accumulated weights.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub(crate) id: FrameId,
    pub(crate) name: String,
    pub(crate) file: Option<String>,
    pub(crate) line: Option<u32>,
    pub(crate) col: Option<u32>,
    pub(crate) self_weight: f64,
    pub(crate) total_weight: f64,
    pub(crate) sample_count: u64,
}

impl Frame {
    pub(crate) fn from_info(id: FrameId, info: &FrameInfo) -> Self {
        Self {
            id,
            name: info.name.clone(),
            file: info.file.clone(),
            line: info.line,
            col: info.col,
            self_weight: 0.0,
            total_weight: 0.0,
            sample_count: 0,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn col(&self) -> Option<u32> {
        self.col
    }

    pub fn key(&self) -> FrameKey {
        FrameKey {
            name: self.name.clone(),
            file: self.file.clone(),
            line: self.line,
        }
    }

    /// Weight attributed to this frame while it was the leaf of a sample.
    pub fn self_weight(&self) -> f64 {
        self.self_weight
    }

    /// Weight of every sample this frame appeared in, counted once per sample.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Number of samples whose stack contained this frame.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}

// ============================================================================
// Call tree types
// ============================================================================

/// Index of a [`CallTreeNode`] inside its profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// A node of the append-order call tree.
///
/// `start` and `end` are offsets on the profile's weight timeline; a node is
/// open for exactly the samples between them.
#[derive(Debug, Clone, PartialEq)]
pub struct CallTreeNode {
    pub(crate) frame: FrameId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) self_weight: f64,
    pub(crate) total_weight: f64,
    pub(crate) start: f64,
    pub(crate) end: f64,
}

impl CallTreeNode {
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn self_weight(&self) -> f64 {
        self.self_weight
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }
}

// ============================================================================
// Profile
// ============================================================================

/// One timeline of samples (a thread, a process, an event type).
#[derive(Debug, Clone)]
pub struct Profile {
    pub(crate) name: String,
    pub(crate) unit: ValueUnit,
    pub(crate) frames: Vec<Frame>,
    pub(crate) frame_index: HashMap<FrameKey, FrameId>,
    pub(crate) nodes: Vec<CallTreeNode>,
    pub(crate) roots: Vec<NodeId>,
    pub(crate) total_weight: f64,
    pub(crate) start_value: f64,
    pub(crate) end_value: f64,
}

impl Profile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn unit(&self) -> ValueUnit {
        self.unit
    }

    /// Formatter matching the profile's declared unit.
    pub fn formatter(&self) -> ValueFormatter {
        ValueFormatter::for_unit(self.unit)
    }

    /// All frames in first-seen order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0]
    }

    pub fn frame_by_key(&self, key: &FrameKey) -> Option<&Frame> {
        self.frame_index.get(key).map(|id| &self.frames[id.0])
    }

    /// First frame with the given name, in registry order.
    pub fn frame_by_name(&self, name: &str) -> Option<&Frame> {
        self.frames.iter().find(|f| f.name == name)
    }

    pub fn nodes(&self) -> &[CallTreeNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &CallTreeNode {
        &self.nodes[id.0]
    }

    /// Root-level call tree nodes in timeline order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Sum of every sample weight appended to the profile.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Sum of the total weights of the root-level call tree nodes.
    pub fn root_total_weight(&self) -> f64 {
        self.roots.iter().map(|r| self.nodes[r.0].total_weight).sum()
    }

    pub fn start_value(&self) -> f64 {
        self.start_value
    }

    pub fn end_value(&self) -> f64 {
        self.end_value
    }

    /// Frames of the path from the root to `node`, root first.
    pub fn stack_for_node(&self, node: NodeId) -> Vec<FrameId> {
        let mut stack = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let n = &self.nodes[id.0];
            stack.push(n.frame);
            current = n.parent;
        }
        stack.reverse();
        stack
    }

    /// Frames ordered by descending self weight.
    pub fn frames_by_self_weight(&self) -> Vec<&Frame> {
        let mut frames: Vec<&Frame> = self.frames.iter().collect();
        frames.sort_by(|a, b| {
            b.self_weight
                .partial_cmp(&a.self_weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        frames
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ============================================================================
// ProfileGroup
// ============================================================================

/// One or more profiles parsed from a single input.
#[derive(Debug, Clone)]
pub struct ProfileGroup {
    name: String,
    index_to_view: usize,
    profiles: Vec<Profile>,
}

impl ProfileGroup {
    /// Create a group; returns `None` when `profiles` is empty.
    pub fn new(name: impl Into<String>, profiles: Vec<Profile>) -> Option<Self> {
        if profiles.is_empty() {
            return None;
        }
        Some(Self {
            name: name.into(),
            index_to_view: 0,
            profiles,
        })
    }

    /// A group holding a single profile, named after it.
    pub fn from_profile(profile: Profile) -> Self {
        Self {
            name: profile.name.clone(),
            index_to_view: 0,
            profiles: vec![profile],
        }
    }

    /// Select the default profile. Out of range indices select the first.
    pub fn with_index_to_view(mut self, index: usize) -> Self {
        self.index_to_view = if index < self.profiles.len() { index } else { 0 };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn index_to_view(&self) -> usize {
        self.index_to_view
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut [Profile] {
        &mut self.profiles
    }

    pub fn default_profile(&self) -> &Profile {
        &self.profiles[self.index_to_view]
    }

    pub fn into_profiles(self) -> Vec<Profile> {
        self.profiles
    }
}
