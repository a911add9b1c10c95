//! Canonical JSON interchange format.
//!
//! This is the speedscope file format: a `shared.frames` table plus a list of
//! profiles that are either `sampled` (stacks of frame indices with weights)
//! or `evented` (open/close events at timeline positions). It is the one
//! format that is both imported and exported.
//!
//! # Example
//!
//! ```no_run
//! use canonprof_model::file_format::CanonicalFile;
//! use std::fs::File;
//!
//! let file = CanonicalFile::parse(File::open("profile.speedscope.json").unwrap()).unwrap();
//! let group = file.to_profile_group().unwrap();
//! println!("{} profiles", group.profiles().len());
//! ```

use crate::{
    BuildError, FrameInfo, FrameKey, NodeId, Profile, ProfileBuilder, ProfileGroup, ValueUnit,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use thiserror::Error;

pub const SCHEMA_URL: &str = "https://www.speedscope.app/file-format-schema.json";

/// Errors that can occur reading or writing canonical JSON.
#[derive(Error, Debug)]
pub enum FileFormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("profile '{profile}' references non-existent frame {frame}")]
    InvalidFrameReference { profile: String, frame: usize },

    #[error("profile '{profile}' has {samples} samples but {weights} weights")]
    WeightCountMismatch {
        profile: String,
        samples: usize,
        weights: usize,
    },

    #[error("profile '{profile}': {source}")]
    Build {
        profile: String,
        #[source]
        source: BuildError,
    },

    #[error("file contains no profiles")]
    NoProfiles,
}

pub type Result<T> = std::result::Result<T, FileFormatError>;

// ============================================================================
// Schema types
// ============================================================================

/// Top-level canonical JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalFile {
    #[serde(rename = "$schema", default = "default_schema")]
    pub schema: String,
    pub shared: SharedData,
    pub profiles: Vec<FileProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_profile_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exporter: Option<String>,
}

fn default_schema() -> String {
    SCHEMA_URL.to_string()
}

/// Data shared between profiles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SharedData {
    pub frames: Vec<FileFrame>,
}

/// A frame in the shared table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFrame {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col: Option<u32>,
}

impl FileFrame {
    fn to_frame_info(&self) -> FrameInfo {
        FrameInfo {
            name: self.name.clone(),
            file: self.file.clone(),
            line: self.line,
            col: self.col,
        }
    }
}

/// One profile, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileProfile {
    Evented(EventedProfile),
    Sampled(SampledProfile),
}

impl FileProfile {
    pub fn name(&self) -> &str {
        match self {
            FileProfile::Evented(p) => &p.name,
            FileProfile::Sampled(p) => &p.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventedProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit: ValueUnit,
    #[serde(default)]
    pub start_value: f64,
    #[serde(default)]
    pub end_value: f64,
    pub events: Vec<FileEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit: ValueUnit,
    #[serde(default)]
    pub start_value: f64,
    #[serde(default)]
    pub end_value: f64,
    /// Stacks of frame indices, root first.
    pub samples: Vec<Vec<usize>>,
    pub weights: Vec<f64>,
}

/// Open (`O`) or close (`C`) event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "C")]
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub at: f64,
    pub frame: usize,
}

// ============================================================================
// Reading
// ============================================================================

impl CanonicalFile {
    /// Parse a canonical JSON document from any `Read`-able source.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Parse from an already decoded JSON value.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Ok(CanonicalFile::deserialize(value)?)
    }

    /// Build the canonical profiles described by this document.
    pub fn to_profile_group(&self) -> Result<ProfileGroup> {
        let frames: Vec<FrameInfo> = self
            .shared
            .frames
            .iter()
            .map(FileFrame::to_frame_info)
            .collect();

        let mut profiles = Vec::with_capacity(self.profiles.len());
        for file_profile in &self.profiles {
            profiles.push(build_file_profile(file_profile, &frames)?);
        }

        let name = self.name.clone().unwrap_or_default();
        let group = ProfileGroup::new(name, profiles).ok_or(FileFormatError::NoProfiles)?;
        Ok(group.with_index_to_view(self.active_profile_index.unwrap_or(0)))
    }

    /// Write this document as JSON.
    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }
}

fn frame_at<'a>(frames: &'a [FrameInfo], profile: &str, index: usize) -> Result<&'a FrameInfo> {
    frames
        .get(index)
        .ok_or_else(|| FileFormatError::InvalidFrameReference {
            profile: profile.to_string(),
            frame: index,
        })
}

fn build_file_profile(file_profile: &FileProfile, frames: &[FrameInfo]) -> Result<Profile> {
    let name = file_profile.name().to_string();
    let wrap = |source: BuildError| FileFormatError::Build {
        profile: name.clone(),
        source,
    };

    let mut builder = ProfileBuilder::new();
    builder.set_name(name.clone());

    match file_profile {
        FileProfile::Sampled(sampled) => {
            builder.set_unit(sampled.unit);
            builder.set_start_value(sampled.start_value);
            if sampled.samples.len() != sampled.weights.len() {
                return Err(FileFormatError::WeightCountMismatch {
                    profile: name.clone(),
                    samples: sampled.samples.len(),
                    weights: sampled.weights.len(),
                });
            }
            let mut stack: Vec<FrameInfo> = Vec::new();
            for (sample, &weight) in sampled.samples.iter().zip(&sampled.weights) {
                stack.clear();
                for &index in sample {
                    stack.push(frame_at(frames, &name, index)?.clone());
                }
                builder
                    .append_sample_with_weight(&stack, weight)
                    .map_err(wrap)?;
            }
        }
        FileProfile::Evented(evented) => {
            builder.set_unit(evented.unit);
            for event in &evented.events {
                let frame = frame_at(frames, &name, event.frame)?;
                let applied = match event.kind {
                    EventKind::Open => builder.enter_frame(frame.clone(), event.at),
                    EventKind::Close => builder.leave_frame(frame, event.at),
                };
                applied.map_err(wrap)?;
            }
        }
    }

    Ok(builder.build())
}

// ============================================================================
// Writing
// ============================================================================

/// Export a profile group as a canonical JSON document.
///
/// Every profile is written `evented` by replaying its append-order call
/// tree, so importing the export reproduces the same weights.
pub fn export_profile_group(group: &ProfileGroup, exporter: &str) -> CanonicalFile {
    let mut shared = SharedData::default();
    let mut shared_index: HashMap<FrameKey, usize> = HashMap::new();

    let profiles = group
        .profiles()
        .iter()
        .map(|profile| {
            // Map this profile's frame ids to shared indices.
            let frame_map: Vec<usize> = profile
                .frames()
                .iter()
                .map(|frame| {
                    *shared_index.entry(frame.key()).or_insert_with(|| {
                        shared.frames.push(FileFrame {
                            name: frame.name().to_string(),
                            file: frame.file().map(str::to_string),
                            line: frame.line(),
                            col: frame.col(),
                        });
                        shared.frames.len() - 1
                    })
                })
                .collect();

            let mut events = Vec::new();
            for &root in profile.roots() {
                push_node_events(profile, root, &frame_map, &mut events);
            }

            FileProfile::Evented(EventedProfile {
                name: profile.name().to_string(),
                unit: profile.unit(),
                start_value: profile.start_value(),
                end_value: profile.end_value(),
                events,
            })
        })
        .collect();

    CanonicalFile {
        schema: SCHEMA_URL.to_string(),
        shared,
        profiles,
        name: Some(group.name().to_string()),
        active_profile_index: Some(group.index_to_view()),
        exporter: Some(exporter.to_string()),
    }
}

fn push_node_events(
    profile: &Profile,
    node_id: NodeId,
    frame_map: &[usize],
    events: &mut Vec<FileEvent>,
) {
    // Iterative to survive arbitrarily deep call trees.
    enum Step {
        Open(NodeId),
        Close(NodeId),
    }
    let mut work = vec![Step::Open(node_id)];
    while let Some(step) = work.pop() {
        match step {
            Step::Open(id) => {
                let node = profile.node(id);
                events.push(FileEvent {
                    kind: EventKind::Open,
                    at: profile.start_value() + node.start(),
                    frame: frame_map[node.frame().0],
                });
                work.push(Step::Close(id));
                for &child in node.children().iter().rev() {
                    work.push(Step::Open(child));
                }
            }
            Step::Close(id) => {
                let node = profile.node(id);
                events.push(FileEvent {
                    kind: EventKind::Close,
                    at: profile.start_value() + node.end(),
                    frame: frame_map[node.frame().0],
                });
            }
        }
    }
}
