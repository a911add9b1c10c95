//! Profile import and canonicalization.
//!
//! This crate recognises the output of many profilers and converts it into the
//! canonical model from [`canonprof_model`]. Detection and dispatch live in
//! [`detect`]; every supported format has its own importer module.
//!
//! # Importers
//!
//! - [`speedscope`] - canonical JSON (speedscope file format)
//! - [`pprof`] - binary protobuf profiles, with a hand-written wire codec
//! - [`chrome`] - Chrome timelines, `.cpuprofile` (both variants), heap profiles
//! - [`trace_event`] - generic trace event `B`/`E`/`X` streams
//! - [`firefox`], [`safari`] - browser profiler exports
//! - [`perf`], [`collapsed`], [`callgrind`], [`instruments`] - native tool text output
//! - [`stackprof`], [`v8log`], [`haskell`], [`papyrus`] - language runtime logs
//!
//! # Example
//!
//! ```no_run
//! use canonprof::{DefaultDependencies, import_from_file};
//!
//! let (group, format) = import_from_file("profile.cpuprofile", &DefaultDependencies).unwrap();
//! println!("detected {format}");
//! if let Some(group) = group {
//!     for profile in group.profiles() {
//!         println!("{}: {}", profile.name(), profile.formatter().format(profile.total_weight()));
//!     }
//! }
//! ```

pub mod callgrind;
pub mod chrome;
pub mod collapsed;
pub mod data_source;
pub mod deps;
pub mod detect;
pub mod firefox;
pub mod haskell;
pub mod instruments;
pub mod papyrus;
pub mod perf;
pub mod pprof;
pub mod safari;
pub mod speedscope;
pub mod stackprof;
pub mod trace_event;
pub mod v8log;

pub use canonprof_model;
pub use data_source::{BufferSource, DataSource, FileSource, TextFileContent, TextSource};
pub use deps::{DefaultDependencies, Dependencies};
pub use detect::{import_from_bytes, import_from_data_source, import_from_file, import_from_text};

use canonprof_model::BuildError;
use canonprof_model::file_format::FileFormatError;
use std::fmt;
use thiserror::Error;

/// Errors an importer raises once it has recognised its format.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary decode error: {0}")]
    Decode(#[from] pprof::wire::DecodeError),

    #[error("profile build error: {0}")]
    Build(#[from] BuildError),

    #[error("canonical file error: {0}")]
    FileFormat(#[from] FileFormatError),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, ImportError>;

/// Which source format an import used (or recognised but failed to parse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatType {
    Speedscope,
    Pprof,
    ChromeTimeline,
    ChromeCpuProfile,
    ChromeOldCpuProfile,
    ChromeHeapProfile,
    Stackprof,
    InstrumentsDeepCopy,
    LinuxPerf,
    CollapsedStack,
    V8ProfLog,
    Firefox,
    Safari,
    Haskell,
    TraceEvent,
    Callgrind,
    Papyrus,
    Unknown,
}

impl FormatType {
    pub fn name(self) -> &'static str {
        match self {
            FormatType::Speedscope => "canonical-json",
            FormatType::Pprof => "binary-protobuf",
            FormatType::ChromeTimeline => "browser-timeline",
            FormatType::ChromeCpuProfile => "browser-cpu-profile",
            FormatType::ChromeOldCpuProfile => "browser-cpu-profile-legacy",
            FormatType::ChromeHeapProfile => "browser-heap-profile",
            FormatType::Stackprof => "ruby-sampling-profiler",
            FormatType::InstrumentsDeepCopy => "native-profiler-deepcopy",
            FormatType::LinuxPerf => "linux-kernel-perf-script",
            FormatType::CollapsedStack => "folded-stack-text",
            FormatType::V8ProfLog => "runtime-log-json",
            FormatType::Firefox => "firefox-profiler",
            FormatType::Safari => "safari-profiler",
            FormatType::Haskell => "haskell-runtime-profile",
            FormatType::TraceEvent => "generic-trace-event",
            FormatType::Callgrind => "callgrind-text",
            FormatType::Papyrus => "papyrus-log-text",
            FormatType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shorthand for deserializing a borrowed JSON value into a format's types.
pub(crate) fn from_json<'a, T: serde::Deserialize<'a>>(value: &'a serde_json::Value) -> Result<T> {
    Ok(T::deserialize(value)?)
}
