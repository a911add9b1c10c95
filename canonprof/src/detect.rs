//! Format detection and dispatch.
//!
//! Every input goes down the same ladder, stopping at the first stage that
//! claims it:
//!
//! 1. the bytes decode as a binary pprof profile;
//! 2. the file name matches a known naming convention;
//! 3. the text parses as JSON and matches a structural predicate;
//! 4. the first chunk of text carries a known signature;
//! 5. the permissive folded-stack parser, then the `perf script` parser,
//!    find samples.
//!
//! Once stages 1 to 4 pick a format, that format's importer decides the
//! outcome: if it fails the result is no profile, and later stages are not
//! tried. The stage 5 parsers are probes and fall through silently.

use crate::data_source::{BufferSource, DataSource, FileSource, TextFileContent, TextSource};
use crate::deps::Dependencies;
use crate::{
    FormatType, Result, callgrind, chrome, collapsed, firefox, haskell, instruments, papyrus, perf,
    pprof, safari, speedscope, stackprof, trace_event, v8log,
};
use canonprof_model::ProfileGroup;
use regex::Regex;
use serde_json::Value;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

enum FileNamePattern {
    Suffix(&'static str),
    Prefix(&'static str),
    Matches(Regex),
}

impl FileNamePattern {
    fn matches(&self, file_name: &str) -> bool {
        match self {
            FileNamePattern::Suffix(suffix) => file_name.ends_with(suffix),
            FileNamePattern::Prefix(prefix) => file_name.starts_with(prefix),
            FileNamePattern::Matches(regex) => regex.is_match(file_name),
        }
    }
}

/// Naming conventions, checked in order.
static FILE_NAME_RULES: LazyLock<Vec<(FileNamePattern, FormatType)>> = LazyLock::new(|| {
    use FileNamePattern::*;
    vec![
        (Suffix(".speedscope.json"), FormatType::Speedscope),
        (Matches(Regex::new(r"Trace-\d{8}T\d{6}").unwrap()), FormatType::ChromeTimeline),
        (Matches(Regex::new(r"Profile-\d{8}T\d{6}").unwrap()), FormatType::ChromeTimeline),
        (Suffix(".chrome.json"), FormatType::ChromeTimeline),
        (Suffix(".stackprof.json"), FormatType::Stackprof),
        (Suffix(".instruments.txt"), FormatType::InstrumentsDeepCopy),
        (Suffix(".linux-perf.txt"), FormatType::LinuxPerf),
        (Suffix(".perf.txt"), FormatType::LinuxPerf),
        (Suffix(".collapsedstack.txt"), FormatType::CollapsedStack),
        (Suffix(".folded"), FormatType::CollapsedStack),
        (Suffix(".v8log.json"), FormatType::V8ProfLog),
        (Suffix(".heapprofile"), FormatType::ChromeHeapProfile),
        (Suffix(".cpuprofile"), FormatType::ChromeCpuProfile),
        (Suffix("-recording.json"), FormatType::Safari),
        (Prefix("callgrind."), FormatType::Callgrind),
    ]
});

/// The format a file name implies, if any. Only the last path component is
/// considered.
pub fn format_for_file_name(name: &str) -> Option<FormatType> {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    FILE_NAME_RULES
        .iter()
        .find(|(pattern, _)| pattern.matches(file_name))
        .map(|(_, format)| *format)
}

/// Structural predicates over parsed JSON, checked in order.
const JSON_PREDICATES: &[(fn(&Value) -> bool, FormatType)] = &[
    (speedscope::looks_like, FormatType::Speedscope),
    (firefox::looks_like, FormatType::Firefox),
    (chrome::looks_like_timeline, FormatType::ChromeTimeline),
    (chrome::looks_like_cpu_profile, FormatType::ChromeCpuProfile),
    (trace_event::looks_like, FormatType::TraceEvent),
    (chrome::looks_like_old_cpu_profile, FormatType::ChromeOldCpuProfile),
    (stackprof::looks_like, FormatType::Stackprof),
    (v8log::looks_like, FormatType::V8ProfLog),
    (chrome::looks_like_heap_profile, FormatType::ChromeHeapProfile),
    (safari::looks_like, FormatType::Safari),
    (haskell::looks_like, FormatType::Haskell),
];

/// The JSON format `value` has the shape of, if any.
pub fn detect_json_format(value: &Value) -> Option<FormatType> {
    JSON_PREDICATES
        .iter()
        .find(|(predicate, _)| predicate(value))
        .map(|(_, format)| *format)
}

/// The text format the start of a file announces, if any.
pub fn detect_text_format(first_chunk: &str) -> Option<FormatType> {
    let first_line = first_chunk.lines().next().unwrap_or("");
    if callgrind::looks_like(first_chunk) {
        Some(FormatType::Callgrind)
    } else if instruments::looks_like(first_line) {
        Some(FormatType::InstrumentsDeepCopy)
    } else if papyrus::looks_like(first_chunk) {
        Some(FormatType::Papyrus)
    } else {
        None
    }
}

fn is_json_format(format: FormatType) -> bool {
    matches!(
        format,
        FormatType::Speedscope
            | FormatType::ChromeTimeline
            | FormatType::ChromeCpuProfile
            | FormatType::ChromeOldCpuProfile
            | FormatType::ChromeHeapProfile
            | FormatType::Stackprof
            | FormatType::V8ProfLog
            | FormatType::Firefox
            | FormatType::Safari
            | FormatType::Haskell
            | FormatType::TraceEvent
    )
}

/// A file name only says which family a JSON document belongs to.
fn refine_json_format(format: FormatType, value: &Value) -> FormatType {
    match format {
        FormatType::ChromeCpuProfile if chrome::looks_like_old_cpu_profile(value) => {
            FormatType::ChromeOldCpuProfile
        }
        FormatType::ChromeTimeline
            if !chrome::looks_like_timeline(value) && trace_event::looks_like(value) =>
        {
            FormatType::TraceEvent
        }
        other => other,
    }
}

fn import_json(format: FormatType, value: &Value) -> Result<Option<ProfileGroup>> {
    match format {
        FormatType::Speedscope => speedscope::import(value),
        FormatType::ChromeTimeline => chrome::import_timeline(value),
        FormatType::ChromeCpuProfile => chrome::import_cpu_profile(value),
        FormatType::ChromeOldCpuProfile => chrome::import_old_cpu_profile(value),
        FormatType::ChromeHeapProfile => chrome::import_heap_profile(value),
        FormatType::Stackprof => stackprof::import(value),
        FormatType::V8ProfLog => v8log::import(value),
        FormatType::Firefox => firefox::import(value),
        FormatType::Safari => safari::import(value),
        FormatType::Haskell => haskell::import(value),
        FormatType::TraceEvent => trace_event::import(value),
        _ => Ok(None),
    }
}

fn import_text_format(format: FormatType, text: &TextFileContent) -> Result<Option<ProfileGroup>> {
    match format {
        FormatType::Callgrind => callgrind::import(text),
        FormatType::InstrumentsDeepCopy => instruments::import(text),
        FormatType::LinuxPerf => perf::import(text),
        FormatType::CollapsedStack => collapsed::import(text),
        FormatType::Papyrus => papyrus::import(text),
        _ => Ok(None),
    }
}

/// Outcome of an importer for a format the ladder has committed to.
fn settle(name: &str, format: FormatType, result: Result<Option<ProfileGroup>>) -> Option<ProfileGroup> {
    match result {
        Ok(Some(group)) => Some(group),
        Ok(None) => {
            log::warn!("{name}: no samples found in {format} input");
            None
        }
        Err(e) => {
            log::warn!("{name}: failed to import as {format}: {e}");
            None
        }
    }
}

fn run_ladder(
    source: &dyn DataSource,
    deps: &dyn Dependencies,
) -> io::Result<(Option<ProfileGroup>, FormatType)> {
    let name = source.name();

    // 1. Binary probe.
    {
        let bytes = source.read_as_bytes()?;
        if let Some(profile) = pprof::message::Profile::decode_probe(&bytes) {
            let format = FormatType::Pprof;
            return Ok((settle(name, format, pprof::import(&profile)), format));
        }
    }
    log::debug!("{name}: not a binary profile");

    let text = source.read_as_text(deps)?;

    // 2. File name.
    if let Some(format) = format_for_file_name(name) {
        log::debug!("{name}: file name indicates {format}");
        if !is_json_format(format) {
            return Ok((settle(name, format, import_text_format(format, &text)), format));
        }
        return Ok(match text.parse_as_json(deps) {
            Ok(value) => {
                let format = refine_json_format(format, &value);
                (settle(name, format, import_json(format, &value)), format)
            }
            Err(e) => {
                log::warn!("{name}: failed to parse {format} input as JSON: {e}");
                (None, format)
            }
        });
    }

    // 3. JSON structure.
    match text.parse_as_json(deps) {
        Ok(value) => {
            return Ok(match detect_json_format(&value) {
                Some(format) => (settle(name, format, import_json(format, &value)), format),
                None => {
                    log::debug!("{name}: JSON input matches no known structure");
                    (None, FormatType::Unknown)
                }
            });
        }
        Err(e) => log::debug!("{name}: not JSON: {e}"),
    }

    // 4. Text signatures.
    if let Some(format) = detect_text_format(text.first_chunk()) {
        return Ok((settle(name, format, import_text_format(format, &text)), format));
    }
    log::debug!("{name}: no text signature matched");

    // 5. Permissive line parsers.
    for format in [FormatType::CollapsedStack, FormatType::LinuxPerf] {
        match import_text_format(format, &text) {
            Ok(Some(group)) => return Ok((Some(group), format)),
            Ok(None) => log::debug!("{name}: no {format} samples"),
            Err(e) => log::debug!("{name}: not {format}: {e}"),
        }
    }

    Ok((None, FormatType::Unknown))
}

/// Name an unnamed group, and its unnamed profiles, after the input.
fn backfill_names(mut group: ProfileGroup, name: &str) -> ProfileGroup {
    if group.name().is_empty() {
        group.set_name(name);
    }
    for profile in group.profiles_mut() {
        if profile.name().is_empty() {
            profile.set_name(name);
        }
    }
    group
}

/// Import from any data source. Only reading the source can fail; an input
/// that is not recognised is `(None, FormatType::Unknown)`.
pub fn import_from_data_source(
    source: &dyn DataSource,
    deps: &dyn Dependencies,
) -> io::Result<(Option<ProfileGroup>, FormatType)> {
    let (group, format) = run_ladder(source, deps)?;
    let name = source.name();
    match &group {
        Some(group) => log::info!(
            "{name}: imported {} profile(s) as {format}",
            group.profiles().len()
        ),
        None => log::info!("{name}: no profile imported ({format})"),
    }
    Ok((group.map(|group| backfill_names(group, name)), format))
}

fn import_in_memory(source: &dyn DataSource, deps: &dyn Dependencies) -> (Option<ProfileGroup>, FormatType) {
    import_from_data_source(source, deps).unwrap_or_else(|e| {
        log::warn!("{}: {e}", source.name());
        (None, FormatType::Unknown)
    })
}

/// Import raw (possibly compressed) bytes. `file_name` drives the file name
/// heuristics and names the result.
pub fn import_from_bytes(
    file_name: &str,
    bytes: Vec<u8>,
    deps: &dyn Dependencies,
) -> (Option<ProfileGroup>, FormatType) {
    import_in_memory(&BufferSource::new(file_name, bytes, deps), deps)
}

/// Import text that is already decoded.
pub fn import_from_text(
    file_name: &str,
    text: impl Into<String>,
    deps: &dyn Dependencies,
) -> (Option<ProfileGroup>, FormatType) {
    import_in_memory(&TextSource::new(file_name, text), deps)
}

/// Import a file from disk.
pub fn import_from_file(
    path: impl AsRef<Path>,
    deps: &dyn Dependencies,
) -> io::Result<(Option<ProfileGroup>, FormatType)> {
    let source = FileSource::open(path, deps)?;
    import_from_data_source(&source, deps)
}
