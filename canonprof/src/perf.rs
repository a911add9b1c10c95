//! Import of Linux `perf script` output.
//!
//! Each sample is a header line followed by one frame per line, leaf first,
//! and terminated by a blank line:
//!
//! ```text
//! server  1234/1234 [000] 12345.678901:     100000 cycles:
//! 	401234 main+0x54 (/usr/bin/server)
//! 	7f1234567890 __libc_start_main+0x80 (/lib/x86_64-linux-gnu/libc.so.6)
//! ```
//!
//! One profile is produced per `comm pid/tid`, weighted by the sample period.

use crate::data_source::TextFileContent;
use crate::{ImportError, Result};
use canonprof_model::{FrameInfo, Profile, ProfileBuilder, ProfileGroup, ValueUnit};
use std::collections::HashMap;

/// One sample header and the frames below it.
#[derive(Debug, Clone)]
struct PerfSample {
    comm: String,
    pid: u64,
    tid: u64,
    timestamp: Option<f64>,
    period: u64,
    event: String,
    frames: Vec<PerfFrame>,
}

/// One frame line of a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PerfFrame {
    ip: String,
    symbol: String,
    offset: Option<String>,
    dso: String,
}

impl PerfFrame {
    fn to_frame_info(&self) -> FrameInfo {
        let file = (!self.dso.is_empty()).then_some(self.dso.as_str());
        FrameInfo::new(self.symbol.as_str()).with_optional_file(file)
    }
}

/// Per-thread accumulation, in first-seen order.
struct ThreadProfile {
    builder: ProfileBuilder,
    events: Vec<String>,
}

/// Parse a sample header line.
/// Format: `comm pid[/tid] [cpu] timestamp: [period] event:`
/// Examples:
///   `server  1234 [000] 12345.678901:     123456 cycles:`
///   `Web Content  1234/5678 [000] 12345.678901:     123456 cycles:`
fn parse_sample_header(line: &str) -> std::result::Result<PerfSample, String> {
    let line = line.trim();

    let colon_pos = line.find(": ").or_else(|| line.find(':')).ok_or("no colon found")?;
    let before_colon = &line[..colon_pos];
    let after_colon = &line[colon_pos + 1..];

    let after_parts: Vec<&str> = after_colon.split_whitespace().collect();
    if after_parts.is_empty() {
        return Err("no event info after colon".into());
    }

    let (period, event) = match after_parts[0].parse::<u64>() {
        Ok(period) if after_parts.len() >= 2 => {
            (period, after_parts[1].trim_end_matches(':').to_string())
        }
        // Period omitted.
        _ => (1, after_parts[0].trim_end_matches(':').to_string()),
    };

    // The command name may contain spaces, so the pid is the first token
    // after it that parses as `pid` or `pid/tid`.
    let parts: Vec<&str> = before_colon.split_whitespace().collect();
    let pid_index = parts
        .iter()
        .skip(1)
        .position(|part| parse_pid_tid(part).is_ok())
        .map(|i| i + 1)
        .ok_or("no pid after command name")?;

    let comm = parts[..pid_index].join(" ");
    let (pid, tid) = parse_pid_tid(parts[pid_index])?;

    let mut timestamp = None;
    for part in &parts[pid_index + 1..] {
        if part.contains('.') && !part.starts_with('[') {
            timestamp = part.parse().ok();
        }
    }

    Ok(PerfSample {
        comm,
        pid,
        tid,
        timestamp,
        period,
        event,
        frames: Vec::new(),
    })
}

fn parse_pid_tid(s: &str) -> std::result::Result<(u64, u64), String> {
    if let Some(slash_pos) = s.find('/') {
        let pid = s[..slash_pos].parse().map_err(|_| "invalid pid")?;
        let tid = s[slash_pos + 1..].parse().map_err(|_| "invalid tid")?;
        Ok((pid, tid))
    } else {
        let pid = s.parse().map_err(|_| "invalid pid")?;
        Ok((pid, pid)) // tid defaults to pid if not specified
    }
}

/// Parse a stack frame line.
/// Format: `\t ip symbol+offset (dso)`
/// Examples:
///   `\t 401234 main+0x54 (/usr/bin/server)`
///   `\t ffffffff81234567 native_write_msr+0x6 ([kernel.kallsyms])`
fn parse_frame(line: &str) -> Option<PerfFrame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (before_dso, dso) = match (line.rfind('('), line.rfind(')')) {
        (Some(start), Some(end)) if end > start && line.ends_with(')') => {
            (line[..start].trim(), line[start + 1..end].to_string())
        }
        _ => (line, String::new()),
    };

    let mut parts = before_dso.splitn(2, char::is_whitespace);
    let ip = parts.next()?.to_string();

    // Demangled symbols may contain spaces.
    let symbol_part = match parts.next().map(str::trim) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => format!("0x{ip}"),
    };

    let (symbol, offset) = match symbol_part.rfind('+') {
        Some(plus_pos) if symbol_part[plus_pos + 1..].starts_with("0x") => (
            symbol_part[..plus_pos].to_string(),
            Some(symbol_part[plus_pos + 1..].to_string()),
        ),
        _ => (symbol_part, None),
    };

    Some(PerfFrame {
        ip,
        symbol,
        offset,
        dso,
    })
}

fn thread_key(sample: &PerfSample) -> String {
    if sample.pid == sample.tid {
        format!("{} {}", sample.comm, sample.pid)
    } else {
        format!("{} {}/{}", sample.comm, sample.pid, sample.tid)
    }
}

fn flush_sample(
    sample: PerfSample,
    threads: &mut Vec<ThreadProfile>,
    index: &mut HashMap<String, usize>,
) -> Result<()> {
    if sample.frames.is_empty() {
        return Ok(());
    }
    let key = thread_key(&sample);
    let slot = *index.entry(key.clone()).or_insert_with(|| {
        let mut builder = ProfileBuilder::new();
        builder.set_name(key);
        builder.set_unit(ValueUnit::None);
        threads.push(ThreadProfile {
            builder,
            events: Vec::new(),
        });
        threads.len() - 1
    });
    let thread = &mut threads[slot];
    if !thread.events.contains(&sample.event) {
        thread.events.push(sample.event.clone());
    }

    // Leaf first in the output.
    let stack: Vec<FrameInfo> = sample.frames.iter().rev().map(PerfFrame::to_frame_info).collect();
    thread
        .builder
        .append_sample_with_weight(&stack, sample.period as f64)?;
    Ok(())
}

/// Import `perf script` text. `Ok(None)` when no sample with a stack is found.
pub fn import(content: &TextFileContent) -> Result<Option<ProfileGroup>> {
    let mut threads: Vec<ThreadProfile> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut current_sample: Option<PerfSample> = None;
    let mut first_timestamp: Option<f64> = None;

    for (line_num, line) in content.split_lines().enumerate() {
        let line_num = line_num + 1;

        if line.trim().is_empty() || line.starts_with('#') {
            if let Some(sample) = current_sample.take() {
                flush_sample(sample, &mut threads, &mut index)?;
            }
            continue;
        }

        if !line.starts_with('\t') && !line.starts_with(' ') {
            if let Some(sample) = current_sample.take() {
                flush_sample(sample, &mut threads, &mut index)?;
            }

            match parse_sample_header(&line) {
                Ok(sample) => {
                    if first_timestamp.is_none() {
                        first_timestamp = sample.timestamp;
                    }
                    current_sample = Some(sample);
                }
                Err(message) => {
                    // `perf script --header` metadata.
                    if !line.contains(':') {
                        continue;
                    }
                    return Err(ImportError::Parse {
                        line: line_num,
                        message,
                    });
                }
            }
        } else if let Some(ref mut sample) = current_sample {
            if let Some(frame) = parse_frame(&line) {
                sample.frames.push(frame);
            }
        }
    }

    if let Some(sample) = current_sample {
        flush_sample(sample, &mut threads, &mut index)?;
    }

    let profiles: Vec<Profile> = threads
        .into_iter()
        .map(|thread| {
            log::debug!("perf: thread events {:?}", thread.events);
            thread.builder.build()
        })
        .collect();
    if let Some(ts) = first_timestamp {
        log::debug!("perf: {} threads, first sample at {ts}", profiles.len());
    }
    Ok(ProfileGroup::new("", profiles))
}
