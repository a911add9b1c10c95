//! Import of folded stacks (`a;b;c 42`), as written by `stackcollapse-*`
//! scripts and most flamegraph tooling.

use crate::Result;
use crate::data_source::TextFileContent;
use canonprof_model::{FrameInfo, ProfileBuilder, ProfileGroup};
use regex::Regex;
use std::sync::LazyLock;

static SAMPLE_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+) (\d+)$").unwrap());

/// Split one folded line into its stack and count.
fn parse_line(line: &str) -> Option<(Vec<FrameInfo>, f64)> {
    // Indented lines belong to other formats (perf script frames).
    if line.starts_with(char::is_whitespace) {
        return None;
    }
    let captures = SAMPLE_LINE.captures(line)?;
    let count: u64 = captures[2].parse().ok()?;
    let stack = captures[1]
        .split(';')
        .filter(|name| !name.is_empty())
        .map(FrameInfo::new)
        .collect();
    Some((stack, count as f64))
}

/// Lines that do not look like `stack count` are skipped. `Ok(None)` when no
/// line does.
pub fn import(content: &TextFileContent) -> Result<Option<ProfileGroup>> {
    let mut builder = ProfileBuilder::new();
    let mut skipped = 0usize;

    for line in content.split_lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some((stack, count)) => builder.append_sample_with_weight(&stack, count)?,
            None => skipped += 1,
        }
    }

    if builder.sample_count() == 0 {
        return Ok(None);
    }
    if skipped > 0 {
        log::debug!("collapsed: skipped {skipped} unrecognised lines");
    }
    Ok(Some(ProfileGroup::from_profile(builder.build())))
}
