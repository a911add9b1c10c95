//! Import of an Instruments call tree copied with "Deep Copy".
//!
//! The clipboard text is tab separated with a header row. The `Symbol Name`
//! column is indented by one space per level of depth, and the weight column
//! holds each node's total (`1003.0ms  100.0%`, `1.20 s`, `12.50 KB`).

use crate::data_source::TextFileContent;
use crate::{ImportError, Result};
use canonprof_model::{FrameInfo, ProfileBuilder, ProfileGroup, ValueUnit};
use regex::Regex;
use std::sync::LazyLock;

static VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([\d.,]+)\s*([A-Za-zµ]*)").unwrap());

/// Weight columns in order of preference.
const WEIGHT_COLUMNS: &[&str] = &["Running Time", "Weight", "Bytes Used", "Count"];

pub fn looks_like(first_line: &str) -> bool {
    first_line.contains("\tSymbol Name")
}

/// Parse a weight cell into milliseconds or bytes.
fn parse_value(cell: &str) -> Option<f64> {
    let captures = VALUE.captures(cell)?;
    let number: f64 = captures[1].replace(',', "").parse().ok()?;
    let scale = match &captures[2] {
        "ns" => 1e-6,
        "µs" | "us" => 1e-3,
        "" | "ms" | "B" | "Bytes" | "bytes" => 1.0,
        "s" => 1e3,
        "min" => 60e3,
        "KB" => 1024.0,
        "MB" => 1024.0 * 1024.0,
        "GB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(number * scale)
}

struct OpenRow {
    depth: usize,
    frame: FrameInfo,
    total: f64,
    children_total: f64,
}

/// Close the innermost open row, emitting its self weight.
fn close_row(open: &mut Vec<OpenRow>, builder: &mut ProfileBuilder) -> Result<()> {
    let self_weight = match open.last() {
        Some(row) => (row.total - row.children_total).max(0.0),
        None => return Ok(()),
    };
    if self_weight > 0.0 {
        let stack: Vec<FrameInfo> = open.iter().map(|row| row.frame.clone()).collect();
        builder.append_sample_with_weight(&stack, self_weight)?;
    }
    if let Some(row) = open.pop() {
        if let Some(parent) = open.last_mut() {
            parent.children_total += row.total;
        }
    }
    Ok(())
}

pub fn import(content: &TextFileContent) -> Result<Option<ProfileGroup>> {
    let mut lines = content.split_lines();
    let Some(header) = lines.next() else {
        return Ok(None);
    };
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();
    let symbol_column = columns
        .iter()
        .position(|c| *c == "Symbol Name")
        .ok_or_else(|| ImportError::InvalidProfile("missing Symbol Name column".to_string()))?;
    let (weight_column, weight_name) = WEIGHT_COLUMNS
        .iter()
        .find_map(|name| {
            columns
                .iter()
                .position(|c| c.starts_with(name))
                .map(|i| (i, *name))
        })
        .ok_or_else(|| ImportError::InvalidProfile("missing weight column".to_string()))?;

    let mut builder = ProfileBuilder::new();
    builder.set_unit(match weight_name {
        "Bytes Used" => ValueUnit::Bytes,
        "Count" => ValueUnit::None,
        _ => ValueUnit::Milliseconds,
    });

    let mut open: Vec<OpenRow> = Vec::new();
    for (index, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let cells: Vec<&str> = line.split('\t').collect();
        let (Some(symbol), Some(weight)) = (cells.get(symbol_column), cells.get(weight_column))
        else {
            return Err(ImportError::Parse {
                line: index + 2,
                message: format!("expected at least {} columns", symbol_column.max(weight_column) + 1),
            });
        };
        let total = parse_value(weight).ok_or_else(|| ImportError::Parse {
            line: index + 2,
            message: format!("unrecognised weight '{weight}'"),
        })?;
        let depth = symbol.len() - symbol.trim_start().len();
        let name = symbol.trim();

        while open.last().is_some_and(|row| row.depth >= depth) {
            close_row(&mut open, &mut builder)?;
        }
        open.push(OpenRow {
            depth,
            frame: FrameInfo::new(name),
            total,
            children_total: 0.0,
        });
    }
    while !open.is_empty() {
        close_row(&mut open, &mut builder)?;
    }

    if builder.sample_count() == 0 {
        return Ok(None);
    }
    Ok(Some(ProfileGroup::from_profile(builder.build())))
}
