//! Human-readable rendering of sample weights.

use serde::{Deserialize, Serialize};

/// Unit of a profile's sample weights, spelled as in the canonical JSON format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueUnit {
    #[default]
    None,
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Bytes,
}

impl ValueUnit {
    /// Map a unit name as written by profilers ("ns", "microseconds", "bytes", ...).
    /// Unrecognised names are dimensionless.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "nanoseconds" | "nanosecond" | "ns" => ValueUnit::Nanoseconds,
            "microseconds" | "microsecond" | "us" | "µs" => ValueUnit::Microseconds,
            "milliseconds" | "millisecond" | "ms" => ValueUnit::Milliseconds,
            "seconds" | "second" | "s" => ValueUnit::Seconds,
            "bytes" | "byte" => ValueUnit::Bytes,
            _ => ValueUnit::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueUnit::None => "none",
            ValueUnit::Nanoseconds => "nanoseconds",
            ValueUnit::Microseconds => "microseconds",
            ValueUnit::Milliseconds => "milliseconds",
            ValueUnit::Seconds => "seconds",
            ValueUnit::Bytes => "bytes",
        }
    }

    /// Nanoseconds per unit, for time units.
    fn nanos_per_unit(self) -> Option<f64> {
        match self {
            ValueUnit::Nanoseconds => Some(1.0),
            ValueUnit::Microseconds => Some(1e3),
            ValueUnit::Milliseconds => Some(1e6),
            ValueUnit::Seconds => Some(1e9),
            ValueUnit::None | ValueUnit::Bytes => None,
        }
    }
}

/// Formats raw weights according to the profile's unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormatter {
    /// Dimensionless counts.
    Raw,
    /// Durations measured in the given unit.
    Time(ValueUnit),
    /// Byte sizes, binary magnitudes.
    Bytes,
}

impl ValueFormatter {
    pub fn for_unit(unit: ValueUnit) -> Self {
        match unit {
            ValueUnit::None => ValueFormatter::Raw,
            ValueUnit::Bytes => ValueFormatter::Bytes,
            time => ValueFormatter::Time(time),
        }
    }

    pub fn format(&self, value: f64) -> String {
        match self {
            ValueFormatter::Raw => format_raw(value),
            ValueFormatter::Time(unit) => {
                let nanos = value * unit.nanos_per_unit().unwrap_or(1.0);
                format_nanos(nanos)
            }
            ValueFormatter::Bytes => format_bytes(value),
        }
    }

    /// Render `part / whole` as a percentage.
    pub fn format_percentage_of(&self, part: f64, whole: f64) -> String {
        if whole == 0.0 {
            return format_percentage(0.0);
        }
        format_percentage(100.0 * part / whole)
    }
}

/// Render a percentage in `[0, 100]`.
pub fn format_percentage(percent: f64) -> String {
    if percent == 100.0 {
        "100%".to_string()
    } else if percent > 99.0 {
        ">99%".to_string()
    } else if percent == 0.0 {
        "0%".to_string()
    } else if percent < 0.01 {
        "<0.01%".to_string()
    } else if percent < 1.0 {
        format!("{:.2}%", percent)
    } else if percent < 10.0 {
        format!("{:.1}%", percent)
    } else {
        format!("{:.0}%", percent)
    }
}

fn format_nanos(nanos: f64) -> String {
    let seconds = nanos / 1e9;
    if seconds > 60.0 {
        let minutes = (seconds / 60.0).floor();
        let rest = (seconds - minutes * 60.0).floor();
        format!("{}:{:02}", minutes as u64, rest as u64)
    } else if seconds >= 1.0 {
        format!("{:.2}s", seconds)
    } else if nanos >= 1e6 {
        format!("{:.2}ms", nanos / 1e6)
    } else if nanos >= 1e3 {
        format!("{:.2}µs", nanos / 1e3)
    } else {
        format!("{:.2}ns", nanos)
    }
}

fn format_bytes(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    if bytes < KB {
        format!("{:.0} B", bytes)
    } else if bytes < MB {
        format!("{:.2} KB", bytes / KB)
    } else if bytes < GB {
        format!("{:.2} MB", bytes / MB)
    } else {
        format!("{:.2} GB", bytes / GB)
    }
}

fn format_raw(value: f64) -> String {
    if value.fract() != 0.0 || value.abs() >= 1e15 {
        return format!("{:.2}", value);
    }
    let digits = (value.abs() as u64).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if value < 0.0 {
        grouped.insert(0, '-');
    }
    grouped
}
