//! Convert profiler output to the canonical JSON format.
//!
//! The input format is detected automatically; see the `detect` module of the
//! library for the supported formats and the order they are tried in.
//!
//! # Usage
//!
//! ```bash
//! canonprof trace.json -o trace.speedscope.json
//! canonprof perf.data.txt
//! canonprof --summary --top 20 cpu.pprof
//! ```

use canonprof::canonprof_model::ProfileGroup;
use canonprof::canonprof_model::file_format::export_profile_group;
use canonprof::{DefaultDependencies, import_from_file};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "canonprof")]
#[command(about = "Detect a profile's format and convert it to canonical JSON")]
#[command(version)]
struct Args {
    /// Input profile, optionally gzip or zstd compressed
    input: PathBuf,

    /// Output file (defaults to the input file name with a .speedscope.json extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the heaviest frames of every profile instead of converting
    #[arg(long)]
    summary: bool,

    /// Number of frames listed per profile with --summary
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Log detection progress
    #[arg(short, long)]
    verbose: bool,
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "profile".to_string());
    input.with_file_name(format!("{stem}.speedscope.json"))
}

fn print_summary(group: &ProfileGroup, top: usize) {
    for (index, profile) in group.profiles().iter().enumerate() {
        let formatter = profile.formatter();
        let total = profile.total_weight();
        let marker = if index == group.index_to_view() { "*" } else { " " };
        println!(
            "{marker} {} ({}, {} frames)",
            profile.name(),
            formatter.format(total),
            profile.frames().len()
        );
        for frame in profile.frames_by_self_weight().into_iter().take(top) {
            if frame.self_weight() <= 0.0 {
                break;
            }
            println!(
                "    {:>10} {:>7}  {:>10} {:>7}  {}",
                formatter.format(frame.self_weight()),
                formatter.format_percentage_of(frame.self_weight(), total),
                formatter.format(frame.total_weight()),
                formatter.format_percentage_of(frame.total_weight(), total),
                frame.name()
            );
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let (group, format) = import_from_file(&args.input, &DefaultDependencies).map_err(|e| {
        format!(
            "Failed to open input file '{}': {}",
            args.input.display(),
            e
        )
    })?;
    eprintln!("Detected: {}", format);

    let group = group.ok_or_else(|| {
        format!(
            "Could not import '{}': unrecognized format or no samples",
            args.input.display()
        )
    })?;

    if args.summary {
        print_summary(&group, args.top);
        return Ok(());
    }

    let output_path = args
        .output
        .unwrap_or_else(|| default_output_path(&args.input));
    let output_file = File::create(&output_path).map_err(|e| {
        format!(
            "Failed to create output file '{}': {}",
            output_path.display(),
            e
        )
    })?;
    let mut writer = BufWriter::new(output_file);
    export_profile_group(&group, concat!("canonprof@", env!("CARGO_PKG_VERSION")))
        .write(&mut writer)?;
    writer.flush()?;

    eprintln!(
        "Converted '{}' -> '{}'",
        args.input.display(),
        output_path.display()
    );

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_module_path(false)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
