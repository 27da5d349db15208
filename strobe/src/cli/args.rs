//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Continuous eBPF CPU profiler")]
pub struct Args {
    /// Process ID to profile (omit to sample system-wide)
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Sampling frequency in Hz
    #[arg(long, default_value = "99")]
    pub sample_hz: u32,

    /// Interval between collector ticks in milliseconds
    #[arg(long, default_value = "1000")]
    pub interval_ms: u64,

    /// Duration to profile in seconds (0 = run until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    pub duration: u64,

    /// Output format
    #[arg(long, value_enum, default_value = "folded")]
    pub format: Format,

    /// Output file
    #[arg(short, long, default_value = "profile.folded")]
    pub output: PathBuf,

    /// vmlinux image for kernel symbolization (default: /proc/kallsyms)
    #[arg(long)]
    pub vmlinux: Option<PathBuf>,

    /// Compiled eBPF probe object (default: the xtask build output)
    #[arg(long)]
    pub bpf_object: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Folded stacks for flamegraph.pl / inferno
    Folded,
    /// Gzipped pprof profile.proto
    Pprof,
    /// OTLP ProfilesData message
    Otlp,
}
