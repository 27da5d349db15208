//! # Strobe - continuous eBPF CPU profiler
//!
//! Strobe samples the call stacks of a running process (or the whole
//! machine) from inside the kernel and turns the aggregated counts into
//! standard profile formats.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Linux Kernel                          │
//! │  perf event (cpu-clock, one per CPU)                        │
//! │        │ fires at the configured period                     │
//! │        ▼                                                    │
//! │  eBPF probe (strobe-ebpf)                                   │
//! │    • walks user + kernel stack → two stack-ids              │
//! │    • COUNTS[user_id << 32 | kernel_id] += 1 (per-CPU, LRU)  │
//! │    • STACK_TRACES: stack-id → frame PCs                     │
//! └────────┬────────────────────────────────────────────────────┘
//!          │ map reads (aya)
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Strobe (this crate)                      │
//! │                                                             │
//! │  ┌───────────┐    ┌────────────┐    ┌─────────────────┐    │
//! │  │  Backend  │───▶│ Collector  │───▶│ samples channel │    │
//! │  │  (eBPF)   │    │ (ticker)   │    │ (bounded, 1)    │    │
//! │  └───────────┘    └─────┬──────┘    └────────┬────────┘    │
//! │                         │                    │              │
//! │                         ▼                    ▼              │
//! │                  ┌─────────────┐      ┌──────────────┐     │
//! │                  │ Symbolizers │      │  Exporters   │     │
//! │                  │ user/kernel │      │ pprof/OTLP/  │     │
//! │                  └─────────────┘      │ folded       │     │
//! │                                       └──────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`profiling`]: the eBPF backend, the periodic collector and the
//!   [`profiling::Profiler`] façade that ties them together
//! - [`symbolization`]: `/proc/<pid>/maps` tracking, the per-binary symbol
//!   resolvers (Go pclntab → DWARF → ELF symtab) and the kallsyms-based
//!   kernel symbolizer
//! - [`export`]: pure transformers from collected samples to pprof, OTLP
//!   profiles and folded flamegraph stacks
//! - [`cli`]: command-line argument parsing
//! - [`domain`]: core types and structured errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # Profile PID 1234 at 99 Hz for 30 seconds, write folded stacks
//! sudo strobe --pid 1234 --duration 30 --output out.folded
//!
//! # System-wide pprof profile
//! sudo strobe --duration 10 --format pprof --output cpu.pb.gz
//! ```
//!
//! Attaching requires root or equivalent perf-event permissions, and the
//! eBPF probe must be built first with `cargo xtask build-ebpf --release`.

pub mod cli;
pub mod domain;
pub mod export;
pub mod profiling;
pub mod symbolization;
