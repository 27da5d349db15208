//! Profiling core
//!
//! - `backend`: lifecycle and map access for the in-kernel probe
//! - `collector`: the periodic drain-symbolize-publish loop
//! - `profiler`: the public façade wiring backend, collector and channel
//! - `cpu_utils`: online-CPU enumeration for per-CPU perf event attachment

pub mod backend;
pub mod collector;
pub mod cpu_utils;
pub mod profiler;

pub use backend::{EbpfBackend, ProfileBackend, DEFAULT_BPF_OBJECT_PATH};
pub use cpu_utils::online_cpus;
pub use profiler::Profiler;

// The key packing is shared with the probe; re-exported for consumers that
// work with raw count maps.
pub use strobe_common::{pack_stack_key, unpack_stack_key, STACK_ID_MISSING};
