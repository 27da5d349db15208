//! Domain model for strobe
//!
//! Core types shared across the pipeline and the structured errors that
//! describe how each layer can fail.

pub mod errors;
pub mod types;

pub use types::{CpuId, Pid, Sample, Symbol};

pub use errors::{BackendError, ExportError, ProfilerError, SymbolizeError};
