//! Structured error types for strobe
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

/// Errors from the eBPF backend lifecycle and map access.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("profiler backend already attached")]
    AlreadyAttached,

    #[error("profiler backend not attached")]
    NotAttached,

    #[error("failed to load eBPF object from {path}: {error}")]
    LoadFailed { path: String, error: String },

    #[error("eBPF program {0} not found in object")]
    ProgramNotFound(String),

    #[error("failed to load eBPF program: {0}")]
    ProgramLoadFailed(String),

    #[error("failed to enumerate online cpus: {0}")]
    OnlineCpus(String),

    #[error("perf_event attach failed on cpu {cpu}: {error}")]
    AttachFailed { cpu: u32, error: String },

    #[error("failed to detach perf events: {0}")]
    DetachFailed(String),

    #[error("failed to snapshot counts map: {0}")]
    SnapshotFailed(String),

    #[error("failed to look up stack traces: {0}")]
    LookupFailed(String),
}

/// Errors from user- and kernel-side symbolization.
#[derive(Error, Debug)]
pub enum SymbolizeError {
    #[error("failed to read process memory maps: {0}")]
    ReadProcMaps(String),

    #[error("malformed maps line: {0}")]
    MalformedMapsLine(String),

    #[error("pc 0x{0:x} is not covered by any function")]
    PcNotFound(u64),

    #[error("no symbol with address at or below pc 0x{0:x}")]
    NoMatchingSymbol(u64),

    #[error("no symbol data available in {0}")]
    NoSymbolData(String),

    #[error("failed to load symbol data from {path}: {error}")]
    SymbolDataLoad { path: String, error: String },

    #[error("symbol data file {0} is missing")]
    SymbolDataMissing(String),

    #[error("failed to resolve pc 0x{pc:x}: {error}")]
    ResolveFailed { pc: u64, error: String },

    #[error("failed to read kallsyms: {0}")]
    ReadKallsyms(String),

    #[error("kallsyms table is empty")]
    EmptyKallsyms,

    #[error("no kernel symbol at or below pc 0x{0:x}")]
    PcBelowRange(u64),

    #[error("no resolver for kernel symbolization could be loaded")]
    KernelResolverUnavailable,

    #[error("no frame of the kernel stack could be resolved")]
    NoFramesResolved,
}

/// Errors from the profiler façade.
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("profiler already started")]
    AlreadyStarted,

    #[error("invalid sample rate; must be > 0")]
    InvalidSampleRate,

    #[error("invalid collect interval; must be > 1ms")]
    InvalidCollectInterval,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors from the profile exporters.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
