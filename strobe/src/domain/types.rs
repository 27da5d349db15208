//! Core domain types
//!
//! Newtypes keep pids and CPU indices from being mixed up in signatures;
//! [`Symbol`] and [`Sample`] are the records flowing out of the collector.

use std::fmt;
use std::time::SystemTime;

/// Process ID newtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// CPU index newtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// A resolved stack frame.
///
/// `name` may be empty when a resolver emitted a placeholder frame; callers
/// render empty names as `<unknown>`. `addr` is the absolute PC the frame
/// was resolved from (user side) or the matched symbol's address (kernel
/// side); `offset` is the distance from the enclosing function's entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub addr: u64,
    pub offset: u64,
}

/// One aggregated stack observation.
///
/// `count` is the number of samples the kernel accumulated for this stack
/// pair since the probe attached; stacks are ordered leaf-first. Samples
/// are immutable once published.
#[derive(Debug, Clone)]
pub struct Sample {
    pub timestamp: SystemTime,
    pub user_stack: Vec<Symbol>,
    pub kernel_stack: Vec<Symbol>,
    pub count: u64,
}
