//! Kernel-space symbolizer
//!
//! Kernel PCs are resolved against a sorted symbol table built lazily on
//! first use: a vmlinux image when one was configured (resolved through the
//! regular per-binary cascade with slide 0, since vmlinux addresses are
//! absolute), otherwise `/proc/kallsyms`. Both a successful and a failed
//! initialization are memoized; a broken kallsyms will not get better by
//! re-reading it every tick.

use log::{info, warn};
use std::path::PathBuf;
use std::sync::OnceLock;

use super::data_loader::{FileLines, LineSource};
use super::symbol_data::{SymbolData, SymbolSource};
use super::Symbolize;
use crate::domain::{Symbol, SymbolizeError};

/// Symbolizer for kernel stacks.
pub struct KernelSymbolizer<L: LineSource> {
    kallsyms: L,
    vmlinux_path: Option<PathBuf>,
    resolver: OnceLock<Option<KernelResolver>>,
}

enum KernelResolver {
    Vmlinux(SymbolData),
    Kallsyms(KallsymsResolver),
}

impl KernelSymbolizer<FileLines> {
    /// Resolver over `/proc/kallsyms`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(FileLines::new("/proc/kallsyms"))
    }

    /// Prefer the given vmlinux image, falling back to `/proc/kallsyms`.
    #[must_use]
    pub fn with_vmlinux(path: impl Into<PathBuf>) -> Self {
        let mut s = Self::new();
        s.vmlinux_path = Some(path.into());
        s
    }
}

impl Default for KernelSymbolizer<FileLines> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LineSource> KernelSymbolizer<L> {
    pub fn with_source(kallsyms: L) -> Self {
        Self { kallsyms, vmlinux_path: None, resolver: OnceLock::new() }
    }

    fn resolver(&self) -> Option<&KernelResolver> {
        self.resolver
            .get_or_init(|| {
                if let Some(path) = &self.vmlinux_path {
                    match SymbolData::load(path) {
                        Ok(data) => {
                            info!("kernel symbolization via vmlinux at {}", path.display());
                            return Some(KernelResolver::Vmlinux(data));
                        }
                        Err(e) => {
                            warn!("vmlinux at {} unusable: {e}; trying kallsyms", path.display());
                        }
                    }
                }
                match KallsymsResolver::from_source(&self.kallsyms) {
                    Ok(resolver) => Some(KernelResolver::Kallsyms(resolver)),
                    Err(e) => {
                        warn!("kallsyms unavailable: {e}");
                        None
                    }
                }
            })
            .as_ref()
    }
}

impl KernelResolver {
    fn resolve(&self, pc: u64) -> Result<Symbol, SymbolizeError> {
        match self {
            // vmlinux is not relocated, so no slide applies.
            Self::Vmlinux(data) => data.resolve_pc(pc, 0),
            Self::Kallsyms(resolver) => resolver.resolve(pc),
        }
    }
}

impl<L: LineSource> Symbolize for KernelSymbolizer<L> {
    fn symbolize(&self, stack: &[u64]) -> Result<Vec<Symbol>, SymbolizeError> {
        // Samples without a kernel side must not depend on kallsyms at all.
        if stack.is_empty() {
            return Ok(Vec::new());
        }
        let resolver = self.resolver().ok_or(SymbolizeError::KernelResolverUnavailable)?;

        let mut symbols = Vec::with_capacity(stack.len());
        for &pc in stack {
            match resolver.resolve(pc) {
                Ok(symbol) => symbols.push(symbol),
                Err(e) => warn!("failed to resolve kernel pc 0x{pc:x}: {e}; skipping frame"),
            }
        }

        if symbols.is_empty() && !stack.is_empty() {
            return Err(SymbolizeError::NoFramesResolved);
        }
        Ok(symbols)
    }
}

/// Sorted `(address, name)` table parsed from kallsyms lines.
#[derive(Debug)]
pub struct KallsymsResolver {
    entries: Vec<KallsymsEntry>,
}

#[derive(Debug)]
struct KallsymsEntry {
    addr: u64,
    name: String,
}

impl KallsymsResolver {
    /// Parse kallsyms lines of the form `ffffffff81000000 T name [module]`.
    ///
    /// Lines with missing fields or unparseable addresses are skipped;
    /// module annotations and any trailing fields are ignored.
    pub fn from_source<L: LineSource>(source: &L) -> Result<Self, SymbolizeError> {
        let lines =
            source.read_lines().map_err(|e| SymbolizeError::ReadKallsyms(e.to_string()))?;

        let mut entries = Vec::with_capacity(lines.len());
        for line in &lines {
            let mut fields = line.split_whitespace();
            let (Some(addr), Some(_kind), Some(name)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let Ok(addr) = u64::from_str_radix(addr, 16) else {
                continue;
            };
            entries.push(KallsymsEntry { addr, name: name.to_string() });
        }

        entries.sort_by_key(|e| e.addr);
        info!("loaded {} kallsyms entries for kernel symbolization", entries.len());
        Ok(Self { entries })
    }

    /// Resolve `pc` to the entry with the greatest address at or below it.
    pub fn resolve(&self, pc: u64) -> Result<Symbol, SymbolizeError> {
        if self.entries.is_empty() {
            return Err(SymbolizeError::EmptyKallsyms);
        }
        let idx = self.entries.partition_point(|e| e.addr <= pc);
        if idx == 0 {
            return Err(SymbolizeError::PcBelowRange(pc));
        }
        let entry = &self.entries[idx - 1];
        Ok(Symbol { name: entry.name.clone(), addr: entry.addr, offset: pc - entry.addr })
    }
}
