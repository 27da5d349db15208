//! Per-binary symbol data and PC resolution
//!
//! One [`SymbolData`] is built per binary path, choosing the best available
//! source once at load time: the Go runtime's pclntab if the binary carries
//! one, DWARF debug info if present, and the union of the `.symtab` and
//! `.dynsym` ELF symbol tables as the last resort.

use gimli::{Dwarf, EndianRcSlice, Reader, RunTimeEndian, SectionId};
use log::{debug, info};
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol};
use rustc_demangle::demangle;
use std::borrow::Cow;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::rc::Rc;

use super::gosym::GoLineTable;
use crate::domain::{Symbol, SymbolizeError};

/// PC resolution over one binary's symbol data.
///
/// `resolve_pc` subtracts `slide` (the difference between load-time and
/// runtime addresses) before consulting the tables.
pub trait SymbolSource: Send + Sync {
    /// Smallest `PT_LOAD` virtual address, 0 when the binary has none.
    fn min_load_vaddr(&self) -> u64;

    fn resolve_pc(&self, pc: u64, slide: u64) -> Result<Symbol, SymbolizeError>;
}

/// Symbol data loaded from one ELF file.
#[derive(Debug)]
pub struct SymbolData {
    min_load_vaddr: u64,
    table: SymbolTable,
}

#[derive(Debug)]
enum SymbolTable {
    Go(GoLineTable),
    Dwarf(DwarfIndex),
    Elf(ElfSymbolTable),
}

impl SymbolData {
    /// Open `path`, pick a resolver and close the file again.
    ///
    /// A missing file is reported as [`SymbolizeError::SymbolDataMissing`]
    /// so callers can treat it as transient (the binary may appear later,
    /// e.g. via dlopen).
    pub fn load(path: &Path) -> Result<Self, SymbolizeError> {
        let bytes = fs::read(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SymbolizeError::SymbolDataMissing(path.display().to_string())
            } else {
                SymbolizeError::SymbolDataLoad {
                    path: path.display().to_string(),
                    error: e.to_string(),
                }
            }
        })?;

        let obj = object::File::parse(&*bytes).map_err(|e| SymbolizeError::SymbolDataLoad {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        // object's segments are exactly the PT_LOAD program headers.
        let min_load_vaddr = obj.segments().map(|s| s.address()).min().unwrap_or(0);

        let table = Self::pick_table(&obj, path)?;
        Ok(Self { min_load_vaddr, table })
    }

    fn pick_table(obj: &object::File<'_>, path: &Path) -> Result<SymbolTable, SymbolizeError> {
        if let Some(section) = obj.section_by_name(".gopclntab") {
            if let Ok(data) = section.uncompressed_data() {
                let text_addr = obj.section_by_name(".text").map(|s| s.address()).unwrap_or(0);
                match GoLineTable::parse(&data, text_addr) {
                    Ok(table) => {
                        info!("using Go pclntab for {}", path.display());
                        return Ok(SymbolTable::Go(table));
                    }
                    Err(e) => debug!("unusable .gopclntab in {}: {e}", path.display()),
                }
            }
        }

        match DwarfIndex::build(obj) {
            Ok(Some(index)) => {
                info!("using DWARF data for {}", path.display());
                return Ok(SymbolTable::Dwarf(index));
            }
            Ok(None) => debug!("no DWARF data in {}", path.display()),
            Err(e) => debug!("failed to parse DWARF data in {}: {e}", path.display()),
        }

        let table = ElfSymbolTable::from_object(obj);
        if table.is_empty() {
            return Err(SymbolizeError::NoSymbolData(path.display().to_string()));
        }
        info!("using {} ELF symbols for {}", table.len(), path.display());
        Ok(SymbolTable::Elf(table))
    }
}

impl SymbolSource for SymbolData {
    fn min_load_vaddr(&self) -> u64 {
        self.min_load_vaddr
    }

    fn resolve_pc(&self, pc: u64, slide: u64) -> Result<Symbol, SymbolizeError> {
        let target = pc.wrapping_sub(slide);

        let (name, entry) = match &self.table {
            SymbolTable::Go(table) => {
                table.find(target).ok_or(SymbolizeError::PcNotFound(target))?
            }
            SymbolTable::Dwarf(index) => {
                let func = index.find(target).ok_or(SymbolizeError::PcNotFound(target))?;
                (func.0, func.1.unwrap_or(target))
            }
            SymbolTable::Elf(table) => {
                table.find(target).ok_or(SymbolizeError::NoMatchingSymbol(target))?
            }
        };

        Ok(Symbol { name, addr: pc, offset: target.saturating_sub(entry) })
    }
}

/// Eager index of DWARF subprogram address ranges.
///
/// Built once at load; membership prefers explicit range lists with the
/// `low_pc`/`high_pc` pair as the fallback (gimli's `die_ranges` implements
/// both, including length-valued `high_pc`).
#[derive(Debug)]
struct DwarfIndex {
    /// Flattened code ranges sorted by start address.
    ranges: Vec<(u64, u64, u32)>,
    funcs: Vec<DwarfFunc>,
}

#[derive(Debug)]
struct DwarfFunc {
    name: String,
    low_pc: Option<u64>,
}

impl DwarfIndex {
    fn build(obj: &object::File<'_>) -> Result<Option<Self>, gimli::Error> {
        let endian =
            if obj.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section = |id: SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
            let data = obj
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[][..]));
            Ok(EndianRcSlice::new(Rc::from(&*data), endian))
        };

        let dwarf = Dwarf::load(&load_section)?;

        let mut funcs = Vec::new();
        let mut ranges = Vec::new();

        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;

            let mut entries = unit.entries();
            while let Some((_, entry)) = entries.next_dfs()? {
                if entry.tag() != gimli::DW_TAG_subprogram {
                    continue;
                }

                let mut code_ranges = Vec::new();
                let mut die_ranges = dwarf.die_ranges(&unit, entry)?;
                while let Some(range) = die_ranges.next()? {
                    if range.begin < range.end {
                        code_ranges.push((range.begin, range.end));
                    }
                }
                if code_ranges.is_empty() {
                    continue;
                }

                let low_pc = match entry.attr_value(gimli::DW_AT_low_pc)? {
                    Some(value) => dwarf.attr_address(&unit, value)?,
                    None => None,
                };

                let linkage = match entry.attr_value(gimli::DW_AT_linkage_name)? {
                    Some(value) => {
                        let s = dwarf.attr_string(&unit, value)?;
                        Some(s.to_string_lossy()?.into_owned())
                    }
                    None => None,
                };
                let name = match linkage.filter(|n| !n.is_empty()) {
                    Some(n) => n,
                    None => match entry.attr_value(gimli::DW_AT_name)? {
                        Some(value) => {
                            let s = dwarf.attr_string(&unit, value)?;
                            s.to_string_lossy()?.into_owned()
                        }
                        None => continue,
                    },
                };

                let func_idx = funcs.len() as u32;
                for (begin, end) in code_ranges {
                    ranges.push((begin, end, func_idx));
                }
                funcs.push(DwarfFunc { name: demangle_name(&name), low_pc });
            }
        }

        if funcs.is_empty() {
            return Ok(None);
        }
        ranges.sort_by_key(|&(start, _, _)| start);
        Ok(Some(Self { ranges, funcs }))
    }

    fn find(&self, target: u64) -> Option<(String, Option<u64>)> {
        let idx = self.ranges.partition_point(|&(start, _, _)| start <= target);
        if idx == 0 {
            return None;
        }
        let (_, end, func_idx) = self.ranges[idx - 1];
        if target >= end {
            return None;
        }
        let func = &self.funcs[func_idx as usize];
        Some((func.name.clone(), func.low_pc))
    }
}

/// Union of `.symtab` and `.dynsym`, sorted by value.
#[derive(Debug)]
struct ElfSymbolTable {
    syms: Vec<(u64, String)>,
}

impl ElfSymbolTable {
    fn from_object(obj: &object::File<'_>) -> Self {
        let mut syms: Vec<(u64, String)> = obj
            .symbols()
            .chain(obj.dynamic_symbols())
            .filter(|s| s.address() != 0)
            .filter_map(|s| {
                let name = s.name().ok()?;
                if name.is_empty() {
                    return None;
                }
                Some((s.address(), demangle_name(name)))
            })
            .collect();
        syms.sort_by(|a, b| a.0.cmp(&b.0));
        Self { syms }
    }

    fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    fn len(&self) -> usize {
        self.syms.len()
    }

    /// Select the symbol with the greatest value at or below `target`.
    fn find(&self, target: u64) -> Option<(String, u64)> {
        let idx = self.syms.partition_point(|&(value, _)| value <= target);
        if idx == 0 {
            return None;
        }
        let (value, ref name) = self.syms[idx - 1];
        Some((name.clone(), value))
    }
}

fn demangle_name(name: &str) -> String {
    format!("{:#}", demangle(name))
}
