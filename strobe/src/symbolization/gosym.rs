//! Go runtime function table (`.gopclntab`) parsing
//!
//! Go binaries are usually stripped of DWARF but always embed the runtime's
//! pc-to-function table, which carries every function's entry address and
//! name. This module parses the little-endian table layouts emitted by Go
//! 1.2 through current releases and answers "which function covers this PC".
//!
//! Layout reference: `runtime/symtab.go` in the Go distribution. Only the
//! function table and the name table are decoded; file/line information is
//! not needed here.

use thiserror::Error;

const MAGIC_GO1_2: u32 = 0xFFFF_FFFB;
const MAGIC_GO1_16: u32 = 0xFFFF_FFFA;
const MAGIC_GO1_18: u32 = 0xFFFF_FFF0;
const MAGIC_GO1_20: u32 = 0xFFFF_FFF1;

#[derive(Error, Debug)]
#[error("invalid pclntab: {0}")]
pub struct PclntabError(String);

fn truncated(what: &str) -> PclntabError {
    PclntabError(format!("truncated {what}"))
}

#[derive(Debug)]
struct GoFunc {
    entry: u64,
    name: String,
}

/// Parsed function table of one Go binary, sorted by entry address.
#[derive(Debug)]
pub struct GoLineTable {
    funcs: Vec<GoFunc>,
    /// First address past the last function.
    end: u64,
}

impl GoLineTable {
    /// Parse a `.gopclntab` section.
    ///
    /// `text_addr` is the address of the `.text` section; table versions
    /// since Go 1.18 store function entries relative to it.
    pub fn parse(data: &[u8], text_addr: u64) -> Result<Self, PclntabError> {
        let header = Header::parse(data)?;

        let mut funcs = match header.magic {
            MAGIC_GO1_18 | MAGIC_GO1_20 => Self::parse_offset_functab(data, &header, text_addr)?,
            MAGIC_GO1_16 => Self::parse_pointer_functab(data, &header, header.pcln_offset)?,
            MAGIC_GO1_2 => Self::parse_pointer_functab(data, &header, 0)?,
            magic => return Err(PclntabError(format!("unrecognized magic 0x{magic:x}"))),
        };

        funcs.funcs.sort_by_key(|f| f.entry);
        Ok(funcs)
    }

    /// Go ≥ 1.18: function table entries are u32 offsets from the text base.
    fn parse_offset_functab(
        data: &[u8],
        header: &Header,
        text_addr: u64,
    ) -> Result<Self, PclntabError> {
        // With 1.18+ the table records its own text start; prefer the section
        // address only when the table predates relocation (both should agree).
        let text_start = if header.text_start != 0 { header.text_start } else { text_addr };

        let functab = data.get(header.pcln_offset as usize..).ok_or_else(|| truncated("functab"))?;

        let nfunc = header.nfunc as usize;
        let mut funcs = Vec::with_capacity(nfunc);
        for i in 0..nfunc {
            let entry_off = read_u32(functab, i * 8).ok_or_else(|| truncated("functab entry"))?;
            let func_off = read_u32(functab, i * 8 + 4).ok_or_else(|| truncated("functab entry"))?;

            let name_off = read_u32(functab, func_off as usize + 4)
                .ok_or_else(|| truncated("func record"))?;
            let name = read_name(data, header.funcname_offset as usize + name_off as usize)?;

            funcs.push(GoFunc { entry: text_start + entry_off as u64, name });
        }

        let end_off = read_u32(functab, nfunc * 8).ok_or_else(|| truncated("functab end"))?;
        Ok(Self { funcs, end: text_start + end_off as u64 })
    }

    /// Go 1.2 – 1.16: function table entries are absolute pointers.
    ///
    /// `func_base` is what function record offsets are relative to: the
    /// start of the funcdata region for 1.16, the table itself for 1.2.
    fn parse_pointer_functab(
        data: &[u8],
        header: &Header,
        func_base: u64,
    ) -> Result<Self, PclntabError> {
        let ptr = header.ptr_size as usize;
        let functab_off = header.functab_offset as usize;
        let name_base = if header.magic == MAGIC_GO1_2 {
            0
        } else {
            header.funcname_offset as usize
        };

        let nfunc = header.nfunc as usize;
        let mut funcs = Vec::with_capacity(nfunc);
        for i in 0..nfunc {
            let entry = read_ptr(data, functab_off + i * 2 * ptr, ptr)
                .ok_or_else(|| truncated("functab entry"))?;
            let func_off = read_ptr(data, functab_off + i * 2 * ptr + ptr, ptr)
                .ok_or_else(|| truncated("functab entry"))?;

            let record = func_base as usize + func_off as usize;
            let name_off =
                read_u32(data, record + ptr).ok_or_else(|| truncated("func record"))?;
            let name = read_name(data, name_base + name_off as usize)?;

            funcs.push(GoFunc { entry, name });
        }

        let end = read_ptr(data, functab_off + nfunc * 2 * ptr, ptr)
            .ok_or_else(|| truncated("functab end"))?;
        Ok(Self { funcs, end })
    }

    /// Find the function covering `target`, returning its name and entry.
    pub fn find(&self, target: u64) -> Option<(String, u64)> {
        if self.funcs.is_empty() || target >= self.end {
            return None;
        }
        let idx = self.funcs.partition_point(|f| f.entry <= target);
        if idx == 0 {
            return None;
        }
        let func = &self.funcs[idx - 1];
        Some((func.name.clone(), func.entry))
    }
}

struct Header {
    magic: u32,
    ptr_size: u8,
    nfunc: u64,
    text_start: u64,
    funcname_offset: u64,
    functab_offset: u64,
    pcln_offset: u64,
}

impl Header {
    fn parse(data: &[u8]) -> Result<Self, PclntabError> {
        if data.len() < 8 {
            return Err(truncated("header"));
        }
        let magic = read_u32(data, 0).ok_or_else(|| truncated("header"))?;
        if data[4] != 0 || data[5] != 0 {
            return Err(PclntabError("non-zero header padding".to_string()));
        }
        let ptr_size = data[7];
        if ptr_size != 4 && ptr_size != 8 {
            return Err(PclntabError(format!("unsupported pointer size {ptr_size}")));
        }
        let ptr = ptr_size as usize;
        let word = |i: usize| read_ptr(data, 8 + i * ptr, ptr).ok_or_else(|| truncated("header"));

        match magic {
            MAGIC_GO1_18 | MAGIC_GO1_20 => Ok(Self {
                magic,
                ptr_size,
                nfunc: word(0)?,
                text_start: word(2)?,
                funcname_offset: word(3)?,
                functab_offset: word(7)?,
                pcln_offset: word(7)?,
            }),
            MAGIC_GO1_16 => Ok(Self {
                magic,
                ptr_size,
                nfunc: word(0)?,
                text_start: 0,
                funcname_offset: word(2)?,
                functab_offset: word(6)?,
                pcln_offset: word(6)?,
            }),
            MAGIC_GO1_2 => Ok(Self {
                magic,
                ptr_size,
                nfunc: word(0)?,
                text_start: 0,
                funcname_offset: 0,
                functab_offset: 8 + ptr as u64,
                pcln_offset: 0,
            }),
            magic => Err(PclntabError(format!("unrecognized magic 0x{magic:x}"))),
        }
    }
}

fn read_u32(data: &[u8], off: usize) -> Option<u32> {
    let bytes = data.get(off..off + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn read_ptr(data: &[u8], off: usize, ptr_size: usize) -> Option<u64> {
    if ptr_size == 4 {
        read_u32(data, off).map(u64::from)
    } else {
        let bytes = data.get(off..off + 8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }
}

fn read_name(data: &[u8], off: usize) -> Result<String, PclntabError> {
    let tail = data.get(off..).ok_or_else(|| truncated("function name"))?;
    let len = tail.iter().position(|&b| b == 0).ok_or_else(|| truncated("function name"))?;
    Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
}
