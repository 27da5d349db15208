//! CPU utility functions
//!
//! The backend opens one perf event per online CPU, so it needs the list of
//! CPU IDs as the kernel reports it.

use std::fs;
use std::io;

use crate::domain::CpuId;

/// Get the online CPU IDs from `/sys/devices/system/cpu/online`.
///
/// The file holds ranges like `0-3` or `0-3,8-11` (NUMA systems with
/// offlined cores produce the comma form).
pub fn online_cpus() -> io::Result<Vec<CpuId>> {
    let content = fs::read_to_string("/sys/devices/system/cpu/online")?;
    parse_cpu_ranges(&content)
}

fn parse_cpu_ranges(content: &str) -> io::Result<Vec<CpuId>> {
    let invalid =
        |range: &str| io::Error::new(io::ErrorKind::InvalidData, format!("bad cpu range {range}"));

    let mut cpus = Vec::new();
    for range in content.trim().split(',') {
        if let Some((start, end)) = range.split_once('-') {
            let start: u32 = start.parse().map_err(|_| invalid(range))?;
            let end: u32 = end.parse().map_err(|_| invalid(range))?;
            for cpu in start..=end {
                cpus.push(CpuId(cpu));
            }
        } else {
            let cpu: u32 = range.parse().map_err(|_| invalid(range))?;
            cpus.push(CpuId(cpu));
        }
    }
    Ok(cpus)
}
