//! `/proc/<pid>/maps` parsing and PC-to-region lookup
//!
//! Each line of the maps file describes one virtual memory region and the
//! file backing it, which is what ties a sampled PC back to the binary that
//! must be opened for symbol data.

use log::warn;

use super::data_loader::LineSource;
use crate::domain::SymbolizeError;

/// One `/proc/<pid>/maps` entry.
///
/// `path` is empty for anonymous mappings and carries pseudo-names such as
/// `[vdso]` or `[heap]` for special regions. `start < end` always holds for
/// parsed entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRegion {
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub perms: String,
    pub path: String,
}

impl MapRegion {
    /// Check whether `pc` falls inside this region.
    #[must_use]
    pub fn contains(&self, pc: u64) -> bool {
        pc >= self.start && pc < self.end
    }
}

/// Lookup and refresh over a memory-map snapshot.
pub trait RegionProvider {
    fn find_region(&self, pc: u64) -> Option<MapRegion>;
    fn refresh(&mut self) -> Result<(), SymbolizeError>;
}

/// A parsed snapshot of a process's memory maps.
///
/// Starts empty; the first [`RegionProvider::refresh`] populates it. The
/// region list is replaced atomically on every refresh.
pub struct ProcMaps<L: LineSource> {
    source: L,
    regions: Vec<MapRegion>,
}

impl<L: LineSource> ProcMaps<L> {
    pub fn new(source: L) -> Self {
        Self { source, regions: Vec::new() }
    }
}

impl<L: LineSource> RegionProvider for ProcMaps<L> {
    fn find_region(&self, pc: u64) -> Option<MapRegion> {
        // Regions are kept in file order and number in the low hundreds,
        // so a linear scan is fine.
        self.regions.iter().find(|r| r.contains(pc)).cloned()
    }

    fn refresh(&mut self) -> Result<(), SymbolizeError> {
        let lines = self
            .source
            .read_lines()
            .map_err(|e| SymbolizeError::ReadProcMaps(e.to_string()))?;

        let mut regions = Vec::with_capacity(lines.len());
        for line in &lines {
            if line.is_empty() {
                continue;
            }
            match parse_map_line(line) {
                Ok(region) => regions.push(region),
                Err(e) => warn!("skipping unparseable maps line: {e}"),
            }
        }
        self.regions = regions;
        Ok(())
    }
}

/// Parse a single maps line.
///
/// Example:
/// `55d4b2000000-55d4b2021000 r--p 00000000 08:01 131073 /usr/bin/myprog`
///
/// The pathname is optional and may contain spaces, so everything after the
/// fifth field is joined back together.
pub fn parse_map_line(line: &str) -> Result<MapRegion, SymbolizeError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return Err(SymbolizeError::MalformedMapsLine(format!(
            "not enough fields ({}) in line \"{line}\"",
            parts.len()
        )));
    }

    let path = if parts.len() >= 6 { parts[5..].join(" ") } else { String::new() };

    let (start, end) = parts[0].split_once('-').ok_or_else(|| {
        SymbolizeError::MalformedMapsLine(format!("invalid address range in line \"{line}\""))
    })?;

    let parse_hex = |s: &str| {
        u64::from_str_radix(s, 16).map_err(|_| {
            SymbolizeError::MalformedMapsLine(format!("invalid hex field in line \"{line}\""))
        })
    };

    Ok(MapRegion {
        start: parse_hex(start)?,
        end: parse_hex(end)?,
        offset: parse_hex(parts[2])?,
        perms: parts[1].to_string(),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    struct StaticLines(Mutex<Vec<Vec<String>>>);

    impl StaticLines {
        fn new(batches: Vec<Vec<&str>>) -> Self {
            Self(Mutex::new(
                batches
                    .into_iter()
                    .rev()
                    .map(|b| b.into_iter().map(str::to_string).collect())
                    .collect(),
            ))
        }
    }

    impl LineSource for StaticLines {
        fn read_lines(&self) -> io::Result<Vec<String>> {
            let mut batches = self.0.lock().unwrap();
            match batches.len() {
                0 => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no more content")),
                1 => Ok(batches[0].clone()),
                _ => Ok(batches.pop().unwrap()),
            }
        }
    }

    #[test]
    fn parses_basic_line() {
        let region = parse_map_line(
            "55d4b2000000-55d4b2021000 r--p 00000000 08:01 131073 /usr/bin/myprog",
        )
        .unwrap();
        assert_eq!(region.start, 0x55d4_b200_0000);
        assert_eq!(region.end, 0x55d4_b202_1000);
        assert_eq!(region.offset, 0);
        assert_eq!(region.perms, "r--p");
        assert_eq!(region.path, "/usr/bin/myprog");
    }

    #[test]
    fn joins_path_with_spaces() {
        let region = parse_map_line(
            "7f8a9b000000-7f8a9b002000 r-xp 00001000 08:01 42 /opt/my app/bin/server v2",
        )
        .unwrap();
        assert_eq!(region.path, "/opt/my app/bin/server v2");
    }

    #[test]
    fn accepts_missing_path() {
        let region = parse_map_line("7f8a9b000000-7f8a9b002000 rw-p 00000000 00:00 0").unwrap();
        assert_eq!(region.path, "");
    }

    #[test]
    fn rejects_short_and_malformed_lines() {
        assert!(parse_map_line("7f8a9b000000-7f8a9b002000 rw-p").is_err());
        assert!(parse_map_line("nonsense r--p 00000000 08:01 0 /bin/x").is_err());
        assert!(parse_map_line("zzzz-7f8a9b002000 r--p 00000000 08:01 0 /bin/x").is_err());
    }

    #[test]
    fn find_region_honors_half_open_bounds() {
        let mut maps = ProcMaps::new(StaticLines::new(vec![vec![
            "1000-2000 r-xp 00000000 08:01 1 /bin/a",
            "2000-3000 r-xp 00000000 08:01 2 /bin/b",
        ]]));
        maps.refresh().unwrap();

        assert_eq!(maps.find_region(0x0fff), None);
        assert_eq!(maps.find_region(0x1000).unwrap().path, "/bin/a");
        assert_eq!(maps.find_region(0x1fff).unwrap().path, "/bin/a");
        assert_eq!(maps.find_region(0x2000).unwrap().path, "/bin/b");
        assert_eq!(maps.find_region(0x3000), None);
    }

    #[test]
    fn refresh_replaces_snapshot_and_skips_bad_lines() {
        let mut maps = ProcMaps::new(StaticLines::new(vec![
            vec!["1000-2000 r-xp 00000000 08:01 1 /bin/a", "garbage line"],
            vec!["4000-5000 r-xp 00000000 08:01 2 /bin/b"],
        ]));

        maps.refresh().unwrap();
        assert!(maps.find_region(0x1500).is_some());

        maps.refresh().unwrap();
        assert!(maps.find_region(0x1500).is_none());
        assert_eq!(maps.find_region(0x4500).unwrap().path, "/bin/b");
    }

    #[test]
    fn refresh_surfaces_read_errors() {
        let mut maps = ProcMaps::new(StaticLines(Mutex::new(vec![])));
        let err = maps.refresh().unwrap_err();
        assert!(matches!(err, SymbolizeError::ReadProcMaps(_)));
    }
}
