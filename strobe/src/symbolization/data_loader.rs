//! Line-oriented input for the `/proc` pseudo-file parsers
//!
//! `/proc/<pid>/maps` and `/proc/kallsyms` are both parsed line by line;
//! [`LineSource`] abstracts where the lines come from so tests can inject
//! fixed content.

use log::debug;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

/// Source of lines for a (pseudo-)file.
pub trait LineSource: Send + Sync {
    fn read_lines(&self) -> io::Result<Vec<String>>;
}

/// [`LineSource`] backed by a file path, re-read on every call.
pub struct FileLines {
    path: PathBuf,
}

impl FileLines {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LineSource for FileLines {
    fn read_lines(&self) -> io::Result<Vec<String>> {
        debug!("reading lines from {}", self.path.display());
        let file = File::open(&self.path)?;
        BufReader::new(file).lines().collect()
    }
}
