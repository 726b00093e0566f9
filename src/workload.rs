//! Request paths for the download client.
use std::{fs, io, path::Path};

use log::debug;
use thiserror::Error;

/// Longest request path a workload may contain.
pub const MAX_PATH_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("failed to read workload file: {0}")]
    Io(#[from] io::Error),
    #[error("workload line {line}: path must start with '/'")]
    Relative { line: usize },
    #[error("workload line {line}: path exceeds {MAX_PATH_LEN} bytes")]
    TooLong { line: usize },
    #[error("workload line {line}: path contains whitespace")]
    Whitespace { line: usize },
    #[error("workload has no paths")]
    Empty,
}

/// Source of request paths.
pub trait Workload {
    /// Next path to request, or `None` once the workload is exhausted.
    fn next_path(&mut self) -> Option<String>;
}

/// Paths read from a file, handed out round-robin forever.
#[derive(Debug, Clone)]
pub struct WorkloadFile {
    paths: Vec<String>,
    cursor: usize,
}

impl WorkloadFile {
    pub fn load(path: &Path) -> Result<Self, WorkloadError> {
        let text = fs::read_to_string(path)?;
        let workload = Self::parse(&text)?;
        debug!("loaded {} workload paths from {path:?}", workload.len());
        Ok(workload)
    }

    /// One path per line; blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self, WorkloadError> {
        let mut paths = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !line.starts_with('/') {
                return Err(WorkloadError::Relative { line: i + 1 });
            }
            if line.len() > MAX_PATH_LEN {
                return Err(WorkloadError::TooLong { line: i + 1 });
            }
            if line.contains(char::is_whitespace) {
                return Err(WorkloadError::Whitespace { line: i + 1 });
            }
            paths.push(line.to_string());
        }

        Self::from_paths(paths)
    }

    pub fn from_paths(paths: Vec<String>) -> Result<Self, WorkloadError> {
        if paths.is_empty() {
            return Err(WorkloadError::Empty);
        }
        Ok(Self { paths, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Workload for WorkloadFile {
    fn next_path(&mut self) -> Option<String> {
        let path = self.paths.get(self.cursor)?.clone();
        self.cursor = (self.cursor + 1) % self.paths.len();
        Some(path)
    }
}
