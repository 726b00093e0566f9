//! Content lookup for the server.
//!
//! The server never touches the filesystem directly; it asks a [`ContentStore`]
//! for the bytes behind a request path. [`ContentMap`] is the store used by the
//! `getfile_server` binary: a table of request keys to local files, loaded from
//! a text file with one `<key> <file path>` pair per line.
//!
//! # Example
//! ```text
//! # key                 file
//! /a.txt                corpus/a.txt
//! /images/logo.png      /srv/static/logo.png
//! ```
use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use log::{debug, trace};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no content mapped to '{0}'")]
    NotFound(String),
    #[error("failed to open content for '{key}': {source}")]
    Io { key: String, source: io::Error },
}

#[derive(Debug, Error)]
pub enum ContentMapError {
    #[error("failed to read content map {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("content map line {line}: expected '<key> <file path>'")]
    Malformed { line: usize },
}

/// Bytes to serve for one request, with their total length.
pub struct Content {
    pub size: u64,
    pub source: Box<dyn Read + Send>,
}

impl Content {
    pub fn new(size: u64, source: impl Read + Send + 'static) -> Self {
        Self {
            size,
            source: Box::new(source),
        }
    }
}

/// Maps request paths to content. Shared by every server worker.
pub trait ContentStore: Send + Sync + 'static {
    fn lookup(&self, path: &str) -> Result<Content, LookupError>;
}

#[derive(Debug, Default, Clone)]
pub struct ContentMap {
    entries: HashMap<String, PathBuf>,
    delay: Option<Duration>,
}

impl ContentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `<key> <file path>` pairs. Blank lines and `#` comments are
    /// skipped; a repeated key replaces the earlier entry.
    pub fn load(path: &Path) -> Result<Self, ContentMapError> {
        let text = fs::read_to_string(path).map_err(|source| ContentMapError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut map = Self::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts = line.split_whitespace().collect::<Vec<&str>>();
            if parts.len() != 2 {
                return Err(ContentMapError::Malformed { line: i + 1 });
            }
            map.insert(parts[0], parts[1]);
        }

        debug!("loaded {} content entries from {path:?}", map.len());
        Ok(map)
    }

    pub fn insert(&mut self, key: impl Into<String>, file: impl Into<PathBuf>) {
        self.entries.insert(key.into(), file.into());
    }

    /// Sleeps for `delay` on every lookup, to mimic slow storage.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = (!delay.is_zero()).then_some(delay);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ContentStore for ContentMap {
    fn lookup(&self, path: &str) -> Result<Content, LookupError> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        let file = self
            .entries
            .get(path)
            .ok_or_else(|| LookupError::NotFound(path.to_string()))?;
        trace!("{path} -> {file:?}");

        let io_err = |source| LookupError::Io {
            key: path.to_string(),
            source,
        };
        let file = File::open(file).map_err(io_err)?;
        let size = file.metadata().map_err(io_err)?.len();

        Ok(Content::new(size, file))
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn content_map_load() {
        let temp = TempDir::new("content").unwrap();
        let data = temp.path().join("a.txt");
        fs::write(&data, b"hello").unwrap();

        let map_file = temp.path().join("content.txt");
        fs::write(
            &map_file,
            format!("# comment\n\n/a.txt {}\n/missing.txt /no/such/file\n", data.display()),
        )
        .unwrap();

        let map = ContentMap::load(&map_file).unwrap();
        assert_eq!(map.len(), 2);

        let mut content = map.lookup("/a.txt").unwrap();
        assert_eq!(content.size, 5);
        let mut body = Vec::new();
        content.source.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn content_map_lookup_errors() {
        let mut map = ContentMap::new();
        map.insert("/gone", "/definitely/not/here.bin");

        assert!(matches!(map.lookup("/other"), Err(LookupError::NotFound(p)) if p == "/other"));
        assert!(matches!(map.lookup("/gone"), Err(LookupError::Io { .. })));
    }

    #[test]
    fn content_map_malformed() {
        let temp = TempDir::new("content").unwrap();
        let map_file = temp.path().join("content.txt");
        fs::write(&map_file, "/a.txt a.txt\n/b.txt\n").unwrap();

        let err = ContentMap::load(&map_file).unwrap_err();
        assert!(matches!(err, ContentMapError::Malformed { line: 2 }));
    }
}
