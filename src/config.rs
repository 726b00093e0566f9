//! Runtime settings for the server and the download client.
//!
//! The binaries fill these in from the command line; tests build them
//! directly. Every setting is checked by `validate` before a pool is started.
use std::{path::PathBuf, time::Duration};

use clap::ValueEnum;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 39474;
pub const MAX_THREADS: usize = 1024;
pub const MAX_CONTENT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("thread count must be between 1 and {MAX_THREADS}, got {0}")]
    Threads(usize),
    #[error("content delay must not exceed {MAX_CONTENT_DELAY:?}, got {0:?}")]
    Delay(Duration),
    #[error("queue capacity must be positive")]
    Capacity,
}

/// What the accept loop does when the server queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OverflowPolicy {
    /// Stop accepting until a worker frees a slot.
    #[default]
    Block,
    /// Answer `ERROR` and close the connection.
    Reject,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub threads: usize,
    pub content_map: PathBuf,
    pub content_delay: Duration,
    /// `None` leaves the queue unbounded.
    pub queue_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
    /// Time a client gets to deliver its whole request header.
    pub request_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            threads: 16,
            content_map: PathBuf::from("content.txt"),
            content_delay: Duration::ZERO,
            queue_capacity: None,
            overflow: OverflowPolicy::Block,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_threads(self.threads)?;
        if self.content_delay > MAX_CONTENT_DELAY {
            return Err(ConfigError::Delay(self.content_delay));
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::Capacity);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    pub port: u16,
    pub workload: PathBuf,
    pub threads: usize,
    /// Total number of downloads; the workload is cycled to reach it.
    pub requests: usize,
    pub output_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: DEFAULT_PORT,
            workload: PathBuf::from("workload.txt"),
            threads: 8,
            requests: 16,
            output_dir: PathBuf::from("."),
            timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_threads(self.threads)
    }
}

fn validate_threads(threads: usize) -> Result<(), ConfigError> {
    if threads == 0 || threads > MAX_THREADS {
        return Err(ConfigError::Threads(threads));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(ServerConfig::default().validate(), Ok(()));
        assert_eq!(ClientConfig::default().validate(), Ok(()));
    }

    #[test]
    fn thread_bounds() {
        for threads in [0, MAX_THREADS + 1] {
            let config = ClientConfig {
                threads,
                ..Default::default()
            };
            assert_eq!(config.validate(), Err(ConfigError::Threads(threads)));
        }

        let config = ServerConfig {
            threads: MAX_THREADS,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn server_limits() {
        let config = ServerConfig {
            content_delay: Duration::from_secs(6),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Delay(Duration::from_secs(6)))
        );

        let config = ServerConfig {
            queue_capacity: Some(0),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Capacity));
    }
}
