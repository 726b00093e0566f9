pub mod config;
pub mod content;
pub mod download;
pub mod pool;
pub mod protocol;
pub mod workload;

pub use config::{ClientConfig, OverflowPolicy, ServerConfig};
pub use content::{ContentMap, ContentStore};
pub use download::{BatchSummary, Downloader, run_batch};
pub use protocol::{GetFileClient, GetFileServer, Status};
pub use workload::{Workload, WorkloadFile};
