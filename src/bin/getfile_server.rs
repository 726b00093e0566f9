use std::{error::Error, path::PathBuf, process, time::Duration};

use clap::Parser;
use getfile::{
    GetFileServer, OverflowPolicy, ServerConfig,
    config::{DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT},
};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Number of worker threads
    #[arg(short = 't', long, default_value_t = 16)]
    threads: usize,
    /// Content map file
    #[arg(short = 'm', long, default_value = "content.txt")]
    content: PathBuf,
    /// Delay before every content lookup, in microseconds
    #[arg(short, long, default_value_t = 0)]
    delay: u64,
    /// Maximum number of queued requests; unbounded when omitted
    #[arg(long)]
    queue_capacity: Option<usize>,
    /// What to do with a request when the queue is full
    #[arg(long, value_enum, default_value_t = OverflowPolicy::Block)]
    overflow: OverflowPolicy,
    /// Seconds to wait for a request header; 0 waits forever
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    request_timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    ctrlc::set_handler(|| {
        info!("shutting down");
        process::exit(0);
    })?;

    let cli = Cli::parse();
    let config = ServerConfig {
        port: cli.port,
        threads: cli.threads,
        content_map: cli.content,
        content_delay: Duration::from_micros(cli.delay),
        queue_capacity: cli.queue_capacity,
        overflow: cli.overflow,
        request_timeout: Some(Duration::from_secs(cli.request_timeout)).filter(|t| !t.is_zero()),
    };

    let server = GetFileServer::from_config(&config)?;
    server.listen()?;
    Ok(())
}
