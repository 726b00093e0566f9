use std::{error::Error, path::PathBuf, process, time::Duration};

use clap::Parser;
use getfile::{ClientConfig, WorkloadFile, config::DEFAULT_PORT, run_batch};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server host name or address
    #[arg(short, long, default_value = "localhost")]
    server: String,
    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// File with one request path per line
    #[arg(short, long, default_value = "workload.txt")]
    workload: PathBuf,
    /// Number of worker threads
    #[arg(short = 't', long, default_value_t = 8)]
    threads: usize,
    /// Total number of requests
    #[arg(short = 'n', long, default_value_t = 16)]
    requests: usize,
    /// Directory downloaded files are written to
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
    /// Connect, read and write timeout in seconds; 0 waits forever
    #[arg(long, default_value_t = 0)]
    timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    ctrlc::set_handler(|| {
        info!("interrupted");
        process::exit(130);
    })?;

    let cli = Cli::parse();
    let config = ClientConfig {
        server: cli.server,
        port: cli.port,
        workload: cli.workload,
        threads: cli.threads,
        requests: cli.requests,
        output_dir: cli.output,
        timeout: Some(Duration::from_secs(cli.timeout)).filter(|t| !t.is_zero()),
    };

    let mut workload = WorkloadFile::load(&config.workload)?;
    let summary = run_batch(&config, &mut workload)?;

    println!(
        "{} requests: {} ok, {} not found, {} error, {} invalid, {} local failures, {} bytes",
        summary.completed,
        summary.ok,
        summary.file_not_found,
        summary.error,
        summary.invalid,
        summary.local_failures,
        summary.bytes_received
    );
    Ok(())
}
