//! One-shot response time measurement
//!
//! Runs inside each measurement job. Prints the elapsed milliseconds of a
//! single GET as a plain number on success; on failure prints the error to
//! stderr and exits non-zero.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "measure")]
#[command(about = "Measure webpage response time")]
struct Args {
    /// Target URL to measure response time for
    #[arg(long, env = "MEASURE_URL")]
    url: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30", env = "MEASURE_TIMEOUT_SECS")]
    timeout_secs: u64,
}

async fn measure_response_time(url: &str, timeout: Duration) -> Result<f64> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let start = Instant::now();
    let response = client.get(url).send().await?.error_for_status()?;
    // Timing covers the full body, not just the headers
    response.bytes().await?;
    Ok(start.elapsed().as_secs_f64() * 1000.0)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match measure_response_time(&args.url, Duration::from_secs(args.timeout_secs)).await {
        Ok(elapsed_ms) => {
            println!("{}", elapsed_ms);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
