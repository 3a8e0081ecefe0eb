//! KPipe Client - round-trip checker untuk `kpipe_echo`
//!
//! Mengirim payload berukuran 1..=BIGGEST_MSG_SIZE, menunggu echo-nya kembali
//! utuh, lalu melaporkan latency round-trip.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin kpipe_client -- --socket /tmp/kpipe.sock --count 10000
//! ```

use std::time::{Duration, Instant};

use kpipe::BIGGEST_MSG_SIZE;

/// Client configuration
struct ClientConfig {
    socket: String,
    count: usize,
    max_size: usize,
    verbose: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket: "/tmp/kpipe.sock".to_string(),
            count: 10_000,
            max_size: BIGGEST_MSG_SIZE,
            verbose: false,
        }
    }
}

/// Latency samples dalam nanodetik
struct LatencyStats {
    samples: Vec<u64>,
}

impl LatencyStats {
    fn with_capacity(n: usize) -> Self {
        Self {
            samples: Vec::with_capacity(n),
        }
    }

    fn record(&mut self, latency: Duration) {
        self.samples.push(latency.as_nanos() as u64);
    }

    fn percentile(sorted: &[u64], p: f64) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        let idx = ((sorted.len() as f64 * p / 100.0) as usize).min(sorted.len() - 1);
        sorted[idx]
    }

    fn report(&self, elapsed: Duration, bytes: u64) {
        if self.samples.is_empty() {
            tracing::warn!("no samples recorded");
            return;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let sum: u64 = sorted.iter().sum();
        let avg = sum / sorted.len() as u64;

        println!("\n📊 Round-trip latency ({} samples)", sorted.len());
        println!("    Min:      {:.2} μs", sorted[0] as f64 / 1000.0);
        println!("    Avg:      {:.2} μs", avg as f64 / 1000.0);
        println!("    P50:      {:.2} μs", Self::percentile(&sorted, 50.0) as f64 / 1000.0);
        println!("    P99:      {:.2} μs", Self::percentile(&sorted, 99.0) as f64 / 1000.0);
        println!("    Max:      {:.2} μs", sorted[sorted.len() - 1] as f64 / 1000.0);
        println!(
            "    Throughput: {:.1} KB/s",
            bytes as f64 / 1024.0 / elapsed.as_secs_f64()
        );
    }
}

/// Payload deterministik: ukuran dan isi bergantung pada nomor urut
fn payload(seq: usize, max_size: usize, buf: &mut Vec<u8>) {
    let len = 1 + seq % max_size;
    buf.clear();
    buf.extend((0..len).map(|i| (seq.wrapping_mul(31) + i) as u8));
}

#[cfg(unix)]
fn run_client(config: &ClientConfig) -> std::io::Result<()> {
    use std::io::{self, Read, Write};
    use std::os::unix::net::UnixStream;

    let mut stream = UnixStream::connect(&config.socket)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    tracing::info!(socket = %config.socket, count = config.count, "connected");

    let mut stats = LatencyStats::with_capacity(config.count);
    let mut sent = Vec::with_capacity(config.max_size);
    let mut echoed = vec![0u8; config.max_size];
    let mut bytes = 0u64;
    let start = Instant::now();

    for seq in 0..config.count {
        payload(seq, config.max_size, &mut sent);

        let t0 = Instant::now();
        stream.write_all(&sent)?;
        stream.read_exact(&mut echoed[..sent.len()])?;
        stats.record(t0.elapsed());

        if echoed[..sent.len()] != sent[..] {
            tracing::error!(seq, len = sent.len(), "echo mismatch");
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("echo mismatch at message {}", seq),
            ));
        }
        bytes += sent.len() as u64;

        if config.verbose && seq % 1000 == 0 {
            tracing::debug!(seq, len = sent.len(), "round trip ok");
        }
    }

    stats.report(start.elapsed(), bytes);
    println!("\n✅ {} payloads echoed intact", config.count);
    Ok(())
}

#[cfg(not(unix))]
fn run_client(_config: &ClientConfig) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "kpipe_client requires Unix domain sockets",
    ))
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--socket" | "-s" => {
                if i + 1 < args.len() {
                    config.socket = args[i + 1].clone();
                    i += 1;
                }
            }
            "--count" | "-n" => {
                if i + 1 < args.len() {
                    config.count = args[i + 1].parse().unwrap_or(10_000);
                    i += 1;
                }
            }
            "--size" => {
                if i + 1 < args.len() {
                    config.max_size = args[i + 1]
                        .parse()
                        .unwrap_or(BIGGEST_MSG_SIZE)
                        .clamp(1, BIGGEST_MSG_SIZE);
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!("KPipe Client - round-trip checker for kpipe_echo\n");
                println!("Usage: kpipe_client [OPTIONS]\n");
                println!("Options:");
                println!("  -s, --socket <PATH>  Unix socket path (default: /tmp/kpipe.sock)");
                println!("  -n, --count <N>      Payloads to send (default: 10000)");
                println!("      --size <BYTES>   Largest payload, max 256 (default: 256)");
                println!("  -v, --verbose        Debug logging (RUST_LOG overrides)");
                println!("  -h, --help           Show this help");
                std::process::exit(0);
            }
            other => {
                eprintln!("unknown option: {}", other);
            }
        }
        i += 1;
    }

    config
}

fn main() {
    let config = parse_args();

    let default = if config.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run_client(&config) {
        tracing::error!(error = %e, "client failed");
        std::process::exit(1);
    }
}
