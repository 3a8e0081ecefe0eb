//! Control Loop - simulasi datapath <-> CCP lewat kpipe
//!
//! Skenario per flow:
//! 1. Thread datapath menulis measurement record lewat `KernelHandle::write`
//! 2. Thread controller membaca record dengan blocking read, menghitung
//!    window baru (AIMD sederhana), lalu menulis update balik
//! 3. Datapath polling `KernelHandle::read` sampai update diterima
//! 4. Channel baru di-release setelah semua datapath selesai
//!
//! Transport hanya byte stream; framing (record berukuran tetap) milik demo ini.
//!
//! Usage:
//!   cargo run --release --example control_loop -- [options]
//!
//! Options:
//!   --flows <N>      Jumlah flow / pipe (default: 4)
//!   --reports <N>    Measurement per flow (default: 1000)
//!   --multi          Multi-writer commit protocol
//!   --verbose        Debug logging

use std::thread;
use std::time::Instant;

use kpipe::{Channel, Device, Error, KernelHandle, PipeConfig, WriteMode};

/// Measurement dari datapath: flow, seq, acked bytes, rtt, loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Measurement {
    flow: u32,
    seq: u32,
    acked: u32,
    rtt_us: u32,
    lost: u32,
}

const MEASUREMENT_SIZE: usize = 20;

impl Measurement {
    fn encode(&self) -> [u8; MEASUREMENT_SIZE] {
        let mut out = [0u8; MEASUREMENT_SIZE];
        for (i, v) in [self.flow, self.seq, self.acked, self.rtt_us, self.lost]
            .iter()
            .enumerate()
        {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    fn decode(buf: &[u8; MEASUREMENT_SIZE]) -> Self {
        let field = |i: usize| {
            u32::from_le_bytes([buf[i * 4], buf[i * 4 + 1], buf[i * 4 + 2], buf[i * 4 + 3]])
        };
        Self {
            flow: field(0),
            seq: field(1),
            acked: field(2),
            rtt_us: field(3),
            lost: field(4),
        }
    }
}

/// Update dari controller: flow, seq yang dijawab, cwnd baru (bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowUpdate {
    flow: u32,
    seq: u32,
    cwnd: u32,
}

const UPDATE_SIZE: usize = 12;

impl WindowUpdate {
    fn encode(&self) -> [u8; UPDATE_SIZE] {
        let mut out = [0u8; UPDATE_SIZE];
        out[0..4].copy_from_slice(&self.flow.to_le_bytes());
        out[4..8].copy_from_slice(&self.seq.to_le_bytes());
        out[8..12].copy_from_slice(&self.cwnd.to_le_bytes());
        out
    }

    fn decode(buf: &[u8; UPDATE_SIZE]) -> Self {
        let field = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Self {
            flow: field(0),
            seq: field(4),
            cwnd: field(8),
        }
    }
}

const MSS: u32 = 1460;

/// AIMD: loss -> setengah, selain itu tambah satu MSS per window yang di-ack
fn next_cwnd(cwnd: u32, m: &Measurement) -> u32 {
    if m.lost > 0 {
        (cwnd / 2).max(2 * MSS)
    } else {
        cwnd.saturating_add((MSS as u64 * m.acked as u64 / cwnd.max(1) as u64) as u32)
    }
}

/// Demo configuration
struct DemoConfig {
    flows: u32,
    reports: u32,
    multi: bool,
    verbose: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            flows: 4,
            reports: 1000,
            multi: false,
            verbose: false,
        }
    }
}

/// Latency Statistics
struct LatencyStats {
    samples: Vec<u64>,
}

impl LatencyStats {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(10_000),
        }
    }

    fn merge(&mut self, other: Vec<u64>) {
        self.samples.extend(other);
    }

    fn print_report(&mut self) {
        if self.samples.is_empty() {
            println!("  No samples collected");
            return;
        }
        self.samples.sort_unstable();
        let pct = |p: f64| {
            let idx = ((self.samples.len() as f64 * p / 100.0) as usize).min(self.samples.len() - 1);
            self.samples[idx] as f64 / 1000.0
        };
        let avg = self.samples.iter().sum::<u64>() / self.samples.len() as u64;

        println!("  Samples:    {}", self.samples.len());
        println!("  Min:        {:.2} μs", self.samples[0] as f64 / 1000.0);
        println!("  Avg:        {:.2} μs", avg as f64 / 1000.0);
        println!("  P50:        {:.2} μs", pct(50.0));
        println!("  P99:        {:.2} μs", pct(99.0));
        println!("  Max:        {:.2} μs", pct(100.0));
    }
}

/// Blocking read sampai `buf` penuh; stream boleh datang terpotong
fn read_record(channel: &Channel, buf: &mut [u8]) -> kpipe::Result<()> {
    let mut got = 0;
    while got < buf.len() {
        let want = buf.len() - got;
        got += channel.read(&mut buf[got..], want)?;
    }
    Ok(())
}

/// Controller untuk satu flow: blocking read measurement, tulis update.
/// Channel dikembalikan; datapath mungkin belum membaca update terakhir.
fn run_controller(channel: Channel, reports: u32) -> kpipe::Result<(Channel, u32)> {
    let mut cwnd = 10 * MSS;
    let mut record = [0u8; MEASUREMENT_SIZE];

    for _ in 0..reports {
        read_record(&channel, &mut record)?;
        let m = Measurement::decode(&record);
        cwnd = next_cwnd(cwnd, &m);

        let update = WindowUpdate {
            flow: m.flow,
            seq: m.seq,
            cwnd,
        };
        loop {
            match channel.write(&update.encode(), UPDATE_SIZE) {
                Ok(_) => break,
                Err(Error::WouldBlock) => thread::yield_now(),
                Err(e) => return Err(e),
            }
        }
    }

    Ok((channel, cwnd))
}

/// Datapath untuk satu flow: kirim measurement, polling update (tidak pernah tidur)
fn run_datapath(kernel: KernelHandle, flow: u32, reports: u32) -> kpipe::Result<Vec<u64>> {
    let mut latencies = Vec::with_capacity(reports as usize);
    let mut reply = [0u8; UPDATE_SIZE];

    for seq in 0..reports {
        let m = Measurement {
            flow,
            seq,
            acked: 10 * MSS,
            rtt_us: 50 + (seq % 7) * 10,
            lost: u32::from(seq % 50 == 49),
        };

        let t0 = Instant::now();
        loop {
            match kernel.write(&m.encode()) {
                Ok(_) => break,
                Err(Error::WouldBlock) => thread::yield_now(),
                Err(e) => return Err(e),
            }
        }

        let mut got = 0;
        while got < UPDATE_SIZE {
            let n = kernel.read(&mut reply[got..])?;
            if n == 0 {
                thread::yield_now();
            }
            got += n;
        }
        latencies.push(t0.elapsed().as_nanos() as u64);

        let update = WindowUpdate::decode(&reply);
        debug_assert_eq!((update.flow, update.seq), (flow, seq));
        tracing::trace!(flow, seq, cwnd = update.cwnd, "window update");
    }

    Ok(latencies)
}

/// Returns jumlah round trip yang selesai
fn run_demo(config: &DemoConfig) -> kpipe::Result<usize> {
    println!("🔁 KPIPE CONTROL LOOP - datapath <-> controller");
    println!("===============================================\n");
    println!("Configuration:");
    println!("  Flows:      {}", config.flows);
    println!("  Reports:    {} per flow", config.reports);
    println!("  Write mode: {}", if config.multi { "multi" } else { "single" });
    println!();

    let write_mode = if config.multi {
        WriteMode::Multi
    } else {
        WriteMode::Single
    };
    let device = Device::new(
        PipeConfig::default()
            .with_max_pipes(config.flows as usize)
            .with_write_mode(write_mode),
    )?;

    let start = Instant::now();
    let mut controllers = Vec::new();
    let mut datapaths = Vec::new();

    for flow in 0..config.flows {
        let channel = device.open()?;
        let kernel = device.kernel_handle(channel.id())?;
        let reports = config.reports;

        controllers.push(thread::spawn(move || run_controller(channel, reports)));
        datapaths.push(thread::spawn(move || run_datapath(kernel, flow, reports)));
    }

    let mut stats = LatencyStats::new();
    for handle in datapaths {
        match handle.join() {
            Ok(result) => stats.merge(result?),
            Err(_) => tracing::error!("datapath thread panicked"),
        }
    }
    for (flow, handle) in controllers.into_iter().enumerate() {
        match handle.join() {
            Ok(result) => {
                let (mut channel, cwnd) = result?;
                channel.release()?;
                tracing::info!(flow, cwnd, "flow finished");
            }
            Err(_) => tracing::error!(flow, "controller thread panicked"),
        }
    }

    let elapsed = start.elapsed();
    println!("\n📊 Measurement -> update round trip");
    stats.print_report();
    println!(
        "\n  Rate:       {:.0} reports/sec",
        stats.samples.len() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    let leftover = device.shutdown();
    if leftover > 0 {
        tracing::warn!(leftover, "pipes still open at shutdown");
    }
    println!("\n✅ Control loop complete in {:?}", elapsed);
    Ok(stats.samples.len())
}

fn parse_args() -> DemoConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DemoConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--flows" => {
                if i + 1 < args.len() {
                    config.flows = args[i + 1].parse().unwrap_or(4);
                    i += 1;
                }
            }
            "--reports" => {
                if i + 1 < args.len() {
                    config.reports = args[i + 1].parse().unwrap_or(1000);
                    i += 1;
                }
            }
            "--multi" => config.multi = true,
            "--verbose" | "-v" => config.verbose = true,
            _ => {}
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

    if let Err(e) = run_demo(&config) {
        tracing::error!(error = %e, "control loop failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(multi: bool) -> DemoConfig {
        DemoConfig {
            flows: 2,
            reports: 60,
            multi,
            verbose: false,
        }
    }

    #[test]
    fn test_control_loop_completes_single_writer() {
        assert_eq!(run_demo(&config(false)).unwrap(), 120);
    }

    #[test]
    fn test_control_loop_completes_multi_writer() {
        assert_eq!(run_demo(&config(true)).unwrap(), 120);
    }

    #[test]
    fn test_aimd_halves_on_loss() {
        let mut m = Measurement {
            flow: 0,
            seq: 0,
            acked: 10 * MSS,
            rtt_us: 50,
            lost: 1,
        };
        assert_eq!(next_cwnd(20 * MSS, &m), 10 * MSS);
        assert_eq!(next_cwnd(3 * MSS, &m), 2 * MSS);

        m.lost = 0;
        assert_eq!(next_cwnd(10 * MSS, &m), 11 * MSS);
        assert_eq!(Measurement::decode(&m.encode()), m);
    }
}
