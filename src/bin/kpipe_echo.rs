//! KPipe Echo Server - transport echo lewat Unix socket
//!
//! Setiap koneksi socket membuka satu channel:
//! - socket -> `Channel::write` (user -> kernel)
//! - datapath loop: `KernelHandle::read` -> `write` (echo kernel -> user)
//! - `Channel::read` non-blocking -> socket
//!
//! Usage:
//!   cargo run --release --bin kpipe_echo [OPTIONS]

#[cfg(unix)]
mod echo {
    use std::collections::HashMap;
    use std::io::{self, Read, Write};
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use mio::net::{UnixListener, UnixStream};
    use mio::{Events, Interest, Poll, Token};

    use kpipe::{Channel, Device, Error, KernelHandle, PipeConfig, PipeId, BIGGEST_MSG_SIZE};

    const LISTENER: Token = Token(0);
    const EVENTS_CAPACITY: usize = 256;
    /// Batas byte socket yang belum masuk pipe, per koneksi
    const INBOUND_LIMIT: usize = 64 * 1024;
    const STATS_INTERVAL: Duration = Duration::from_secs(5);

    /// Echo server configuration
    pub struct EchoConfig {
        pub socket: PathBuf,
        pub pipe: PipeConfig,
        pub verbose: bool,
    }

    impl Default for EchoConfig {
        fn default() -> Self {
            Self {
                socket: PathBuf::from("/tmp/kpipe.sock"),
                pipe: PipeConfig::default(),
                verbose: false,
            }
        }
    }

    #[derive(Default)]
    struct EchoStats {
        bytes_in: u64,
        bytes_echoed: u64,
        bytes_out: u64,
        backpressure: u64,
        connections_total: u64,
        rejected: u64,
    }

    impl EchoStats {
        fn log(&self, uptime: Duration, active: usize) {
            tracing::info!(
                uptime_s = uptime.as_secs(),
                active,
                total = self.connections_total,
                rejected = self.rejected,
                bytes_in = self.bytes_in,
                bytes_echoed = self.bytes_echoed,
                bytes_out = self.bytes_out,
                backpressure = self.backpressure,
                "echo stats"
            );
        }
    }

    struct Client {
        stream: UnixStream,
        channel: Channel,
        kernel: KernelHandle,
        inbound: Vec<u8>,
        outbound: Vec<u8>,
        closed: bool,
    }

    impl Client {
        fn id(&self) -> PipeId {
            self.channel.id()
        }

        /// Tutup paksa: data yang belum terkirim dibuang
        fn abort(&mut self) {
            self.closed = true;
            self.inbound.clear();
            self.outbound.clear();
        }

        /// Baca socket sampai WouldBlock, EOF, atau inbound penuh
        fn fill_inbound(&mut self) -> io::Result<usize> {
            let mut buf = [0u8; 4096];
            let mut total = 0;
            while self.inbound.len() < INBOUND_LIMIT {
                match self.stream.read(&mut buf) {
                    Ok(0) => {
                        self.closed = true;
                        break;
                    }
                    Ok(n) => {
                        self.inbound.extend_from_slice(&buf[..n]);
                        total += n;
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            Ok(total)
        }

        /// Dorong inbound ke pipe per potongan `BIGGEST_MSG_SIZE`.
        /// Pipe penuh: sisanya tetap di inbound untuk iterasi berikutnya.
        fn push_to_pipe(&mut self, stats: &mut EchoStats) -> usize {
            let mut pushed = 0;
            while pushed < self.inbound.len() {
                let end = (pushed + BIGGEST_MSG_SIZE).min(self.inbound.len());
                let chunk = &self.inbound[pushed..end];
                match self.channel.write(chunk, chunk.len()) {
                    Ok(n) => pushed += n,
                    Err(Error::WouldBlock) => {
                        stats.backpressure += 1;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(id = %self.channel.id(), error = %e, "pipe write failed");
                        self.abort();
                        return pushed;
                    }
                }
            }
            self.inbound.drain(..pushed);
            pushed
        }

        /// Ambil semua byte kernel -> user ke outbound
        fn drain_pipe(&mut self) -> usize {
            let mut buf = [0u8; BIGGEST_MSG_SIZE];
            let mut total = 0;
            loop {
                match self.channel.read(&mut buf, BIGGEST_MSG_SIZE) {
                    Ok(0) | Err(Error::WouldBlock) => break,
                    Ok(n) => {
                        self.outbound.extend_from_slice(&buf[..n]);
                        total += n;
                    }
                    Err(e) => {
                        tracing::warn!(id = %self.channel.id(), error = %e, "pipe read failed");
                        self.abort();
                        break;
                    }
                }
            }
            total
        }

        fn flush_outbound(&mut self) -> io::Result<usize> {
            let mut written = 0;
            let result: io::Result<()> = loop {
                if written >= self.outbound.len() {
                    break Ok(());
                }
                match self.stream.write(&self.outbound[written..]) {
                    Ok(0) => break Err(io::ErrorKind::WriteZero.into()),
                    Ok(n) => written += n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => break Err(e),
                }
            };
            self.outbound.drain(..written);
            result.map(|_| written)
        }
    }

    /// Sisi datapath: echo semua byte user -> kernel kembali ke user.
    /// Hanya membaca sebanyak ruang kosong di queue kernel -> user.
    fn datapath_echo(kernel: &KernelHandle) -> kpipe::Result<usize> {
        let mut buf = [0u8; BIGGEST_MSG_SIZE];
        let mut total = 0;
        loop {
            let want = kernel.available().min(buf.len());
            if want == 0 {
                break;
            }
            let n = kernel.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            kernel.write(&buf[..n])?;
            total += n;
        }
        Ok(total)
    }

    fn accept_connections(
        listener: &mut UnixListener,
        poll: &Poll,
        device: &Device,
        clients: &mut HashMap<Token, Client>,
        next_token: &mut usize,
        stats: &mut EchoStats,
    ) -> io::Result<()> {
        loop {
            match listener.accept() {
                Ok((mut stream, _addr)) => {
                    let mut channel = match device.open() {
                        Ok(channel) => channel,
                        Err(e) => {
                            tracing::warn!(error = %e, "rejecting connection");
                            stats.rejected += 1;
                            continue;
                        }
                    };
                    channel.set_nonblocking(true);
                    let kernel = match device.kernel_handle(channel.id()) {
                        Ok(kernel) => kernel,
                        Err(e) => {
                            tracing::warn!(id = %channel.id(), error = %e, "rejecting connection");
                            stats.rejected += 1;
                            continue;
                        }
                    };

                    let token = Token(*next_token);
                    *next_token += 1;
                    poll.registry()
                        .register(&mut stream, token, Interest::READABLE)?;

                    tracing::info!(id = %channel.id(), ?token, "connection opened");
                    stats.connections_total += 1;
                    clients.insert(
                        token,
                        Client {
                            stream,
                            channel,
                            kernel,
                            inbound: Vec::with_capacity(INBOUND_LIMIT),
                            outbound: Vec::new(),
                            closed: false,
                        },
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Main server loop
    pub fn run(config: EchoConfig) -> io::Result<()> {
        let device = Device::new(config.pipe.clone())?;

        // Socket sisa run sebelumnya
        if config.socket.exists() {
            std::fs::remove_file(&config.socket)?;
        }
        let mut listener = UnixListener::bind(&config.socket)?;
        let mut poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        tracing::info!(
            socket = %config.socket.display(),
            capacity = config.pipe.capacity,
            max_pipes = config.pipe.max_pipes,
            write_mode = ?config.pipe.write_mode,
            "kpipe echo listening"
        );

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut clients: HashMap<Token, Client> = HashMap::new();
        let mut next_token = 1usize;
        let mut stats = EchoStats::default();
        let start_time = Instant::now();
        let mut last_stats = Instant::now();

        loop {
            // Pipe tidak punya fd, jadi timeout pendek menjaga datapath tetap jalan
            if let Err(e) = poll.poll(&mut events, Some(Duration::from_millis(1))) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            // === PHASE 1: Accept ===
            if events.iter().any(|event| event.token() == LISTENER) {
                accept_connections(
                    &mut listener,
                    &poll,
                    &device,
                    &mut clients,
                    &mut next_token,
                    &mut stats,
                )?;
            }

            // === PHASE 2: socket -> pipe ===
            // Semua koneksi dicoba tiap iterasi: inbound yang penuh berhenti
            // membaca sebelum WouldBlock, jadi edge event tidak bisa diandalkan.
            for client in clients.values_mut() {
                match client.fill_inbound() {
                    Ok(n) => stats.bytes_in += n as u64,
                    Err(e) => {
                        tracing::warn!(id = %client.id(), error = %e, "socket read failed");
                        client.abort();
                    }
                }
                client.push_to_pipe(&mut stats);
            }

            // === PHASE 3: datapath echo ===
            for client in clients.values() {
                match datapath_echo(&client.kernel) {
                    Ok(n) => stats.bytes_echoed += n as u64,
                    Err(e) => tracing::warn!(id = %client.id(), error = %e, "datapath echo failed"),
                }
            }

            // === PHASE 4: pipe -> socket ===
            for client in clients.values_mut() {
                client.drain_pipe();
                match client.flush_outbound() {
                    Ok(n) => stats.bytes_out += n as u64,
                    Err(e) => {
                        tracing::debug!(id = %client.id(), error = %e, "socket write failed");
                        client.abort();
                    }
                }
            }

            // === PHASE 5: Remove closed connections ===
            let closed: Vec<Token> = clients
                .iter()
                .filter(|(_, c)| c.closed && c.inbound.is_empty() && c.outbound.is_empty())
                .map(|(token, _)| *token)
                .collect();
            for token in closed {
                if let Some(mut client) = clients.remove(&token) {
                    poll.registry().deregister(&mut client.stream)?;
                    let id = client.id();
                    if let Err(e) = client.channel.release() {
                        // Drop Channel akan release tanpa interrupt
                        tracing::debug!(%id, error = %e, "release deferred to drop");
                    }
                    tracing::debug!(%id, ?token, "connection closed");
                }
            }

            // === PHASE 6: Stats ===
            if last_stats.elapsed() > STATS_INTERVAL {
                stats.log(start_time.elapsed(), clients.len());
                last_stats = Instant::now();
            }
        }
    }
}

#[cfg(unix)]
fn parse_args() -> echo::EchoConfig {
    use kpipe::{WriteMode, MAX_PIPES, PER_Q_BSIZE};

    let args: Vec<String> = std::env::args().collect();
    let mut config = echo::EchoConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--socket" | "-s" => {
                if i + 1 < args.len() {
                    config.socket = args[i + 1].clone().into();
                    i += 1;
                }
            }
            "--capacity" | "-c" => {
                if i + 1 < args.len() {
                    config.pipe.capacity = args[i + 1].parse().unwrap_or(PER_Q_BSIZE);
                    i += 1;
                }
            }
            "--max-pipes" | "-m" => {
                if i + 1 < args.len() {
                    config.pipe.max_pipes = args[i + 1].parse().unwrap_or(MAX_PIPES);
                    i += 1;
                }
            }
            "--multi" => {
                config.pipe.write_mode = WriteMode::Multi;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!("KPipe Echo - datapath echo over lock-free pipes\n");
                println!("Usage: kpipe_echo [OPTIONS]\n");
                println!("Options:");
                println!("  -s, --socket <PATH>     Unix socket path (default: /tmp/kpipe.sock)");
                println!("  -c, --capacity <BYTES>  Ring capacity per queue (default: 4000)");
                println!("  -m, --max-pipes <N>     Maximum open pipes (default: 32)");
                println!("      --multi             Multi-writer commit protocol");
                println!("  -v, --verbose           Debug logging (RUST_LOG overrides)");
                println!("  -h, --help              Show this help");
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

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(unix)]
fn main() {
    let config = parse_args();
    init_tracing(config.verbose);

    if let Err(e) = echo::run(config) {
        tracing::error!(error = %e, "echo server failed");
        std::process::exit(1);
    }
}

#[cfg(not(unix))]
fn main() {
    init_tracing(false);
    tracing::error!("kpipe_echo requires Unix domain sockets");
    std::process::exit(1);
}
