//! Konfigurasi pipe dan konstanta wire contract
//!
//! Nilai default sama dengan konstanta compile-time modul kernel:
//! 4000 byte per queue, maksimal 32 CCP, pesan terbesar 256 byte.

use crate::error::{Error, Result};

/// Kapasitas default per ring buffer (bytes)
pub const PER_Q_BSIZE: usize = 4000;

/// Jumlah maksimum pipe yang boleh terbuka bersamaan
pub const MAX_PIPES: usize = 32;

/// Ukuran pesan terbesar yang boleh dikirim layer di atas transport.
/// Transport sendiri tidak melakukan framing, jadi ini hanya kontrak.
pub const BIGGEST_MSG_SIZE: usize = 256;

/// Kapasitas maksimum: commit word menyimpan empat offset 16-bit
pub const MAX_CAPACITY: usize = u16::MAX as usize;

/// Mode concurrency sisi writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Paling banyak satu writer dalam satu waktu
    #[default]
    Single,
    /// Banyak writer bersamaan, reservasi + commit lock-free
    Multi,
}

/// Arah data di dalam pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// User process -> datapath
    ToKernel,
    /// Datapath -> user process
    ToUser,
}

/// Konfigurasi registry dan ring buffer di setiap pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    /// Kapasitas tiap ring buffer dalam bytes (usable = capacity - 1)
    pub capacity: usize,
    /// Jumlah slot registry
    pub max_pipes: usize,
    /// Protokol write untuk kedua arah
    pub write_mode: WriteMode,
    /// Apakah reader queue user->kernel boleh tidur
    pub kernel_queue_blocking: bool,
    /// Apakah reader queue kernel->user boleh tidur
    pub user_queue_blocking: bool,
    /// User membaca balik queue miliknya sendiri (echo device)
    pub loopback: bool,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            capacity: PER_Q_BSIZE,
            max_pipes: MAX_PIPES,
            write_mode: WriteMode::Single,
            kernel_queue_blocking: false,
            user_queue_blocking: true,
            loopback: false,
        }
    }
}

impl PipeConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_pipes(mut self, max_pipes: usize) -> Self {
        self.max_pipes = max_pipes;
        self
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Loopback: user membaca queue user->kernel, jadi queue itu harus blocking
    pub fn with_loopback(mut self, loopback: bool) -> Self {
        self.loopback = loopback;
        if loopback {
            self.kernel_queue_blocking = true;
        }
        self
    }

    pub fn with_blocking(mut self, kernel_queue: bool, user_queue: bool) -> Self {
        self.kernel_queue_blocking = kernel_queue;
        self.user_queue_blocking = user_queue;
        self
    }

    /// Blocking mode untuk queue dengan arah tertentu
    #[inline]
    pub fn blocking(&self, direction: Direction) -> bool {
        match direction {
            Direction::ToKernel => self.kernel_queue_blocking,
            Direction::ToUser => self.user_queue_blocking,
        }
    }

    /// Validasi sebelum registry dibuat
    pub fn validate(&self) -> Result<()> {
        if self.capacity < 2 {
            return Err(Error::InvalidConfig(format!(
                "capacity {} leaves no usable space (one byte is slack)",
                self.capacity
            )));
        }
        if self.capacity > MAX_CAPACITY {
            return Err(Error::InvalidConfig(format!(
                "capacity {} exceeds maximum {}",
                self.capacity, MAX_CAPACITY
            )));
        }
        if self.max_pipes == 0 {
            return Err(Error::InvalidConfig("max_pipes must be at least 1".into()));
        }
        Ok(())
    }
}
