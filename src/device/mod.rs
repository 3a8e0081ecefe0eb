//! Front end mirip character device
//!
//! Memetakan open/read/write/release ke registry:
//! - `Device::open` -> `Registry::acquire`, menghasilkan `Channel` untuk user
//! - `Channel::write` menulis ke queue user->kernel
//! - `Channel::read` membaca queue kernel->user (atau queue sendiri pada loopback)
//! - `Device::kernel_handle` me-resolve id sekali; `KernelHandle::read` /
//!   `write` adalah entry point sisi datapath, dengan arah kebalikan dari
//!   user. Tidak pernah tidur dan tidak menyentuh lock registry.

use std::io;
use std::sync::Arc;

use crate::config::{Direction, PipeConfig};
use crate::error::{Error, Result};
use crate::pipe::{PipeHandle, PipeId, Registry};

/// Device bersama; clone murah (Arc ke registry)
#[derive(Clone)]
pub struct Device {
    registry: Arc<Registry>,
}

impl Device {
    pub fn new(config: PipeConfig) -> Result<Self> {
        let registry = Registry::new(config)?;
        tracing::info!(
            capacity = registry.config().capacity,
            max_pipes = registry.capacity(),
            write_mode = ?registry.config().write_mode,
            loopback = registry.config().loopback,
            "kpipe device created"
        );
        Ok(Self {
            registry: Arc::new(registry),
        })
    }

    /// Buka channel baru untuk satu proses CCP
    pub fn open(&self) -> Result<Channel> {
        let handle = self.registry.acquire()?;
        Ok(Channel {
            id: handle.id(),
            handle: Some(handle),
            registry: Arc::clone(&self.registry),
            loopback: self.registry.config().loopback,
            nonblocking: false,
        })
    }

    /// Resolve `id` untuk sisi datapath. Satu-satunya titik yang mengambil
    /// lock registry; I/O lewat handle yang dihasilkan bebas lock.
    pub fn kernel_handle(&self, id: PipeId) -> Result<KernelHandle> {
        let handle = self.registry.lookup(id)?;
        tracing::debug!(%id, "kernel handle resolved");
        Ok(KernelHandle { handle })
    }

    /// Tutup semua channel yang masih terbuka
    pub fn shutdown(&self) -> usize {
        self.registry.release_all()
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Sisi datapath dari satu pipe.
///
/// Setelah slot di-release, semua operasi gagal dengan `StaleHandle` walau
/// buffer masih hidup lewat handle ini.
#[derive(Clone)]
pub struct KernelHandle {
    handle: PipeHandle,
}

impl KernelHandle {
    #[inline]
    pub fn id(&self) -> PipeId {
        self.handle.id()
    }

    #[inline]
    fn live(&self) -> Result<&PipeHandle> {
        if self.handle.is_closed() {
            return Err(Error::StaleHandle(self.handle.id()));
        }
        Ok(&self.handle)
    }

    /// Baca pesan dari user. Tidak pernah tidur: kosong = `Ok(0)`.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        self.live()?.queue(Direction::ToKernel).read(buf, len, false)
    }

    /// Ruang kosong di queue kernel -> user
    #[inline]
    pub fn available(&self) -> usize {
        self.handle.queue(Direction::ToUser).available()
    }

    /// Kirim pesan ke user. Ruang kurang = `WouldBlock`.
    ///
    /// Di `WriteMode::Single` hanya satu thread yang boleh menulis lewat
    /// handle-handle untuk pipe yang sama.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.live()?.queue(Direction::ToUser).write(buf, buf.len())
    }
}

impl std::fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelHandle")
            .field("id", &self.id())
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

/// Sisi user dari satu pipe, setara file descriptor yang terbuka.
///
/// Drop melakukan release kalau `release` belum dipanggil.
pub struct Channel {
    id: PipeId,
    handle: Option<PipeHandle>,
    registry: Arc<Registry>,
    loopback: bool,
    nonblocking: bool,
}

impl Channel {
    #[inline]
    fn pipe(&self) -> Result<&PipeHandle> {
        self.handle.as_ref().ok_or(Error::StaleHandle(self.id))
    }

    #[inline]
    pub fn id(&self) -> PipeId {
        self.id
    }

    /// `true` setelah `release` berhasil
    #[inline]
    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Mode O_NONBLOCK: read pada queue kosong mengembalikan `WouldBlock`
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.nonblocking = nonblocking;
    }

    /// Baca maksimal `len` byte. Blocking kecuali `set_nonblocking(true)`.
    pub fn read(&self, buf: &mut [u8], len: usize) -> Result<usize> {
        let direction = if self.loopback {
            Direction::ToKernel
        } else {
            Direction::ToUser
        };
        let queue = self.pipe()?.queue(direction);

        let n = queue.read(buf, len, !self.nonblocking)?;
        if n == 0 && len > 0 && self.nonblocking {
            return Err(Error::WouldBlock);
        }
        Ok(n)
    }

    /// Tulis `len` byte ke datapath. Ruang kurang = `WouldBlock`, tanpa partial write.
    ///
    /// Di `WriteMode::Single` channel ini harus punya paling banyak satu
    /// writer aktif; pakai `WriteMode::Multi` kalau beberapa thread menulis.
    pub fn write(&self, buf: &[u8], len: usize) -> Result<usize> {
        self.pipe()?.queue(Direction::ToKernel).write(buf, len)
    }

    /// Bangunkan read yang sedang tidur di channel ini dengan `Interrupted`
    pub fn interrupt(&self) {
        if let Some(handle) = &self.handle {
            handle.interrupt();
        }
    }

    /// Kembalikan pipe ke registry. Kalau lock registry di-interrupt,
    /// channel tetap terbuka dan call ini boleh diulang.
    pub fn release(&mut self) -> Result<()> {
        if self.handle.is_none() {
            return Ok(());
        }
        self.registry.release(self.id)?;
        self.handle = None;
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.registry.release_uninterruptible(handle.id()) {
                tracing::debug!(id = %handle.id(), error = %e, "channel already released");
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .field("loopback", &self.loopback)
            .field("nonblocking", &self.nonblocking)
            .finish()
    }
}

impl io::Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        Channel::read(self, buf, len).map_err(io::Error::from)
    }
}

impl io::Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Channel::write(self, buf, buf.len()).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
