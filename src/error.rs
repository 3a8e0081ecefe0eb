//! Error surface kpipe
//!
//! Setiap jalur gagal punya sinyal sendiri. Tidak ada error generik:
//! caller selalu tahu apakah harus retry, drop, atau menyerah.

use std::io;

use thiserror::Error;

use crate::pipe::PipeId;

/// Semua error yang bisa keluar dari ring buffer, registry, dan front end
#[derive(Debug, Error)]
pub enum Error {
    /// Tidak cukup ruang untuk write, atau buffer kosong pada read non-blocking
    #[error("operation would block: insufficient space or data")]
    WouldBlock,

    /// Blocking wait di-interrupt; caller harus mengulang call yang sama
    #[error("interrupted while waiting, retry")]
    Interrupted,

    /// Copy lintas boundary gagal (buffer caller lebih kecil dari len)
    #[error("bad buffer: requested {requested} bytes but buffer holds {available}")]
    Fault { requested: usize, available: usize },

    /// Alokasi ring buffer gagal saat membuat pipe
    #[error("ring buffer allocation failed: {0}")]
    OutOfMemory(#[source] io::Error),

    /// Semua slot registry terpakai
    #[error("all {max} pipe slots are in use")]
    OutOfSlots { max: usize },

    /// Konfigurasi tidak valid
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Handle menunjuk slot yang sudah di-release atau dipakai ulang
    #[error("stale pipe handle {0}")]
    StaleHandle(PipeId),
}

/// Result dengan [`Error`] kpipe
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True untuk kondisi sementara yang boleh di-retry oleh caller
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::WouldBlock | Error::Interrupted)
    }

    /// Negative errno seperti yang dikembalikan character device ke userspace
    #[cfg(unix)]
    pub fn errno(&self) -> i32 {
        let code = match self {
            Error::WouldBlock => libc::EAGAIN,
            Error::Interrupted => libc::EINTR,
            Error::Fault { .. } => libc::EFAULT,
            Error::OutOfMemory(_) => libc::ENOMEM,
            Error::OutOfSlots { .. } => libc::EMFILE,
            Error::InvalidConfig(_) => libc::EINVAL,
            Error::StaleHandle(_) => libc::EBADF,
        };
        -code
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::WouldBlock => io::ErrorKind::WouldBlock,
            Error::Interrupted => io::ErrorKind::Interrupted,
            Error::Fault { .. } => io::ErrorKind::InvalidInput,
            Error::OutOfMemory(_) => io::ErrorKind::OutOfMemory,
            Error::OutOfSlots { .. } => io::ErrorKind::Other,
            Error::InvalidConfig(_) => io::ErrorKind::InvalidInput,
            Error::StaleHandle(_) => io::ErrorKind::NotFound,
        };
        io::Error::new(kind, err)
    }
}
