//! KPipe - Lock-Free Byte Pipes antara Datapath dan CCP
//!
//! Arsitektur:
//! - Duplex: setiap pipe punya dua ring buffer (user->kernel, kernel->user)
//! - Lock-Free: reservasi dan commit writer hanya memakai atomic CAS
//! - No-Allocation: arena mmap dialokasikan sekali saat pipe dibuka
//! - Byte Stream: transport tidak melakukan framing, batas pesan milik layer atas
//!
//! Layer:
//! - [`core`]: ring buffer, commit state, wait condition
//! - [`pipe`]: pasangan ring buffer + registry slot ber-generation
//! - [`device`]: front end mirip character device (open/read/write/release)

pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod pipe;

pub use crate::config::{
    Direction, PipeConfig, WriteMode, BIGGEST_MSG_SIZE, MAX_CAPACITY, MAX_PIPES, PER_Q_BSIZE,
};
pub use crate::core::RingBuffer;
pub use crate::device::{Channel, Device, KernelHandle};
pub use crate::error::{Error, Result};
pub use crate::pipe::{Pipe, PipeHandle, PipeId, Registry};
