//! Pipe layer: pasangan ring buffer + registry slot
//!
//! - Pipe: satu channel dua arah per koneksi CCP
//! - Registry: tabel slot berukuran tetap dengan id ber-generation

mod duplex;
mod registry;

pub use duplex::{Pipe, PipeId};
pub use registry::{PipeHandle, Registry};
