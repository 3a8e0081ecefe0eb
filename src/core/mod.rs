//! Core module: Lock-Free Byte Ring Buffer dengan mmap backing
//!
//! Prinsip desain:
//! - Lock-Free writer: hanya atomic CAS, tidak ada Mutex di jalur write
//! - No-Allocation: arena dialokasikan sekali saat ring dibuat
//! - Reader bisa polling (tidak pernah tidur) atau blocking (wait condition)

mod arena;
mod commit;
mod ring_buffer;
mod wait;

pub use arena::ByteArena;
pub use commit::PendingChunk;
pub use ring_buffer::{Cursors, RingBuffer};
pub use wait::WaitCondition;
