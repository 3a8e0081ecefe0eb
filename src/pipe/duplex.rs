//! Pipe: sepasang ring buffer untuk satu koneksi CCP

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{Direction, PipeConfig};
use crate::core::RingBuffer;
use crate::error::Result;

/// Identitas slot registry. `generation` naik setiap kali slot di-release,
/// jadi id lama tidak pernah cocok dengan pipe baru di index yang sama.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId {
    pub index: usize,
    pub generation: u32,
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// Satu channel dua arah. Kedua ring dialokasikan eager dengan kapasitas sama.
pub struct Pipe {
    id: PipeId,
    /// Queue dari user ke kernel
    to_kernel: RingBuffer,
    /// Queue dari kernel ke user
    to_user: RingBuffer,
    /// Diset registry saat slot dikosongkan
    closed: AtomicBool,
}

impl Pipe {
    pub(crate) fn new(id: PipeId, config: &PipeConfig) -> Result<Self> {
        let to_kernel = RingBuffer::new(
            config.capacity,
            config.write_mode,
            config.blocking(Direction::ToKernel),
        )?;
        let to_user = RingBuffer::new(
            config.capacity,
            config.write_mode,
            config.blocking(Direction::ToUser),
        )?;

        Ok(Self {
            id,
            to_kernel,
            to_user,
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn id(&self) -> PipeId {
        self.id
    }

    /// Ring buffer untuk arah tertentu
    #[inline]
    pub fn queue(&self, direction: Direction) -> &RingBuffer {
        match direction {
            Direction::ToKernel => &self.to_kernel,
            Direction::ToUser => &self.to_user,
        }
    }

    /// `true` setelah slot pipe ini dikosongkan di registry
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Interrupt reader yang tidur di kedua arah
    pub fn interrupt(&self) {
        self.to_kernel.interrupt();
        self.to_user.interrupt();
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("id", &self.id)
            .field("to_kernel", &self.to_kernel)
            .field("to_user", &self.to_user)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteMode;

    #[test]
    fn test_directions_are_independent() {
        let cfg = PipeConfig::default().with_capacity(64);
        let pipe = Pipe::new(
            PipeId {
                index: 0,
                generation: 0,
            },
            &cfg,
        )
        .unwrap();

        pipe.queue(Direction::ToKernel).write(b"up", 2).unwrap();
        assert_eq!(pipe.queue(Direction::ToKernel).len(), 2);
        assert!(pipe.queue(Direction::ToUser).is_empty());

        assert!(!pipe.queue(Direction::ToKernel).is_blocking());
        assert!(pipe.queue(Direction::ToUser).is_blocking());
        assert_eq!(pipe.queue(Direction::ToUser).capacity(), 64);
        assert_eq!(pipe.queue(Direction::ToUser).write_mode(), WriteMode::Single);
    }

    #[test]
    fn test_pipe_id_display() {
        let id = PipeId {
            index: 3,
            generation: 7,
        };
        assert_eq!(id.to_string(), "3#7");
    }
}
