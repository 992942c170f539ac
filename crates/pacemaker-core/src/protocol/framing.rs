//! Fixed-size frame reassembly
//!
//! Serial reads return whatever the driver has buffered, which rarely lines up
//! with frame boundaries. Bytes are queued in arrival order and handed out one
//! whole frame at a time; anything beyond a frame stays queued for the next.

use std::collections::VecDeque;

use super::FRAME_SIZE;

/// FIFO byte buffer that yields whole frames
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    buf: VecDeque<u8>,
    frame_size: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(FRAME_SIZE)
    }
}

impl FrameAssembler {
    /// Assembler for frames of `frame_size` bytes
    pub fn new(frame_size: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(frame_size * 2),
            frame_size,
        }
    }

    /// Size of the frames handed out
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Append bytes read from the wire
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend(data);
    }

    /// Remove and return the oldest complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() < self.frame_size {
            return None;
        }
        Some(self.buf.drain(..self.frame_size).collect())
    }

    /// Number of buffered bytes
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
