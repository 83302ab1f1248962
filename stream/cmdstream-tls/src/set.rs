// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scatter/gather view over a slice of buffers

use cmdstream_core::buffer::Buffer;

/// A contiguous range of buffers treated as one logical window.
///
/// Copies run in buffer order until either the source or the set is
/// exhausted; member cursors advance as bytes move.
pub struct BufferSet<'a> {
    buffers: &'a mut [Buffer],
}

impl<'a> BufferSet<'a> {
    #[inline]
    pub fn new(buffers: &'a mut [Buffer]) -> Self {
        Self { buffers }
    }

    /// A view over a single buffer
    #[inline]
    pub fn single(buffer: &'a mut Buffer) -> Self {
        Self::new(core::slice::from_mut(buffer))
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffers.iter().map(Buffer::remaining).sum()
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.buffers.iter().any(Buffer::has_remaining)
    }

    /// Scatter-copies from `src` into the set, advancing member cursors
    pub fn write_from(&mut self, src: &[u8]) -> usize {
        let mut total = 0;
        for buffer in self.buffers.iter_mut() {
            if total == src.len() {
                break;
            }
            total += buffer.write_from(&src[total..]);
        }
        total
    }

    /// Gather-copies from the set into `dst`, advancing member cursors
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let mut total = 0;
        for buffer in self.buffers.iter_mut() {
            if total == dst.len() {
                break;
            }
            total += buffer.read_into(&mut dst[total..]);
        }
        total
    }

    /// Drains the source buffer's window into the set until one side runs
    /// out
    pub fn copy_from_buffer(&mut self, src: &mut Buffer) -> usize {
        let mut total = 0;
        for buffer in self.buffers.iter_mut() {
            if !src.has_remaining() {
                break;
            }
            total += src.transfer_to(buffer);
        }
        total
    }

    /// Gathers the set's windows into the destination buffer until one
    /// side runs out
    pub fn copy_into(&mut self, dst: &mut Buffer) -> usize {
        let mut total = 0;
        for buffer in self.buffers.iter_mut() {
            if !dst.has_remaining() {
                break;
            }
            total += buffer.transfer_to(dst);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scatters_across_members_in_order() {
        let mut buffers = [Buffer::with_capacity(3), Buffer::with_capacity(5)];
        let mut set = BufferSet::new(&mut buffers);
        assert_eq!(set.remaining(), 8);

        assert_eq!(set.write_from(b"abcdefgh"), 8);
        assert!(!set.has_remaining());

        buffers[0].flip();
        buffers[1].flip();
        assert_eq!(buffers[0].as_slice(), b"abc");
        assert_eq!(buffers[1].as_slice(), b"defgh");
    }

    #[test]
    fn short_source_leaves_capacity() {
        let mut buffers = [Buffer::with_capacity(4), Buffer::with_capacity(4)];
        let mut set = BufferSet::new(&mut buffers);

        assert_eq!(set.write_from(b"xy"), 2);
        assert_eq!(set.remaining(), 6);
    }

    #[test]
    fn drains_a_single_source() {
        let mut src = Buffer::of(b"0123456789");
        let mut buffers = [Buffer::with_capacity(4)];
        let mut set = BufferSet::new(&mut buffers);

        assert_eq!(set.copy_from_buffer(&mut src), 4);
        assert_eq!(src.remaining(), 6);
    }

    #[test]
    fn gathers_into_a_single_destination() {
        let mut buffers = [Buffer::of(b"0123"), Buffer::of(b"456789")];
        let mut set = BufferSet::new(&mut buffers);
        let mut dst = Buffer::with_capacity(7);

        assert_eq!(set.copy_into(&mut dst), 7);
        assert_eq!(set.remaining(), 3);
        dst.flip();
        assert_eq!(dst.as_slice(), b"0123456");

        // the rest stays readable for the next destination
        let mut set = BufferSet::new(&mut buffers);
        let mut rest = Buffer::with_capacity(8);
        assert_eq!(set.copy_into(&mut rest), 3);
        rest.flip();
        assert_eq!(rest.as_slice(), b"789");
    }

    #[test]
    fn round_trip() {
        bolero::check!()
            .with_type::<(Vec<u8>, u8)>()
            .for_each(|(data, split)| {
                let split = *split as usize % (data.len() + 1);
                let mut buffers = [
                    Buffer::with_capacity(split),
                    Buffer::with_capacity(data.len() - split),
                ];
                let mut set = BufferSet::new(&mut buffers);
                assert_eq!(set.write_from(data), data.len());

                for buffer in buffers.iter_mut() {
                    buffer.flip();
                }

                let mut set = BufferSet::new(&mut buffers);
                let mut out = vec![0u8; data.len()];
                assert_eq!(set.read_into(&mut out), data.len());
                assert_eq!(&out, data);
            });
    }
}
