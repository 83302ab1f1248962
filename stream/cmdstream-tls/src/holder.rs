// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Lazy, growable, zeroing-on-free buffer holders
//!
//! The channel keeps its three working buffers behind holders so an idle
//! channel carries no backing memory. Holder buffers stay in write mode
//! between operations: `position` is the number of buffered bytes.

use crate::error::{Kind, Result};
use cmdstream_core::{
    buffer::{Buffer, Pool},
    ensure,
};

pub struct Holder {
    name: &'static str,
    pool: Pool,
    last_size: usize,
    max_size: usize,
    plain_data: bool,
    opportunistic_dispose: bool,
    buffer: Option<Buffer>,
}

impl core::fmt::Debug for Holder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Holder")
            .field("name", &self.name)
            .field("last_size", &self.last_size)
            .field("allocated", &self.buffer.is_some())
            .finish()
    }
}

impl Holder {
    pub fn new(
        name: &'static str,
        pool: Pool,
        initial_size: usize,
        max_size: usize,
        plain_data: bool,
        opportunistic_dispose: bool,
    ) -> Self {
        debug_assert!(initial_size <= max_size);
        Self {
            name,
            pool,
            last_size: initial_size,
            max_size,
            plain_data,
            opportunistic_dispose,
            buffer: None,
        }
    }

    /// Allocates the buffer if absent
    pub fn prepare(&mut self) -> &mut Buffer {
        let Self {
            pool, last_size, ..
        } = self;
        self.buffer.get_or_insert_with(|| pool.get(*last_size))
    }

    #[inline]
    pub fn buffer_mut(&mut self) -> Option<&mut Buffer> {
        self.buffer.as_mut()
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Bytes currently buffered
    #[inline]
    pub fn position(&self) -> usize {
        self.buffer.as_ref().map_or(0, Buffer::position)
    }

    /// Doubles the buffer, capped at the holder's maximum
    pub fn enlarge(&mut self) -> Result<()> {
        ensure!(
            self.last_size < self.max_size,
            Err(Kind::BufferLimit(self.name).err())
        );
        let target = (self.last_size * 2).min(self.max_size);
        self.resize(target);
        Ok(())
    }

    /// Grows until the buffer has at least `needed` writable bytes
    pub fn ensure_remaining(&mut self, needed: usize) -> Result<()> {
        self.prepare();
        while self
            .buffer
            .as_ref()
            .map_or(true, |buffer| buffer.remaining() < needed)
        {
            self.enlarge()?;
        }
        Ok(())
    }

    /// Replaces the backing with one of `new_size` bytes, carrying the
    /// buffered prefix over. Plaintext in the old backing is wiped before
    /// it is freed.
    pub fn resize(&mut self, new_size: usize) {
        let new_size = new_size.min(self.max_size);
        self.last_size = new_size;

        let Some(mut old) = self.buffer.take() else {
            return;
        };
        let mut new = self.pool.get(new_size);
        old.flip();
        old.transfer_to(&mut new);
        if self.plain_data {
            old.zero();
        }
        self.buffer = Some(new);
    }

    /// Wipes everything past the buffered bytes
    #[inline]
    pub fn zero_remaining(&mut self) {
        if let Some(buffer) = &mut self.buffer {
            buffer.zero_remaining();
        }
    }

    #[inline]
    pub fn zero(&mut self) {
        if let Some(buffer) = &mut self.buffer {
            buffer.zero();
        }
    }

    /// Frees the buffer when it is momentarily empty, if this holder opts
    /// into opportunistic disposal
    pub fn release(&mut self) {
        if self.opportunistic_dispose && self.position() == 0 && self.is_allocated() {
            self.dispose();
        }
    }

    /// Frees the buffer unconditionally, wiping plaintext first
    pub fn dispose(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            if self.plain_data {
                buffer.zero();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder(plain: bool, opportunistic: bool) -> (Holder, Pool) {
        let pool = Pool::new(8);
        let holder = Holder::new("test", pool.clone(), 16, 64, plain, opportunistic);
        (holder, pool)
    }

    #[test]
    fn lazy_allocation() {
        let (mut holder, pool) = holder(false, false);
        assert!(!holder.is_allocated());
        assert_eq!(pool.outstanding(), 0);

        holder.prepare();
        assert!(holder.is_allocated());
        assert_eq!(pool.outstanding(), 1);

        holder.dispose();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn enlarge_doubles_up_to_the_max() {
        let (mut holder, _pool) = holder(false, false);
        holder.prepare().write_from(b"keep me");

        holder.enlarge().unwrap();
        let buffer = holder.buffer_mut().unwrap();
        assert_eq!(buffer.limit(), 32);
        assert_eq!(buffer.position(), 7);

        holder.enlarge().unwrap();
        assert!(holder.enlarge().is_err());
    }

    #[test]
    fn resize_carries_the_buffered_prefix() {
        let (mut holder, _pool) = holder(false, false);
        holder.prepare().write_from(b"carry");

        holder.resize(48);
        let buffer = holder.buffer_mut().unwrap();
        assert_eq!(buffer.position(), 5);
        buffer.flip();
        assert_eq!(buffer.as_slice(), b"carry");
    }

    #[test]
    fn ensure_remaining_grows_past_the_request() {
        let (mut holder, _pool) = holder(false, false);
        holder.ensure_remaining(40).unwrap();
        assert!(holder.buffer_mut().unwrap().remaining() >= 40);

        assert!(holder.ensure_remaining(100).is_err());
    }

    #[test]
    fn opportunistic_release_only_when_empty() {
        let (mut holder, _pool) = holder(true, true);
        holder.prepare().write_from(b"busy");
        holder.release();
        assert!(holder.is_allocated());

        holder.buffer_mut().unwrap().set_position(0);
        holder.release();
        assert!(!holder.is_allocated());
    }

    #[test]
    fn non_opportunistic_release_keeps_the_buffer() {
        let (mut holder, _pool) = holder(false, false);
        holder.prepare();
        holder.release();
        assert!(holder.is_allocated());
    }
}
