// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pooled byte buffers with an explicit read/write cursor
//!
//! A [`Buffer`] is a handle to a contiguous backing region with a cursor
//! window (`position..limit`). Holding the value is the single reference to
//! the backing; moving the value transfers it and dropping it returns the
//! backing to the [`Pool`] it came from.

use zeroize::Zeroize;

mod pool;

#[cfg(test)]
mod tests;

pub use pool::Pool;

/// A list of buffers forming one logical wire-protocol message
pub type Message = Vec<Buffer>;

pub struct Buffer {
    data: Box<[u8]>,
    position: usize,
    limit: usize,
    recycle: Option<pool::Recycle>,
}

impl core::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Buffer {
    /// A buffer without backing; useful as a wrap input that must not
    /// contribute bytes
    #[inline]
    pub fn empty() -> Self {
        Self {
            data: Box::default(),
            position: 0,
            limit: 0,
            recycle: None,
        }
    }

    /// An unpooled buffer in write mode
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            position: 0,
            limit: capacity,
            recycle: None,
        }
    }

    /// An unpooled buffer holding a copy of `bytes`, ready for reading
    #[inline]
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec().into_boxed_slice(),
            position: 0,
            limit: bytes.len(),
            recycle: None,
        }
    }

    pub(crate) fn pooled(data: Box<[u8]>, limit: usize, recycle: pool::Recycle) -> Self {
        debug_assert!(limit <= data.len());
        Self {
            data,
            position: 0,
            limit,
            recycle: Some(recycle),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// # Panics
    ///
    /// `position` MUST be less than or equal to [`Self::limit`]
    #[inline]
    pub fn set_position(&mut self, position: usize) {
        assert!(position <= self.limit);
        self.position = position;
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// # Panics
    ///
    /// `limit` MUST be less than or equal to [`Self::capacity`]
    #[inline]
    pub fn set_limit(&mut self, limit: usize) {
        assert!(limit <= self.capacity());
        self.limit = limit;
        self.position = self.position.min(limit);
    }

    /// Bytes left in the cursor window
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Swaps the buffer from write mode to read mode
    #[inline]
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Resets the window to the whole backing
    #[inline]
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
    }

    /// Moves any unconsumed bytes to the front and reopens the rest of the
    /// backing for writing
    #[inline]
    pub fn compact(&mut self) {
        let len = self.remaining();
        self.data.copy_within(self.position..self.limit, 0);
        self.position = len;
        self.limit = self.capacity();
    }

    /// # Panics
    ///
    /// `len` MUST be less than or equal to [`Self::remaining`]
    #[inline]
    pub fn advance(&mut self, len: usize) {
        assert!(len <= self.remaining());
        self.position += len;
    }

    /// The current cursor window
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.position..self.limit]
    }

    /// Copies from `src` into the window, advancing the cursor
    #[inline]
    pub fn write_from(&mut self, src: &[u8]) -> usize {
        let len = self.remaining().min(src.len());
        self.data[self.position..self.position + len].copy_from_slice(&src[..len]);
        self.position += len;
        len
    }

    /// Copies from the window into `dst`, advancing the cursor
    #[inline]
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let len = self.remaining().min(dst.len());
        dst[..len].copy_from_slice(&self.data[self.position..self.position + len]);
        self.position += len;
        len
    }

    /// Moves bytes from this window into the destination window,
    /// advancing both cursors
    #[inline]
    pub fn transfer_to(&mut self, dst: &mut Buffer) -> usize {
        let len = self.remaining().min(dst.remaining());
        let src = &self.data[self.position..self.position + len];
        dst.data[dst.position..dst.position + len].copy_from_slice(src);
        self.position += len;
        dst.position += len;
        len
    }

    /// Securely wipes the entire backing
    #[inline]
    pub fn zero(&mut self) {
        self.data.zeroize();
    }

    /// Securely wipes everything past the current position
    #[inline]
    pub fn zero_remaining(&mut self) {
        let position = self.position;
        self.data[position..].zeroize();
    }
}

impl Drop for Buffer {
    #[inline]
    fn drop(&mut self) {
        if let Some(recycle) = self.recycle.take() {
            recycle.put_back(core::mem::take(&mut self.data));
        }
    }
}
