// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::Buffer;
use crossbeam_channel as mpmc;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tracing::trace;

/// Recycles buffer backings through a bounded channel.
///
/// The pool tracks the number of outstanding buffers so leak-sensitive
/// callers can assert that every allocation was returned.
pub struct Pool {
    release: mpmc::Sender<Box<[u8]>>,
    acquire: mpmc::Receiver<Box<[u8]>>,
    outstanding: Arc<AtomicUsize>,
}

impl Clone for Pool {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            release: self.release.clone(),
            acquire: self.acquire.clone(),
            outstanding: self.outstanding.clone(),
        }
    }
}

impl Default for Pool {
    #[inline]
    fn default() -> Self {
        Self::new(64)
    }
}

impl core::fmt::Debug for Pool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl Pool {
    #[inline]
    pub fn new(max_entries: usize) -> Self {
        let (release, acquire) = mpmc::bounded(max_entries);
        Self {
            release,
            acquire,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns a write-mode buffer with `limit == size` and a backing of at
    /// least `size` bytes
    #[inline]
    pub fn get(&self, size: usize) -> Buffer {
        let data = match self.acquire.try_recv() {
            Ok(data) if data.len() >= size => {
                trace!("hit");
                data
            }
            // a too-small backing isn't worth holding on to
            _ => {
                trace!("miss");
                vec![0u8; size.next_power_of_two()].into_boxed_slice()
            }
        };
        self.checkout(data, size)
    }

    /// Returns a buffer whose backing is exactly `size` bytes
    /// (`capacity == limit == size`)
    #[inline]
    pub fn exact(&self, size: usize) -> Buffer {
        let data = match self.acquire.try_recv() {
            Ok(data) if data.len() == size => data,
            _ => vec![0u8; size].into_boxed_slice(),
        };
        self.checkout(data, size)
    }

    /// The number of buffers currently checked out of the pool
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    #[inline]
    fn checkout(&self, data: Box<[u8]>, limit: usize) -> Buffer {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let recycle = Recycle {
            release: self.release.clone(),
            outstanding: self.outstanding.clone(),
        };
        Buffer::pooled(data, limit, recycle)
    }
}

pub(crate) struct Recycle {
    release: mpmc::Sender<Box<[u8]>>,
    outstanding: Arc<AtomicUsize>,
}

impl Recycle {
    #[inline]
    pub(crate) fn put_back(self, data: Box<[u8]>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        let _ = self.release.try_send(data);
    }
}
