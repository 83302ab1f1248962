// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! One-shot pending operations
//!
//! Each `read`/`write` call produces one pending operation. The caller
//! blocks on it; the transport thread, the marshaller or the close path
//! completes it, exactly once. Buffers owned by a pending operation sit in
//! an atomic slot so the detach/re-attach protocol can exclude concurrent
//! releases.

use cmdstream_core::{
    buffer::{Buffer, Message},
    deadline::Deadline,
    ensure,
    error::{Error, Result},
    sync::Completion,
};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// An outbound message waiting for the transport to consume it
pub struct PendingWrite {
    /// Non-empty exactly while the message is still logically owned here:
    /// not yet detached for marshalling and not yet completed
    message: Mutex<Option<Message>>,
    done: Completion<()>,
}

impl PendingWrite {
    pub fn new(message: Message) -> Arc<Self> {
        Arc::new(Self {
            message: Mutex::new(Some(message)),
            done: Completion::new(),
        })
    }

    /// Takes the message out for marshalling.
    ///
    /// Surfaces the failure when the write already completed exceptionally.
    ///
    /// # Panics
    ///
    /// Detaching twice from a live pending write is a caller bug.
    pub fn detach(&self) -> Result<Message> {
        match self.message.lock().take() {
            Some(message) => Ok(message),
            None => Err(self.done.error().expect("message detached twice")),
        }
    }

    /// Completes normally; the transport consumed the whole message
    pub fn complete(&self) -> bool {
        let released = self.message.lock().take();
        drop(released);
        self.done.complete(Ok(()))
    }

    /// Completes exceptionally, releasing the message if still attached
    pub fn fail(&self, error: Error) -> bool {
        let released = self.message.lock().take();
        drop(released);
        self.done.complete(Err(error))
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.done.is_complete()
    }

    /// Blocks until the transport consumed the message or the write failed
    pub fn block(&self) -> Result<()> {
        match self.done.block(Deadline::infinite()) {
            Some(result) => result,
            // an infinite deadline cannot elapse
            None => unreachable!(),
        }
    }
}

/// An exact-size read waiting for inbound frames
pub struct PendingRead {
    /// Detach/re-attach slot for the destination buffer; only ever held
    /// momentarily
    dest: Mutex<Option<Buffer>>,
    /// Serialises completion attempts so a single thread fills the
    /// destination at a time
    filling: Mutex<()>,
    requested: usize,
    deadline: Deadline,
    done: Completion<Buffer>,
}

impl PendingRead {
    pub fn new(dest: Buffer, deadline: Deadline) -> Arc<Self> {
        Arc::new(Self {
            requested: dest.remaining(),
            dest: Mutex::new(Some(dest)),
            filling: Mutex::new(()),
            deadline,
            done: Completion::new(),
        })
    }

    #[inline]
    pub fn requested(&self) -> usize {
        self.requested
    }

    #[inline]
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.done.is_complete()
    }

    pub(crate) fn serialize(&self) -> MutexGuard<'_, ()> {
        self.filling.lock()
    }

    /// Takes the destination so no other thread can release it while it is
    /// being filled
    pub(crate) fn detach_dest(&self) -> Option<Buffer> {
        self.dest.lock().take()
    }

    /// Returns a partially-filled destination. If the read completed
    /// exceptionally in the meantime the buffer is released instead.
    pub(crate) fn reattach_dest(&self, buffer: Buffer) {
        let mut dest = self.dest.lock();
        ensure!(!self.done.is_complete());
        *dest = Some(buffer);
    }

    /// Completes normally with the filled destination
    pub fn complete(&self, buffer: Buffer) -> bool {
        debug_assert_eq!(buffer.remaining(), self.requested);
        self.done.complete(Ok(buffer))
    }

    /// Completes exceptionally, releasing the destination if still attached
    pub fn fail(&self, error: Error) -> bool {
        let failed = self.done.complete(Err(error));
        if failed {
            let released = self.dest.lock().take();
            drop(released);
        }
        failed
    }

    /// Blocks until completion or the deadline; `None` means the deadline
    /// elapsed with the read still pending
    pub fn block(&self) -> Option<Result<Buffer>> {
        self.done.block(self.deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdstream_core::{buffer::Pool, error::Kind};

    #[test]
    fn write_releases_buffers_once_on_failure() {
        let pool = Pool::new(4);
        let pending = PendingWrite::new(vec![pool.get(16)]);
        assert_eq!(pool.outstanding(), 1);

        assert!(pending.fail(Kind::Closed.err()));
        assert_eq!(pool.outstanding(), 0);

        // a late completion attempt is rejected
        assert!(!pending.complete());
        assert!(pending.block().unwrap_err().is_closed());
    }

    #[test]
    fn detach_surfaces_an_earlier_failure() {
        let pool = Pool::new(4);
        let pending = PendingWrite::new(vec![pool.get(16)]);
        pending.fail(Kind::Closed.err());

        assert!(pending.detach().unwrap_err().is_closed());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    #[should_panic = "detached twice"]
    fn double_detach_panics() {
        let pending = PendingWrite::new(vec![Buffer::of(b"x")]);
        pending.detach().unwrap();
        let _ = pending.detach();
    }

    #[test]
    fn read_failure_releases_the_destination() {
        let pool = Pool::new(4);
        let pending = PendingRead::new(pool.exact(8), Deadline::infinite());
        assert_eq!(pending.requested(), 8);
        assert_eq!(pool.outstanding(), 1);

        assert!(pending.fail(Kind::Closed.err()));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn reattach_after_failure_releases_the_detached_buffer() {
        let pool = Pool::new(4);
        let pending = PendingRead::new(pool.exact(8), Deadline::infinite());

        let dest = pending.detach_dest().unwrap();
        pending.fail(Kind::Closed.err());

        pending.reattach_dest(dest);
        assert_eq!(pool.outstanding(), 0);
    }
}
