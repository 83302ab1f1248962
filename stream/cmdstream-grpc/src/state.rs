// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-stream holders enforcing at most one outstanding operation per
//! direction

use crate::{
    call::InputMessage,
    pending::{PendingRead, PendingWrite},
};
use std::{collections::VecDeque, sync::Arc};

#[derive(Default)]
pub struct WriteState {
    closed: bool,
    pending: Option<Arc<PendingWrite>>,
}

impl WriteState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the next pending write. Returns `false` when the state is
    /// already closed (the caller fails the write itself).
    ///
    /// # Panics
    ///
    /// Issuing a write while the previous one is incomplete is a caller
    /// bug.
    pub fn begin(&mut self, pending: &Arc<PendingWrite>) -> bool {
        if let Some(previous) = &self.pending {
            assert!(previous.is_complete(), "a write is already outstanding");
        }
        self.pending = Some(pending.clone());
        !self.closed
    }

    /// Marks the state closed and hands back any outstanding write for the
    /// caller to fail. Idempotent.
    pub fn close(&mut self) -> Option<Arc<PendingWrite>> {
        self.closed = true;
        self.pending.take()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[derive(Default)]
pub struct ReadState {
    closed: bool,
    pending: Option<Arc<PendingRead>>,
    messages: VecDeque<Box<dyn InputMessage>>,
}

impl ReadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the next pending read. Returns `false` when the state is
    /// already closed.
    ///
    /// # Panics
    ///
    /// Issuing a read while the previous one is incomplete is a caller bug.
    pub fn begin(&mut self, pending: &Arc<PendingRead>) -> bool {
        if let Some(previous) = &self.pending {
            assert!(previous.is_complete(), "a read is already outstanding");
        }
        self.pending = Some(pending.clone());
        !self.closed
    }

    /// Enqueues an inbound message; returns `false` (so the caller drops
    /// it) when the state is closed
    pub fn push_message(&mut self, message: Box<dyn InputMessage>) -> bool {
        if self.closed {
            return false;
        }
        self.messages.push_back(message);
        true
    }

    pub fn pop_message(&mut self) -> Option<Box<dyn InputMessage>> {
        self.messages.pop_front()
    }

    /// Returns a partially-consumed message to the head of the queue
    pub fn unpop_message(&mut self, message: Box<dyn InputMessage>) {
        self.messages.push_front(message);
    }

    #[inline]
    pub fn pending(&self) -> Option<Arc<PendingRead>> {
        self.pending.clone()
    }

    /// Marks the state closed and hands back the outstanding read plus any
    /// queued messages for the caller to fail and drain. Idempotent.
    pub fn close(&mut self) -> (Option<Arc<PendingRead>>, VecDeque<Box<dyn InputMessage>>) {
        self.closed = true;
        (self.pending.take(), core::mem::take(&mut self.messages))
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdstream_core::{buffer::Buffer, deadline::Deadline};

    #[test]
    #[should_panic = "write is already outstanding"]
    fn second_write_while_pending_panics() {
        let mut state = WriteState::new();
        let first = PendingWrite::new(vec![Buffer::of(b"a")]);
        let second = PendingWrite::new(vec![Buffer::of(b"b")]);
        state.begin(&first);
        state.begin(&second);
    }

    #[test]
    #[should_panic = "read is already outstanding"]
    fn second_read_while_pending_panics() {
        let mut state = ReadState::new();
        let first = PendingRead::new(Buffer::with_capacity(4), Deadline::infinite());
        let second = PendingRead::new(Buffer::with_capacity(4), Deadline::infinite());
        state.begin(&first);
        state.begin(&second);
    }

    #[test]
    fn begin_after_completion_is_allowed() {
        let mut state = WriteState::new();
        let first = PendingWrite::new(vec![Buffer::of(b"a")]);
        assert!(state.begin(&first));
        first.complete();

        let second = PendingWrite::new(vec![Buffer::of(b"b")]);
        assert!(state.begin(&second));
    }

    #[test]
    fn closed_state_rejects_new_messages() {
        let mut state = ReadState::new();
        let (pending, messages) = state.close();
        assert!(pending.is_none());
        assert!(messages.is_empty());
        assert!(state.is_closed());
    }
}
