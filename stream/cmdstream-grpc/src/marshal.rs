// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Streams a pending write's buffers out to the transport

use crate::pending::PendingWrite;
use cmdstream_core::{
    buffer::Message,
    error::{Kind, Result},
};
use std::{io, sync::Arc};

/// Detaches the message from `pending` and returns a reader over its bytes.
///
/// Surfaces the failure when the write already completed exceptionally.
pub fn message_reader(pending: Arc<PendingWrite>) -> Result<MessageReader> {
    let message = pending.detach()?;
    Ok(MessageReader {
        message,
        index: 0,
        pending,
        finished: false,
    })
}

/// Reads the detached buffers in order. Closing the reader settles the
/// pending write: fully consumed completes it, anything short fails it.
pub struct MessageReader {
    message: Message,
    index: usize,
    pending: Arc<PendingWrite>,
    finished: bool,
}

impl MessageReader {
    /// Bytes not yet handed to the transport
    pub fn remaining(&self) -> usize {
        self.message[self.index..]
            .iter()
            .map(|buffer| buffer.remaining())
            .sum()
    }

    /// Settles the pending write and releases the buffers. Also run by
    /// `Drop`; the first call wins.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if self.remaining() == 0 {
            self.pending.complete();
        } else {
            let cause = io::Error::new(io::ErrorKind::WriteZero, "message was not fully sent");
            self.pending.fail(Kind::write(cause));
        }
        self.message.clear();
    }
}

impl io::Read for MessageReader {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < dst.len() {
            let Some(buffer) = self.message.get_mut(self.index) else {
                break;
            };
            if !buffer.has_remaining() {
                self.index += 1;
                continue;
            }
            total += buffer.read_into(&mut dst[total..]);
        }
        Ok(total)
    }
}

impl Drop for MessageReader {
    fn drop(&mut self) {
        self.finish();
    }
}
