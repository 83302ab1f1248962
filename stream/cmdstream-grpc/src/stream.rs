// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The gRPC stream adapter
//!
//! Close arbitration: the local owner and the transport listener may both
//! drive close. A compare-and-set on a single flag picks the winner; the
//! close tail is self-idempotent so every operation can re-run it after
//! acting, guaranteeing its pending operation is visible to the close path.

use crate::{
    call::{CallEvents, CallOptions, ClientCall, InputMessage, Metadata, Status},
    pending::{PendingRead, PendingWrite},
    state::{ReadState, WriteState},
};
use cmdstream_core::{
    buffer::{Buffer, Message, Pool},
    deadline::Deadline,
    ensure,
    error::{Kind, Result},
    stream::{Address, Stream},
};
use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

#[cfg(test)]
mod tests;

pub struct GrpcStream<C: ClientCall> {
    call: Mutex<C>,
    shared: Arc<Shared>,
    options: CallOptions,
    address: Address,
    /// Zero means no read deadline
    read_timeout: Duration,
    pool: Pool,
}

impl<C: ClientCall> GrpcStream<C> {
    pub fn new(
        call: C,
        options: CallOptions,
        address: Address,
        read_timeout: Duration,
        pool: Pool,
    ) -> Self {
        Self {
            call: Mutex::new(call),
            shared: Arc::new(Shared::new()),
            options,
            address,
            read_timeout,
            pool,
        }
    }

    fn read_deadline(&self, additional: Duration) -> Deadline {
        if self.read_timeout.is_zero() {
            Deadline::infinite()
        } else {
            Deadline::after(self.read_timeout + additional)
        }
    }
}

impl<C: ClientCall> Stream for GrpcStream<C> {
    fn buffer(&self, size: usize) -> Buffer {
        self.pool.get(size)
    }

    fn open(&mut self) -> Result<()> {
        ensure!(!self.shared.is_closed(), Err(Kind::Closed.err()));

        let metadata = self.options.metadata();
        let events: Arc<dyn CallEvents> = self.shared.clone();

        let mut call = self.call.lock();
        call.start(events, &metadata).map_err(Kind::write)?;
        call.request_unbounded();
        trace!(method = self.options.method.full_name(), "call started");
        Ok(())
    }

    fn write(&mut self, message: Message) -> Result<()> {
        let pending = PendingWrite::new(message);

        if self.shared.write.lock().begin(&pending) {
            if let Err(error) = self.call.lock().send_message(pending.clone()) {
                pending.fail(Kind::write(error));
            }
        } else {
            pending.fail(Kind::Closed.err());
        }

        // the listener may have closed the stream while we were publishing;
        // re-running the close tail makes our pending write visible to it
        if self.shared.is_closed() {
            self.shared.close_states(None);
        }

        pending.block()
    }

    fn read_with_timeout(&mut self, len: usize, additional: Duration) -> Result<Buffer> {
        let deadline = self.read_deadline(additional);
        let dest = self.pool.exact(len);
        let pending = PendingRead::new(dest, deadline);

        if self.shared.read.lock().begin(&pending) {
            self.shared.try_complete_read(&pending);
        } else {
            pending.fail(Kind::Closed.err());
        }

        if self.shared.is_closed() {
            self.shared.close_states(None);
        }

        match pending.block() {
            Some(result) => result,
            None => {
                // settle the pending read so its destination is released and
                // the next read may start; a delivery that raced the
                // deadline wins
                if pending.fail(Kind::ReadTimeout.err()) {
                    Err(Kind::ReadTimeout.err())
                } else {
                    match pending.block() {
                        Some(result) => result,
                        None => unreachable!("completed read lost its value"),
                    }
                }
            }
        }
    }

    fn supports_additional_timeout(&self) -> bool {
        true
    }

    fn address(&self) -> &Address {
        &self.address
    }

    fn close(&self) {
        if self.shared.begin_close() {
            trace!("stream closed locally");
            self.shared.close_states(None);
            // only the owner may touch the call; the listener path never
            // cancels
            self.call.lock().cancel();
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

pub(crate) struct Shared {
    closed: AtomicBool,
    write: Mutex<WriteState>,
    read: Mutex<ReadState>,
}

impl Shared {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            write: Mutex::new(WriteState::new()),
            read: Mutex::new(ReadState::new()),
        }
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wins the close race at most once
    #[inline]
    fn begin_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The close tail. Self-idempotent: losers of the close race re-run it
    /// to guarantee their pending operations are observed.
    fn close_states(&self, status: Option<&Status>) {
        if let Some(pending) = self.write.lock().close() {
            let error = match status {
                Some(status) => Kind::write(status.clone()),
                None => Kind::Closed.err(),
            };
            pending.fail(error);
        }

        let (pending, messages) = self.read.lock().close();
        if let Some(pending) = pending {
            let error = match status {
                Some(status) => Kind::read(status.clone()),
                None => Kind::Closed.err(),
            };
            pending.fail(error);
        }
        // dropping the queue closes any undelivered input messages
        drop(messages);
    }

    /// Drains queued input messages into the pending read's destination.
    ///
    /// Completion attempts are serialised; the destination is detached for
    /// the duration so the close path cannot release it mid-fill.
    fn try_complete_read(&self, pending: &PendingRead) {
        let _serialize = pending.serialize();
        ensure!(!pending.is_complete());
        let Some(mut dest) = pending.detach_dest() else {
            return;
        };

        loop {
            if !dest.has_remaining() {
                dest.flip();
                pending.complete(dest);
                return;
            }

            let Some(mut message) = self.read.lock().pop_message() else {
                pending.reattach_dest(dest);
                return;
            };

            let mut exhausted = false;
            while dest.has_remaining() {
                match message.read(dest.as_mut_slice()) {
                    Ok(0) => {
                        exhausted = true;
                        break;
                    }
                    Ok(len) => dest.advance(len),
                    Err(error) => {
                        drop(dest);
                        pending.fail(Kind::read(error));
                        return;
                    }
                }
            }

            if !exhausted {
                // whatever is left feeds the next read
                self.read.lock().unpop_message(message);
            }
        }
    }
}

impl CallEvents for Shared {
    fn on_message(&self, message: Box<dyn InputMessage>) {
        let pending = {
            let mut read = self.read.lock();
            if !read.push_message(message) {
                // closed; the message drops here, releasing its buffers
                return;
            }
            read.pending()
        };

        if let Some(pending) = pending {
            self.try_complete_read(&pending);
        }
    }

    fn on_close(&self, status: Status, _trailers: Metadata) {
        let failure = if status.is_clean_close() {
            None
        } else {
            Some(status)
        };

        if self.begin_close() {
            debug!(status = ?failure, "call closed by transport");
            self.close_states(failure.as_ref());
        }
    }
}
