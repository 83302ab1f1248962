// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fakes for exercising the adapter without a gRPC runtime

use crate::{
    call::{CallEvents, ClientCall, InputMessage, Metadata, Status},
    marshal,
    pending::PendingWrite,
};
use parking_lot::Mutex;
use std::{
    io::{self, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// How the fake transport reacts to `send_message`
#[derive(Clone, Copy, Debug)]
pub enum SendMode {
    /// Marshal the message to completion on the calling stack
    Drain,
    /// Marshal only the given number of bytes, then settle the write
    Partial(usize),
    /// Capture the pending write and leave it incomplete
    Capture,
    /// Refuse the message with an I/O error
    Refuse,
}

/// Returns a fake call for the adapter and a handle for the test to drive
/// the listener side
pub fn fake_call(mode: SendMode) -> (FakeCall, FakeHandle) {
    let inner = Arc::new(Inner {
        mode,
        events: Mutex::new(None),
        metadata: Mutex::new(None),
        sent: Mutex::new(Vec::new()),
        captured: Mutex::new(Vec::new()),
        cancelled: AtomicBool::new(false),
        unbounded: AtomicBool::new(false),
    });
    (
        FakeCall {
            inner: inner.clone(),
        },
        FakeHandle { inner },
    )
}

struct Inner {
    mode: SendMode,
    events: Mutex<Option<Arc<dyn CallEvents>>>,
    metadata: Mutex<Option<Metadata>>,
    sent: Mutex<Vec<Vec<u8>>>,
    captured: Mutex<Vec<Arc<PendingWrite>>>,
    cancelled: AtomicBool,
    unbounded: AtomicBool,
}

pub struct FakeCall {
    inner: Arc<Inner>,
}

impl ClientCall for FakeCall {
    fn start(&mut self, events: Arc<dyn CallEvents>, metadata: &Metadata) -> io::Result<()> {
        *self.inner.events.lock() = Some(events);
        *self.inner.metadata.lock() = Some(metadata.clone());
        Ok(())
    }

    fn request_unbounded(&mut self) {
        self.inner.unbounded.store(true, Ordering::Release);
    }

    fn send_message(&mut self, message: Arc<PendingWrite>) -> io::Result<()> {
        match self.inner.mode {
            SendMode::Drain => {
                let mut reader = marshal::message_reader(message).map_err(io::Error::from)?;
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                reader.finish();
                self.inner.sent.lock().push(bytes);
                Ok(())
            }
            SendMode::Partial(len) => {
                let mut reader = marshal::message_reader(message).map_err(io::Error::from)?;
                let mut bytes = vec![0u8; len];
                reader.read(&mut bytes)?;
                reader.finish();
                Ok(())
            }
            SendMode::Capture => {
                self.inner.captured.lock().push(message);
                Ok(())
            }
            SendMode::Refuse => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "transport refused the message",
            )),
        }
    }

    fn cancel(&mut self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }
}

/// The test's view of the fake transport
pub struct FakeHandle {
    inner: Arc<Inner>,
}

impl FakeHandle {
    fn events(&self) -> Arc<dyn CallEvents> {
        self.inner
            .events
            .lock()
            .clone()
            .expect("call was not started")
    }

    /// Delivers one inbound message on behalf of the runtime thread
    pub fn deliver_message(&self, bytes: &[u8]) {
        self.events().on_message(Box::new(BytesMessage::new(bytes)));
    }

    /// Delivers a message whose reads fail
    pub fn deliver_poisoned_message(&self) {
        self.events().on_message(Box::new(PoisonedMessage));
    }

    /// Ends the call on behalf of the runtime thread
    pub fn close_with(&self, status: Status) {
        self.events().on_close(status, Metadata::new());
    }

    /// The fully-marshalled outbound messages
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.inner.sent.lock().clone()
    }

    pub fn captured_writes(&self) -> usize {
        self.inner.captured.lock().len()
    }

    pub fn was_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn requested_unbounded(&self) -> bool {
        self.inner.unbounded.load(Ordering::Acquire)
    }

    pub fn metadata(&self) -> Metadata {
        self.inner
            .metadata
            .lock()
            .clone()
            .expect("call was not started")
    }
}

/// An in-memory inbound message
pub struct BytesMessage {
    bytes: Vec<u8>,
    position: usize,
}

impl BytesMessage {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            position: 0,
        }
    }
}

impl InputMessage for BytesMessage {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let len = (self.bytes.len() - self.position).min(dst.len());
        dst[..len].copy_from_slice(&self.bytes[self.position..self.position + len]);
        self.position += len;
        Ok(len)
    }
}

/// A message whose reads always fail
pub struct PoisonedMessage;

impl InputMessage for PoisonedMessage {
    fn read(&mut self, _dst: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame could not be decoded",
        ))
    }
}
