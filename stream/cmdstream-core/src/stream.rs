// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    buffer::{Buffer, Message},
    error::Result,
};
use core::{fmt, time::Duration};

/// The remote endpoint a stream talks to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    #[inline]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A full-duplex, message-framed byte stream to a server.
///
/// Implementations enforce at most one outstanding read and one outstanding
/// write per stream; violating that is a caller bug and panics rather than
/// erroring.
pub trait Stream: Send {
    /// Allocates a fresh buffer of at least `size` bytes
    fn buffer(&self, size: usize) -> Buffer;

    /// Establishes the stream; fails if it was already closed
    fn open(&mut self) -> Result<()>;

    /// Writes exactly one wire-protocol message, blocking until the
    /// transport has consumed it
    fn write(&mut self, message: Message) -> Result<()>;

    /// Reads exactly `len` bytes into a fresh buffer whose limit equals
    /// `len`
    fn read(&mut self, len: usize) -> Result<Buffer> {
        self.read_with_timeout(len, Duration::ZERO)
    }

    /// Like [`Self::read`] with extra time granted on top of the stream's
    /// configured read timeout
    fn read_with_timeout(&mut self, len: usize, additional: Duration) -> Result<Buffer>;

    /// Whether [`Self::read_with_timeout`] honors the additional timeout
    fn supports_additional_timeout(&self) -> bool {
        false
    }

    fn address(&self) -> &Address;

    /// Closes the stream, releasing any blocked reader or writer.
    /// Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
