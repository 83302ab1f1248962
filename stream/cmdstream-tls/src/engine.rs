// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The seam between the channel and a stateful TLS engine
//!
//! The engine owns the record protocol: `wrap` encrypts plaintext into its
//! record format and `unwrap` does the reverse. The channel drives the
//! engine's handshake machine and moves bytes; it never inspects records
//! itself.

use crate::{error::BoxError, set::BufferSet};
use cmdstream_core::buffer::Buffer;
use core::fmt;

/// What a wrap/unwrap call did to the byte streams
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// The output buffer has no room for the next record
    BufferOverflow,
    /// The input does not hold a complete record
    BufferUnderflow,
    /// The engine's side of the connection is closed
    Closed,
}

/// What the engine needs next to make handshake progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeStatus {
    NotHandshaking,
    Finished,
    NeedWrap,
    NeedUnwrap,
    /// DTLS-only stage; surfaced as a protocol error by the channel
    NeedUnwrapAgain,
    NeedTask,
}

#[derive(Clone, Copy, Debug)]
pub struct EngineResult {
    pub status: Status,
    pub handshake: HandshakeStatus,
    pub consumed: usize,
    pub produced: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
    Dtls10,
    Dtls12,
}

impl Protocol {
    #[inline]
    pub fn is_dtls(self) -> bool {
        matches!(self, Protocol::Dtls10 | Protocol::Dtls12)
    }

    /// Renegotiation was removed from the protocol in TLS 1.3
    #[inline]
    pub fn supports_renegotiation(self) -> bool {
        matches!(self, Protocol::Tls10 | Protocol::Tls11 | Protocol::Tls12)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Protocol::Tls10 => "TLSv1",
            Protocol::Tls11 => "TLSv1.1",
            Protocol::Tls12 => "TLSv1.2",
            Protocol::Tls13 => "TLSv1.3",
            Protocol::Dtls10 => "DTLSv1",
            Protocol::Dtls12 => "DTLSv1.2",
        };
        name.fmt(f)
    }
}

/// Negotiated session parameters, for inspection after the handshake
#[derive(Clone, Debug)]
pub struct Session {
    pub protocol: Protocol,
    pub cipher_suite: &'static str,
    pub peer_host: Option<String>,
}

/// A computation the engine delegated to the caller (certificate
/// verification, key generation)
pub struct Task(Box<dyn FnOnce() + Send + Sync>);

impl Task {
    #[inline]
    pub fn new(run: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Box::new(run))
    }

    #[inline]
    pub fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Task").finish()
    }
}

pub trait Engine: Send {
    /// Encrypts bytes from `src` into `dst`.
    ///
    /// A `BufferOverflow` outcome MUST have consumed zero bytes.
    fn wrap(&mut self, src: &mut BufferSet<'_>, dst: &mut Buffer)
        -> Result<EngineResult, BoxError>;

    /// Decrypts records from `src` into `dst`
    fn unwrap(
        &mut self,
        src: &mut Buffer,
        dst: &mut BufferSet<'_>,
    ) -> Result<EngineResult, BoxError>;

    fn begin_handshake(&mut self) -> Result<(), BoxError>;

    /// Queues the closing handshake; the next wrap produces close_notify
    fn close_outbound(&mut self);

    fn handshake_status(&self) -> HandshakeStatus;

    /// Takes the next delegated task, if any
    fn delegated_task(&mut self) -> Option<Task>;

    fn session(&self) -> Session;
}
