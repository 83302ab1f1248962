// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The seam between the adapter and the runtime's gRPC client
//!
//! A [`ClientCall`] is one bidirectional streaming call. The adapter owns
//! the call and is the only party allowed to drive it; the runtime calls
//! back through [`CallEvents`] from its own thread.

use crate::pending::PendingWrite;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use core::fmt;
use std::{io, sync::Arc};

pub const SERVICE: &str = "mongodb.CommandService";

/// Fully-qualified method names for the two command streams
pub const UNAUTHENTICATED_METHOD: &str = "mongodb.CommandService/UnauthenticatedCommandStream";
pub const AUTHENTICATED_METHOD: &str = "mongodb.CommandService/AuthenticatedCommandStream";

/// Metadata keys the server requires on every call
pub const CLIENT_ID_KEY: &str = "mongodb-clientId";
pub const CLIENT_METADATA_KEY: &str = "mongodb-client";
pub const WIRE_VERSION_KEY: &str = "mongodb-wireVersion";

/// Largest message accepted in either direction
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

/// The wire version advertised on open.
///
/// TODO(wire-version): hard-coded until the server publishes a negotiation
/// policy for the gRPC endpoint.
pub const WIRE_VERSION: &str = "18";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Unauthenticated,
    Authenticated,
}

impl Method {
    #[inline]
    pub fn full_name(self) -> &'static str {
        match self {
            Method::Unauthenticated => UNAUTHENTICATED_METHOD,
            Method::Authenticated => AUTHENTICATED_METHOD,
        }
    }
}

/// Ordered ASCII key/value call metadata
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        debug_assert!(key.is_ascii() && value.is_ascii());
        // the gRPC layer owns the content type
        debug_assert!(!key.eq_ignore_ascii_case("content-type"));
        self.entries.push((key, value));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(entry, _)| entry.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-call configuration supplied by the connection layer
#[derive(Clone, Debug)]
pub struct CallOptions {
    pub method: Method,
    /// Process-unique client identifier, in UUID textual form
    pub client_id: String,
    /// Encoded BSON client-metadata document, sent base64
    pub client_metadata: Option<Vec<u8>>,
    pub wire_version: &'static str,
    /// Front-proxy pass-through entries (ephemeral; may be removed)
    pub pass_through: Vec<(String, String)>,
}

impl CallOptions {
    #[inline]
    pub fn new(method: Method, client_id: impl Into<String>) -> Self {
        Self {
            method,
            client_id: client_id.into(),
            client_metadata: None,
            wire_version: WIRE_VERSION,
            pass_through: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_client_metadata(mut self, document: Vec<u8>) -> Self {
        self.client_metadata = Some(document);
        self
    }

    #[must_use]
    pub fn with_pass_through(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pass_through.push((key.into(), value.into()));
        self
    }

    /// Builds the metadata the server requires on open
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.put(CLIENT_ID_KEY, self.client_id.clone());
        if let Some(document) = &self.client_metadata {
            metadata.put(CLIENT_METADATA_KEY, BASE64.encode(document));
        }
        metadata.put(WIRE_VERSION_KEY, self.wire_version);
        for (key, value) in &self.pass_through {
            metadata.put(key.clone(), value.clone());
        }
        metadata
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    DeadlineExceeded,
    Internal,
    Unavailable,
    Unauthenticated,
}

/// The terminal status of a call
#[derive(Clone, Debug)]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    #[inline]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[inline]
    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    #[inline]
    pub fn code(&self) -> Code {
        self.code
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// An OK or CANCELLED status ends the call without fault
    #[inline]
    pub fn is_clean_close(&self) -> bool {
        matches!(self.code, Code::Ok | Code::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{:?}", self.code)
        } else {
            write!(f, "{:?}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for Status {}

/// One inbound gRPC message, drained incrementally.
///
/// Ownership of the box is the hand-off: once the listener passes it to the
/// adapter no other party may touch the underlying transport buffers. They
/// are released when the box drops.
pub trait InputMessage: Send {
    /// Copies up to `dst.len()` bytes out of the message; `Ok(0)` means the
    /// message is exhausted
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize>;
}

/// Callbacks delivered from the runtime's transport thread, concurrent with
/// any caller-thread operation
pub trait CallEvents: Send + Sync {
    fn on_headers(&self, _metadata: &Metadata) {}

    fn on_message(&self, message: Box<dyn InputMessage>);

    fn on_ready(&self) {}

    fn on_close(&self, status: Status, trailers: Metadata);
}

/// A single bidirectional gRPC call.
///
/// None of these methods are thread-safe; the adapter serialises them via
/// its single-outstanding-operation invariants.
pub trait ClientCall: Send {
    /// Starts the call with the given metadata and registers the listener
    fn start(&mut self, events: Arc<dyn CallEvents>, metadata: &Metadata) -> io::Result<()>;

    /// Grants unlimited inbound message credit; flow control happens at a
    /// higher layer
    fn request_unbounded(&mut self);

    /// Hands one outbound message to the transport. The transport may
    /// marshal it synchronously on this stack or later from another
    /// thread; the pending write tracks which happened.
    fn send_message(&mut self, message: Arc<PendingWrite>) -> io::Result<()>;

    /// Tears the call down; the listener still observes a terminal
    /// `on_close`
    fn cancel(&mut self);
}
