// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Synchronous TLS channel over a plain byte channel
//!
//! [`channel::TlsChannel`] drives a stateful TLS engine's handshake,
//! encrypted-read and encrypted-write state machines. The engine itself is
//! an external collaborator behind the [`engine::Engine`] seam; the channel
//! owns the buffers, the locks and the shutdown dance.

pub mod channel;
pub mod engine;
pub mod error;
pub mod holder;
pub mod set;
pub mod sni;
pub mod stream;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::TlsChannel;
