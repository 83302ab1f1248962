// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Full-duplex stream adapter over a gRPC bidirectional call
//!
//! The adapter marshals wire-protocol messages into gRPC request messages
//! and reassembles gRPC response frames into the exact-size reads the
//! driver issues. The gRPC call itself is an external collaborator behind
//! the [`call::ClientCall`] seam.

pub mod call;
pub mod marshal;
pub mod pending;
pub mod state;
pub mod stream;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use stream::GrpcStream;
