// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#[macro_use]
pub mod macros;

pub mod buffer;
pub mod deadline;
pub mod error;
pub mod stream;
pub mod sync;
