// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Returns early with the provided value when the condition does not hold
#[macro_export]
macro_rules! ensure {
    ($cond:expr, continue) => {
        if !($cond) {
            continue;
        }
    };
    ($cond:expr, break $($tt:tt)*) => {
        if !($cond) {
            break $($tt)*;
        }
    };
    ($cond:expr, $otherwise:expr) => {
        if !($cond) {
            return $otherwise;
        }
    };
    ($cond:expr) => {
        if !($cond) {
            return;
        }
    };
}
