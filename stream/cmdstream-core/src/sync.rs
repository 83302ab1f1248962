// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Blocking one-shot completion cell
//!
//! A [`Completion`] is the meeting point between a caller blocked inside a
//! `read`/`write` and whichever thread finishes the operation (the transport
//! runtime, a marshaller, or the close path). It completes exactly once;
//! later attempts are rejected and their value dropped.

use crate::{
    deadline::Deadline,
    error::{Error, Result},
};
use parking_lot::{Condvar, Mutex};

pub struct Completion<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

enum State<T> {
    Pending,
    Ready(Result<T>),
    /// The value was claimed by a waiter; a failure is kept for observers
    Taken { error: Option<Error> },
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completion<T> {
    #[inline]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending),
            done: Condvar::new(),
        }
    }

    /// Delivers the outcome. Returns `false` (dropping `value`) when the
    /// completion already happened.
    pub fn complete(&self, value: Result<T>) -> bool {
        let mut state = self.state.lock();
        ensure!(matches!(*state, State::Pending), false);
        *state = State::Ready(value);
        drop(state);
        self.done.notify_all();
        true
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        !matches!(*self.state.lock(), State::Pending)
    }

    /// The failure this completed with, if any
    pub fn error(&self) -> Option<Error> {
        match &*self.state.lock() {
            State::Ready(Err(error)) => Some(error.clone()),
            State::Taken { error } => error.clone(),
            _ => None,
        }
    }

    /// Blocks until the completion is delivered or the deadline elapses.
    ///
    /// Returns `None` on an elapsed deadline; the completion stays pending
    /// and a late delivery is still accepted (and dropped unobserved).
    pub fn block(&self, deadline: Deadline) -> Option<Result<T>> {
        let mut state = self.state.lock();
        loop {
            if !matches!(*state, State::Pending) {
                let ready = core::mem::replace(&mut *state, State::Taken { error: None });
                let State::Ready(result) = ready else {
                    // a second waiter on a one-shot cell is a caller bug
                    unreachable!("completion already claimed");
                };
                if let Err(error) = &result {
                    *state = State::Taken {
                        error: Some(error.clone()),
                    };
                }
                return Some(result);
            }

            match deadline.instant() {
                None => self.done.wait(&mut state),
                Some(at) => {
                    if self.done.wait_until(&mut state, at).timed_out()
                        && matches!(*state, State::Pending)
                    {
                        return None;
                    }
                }
            }
        }
    }
}
