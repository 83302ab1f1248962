// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::engine::Task;
use core::{fmt, panic::Location};
use std::io;

pub type Result<T, E = Error> = core::result::Result<T, E>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub struct Error {
    kind: Kind,
    location: &'static Location<'static>,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("crate", &"cmdstream-tls")
            .field("file", &self.file())
            .field("line", &self.location.line())
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Self { kind, location } = self;
        let file = self.file();
        let line = location.line();
        write!(f, "[cmdstream-tls::{file}:{line}]: {kind}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl Error {
    #[track_caller]
    #[inline]
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            location: Location::caller(),
        }
    }

    #[inline]
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, Kind::Closed)
    }

    /// Whether this is a non-blocking control-flow signal rather than a
    /// failure; the channel state is untouched and the operation can be
    /// retried once the condition is arranged
    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(
            self.kind,
            Kind::NeedsRead | Kind::NeedsWrite | Kind::NeedsTask(_)
        )
    }

    /// Takes the delegated task out of a [`Kind::NeedsTask`] signal
    #[inline]
    pub fn into_task(self) -> Option<Task> {
        match self.kind {
            Kind::NeedsTask(task) => Some(task),
            _ => None,
        }
    }

    #[inline]
    fn file(&self) -> &'static str {
        self.location
            .file()
            .trim_start_matches(concat!(env!("CARGO_MANIFEST_DIR"), "/src/"))
    }
}

impl From<Kind> for Error {
    #[track_caller]
    #[inline]
    fn from(kind: Kind) -> Self {
        Self::new(kind)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Kind {
    #[error("the channel is closed")]
    Closed,
    #[error("a read from the underlying channel is needed before retrying")]
    NeedsRead,
    #[error("a write to the underlying channel is needed before retrying")]
    NeedsWrite,
    #[error("a delegated engine task must run before retrying")]
    NeedsTask(Task),
    #[error("the session callback failed")]
    Callback(#[source] BoxError),
    #[error("the TLS engine failed")]
    Engine(#[source] BoxError),
    #[error("tls protocol violation: {0}")]
    Protocol(&'static str),
    #[error("the {0} buffer reached its maximum size")]
    BufferLimit(&'static str),
    #[error("channel i/o failed")]
    Io(#[source] io::Error),
}

impl Kind {
    #[inline]
    #[track_caller]
    pub fn err(self) -> Error {
        Error::new(self)
    }
}

impl From<Error> for io::Error {
    #[inline]
    fn from(error: Error) -> Self {
        let kind = match error.kind() {
            Kind::Closed => io::ErrorKind::NotConnected,
            Kind::NeedsRead | Kind::NeedsWrite | Kind::NeedsTask(_) => io::ErrorKind::WouldBlock,
            Kind::Callback(_) | Kind::Engine(_) => io::ErrorKind::InvalidData,
            Kind::Protocol(_) => io::ErrorKind::InvalidData,
            Kind::BufferLimit(_) => io::ErrorKind::OutOfMemory,
            Kind::Io(source) => source.kind(),
        };
        Self::new(kind, error)
    }
}
