// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, panic::Location};
use std::sync::Arc;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// A failure cause captured from a lower layer (gRPC status, socket error)
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct Error {
    kind: Kind,
    location: &'static Location<'static>,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("crate", &"cmdstream-core")
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
        write!(f, "[cmdstream::{file}:{line}]: {kind}")
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

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, Kind::ReadTimeout)
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

#[derive(Clone, Debug, thiserror::Error)]
pub enum Kind {
    #[error("the stream write failed")]
    Write {
        #[source]
        source: Option<Cause>,
    },
    #[error("the stream read failed")]
    Read {
        #[source]
        source: Option<Cause>,
    },
    #[error("the read deadline elapsed")]
    ReadTimeout,
    #[error("the stream is closed")]
    Closed,
    #[error("the blocking wait was interrupted")]
    Interrupted,
}

impl Kind {
    #[inline]
    #[track_caller]
    pub fn err(self) -> Error {
        Error::new(self)
    }

    /// Write failure carrying the lower-layer cause
    #[inline]
    #[track_caller]
    pub fn write(source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Kind::Write {
            source: Some(Arc::new(source)),
        }
        .err()
    }

    /// Read failure carrying the lower-layer cause
    #[inline]
    #[track_caller]
    pub fn read(source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Kind::Read {
            source: Some(Arc::new(source)),
        }
        .err()
    }
}

impl From<Error> for std::io::Error {
    #[inline]
    fn from(error: Error) -> Self {
        Self::new((&error.kind).into(), error)
    }
}

impl From<&Kind> for std::io::ErrorKind {
    #[inline]
    fn from(kind: &Kind) -> Self {
        use std::io::ErrorKind;
        match kind {
            Kind::Write { .. } => ErrorKind::BrokenPipe,
            Kind::Read { .. } => ErrorKind::Other,
            Kind::ReadTimeout => ErrorKind::TimedOut,
            Kind::Closed => ErrorKind::NotConnected,
            Kind::Interrupted => ErrorKind::Interrupted,
        }
    }
}
