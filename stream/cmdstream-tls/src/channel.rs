// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The TLS channel state machine
//!
//! Lock order is always init → read → write → engine; functions that need
//! several locks take them in that order and nothing re-acquires. The read
//! lock owns the reader half plus the inbound buffers, the write lock owns
//! the writer half plus the outbound buffer, and the engine sits innermost
//! so both directions can drive it.

use crate::{
    engine::{Engine, EngineResult, HandshakeStatus, Session, Status},
    error::{BoxError, Error, Kind, Result},
    holder::Holder,
    set::BufferSet,
};
use cmdstream_core::{
    buffer::{Buffer, Pool},
    ensure,
};
use core::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::io;
use tracing::{debug, trace};


/// One TLS record (16 KiB) plus header and cipher overhead
pub const MAX_TLS_PACKET_SIZE: usize = 17 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// The readable half of the plain channel underneath the TLS layer.
///
/// `Ok(0)` is end-of-stream. A non-blocking source signals `WouldBlock`;
/// the channel converts that to [`Kind::NeedsRead`] with no state change.
pub trait ChannelRead: Send {
    /// Reads into the buffer's window, advancing its position
    fn read(&mut self, dst: &mut Buffer) -> io::Result<usize>;
}

/// The writable half of the plain channel underneath the TLS layer.
///
/// Writers must make progress or signal `WouldBlock`; a zero-length write
/// is treated the same as `WouldBlock`.
pub trait ChannelWrite: Send {
    /// Writes from the buffer's window, advancing its position
    fn write(&mut self, src: &mut Buffer) -> io::Result<usize>;

    fn close(&mut self) -> io::Result<()>;
}

pub type SessionReady = Box<dyn Fn(&Session) -> Result<(), BoxError> + Send + Sync>;

/// Unblocks channel halves stuck in I/O, called by `close` without holding
/// any lock (a socket shutdown, a pipe break)
pub type Breaker = Box<dyn Fn() -> io::Result<()> + Send + Sync>;

pub struct Options {
    /// Run delegated engine tasks inline instead of surfacing
    /// [`Kind::NeedsTask`]
    pub run_tasks: bool,
    /// Make `close` wait for the peer's close_notify after sending ours
    pub wait_for_close_confirmation: bool,
    pub plain_pool: Pool,
    pub cipher_pool: Pool,
    /// Invoked once the handshake completes, with the negotiated session
    pub session_ready: Option<SessionReady>,
    pub breaker: Option<Breaker>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            run_tasks: true,
            wait_for_close_confirmation: false,
            plain_pool: Pool::default(),
            cipher_pool: Pool::default(),
            session_ready: None,
            breaker: None,
        }
    }
}

struct InitState {
    handshake_started: bool,
}

struct ReadHalf<R> {
    channel: R,
    in_cipher: Holder,
    in_plain: Holder,
}

struct WriteHalf<W> {
    channel: W,
    out_cipher: Holder,
}

pub struct TlsChannel<E: Engine, R: ChannelRead, W: ChannelWrite> {
    init: Mutex<InitState>,
    read: Mutex<ReadHalf<R>>,
    write: Mutex<WriteHalf<W>>,
    engine: Mutex<E>,
    handshake_completed: AtomicBool,
    invalid: AtomicBool,
    shutdown_sent: AtomicBool,
    shutdown_received: AtomicBool,
    run_tasks: bool,
    wait_for_close_confirmation: bool,
    session_ready: Option<SessionReady>,
    breaker: Option<Breaker>,
}

/// Where an unwrap pass left things
enum Unwrapped {
    /// Plaintext went straight into the caller's destination
    ToDest(usize),
    /// Plaintext accumulated in the internal buffer
    ToInternal(usize),
    /// The handshake status changed; the dispatcher decides what is next
    Stalled,
    /// The plain channel reached end-of-stream
    Eof,
    /// The engine consumed the peer's close_notify
    Closed,
}

enum UnwrapStep {
    Produced { direct: bool, amount: usize },
    NeedsCipher,
    Stalled,
    Closed,
}

impl<E: Engine, R: ChannelRead, W: ChannelWrite> TlsChannel<E, R, W> {
    pub fn new(engine: E, reader: R, writer: W, options: Options) -> Self {
        let Options {
            run_tasks,
            wait_for_close_confirmation,
            plain_pool,
            cipher_pool,
            session_ready,
            breaker,
        } = options;

        Self {
            init: Mutex::new(InitState {
                handshake_started: false,
            }),
            read: Mutex::new(ReadHalf {
                channel: reader,
                in_cipher: Holder::new(
                    "in-cipher",
                    cipher_pool.clone(),
                    INITIAL_BUFFER_SIZE,
                    MAX_TLS_PACKET_SIZE,
                    false,
                    false,
                ),
                in_plain: Holder::new(
                    "in-plain",
                    plain_pool,
                    INITIAL_BUFFER_SIZE,
                    MAX_TLS_PACKET_SIZE,
                    true,
                    true,
                ),
            }),
            write: Mutex::new(WriteHalf {
                channel: writer,
                out_cipher: Holder::new(
                    "out-cipher",
                    cipher_pool,
                    INITIAL_BUFFER_SIZE,
                    MAX_TLS_PACKET_SIZE,
                    false,
                    true,
                ),
            }),
            engine: Mutex::new(engine),
            handshake_completed: AtomicBool::new(false),
            invalid: AtomicBool::new(false),
            shutdown_sent: AtomicBool::new(false),
            shutdown_received: AtomicBool::new(false),
            run_tasks,
            wait_for_close_confirmation,
            session_ready,
            breaker,
        }
    }

    /// The negotiated session parameters
    pub fn session(&self) -> Session {
        self.engine.lock().session()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.invalid.load(Ordering::Acquire) || self.shutdown_sent.load(Ordering::Acquire)
    }

    #[inline]
    pub fn shutdown_received(&self) -> bool {
        self.shutdown_received.load(Ordering::Acquire)
    }

    /// Runs the initial handshake; idempotent once complete
    pub fn handshake(&self) -> Result<()> {
        self.check_open()?;
        ensure!(!self.handshake_completed.load(Ordering::Acquire), Ok(()));
        self.handshake_impl(false)
    }

    /// Forces a new handshake on an established session
    pub fn renegotiate(&self) -> Result<()> {
        self.check_open()?;
        ensure!(
            self.session().protocol.supports_renegotiation(),
            Err(Kind::Protocol("renegotiation requires TLS 1.2 or earlier").err())
        );
        self.handshake_impl(true)
    }

    /// Reads decrypted bytes into `dest`.
    ///
    /// Returns `Ok(0)` on a clean end-of-stream (and keeps returning it);
    /// handshake records are processed opportunistically along the way.
    pub fn read(&self, dest: &mut BufferSet<'_>) -> Result<usize> {
        self.check_open()?;
        ensure!(dest.has_remaining(), Ok(0));
        self.ensure_handshake()?;

        let mut read = self.read.lock();
        let read = &mut *read;

        loop {
            // plaintext decrypted by an earlier pass is served first
            if read.in_plain.position() > 0 {
                return Ok(Self::transfer_pending_plaintext(read, dest));
            }
            if self.shutdown_received() {
                return Ok(0);
            }

            let status = self.engine.lock().handshake_status();
            match status {
                HandshakeStatus::NeedUnwrap | HandshakeStatus::NeedWrap => {
                    // peer-initiated renegotiation
                    let produced = self.write_and_handshake(read, Some(&mut *dest))?;
                    if produced > 0 {
                        return Ok(produced);
                    }
                }
                HandshakeStatus::NotHandshaking | HandshakeStatus::Finished => {
                    match self.read_and_unwrap(read, Some(&mut *dest))? {
                        Unwrapped::ToDest(amount) => return Ok(amount),
                        Unwrapped::ToInternal(_) | Unwrapped::Stalled => {}
                        Unwrapped::Eof => return Ok(0),
                        Unwrapped::Closed => {
                            self.shutdown_received.store(true, Ordering::Release);
                        }
                    }
                }
                HandshakeStatus::NeedTask => self.run_or_surface_task()?,
                HandshakeStatus::NeedUnwrapAgain => {
                    return Err(Kind::Protocol("unsupported handshake stage").err())
                }
            }
        }
    }

    /// Writes plaintext from `src`, returning the bytes accepted.
    ///
    /// Entered even with an empty source so a non-blocking caller can
    /// re-drive a pending ciphertext flush.
    pub fn write(&self, src: &mut BufferSet<'_>) -> Result<usize> {
        self.check_open()?;
        self.ensure_handshake()?;

        let mut write = self.write.lock();
        write.out_cipher.prepare();
        let result = self.wrap_and_write(&mut write, src);
        write.out_cipher.release();
        result
    }

    fn wrap_and_write(&self, write: &mut WriteHalf<W>, src: &mut BufferSet<'_>) -> Result<usize> {
        let mut consumed = 0;
        loop {
            self.flush(write)?;
            if !src.has_remaining() {
                return Ok(consumed);
            }

            write.out_cipher.prepare();
            let result = self.wrap_loop(write, src)?;
            consumed += result.consumed;
            if result.status == Status::Closed {
                return Ok(consumed);
            }
            if result.consumed == 0 && result.produced == 0 {
                // no progress; the read path must run the engine's
                // handshake before more plaintext can be accepted
                return Ok(consumed);
            }
        }
    }

    /// Sends our close_notify (once) and reports whether the peer's has
    /// been seen.
    ///
    /// The first call returns `false` when the peer has not spoken yet; a
    /// later call drains the peer's close_notify and returns `true`.
    pub fn shutdown(&self) -> Result<bool> {
        ensure!(
            !self.invalid.load(Ordering::Acquire),
            Err(Kind::Closed.err())
        );
        let mut read = self.read.lock();
        let mut write = self.write.lock();
        self.shutdown_locked(&mut read, &mut write)
    }

    /// Closes the channel: best-effort shutdown, then the plain channel,
    /// then buffer teardown. Idempotent.
    pub fn close(&self) {
        self.try_shutdown();

        if let Some(breaker) = &self.breaker {
            // unblock any thread stuck inside the plain channel before
            // taking the locks it holds
            let _ = breaker();
        }

        let mut read = self.read.lock();
        let mut write = self.write.lock();
        if let Err(error) = write.channel.close() {
            debug!(%error, "plain channel close failed");
        }
        Self::free_buffers(&mut read, &mut write);
        self.invalid.store(true, Ordering::Release);
    }

    fn check_open(&self) -> Result<()> {
        ensure!(
            !self.invalid.load(Ordering::Acquire) && !self.shutdown_sent.load(Ordering::Acquire),
            Err(Kind::Closed.err())
        );
        Ok(())
    }

    fn ensure_handshake(&self) -> Result<()> {
        ensure!(!self.handshake_completed.load(Ordering::Acquire), Ok(()));
        self.handshake_impl(false)
    }

    fn handshake_impl(&self, force: bool) -> Result<()> {
        let mut init = self.init.lock();
        if !force && self.handshake_completed.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut read = self.read.lock();

        if force || !init.handshake_started {
            self.engine
                .lock()
                .begin_handshake()
                .map_err(|error| self.flag(Kind::Engine(error).err()))?;
            init.handshake_started = true;
        }

        self.write_and_handshake(&mut read, None)?;

        let session = self.engine.lock().session();
        ensure!(
            !session.protocol.is_dtls(),
            Err(Kind::Protocol("DTLS sessions are not supported").err())
        );

        self.handshake_completed.store(true, Ordering::Release);
        debug!(protocol = %session.protocol, "handshake complete");

        if let Some(callback) = &self.session_ready {
            callback(&session).map_err(|error| Kind::Callback(error).err())?;
        }
        Ok(())
    }

    /// Flushes pending ciphertext and drives the handshake machine.
    /// Returns plaintext produced into `dest` along the way.
    fn write_and_handshake(
        &self,
        read: &mut ReadHalf<R>,
        dest: Option<&mut BufferSet<'_>>,
    ) -> Result<usize> {
        let mut write = self.write.lock();
        write.out_cipher.prepare();

        let result = self
            .flush(&mut write)
            .and_then(|()| self.handshake_loop(read, &mut write, dest));
        write.out_cipher.release();
        result
    }

    fn handshake_loop(
        &self,
        read: &mut ReadHalf<R>,
        write: &mut WriteHalf<W>,
        mut dest: Option<&mut BufferSet<'_>>,
    ) -> Result<usize> {
        loop {
            let status = self.engine.lock().handshake_status();
            trace!(?status, "handshake step");
            match status {
                HandshakeStatus::NeedWrap => {
                    debug_assert_eq!(write.out_cipher.position(), 0);
                    // the engine requires a live source even though the
                    // handshake contributes no plaintext
                    let mut dummy = Buffer::empty();
                    let mut dummy = BufferSet::single(&mut dummy);
                    self.wrap_loop(write, &mut dummy)?;
                    self.flush(write)?;
                }
                HandshakeStatus::NeedUnwrap => {
                    match self.read_and_unwrap(read, dest.as_mut().map(|dest| &mut **dest))? {
                        // the caller's read consumes what was produced
                        Unwrapped::ToDest(amount) => return Ok(amount),
                        // internal plaintext is picked up by the read loop
                        Unwrapped::ToInternal(_) => return Ok(0),
                        Unwrapped::Stalled => {}
                        Unwrapped::Eof => {
                            return Err(self.flag(
                                Kind::Io(io::ErrorKind::UnexpectedEof.into()).err(),
                            ))
                        }
                        Unwrapped::Closed => {
                            self.shutdown_received.store(true, Ordering::Release);
                            return Err(Kind::Closed.err());
                        }
                    }
                }
                HandshakeStatus::NotHandshaking => return Ok(0),
                HandshakeStatus::NeedTask => self.run_or_surface_task()?,
                HandshakeStatus::Finished | HandshakeStatus::NeedUnwrapAgain => {
                    return Err(Kind::Protocol("unsupported handshake stage").err())
                }
            }
        }
    }

    /// Unwraps buffered ciphertext, pulling more from the channel whenever
    /// the engine underflows
    fn read_and_unwrap(
        &self,
        read: &mut ReadHalf<R>,
        mut dest: Option<&mut BufferSet<'_>>,
    ) -> Result<Unwrapped> {
        let entry = self.engine.lock().handshake_status();
        loop {
            let step = self.unwrap_loop(read, dest.as_mut().map(|dest| &mut **dest), entry)?;
            match step {
                UnwrapStep::Produced {
                    direct: true,
                    amount,
                } => return Ok(Unwrapped::ToDest(amount)),
                UnwrapStep::Produced {
                    direct: false,
                    amount,
                } => return Ok(Unwrapped::ToInternal(amount)),
                UnwrapStep::Stalled => return Ok(Unwrapped::Stalled),
                UnwrapStep::Closed => return Ok(Unwrapped::Closed),
                UnwrapStep::NeedsCipher => {
                    if self.read_cipher(read)? == 0 {
                        return Ok(Unwrapped::Eof);
                    }
                }
            }
        }
    }

    /// One unwrap pass. Prefers the caller's destination; a
    /// `BufferOverflow` falls back to the internal plaintext buffer, grown
    /// past the destination's remaining so the retry cannot overflow again.
    fn unwrap_loop(
        &self,
        read: &mut ReadHalf<R>,
        mut dest: Option<&mut BufferSet<'_>>,
        entry: HandshakeStatus,
    ) -> Result<UnwrapStep> {
        let mut direct = dest.is_some();
        loop {
            let ReadHalf {
                in_cipher,
                in_plain,
                ..
            } = &mut *read;

            let cipher = in_cipher.prepare();
            cipher.flip();
            let result = match (&mut dest, direct) {
                (Some(dest), true) => self.engine.lock().unwrap(cipher, &mut **dest),
                _ => {
                    let plain = in_plain.prepare();
                    let mut internal = BufferSet::single(plain);
                    self.engine.lock().unwrap(cipher, &mut internal)
                }
            };
            cipher.compact();

            let result = result.map_err(|error| self.flag(Kind::Engine(error).err()))?;
            trace!(
                status = ?result.status,
                handshake = ?result.handshake,
                consumed = result.consumed,
                produced = result.produced,
                "unwrap"
            );

            if result.produced > 0 {
                return Ok(UnwrapStep::Produced {
                    direct,
                    amount: result.produced,
                });
            }

            match result.status {
                Status::BufferUnderflow => return Ok(UnwrapStep::NeedsCipher),
                Status::Closed => return Ok(UnwrapStep::Closed),
                Status::BufferOverflow => {
                    if direct {
                        // the caller's buffer is too small for this record
                        let needed = dest.as_ref().map_or(0, |dest| dest.remaining()) + 1;
                        read.in_plain.ensure_remaining(needed)?;
                        direct = false;
                    } else {
                        read.in_plain.enlarge()?;
                    }
                }
                Status::Ok => {
                    if result.handshake != entry {
                        return Ok(UnwrapStep::Stalled);
                    }
                    // a handshake record was consumed without a status
                    // change; keep going
                }
            }
        }
    }

    /// Pulls more ciphertext from the plain channel. `Ok(0)` is
    /// end-of-stream.
    fn read_cipher(&self, read: &mut ReadHalf<R>) -> Result<usize> {
        if !read.in_cipher.prepare().has_remaining() {
            // a record larger than the buffer; underflow with a full buffer
            read.in_cipher.enlarge()?;
        }

        let ReadHalf {
            channel, in_cipher, ..
        } = &mut *read;
        let buffer = in_cipher.prepare();
        loop {
            match channel.read(buffer) {
                Ok(amount) => return Ok(amount),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Err(Kind::NeedsRead.err())
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(self.flag(Kind::Io(error).err())),
            }
        }
    }

    /// Moves decrypted-but-undelivered plaintext into the caller's
    /// destination, wiping whatever stays behind
    fn transfer_pending_plaintext(read: &mut ReadHalf<R>, dest: &mut BufferSet<'_>) -> usize {
        let Some(buffer) = read.in_plain.buffer_mut() else {
            return 0;
        };
        buffer.flip();
        let transferred = dest.copy_from_buffer(buffer);
        buffer.compact();

        read.in_plain.release();
        // plaintext must not linger past the buffered window
        read.in_plain.zero_remaining();
        transferred
    }

    /// Wraps until the engine stops overflowing the out-ciphertext buffer
    fn wrap_loop(
        &self,
        write: &mut WriteHalf<W>,
        src: &mut BufferSet<'_>,
    ) -> Result<EngineResult> {
        loop {
            let result = {
                let out = write.out_cipher.prepare();
                self.engine.lock().wrap(src, out)
            };
            let result = result.map_err(|error| self.flag(Kind::Engine(error).err()))?;
            trace!(
                status = ?result.status,
                handshake = ?result.handshake,
                consumed = result.consumed,
                produced = result.produced,
                "wrap"
            );

            match result.status {
                Status::Ok | Status::Closed => return Ok(result),
                Status::BufferOverflow => {
                    debug_assert_eq!(result.consumed, 0);
                    write.out_cipher.enlarge()?;
                }
                Status::BufferUnderflow => {
                    return Err(self.flag(Kind::Protocol("engine underflow on wrap").err()))
                }
            }
        }
    }

    /// Drains the out-ciphertext buffer into the plain channel
    fn flush(&self, write: &mut WriteHalf<W>) -> Result<()> {
        let WriteHalf {
            channel,
            out_cipher,
        } = &mut *write;
        let Some(buffer) = out_cipher.buffer_mut() else {
            return Ok(());
        };
        ensure!(buffer.position() > 0, Ok(()));

        buffer.flip();
        let result = Self::drain(channel, buffer);
        buffer.compact();
        result.map_err(|error| self.flag(error))
    }

    fn drain(channel: &mut W, buffer: &mut Buffer) -> Result<()> {
        while buffer.has_remaining() {
            match channel.write(buffer) {
                Ok(0) => return Err(Kind::NeedsWrite.err()),
                Ok(_) => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Err(Kind::NeedsWrite.err())
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(Kind::Io(error).err()),
            }
        }
        Ok(())
    }

    fn shutdown_locked(&self, read: &mut ReadHalf<R>, write: &mut WriteHalf<W>) -> Result<bool> {
        if !self.shutdown_sent.load(Ordering::Acquire) {
            self.shutdown_sent.store(true, Ordering::Release);
            trace!("sending close_notify");

            write.out_cipher.prepare();
            self.flush(write)?;
            self.engine.lock().close_outbound();

            let mut dummy = Buffer::empty();
            let mut dummy = BufferSet::single(&mut dummy);
            self.wrap_loop(write, &mut dummy)?;
            self.flush(write)?;

            if self.shutdown_received() {
                Self::free_buffers(read, write);
                return Ok(true);
            }
            return Ok(false);
        }

        if !self.shutdown_received() {
            // drain until the peer's close_notify arrives; application
            // data that trails our close_notify is discarded
            loop {
                match self.read_and_unwrap(read, None)? {
                    Unwrapped::Closed | Unwrapped::Eof => {
                        self.shutdown_received.store(true, Ordering::Release);
                        break;
                    }
                    Unwrapped::ToInternal(_) => read.in_plain.dispose(),
                    Unwrapped::ToDest(_) | Unwrapped::Stalled => {}
                }
            }
        }

        Self::free_buffers(read, write);
        Ok(true)
    }

    /// Shutdown with try-locks so a concurrent I/O path cannot deadlock a
    /// `close`
    fn try_shutdown(&self) {
        ensure!(!self.invalid.load(Ordering::Acquire));
        let Some(mut read) = self.read.try_lock() else {
            return;
        };
        let Some(mut write) = self.write.try_lock() else {
            return;
        };

        if !self.shutdown_sent.load(Ordering::Acquire) {
            let confirmed = self.shutdown_locked(&mut read, &mut write);
            if matches!(confirmed, Ok(false)) && self.wait_for_close_confirmation {
                let _ = self.shutdown_locked(&mut read, &mut write);
            }
        }
    }

    fn run_or_surface_task(&self) -> Result<()> {
        let task = self.engine.lock().delegated_task();
        let Some(task) = task else {
            return Ok(());
        };
        if self.run_tasks {
            trace!("running delegated task");
            task.run();
            Ok(())
        } else {
            Err(Kind::NeedsTask(task).err())
        }
    }

    fn free_buffers(read: &mut ReadHalf<R>, write: &mut WriteHalf<W>) {
        read.in_cipher.dispose();
        read.in_plain.dispose();
        write.out_cipher.dispose();
    }

    /// Engine and I/O failures poison the channel before surfacing
    fn flag(&self, error: Error) -> Error {
        if matches!(error.kind(), Kind::Io(_) | Kind::Engine(_)) {
            self.invalid.store(true, Ordering::Release);
        }
        error
    }
}
