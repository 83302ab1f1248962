// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A scripted engine and in-memory pipes for exercising the channel
//!
//! The fake record format is `[type u8][len u16 BE][payload]` with
//! handshake opcodes as single-byte payloads and application data XOR'd
//! with a fixed mask. It exists to drive the channel's state machine, not
//! to resemble real TLS.

use crate::{
    channel::{ChannelRead, ChannelWrite, Options, TlsChannel},
    engine::{Engine, EngineResult, HandshakeStatus, Protocol, Session, Status, Task},
    error::BoxError,
    set::BufferSet,
};
use cmdstream_core::buffer::Buffer;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

pub const HANDSHAKE_RECORD: u8 = 22;
pub const DATA_RECORD: u8 = 23;
pub const ALERT_RECORD: u8 = 21;

pub const CLIENT_HELLO_OP: u8 = 1;
pub const SERVER_HELLO_OP: u8 = 2;
pub const FINISHED_OP: u8 = 20;

const XOR_MASK: u8 = 0x5A;
const HEADER: usize = 3;

pub fn handshake_record(op: u8) -> Vec<u8> {
    vec![HANDSHAKE_RECORD, 0, 1, op]
}

pub fn data_record(plain: &[u8]) -> Vec<u8> {
    let mut record = vec![DATA_RECORD];
    record.extend_from_slice(&(plain.len() as u16).to_be_bytes());
    record.extend(plain.iter().map(|byte| byte ^ XOR_MASK));
    record
}

pub fn close_notify_record() -> Vec<u8> {
    vec![ALERT_RECORD, 0, 1, 0]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Initial,
    SendClientHello,
    AwaitServerHello,
    SendFinished,
    AwaitClientHello,
    RunTask,
    SendServerHello,
    AwaitFinished,
    Done,
}

pub struct FakeEngine {
    role: Role,
    stage: Stage,
    protocol: Protocol,
    began: bool,
    /// Pretend the session was restored; the first handshake is a no-op
    instant: bool,
    scripted_task: bool,
    task_done: Arc<AtomicBool>,
    task_handed: bool,
    max_fragment: usize,
    inbound_closed: bool,
    outbound_closed: bool,
    close_notify_sent: bool,
}

impl FakeEngine {
    fn new(role: Role) -> Self {
        Self {
            role,
            stage: Stage::Initial,
            protocol: Protocol::Tls13,
            began: false,
            instant: false,
            scripted_task: false,
            task_done: Arc::new(AtomicBool::new(false)),
            task_handed: false,
            max_fragment: 1024,
            inbound_closed: false,
            outbound_closed: false,
            close_notify_sent: false,
        }
    }

    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    /// An engine whose first handshake completes without any exchange
    pub fn established(protocol: Protocol) -> Self {
        let mut engine = Self::new(Role::Client);
        engine.stage = Stage::Done;
        engine.instant = true;
        engine.protocol = protocol;
        engine
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Requires a delegated task between ClientHello and ServerHello
    #[must_use]
    pub fn with_task(mut self) -> Self {
        self.scripted_task = true;
        self
    }

    #[must_use]
    pub fn with_max_fragment(mut self, max_fragment: usize) -> Self {
        self.max_fragment = max_fragment;
        self
    }

    fn effective_stage(&self) -> Stage {
        if self.stage == Stage::RunTask && self.task_done.load(Ordering::Acquire) {
            Stage::SendServerHello
        } else {
            self.stage
        }
    }

    fn on_handshake_message(&mut self, op: u8) -> Result<HandshakeStatus, BoxError> {
        match (self.role, self.effective_stage(), op) {
            (Role::Server, Stage::AwaitClientHello, CLIENT_HELLO_OP) => {
                if self.scripted_task && !self.task_done.load(Ordering::Acquire) {
                    self.stage = Stage::RunTask;
                    Ok(HandshakeStatus::NeedTask)
                } else {
                    self.stage = Stage::SendServerHello;
                    Ok(HandshakeStatus::NeedWrap)
                }
            }
            (Role::Client, Stage::AwaitServerHello, SERVER_HELLO_OP) => {
                self.stage = Stage::SendFinished;
                Ok(HandshakeStatus::NeedWrap)
            }
            (Role::Server, Stage::AwaitFinished, FINISHED_OP) => {
                self.stage = Stage::Done;
                Ok(HandshakeStatus::Finished)
            }
            (role, stage, op) => {
                Err(format!("unexpected handshake message {op} in {role:?}/{stage:?}").into())
            }
        }
    }

    fn emit_handshake(
        &mut self,
        dst: &mut Buffer,
        op: u8,
        next: Stage,
        handshake: HandshakeStatus,
    ) -> Result<EngineResult, BoxError> {
        let record = handshake_record(op);
        if dst.remaining() < record.len() {
            return Ok(EngineResult {
                status: Status::BufferOverflow,
                handshake: self.handshake_status(),
                consumed: 0,
                produced: 0,
            });
        }
        dst.write_from(&record);
        self.stage = next;
        Ok(EngineResult {
            status: Status::Ok,
            handshake,
            consumed: 0,
            produced: record.len(),
        })
    }
}

impl Engine for FakeEngine {
    fn wrap(
        &mut self,
        src: &mut BufferSet<'_>,
        dst: &mut Buffer,
    ) -> Result<EngineResult, BoxError> {
        if self.outbound_closed {
            if self.close_notify_sent {
                return Ok(EngineResult {
                    status: Status::Closed,
                    handshake: HandshakeStatus::NotHandshaking,
                    consumed: 0,
                    produced: 0,
                });
            }
            let record = close_notify_record();
            if dst.remaining() < record.len() {
                return Ok(EngineResult {
                    status: Status::BufferOverflow,
                    handshake: HandshakeStatus::NotHandshaking,
                    consumed: 0,
                    produced: 0,
                });
            }
            dst.write_from(&record);
            self.close_notify_sent = true;
            return Ok(EngineResult {
                status: Status::Closed,
                handshake: HandshakeStatus::NotHandshaking,
                consumed: 0,
                produced: record.len(),
            });
        }

        match self.effective_stage() {
            Stage::SendClientHello => self.emit_handshake(
                dst,
                CLIENT_HELLO_OP,
                Stage::AwaitServerHello,
                HandshakeStatus::NeedUnwrap,
            ),
            Stage::SendServerHello => self.emit_handshake(
                dst,
                SERVER_HELLO_OP,
                Stage::AwaitFinished,
                HandshakeStatus::NeedUnwrap,
            ),
            Stage::SendFinished => self.emit_handshake(
                dst,
                FINISHED_OP,
                Stage::Done,
                HandshakeStatus::Finished,
            ),
            Stage::Done => {
                let amount = src.remaining().min(self.max_fragment);
                if amount == 0 {
                    return Ok(EngineResult {
                        status: Status::Ok,
                        handshake: HandshakeStatus::NotHandshaking,
                        consumed: 0,
                        produced: 0,
                    });
                }
                if dst.remaining() < amount + HEADER {
                    return Ok(EngineResult {
                        status: Status::BufferOverflow,
                        handshake: HandshakeStatus::NotHandshaking,
                        consumed: 0,
                        produced: 0,
                    });
                }
                let mut payload = vec![0u8; amount];
                src.read_into(&mut payload);
                for byte in &mut payload {
                    *byte ^= XOR_MASK;
                }
                dst.write_from(&[DATA_RECORD, (amount >> 8) as u8, amount as u8]);
                dst.write_from(&payload);
                Ok(EngineResult {
                    status: Status::Ok,
                    handshake: HandshakeStatus::NotHandshaking,
                    consumed: amount,
                    produced: amount + HEADER,
                })
            }
            // wrap while the script wants something else makes no progress
            _ => Ok(EngineResult {
                status: Status::Ok,
                handshake: self.handshake_status(),
                consumed: 0,
                produced: 0,
            }),
        }
    }

    fn unwrap(
        &mut self,
        src: &mut Buffer,
        dst: &mut BufferSet<'_>,
    ) -> Result<EngineResult, BoxError> {
        if self.inbound_closed {
            return Ok(EngineResult {
                status: Status::Closed,
                handshake: HandshakeStatus::NotHandshaking,
                consumed: 0,
                produced: 0,
            });
        }

        let underflow = EngineResult {
            status: Status::BufferUnderflow,
            handshake: self.handshake_status(),
            consumed: 0,
            produced: 0,
        };

        let window = src.as_slice();
        if window.len() < HEADER {
            return Ok(underflow);
        }
        let kind = window[0];
        let len = u16::from_be_bytes([window[1], window[2]]) as usize;
        if window.len() < HEADER + len {
            return Ok(underflow);
        }

        match kind {
            HANDSHAKE_RECORD => {
                let op = window[HEADER];
                let handshake = self.on_handshake_message(op)?;
                src.advance(HEADER + len);
                Ok(EngineResult {
                    status: Status::Ok,
                    handshake,
                    consumed: HEADER + len,
                    produced: 0,
                })
            }
            DATA_RECORD => {
                if dst.remaining() < len {
                    return Ok(EngineResult {
                        status: Status::BufferOverflow,
                        handshake: self.handshake_status(),
                        consumed: 0,
                        produced: 0,
                    });
                }
                let plain: Vec<u8> = window[HEADER..HEADER + len]
                    .iter()
                    .map(|byte| byte ^ XOR_MASK)
                    .collect();
                src.advance(HEADER + len);
                dst.write_from(&plain);
                Ok(EngineResult {
                    status: Status::Ok,
                    handshake: self.handshake_status(),
                    consumed: HEADER + len,
                    produced: len,
                })
            }
            ALERT_RECORD => {
                self.inbound_closed = true;
                src.advance(HEADER + len);
                Ok(EngineResult {
                    status: Status::Closed,
                    handshake: HandshakeStatus::NotHandshaking,
                    consumed: HEADER + len,
                    produced: 0,
                })
            }
            _ => Err(format!("unknown record type {kind}").into()),
        }
    }

    fn begin_handshake(&mut self) -> Result<(), BoxError> {
        if !self.began {
            self.began = true;
            if self.instant {
                return Ok(());
            }
        }
        self.task_done.store(false, Ordering::Release);
        self.task_handed = false;
        self.stage = match self.role {
            Role::Client => Stage::SendClientHello,
            Role::Server => Stage::AwaitClientHello,
        };
        Ok(())
    }

    fn close_outbound(&mut self) {
        self.outbound_closed = true;
    }

    fn handshake_status(&self) -> HandshakeStatus {
        match self.effective_stage() {
            Stage::Initial | Stage::Done => HandshakeStatus::NotHandshaking,
            Stage::SendClientHello | Stage::SendServerHello | Stage::SendFinished => {
                HandshakeStatus::NeedWrap
            }
            Stage::AwaitServerHello | Stage::AwaitClientHello | Stage::AwaitFinished => {
                HandshakeStatus::NeedUnwrap
            }
            Stage::RunTask => HandshakeStatus::NeedTask,
        }
    }

    fn delegated_task(&mut self) -> Option<Task> {
        if self.stage == Stage::RunTask
            && !self.task_handed
            && !self.task_done.load(Ordering::Acquire)
        {
            self.task_handed = true;
            let done = self.task_done.clone();
            Some(Task::new(move || done.store(true, Ordering::Release)))
        } else {
            None
        }
    }

    fn session(&self) -> Session {
        Session {
            protocol: self.protocol,
            cipher_suite: "FAKE_XOR_WITH_NOTHING",
            peer_host: None,
        }
    }
}

struct PipeState {
    data: VecDeque<u8>,
    write_closed: bool,
    broken: bool,
}

struct PipeShared {
    state: Mutex<PipeState>,
    readable: Condvar,
}

/// An in-memory unidirectional byte pipe
pub fn pipe(blocking: bool) -> (PipeReader, PipeWriter) {
    let shared = Arc::new(PipeShared {
        state: Mutex::new(PipeState {
            data: VecDeque::new(),
            write_closed: false,
            broken: false,
        }),
        readable: Condvar::new(),
    });
    (
        PipeReader {
            shared: shared.clone(),
            blocking,
        },
        PipeWriter { shared },
    )
}

pub struct PipeReader {
    shared: Arc<PipeShared>,
    blocking: bool,
}

impl PipeReader {
    pub fn controller(&self) -> PipeController {
        PipeController(self.shared.clone())
    }
}

impl ChannelRead for PipeReader {
    fn read(&mut self, dst: &mut Buffer) -> io::Result<usize> {
        let mut state = self.shared.state.lock();
        loop {
            if state.broken {
                return Err(io::ErrorKind::ConnectionReset.into());
            }
            if !state.data.is_empty() {
                let mut total = 0;
                while dst.has_remaining() {
                    let Some(byte) = state.data.pop_front() else {
                        break;
                    };
                    dst.write_from(&[byte]);
                    total += 1;
                }
                return Ok(total);
            }
            if state.write_closed {
                return Ok(0);
            }
            if !self.blocking {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.shared.readable.wait(&mut state);
        }
    }
}

pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

impl PipeWriter {
    pub fn controller(&self) -> PipeController {
        PipeController(self.shared.clone())
    }
}

impl ChannelWrite for PipeWriter {
    fn write(&mut self, src: &mut Buffer) -> io::Result<usize> {
        let mut state = self.shared.state.lock();
        if state.broken || state.write_closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let amount = src.remaining();
        state.data.extend(src.as_slice());
        src.advance(amount);
        drop(state);
        self.shared.readable.notify_all();
        Ok(amount)
    }

    fn close(&mut self) -> io::Result<()> {
        self.shared.state.lock().write_closed = true;
        self.shared.readable.notify_all();
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Fails both ends of the pipe, releasing any blocked reader
pub struct PipeController(Arc<PipeShared>);

impl PipeController {
    pub fn break_pipe(&self) {
        self.0.state.lock().broken = true;
        self.0.readable.notify_all();
    }
}

pub type FakeChannel = TlsChannel<FakeEngine, PipeReader, PipeWriter>;

/// Two channels bridged by a pair of blocking pipes
pub fn channel_pair(
    client: FakeEngine,
    server: FakeEngine,
    client_options: Options,
    server_options: Options,
) -> (FakeChannel, FakeChannel) {
    let (to_server, client_out) = pipe(true);
    let (to_client, server_out) = pipe(true);
    (
        TlsChannel::new(client, to_client, client_out, client_options),
        TlsChannel::new(server, to_server, server_out, server_options),
    )
}
