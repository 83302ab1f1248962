// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Blocking-socket rendition of the driver's `Stream` capability
//!
//! Wraps a [`TlsChannel`] around a connected `TcpStream`. Read deadlines
//! ride on the socket's receive timeout; a timed-out read poisons the
//! channel, matching the driver's policy of closing a connection after any
//! read timeout.

use crate::{
    channel::{ChannelRead, ChannelWrite, Options, TlsChannel},
    engine::Engine,
    error::{Error as TlsError, Kind as TlsKind},
    set::BufferSet,
};
use cmdstream_core::{
    buffer::{Buffer, Message, Pool},
    error::{Kind, Result},
    stream::{Address, Stream},
};
use core::time::Duration;
use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
};

pub struct TlsStream<E: Engine> {
    channel: TlsChannel<E, SocketReader, SocketWriter>,
    pool: Pool,
    address: Address,
}

impl<E: Engine> TlsStream<E> {
    /// Layers TLS over an already-connected socket.
    ///
    /// A zero `read_timeout` means reads never time out.
    pub fn new(
        engine: E,
        socket: TcpStream,
        address: Address,
        read_timeout: Duration,
        mut options: Options,
    ) -> io::Result<Self> {
        let timeout = (!read_timeout.is_zero()).then_some(read_timeout);
        socket.set_read_timeout(timeout)?;

        let reader = SocketReader(socket.try_clone()?);
        let writer = SocketWriter(socket.try_clone()?);
        let breaker = socket;
        options.breaker = Some(Box::new(move || breaker.shutdown(Shutdown::Both)));

        let pool = options.plain_pool.clone();
        Ok(Self {
            channel: TlsChannel::new(engine, reader, writer, options),
            pool,
            address,
        })
    }

    pub fn channel(&self) -> &TlsChannel<E, SocketReader, SocketWriter> {
        &self.channel
    }
}

impl<E: Engine> Stream for TlsStream<E> {
    fn buffer(&self, size: usize) -> Buffer {
        self.pool.get(size)
    }

    fn open(&mut self) -> Result<()> {
        self.channel.handshake().map_err(read_error)
    }

    fn write(&mut self, mut message: Message) -> Result<()> {
        let mut set = BufferSet::new(&mut message);
        while set.has_remaining() {
            self.channel.write(&mut set).map_err(write_error)?;
        }
        Ok(())
    }

    fn read_with_timeout(&mut self, len: usize, _additional: Duration) -> Result<Buffer> {
        let mut dest = self.pool.exact(len);
        while dest.has_remaining() {
            let mut set = BufferSet::single(&mut dest);
            match self.channel.read(&mut set) {
                Ok(0) => {
                    let cause = io::Error::from(io::ErrorKind::UnexpectedEof);
                    return Err(Kind::read(cause));
                }
                Ok(_) => {}
                Err(error) => return Err(read_error(error)),
            }
        }
        dest.flip();
        Ok(dest)
    }

    fn address(&self) -> &Address {
        &self.address
    }

    fn close(&self) {
        self.channel.close();
    }

    fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

fn read_error(error: TlsError) -> cmdstream_core::error::Error {
    let kind = match error.kind() {
        TlsKind::Closed => Some(Kind::Closed),
        TlsKind::Io(source) => match source.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Some(Kind::ReadTimeout),
            io::ErrorKind::Interrupted => Some(Kind::Interrupted),
            _ => None,
        },
        _ => None,
    };
    match kind {
        Some(kind) => kind.err(),
        None => Kind::read(error),
    }
}

fn write_error(error: TlsError) -> cmdstream_core::error::Error {
    if error.is_closed() {
        Kind::Closed.err()
    } else {
        Kind::write(error)
    }
}

/// The socket's read half; a receive timeout surfaces as `TimedOut` so the
/// channel treats it as a failure rather than a non-blocking signal
pub struct SocketReader(TcpStream);

impl ChannelRead for SocketReader {
    fn read(&mut self, dst: &mut Buffer) -> io::Result<usize> {
        match self.0.read(dst.as_mut_slice()) {
            Ok(amount) => {
                dst.advance(amount);
                Ok(amount)
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                Err(io::Error::new(io::ErrorKind::TimedOut, error))
            }
            Err(error) => Err(error),
        }
    }
}

pub struct SocketWriter(TcpStream);

impl ChannelWrite for SocketWriter {
    fn write(&mut self, src: &mut Buffer) -> io::Result<usize> {
        let amount = self.0.write(src.as_slice())?;
        src.advance(amount);
        Ok(amount)
    }

    fn close(&mut self) -> io::Result<()> {
        // the read half keeps working until the peer stops sending
        match self.0.shutdown(Shutdown::Write) {
            Err(error) if error.kind() != io::ErrorKind::NotConnected => Err(error),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::Protocol,
        testing::FakeEngine,
    };
    use std::{net::TcpListener, thread};

    /// A server-side channel speaking the fake record protocol over TCP
    fn serve<F>(listener: TcpListener, run: F) -> thread::JoinHandle<()>
    where
        F: FnOnce(TlsChannel<FakeEngine, SocketReader, SocketWriter>) + Send + 'static,
    {
        thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let reader = SocketReader(socket.try_clone().unwrap());
            let writer = SocketWriter(socket);
            let channel = TlsChannel::new(
                FakeEngine::server(),
                reader,
                writer,
                Options::default(),
            );
            run(channel);
        })
    }

    fn connect(listener: &TcpListener, read_timeout: Duration) -> TlsStream<FakeEngine> {
        let local = listener.local_addr().unwrap();
        let socket = TcpStream::connect(local).unwrap();
        TlsStream::new(
            FakeEngine::client(),
            socket,
            Address::new("localhost", local.port()),
            read_timeout,
            Options::default(),
        )
        .unwrap()
    }

    #[test]
    fn open_write_read_over_a_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server = serve(listener.try_clone().unwrap(), |channel| {
            channel.handshake().unwrap();

            // echo 32 bytes back
            let mut dest = Buffer::with_capacity(32);
            while dest.has_remaining() {
                let mut set = BufferSet::single(&mut dest);
                assert_ne!(channel.read(&mut set).unwrap(), 0);
            }
            dest.flip();
            let mut set = BufferSet::single(&mut dest);
            while set.has_remaining() {
                channel.write(&mut set).unwrap();
            }
        });

        let mut stream = connect(&listener, Duration::from_secs(5));
        stream.open().unwrap();
        assert_eq!(stream.channel().session().protocol, Protocol::Tls13);

        let payload = [0x5Eu8; 32];
        let mut message = stream.buffer(32);
        message.write_from(&payload);
        message.flip();
        stream.write(vec![message]).unwrap();

        let response = stream.read(32).unwrap();
        assert_eq!(response.limit(), 32);
        assert_eq!(response.as_slice(), payload);

        server.join().unwrap();
    }

    #[test]
    fn silent_peer_times_the_read_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server = serve(listener.try_clone().unwrap(), |channel| {
            channel.handshake().unwrap();
            // hold the socket open without sending
            thread::sleep(Duration::from_millis(200));
        });

        let mut stream = connect(&listener, Duration::from_millis(50));
        stream.open().unwrap();

        let error = stream.read(4).unwrap_err();
        assert!(error.is_timeout());

        server.join().unwrap();
    }

    #[test]
    fn peer_disconnect_fails_the_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server = serve(listener.try_clone().unwrap(), |channel| {
            channel.handshake().unwrap();
        });

        let mut stream = connect(&listener, Duration::from_secs(5));
        stream.open().unwrap();
        server.join().unwrap();

        let error = stream.read(4).unwrap_err();
        assert!(matches!(
            error.kind(),
            cmdstream_core::error::Kind::Read { .. }
        ));
    }
}
