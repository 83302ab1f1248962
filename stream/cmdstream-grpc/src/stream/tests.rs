// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::{
    call::{Code, Method, CLIENT_ID_KEY, CLIENT_METADATA_KEY, WIRE_VERSION_KEY},
    testing::{fake_call, FakeHandle, SendMode},
};
use cmdstream_core::error::Kind;
use std::thread;

const CLIENT_ID: &str = "9f8cbc47-48e5-45dd-9a0f-d0f90c69ae9d";

fn stream(
    mode: SendMode,
    read_timeout: Duration,
) -> (GrpcStream<crate::testing::FakeCall>, FakeHandle, Pool) {
    let (call, handle) = fake_call(mode);
    let pool = Pool::new(16);
    let options = CallOptions::new(Method::Unauthenticated, CLIENT_ID);
    let stream = GrpcStream::new(
        call,
        options,
        Address::new("shard0.example.com", 27017),
        read_timeout,
        pool.clone(),
    );
    (stream, handle, pool)
}

#[test]
fn happy_write_then_read() {
    let (mut stream, handle, pool) = stream(SendMode::Drain, Duration::from_secs(1));
    stream.open().unwrap();
    assert!(handle.requested_unbounded());

    let payload = [0xABu8; 48];
    let mut message = stream.buffer(48);
    message.write_from(&payload);
    message.flip();
    stream.write(vec![message]).unwrap();
    assert_eq!(handle.sent(), vec![payload.to_vec()]);

    handle.deliver_message(&payload);
    let response = stream.read(48).unwrap();
    assert_eq!(response.limit(), 48);
    assert_eq!(response.as_slice(), payload);
    assert!(!stream.is_closed());

    drop(response);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn read_blocks_until_delivery() {
    let (mut stream, handle, _pool) = stream(SendMode::Drain, Duration::from_secs(5));
    stream.open().unwrap();

    let deliverer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.deliver_message(b"pong");
    });

    let response = stream.read(4).unwrap();
    assert_eq!(response.as_slice(), b"pong");
    deliverer.join().unwrap();
}

#[test]
fn read_assembles_across_messages() {
    let (mut stream, handle, _pool) = stream(SendMode::Drain, Duration::from_secs(1));
    stream.open().unwrap();

    handle.deliver_message(b"hel");
    handle.deliver_message(b"lo!");
    let response = stream.read(6).unwrap();
    assert_eq!(response.as_slice(), b"hello!");
}

#[test]
fn partial_message_feeds_the_next_read() {
    let (mut stream, handle, _pool) = stream(SendMode::Drain, Duration::from_secs(1));
    stream.open().unwrap();

    handle.deliver_message(b"abcdef");
    assert_eq!(stream.read(4).unwrap().as_slice(), b"abcd");
    assert_eq!(stream.read(2).unwrap().as_slice(), b"ef");
}

#[test]
fn transport_failure_fails_a_blocked_write() {
    let (mut stream, handle, _pool) = stream(SendMode::Capture, Duration::ZERO);
    stream.open().unwrap();

    let closer = thread::spawn({
        let handle = handle;
        move || {
            thread::sleep(Duration::from_millis(30));
            handle.close_with(Status::new(Code::Internal, "connection reset"));
            handle
        }
    });

    let error = stream.write(vec![Buffer::of(&[1u8; 16])]).unwrap_err();
    assert!(matches!(error.kind(), Kind::Write { source: Some(_) }));
    assert!(error.to_string().contains("write failed"));

    let handle = closer.join().unwrap();
    assert!(stream.is_closed());
    // listener-initiated close never cancels the call
    assert!(!handle.was_cancelled());

    let error = stream.read(1).unwrap_err();
    assert!(error.is_closed());
}

#[test]
fn read_timeout_releases_the_destination() {
    let (mut stream, _handle, pool) = stream(SendMode::Drain, Duration::from_millis(50));
    stream.open().unwrap();
    let baseline = pool.outstanding();

    let started = std::time::Instant::now();
    let error = stream.read_with_timeout(4, Duration::ZERO).unwrap_err();
    assert!(error.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(pool.outstanding(), baseline);
}

#[test]
fn clean_listener_close_unblocks_an_infinite_read() {
    // a zero read timeout means no deadline at all
    let (mut stream, handle, _pool) = stream(SendMode::Drain, Duration::ZERO);
    stream.open().unwrap();

    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.close_with(Status::ok());
    });

    let error = stream.read(4).unwrap_err();
    assert!(error.is_closed());
    assert!(stream.is_closed());
    closer.join().unwrap();
}

#[test]
fn close_is_idempotent_and_cancels_once() {
    let (mut stream, handle, _pool) = stream(SendMode::Drain, Duration::ZERO);
    stream.open().unwrap();

    stream.close();
    assert!(stream.is_closed());
    assert!(handle.was_cancelled());

    // second close and close-after-listener-close are no-ops
    stream.close();
    handle.close_with(Status::ok());
    assert!(stream.is_closed());
}

#[test]
fn closed_stream_rejects_operations() {
    let (mut stream, _handle, _pool) = stream(SendMode::Drain, Duration::ZERO);
    stream.close();

    assert!(stream.open().unwrap_err().is_closed());
    assert!(stream.write(vec![Buffer::of(b"x")]).unwrap_err().is_closed());
    assert!(stream.read(1).unwrap_err().is_closed());
}

#[test]
fn refused_send_fails_the_write() {
    let (mut stream, _handle, pool) = stream(SendMode::Refuse, Duration::ZERO);
    stream.open().unwrap();

    let mut message = stream.buffer(8);
    message.write_from(&[3u8; 8]);
    message.flip();

    let error = stream.write(vec![message]).unwrap_err();
    assert!(matches!(error.kind(), Kind::Write { source: Some(_) }));
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn short_marshalling_fails_the_write() {
    let (mut stream, _handle, pool) = stream(SendMode::Partial(8), Duration::ZERO);
    stream.open().unwrap();

    let mut message = stream.buffer(16);
    message.write_from(&[7u8; 16]);
    message.flip();

    let error = stream.write(vec![message]).unwrap_err();
    assert!(matches!(error.kind(), Kind::Write { source: Some(_) }));
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn poisoned_message_fails_the_read() {
    let (mut stream, handle, pool) = stream(SendMode::Drain, Duration::from_secs(1));
    stream.open().unwrap();

    handle.deliver_poisoned_message();
    let error = stream.read(4).unwrap_err();
    assert!(matches!(error.kind(), Kind::Read { source: Some(_) }));
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn open_sends_the_required_metadata() {
    let (call, handle) = fake_call(SendMode::Drain);
    let options = CallOptions::new(Method::Authenticated, CLIENT_ID)
        .with_client_metadata(b"\x05\x00\x00\x00\x00".to_vec())
        .with_pass_through("mongodb-host", "shard0.example.com");
    let mut stream = GrpcStream::new(
        call,
        options,
        Address::new("shard0.example.com", 27017),
        Duration::ZERO,
        Pool::default(),
    );
    stream.open().unwrap();

    let metadata = handle.metadata();
    assert_eq!(metadata.get(CLIENT_ID_KEY), Some(CLIENT_ID));
    assert_eq!(metadata.get(WIRE_VERSION_KEY), Some("18"));
    assert_eq!(metadata.get(CLIENT_METADATA_KEY), Some("BQAAAAA="));
    assert_eq!(metadata.get("mongodb-host"), Some("shard0.example.com"));
    assert_eq!(metadata.get("content-type"), None);
}

#[test]
fn queued_messages_are_dropped_on_close() {
    let (mut stream, handle, pool) = stream(SendMode::Drain, Duration::from_secs(1));
    stream.open().unwrap();

    handle.deliver_message(b"left over");
    stream.close();
    assert_eq!(pool.outstanding(), 0);
}
