// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;

#[test]
fn cursor_window() {
    let mut buffer = Buffer::with_capacity(8);
    assert_eq!(buffer.capacity(), 8);
    assert_eq!(buffer.remaining(), 8);

    assert_eq!(buffer.write_from(b"abc"), 3);
    assert_eq!(buffer.position(), 3);

    buffer.flip();
    assert_eq!(buffer.remaining(), 3);
    assert_eq!(buffer.as_slice(), b"abc");

    let mut out = [0u8; 8];
    assert_eq!(buffer.read_into(&mut out), 3);
    assert_eq!(&out[..3], b"abc");
    assert!(!buffer.has_remaining());
}

#[test]
fn write_is_bounded_by_the_window() {
    let mut buffer = Buffer::with_capacity(4);
    assert_eq!(buffer.write_from(b"abcdef"), 4);
    buffer.flip();
    assert_eq!(buffer.as_slice(), b"abcd");
}

#[test]
fn compact_preserves_unread_bytes() {
    let mut buffer = Buffer::of(b"abcdef");
    buffer.advance(2);
    buffer.compact();
    assert_eq!(buffer.position(), 4);
    assert_eq!(buffer.limit(), buffer.capacity());

    buffer.flip();
    assert_eq!(buffer.as_slice(), b"cdef");
}

#[test]
fn transfer_moves_both_cursors() {
    let mut src = Buffer::of(b"hello world");
    let mut dst = Buffer::with_capacity(5);

    assert_eq!(src.transfer_to(&mut dst), 5);
    assert_eq!(src.remaining(), 6);
    dst.flip();
    assert_eq!(dst.as_slice(), b"hello");
}

#[test]
fn zero_remaining_wipes_past_the_position() {
    let mut buffer = Buffer::of(b"secret");
    buffer.advance(2);
    buffer.zero_remaining();
    buffer.set_position(0);
    assert_eq!(buffer.as_slice(), b"se\0\0\0\0");
}

#[test]
fn pool_counts_outstanding_buffers() {
    let pool = Pool::new(4);
    assert_eq!(pool.outstanding(), 0);

    let a = pool.get(100);
    let b = pool.exact(48);
    assert_eq!(pool.outstanding(), 2);
    assert_eq!(a.remaining(), 100);
    assert_eq!(b.capacity(), 48);
    assert_eq!(b.limit(), 48);

    drop(a);
    drop(b);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn pool_recycles_backings() {
    let pool = Pool::new(4);

    let buffer = pool.get(100);
    let capacity = buffer.capacity();
    drop(buffer);

    // the next allocation that fits reuses the returned backing
    let buffer = pool.get(64);
    assert_eq!(buffer.capacity(), capacity);
    assert_eq!(buffer.limit(), 64);
}

#[test]
fn exact_never_over_allocates() {
    let pool = Pool::new(4);
    drop(pool.get(1024));

    let buffer = pool.exact(48);
    assert_eq!(buffer.capacity(), 48);
}

#[test]
fn round_trip() {
    bolero::check!()
        .with_type::<Vec<u8>>()
        .for_each(|data| {
            let mut buffer = Buffer::with_capacity(data.len());
            assert_eq!(buffer.write_from(data), data.len());
            buffer.flip();

            let mut out = vec![0u8; data.len()];
            assert_eq!(buffer.read_into(&mut out), data.len());
            assert_eq!(&out, data);
        });
}
