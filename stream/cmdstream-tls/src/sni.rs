// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Server-name extraction from an initial ClientHello record
//!
//! Runs before the engine takes over, when the acceptor needs the hostname
//! to pick a configuration. Only the first record is examined; a
//! ClientHello spanning records is rejected as malformed.

use crate::error::{Error, Kind, Result};
use cmdstream_core::ensure;
use s2n_codec::{DecoderBuffer, DecoderError};
use std::collections::BTreeMap;

const HANDSHAKE_CONTENT_TYPE: u8 = 22;
const CLIENT_HELLO: u8 = 1;
const RANDOM_LEN: usize = 32;

/// The host_name entry type within the server_name extension
pub const SERVER_NAME_EXTENSION: u16 = 0;

fn malformed(_: DecoderError) -> Error {
    Kind::Protocol("malformed ClientHello record").err()
}

/// Decodes the server_name extension of a ClientHello record, mapping each
/// server-name type code to its value
pub fn read_server_names(record: &[u8]) -> Result<BTreeMap<u8, Vec<u8>>> {
    let buffer = DecoderBuffer::new(record);

    let (content_type, buffer) = buffer.decode::<u8>().map_err(malformed)?;
    ensure!(
        content_type == HANDSHAKE_CONTENT_TYPE,
        Err(Kind::Protocol("not a TLS handshake record").err())
    );
    let (_legacy_version, buffer) = buffer.decode::<u16>().map_err(malformed)?;
    let (fragment, _rest) = buffer
        .decode_slice_with_len_prefix::<u16>()
        .map_err(malformed)?;

    let (msg_type, fragment) = fragment.decode::<u8>().map_err(malformed)?;
    ensure!(
        msg_type == CLIENT_HELLO,
        Err(Kind::Protocol("handshake message is not a ClientHello").err())
    );

    // uint24 body length
    let (high, fragment) = fragment.decode::<u8>().map_err(malformed)?;
    let (mid, fragment) = fragment.decode::<u8>().map_err(malformed)?;
    let (low, fragment) = fragment.decode::<u8>().map_err(malformed)?;
    let body_len = usize::from(high) << 16 | usize::from(mid) << 8 | usize::from(low);
    let (body, _trailer) = fragment.decode_slice(body_len).map_err(malformed)?;

    let (_client_version, body) = body.decode::<u16>().map_err(malformed)?;
    let (_random, body) = body.decode_slice(RANDOM_LEN).map_err(malformed)?;
    let (_session_id, body) = body
        .decode_slice_with_len_prefix::<u8>()
        .map_err(malformed)?;
    let (_cipher_suites, body) = body
        .decode_slice_with_len_prefix::<u16>()
        .map_err(malformed)?;
    let (_compression, body) = body
        .decode_slice_with_len_prefix::<u8>()
        .map_err(malformed)?;

    let mut names = BTreeMap::new();
    if body.is_empty() {
        // extensions are optional
        return Ok(names);
    }

    let (mut extensions, _) = body
        .decode_slice_with_len_prefix::<u16>()
        .map_err(malformed)?;
    while !extensions.is_empty() {
        let (extension_type, rest) = extensions.decode::<u16>().map_err(malformed)?;
        let (data, rest) = rest
            .decode_slice_with_len_prefix::<u16>()
            .map_err(malformed)?;
        extensions = rest;

        if extension_type != SERVER_NAME_EXTENSION {
            continue;
        }

        let (mut list, trailer) = data
            .decode_slice_with_len_prefix::<u16>()
            .map_err(malformed)?;
        ensure!(
            trailer.is_empty(),
            Err(Kind::Protocol("trailing bytes after server name list").err())
        );

        while !list.is_empty() {
            let (name_type, rest) = list.decode::<u8>().map_err(malformed)?;
            let (name, rest) = rest
                .decode_slice_with_len_prefix::<u16>()
                .map_err(malformed)?;
            list = rest;

            let value = name.into_less_safe_slice().to_vec();
            ensure!(
                names.insert(name_type, value).is_none(),
                Err(Kind::Protocol("duplicate server name entry").err())
            );
        }
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal ClientHello record carrying the given server names
    fn client_hello(names: &[(u8, &[u8])]) -> Vec<u8> {
        let mut list = Vec::new();
        for (name_type, name) in names {
            list.push(*name_type);
            list.extend_from_slice(&(name.len() as u16).to_be_bytes());
            list.extend_from_slice(name);
        }

        let mut extension = Vec::new();
        extension.extend_from_slice(&(list.len() as u16).to_be_bytes());
        extension.extend_from_slice(&list);

        let mut extensions = Vec::new();
        extensions.extend_from_slice(&SERVER_NAME_EXTENSION.to_be_bytes());
        extensions.extend_from_slice(&(extension.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&extension);

        let mut body = Vec::new();
        body.extend_from_slice(&[3, 3]); // client_version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session_id
        body.extend_from_slice(&[0, 2, 0x13, 0x01]); // cipher_suites
        body.extend_from_slice(&[1, 0]); // compression_methods
        if !names.is_empty() {
            body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
            body.extend_from_slice(&extensions);
        }

        let mut handshake = vec![CLIENT_HELLO];
        let len = body.len();
        handshake.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
        handshake.extend_from_slice(&body);

        let mut record = vec![HANDSHAKE_CONTENT_TYPE, 3, 1];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn extracts_the_host_name() {
        let record = client_hello(&[(0, b"shard0.example.com")]);
        let names = read_server_names(&record).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[&0], b"shard0.example.com");
    }

    #[test]
    fn no_extensions_yields_no_names() {
        let record = client_hello(&[]);
        assert!(read_server_names(&record).unwrap().is_empty());
    }

    #[test]
    fn rejects_non_handshake_records() {
        let mut record = client_hello(&[(0, b"a")]);
        record[0] = 23; // application data
        let error = read_server_names(&record).unwrap_err();
        assert!(matches!(error.kind(), Kind::Protocol(_)));
    }

    #[test]
    fn rejects_other_handshake_messages() {
        let mut record = client_hello(&[(0, b"a")]);
        record[5] = 2; // ServerHello
        assert!(read_server_names(&record).is_err());
    }

    #[test]
    fn rejects_truncated_records() {
        let record = client_hello(&[(0, b"shard0.example.com")]);
        for len in 0..record.len() {
            assert!(read_server_names(&record[..len]).is_err());
        }
    }

    #[test]
    fn rejects_duplicate_entries() {
        let record = client_hello(&[(0, b"a.example.com"), (0, b"b.example.com")]);
        let error = read_server_names(&record).unwrap_err();
        assert!(matches!(
            error.kind(),
            Kind::Protocol("duplicate server name entry")
        ));
    }

    #[test]
    fn never_panics_on_garbage() {
        bolero::check!().with_type::<Vec<u8>>().for_each(|record| {
            let _ = read_server_names(record);
        });
    }
}
