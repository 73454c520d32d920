//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::LazyLock as Lazy;

use bytes::{Bytes, BytesMut};
use const_addrs::{ip6, net6};
use fabric_utils::adjacency::{Adjacency, AdjacencyDatabase};
use fabric_utils::kv::{Publication, TTL_INFINITY, Value};
use fabric_utils::mpls::Label;
use fabric_utils::prefix::{PrefixEntry, PrefixType};

//
// Test vectors.
//

static VALUE1: Lazy<(Vec<u8>, Value)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x06, 0x6e,
            0x6f, 0x64, 0x65, 0x2d, 0x61, 0x01, 0x00, 0x00, 0x00, 0x02, 0x68,
            0x69, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0e, 0x16, 0x60, 0xc8, 0xa8,
            0x6e, 0x3c, 0x3a,
        ],
        Value::new(
            1,
            "node-a".to_owned(),
            Bytes::from_static(b"hi"),
            TTL_INFINITY,
            0,
        ),
    )
});

static PUB1: Lazy<(Vec<u8>, Publication)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x30, 0x00, 0x01, 0x00, 0x0a, 0x61, 0x64, 0x6a, 0x3a,
            0x6e, 0x6f, 0x64, 0x65, 0x2d, 0x61, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x01, 0x00, 0x06, 0x6e, 0x6f, 0x64, 0x65, 0x2d, 0x61,
            0x01, 0x00, 0x00, 0x00, 0x02, 0x68, 0x69, 0x7f, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x0e, 0x16, 0x60, 0xc8, 0xa8, 0x6e, 0x3c, 0x3a, 0x00, 0x01,
            0x00, 0x0a, 0x61, 0x64, 0x6a, 0x3a, 0x6e, 0x6f, 0x64, 0x65, 0x2d,
            0x62, 0x01, 0x00, 0x01, 0x00, 0x06, 0x6e, 0x6f, 0x64, 0x65, 0x2d,
            0x61, 0x00,
        ],
        Publication {
            area: "0".to_owned(),
            key_vals: BTreeMap::from([(
                "adj:node-a".to_owned(),
                Value::new(
                    1,
                    "node-a".to_owned(),
                    Bytes::from_static(b"hi"),
                    TTL_INFINITY,
                    0,
                ),
            )]),
            expired_keys: vec!["adj:node-b".to_owned()],
            node_ids: Some(vec!["node-a".to_owned()]),
            flood_root_id: None,
        },
    )
});

static ADJDB1: Lazy<(Vec<u8>, AdjacencyDatabase)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x06, 0x6e, 0x6f, 0x64, 0x65, 0x2d, 0x61, 0x00, 0x00, 0x00,
            0x65, 0x00, 0x00, 0x01, 0x00, 0x06, 0x6e, 0x6f, 0x64, 0x65, 0x2d,
            0x62, 0x00, 0x04, 0x65, 0x74, 0x68, 0x30, 0x00, 0x04, 0x65, 0x74,
            0x68, 0x31, 0x00, 0x01, 0xfe, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00,
            0x00, 0x01, 0x00, 0x00, 0xc3, 0x51, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x00, 0x65, 0x53, 0xf1,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01,
            0x30, 0x00, 0x00,
        ],
        AdjacencyDatabase {
            node: "node-a".to_owned(),
            node_label: Label::new(101),
            overloaded: false,
            adjacencies: vec![Adjacency::new(
                "node-b".to_owned(),
                "eth0".to_owned(),
                "eth1".to_owned(),
                None,
                Some(ip6!("fe80::2")),
                1,
                Label::new(50001),
                false,
                100,
                1700000000,
                1,
            )],
            area: "0".to_owned(),
            perf_events: vec![],
        },
    )
});

static PREFIX1: Lazy<(Vec<u8>, PrefixEntry)> = Lazy::new(|| {
    (
        vec![
            0x06, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x80, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x03, 0xe8, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x00, 0x02, 0x6c, 0x6f, 0x00, 0x00, 0x00,
        ],
        {
            let mut entry = PrefixEntry::new(
                net6!("2001:db8::1/128").into(),
                PrefixType::Loopback,
            );
            entry.tags.insert("lo".to_owned());
            entry
        },
    )
});

//
// Tests.
//

#[test]
fn value_codec() {
    let (ref bytes, ref value) = *VALUE1;

    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    assert_eq!(buf.as_ref(), bytes.as_slice());

    let mut buf = Bytes::copy_from_slice(bytes);
    assert_eq!(&Value::decode(&mut buf).unwrap(), value);
}

#[test]
fn publication_codec() {
    let (ref bytes, ref publication) = *PUB1;

    let mut buf = BytesMut::new();
    publication.encode(&mut buf);
    assert_eq!(buf.as_ref(), bytes.as_slice());

    let mut buf = Bytes::copy_from_slice(bytes);
    assert_eq!(&Publication::decode(&mut buf).unwrap(), publication);
}

#[test]
fn adjacency_database_codec() {
    let (ref bytes, ref adjdb) = *ADJDB1;

    let mut buf = BytesMut::new();
    adjdb.encode(&mut buf);
    assert_eq!(buf.as_ref(), bytes.as_slice());

    let mut buf = Bytes::copy_from_slice(bytes);
    assert_eq!(&AdjacencyDatabase::decode(&mut buf).unwrap(), adjdb);
}

#[test]
fn prefix_entry_codec() {
    let (ref bytes, ref entry) = *PREFIX1;

    let mut buf = BytesMut::new();
    entry.encode(&mut buf);
    assert_eq!(buf.as_ref(), bytes.as_slice());

    let mut buf = Bytes::copy_from_slice(bytes);
    assert_eq!(&PrefixEntry::decode(&mut buf).unwrap(), entry);
}

#[test]
fn truncated_input_is_rejected() {
    let (ref bytes, _) = *ADJDB1;
    for len in 0..bytes.len() {
        let mut buf = Bytes::copy_from_slice(&bytes[..len]);
        assert!(AdjacencyDatabase::decode(&mut buf).is_err());
    }
}
