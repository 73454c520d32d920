//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::Responder;
use crate::bytes::{BytesExt, BytesMutExt, DecodeResult};

// TTL sentinel meaning "never expires".
pub const TTL_INFINITY: i64 = i64::MAX;

// Reserved key markers.
pub const ADJ_DB_MARKER: &str = "adj:";
pub const PREFIX_DB_MARKER: &str = "prefix:";

// Replicated store entry.
//
// A Value without `data` is a ttl refresh: it only extends the lifetime of an
// existing entry and must carry the identity (version, originator, hash) of
// the entry it refreshes.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Value {
    // Writer-assigned monotone version.
    pub version: i64,
    // Name of the node that originated this value.
    pub originator: String,
    // Opaque payload.
    pub data: Option<Bytes>,
    // Time to live in milliseconds; TTL_INFINITY disables expiry.
    pub ttl: i64,
    // Monotone version of the ttl refresh.
    pub ttl_version: i64,
    // Deterministic digest of (version, originator, data).
    pub hash: i64,
}

// The atomic unit of flooded state.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Publication {
    pub area: String,
    pub key_vals: BTreeMap<String, Value>,
    pub expired_keys: Vec<String>,
    // Loop-prevention path: ids of the nodes this publication has traversed.
    pub node_ids: Option<Vec<String>>,
    // Spanning-tree flood restriction, when enabled.
    pub flood_root_id: Option<String>,
}

// Transport endpoint of a KV-Store peer.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct PeerSpec {
    pub addr: SocketAddr,
}

// Filters applied to a full dump of the store.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct KeyDumpParams {
    // Only keys starting with this prefix.
    pub prefix: Option<String>,
    // Only values originated by one of these nodes (empty set means all).
    pub originators: BTreeSet<String>,
}

// Emitted once per area when the first peer finishes initial sync.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct KvStoreSyncEvent {
    pub area: String,
}

// Store counters, surfaced through the command interface.
#[derive(Clone, Copy, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct KvCounters {
    pub keys: u64,
    pub merge_wins: u64,
    pub merge_losses: u64,
    pub ttl_refreshes: u64,
    pub expired_keys: u64,
    pub flood_tx: u64,
    pub flood_rx: u64,
    pub loops_prevented: u64,
    pub protocol_errors: u64,
}

// Commands accepted by the KV-Store, normally over its request queue.
#[derive(Debug)]
pub enum KvRequest {
    // Merge the given key-values into the area store and flood the winners.
    SetKeys {
        area: String,
        key_vals: BTreeMap<String, Value>,
        node_ids: Option<Vec<String>>,
    },
    // Stop refreshing a self-originated key, letting it expire everywhere.
    UnsetKey {
        area: String,
        key: String,
    },
    // Point lookup.
    GetKey {
        area: String,
        key: String,
        responder: Responder<Option<Value>>,
    },
    // Filtered full dump.
    DumpAll {
        area: String,
        params: KeyDumpParams,
        responder: Responder<BTreeMap<String, Value>>,
    },
    // Hash-only dump (values with no data), used for incremental sync.
    DumpHashes {
        area: String,
        prefix: Option<String>,
        responder: Responder<BTreeMap<String, Value>>,
    },
    // Adjust the area peer table.
    PeerUpdate {
        area: String,
        peers_to_add: BTreeMap<String, PeerSpec>,
        peers_to_del: Vec<String>,
    },
    // Counters snapshot, aggregated over all areas.
    Counters {
        responder: Responder<KvCounters>,
    },
}

// ===== impl Value =====

impl Value {
    pub fn new(
        version: i64,
        originator: String,
        data: Bytes,
        ttl: i64,
        ttl_version: i64,
    ) -> Value {
        let hash = Value::hash_of(version, &originator, Some(&data));
        Value {
            version,
            originator,
            data: Some(data),
            ttl,
            ttl_version,
            hash,
        }
    }

    // Deterministic FNV-1a-64 digest over (version, originator, data).
    //
    // The digest is part of the wire contract: all nodes must compute the
    // same value for the same tuple.
    pub fn hash_of(version: i64, originator: &str, data: Option<&Bytes>) -> i64 {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x00000100000001b3;

        let mut hash = FNV_OFFSET;
        let mut feed = |bytes: &[u8]| {
            for byte in bytes {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        };
        feed(&version.to_be_bytes());
        feed(&(originator.len() as u16).to_be_bytes());
        feed(originator.as_bytes());
        match data {
            Some(data) => {
                feed(&[1]);
                feed(data);
            }
            None => feed(&[0]),
        }
        hash as i64
    }

    // Returns whether the value is a ttl refresh (no payload).
    pub fn is_ttl_refresh(&self) -> bool {
        self.data.is_none()
    }

    // Returns a copy with the data stripped, suitable for hash dumps.
    pub fn to_hash_only(&self) -> Value {
        Value {
            data: None,
            ..self.clone()
        }
    }

    // Merge preference order: higher version wins, then higher originator,
    // then higher hash. `Ordering::Equal` means the two values carry the
    // same identity.
    pub fn merge_rank(&self, other: &Value) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.originator.cmp(&other.originator))
            .then_with(|| self.hash.cmp(&other.hash))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64(self.version);
        buf.put_string(&self.originator);
        match &self.data {
            Some(data) => {
                buf.put_u8(1);
                buf.put_blob(data);
            }
            None => buf.put_u8(0),
        }
        buf.put_i64(self.ttl);
        buf.put_i64(self.ttl_version);
        buf.put_i64(self.hash);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Value> {
        let version = buf.try_get_i64()?;
        let originator = buf.try_get_string()?;
        let data = match buf.try_get_u8()? {
            0 => None,
            _ => Some(buf.try_get_blob()?),
        };
        let ttl = buf.try_get_i64()?;
        let ttl_version = buf.try_get_i64()?;
        let hash = buf.try_get_i64()?;
        Ok(Value {
            version,
            originator,
            data,
            ttl,
            ttl_version,
            hash,
        })
    }
}

// ===== impl Publication =====

impl Publication {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_string(&self.area);
        buf.put_u16(self.key_vals.len() as u16);
        for (key, value) in &self.key_vals {
            buf.put_string(key);
            value.encode(buf);
        }
        buf.put_u16(self.expired_keys.len() as u16);
        for key in &self.expired_keys {
            buf.put_string(key);
        }
        match &self.node_ids {
            Some(node_ids) => {
                buf.put_u8(1);
                buf.put_u16(node_ids.len() as u16);
                for node_id in node_ids {
                    buf.put_string(node_id);
                }
            }
            None => buf.put_u8(0),
        }
        match &self.flood_root_id {
            Some(root) => {
                buf.put_u8(1);
                buf.put_string(root);
            }
            None => buf.put_u8(0),
        }
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Publication> {
        let area = buf.try_get_string()?;
        let mut key_vals = BTreeMap::new();
        for _ in 0..buf.try_get_u16()? {
            let key = buf.try_get_string()?;
            let value = Value::decode(buf)?;
            key_vals.insert(key, value);
        }
        let mut expired_keys = Vec::new();
        for _ in 0..buf.try_get_u16()? {
            expired_keys.push(buf.try_get_string()?);
        }
        let node_ids = match buf.try_get_u8()? {
            0 => None,
            _ => {
                let mut node_ids = Vec::new();
                for _ in 0..buf.try_get_u16()? {
                    node_ids.push(buf.try_get_string()?);
                }
                Some(node_ids)
            }
        };
        let flood_root_id = match buf.try_get_u8()? {
            0 => None,
            _ => Some(buf.try_get_string()?),
        };
        Ok(Publication {
            area,
            key_vals,
            expired_keys,
            node_ids,
            flood_root_id,
        })
    }
}

// ===== key namespace =====

// Returns whether the string is usable as a node name.
pub fn is_valid_node_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

// Builds the adjacency database key of a node.
pub fn adj_key(node: &str) -> String {
    format!("{}{}", ADJ_DB_MARKER, node)
}

// Recovers the node name from an adjacency database key.
pub fn parse_adj_key(key: &str) -> Option<&str> {
    key.strip_prefix(ADJ_DB_MARKER)
        .filter(|node| is_valid_node_name(node))
}

// Builds the per-prefix key: `prefix:<node>:<area>:<family>/<len>:<addr>`.
pub fn prefix_key(
    node: &str,
    area: &str,
    prefix: &ipnetwork::IpNetwork,
) -> String {
    let family = match prefix {
        ipnetwork::IpNetwork::V4(_) => "v4",
        ipnetwork::IpNetwork::V6(_) => "v6",
    };
    format!(
        "{}{}:{}:{}/{}:{}",
        PREFIX_DB_MARKER,
        node,
        area,
        family,
        prefix.prefix(),
        prefix.ip()
    )
}

// Recovers (node, area, prefix) from a per-prefix key.
pub fn parse_prefix_key(
    key: &str,
) -> Option<(&str, &str, ipnetwork::IpNetwork)> {
    let rem = key.strip_prefix(PREFIX_DB_MARKER)?;
    let (node, rem) = rem.split_once(':')?;
    let (area, rem) = rem.split_once(':')?;
    if !is_valid_node_name(node) {
        return None;
    }
    let (family_len, addr) = rem.split_once(':')?;
    let (_family, len) = family_len.split_once('/')?;
    let prefix = format!("{}/{}", addr, len).parse().ok()?;
    Some((node, area, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_identity_sensitive() {
        let data = Bytes::from_static(b"payload");
        let h1 = Value::hash_of(7, "node-a", Some(&data));
        let h2 = Value::hash_of(7, "node-a", Some(&data));
        assert_eq!(h1, h2);
        assert_ne!(h1, Value::hash_of(8, "node-a", Some(&data)));
        assert_ne!(h1, Value::hash_of(7, "node-b", Some(&data)));
        assert_ne!(h1, Value::hash_of(7, "node-a", None));
    }

    #[test]
    fn merge_rank_ordering() {
        let v = |version, originator: &str, payload: &'static [u8]| {
            Value::new(
                version,
                originator.to_owned(),
                Bytes::from_static(payload),
                TTL_INFINITY,
                1,
            )
        };

        // Higher version wins.
        assert_eq!(
            v(2, "a", b"x").merge_rank(&v(1, "z", b"y")),
            Ordering::Greater
        );
        // Version tie: higher originator wins.
        assert_eq!(v(1, "b", b"x").merge_rank(&v(1, "a", b"y")), Ordering::Greater);
        // Full tie: equal.
        assert_eq!(v(3, "a", b"x").merge_rank(&v(3, "a", b"x")), Ordering::Equal);
    }

    #[test]
    fn prefix_key_round_trip() {
        let prefix: ipnetwork::IpNetwork = "2001:db8::1/128".parse().unwrap();
        let key = prefix_key("node-1", "area0", &prefix);
        assert_eq!(key, "prefix:node-1:area0:v6/128:2001:db8::1");
        let (node, area, parsed) = parse_prefix_key(&key).unwrap();
        assert_eq!(node, "node-1");
        assert_eq!(area, "area0");
        assert_eq!(parsed, prefix);

        assert!(parse_prefix_key("prefix:bad").is_none());
        assert_eq!(parse_adj_key("adj:node-1"), Some("node-1"));
        assert!(parse_adj_key("adj:no:pe").is_none());
    }
}
