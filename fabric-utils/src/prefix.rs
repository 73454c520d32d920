//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::Responder;
use crate::bytes::{BytesExt, BytesMutExt, DecodeError, DecodeResult};

// Origin of a prefix advertisement, in increasing numeric order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PrefixType {
    Loopback = 1,
    Config = 2,
    Bgp = 3,
    Rib = 4,
    Breeze = 5,
    Default = 6,
}

// How traffic to the prefix is forwarded.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum ForwardingType {
    #[default]
    Ip = 0,
    SrMpls = 1,
}

// Path computation algorithm requested by the advertisement.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum ForwardingAlgorithm {
    #[default]
    SpEcmp = 0,
    Ksp2EdEcmp = 1,
}

// Best-path selection metrics. Preferences compare higher-is-better,
// distance lower-is-better; see the `Ord` implementation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct PrefixMetrics {
    pub path_preference: i32,
    pub source_preference: i32,
    pub distance: i32,
}

// One prefix advertisement; value of a `prefix:<node>:<area>:...` key.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PrefixEntry {
    pub prefix: IpNetwork,
    pub prefix_type: PrefixType,
    pub forwarding_type: ForwardingType,
    pub forwarding_algorithm: ForwardingAlgorithm,
    pub metrics: PrefixMetrics,
    pub tags: BTreeSet<String>,
    // Areas the advertisement crossed, most recent last.
    pub area_stack: Vec<String>,
    // Minimum ECMP width required to program the route.
    pub min_nexthop: Option<u32>,
}

// Prefix-Manager commands.
#[derive(Debug)]
pub enum PrefixUpdateRequest {
    // Add or replace individual advertisements.
    Add {
        entries: Vec<PrefixEntry>,
        dst_areas: Option<Vec<String>>,
    },
    // Withdraw individual advertisements.
    Withdraw {
        entries: Vec<PrefixEntry>,
    },
    // Withdraw every advertisement of the given type.
    WithdrawByType {
        prefix_type: PrefixType,
    },
    // Atomically replace all advertisements of the given type.
    SyncByType {
        prefix_type: PrefixType,
        entries: Vec<PrefixEntry>,
        dst_areas: Option<Vec<String>>,
    },
    // Dump the currently advertised (post-selection) entries.
    GetAdvertised {
        responder: Responder<Vec<PrefixEntry>>,
    },
}

// ===== impl PrefixType =====

impl TryFrom<u8> for PrefixType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<PrefixType, DecodeError> {
        match value {
            1 => Ok(PrefixType::Loopback),
            2 => Ok(PrefixType::Config),
            3 => Ok(PrefixType::Bgp),
            4 => Ok(PrefixType::Rib),
            5 => Ok(PrefixType::Breeze),
            6 => Ok(PrefixType::Default),
            _ => Err(DecodeError::InvalidEnumValue(value)),
        }
    }
}

// ===== impl PrefixMetrics =====

impl Ord for PrefixMetrics {
    fn cmp(&self, other: &PrefixMetrics) -> Ordering {
        self.path_preference
            .cmp(&other.path_preference)
            .then_with(|| self.source_preference.cmp(&other.source_preference))
            .then_with(|| other.distance.cmp(&self.distance))
    }
}

impl PartialOrd for PrefixMetrics {
    fn partial_cmp(&self, other: &PrefixMetrics) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for PrefixMetrics {
    fn default() -> PrefixMetrics {
        PrefixMetrics {
            path_preference: 1000,
            source_preference: 100,
            distance: 0,
        }
    }
}

// ===== impl PrefixEntry =====

impl PrefixEntry {
    pub fn new(prefix: IpNetwork, prefix_type: PrefixType) -> PrefixEntry {
        PrefixEntry {
            prefix,
            prefix_type,
            forwarding_type: Default::default(),
            forwarding_algorithm: Default::default(),
            metrics: Default::default(),
            tags: Default::default(),
            area_stack: Default::default(),
            min_nexthop: None,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_prefix(buf, &self.prefix);
        buf.put_u8(self.prefix_type as u8);
        buf.put_u8(self.forwarding_type as u8);
        buf.put_u8(self.forwarding_algorithm as u8);
        buf.put_i32(self.metrics.path_preference);
        buf.put_i32(self.metrics.source_preference);
        buf.put_i32(self.metrics.distance);
        buf.put_u16(self.tags.len() as u16);
        for tag in &self.tags {
            buf.put_string(tag);
        }
        buf.put_u16(self.area_stack.len() as u16);
        for area in &self.area_stack {
            buf.put_string(area);
        }
        match self.min_nexthop {
            Some(min) => {
                buf.put_u8(1);
                buf.put_u32(min);
            }
            None => buf.put_u8(0),
        }
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<PrefixEntry> {
        let prefix = decode_prefix(buf)?;
        let prefix_type = PrefixType::try_from(buf.try_get_u8()?)?;
        let forwarding_type = match buf.try_get_u8()? {
            0 => ForwardingType::Ip,
            1 => ForwardingType::SrMpls,
            value => return Err(DecodeError::InvalidEnumValue(value)),
        };
        let forwarding_algorithm = match buf.try_get_u8()? {
            0 => ForwardingAlgorithm::SpEcmp,
            1 => ForwardingAlgorithm::Ksp2EdEcmp,
            value => return Err(DecodeError::InvalidEnumValue(value)),
        };
        let metrics = PrefixMetrics {
            path_preference: buf.try_get_i32()?,
            source_preference: buf.try_get_i32()?,
            distance: buf.try_get_i32()?,
        };
        let mut tags = BTreeSet::new();
        for _ in 0..buf.try_get_u16()? {
            tags.insert(buf.try_get_string()?);
        }
        let mut area_stack = Vec::new();
        for _ in 0..buf.try_get_u16()? {
            area_stack.push(buf.try_get_string()?);
        }
        let min_nexthop = match buf.try_get_u8()? {
            0 => None,
            _ => Some(buf.try_get_u32()?),
        };
        Ok(PrefixEntry {
            prefix,
            prefix_type,
            forwarding_type,
            forwarding_algorithm,
            metrics,
            tags,
            area_stack,
            min_nexthop,
        })
    }

    // Encodes the entry into a standalone byte string.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

// ===== global functions =====

// Best selection over one prefix's advertisements: the winners are the
// entries whose metrics tuple is the lexicographic maximum. Ties are kept,
// in candidate order, so the caller can take the first winner as the
// representative — the lowest key of whatever table its candidates came
// from.
pub fn select_winners<'a>(
    candidates: &[&'a PrefixEntry],
) -> Vec<&'a PrefixEntry> {
    let best_metrics = candidates
        .iter()
        .map(|entry| entry.metrics)
        .max()
        .expect("empty candidate set");
    candidates
        .iter()
        .filter(|entry| entry.metrics == best_metrics)
        .copied()
        .collect()
}

// Forwarding type and algorithm across a winning set resolve to the most
// conservative (minimum) value.
pub fn resolve_forwarding(
    winners: &[&PrefixEntry],
) -> (ForwardingType, ForwardingAlgorithm) {
    (
        winners
            .iter()
            .map(|entry| entry.forwarding_type)
            .min()
            .unwrap_or_default(),
        winners
            .iter()
            .map(|entry| entry.forwarding_algorithm)
            .min()
            .unwrap_or_default(),
    )
}

// ===== helper functions =====

pub fn encode_prefix(buf: &mut BytesMut, prefix: &IpNetwork) {
    buf.put_ip(&prefix.ip());
    buf.put_u8(prefix.prefix());
}

pub fn decode_prefix(buf: &mut Bytes) -> DecodeResult<IpNetwork> {
    let addr = buf.try_get_ip()?;
    let plen = buf.try_get_u8()?;
    match addr {
        IpAddr::V4(addr) => ipnetwork::Ipv4Network::new(addr, plen)
            .map(IpNetwork::V4)
            .map_err(|_| DecodeError::InvalidPrefix),
        IpAddr::V6(addr) => ipnetwork::Ipv6Network::new(addr, plen)
            .map(IpNetwork::V6)
            .map_err(|_| DecodeError::InvalidPrefix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_ordering() {
        let m = |pp, sp, d| PrefixMetrics::new(pp, sp, d);

        // Higher path-preference wins regardless of the rest.
        assert!(m(2000, 0, 100) > m(1000, 900, 0));
        // Path-preference tie: higher source-preference wins.
        assert!(m(1000, 200, 50) > m(1000, 100, 0));
        // Both tied: lower distance wins.
        assert!(m(1000, 100, 3) > m(1000, 100, 4));
        assert_eq!(m(1000, 100, 4).cmp(&m(1000, 100, 4)), Ordering::Equal);
    }
}
