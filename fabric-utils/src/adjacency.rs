//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::bytes::{BytesExt, BytesMutExt, DecodeResult};
use crate::mpls::Label;

// One discovered adjacency, as advertised into the replicated store.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct Adjacency {
    // Neighbor node name.
    pub other_node: String,
    // Local and remote interface names.
    pub local_ifname: String,
    pub remote_ifname: String,
    // Neighbor transport addresses on the shared link.
    pub nexthop_v4: Option<Ipv4Addr>,
    pub nexthop_v6: Option<Ipv6Addr>,
    // Link metric after overrides; always positive.
    pub metric: u32,
    // Adjacency segment label (unset when segment routing is disabled).
    pub adj_label: Label,
    // Link-level drain.
    pub overloaded: bool,
    // Measured round-trip time, in microseconds.
    pub rtt_us: i64,
    // Time the adjacency came up, unix seconds.
    pub timestamp: i64,
    // Relative ECMP weight.
    pub weight: i64,
}

// Adjacency database of one node in one area; value of the `adj:<node>` key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AdjacencyDatabase {
    pub node: String,
    // Node segment label (unset when segment routing is disabled).
    pub node_label: Label,
    // Node-wide drain.
    pub overloaded: bool,
    pub adjacencies: Vec<Adjacency>,
    pub area: String,
    // Propagation trace markers, for convergence measurements.
    pub perf_events: Vec<PerfEvent>,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct PerfEvent {
    pub name: String,
    pub unix_ts_ms: i64,
}

// ===== impl Adjacency =====

impl Adjacency {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_string(&self.other_node);
        buf.put_string(&self.local_ifname);
        buf.put_string(&self.remote_ifname);
        match &self.nexthop_v4 {
            Some(addr) => {
                buf.put_u8(1);
                buf.put_ipv4(addr);
            }
            None => buf.put_u8(0),
        }
        match &self.nexthop_v6 {
            Some(addr) => {
                buf.put_u8(1);
                buf.put_ipv6(addr);
            }
            None => buf.put_u8(0),
        }
        buf.put_u32(self.metric);
        buf.put_u32(self.adj_label.get());
        buf.put_u8(self.overloaded.into());
        buf.put_i64(self.rtt_us);
        buf.put_i64(self.timestamp);
        buf.put_i64(self.weight);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Adjacency> {
        let other_node = buf.try_get_string()?;
        let local_ifname = buf.try_get_string()?;
        let remote_ifname = buf.try_get_string()?;
        let nexthop_v4 = match buf.try_get_u8()? {
            0 => None,
            _ => Some(buf.try_get_ipv4()?),
        };
        let nexthop_v6 = match buf.try_get_u8()? {
            0 => None,
            _ => Some(buf.try_get_ipv6()?),
        };
        let metric = buf.try_get_u32()?;
        let adj_label = Label::new(buf.try_get_u32()? & Label::VALUE_MASK);
        let overloaded = buf.try_get_u8()? != 0;
        let rtt_us = buf.try_get_i64()?;
        let timestamp = buf.try_get_i64()?;
        let weight = buf.try_get_i64()?;
        Ok(Adjacency {
            other_node,
            local_ifname,
            remote_ifname,
            nexthop_v4,
            nexthop_v6,
            metric,
            adj_label,
            overloaded,
            rtt_us,
            timestamp,
            weight,
        })
    }
}

// ===== impl AdjacencyDatabase =====

impl AdjacencyDatabase {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_string(&self.node);
        buf.put_u32(self.node_label.get());
        buf.put_u8(self.overloaded.into());
        buf.put_u16(self.adjacencies.len() as u16);
        for adj in &self.adjacencies {
            adj.encode(buf);
        }
        buf.put_string(&self.area);
        buf.put_u16(self.perf_events.len() as u16);
        for event in &self.perf_events {
            buf.put_string(&event.name);
            buf.put_i64(event.unix_ts_ms);
        }
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<AdjacencyDatabase> {
        let node = buf.try_get_string()?;
        let node_label = Label::new(buf.try_get_u32()? & Label::VALUE_MASK);
        let overloaded = buf.try_get_u8()? != 0;
        let mut adjacencies = Vec::new();
        for _ in 0..buf.try_get_u16()? {
            adjacencies.push(Adjacency::decode(buf)?);
        }
        let area = buf.try_get_string()?;
        let mut perf_events = Vec::new();
        for _ in 0..buf.try_get_u16()? {
            let name = buf.try_get_string()?;
            let unix_ts_ms = buf.try_get_i64()?;
            perf_events.push(PerfEvent { name, unix_ts_ms });
        }
        Ok(AdjacencyDatabase {
            node,
            node_label,
            overloaded,
            adjacencies,
            area,
            perf_events,
        })
    }

    // Encodes the database into a standalone byte string.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}
