//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

// Neighbor-discovery event, as reported by the beaconing protocol.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum SparkNeighborEvent {
    // Two-way adjacency established.
    Up(NeighborInfo),
    // Neighbor lost (hold timer expiry or explicit down).
    Down(NeighborInfo),
    // Neighbor announced a graceful restart.
    Restarting(NeighborInfo),
    // Neighbor came back from a graceful restart.
    Restarted(NeighborInfo),
    // Measured round-trip time changed.
    RttChange(NeighborInfo),
}

// Discovered neighbor attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NeighborInfo {
    // Neighbor node name.
    pub node: String,
    // Area the adjacency was discovered in.
    pub area: String,
    // Local and remote interface names.
    pub local_ifname: String,
    pub remote_ifname: String,
    // Neighbor transport addresses on the shared link.
    pub v4_addr: Option<Ipv4Addr>,
    pub v6_addr: Option<Ipv6Addr>,
    // Neighbor KV-Store RPC port.
    pub kv_port: u16,
    // Measured round-trip time, in microseconds.
    pub rtt_us: i64,
}

// ===== impl SparkNeighborEvent =====

impl SparkNeighborEvent {
    // Returns the neighbor information carried by the event.
    pub fn info(&self) -> &NeighborInfo {
        match self {
            SparkNeighborEvent::Up(info)
            | SparkNeighborEvent::Down(info)
            | SparkNeighborEvent::Restarting(info)
            | SparkNeighborEvent::Restarted(info)
            | SparkNeighborEvent::RttChange(info) => info,
        }
    }
}
