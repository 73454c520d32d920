//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use fabric_utils::kv::PeerSpec;
use fabric_utils::spark::NeighborInfo;
use tokio::time::Instant;

use crate::interface::Interface;

// Adjacency identity: one per (remote node, local interface) pair.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct AdjKey {
    pub node: String,
    pub local_ifname: String,
}

// One discovered neighbor session.
#[derive(Debug)]
pub struct Neighbor {
    pub info: NeighborInfo,
    // Neighbor announced a graceful restart: its adjacency stays
    // advertised, but it is not used for KV peering.
    pub restarting: bool,
    // Time the adjacency came up, unix seconds.
    pub up_since: i64,
}

// ===== impl AdjKey =====

impl AdjKey {
    pub fn of(info: &NeighborInfo) -> AdjKey {
        AdjKey {
            node: info.node.clone(),
            local_ifname: info.local_ifname.clone(),
        }
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub fn new(info: NeighborInfo, up_since: i64) -> Neighbor {
        Neighbor {
            info,
            restarting: false,
            up_since,
        }
    }

    // Preferred transport address for the KV session.
    pub fn transport_addr(&self) -> Option<SocketAddr> {
        let addr = match (self.info.v6_addr, self.info.v4_addr) {
            (Some(v6), _) => IpAddr::V6(v6),
            (None, Some(v4)) => IpAddr::V4(v4),
            (None, None) => return None,
        };
        Some(SocketAddr::new(addr, self.info.kv_port))
    }
}

// ===== global functions =====

// Derives the KV peer set of one area from the current adjacencies.
//
// Adjacencies of restarting neighbors and of inactive interfaces are
// skipped. When parallel links exist to the same node, the adjacency with
// the lexicographically smallest local interface name is selected, which
// keeps exactly one KV session per (area, node) and makes the choice
// deterministic under churn.
pub(crate) fn derive_peers(
    neighbors: &BTreeMap<AdjKey, Neighbor>,
    area: &str,
    interfaces: &BTreeMap<String, Interface>,
    now: Instant,
) -> BTreeMap<String, PeerSpec> {
    let mut peers = BTreeMap::new();

    // The map iterates in (node, local_ifname) order, so the first usable
    // adjacency per node is the smallest-interface one.
    for (key, neighbor) in neighbors {
        if neighbor.info.area != area || neighbor.restarting {
            continue;
        }
        if !interfaces
            .get(&key.local_ifname)
            .is_some_and(|iface| iface.is_active(now))
        {
            continue;
        }
        let Some(addr) = neighbor.transport_addr() else {
            continue;
        };
        peers
            .entry(key.node.clone())
            .or_insert_with(|| PeerSpec::new(addr));
    }

    peers
}
