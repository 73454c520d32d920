//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use fabric_utils::kv::{Publication, Value};

use crate::debug::Debug;
use crate::instance::KvArea;
use crate::peer::PeerState;

// ===== global functions =====

// Floods a set of accepted changes to the area's peers.
//
// The outgoing publication carries the traversal list of the triggering
// publication plus the local node, so receivers can drop anything they have
// already seen. Split horizon excludes the ingress peer. When a flood root
// is configured, forwarding is restricted to the star rooted at it; if the
// root is unusable the code fails closed to split-horizon full mesh.
pub(crate) fn flood(
    node_id: &str,
    area: &mut KvArea,
    key_vals: BTreeMap<String, Value>,
    expired_keys: Vec<String>,
    from_peer: Option<&str>,
    traversal: Option<Vec<String>>,
) {
    let mut node_ids = traversal.unwrap_or_default();
    if !node_ids.iter().any(|id| id == node_id) {
        node_ids.push(node_id.to_owned());
    }

    let publication = Publication {
        area: area.config.id.clone(),
        key_vals,
        expired_keys,
        node_ids: Some(node_ids),
        flood_root_id: area.config.flood_root.clone(),
    };

    let mut flooded = 0;
    for peer in eligible_peers(node_id, area, from_peer) {
        if peer.enqueue_flood(publication.clone()) {
            flooded += 1;
        }
    }

    area.store.counters.flood_tx += flooded as u64;
    Debug::FloodTx(&area.config.id, flooded, publication.key_vals.len())
        .log();
}

// ===== helper functions =====

// Selects the peers a publication is forwarded to.
fn eligible_peers<'a>(
    node_id: &str,
    area: &'a KvArea,
    from_peer: Option<&str>,
) -> impl Iterator<Item = &'a crate::peer::KvPeer> {
    // Restrict to the spanning star when a flood root is configured and
    // usable from this node.
    let restrict_to_root = match &area.config.flood_root {
        // The root itself forwards to everyone.
        Some(root) if root == node_id => None,
        Some(root) => {
            match area
                .peers
                .get(root)
                .filter(|peer| peer.state == PeerState::Initialized)
            {
                Some(_) => Some(root.clone()),
                // Root not reachable as a peer: fall back to full mesh.
                None => None,
            }
        }
        None => None,
    };

    let from_peer = from_peer.map(str::to_owned);
    area.peers
        .values()
        .filter(|peer| peer.state == PeerState::Initialized)
        .filter(move |peer| match &from_peer {
            Some(from_peer) => peer.name != *from_peer,
            None => true,
        })
        .filter(move |peer| match &restrict_to_root {
            Some(root) => peer.name == *root,
            None => true,
        })
}
