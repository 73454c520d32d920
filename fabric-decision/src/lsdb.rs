//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};

use fabric_utils::adjacency::AdjacencyDatabase;
use fabric_utils::kv::{self, Publication};
use fabric_utils::prefix::PrefixEntry;
use ipnetwork::IpNetwork;

use crate::debug::Debug;
use crate::error::Error;

// Dense node index; nodes are interned on first sight and keep their index
// for the lifetime of the instance so SPF runs on array offsets.
pub type NodeId = usize;

#[derive(Debug)]
pub struct NodeEntry {
    pub db: AdjacencyDatabase,
    // Version of the `adj:` key the database came from.
    pub version: i64,
}

// Link-state database of one area.
#[derive(Debug, Default)]
pub struct LinkState {
    area: String,
    names: Vec<String>,
    ids: HashMap<String, NodeId>,
    nodes: Vec<Option<NodeEntry>>,
    // prefix -> originating node -> advertisement.
    pub prefixes: BTreeMap<IpNetwork, BTreeMap<String, PrefixEntry>>,
    // Versions of the accepted `prefix:` keys.
    prefix_versions: HashMap<String, i64>,
}

// ===== impl LinkState =====

impl LinkState {
    pub fn new(area: String) -> LinkState {
        LinkState {
            area,
            ..Default::default()
        }
    }

    // Interns a node name into a dense id.
    pub fn intern(&mut self, name: &str) -> NodeId {
        match self.ids.get(name) {
            Some(id) => *id,
            None => {
                let id = self.names.len();
                self.names.push(name.to_owned());
                self.ids.insert(name.to_owned(), id);
                self.nodes.push(None);
                id
            }
        }
    }

    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.names[id]
    }

    pub fn node(&self, id: NodeId) -> Option<&AdjacencyDatabase> {
        self.nodes.get(id)?.as_ref().map(|entry| &entry.db)
    }

    pub fn node_count(&self) -> usize {
        self.names.len()
    }

    // Ingests one publication; returns whether anything material changed,
    // i.e. whether an SPF run is warranted.
    pub fn apply_publication(&mut self, publication: &Publication) -> bool {
        let mut changed = false;

        for (key, value) in &publication.key_vals {
            // Hash-only refreshes carry no state.
            let Some(data) = &value.data else {
                continue;
            };

            if let Some(node) = kv::parse_adj_key(key) {
                let mut buf = data.clone();
                let db = match AdjacencyDatabase::decode(&mut buf) {
                    Ok(db) => db,
                    Err(error) => {
                        Error::AdjDbDecodeError(key.clone(), error).log();
                        continue;
                    }
                };
                if db.node != node {
                    Error::KeyNodeMismatch(key.clone(), db.node).log();
                    continue;
                }

                // Stale versions are dropped.
                let id = self.intern(node);
                if let Some(entry) = &self.nodes[id]
                    && entry.version >= value.version
                {
                    continue;
                }
                Debug::AdjDbUpdate(&self.area, node, db.adjacencies.len())
                    .log();
                self.nodes[id] = Some(NodeEntry {
                    db,
                    version: value.version,
                });
                changed = true;
            } else if let Some((node, _area, prefix)) =
                kv::parse_prefix_key(key)
            {
                let mut buf = data.clone();
                let entry = match PrefixEntry::decode(&mut buf) {
                    Ok(entry) => entry,
                    Err(error) => {
                        Error::PrefixDecodeError(key.clone(), error).log();
                        continue;
                    }
                };

                if self
                    .prefix_versions
                    .get(key)
                    .is_some_and(|version| *version >= value.version)
                {
                    continue;
                }
                Debug::PrefixUpdate(&self.area, key).log();
                self.prefix_versions.insert(key.clone(), value.version);
                self.prefixes
                    .entry(prefix)
                    .or_default()
                    .insert(node.to_owned(), entry);
                changed = true;
            }
        }

        for key in &publication.expired_keys {
            if let Some(node) = kv::parse_adj_key(key) {
                if let Some(id) = self.id(node)
                    && self.nodes[id].take().is_some()
                {
                    Debug::AdjDbRemove(&self.area, node).log();
                    changed = true;
                }
            } else if let Some((node, _area, prefix)) =
                kv::parse_prefix_key(key)
            {
                self.prefix_versions.remove(key);
                if let Some(by_node) = self.prefixes.get_mut(&prefix) {
                    if by_node.remove(node).is_some() {
                        changed = true;
                    }
                    if by_node.is_empty() {
                        self.prefixes.remove(&prefix);
                    }
                }
            }
        }

        changed
    }

    // Returns whether the adjacency has a mutual reverse adjacency, which
    // is required before an edge may be used by SPF.
    pub fn is_bidirectional(
        &self,
        node: &str,
        adj: &fabric_utils::adjacency::Adjacency,
    ) -> bool {
        self.id(&adj.other_node)
            .and_then(|id| self.node(id))
            .is_some_and(|other_db| {
                other_db.adjacencies.iter().any(|reverse| {
                    reverse.other_node == node
                        && reverse.local_ifname == adj.remote_ifname
                        && reverse.remote_ifname == adj.local_ifname
                })
            })
    }
}
