//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;

use fabric_utils::bus::{Bus, BusReceiver};
use fabric_utils::kv::{
    KvCounters, KvRequest, KvStoreSyncEvent, PeerSpec, Publication,
};
use fabric_utils::{UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::debug::Debug;
use crate::error::Error;
use crate::peer::{KvPeer, PeerState};
use crate::rpc::{PeerRpc, SyncResponse};
use crate::store::AreaStore;
use crate::tasks;
use crate::tasks::messages::ProtocolInputMsg;

// Per-area configuration.
#[derive(Clone, Debug, Default)]
pub struct KvAreaConfig {
    pub id: String,
    // Accepted key prefixes; empty means no filter.
    pub key_filters: Vec<String>,
    // Spanning-star flood optimization; None selects split-horizon full
    // mesh.
    pub flood_root: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct KvStoreConfig {
    pub node_id: String,
    pub areas: Vec<KvAreaConfig>,
}

// Per-area runtime state.
#[derive(Debug)]
pub struct KvArea {
    pub config: KvAreaConfig,
    pub store: AreaStore,
    pub peers: BTreeMap<String, KvPeer>,
    // Set once the first peer completes its initial sync.
    pub initial_sync_done: bool,
    // Combined expiry/refresh timer, armed at the nearest deadline.
    pub timer: Option<fabric_utils::task::TimeoutTask>,
}

// KV-Store instance: one event loop owning every area store.
pub struct KvStore {
    pub config: KvStoreConfig,
    pub areas: BTreeMap<String, KvArea>,
    rpc: Arc<dyn PeerRpc>,
    // Handle timer/child tasks use to feed events back into the loop.
    proto_tx: UnboundedSender<ProtocolInputMsg>,
    // Local subscriber fanout.
    publications: Bus<Publication>,
    sync_events: Bus<KvStoreSyncEvent>,
}

// ===== impl KvStore =====

impl KvStore {
    pub fn new(
        config: KvStoreConfig,
        rpc: Arc<dyn PeerRpc>,
    ) -> (KvStore, UnboundedReceiver<ProtocolInputMsg>) {
        let (proto_tx, proto_rx) = mpsc::unbounded_channel();
        let areas = config
            .areas
            .iter()
            .map(|area_config| {
                let store = AreaStore::new(
                    config.node_id.clone(),
                    area_config.key_filters.clone(),
                );
                let area = KvArea {
                    config: area_config.clone(),
                    store,
                    peers: Default::default(),
                    initial_sync_done: false,
                    timer: None,
                };
                (area_config.id.clone(), area)
            })
            .collect();
        let store = KvStore {
            config,
            areas,
            rpc,
            proto_tx,
            publications: Bus::new(),
            sync_events: Bus::new(),
        };
        (store, proto_rx)
    }

    /// Returns the sender used to inject peer-ingress and timer messages.
    pub fn proto_tx(&self) -> UnboundedSender<ProtocolInputMsg> {
        self.proto_tx.clone()
    }

    /// Attaches a subscriber to the publication stream.
    pub fn subscribe_publications(&mut self) -> BusReceiver<Publication> {
        self.publications.subscribe()
    }

    /// Attaches a subscriber to the per-area initial-sync events.
    pub fn subscribe_sync_events(&mut self) -> BusReceiver<KvStoreSyncEvent> {
        self.sync_events.subscribe()
    }

    /// Runs the event loop until both input queues are closed.
    pub async fn run(
        mut self,
        mut requests: UnboundedReceiver<KvRequest>,
        mut proto_rx: UnboundedReceiver<ProtocolInputMsg>,
    ) {
        loop {
            tokio::select! {
                msg = requests.recv() => match msg {
                    Some(msg) => self.process_request(msg),
                    // Request queue closed: drain local work and exit.
                    None => break,
                },
                Some(msg) = proto_rx.recv() => {
                    self.process_protocol_msg(msg);
                }
            }
        }
    }

    // ===== request processing =====

    pub fn process_request(&mut self, request: KvRequest) {
        match request {
            KvRequest::SetKeys {
                area,
                key_vals,
                node_ids,
            } => {
                self.apply_key_vals(&area, key_vals, node_ids, None);
            }
            KvRequest::UnsetKey { area, key } => {
                if let Some(area) = self.areas.get_mut(&area) {
                    area.store.unset_key(&key);
                }
            }
            KvRequest::GetKey {
                area,
                key,
                responder,
            } => {
                let value = self
                    .areas
                    .get(&area)
                    .and_then(|area| area.store.get(&key))
                    .cloned();
                let _ = responder.send(value);
            }
            KvRequest::DumpAll {
                area,
                params,
                responder,
            } => {
                let dump = self
                    .areas
                    .get(&area)
                    .map(|area| area.store.dump_all(&params))
                    .unwrap_or_default();
                let _ = responder.send(dump);
            }
            KvRequest::DumpHashes {
                area,
                prefix,
                responder,
            } => {
                let dump = self
                    .areas
                    .get(&area)
                    .map(|area| area.store.dump_hashes(prefix.as_deref()))
                    .unwrap_or_default();
                let _ = responder.send(dump);
            }
            KvRequest::PeerUpdate {
                area,
                peers_to_add,
                peers_to_del,
            } => {
                self.process_peer_update(&area, peers_to_add, peers_to_del);
            }
            KvRequest::Counters { responder } => {
                let mut counters = KvCounters::default();
                for area in self.areas.values() {
                    let c = &area.store.counters;
                    counters.keys += c.keys;
                    counters.merge_wins += c.merge_wins;
                    counters.merge_losses += c.merge_losses;
                    counters.ttl_refreshes += c.ttl_refreshes;
                    counters.expired_keys += c.expired_keys;
                    counters.flood_tx += c.flood_tx;
                    counters.flood_rx += c.flood_rx;
                    counters.loops_prevented += c.loops_prevented;
                    counters.protocol_errors += c.protocol_errors;
                }
                let _ = responder.send(counters);
            }
        }
    }

    fn process_peer_update(
        &mut self,
        area_id: &str,
        peers_to_add: BTreeMap<String, PeerSpec>,
        peers_to_del: Vec<String>,
    ) {
        let Some(area) = self.areas.get_mut(area_id) else {
            Error::AreaNotFound(area_id.to_owned()).log();
            return;
        };

        for name in peers_to_del {
            if area.peers.remove(&name).is_some() {
                Debug::PeerDel(area_id, &name).log();
            }
        }

        let mut to_sync = vec![];
        for (name, spec) in peers_to_add {
            // Re-adding with an unchanged spec is a no-op; a changed spec
            // restarts the session.
            if let Some(peer) = area.peers.get(&name)
                && peer.spec == spec
            {
                continue;
            }
            Debug::PeerAdd(area_id, &name).log();
            area.peers.insert(name.clone(), KvPeer::new(name.clone(), spec));
            to_sync.push(name);
        }
        for name in to_sync {
            self.start_sync(area_id, &name);
        }
    }

    // ===== protocol message processing =====

    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        match msg {
            ProtocolInputMsg::PeerPublication(msg) => {
                self.process_peer_publication(msg.peer, msg.publication);
            }
            ProtocolInputMsg::FullSyncRequest(msg) => {
                let diff = self
                    .areas
                    .get(&msg.area)
                    .map(|area| area.store.sync_diff(&msg.remote_hashes))
                    .unwrap_or_default();
                let _ = msg.responder.send(SyncResponse { key_vals: diff });
            }
            ProtocolInputMsg::SyncResult(msg) => {
                self.process_sync_result(&msg.area, &msg.peer, msg.result);
            }
            ProtocolInputMsg::SyncRetry(msg) => {
                let known = match self.areas.get_mut(&msg.area) {
                    Some(area) => match area.peers.get_mut(&msg.peer) {
                        Some(peer) => {
                            peer.retry_timer = None;
                            true
                        }
                        None => false,
                    },
                    None => false,
                };
                if known {
                    self.start_sync(&msg.area, &msg.peer);
                }
            }
            ProtocolInputMsg::FloodError(msg) => {
                Error::PeerFloodFailed(
                    msg.area.clone(),
                    msg.peer.clone(),
                    msg.error,
                )
                .log();
                // Missed floods are recovered by a fresh full sync.
                self.restart_sync_after_backoff(&msg.area, &msg.peer);
            }
            ProtocolInputMsg::StoreTimer(msg) => {
                self.process_store_timer(&msg.area);
            }
        }
    }

    fn process_peer_publication(
        &mut self,
        from_peer: String,
        publication: Publication,
    ) {
        let node_id = self.config.node_id.clone();
        let area_id = publication.area.clone();
        let Some(area) = self.areas.get_mut(&area_id) else {
            Error::AreaNotFound(area_id).log();
            return;
        };
        area.store.counters.flood_rx += 1;

        // Loop prevention: drop anything that already traversed this node.
        if publication
            .node_ids
            .as_ref()
            .is_some_and(|ids| ids.iter().any(|id| *id == node_id))
        {
            area.store.counters.loops_prevented += 1;
            Debug::LoopPrevented(&area_id, &from_peer).log();
            return;
        }

        Debug::PublicationRx(&area_id, &from_peer, publication.key_vals.len())
            .log();

        // Peer-reported expiries are applied locally but not re-flooded:
        // every node runs its own expiry timer.
        if !publication.expired_keys.is_empty() {
            area.store
                .remove_expired(&publication.expired_keys, Instant::now());
        }

        let changed = area.store.merge_key_values(publication.key_vals);

        // Forward the accepted changes to the other peers.
        if !changed.is_empty() {
            crate::flood::flood(
                &node_id,
                area,
                changed.clone(),
                vec![],
                Some(&from_peer),
                publication.node_ids,
            );
        }

        // Notify local subscribers.
        if !changed.is_empty() || !publication.expired_keys.is_empty() {
            self.publications.publish(Publication {
                area: area_id.clone(),
                key_vals: changed,
                expired_keys: publication.expired_keys,
                node_ids: None,
                flood_root_id: None,
            });
        }

        self.reset_store_timer(&area_id);
    }

    fn process_sync_result(
        &mut self,
        area_id: &str,
        peer_name: &str,
        result: Result<SyncResponse, crate::rpc::RpcError>,
    ) {
        let node_id = self.config.node_id.clone();
        let Some(area) = self.areas.get_mut(area_id) else {
            return;
        };
        let Some(peer) = area.peers.get_mut(peer_name) else {
            return;
        };
        peer.sync_task = None;

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                Error::PeerSyncFailed(
                    area_id.to_owned(),
                    peer_name.to_owned(),
                    error,
                )
                .log();
                self.restart_sync_after_backoff(area_id, peer_name);
                return;
            }
        };

        Debug::SyncDone(area_id, peer_name, response.key_vals.len()).log();
        peer.state_change(area_id, PeerState::Initialized);
        peer.reset_backoff();

        // Start the flood transmit loop for this peer.
        let (flood_tx, flood_rx) = mpsc::unbounded_channel();
        peer.flood_tx = Some(flood_tx);
        peer.flood_task = Some(tasks::peer_flood(
            area_id.to_owned(),
            peer_name.to_owned(),
            peer.spec.clone(),
            self.rpc.clone(),
            flood_rx,
            &self.proto_tx,
        ));

        // Merge the pulled values and forward them past the synced peer.
        let changed = area.store.merge_key_values(response.key_vals);
        if !changed.is_empty() {
            crate::flood::flood(
                &node_id,
                area,
                changed.clone(),
                vec![],
                Some(peer_name),
                None,
            );
            self.publications.publish(Publication {
                area: area_id.to_owned(),
                key_vals: changed,
                expired_keys: vec![],
                node_ids: None,
                flood_root_id: None,
            });
        }

        // First peer to finish syncing unblocks the area consumers.
        let area = self.areas.get_mut(area_id).unwrap();
        if !area.initial_sync_done {
            area.initial_sync_done = true;
            self.sync_events.publish(KvStoreSyncEvent {
                area: area_id.to_owned(),
            });
        }

        self.reset_store_timer(area_id);
    }

    fn process_store_timer(&mut self, area_id: &str) {
        let node_id = self.config.node_id.clone();
        let Some(area) = self.areas.get_mut(area_id) else {
            return;
        };
        let now = Instant::now();

        // Expired keys are flooded once, then every other node expires its
        // own copy on its own timer.
        let expired = area.store.expire_keys(now);
        for key in &expired {
            Debug::KeyExpire(area_id, key).log();
        }
        if !expired.is_empty() {
            crate::flood::flood(
                &node_id,
                area,
                BTreeMap::new(),
                expired.clone(),
                None,
                None,
            );
        }

        // Refresh self-originated keys at 3/4 of their lifetime.
        let refreshed = area.store.refresh_due(now);
        if !refreshed.is_empty() {
            Debug::TtlRefresh(area_id, refreshed.len()).log();
            crate::flood::flood(
                &node_id,
                area,
                refreshed.clone(),
                vec![],
                None,
                None,
            );
        }

        if !expired.is_empty() || !refreshed.is_empty() {
            self.publications.publish(Publication {
                area: area_id.to_owned(),
                key_vals: refreshed,
                expired_keys: expired,
                node_ids: None,
                flood_root_id: None,
            });
        }

        self.reset_store_timer(area_id);
    }

    // ===== helper functions =====

    // Merges key-values written locally (or relayed by another component)
    // and floods the winners.
    pub fn apply_key_vals(
        &mut self,
        area_id: &str,
        key_vals: BTreeMap<String, fabric_utils::kv::Value>,
        node_ids: Option<Vec<String>>,
        from_peer: Option<&str>,
    ) {
        let node_id = self.config.node_id.clone();
        let Some(area) = self.areas.get_mut(area_id) else {
            Error::AreaNotFound(area_id.to_owned()).log();
            return;
        };

        let changed = area.store.merge_key_values(key_vals);
        if changed.is_empty() {
            return;
        }

        crate::flood::flood(
            &node_id,
            area,
            changed.clone(),
            vec![],
            from_peer,
            node_ids,
        );
        self.publications.publish(Publication {
            area: area_id.to_owned(),
            key_vals: changed,
            expired_keys: vec![],
            node_ids: None,
            flood_root_id: None,
        });
        self.reset_store_timer(area_id);
    }

    fn start_sync(&mut self, area_id: &str, peer_name: &str) {
        let Some(area) = self.areas.get_mut(area_id) else {
            return;
        };
        let Some(peer) = area.peers.get_mut(peer_name) else {
            return;
        };

        peer.state_change(area_id, PeerState::Syncing);
        peer.stop_flooding();
        let local_hashes = area.store.dump_hashes(None);
        peer.sync_task = Some(tasks::peer_sync(
            area_id.to_owned(),
            peer_name.to_owned(),
            peer.spec.clone(),
            self.rpc.clone(),
            local_hashes,
            &self.proto_tx,
        ));
    }

    fn restart_sync_after_backoff(&mut self, area_id: &str, peer_name: &str) {
        let Some(area) = self.areas.get_mut(area_id) else {
            return;
        };
        let Some(peer) = area.peers.get_mut(peer_name) else {
            return;
        };

        peer.state_change(area_id, PeerState::Syncing);
        peer.stop_flooding();
        let backoff = peer.next_backoff();
        peer.retry_timer = Some(tasks::sync_retry_timer(
            area_id.to_owned(),
            peer_name.to_owned(),
            backoff,
            &self.proto_tx,
        ));
    }

    fn reset_store_timer(&mut self, area_id: &str) {
        let Some(area) = self.areas.get_mut(area_id) else {
            return;
        };
        area.timer = area.store.next_deadline().map(|deadline| {
            tasks::store_timer(area_id.to_owned(), deadline, &self.proto_tx)
        });
    }
}
