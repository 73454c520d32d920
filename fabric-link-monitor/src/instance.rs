//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fabric_utils::adjacency::{Adjacency, AdjacencyDatabase};
use fabric_utils::area::AreaConfig;
use fabric_utils::bus::{Bus, BusReceiver};
use fabric_utils::ip::IpAddrExt;
use fabric_utils::kv::{self, KvRequest, Value};
use fabric_utils::mpls::Label;
use fabric_utils::prefix::{PrefixEntry, PrefixType, PrefixUpdateRequest};
use fabric_utils::southbound::{
    InterfaceDatabase, InterfaceInfo, NetlinkEvent,
};
use fabric_utils::spark::SparkNeighborEvent;
use fabric_utils::task::{Throttle, TimeoutTask};
use fabric_utils::{Database, Responder, UnboundedReceiver, UnboundedSender};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::error;

use crate::debug::Debug;
use crate::error::{Error, RequestError};
use crate::interface::Interface;
use crate::neighbor::{AdjKey, Neighbor, derive_peers};
use crate::tasks;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::ProtocolMsg;

// Key under which the persisted state lives in the config store.
pub const STATE_DB_KEY: &str = "link-monitor-config";

// Base of the adjacency segment label range; offset by ifindex.
const ADJ_LABEL_RANGE_START: u32 = 50000;

#[derive(Clone, Debug)]
pub struct LinkMonitorConfig {
    pub node_id: String,
    pub areas: Arc<Vec<AreaConfig>>,
    // Node segment label; unset disables segment routing.
    pub node_label: Label,
    // Derive link metrics from measured rtt instead of hop count.
    pub use_rtt_metric: bool,
    // Interface flap damping.
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    // Advertisement coalescing window.
    pub link_throttle: Duration,
    // Delay before the first advertisement after startup.
    pub startup_hold: Duration,
    // Lifetime of the advertised `adj:` keys, in milliseconds.
    pub key_ttl: i64,
    // Assume the node is drained when no persisted state exists.
    pub assume_drained: bool,
}

// Operator-tunable state, persisted across restarts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LinkMonitorState {
    pub node_overloaded: bool,
    pub overloaded_links: BTreeSet<String>,
    pub link_metric_overrides: BTreeMap<String, u32>,
    pub adj_metric_overrides: Vec<AdjacencyMetricOverride>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AdjacencyMetricOverride {
    pub node: String,
    pub ifname: String,
    pub metric: u32,
}

// Operator commands.
#[derive(Debug)]
pub enum LinkMonitorRequest {
    SetNodeOverload {
        overloaded: bool,
        responder: Responder<Result<(), RequestError>>,
    },
    SetInterfaceOverload {
        ifname: String,
        overloaded: bool,
        responder: Responder<Result<(), RequestError>>,
    },
    SetLinkMetric {
        ifname: String,
        metric: Option<u32>,
        responder: Responder<Result<(), RequestError>>,
    },
    SetAdjacencyMetric {
        ifname: String,
        node: String,
        metric: Option<u32>,
        responder: Responder<Result<(), RequestError>>,
    },
    GetInterfaces {
        responder: Responder<InterfaceDatabase>,
    },
    GetAdjacencies {
        node: Option<String>,
        responder: Responder<Vec<Adjacency>>,
    },
}

// Link-Monitor instance: one event loop translating neighbor discovery and
// kernel events into KV-Store adjacency state and prefix redistribution.
pub struct LinkMonitor {
    pub config: LinkMonitorConfig,
    pub state: LinkMonitorState,
    pub interfaces: BTreeMap<String, Interface>,
    pub neighbors: BTreeMap<AdjKey, Neighbor>,
    // Last pushed KV peer set, per area.
    kv_peers: BTreeMap<String, BTreeMap<String, kv::PeerSpec>>,
    // Last advertised adjacency database and key version, per area.
    last_adj_db: BTreeMap<String, AdjacencyDatabase>,
    adj_versions: BTreeMap<String, i64>,
    // Last redistributed loopback set, per area.
    last_redistributed: BTreeMap<String, Vec<PrefixEntry>>,
    // Advertisement coalescing.
    throttle: Throttle,
    in_startup_hold: bool,
    _hold_timer: Option<TimeoutTask>,
    backoff_timers: BTreeMap<String, TimeoutTask>,
    // Non-volatile storage.
    db: Option<Database>,
    // Egress.
    kv_tx: UnboundedSender<KvRequest>,
    prefix_tx: UnboundedSender<PrefixUpdateRequest>,
    interface_db: Bus<InterfaceDatabase>,
    proto_tx: UnboundedSender<ProtocolInputMsg>,
}

// ===== impl LinkMonitor =====

impl LinkMonitor {
    pub fn new(
        config: LinkMonitorConfig,
        db: Option<Database>,
        kv_tx: UnboundedSender<KvRequest>,
        prefix_tx: UnboundedSender<PrefixUpdateRequest>,
    ) -> (LinkMonitor, UnboundedReceiver<ProtocolInputMsg>) {
        let (proto_tx, proto_rx) = mpsc::unbounded_channel();

        // Recover persisted state; absence means a fresh node, whose drain
        // status comes from the command line.
        let state = db
            .as_ref()
            .and_then(|db| {
                db.lock().unwrap().get::<LinkMonitorState>(STATE_DB_KEY)
            })
            .unwrap_or_else(|| LinkMonitorState {
                node_overloaded: config.assume_drained,
                ..Default::default()
            });

        let hold_timer =
            tasks::startup_hold_timer(config.startup_hold, &proto_tx);
        let throttle = Throttle::new(config.link_throttle);
        let monitor = LinkMonitor {
            config,
            state,
            interfaces: Default::default(),
            neighbors: Default::default(),
            kv_peers: Default::default(),
            last_adj_db: Default::default(),
            adj_versions: Default::default(),
            last_redistributed: Default::default(),
            throttle,
            in_startup_hold: true,
            _hold_timer: Some(hold_timer),
            backoff_timers: Default::default(),
            db,
            kv_tx,
            prefix_tx,
            interface_db: Bus::new(),
            proto_tx,
        };
        (monitor, proto_rx)
    }

    /// Attaches a subscriber to the interface snapshot stream.
    pub fn subscribe_interface_db(&mut self) -> BusReceiver<InterfaceDatabase> {
        self.interface_db.subscribe()
    }

    /// Runs the event loop until any input queue is closed.
    pub async fn run(
        mut self,
        mut spark_rx: UnboundedReceiver<SparkNeighborEvent>,
        mut netlink_rx: UnboundedReceiver<NetlinkEvent>,
        mut requests: UnboundedReceiver<LinkMonitorRequest>,
        mut proto_rx: UnboundedReceiver<ProtocolInputMsg>,
    ) {
        loop {
            tokio::select! {
                msg = spark_rx.recv() => match msg {
                    Some(msg) => self.process_spark_event(msg),
                    None => break,
                },
                msg = netlink_rx.recv() => match msg {
                    Some(msg) => self.process_netlink_event(msg),
                    None => break,
                },
                msg = requests.recv() => match msg {
                    Some(msg) => self.process_request(msg),
                    None => break,
                },
                Some(msg) = proto_rx.recv() => {
                    self.process_protocol_msg(msg);
                }
            }
        }
    }

    // ===== neighbor discovery events =====

    pub fn process_spark_event(&mut self, event: SparkNeighborEvent) {
        // Adjacencies over unknown interfaces cannot be used; drop and wait
        // for the kernel event stream to catch up.
        let info = event.info();
        if !self.interfaces.contains_key(&info.local_ifname) {
            Error::AdjacencyUnknownInterface(
                info.node.clone(),
                info.local_ifname.clone(),
            )
            .log();
            return;
        }

        match event {
            SparkNeighborEvent::Up(info)
            | SparkNeighborEvent::Restarted(info) => {
                Debug::NeighborUp(&info.node, &info.local_ifname).log();
                let key = AdjKey::of(&info);
                self.neighbors
                    .insert(key, Neighbor::new(info, Utc::now().timestamp()));
                self.reconcile_peers();
                self.schedule_advertise();
            }
            SparkNeighborEvent::Down(info) => {
                Debug::NeighborDown(&info.node, &info.local_ifname).log();
                self.neighbors.remove(&AdjKey::of(&info));
                self.reconcile_peers();
                self.schedule_advertise();
            }
            SparkNeighborEvent::Restarting(info) => {
                Debug::NeighborRestarting(&info.node, &info.local_ifname)
                    .log();
                // The adjacency stays advertised while the neighbor
                // restarts; only the KV session moves away from it.
                if let Some(neighbor) =
                    self.neighbors.get_mut(&AdjKey::of(&info))
                {
                    neighbor.restarting = true;
                    self.reconcile_peers();
                }
            }
            SparkNeighborEvent::RttChange(info) => {
                Debug::NeighborRttChange(
                    &info.node,
                    &info.local_ifname,
                    info.rtt_us,
                )
                .log();
                if let Some(neighbor) =
                    self.neighbors.get_mut(&AdjKey::of(&info))
                {
                    neighbor.info.rtt_us = info.rtt_us;
                    // Re-advertise only if the metric derives from rtt; the
                    // no-change check below absorbs sub-threshold jitter.
                    if self.config.use_rtt_metric {
                        self.schedule_advertise();
                    }
                }
            }
        }
    }

    // ===== kernel events =====

    pub fn process_netlink_event(&mut self, event: NetlinkEvent) {
        match event {
            NetlinkEvent::Link(msg) => {
                match self.interfaces.get_mut(&msg.ifname) {
                    None => {
                        Debug::InterfaceCreate(&msg.ifname).log();
                        self.interfaces.insert(
                            msg.ifname.clone(),
                            Interface::new(
                                msg.ifname,
                                msg.ifindex,
                                msg.up,
                                self.config.backoff_initial,
                                self.config.backoff_max,
                            ),
                        );
                        self.publish_interface_db();
                    }
                    Some(iface) => {
                        // An ifindex changing under a live interface breaks
                        // every derivation made from it.
                        if iface.up && msg.up && iface.ifindex != msg.ifindex
                        {
                            error!(
                                name = %iface.name,
                                old = %iface.ifindex,
                                new = %msg.ifindex,
                                "ifindex changed under a live interface"
                            );
                            std::process::abort();
                        }
                        if !iface.up {
                            iface.ifindex = msg.ifindex;
                        }
                        if iface.up != msg.up {
                            iface.up = msg.up;
                            Debug::InterfaceStateChange(&msg.ifname, msg.up)
                                .log();
                            let now = Instant::now();
                            let backoff = iface.backoff.flap(now);
                            Debug::InterfaceBackoff(&msg.ifname, backoff)
                                .log();
                            self.backoff_timers.insert(
                                msg.ifname.clone(),
                                tasks::link_backoff_timer(
                                    msg.ifname.clone(),
                                    backoff,
                                    &self.proto_tx,
                                ),
                            );
                            self.on_topology_change();
                        }
                    }
                }
            }
            NetlinkEvent::Address(msg) => {
                let Some(iface) = self
                    .interfaces
                    .values_mut()
                    .find(|iface| iface.ifindex == msg.ifindex)
                else {
                    Error::AddressUnknownIfindex(msg.ifindex).log();
                    return;
                };
                let changed = if msg.valid {
                    iface.addrs.insert(msg.addr)
                } else {
                    iface.addrs.remove(&msg.addr)
                };
                if changed {
                    self.redistribute();
                    self.publish_interface_db();
                }
            }
        }
    }

    // ===== operator commands =====

    pub fn process_request(&mut self, request: LinkMonitorRequest) {
        match request {
            LinkMonitorRequest::SetNodeOverload {
                overloaded,
                responder,
            } => {
                if self.state.node_overloaded != overloaded {
                    self.state.node_overloaded = overloaded;
                    self.save_state();
                    // Drain changes bypass the advertisement throttle.
                    self.advertise_now();
                }
                let _ = responder.send(Ok(()));
            }
            LinkMonitorRequest::SetInterfaceOverload {
                ifname,
                overloaded,
                responder,
            } => {
                if !self.interfaces.contains_key(&ifname) {
                    let _ = responder
                        .send(Err(RequestError::UnknownInterface(ifname)));
                    return;
                }
                let changed = if overloaded {
                    self.state.overloaded_links.insert(ifname)
                } else {
                    self.state.overloaded_links.remove(&ifname)
                };
                if changed {
                    self.save_state();
                    self.advertise_now();
                }
                let _ = responder.send(Ok(()));
            }
            LinkMonitorRequest::SetLinkMetric {
                ifname,
                metric,
                responder,
            } => {
                if !self.interfaces.contains_key(&ifname) {
                    let _ = responder
                        .send(Err(RequestError::UnknownInterface(ifname)));
                    return;
                }
                match metric {
                    Some(metric) => {
                        self.state.link_metric_overrides.insert(ifname, metric)
                    }
                    None => self.state.link_metric_overrides.remove(&ifname),
                };
                self.save_state();
                self.schedule_advertise();
                let _ = responder.send(Ok(()));
            }
            LinkMonitorRequest::SetAdjacencyMetric {
                ifname,
                node,
                metric,
                responder,
            } => {
                let key = AdjKey {
                    node: node.clone(),
                    local_ifname: ifname.clone(),
                };
                if !self.neighbors.contains_key(&key) {
                    let _ = responder
                        .send(Err(RequestError::UnknownAdjacency(node, ifname)));
                    return;
                }
                self.state
                    .adj_metric_overrides
                    .retain(|o| !(o.node == node && o.ifname == ifname));
                if let Some(metric) = metric {
                    self.state.adj_metric_overrides.push(
                        AdjacencyMetricOverride {
                            node,
                            ifname,
                            metric,
                        },
                    );
                }
                self.save_state();
                self.schedule_advertise();
                let _ = responder.send(Ok(()));
            }
            LinkMonitorRequest::GetInterfaces { responder } => {
                let _ = responder.send(self.interface_db_snapshot());
            }
            LinkMonitorRequest::GetAdjacencies { node, responder } => {
                let mut adjacencies = vec![];
                for area in self.config.areas.iter() {
                    adjacencies.extend(
                        self.build_adjacency_db(&area.id)
                            .adjacencies
                            .into_iter()
                            .filter(|adj| match &node {
                                Some(node) => adj.other_node == *node,
                                None => true,
                            }),
                    );
                }
                let _ = responder.send(adjacencies);
            }
        }
    }

    // ===== timer events =====

    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        match msg {
            ProtocolMsg::AdvertiseFire => {
                if !self.in_startup_hold {
                    self.advertise_now();
                } else {
                    self.throttle.cancel();
                }
            }
            ProtocolMsg::HoldExpired => {
                self.in_startup_hold = false;
                self._hold_timer = None;
                self.advertise_now();
            }
            ProtocolMsg::LinkBackoff(msg) => {
                self.backoff_timers.remove(&msg.ifname);
                self.on_topology_change();
            }
        }
    }

    // ===== helper functions =====

    // Everything that depends on the set of active interfaces.
    fn on_topology_change(&mut self) {
        self.reconcile_peers();
        self.schedule_advertise();
        self.redistribute();
        self.publish_interface_db();
    }

    // Arms the coalescing window for an adjacency re-advertisement.
    fn schedule_advertise(&mut self) {
        if self.in_startup_hold {
            return;
        }
        let proto_tx = self.proto_tx.clone();
        self.throttle.request(move || async move {
            let _ = proto_tx.send(ProtocolMsg::AdvertiseFire);
        });
    }

    // Builds and persists the per-area adjacency databases into KV-Store.
    // Databases identical to the last advertised copy are skipped, which
    // absorbs interface flaps that never change the visible topology.
    // Supersedes any pending coalesced fire.
    fn advertise_now(&mut self) {
        self.throttle.cancel();
        for area in self.config.areas.clone().iter() {
            let adj_db = self.build_adjacency_db(&area.id);
            if self.last_adj_db.get(&area.id) == Some(&adj_db) {
                continue;
            }

            Debug::AdvertiseAdjacencies(&area.id, adj_db.adjacencies.len())
                .log();
            let version = self
                .adj_versions
                .entry(area.id.clone())
                .and_modify(|version| *version += 1)
                .or_insert(1);
            let value = Value::new(
                *version,
                self.config.node_id.clone(),
                adj_db.to_bytes(),
                self.config.key_ttl,
                1,
            );
            let _ = self.kv_tx.send(KvRequest::SetKeys {
                area: area.id.clone(),
                key_vals: BTreeMap::from([(
                    kv::adj_key(&self.config.node_id),
                    value,
                )]),
                node_ids: None,
            });
            self.last_adj_db.insert(area.id.clone(), adj_db);
        }
    }

    fn build_adjacency_db(&self, area: &str) -> AdjacencyDatabase {
        let now = Instant::now();
        let sr_enabled = !self.config.node_label.is_unset();
        let mut adjacencies = vec![];

        for (key, neighbor) in &self.neighbors {
            if neighbor.info.area != area {
                continue;
            }
            let Some(iface) = self.interfaces.get(&key.local_ifname) else {
                continue;
            };
            if !iface.is_active(now) {
                continue;
            }

            let adj_label = if sr_enabled {
                Label::new(ADJ_LABEL_RANGE_START + iface.ifindex)
            } else {
                Label::UNSET
            };
            adjacencies.push(Adjacency::new(
                key.node.clone(),
                key.local_ifname.clone(),
                neighbor.info.remote_ifname.clone(),
                neighbor.info.v4_addr,
                neighbor.info.v6_addr,
                self.compute_metric(&key.node, &key.local_ifname, neighbor),
                adj_label,
                self.state.overloaded_links.contains(&key.local_ifname),
                neighbor.info.rtt_us,
                neighbor.up_since,
                1,
            ));
        }

        AdjacencyDatabase {
            node: self.config.node_id.clone(),
            node_label: self.config.node_label,
            overloaded: self.state.node_overloaded,
            adjacencies,
            area: area.to_owned(),
            perf_events: vec![],
        }
    }

    // Metric pipeline: adjacency override, else link override, else base.
    fn compute_metric(
        &self,
        node: &str,
        ifname: &str,
        neighbor: &Neighbor,
    ) -> u32 {
        if let Some(or) = self
            .state
            .adj_metric_overrides
            .iter()
            .find(|or| or.node == node && or.ifname == ifname)
        {
            return or.metric;
        }
        if let Some(metric) = self.state.link_metric_overrides.get(ifname) {
            return *metric;
        }
        if self.config.use_rtt_metric {
            std::cmp::max(1, (neighbor.info.rtt_us / 100) as u32)
        } else {
            1
        }
    }

    // Recomputes the desired KV peer set per area and pushes the diff.
    fn reconcile_peers(&mut self) {
        let now = Instant::now();
        for area in self.config.areas.iter() {
            let desired =
                derive_peers(&self.neighbors, &area.id, &self.interfaces, now);
            let current = self.kv_peers.entry(area.id.clone()).or_default();

            let peers_to_add = desired
                .iter()
                .filter(|(node, spec)| current.get(*node) != Some(*spec))
                .map(|(node, spec)| (node.clone(), spec.clone()))
                .collect::<BTreeMap<_, _>>();
            let peers_to_del = current
                .keys()
                .filter(|node| !desired.contains_key(*node))
                .cloned()
                .collect::<Vec<_>>();
            if peers_to_add.is_empty() && peers_to_del.is_empty() {
                continue;
            }

            Debug::PeerChange(
                &area.id,
                peers_to_add.len(),
                peers_to_del.len(),
            )
            .log();
            *current = desired;
            let _ = self.kv_tx.send(KvRequest::PeerUpdate {
                area: area.id.clone(),
                peers_to_add,
                peers_to_del,
            });
        }
    }

    // Emits the global unicast addresses of matching active interfaces as
    // loopback prefixes, one atomic sync per area.
    fn redistribute(&mut self) {
        let now = Instant::now();
        for area in self.config.areas.clone().iter() {
            let mut entries = vec![];
            for iface in self.interfaces.values() {
                if !iface.is_active(now)
                    || !area.matches_redistribute_ifname(&iface.name)
                {
                    continue;
                }
                for addr in &iface.addrs {
                    if !addr.ip().is_routable() {
                        continue;
                    }
                    let host_prefix =
                        ipnetwork::IpNetwork::from(addr.ip());
                    let mut entry =
                        PrefixEntry::new(host_prefix, PrefixType::Loopback);
                    entry.tags.insert(iface.name.clone());
                    entries.push(entry);
                }
            }

            if self.last_redistributed.get(&area.id) == Some(&entries) {
                continue;
            }
            self.last_redistributed
                .insert(area.id.clone(), entries.clone());
            let _ = self.prefix_tx.send(PrefixUpdateRequest::SyncByType {
                prefix_type: PrefixType::Loopback,
                entries,
                dst_areas: Some(vec![area.id.clone()]),
            });
        }
    }

    fn interface_db_snapshot(&self) -> InterfaceDatabase {
        InterfaceDatabase {
            node: self.config.node_id.clone(),
            interfaces: self
                .interfaces
                .values()
                .map(|iface| {
                    let info = InterfaceInfo {
                        is_up: iface.up,
                        ifindex: iface.ifindex,
                        networks: iface.addrs.clone(),
                    };
                    (iface.name.clone(), info)
                })
                .collect(),
        }
    }

    fn publish_interface_db(&mut self) {
        let snapshot = self.interface_db_snapshot();
        self.interface_db.publish(snapshot);
    }

    // Writes the persisted state through the config store. Must complete
    // before the triggering command is acknowledged.
    fn save_state(&self) {
        if let Some(db) = &self.db
            && let Err(error) =
                db.lock().unwrap().set(STATE_DB_KEY, &self.state)
        {
            Error::StateSaveFailed(error).log();
        }
    }
}
