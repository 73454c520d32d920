//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use const_addrs::{ip6, net6};
use fabric_link_monitor::instance::{
    LinkMonitor, LinkMonitorConfig, LinkMonitorRequest, LinkMonitorState,
    STATE_DB_KEY,
};
use fabric_link_monitor::tasks::messages::input::ProtocolMsg;
use fabric_utils::adjacency::AdjacencyDatabase;
use fabric_utils::area::AreaConfig;
use fabric_utils::kv::KvRequest;
use fabric_utils::mpls::Label;
use fabric_utils::prefix::{PrefixType, PrefixUpdateRequest};
use fabric_utils::southbound::{AddressMsg, LinkMsg, NetlinkEvent};
use fabric_utils::spark::{NeighborInfo, SparkNeighborEvent};
use fabric_utils::{Database, UnboundedReceiver};
use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};

const AREA: &str = "0";

struct Harness {
    lm: LinkMonitor,
    kv_rx: UnboundedReceiver<KvRequest>,
    prefix_rx: UnboundedReceiver<fabric_utils::prefix::PrefixUpdateRequest>,
    proto_rx: UnboundedReceiver<ProtocolMsg>,
}

impl Harness {
    fn new(use_rtt_metric: bool, db: Option<Database>) -> Harness {
        let area = AreaConfig::new(
            AREA.to_owned(),
            &["eth[0-9]+".to_owned()],
            &["lo".to_owned()],
            vec![],
            None,
        )
        .unwrap();
        let config = LinkMonitorConfig {
            node_id: "node-a".to_owned(),
            areas: Arc::new(vec![area]),
            node_label: Label::new(101),
            use_rtt_metric,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(8),
            link_throttle: Duration::from_millis(10),
            startup_hold: Duration::from_secs(1),
            key_ttl: fabric_utils::kv::TTL_INFINITY,
            assume_drained: false,
        };
        let (kv_tx, kv_rx) = tokio::sync::mpsc::unbounded_channel();
        let (prefix_tx, prefix_rx) = tokio::sync::mpsc::unbounded_channel();
        let (mut lm, proto_rx) = LinkMonitor::new(config, db, kv_tx, prefix_tx);

        // Get past the startup hold.
        lm.process_protocol_msg(ProtocolMsg::HoldExpired);

        Harness {
            lm,
            kv_rx,
            prefix_rx,
            proto_rx,
        }
    }

    fn link_up(&mut self, ifname: &str, ifindex: u32) {
        self.lm.process_netlink_event(NetlinkEvent::Link(LinkMsg::new(
            ifname.to_owned(),
            ifindex,
            true,
        )));
    }

    fn link_change(&mut self, ifname: &str, ifindex: u32, up: bool) {
        self.lm.process_netlink_event(NetlinkEvent::Link(LinkMsg::new(
            ifname.to_owned(),
            ifindex,
            up,
        )));
    }

    fn spark(&mut self, event: SparkNeighborEvent) {
        self.lm.process_spark_event(event);
    }

    // Waits for the armed advertisement throttle to fire and processes it.
    async fn fire_advertise(&mut self) {
        loop {
            match self.proto_rx.recv().await.unwrap() {
                msg @ ProtocolMsg::AdvertiseFire => {
                    self.lm.process_protocol_msg(msg);
                    return;
                }
                msg => self.lm.process_protocol_msg(msg),
            }
        }
    }

    // Waits for a flap hold-down expiry and processes it.
    async fn fire_backoff(&mut self) {
        loop {
            match self.proto_rx.recv().await.unwrap() {
                msg @ ProtocolMsg::LinkBackoff(_) => {
                    self.lm.process_protocol_msg(msg);
                    return;
                }
                msg => self.lm.process_protocol_msg(msg),
            }
        }
    }

    // Drains the KV request queue, returning advertised databases and the
    // final peer table.
    fn drain_kv(
        &mut self,
    ) -> (Vec<AdjacencyDatabase>, Vec<KvRequest>) {
        let mut adj_dbs = vec![];
        let mut peer_updates = vec![];
        while let Ok(msg) = self.kv_rx.try_recv() {
            match msg {
                KvRequest::SetKeys { key_vals, .. } => {
                    for value in key_vals.into_values() {
                        let mut data = value.data.unwrap();
                        adj_dbs.push(
                            AdjacencyDatabase::decode(&mut data).unwrap(),
                        );
                    }
                }
                msg @ KvRequest::PeerUpdate { .. } => peer_updates.push(msg),
                _ => (),
            }
        }
        (adj_dbs, peer_updates)
    }
}

fn neighbor(node: &str, local_ifname: &str, rtt_us: i64) -> NeighborInfo {
    NeighborInfo {
        node: node.to_owned(),
        area: AREA.to_owned(),
        local_ifname: local_ifname.to_owned(),
        remote_ifname: "eth0".to_owned(),
        v4_addr: None,
        v6_addr: Some(match local_ifname {
            "eth1" => ip6!("fe80::1:2"),
            _ => ip6!("fe80::2:2"),
        }),
        kv_port: 2018,
        rtt_us,
    }
}

//
// Tests.
//

#[tokio::test(start_paused = true)]
async fn parallel_links_form_one_peer_session() {
    let mut h = Harness::new(false, None);
    h.link_up("eth1", 1);
    h.link_up("eth2", 2);
    h.spark(SparkNeighborEvent::Up(neighbor("node-b", "eth1", 100)));
    h.spark(SparkNeighborEvent::Up(neighbor("node-b", "eth2", 100)));
    h.fire_advertise().await;

    let (adj_dbs, peer_updates) = h.drain_kv();

    // Exactly one peer session, bound to the smallest interface name.
    assert_eq!(peer_updates.len(), 1);
    let KvRequest::PeerUpdate {
        area,
        peers_to_add,
        peers_to_del,
    } = &peer_updates[0]
    else {
        panic!("expected peer update");
    };
    assert_eq!(area, AREA);
    assert!(peers_to_del.is_empty());
    assert_eq!(peers_to_add.len(), 1);
    assert_eq!(
        peers_to_add["node-b"].addr.ip(),
        ip6!("fe80::1:2")
    );

    // The advertised database carries both parallel adjacencies.
    let adj_db = adj_dbs.last().unwrap();
    assert_eq!(adj_db.node, "node-a");
    assert_eq!(adj_db.area, AREA);
    assert_eq!(adj_db.adjacencies.len(), 2);
    assert!(!adj_db.overloaded);

    // Losing the selected link moves the session to the surviving one,
    // without ever having two sessions.
    h.spark(SparkNeighborEvent::Down(neighbor("node-b", "eth1", 100)));
    h.fire_advertise().await;
    let (adj_dbs, peer_updates) = h.drain_kv();
    assert_eq!(peer_updates.len(), 1);
    let KvRequest::PeerUpdate { peers_to_add, .. } = &peer_updates[0] else {
        panic!("expected peer update");
    };
    assert_eq!(
        peers_to_add["node-b"].addr.ip(),
        ip6!("fe80::2:2")
    );
    assert_eq!(adj_dbs.last().unwrap().adjacencies.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn restarting_neighbor_keeps_adjacency_drops_peer() {
    let mut h = Harness::new(false, None);
    h.link_up("eth1", 1);
    h.spark(SparkNeighborEvent::Up(neighbor("node-b", "eth1", 100)));
    h.fire_advertise().await;
    h.drain_kv();

    h.spark(SparkNeighborEvent::Restarting(neighbor("node-b", "eth1", 100)));
    let (adj_dbs, peer_updates) = h.drain_kv();

    // The KV session is torn down...
    assert_eq!(peer_updates.len(), 1);
    let KvRequest::PeerUpdate { peers_to_del, .. } = &peer_updates[0] else {
        panic!("expected peer update");
    };
    assert_eq!(peers_to_del, &["node-b".to_owned()]);
    // ...but the adjacency is not withdrawn.
    assert!(adj_dbs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn node_overload_is_immediate_and_persisted() {
    let db: Database = Arc::new(Mutex::new(PickleDb::new(
        "/tmp/fabric-lm-test.db",
        PickleDbDumpPolicy::NeverDump,
        SerializationMethod::Json,
    )));
    let mut h = Harness::new(false, Some(db.clone()));
    h.link_up("eth1", 1);
    h.spark(SparkNeighborEvent::Up(neighbor("node-b", "eth1", 100)));
    h.fire_advertise().await;
    h.drain_kv();

    let (responder, reply) = tokio::sync::oneshot::channel();
    h.lm.process_request(LinkMonitorRequest::SetNodeOverload {
        overloaded: true,
        responder,
    });
    assert_eq!(reply.await.unwrap(), Ok(()));

    // No throttle window: the drained database is already out.
    let (adj_dbs, _) = h.drain_kv();
    assert!(adj_dbs.last().unwrap().overloaded);

    // And the state survived to the config store.
    let state = db
        .lock()
        .unwrap()
        .get::<LinkMonitorState>(STATE_DB_KEY)
        .unwrap();
    assert!(state.node_overloaded);
}

#[tokio::test(start_paused = true)]
async fn metric_pipeline_precedence() {
    let mut h = Harness::new(true, None);
    h.link_up("eth1", 1);
    h.spark(SparkNeighborEvent::Up(neighbor("node-b", "eth1", 2500)));
    h.fire_advertise().await;

    // Base metric from rtt: max(1, 2500/100).
    let (adj_dbs, _) = h.drain_kv();
    assert_eq!(adj_dbs.last().unwrap().adjacencies[0].metric, 25);

    // Link override beats the base metric.
    let (responder, reply) = tokio::sync::oneshot::channel();
    h.lm.process_request(LinkMonitorRequest::SetLinkMetric {
        ifname: "eth1".to_owned(),
        metric: Some(10),
        responder,
    });
    assert_eq!(reply.await.unwrap(), Ok(()));
    h.fire_advertise().await;
    let (adj_dbs, _) = h.drain_kv();
    assert_eq!(adj_dbs.last().unwrap().adjacencies[0].metric, 10);

    // Adjacency override beats the link override.
    let (responder, reply) = tokio::sync::oneshot::channel();
    h.lm.process_request(LinkMonitorRequest::SetAdjacencyMetric {
        ifname: "eth1".to_owned(),
        node: "node-b".to_owned(),
        metric: Some(7),
        responder,
    });
    assert_eq!(reply.await.unwrap(), Ok(()));
    h.fire_advertise().await;
    let (adj_dbs, _) = h.drain_kv();
    assert_eq!(adj_dbs.last().unwrap().adjacencies[0].metric, 7);

    // Commands naming unknown entities fail without mutating state.
    let (responder, reply) = tokio::sync::oneshot::channel();
    h.lm.process_request(LinkMonitorRequest::SetLinkMetric {
        ifname: "eth9".to_owned(),
        metric: Some(1),
        responder,
    });
    assert!(reply.await.unwrap().is_err());
}

#[tokio::test(start_paused = true)]
async fn flap_backoff_suppresses_readvertisement() {
    let mut h = Harness::new(false, None);
    h.link_up("eth1", 1);
    h.spark(SparkNeighborEvent::Up(neighbor("node-b", "eth1", 100)));
    h.fire_advertise().await;
    h.drain_kv();

    // Two quick transitions: down then up. The withdrawal goes out, after
    // which the interface sits in backoff and nothing else is published.
    h.link_change("eth1", 1, false);
    h.fire_advertise().await;
    let (adj_dbs, _) = h.drain_kv();
    assert_eq!(adj_dbs.len(), 1);
    assert!(adj_dbs[0].adjacencies.is_empty());

    h.link_change("eth1", 1, true);
    h.fire_advertise().await;
    let (adj_dbs, _) = h.drain_kv();
    assert!(adj_dbs.is_empty(), "flap leaked through the backoff");

    // Once the hold-down expires the adjacency is advertised again.
    h.fire_backoff().await;
    h.fire_advertise().await;
    let (adj_dbs, _) = h.drain_kv();
    assert_eq!(adj_dbs.last().unwrap().adjacencies.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn redistributes_matching_global_unicast_addresses() {
    let mut h = Harness::new(false, None);
    h.link_up("lo", 10);
    h.lm.process_netlink_event(NetlinkEvent::Address(AddressMsg::new(
        10,
        net6!("2001:db8::1/128").into(),
        true,
    )));
    // Link-local addresses are not redistributed.
    h.lm.process_netlink_event(NetlinkEvent::Address(AddressMsg::new(
        10,
        net6!("fe80::1/64").into(),
        true,
    )));

    let mut syncs = vec![];
    while let Ok(msg) = h.prefix_rx.try_recv() {
        syncs.push(msg);
    }
    let PrefixUpdateRequest::SyncByType {
        prefix_type,
        entries,
        dst_areas,
    } = syncs.last().unwrap()
    else {
        panic!("expected sync-by-type");
    };
    assert_eq!(*prefix_type, PrefixType::Loopback);
    assert_eq!(dst_areas.as_deref(), Some(&[AREA.to_owned()][..]));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].prefix, net6!("2001:db8::1/128").into());
    assert!(entries[0].tags.contains("lo"));

    // Withdrawal resolves through the same atomic sync.
    h.lm.process_netlink_event(NetlinkEvent::Address(AddressMsg::new(
        10,
        net6!("2001:db8::1/128").into(),
        false,
    )));
    let mut syncs = vec![];
    while let Ok(msg) = h.prefix_rx.try_recv() {
        syncs.push(msg);
    }
    let PrefixUpdateRequest::SyncByType { entries, .. } = syncs.last().unwrap()
    else {
        panic!("expected sync-by-type");
    };
    assert!(entries.is_empty());
}
