//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;

use const_addrs::{ip6, net6};
use fabric_decision::instance::{Decision, DecisionConfig, DecisionRequest};
use fabric_decision::spf::fsm;
use fabric_decision::tasks::messages::input::ProtocolMsg;
use fabric_utils::UnboundedReceiver;
use fabric_utils::adjacency::{Adjacency, AdjacencyDatabase};
use fabric_utils::kv::{self, Publication, TTL_INFINITY, Value};
use fabric_utils::mpls::{Label, MplsAction};
use fabric_utils::prefix::{ForwardingType, PrefixEntry, PrefixType};
use fabric_utils::southbound::RouteDatabaseDelta;
use ipnetwork::IpNetwork;

const AREA: &str = "0";

struct Harness {
    decision: Decision,
    route_rx: UnboundedReceiver<RouteDatabaseDelta>,
    proto_rx: UnboundedReceiver<ProtocolMsg>,
    version: i64,
}

impl Harness {
    fn new() -> Harness {
        let config = DecisionConfig {
            node_id: "node-a".to_owned(),
            ecmp_width: 16,
            spf_initial_delay: 10,
            spf_short_delay: 20,
            spf_long_delay: 100,
            spf_time_to_learn: 500,
            spf_hold_down: 1000,
        };
        let (route_tx, route_rx) = tokio::sync::mpsc::unbounded_channel();
        let (decision, proto_rx) = Decision::new(config, route_tx);
        Harness {
            decision,
            route_rx,
            proto_rx,
            version: 0,
        }
    }

    fn publish_adj(&mut self, db: AdjacencyDatabase) {
        self.version += 1;
        let value = Value::new(
            self.version,
            db.node.clone(),
            db.to_bytes(),
            TTL_INFINITY,
            1,
        );
        let key_vals = BTreeMap::from([(kv::adj_key(&db.node), value)]);
        self.publish(key_vals);
    }

    fn publish_prefix(&mut self, node: &str, entry: PrefixEntry) {
        self.version += 1;
        let key = kv::prefix_key(node, AREA, &entry.prefix);
        let value = Value::new(
            self.version,
            node.to_owned(),
            entry.to_bytes(),
            TTL_INFINITY,
            1,
        );
        self.publish(BTreeMap::from([(key, value)]));
    }

    fn publish(&mut self, key_vals: BTreeMap<String, Value>) {
        self.decision.process_publication(Publication {
            area: AREA.to_owned(),
            key_vals,
            expired_keys: vec![],
            node_ids: None,
            flood_root_id: None,
        });
    }

    // Processes timer events until the next SPF run completes.
    async fn run_spf(&mut self) {
        loop {
            let msg = self.proto_rx.recv().await.unwrap();
            let is_spf = matches!(
                &msg,
                ProtocolMsg::SpfDelayEvent(m) if m.event == fsm::Event::DelayTimer
            );
            self.decision.process_protocol_msg(msg);
            if is_spf {
                return;
            }
        }
    }

    fn last_delta(&mut self) -> RouteDatabaseDelta {
        let mut last = None;
        while let Ok(delta) = self.route_rx.try_recv() {
            last = Some(delta);
        }
        last.expect("no route delta emitted")
    }

    async fn dump(&mut self) -> fabric_utils::southbound::RouteDatabase {
        let (responder, reply) = tokio::sync::oneshot::channel();
        self.decision
            .process_request(DecisionRequest::DumpRoutes { responder });
        reply.await.unwrap()
    }
}

fn adj(
    other_node: &str,
    local_ifname: &str,
    remote_ifname: &str,
    nexthop_v6: std::net::Ipv6Addr,
    metric: u32,
    overloaded: bool,
) -> Adjacency {
    Adjacency::new(
        other_node.to_owned(),
        local_ifname.to_owned(),
        remote_ifname.to_owned(),
        None,
        Some(nexthop_v6),
        metric,
        Label::UNSET,
        overloaded,
        100,
        1700000000,
        1,
    )
}

fn adj_db(
    node: &str,
    node_label: u32,
    overloaded: bool,
    adjacencies: Vec<Adjacency>,
) -> AdjacencyDatabase {
    AdjacencyDatabase {
        node: node.to_owned(),
        node_label: Label::new(node_label),
        overloaded,
        adjacencies,
        area: AREA.to_owned(),
        perf_events: vec![],
    }
}

fn loopback(prefix: IpNetwork) -> PrefixEntry {
    PrefixEntry::new(prefix, PrefixType::Loopback)
}

fn net(s: &str) -> IpNetwork {
    s.parse().unwrap()
}

//
// Tests.
//

#[tokio::test(start_paused = true)]
async fn two_node_unicast_route() {
    let mut h = Harness::new();
    h.publish_adj(adj_db(
        "node-a",
        0,
        false,
        vec![adj("node-b", "eth1", "eth1", ip6!("fe80::b"), 10, false)],
    ));
    h.publish_adj(adj_db(
        "node-b",
        0,
        false,
        vec![adj("node-a", "eth1", "eth1", ip6!("fe80::a"), 10, false)],
    ));
    h.publish_prefix("node-b", loopback(net6!("2001:db8::2/128").into()));
    h.run_spf().await;

    let delta = h.last_delta();
    assert_eq!(delta.unicast_to_update.len(), 1);
    let route = &delta.unicast_to_update[0];
    assert_eq!(route.prefix, net("2001:db8::2/128"));
    assert_eq!(route.nexthops.len(), 1);
    let nexthop = route.nexthops.first().unwrap();
    assert_eq!(nexthop.addr, IpAddr::V6(ip6!("fe80::b")));
    assert_eq!(nexthop.ifname, "eth1");
    assert_eq!(nexthop.metric, 10);
    assert_eq!(nexthop.neighbor.as_deref(), Some("node-b"));
}

#[tokio::test(start_paused = true)]
async fn parallel_links_produce_ecmp() {
    let mut h = Harness::new();
    h.publish_adj(adj_db(
        "node-a",
        0,
        false,
        vec![
            adj("node-b", "eth1", "eth1", ip6!("fe80::b1"), 10, false),
            adj("node-b", "eth2", "eth2", ip6!("fe80::b2"), 10, false),
        ],
    ));
    h.publish_adj(adj_db(
        "node-b",
        0,
        false,
        vec![
            adj("node-a", "eth1", "eth1", ip6!("fe80::a1"), 10, false),
            adj("node-a", "eth2", "eth2", ip6!("fe80::a2"), 10, false),
        ],
    ));
    h.publish_prefix("node-b", loopback(net6!("2001:db8::2/128").into()));
    h.run_spf().await;

    let delta = h.last_delta();
    let route = &delta.unicast_to_update[0];
    assert_eq!(route.nexthops.len(), 2);
    let addrs = route
        .nexthops
        .iter()
        .map(|nexthop| nexthop.addr)
        .collect::<Vec<_>>();
    assert!(addrs.contains(&IpAddr::V6(ip6!("fe80::b1"))));
    assert!(addrs.contains(&IpAddr::V6(ip6!("fe80::b2"))));
}

// Chain topology helper: node-a <-> node-b <-> node-c.
fn publish_chain(h: &mut Harness, b_overloaded: bool, ab_link_overloaded: bool) {
    h.publish_adj(adj_db(
        "node-a",
        101,
        false,
        vec![adj(
            "node-b",
            "eth1",
            "eth1",
            ip6!("fe80::b"),
            10,
            ab_link_overloaded,
        )],
    ));
    h.publish_adj(adj_db(
        "node-b",
        102,
        b_overloaded,
        vec![
            adj("node-a", "eth1", "eth1", ip6!("fe80::a"), 10, false),
            adj("node-c", "eth2", "eth2", ip6!("fe80::c"), 10, false),
        ],
    ));
    h.publish_adj(adj_db(
        "node-c",
        103,
        false,
        vec![adj("node-b", "eth2", "eth2", ip6!("fe80::b2"), 10, false)],
    ));
    h.publish_prefix("node-b", loopback(net6!("2001:db8::2/128").into()));
    h.publish_prefix("node-c", loopback(net6!("2001:db8::3/128").into()));
}

#[tokio::test(start_paused = true)]
async fn overloaded_node_is_not_transit() {
    let mut h = Harness::new();
    publish_chain(&mut h, true, false);
    h.run_spf().await;

    let routes = h.dump().await;
    // The drained node's own loopback stays reachable...
    assert!(
        routes
            .unicast
            .contains_key(&net("2001:db8::2/128"))
    );
    // ...but nothing is routed through it.
    assert!(
        !routes
            .unicast
            .contains_key(&net("2001:db8::3/128"))
    );
}

#[tokio::test(start_paused = true)]
async fn overloaded_link_carries_only_terminal_traffic() {
    let mut h = Harness::new();
    publish_chain(&mut h, false, true);
    h.run_spf().await;

    let routes = h.dump().await;
    assert!(
        routes
            .unicast
            .contains_key(&net("2001:db8::2/128"))
    );
    assert!(
        !routes
            .unicast
            .contains_key(&net("2001:db8::3/128"))
    );
}

#[tokio::test(start_paused = true)]
async fn drain_event_withdraws_transit_routes() {
    let mut h = Harness::new();
    publish_chain(&mut h, false, false);
    h.run_spf().await;
    let routes = h.dump().await;
    assert_eq!(routes.unicast.len(), 2);

    // The drained bit arrives in a newer adjacency database version.
    h.publish_adj(adj_db(
        "node-b",
        102,
        true,
        vec![
            adj("node-a", "eth1", "eth1", ip6!("fe80::a"), 10, false),
            adj("node-c", "eth2", "eth2", ip6!("fe80::c"), 10, false),
        ],
    ));
    h.run_spf().await;

    let delta = h.last_delta();
    assert_eq!(delta.unicast_to_delete, vec![net("2001:db8::3/128")]);
    let routes = h.dump().await;
    assert!(
        routes
            .unicast
            .contains_key(&net("2001:db8::2/128"))
    );
}

#[tokio::test(start_paused = true)]
async fn min_nexthop_withdraws_degraded_routes() {
    let mut h = Harness::new();
    h.publish_adj(adj_db(
        "node-a",
        0,
        false,
        vec![adj("node-b", "eth1", "eth1", ip6!("fe80::b"), 10, false)],
    ));
    h.publish_adj(adj_db(
        "node-b",
        0,
        false,
        vec![adj("node-a", "eth1", "eth1", ip6!("fe80::a"), 10, false)],
    ));
    let mut entry = loopback(net6!("2001:db8::2/128").into());
    entry.min_nexthop = Some(2);
    h.publish_prefix("node-b", entry);
    h.publish_prefix("node-b", loopback(net6!("2001:db8::22/128").into()));
    h.run_spf().await;

    let routes = h.dump().await;
    // One available path is below the required ECMP width.
    assert!(
        !routes
            .unicast
            .contains_key(&net("2001:db8::2/128"))
    );
    assert!(
        routes
            .unicast
            .contains_key(&net("2001:db8::22/128"))
    );
}

#[tokio::test(start_paused = true)]
async fn locally_best_prefixes_are_not_programmed() {
    let mut h = Harness::new();
    h.publish_adj(adj_db(
        "node-a",
        0,
        false,
        vec![adj("node-b", "eth1", "eth1", ip6!("fe80::b"), 10, false)],
    ));
    h.publish_adj(adj_db(
        "node-b",
        0,
        false,
        vec![adj("node-a", "eth1", "eth1", ip6!("fe80::a"), 10, false)],
    ));

    // Anycast prefix advertised by both ends with equal metrics: the local
    // advertisement is among the winners, so no route is programmed.
    h.publish_prefix("node-b", loopback(net6!("2001:db8::10/128").into()));
    h.publish_prefix("node-a", loopback(net6!("2001:db8::10/128").into()));

    // Same prefix shape, but the local advertisement ranks worse: the
    // remote originator wins and the route goes in.
    let mut weak = loopback(net6!("2001:db8::11/128").into());
    weak.metrics.path_preference -= 1;
    h.publish_prefix("node-a", weak);
    h.publish_prefix("node-b", loopback(net6!("2001:db8::11/128").into()));
    h.run_spf().await;

    let routes = h.dump().await;
    assert!(!routes.unicast.contains_key(&net("2001:db8::10/128")));
    assert!(routes.unicast.contains_key(&net("2001:db8::11/128")));
}

#[tokio::test(start_paused = true)]
async fn tied_winners_use_smallest_node_representative() {
    let mut h = Harness::new();
    publish_chain(&mut h, false, false);

    // Both reachable nodes advertise the prefix with equal metrics but
    // conflicting min-nexthop requirements. The smallest originating node
    // (node-b) represents the tie; node-c's stricter requirement must not
    // withdraw the route.
    let mut from_b = loopback(net6!("2001:db8::20/128").into());
    from_b.min_nexthop = Some(1);
    let mut from_c = loopback(net6!("2001:db8::20/128").into());
    from_c.min_nexthop = Some(5);
    h.publish_prefix("node-b", from_b);
    h.publish_prefix("node-c", from_c);
    h.run_spf().await;

    let routes = h.dump().await;
    assert!(routes.unicast.contains_key(&net("2001:db8::20/128")));
}

#[tokio::test(start_paused = true)]
async fn segment_routing_label_routes() {
    let mut h = Harness::new();
    publish_chain(&mut h, false, false);
    let mut entry = loopback(net6!("2001:db8::3/128").into());
    entry.forwarding_type = ForwardingType::SrMpls;
    h.publish_prefix("node-c", entry);
    h.run_spf().await;

    let routes = h.dump().await;

    // Unicast to the remote originator pushes its node label; the
    // penultimate hop case (node-b's own prefix) pushes nothing.
    let to_c = &routes.unicast[&net("2001:db8::3/128")];
    let nexthop = to_c.nexthops.first().unwrap();
    assert_eq!(
        nexthop.mpls_action,
        Some(MplsAction::Push(vec![Label::new(103)]))
    );

    // Node label of the adjacent node: penultimate hop pop.
    let php = &routes.mpls[&Label::new(102)];
    assert_eq!(
        php.nexthops.first().unwrap().mpls_action,
        Some(MplsAction::Php)
    );

    // Node label of the distant node: swap through the adjacent one.
    let swap = &routes.mpls[&Label::new(103)];
    assert_eq!(
        swap.nexthops.first().unwrap().mpls_action,
        Some(MplsAction::Swap(Label::new(103)))
    );
}

#[tokio::test(start_paused = true)]
async fn output_is_deterministic() {
    let mut h1 = Harness::new();
    let mut h2 = Harness::new();
    for h in [&mut h1, &mut h2] {
        publish_chain(h, false, false);
        h.run_spf().await;
    }
    assert_eq!(h1.dump().await, h2.dump().await);
    assert_eq!(h1.last_delta(), h2.last_delta());
}
