//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use fabric_utils::mpls::MplsAction;
use fabric_utils::prefix::{
    ForwardingType, PrefixMetrics, resolve_forwarding, select_winners,
};
use fabric_utils::southbound::{
    MplsRoute, Nexthop, RouteDatabase, UnicastRoute,
};
use ipnetwork::IpNetwork;

use crate::instance::DecisionConfig;
use crate::lsdb::LinkState;
use crate::spf::{self, FirstHop, Vertex};

// One unicast candidate during the cross-area merge.
struct UnicastCandidate {
    metrics: PrefixMetrics,
    route: UnicastRoute,
}

// ===== global functions =====

// Computes the full route database from the link-state of all areas.
//
// The result is a pure function of the LSDB snapshot: identical input
// yields an identical database.
pub(crate) fn build_route_database(
    config: &DecisionConfig,
    areas: &BTreeMap<String, LinkState>,
) -> RouteDatabase {
    let mut route_db = RouteDatabase::default();
    let mut unicast: BTreeMap<IpNetwork, UnicastCandidate> = BTreeMap::new();

    for (area_id, ls) in areas {
        let spt = spf::run_spf(ls, &config.node_id, config.ecmp_width);
        if spt.is_empty() {
            continue;
        }

        build_area_unicast(config, area_id, ls, &spt, &mut unicast);
        build_area_mpls(config, area_id, ls, &spt, &mut route_db);
    }

    route_db.unicast = unicast
        .into_iter()
        .map(|(prefix, candidate)| (prefix, candidate.route))
        .collect();
    route_db
}

// ===== helper functions =====

fn build_area_unicast(
    config: &DecisionConfig,
    area_id: &str,
    ls: &LinkState,
    spt: &BTreeMap<crate::lsdb::NodeId, Vertex>,
    unicast: &mut BTreeMap<IpNetwork, UnicastCandidate>,
) {
    for (prefix, by_node) in &ls.prefixes {
        // Reachable remote originators of this prefix.
        let originators = by_node
            .iter()
            .filter(|(node, _)| **node != config.node_id)
            .filter_map(|(node, entry)| {
                let id = ls.id(node)?;
                let vertex = spt.get(&id)?;
                if vertex.firsthops.is_empty() {
                    return None;
                }
                Some((node.as_str(), entry, vertex))
            })
            .collect::<Vec<_>>();
        if originators.is_empty() {
            continue;
        }

        // Select the best originators; ties keep every winner.
        let entries =
            originators.iter().map(|(_, entry, _)| *entry).collect::<Vec<_>>();
        let winners = select_winners(&entries);
        let best_metrics = winners[0].metrics;

        // Prefer local: a prefix whose local advertisement ranks among the
        // winners is a local destination, nothing to program.
        if by_node
            .get(&config.node_id)
            .is_some_and(|local| local.metrics >= best_metrics)
        {
            continue;
        }

        // The originators map iterates in node order, so the first winner
        // is keyed on the smallest originating node.
        let representative = winners[0];
        let (forwarding_type, _) = resolve_forwarding(&winners);

        // Union of the winners' shortest-path next-hops.
        let mut nexthops = BTreeSet::new();
        for (node, _, vertex) in originators
            .iter()
            .filter(|(_, entry, _)| entry.metrics == best_metrics)
        {
            let node_label = ls
                .id(node)
                .and_then(|id| ls.node(id))
                .map(|db| db.node_label)
                .unwrap_or_default();
            for firsthop in &vertex.firsthops {
                let Some(addr) = nexthop_addr(prefix, firsthop) else {
                    continue;
                };
                // Label stack: push the originator's node label, except on
                // the penultimate hop where the neighbor is the
                // destination itself.
                let mpls_action = if forwarding_type
                    == ForwardingType::SrMpls
                    && !node_label.is_unset()
                    && firsthop.neighbor != *node
                {
                    Some(MplsAction::Push(vec![node_label]))
                } else {
                    None
                };
                nexthops.insert(Nexthop::new(
                    addr,
                    firsthop.local_ifname.clone(),
                    vertex.distance,
                    mpls_action,
                    Some(area_id.to_owned()),
                    Some(firsthop.neighbor.clone()),
                ));
            }
        }
        while nexthops.len() > config.ecmp_width {
            nexthops.pop_last();
        }

        // Too few paths: withdraw rather than program a degraded route.
        if representative
            .min_nexthop
            .is_some_and(|min| (nexthops.len() as u32) < min)
        {
            continue;
        }
        if nexthops.is_empty() {
            continue;
        }

        let candidate = UnicastCandidate {
            metrics: best_metrics,
            route: UnicastRoute::new(*prefix, nexthops),
        };
        merge_unicast(unicast, *prefix, candidate);
    }
}

fn build_area_mpls(
    config: &DecisionConfig,
    area_id: &str,
    ls: &LinkState,
    spt: &BTreeMap<crate::lsdb::NodeId, Vertex>,
    route_db: &mut RouteDatabase,
) {
    // Node segment labels: swap on transit, pop on the penultimate hop.
    for (id, vertex) in spt {
        if vertex.firsthops.is_empty() {
            continue;
        }
        let Some(db) = ls.node(*id) else {
            continue;
        };
        if db.node_label.is_unset() {
            continue;
        }
        let node_name = ls.name(*id);

        let mut nexthops = BTreeSet::new();
        for firsthop in &vertex.firsthops {
            let Some(addr) = firsthop
                .nexthop_v6
                .map(IpAddr::V6)
                .or(firsthop.nexthop_v4.map(IpAddr::V4))
            else {
                continue;
            };
            let mpls_action = if firsthop.neighbor == node_name {
                MplsAction::Php
            } else {
                MplsAction::Swap(db.node_label)
            };
            nexthops.insert(Nexthop::new(
                addr,
                firsthop.local_ifname.clone(),
                vertex.distance,
                Some(mpls_action),
                Some(area_id.to_owned()),
                Some(firsthop.neighbor.clone()),
            ));
        }
        while nexthops.len() > config.ecmp_width {
            nexthops.pop_last();
        }
        if nexthops.is_empty() {
            continue;
        }

        let route = MplsRoute::new(db.node_label, nexthops);
        merge_mpls(route_db, route);
    }

    // Local adjacency labels: pop and forward over the one adjacency.
    if let Some(self_db) = ls.id(&config.node_id).and_then(|id| ls.node(id)) {
        for adj in &self_db.adjacencies {
            if adj.adj_label.is_unset()
                || !ls.is_bidirectional(&config.node_id, adj)
            {
                continue;
            }
            let Some(addr) = adj
                .nexthop_v6
                .map(IpAddr::V6)
                .or(adj.nexthop_v4.map(IpAddr::V4))
            else {
                continue;
            };
            let nexthop = Nexthop::new(
                addr,
                adj.local_ifname.clone(),
                adj.metric,
                Some(MplsAction::Php),
                Some(area_id.to_owned()),
                Some(adj.other_node.clone()),
            );
            let route =
                MplsRoute::new(adj.adj_label, BTreeSet::from([nexthop]));
            merge_mpls(route_db, route);
        }
    }
}

// Address of a next-hop, in the family of the routed prefix.
fn nexthop_addr(prefix: &IpNetwork, firsthop: &FirstHop) -> Option<IpAddr> {
    match prefix {
        IpNetwork::V4(_) => firsthop.nexthop_v4.map(IpAddr::V4),
        IpNetwork::V6(_) => firsthop.nexthop_v6.map(IpAddr::V6),
    }
}

// Cross-area merge: better metrics win, then shorter paths; a full tie
// combines the next-hop sets.
fn merge_unicast(
    unicast: &mut BTreeMap<IpNetwork, UnicastCandidate>,
    prefix: IpNetwork,
    candidate: UnicastCandidate,
) {
    match unicast.get_mut(&prefix) {
        None => {
            unicast.insert(prefix, candidate);
        }
        Some(existing) => {
            let ord = candidate.metrics.cmp(&existing.metrics).then_with(|| {
                min_metric(&existing.route.nexthops)
                    .cmp(&min_metric(&candidate.route.nexthops))
            });
            match ord {
                Ordering::Greater => *existing = candidate,
                Ordering::Equal => {
                    existing
                        .route
                        .nexthops
                        .extend(candidate.route.nexthops);
                }
                Ordering::Less => (),
            }
        }
    }
}

fn merge_mpls(route_db: &mut RouteDatabase, route: MplsRoute) {
    match route_db.mpls.get_mut(&route.label) {
        None => {
            route_db.mpls.insert(route.label, route);
        }
        Some(existing) => {
            if min_metric(&route.nexthops)
                < min_metric(&existing.nexthops)
            {
                *existing = route;
            }
        }
    }
}

fn min_metric(nexthops: &BTreeSet<Nexthop>) -> u32 {
    nexthops
        .iter()
        .map(|nexthop| nexthop.metric)
        .min()
        .unwrap_or(u32::MAX)
}
