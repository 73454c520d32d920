//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use derive_new::new;
use enum_as_inner::EnumAsInner;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::mpls::{Label, MplsAction};

// ===== kernel ingress events =====

// Kernel link/address event, as decoded from the netlink stream.
#[derive(Clone, Debug, EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum NetlinkEvent {
    Link(LinkMsg),
    Address(AddressMsg),
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LinkMsg {
    pub ifname: String,
    pub ifindex: u32,
    pub up: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct AddressMsg {
    pub ifindex: u32,
    pub addr: IpNetwork,
    // false means the address was removed.
    pub valid: bool,
}

// ===== interface snapshots =====

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceInfo {
    pub is_up: bool,
    pub ifindex: u32,
    pub networks: BTreeSet<IpNetwork>,
}

// Snapshot of the local interface table, published by the Link-Monitor.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceDatabase {
    pub node: String,
    pub interfaces: BTreeMap<String, InterfaceInfo>,
}

// ===== routes =====

// Next-hop of a computed route.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct Nexthop {
    pub addr: IpAddr,
    pub ifname: String,
    // Accumulated path metric.
    pub metric: u32,
    // Label operation for MPLS and SR-MPLS routes.
    pub mpls_action: Option<MplsAction>,
    // Area and neighbor the path goes through.
    pub area: Option<String>,
    pub neighbor: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct UnicastRoute {
    pub prefix: IpNetwork,
    pub nexthops: BTreeSet<Nexthop>,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct MplsRoute {
    pub label: Label,
    pub nexthops: BTreeSet<Nexthop>,
}

// Full routing state computed by Decision.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteDatabase {
    pub unicast: BTreeMap<IpNetwork, UnicastRoute>,
    pub mpls: BTreeMap<Label, MplsRoute>,
}

// Difference between two route databases; the unit of work sent to Fib.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteDatabaseDelta {
    pub unicast_to_update: Vec<UnicastRoute>,
    pub unicast_to_delete: Vec<IpNetwork>,
    pub mpls_to_update: Vec<MplsRoute>,
    pub mpls_to_delete: Vec<Label>,
}

// ===== impl RouteDatabase =====

impl RouteDatabase {
    // Computes the delta that turns `previous` into `self`.
    pub fn delta_from(&self, previous: &RouteDatabase) -> RouteDatabaseDelta {
        let mut delta = RouteDatabaseDelta::default();

        for (prefix, route) in &self.unicast {
            if previous.unicast.get(prefix) != Some(route) {
                delta.unicast_to_update.push(route.clone());
            }
        }
        for prefix in previous.unicast.keys() {
            if !self.unicast.contains_key(prefix) {
                delta.unicast_to_delete.push(*prefix);
            }
        }
        for (label, route) in &self.mpls {
            if previous.mpls.get(label) != Some(route) {
                delta.mpls_to_update.push(route.clone());
            }
        }
        for label in previous.mpls.keys() {
            if !self.mpls.contains_key(label) {
                delta.mpls_to_delete.push(*label);
            }
        }

        delta
    }
}

// ===== impl RouteDatabaseDelta =====

impl RouteDatabaseDelta {
    pub fn is_empty(&self) -> bool {
        self.unicast_to_update.is_empty()
            && self.unicast_to_delete.is_empty()
            && self.mpls_to_update.is_empty()
            && self.mpls_to_delete.is_empty()
    }
}
