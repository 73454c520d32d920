//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use tracing::{debug, debug_span};

// Link-Monitor debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Interfaces
    InterfaceCreate(&'a str),
    InterfaceStateChange(&'a str, bool),
    InterfaceBackoff(&'a str, Duration),
    // Neighbors
    NeighborUp(&'a str, &'a str),
    NeighborDown(&'a str, &'a str),
    NeighborRestarting(&'a str, &'a str),
    NeighborRttChange(&'a str, &'a str, i64),
    // Advertisement
    AdvertiseAdjacencies(&'a str, usize),
    PeerChange(&'a str, usize, usize),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InterfaceCreate(name) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::InterfaceStateChange(name, up) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!(%up, "{}", self);
                })
            }
            Debug::InterfaceBackoff(name, backoff) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!(?backoff, "{}", self);
                })
            }
            Debug::NeighborUp(node, ifname)
            | Debug::NeighborDown(node, ifname)
            | Debug::NeighborRestarting(node, ifname) => {
                debug_span!("neighbor", %node, %ifname).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::NeighborRttChange(node, ifname, rtt_us) => {
                debug_span!("neighbor", %node, %ifname).in_scope(|| {
                    debug!(%rtt_us, "{}", self);
                })
            }
            Debug::AdvertiseAdjacencies(area, count) => {
                debug!(%area, %count, "{}", self);
            }
            Debug::PeerChange(area, added, deleted) => {
                debug!(%area, %added, %deleted, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InterfaceCreate(..) => {
                write!(f, "interface created")
            }
            Debug::InterfaceStateChange(..) => {
                write!(f, "interface state change")
            }
            Debug::InterfaceBackoff(..) => {
                write!(f, "interface entered flap backoff")
            }
            Debug::NeighborUp(..) => {
                write!(f, "neighbor up")
            }
            Debug::NeighborDown(..) => {
                write!(f, "neighbor down")
            }
            Debug::NeighborRestarting(..) => {
                write!(f, "neighbor restarting")
            }
            Debug::NeighborRttChange(..) => {
                write!(f, "neighbor rtt change")
            }
            Debug::AdvertiseAdjacencies(..) => {
                write!(f, "advertising adjacency database")
            }
            Debug::PeerChange(..) => {
                write!(f, "kv peer set updated")
            }
        }
    }
}
