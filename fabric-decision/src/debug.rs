//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span};

use crate::spf;

// Decision debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // LSDB maintenance
    AdjDbUpdate(&'a str, &'a str, usize),
    AdjDbRemove(&'a str, &'a str),
    PrefixUpdate(&'a str, &'a str),
    // SPF
    SpfDelayFsmEvent(&'a spf::fsm::State, &'a spf::fsm::Event),
    SpfDelayFsmTransition(&'a spf::fsm::State, &'a spf::fsm::State),
    SpfRun(usize, usize),
    // Routes
    RouteUpdate(usize, usize, usize, usize),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::AdjDbUpdate(area, node, adjacencies) => {
                debug!(%area, %node, %adjacencies, "{}", self);
            }
            Debug::AdjDbRemove(area, node) => {
                debug!(%area, %node, "{}", self);
            }
            Debug::PrefixUpdate(area, key) => {
                debug!(%area, %key, "{}", self);
            }
            Debug::SpfDelayFsmEvent(state, event) => {
                debug_span!("fsm").in_scope(|| {
                    debug!(?state, ?event, "{}", self);
                })
            }
            Debug::SpfDelayFsmTransition(old_state, new_state) => {
                debug_span!("fsm").in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                })
            }
            Debug::SpfRun(areas, nodes) => {
                debug!(%areas, %nodes, "{}", self);
            }
            Debug::RouteUpdate(
                unicast_update,
                unicast_delete,
                mpls_update,
                mpls_delete,
            ) => {
                debug!(
                    %unicast_update, %unicast_delete,
                    %mpls_update, %mpls_delete,
                    "{}", self
                );
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::AdjDbUpdate(..) => {
                write!(f, "adjacency database updated")
            }
            Debug::AdjDbRemove(..) => {
                write!(f, "adjacency database removed")
            }
            Debug::PrefixUpdate(..) => {
                write!(f, "prefix entry updated")
            }
            Debug::SpfDelayFsmEvent(..) => {
                write!(f, "SPF delay FSM event")
            }
            Debug::SpfDelayFsmTransition(..) => {
                write!(f, "SPF delay FSM state transition")
            }
            Debug::SpfRun(..) => {
                write!(f, "SPF computation")
            }
            Debug::RouteUpdate(..) => {
                write!(f, "route database delta")
            }
        }
    }
}
