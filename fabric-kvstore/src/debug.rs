//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span};

use crate::peer::PeerState;

// KV-Store debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Peering
    PeerAdd(&'a str, &'a str),
    PeerDel(&'a str, &'a str),
    PeerStateChange(&'a str, &'a str, PeerState, PeerState),
    SyncDone(&'a str, &'a str, usize),
    // Store maintenance
    KeyExpire(&'a str, &'a str),
    TtlRefresh(&'a str, usize),
    // Flooding
    PublicationRx(&'a str, &'a str, usize),
    FloodTx(&'a str, usize, usize),
    LoopPrevented(&'a str, &'a str),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::PeerAdd(area, name) | Debug::PeerDel(area, name) => {
                debug_span!("peer", %area, %name).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::PeerStateChange(area, name, old_state, new_state) => {
                debug_span!("peer", %area, %name).in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                })
            }
            Debug::SyncDone(area, name, keys) => {
                debug_span!("peer", %area, %name).in_scope(|| {
                    debug!(%keys, "{}", self);
                })
            }
            Debug::KeyExpire(area, key) => {
                debug!(%area, %key, "{}", self);
            }
            Debug::TtlRefresh(area, keys) => {
                debug!(%area, %keys, "{}", self);
            }
            Debug::PublicationRx(area, peer, keys) => {
                debug!(%area, %peer, %keys, "{}", self);
            }
            Debug::FloodTx(area, peers, keys) => {
                debug!(%area, %peers, %keys, "{}", self);
            }
            Debug::LoopPrevented(area, peer) => {
                debug!(%area, %peer, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::PeerAdd(..) => {
                write!(f, "peer added")
            }
            Debug::PeerDel(..) => {
                write!(f, "peer deleted")
            }
            Debug::PeerStateChange(..) => {
                write!(f, "peer state change")
            }
            Debug::SyncDone(..) => {
                write!(f, "full sync completed")
            }
            Debug::KeyExpire(..) => {
                write!(f, "key expired")
            }
            Debug::TtlRefresh(..) => {
                write!(f, "refreshed self-originated keys")
            }
            Debug::PublicationRx(..) => {
                write!(f, "publication received")
            }
            Debug::FloodTx(..) => {
                write!(f, "publication flooded")
            }
            Debug::LoopPrevented(..) => {
                write!(f, "publication dropped (already traversed)")
            }
        }
    }
}
