//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{warn, warn_span};

use crate::rpc::RpcError;

// KV-Store errors.
#[derive(Debug)]
pub enum Error {
    // Inter-task communication
    AreaNotFound(String),
    // Peering
    PeerSyncFailed(String, String, RpcError),
    PeerFloodFailed(String, String, RpcError),
    // Protocol input
    InvalidTtl(String, i64),
    HashMismatch(String),
    KeyFiltered(String),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::AreaNotFound(area) => {
                warn!(%area, "{}", self);
            }
            Error::PeerSyncFailed(area, peer, error)
            | Error::PeerFloodFailed(area, peer, error) => {
                warn_span!("peer", %area, name = %peer).in_scope(|| {
                    warn!(%error, "{}", self);
                })
            }
            Error::InvalidTtl(key, ttl) => {
                warn!(%key, %ttl, "{}", self);
            }
            Error::HashMismatch(key) => {
                warn!(%key, "{}", self);
            }
            Error::KeyFiltered(key) => {
                warn!(%key, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AreaNotFound(..) => {
                write!(f, "area not found")
            }
            Error::PeerSyncFailed(..) => {
                write!(f, "peer full sync failed")
            }
            Error::PeerFloodFailed(..) => {
                write!(f, "flood to peer failed")
            }
            Error::InvalidTtl(..) => {
                write!(f, "received value with invalid ttl")
            }
            Error::HashMismatch(..) => {
                write!(f, "received value with inconsistent hash")
            }
            Error::KeyFiltered(..) => {
                write!(f, "key rejected by area filter")
            }
        }
    }
}

impl std::error::Error for Error {}
