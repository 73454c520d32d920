//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use async_trait::async_trait;
use fabric_utils::kv::{PeerSpec, Publication, Value};
use serde::{Deserialize, Serialize};

// Response to a full-sync request: the values the responder holds that are
// newer than (or absent from) the requester's hash snapshot.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct SyncResponse {
    pub key_vals: BTreeMap<String, Value>,
}

// Peer transport errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RpcError {
    Timeout,
    Unreachable(String),
}

/// Transport used to talk to KV-Store peers.
///
/// The store never blocks its event loop on a peer: sync requests run in
/// spawned tasks that post their result back as input messages, and floods
/// drain through per-peer queues.
#[async_trait]
pub trait PeerRpc: Send + Sync {
    /// Requests a full sync from the peer. The peer diffs the provided hash
    /// snapshot against its own store and returns the differing values.
    async fn full_sync(
        &self,
        peer: &PeerSpec,
        area: &str,
        local_hashes: BTreeMap<String, Value>,
    ) -> Result<SyncResponse, RpcError>;

    /// Delivers one publication to the peer.
    async fn flood(
        &self,
        peer: &PeerSpec,
        publication: Publication,
    ) -> Result<(), RpcError>;
}

// ===== impl RpcError =====

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout => write!(f, "request timed out"),
            RpcError::Unreachable(reason) => {
                write!(f, "peer unreachable: {}", reason)
            }
        }
    }
}

impl std::error::Error for RpcError {}
