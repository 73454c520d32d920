//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use fabric_utils::UnboundedSender;
use fabric_utils::kv::{PeerSpec, Publication};
use fabric_utils::task::{Task, TimeoutTask};
use tokio::time::Instant;
use tracing::{Instrument, debug_span};

use crate::rpc::PeerRpc;

//
// KV-Store tasks diagram:
//                                    +--------------+
//                 requests (1x) ->   |              |
//            peer ingress (1x) ->    |              |
//                                    |   instance   |
//           peer_sync (Nx) ------->  |              | -> (Nx) peer_flood
//           sync_retry_timer (Nx) -> |              |
//           store_timer (Nx) ------> |              |
//                                    +--------------+
//                                          |
//                                          V
//                                 publications / sync events
//

// KV-Store inter-task message types.
pub mod messages {
    use std::collections::BTreeMap;

    use fabric_utils::Responder;
    use fabric_utils::kv::{Publication, Value};
    use serde::{Deserialize, Serialize};

    use crate::rpc::{RpcError, SyncResponse};

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            PeerPublication(PeerPublicationMsg),
            FullSyncRequest(FullSyncRequestMsg),
            SyncResult(SyncResultMsg),
            SyncRetry(SyncRetryMsg),
            FloodError(FloodErrorMsg),
            StoreTimer(StoreTimerMsg),
        }

        // Publication received from a peer.
        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct PeerPublicationMsg {
            pub peer: String,
            pub publication: Publication,
        }

        // Full-sync request served on behalf of a peer.
        #[derive(Debug)]
        pub struct FullSyncRequestMsg {
            pub area: String,
            pub peer: String,
            pub remote_hashes: BTreeMap<String, Value>,
            pub responder: Responder<SyncResponse>,
        }

        // Outcome of a full sync we initiated.
        #[derive(Debug)]
        pub struct SyncResultMsg {
            pub area: String,
            pub peer: String,
            pub result: Result<SyncResponse, RpcError>,
        }

        // Sync retry backoff expired.
        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct SyncRetryMsg {
            pub area: String,
            pub peer: String,
        }

        // Flood transmission to a peer failed.
        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct FloodErrorMsg {
            pub area: String,
            pub peer: String,
            pub error: RpcError,
        }

        // Expiry/refresh deadline reached in an area.
        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct StoreTimerMsg {
            pub area: String,
        }
    }
}

// ===== KV-Store tasks =====

// Full sync with a newly added (or recovering) peer.
pub(crate) fn peer_sync(
    area: String,
    peer: String,
    spec: PeerSpec,
    rpc: Arc<dyn PeerRpc>,
    local_hashes: std::collections::BTreeMap<
        String,
        fabric_utils::kv::Value,
    >,
    sync_resultp: &UnboundedSender<messages::input::ProtocolMsg>,
) -> Task<()> {
    let span = debug_span!("sync", %area, %peer);
    let _span_guard = span.enter();

    let sync_resultp = sync_resultp.clone();
    Task::spawn(
        async move {
            let result = rpc.full_sync(&spec, &area, local_hashes).await;
            let msg = messages::input::SyncResultMsg { area, peer, result };
            let _ = sync_resultp
                .send(messages::input::ProtocolMsg::SyncResult(msg));
        }
        .in_current_span(),
    )
}

// Per-peer flood transmit loop. Drains the peer's flood queue so a slow
// peer never backpressures the store.
pub(crate) fn peer_flood(
    area: String,
    peer: String,
    spec: PeerSpec,
    rpc: Arc<dyn PeerRpc>,
    mut flood_rx: fabric_utils::UnboundedReceiver<Publication>,
    flood_errorp: &UnboundedSender<messages::input::ProtocolMsg>,
) -> Task<()> {
    let span = debug_span!("flood", %area, %peer);
    let _span_guard = span.enter();

    let flood_errorp = flood_errorp.clone();
    Task::spawn(
        async move {
            while let Some(publication) = flood_rx.recv().await {
                if let Err(error) = rpc.flood(&spec, publication).await {
                    let msg = messages::input::FloodErrorMsg {
                        area,
                        peer,
                        error,
                    };
                    let _ = flood_errorp
                        .send(messages::input::ProtocolMsg::FloodError(msg));
                    break;
                }
            }
        }
        .in_current_span(),
    )
}

// Sync retry backoff timer.
pub(crate) fn sync_retry_timer(
    area: String,
    peer: String,
    backoff: Duration,
    sync_retryp: &UnboundedSender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let sync_retryp = sync_retryp.clone();
    TimeoutTask::new(backoff, move || async move {
        let msg = messages::input::SyncRetryMsg { area, peer };
        let _ = sync_retryp.send(messages::input::ProtocolMsg::SyncRetry(msg));
    })
}

// Area expiry/refresh timer, armed at the nearest deadline.
pub(crate) fn store_timer(
    area: String,
    deadline: Instant,
    store_timerp: &UnboundedSender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let timeout = deadline.saturating_duration_since(Instant::now());
    let store_timerp = store_timerp.clone();
    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::StoreTimerMsg { area };
        let _ =
            store_timerp.send(messages::input::ProtocolMsg::StoreTimer(msg));
    })
}
