//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use fabric_utils::UnboundedSender;
use fabric_utils::kv::{PeerSpec, Publication};
use fabric_utils::task::{Task, TimeoutTask};
use serde::{Deserialize, Serialize};

use crate::debug::Debug;

// Initial and maximum retry backoff for failed peer syncs.
pub const SYNC_BACKOFF_INITIAL: Duration = Duration::from_secs(4);
pub const SYNC_BACKOFF_MAX: Duration = Duration::from_secs(64);

// Peer session states.
//
// A freshly added peer starts in `Syncing`; `Initialized` is reached after
// the first successful full sync and is required for flood eligibility.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PeerState {
    #[default]
    Idle,
    Syncing,
    Initialized,
}

// One KV-Store peer session.
#[derive(Debug)]
pub struct KvPeer {
    pub name: String,
    pub spec: PeerSpec,
    pub state: PeerState,
    // Current sync retry backoff; doubles on failure, capped.
    pub backoff: Duration,
    // In-flight full sync.
    pub sync_task: Option<Task<()>>,
    // Pending sync retry.
    pub retry_timer: Option<TimeoutTask>,
    // Flood egress queue, drained by a per-peer transmit task.
    pub flood_tx: Option<UnboundedSender<Publication>>,
    pub flood_task: Option<Task<()>>,
}

// ===== impl KvPeer =====

impl KvPeer {
    pub fn new(name: String, spec: PeerSpec) -> KvPeer {
        KvPeer {
            name,
            spec,
            state: PeerState::Idle,
            backoff: SYNC_BACKOFF_INITIAL,
            sync_task: None,
            retry_timer: None,
            flood_tx: None,
            flood_task: None,
        }
    }

    // Transitions the peer state, logging the change.
    pub fn state_change(&mut self, area: &str, new_state: PeerState) {
        if self.state == new_state {
            return;
        }
        Debug::PeerStateChange(area, &self.name, self.state, new_state).log();
        self.state = new_state;
    }

    // Doubles the retry backoff, up to the cap, returning the value to use
    // for the next retry.
    pub fn next_backoff(&mut self) -> Duration {
        let backoff = self.backoff;
        self.backoff = std::cmp::min(self.backoff * 2, SYNC_BACKOFF_MAX);
        backoff
    }

    // Resets backoff after a successful sync.
    pub fn reset_backoff(&mut self) {
        self.backoff = SYNC_BACKOFF_INITIAL;
    }

    // Tears down the flood machinery, e.g. when the peer falls out of the
    // Initialized state.
    pub fn stop_flooding(&mut self) {
        self.flood_tx = None;
        self.flood_task = None;
    }

    // Enqueues a publication for transmission. Never blocks: the per-peer
    // task drains the queue at the peer's pace.
    pub fn enqueue_flood(&self, publication: Publication) -> bool {
        match &self.flood_tx {
            Some(flood_tx) => flood_tx.send(publication).is_ok(),
            None => false,
        }
    }
}
