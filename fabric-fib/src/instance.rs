//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use fabric_utils::mpls::MplsAction;
use fabric_utils::southbound::{
    MplsRoute, RouteDatabase, RouteDatabaseDelta,
};
use fabric_utils::task::{IntervalTask, TimeoutTask};
use fabric_utils::{UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;

use crate::debug::Debug;
use crate::error::Error;
use crate::platform::FibPlatform;
use crate::tasks;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::ProtocolMsg;

#[derive(Clone, Debug)]
pub struct FibConfig {
    pub retry_initial: Duration,
    pub retry_max: Duration,
    pub sync_interval: Duration,
}

// Fib instance: applies route deltas to the platform and keeps a shadow of
// what was successfully programmed.
pub struct Fib {
    pub config: FibConfig,
    platform: Arc<dyn FibPlatform>,
    // Target state, updated by every incoming delta.
    desired: RouteDatabase,
    // Last state known to be programmed.
    pub programmed: RouteDatabase,
    // Retry machinery.
    backoff: Duration,
    pub retry_timer: Option<TimeoutTask>,
    _sync_interval: IntervalTask,
    pub sync_failures: u64,
    proto_tx: UnboundedSender<ProtocolInputMsg>,
}

// ===== impl Fib =====

impl Fib {
    pub fn new(
        config: FibConfig,
        platform: Arc<dyn FibPlatform>,
    ) -> (Fib, UnboundedReceiver<ProtocolInputMsg>) {
        let (proto_tx, proto_rx) = mpsc::unbounded_channel();
        let sync_interval =
            tasks::sync_interval(config.sync_interval, &proto_tx);
        let backoff = config.retry_initial;
        let fib = Fib {
            config,
            platform,
            desired: Default::default(),
            programmed: Default::default(),
            backoff,
            retry_timer: None,
            _sync_interval: sync_interval,
            sync_failures: 0,
            proto_tx,
        };
        (fib, proto_rx)
    }

    /// Runs the event loop until the delta queue is closed.
    pub async fn run(
        mut self,
        mut deltas: UnboundedReceiver<RouteDatabaseDelta>,
        mut proto_rx: UnboundedReceiver<ProtocolInputMsg>,
    ) {
        loop {
            tokio::select! {
                msg = deltas.recv() => match msg {
                    Some(delta) => {
                        self.apply_delta(delta);
                        self.sync().await;
                    }
                    None => break,
                },
                Some(msg) = proto_rx.recv() => match msg {
                    ProtocolMsg::Retry => {
                        self.retry_timer_expired().await;
                    }
                    ProtocolMsg::FullResync => {
                        self.full_resync().await;
                    }
                }
            }
        }
    }

    // Folds a delta into the target state.
    pub fn apply_delta(&mut self, delta: RouteDatabaseDelta) {
        Debug::DeltaApply(
            delta.unicast_to_update.len(),
            delta.unicast_to_delete.len(),
            delta.mpls_to_update.len(),
            delta.mpls_to_delete.len(),
        )
        .log();

        for route in delta.unicast_to_update {
            self.desired.unicast.insert(route.prefix, route);
        }
        for prefix in delta.unicast_to_delete {
            self.desired.unicast.remove(&prefix);
        }
        for route in delta.mpls_to_update {
            let route = php_preference(route);
            self.desired.mpls.insert(route.label, route);
        }
        for label in delta.mpls_to_delete {
            self.desired.mpls.remove(&label);
        }
    }

    // Pushes the difference between the programmed shadow and the target
    // state to the platform. On failure, leaves the shadow untouched and
    // arms the retry backoff.
    pub async fn sync(&mut self) {
        let delta = self.desired.delta_from(&self.programmed);
        if delta.is_empty() {
            return;
        }

        let result = async {
            if !delta.unicast_to_delete.is_empty() {
                self.platform
                    .delete_unicast_routes(delta.unicast_to_delete)
                    .await?;
            }
            if !delta.unicast_to_update.is_empty() {
                self.platform
                    .add_unicast_routes(delta.unicast_to_update)
                    .await?;
            }
            if !delta.mpls_to_delete.is_empty() {
                self.platform
                    .delete_mpls_routes(delta.mpls_to_delete)
                    .await?;
            }
            if !delta.mpls_to_update.is_empty() {
                self.platform.add_mpls_routes(delta.mpls_to_update).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.programmed = self.desired.clone();
                self.backoff = self.config.retry_initial;
                Debug::SyncOk(
                    self.programmed.unicast.len(),
                    self.programmed.mpls.len(),
                )
                .log();
            }
            Err(error) => {
                self.sync_failures += 1;
                Error::SyncFailed(error, self.backoff).log();
                self.retry_timer =
                    Some(tasks::retry_timer(self.backoff, &self.proto_tx));
                self.backoff =
                    std::cmp::min(self.backoff * 2, self.config.retry_max);
            }
        }
    }

    // Retry backoff expired: try to converge again.
    pub async fn retry_timer_expired(&mut self) {
        self.retry_timer = None;
        self.sync().await;
    }

    // Reconciles against the actual platform state, repairing any drift
    // left behind by failures or external interference.
    pub async fn full_resync(&mut self) {
        Debug::FullResync.log();
        match self.platform.get_route_table().await {
            Ok(actual) => {
                self.programmed = actual;
                self.sync().await;
            }
            Err(error) => {
                self.sync_failures += 1;
                Error::ResyncFailed(error).log();
            }
        }
    }
}

// ===== global functions =====

// Within one MPLS ECMP group, penultimate-hop-pop next-hops are preferred:
// if any is present, all swap next-hops are dropped. Mixing both would make
// label handling depend on the hash of the flow.
pub fn php_preference(mut route: MplsRoute) -> MplsRoute {
    let has_php = route
        .nexthops
        .iter()
        .any(|nexthop| nexthop.mpls_action == Some(MplsAction::Php));
    if has_php {
        route
            .nexthops
            .retain(|nexthop| nexthop.mpls_action == Some(MplsAction::Php));
    }
    route
}
