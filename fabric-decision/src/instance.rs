//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use fabric_utils::bus::BusReceiver;
use fabric_utils::kv::{KvStoreSyncEvent, Publication};
use fabric_utils::southbound::{RouteDatabase, RouteDatabaseDelta};
use fabric_utils::{Responder, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::debug::Debug;
use crate::lsdb::LinkState;
use crate::route;
use crate::spf::{self, SpfScheduler};
use crate::tasks::messages::ProtocolInputMsg;

#[derive(Clone, Debug)]
pub struct DecisionConfig {
    pub node_id: String,
    // Maximum number of equal-cost next-hops per route.
    pub ecmp_width: usize,
    // SPF delay FSM intervals, in milliseconds.
    pub spf_initial_delay: u32,
    pub spf_short_delay: u32,
    pub spf_long_delay: u32,
    pub spf_time_to_learn: u32,
    pub spf_hold_down: u32,
}

// Operator commands.
#[derive(Debug)]
pub enum DecisionRequest {
    DumpRoutes {
        responder: Responder<RouteDatabase>,
    },
}

// Decision instance: one event loop consuming KV-Store publications and
// producing route deltas.
pub struct Decision {
    pub config: DecisionConfig,
    // Link-state database, per area.
    pub areas: BTreeMap<String, LinkState>,
    pub spf_sched: SpfScheduler,
    pub spf_runs: u64,
    // Last emitted route database.
    route_db: RouteDatabase,
    route_tx: UnboundedSender<RouteDatabaseDelta>,
    pub(crate) proto_tx: UnboundedSender<ProtocolInputMsg>,
}

// ===== impl Decision =====

impl Decision {
    pub fn new(
        config: DecisionConfig,
        route_tx: UnboundedSender<RouteDatabaseDelta>,
    ) -> (Decision, UnboundedReceiver<ProtocolInputMsg>) {
        let (proto_tx, proto_rx) = mpsc::unbounded_channel();
        let decision = Decision {
            config,
            areas: Default::default(),
            spf_sched: Default::default(),
            spf_runs: 0,
            route_db: Default::default(),
            route_tx,
            proto_tx,
        };
        (decision, proto_rx)
    }

    /// Runs the event loop until the publication stream is closed.
    pub async fn run(
        mut self,
        mut publications: BusReceiver<Publication>,
        mut sync_events: BusReceiver<KvStoreSyncEvent>,
        mut requests: UnboundedReceiver<DecisionRequest>,
        mut proto_rx: UnboundedReceiver<ProtocolInputMsg>,
    ) {
        loop {
            tokio::select! {
                msg = publications.recv() => match msg {
                    Some(msg) => self.process_publication(msg),
                    None => break,
                },
                Some(msg) = sync_events.recv() => {
                    self.process_sync_event(msg);
                }
                Some(msg) = requests.recv() => {
                    self.process_request(msg);
                }
                Some(msg) = proto_rx.recv() => {
                    self.process_protocol_msg(msg);
                }
            }
        }
    }

    // Publications are processed in arrival order; SPF triggers coalesce
    // through the delay FSM.
    pub fn process_publication(&mut self, publication: Publication) {
        let ls = self
            .areas
            .entry(publication.area.clone())
            .or_insert_with(|| LinkState::new(publication.area.clone()));
        if ls.apply_publication(&publication) {
            self.trigger_spf();
        }
    }

    // The initial full sync of an area store counts as a topology event.
    pub fn process_sync_event(&mut self, _event: KvStoreSyncEvent) {
        self.trigger_spf();
    }

    pub fn process_request(&mut self, request: DecisionRequest) {
        match request {
            DecisionRequest::DumpRoutes { responder } => {
                let _ = responder.send(self.route_db.clone());
            }
        }
    }

    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        match msg {
            ProtocolInputMsg::SpfDelayEvent(msg) => {
                if let Err(error) = spf::fsm(msg.event, self) {
                    error.log();
                }
            }
        }
    }

    fn trigger_spf(&mut self) {
        if let Err(error) = spf::fsm(spf::fsm::Event::Igp, self) {
            error.log();
        }
    }

    // Recomputes all routes from the current LSDB snapshot and emits the
    // delta against the previously emitted database.
    pub(crate) fn compute_spf(&mut self) {
        let node_count: usize =
            self.areas.values().map(LinkState::node_count).sum();
        Debug::SpfRun(self.areas.len(), node_count).log();

        let route_db = route::build_route_database(&self.config, &self.areas);
        let delta = route_db.delta_from(&self.route_db);

        self.spf_runs += 1;
        self.spf_sched.last_time = Some(Instant::now());
        self.route_db = route_db;

        if delta.is_empty() {
            return;
        }
        Debug::RouteUpdate(
            delta.unicast_to_update.len(),
            delta.unicast_to_delete.len(),
            delta.mpls_to_update.len(),
            delta.mpls_to_delete.len(),
        )
        .log();
        let _ = self.route_tx.send(delta);
    }
}
