//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use fabric_utils::task::TimeoutTask;
use tokio::time::Instant;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::Decision;
use crate::lsdb::{LinkState, NodeId};
use crate::tasks;

#[derive(Debug, Default)]
pub struct SpfScheduler {
    pub last_event_rcvd: Option<Instant>,
    pub last_time: Option<Instant>,
    pub delay_state: fsm::State,
    pub delay_timer: Option<TimeoutTask>,
    pub hold_down_timer: Option<TimeoutTask>,
    pub learn_timer: Option<TimeoutTask>,
}

// First hop of a shortest path: the root adjacency the path leaves through.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct FirstHop {
    pub neighbor: String,
    pub local_ifname: String,
    pub nexthop_v4: Option<Ipv4Addr>,
    pub nexthop_v6: Option<Ipv6Addr>,
}

// One node of the computed shortest-path tree.
#[derive(Clone, Debug)]
pub struct Vertex {
    pub distance: u32,
    pub firsthops: BTreeSet<FirstHop>,
    // Whether paths may be extended through this vertex. False when every
    // shortest path to it crosses a drained node or link.
    pub transit: bool,
}

// SPF Delay State Machine.
pub mod fsm {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Quiet,
        ShortWait,
        LongWait,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        Igp,
        DelayTimer,
        HoldDownTimer,
        LearnTimer,
        ConfigChange,
    }
}

// ===== global functions =====

pub(crate) fn fsm(
    event: fsm::Event,
    instance: &mut Decision,
) -> Result<(), Error> {
    let spf_sched = &mut instance.spf_sched;

    Debug::SpfDelayFsmEvent(&spf_sched.delay_state, &event).log();

    // Update time of last SPF triggering event.
    spf_sched.last_event_rcvd = Some(Instant::now());

    let new_fsm_state = match (spf_sched.delay_state, &event) {
        // Transition 1: IGP event while in QUIET state.
        (fsm::State::Quiet, fsm::Event::Igp) => {
            // If SPF_TIMER is not already running, start it with value
            // INITIAL_SPF_DELAY.
            if spf_sched.delay_timer.is_none() {
                let task = tasks::spf_delay_timer(
                    fsm::Event::DelayTimer,
                    instance.config.spf_initial_delay,
                    &instance.proto_tx,
                );
                spf_sched.delay_timer = Some(task);
            }

            // Start LEARN_TIMER with TIME_TO_LEARN_INTERVAL.
            let task = tasks::spf_delay_timer(
                fsm::Event::LearnTimer,
                instance.config.spf_time_to_learn,
                &instance.proto_tx,
            );
            spf_sched.learn_timer = Some(task);

            // Start HOLDDOWN_TIMER with HOLDDOWN_INTERVAL.
            let task = tasks::spf_delay_timer(
                fsm::Event::HoldDownTimer,
                instance.config.spf_hold_down,
                &instance.proto_tx,
            );
            spf_sched.hold_down_timer = Some(task);

            // Transition to SHORT_WAIT state.
            Some(fsm::State::ShortWait)
        }
        // Transition 2: IGP event while in SHORT_WAIT.
        (fsm::State::ShortWait, fsm::Event::Igp) => {
            // Reset HOLDDOWN_TIMER to HOLDDOWN_INTERVAL.
            if let Some(timer) = &mut spf_sched.hold_down_timer {
                let timeout =
                    Duration::from_millis(instance.config.spf_hold_down.into());
                timer.reset(Some(timeout));
            }

            // If SPF_TIMER is not already running, start it with value
            // SHORT_SPF_DELAY.
            if spf_sched.delay_timer.is_none() {
                let task = tasks::spf_delay_timer(
                    fsm::Event::DelayTimer,
                    instance.config.spf_short_delay,
                    &instance.proto_tx,
                );
                spf_sched.delay_timer = Some(task);
            }

            // Remain in current state.
            None
        }
        // Transition 3: LEARN_TIMER expiration.
        (fsm::State::ShortWait, fsm::Event::LearnTimer) => {
            spf_sched.learn_timer = None;

            // Transition to LONG_WAIT state.
            Some(fsm::State::LongWait)
        }
        // Transition 4: IGP event while in LONG_WAIT.
        (fsm::State::LongWait, fsm::Event::Igp) => {
            // Reset HOLDDOWN_TIMER to HOLDDOWN_INTERVAL.
            if let Some(timer) = &mut spf_sched.hold_down_timer {
                let timeout =
                    Duration::from_millis(instance.config.spf_hold_down.into());
                timer.reset(Some(timeout));
            }

            // If SPF_TIMER is not already running, start it with value
            // LONG_SPF_DELAY.
            if spf_sched.delay_timer.is_none() {
                let task = tasks::spf_delay_timer(
                    fsm::Event::DelayTimer,
                    instance.config.spf_long_delay,
                    &instance.proto_tx,
                );
                spf_sched.delay_timer = Some(task);
            }

            // Remain in current state.
            None
        }
        // Transition 5: HOLDDOWN_TIMER expiration while in LONG_WAIT.
        (fsm::State::LongWait, fsm::Event::HoldDownTimer) => {
            spf_sched.hold_down_timer = None;

            // Transition to QUIET state.
            Some(fsm::State::Quiet)
        }
        // Transition 6: HOLDDOWN_TIMER expiration while in SHORT_WAIT.
        (fsm::State::ShortWait, fsm::Event::HoldDownTimer) => {
            spf_sched.hold_down_timer = None;

            // Deactivate LEARN_TIMER.
            spf_sched.learn_timer = None;

            // Transition to QUIET state.
            Some(fsm::State::Quiet)
        }
        // Transition 7: SPF_TIMER expiration while in QUIET.
        // Transition 8: SPF_TIMER expiration while in SHORT_WAIT.
        // Transition 9: SPF_TIMER expiration while in LONG_WAIT.
        (
            fsm::State::Quiet | fsm::State::ShortWait | fsm::State::LongWait,
            fsm::Event::DelayTimer,
        ) => {
            spf_sched.delay_timer = None;

            // Compute SPF.
            instance.compute_spf();

            // Remain in current state.
            None
        }
        // Custom FSM transition.
        (
            fsm::State::Quiet | fsm::State::ShortWait | fsm::State::LongWait,
            fsm::Event::ConfigChange,
        ) => {
            // Cancel the next scheduled SPF run, but preserve the other
            // timers.
            spf_sched.delay_timer = None;

            // Compute SPF.
            instance.compute_spf();

            // Remain in current state.
            None
        }
        _ => {
            return Err(Error::SpfDelayUnexpectedEvent(
                instance.spf_sched.delay_state,
                event,
            ));
        }
    };

    if let Some(new_fsm_state) = new_fsm_state {
        let spf_sched = &mut instance.spf_sched;
        if new_fsm_state != spf_sched.delay_state {
            // Effectively transition to the new FSM state.
            Debug::SpfDelayFsmTransition(
                &spf_sched.delay_state,
                &new_fsm_state,
            )
            .log();
            spf_sched.delay_state = new_fsm_state;
        }
    }

    Ok(())
}

// Dijkstra over the dense node ids of one area.
//
// All equal-cost first hops are retained, up to the ECMP width. Drained
// nodes and links terminate path extension: a vertex reachable only through
// them is still added to the tree (so routes *to* it exist) but its own
// links are never relaxed.
pub(crate) fn run_spf(
    ls: &LinkState,
    root: &str,
    ecmp_width: usize,
) -> BTreeMap<NodeId, Vertex> {
    let mut spt = BTreeMap::new();

    let Some(root_id) = ls.id(root) else {
        return spt;
    };
    if ls.node(root_id).is_none() {
        return spt;
    }

    // Initialize the candidate list with the root vertex.
    let mut cand_list: BTreeMap<(u32, NodeId), Vertex> = BTreeMap::new();
    cand_list.insert(
        (0, root_id),
        Vertex {
            distance: 0,
            firsthops: BTreeSet::new(),
            transit: true,
        },
    );

    // Main SPF loop.
    while let Some(((_, vertex_id), vertex)) = cand_list.pop_first() {
        // Add vertex to the shortest-path tree.
        spt.insert(vertex_id, vertex);
        let vertex = spt.get(&vertex_id).unwrap();

        // The root expands unconditionally; any other vertex only if some
        // shortest path to it is transit-capable.
        if vertex_id != root_id && !vertex.transit {
            continue;
        }
        let Some(db) = ls.node(vertex_id) else {
            continue;
        };
        let vertex_name = ls.name(vertex_id);

        for adj in &db.adjacencies {
            if adj.metric == 0 {
                continue;
            }
            // Use the edge only if the neighbors are mutually linked.
            if !ls.is_bidirectional(vertex_name, adj) {
                continue;
            }
            let Some(nbr_id) = ls.id(&adj.other_node) else {
                continue;
            };
            let Some(nbr_db) = ls.node(nbr_id) else {
                continue;
            };
            if spt.contains_key(&nbr_id) {
                continue;
            }

            let distance = vertex.distance.saturating_add(adj.metric);
            let transit =
                vertex.transit && !adj.overloaded && !nbr_db.overloaded;
            let firsthops = if vertex_id == root_id {
                BTreeSet::from([FirstHop {
                    neighbor: adj.other_node.clone(),
                    local_ifname: adj.local_ifname.clone(),
                    nexthop_v4: adj.nexthop_v4,
                    nexthop_v6: adj.nexthop_v6,
                }])
            } else {
                vertex.firsthops.clone()
            };

            // Check if this vertex is already present on the candidate
            // list.
            match cand_list
                .keys()
                .find(|(_, cand_id)| *cand_id == nbr_id)
                .copied()
            {
                Some((cand_distance, _)) if distance > cand_distance => (),
                Some((cand_distance, _)) if distance == cand_distance => {
                    // Equal-cost path: merge first hops and transit
                    // capability.
                    let cand =
                        cand_list.get_mut(&(cand_distance, nbr_id)).unwrap();
                    cand.firsthops.extend(firsthops);
                    while cand.firsthops.len() > ecmp_width {
                        cand.firsthops.pop_last();
                    }
                    cand.transit |= transit;
                }
                Some((cand_distance, _)) => {
                    // Shorter path found: replace the candidate.
                    cand_list.remove(&(cand_distance, nbr_id));
                    cand_list.insert(
                        (distance, nbr_id),
                        Vertex {
                            distance,
                            firsthops,
                            transit,
                        },
                    );
                }
                None => {
                    cand_list.insert(
                        (distance, nbr_id),
                        Vertex {
                            distance,
                            firsthops,
                            transit,
                        },
                    );
                }
            }
        }
    }

    spt
}
