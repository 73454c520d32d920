//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use fabric_utils::UnboundedSender;
use fabric_utils::task::TimeoutTask;

//
// Link-Monitor tasks diagram:
//                                    +--------------+
//            spark events (1x) ->    |              |
//          netlink events (1x) ->    |              | -> kv requests
//         operator requests (1x) ->  |   instance   | -> prefix updates
//                                    |              | -> interface snapshots
//        advertise_throttle (1x) ->  |              |
//        startup_hold_timer (1x) ->  |              |
//        link_backoff_timer (Nx) ->  |              |
//                                    +--------------+
//

// Link-Monitor inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub enum ProtocolMsg {
            // Coalesced advertisement window fired.
            AdvertiseFire,
            // Initial-discovery hold period ended.
            HoldExpired,
            // Interface flap hold-down ended.
            LinkBackoff(LinkBackoffMsg),
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct LinkBackoffMsg {
            pub ifname: String,
        }
    }
}

// ===== Link-Monitor tasks =====

// Startup hold timer: delays the first adjacency advertisement until
// initial neighbor discovery has had a chance to complete.
pub(crate) fn startup_hold_timer(
    hold: Duration,
    proto_tx: &UnboundedSender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let proto_tx = proto_tx.clone();
    TimeoutTask::new(hold, move || async move {
        let _ = proto_tx.send(messages::input::ProtocolMsg::HoldExpired);
    })
}

// Flap hold-down expiry for one interface.
pub(crate) fn link_backoff_timer(
    ifname: String,
    backoff: Duration,
    proto_tx: &UnboundedSender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let proto_tx = proto_tx.clone();
    TimeoutTask::new(backoff, move || async move {
        let msg = messages::input::LinkBackoffMsg { ifname };
        let _ =
            proto_tx.send(messages::input::ProtocolMsg::LinkBackoff(msg));
    })
}
