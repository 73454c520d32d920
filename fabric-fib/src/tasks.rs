//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use fabric_utils::UnboundedSender;
use fabric_utils::task::{IntervalTask, TimeoutTask};

//
// Fib tasks diagram:
//                                    +--------------+
//          route deltas (1x) ->      |              |
//                                    |   instance   | -> platform calls
//           retry_timer (0..1x) ->   |              |
//           sync_interval (1x) ->    |              |
//                                    +--------------+
//

// Fib inter-task message types.
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
            // Retry backoff expired.
            Retry,
            // Periodic full resync tick.
            FullResync,
        }
    }
}

// ===== Fib tasks =====

// Retry backoff timer after a failed platform operation.
pub(crate) fn retry_timer(
    backoff: Duration,
    proto_tx: &UnboundedSender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let proto_tx = proto_tx.clone();
    TimeoutTask::new(backoff, move || async move {
        let _ = proto_tx.send(messages::input::ProtocolMsg::Retry);
    })
}

// Periodic full resync against the platform.
pub(crate) fn sync_interval(
    interval: Duration,
    proto_tx: &UnboundedSender<messages::input::ProtocolMsg>,
) -> IntervalTask {
    let proto_tx = proto_tx.clone();
    IntervalTask::new(interval, false, move || {
        let proto_tx = proto_tx.clone();
        async move {
            let _ = proto_tx.send(messages::input::ProtocolMsg::FullResync);
        }
    })
}
