//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use fabric_utils::UnboundedSender;
use fabric_utils::task::TimeoutTask;

use crate::spf;

//
// Decision tasks diagram:
//                                    +--------------+
//        kv publications (1x) ->     |              |
//        kv sync events (1x) ->      |   instance   | -> route deltas
//        operator requests (1x) ->   |              |
//                                    |              |
//        spf_delay_timer (3x) ->     |              |
//                                    +--------------+
//

// Decision inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    use crate::spf;

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub enum ProtocolMsg {
            SpfDelayEvent(SpfDelayEventMsg),
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct SpfDelayEventMsg {
            pub event: spf::fsm::Event,
        }
    }
}

// ===== Decision tasks =====

// SPF delay timer task.
pub(crate) fn spf_delay_timer(
    event: spf::fsm::Event,
    timeout: u32,
    spf_delay_eventp: &UnboundedSender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let timeout = Duration::from_millis(timeout.into());
    let spf_delay_eventp = spf_delay_eventp.clone();
    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::SpfDelayEventMsg { event };
        let _ = spf_delay_eventp
            .send(messages::input::ProtocolMsg::SpfDelayEvent(msg));
    })
}
