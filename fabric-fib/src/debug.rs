//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::debug;

// Fib debug messages.
#[derive(Debug)]
pub enum Debug {
    DeltaApply(usize, usize, usize, usize),
    SyncOk(usize, usize),
    FullResync,
}

// ===== impl Debug =====

impl Debug {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::DeltaApply(
                unicast_update,
                unicast_delete,
                mpls_update,
                mpls_delete,
            ) => {
                debug!(
                    %unicast_update, %unicast_delete,
                    %mpls_update, %mpls_delete,
                    "{}", self
                );
            }
            Debug::SyncOk(unicast, mpls) => {
                debug!(%unicast, %mpls, "{}", self);
            }
            Debug::FullResync => {
                debug!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::DeltaApply(..) => {
                write!(f, "route delta received")
            }
            Debug::SyncOk(..) => {
                write!(f, "platform state synchronized")
            }
            Debug::FullResync => {
                write!(f, "running periodic full resync")
            }
        }
    }
}
