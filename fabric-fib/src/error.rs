//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use tracing::warn;

use crate::platform::PlatformError;

// Fib errors.
#[derive(Debug)]
pub enum Error {
    SyncFailed(PlatformError, Duration),
    ResyncFailed(PlatformError),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::SyncFailed(error, backoff) => {
                warn!(%error, ?backoff, "{}", self);
            }
            Error::ResyncFailed(error) => {
                warn!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::SyncFailed(..) => {
                write!(f, "failed to program routes, backing off")
            }
            Error::ResyncFailed(..) => {
                write!(f, "periodic platform resync failed")
            }
        }
    }
}

impl std::error::Error for Error {}
