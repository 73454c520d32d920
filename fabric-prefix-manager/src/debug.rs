//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::debug;

// Prefix-Manager debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    AdvertisePrefix(&'a str, &'a str),
    WithdrawPrefix(&'a str),
    SyncByType(&'a str, usize),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::AdvertisePrefix(area, key) => {
                debug!(%area, %key, "{}", self);
            }
            Debug::WithdrawPrefix(key) => {
                debug!(%key, "{}", self);
            }
            Debug::SyncByType(prefix_type, count) => {
                debug!(%prefix_type, %count, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::AdvertisePrefix(..) => {
                write!(f, "advertising prefix")
            }
            Debug::WithdrawPrefix(..) => {
                write!(f, "withdrawing prefix")
            }
            Debug::SyncByType(..) => {
                write!(f, "syncing prefixes by type")
            }
        }
    }
}
