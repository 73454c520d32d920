//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use fabric_utils::bytes::DecodeError;
use tracing::warn;

use crate::spf;

// Decision errors.
#[derive(Debug)]
pub enum Error {
    // Protocol input
    AdjDbDecodeError(String, DecodeError),
    PrefixDecodeError(String, DecodeError),
    KeyNodeMismatch(String, String),
    // SPF
    SpfDelayUnexpectedEvent(spf::fsm::State, spf::fsm::Event),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::AdjDbDecodeError(key, error)
            | Error::PrefixDecodeError(key, error) => {
                warn!(%key, %error, "{}", self);
            }
            Error::KeyNodeMismatch(key, node) => {
                warn!(%key, %node, "{}", self);
            }
            Error::SpfDelayUnexpectedEvent(state, event) => {
                warn!(?state, ?event, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AdjDbDecodeError(..) => {
                write!(f, "failed to decode adjacency database")
            }
            Error::PrefixDecodeError(..) => {
                write!(f, "failed to decode prefix entry")
            }
            Error::KeyNodeMismatch(..) => {
                write!(f, "key and payload disagree on the originating node")
            }
            Error::SpfDelayUnexpectedEvent(..) => {
                write!(f, "unexpected SPF delay FSM event")
            }
        }
    }
}

impl std::error::Error for Error {}
