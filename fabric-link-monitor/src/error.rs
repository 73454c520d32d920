//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::warn;

// Link-Monitor errors.
#[derive(Debug)]
pub enum Error {
    // State inconsistencies reported by the kernel event stream.
    AddressUnknownIfindex(u32),
    AdjacencyUnknownInterface(String, String),
    // Persistence
    StateSaveFailed(fabric_utils::DatabaseError),
}

// Structured errors returned to operator commands.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestError {
    UnknownInterface(String),
    UnknownAdjacency(String, String),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::AddressUnknownIfindex(ifindex) => {
                warn!(%ifindex, "{}", self);
            }
            Error::AdjacencyUnknownInterface(node, ifname) => {
                warn!(%node, %ifname, "{}", self);
            }
            Error::StateSaveFailed(error) => {
                warn!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AddressUnknownIfindex(..) => {
                write!(f, "address event for unknown interface")
            }
            Error::AdjacencyUnknownInterface(..) => {
                write!(f, "adjacency over unknown interface")
            }
            Error::StateSaveFailed(..) => {
                write!(f, "failed to persist link-monitor state")
            }
        }
    }
}

impl std::error::Error for Error {}

// ===== impl RequestError =====

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::UnknownInterface(ifname) => {
                write!(f, "unknown interface: {}", ifname)
            }
            RequestError::UnknownAdjacency(node, ifname) => {
                write!(f, "unknown adjacency: {} over {}", node, ifname)
            }
        }
    }
}

impl std::error::Error for RequestError {}
