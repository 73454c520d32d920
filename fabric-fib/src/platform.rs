//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use async_trait::async_trait;
use fabric_utils::mpls::Label;
use fabric_utils::southbound::{MplsRoute, RouteDatabase, UnicastRoute};
use ipnetwork::IpNetwork;

// Platform errors are opaque to the reconciliation logic: any failure
// triggers backoff and a later full resync.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlatformError(pub String);

/// Route-programming interface of the underlying forwarding plane.
///
/// Implementations talk netlink, a hardware SDK or an agent socket; the Fib
/// only assumes the calls are idempotent.
#[async_trait]
pub trait FibPlatform: Send + Sync {
    async fn add_unicast_routes(
        &self,
        routes: Vec<UnicastRoute>,
    ) -> Result<(), PlatformError>;

    async fn delete_unicast_routes(
        &self,
        prefixes: Vec<IpNetwork>,
    ) -> Result<(), PlatformError>;

    async fn add_mpls_routes(
        &self,
        routes: Vec<MplsRoute>,
    ) -> Result<(), PlatformError>;

    async fn delete_mpls_routes(
        &self,
        labels: Vec<Label>,
    ) -> Result<(), PlatformError>;

    /// Dumps the routes currently programmed by this client.
    async fn get_route_table(&self) -> Result<RouteDatabase, PlatformError>;
}

// ===== impl PlatformError =====

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PlatformError {}
