//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Mutex;

use async_trait::async_trait;
use fabric_fib::platform::{FibPlatform, PlatformError};
use fabric_utils::mpls::Label;
use fabric_utils::southbound::{MplsRoute, RouteDatabase, UnicastRoute};
use ipnetwork::IpNetwork;
use tracing::info;

// Route programmer used when no forwarding plane is attached: keeps the
// programmed table in memory and logs every mutation. The kernel and
// hardware backends implement the same trait out of tree.
#[derive(Debug, Default)]
pub struct DryRunPlatform {
    table: Mutex<RouteDatabase>,
}

// ===== impl DryRunPlatform =====

#[async_trait]
impl FibPlatform for DryRunPlatform {
    async fn add_unicast_routes(
        &self,
        routes: Vec<UnicastRoute>,
    ) -> Result<(), PlatformError> {
        let mut table = self.table.lock().unwrap();
        for route in routes {
            info!(prefix = %route.prefix, nexthops = %route.nexthops.len(),
                "add unicast route");
            table.unicast.insert(route.prefix, route);
        }
        Ok(())
    }

    async fn delete_unicast_routes(
        &self,
        prefixes: Vec<IpNetwork>,
    ) -> Result<(), PlatformError> {
        let mut table = self.table.lock().unwrap();
        for prefix in prefixes {
            info!(%prefix, "delete unicast route");
            table.unicast.remove(&prefix);
        }
        Ok(())
    }

    async fn add_mpls_routes(
        &self,
        routes: Vec<MplsRoute>,
    ) -> Result<(), PlatformError> {
        let mut table = self.table.lock().unwrap();
        for route in routes {
            info!(label = %route.label, nexthops = %route.nexthops.len(),
                "add mpls route");
            table.mpls.insert(route.label, route);
        }
        Ok(())
    }

    async fn delete_mpls_routes(
        &self,
        labels: Vec<Label>,
    ) -> Result<(), PlatformError> {
        let mut table = self.table.lock().unwrap();
        for label in labels {
            info!(%label, "delete mpls route");
            table.mpls.remove(&label);
        }
        Ok(())
    }

    async fn get_route_table(&self) -> Result<RouteDatabase, PlatformError> {
        Ok(self.table.lock().unwrap().clone())
    }
}
