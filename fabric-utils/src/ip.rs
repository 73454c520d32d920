//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

// Address families.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 4,
    Ipv6 = 6,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns the address family of the address.
    fn address_family(&self) -> AddressFamily;

    // Returns whether the address is eligible for redistribution: a global
    // unicast address (not loopback, link-local, multicast or unspecified).
    fn is_routable(&self) -> bool;
}

// Extension methods for IpNetwork.
pub trait IpNetworkExt {
    // Returns the address family of the network.
    fn address_family(&self) -> AddressFamily;

    // Applies the network mask to the network address.
    fn apply_mask(&self) -> IpNetwork;

    // Returns whether the network is a host route.
    fn is_host_prefix(&self) -> bool;
}

// ===== impl AddressFamily =====

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn is_routable(&self) -> bool {
        if self.is_loopback() || self.is_multicast() || self.is_unspecified()
        {
            return false;
        }
        match self {
            IpAddr::V4(addr) => !addr.is_link_local(),
            IpAddr::V6(addr) => !addr.is_unicast_link_local(),
        }
    }
}

// ===== impl IpNetwork =====

impl IpNetworkExt for IpNetwork {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn apply_mask(&self) -> IpNetwork {
        match self {
            IpNetwork::V4(network) => {
                let addr = network.ip() & network.mask();
                IpNetwork::V4(
                    ipnetwork::Ipv4Network::new(addr, network.prefix())
                        .unwrap(),
                )
            }
            IpNetwork::V6(network) => {
                let addr = network.ip() & network.mask();
                IpNetwork::V6(
                    ipnetwork::Ipv6Network::new(addr, network.prefix())
                        .unwrap(),
                )
            }
        }
    }

    fn is_host_prefix(&self) -> bool {
        match self {
            IpNetwork::V4(network) => network.prefix() == 32,
            IpNetwork::V6(network) => network.prefix() == 128,
        }
    }
}
