// PimDm: Dense-Mode Multicast Routing Simulation
// Copyright (C) 2021  Tibor Schneider
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Unicast routing table, used for RPF checks and assert metrics.

use crate::netsim::{InterfaceId, Prefix, Upstream};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Route installed in the unicast RIB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Outgoing interface
    pub interface: InterfaceId,
    /// Next hop. `None` means that the prefix is directly connected to the interface.
    pub next_hop: Option<Ipv4Addr>,
    /// Administrative distance (preference) of the protocol which installed the route
    pub preference: u32,
    /// Metric (cost) of the route
    pub metric: u32,
}

/// Result of an RPF lookup towards a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpfRoute {
    /// RPF interface
    pub interface: InterfaceId,
    /// RPF neighbor, never `Upstream::Me` or `Upstream::Unreachable`
    pub upstream: Upstream,
    /// Administrative distance of the route
    pub preference: u32,
    /// Metric of the route
    pub metric: u32,
}

/// Unicast RIB with longest-prefix-match lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnicastRib {
    routes: BTreeMap<Prefix, Route>,
}

impl UnicastRib {
    /// Create an empty RIB
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a route, returning the route it replaced.
    pub fn insert(&mut self, prefix: Prefix, route: Route) -> Option<Route> {
        self.routes.insert(prefix, route)
    }

    /// Remove the route of exactly this prefix
    pub fn remove(&mut self, prefix: &Prefix) -> Option<Route> {
        self.routes.remove(prefix)
    }

    /// Remove all routes
    pub fn clear(&mut self) {
        self.routes.clear()
    }

    /// Iterate over all installed routes
    pub fn iter(&self) -> impl Iterator<Item = (&Prefix, &Route)> {
        self.routes.iter()
    }

    /// Returns the number of installed routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no route is installed
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Longest-prefix-match lookup
    pub fn lookup(&self, destination: Ipv4Addr) -> Option<(&Prefix, &Route)> {
        self.routes
            .iter()
            .filter(|(prefix, _)| prefix.contains(destination))
            .max_by_key(|(prefix, _)| prefix.len())
    }

    /// Resolve the RPF interface and neighbor towards `source`.
    pub fn resolve(&self, source: Ipv4Addr) -> Option<RpfRoute> {
        self.lookup(source).map(|(_, route)| RpfRoute {
            interface: route.interface,
            upstream: match route.next_hop {
                Some(next_hop) if next_hop != source => Upstream::Neighbor(next_hop),
                _ => Upstream::Connected,
            },
            preference: route.preference,
            metric: route.metric,
        })
    }
}
