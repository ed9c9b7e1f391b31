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

//! Module containing the neighbor table and the local group membership of a router.

use crate::netsim::{Group, InterfaceId, Time};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::Ipv4Addr;

/// PIM neighbor discovered by a Hello message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    /// Address of the neighbor
    pub address: Ipv4Addr,
    /// Holdtime advertised in the last Hello (seconds)
    pub hold_time: u16,
    /// Generation ID advertised in the last Hello
    pub generation_id: Option<u32>,
    /// Time at which the neighbor expires. `None` for an infinite holdtime.
    pub expires_at: Option<Time>,
}

/// Result of refreshing a neighbor with a received Hello
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborUpdate {
    /// The neighbor was not known before
    New,
    /// The neighbor has restarted, its generation ID changed
    Restarted,
    /// Known neighbor, only the liveness was refreshed
    Refreshed,
}

/// Neighbors of one interface, ordered by address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborTable {
    neighbors: BTreeMap<Ipv4Addr, Neighbor>,
}

impl NeighborTable {
    /// Create an empty neighbor table
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the neighbor is known
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.neighbors.contains_key(&address)
    }

    /// Get a known neighbor
    pub fn get(&self, address: Ipv4Addr) -> Option<&Neighbor> {
        self.neighbors.get(&address)
    }

    /// Number of known neighbors
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Returns true if no neighbor is known
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Iterate over all neighbors
    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.values()
    }

    /// Insert or refresh a neighbor.
    pub fn update(
        &mut self,
        address: Ipv4Addr,
        hold_time: u16,
        generation_id: Option<u32>,
        expires_at: Option<Time>,
    ) -> NeighborUpdate {
        match self.neighbors.get_mut(&address) {
            Some(n) => {
                let restarted = generation_id.is_some() && n.generation_id != generation_id;
                n.hold_time = hold_time;
                n.generation_id = generation_id;
                n.expires_at = expires_at;
                if restarted {
                    NeighborUpdate::Restarted
                } else {
                    NeighborUpdate::Refreshed
                }
            }
            None => {
                self.neighbors
                    .insert(address, Neighbor { address, hold_time, generation_id, expires_at });
                NeighborUpdate::New
            }
        }
    }

    /// Remove a neighbor, returning it if it was known.
    pub fn remove(&mut self, address: Ipv4Addr) -> Option<Neighbor> {
        self.neighbors.remove(&address)
    }
}

/// Local group membership, as reported by IGMP on the attached LANs and by applications on the
/// router itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalMembership {
    receivers: HashMap<Group, BTreeSet<InterfaceId>>,
    node_groups: HashSet<Group>,
}

impl LocalMembership {
    /// Create an empty membership database
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local receiver of `group` on `interface`. Returns false if it was known already.
    pub fn add_receiver(&mut self, group: Group, interface: InterfaceId) -> bool {
        self.receivers.entry(group).or_default().insert(interface)
    }

    /// Remove a local receiver. Returns false if it was not known.
    pub fn remove_receiver(&mut self, group: Group, interface: InterfaceId) -> bool {
        match self.receivers.get_mut(&group) {
            Some(interfaces) => {
                let removed = interfaces.remove(&interface);
                if interfaces.is_empty() {
                    self.receivers.remove(&group);
                }
                removed
            }
            None => false,
        }
    }

    /// Returns true if `interface` has a local receiver for `group`.
    pub fn has_local_receiver(&self, group: Group, interface: InterfaceId) -> bool {
        self.receivers.get(&group).map(|i| i.contains(&interface)).unwrap_or(false)
    }

    /// Interfaces with a local receiver of `group`
    pub fn receivers(&self, group: Group) -> impl Iterator<Item = InterfaceId> + '_ {
        self.receivers.get(&group).into_iter().flat_map(|i| i.iter().copied())
    }

    /// The router itself joins `group`.
    pub fn join_node(&mut self, group: Group) -> bool {
        self.node_groups.insert(group)
    }

    /// The router itself leaves `group`.
    pub fn leave_node(&mut self, group: Group) -> bool {
        self.node_groups.remove(&group)
    }

    /// Returns true if the router itself is a member of `group`.
    pub fn is_part_of_group(&self, group: Group) -> bool {
        self.node_groups.contains(&group)
    }
}
