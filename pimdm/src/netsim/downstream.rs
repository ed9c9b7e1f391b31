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

//! Module containing the set of outgoing interfaces of a forwarding cache entry.

use crate::netsim::assert::{AssertMetric, AssertSlot};
use crate::netsim::{InterfaceId, Time};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Outgoing interface of an entry, with its prune and assert sub-state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamInfo {
    /// Interface
    pub interface: InterfaceId,
    /// Address of the interface
    pub address: Ipv4Addr,
    /// Downstream routers pruned the interface
    pub is_pruned: bool,
    /// Time at which the last Prune was received
    pub prune_armed_at: Option<Time>,
    /// Hold time of the last Prune. `None` means that the prune never expires.
    pub prune_hold_time: Option<Duration>,
    /// A Prune was received on a shared LAN and may still be overridden by a Join.
    pub delayed_prune_active: bool,
    /// Assert state of the interface
    pub assert: AssertSlot,
}

impl DownstreamInfo {
    /// Create a new unpruned downstream interface with assert state NoInfo.
    pub fn new(interface: InterfaceId, address: Ipv4Addr, winner: AssertMetric) -> Self {
        Self {
            interface,
            address,
            is_pruned: false,
            prune_armed_at: None,
            prune_hold_time: None,
            delayed_prune_active: false,
            assert: AssertSlot { winner, ..Default::default() },
        }
    }

    /// Time at which the prune expires. Returns `None` if the interface is not pruned, or if the
    /// prune has an infinite hold time.
    pub fn prune_deadline(&self) -> Option<Time> {
        if !self.is_pruned {
            return None;
        }
        match (self.prune_armed_at, self.prune_hold_time) {
            (Some(t), Some(hold)) => Some(t + hold),
            _ => None,
        }
    }

    /// Returns true if data may be sent out of this interface
    pub fn is_forwarding(&self) -> bool {
        !self.is_pruned && !self.assert.is_losing()
    }

    /// Remove the prune
    pub fn unprune(&mut self) {
        self.is_pruned = false;
        self.prune_armed_at = None;
        self.prune_hold_time = None;
        self.delayed_prune_active = false;
    }
}

/// Ordered set of downstream interfaces of an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownstreamSet {
    interfaces: BTreeMap<InterfaceId, DownstreamInfo>,
}

impl DownstreamSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a downstream interface. Returns false (and leaves the set unchanged) if the interface
    /// is already present.
    pub fn add(&mut self, info: DownstreamInfo) -> bool {
        if self.interfaces.contains_key(&info.interface) {
            return false;
        }
        self.interfaces.insert(info.interface, info);
        true
    }

    /// Remove a downstream interface
    pub fn remove(&mut self, interface: InterfaceId) -> Option<DownstreamInfo> {
        self.interfaces.remove(&interface)
    }

    /// Returns true if the interface is a downstream interface
    pub fn contains(&self, interface: InterfaceId) -> bool {
        self.interfaces.contains_key(&interface)
    }

    /// Get a downstream interface
    pub fn get(&self, interface: InterfaceId) -> Option<&DownstreamInfo> {
        self.interfaces.get(&interface)
    }

    /// Get a mutable downstream interface
    pub fn get_mut(&mut self, interface: InterfaceId) -> Option<&mut DownstreamInfo> {
        self.interfaces.get_mut(&interface)
    }

    /// Returns true if every downstream interface is pruned. This is vacuously true for an empty
    /// set.
    pub fn all_pruned(&self) -> bool {
        self.interfaces.values().all(|d| d.is_pruned)
    }

    /// Iterate over all downstream interfaces, ordered by interface
    pub fn iter(&self) -> impl Iterator<Item = &DownstreamInfo> {
        self.interfaces.values()
    }

    /// Iterate mutably over all downstream interfaces
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DownstreamInfo> {
        self.interfaces.values_mut()
    }

    /// Interfaces in the set, ordered
    pub fn interfaces(&self) -> Vec<InterfaceId> {
        self.interfaces.keys().copied().collect()
    }

    /// Number of downstream interfaces
    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    /// Returns true if there is no downstream interface
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}
