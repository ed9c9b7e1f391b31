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

//! # Forwarding Cache
//!
//! The forwarding cache holds one [`ForwardingEntry`] for every `(S, G)` pair for which the router
//! has seen data. The entry stores the upstream (RPF) interface and neighbor, the state of the
//! entry with respect to the upstream router, and the set of downstream interfaces.

use crate::netsim::assert::UpstreamAssert;
use crate::netsim::downstream::DownstreamSet;
use crate::netsim::{Group, InterfaceId, PimError, SgPair, Source, Time, Upstream};
use std::collections::HashMap;
use std::fmt;

/// State of an entry with respect to its upstream router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Data is received from upstream
    Forward,
    /// The entry has been pruned upstream
    Prune,
    /// A Graft was sent upstream, and the router waits for the Graft-Ack
    AckPending,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "FORWARD"),
            Self::Prune => write!(f, "PRUNE"),
            Self::AckPending => write!(f, "ACK_PENDING"),
        }
    }
}

/// Forwarding state of a single `(S, G)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingEntry {
    pub(crate) sg: SgPair,
    pub(crate) upstream_interface: Option<InterfaceId>,
    pub(crate) upstream: Upstream,
    pub(crate) state: EntryState,
    pub(crate) downstream: DownstreamSet,
    pub(crate) upstream_assert: UpstreamAssert,
    pub(crate) graft_retransmit_pending: bool,
    pub(crate) graft_retries: u32,
    pub(crate) delayed_join_pending: bool,
    pub(crate) delayed_join_end: Option<Time>,
    pub(crate) delayed_join_seq: u64,
    pub(crate) join_seen_while_pruned: bool,
    pub(crate) expiration: Option<Time>,
    pub(crate) last_prune_sent: Option<Time>,
}

impl ForwardingEntry {
    /// Create a new entry in state `Forward` without any downstream interface.
    pub fn new(sg: SgPair, upstream_interface: Option<InterfaceId>, upstream: Upstream) -> Self {
        Self {
            sg,
            upstream_interface,
            upstream,
            state: EntryState::Forward,
            downstream: DownstreamSet::new(),
            upstream_assert: UpstreamAssert::default(),
            graft_retransmit_pending: false,
            graft_retries: 0,
            delayed_join_pending: false,
            delayed_join_end: None,
            delayed_join_seq: 0,
            join_seen_while_pruned: false,
            expiration: None,
            last_prune_sent: None,
        }
    }

    /// `(S, G)` pair of the entry
    pub fn sg(&self) -> SgPair {
        self.sg
    }

    /// Source address
    pub fn source(&self) -> Source {
        self.sg.source
    }

    /// Group address
    pub fn group(&self) -> Group {
        self.sg.group
    }

    /// Upstream (RPF) interface. `None` is the CPU pseudo-interface.
    pub fn upstream_interface(&self) -> Option<InterfaceId> {
        self.upstream_interface
    }

    /// Upstream (RPF) neighbor
    pub fn upstream(&self) -> Upstream {
        self.upstream
    }

    /// State of the entry
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Downstream interfaces
    pub fn downstream(&self) -> &DownstreamSet {
        &self.downstream
    }

    /// Assert state of the upstream interface
    pub fn upstream_assert(&self) -> &UpstreamAssert {
        &self.upstream_assert
    }

    /// Returns true if a Graft is waiting for its Graft-Ack
    pub fn graft_retransmit_pending(&self) -> bool {
        self.graft_retransmit_pending
    }

    /// Number of Graft retransmissions since the Graft was first sent
    pub fn graft_retries(&self) -> u32 {
        self.graft_retries
    }

    /// Returns true if a delayed Join is scheduled
    pub fn delayed_join_pending(&self) -> bool {
        self.delayed_join_pending
    }

    /// Number of delayed Joins scheduled over the lifetime of the entry
    pub fn delayed_join_seq(&self) -> u64 {
        self.delayed_join_seq
    }

    /// Returns true if a Join from another router was heard while the entry was pruned
    pub fn join_seen_while_pruned(&self) -> bool {
        self.join_seen_while_pruned
    }

    /// Expiration of the data timer, `None` if the timer is idle.
    pub fn expiration(&self) -> Option<Time> {
        self.expiration
    }

    /// Returns true if the upstream interface is the given one
    pub fn is_upstream_interface(&self, interface: InterfaceId) -> bool {
        self.upstream_interface == Some(interface)
    }
}

/// Collection of all forwarding entries of a router.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardingCache {
    entries: HashMap<SgPair, ForwardingEntry>,
}

impl ForwardingCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry of a pair
    pub fn get(&self, sg: &SgPair) -> Option<&ForwardingEntry> {
        self.entries.get(sg)
    }

    /// Get the mutable entry of a pair
    pub fn get_mut(&mut self, sg: &SgPair) -> Option<&mut ForwardingEntry> {
        self.entries.get_mut(sg)
    }

    /// Returns true if an entry exists for the pair
    pub fn contains(&self, sg: &SgPair) -> bool {
        self.entries.contains_key(sg)
    }

    /// Insert a new entry. Inserting a second entry for the same pair is an error.
    pub fn insert(&mut self, entry: ForwardingEntry) -> Result<(), PimError> {
        if self.entries.contains_key(&entry.sg) {
            return Err(PimError::DuplicateEntry(entry.sg));
        }
        self.entries.insert(entry.sg, entry);
        Ok(())
    }

    /// Remove the entry of a pair
    pub fn remove(&mut self, sg: &SgPair) -> Option<ForwardingEntry> {
        self.entries.remove(sg)
    }

    /// All pairs in the cache, sorted
    pub fn pairs(&self) -> Vec<SgPair> {
        let mut pairs: Vec<SgPair> = self.entries.keys().copied().collect();
        pairs.sort();
        pairs
    }

    /// All pairs of a group, sorted
    pub fn pairs_of_group(&self, group: Group) -> Vec<SgPair> {
        let mut pairs: Vec<SgPair> = self.entries.keys().filter(|sg| sg.group == group).copied().collect();
        pairs.sort();
        pairs
    }

    /// Iterate over all entries, in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = &ForwardingEntry> {
        self.entries.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
