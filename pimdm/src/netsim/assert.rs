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

//! # Assert Resolver
//!
//! When two or more routers forward the same `(S, G)` traffic onto a shared LAN, each of them
//! receives the other's data on a downstream interface. They then exchange Assert messages, and
//! the router with the best unicast route back to the source keeps forwarding. The order is:
//!
//! 1. lower preference (administrative distance) wins,
//! 2. on a tie, the lower metric wins,
//! 3. on a tie, the numerically higher address wins.
//!
//! This module contains the metric and its total order, the per-interface assert state machines
//! (both the downstream one with three states and the upstream one with two states), and the
//! per-`(source, interface)` table used when assert optimization is enabled. The router-side
//! handling of Assert messages lives in the `impl PimDmRouter` block at the bottom.

use crate::netsim::event::{Action, ActionQueue, TimerKey};
use crate::netsim::cache::EntryState;
use crate::netsim::node::JoinPruneTarget;
use crate::netsim::packet::{Assert, JoinPruneKind};
use crate::netsim::router::PimDmRouter;
use crate::netsim::{Group, InterfaceId, SgPair, Source, Time, Upstream};
use log::*;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Metric of an unreachable route
pub const INFINITE_METRIC: u32 = u32::MAX;
/// Preference of an unreachable route. Only 31 bits are available on the wire.
pub const INFINITE_PREFERENCE: u32 = 0x7FFF_FFFF;

/// Assert metric of a router on a LAN: the cost of its unicast route back to the source.
///
/// The ordering is defined such that the *better* metric is the *greater* one. Hence, `a > b`
/// means that `a` wins the assert against `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssertMetric {
    /// Administrative distance of the route
    pub preference: u32,
    /// Metric of the route
    pub metric: u32,
    /// Address of the router on the LAN
    pub address: Ipv4Addr,
}

impl AssertMetric {
    /// Create a new metric
    pub fn new(preference: u32, metric: u32, address: Ipv4Addr) -> Self {
        Self { preference, metric, address }
    }

    /// The worst possible metric, used whenever no winner is known.
    pub fn infinite() -> Self {
        Self::new(INFINITE_PREFERENCE, INFINITE_METRIC, Ipv4Addr::UNSPECIFIED)
    }

    /// Returns true if `self` wins the assert against `other`.
    pub fn beats(&self, other: &Self) -> bool {
        compare_metric(self, other)
    }
}

impl Default for AssertMetric {
    fn default() -> Self {
        Self::infinite()
    }
}

impl Ord for AssertMetric {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .preference
            .cmp(&self.preference)
            .then_with(|| other.metric.cmp(&self.metric))
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl PartialOrd for AssertMetric {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Returns true if the local metric wins against the remote one. Lower preference wins, then
/// lower metric wins, then the higher address wins. Two identical metrics never win against each
/// other.
pub fn compare_metric(local: &AssertMetric, remote: &AssertMetric) -> bool {
    local.cmp(remote) == Ordering::Greater
}

/// Assert state of a downstream interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssertState {
    /// No assert is running
    NoInfo,
    /// This router won the last assert and forwards onto the interface
    IWonAssert,
    /// Another router won the last assert. This router must not forward onto the interface.
    ILostAssert,
}

impl Default for AssertState {
    fn default() -> Self {
        Self::NoInfo
    }
}

/// Assert state of the upstream interface. An upstream interface never wins an assert, it only
/// learns which of the upstream routers won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamAssertState {
    /// No assert winner is known
    NoInfo,
    /// An upstream router won the assert and is used as RPF neighbor
    ILostAssert,
}

impl Default for UpstreamAssertState {
    fn default() -> Self {
        Self::NoInfo
    }
}

/// What the router needs to do after a downstream assert transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DownstreamAssertAction {
    /// We are still the winner. Send our own Assert.
    SendAssert,
    /// A new winner was recorded. Prune the interface.
    Lost,
    /// We keep losing against the recorded winner.
    StillLost,
    /// The recorded winner became inferior. Back to NoInfo.
    Reset,
}

/// Assert state of one downstream interface (or one `(source, interface)` pair with assert
/// optimization).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssertSlot {
    /// Current state
    pub state: AssertState,
    /// Expiration of the assert timer
    pub deadline: Option<Time>,
    /// Metric of the recorded winner (our own metric while winning)
    pub winner: AssertMetric,
}

impl AssertSlot {
    /// Returns true if another router won the assert
    pub fn is_losing(&self) -> bool {
        self.state == AssertState::ILostAssert
    }

    /// Back to NoInfo and forget the winner
    pub fn reset(&mut self) {
        self.state = AssertState::NoInfo;
        self.deadline = None;
        self.winner = AssertMetric::infinite();
    }

    /// Data arrived on the downstream interface. Returns true if an Assert must be sent.
    pub(crate) fn on_data(&mut self, local: AssertMetric, now: Time, timeout: Duration) -> bool {
        if self.state == AssertState::NoInfo {
            self.state = AssertState::IWonAssert;
            self.winner = local;
        }
        if self.state == AssertState::IWonAssert {
            self.deadline = Some(now + timeout);
            true
        } else {
            false
        }
    }

    /// An Assert was received on the downstream interface.
    pub(crate) fn on_assert(
        &mut self,
        local: AssertMetric,
        remote: AssertMetric,
        now: Time,
        timeout: Duration,
    ) -> DownstreamAssertAction {
        match self.state {
            AssertState::NoInfo | AssertState::IWonAssert if local.beats(&remote) => {
                self.state = AssertState::IWonAssert;
                self.winner = local;
                self.deadline = Some(now + timeout);
                DownstreamAssertAction::SendAssert
            }
            AssertState::NoInfo | AssertState::IWonAssert => {
                self.state = AssertState::ILostAssert;
                self.winner = remote;
                self.deadline = Some(now + timeout);
                DownstreamAssertAction::Lost
            }
            AssertState::ILostAssert if remote.address == self.winner.address => {
                if local.beats(&remote) {
                    self.reset();
                    DownstreamAssertAction::Reset
                } else {
                    self.winner = remote;
                    self.deadline = Some(now + timeout);
                    DownstreamAssertAction::StillLost
                }
            }
            AssertState::ILostAssert => {
                self.deadline = Some(now + timeout);
                if remote.beats(&self.winner) {
                    self.winner = remote;
                    DownstreamAssertAction::Lost
                } else {
                    DownstreamAssertAction::StillLost
                }
            }
        }
    }
}

/// What the router needs to do after an upstream assert transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpstreamAssertAction {
    /// The sender won and is not yet the RPF neighbor. Use it as new upstream.
    Adopt(Ipv4Addr),
    /// The sender is the winner and already the RPF neighbor.
    Refresh,
    /// The current winner sent an inferior Assert. Fall back to the unicast RPF neighbor.
    Revert,
    /// Inferior Assert from a router which is not the winner.
    Ignore,
}

/// Assert state of the upstream interface of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpstreamAssert {
    /// Current state
    pub state: UpstreamAssertState,
    /// Expiration of the assert timer
    pub deadline: Option<Time>,
    /// Best known competing route to the source
    pub winner: AssertMetric,
}

impl UpstreamAssert {
    /// Back to NoInfo and forget the winner
    pub fn reset(&mut self) {
        self.state = UpstreamAssertState::NoInfo;
        self.deadline = None;
        self.winner = AssertMetric::infinite();
    }

    /// An Assert was received on the upstream interface. `current` is the current RPF neighbor.
    pub(crate) fn on_assert(
        &mut self,
        remote: AssertMetric,
        current: Option<Ipv4Addr>,
        now: Time,
        timeout: Duration,
    ) -> UpstreamAssertAction {
        if self.state == UpstreamAssertState::ILostAssert && self.winner.beats(&remote) {
            return if current == Some(remote.address) {
                self.reset();
                UpstreamAssertAction::Revert
            } else {
                UpstreamAssertAction::Ignore
            };
        }
        self.state = UpstreamAssertState::ILostAssert;
        self.winner = remote;
        self.deadline = Some(now + timeout);
        if current == Some(remote.address) {
            UpstreamAssertAction::Refresh
        } else {
            UpstreamAssertAction::Adopt(remote.address)
        }
    }
}

/// Assert state shared by all groups of one `(source, interface)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssertSourceEntry {
    /// Groups of the source which share this assert outcome
    pub groups: BTreeSet<Group>,
    /// True if the interface is the RPF interface towards the source
    pub is_upstream: bool,
    /// Recorded upstream neighbor (only if `is_upstream`)
    pub upstream_address: Option<Ipv4Addr>,
    /// State while the interface is a downstream interface
    pub downstream: AssertSlot,
    /// State while the interface is the upstream interface
    pub upstream: UpstreamAssert,
}

/// Table of per-`(source, interface)` assert state, used with assert optimization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssertSourceTable {
    items: HashMap<(Source, InterfaceId), AssertSourceEntry>,
}

impl AssertSourceTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the item of a `(source, interface)` pair
    pub fn get(&self, source: Source, interface: InterfaceId) -> Option<&AssertSourceEntry> {
        self.items.get(&(source, interface))
    }

    /// Get the mutable item of a `(source, interface)` pair
    pub fn get_mut(
        &mut self,
        source: Source,
        interface: InterfaceId,
    ) -> Option<&mut AssertSourceEntry> {
        self.items.get_mut(&(source, interface))
    }

    /// Add a group to the item of `(source, interface)`, creating the item if necessary. Pass the
    /// upstream neighbor if the interface is the RPF interface of the source. Returns the item.
    pub fn add(
        &mut self,
        source: Source,
        interface: InterfaceId,
        group: Group,
        upstream: Option<Upstream>,
    ) -> &mut AssertSourceEntry {
        let item = self.items.entry((source, interface)).or_default();
        item.groups.insert(group);
        // all groups of a source share the same RPF interface
        item.is_upstream = upstream.is_some();
        item.upstream_address = upstream.and_then(|u| u.neighbor());
        item
    }

    /// Remove a group from the item of `(source, interface)`. Returns true if the item became
    /// empty and was deleted.
    pub fn remove_group(&mut self, source: Source, interface: InterfaceId, group: Group) -> bool {
        match self.items.get_mut(&(source, interface)) {
            Some(item) => {
                item.groups.remove(&group);
                if item.groups.is_empty() {
                    self.items.remove(&(source, interface));
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Number of `(source, interface)` items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the table is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl PimDmRouter {
    /// Handle an Assert received on `interface` from `sender`.
    pub(crate) fn handle_assert(
        &mut self,
        interface: InterfaceId,
        sender: Ipv4Addr,
        assert: &Assert,
        actions: &mut ActionQueue,
    ) -> bool {
        let sg = SgPair::new(assert.source, assert.group);
        let remote = AssertMetric::new(assert.preference, assert.metric, sender);
        let entry = match self.cache.get(&sg) {
            Some(e) => e,
            None => {
                debug!("{}: Assert for unknown entry {}, ignore it", self.name(), sg);
                return false;
            }
        };
        if entry.upstream_interface == Some(interface) {
            self.upstream_assert(sg, interface, remote, actions)
        } else if entry.downstream.contains(interface) {
            self.downstream_assert(sg, interface, remote, actions)
        } else {
            debug!("{}: Assert for {} on unrelated interface {}", self.name(), sg, interface);
            false
        }
    }

    /// Data for an existing entry was received on one of its downstream interfaces, so another
    /// router forwards onto the same LAN. Start (or reinforce) the assert.
    pub(crate) fn data_triggered_assert(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        actions: &mut ActionQueue,
    ) {
        let local = self.node.local_metric(sg.source, interface);
        let now = self.node.now;
        let timeout = self.node.config.assert_timeout;
        let send = if self.node.config.assert_optimization {
            let send = match self.node.assert_sources.get_mut(sg.source, interface) {
                Some(item) => item.downstream.on_data(local, now, timeout),
                None => return,
            };
            self.sync_source_assert(sg.source, interface);
            send
        } else {
            match self.cache.get_mut(&sg).and_then(|e| e.downstream.get_mut(interface)) {
                Some(ds) => ds.assert.on_data(local, now, timeout),
                None => return,
            }
        };
        if send {
            trace!("{}: data for {} on downstream {}, send Assert", self.name(), sg, interface);
            self.node.send_assert(sg, interface, actions);
            actions.push_back(Action::SetTimer {
                key: self.node.assert_timer_key(sg, interface),
                delay: timeout,
            });
        }
    }

    /// Assert received on the upstream interface of the entry
    fn upstream_assert(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        remote: AssertMetric,
        actions: &mut ActionQueue,
    ) -> bool {
        let now = self.node.now;
        let timeout = self.node.config.assert_timeout;
        let current = self.cache.get(&sg).and_then(|e| e.upstream.neighbor());

        // run the state machine, either on the shared item or on the entry itself.
        let (action, groups) = if self.node.config.assert_optimization {
            let item = match self.node.assert_sources.get_mut(sg.source, interface) {
                Some(item) => item,
                None => return false,
            };
            let action = item.upstream.on_assert(remote, current, now, timeout);
            if let UpstreamAssertAction::Adopt(addr) = action {
                item.upstream_address = Some(addr);
            }
            (action, item.groups.iter().copied().collect::<Vec<_>>())
        } else {
            let entry = match self.cache.get_mut(&sg) {
                Some(e) => e,
                None => return false,
            };
            (entry.upstream_assert.on_assert(remote, current, now, timeout), vec![sg.group])
        };
        debug!("{}: upstream Assert from {} for {}: {:?}", self.name(), remote.address, sg, action);

        let key = self.node.upstream_assert_timer_key(sg, interface);
        match action {
            UpstreamAssertAction::Ignore => return false,
            UpstreamAssertAction::Revert => actions.push_back(Action::CancelTimer(key)),
            _ => actions.push_back(Action::SetTimer { key, delay: timeout }),
        }

        let shared = self.node.assert_sources.get(sg.source, interface).map(|i| i.upstream.clone());
        for group in groups {
            let pair = SgPair::new(sg.source, group);
            let entry = match self.cache.get_mut(&pair) {
                Some(e) if e.upstream_interface == Some(interface) => e,
                _ => continue,
            };
            if self.node.config.assert_optimization {
                if let Some(shared) = shared.as_ref() {
                    entry.upstream_assert = shared.clone();
                }
            }
            match action {
                UpstreamAssertAction::Adopt(addr) if entry.upstream.neighbor() != Some(addr) => {
                    let member = self.node.membership.is_part_of_group(group);
                    if member || entry.state != EntryState::Prune {
                        // prune the old upstream, graft the new one
                        self.node.send_prune_upstream(entry, actions);
                        entry.upstream = Upstream::Neighbor(addr);
                        self.node.start_graft(entry, actions);
                    } else {
                        entry.upstream = Upstream::Neighbor(addr);
                    }
                }
                UpstreamAssertAction::Revert => {
                    if let Some(route) = self.node.rib.resolve(sg.source) {
                        if route.interface == interface {
                            entry.upstream = route.upstream;
                        }
                    }
                    entry.upstream_assert.reset();
                }
                _ => {}
            }
        }
        true
    }

    /// Assert received on a downstream interface of the entry
    fn downstream_assert(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        remote: AssertMetric,
        actions: &mut ActionQueue,
    ) -> bool {
        let local = self.node.local_metric(sg.source, interface);
        let now = self.node.now;
        let timeout = self.node.config.assert_timeout;

        let (action, groups) = if self.node.config.assert_optimization {
            let item = match self.node.assert_sources.get_mut(sg.source, interface) {
                Some(item) => item,
                None => return false,
            };
            let action = item.downstream.on_assert(local, remote, now, timeout);
            let groups = item.groups.iter().copied().collect::<Vec<_>>();
            self.sync_source_assert(sg.source, interface);
            (action, groups)
        } else {
            let ds = match self.cache.get_mut(&sg).and_then(|e| e.downstream.get_mut(interface)) {
                Some(ds) => ds,
                None => return false,
            };
            (ds.assert.on_assert(local, remote, now, timeout), vec![sg.group])
        };
        debug!("{}: downstream Assert from {} for {}: {:?}", self.name(), remote.address, sg, action);

        let key = self.node.assert_timer_key(sg, interface);
        match action {
            DownstreamAssertAction::Reset => actions.push_back(Action::CancelTimer(key)),
            _ => actions.push_back(Action::SetTimer { key, delay: timeout }),
        }
        if action == DownstreamAssertAction::SendAssert {
            self.node.send_assert(sg, interface, actions);
        }

        for group in groups {
            let pair = SgPair::new(sg.source, group);
            let entry = match self.cache.get_mut(&pair) {
                Some(e) => e,
                None => continue,
            };
            let slot = match entry.downstream.get(interface) {
                Some(ds) => ds.assert.clone(),
                None => continue,
            };
            if action == DownstreamAssertAction::Lost {
                let hold = Some(self.node.config.prune_hold_time);
                self.node.prune_downstream(entry, interface, hold, actions);
                self.node.prune_upstream_if_needed(entry, actions);
            }
            if slot.is_losing() {
                // tell the winner that we do not need its traffic on this LAN
                self.node.send_join_prune(
                    entry,
                    JoinPruneTarget::Neighbor(interface, slot.winner.address),
                    JoinPruneKind::Prune,
                    self.node.config.assert_hold_secs(),
                    actions,
                );
            }
            if action == DownstreamAssertAction::Reset {
                self.node.unprune_downstream(entry, interface, actions);
                self.node.graft_if_pruned(entry, actions);
            }
        }
        true
    }

    /// Forget the assert outcome of a downstream interface (for all groups sharing it), and let
    /// data flow again such that the assert can be re-elected.
    pub(crate) fn reset_downstream_assert(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        actions: &mut ActionQueue,
    ) {
        actions.push_back(Action::CancelTimer(self.node.assert_timer_key(sg, interface)));
        let groups = if self.node.config.assert_optimization {
            let item = match self.node.assert_sources.get_mut(sg.source, interface) {
                Some(item) => item,
                None => return,
            };
            item.downstream.reset();
            let groups = item.groups.iter().copied().collect::<Vec<_>>();
            self.sync_source_assert(sg.source, interface);
            groups
        } else {
            match self.cache.get_mut(&sg).and_then(|e| e.downstream.get_mut(interface)) {
                Some(ds) => ds.assert.reset(),
                None => return,
            }
            vec![sg.group]
        };
        debug!("{}: reset assert of {} on {}", self.name(), sg, interface);
        self.resume_downstream(sg.source, groups, interface, actions);
    }

    /// Unprune the interface for all given groups, and graft entries in `Prune`.
    fn resume_downstream(
        &mut self,
        source: Source,
        groups: Vec<Group>,
        interface: InterfaceId,
        actions: &mut ActionQueue,
    ) {
        for group in groups {
            if let Some(entry) = self.cache.get_mut(&SgPair::new(source, group)) {
                self.node.unprune_downstream(entry, interface, actions);
                self.node.graft_if_pruned(entry, actions);
            }
        }
    }

    /// Assert timer of a downstream interface (or a `(source, interface)` item) fired.
    pub(crate) fn assert_timeout(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        actions: &mut ActionQueue,
    ) -> bool {
        let now = self.node.now;
        let key = self.node.assert_timer_key(sg, interface);
        let (old, groups) = if self.node.config.assert_optimization {
            let item = match self.node.assert_sources.get_mut(sg.source, interface) {
                Some(item) => item,
                None => return false,
            };
            if item.is_upstream {
                return self.upstream_assert_timeout(sg, interface, actions);
            }
            let old = match revalidate(&mut item.downstream.deadline, now, key, actions) {
                Some(()) => item.downstream.state,
                None => return false,
            };
            item.downstream.reset();
            let groups = item.groups.iter().copied().collect::<Vec<_>>();
            self.sync_source_assert(sg.source, interface);
            (old, groups)
        } else {
            let ds = match self.cache.get_mut(&sg).and_then(|e| e.downstream.get_mut(interface)) {
                Some(ds) => ds,
                None => return false,
            };
            let old = match revalidate(&mut ds.assert.deadline, now, key, actions) {
                Some(()) => ds.assert.state,
                None => return false,
            };
            ds.assert.reset();
            (old, vec![sg.group])
        };
        debug!("{}: assert timer of {} on {} expired", self.name(), sg, interface);

        if old == AssertState::ILostAssert {
            self.resume_downstream(sg.source, groups, interface, actions);
        }
        true
    }

    /// Assert timer of an upstream interface fired.
    pub(crate) fn upstream_assert_timeout(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        actions: &mut ActionQueue,
    ) -> bool {
        let now = self.node.now;
        let key = self.node.upstream_assert_timer_key(sg, interface);
        let groups = if self.node.config.assert_optimization {
            let item = match self.node.assert_sources.get_mut(sg.source, interface) {
                Some(item) => item,
                None => return false,
            };
            if revalidate(&mut item.upstream.deadline, now, key, actions).is_none() {
                return false;
            }
            item.upstream.reset();
            item.groups.iter().copied().collect::<Vec<_>>()
        } else {
            let entry = match self.cache.get_mut(&sg) {
                Some(e) => e,
                None => return false,
            };
            if revalidate(&mut entry.upstream_assert.deadline, now, key, actions).is_none() {
                return false;
            }
            vec![sg.group]
        };
        debug!("{}: upstream assert timer of {} expired", self.name(), sg);
        // fall back to the unicast RPF neighbor
        let unicast = self.node.rib.resolve(sg.source).filter(|r| r.interface == interface);
        for group in groups {
            if let Some(entry) = self.cache.get_mut(&SgPair::new(sg.source, group)) {
                if entry.upstream_interface == Some(interface) {
                    entry.upstream_assert.reset();
                    if let Some(route) = unicast {
                        entry.upstream = route.upstream;
                    }
                }
            }
        }
        true
    }

    /// Copy the downstream assert slot of a `(source, interface)` item into every entry sharing
    /// it, such that all groups agree on the outcome.
    fn sync_source_assert(&mut self, source: Source, interface: InterfaceId) {
        let item = match self.node.assert_sources.get(source, interface) {
            Some(item) => item,
            None => return,
        };
        for group in item.groups.iter() {
            if let Some(ds) = self
                .cache
                .get_mut(&SgPair::new(source, *group))
                .and_then(|e| e.downstream.get_mut(interface))
            {
                ds.assert = item.downstream.clone();
            }
        }
    }
}

/// Re-validate a timer against its deadline. Returns `Some(())` if the timer really expired. If
/// the deadline was moved into the future, the timer is re-armed for the remaining time. If there
/// is no deadline at all, the timer is stale.
pub(crate) fn revalidate(
    deadline: &mut Option<Time>,
    now: Time,
    key: TimerKey,
    actions: &mut ActionQueue,
) -> Option<()> {
    match *deadline {
        None => None,
        Some(d) if d > now => {
            actions.push_back(Action::SetTimer { key, delay: d - now });
            None
        }
        Some(_) => {
            *deadline = None;
            Some(())
        }
    }
}
