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

//! # Node Context
//!
//! Everything a router knows apart from its forwarding cache: interfaces and their neighbors,
//! the unicast RIB, local membership, the per-source assert table, the random source and the
//! current time. Keeping this separate from the cache lets the handlers borrow a cache entry
//! mutably while still calling the helpers below, which emit the control messages and timers.

use crate::netsim::assert::{AssertMetric, AssertSourceTable, INFINITE_METRIC, INFINITE_PREFERENCE};
use crate::netsim::cache::{EntryState, ForwardingEntry};
use crate::netsim::config::{InterfaceConfig, PimDmConfig};
use crate::netsim::downstream::{DownstreamInfo, DownstreamSet};
use crate::netsim::event::{Action, ActionQueue, TimerKey};
use crate::netsim::neighbor::{LocalMembership, NeighborTable};
use crate::netsim::packet::{Assert, JoinPrune, JoinPruneKind, PimMessage};
use crate::netsim::rib::UnicastRib;
use crate::netsim::{Group, InterfaceId, RouterId, SgPair, Source, Time, ALL_PIM_ROUTERS};

use log::*;
use rand::prelude::*;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Interface of a router
#[derive(Debug, Clone, PartialEq)]
pub struct Interface {
    /// Configuration of the interface
    pub config: InterfaceConfig,
    /// PIM neighbors on the interface
    pub neighbors: NeighborTable,
}

/// Receiver of a Join/Prune message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinPruneTarget {
    /// The upstream neighbor of the entry, on the upstream interface
    Upstream,
    /// An explicit neighbor on an interface
    Neighbor(InterfaceId, Ipv4Addr),
}

/// Router context without the forwarding cache
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) router_id: RouterId,
    pub(crate) name: String,
    pub(crate) config: PimDmConfig,
    pub(crate) interfaces: BTreeMap<InterfaceId, Interface>,
    pub(crate) rib: UnicastRib,
    pub(crate) membership: LocalMembership,
    pub(crate) assert_sources: AssertSourceTable,
    pub(crate) generation_id: u32,
    pub(crate) rng: StdRng,
    pub(crate) now: Time,
}

impl Node {
    pub(crate) fn new(router_id: RouterId, name: String, config: PimDmConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed ^ router_id.index() as u64);
        let generation_id = rng.gen();
        Self {
            router_id,
            name,
            config,
            interfaces: BTreeMap::new(),
            rib: UnicastRib::new(),
            membership: LocalMembership::new(),
            assert_sources: AssertSourceTable::new(),
            generation_id,
            rng,
            now: Duration::default(),
        }
    }

    /// Address of an interface
    pub fn address(&self, interface: InterfaceId) -> Option<Ipv4Addr> {
        self.interfaces.get(&interface).map(|i| i.config.address)
    }

    /// Number of PIM neighbors on an interface
    pub fn neighbor_count(&self, interface: InterfaceId) -> usize {
        self.interfaces.get(&interface).map(|i| i.neighbors.len()).unwrap_or(0)
    }

    /// Returns true if `address` is a known neighbor on `interface`
    pub fn is_neighbor(&self, interface: InterfaceId, address: Ipv4Addr) -> bool {
        self.interfaces.get(&interface).map(|i| i.neighbors.contains(address)).unwrap_or(false)
    }

    /// Returns true if `address` belongs to one of the interfaces of the router
    pub fn owns_address(&self, address: Ipv4Addr) -> bool {
        self.interfaces.values().any(|i| i.config.address == address)
    }

    /// Returns true if the interface should be a downstream interface of a new entry of `group`
    pub(crate) fn is_candidate_downstream(&self, group: Group, interface: InterfaceId) -> bool {
        self.neighbor_count(interface) > 0
            || self.membership.has_local_receiver(group, interface)
            || self.membership.is_part_of_group(group)
    }

    /// Assert metric of this router on `interface` for traffic of `source`.
    pub(crate) fn local_metric(&self, source: Source, interface: InterfaceId) -> AssertMetric {
        let address = self.address(interface).unwrap_or(Ipv4Addr::UNSPECIFIED);
        match self.rib.resolve(source) {
            Some(route) => AssertMetric::new(route.preference, route.metric, address),
            None => AssertMetric::new(INFINITE_PREFERENCE, INFINITE_METRIC, address),
        }
    }

    /// Uniformly distributed random delay in `[0, max)`.
    pub(crate) fn random_delay(&mut self, max: Duration) -> Duration {
        let max = max.as_micros() as u64;
        if max == 0 {
            Duration::default()
        } else {
            Duration::from_micros(self.rng.gen_range(0, max))
        }
    }

    /// Timer key of the downstream assert state, depending on assert optimization.
    pub(crate) fn assert_timer_key(&self, sg: SgPair, interface: InterfaceId) -> TimerKey {
        if self.config.assert_optimization {
            TimerKey::SourceAssert(sg.source, interface)
        } else {
            TimerKey::Assert(sg, interface)
        }
    }

    /// Timer key of the upstream assert state, depending on assert optimization.
    pub(crate) fn upstream_assert_timer_key(&self, sg: SgPair, interface: InterfaceId) -> TimerKey {
        if self.config.assert_optimization {
            TimerKey::SourceAssert(sg.source, interface)
        } else {
            TimerKey::UpstreamAssert(sg)
        }
    }

    /// Send a Join or a Prune for the entry. Returns true if the message was sent.
    ///
    /// Nothing is sent towards the upstream of a directly connected or self-originated source, or
    /// to the source itself.
    pub(crate) fn send_join_prune(
        &self,
        entry: &ForwardingEntry,
        target: JoinPruneTarget,
        kind: JoinPruneKind,
        hold_time: u16,
        actions: &mut ActionQueue,
    ) -> bool {
        let sg = entry.sg;
        let (interface, neighbor) = match target {
            JoinPruneTarget::Upstream => {
                if entry.upstream.is_local_source() {
                    trace!("{}: no {} for {} towards a local source", self.name, kind, sg);
                    return false;
                }
                match (entry.upstream_interface, entry.upstream.neighbor()) {
                    (Some(i), Some(n)) => (i, n),
                    _ => return false,
                }
            }
            JoinPruneTarget::Neighbor(i, n) => (i, n),
        };
        if neighbor == sg.source {
            trace!("{}: no {} for {} addressed to the source", self.name, kind, sg);
            return false;
        }
        debug!("{}: send {} for {} to {} on {}", self.name, kind, sg, neighbor, interface);
        actions.push_back(Action::SendControl {
            interface,
            destination: ALL_PIM_ROUTERS,
            message: PimMessage::JoinPrune(JoinPrune::single(
                neighbor, hold_time, sg.source, sg.group, kind,
            )),
        });
        true
    }

    /// Send a Prune to the upstream neighbor and remember when it was sent.
    pub(crate) fn send_prune_upstream(&self, entry: &mut ForwardingEntry, actions: &mut ActionQueue) {
        let hold = self.config.prune_hold_secs();
        if self.send_join_prune(entry, JoinPruneTarget::Upstream, JoinPruneKind::Prune, hold, actions) {
            entry.last_prune_sent = Some(self.now);
        }
    }

    /// Send a Graft to the upstream neighbor. For a local source, the entry simply moves to
    /// `Forward`.
    pub(crate) fn send_graft(&self, entry: &mut ForwardingEntry, actions: &mut ActionQueue) {
        if entry.upstream.is_local_source() {
            entry.state = EntryState::Forward;
            return;
        }
        let (interface, neighbor) = match (entry.upstream_interface, entry.upstream.neighbor()) {
            (Some(i), Some(n)) => (i, n),
            _ => {
                debug!("{}: cannot graft {}, upstream is {}", self.name, entry.sg, entry.upstream);
                return;
            }
        };
        debug!("{}: send Graft for {} to {}", self.name, entry.sg, neighbor);
        actions.push_back(Action::SendControl {
            interface,
            destination: neighbor,
            message: PimMessage::Graft(JoinPrune::single(
                neighbor,
                0,
                entry.sg.source,
                entry.sg.group,
                JoinPruneKind::Join,
            )),
        });
        entry.graft_retransmit_pending = true;
        actions.push_back(Action::SetTimer {
            key: TimerKey::GraftRetransmit(entry.sg),
            delay: self.config.graft_retransmit_period,
        });
    }

    /// Move to `AckPending`, send a Graft and arm the data timer.
    pub(crate) fn start_graft(&self, entry: &mut ForwardingEntry, actions: &mut ActionQueue) {
        entry.state = EntryState::AckPending;
        entry.graft_retries = 0;
        self.send_graft(entry, actions);
        self.arm_data_timer(entry, actions);
    }

    /// Graft the entry if it is in `Prune`. Returns true if it did.
    pub(crate) fn graft_if_pruned(&self, entry: &mut ForwardingEntry, actions: &mut ActionQueue) -> bool {
        if entry.state == EntryState::Prune {
            self.start_graft(entry, actions);
            true
        } else {
            false
        }
    }

    /// Send an Assert for `sg` on `interface`
    pub(crate) fn send_assert(&self, sg: SgPair, interface: InterfaceId, actions: &mut ActionQueue) {
        let metric = self.local_metric(sg.source, interface);
        actions.push_back(Action::SendControl {
            interface,
            destination: ALL_PIM_ROUTERS,
            message: PimMessage::Assert(Assert {
                group: sg.group,
                source: sg.source,
                rpt: false,
                preference: metric.preference,
                metric: metric.metric,
            }),
        });
    }

    /// Push the data timeout back. The timer is only armed if it is idle, a running timer
    /// re-validates against the expiration when it fires.
    pub(crate) fn arm_data_timer(&self, entry: &mut ForwardingEntry, actions: &mut ActionQueue) {
        let idle = entry.expiration.is_none();
        entry.expiration = Some(self.now + self.config.data_timeout);
        if idle {
            actions.push_back(Action::SetTimer {
                key: TimerKey::Data(entry.sg),
                delay: self.config.data_timeout,
            });
        }
    }

    /// Move the entry to `Prune` and send a Prune upstream.
    pub(crate) fn enter_prune(&self, entry: &mut ForwardingEntry, actions: &mut ActionQueue) {
        debug!("{}: {} moves to PRUNE", self.name, entry.sg);
        entry.state = EntryState::Prune;
        self.send_prune_upstream(entry, actions);
        self.clear_pending(entry, actions);
        self.arm_data_timer(entry, actions);
    }

    /// Forget any pending delayed Join and Graft retransmission.
    pub(crate) fn clear_pending(&self, entry: &mut ForwardingEntry, actions: &mut ActionQueue) {
        if entry.delayed_join_pending {
            entry.delayed_join_pending = false;
            entry.delayed_join_end = None;
            actions.push_back(Action::CancelTimer(TimerKey::DelayedJoin(entry.sg)));
        }
        if entry.graft_retransmit_pending {
            entry.graft_retransmit_pending = false;
            actions.push_back(Action::CancelTimer(TimerKey::GraftRetransmit(entry.sg)));
        }
    }

    /// Returns true if the router has no interest of its own in the group of the entry, such that
    /// it may prune upstream.
    pub(crate) fn no_local_interest(&self, group: Group) -> bool {
        !self.membership.is_part_of_group(group) && !self.config.broadcast_mode
    }

    /// Prune the entry upstream if all downstream interfaces are pruned and there is no local
    /// interest. Returns true if the entry moved to `Prune`.
    pub(crate) fn prune_upstream_if_needed(
        &self,
        entry: &mut ForwardingEntry,
        actions: &mut ActionQueue,
    ) -> bool {
        if entry.state != EntryState::Prune
            && entry.upstream.is_reachable()
            && entry.downstream.all_pruned()
            && self.no_local_interest(entry.sg.group)
        {
            self.enter_prune(entry, actions);
            true
        } else {
            false
        }
    }

    /// Returns true if a (repeated) Prune may be sent upstream: there is no local interest and
    /// either we are the only router on the upstream LAN or nobody joined there since we pruned.
    pub(crate) fn may_prune_upstream(&self, entry: &ForwardingEntry) -> bool {
        let single = entry.upstream_interface.map(|i| self.neighbor_count(i) == 1).unwrap_or(false);
        self.no_local_interest(entry.sg.group) && (single || !entry.join_seen_while_pruned)
    }

    /// Prune a downstream interface. A `hold` of `None` never expires. Interfaces with a local
    /// receiver are never pruned; returns false in that case.
    pub(crate) fn prune_downstream(
        &self,
        entry: &mut ForwardingEntry,
        interface: InterfaceId,
        hold: Option<Duration>,
        actions: &mut ActionQueue,
    ) -> bool {
        if self.membership.has_local_receiver(entry.sg.group, interface) {
            return false;
        }
        let sg = entry.sg;
        let ds = match entry.downstream.get_mut(interface) {
            Some(ds) => ds,
            None => return false,
        };
        ds.is_pruned = true;
        ds.delayed_prune_active = false;
        ds.prune_armed_at = Some(self.now);
        ds.prune_hold_time = hold;
        actions.push_back(Action::CancelTimer(TimerKey::DelayedPrune(sg, interface)));
        match hold {
            Some(delay) => actions.push_back(Action::SetTimer { key: TimerKey::Prune(sg, interface), delay }),
            None => actions.push_back(Action::CancelTimer(TimerKey::Prune(sg, interface))),
        }
        true
    }

    /// Remove any prune from a downstream interface. Returns true if it was pruned.
    pub(crate) fn unprune_downstream(
        &self,
        entry: &mut ForwardingEntry,
        interface: InterfaceId,
        actions: &mut ActionQueue,
    ) -> bool {
        let sg = entry.sg;
        match entry.downstream.get_mut(interface) {
            Some(ds) if ds.is_pruned || ds.delayed_prune_active => {
                let was_pruned = ds.is_pruned;
                ds.unprune();
                actions.push_back(Action::CancelTimer(TimerKey::Prune(sg, interface)));
                actions.push_back(Action::CancelTimer(TimerKey::DelayedPrune(sg, interface)));
                was_pruned
            }
            _ => false,
        }
    }

    /// Add a downstream interface to the entry. Returns false if it was already present.
    pub(crate) fn add_downstream(&mut self, entry: &mut ForwardingEntry, interface: InterfaceId) -> bool {
        if entry.downstream.contains(interface) {
            return false;
        }
        let address = self.address(interface).unwrap_or(Ipv4Addr::UNSPECIFIED);
        let winner = match self.rib.resolve(entry.sg.source) {
            Some(route) => AssertMetric::new(route.preference, route.metric, address),
            None => AssertMetric::infinite(),
        };
        let mut info = DownstreamInfo::new(interface, address, winner);
        if self.config.assert_optimization {
            let item = self.assert_sources.add(entry.sg.source, interface, entry.sg.group, None);
            if item.downstream.state != Default::default() {
                info.assert = item.downstream.clone();
            }
        }
        trace!("{}: add downstream {} to {}", self.name, interface, entry.sg);
        entry.downstream.add(info)
    }

    /// Remove a downstream interface from the entry, cancelling its timers.
    pub(crate) fn remove_downstream(
        &mut self,
        entry: &mut ForwardingEntry,
        interface: InterfaceId,
        actions: &mut ActionQueue,
    ) -> Option<DownstreamInfo> {
        let sg = entry.sg;
        let info = entry.downstream.remove(interface)?;
        trace!("{}: remove downstream {} from {}", self.name, interface, sg);
        actions.push_back(Action::CancelTimer(TimerKey::Prune(sg, interface)));
        actions.push_back(Action::CancelTimer(TimerKey::DelayedPrune(sg, interface)));
        if self.config.assert_optimization {
            if self.assert_sources.remove_group(sg.source, interface, sg.group) {
                actions.push_back(Action::CancelTimer(TimerKey::SourceAssert(sg.source, interface)));
            }
        } else {
            actions.push_back(Action::CancelTimer(TimerKey::Assert(sg, interface)));
        }
        Some(info)
    }

    /// Cancel every timer of an entry that is about to be deleted, and release its
    /// `(source, interface)` assert items.
    pub(crate) fn release_entry(&mut self, entry: &ForwardingEntry, actions: &mut ActionQueue) {
        let sg = entry.sg;
        actions.push_back(Action::CancelTimer(TimerKey::Data(sg)));
        actions.push_back(Action::CancelTimer(TimerKey::GraftRetransmit(sg)));
        actions.push_back(Action::CancelTimer(TimerKey::DelayedJoin(sg)));
        actions.push_back(Action::CancelTimer(TimerKey::UpstreamAssert(sg)));
        let interfaces = entry.downstream.interfaces();
        for interface in interfaces.iter() {
            actions.push_back(Action::CancelTimer(TimerKey::Prune(sg, *interface)));
            actions.push_back(Action::CancelTimer(TimerKey::DelayedPrune(sg, *interface)));
            actions.push_back(Action::CancelTimer(TimerKey::Assert(sg, *interface)));
        }
        if self.config.assert_optimization {
            for interface in interfaces.into_iter().chain(entry.upstream_interface) {
                if self.assert_sources.remove_group(sg.source, interface, sg.group) {
                    actions.push_back(Action::CancelTimer(TimerKey::SourceAssert(sg.source, interface)));
                }
            }
        }
    }

    /// Downstream interfaces that forward data of the entry, in order.
    pub(crate) fn forwarding_interfaces(&self, downstream: &DownstreamSet) -> Vec<InterfaceId> {
        downstream.iter().filter(|d| d.is_forwarding()).map(|d| d.interface).collect()
    }
}
