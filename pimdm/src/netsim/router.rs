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

//! Module defining a router running PIM dense mode.
//!
//! The router owns its forwarding cache and its [`Node`] context. It never talks to the network
//! directly: every event is handled to completion, and all side effects (packets to send, timers to
//! arm or cancel) are appended to an [`ActionQueue`], which the caller carries out.

use crate::netsim::assert::AssertSourceTable;
use crate::netsim::cache::{EntryState, ForwardingCache, ForwardingEntry};
use crate::netsim::config::{holdtime_to_duration, InterfaceConfig, PimDmConfig};
use crate::netsim::event::{
    Action, ActionQueue, DataPacket, Event, MembershipChange, TimerKey,
};
use crate::netsim::neighbor::{LocalMembership, NeighborTable, NeighborUpdate};
use crate::netsim::node::{Interface, Node};
use crate::netsim::packet::{Hello, PimMessage};
use crate::netsim::rib::{Route, RpfRoute, UnicastRib};
use crate::netsim::{
    Group, InterfaceId, PimError, Prefix, RouterId, SgPair, Time, Upstream, ALL_PIM_ROUTERS,
};
use log::*;
use std::net::Ipv4Addr;

/// PIM-DM Router
#[derive(Debug, Clone)]
pub struct PimDmRouter {
    /// Everything except the forwarding cache
    pub(crate) node: Node,
    /// Forwarding cache
    pub(crate) cache: ForwardingCache,
}

impl PimDmRouter {
    /// Create a new router without any interface
    pub fn new(name: String, router_id: RouterId, config: PimDmConfig) -> Self {
        Self { node: Node::new(router_id, name, config), cache: ForwardingCache::new() }
    }

    /// Return the ID of the router
    pub fn router_id(&self) -> RouterId {
        self.node.router_id
    }

    /// Return the name of the router
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Return the configuration of the router
    pub fn config(&self) -> &PimDmConfig {
        &self.node.config
    }

    /// Generation ID announced in the Hello messages
    pub fn generation_id(&self) -> u32 {
        self.node.generation_id
    }

    /// Time of the last handled event
    pub fn now(&self) -> Time {
        self.node.now
    }

    /// Return the forwarding cache
    pub fn cache(&self) -> &ForwardingCache {
        &self.cache
    }

    /// Return the forwarding cache entry of a pair
    pub fn get_entry(&self, sg: SgPair) -> Option<&ForwardingEntry> {
        self.cache.get(&sg)
    }

    /// Return an interface of the router
    pub fn interface(&self, interface: InterfaceId) -> Option<&Interface> {
        self.node.interfaces.get(&interface)
    }

    /// Iterate over all interfaces of the router
    pub fn interfaces(&self) -> impl Iterator<Item = (InterfaceId, &Interface)> {
        self.node.interfaces.iter().map(|(i, iface)| (*i, iface))
    }

    /// Return the neighbors on an interface
    pub fn neighbors(&self, interface: InterfaceId) -> Option<&NeighborTable> {
        self.node.interfaces.get(&interface).map(|i| &i.neighbors)
    }

    /// Return the unicast RIB
    pub fn rib(&self) -> &UnicastRib {
        &self.node.rib
    }

    /// Return the local group membership
    pub fn membership(&self) -> &LocalMembership {
        &self.node.membership
    }

    /// Return the per-source assert table (only used with assert optimization)
    pub fn assert_sources(&self) -> &AssertSourceTable {
        &self.node.assert_sources
    }

    /// Configure a new interface
    pub fn add_interface(
        &mut self,
        interface: InterfaceId,
        config: InterfaceConfig,
    ) -> Result<(), PimError> {
        if self.node.interfaces.contains_key(&interface) {
            return Err(PimError::InterfaceAlreadyExists(interface));
        }
        self.node
            .interfaces
            .insert(interface, Interface { config, neighbors: NeighborTable::new() });
        Ok(())
    }

    /// Install a unicast route. Call [`Event::RouteChange`] afterwards to update the cache.
    pub fn insert_route(&mut self, prefix: Prefix, route: Route) -> Result<(), PimError> {
        if !self.node.interfaces.contains_key(&route.interface) {
            return Err(PimError::UnknownInterface(route.interface));
        }
        self.node.rib.insert(prefix, route);
        Ok(())
    }

    /// Remove a unicast route
    pub fn remove_route(&mut self, prefix: Prefix) -> Option<Route> {
        self.node.rib.remove(&prefix)
    }

    /// Replace the entire unicast RIB. Returns true if it changed.
    pub(crate) fn write_rib(&mut self, rib: UnicastRib) -> bool {
        if self.node.rib == rib {
            false
        } else {
            self.node.rib = rib;
            true
        }
    }

    /// handle an `Event` at time `now`, and push all resulting actions to `actions`. Returns
    /// Ok(true) if a packet was forwarded or the protocol state changed, and Ok(false) if the event
    /// was dropped or ignored.
    pub fn handle_event(
        &mut self,
        event: Event,
        now: Time,
        actions: &mut ActionQueue,
    ) -> Result<bool, PimError> {
        if event.router() != self.node.router_id {
            debug!("{}: received an event for another router! Ignore event!", self.name());
            return Ok(false);
        }
        self.node.now = now;
        match event {
            Event::Data { interface, prev_hop, packet, .. } => {
                self.handle_data(interface, prev_hop, packet, actions)
            }
            Event::Control { interface, src, dst, payload, .. } => {
                if !self.node.interfaces.contains_key(&interface) {
                    return Err(PimError::UnknownInterface(interface));
                }
                if self.node.owns_address(src) {
                    return Ok(false);
                }
                if dst != ALL_PIM_ROUTERS && !self.node.owns_address(dst) {
                    debug!("{}: control packet for {}, not for us", self.name(), dst);
                    return Ok(false);
                }
                let message = match PimMessage::decode(&payload) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("{}: drop control packet from {}: {}", self.name(), src, e);
                        return Ok(false);
                    }
                };
                trace!("{}: received {} from {} on {}", self.name(), message, src, interface);
                Ok(match message {
                    PimMessage::Hello(hello) => self.handle_hello(interface, src, hello, actions),
                    PimMessage::JoinPrune(m) => self.handle_join_prune(interface, src, &m, actions),
                    PimMessage::Graft(m) => self.handle_graft(interface, src, &m, actions),
                    PimMessage::GraftAck(m) => self.handle_graft_ack(src, &m, actions),
                    PimMessage::Assert(m) => self.handle_assert(interface, src, &m, actions),
                })
            }
            Event::Timer(_, key) => self.handle_timer(key, actions),
            Event::Membership { group, interface, change, .. } => {
                self.handle_membership(group, interface, change, actions)
            }
            Event::RouteChange(_, prefix) => Ok(self.handle_route_change(prefix, actions)),
            Event::Start(_) => {
                let interfaces: Vec<InterfaceId> = self.node.interfaces.keys().copied().collect();
                for interface in interfaces {
                    self.send_hello(interface, actions);
                    actions.push_back(Action::SetTimer {
                        key: TimerKey::Hello(interface),
                        delay: self.node.config.hello_period,
                    });
                }
                Ok(true)
            }
        }
    }

    // -----------------------------------------------------------------------------------------
    // Data path
    // -----------------------------------------------------------------------------------------

    fn handle_data(
        &mut self,
        interface: Option<InterfaceId>,
        prev_hop: Option<Ipv4Addr>,
        packet: DataPacket,
        actions: &mut ActionQueue,
    ) -> Result<bool, PimError> {
        let sg = packet.sg();

        let (upstream_interface, upstream) = if self.node.owns_address(sg.source) {
            if prev_hop.is_some() {
                debug!("{}: drop looped copy of our own packet {}", self.name(), sg);
                return Ok(false);
            }
            (None, Upstream::Me)
        } else {
            match self.node.rib.resolve(sg.source) {
                Some(route) => (Some(route.interface), route.upstream),
                None => {
                    // A state-only entry records the pair while the source is unreachable. It
                    // expires with the data timer, or becomes a regular entry once a route to
                    // the source appears (see `reresolve_upstream`).
                    let new = !self.cache.contains(&sg);
                    if new {
                        debug!("{}: no route to {}, keep state for {}", self.name(), sg.source, sg);
                        self.cache.insert(ForwardingEntry::new(sg, interface, Upstream::Unreachable))?;
                    } else {
                        debug!("{}: no route to {}, drop the packet", self.name(), sg.source);
                    }
                    if let Some(entry) = self.cache.get_mut(&sg) {
                        if !entry.upstream.is_reachable() {
                            self.node.arm_data_timer(entry, actions);
                        }
                    }
                    return Ok(new);
                }
            }
        };

        if self.cache.contains(&sg) {
            self.forward_data(sg, interface, packet, actions)
        } else if interface != upstream_interface {
            debug!("{}: RPF check for new pair {} failed on {:?}", self.name(), sg, interface);
            Ok(false)
        } else {
            self.build_entry(sg, upstream_interface, upstream, prev_hop, packet, actions)
        }
    }

    /// Data arrived for an existing entry.
    fn forward_data(
        &mut self,
        sg: SgPair,
        interface: Option<InterfaceId>,
        packet: DataPacket,
        actions: &mut ActionQueue,
    ) -> Result<bool, PimError> {
        let now = self.node.now;
        let entry = self.cache.get_mut(&sg).ok_or(PimError::MissingEntry(sg))?;
        if !entry.upstream.is_reachable() {
            return Ok(false);
        }

        if interface != entry.upstream_interface {
            let node = &self.node;
            let assert_on = interface
                .filter(|i| entry.downstream.contains(*i) && node.neighbor_count(*i) > 0);
            return match assert_on {
                Some(i) => {
                    self.data_triggered_assert(sg, i, actions);
                    Ok(true)
                }
                None => {
                    debug!("{}: RPF check for {} failed on {:?}", self.node.name, sg, interface);
                    Ok(false)
                }
            };
        }

        self.node.arm_data_timer(entry, actions);

        if entry.state == EntryState::Prune {
            let interval = self.node.config.prune_resend_interval;
            let rate_ok = entry.last_prune_sent.map(|t| now >= t + interval).unwrap_or(true);
            if self.node.may_prune_upstream(entry) && rate_ok {
                trace!("{}: data for pruned {}, prune again", self.node.name, sg);
                self.node.send_prune_upstream(entry, actions);
                self.node.clear_pending(entry, actions);
            }
            return Ok(false);
        }

        let out = self.node.forwarding_interfaces(&entry.downstream);
        for interface in out.iter() {
            actions.push_back(Action::ForwardData { interface: *interface, packet });
        }
        Ok(!out.is_empty())
    }

    /// Build a new entry for the first packet of a pair, received on the RPF interface.
    fn build_entry(
        &mut self,
        sg: SgPair,
        upstream_interface: Option<InterfaceId>,
        upstream: Upstream,
        prev_hop: Option<Ipv4Addr>,
        packet: DataPacket,
        actions: &mut ActionQueue,
    ) -> Result<bool, PimError> {
        if let (Some(interface), Some(prev_hop)) = (upstream_interface, prev_hop) {
            if prev_hop != sg.source && !self.node.is_neighbor(interface, prev_hop) {
                debug!("{}: {} from unknown neighbor {}, drop", self.name(), sg, prev_hop);
                return Ok(false);
            }
        }

        let mut entry = ForwardingEntry::new(sg, upstream_interface, upstream);
        let candidates: Vec<InterfaceId> = self
            .node
            .interfaces
            .keys()
            .copied()
            .filter(|i| Some(*i) != upstream_interface)
            .filter(|i| self.node.is_candidate_downstream(sg.group, *i))
            .collect();
        for interface in candidates {
            self.node.add_downstream(&mut entry, interface);
        }
        if self.node.config.assert_optimization {
            if let Some(interface) = upstream_interface {
                self.node.assert_sources.add(sg.source, interface, sg.group, Some(upstream));
            }
        }

        info!(
            "{}: new entry {} from {} via {}",
            self.name(),
            sg,
            upstream,
            upstream_interface.map(|i| i.to_string()).unwrap_or_else(|| "CPU".to_string())
        );

        let out = self.node.forwarding_interfaces(&entry.downstream);
        for interface in out.iter() {
            actions.push_back(Action::ForwardData { interface: *interface, packet });
        }
        self.node.arm_data_timer(&mut entry, actions);

        if entry.downstream.is_empty() && self.node.no_local_interest(sg.group) {
            self.node.enter_prune(&mut entry, actions);
        }

        self.cache.insert(entry)?;
        Ok(true)
    }

    /// Delete an entry, cancelling all of its timers.
    pub(crate) fn delete_entry(
        &mut self,
        sg: SgPair,
        actions: &mut ActionQueue,
    ) -> Option<ForwardingEntry> {
        let entry = self.cache.remove(&sg)?;
        info!("{}: delete entry {}", self.name(), sg);
        self.node.release_entry(&entry, actions);
        Some(entry)
    }

    // -----------------------------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------------------------

    fn handle_timer(&mut self, key: TimerKey, actions: &mut ActionQueue) -> Result<bool, PimError> {
        trace!("{}: timer {} fired", self.name(), key);
        Ok(match key {
            TimerKey::Hello(interface) => {
                self.send_hello(interface, actions);
                actions.push_back(Action::SetTimer {
                    key,
                    delay: self.node.config.hello_period,
                });
                true
            }
            TimerKey::TriggeredHello(interface) => {
                self.send_hello(interface, actions);
                true
            }
            TimerKey::NeighborLiveness(interface, address) => {
                self.neighbor_timeout(interface, address, actions)
            }
            TimerKey::Data(sg) => self.data_timeout(sg, actions),
            TimerKey::GraftRetransmit(sg) => self.graft_retransmit(sg, actions),
            TimerKey::DelayedJoin(sg) => self.delayed_join_timeout(sg, actions),
            TimerKey::UpstreamAssert(sg) => match self.cache.get(&sg).and_then(|e| e.upstream_interface) {
                Some(interface) => self.upstream_assert_timeout(sg, interface, actions),
                None => false,
            },
            TimerKey::Assert(sg, interface) => self.assert_timeout(sg, interface, actions),
            TimerKey::SourceAssert(source, interface) => {
                let group = self
                    .node
                    .assert_sources
                    .get(source, interface)
                    .and_then(|item| item.groups.iter().next().copied());
                match group {
                    Some(group) => self.assert_timeout(SgPair::new(source, group), interface, actions),
                    None => false,
                }
            }
            TimerKey::Prune(sg, interface) => self.prune_timeout(sg, interface, actions),
            TimerKey::DelayedPrune(sg, interface) => {
                self.delayed_prune_timeout(sg, interface, actions)
            }
        })
    }

    /// The data timer of an entry fired.
    fn data_timeout(&mut self, sg: SgPair, actions: &mut ActionQueue) -> bool {
        let now = self.node.now;
        let data_timeout = self.node.config.data_timeout;
        let entry = match self.cache.get_mut(&sg) {
            Some(e) => e,
            None => {
                debug!("{}: stale data timer for {}", self.node.name, sg);
                return false;
            }
        };
        match entry.expiration {
            None => return false,
            Some(t) if t > now => {
                actions.push_back(Action::SetTimer { key: TimerKey::Data(sg), delay: t - now });
                return false;
            }
            Some(_) => {}
        }
        let prune_expired = entry
            .downstream
            .iter()
            .any(|d| d.prune_deadline().map(|t| t <= now).unwrap_or(false));
        if prune_expired {
            // the prune timer fires right after, keep the entry alive for it
            entry.expiration = Some(now + data_timeout);
            actions.push_back(Action::SetTimer { key: TimerKey::Data(sg), delay: data_timeout });
            return false;
        }
        debug!("{}: data timeout of {}", self.node.name, sg);
        self.delete_entry(sg, actions);
        true
    }

    // -----------------------------------------------------------------------------------------
    // Hello and neighbors
    // -----------------------------------------------------------------------------------------

    fn send_hello(&self, interface: InterfaceId, actions: &mut ActionQueue) {
        actions.push_back(Action::SendControl {
            interface,
            destination: ALL_PIM_ROUTERS,
            message: PimMessage::Hello(Hello {
                hold_time: Some(self.node.config.hello_holdtime_secs()),
                generation_id: Some(self.node.generation_id),
            }),
        });
    }

    fn handle_hello(
        &mut self,
        interface: InterfaceId,
        src: Ipv4Addr,
        hello: Hello,
        actions: &mut ActionQueue,
    ) -> bool {
        let hold = hello.hold_time.unwrap_or_else(|| self.node.config.hello_holdtime_secs());
        if hold == 0 {
            return if self.node.is_neighbor(interface, src) {
                info!("{}: neighbor {} on {} says goodbye", self.name(), src, interface);
                self.neighbor_loss(interface, src, actions);
                true
            } else {
                false
            };
        }

        let now = self.node.now;
        let lifetime = holdtime_to_duration(hold);
        let update = match self.node.interfaces.get_mut(&interface) {
            Some(i) => i.neighbors.update(src, hold, hello.generation_id, lifetime.map(|d| now + d)),
            None => return false,
        };
        let key = TimerKey::NeighborLiveness(interface, src);
        match lifetime {
            Some(delay) => actions.push_back(Action::SetTimer { key, delay }),
            None => actions.push_back(Action::CancelTimer(key)),
        }

        match update {
            NeighborUpdate::Refreshed => false,
            NeighborUpdate::New | NeighborUpdate::Restarted => {
                if update == NeighborUpdate::New {
                    info!("{}: new neighbor {} on {}", self.name(), src, interface);
                } else {
                    info!("{}: neighbor {} on {} restarted", self.name(), src, interface);
                }
                let delay = self.node.random_delay(self.node.config.triggered_hello_delay);
                actions.push_back(Action::SetTimer { key: TimerKey::TriggeredHello(interface), delay });
                self.neighbor_added(interface, actions);
                true
            }
        }
    }

    /// A neighbor appeared (or restarted) on the interface. It may need the traffic of every
    /// entry which does not use the interface as upstream.
    fn neighbor_added(&mut self, interface: InterfaceId, actions: &mut ActionQueue) {
        for sg in self.cache.pairs() {
            let entry = match self.cache.get_mut(&sg) {
                Some(e) => e,
                None => continue,
            };
            if entry.upstream_interface == Some(interface) || !entry.upstream.is_reachable() {
                continue;
            }
            let changed = if entry.downstream.contains(interface) {
                self.node.unprune_downstream(entry, interface, actions)
            } else {
                self.node.add_downstream(entry, interface)
            };
            if changed {
                self.node.graft_if_pruned(entry, actions);
            }
        }
    }

    fn neighbor_timeout(
        &mut self,
        interface: InterfaceId,
        address: Ipv4Addr,
        actions: &mut ActionQueue,
    ) -> bool {
        let now = self.node.now;
        let expires_at = match self
            .node
            .interfaces
            .get(&interface)
            .and_then(|i| i.neighbors.get(address))
        {
            Some(n) => n.expires_at,
            None => return false,
        };
        match expires_at {
            None => false,
            Some(t) if t > now => {
                actions.push_back(Action::SetTimer {
                    key: TimerKey::NeighborLiveness(interface, address),
                    delay: t - now,
                });
                false
            }
            Some(_) => {
                info!("{}: neighbor {} on {} timed out", self.name(), address, interface);
                self.neighbor_loss(interface, address, actions);
                true
            }
        }
    }

    /// Remove a neighbor, and update all entries which depend on it.
    pub(crate) fn neighbor_loss(
        &mut self,
        interface: InterfaceId,
        address: Ipv4Addr,
        actions: &mut ActionQueue,
    ) {
        if let Some(i) = self.node.interfaces.get_mut(&interface) {
            i.neighbors.remove(address);
        }
        actions.push_back(Action::CancelTimer(TimerKey::NeighborLiveness(interface, address)));
        let last = self.node.neighbor_count(interface) == 0;

        let mut reresolve = Vec::new();
        let mut lost_winner = Vec::new();
        for sg in self.cache.pairs() {
            let entry = match self.cache.get_mut(&sg) {
                Some(e) => e,
                None => continue,
            };
            if entry.upstream_interface == Some(interface) && entry.upstream.neighbor() == Some(address) {
                reresolve.push(sg);
                continue;
            }
            if last
                && entry.downstream.contains(interface)
                && !self.node.membership.has_local_receiver(sg.group, interface)
            {
                self.node.remove_downstream(entry, interface, actions);
                self.node.prune_upstream_if_needed(entry, actions);
            } else if let Some(ds) = entry.downstream.get(interface) {
                if ds.assert.is_losing() && ds.assert.winner.address == address {
                    lost_winner.push(sg);
                }
            }
        }

        for sg in lost_winner {
            self.reset_downstream_assert(sg, interface, actions);
        }
        for sg in reresolve {
            self.reresolve_upstream(sg, actions);
        }
    }

    /// Resolve the RPF route of an entry again. An unreachable source deletes the entry, and a
    /// state-only entry whose source became reachable gets its downstream interfaces. If the
    /// upstream changed, the entry either prunes towards the new upstream or grafts onto it.
    /// Returns true if anything changed.
    pub(crate) fn reresolve_upstream(&mut self, sg: SgPair, actions: &mut ActionQueue) -> bool {
        let route = match self.node.rib.resolve(sg.source) {
            Some(route) => route,
            None => {
                if self.cache.get(&sg).map(|e| e.upstream.is_reachable()).unwrap_or(false) {
                    debug!("{}: {} became unreachable", self.name(), sg.source);
                    self.delete_entry(sg, actions);
                    return true;
                }
                return false;
            }
        };
        let entry = match self.cache.get_mut(&sg) {
            Some(e) => e,
            None => return false,
        };
        if entry.upstream == Upstream::Me
            || (entry.upstream_interface == Some(route.interface) && entry.upstream == route.upstream)
        {
            return false;
        }
        if entry.upstream == Upstream::Unreachable {
            return self.resolve_state_only(sg, route, actions);
        }
        info!(
            "{}: upstream of {} moves from {} to {} on {}",
            self.node.name, sg, entry.upstream, route.upstream, route.interface
        );

        let old_interface = entry.upstream_interface;
        if old_interface != Some(route.interface) {
            self.node.remove_downstream(entry, route.interface, actions);
            if let Some(old) = old_interface {
                if self.node.is_candidate_downstream(sg.group, old) {
                    self.node.add_downstream(entry, old);
                } else if self.node.config.assert_optimization
                    && self.node.assert_sources.remove_group(sg.source, old, sg.group)
                {
                    actions.push_back(Action::CancelTimer(TimerKey::SourceAssert(sg.source, old)));
                }
            }
        }
        entry.upstream_interface = Some(route.interface);
        entry.upstream = route.upstream;
        entry.upstream_assert.reset();
        actions.push_back(Action::CancelTimer(TimerKey::UpstreamAssert(sg)));
        if self.node.config.assert_optimization {
            let item = self.node.assert_sources.add(sg.source, route.interface, sg.group, Some(route.upstream));
            item.upstream.reset();
        }

        // refresh our own metric on every interface without a running assert
        for ds in entry.downstream.iter_mut().filter(|d| !d.assert.is_losing()) {
            if ds.assert.deadline.is_none() {
                ds.assert.winner.preference = route.preference;
                ds.assert.winner.metric = route.metric;
                ds.assert.winner.address = ds.address;
            }
        }

        self.node.clear_pending(entry, actions);
        if entry.downstream.all_pruned() && self.node.no_local_interest(sg.group) {
            self.node.enter_prune(entry, actions);
        } else {
            self.node.start_graft(entry, actions);
        }
        true
    }

    /// A route appeared for the source of a state-only entry. The entry gets its RPF interface,
    /// and every other interface with neighbors or receivers becomes downstream, as if the entry
    /// was built from the first packet.
    fn resolve_state_only(&mut self, sg: SgPair, route: RpfRoute, actions: &mut ActionQueue) -> bool {
        let candidates: Vec<InterfaceId> = self
            .node
            .interfaces
            .keys()
            .copied()
            .filter(|i| *i != route.interface)
            .filter(|i| self.node.is_candidate_downstream(sg.group, *i))
            .collect();
        let entry = match self.cache.get_mut(&sg) {
            Some(e) => e,
            None => return false,
        };
        info!(
            "{}: source of {} is reachable via {} on {}",
            self.node.name, sg, route.upstream, route.interface
        );

        entry.upstream_interface = Some(route.interface);
        entry.upstream = route.upstream;
        for interface in candidates {
            self.node.add_downstream(entry, interface);
        }
        if self.node.config.assert_optimization {
            self.node.assert_sources.add(sg.source, route.interface, sg.group, Some(route.upstream));
        }
        self.node.arm_data_timer(entry, actions);

        if entry.downstream.is_empty() && self.node.no_local_interest(sg.group) {
            self.node.enter_prune(entry, actions);
        }
        true
    }

    // -----------------------------------------------------------------------------------------
    // Membership and unicast routing
    // -----------------------------------------------------------------------------------------

    fn handle_membership(
        &mut self,
        group: Group,
        interface: Option<InterfaceId>,
        change: MembershipChange,
        actions: &mut ActionQueue,
    ) -> Result<bool, PimError> {
        if let Some(i) = interface {
            if !self.node.interfaces.contains_key(&i) {
                return Err(PimError::UnknownInterface(i));
            }
        }
        let pairs = self.cache.pairs_of_group(group);
        match (interface, change) {
            (Some(interface), MembershipChange::Join) => {
                if !self.node.membership.add_receiver(group, interface) {
                    return Ok(false);
                }
                info!("{}: local receiver of {} on {}", self.name(), group, interface);
                let subnet = self.node.interfaces.get(&interface).map(|i| {
                    Prefix::new(i.config.address, i.config.prefix_len)
                });
                for sg in pairs {
                    if subnet.map(|p| p.contains(sg.source)).unwrap_or(false) {
                        continue;
                    }
                    let entry = match self.cache.get_mut(&sg) {
                        Some(e) if e.upstream_interface != Some(interface) && e.upstream.is_reachable() => e,
                        _ => continue,
                    };
                    if entry.downstream.contains(interface) {
                        self.node.unprune_downstream(entry, interface, actions);
                    } else {
                        self.node.add_downstream(entry, interface);
                    }
                    self.node.graft_if_pruned(entry, actions);
                    self.node.arm_data_timer(entry, actions);
                }
            }
            (None, MembershipChange::Join) => {
                if !self.node.membership.join_node(group) {
                    return Ok(false);
                }
                info!("{}: joins {}", self.name(), group);
                for sg in pairs {
                    if let Some(entry) = self.cache.get_mut(&sg) {
                        self.node.graft_if_pruned(entry, actions);
                    }
                }
            }
            (Some(interface), MembershipChange::Leave) => {
                if !self.node.membership.remove_receiver(group, interface) {
                    return Ok(false);
                }
                info!("{}: last receiver of {} on {} left", self.name(), group, interface);
                let keep = self.node.neighbor_count(interface) > 0;
                for sg in pairs {
                    let entry = match self.cache.get_mut(&sg) {
                        Some(e) => e,
                        None => continue,
                    };
                    if !keep {
                        self.node.remove_downstream(entry, interface, actions);
                    }
                    self.node.prune_upstream_if_needed(entry, actions);
                }
            }
            (None, MembershipChange::Leave) => {
                if !self.node.membership.leave_node(group) {
                    return Ok(false);
                }
                info!("{}: leaves {}", self.name(), group);
                for sg in pairs {
                    if let Some(entry) = self.cache.get_mut(&sg) {
                        self.node.prune_upstream_if_needed(entry, actions);
                    }
                }
            }
        }
        Ok(true)
    }

    /// The unicast route towards `prefix` changed. Returns true if any entry changed.
    fn handle_route_change(&mut self, prefix: Prefix, actions: &mut ActionQueue) -> bool {
        let pairs: Vec<SgPair> =
            self.cache.pairs().into_iter().filter(|sg| prefix.contains(sg.source)).collect();
        let mut changed = false;
        for sg in pairs {
            changed |= self.reresolve_upstream(sg, actions);
        }
        changed
    }
}
