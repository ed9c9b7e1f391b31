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

//! # Top-level Network module
//!
//! This module represents the network topology and simulates the network. The topology consists
//! of routers and LAN segments. Every router interface is attached to exactly one segment, and
//! hosts (sources and receivers) live on segments as well. The unicast routing of every router is
//! derived from the topology with a shortest path computation, weighted by the interface costs.
//!
//! Events are handled in the order of their (simulated) time. Packets sent onto a segment arrive
//! after `link_delay` at every other router of the segment, in the order they were sent.

use crate::netsim::config::{InterfaceConfig, PimDmConfig};
use crate::netsim::event::{Action, ActionQueue, DataPacket, Event, EventQueue, MembershipChange};
use crate::netsim::printer;
use crate::netsim::rib::{Route, UnicastRib};
use crate::netsim::router::PimDmRouter;
use crate::netsim::{
    Group, InterfaceId, LinkWeight, NetworkError, Prefix, RouterId, SegmentId, Time, Topology,
    ALL_PIM_ROUTERS,
};

use log::*;
use petgraph::algo::bellman_ford;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::time::Duration;

static DEFAULT_STOP_AFTER: usize = 100_000;
static DEFAULT_ROUTE_PREFERENCE: u32 = 110;

/// LAN segment, connecting router interfaces and hosts
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Name of the segment
    pub name: String,
    /// Subnet of the segment
    pub prefix: Prefix,
    /// Attached routers with their interface and address
    pub routers: BTreeMap<RouterId, (InterfaceId, Ipv4Addr)>,
    /// Attached hosts with the groups they joined
    pub hosts: BTreeMap<Ipv4Addr, BTreeSet<Group>>,
}

impl Segment {
    fn has_receiver(&self, group: Group) -> bool {
        self.hosts.values().any(|groups| groups.contains(&group))
    }
}

/// Owner of an address in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attachment {
    Router(RouterId, InterfaceId, SegmentId),
    Host(SegmentId),
}

/// Data packet received by a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Receiving host
    pub host: Ipv4Addr,
    /// The packet
    pub packet: DataPacket,
    /// Time of reception
    pub time: Time,
}

/// # Network struct
/// The struct contains all information about the underlying physical network (segments and
/// interfaces), manages all routers, and handles all events between them.
#[derive(Debug)]
pub struct Network {
    routers: HashMap<RouterId, PimDmRouter>,
    segments: HashMap<SegmentId, Segment>,
    addresses: HashMap<Ipv4Addr, Attachment>,
    net: Topology,
    queue: EventQueue,
    now: Time,
    link_delay: Duration,
    route_preference: u32,
    stop_after: Option<usize>,
    num_events: usize,
    next_seq: u64,
    deliveries: Vec<Delivery>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Generate an empty Network
    pub fn new() -> Self {
        Self {
            routers: HashMap::new(),
            segments: HashMap::new(),
            addresses: HashMap::new(),
            net: Topology::new(),
            queue: EventQueue::new(),
            now: Duration::default(),
            link_delay: Duration::from_millis(1),
            route_preference: DEFAULT_ROUTE_PREFERENCE,
            stop_after: Some(DEFAULT_STOP_AFTER),
            num_events: 0,
            next_seq: 0,
            deliveries: Vec::new(),
        }
    }

    /// Add a new router to the topology with the default configuration. Returns the ID of the
    /// router, which can be used to reference it while configuring the network.
    pub fn add_router<S: Into<String>>(&mut self, name: S) -> RouterId {
        self.add_router_with_config(name, PimDmConfig::default())
    }

    /// Add a new router to the topology with a specific configuration.
    pub fn add_router_with_config<S: Into<String>>(&mut self, name: S, config: PimDmConfig) -> RouterId {
        let router_id = self.net.add_node(());
        let router = PimDmRouter::new(name.into(), router_id, config);
        self.routers.insert(router_id, router);
        router_id
    }

    /// Add a new LAN segment with the given subnet.
    pub fn add_segment<S: Into<String>>(&mut self, name: S, prefix: Prefix) -> SegmentId {
        let segment_id = self.net.add_node(());
        self.segments.insert(
            segment_id,
            Segment { name: name.into(), prefix, routers: BTreeMap::new(), hosts: BTreeMap::new() },
        );
        segment_id
    }

    /// Attach a new interface of `router` with `address` to `segment`. The interface has cost 1.
    /// Returns the new interface.
    pub fn connect(
        &mut self,
        router: RouterId,
        segment: SegmentId,
        address: Ipv4Addr,
    ) -> Result<InterfaceId, NetworkError> {
        if self.addresses.contains_key(&address) {
            return Err(NetworkError::AddressInUse(address));
        }
        let seg = self.segments.get_mut(&segment).ok_or(NetworkError::SegmentNotFound(segment))?;
        let r = self.routers.get_mut(&router).ok_or(NetworkError::DeviceNotFound(router))?;
        let interface = InterfaceId(r.interfaces().count() as u32);
        let config = InterfaceConfig::new(address, seg.prefix.len());
        r.add_interface(interface, config)?;
        seg.routers.insert(router, (interface, address));
        self.addresses.insert(address, Attachment::Router(router, interface, segment));
        self.net.add_edge(router, segment, 1.0);
        self.net.add_edge(segment, router, 0.0);
        Ok(interface)
    }

    /// Attach a host to a segment. Hosts can send data and join groups.
    pub fn add_host(&mut self, segment: SegmentId, address: Ipv4Addr) -> Result<(), NetworkError> {
        if self.addresses.contains_key(&address) {
            return Err(NetworkError::AddressInUse(address));
        }
        let seg = self.segments.get_mut(&segment).ok_or(NetworkError::SegmentNotFound(segment))?;
        seg.hosts.insert(address, BTreeSet::new());
        self.addresses.insert(address, Attachment::Host(segment));
        Ok(())
    }

    /// Change the configuration of an interface. Only the cost and the join/prune suppression
    /// are taken over, and the unicast routing is recomputed.
    pub fn set_interface_config(
        &mut self,
        router: RouterId,
        interface: InterfaceId,
        cost: u32,
        join_prune_suppression: bool,
    ) -> Result<(), NetworkError> {
        let segment = self.segment_of(router, interface)?;
        let r = self.routers.get_mut(&router).ok_or(NetworkError::DeviceNotFound(router))?;
        let iface = r
            .node
            .interfaces
            .get_mut(&interface)
            .ok_or(NetworkError::InterfaceNotFound(router, interface))?;
        iface.config.cost = cost;
        iface.config.join_prune_suppression = join_prune_suppression;
        if let Some(edge) = self.net.find_edge(router, segment) {
            self.net[edge] = cost as LinkWeight;
        }
        self.write_ribs();
        Ok(())
    }

    /// Detach an interface from its segment. Neighbors on the segment will time out.
    pub fn disconnect(&mut self, router: RouterId, interface: InterfaceId) -> Result<(), NetworkError> {
        let segment = self.segment_of(router, interface)?;
        if let Some(seg) = self.segments.get_mut(&segment) {
            seg.routers.remove(&router);
        }
        while let Some(edge) = self.net.find_edge(router, segment) {
            self.net.remove_edge(edge);
        }
        while let Some(edge) = self.net.find_edge(segment, router) {
            self.net.remove_edge(edge);
        }
        info!("{} disconnected {}", self.get_router_name(router)?, interface);
        self.write_ribs();
        Ok(())
    }

    /// Set the maximum number of events handled in a single run. `None` removes the limit.
    pub fn set_msg_limit(&mut self, stop_after: Option<usize>) {
        self.stop_after = stop_after;
    }

    /// Set the delay of every segment
    pub fn set_link_delay(&mut self, delay: Duration) {
        self.link_delay = delay;
    }

    /// Compute the unicast routing, and start all routers. All routers must agree on assert
    /// optimization.
    pub fn start(&mut self) -> Result<(), NetworkError> {
        let mut ids = self.get_routers();
        ids.sort();
        if let Some(first) = ids.first() {
            let opt = self.routers[first].config().assert_optimization;
            if let Some(r) = ids.iter().find(|r| self.routers[*r].config().assert_optimization != opt) {
                return Err(NetworkError::MixedAssertOptimization(*r));
            }
        }
        self.write_ribs();
        for router in ids {
            self.queue.push(self.now, Event::Start(router));
        }
        Ok(())
    }

    /// Let the simulation run for the given duration.
    pub fn run_for(&mut self, duration: Duration) -> Result<(), NetworkError> {
        let until = self.now + duration;
        let mut remaining_iter = self.stop_after;
        while let Some(t) = self.queue.peek_time() {
            if t > until {
                break;
            }
            if let Some(rem) = remaining_iter {
                if rem == 0 {
                    debug!("Network did not settle!");
                    return Err(NetworkError::NoConvergence(self.stop_after.unwrap_or_default()));
                }
                remaining_iter = Some(rem - 1);
            }
            self.do_queue_step()?;
        }
        self.now = until;
        Ok(())
    }

    /// Send a data packet from `source`. The source can either be a host or a router address.
    pub fn send_data(&mut self, source: Ipv4Addr, group: Group) -> Result<(), NetworkError> {
        let packet = DataPacket { source, group, seq: self.next_seq };
        self.next_seq += 1;
        match self.addresses.get(&source) {
            Some(Attachment::Router(router, _, _)) => {
                let event = Event::Data { router: *router, interface: None, prev_hop: None, packet };
                self.queue.push(self.now, event);
            }
            Some(Attachment::Host(segment)) => {
                let segment = *segment;
                let time = self.now + self.link_delay;
                let seg = &self.segments[&segment];
                for (router, (interface, _)) in seg.routers.iter() {
                    let event = Event::Data {
                        router: *router,
                        interface: Some(*interface),
                        prev_hop: None,
                        packet,
                    };
                    self.queue.push(time, event);
                }
                self.deliver_to_hosts(segment, Some(source), packet, time);
            }
            None => return Err(NetworkError::UnknownAddress(source)),
        }
        Ok(())
    }

    /// A host joins a group. Every router on the segment of the host learns about it.
    pub fn join(&mut self, host: Ipv4Addr, group: Group) -> Result<(), NetworkError> {
        self.host_membership(host, group, MembershipChange::Join)
    }

    /// A host leaves a group. Routers are informed once the last receiver of the segment left.
    pub fn leave(&mut self, host: Ipv4Addr, group: Group) -> Result<(), NetworkError> {
        self.host_membership(host, group, MembershipChange::Leave)
    }

    /// The router itself joins or leaves a group.
    pub fn router_membership(
        &mut self,
        router: RouterId,
        group: Group,
        change: MembershipChange,
    ) -> Result<(), NetworkError> {
        if !self.routers.contains_key(&router) {
            return Err(NetworkError::DeviceNotFound(router));
        }
        self.queue.push(self.now, Event::Membership { router, group, interface: None, change });
        Ok(())
    }

    /// Returns the current time of the simulation
    pub fn now(&self) -> Time {
        self.now
    }

    /// Returns a reference to a router
    pub fn get_router(&self, router: RouterId) -> Result<&PimDmRouter, NetworkError> {
        self.routers.get(&router).ok_or(NetworkError::DeviceNotFound(router))
    }

    /// Returns a vector of all router IDs
    pub fn get_routers(&self) -> Vec<RouterId> {
        self.routers.keys().cloned().collect()
    }

    /// Returns a segment
    pub fn get_segment(&self, segment: SegmentId) -> Result<&Segment, NetworkError> {
        self.segments.get(&segment).ok_or(NetworkError::SegmentNotFound(segment))
    }

    /// Get the RouterID with the given name. If multiple routers have the same name, then the
    /// first occurence of this name is returned. If the name was not found, an error is returned.
    pub fn get_router_id(&self, name: impl AsRef<str>) -> Result<RouterId, NetworkError> {
        let mut ids = self.get_routers();
        ids.sort();
        ids.into_iter()
            .find(|r| self.routers[r].name() == name.as_ref())
            .ok_or_else(|| NetworkError::DeviceNameNotFound(name.as_ref().to_string()))
    }

    /// Return the name of the router
    pub fn get_router_name(&self, router: RouterId) -> Result<&str, NetworkError> {
        self.get_router(router).map(|r| r.name())
    }

    /// Returns the topology graph
    pub fn get_topology(&self) -> &Topology {
        &self.net
    }

    /// Returns the interface of `router` attached to `segment`
    pub fn get_interface(&self, router: RouterId, segment: SegmentId) -> Result<InterfaceId, NetworkError> {
        self.get_segment(segment)?
            .routers
            .get(&router)
            .map(|(i, _)| *i)
            .ok_or(NetworkError::DeviceNotFound(router))
    }

    /// Returns every data packet received by any host, in order.
    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    /// Returns the number of packets of `group` received by `host`.
    pub fn num_received(&self, host: Ipv4Addr, group: Group) -> usize {
        self.deliveries.iter().filter(|d| d.host == host && d.packet.group == group).count()
    }

    /// Returns the number of events handled so far
    pub fn num_events(&self) -> usize {
        self.num_events
    }

    /// Print the forwarding cache of a router
    pub fn print_cache(&self, router: RouterId) -> Result<(), NetworkError> {
        println!("{}", printer::forwarding_cache(self, router)?);
        Ok(())
    }

    // -----------------------------------------------------------------------------------------
    // private
    // -----------------------------------------------------------------------------------------

    fn segment_of(&self, router: RouterId, interface: InterfaceId) -> Result<SegmentId, NetworkError> {
        self.segments
            .iter()
            .find(|(_, s)| s.routers.get(&router).map(|(i, _)| *i == interface).unwrap_or(false))
            .map(|(id, _)| *id)
            .or_else(|| {
                // the interface may have been disconnected already
                self.addresses.values().find_map(|a| match a {
                    Attachment::Router(r, i, s) if *r == router && *i == interface => Some(*s),
                    _ => None,
                })
            })
            .ok_or(NetworkError::InterfaceNotFound(router, interface))
    }

    fn host_membership(
        &mut self,
        host: Ipv4Addr,
        group: Group,
        change: MembershipChange,
    ) -> Result<(), NetworkError> {
        let segment = match self.addresses.get(&host) {
            Some(Attachment::Host(s)) => *s,
            _ => return Err(NetworkError::UnknownAddress(host)),
        };
        let seg = self.segments.get_mut(&segment).ok_or(NetworkError::SegmentNotFound(segment))?;
        let had_receiver = seg.has_receiver(group);
        if let Some(groups) = seg.hosts.get_mut(&host) {
            match change {
                MembershipChange::Join => groups.insert(group),
                MembershipChange::Leave => groups.remove(&group),
            };
        }
        if had_receiver == seg.has_receiver(group) {
            return Ok(());
        }
        for (router, (interface, _)) in seg.routers.iter() {
            let event = Event::Membership { router: *router, group, interface: Some(*interface), change };
            self.queue.push(self.now, event);
        }
        Ok(())
    }

    /// Write the unicast RIB of every router, based on the shortest paths through the topology.
    /// Every router whose RIB changed is notified with a route change covering all sources.
    fn write_ribs(&mut self) {
        let mut ids = self.get_routers();
        ids.sort();
        for router in ids {
            let rib = self.compute_rib(router);
            let changed = match self.routers.get_mut(&router) {
                Some(r) => r.write_rib(rib),
                None => false,
            };
            if changed {
                self.queue.push(self.now, Event::RouteChange(router, Prefix::new(Ipv4Addr::UNSPECIFIED, 0)));
            }
        }
    }

    fn compute_rib(&self, router: RouterId) -> UnicastRib {
        let mut rib = UnicastRib::new();
        let (weights, predecessors) = match bellman_ford(&self.net, router) {
            Ok(x) => x,
            Err(_) => {
                warn!("Negative cycle in the topology!");
                return rib;
            }
        };
        for (segment_id, segment) in self.segments.iter() {
            let cost = weights[segment_id.index()];
            if cost.is_infinite() {
                continue;
            }
            // walk back to find the first segment and the first router on the path
            let mut path = vec![*segment_id];
            let mut current = *segment_id;
            while let Some(pred) = predecessors[current.index()] {
                path.push(pred);
                if pred == router {
                    break;
                }
                current = pred;
            }
            if path.last() != Some(&router) || path.len() < 2 {
                continue;
            }
            path.reverse();
            let first_segment = match self.segments.get(&path[1]) {
                Some(s) => s,
                None => continue,
            };
            let interface = match first_segment.routers.get(&router) {
                Some((i, _)) => *i,
                None => continue,
            };
            let next_hop = path.get(2).and_then(|r| first_segment.routers.get(r)).map(|(_, a)| *a);
            rib.insert(
                segment.prefix,
                Route {
                    interface,
                    next_hop,
                    preference: self.route_preference,
                    metric: cost as u32,
                },
            );
        }
        rib
    }

    /// Executes one single step. If the result is Ok(true), then a step is successfully executed.
    /// If the result is Ok(false), then there was no event present in the queue.
    fn do_queue_step(&mut self) -> Result<bool, NetworkError> {
        let (time, event) = match self.queue.pop() {
            Some(x) => x,
            None => return Ok(false),
        };
        self.now = time;
        self.log_event(&event)?;
        let router = event.router();
        let mut actions = ActionQueue::new();
        self.routers
            .get_mut(&router)
            .ok_or(NetworkError::DeviceNotFound(router))?
            .handle_event(event, time, &mut actions)?;
        self.num_events += 1;
        self.apply_actions(router, actions)?;
        Ok(true)
    }

    /// Carry out all actions emitted by a router
    fn apply_actions(&mut self, router: RouterId, actions: ActionQueue) -> Result<(), NetworkError> {
        let arrival = self.now + self.link_delay;
        for action in actions {
            trace!("{}: {}", self.get_router_name(router)?, printer::action(&action));
            match action {
                Action::SetTimer { key, delay } => {
                    self.queue.push(self.now + delay, Event::Timer(router, key))
                }
                Action::CancelTimer(key) => {
                    self.queue.cancel(router, key);
                }
                Action::SendControl { interface, destination, message } => {
                    let segment = match self.segment_of(router, interface) {
                        Ok(s) => s,
                        Err(_) => continue,
                    };
                    let seg = &self.segments[&segment];
                    let src = match seg.routers.get(&router) {
                        Some((_, a)) => *a,
                        None => continue,
                    };
                    for (other, (other_if, other_addr)) in seg.routers.iter() {
                        if *other == router {
                            continue;
                        }
                        if destination != ALL_PIM_ROUTERS && destination != *other_addr {
                            continue;
                        }
                        let event = Event::control(*other, *other_if, src, destination, &message)?;
                        self.queue.push(arrival, event);
                    }
                }
                Action::ForwardData { interface, packet } => {
                    let segment = match self.segment_of(router, interface) {
                        Ok(s) => s,
                        Err(_) => continue,
                    };
                    let seg = &self.segments[&segment];
                    let src = match seg.routers.get(&router) {
                        Some((_, a)) => *a,
                        None => continue,
                    };
                    for (other, (other_if, _)) in seg.routers.iter() {
                        if *other == router {
                            continue;
                        }
                        let event = Event::Data {
                            router: *other,
                            interface: Some(*other_if),
                            prev_hop: Some(src),
                            packet,
                        };
                        self.queue.push(arrival, event);
                    }
                    self.deliver_to_hosts(segment, None, packet, arrival);
                }
            }
        }
        Ok(())
    }

    fn deliver_to_hosts(&mut self, segment: SegmentId, except: Option<Ipv4Addr>, packet: DataPacket, time: Time) {
        let seg = &self.segments[&segment];
        for (host, groups) in seg.hosts.iter() {
            if Some(*host) != except && groups.contains(&packet.group) {
                trace!("host {} on {} receives {}", host, seg.name, packet.sg());
                self.deliveries.push(Delivery { host: *host, packet, time });
            }
        }
    }

    fn log_event(&self, event: &Event) -> Result<(), NetworkError> {
        match event {
            Event::Data { router, interface, packet, .. } => trace!(
                "{}: data {} #{} on {:?}",
                self.get_router_name(*router)?,
                packet.sg(),
                packet.seq,
                interface
            ),
            Event::Control { router, interface, src, .. } => trace!(
                "{}: control packet from {} on {}",
                self.get_router_name(*router)?,
                src,
                interface
            ),
            Event::Timer(router, key) => trace!("{}: timer {}", self.get_router_name(*router)?, key),
            Event::Membership { router, group, interface, change } => trace!(
                "{}: {:?} {} on {:?}",
                self.get_router_name(*router)?,
                change,
                group,
                interface
            ),
            Event::RouteChange(router, prefix) => {
                trace!("{}: route change for {}", self.get_router_name(*router)?, prefix)
            }
            Event::Start(router) => debug!("{}: start", self.get_router_name(*router)?),
        }
        Ok(())
    }
}
