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

//! Module containing all type definitions

use crate::netsim::packet::PacketError;
use petgraph::prelude::*;
use petgraph::stable_graph::StableGraph;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

type IndexType = u32;
/// Router Identification (and index into the topology graph)
pub type RouterId = NodeIndex<IndexType>;
/// LAN segment Identification (and index into the topology graph)
pub type SegmentId = NodeIndex<IndexType>;
/// Link Weight for the topology graph
pub type LinkWeight = f32;
/// Topology graph. Routers and LAN segments are both nodes of the graph. An edge from a router to a
/// segment carries the interface cost, an edge from a segment to a router carries zero cost.
pub type Topology = StableGraph<(), LinkWeight, Directed, IndexType>;
/// Simulated time, measured from the start of the simulation.
pub type Time = Duration;

/// Address of a multicast source
pub type Source = Ipv4Addr;
/// Address of a multicast group
pub type Group = Ipv4Addr;

/// All-PIM-Routers link-local multicast address (224.0.0.13).
pub const ALL_PIM_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 13);

/// Interface of a router, local to that router.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Identification of a multicast distribution tree, the `(S, G)` pair.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct SgPair {
    /// Source address
    pub source: Source,
    /// Group address
    pub group: Group,
}

impl SgPair {
    /// Create a new `(S, G)` pair
    pub fn new(source: Source, group: Group) -> Self {
        Self { source, group }
    }
}

impl fmt::Display for SgPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.source, self.group)
    }
}

/// IPv4 prefix, used by the unicast RIB. The address is always stored with the host bits cleared.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct Prefix {
    addr: Ipv4Addr,
    len: u8,
}

impl Prefix {
    /// Create a new prefix. The length is capped at 32, and host bits are cleared.
    pub fn new(addr: Ipv4Addr, len: u8) -> Self {
        let len = len.min(32);
        Self { addr: Ipv4Addr::from(u32::from(addr) & Self::mask(len)), len }
    }

    /// Prefix containing exactly one host
    pub fn host(addr: Ipv4Addr) -> Self {
        Self::new(addr, 32)
    }

    /// Network address of the prefix
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Length of the prefix
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u8 {
        self.len
    }

    /// Returns true if the prefix is the default route `0.0.0.0/0`.
    pub fn is_default(&self) -> bool {
        self.len == 0
    }

    /// Returns true if `addr` lies inside the prefix.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask(self.len) == u32::from(self.addr)
    }

    fn mask(len: u8) -> u32 {
        if len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(len))
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

/// Upstream (RPF) neighbor of a forwarding cache entry.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Upstream {
    /// The traffic is originated by this router itself (inbound on the CPU pseudo-interface).
    Me,
    /// The source is directly connected to the RPF interface.
    Connected,
    /// The RPF neighbor is a PIM router with the given address.
    Neighbor(Ipv4Addr),
    /// There is no unicast route back to the source. The entry only holds state.
    Unreachable,
}

impl Upstream {
    /// Address of the upstream neighbor, if it is a PIM router.
    pub fn neighbor(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Neighbor(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Returns true if the source is either this router or directly connected to it. Prunes are
    /// never sent towards such a source.
    pub fn is_local_source(&self) -> bool {
        matches!(self, Self::Me | Self::Connected)
    }

    /// Returns true if the upstream is reachable
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Self::Unreachable)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Me => write!(f, "ME"),
            Self::Connected => write!(f, "connected"),
            Self::Neighbor(addr) => write!(f, "{}", addr),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Router Errors. All of them indicate a logic bug or a wrong use of the router, never an
/// environmental condition.
#[derive(Error, Debug, PartialEq)]
pub enum PimError {
    /// A forwarding cache entry for the pair already exists
    #[error("Forwarding cache entry for {0} does already exist")]
    DuplicateEntry(SgPair),
    /// A forwarding cache entry was assumed to exist, but it does not
    #[error("Forwarding cache entry for {0} does not exist")]
    MissingEntry(SgPair),
    /// The interface is not configured on the router
    #[error("Interface {0:?} is not configured")]
    UnknownInterface(InterfaceId),
    /// The interface is already configured on the router
    #[error("Interface {0:?} is already configured")]
    InterfaceAlreadyExists(InterfaceId),
}

/// Network Errors
#[derive(Error, Debug, PartialEq)]
pub enum NetworkError {
    /// Router Error which cannot be handled
    #[error("Router Error: {0}")]
    PimError(#[from] PimError),
    /// A control packet could not be decoded
    #[error("Packet Error: {0}")]
    PacketError(#[from] PacketError),
    /// Router is not present in the topology
    #[error("Router was not found in topology: {0:?}")]
    DeviceNotFound(RouterId),
    /// Router name is not present in the topology
    #[error("Router name was not found in topology: {0}")]
    DeviceNameNotFound(String),
    /// Segment is not present in the topology
    #[error("LAN segment was not found in topology: {0:?}")]
    SegmentNotFound(SegmentId),
    /// Interface is not present on the router
    #[error("Interface {1:?} was not found on router {0:?}")]
    InterfaceNotFound(RouterId, InterfaceId),
    /// Address is already used by another interface or host
    #[error("Address {0} is already in use")]
    AddressInUse(Ipv4Addr),
    /// No host or router owns this address
    #[error("Address {0} is not attached to the network")]
    UnknownAddress(Ipv4Addr),
    /// All routers in the network must agree on the assert optimization setting
    #[error("Router {0:?} disagrees with the network on assert optimization")]
    MixedAssertOptimization(RouterId),
    /// Too many events have been processed without the queue draining
    #[error("Network did not settle within {0} events")]
    NoConvergence(usize),
}
