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

//! Module for defining events, the actions a router emits while handling them, and the time
//! ordered queue of the simulator.

use crate::netsim::packet::{PacketError, PimMessage};
use crate::netsim::{Group, InterfaceId, Prefix, RouterId, SgPair, Source, Time};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Multicast data packet. The sequence number only helps following a packet through the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataPacket {
    /// Source address
    pub source: Source,
    /// Destination group
    pub group: Group,
    /// Sequence number
    pub seq: u64,
}

impl DataPacket {
    /// `(S, G)` pair of the packet
    pub fn sg(&self) -> SgPair {
        SgPair::new(self.source, self.group)
    }
}

/// Change of the local group membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipChange {
    /// A receiver joined the group
    Join,
    /// A receiver left the group
    Leave,
}

/// Event to handle
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Multicast data arrives at a router. An `interface` of `None` is the CPU pseudo-interface,
    /// used for traffic originated by the router itself.
    Data {
        /// Receiving router
        router: RouterId,
        /// Inbound interface
        interface: Option<InterfaceId>,
        /// Router which forwarded the packet, `None` if it came from a host or the router itself.
        prev_hop: Option<Ipv4Addr>,
        /// The packet
        packet: DataPacket,
    },
    /// PIM control packet arrives at a router, still in its encoded form.
    Control {
        /// Receiving router
        router: RouterId,
        /// Inbound interface
        interface: InterfaceId,
        /// Sender address
        src: Ipv4Addr,
        /// Destination address (ALL-PIM-ROUTERS or the unicast address of the receiver)
        dst: Ipv4Addr,
        /// Encoded PIM message
        payload: Vec<u8>,
    },
    /// A timer of the router fires
    Timer(RouterId, TimerKey),
    /// Local group membership changes. An `interface` of `None` means the router itself.
    Membership {
        /// Router
        router: RouterId,
        /// Group which is joined or left
        group: Group,
        /// Interface with the receiver
        interface: Option<InterfaceId>,
        /// Join or leave
        change: MembershipChange,
    },
    /// The unicast route towards a prefix changed
    RouteChange(RouterId, Prefix),
    /// The router starts, and sends its first Hello messages
    Start(RouterId),
}

impl Event {
    /// Encode a control message into an event
    pub fn control(
        router: RouterId,
        interface: InterfaceId,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        message: &PimMessage,
    ) -> Result<Self, PacketError> {
        Ok(Self::Control { router, interface, src, dst, payload: message.encode()? })
    }

    /// Router which handles the event
    pub fn router(&self) -> RouterId {
        match self {
            Self::Data { router, .. } => *router,
            Self::Control { router, .. } => *router,
            Self::Timer(router, _) => *router,
            Self::Membership { router, .. } => *router,
            Self::RouteChange(router, _) => *router,
            Self::Start(router) => *router,
        }
    }

    /// Returns true if the event is a control packet
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Control { .. })
    }
}

/// Identification of a timer. Arming a timer with a key that is already armed replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    /// Periodic Hello on an interface
    Hello(InterfaceId),
    /// Triggered Hello on an interface
    TriggeredHello(InterfaceId),
    /// Liveness of a neighbor
    NeighborLiveness(InterfaceId, Ipv4Addr),
    /// Data timeout of an entry
    Data(SgPair),
    /// Graft retransmission of an entry
    GraftRetransmit(SgPair),
    /// Delayed Join overriding a Prune overheard on the upstream LAN
    DelayedJoin(SgPair),
    /// Assert timer of the upstream interface of an entry
    UpstreamAssert(SgPair),
    /// Assert timer of a downstream interface of an entry
    Assert(SgPair, InterfaceId),
    /// Assert timer of a `(source, interface)` item, with assert optimization
    SourceAssert(Source, InterfaceId),
    /// Prune timer of a downstream interface
    Prune(SgPair, InterfaceId),
    /// Delayed prune of a downstream interface on a shared LAN
    DelayedPrune(SgPair, InterfaceId),
}

impl TimerKey {
    /// `(S, G)` pair the timer belongs to, if any
    pub fn sg(&self) -> Option<SgPair> {
        match self {
            Self::Data(sg)
            | Self::GraftRetransmit(sg)
            | Self::DelayedJoin(sg)
            | Self::UpstreamAssert(sg)
            | Self::Assert(sg, _)
            | Self::Prune(sg, _)
            | Self::DelayedPrune(sg, _) => Some(*sg),
            _ => None,
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hello(i) => write!(f, "Hello[{}]", i),
            Self::TriggeredHello(i) => write!(f, "TriggeredHello[{}]", i),
            Self::NeighborLiveness(i, n) => write!(f, "NeighborLiveness[{}, {}]", i, n),
            Self::Data(sg) => write!(f, "Data{}", sg),
            Self::GraftRetransmit(sg) => write!(f, "GraftRetransmit{}", sg),
            Self::DelayedJoin(sg) => write!(f, "DelayedJoin{}", sg),
            Self::UpstreamAssert(sg) => write!(f, "UpstreamAssert{}", sg),
            Self::Assert(sg, i) => write!(f, "Assert{}[{}]", sg, i),
            Self::SourceAssert(s, i) => write!(f, "SourceAssert({})[{}]", s, i),
            Self::Prune(sg, i) => write!(f, "Prune{}[{}]", sg, i),
            Self::DelayedPrune(sg, i) => write!(f, "DelayedPrune{}[{}]", sg, i),
        }
    }
}

/// Side effect requested by a router while handling an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a control message out of an interface
    SendControl {
        /// Outgoing interface
        interface: InterfaceId,
        /// Destination address (ALL-PIM-ROUTERS or a unicast neighbor)
        destination: Ipv4Addr,
        /// Message to send
        message: PimMessage,
    },
    /// Send a copy of a data packet out of an interface
    ForwardData {
        /// Outgoing interface
        interface: InterfaceId,
        /// The packet
        packet: DataPacket,
    },
    /// Arm a timer, replacing it if it is already armed
    SetTimer {
        /// Timer
        key: TimerKey,
        /// Delay from now
        delay: Duration,
    },
    /// Cancel a timer. Cancelling a timer which is not armed does nothing.
    CancelTimer(TimerKey),
}

/// Actions emitted while handling a single event, in order.
pub type ActionQueue = VecDeque<Action>;

/// Time ordered event queue of the simulator. Events scheduled for the same time are handled in
/// the order they were enqueued. Timers are indexed by router and key, such that arming a timer
/// again moves it, and cancelling it removes it from the queue.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventQueue {
    events: BTreeMap<(Time, u64), Event>,
    timers: HashMap<(RouterId, TimerKey), (Time, u64)>,
    next_seq: u64,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event at the given time
    pub fn push(&mut self, time: Time, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Event::Timer(router, key) = &event {
            if let Some(old) = self.timers.insert((*router, *key), (time, seq)) {
                self.events.remove(&old);
            }
        }
        self.events.insert((time, seq), event);
    }

    /// Remove an armed timer. Returns true if it was armed.
    pub fn cancel(&mut self, router: RouterId, key: TimerKey) -> bool {
        match self.timers.remove(&(router, key)) {
            Some(pos) => self.events.remove(&pos).is_some(),
            None => false,
        }
    }

    /// Returns the time at which a timer is armed
    pub fn timer_deadline(&self, router: RouterId, key: TimerKey) -> Option<Time> {
        self.timers.get(&(router, key)).map(|(t, _)| *t)
    }

    /// Dequeue the next event
    pub fn pop(&mut self) -> Option<(Time, Event)> {
        let pos = *self.events.keys().next()?;
        let event = self.events.remove(&pos)?;
        if let Event::Timer(router, key) = &event {
            self.timers.remove(&(*router, *key));
        }
        Some((pos.0, event))
    }

    /// Time of the next event
    pub fn peek_time(&self) -> Option<Time> {
        self.events.keys().next().map(|(t, _)| *t)
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no event is pending
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate over all pending events in order
    pub fn iter(&self) -> impl Iterator<Item = (Time, &Event)> {
        self.events.iter().map(|((t, _), e)| (*t, e))
    }
}
