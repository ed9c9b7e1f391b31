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

#![deny(missing_docs)]

//! # PimDm: Dense-Mode Multicast Routing Simulation
//! This is a library implementing the forwarding and control state of PIM dense mode (PIM-DM,
//! RFC 3973), together with a discrete event simulator to run many routers on LAN topologies.
//!
//! ## Structure
//!
//! This library is structured in the following way:
//!
//! - **[`NetSim`](netsim)**: The protocol engine and the network simulator. See the main
//!   structures [`PimDmRouter`](netsim::PimDmRouter) and [`Network`](netsim::Network).
//!
//!   - The [forwarding cache](netsim::cache) keeps one entry per `(S, G)` pair, with its upstream
//!     interface and its [downstream interfaces](netsim::downstream).
//!   - The [assert resolver](netsim::assert) elects a single forwarder on shared LANs.
//!   - Join, Prune and Graft messages are handled by the router, and encoded on the wire by the
//!     [packet codec](netsim::packet).
//!   - [Neighbors](netsim::neighbor) are discovered with Hello messages.
//!
//! - **[`Error`]**: The main error type of the library.
//!
//! ## Usage
//!
//! A router never talks to the network directly. It handles one [`Event`](netsim::Event) at a
//! time and appends the resulting actions (packets to send, timers to arm) to a queue:
//!
//! ```
//! use pimdm::netsim::config::{InterfaceConfig, PimDmConfig};
//! use pimdm::netsim::event::{Action, ActionQueue};
//! use pimdm::netsim::{Event, InterfaceId, PimDmRouter, RouterId};
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), pimdm::Error> {
//!     let id = RouterId::new(0);
//!     let mut router = PimDmRouter::new("R0".to_string(), id, PimDmConfig::default());
//!     router.add_interface(InterfaceId(0), InterfaceConfig::new(Ipv4Addr::new(10, 0, 0, 1), 24))?;
//!
//!     let mut actions = ActionQueue::new();
//!     router.handle_event(Event::Start(id), Duration::default(), &mut actions)?;
//!
//!     // the router sends a Hello, and arms the Hello timer
//!     assert!(matches!(actions[0], Action::SendControl { .. }));
//!     assert!(matches!(actions[1], Action::SetTimer { .. }));
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod netsim;
mod test;

pub use error::Error;
