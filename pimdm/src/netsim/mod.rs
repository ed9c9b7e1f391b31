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

#![deny(missing_docs, missing_debug_implementations)]

//! # NetSim
//!
//! This is a library for simulating PIM dense mode (RFC 3973) on LAN topologies. Every router keeps
//! a forwarding cache of `(S, G)` entries, floods data on all downstream interfaces, and prunes
//! the branches without receivers. Grafts re-join pruned branches, and asserts elect a single
//! forwarder on shared LANs.
//!
//! ## Example usage
//!
//! The following example generates a chain of two routers `R1` and `R2`. The source lives on the
//! LAN of `R1`, and the receiver on the LAN of `R2`.
//!
//! ```rust
//! use pimdm::netsim::{Network, Prefix};
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!
//!     let mut t = Network::new();
//!
//!     let src_lan = t.add_segment("src", Prefix::new(Ipv4Addr::new(10, 0, 1, 0), 24));
//!     let core = t.add_segment("core", Prefix::new(Ipv4Addr::new(10, 0, 2, 0), 24));
//!     let rcv_lan = t.add_segment("rcv", Prefix::new(Ipv4Addr::new(10, 0, 3, 0), 24));
//!
//!     let r1 = t.add_router("R1");
//!     let r2 = t.add_router("R2");
//!
//!     t.connect(r1, src_lan, Ipv4Addr::new(10, 0, 1, 1))?;
//!     t.connect(r1, core, Ipv4Addr::new(10, 0, 2, 1))?;
//!     t.connect(r2, core, Ipv4Addr::new(10, 0, 2, 2))?;
//!     t.connect(r2, rcv_lan, Ipv4Addr::new(10, 0, 3, 1))?;
//!
//!     let source = Ipv4Addr::new(10, 0, 1, 100);
//!     let receiver = Ipv4Addr::new(10, 0, 3, 100);
//!     let group = Ipv4Addr::new(239, 1, 1, 1);
//!     t.add_host(src_lan, source)?;
//!     t.add_host(rcv_lan, receiver)?;
//!
//!     // discover the neighbors
//!     t.start()?;
//!     t.join(receiver, group)?;
//!     t.run_for(Duration::from_secs(1))?;
//!
//!     t.send_data(source, group)?;
//!     t.run_for(Duration::from_secs(1))?;
//!
//!     // check that the receiver got the packet
//!     assert_eq!(t.num_received(receiver, group), 1);
//!
//!     Ok(())
//! }
//! ```

pub mod assert;
pub mod cache;
pub mod config;
pub mod downstream;
pub mod event;
mod join_prune;
pub mod neighbor;
mod network;
pub mod node;
pub mod packet;
pub mod printer;
pub mod rib;
pub mod router;
mod types;

pub use event::{Event, MembershipChange};
pub use network::{Delivery, Network, Segment};
pub use router::PimDmRouter;
pub use types::*;
