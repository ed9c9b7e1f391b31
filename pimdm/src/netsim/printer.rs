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

//! # Helper (printer) functions for the Network
//! Module containing helper functions to get formatted strings and print information about the
//! network.

use crate::netsim::cache::ForwardingEntry;
use crate::netsim::downstream::DownstreamInfo;
use crate::netsim::event::Action;
use crate::netsim::network::Network;
use crate::netsim::{NetworkError, RouterId};

use itertools::Itertools;

/// Get the formatted forwarding cache of a router. Every line represents one `(S, G)` entry,
/// sorted by the pair.
pub fn forwarding_cache(net: &Network, router: RouterId) -> Result<String, NetworkError> {
    let r = net.get_router(router)?;
    let mut lines = r.cache().pairs().into_iter().filter_map(|sg| r.get_entry(sg)).map(entry);
    Ok(format!("Forwarding cache of {}:\n{}", r.name(), lines.join("\n")))
}

/// Returns the formatted string of a forwarding entry.
pub fn entry(entry: &ForwardingEntry) -> String {
    let upstream_if = match entry.upstream_interface() {
        Some(i) => i.to_string(),
        None => String::from("cpu"),
    };
    format!(
        "{sg}: {state}, upstream: {up} via {upif}, downstream: [{ds}]",
        sg = entry.sg(),
        state = entry.state(),
        up = entry.upstream(),
        upif = upstream_if,
        ds = entry.downstream().iter().map(downstream).join(", "),
    )
}

/// Returns the formatted string of a downstream interface
pub fn downstream(info: &DownstreamInfo) -> String {
    let flag = if info.is_pruned {
        "pruned"
    } else if info.assert.is_losing() {
        "lost"
    } else {
        "fwd"
    };
    format!("{} ({})", info.interface, flag)
}

/// Returns the formatted string of an action emitted by a router
pub fn action(action: &Action) -> String {
    match action {
        Action::SendControl { interface, destination, message } => {
            format!("send {} to {} on {}", message, destination, interface)
        }
        Action::ForwardData { interface, packet } => {
            format!("forward {} #{} on {}", packet.sg(), packet.seq, interface)
        }
        Action::SetTimer { key, delay } => format!("set {} in {:?}", key, delay),
        Action::CancelTimer(key) => format!("cancel {}", key),
    }
}
