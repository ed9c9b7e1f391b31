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

//! # Router Configuration
//! This module contains the configuration of a PIM-DM router. There are two different structs:
//!
//! - [`PimDmConfig`]: Protocol timers and router-wide switches. The `Default` implementation
//!   contains the values used by the dense-mode reference model (RFC 3973 timers).
//! - [`InterfaceConfig`]: Configuration of a single interface of the router.
//!
//! # Example Usage
//!
//! ```rust
//! use pimdm::netsim::config::PimDmConfig;
//! use std::time::Duration;
//!
//! let config = PimDmConfig {
//!     assert_optimization: true,
//!     graft_retry_limit: Some(5),
//!     ..Default::default()
//! };
//! assert_eq!(config.prune_override_delay, Duration::from_secs(3));
//! assert_eq!(config.hello_holdtime_secs(), 105);
//! ```

use std::net::Ipv4Addr;
use std::time::Duration;

/// Holdtime value (in seconds) meaning "never expires".
pub const INFINITE_HOLDTIME: u16 = 0xFFFF;

/// # Router-wide PIM-DM configuration
/// All durations are measured in simulated time.
#[derive(Debug, Clone, PartialEq)]
pub struct PimDmConfig {
    /// Lifetime of a forwarding cache entry without any data refreshing it.
    pub data_timeout: Duration,
    /// Lifetime of assert state without a refreshing Assert.
    pub assert_timeout: Duration,
    /// Hold time put into every Prune sent upstream.
    pub prune_hold_time: Duration,
    /// Period between Graft retransmissions while waiting for a GraftAck.
    pub graft_retransmit_period: Duration,
    /// Maximum number of Graft retransmissions. `None` retransmits until a GraftAck arrives.
    pub graft_retry_limit: Option<u32>,
    /// Upper bound of the random delay before a Join overriding a Prune is sent.
    pub join_random_delay: Duration,
    /// Propagation delay assumed on shared LANs.
    pub lan_propagation_delay: Duration,
    /// Delay after a Prune on a shared LAN before the interface is actually pruned. Within that
    /// window, a Join from another router cancels the prune.
    pub prune_override_delay: Duration,
    /// Minimal interval between two Prunes re-sent for the same entry due to arriving data.
    pub prune_resend_interval: Duration,
    /// Period of Hello messages
    pub hello_period: Duration,
    /// Holdtime advertised in Hello messages
    pub hello_holdtime: Duration,
    /// Upper bound of the random delay before a triggered Hello is sent.
    pub triggered_hello_delay: Duration,
    /// Track assert state per `(source, interface)` instead of per `(source, group, interface)`.
    /// This must be set equally on all routers of a network.
    pub assert_optimization: bool,
    /// Wireless broadcast mode: entries are never pruned upstream because a downstream interface
    /// became empty.
    pub broadcast_mode: bool,
    /// Seed for the random number generator of the router.
    pub seed: u64,
}

impl Default for PimDmConfig {
    fn default() -> Self {
        let join_random_delay = Duration::from_millis(2500);
        let lan_propagation_delay = Duration::from_millis(500);
        Self {
            data_timeout: Duration::from_secs(210),
            assert_timeout: Duration::from_secs(180),
            prune_hold_time: Duration::from_secs(210),
            graft_retransmit_period: Duration::from_secs(3),
            graft_retry_limit: None,
            join_random_delay,
            lan_propagation_delay,
            prune_override_delay: join_random_delay + lan_propagation_delay,
            prune_resend_interval: Duration::from_secs(1),
            hello_period: Duration::from_secs(30),
            hello_holdtime: Duration::from_secs(105),
            triggered_hello_delay: Duration::from_secs(5),
            assert_optimization: false,
            broadcast_mode: false,
            seed: 0,
        }
    }
}

impl PimDmConfig {
    /// Prune holdtime as it is written into a Join/Prune message.
    pub fn prune_hold_secs(&self) -> u16 {
        duration_to_holdtime(self.prune_hold_time)
    }

    /// Assert timeout as it is written into a Prune sent to an assert winner.
    pub fn assert_hold_secs(&self) -> u16 {
        duration_to_holdtime(self.assert_timeout)
    }

    /// Hello holdtime as it is written into a Hello message.
    pub fn hello_holdtime_secs(&self) -> u16 {
        duration_to_holdtime(self.hello_holdtime)
    }
}

/// Convert a duration into a holdtime field, saturating just below the infinite holdtime.
pub fn duration_to_holdtime(d: Duration) -> u16 {
    d.as_secs().min(u64::from(INFINITE_HOLDTIME - 1)) as u16
}

/// Convert a holdtime field into a duration. Returns `None` for the infinite holdtime.
pub fn holdtime_to_duration(holdtime: u16) -> Option<Duration> {
    if holdtime == INFINITE_HOLDTIME {
        None
    } else {
        Some(Duration::from_secs(u64::from(holdtime)))
    }
}

/// Configuration of a single router interface
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceConfig {
    /// Address of the interface
    pub address: Ipv4Addr,
    /// Prefix length of the attached subnet
    pub prefix_len: u8,
    /// Unicast routing cost of the interface
    pub cost: u32,
    /// With join/prune suppression, a delayed Join is rescheduled whenever an earlier one would
    /// be sent, and only the most recent one fires.
    pub join_prune_suppression: bool,
}

impl InterfaceConfig {
    /// Create a new interface configuration with cost 1 and no join/prune suppression.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Self {
        Self { address, prefix_len, cost: 1, join_prune_suppression: false }
    }
}
