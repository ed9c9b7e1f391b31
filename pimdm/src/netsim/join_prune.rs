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

//! # Join, Prune and Graft
//!
//! Handlers of the Join/Prune, Graft and Graft-Ack messages, and of the timers they arm. A
//! Join/Prune message is sent to ALL-PIM-ROUTERS, so every router on the LAN sees it. The router
//! named as upstream neighbor acts on it, all others only overhear it:
//!
//! - A Prune addressed to us prunes the downstream interface. On a shared LAN, the interface is
//!   only pruned after the override delay, such that other routers can still override the prune
//!   with a Join.
//! - A Prune overheard on our upstream LAN means that the upstream router is about to stop
//!   forwarding. If we still need the traffic, we schedule a Join after a random delay.
//! - A Join overheard on our upstream LAN suppresses our own pending Join.
//!
//! Grafts are sent unicast and are retransmitted until the Graft-Ack arrives.

use crate::netsim::cache::EntryState;
use crate::netsim::config::{duration_to_holdtime, holdtime_to_duration, INFINITE_HOLDTIME};
use crate::netsim::event::{Action, ActionQueue, TimerKey};
use crate::netsim::node::JoinPruneTarget;
use crate::netsim::packet::{JoinPrune, JoinPruneKind, PimMessage};
use crate::netsim::router::PimDmRouter;
use crate::netsim::{InterfaceId, SgPair};
use log::*;
use std::net::Ipv4Addr;

impl PimDmRouter {
    /// Handle a Join/Prune message received on `interface` from `src`.
    pub(crate) fn handle_join_prune(
        &mut self,
        interface: InterfaceId,
        src: Ipv4Addr,
        message: &JoinPrune,
        actions: &mut ActionQueue,
    ) -> bool {
        let target = message.upstream_neighbor;
        let for_us = self.node.address(interface) == Some(target);
        if !for_us && !self.node.is_neighbor(interface, target) {
            debug!("{}: Join/Prune to unknown neighbor {}, ignore it", self.name(), target);
            return false;
        }
        let mut changed = false;
        for (source, group, kind) in message.entries() {
            let sg = SgPair::new(source, group);
            if !self.cache.contains(&sg) {
                trace!("{}: {} for unknown entry {}", self.name(), kind, sg);
                continue;
            }
            changed |= match (for_us, kind) {
                (true, JoinPruneKind::Join) => self.receive_join(sg, interface, src, actions),
                (true, JoinPruneKind::Prune) => {
                    self.receive_prune(sg, interface, src, message.hold_time, actions)
                }
                (false, JoinPruneKind::Join) => self.overheard_join(sg, interface, target, actions),
                (false, JoinPruneKind::Prune) => self.overheard_prune(sg, interface, target, actions),
            };
        }
        changed
    }

    /// A downstream router joined the entry on `interface`.
    fn receive_join(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        src: Ipv4Addr,
        actions: &mut ActionQueue,
    ) -> bool {
        let shared = self.node.neighbor_count(interface) > 1;
        let entry = match self.cache.get_mut(&sg) {
            Some(e) => e,
            None => return false,
        };
        let (losing, delayed, pruned) = match entry.downstream.get(interface) {
            Some(ds) => (ds.assert.is_losing(), ds.delayed_prune_active, ds.is_pruned),
            None => return false,
        };
        debug!("{}: Join for {} from {} on {}", self.node.name, sg, src, interface);

        let mut changed = false;
        if delayed && !pruned {
            // the Join overrides the Prune of another router on the LAN
            if let Some(ds) = entry.downstream.get_mut(interface) {
                ds.delayed_prune_active = false;
            }
            actions.push_back(Action::CancelTimer(TimerKey::DelayedPrune(sg, interface)));
            changed = true;
        }
        // a lost assert keeps the interface pruned, and there is nothing to graft for
        if pruned && !losing && self.node.unprune_downstream(entry, interface, actions) {
            changed = true;
            changed |= self.node.graft_if_pruned(entry, actions);
        }
        if shared && losing {
            self.node.send_assert(sg, interface, actions);
        }
        changed
    }

    /// A downstream router pruned the entry on `interface`.
    fn receive_prune(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        src: Ipv4Addr,
        hold_time: u16,
        actions: &mut ActionQueue,
    ) -> bool {
        let now = self.node.now;
        let neighbors = self.node.neighbor_count(interface);
        let override_delay = self.node.config.prune_override_delay;
        let hold = holdtime_to_duration(hold_time);
        let entry = match self.cache.get_mut(&sg) {
            Some(e) => e,
            None => return false,
        };
        let losing = match entry.downstream.get(interface) {
            Some(ds) => ds.assert.is_losing(),
            None => return false,
        };
        if neighbors > 1 && losing {
            self.node.send_assert(sg, interface, actions);
        }
        if self.node.membership.has_local_receiver(sg.group, interface) {
            debug!("{}: ignore Prune for {} on {}, local receiver", self.node.name, sg, interface);
            return false;
        }
        debug!("{}: Prune for {} from {} on {} (hold {:?})", self.node.name, sg, src, interface, hold);

        let ds = match entry.downstream.get_mut(interface) {
            Some(ds) => ds,
            None => return false,
        };

        if ds.is_pruned {
            // only ever extend an existing prune
            match (ds.prune_deadline(), hold) {
                (Some(deadline), Some(h)) if now + h > deadline => {
                    ds.prune_armed_at = Some(now);
                    ds.prune_hold_time = Some(h);
                    actions.push_back(Action::SetTimer { key: TimerKey::Prune(sg, interface), delay: h });
                    true
                }
                (Some(_), None) => {
                    ds.prune_armed_at = Some(now);
                    ds.prune_hold_time = None;
                    actions.push_back(Action::CancelTimer(TimerKey::Prune(sg, interface)));
                    true
                }
                _ => false,
            }
        } else if neighbors <= 1 {
            self.node.prune_downstream(entry, interface, hold, actions);
            self.prune_if_all_pruned(sg, actions);
            true
        } else if !ds.delayed_prune_active {
            ds.delayed_prune_active = true;
            ds.prune_armed_at = Some(now);
            ds.prune_hold_time = hold;
            actions.push_back(Action::SetTimer {
                key: TimerKey::DelayedPrune(sg, interface),
                delay: override_delay,
            });
            true
        } else {
            false
        }
    }

    /// Overheard a Join sent to another router on the LAN.
    fn overheard_join(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        target: Ipv4Addr,
        actions: &mut ActionQueue,
    ) -> bool {
        let entry = match self.cache.get_mut(&sg) {
            Some(e) if e.upstream_interface == Some(interface) && e.upstream.neighbor() == Some(target) => e,
            _ => return false,
        };
        let mut changed = false;
        if entry.delayed_join_pending {
            debug!("{}: Join for {} overheard, suppress our own", self.node.name, sg);
            entry.delayed_join_pending = false;
            entry.delayed_join_end = None;
            actions.push_back(Action::CancelTimer(TimerKey::DelayedJoin(sg)));
            changed = true;
        }
        if entry.state == EntryState::Prune && !entry.join_seen_while_pruned {
            entry.join_seen_while_pruned = true;
            changed = true;
        }
        changed
    }

    /// Overheard a Prune sent to our upstream router. If we still need the traffic, schedule a
    /// Join to override it.
    fn overheard_prune(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        target: Ipv4Addr,
        actions: &mut ActionQueue,
    ) -> bool {
        let now = self.node.now;
        let suppression = self
            .node
            .interfaces
            .get(&interface)
            .map(|i| i.config.join_prune_suppression)
            .unwrap_or(false);
        let entry = match self.cache.get_mut(&sg) {
            Some(e) if e.upstream_interface == Some(interface) && e.upstream.neighbor() == Some(target) => e,
            _ => return false,
        };
        let needed = entry.state != EntryState::Prune
            && !(entry.downstream.all_pruned() && self.node.no_local_interest(sg.group));
        if !needed {
            return false;
        }

        let delay = self.node.random_delay(self.node.config.join_random_delay);
        let end = now + delay;
        let schedule = if !entry.delayed_join_pending {
            true
        } else if suppression {
            entry.delayed_join_end.map(|e| e > end).unwrap_or(true)
        } else {
            false
        };
        if schedule {
            debug!("{}: Prune for {} overheard, Join in {:?}", self.node.name, sg, delay);
            entry.delayed_join_pending = true;
            entry.delayed_join_end = Some(end);
            entry.delayed_join_seq += 1;
            actions.push_back(Action::SetTimer { key: TimerKey::DelayedJoin(sg), delay });
        }
        schedule
    }

    /// The delayed Join of an entry fires.
    pub(crate) fn delayed_join_timeout(&mut self, sg: SgPair, actions: &mut ActionQueue) -> bool {
        let entry = match self.cache.get_mut(&sg) {
            Some(e) if e.delayed_join_pending => e,
            _ => return false,
        };
        entry.delayed_join_pending = false;
        entry.delayed_join_end = None;
        if entry.state == EntryState::Prune {
            return false;
        }
        let hold = self.node.config.prune_hold_secs();
        self.node.send_join_prune(entry, JoinPruneTarget::Upstream, JoinPruneKind::Join, hold, actions)
    }

    /// The override window of a Prune on a shared LAN expired without a Join.
    pub(crate) fn delayed_prune_timeout(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        actions: &mut ActionQueue,
    ) -> bool {
        let override_delay = self.node.config.prune_override_delay;
        let address = self.node.address(interface);
        let shared = self.node.neighbor_count(interface) > 1;
        let entry = match self.cache.get_mut(&sg) {
            Some(e) => e,
            None => return false,
        };
        let hold = match entry.downstream.get_mut(interface) {
            Some(ds) if ds.delayed_prune_active => {
                ds.delayed_prune_active = false;
                ds.prune_hold_time
            }
            _ => return false,
        };
        if self.node.membership.has_local_receiver(sg.group, interface) {
            return false;
        }
        debug!("{}: override window of {} on {} expired, prune it", self.node.name, sg, interface);

        if let (true, Some(address)) = (shared, address) {
            // echo the Prune, such that every router on the LAN sees it
            let hold_secs = hold.map(duration_to_holdtime).unwrap_or(INFINITE_HOLDTIME);
            self.node.send_join_prune(
                entry,
                JoinPruneTarget::Neighbor(interface, address),
                JoinPruneKind::Prune,
                hold_secs,
                actions,
            );
        }
        let remaining = hold.map(|h| h.checked_sub(override_delay).unwrap_or_default());
        self.node.prune_downstream(entry, interface, remaining, actions);
        self.prune_if_all_pruned(sg, actions);
        true
    }

    /// The prune of a downstream interface expired.
    pub(crate) fn prune_timeout(
        &mut self,
        sg: SgPair,
        interface: InterfaceId,
        actions: &mut ActionQueue,
    ) -> bool {
        let now = self.node.now;
        let entry = match self.cache.get_mut(&sg) {
            Some(e) => e,
            None => return false,
        };
        let deadline = match entry.downstream.get(interface) {
            Some(ds) if ds.is_pruned => ds.prune_deadline(),
            _ => return false,
        };
        match deadline {
            None => false,
            Some(t) if t > now => {
                actions.push_back(Action::SetTimer { key: TimerKey::Prune(sg, interface), delay: t - now });
                false
            }
            Some(_) => {
                debug!("{}: prune of {} on {} expired", self.node.name, sg, interface);
                self.node.unprune_downstream(entry, interface, actions);
                self.node.graft_if_pruned(entry, actions);
                true
            }
        }
    }

    /// Move the entry to `Prune` if every downstream interface is pruned, and we may prune
    /// upstream.
    fn prune_if_all_pruned(&mut self, sg: SgPair, actions: &mut ActionQueue) -> bool {
        let entry = match self.cache.get_mut(&sg) {
            Some(e) => e,
            None => return false,
        };
        if entry.state != EntryState::Prune
            && entry.upstream.is_reachable()
            && entry.downstream.all_pruned()
            && self.node.may_prune_upstream(entry)
        {
            self.node.enter_prune(entry, actions);
            true
        } else {
            false
        }
    }

    /// Handle a Graft from a downstream router. A Graft-Ack is always sent back.
    pub(crate) fn handle_graft(
        &mut self,
        interface: InterfaceId,
        src: Ipv4Addr,
        message: &JoinPrune,
        actions: &mut ActionQueue,
    ) -> bool {
        let shared = self.node.neighbor_count(interface) > 1;
        let mut changed = false;
        for (source, group, kind) in message.entries() {
            if kind != JoinPruneKind::Join {
                continue;
            }
            let sg = SgPair::new(source, group);
            let entry = match self.cache.get_mut(&sg) {
                Some(e) if e.upstream_interface != Some(interface) => e,
                Some(_) => {
                    debug!("{}: Graft for {} on its upstream interface", self.node.name, sg);
                    continue;
                }
                None => {
                    debug!("{}: Graft for unknown entry {}, ignore it", self.node.name, sg);
                    continue;
                }
            };
            debug!("{}: Graft for {} from {} on {}", self.node.name, sg, src, interface);
            let losing = match entry.downstream.get(interface) {
                Some(ds) => ds.assert.is_losing(),
                None => {
                    self.node.add_downstream(entry, interface);
                    false
                }
            };
            if !losing {
                self.node.unprune_downstream(entry, interface, actions);
            }
            self.node.graft_if_pruned(entry, actions);
            if shared && losing {
                self.node.send_assert(sg, interface, actions);
            }
            changed = true;
        }
        actions.push_back(Action::SendControl {
            interface,
            destination: src,
            message: PimMessage::GraftAck(message.clone()),
        });
        changed
    }

    /// Handle a Graft-Ack from the upstream router.
    pub(crate) fn handle_graft_ack(
        &mut self,
        src: Ipv4Addr,
        message: &JoinPrune,
        actions: &mut ActionQueue,
    ) -> bool {
        let mut changed = false;
        for (source, group, _) in message.entries() {
            let sg = SgPair::new(source, group);
            let entry = match self.cache.get_mut(&sg) {
                Some(e) if e.graft_retransmit_pending || e.state == EntryState::AckPending => e,
                _ => continue,
            };
            debug!("{}: Graft-Ack for {} from {}", self.node.name, sg, src);
            entry.graft_retransmit_pending = false;
            entry.graft_retries = 0;
            actions.push_back(Action::CancelTimer(TimerKey::GraftRetransmit(sg)));
            if entry.state == EntryState::AckPending {
                entry.state = EntryState::Forward;
            }
            changed = true;
        }
        changed
    }

    /// The Graft retransmission timer fires.
    pub(crate) fn graft_retransmit(&mut self, sg: SgPair, actions: &mut ActionQueue) -> bool {
        let limit = self.node.config.graft_retry_limit;
        let entry = match self.cache.get_mut(&sg) {
            Some(e) if e.graft_retransmit_pending && e.state == EntryState::AckPending => e,
            _ => return false,
        };
        entry.graft_retries += 1;
        if let Some(limit) = limit {
            if entry.graft_retries > limit {
                warn!(
                    "{}: no Graft-Ack for {} after {} retries, fall back to FORWARD",
                    self.node.name, sg, limit
                );
                entry.graft_retransmit_pending = false;
                entry.state = EntryState::Forward;
                return true;
            }
        }
        trace!("{}: retransmit Graft for {}", self.node.name, sg);
        self.node.send_graft(entry, actions);
        true
    }
}
