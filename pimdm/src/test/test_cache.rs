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

//! Test the data structures of a router: forwarding cache, downstream set, unicast RIB, neighbor
//! table and local membership.

use crate::netsim::assert::AssertMetric;
use crate::netsim::cache::{EntryState, ForwardingCache, ForwardingEntry};
use crate::netsim::downstream::{DownstreamInfo, DownstreamSet};
use crate::netsim::neighbor::{LocalMembership, NeighborTable, NeighborUpdate};
use crate::netsim::rib::{Route, UnicastRib};
use crate::netsim::{InterfaceId, PimError, Prefix, SgPair, Upstream};
use maplit::btreeset;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

fn sg(source: u8, group: u8) -> SgPair {
    SgPair::new(Ipv4Addr::new(10, 1, 0, source), Ipv4Addr::new(239, 1, 1, group))
}

fn downstream(interface: u32) -> DownstreamInfo {
    DownstreamInfo::new(
        InterfaceId(interface),
        Ipv4Addr::new(10, 0, interface as u8, 1),
        AssertMetric::infinite(),
    )
}

#[test]
fn cache_one_entry_per_pair() {
    let mut cache = ForwardingCache::new();
    assert!(cache.is_empty());
    cache.insert(ForwardingEntry::new(sg(1, 1), Some(InterfaceId(0)), Upstream::Connected)).unwrap();
    cache.insert(ForwardingEntry::new(sg(2, 1), Some(InterfaceId(0)), Upstream::Connected)).unwrap();
    cache.insert(ForwardingEntry::new(sg(1, 2), Some(InterfaceId(0)), Upstream::Connected)).unwrap();
    assert_eq!(
        cache.insert(ForwardingEntry::new(sg(1, 1), Some(InterfaceId(1)), Upstream::Me)),
        Err(PimError::DuplicateEntry(sg(1, 1)))
    );
    assert_eq!(cache.len(), 3);

    // the first entry is untouched
    let entry = cache.get(&sg(1, 1)).unwrap();
    assert_eq!(entry.upstream_interface(), Some(InterfaceId(0)));
    assert_eq!(entry.upstream(), Upstream::Connected);
    assert_eq!(entry.state(), EntryState::Forward);
    assert!(entry.downstream().is_empty());
    assert_eq!(entry.expiration(), None);

    assert_eq!(cache.pairs(), vec![sg(1, 1), sg(1, 2), sg(2, 1)]);
    assert_eq!(cache.pairs_of_group(Ipv4Addr::new(239, 1, 1, 1)), vec![sg(1, 1), sg(2, 1)]);

    assert!(cache.remove(&sg(1, 1)).is_some());
    assert!(cache.remove(&sg(1, 1)).is_none());
    assert!(!cache.contains(&sg(1, 1)));
    assert_eq!(cache.iter().count(), 2);
}

#[test]
fn entry_state_display() {
    assert_eq!(EntryState::Forward.to_string(), "FORWARD");
    assert_eq!(EntryState::Prune.to_string(), "PRUNE");
    assert_eq!(EntryState::AckPending.to_string(), "ACK_PENDING");
}

#[test]
fn downstream_set() {
    let mut set = DownstreamSet::new();
    assert!(set.all_pruned());
    assert!(set.add(downstream(3)));
    assert!(set.add(downstream(1)));
    assert!(!set.add(downstream(1)));
    assert_eq!(set.interfaces(), vec![InterfaceId(1), InterfaceId(3)]);
    assert!(!set.all_pruned());

    set.get_mut(InterfaceId(1)).unwrap().is_pruned = true;
    assert!(!set.all_pruned());
    set.get_mut(InterfaceId(3)).unwrap().is_pruned = true;
    assert!(set.all_pruned());

    assert!(set.remove(InterfaceId(3)).is_some());
    assert!(set.remove(InterfaceId(3)).is_none());
    assert_eq!(set.len(), 1);
    assert!(set.contains(InterfaceId(1)));
}

#[test]
fn downstream_prune_deadline() {
    let mut ds = downstream(1);
    assert!(ds.is_forwarding());
    assert_eq!(ds.prune_deadline(), None);

    ds.is_pruned = true;
    ds.prune_armed_at = Some(Duration::from_secs(10));
    ds.prune_hold_time = Some(Duration::from_secs(210));
    assert!(!ds.is_forwarding());
    assert_eq!(ds.prune_deadline(), Some(Duration::from_secs(220)));

    // infinite hold time never expires
    ds.prune_hold_time = None;
    assert_eq!(ds.prune_deadline(), None);

    ds.unprune();
    assert!(ds.is_forwarding());
    assert_eq!(ds.prune_armed_at, None);
}

#[test]
fn rib_longest_prefix_match() {
    let mut rib = UnicastRib::new();
    let route = |i: u32, next_hop: Option<Ipv4Addr>, metric: u32| Route {
        interface: InterfaceId(i),
        next_hop,
        preference: 110,
        metric,
    };
    rib.insert(Prefix::new(Ipv4Addr::UNSPECIFIED, 0), route(0, Some(Ipv4Addr::new(10, 0, 0, 1)), 100));
    rib.insert(Prefix::new(Ipv4Addr::new(10, 1, 0, 0), 16), route(1, Some(Ipv4Addr::new(10, 0, 1, 2)), 20));
    rib.insert(Prefix::new(Ipv4Addr::new(10, 1, 2, 0), 24), route(2, None, 1));
    assert_eq!(rib.len(), 3);

    let (prefix, r) = rib.lookup(Ipv4Addr::new(10, 1, 2, 3)).unwrap();
    assert_eq!(prefix.len(), 24);
    assert_eq!(r.interface, InterfaceId(2));

    let (prefix, r) = rib.lookup(Ipv4Addr::new(10, 1, 3, 3)).unwrap();
    assert_eq!(prefix.len(), 16);
    assert_eq!(r.interface, InterfaceId(1));

    let (prefix, _) = rib.lookup(Ipv4Addr::new(192, 168, 0, 1)).unwrap();
    assert!(prefix.is_default());

    // a route without next hop is directly connected
    let rpf = rib.resolve(Ipv4Addr::new(10, 1, 2, 3)).unwrap();
    assert_eq!(rpf.upstream, Upstream::Connected);
    assert_eq!(rpf.metric, 1);
    let rpf = rib.resolve(Ipv4Addr::new(10, 1, 3, 3)).unwrap();
    assert_eq!(rpf.upstream, Upstream::Neighbor(Ipv4Addr::new(10, 0, 1, 2)));
    assert_eq!(rpf.preference, 110);

    rib.remove(&Prefix::new(Ipv4Addr::UNSPECIFIED, 0));
    assert!(rib.resolve(Ipv4Addr::new(192, 168, 0, 1)).is_none());
    rib.clear();
    assert!(rib.is_empty());
}

#[test]
fn prefix_contains() {
    let p = Prefix::new(Ipv4Addr::new(10, 1, 2, 3), 16);
    assert_eq!(p.addr(), Ipv4Addr::new(10, 1, 0, 0));
    assert!(p.contains(Ipv4Addr::new(10, 1, 255, 255)));
    assert!(!p.contains(Ipv4Addr::new(10, 2, 0, 0)));
    assert!(Prefix::host(Ipv4Addr::new(1, 2, 3, 4)).contains(Ipv4Addr::new(1, 2, 3, 4)));
    assert!(!Prefix::host(Ipv4Addr::new(1, 2, 3, 4)).contains(Ipv4Addr::new(1, 2, 3, 5)));
    assert!(Prefix::new(Ipv4Addr::UNSPECIFIED, 0).contains(Ipv4Addr::new(8, 8, 8, 8)));
}

#[test]
fn neighbor_table() {
    let mut table = NeighborTable::new();
    let n = Ipv4Addr::new(10, 0, 0, 2);
    let t = Duration::from_secs(105);
    assert_eq!(table.update(n, 105, Some(1), Some(t)), NeighborUpdate::New);
    assert_eq!(table.update(n, 105, Some(1), Some(t * 2)), NeighborUpdate::Refreshed);
    assert_eq!(table.get(n).unwrap().expires_at, Some(t * 2));
    // a new generation id means the neighbor restarted
    assert_eq!(table.update(n, 105, Some(2), Some(t * 3)), NeighborUpdate::Restarted);
    // a Hello without generation id is never a restart
    assert_eq!(table.update(n, 105, None, Some(t * 3)), NeighborUpdate::Refreshed);
    assert!(table.contains(n));
    assert_eq!(table.len(), 1);
    assert!(table.remove(n).is_some());
    assert!(table.is_empty());
}

#[test]
fn local_membership() {
    let g = Ipv4Addr::new(239, 1, 1, 1);
    let mut m = LocalMembership::new();
    assert!(m.add_receiver(g, InterfaceId(2)));
    assert!(m.add_receiver(g, InterfaceId(1)));
    assert!(!m.add_receiver(g, InterfaceId(1)));
    assert!(m.has_local_receiver(g, InterfaceId(1)));
    assert!(!m.has_local_receiver(g, InterfaceId(0)));
    assert_eq!(
        m.receivers(g).collect::<BTreeSet<_>>(),
        btreeset! {InterfaceId(1), InterfaceId(2)}
    );
    assert!(m.remove_receiver(g, InterfaceId(1)));
    assert!(!m.remove_receiver(g, InterfaceId(1)));

    assert!(!m.is_part_of_group(g));
    assert!(m.join_node(g));
    assert!(m.is_part_of_group(g));
    assert!(m.leave_node(g));
    assert!(!m.leave_node(g));
}
