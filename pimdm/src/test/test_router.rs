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

//! Test the data path, neighbors, membership and route changes of a single router.

use super::harness::*;
use crate::netsim::assert::AssertState;
use crate::netsim::cache::EntryState;
use crate::netsim::event::{Action, TimerKey};
use crate::netsim::packet::{JoinPruneKind, PimMessage};
use crate::netsim::rib::Route;
use crate::netsim::{Event, MembershipChange, Prefix, SgPair, Upstream, ALL_PIM_ROUTERS};
use maplit::btreeset;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

#[test]
fn start_sends_hello() {
    let mut h = Harness::new();
    let id = h.id();
    let actions = h.event(Event::Start(id));
    let hellos = sent(&actions)
        .into_iter()
        .filter(|(_, dst, m)| *dst == ALL_PIM_ROUTERS && matches!(m, PimMessage::Hello(_)))
        .map(|(i, _, _)| i)
        .collect::<BTreeSet<_>>();
    assert_eq!(hellos, btreeset! {IF0, IF1, IF2, IF3});
    assert_eq!(sets_timer(&actions, TimerKey::Hello(IF0)), Some(Duration::from_secs(30)));

    // the periodic timer re-arms itself
    let actions = h.at(30).timer(TimerKey::Hello(IF2));
    assert_eq!(sent(&actions).len(), 1);
    assert_eq!(sets_timer(&actions, TimerKey::Hello(IF2)), Some(Duration::from_secs(30)));
}

#[test]
fn hello_creates_neighbor() {
    let mut h = Harness::new();
    let actions = h.hello(IF1, Ipv4Addr::new(192, 0, 2, 1), 105);
    assert_eq!(h.router.neighbors(IF1).unwrap().len(), 1);
    assert_eq!(
        sets_timer(&actions, TimerKey::NeighborLiveness(IF1, Ipv4Addr::new(192, 0, 2, 1))),
        Some(Duration::from_secs(105))
    );
    // a new neighbor triggers a Hello after a random delay
    let delay = sets_timer(&actions, TimerKey::TriggeredHello(IF1)).unwrap();
    assert!(delay < Duration::from_secs(5));

    // refreshing does not trigger a Hello again
    let actions = h.at(10).hello(IF1, Ipv4Addr::new(192, 0, 2, 1), 105);
    assert_eq!(sets_timer(&actions, TimerKey::TriggeredHello(IF1)), None);
}

#[test]
fn first_packet_builds_entry() {
    let mut h = Harness::new();
    h.hello(IF0, UPSTREAM, 105);
    h.hello(IF1, Ipv4Addr::new(192, 0, 2, 1), 105);
    let actions = h.data(IF0, Some(UPSTREAM));

    assert_eq!(forwarded(&actions), vec![IF1]);
    assert_eq!(sets_timer(&actions, TimerKey::Data(sg())), Some(Duration::from_secs(210)));

    let entry = h.entry();
    assert_eq!(entry.state(), EntryState::Forward);
    assert_eq!(entry.upstream_interface(), Some(IF0));
    assert_eq!(entry.upstream(), Upstream::Neighbor(UPSTREAM));
    assert_eq!(entry.downstream().interfaces(), vec![IF1]);
    assert_eq!(entry.expiration(), Some(Duration::from_secs(210)));
    assert_eq!(h.router.cache().len(), 1);

    // the next packet is forwarded on the same interfaces, the timer is not armed again
    let actions = h.at(5).data(IF0, Some(UPSTREAM));
    assert_eq!(forwarded(&actions), vec![IF1]);
    assert_eq!(sets_timer(&actions, TimerKey::Data(sg())), None);
    assert_eq!(h.entry().expiration(), Some(Duration::from_secs(215)));
    assert_eq!(h.router.cache().len(), 1);
}

#[test]
fn rpf_check_drops_packets() {
    let mut h = Harness::with_entry();

    // neither upstream nor downstream
    let actions = h.data(IF2, Some(Ipv4Addr::new(10, 0, 2, 2)));
    assert!(actions.is_empty());
    let actions = h.data(IF3, None);
    assert!(actions.is_empty());

    // new pair arriving off the RPF interface
    let other = Ipv4Addr::new(10, 1, 0, 200);
    let actions = h.data_from(other, Some(IF1), Some(Ipv4Addr::new(192, 0, 2, 1)));
    assert!(actions.is_empty());
    assert!(h.router.get_entry(SgPair::new(other, GROUP)).is_none());

    // new pair from a router which is not a neighbor
    let actions = h.data_from(other, Some(IF0), Some(Ipv4Addr::new(10, 0, 0, 99)));
    assert!(actions.is_empty());
    assert!(h.router.get_entry(SgPair::new(other, GROUP)).is_none());
}

#[test]
fn unreachable_source_keeps_state_only() {
    let mut h = Harness::with_entry();
    let unknown = Ipv4Addr::new(172, 16, 0, 1);
    let actions = h.data_from(unknown, Some(IF0), Some(UPSTREAM));
    assert!(forwarded(&actions).is_empty());
    let entry = h.router.get_entry(SgPair::new(unknown, GROUP)).unwrap();
    assert_eq!(entry.upstream(), Upstream::Unreachable);

    // further packets are dropped
    let actions = h.data_from(unknown, Some(IF0), Some(UPSTREAM));
    assert!(actions.is_empty());
}

#[test]
fn state_only_entry_expires() {
    let mut h = Harness::new();
    let unknown = Ipv4Addr::new(172, 16, 0, 1);
    let pair = SgPair::new(unknown, GROUP);
    let actions = h.data_from(unknown, Some(IF0), Some(UPSTREAM));
    assert_eq!(sets_timer(&actions, TimerKey::Data(pair)), Some(Duration::from_secs(210)));

    h.at(210).timer(TimerKey::Data(pair));
    assert!(h.router.get_entry(pair).is_none());
}

#[test]
fn state_only_entry_recovers_when_route_appears() {
    let mut h = Harness::new();
    h.hello(IF0, UPSTREAM, 105);
    h.hello(IF1, Ipv4Addr::new(192, 0, 2, 1), 105);
    let unknown = Ipv4Addr::new(172, 16, 0, 1);
    let pair = SgPair::new(unknown, GROUP);
    h.data_from(unknown, Some(IF0), Some(UPSTREAM));
    assert!(h.router.get_entry(pair).unwrap().downstream().is_empty());

    let prefix = Prefix::new(Ipv4Addr::new(172, 16, 0, 0), 16);
    h.router
        .insert_route(prefix, Route { interface: IF0, next_hop: Some(UPSTREAM), preference: 110, metric: 20 })
        .unwrap();
    let id = h.id();
    let actions = h.at(5).event(Event::RouteChange(id, prefix));
    assert_eq!(join_prunes(&actions, JoinPruneKind::Prune, UPSTREAM), 0);

    let entry = h.router.get_entry(pair).unwrap();
    assert_eq!(entry.upstream(), Upstream::Neighbor(UPSTREAM));
    assert_eq!(entry.upstream_interface(), Some(IF0));
    assert_eq!(entry.state(), EntryState::Forward);
    assert_eq!(entry.downstream().interfaces(), vec![IF1]);

    // the next packet reaches the neighbor on if1
    let actions = h.at(6).data_from(unknown, Some(IF0), Some(UPSTREAM));
    assert_eq!(forwarded(&actions), vec![IF1]);
}

#[test]
fn data_on_downstream_triggers_assert() {
    let mut h = Harness::with_entry();
    let actions = h.at(1).data(IF1, Some(Ipv4Addr::new(192, 0, 2, 1)));
    assert!(forwarded(&actions).is_empty());
    let asserts = sent(&actions);
    assert_eq!(asserts.len(), 1);
    match &asserts[0] {
        (i, dst, PimMessage::Assert(a)) if *i == IF1 && *dst == ALL_PIM_ROUTERS => {
            assert_eq!((a.preference, a.metric), (110, 10));
            assert_eq!((a.source, a.group), (SOURCE, GROUP));
        }
        x => panic!("unexpected message {:?}", x),
    }
    assert_eq!(
        sets_timer(&actions, TimerKey::Assert(sg(), IF1)),
        Some(Duration::from_secs(180))
    );
    assert_eq!(h.entry().downstream().get(IF1).unwrap().assert.state, AssertState::IWonAssert);
}

#[test]
fn no_prune_towards_connected_source() {
    let mut h = Harness::new();
    let actions = h.data_from(LOCAL_SOURCE, Some(IF3), None);
    let entry = h.router.get_entry(SgPair::new(LOCAL_SOURCE, GROUP)).unwrap();
    assert_eq!(entry.upstream(), Upstream::Connected);
    assert!(entry.downstream().is_empty());
    assert_eq!(entry.state(), EntryState::Prune);
    assert!(sent(&actions).is_empty());

    // data keeps arriving, still no prune
    let actions = h.at(5).data_from(LOCAL_SOURCE, Some(IF3), None);
    assert!(sent(&actions).is_empty());
}

#[test]
fn no_prune_after_downstream_pruned_for_connected_source() {
    let mut h = Harness::new();
    h.hello(IF0, UPSTREAM, 105);
    let actions = h.data_from(LOCAL_SOURCE, Some(IF3), None);
    assert_eq!(forwarded(&actions), vec![IF0]);

    let msg = PimMessage::JoinPrune(crate::netsim::packet::JoinPrune::single(
        ADDR0,
        210,
        LOCAL_SOURCE,
        GROUP,
        JoinPruneKind::Prune,
    ));
    let actions = h.at(1).control(IF0, UPSTREAM, ALL_PIM_ROUTERS, msg);
    let entry = h.router.get_entry(SgPair::new(LOCAL_SOURCE, GROUP)).unwrap();
    assert!(entry.downstream().get(IF0).unwrap().is_pruned);
    assert_eq!(entry.state(), EntryState::Prune);
    assert!(sent(&actions).is_empty());
}

#[test]
fn self_originated_traffic() {
    let mut h = Harness::new();
    h.hello(IF0, UPSTREAM, 105);
    let actions = h.data_from(ADDR2, None, None);
    assert_eq!(forwarded(&actions), vec![IF0]);
    let entry = h.router.get_entry(SgPair::new(ADDR2, GROUP)).unwrap();
    assert_eq!(entry.upstream(), Upstream::Me);
    assert_eq!(entry.upstream_interface(), None);

    // a copy of our own packet looping back is dropped
    let actions = h.data_from(ADDR2, Some(IF0), Some(UPSTREAM));
    assert!(actions.is_empty());
}

#[test]
fn data_timeout_deletes_entry() {
    let mut h = Harness::with_entry();
    h.at(100).data(IF0, Some(UPSTREAM));

    // the timer fires at the first deadline, but data moved it
    let actions = h.at(210).timer(TimerKey::Data(sg()));
    assert_eq!(sets_timer(&actions, TimerKey::Data(sg())), Some(Duration::from_secs(100)));
    assert!(h.router.get_entry(sg()).is_some());

    let actions = h.at(310).timer(TimerKey::Data(sg()));
    assert!(h.router.get_entry(sg()).is_none());
    assert!(cancels_timer(&actions, TimerKey::Data(sg())));
    assert!(cancels_timer(&actions, TimerKey::Assert(sg(), IF1)));

    // a stale timer of a deleted entry does nothing
    let actions = h.at(400).timer(TimerKey::Data(sg()));
    assert!(actions.is_empty());
    let actions = h.timer(TimerKey::Prune(sg(), IF1));
    assert!(actions.is_empty());
}

#[test]
fn neighbor_loss_removes_downstream() {
    let mut h = Harness::with_entry();
    let neighbor = Ipv4Addr::new(192, 0, 2, 1);

    // the neighbor says goodbye
    let actions = h.at(10).hello(IF1, neighbor, 0);
    assert_eq!(h.router.neighbors(IF1).unwrap().len(), 0);
    assert!(cancels_timer(&actions, TimerKey::NeighborLiveness(IF1, neighbor)));
    assert!(cancels_timer(&actions, TimerKey::Prune(sg(), IF1)));

    let entry = h.entry();
    assert!(entry.downstream().is_empty());
    assert_eq!(entry.state(), EntryState::Prune);
    assert_eq!(join_prunes(&actions, JoinPruneKind::Prune, UPSTREAM), 1);
}

#[test]
fn neighbor_liveness_timer() {
    let mut h = Harness::with_entry();
    let neighbor = Ipv4Addr::new(192, 0, 2, 1);
    h.at(50).hello(IF1, neighbor, 105);

    // refreshed in the meantime
    let actions = h.at(105).timer(TimerKey::NeighborLiveness(IF1, neighbor));
    assert_eq!(
        sets_timer(&actions, TimerKey::NeighborLiveness(IF1, neighbor)),
        Some(Duration::from_secs(50))
    );
    assert!(h.router.neighbors(IF1).unwrap().contains(neighbor));

    let actions = h.at(155).timer(TimerKey::NeighborLiveness(IF1, neighbor));
    assert!(!h.router.neighbors(IF1).unwrap().contains(neighbor));
    assert_eq!(h.entry().state(), EntryState::Prune);
    assert_eq!(join_prunes(&actions, JoinPruneKind::Prune, UPSTREAM), 1);
}

#[test]
fn new_neighbor_grafts_pruned_entry() {
    let mut h = Harness::new();
    h.hello(IF0, UPSTREAM, 105);
    let actions = h.data(IF0, Some(UPSTREAM));
    assert_eq!(h.entry().state(), EntryState::Prune);
    assert_eq!(join_prunes(&actions, JoinPruneKind::Prune, UPSTREAM), 1);

    let actions = h.at(5).hello(IF2, Ipv4Addr::new(10, 0, 2, 2), 105);
    assert_eq!(h.entry().state(), EntryState::AckPending);
    assert_eq!(h.entry().downstream().interfaces(), vec![IF2]);
    assert_eq!(grafts(&actions, UPSTREAM), 1);
}

#[test]
fn upstream_neighbor_restart_is_ignored_downstream() {
    let mut h = Harness::with_entry();
    // a restart of the upstream neighbor does not add the upstream interface as downstream
    let msg = PimMessage::Hello(crate::netsim::packet::Hello { hold_time: Some(105), generation_id: Some(2) });
    let actions = h.at(5).control(IF0, UPSTREAM, ALL_PIM_ROUTERS, msg);
    assert!(sets_timer(&actions, TimerKey::TriggeredHello(IF0)).is_some());
    assert_eq!(h.entry().downstream().interfaces(), vec![IF1]);
    assert_eq!(grafts(&actions, UPSTREAM), 0);
}

#[test]
fn local_receiver_joins_and_leaves() {
    let mut h = Harness::new();
    h.hello(IF0, UPSTREAM, 105);
    h.membership(Some(IF2), MembershipChange::Join);
    assert!(h.router.membership().has_local_receiver(GROUP, IF2));

    let actions = h.data(IF0, Some(UPSTREAM));
    assert_eq!(forwarded(&actions), vec![IF2]);
    assert_eq!(h.entry().state(), EntryState::Forward);

    // the last receiver leaves, and there is no neighbor on the interface
    let actions = h.at(10).membership(Some(IF2), MembershipChange::Leave);
    assert!(h.entry().downstream().is_empty());
    assert_eq!(h.entry().state(), EntryState::Prune);
    assert_eq!(join_prunes(&actions, JoinPruneKind::Prune, UPSTREAM), 1);

    // joining again grafts the entry
    let actions = h.at(20).membership(Some(IF2), MembershipChange::Join);
    assert_eq!(h.entry().downstream().interfaces(), vec![IF2]);
    assert_eq!(h.entry().state(), EntryState::AckPending);
    assert_eq!(grafts(&actions, UPSTREAM), 1);
}

#[test]
fn node_membership_prevents_prune() {
    let mut h = Harness::new();
    h.hello(IF0, UPSTREAM, 105);
    h.membership(None, MembershipChange::Join);
    let actions = h.data(IF0, Some(UPSTREAM));
    // every interface is a downstream of a group the router is a member of
    assert_eq!(forwarded(&actions), vec![IF1, IF2, IF3]);
    assert_eq!(h.entry().state(), EntryState::Forward);

    let actions = h.at(1).membership(None, MembershipChange::Leave);
    assert_eq!(h.entry().state(), EntryState::Forward);
    assert!(sent(&actions).is_empty());
}

#[test]
fn route_change_to_unreachable_deletes_entry() {
    let mut h = Harness::with_entry();
    let prefix = Prefix::new(Ipv4Addr::new(10, 1, 0, 0), 16);
    h.router.remove_route(prefix);
    let id = h.id();
    let actions = h.at(5).event(Event::RouteChange(id, prefix));
    assert!(h.router.get_entry(sg()).is_none());
    assert!(cancels_timer(&actions, TimerKey::Data(sg())));
    assert!(cancels_timer(&actions, TimerKey::GraftRetransmit(sg())));
}

#[test]
fn route_change_moves_upstream() {
    let mut h = Harness::with_entry();
    let new_upstream = Ipv4Addr::new(10, 0, 2, 2);
    h.hello(IF2, new_upstream, 105);
    assert_eq!(h.entry().downstream().interfaces(), vec![IF1, IF2]);

    let prefix = Prefix::new(Ipv4Addr::new(10, 1, 0, 0), 16);
    h.router
        .insert_route(prefix, Route { interface: IF2, next_hop: Some(new_upstream), preference: 110, metric: 5 })
        .unwrap();
    let id = h.id();
    let actions = h.at(5).event(Event::RouteChange(id, prefix));

    let entry = h.entry();
    assert_eq!(entry.upstream_interface(), Some(IF2));
    assert_eq!(entry.upstream(), Upstream::Neighbor(new_upstream));
    // the old upstream interface has a neighbor, and becomes a downstream
    assert_eq!(entry.downstream().interfaces(), vec![IF0, IF1]);
    assert_eq!(entry.state(), EntryState::AckPending);
    assert_eq!(grafts(&actions, new_upstream), 1);
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::SendControl { interface: IF2, .. })));
}

#[test]
fn corrupted_control_packet_is_dropped() {
    let mut h = Harness::with_entry();
    let id = h.id();
    let mut event = Event::control(
        id,
        IF1,
        Ipv4Addr::new(192, 0, 2, 1),
        ALL_PIM_ROUTERS,
        &PimMessage::Hello(Default::default()),
    )
    .unwrap();
    if let Event::Control { payload, .. } = &mut event {
        payload[1] = 0xff;
    }
    let mut actions = crate::netsim::event::ActionQueue::new();
    assert_eq!(h.router.handle_event(event, h.now, &mut actions), Ok(false));
    assert!(actions.is_empty());
}

#[test]
fn unicast_control_for_another_router() {
    let mut h = Harness::with_entry();
    let msg = PimMessage::Graft(crate::netsim::packet::JoinPrune::single(
        Ipv4Addr::new(192, 0, 2, 3),
        0,
        SOURCE,
        GROUP,
        JoinPruneKind::Join,
    ));
    let actions = h.control(IF1, Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 3), msg);
    assert!(actions.is_empty());
}
