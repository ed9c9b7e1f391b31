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

//! Test the simulated network, with several routers exchanging real messages.

use crate::netsim::assert::AssertState;
use crate::netsim::cache::EntryState;
use crate::netsim::config::PimDmConfig;
use crate::netsim::event::{Event, EventQueue, TimerKey};
use crate::netsim::printer;
use crate::netsim::{
    Group, InterfaceId, MembershipChange, Network, NetworkError, Prefix, RouterId, SegmentId,
    SgPair, Upstream,
};
use lazy_static::lazy_static;
use std::net::Ipv4Addr;
use std::time::Duration;

lazy_static! {
    static ref R1: RouterId = 0.into();
    static ref R2: RouterId = 1.into();
    static ref R3: RouterId = 2.into();
    static ref SRC: SegmentId = 3.into();
    static ref CORE1: SegmentId = 4.into();
    static ref CORE2: SegmentId = 5.into();
    static ref LAN2: SegmentId = 6.into();
    static ref LAN3: SegmentId = 7.into();
}

const S: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 100);
const H2: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 100);
const H3: Ipv4Addr = Ipv4Addr::new(10, 0, 3, 100);
const G: Group = Ipv4Addr::new(239, 1, 1, 1);

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn sg() -> SgPair {
    SgPair::new(S, G)
}

/// # Chain network
///
/// ```text
///   S                 H2                H3
///   |                 |                 |
/// [src] -- R1 -- [core1] -- R2 -- [core2] -- R3 -- [lan3]
///                           |
///                        [lan2]
/// ```
fn get_chain_net() -> Network {
    let _ = pretty_env_logger::try_init();
    let mut net = Network::new();

    assert_eq!(*R1, net.add_router("R1"));
    assert_eq!(*R2, net.add_router("R2"));
    assert_eq!(*R3, net.add_router("R3"));
    assert_eq!(*SRC, net.add_segment("src", Prefix::new(Ipv4Addr::new(10, 0, 1, 0), 24)));
    assert_eq!(*CORE1, net.add_segment("core1", Prefix::new(Ipv4Addr::new(10, 0, 12, 0), 24)));
    assert_eq!(*CORE2, net.add_segment("core2", Prefix::new(Ipv4Addr::new(10, 0, 23, 0), 24)));
    assert_eq!(*LAN2, net.add_segment("lan2", Prefix::new(Ipv4Addr::new(10, 0, 2, 0), 24)));
    assert_eq!(*LAN3, net.add_segment("lan3", Prefix::new(Ipv4Addr::new(10, 0, 3, 0), 24)));

    assert_eq!(net.connect(*R1, *SRC, Ipv4Addr::new(10, 0, 1, 1)), Ok(InterfaceId(0)));
    assert_eq!(net.connect(*R1, *CORE1, Ipv4Addr::new(10, 0, 12, 1)), Ok(InterfaceId(1)));
    assert_eq!(net.connect(*R2, *CORE1, Ipv4Addr::new(10, 0, 12, 2)), Ok(InterfaceId(0)));
    assert_eq!(net.connect(*R2, *CORE2, Ipv4Addr::new(10, 0, 23, 2)), Ok(InterfaceId(1)));
    assert_eq!(net.connect(*R2, *LAN2, Ipv4Addr::new(10, 0, 2, 1)), Ok(InterfaceId(2)));
    assert_eq!(net.connect(*R3, *CORE2, Ipv4Addr::new(10, 0, 23, 3)), Ok(InterfaceId(0)));
    assert_eq!(net.connect(*R3, *LAN3, Ipv4Addr::new(10, 0, 3, 1)), Ok(InterfaceId(1)));

    net.add_host(*SRC, S).unwrap();
    net.add_host(*LAN2, H2).unwrap();
    net.add_host(*LAN3, H3).unwrap();

    net
}

/// Chain network, started and with all neighbors discovered.
fn get_running_chain_net() -> Network {
    let mut net = get_chain_net();
    net.start().unwrap();
    net.run_for(secs(10)).unwrap();
    net
}

fn state(net: &Network, router: RouterId) -> EntryState {
    net.get_router(router).unwrap().get_entry(sg()).unwrap().state()
}

#[test]
fn test_neighbor_discovery() {
    let net = get_running_chain_net();
    let r2 = net.get_router(*R2).unwrap();
    assert!(r2.neighbors(InterfaceId(0)).unwrap().contains(Ipv4Addr::new(10, 0, 12, 1)));
    assert!(r2.neighbors(InterfaceId(1)).unwrap().contains(Ipv4Addr::new(10, 0, 23, 3)));
    assert!(r2.neighbors(InterfaceId(2)).unwrap().is_empty());
    assert_eq!(net.get_router(*R1).unwrap().neighbors(InterfaceId(0)).unwrap().len(), 0);
    assert!(net.num_events() > 0);
}

#[test]
fn test_unicast_routing() {
    let mut net = get_running_chain_net();

    let r1 = net.get_router(*R1).unwrap();
    let (prefix, route) = r1.rib().lookup(H3).unwrap();
    assert_eq!(*prefix, Prefix::new(Ipv4Addr::new(10, 0, 3, 0), 24));
    assert_eq!(route.interface, InterfaceId(1));
    assert_eq!(route.next_hop, Some(Ipv4Addr::new(10, 0, 12, 2)));
    assert_eq!(route.metric, 3);

    let (_, route) = r1.rib().lookup(S).unwrap();
    assert_eq!(route.interface, InterfaceId(0));
    assert_eq!(route.next_hop, None);
    assert_eq!(route.metric, 1);
    assert_eq!(r1.rib().len(), 5);

    net.set_interface_config(*R1, InterfaceId(1), 5, false).unwrap();
    let (_, route) = net.get_router(*R1).unwrap().rib().lookup(H3).unwrap();
    assert_eq!(route.metric, 7);
}

#[test]
fn test_flood_and_prune() {
    let mut net = get_running_chain_net();
    net.join(H2, G).unwrap();
    net.run_for(secs(1)).unwrap();

    net.send_data(S, G).unwrap();
    net.run_for(secs(1)).unwrap();

    assert_eq!(net.num_received(H2, G), 1);
    assert_eq!(net.num_received(H3, G), 0);

    // R3 has no receiver and prunes itself off the tree
    assert_eq!(state(&net, *R1), EntryState::Forward);
    assert_eq!(state(&net, *R2), EntryState::Forward);
    assert_eq!(state(&net, *R3), EntryState::Prune);
    let r2_entry = net.get_router(*R2).unwrap().get_entry(sg()).unwrap();
    assert!(r2_entry.downstream().get(InterfaceId(1)).unwrap().is_pruned);
    assert!(!r2_entry.downstream().get(InterfaceId(2)).unwrap().is_pruned);
    assert_eq!(r2_entry.upstream(), Upstream::Neighbor(Ipv4Addr::new(10, 0, 12, 1)));

    let r1_entry = net.get_router(*R1).unwrap().get_entry(sg()).unwrap();
    assert_eq!(r1_entry.upstream(), Upstream::Connected);

    // the next packet does not reach R3 anymore
    let r3_expiration = net.get_router(*R3).unwrap().get_entry(sg()).unwrap().expiration();
    net.send_data(S, G).unwrap();
    net.run_for(secs(1)).unwrap();
    assert_eq!(net.num_received(H2, G), 2);
    assert_eq!(net.get_router(*R3).unwrap().get_entry(sg()).unwrap().expiration(), r3_expiration);
}

#[test]
fn test_graft_on_join() {
    let mut net = get_running_chain_net();
    net.join(H2, G).unwrap();
    net.run_for(secs(1)).unwrap();
    net.send_data(S, G).unwrap();
    net.run_for(secs(1)).unwrap();
    assert_eq!(state(&net, *R3), EntryState::Prune);

    net.join(H3, G).unwrap();
    net.run_for(secs(1)).unwrap();
    assert_eq!(state(&net, *R3), EntryState::Forward);
    let r2_entry = net.get_router(*R2).unwrap().get_entry(sg()).unwrap();
    assert!(!r2_entry.downstream().get(InterfaceId(1)).unwrap().is_pruned);

    net.send_data(S, G).unwrap();
    net.run_for(secs(1)).unwrap();
    assert_eq!(net.num_received(H3, G), 1);
    assert_eq!(net.num_received(H2, G), 2);
}

#[test]
fn test_leave_prunes_branch() {
    let mut net = get_running_chain_net();
    net.join(H2, G).unwrap();
    net.join(H3, G).unwrap();
    net.run_for(secs(1)).unwrap();
    net.send_data(S, G).unwrap();
    net.run_for(secs(1)).unwrap();
    assert_eq!(net.num_received(H3, G), 1);
    assert_eq!(state(&net, *R3), EntryState::Forward);

    net.leave(H3, G).unwrap();
    net.run_for(secs(1)).unwrap();
    assert_eq!(state(&net, *R3), EntryState::Prune);

    net.send_data(S, G).unwrap();
    net.run_for(secs(1)).unwrap();
    assert_eq!(net.num_received(H3, G), 1);
    assert_eq!(net.num_received(H2, G), 2);
}

#[test]
fn test_router_membership() {
    let mut net = get_running_chain_net();
    net.router_membership(*R3, G, MembershipChange::Join).unwrap();
    net.run_for(secs(1)).unwrap();
    net.send_data(S, G).unwrap();
    net.run_for(secs(1)).unwrap();

    // nobody on the LANs joined, but R3 itself wants the traffic
    assert_eq!(state(&net, *R3), EntryState::Forward);
    assert_eq!(state(&net, *R2), EntryState::Forward);
    assert_eq!(net.num_received(H3, G), 0);
}

#[test]
fn test_data_timeout() {
    let mut net = get_running_chain_net();
    net.join(H2, G).unwrap();
    net.run_for(secs(1)).unwrap();
    net.send_data(S, G).unwrap();
    net.run_for(secs(100)).unwrap();
    assert!(net.get_router(*R1).unwrap().get_entry(sg()).is_some());

    net.run_for(secs(200)).unwrap();
    for r in [*R1, *R2, *R3].iter() {
        assert!(net.get_router(*r).unwrap().get_entry(sg()).is_none());
    }
}

#[test]
fn test_neighbor_timeout() {
    let mut net = get_running_chain_net();
    net.disconnect(*R3, InterfaceId(0)).unwrap();
    net.run_for(secs(60)).unwrap();
    let r3_addr = Ipv4Addr::new(10, 0, 23, 3);
    assert!(net.get_router(*R2).unwrap().neighbors(InterfaceId(1)).unwrap().contains(r3_addr));
    net.run_for(secs(60)).unwrap();
    assert!(net.get_router(*R2).unwrap().neighbors(InterfaceId(1)).unwrap().is_empty());

    // R2 lost its route to lan3
    assert!(net.get_router(*R2).unwrap().rib().lookup(H3).is_none());
}

#[test]
fn test_printer() {
    let mut net = get_running_chain_net();
    net.join(H2, G).unwrap();
    net.run_for(secs(1)).unwrap();
    net.send_data(S, G).unwrap();
    net.run_for(secs(1)).unwrap();

    let entry = net.get_router(*R2).unwrap().get_entry(sg()).unwrap();
    assert_eq!(
        printer::entry(entry),
        "(10.0.1.100, 239.1.1.1): FORWARD, upstream: 10.0.12.1 via if0, downstream: [if1 (pruned), if2 (fwd)]"
    );
    let cache = printer::forwarding_cache(&net, *R3).unwrap();
    assert!(cache.starts_with("Forwarding cache of R3:"));
    assert!(cache.contains("PRUNE"));
}

#[test]
fn test_network_errors() {
    let mut net = get_chain_net();
    assert_eq!(
        net.connect(*R3, *LAN2, Ipv4Addr::new(10, 0, 2, 1)),
        Err(NetworkError::AddressInUse(Ipv4Addr::new(10, 0, 2, 1)))
    );
    assert_eq!(net.add_host(*LAN2, H3), Err(NetworkError::AddressInUse(H3)));
    let unknown = Ipv4Addr::new(172, 16, 0, 1);
    assert_eq!(net.send_data(unknown, G), Err(NetworkError::UnknownAddress(unknown)));
    assert_eq!(net.join(unknown, G), Err(NetworkError::UnknownAddress(unknown)));
    assert_eq!(net.get_router_id("R2"), Ok(*R2));
    assert_eq!(net.get_router_id("R9"), Err(NetworkError::DeviceNameNotFound("R9".to_string())));
    assert_eq!(net.get_interface(*R2, *LAN2), Ok(InterfaceId(2)));
    assert_eq!(net.get_interface(*R1, *LAN2), Err(NetworkError::DeviceNotFound(*R1)));
}

#[test]
fn test_no_convergence() {
    let mut net = get_chain_net();
    net.set_msg_limit(Some(3));
    net.start().unwrap();
    assert_eq!(net.run_for(secs(1)), Err(NetworkError::NoConvergence(3)));
}

#[test]
fn test_mixed_assert_optimization() {
    let mut net = Network::new();
    let r1 = net.add_router("R1");
    let config = PimDmConfig { assert_optimization: true, ..Default::default() };
    let r2 = net.add_router_with_config("R2", config);
    assert!(r1 < r2);
    assert_eq!(net.start(), Err(NetworkError::MixedAssertOptimization(r2)));
}

/// # LAN network
///
/// ```text
///         S
///         |
///   .---[src]---.
///   |           |
///   R1          R2
///   |           |
///   '---[lan]---'
///         |
///         H
/// ```
#[test]
fn test_lan_assert() {
    let _ = pretty_env_logger::try_init();
    let mut net = Network::new();
    let r1 = net.add_router("R1");
    let r2 = net.add_router("R2");
    let src = net.add_segment("src", Prefix::new(Ipv4Addr::new(10, 0, 1, 0), 24));
    let lan = net.add_segment("lan", Prefix::new(Ipv4Addr::new(10, 0, 2, 0), 24));
    net.connect(r1, src, Ipv4Addr::new(10, 0, 1, 1)).unwrap();
    net.connect(r1, lan, Ipv4Addr::new(10, 0, 2, 1)).unwrap();
    net.connect(r2, src, Ipv4Addr::new(10, 0, 1, 2)).unwrap();
    net.connect(r2, lan, Ipv4Addr::new(10, 0, 2, 2)).unwrap();
    let h = Ipv4Addr::new(10, 0, 2, 100);
    net.add_host(src, S).unwrap();
    net.add_host(lan, h).unwrap();

    net.start().unwrap();
    net.join(h, G).unwrap();
    net.run_for(secs(10)).unwrap();

    // both routers forward the first packet, then the higher address wins the assert
    net.send_data(S, G).unwrap();
    net.run_for(secs(1)).unwrap();
    assert_eq!(net.num_received(h, G), 2);

    let slot = |router: RouterId| {
        let lan_if = net.get_interface(router, lan).unwrap();
        let entry = net.get_router(router).unwrap().get_entry(sg()).unwrap();
        entry.downstream().get(lan_if).unwrap().assert.clone()
    };
    let r1_slot = slot(r1);
    assert_eq!(r1_slot.state, AssertState::ILostAssert);
    assert_eq!(r1_slot.winner.address, Ipv4Addr::new(10, 0, 2, 2));

    assert_eq!(slot(r2).state, AssertState::IWonAssert);

    // no more duplicates
    net.send_data(S, G).unwrap();
    net.run_for(secs(1)).unwrap();
    assert_eq!(net.num_received(h, G), 3);
}

#[test]
fn test_event_queue() {
    let r = RouterId::new(0);
    let key = TimerKey::Hello(InterfaceId(0));
    let mut queue = EventQueue::new();

    queue.push(secs(5), Event::Timer(r, key));
    queue.push(secs(3), Event::Timer(r, key));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.timer_deadline(r, key), Some(secs(3)));

    // events of the same time are handled in order
    queue.push(secs(3), Event::Start(r));
    queue.push(secs(1), Event::RouteChange(r, Prefix::new(Ipv4Addr::UNSPECIFIED, 0)));
    assert_eq!(queue.peek_time(), Some(secs(1)));
    assert!(matches!(queue.pop(), Some((_, Event::RouteChange(_, _)))));
    assert_eq!(queue.pop(), Some((secs(3), Event::Timer(r, key))));
    assert_eq!(queue.pop(), Some((secs(3), Event::Start(r))));
    assert!(queue.is_empty());

    // cancelling
    queue.push(secs(10), Event::Timer(r, key));
    assert!(queue.cancel(r, key));
    assert!(!queue.cancel(r, key));
    assert_eq!(queue.pop(), None);
}
