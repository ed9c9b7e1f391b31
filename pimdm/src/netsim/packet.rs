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

//! # PIMv2 Wire Codec
//!
//! Encoding and decoding of the PIM control messages used in dense mode: Hello, Join/Prune,
//! Assert, Graft and Graft-Ack. All fields are in network byte order. Every message starts with
//! the common header
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |PIM Ver| Type  |   Reserved    |           Checksum            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The checksum is the 16-bit one's complement of the one's complement sum of the whole message,
//! computed with the checksum field set to zero.

use std::convert::TryFrom;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::netsim::{Group, Source};

/// Version of PIM written into every header
pub const PIM_VERSION: u8 = 2;

const HEADER_LEN: usize = 4;
const ADDRESS_FAMILY_IPV4: u8 = 1;
const NATIVE_ENCODING: u8 = 0;
const RPT_BIT: u32 = 0x8000_0000;

const OPTION_HOLDTIME: u16 = 1;
const OPTION_GENERATION_ID: u16 = 20;

/// Errors raised while decoding a control packet
#[derive(Error, Debug, PartialEq, Clone)]
pub enum PacketError {
    /// The packet ended before all fields were read
    #[error("Packet is truncated")]
    Truncated,
    /// The version in the header is not 2
    #[error("Invalid PIM version: {0}")]
    InvalidVersion(u8),
    /// The message type is not used in dense mode
    #[error("Unknown message type: {0}")]
    UnknownType(u8),
    /// The checksum does not match
    #[error("Invalid checksum: expected {expected:#06x}, found {found:#06x}")]
    InvalidChecksum {
        /// Checksum computed over the received packet
        expected: u16,
        /// Checksum stored in the header
        found: u16,
    },
    /// Encoded address with a family other than IPv4
    #[error("Invalid address family: {0}")]
    InvalidAddressFamily(u8),
    /// Encoded address with a non-native encoding
    #[error("Invalid address encoding: {0}")]
    InvalidEncoding(u8),
    /// Hello option whose length exceeds the packet
    #[error("Malformed Hello option of type {0}")]
    MalformedOption(u16),
    /// Bytes left over after the message body
    #[error("{0} trailing bytes after the message")]
    TrailingBytes(usize),
    /// A count does not fit into its field of the message
    #[error("Too many {field} in one message: {count}")]
    TooManyRecords {
        /// Name of the counted records
        field: &'static str,
        /// Number of records
        count: usize,
    },
}

/// PIM message type, the low nibble of the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Hello
    Hello = 0,
    /// Join/Prune
    JoinPrune = 3,
    /// Assert
    Assert = 5,
    /// Graft
    Graft = 6,
    /// Graft-Ack
    GraftAck = 7,
}

impl TryFrom<u8> for MessageType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Hello),
            3 => Ok(Self::JoinPrune),
            5 => Ok(Self::Assert),
            6 => Ok(Self::Graft),
            7 => Ok(Self::GraftAck),
            t => Err(PacketError::UnknownType(t)),
        }
    }
}

/// PIM control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PimMessage {
    /// Hello
    Hello(Hello),
    /// Join/Prune
    JoinPrune(JoinPrune),
    /// Graft, sharing the Join/Prune body
    Graft(JoinPrune),
    /// Graft-Ack, echoing the Graft body
    GraftAck(JoinPrune),
    /// Assert
    Assert(Assert),
}

impl PimMessage {
    /// Type of the message
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Hello(_) => MessageType::Hello,
            Self::JoinPrune(_) => MessageType::JoinPrune,
            Self::Graft(_) => MessageType::Graft,
            Self::GraftAck(_) => MessageType::GraftAck,
            Self::Assert(_) => MessageType::Assert,
        }
    }

    /// Encode the message, including the header and the checksum. Fails if a Join/Prune carries
    /// more group or source records than its count fields can hold.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut buf = vec![(PIM_VERSION << 4) | self.message_type() as u8, 0, 0, 0];
        match self {
            Self::Hello(m) => m.encode_body(&mut buf),
            Self::JoinPrune(m) | Self::Graft(m) | Self::GraftAck(m) => m.encode_body(&mut buf)?,
            Self::Assert(m) => m.encode_body(&mut buf),
        }
        let checksum = checksum(&buf);
        buf[2..4].copy_from_slice(&checksum.to_be_bytes());
        Ok(buf)
    }

    /// Decode a message, validating the header and the checksum
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_LEN {
            return Err(PacketError::Truncated);
        }
        let version = data[0] >> 4;
        if version != PIM_VERSION {
            return Err(PacketError::InvalidVersion(version));
        }
        let message_type = MessageType::try_from(data[0] & 0x0f)?;

        let found = u16::from_be_bytes([data[2], data[3]]);
        let mut zeroed = data.to_vec();
        zeroed[2] = 0;
        zeroed[3] = 0;
        let expected = checksum(&zeroed);
        if expected != found {
            return Err(PacketError::InvalidChecksum { expected, found });
        }

        let mut r = Reader::new(&data[HEADER_LEN..]);
        let message = match message_type {
            MessageType::Hello => Self::Hello(Hello::decode_body(&mut r)?),
            MessageType::JoinPrune => Self::JoinPrune(JoinPrune::decode_body(&mut r)?),
            MessageType::Graft => Self::Graft(JoinPrune::decode_body(&mut r)?),
            MessageType::GraftAck => Self::GraftAck(JoinPrune::decode_body(&mut r)?),
            MessageType::Assert => Self::Assert(Assert::decode_body(&mut r)?),
        };
        if !r.is_empty() {
            return Err(PacketError::TrailingBytes(r.len()));
        }
        Ok(message)
    }
}

impl fmt::Display for PimMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hello(h) => write!(f, "Hello(hold={:?}, gen={:?})", h.hold_time, h.generation_id),
            Self::JoinPrune(m) => write!(f, "JoinPrune(to={}, hold={})", m.upstream_neighbor, m.hold_time),
            Self::Graft(m) => write!(f, "Graft(to={})", m.upstream_neighbor),
            Self::GraftAck(m) => write!(f, "GraftAck(to={})", m.upstream_neighbor),
            Self::Assert(a) => write!(
                f,
                "Assert(({}, {}), pref={}, metric={})",
                a.source, a.group, a.preference, a.metric
            ),
        }
    }
}

/// Hello message. Only the options used in dense mode are kept, all others are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hello {
    /// Holdtime option (seconds)
    pub hold_time: Option<u16>,
    /// Generation ID option
    pub generation_id: Option<u32>,
}

impl Hello {
    fn encode_body(&self, buf: &mut Vec<u8>) {
        if let Some(hold) = self.hold_time {
            buf.extend_from_slice(&OPTION_HOLDTIME.to_be_bytes());
            buf.extend_from_slice(&2u16.to_be_bytes());
            buf.extend_from_slice(&hold.to_be_bytes());
        }
        if let Some(gen) = self.generation_id {
            buf.extend_from_slice(&OPTION_GENERATION_ID.to_be_bytes());
            buf.extend_from_slice(&4u16.to_be_bytes());
            buf.extend_from_slice(&gen.to_be_bytes());
        }
    }

    fn decode_body(r: &mut Reader) -> Result<Self, PacketError> {
        let mut hello = Self::default();
        while !r.is_empty() {
            let option = r.u16()?;
            let len = r.u16()? as usize;
            let value = r.take(len).map_err(|_| PacketError::MalformedOption(option))?;
            match (option, len) {
                (OPTION_HOLDTIME, 2) => hello.hold_time = Some(u16::from_be_bytes([value[0], value[1]])),
                (OPTION_GENERATION_ID, 4) => {
                    hello.generation_id =
                        Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]))
                }
                (OPTION_HOLDTIME, _) | (OPTION_GENERATION_ID, _) => {
                    return Err(PacketError::MalformedOption(option))
                }
                _ => {}
            }
        }
        Ok(hello)
    }
}

/// Kind of a source entry in a Join/Prune message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinPruneKind {
    /// Joined source
    Join,
    /// Pruned source
    Prune,
}

impl fmt::Display for JoinPruneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join => write!(f, "Join"),
            Self::Prune => write!(f, "Prune"),
        }
    }
}

/// Per-group record of a Join/Prune message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    /// Multicast group
    pub group: Group,
    /// Joined sources
    pub joins: Vec<Source>,
    /// Pruned sources
    pub prunes: Vec<Source>,
}

/// Join/Prune message body, also used by Graft and Graft-Ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPrune {
    /// Router which the message is addressed to
    pub upstream_neighbor: Ipv4Addr,
    /// Holdtime in seconds
    pub hold_time: u16,
    /// Group records
    pub groups: Vec<GroupRecord>,
}

impl JoinPrune {
    /// Message carrying exactly one `(S, G)` pair, as it is sent by dense mode.
    pub fn single(
        upstream_neighbor: Ipv4Addr,
        hold_time: u16,
        source: Source,
        group: Group,
        kind: JoinPruneKind,
    ) -> Self {
        let (joins, prunes) = match kind {
            JoinPruneKind::Join => (vec![source], Vec::new()),
            JoinPruneKind::Prune => (Vec::new(), vec![source]),
        };
        Self { upstream_neighbor, hold_time, groups: vec![GroupRecord { group, joins, prunes }] }
    }

    /// Iterate over all `(source, group, kind)` triples, joins of a group before its prunes.
    pub fn entries(&self) -> impl Iterator<Item = (Source, Group, JoinPruneKind)> + '_ {
        self.groups.iter().flat_map(|g| {
            g.joins
                .iter()
                .map(move |s| (*s, g.group, JoinPruneKind::Join))
                .chain(g.prunes.iter().map(move |s| (*s, g.group, JoinPruneKind::Prune)))
        })
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), PacketError> {
        encode_unicast(buf, self.upstream_neighbor);
        buf.push(0);
        buf.push(record_count::<u8>("groups", self.groups.len())?);
        buf.extend_from_slice(&self.hold_time.to_be_bytes());
        for record in self.groups.iter() {
            encode_group(buf, record.group);
            let joins: u16 = record_count("joined sources", record.joins.len())?;
            let prunes: u16 = record_count("pruned sources", record.prunes.len())?;
            buf.extend_from_slice(&joins.to_be_bytes());
            buf.extend_from_slice(&prunes.to_be_bytes());
            record.joins.iter().chain(record.prunes.iter()).for_each(|s| encode_source(buf, *s));
        }
        Ok(())
    }

    fn decode_body(r: &mut Reader) -> Result<Self, PacketError> {
        let upstream_neighbor = decode_unicast(r)?;
        r.u8()?;
        let num_groups = r.u8()?;
        let hold_time = r.u16()?;
        let mut groups = Vec::with_capacity(num_groups as usize);
        for _ in 0..num_groups {
            let group = decode_group(r)?;
            let num_joins = r.u16()?;
            let num_prunes = r.u16()?;
            let joins = (0..num_joins).map(|_| decode_source(r)).collect::<Result<Vec<_>, _>>()?;
            let prunes = (0..num_prunes).map(|_| decode_source(r)).collect::<Result<Vec<_>, _>>()?;
            groups.push(GroupRecord { group, joins, prunes });
        }
        Ok(Self { upstream_neighbor, hold_time, groups })
    }
}

/// Assert message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assert {
    /// Multicast group
    pub group: Group,
    /// Source address
    pub source: Source,
    /// RPT bit, always false in dense mode
    pub rpt: bool,
    /// Preference of the route to the source (31 bits)
    pub preference: u32,
    /// Metric of the route to the source
    pub metric: u32,
}

impl Assert {
    fn encode_body(&self, buf: &mut Vec<u8>) {
        encode_group(buf, self.group);
        encode_unicast(buf, self.source);
        let mut pref = self.preference & !RPT_BIT;
        if self.rpt {
            pref |= RPT_BIT;
        }
        buf.extend_from_slice(&pref.to_be_bytes());
        buf.extend_from_slice(&self.metric.to_be_bytes());
    }

    fn decode_body(r: &mut Reader) -> Result<Self, PacketError> {
        let group = decode_group(r)?;
        let source = decode_unicast(r)?;
        let pref = r.u32()?;
        let metric = r.u32()?;
        Ok(Self { group, source, rpt: pref & RPT_BIT != 0, preference: pref & !RPT_BIT, metric })
    }
}

/// Compute the internet checksum of a buffer. An odd trailing byte is padded with zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|c| match c {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Convert a record count into the width of its field.
fn record_count<T: TryFrom<usize>>(field: &'static str, count: usize) -> Result<T, PacketError> {
    T::try_from(count).map_err(|_| PacketError::TooManyRecords { field, count })
}

fn encode_unicast(buf: &mut Vec<u8>, addr: Ipv4Addr) {
    buf.push(ADDRESS_FAMILY_IPV4);
    buf.push(NATIVE_ENCODING);
    buf.extend_from_slice(&addr.octets());
}

fn encode_group(buf: &mut Vec<u8>, addr: Ipv4Addr) {
    buf.extend_from_slice(&[ADDRESS_FAMILY_IPV4, NATIVE_ENCODING, 0, 32]);
    buf.extend_from_slice(&addr.octets());
}

fn encode_source(buf: &mut Vec<u8>, addr: Ipv4Addr) {
    // S, W and R bits are all zero in dense mode
    buf.extend_from_slice(&[ADDRESS_FAMILY_IPV4, NATIVE_ENCODING, 0, 32]);
    buf.extend_from_slice(&addr.octets());
}

fn decode_family(r: &mut Reader) -> Result<(), PacketError> {
    let family = r.u8()?;
    if family != ADDRESS_FAMILY_IPV4 {
        return Err(PacketError::InvalidAddressFamily(family));
    }
    let encoding = r.u8()?;
    if encoding != NATIVE_ENCODING {
        return Err(PacketError::InvalidEncoding(encoding));
    }
    Ok(())
}

fn decode_unicast(r: &mut Reader) -> Result<Ipv4Addr, PacketError> {
    decode_family(r)?;
    r.addr()
}

fn decode_group(r: &mut Reader) -> Result<Ipv4Addr, PacketError> {
    decode_family(r)?;
    // flags and mask length
    r.take(2)?;
    r.addr()
}

fn decode_source(r: &mut Reader) -> Result<Ipv4Addr, PacketError> {
    decode_group(r)
}

/// Cursor over a received buffer
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        if self.data.len() < n {
            return Err(PacketError::Truncated);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, PacketError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, PacketError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn addr(&mut self) -> Result<Ipv4Addr, PacketError> {
        Ok(Ipv4Addr::from(self.u32()?))
    }
}
