use super::PingError;
use crate::resolver::AddressFamily;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpType};
use pnet::packet::icmpv6::{self, Icmpv6Packet};
use pnet::packet::util;
use pnet::packet::Packet;
use std::net::Ipv6Addr;

/// Type, code, checksum, identifier and sequence number.
pub const HEADER_SIZE: usize = 8;

pub const ICMPV4_ECHO_REQUEST: u8 = 8;
pub const ICMPV4_ECHO_REPLY: u8 = 0;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

// Checksum is the second 16 bit word of the header
const CHECKSUM_WORD: usize = 1;

/// An ICMP or ICMPv6 echo message. Both families share the same layout and only differ
/// by their type values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoPacket {
    pub ty: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Box<[u8]>,
}

fn request_type(family: AddressFamily) -> Result<u8, PingError> {
    match family {
        AddressFamily::Ipv4 => Ok(ICMPV4_ECHO_REQUEST),
        AddressFamily::Ipv6 => Ok(ICMPV6_ECHO_REQUEST),
        AddressFamily::Unspecified => Err(PingError::UnsupportedFamily),
    }
}

pub fn reply_type(family: AddressFamily) -> Option<u8> {
    match family {
        AddressFamily::Ipv4 => Some(ICMPV4_ECHO_REPLY),
        AddressFamily::Ipv6 => Some(ICMPV6_ECHO_REPLY),
        AddressFamily::Unspecified => None,
    }
}

/// Fills `size` bytes with a recognizable, repeating pattern.
pub fn payload_pattern(size: usize) -> Box<[u8]> {
    (0..size).map(|i| (i % 0x100) as u8).collect()
}

impl EchoPacket {
    /// Builds a sealed echo request for the given family.
    pub fn request(
        family: AddressFamily,
        identifier: u16,
        sequence: u16,
        payload: Box<[u8]>,
    ) -> Result<Self, PingError> {
        let mut packet = Self {
            ty: request_type(family)?,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
            payload,
        };
        packet.seal();
        Ok(packet)
    }

    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serializes the packet exactly as stored, checksum field included.
    pub fn encode(&self) -> Box<[u8]> {
        let mut buffer = vec![0u8; self.wire_size()];
        // The buffer always holds at least the header
        if let Some(mut echo) = MutableEchoRequestPacket::new(&mut buffer[..]) {
            echo.set_icmp_type(IcmpType::new(self.ty));
            echo.set_icmp_code(IcmpCode::new(self.code));
            echo.set_checksum(self.checksum);
            echo.set_identifier(self.identifier);
            echo.set_sequence_number(self.sequence);
            echo.set_payload(&self.payload);
        }
        buffer.into_boxed_slice()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let echo = EchoReplyPacket::new(data)?;
        Some(Self {
            ty: echo.get_icmp_type().0,
            code: echo.get_icmp_code().0,
            checksum: echo.get_checksum(),
            identifier: echo.get_identifier(),
            sequence: echo.get_sequence_number(),
            payload: echo.payload().into(),
        })
    }

    /// Recomputes the internet checksum over the packet with the checksum field zeroed.
    pub fn seal(&mut self) {
        self.checksum = 0;
        self.checksum = util::checksum(&self.encode(), CHECKSUM_WORD);
    }

    /// Recomputes the ICMPv6 checksum, which also covers the IPv6 pseudo-header.
    pub fn seal_v6(&mut self, source: &Ipv6Addr, destination: &Ipv6Addr) {
        self.checksum = 0;
        let encoded = self.encode();
        if let Some(packet) = Icmpv6Packet::new(&encoded) {
            self.checksum = icmpv6::checksum(&packet, source, destination);
        }
    }

    pub fn is_reply(&self, family: AddressFamily) -> bool {
        self.code == 0 && reply_type(family) == Some(self.ty)
    }
}

/// Checks the internet checksum of a raw ICMP message.
pub fn checksum_is_valid(data: &[u8]) -> bool {
    if data.len() < HEADER_SIZE {
        return false;
    }
    let stored = u16::from_be_bytes([data[2], data[3]]);
    util::checksum(data, CHECKSUM_WORD) == stored
}

/// Checks the checksum of a raw ICMPv6 message received from `source` on `destination`.
pub fn checksum_v6_is_valid(data: &[u8], source: &Ipv6Addr, destination: &Ipv6Addr) -> bool {
    match Icmpv6Packet::new(data) {
        Some(packet) if data.len() >= HEADER_SIZE => {
            icmpv6::checksum(&packet, source, destination) == packet.get_checksum()
        }
        _ => false,
    }
}
