//! Asynchronous ICMP echo against named hosts.
//!
//! A [`Pinger`] resolves a host name or IP literal, opens a raw ICMP socket of the
//! matching family and measures the time until the correlated echo reply arrives.
//! Raw sockets need elevated privileges (root or `CAP_NET_RAW` on Linux); failing to
//! get one is reported as [`PingError::SocketOpen`] and is never fatal.

pub mod configuration;
pub mod ping;
pub mod resolver;
pub mod service;

pub use configuration::{FamilyPreference, PingConfiguration};
pub use ping::icmp::{IcmpTransport, OngoingRequest, PingHandle, RequestState};
pub use ping::packet::EchoPacket;
pub use ping::{report, PingError};
pub use resolver::{AddressFamily, HostResolver, ResolvedAddress};
pub use service::{ping, ping_with_resolution, Pinger};
