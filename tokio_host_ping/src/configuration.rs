use crate::ping::packet::HEADER_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn field_from_args<T: std::str::FromStr>(
    args: &[String],
    field_name: &str,
) -> Result<Option<T>, String>
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    let pos = match args.iter().position(|r| r == field_name) {
        Some(pos) => pos + 1,
        None => return Ok(None),
    };
    if args.len() <= pos {
        return Err(format!("Empty {} value", field_name));
    }
    args[pos]
        .parse::<T>()
        .map(Some)
        .map_err(|e| format!("Failed to parse {} value: {:?}", field_name, e))
}

/// Which address family a host name may resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FamilyPreference {
    Any,
    Ipv4,
    Ipv6,
}

impl std::str::FromStr for FamilyPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "any" => Self::Any,
            "ipv4" | "4" => Self::Ipv4,
            "ipv6" | "6" => Self::Ipv6,
            _ => return Err(format!("Unknown address family {}", s)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingConfiguration {
    pub timeout: Duration,
    pub resolution_timeout: Duration,
    /// Full echo message size, ICMP header included.
    pub size: u16,
    pub ttl: Option<u32>,
    pub family: FamilyPreference,
}

impl Default for PingConfiguration {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            resolution_timeout: Duration::from_secs(5),
            size: 64,
            ttl: None,
            family: FamilyPreference::Any,
        }
    }
}

impl PingConfiguration {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        let default = Self::default();
        let timeout: Option<u64> = field_from_args(args, "--timeout")?;
        let resolution_timeout: Option<u64> = field_from_args(args, "--resolution_timeout")?;
        let size: Option<u16> = field_from_args(args, "--size")?;
        let ttl: Option<u32> = field_from_args(args, "--ttl")?;
        let family: Option<FamilyPreference> = field_from_args(args, "--family")?;

        Ok(Self {
            timeout: timeout.map_or(default.timeout, Duration::from_millis),
            resolution_timeout: resolution_timeout
                .map_or(default.resolution_timeout, Duration::from_millis),
            size: size.unwrap_or(default.size),
            ttl: ttl.or(default.ttl),
            family: family.unwrap_or(default.family),
        })
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bytes following the echo header.
    pub fn payload_size(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }
}
