use crate::topic::Address;
use core::fmt;
use time::OffsetDateTime;

/// Which dongle a message concerns; `any` is the discovery wildcard.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Scope {
    Any,
    Device(String),
}

impl Scope {
    pub const ANY: &'static str = "any";

    pub fn parse(raw: &str) -> Self {
        if raw == Self::ANY {
            Scope::Any
        } else {
            Scope::Device(raw.to_string())
        }
    }

    pub fn device(id: impl Into<String>) -> Self {
        Self::parse(&id.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Scope::Any => Self::ANY,
            Scope::Device(id) => id,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Scope::Any)
    }

    /// Whether traffic carrying `other` passes a filter configured with `self`.
    pub fn accepts(&self, other: &Scope) -> bool {
        self.is_any() || self == other
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    /// client -> dongle
    In,
    /// dongle -> client
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intent of a message. Firmware verbs outside the known set are kept verbatim.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Verb {
    Get,
    Set,
    Unset,
    Info,
    Other(String),
}

impl Verb {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "get" => Verb::Get,
            "set" => Verb::Set,
            "unset" => Verb::Unset,
            "info" => Verb::Info,
            other => Verb::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Verb::Get => "get",
            Verb::Set => "set",
            Verb::Unset => "unset",
            Verb::Info => "info",
            Verb::Other(raw) => raw,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(OffsetDateTime::now_utc())
    }
}

/// A message accepted by a transport's receive path.
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    pub address: Address,
    pub payload: Vec<u8>,
    pub received_at: Timestamp,
}

impl Inbound {
    pub fn new(address: Address, payload: Vec<u8>) -> Self {
        Self {
            address,
            payload,
            received_at: Timestamp::now(),
        }
    }
}

/// What a receive path pushes onto the session channel.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Message(Inbound),
    /// Non-protocol text the dongle interleaves on the serial line.
    DeviceLog(String),
}

#[derive(Clone, Debug)]
pub struct PortInfo {
    pub name: String,
    pub driver: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_wildcard_accepts_everything() {
        assert!(Scope::Any.accepts(&Scope::device("rfquack")));
        assert!(Scope::device("a").accepts(&Scope::device("a")));
        assert!(!Scope::device("a").accepts(&Scope::device("b")));
        assert!(!Scope::device("a").accepts(&Scope::Any));
    }

    #[test]
    fn any_literal_parses_to_wildcard() {
        assert_eq!(Scope::parse("any"), Scope::Any);
        assert_eq!(Scope::device("any"), Scope::Any);
        assert_eq!(Scope::parse("rfquack").to_string(), "rfquack");
    }

    #[test]
    fn unknown_verbs_survive() {
        assert_eq!(Verb::parse("info"), Verb::Info);
        assert_eq!(Verb::parse("reset").as_str(), "reset");
    }
}
