//! Hierarchical addresses shared by every transport:
//!
//! `<scope>/<direction>/<verb>/<module>/<message_type>(/<args>)*`
//!
//! MQTT uses the address verbatim as a topic; the serial framing carries it as the first
//! half of each frame.

use crate::{Direction, Scope, TopicError, Verb};
use core::fmt;

pub const SEP: char = '/';

/// Namespace prefix every protobuf type name carries on the wire (`rfquack_Packet`).
pub const MESSAGE_TYPE_PREFIX: &str = "rfquack_";

pub const MIN_SEGMENTS: usize = 5;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Address {
    scope: Scope,
    direction: Direction,
    verb: Verb,
    module: String,
    message_type: String,
    args: Vec<String>,
}

impl Address {
    pub fn new(
        scope: Scope,
        direction: Direction,
        verb: Verb,
        module: impl Into<String>,
        message_type: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            scope,
            direction,
            verb,
            module: module.into(),
            message_type: message_type.into(),
            args,
        }
    }

    pub fn parse(raw: &[u8]) -> Result<Self, TopicError> {
        let raw = std::str::from_utf8(raw).map_err(|_| TopicError::NotUtf8)?;
        let segments: Vec<&str> = raw.split(SEP).collect();
        if segments.len() < MIN_SEGMENTS {
            return Err(TopicError::TooFewSegments(segments.len()));
        }
        let direction = Direction::parse(segments[1])
            .ok_or_else(|| TopicError::InvalidDirection(segments[1].to_string()))?;
        Ok(Self {
            scope: Scope::parse(segments[0]),
            direction,
            verb: Verb::parse(segments[2]),
            module: segments[3].to_string(),
            message_type: segments[4].to_string(),
            args: segments[5..].iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn verb(&self) -> &Verb {
        &self.verb
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Message type with the wire namespace prefix removed (`Packet` for `rfquack_Packet`).
    pub fn local_type_name(&self) -> &str {
        strip_type_prefix(&self.message_type)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEP}{}{SEP}{}{SEP}{}{SEP}{}",
            self.scope, self.direction, self.verb, self.module, self.message_type
        )?;
        for arg in &self.args {
            write!(f, "{SEP}{arg}")?;
        }
        Ok(())
    }
}

pub fn strip_type_prefix(message_type: &str) -> &str {
    message_type
        .strip_prefix(MESSAGE_TYPE_PREFIX)
        .unwrap_or(message_type)
}

/// Outgoing topic. `args` follow the module verbatim: `[message_type, command]` for a
/// set, `[attribute]` for a get.
pub fn build(scope: &Scope, direction: Direction, verb: &Verb, module: &str, args: &[&str]) -> String {
    let mut out = format!("{scope}{SEP}{direction}{SEP}{verb}{SEP}{module}");
    for arg in args {
        out.push(SEP);
        out.push_str(arg);
    }
    out
}

/// `<scope>/in/info`: asks every module of the dongle to describe its commands.
pub fn discovery_request(scope: &Scope) -> String {
    format!("{scope}{SEP}{}{SEP}{}", Direction::In, Verb::Info)
}

/// Broker-side filter for everything a scope emits; the wildcard maps to `+`.
pub fn subscription_filter(scope: &Scope) -> String {
    match scope {
        Scope::Any => format!("+{SEP}{}{SEP}#", Direction::Out),
        Scope::Device(id) => format!("{id}{SEP}{}{SEP}#", Direction::Out),
    }
}

/// Parse a received topic and apply the inbound rules: only `out` traffic is input, and
/// a concrete configured scope rejects every other scope.
pub fn accept_inbound(raw: &[u8], configured: &Scope) -> Result<Address, TopicError> {
    let address = Address::parse(raw)?;
    if !configured.accepts(address.scope()) {
        return Err(TopicError::ScopeMismatch {
            expected: configured.to_string(),
            got: address.scope().to_string(),
        });
    }
    if address.direction() != Direction::Out {
        return Err(TopicError::Echo);
    }
    Ok(address)
}
