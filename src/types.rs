use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::LogError;
use crate::traits::Entity;

/// Record field holding the method tag.
pub const METHOD_FIELD: &str = "method";
/// Record field holding the serialized payload.
pub const DATA_FIELD: &str = "data";

/// Kind of mutation carried by a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Set,
    Update,
    Delete,
}

impl Method {
    pub fn tag(&self) -> &'static str {
        match self {
            Method::Set => "set",
            Method::Update => "update",
            Method::Delete => "delete",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(Method::Set),
            "update" => Ok(Method::Update),
            "delete" => Ok(Method::Delete),
            other => Err(other.to_string()),
        }
    }
}

/// A mutation as it travels through the log. `Delete` only knows the identifier.
pub enum Command<E>
where
    E: Entity,
{
    Set(E),
    Update(E),
    Delete(E::Id),
}

impl<E> Command<E>
where
    E: Entity,
{
    pub fn method(&self) -> Method {
        match self {
            Command::Set(_) => Method::Set,
            Command::Update(_) => Method::Update,
            Command::Delete(_) => Method::Delete,
        }
    }

    pub fn id(&self) -> &E::Id {
        match self {
            Command::Set(e) | Command::Update(e) => e.id(),
            Command::Delete(id) => id,
        }
    }
}

impl<E> Debug for Command<E>
where
    E: Entity,
{
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Set(e) => fmt.debug_tuple("Command::Set").field(e).finish(),
            Self::Update(e) => fmt.debug_tuple("Command::Update").field(e).finish(),
            Self::Delete(id) => fmt.debug_tuple("Command::Delete").field(id).finish(),
        }
    }
}

impl<E> Clone for Command<E>
where
    E: Entity,
{
    fn clone(&self) -> Self {
        match self {
            Self::Set(e) => Self::Set(e.clone()),
            Self::Update(e) => Self::Update(e.clone()),
            Self::Delete(id) => Self::Delete(id.clone()),
        }
    }
}

/// Position of a record in the log. Formatted as `<millis>-<seq>`, the way Redis stream IDs are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogPosition {
    millis: u64,
    seq:    u64,
}

impl LogPosition {
    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Display for LogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for LogPosition {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LogError::InvalidPosition(s.to_string());
        let (millis, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq:    seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// What actually gets appended to the log: metadata fields plus opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogRecord {
    pub metadata: BTreeMap<String, String>,
    pub payload:  Vec<u8>,
}

impl LogRecord {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            metadata: BTreeMap::new(),
            payload,
        }
    }

    pub fn with_meta<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn method_tag(&self) -> Option<&str> {
        self.metadata.get(METHOD_FIELD).map(String::as_str)
    }
}

/// A record handed to a consumer, together with the position it must be acknowledged by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub position: LogPosition,
    pub record:   LogRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCreation {
    Created,
    Existed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Not started yet.
    Idle,
    /// Workers are consuming the log.
    Running,
    /// The consumer group couldn't be set up. Every read is a miss until the process restarts.
    Cold,
    /// Workers have been shut down. The state keeps whatever was applied last.
    Stopped,
}

/// Outcome of applying a single command to the materialized state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Replaced,
    Removed,
    StillNone,
}
