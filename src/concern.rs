//! Write concern, the durability guarantee requested for write operations.

#[cfg(test)]
mod test;

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    error::{Error, Result},
    serde_util,
};

/// Specifies the level of acknowledgement requested from the server for write operations.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct WriteConcern {
    /// How many or which members must acknowledge the write.
    pub w: Option<Acknowledgment>,

    /// How long to wait for the requested acknowledgement before reporting a write concern
    /// error. Writes that already happened are not rolled back when this elapses.
    #[serde(
        rename = "wtimeout",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub w_timeout: Option<Duration>,

    /// Requests acknowledgement that the write reached the on-disk journal.
    #[serde(rename = "j")]
    pub journal: Option<bool>,
}

/// The `w` field of a [`WriteConcern`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Acknowledgment {
    /// A number of data-bearing members. `Nodes(0)` requests no acknowledgement at all.
    Nodes(u32),

    /// A majority of voting members.
    Majority,

    /// A custom write concern defined through replica set tags.
    Custom(String),
}

impl Serialize for Acknowledgment {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Acknowledgment::Majority => serializer.serialize_str("majority"),
            Acknowledgment::Nodes(n) => serde_util::serialize_u32_as_i32(n, serializer),
            Acknowledgment::Custom(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for Acknowledgment {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NodesOrTag {
            Nodes(u32),
            Tag(String),
        }
        Ok(match NodesOrTag::deserialize(deserializer)? {
            NodesOrTag::Nodes(n) => Acknowledgment::Nodes(n),
            NodesOrTag::Tag(tag) => tag.into(),
        })
    }
}

impl From<u32> for Acknowledgment {
    fn from(n: u32) -> Self {
        Acknowledgment::Nodes(n)
    }
}

impl From<&str> for Acknowledgment {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

impl From<String> for Acknowledgment {
    fn from(s: String) -> Self {
        match s.as_str() {
            "majority" => Acknowledgment::Majority,
            _ => Acknowledgment::Custom(s),
        }
    }
}

impl From<Acknowledgment> for WriteConcern {
    fn from(w: Acknowledgment) -> Self {
        WriteConcern {
            w: Some(w),
            w_timeout: None,
            journal: None,
        }
    }
}

impl WriteConcern {
    /// A write concern requesting acknowledgement from `n` members.
    pub fn nodes(n: u32) -> Self {
        Acknowledgment::Nodes(n).into()
    }

    /// A write concern requesting acknowledgement from a majority of members.
    pub fn majority() -> Self {
        Acknowledgment::Majority.into()
    }

    /// A write concern that does not wait for any acknowledgement.
    pub fn unacknowledged() -> Self {
        Self::nodes(0)
    }

    /// Whether the server will report the outcome of writes using this concern.
    pub fn is_acknowledged(&self) -> bool {
        self.w != Some(Acknowledgment::Nodes(0)) || self.journal == Some(true)
    }

    /// An empty write concern defers to the server's default and is omitted from commands.
    pub(crate) fn is_empty(&self) -> bool {
        self.w.is_none() && self.w_timeout.is_none() && self.journal.is_none()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.w == Some(Acknowledgment::Nodes(0)) && self.journal == Some(true) {
            return Err(Error::invalid_argument(
                "write concern cannot have w=0 and j=true",
            ));
        }
        Ok(())
    }
}
