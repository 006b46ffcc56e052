//! Text forms shared by the store: percent escaping, the versioned envelope,
//! store keys and the reference payloads.

use std::{borrow::Cow, fmt::Display};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::{errors::EnvelopeError, schema::Priority};

/// Everything outside the RFC 3986 unreserved set is escaped.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub const ENVELOPE_PREFIX: &str = "pv1|";
pub const REF_PREFIX: &str = "w1|";
pub const REF_LIST_PREFIX: &str = "wl1|";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub priority: Priority,
    pub codec: Option<String>,
    pub payload: String,
}

/// Key of a host-backed attribute: `<owner-tag>:<escaped host id>:<attr>:<value tag>`.
/// Detached owners use `<owner-tag>#<n>:...` keys which never parse here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub owner_tag: String,
    pub host_id: String,
    pub attr: String,
    pub value_tag: String,
}

pub fn escape(raw: &str) -> String {
    utf8_percent_encode(raw, UNRESERVED).to_string()
}

pub fn unescape(escaped: &str) -> Result<String, EnvelopeError> {
    percent_decode_str(escaped)
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|_| EnvelopeError::Escape(escaped.to_owned()))
}

/// `w1|<tag>|<escaped id>`
pub fn encode_ref(tag: &str, id: &str) -> String {
    format!("{REF_PREFIX}{tag}|{}", escape(id))
}

pub fn decode_ref(payload: &str) -> anyhow::Result<(&str, String)> {
    let rest = payload
        .strip_prefix(REF_PREFIX)
        .ok_or_else(|| anyhow::anyhow!("reference payload without `{REF_PREFIX}` prefix"))?;
    let (tag, id) = rest
        .split_once('|')
        .ok_or_else(|| anyhow::anyhow!("reference payload without type tag"))?;

    Ok((tag, unescape(id)?))
}

/// `wl1|<tag>|<escaped id>,<escaped id>,...`
pub fn encode_ref_list<'a>(tag: &str, ids: impl IntoIterator<Item = &'a str>) -> String {
    let joined = ids.into_iter().map(escape).collect::<Vec<_>>().join(",");

    format!("{REF_LIST_PREFIX}{tag}|{joined}")
}

pub fn decode_ref_list(payload: &str) -> anyhow::Result<(&str, Vec<String>)> {
    let rest = payload
        .strip_prefix(REF_LIST_PREFIX)
        .ok_or_else(|| anyhow::anyhow!("reference list without `{REF_LIST_PREFIX}` prefix"))?;
    let (tag, joined) = rest
        .split_once('|')
        .ok_or_else(|| anyhow::anyhow!("reference list without type tag"))?;

    let ids = joined
        .split(',')
        .filter(|id| !id.is_empty())
        .map(unescape)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((tag, ids))
}

// Implementations

impl Envelope {
    pub fn new(priority: Priority, codec: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            priority,
            codec: Some(codec.into()),
            payload: payload.into(),
        }
    }

    pub fn pack(&self) -> String {
        format!(
            "{ENVELOPE_PREFIX}{}|{}|{}",
            self.priority.0,
            escape(self.codec.as_deref().unwrap_or_default()),
            escape(&self.payload)
        )
    }

    pub fn unpack(raw: &str) -> Result<Self, EnvelopeError> {
        let rest = raw
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or(EnvelopeError::MissingPrefix)?;

        let mut parts = rest.splitn(3, '|');
        let (Some(priority), Some(codec), Some(payload)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(EnvelopeError::Malformed);
        };

        let priority = priority
            .trim()
            .parse()
            .map(Priority)
            .unwrap_or(Priority::NORMAL);
        let codec = unescape(codec)?;

        Ok(Self {
            priority,
            codec: (!codec.is_empty()).then_some(codec),
            payload: unescape(payload)?,
        })
    }
}

impl StoreKey {
    pub fn new(
        owner_tag: impl Into<String>,
        host_id: impl Into<String>,
        attr: impl Into<String>,
        value_tag: impl Into<String>,
    ) -> Self {
        Self {
            owner_tag: owner_tag.into(),
            host_id: host_id.into(),
            attr: attr.into(),
            value_tag: value_tag.into(),
        }
    }

    /// `None` for detached or foreign keys.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(':');
        let (Some(owner_tag), Some(host_id), Some(attr), Some(value_tag), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return None;
        };

        if owner_tag.is_empty() || owner_tag.contains('#') || host_id.is_empty() {
            return None;
        }

        Some(Self {
            owner_tag: owner_tag.to_owned(),
            host_id: unescape(host_id).ok()?,
            attr: attr.to_owned(),
            value_tag: value_tag.to_owned(),
        })
    }
}

impl Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.owner_tag,
            escape(&self.host_id),
            self.attr,
            self.value_tag
        )
    }
}
