//! Archive descriptors: either embedded bytes or a reference into the storage service.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Files strictly smaller than this are embedded in the package record.
pub const ARCHIVE_LITERAL_SIZE_LIMIT: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Literal,
    Url,
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveKind::Literal => f.write_str("literal"),
            ArchiveKind::Url => f.write_str("url"),
        }
    }
}

/// Source or deployment bytes of a package.
///
/// On the wire this is `{"type": "literal"|"url", "literal": <base64>, "url": "..."}`
/// with exactly one payload field populated. Values are never mutated once they are
/// part of a package revision; an update replaces the whole archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Archive {
    Literal(Vec<u8>),
    Url(String),
}

impl Archive {
    pub fn literal(bytes: impl Into<Vec<u8>>) -> Self {
        Archive::Literal(bytes.into())
    }

    pub fn url(url: impl Into<String>) -> Self {
        Archive::Url(url.into())
    }

    pub fn kind(&self) -> ArchiveKind {
        match self {
            Archive::Literal(_) => ArchiveKind::Literal,
            Archive::Url(_) => ArchiveKind::Url,
        }
    }

    pub fn as_literal(&self) -> Option<&[u8]> {
        match self {
            Archive::Literal(b) => Some(b),
            Archive::Url(_) => None,
        }
    }

    pub fn as_url(&self) -> Option<&str> {
        match self {
            Archive::Url(u) => Some(u),
            Archive::Literal(_) => None,
        }
    }
}

/// Flat wire shape shared with other clients of the same resources.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ArchiveWire {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    literal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

impl ArchiveWire {
    fn into_archive<E: serde::de::Error>(self) -> Result<Option<Archive>, E> {
        match self.kind.as_str() {
            // Zero-valued archive written by clients that do not omit empty fields.
            "" => Ok(None),
            "literal" => {
                let encoded = self.literal.unwrap_or_default();
                let bytes = STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| E::custom(format!("invalid base64 literal archive: {}", e)))?;
                Ok(Some(Archive::Literal(bytes)))
            }
            "url" => match self.url {
                Some(u) if !u.is_empty() => Ok(Some(Archive::Url(u))),
                _ => Err(E::custom("url archive without url")),
            },
            other => Err(E::custom(format!("unknown archive type: {}", other))),
        }
    }
}

impl From<&Archive> for ArchiveWire {
    fn from(a: &Archive) -> Self {
        match a {
            Archive::Literal(b) => ArchiveWire { kind: "literal".into(), literal: Some(STANDARD.encode(b)), url: None },
            Archive::Url(u) => ArchiveWire { kind: "url".into(), literal: None, url: Some(u.clone()) },
        }
    }
}

impl Serialize for Archive {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ArchiveWire::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Archive {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ArchiveWire::deserialize(deserializer)?
            .into_archive::<D::Error>()?
            .ok_or_else(|| serde::de::Error::custom("empty archive"))
    }
}

/// `deserialize_with` helper for optional archive fields: an empty `type` means absent.
pub fn deserialize_optional<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Archive>, D::Error> {
    match Option::<ArchiveWire>::deserialize(deserializer)? {
        Some(wire) => wire.into_archive(),
        None => Ok(None),
    }
}
