//! Domain models for records entering an import and the rows they become.
//!
//! A [`Record`] is what a producer hands to an import session. The batch
//! persister turns each record into a [`Source`] (deduplicated across the
//! session) and an [`Item`] (upserted by [`InfoHash`]).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AppError;

// =============================================================================
// Fingerprint
// =============================================================================

/// 20-byte content fingerprint, rendered as 40 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub const LEN: usize = 20;

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Builds a fingerprint from a byte slice, failing unless it is exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AppError> {
        let array: [u8; 20] = bytes.try_into().map_err(|_| {
            AppError::InvalidInfoHash(format!("expected 20 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for InfoHash {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != Self::LEN * 2 {
            return Err(AppError::InvalidInfoHash(s.to_string()));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(trimmed, &mut bytes)
            .map_err(|_| AppError::InvalidInfoHash(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Classification enums
// =============================================================================

/// Declares a string-backed enum with `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $value)] $variant),+
        }

        impl $name {
            /// Returns the string representation for database storage.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok(Self::$variant),)+
                    _ => Err(AppError::InvalidRecord(format!(
                        "unknown {}: '{}'",
                        stringify!($name),
                        s
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// Kind of content an item was classified as.
    pub enum ContentType {
        Movie => "movie",
        TvShow => "tv_show",
        Music => "music",
        Ebook => "ebook",
        Comic => "comic",
        Audiobook => "audiobook",
        Game => "game",
        Software => "software",
        Xxx => "xxx",
    }
}

string_enum! {
    pub enum VideoResolution {
        V360p => "V360p",
        V480p => "V480p",
        V540p => "V540p",
        V576p => "V576p",
        V720p => "V720p",
        V1080p => "V1080p",
        V1440p => "V1440p",
        V2160p => "V2160p",
        V4320p => "V4320p",
    }
}

string_enum! {
    pub enum VideoSource {
        Cam => "CAM",
        Telesync => "TELESYNC",
        Telecine => "TELECINE",
        Workprint => "WORKPRINT",
        Dvd => "DVD",
        Tv => "TV",
        WebDl => "WEBDL",
        WebRip => "WEBRip",
        BluRay => "BluRay",
    }
}

string_enum! {
    pub enum VideoCodec {
        H264 => "H264",
        X264 => "x264",
        X265 => "x265",
        XviD => "XviD",
        DivX => "DivX",
        Mpeg2 => "MPEG2",
        Mpeg4 => "MPEG4",
    }
}

string_enum! {
    pub enum Video3d {
        V3d => "V3D",
        V3dSbs => "V3DSBS",
        V3dOu => "V3DOU",
    }
}

string_enum! {
    pub enum VideoModifier {
        Regional => "REGIONAL",
        Screener => "SCREENER",
        RawHd => "RAWHD",
        BrDisk => "BRDISK",
        Remux => "REMUX",
    }
}

string_enum! {
    /// Whether the file listing of an item is known.
    pub enum FilesStatus {
        NoInfo => "no_info",
        Single => "single",
        Multi => "multi",
        OverThreshold => "over_threshold",
    }
}

/// Season number to the episode numbers it covers. An empty set means the
/// whole season.
pub type Episodes = BTreeMap<u32, BTreeSet<u32>>;

// =============================================================================
// Input records
// =============================================================================

/// Classification data attached to a record by an upstream stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub content_type: ContentType,
    #[serde(default)]
    pub content_source: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub release_year: Option<u16>,
    #[serde(default)]
    pub episodes: Option<Episodes>,
    #[serde(default)]
    pub video_resolution: Option<VideoResolution>,
    #[serde(default)]
    pub video_source: Option<VideoSource>,
    #[serde(default)]
    pub video_codec: Option<VideoCodec>,
    #[serde(default)]
    pub video_3d: Option<Video3d>,
    #[serde(default)]
    pub video_modifier: Option<VideoModifier>,
    #[serde(default)]
    pub release_group: Option<String>,
}

impl Enrichment {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_type,
            content_source: None,
            content_id: None,
            title: None,
            release_date: None,
            release_year: None,
            episodes: None,
            video_resolution: None,
            video_source: None,
            video_codec: None,
            video_3d: None,
            video_modifier: None,
            release_group: None,
        }
    }

    /// Checks the invariants an external content reference must satisfy.
    pub fn validate(&self) -> Result<(), AppError> {
        match (&self.content_source, &self.content_id) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(AppError::InvalidRecord(
                    "content_source and content_id must be set together".to_string(),
                ));
            }
            _ => {}
        }
        if let Some(year) = self
            .release_year
            .filter(|year| !(1000..=9999).contains(year))
        {
            return Err(AppError::InvalidRecord(format!(
                "release_year out of range: {}",
                year
            )));
        }
        Ok(())
    }
}

/// One discovered item handed to an import session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Key of the source that discovered the item.
    pub source: String,
    pub info_hash: InfoHash,
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub enrichment: Option<Enrichment>,
    pub published_at: DateTime<Utc>,
}

impl Record {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.source.trim().is_empty() {
            return Err(AppError::InvalidRecord(format!(
                "empty source for {}",
                self.info_hash
            )));
        }
        if let Some(enrichment) = &self.enrichment {
            enrichment
                .validate()
                .map_err(|e| AppError::InvalidRecord(format!("{}: {}", self.info_hash, e)))?;
        }
        Ok(())
    }
}

/// Identifies one import run; attached to every item source row it writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportInfo {
    pub id: String,
}

impl ImportInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

// =============================================================================
// Persisted shapes
// =============================================================================

/// Supporting record naming where items were discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub key: String,
    pub name: String,
}

impl Source {
    pub fn from_key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            name: key.to_string(),
        }
    }
}

/// Provenance entry linking an item to the source and import that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSource {
    pub source: String,
    pub import_id: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Denormalized copy of a record's enrichment stored alongside the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemHint {
    pub content_type: ContentType,
    pub content_source: Option<String>,
    pub content_id: Option<String>,
    pub title: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub release_year: Option<u16>,
    pub episodes: Option<Episodes>,
    pub video_resolution: Option<VideoResolution>,
    pub video_source: Option<VideoSource>,
    pub video_codec: Option<VideoCodec>,
    pub video_3d: Option<Video3d>,
    pub video_modifier: Option<VideoModifier>,
    pub release_group: Option<String>,
}

impl From<&Enrichment> for ItemHint {
    fn from(e: &Enrichment) -> Self {
        Self {
            content_type: e.content_type,
            content_source: e.content_source.clone(),
            content_id: e.content_id.clone(),
            title: e.title.clone(),
            release_date: e.release_date,
            release_year: e.release_year,
            episodes: e.episodes.clone(),
            video_resolution: e.video_resolution,
            video_source: e.video_source,
            video_codec: e.video_codec,
            video_3d: e.video_3d,
            video_modifier: e.video_modifier,
            release_group: e.release_group.clone(),
        }
    }
}

/// Primary record, upserted by `info_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub info_hash: InfoHash,
    pub name: String,
    pub size: u64,
    pub private: bool,
    pub files_status: FilesStatus,
    pub sources: Vec<ItemSource>,
    pub hint: Option<ItemHint>,
}

impl Item {
    /// Builds the item row for a record imported under `info`.
    pub fn from_record(info: &ImportInfo, record: &Record) -> Self {
        Self {
            info_hash: record.info_hash,
            name: record.name.clone(),
            size: record.size,
            private: record.private,
            files_status: FilesStatus::NoInfo,
            sources: vec![ItemSource {
                source: record.source.clone(),
                import_id: Some(info.id.clone()),
                published_at: record.published_at,
            }],
            hint: record.enrichment.as_ref().map(ItemHint::from),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_record(source: &str, n: u8) -> Record {
    Record {
        source: source.to_string(),
        info_hash: InfoHash::from_bytes([n; 20]),
        name: format!("item {}", n),
        size: 1024 * n as u64,
        private: false,
        enrichment: None,
        published_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
    }
}
