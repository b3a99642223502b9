use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of comparing a similarity score against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// Score at or above the threshold.
    Similar,
    /// Score below the threshold.
    #[serde(rename = "Not Similar")]
    NotSimilar,
}

impl Classification {
    /// Classify `score` against `threshold`.
    pub fn from_score(score: f32, threshold: f32) -> Self {
        if score >= threshold {
            Self::Similar
        } else {
            Self::NotSimilar
        }
    }

    /// The label persisted in the ledger and shown to users.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Similar => "Similar",
            Self::NotSimilar => "Not Similar",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Similar" => Ok(Self::Similar),
            "Not Similar" => Ok(Self::NotSimilar),
            other => Err(format!("unknown classification label: {}", other)),
        }
    }
}

/// An uploaded image as received from the client.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    /// File name supplied by the client.
    pub name: String,
    /// Raw encoded image bytes.
    pub bytes: Bytes,
}

impl ImageUpload {
    /// Creates a new upload from a file name and its raw bytes.
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A completed comparison that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewComparison {
    /// First image.
    pub image1: ImageUpload,
    /// Second image.
    pub image2: ImageUpload,
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
    /// Label derived from `similarity` at evaluation time.
    pub classification: Classification,
}

/// A stored comparison, as read back from the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRecord {
    /// Ledger-assigned identifier.
    pub id: i64,
    /// Name of the first image.
    pub image1_name: String,
    /// Encoded bytes of the first image.
    pub image1_bytes: Vec<u8>,
    /// Name of the second image.
    pub image2_name: String,
    /// Encoded bytes of the second image.
    pub image2_bytes: Vec<u8>,
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
    /// Label fixed at creation time.
    pub classification: Classification,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

impl ComparisonRecord {
    /// True if this record stores exactly the content of `entry`.
    pub fn matches(&self, entry: &NewComparison) -> bool {
        self.image1_name == entry.image1.name
            && self.image1_bytes == entry.image1.bytes
            && self.image2_name == entry.image2.name
            && self.image2_bytes == entry.image2.bytes
            && self.similarity == entry.similarity
            && self.classification == entry.classification
    }
}
