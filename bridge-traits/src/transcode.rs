//! Image Transcoding Abstraction
//!
//! Turns original image bytes into a web-optimised derivative under a
//! named [`DerivativeProfile`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Named set of resize/crop/quality parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivativeProfile {
    /// Gallery image: bounded width, aspect ratio kept, never upscaled.
    Catalog,
    /// Album cover: fixed square, crop anchored on the busiest region.
    Cover,
}

impl DerivativeProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivativeProfile::Catalog => "catalog",
            DerivativeProfile::Cover => "cover",
        }
    }

    /// Encoder quality on a 0-100 scale.
    pub fn quality(&self) -> u8 {
        match self {
            DerivativeProfile::Catalog => 75,
            DerivativeProfile::Cover => 75,
        }
    }

    /// Target size. Catalog only bounds the width; cover is an exact square.
    pub fn target(&self) -> (u32, Option<u32>) {
        match self {
            DerivativeProfile::Catalog => (800, None),
            DerivativeProfile::Cover => (400, Some(400)),
        }
    }
}

impl fmt::Display for DerivativeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded derivative with its final pixel size.
#[derive(Debug, Clone)]
pub struct TranscodedImage {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// File extension of everything this transcoder produces, without dot.
    fn output_extension(&self) -> &'static str {
        "webp"
    }

    /// Decode, strip metadata and re-encode `bytes` per `profile`.
    async fn transcode(&self, bytes: Bytes, profile: DerivativeProfile) -> Result<TranscodedImage>;
}
