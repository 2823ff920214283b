use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::normalize::{parse_aspect_ratio, parse_size};

/// Pixel dimensions, written as `WIDTHxHEIGHT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height
    pub fn ratio(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    /// Length of the longer side
    pub fn long_side(self) -> u32 {
        self.width.max(self.height)
    }

    /// The simplest `W:H` ratio describing these dimensions
    pub fn aspect_ratio(self) -> AspectRatio {
        let divisor = gcd(self.width, self.height).max(1);
        AspectRatio::new(self.width / divisor, self.height / divisor)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ImageSize {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s)
            .ok_or_else(|| ParseValueError(format!("invalid size '{s}', expected WIDTHxHEIGHT")))
    }
}

/// Relative shape of an image, written as `W:H`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const SQUARE: Self = Self::new(1, 1);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Numeric value `width / height`
    pub fn value(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_aspect_ratio(s)
            .ok_or_else(|| ParseValueError(format!("invalid aspect ratio '{s}', expected W:H")))
    }
}

/// Malformed size or aspect ratio text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ParseValueError(String);

const fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Uniform image generation request
///
/// Handlers only ever read the request; it is never mutated after
/// construction.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Text description of the desired image
    pub prompt: String,
    /// Number of images to generate
    pub count: Option<NonZeroU32>,
    /// Exact pixel dimensions
    pub size: Option<ImageSize>,
    /// Relative shape, used when the backend works with ratios
    pub aspect_ratio: Option<AspectRatio>,
    /// Seed for reproducible output
    pub seed: Option<i64>,
    /// Backend-specific options merged into the backend request body
    ///
    /// Opaque to the core; only the handler of the selected backend reads it.
    pub extra: Map<String, Value>,
    /// Signalled by the caller to abort the call
    pub cancellation: CancellationToken,
    /// Extra headers sent with every backend request
    pub headers: IndexMap<String, String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            count: None,
            size: None,
            aspect_ratio: None,
            seed: None,
            extra: Map::new(),
            cancellation: CancellationToken::new(),
            headers: IndexMap::new(),
        }
    }

    #[must_use]
    pub const fn with_count(mut self, count: NonZeroU32) -> Self {
        self.count = Some(count);
        self
    }

    #[must_use]
    pub const fn with_size(mut self, size: ImageSize) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub const fn with_aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.aspect_ratio = Some(ratio);
        self
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Requested image count, defaulting to one
    pub fn count(&self) -> u32 {
        self.count.map_or(1, NonZeroU32::get)
    }
}

/// Category of a non-fatal diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum WarningKind {
    /// The backend ignores this field
    UnsupportedSetting,
    /// The value was changed to satisfy a backend constraint
    AdjustedValue,
    Other,
}

/// Non-fatal diagnostic attached to a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    /// Request field the warning is about (e.g. `size`, `seed`)
    pub subject: String,
    pub detail: String,
}

impl Warning {
    pub fn unsupported(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::UnsupportedSetting,
            subject: subject.into(),
            detail: detail.into(),
        }
    }

    pub fn adjusted(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::AdjustedValue,
            subject: subject.into(),
            detail: detail.into(),
        }
    }

    pub fn other(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Other,
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.subject, self.detail)
    }
}

/// Metadata describing the backend exchange that produced a result
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    pub timestamp: jiff::Timestamp,
    pub model_id: String,
    /// Headers of the last backend response
    pub headers: IndexMap<String, String>,
}

/// Uniform result of a successful generation call
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Image payloads in backend order; never empty
    pub images: Vec<Bytes>,
    pub warnings: Vec<Warning>,
    pub response: ResponseMetadata,
}
