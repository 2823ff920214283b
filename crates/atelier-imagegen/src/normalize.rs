//! Conversions between pixel sizes and aspect ratios
//!
//! Every function here is pure. Adjustments are reported through the
//! [`Warning`] carried by [`Normalized`] rather than by failing, so a
//! handler can always produce a request the backend accepts.

use crate::types::{AspectRatio, ImageSize, Warning};

/// Long side used when pixels must be derived from a ratio
pub const DEFAULT_BASE_DIMENSION: u32 = 1024;

/// Pixel granularity required by most diffusion backends
pub const DEFAULT_GRANULARITY: u32 = 32;

/// Relative ratio difference below which a size-to-ratio conversion is exact
pub const RATIO_TOLERANCE: f64 = 0.05;

const RATIO_EPSILON: f64 = 1e-9;

/// Short side used when an out-of-range ratio is replaced by a bound
const CLAMP_SHORT_SIDE: u32 = 9;

/// A normalized value plus the warning describing how it was adjusted
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub value: T,
    pub warning: Option<Warning>,
}

impl<T> Normalized<T> {
    const fn exact(value: T) -> Self {
        Self { value, warning: None }
    }

    const fn changed(value: T, warning: Warning) -> Self {
        Self {
            value,
            warning: Some(warning),
        }
    }

    /// Whether the value differs from what was requested
    pub const fn adjusted(&self) -> bool {
        self.warning.is_some()
    }

    pub fn into_parts(self) -> (T, Option<Warning>) {
        (self.value, self.warning)
    }

    /// Push the warning, if any, and return the value
    pub fn record(self, warnings: &mut Vec<Warning>) -> T {
        warnings.extend(self.warning);
        self.value
    }
}

/// Parse `WIDTHxHEIGHT`, rejecting zero or non-numeric components
pub fn parse_size(text: &str) -> Option<ImageSize> {
    let (width, height) = text.trim().split_once('x')?;
    let width = width.trim().parse::<u32>().ok().filter(|w| *w > 0)?;
    let height = height.trim().parse::<u32>().ok().filter(|h| *h > 0)?;
    Some(ImageSize::new(width, height))
}

/// Parse `W:H`, rejecting zero or non-numeric components
pub fn parse_aspect_ratio(text: &str) -> Option<AspectRatio> {
    let (width, height) = text.trim().split_once(':')?;
    let width = width.trim().parse::<u32>().ok().filter(|w| *w > 0)?;
    let height = height.trim().parse::<u32>().ok().filter(|h| *h > 0)?;
    Some(AspectRatio::new(width, height))
}

/// Pixel size for a ratio, with the longer side equal to `base`
///
/// Landscape ratios fix the width; portrait and square ratios fix the
/// height.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn size_from_aspect_ratio(ratio: AspectRatio, base: u32) -> ImageSize {
    let value = ratio.value();
    let base_f = f64::from(base);

    if value > 1.0 {
        let height = (base_f / value).round().max(1.0) as u32;
        ImageSize::new(base, height)
    } else {
        let width = (base_f * value).round().max(1.0) as u32;
        ImageSize::new(width, base)
    }
}

/// Clamp both dimensions into `[min, max]` and round them to `granularity`
///
/// The bounds are tightened to the nearest multiples of `granularity`
/// inside the range so the rounded value never escapes it. When no
/// multiple fits in the range the dimensions are only clamped.
pub fn snap_to_granularity(
    size: ImageSize,
    min: u32,
    max: u32,
    granularity: u32,
) -> Normalized<ImageSize> {
    let granularity = granularity.max(1);
    let (min, max) = if min <= max { (min, max) } else { (max, min) };

    let lo = min.div_ceil(granularity) * granularity;
    let hi = max / granularity * granularity;

    let snap = |value: u32| -> u32 {
        if lo > hi {
            return value.clamp(min, max);
        }
        let clamped = value.clamp(lo, hi);
        let rounded = (clamped + granularity / 2) / granularity * granularity;
        rounded.clamp(lo, hi)
    };

    let snapped = ImageSize::new(snap(size.width), snap(size.height));

    if snapped == size {
        Normalized::exact(size)
    } else {
        Normalized::changed(
            snapped,
            Warning::adjusted(
                "size",
                format!(
                    "{size} adjusted to {snapped} (range {min}-{max}, multiple of {granularity})"
                ),
            ),
        )
    }
}

/// Pick the supported size closest in shape to `size`
///
/// Candidates are ranked by aspect ratio difference, then by how far their
/// longer side is from 1024, then by `(width, height)`. Declaration order
/// never matters. An empty set accepts any size.
pub fn snap_to_discrete_size_set(
    size: ImageSize,
    supported: &[ImageSize],
) -> Normalized<ImageSize> {
    if supported.is_empty() || supported.contains(&size) {
        return Normalized::exact(size);
    }

    let target = size.ratio();
    let rank = |candidate: &ImageSize| {
        (
            (candidate.ratio() - target).abs(),
            candidate.long_side().abs_diff(DEFAULT_BASE_DIMENSION),
            *candidate,
        )
    };

    let Some(chosen) = supported.iter().copied().min_by(|a, b| {
        let (ra, la, sa) = rank(a);
        let (rb, lb, sb) = rank(b);
        ra.total_cmp(&rb).then(la.cmp(&lb)).then(sa.cmp(&sb))
    }) else {
        return Normalized::exact(size);
    };

    Normalized::changed(
        chosen,
        Warning::adjusted(
            "size",
            format!("{size} is not supported, using closest size {chosen}"),
        ),
    )
}

/// Pick the supported ratio closest in value to `requested`
///
/// Without a request the first supported ratio is the default. Equal
/// values count as a match, so `32:18` selects `16:9` silently. An empty
/// set accepts any ratio and defaults to `1:1`.
pub fn closest_aspect_ratio(
    requested: Option<AspectRatio>,
    supported: &[AspectRatio],
) -> Normalized<AspectRatio> {
    let Some(requested) = requested else {
        let default = supported.first().copied().unwrap_or(AspectRatio::SQUARE);
        return Normalized::exact(default);
    };

    let Some(chosen) = nearest_ratio(requested.value(), supported) else {
        return Normalized::exact(requested);
    };

    if (chosen.value() - requested.value()).abs() < RATIO_EPSILON {
        Normalized::exact(chosen)
    } else {
        Normalized::changed(
            chosen,
            Warning::adjusted(
                "aspect_ratio",
                format!("aspect ratio {requested} is not supported, using closest ratio {chosen}"),
            ),
        )
    }
}

/// Convert pixel dimensions to the closest supported ratio
///
/// Differences within [`RATIO_TOLERANCE`] of the actual ratio are treated
/// as exact.
pub fn size_to_closest_aspect_ratio(
    size: ImageSize,
    supported: &[AspectRatio],
) -> Normalized<AspectRatio> {
    let actual = size.ratio();

    let Some(chosen) = nearest_ratio(actual, supported) else {
        return Normalized::exact(size.aspect_ratio());
    };

    if (chosen.value() - actual).abs() / actual <= RATIO_TOLERANCE {
        Normalized::exact(chosen)
    } else {
        Normalized::changed(
            chosen,
            Warning::adjusted(
                "size",
                format!(
                    "size {size} converted to closest supported aspect ratio {chosen} \
                     (differs by more than {:.0}%)",
                    RATIO_TOLERANCE * 100.0
                ),
            ),
        )
    }
}

/// Keep a ratio inside `[min, max]`
///
/// An out-of-range ratio is replaced by the violated bound written over a
/// short side of 9, e.g. `7:3` becomes `21:9`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn clamp_aspect_ratio(
    ratio: AspectRatio,
    min: AspectRatio,
    max: AspectRatio,
) -> Normalized<AspectRatio> {
    let value = ratio.value();
    let short = f64::from(CLAMP_SHORT_SIDE);

    let clamped = if value > max.value() {
        let width = (max.value() * short).round().max(1.0) as u32;
        AspectRatio::new(width, CLAMP_SHORT_SIDE)
    } else if value < min.value() {
        let height = (short / min.value()).round().max(1.0) as u32;
        AspectRatio::new(CLAMP_SHORT_SIDE, height)
    } else {
        return Normalized::exact(ratio);
    };

    Normalized::changed(
        clamped,
        Warning::adjusted(
            "aspect_ratio",
            format!("aspect ratio {ratio} is outside {min} to {max}, using {clamped}"),
        ),
    )
}

/// First ratio with the smallest value difference to `target`
fn nearest_ratio(target: f64, supported: &[AspectRatio]) -> Option<AspectRatio> {
    supported.iter().copied().min_by(|a, b| {
        let da = (a.value() - target).abs();
        let db = (b.value() - target).abs();
        da.total_cmp(&db)
    })
}
