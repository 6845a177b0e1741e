//! Adaptive Chunk Sizing and Pacing
//!
//! Each client reports a network-quality score in `[0, 1]`. The server scales
//! its transfers to that score:
//!
//! ```text
//! chunk_size(q) = clamp(default_chunk_size * q, min_chunk_size, max_chunk_size)
//! delay(q)      = base_delay / q
//! ```
//!
//! With the defaults (16 KB chunks, 100 ms base delay) a client at `q = 1.0`
//! gets 16 KB every 100 ms, and a client at `q = 0.25` gets 4 KB every 400 ms.
//!
//! Both functions are pure. The controller keeps no per-client state. The
//! sender looks up the live quality before every chunk, so an update that
//! arrives mid-transfer applies to the next chunk.
//!
//! ## Quality Floor
//!
//! A quality of zero would make the delay unbounded. Scores below
//! `quality_floor` (default 0.05) are raised to the floor before either
//! formula runs, which caps the delay at `base_delay / quality_floor`.

use std::time::Duration;
use thiserror::Error;

/// Chunk size at quality 1.0 (16 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Smallest chunk ever sent (4 KB)
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Largest chunk ever sent (64 KB)
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Gap between chunks at quality 1.0
pub const BASE_DELAY: Duration = Duration::from_millis(100);

/// Lowest quality the pacing formulas will use
pub const QUALITY_FLOOR: f64 = 0.05;

/// Errors found while validating a [`TransferConfig`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransferConfigError {
    #[error("min_chunk_size must be non-zero")]
    ZeroMinChunk,

    #[error("min_chunk_size ({min}) exceeds max_chunk_size ({max})")]
    InvertedChunkBounds { min: usize, max: usize },

    #[error("quality_floor must be in (0, 1], got {0}")]
    InvalidQualityFloor(f64),
}

/// A network-quality score, always within `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct NetworkQuality(f64);

impl NetworkQuality {
    /// The best possible quality. Every client starts here.
    pub const BEST: NetworkQuality = NetworkQuality(1.0);

    /// Creates a quality score, clamping it into `[0, 1]`.
    ///
    /// Returns `None` for NaN or infinite input.
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() {
            Some(Self(value.clamp(0.0, 1.0)))
        } else {
            None
        }
    }

    /// Returns the raw score.
    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for NetworkQuality {
    fn default() -> Self {
        Self::BEST
    }
}

impl std::fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Tunables for the adaptive transfer controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    /// Chunk size at quality 1.0
    pub default_chunk_size: usize,

    /// Lower clamp for the chunk size
    pub min_chunk_size: usize,

    /// Upper clamp for the chunk size
    pub max_chunk_size: usize,

    /// Inter-chunk delay at quality 1.0
    pub base_delay: Duration,

    /// Scores below this are raised to it before scaling
    pub quality_floor: f64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            min_chunk_size: MIN_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            base_delay: BASE_DELAY,
            quality_floor: QUALITY_FLOOR,
        }
    }
}

impl TransferConfig {
    /// Checks that the clamps are ordered and the floor is usable.
    pub fn validate(&self) -> Result<(), TransferConfigError> {
        if self.min_chunk_size == 0 {
            return Err(TransferConfigError::ZeroMinChunk);
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(TransferConfigError::InvertedChunkBounds {
                min: self.min_chunk_size,
                max: self.max_chunk_size,
            });
        }
        // Also rejects NaN
        if !(self.quality_floor > 0.0 && self.quality_floor <= 1.0) {
            return Err(TransferConfigError::InvalidQualityFloor(self.quality_floor));
        }
        Ok(())
    }

    #[inline]
    fn effective(&self, quality: NetworkQuality) -> f64 {
        quality.value().max(self.quality_floor)
    }

    /// Returns the chunk size to use at the given quality.
    pub fn chunk_size(&self, quality: NetworkQuality) -> usize {
        let scaled = (self.default_chunk_size as f64 * self.effective(quality)) as usize;
        scaled.clamp(self.min_chunk_size, self.max_chunk_size)
    }

    /// Returns the pause to take after sending a chunk at the given quality.
    pub fn delay(&self, quality: NetworkQuality) -> Duration {
        self.base_delay.div_f64(self.effective(quality))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(value: f64) -> NetworkQuality {
        NetworkQuality::new(value).unwrap()
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(q(1.7).value(), 1.0);
        assert_eq!(q(-0.3).value(), 0.0);
        assert_eq!(q(0.4).value(), 0.4);
        assert!(NetworkQuality::new(f64::NAN).is_none());
        assert!(NetworkQuality::new(f64::INFINITY).is_none());
    }

    #[test]
    fn test_default_chunk_sizes() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size(q(1.0)), 16 * 1024);
        assert_eq!(config.chunk_size(q(0.5)), 8 * 1024);
        assert_eq!(config.chunk_size(q(0.25)), 4 * 1024);
        // 16 KB * 0.1 is below the 4 KB floor
        assert_eq!(config.chunk_size(q(0.1)), 4 * 1024);
    }

    #[test]
    fn test_chunk_size_is_bounded_and_monotonic() {
        let config = TransferConfig::default();
        let mut previous = 0;
        for step in 1..=100 {
            let size = config.chunk_size(q(step as f64 / 100.0));
            assert!(size >= config.min_chunk_size);
            assert!(size <= config.max_chunk_size);
            assert!(size >= previous);
            previous = size;
        }
    }

    #[test]
    fn test_max_clamp_applies() {
        let config = TransferConfig {
            default_chunk_size: 128 * 1024,
            ..Default::default()
        };
        assert_eq!(config.chunk_size(q(1.0)), MAX_CHUNK_SIZE);
    }

    #[test]
    fn test_delay_is_base_over_quality() {
        let config = TransferConfig::default();
        assert_eq!(config.delay(q(1.0)), Duration::from_millis(100));
        assert_eq!(config.delay(q(0.5)), Duration::from_millis(200));
        assert_eq!(config.delay(q(0.25)), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_strictly_decreasing_above_floor() {
        let config = TransferConfig::default();
        let mut previous = Duration::MAX;
        for step in 5..=100 {
            let delay = config.delay(q(step as f64 / 100.0));
            assert!(delay < previous);
            previous = delay;
        }
    }

    #[test]
    fn test_zero_quality_is_floored() {
        let config = TransferConfig::default();
        assert_eq!(config.delay(q(0.0)), Duration::from_secs(2));
        assert_eq!(config.chunk_size(q(0.0)), MIN_CHUNK_SIZE);
    }

    #[test]
    fn test_validate() {
        assert!(TransferConfig::default().validate().is_ok());

        let inverted = TransferConfig {
            min_chunk_size: 64 * 1024,
            max_chunk_size: 4 * 1024,
            ..Default::default()
        };
        assert_eq!(
            inverted.validate(),
            Err(TransferConfigError::InvertedChunkBounds {
                min: 64 * 1024,
                max: 4 * 1024,
            })
        );

        let zero_min = TransferConfig {
            min_chunk_size: 0,
            ..Default::default()
        };
        assert_eq!(zero_min.validate(), Err(TransferConfigError::ZeroMinChunk));

        let no_floor = TransferConfig {
            quality_floor: 0.0,
            ..Default::default()
        };
        assert_eq!(
            no_floor.validate(),
            Err(TransferConfigError::InvalidQualityFloor(0.0))
        );

        let nan_floor = TransferConfig {
            quality_floor: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            nan_floor.validate(),
            Err(TransferConfigError::InvalidQualityFloor(_))
        ));
    }
}
