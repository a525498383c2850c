//! Dimension and scale clamping

use crate::Viewport;
use log::warn;

/// Bounds applied to every request before it reaches the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub min_scale: f64,
    pub max_scale: f64,
}

impl Default for DimensionLimits {
    fn default() -> Self {
        Self {
            max_width: 4096,
            max_height: 4096,
            min_scale: 0.1,
            max_scale: 3.0,
        }
    }
}

/// Output of [`DimensionLimits::validate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedDimensions {
    pub width: u32,
    pub height: u32,
    /// Set when either axis had to be adjusted
    pub clamped: bool,
}

impl ValidatedDimensions {
    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.width,
            height: self.height,
        }
    }
}

impl DimensionLimits {
    /// Clamp each axis into `[1, max]`. Never fails.
    pub fn validate(&self, width: i64, height: i64) -> ValidatedDimensions {
        let w = clamp_axis(width, self.max_width);
        let h = clamp_axis(height, self.max_height);
        let clamped = i64::from(w) != width || i64::from(h) != height;

        if clamped {
            warn!("Dimensions adjusted from {}x{} to {}x{}", width, height, w, h);
        }

        ValidatedDimensions {
            width: w,
            height: h,
            clamped,
        }
    }

    /// Clamp the device scale factor. Non-finite input falls back to 1.0.
    pub fn clamp_scale(&self, scale: f64) -> f64 {
        if !scale.is_finite() {
            warn!("Scale {} is not a finite number, using 1.0", scale);
            return 1.0_f64.clamp(self.min_scale, self.max_scale);
        }
        let clamped = scale.clamp(self.min_scale, self.max_scale);
        if clamped != scale {
            warn!("Scale adjusted from {} to {}", scale, clamped);
        }
        clamped
    }
}

fn clamp_axis(value: i64, max: u32) -> u32 {
    let max = max.max(1);
    // in range after clamp, the cast cannot truncate
    value.clamp(1, i64::from(max)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_values_pass_through() {
        let limits = DimensionLimits::default();
        for (w, h) in [(1, 1), (800, 600), (4096, 4096), (1, 4096)] {
            let v = limits.validate(w, h);
            assert_eq!((i64::from(v.width), i64::from(v.height)), (w, h));
            assert!(!v.clamped);
        }
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let limits = DimensionLimits::default();
        let v = limits.validate(99999, 0);
        assert_eq!((v.width, v.height), (4096, 1));
        assert!(v.clamped);

        let v = limits.validate(-5, 5000);
        assert_eq!((v.width, v.height), (1, 4096));
        assert!(v.clamped);
    }

    #[test]
    fn validate_is_idempotent() {
        let limits = DimensionLimits::default();
        let first = limits.validate(10_000, 300);
        assert!(first.clamped);
        let second = limits.validate(i64::from(first.width), i64::from(first.height));
        assert_eq!((second.width, second.height), (first.width, first.height));
        assert!(!second.clamped);
    }

    #[test]
    fn custom_ceiling_is_respected() {
        let limits = DimensionLimits { max_width: 2000, max_height: 1000, ..Default::default() };
        let v = limits.validate(2500, 999);
        assert_eq!((v.width, v.height), (2000, 999));
        assert_eq!(v.viewport(), Viewport { width: 2000, height: 999 });
    }

    #[test]
    fn scale_is_clamped() {
        let limits = DimensionLimits::default();
        assert_eq!(limits.clamp_scale(2.0), 2.0);
        assert_eq!(limits.clamp_scale(0.0), 0.1);
        assert_eq!(limits.clamp_scale(10.0), 3.0);
        assert_eq!(limits.clamp_scale(f64::NAN), 1.0);
    }
}
