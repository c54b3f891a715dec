//! Image comparison thresholds.

use crate::descriptor::TestDescriptor;

/// Tolerances handed to the image-diff tools.
///
/// A small number of pixels are allowed up to 1 LSB (8 bit) of error; it is
/// very hard to make different platforms and compilers match to every last
/// floating point bit. Resolved once per run and then read-only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareThresholds {
    /// Per-pixel error above which a pixel counts as wrong.
    pub fail: f64,
    /// Per-pixel error that fails the comparison outright.
    pub hard_fail: f64,
    /// Percentage of wrong pixels above which the comparison fails.
    pub fail_percent: f64,
    /// Relative per-pixel error limit (dedicated differ only).
    pub fail_relative: f64,
    /// Number of wrong pixels tolerated (dedicated differ only).
    pub allow_failures: u32,
}

impl CompareThresholds {
    /// Defaults applied when a test does not override them.
    pub const BASE: CompareThresholds = CompareThresholds {
        fail: 0.004,
        hard_fail: 0.01,
        fail_percent: 0.02,
        fail_relative: 0.001,
        allow_failures: 0,
    };

    /// Build the thresholds for one run: defaults, then the descriptor's
    /// overrides, then a debug-build relaxation, then the global scale.
    pub fn resolve(descriptor: &TestDescriptor, debug: bool, scale: Option<f64>) -> CompareThresholds {
        let mut resolved = CompareThresholds::BASE.with_overrides(descriptor);
        if debug {
            resolved = resolved.debug_relaxed();
        }
        if let Some(factor) = scale {
            resolved = resolved.scaled(factor);
        }
        resolved
    }

    fn with_overrides(mut self, descriptor: &TestDescriptor) -> CompareThresholds {
        if let Some(value) = descriptor.fail_thresh {
            self.fail = value;
        }
        if let Some(value) = descriptor.hard_fail {
            self.hard_fail = value;
        }
        if let Some(value) = descriptor.fail_percent {
            self.fail_percent = value;
        }
        if let Some(value) = descriptor.fail_relative {
            self.fail_relative = value;
        }
        if let Some(value) = descriptor.allow_failures {
            self.allow_failures = value;
        }
        self
    }

    /// Debug toolchain builds produce slightly different pixels; allow a
    /// little more slop.
    fn debug_relaxed(mut self) -> CompareThresholds {
        self.fail *= 2.0;
        self.hard_fail *= 2.0;
        self.fail_percent *= 2.0;
        self
    }

    /// Scale every tolerance by `factor`. The pixel-count allowance is
    /// scaled and truncated back to a whole number.
    pub fn scaled(mut self, factor: f64) -> CompareThresholds {
        self.fail *= factor;
        self.hard_fail *= factor;
        self.fail_percent *= factor;
        self.fail_relative *= factor;
        self.allow_failures = (f64::from(self.allow_failures) * factor) as u32;
        self
    }

    /// Warning threshold reported by the image tools.
    pub fn warn(&self) -> f64 {
        2.0 * self.fail
    }

    /// Warning percentage reported by the image tools.
    pub fn warn_percent(&self) -> f64 {
        self.fail_percent
    }
}
