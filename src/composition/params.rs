//! Per-layer keying parameters.

/// Keying parameters for a layer's shader, each normalized to [0, 1].
///
/// Every layer owns its own set; the UI surfaces each value as an integer
/// percentage 0-100 and stores `value / 100`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyParams {
    /// Luminance threshold the key is carved at.
    pub thresh: f32,
    /// Width of the soft edge below the threshold.
    pub softness: f32,
    /// Blend between the key and its inverse (0 = straight, 1 = inverted).
    pub invert: f32,
    /// Final alpha multiplier.
    pub opacity: f32,
}

impl Default for KeyParams {
    fn default() -> Self {
        Self {
            thresh: 1.0,
            softness: 1.0,
            invert: 1.0,
            opacity: 1.0,
        }
    }
}

/// Convert an external integer percentage to the stored [0, 1] value.
pub fn percent_to_unit(pct: u32) -> f32 {
    pct.min(100) as f32 / 100.0
}

/// Convert a stored [0, 1] value back to an integer percentage.
pub fn unit_to_percent(value: f32) -> u32 {
    (value.clamp(0.0, 1.0) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_full() {
        let params = KeyParams::default();
        assert_eq!(params.thresh, 1.0);
        assert_eq!(params.softness, 1.0);
        assert_eq!(params.invert, 1.0);
        assert_eq!(params.opacity, 1.0);
    }

    #[test]
    fn test_percent_round_trip() {
        for pct in 0..=100 {
            assert_eq!(unit_to_percent(percent_to_unit(pct)), pct);
        }
    }

    #[test]
    fn test_percent_clamps() {
        assert_eq!(percent_to_unit(250), 1.0);
        assert_eq!(unit_to_percent(1.7), 100);
    }
}
