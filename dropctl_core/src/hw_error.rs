//! Maps `Box<dyn Error>` from trait boundaries to typed `EngineError`.
//!
//! The traits in `dropctl_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to the engine's error enum, with an optional
//! feature-gated path for `dropctl_hardware::HwError` downcasting.

use crate::error::EngineError;

/// Map a trait-boundary error to a typed `EngineError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> EngineError {
    #[cfg(feature = "hardware-errors")]
    {
        use dropctl_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::FrameTimeout => EngineError::Timeout("camera frame"),
                other => EngineError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        EngineError::Timeout("hardware")
    } else {
        EngineError::Hardware(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_fallback() {
        let e = std::io::Error::other("read timeout on port");
        assert_eq!(map_hw_error(&e), EngineError::Timeout("hardware"));
        let e = std::io::Error::other("bus fault");
        assert_eq!(map_hw_error(&e), EngineError::Hardware("bus fault".into()));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn typed_hardware_errors() {
        use dropctl_hardware::error::HwError;
        assert_eq!(map_hw_error(&HwError::FrameTimeout), EngineError::Timeout("camera frame"));
        assert!(matches!(
            map_hw_error(&HwError::InletCount { expected: 2, got: 1 }),
            EngineError::HardwareFault(_)
        ));
    }
}
