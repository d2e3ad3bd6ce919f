// src/engine/common.rs
//
// Common utilities shared across engine modules:
// panic containment around codec calls and decode safety limits.

use crate::error::{PipelineError, Result};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::{MAX_DIMENSION, MAX_PIXELS};

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run a codec call, turning a panic into `InternalPanic`.
///
/// Third-party decoders and encoders occasionally panic on hostile input.
/// The label ends up in the error message so the failing stage is visible.
pub fn run_with_panic_policy<T>(label: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(stage = label, %message, "codec panicked");
            Err(PipelineError::internal_panic(format!("{label}: {message}")))
        }
    }
}

/// Reject page dimensions before any raster allocation happens.
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(PipelineError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(PipelineError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_is_contained() {
        let result: Result<()> = run_with_panic_policy("decode:test", || panic!("bad strip"));
        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::InternalPanic { .. }));
        assert!(err.to_string().contains("decode:test: bad strip"));
    }

    #[test]
    fn test_errors_pass_through() {
        let result: Result<()> =
            run_with_panic_policy("decode:test", || Err(PipelineError::empty_source()));
        assert!(matches!(result, Err(PipelineError::EmptySource)));
        assert_eq!(run_with_panic_policy("ok", || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions(1024, 1024).is_ok());
        assert!(check_dimensions(MAX_DIMENSION, 1).is_ok());
        assert!(matches!(
            check_dimensions(MAX_DIMENSION + 1, 1),
            Err(PipelineError::DimensionExceedsLimit { .. })
        ));
        assert!(matches!(
            check_dimensions(20_000, 20_000),
            Err(PipelineError::PixelCountExceedsLimit { .. })
        ));
    }

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
