//! Panic isolation for code that runs on behalf of a candidate.
//!
//! The evaluator is driven by an unsupervised search loop, so a panic in a
//! rule or in a certifier implementation must become data, not unwind into
//! the caller.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};

/// A panic intercepted by [`catch_panic`].
#[derive(Debug, Clone)]
pub struct CaughtPanic {
    /// Panic payload rendered as text
    pub message: String,

    /// Backtrace captured at the interception point
    pub backtrace: String,
}

/// Run `f`, converting a panic into [`CaughtPanic`].
pub fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, CaughtPanic> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| CaughtPanic {
        message: payload_message(payload.as_ref()),
        backtrace: Backtrace::force_capture().to_string(),
    })
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_passes_through() {
        assert_eq!(catch_panic(|| 41 + 1).unwrap(), 42);
    }

    #[test]
    fn test_str_payload() {
        let caught = catch_panic(|| -> i32 { panic!("boom") }).unwrap_err();
        assert_eq!(caught.message, "boom");
        assert!(!caught.backtrace.is_empty());
    }

    #[test]
    fn test_formatted_payload() {
        let k = 3;
        let caught = catch_panic(|| -> i32 { panic!("bad rho at {}", k) }).unwrap_err();
        assert_eq!(caught.message, "bad rho at 3");
    }
}
