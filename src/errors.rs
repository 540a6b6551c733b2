//! Build-failure reporting.
//!
//! A widget build that panics is contained at the failing element: the panic
//! is caught, turned into a [`BuildError`], reported once to the configured
//! [`DiagnosticSink`], and the element renders a fallback instead of taking
//! the frame down. Structural misuse of the tree itself (mounting under a
//! dead parent, laying out an unmounted node) is a programming error and
//! still panics.

use std::any::Any;
use std::time::SystemTime;

use thiserror::Error;

/// Pipeline phase in which a failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Build,
    Layout,
    Paint,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildPhase::Build => write!(f, "build"),
            BuildPhase::Layout => write!(f, "layout"),
            BuildPhase::Paint => write!(f, "paint"),
        }
    }
}

/// A contained application failure, attributed to the widget whose code
/// panicked.
#[derive(Debug, Clone, Error)]
#[error("{phase} failure in {widget}: {message}")]
pub struct BuildError {
    pub phase: BuildPhase,
    /// Concrete type name of the widget being built.
    pub widget: &'static str,
    pub message: String,
    pub timestamp: SystemTime,
}

impl BuildError {
    pub fn new(phase: BuildPhase, widget: &'static str, message: String) -> Self {
        Self {
            phase,
            widget,
            message,
            timestamp: SystemTime::now(),
        }
    }

    /// Extracts a readable message from a caught panic payload.
    pub fn from_panic(phase: BuildPhase, widget: &'static str, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(phase, widget, message)
    }
}

/// Receives every contained failure exactly once.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, error: &BuildError);
}

/// Default sink: routes failures to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, error: &BuildError) {
        log::error!("{error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    pub(crate) struct CollectingSink(pub Mutex<Vec<BuildError>>);

    impl DiagnosticSink for CollectingSink {
        fn report(&self, error: &BuildError) {
            self.0.lock().unwrap().push(error.clone());
        }
    }

    #[test]
    fn test_build_error_display() {
        let err = BuildError::new(BuildPhase::Build, "Label", "boom".into());
        assert_eq!(err.to_string(), "build failure in Label: boom");
    }

    #[test]
    fn test_from_panic_str_payload() {
        let err = BuildError::from_panic(BuildPhase::Build, "Label", Box::new("bad state"));
        assert_eq!(err.message, "bad state");
    }

    #[test]
    fn test_from_panic_string_payload() {
        let err =
            BuildError::from_panic(BuildPhase::Layout, "Grid", Box::new(String::from("overflow")));
        assert_eq!(err.message, "overflow");
        assert_eq!(err.phase, BuildPhase::Layout);
    }

    #[test]
    fn test_collecting_sink_records() {
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        sink.report(&BuildError::new(BuildPhase::Build, "X", "y".into()));
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }
}
