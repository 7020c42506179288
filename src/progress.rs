//! Progress-callback trait for per-stage scan events.
//!
//! Inject an [`Arc<dyn ScanProgressCallback>`] via
//! [`crate::config::ScanConfigBuilder::progress_callback`] to receive events
//! as the scanner moves through validate → preprocess → extract → analyze.
//!
//! # Example
//!
//! ```rust
//! use eatsafe::{ScanConfig, ScanProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ScanProgressCallback for Printer {
//!     fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
//!         eprintln!("{stage} done in {elapsed_ms}ms");
//!     }
//! }
//!
//! let config = ScanConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn ScanProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use std::sync::Arc;

/// Called by the scanner as it runs each stage.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. A scan runs its stages one after another, so events
/// for one scan never interleave.
pub trait ScanProgressCallback: Send + Sync {
    /// Called just before a stage starts.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finishes successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called when the first OCR pass came back short and the relaxed retry starts.
    ///
    /// # Arguments
    /// * `chars`: length of the cleaned first-pass text
    fn on_relaxed_retry(&self, chars: usize) {
        let _ = chars;
    }

    /// Called when a stage fails; the scan stops after this.
    fn on_stage_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ScanProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ScanConfig`].
pub type ProgressCallback = Arc<dyn ScanProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        retries: AtomicUsize,
        errors: Mutex<Vec<Stage>>,
    }

    impl ScanProgressCallback for TrackingCallback {
        fn on_stage_start(&self, _stage: Stage) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _stage: Stage, _elapsed_ms: u64) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_relaxed_retry(&self, _chars: usize) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_error(&self, stage: Stage, _error: &str) {
            self.errors.lock().unwrap().push(stage);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Validate);
        cb.on_stage_complete(Stage::Validate, 3);
        cb.on_relaxed_retry(4);
        cb.on_stage_error(Stage::Extract, "no text");
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_stage_start(Stage::Validate);
        tracker.on_stage_complete(Stage::Validate, 1);
        tracker.on_stage_start(Stage::Extract);
        tracker.on_relaxed_retry(2);
        tracker.on_stage_error(Stage::Extract, "no text");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.retries.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.errors.lock().unwrap(), vec![Stage::Extract]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn ScanProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_stage_start(Stage::Analyze);
        cb.on_stage_complete(Stage::Analyze, 1200);
    }
}
