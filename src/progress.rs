//! Progress-callback trait for per-document conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline processes each document. Callers can forward them
//! to a channel, a log, or a terminal progress bar without the library
//! knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use epub_math2svg::{ConversionProgressCallback, ConversionConfig};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, path: &Path, total: usize, replaced: usize, failed: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}/{total} {}: {replaced} replaced, {failed} failed", path.display());
//!     }
//! }
//!
//! let config = ConversionConfig::builder("text", "images")
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the conversion pipeline as it processes each document.
///
/// Documents are processed concurrently, so `on_document_*` methods may be
/// called from different threads at once. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once, after discovery, before any document is read.
    fn on_conversion_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document is about to be read.
    fn on_document_start(&self, path: &Path, total_documents: usize) {
        let _ = (path, total_documents);
    }

    /// Called when a document has been processed (written back if changed).
    ///
    /// * `replaced` — expressions replaced by image references
    /// * `failed`   — expressions left untouched because rendering failed
    fn on_document_complete(&self, path: &Path, total_documents: usize, replaced: usize, failed: usize) {
        let _ = (path, total_documents, replaced, failed);
    }

    /// Called when a document could not be read or written.
    fn on_document_error(&self, path: &Path, total_documents: usize, error: &str) {
        let _ = (path, total_documents, error);
    }

    /// Called once after every document has been attempted, before the
    /// manifest step.
    fn on_conversion_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        replaced: AtomicUsize,
        completed_total: AtomicUsize,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_document_start(&self, _path: &Path, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _path: &Path, _total: usize, replaced: usize, _failed: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.replaced.fetch_add(replaced, Ordering::SeqCst);
        }

        fn on_document_error(&self, _path: &Path, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_conversion_complete(&self, _total: usize, success_count: usize) {
            self.completed_total.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_conversion_start(2);
        cb.on_document_start(Path::new("a.xhtml"), 2);
        cb.on_document_complete(Path::new("a.xhtml"), 2, 3, 0);
        cb.on_document_error(Path::new("b.xhtml"), 2, "unreadable");
        cb.on_conversion_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_document_start(Path::new("a.xhtml"), 2);
        tracker.on_document_complete(Path::new("a.xhtml"), 2, 4, 1);
        tracker.on_document_start(Path::new("b.xhtml"), 2);
        tracker.on_document_error(Path::new("b.xhtml"), 2, "permission denied");
        tracker.on_conversion_complete(2, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.replaced.load(Ordering::SeqCst), 4);
        assert_eq!(tracker.completed_total.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_conversion_start(10);
        cb.on_document_start(Path::new("x.html"), 10);
    }
}
