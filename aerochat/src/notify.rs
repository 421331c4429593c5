//! User-facing notification sink.
//!
//! The engine never owns a UI; anything a user should see (send failures,
//! session expiry) goes through the [`Notifier`] trait so the embedding
//! application can surface it as a toast, a status line, or whatever fits.

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Informational, e.g. "reconnected".
    Info,
    /// Something failed but the app can continue, e.g. a send failure.
    Warning,
    /// The session is no longer usable, e.g. auth expiry.
    Error,
}

/// Sink for user-facing notices.
pub trait Notifier: Send + Sync {
    /// Surfaces a notice to the user.
    fn notify(&self, kind: NoticeKind, text: &str);
}

/// Default [`Notifier`] that forwards notices to the tracing subscriber.
///
/// Useful for headless embedders and tests; interactive applications
/// should install their own sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, kind: NoticeKind, text: &str) {
        match kind {
            NoticeKind::Info => tracing::info!(notice = text, "user notice"),
            NoticeKind::Warning => tracing::warn!(notice = text, "user notice"),
            NoticeKind::Error => tracing::error!(notice = text, "user notice"),
        }
    }
}
