//! Injected logging capability
//!
//! Components that log (transactions, cursors, notification channels) carry a
//! [`Logger`] handed to them at construction instead of reaching for the
//! process-wide subscriber directly. A logger either pins a specific
//! `tracing::Dispatch` or defers to whatever default is active when the log
//! point runs.

use std::future::Future;

use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing::Dispatch;

/// Handle to the `tracing` dispatcher a component logs through
#[derive(Clone, Default)]
pub struct Logger {
    dispatch: Option<Dispatch>,
}

impl Logger {
    /// Log through the process default subscriber.
    pub fn global() -> Self {
        Self { dispatch: None }
    }

    /// Log through a specific dispatcher.
    pub fn with_dispatch(dispatch: Dispatch) -> Self {
        Self {
            dispatch: Some(dispatch),
        }
    }

    /// Run `f` with this logger's dispatcher as the default.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    /// Bind a future (typically one about to be spawned) to this logger.
    pub fn attach<F: Future>(&self, fut: F) -> WithDispatch<F> {
        match &self.dispatch {
            Some(dispatch) => fut.with_subscriber(dispatch.clone()),
            None => fut.with_current_subscriber(),
        }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("dispatch", &self.dispatch.as_ref().map(|_| "injected"))
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod capture {
    //! Log capture for tests: a logger whose output lands in a buffer.

    use std::io;
    use std::sync::{Arc, Mutex};

    use super::Logger;

    #[derive(Clone, Default)]
    pub(crate) struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub(crate) fn contents(&self) -> String {
            let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Ok(mut inner) = self.0.lock() {
                inner.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn logger() -> (Logger, Captured) {
        let captured = Captured::default();
        let sink = captured.0.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || CaptureWriter(sink.clone()))
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::TRACE)
            .finish();
        (Logger::with_dispatch(tracing::Dispatch::new(subscriber)), captured)
    }
}
