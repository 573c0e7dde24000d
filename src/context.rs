use std::time::{Duration, Instant};
use tracing::{info_span, Span};

/// Logging handle threaded through every stage of a run.
///
/// Created once at the entry point; components emit their events with
/// `parent: ctx.span()` instead of relying on whatever span is current on
/// the thread, which keeps worker-pool events attached to the run.
#[derive(Debug, Clone)]
pub struct RunContext {
    span: Span,
    started: Instant,
}

impl RunContext {
    pub fn new(label: &str) -> Self {
        Self {
            span: info_span!("run", label = label),
            started: Instant::now(),
        }
    }

    /// A context whose events go nowhere, for tests and library callers
    /// that don't care about diagnostics.
    pub fn disabled() -> Self {
        Self {
            span: Span::none(),
            started: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_tracks_run_start() {
        let ctx = RunContext::new("test");
        std::thread::sleep(Duration::from_millis(5));
        let first = ctx.elapsed();
        assert!(first >= Duration::from_millis(5));

        // Clones share the start time
        assert!(ctx.clone().elapsed() >= first);
    }
}
