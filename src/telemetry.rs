//! Telemetry utilities for action timing and span correlation.

use std::time::Instant;

/// Guard for timing action processing and recording metrics.
///
/// Records the action with its result label when dropped. The result starts
/// as `"dropped"` so an action abandoned mid-flight still shows up.
pub struct ActionTimer {
    kind: &'static str,
    result: &'static str,
    start: Instant,
}

impl ActionTimer {
    /// Start timing an action.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            result: "dropped",
            start: Instant::now(),
        }
    }

    /// Set the result label recorded on drop.
    pub fn finish(&mut self, result: &'static str) {
        self.result = result;
    }
}

impl Drop for ActionTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_action(self.kind, self.result, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use crate::state::{ActorId, ChatId};
    use tracing::{Span, info_span};
    use uuid::Uuid;

    /// Span covering a chat worker's lifetime.
    pub fn chat(chat_id: ChatId) -> Span {
        info_span!("chat", chat_id)
    }

    /// Span for one inbound action.
    pub fn action(id: Uuid, kind: &str, actor_id: ActorId) -> Span {
        info_span!("action", id = %id, kind = %kind, actor_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_records_on_drop() {
        crate::metrics::init();
        {
            let mut timer = ActionTimer::new("leave");
            timer.finish("not_found");
        }
        let output = crate::metrics::gather_metrics();
        assert!(output.contains("result=\"not_found\""));
    }
}
