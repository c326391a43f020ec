// In app/src/tracing_layer.rs

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;

const JOURNAL_SIZE: usize = 200;

pub type Journal = Arc<Mutex<VecDeque<String>>>;

/// Keeps the most recent WARN and ERROR lines so a replay can end with a
/// digest of what went wrong.
pub struct WarningJournalLayer {
    journal: Journal,
}

impl WarningJournalLayer {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl<S> Layer<S> for WarningJournalLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = format!("{level} {}{}", visitor.message, visitor.fields);

        let Ok(mut journal) = self.journal.lock() else {
            return;
        };
        if journal.len() >= JOURNAL_SIZE {
            journal.pop_front();
        }
        journal.push_back(line);
    }
}

/// Renders the `message` field followed by every other field as `key=value`.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl tracing::field::Visit for LineVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push_str(&format!(" {}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_only_warnings_are_journaled() {
        let journal = Journal::default();
        let subscriber = tracing_subscriber::registry().with(WarningJournalLayer::new(journal.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Routine.");
            tracing::warn!(symbol = "BTCUSDT", "Directive not executed.");
            tracing::error!("Broken.");
        });

        let journal = journal.lock().unwrap();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[0], "WARN Directive not executed. symbol=BTCUSDT");
        assert!(journal[1].starts_with("ERROR Broken."));
    }
}
