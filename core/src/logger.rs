use std::sync::{Arc, OnceLock};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Receives formatted log records from the library
pub trait LogSink: Send + Sync {
    fn log(&self, level: String, message: String);
}

// Global storage for the sink
static GLOBAL_SINK: OnceLock<Arc<dyn LogSink>> = OnceLock::new();

/// Forwards every event's level and message to the installed sink
pub struct SinkLayer;

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if let Some(sink) = GLOBAL_SINK.get() {
            let level = event.metadata().level().to_string();
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            sink.log(level, visitor.message + &visitor.fields);
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        use std::fmt::Write;
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Route all library logging into `sink`
///
/// Only the first call installs anything; later calls are ignored.
pub fn init_logger(sink: Box<dyn LogSink>) {
    if GLOBAL_SINK.set(Arc::from(sink)).is_err() {
        // value already set
        return;
    }

    let subscriber = tracing_subscriber::registry()
        .with(SinkLayer)
        .with(tracing_subscriber::filter::LevelFilter::DEBUG);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Human-readable logging to stderr
///
/// `RUST_LOG` wins over `default_directive` when set. Does nothing if a
/// global subscriber is already installed.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Records = Arc<Mutex<Vec<(String, String)>>>;

    struct CapturingSink(Records);

    impl LogSink for CapturingSink {
        fn log(&self, level: String, message: String) {
            self.0.lock().unwrap().push((level, message));
        }
    }

    #[test]
    fn test_sink_layer_formats_message_and_fields() {
        let captured: Records = Arc::default();
        assert!(GLOBAL_SINK.set(Arc::new(CapturingSink(captured.clone()))).is_ok());

        // Scoped so the test does not depend on the global subscriber
        let subscriber = tracing_subscriber::registry().with(SinkLayer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(hop = 3, "dropping envelope");
        });

        let records = captured.lock().unwrap();
        assert_eq!(
            records.as_slice(),
            &[("WARN".to_string(), "dropping envelope hop=3".to_string())]
        );
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing("info");
        init_tracing("debug");
    }
}
