//! A [logfmt](https://brandur.org/logfmt) style formatter for `tracing-subscriber`, used to give
//! the coordinator and worker processes log output that is easy to grep and easy to feed into a
//! structured log ingester.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

use observability_deps::tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use std::fmt;
use tracing_subscriber::{
    fmt::{FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

/// Implements `tracing_subscriber::fmt::FormatEvent` in logfmt format, where everything is
/// written as `key=value` pairs on a single line.
#[derive(Debug, Default)]
pub struct LogFmtLayer;

impl LogFmtLayer {
    /// Create a new logfmt formatting layer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S, N> FormatEvent<S, N> for LogFmtLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(writer, "level={} ", level_str(*metadata.level()))?;
        write!(writer, "target={} ", metadata.target())?;

        let mut visitor = LogFmtVisitor::new(&mut writer);
        event.record(&mut visitor);
        visitor.finish()?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, " span={}", span.name())?;
            }
        }

        writeln!(writer)
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Writes each recorded field as a `key=value` pair, quoting values that contain whitespace.
struct LogFmtVisitor<'a, 'writer> {
    writer: &'a mut tracing_subscriber::fmt::format::Writer<'writer>,
    result: fmt::Result,
}

impl<'a, 'writer> LogFmtVisitor<'a, 'writer> {
    fn new(writer: &'a mut tracing_subscriber::fmt::format::Writer<'writer>) -> Self {
        Self {
            writer,
            result: Ok(()),
        }
    }

    fn finish(self) -> fmt::Result {
        self.result
    }

    fn record(&mut self, field: &Field, value: &dyn fmt::Display) {
        if self.result.is_err() {
            return;
        }
        let name = field.name();
        let formatted = format!("{}", value);
        self.result = if formatted.contains(char::is_whitespace) {
            write!(self.writer, " {}=\"{}\"", name, formatted.replace('"', "\\\""))
        } else {
            write!(self.writer, " {}={}", name, formatted)
        };
    }
}

impl<'a, 'writer> Visit for LogFmtVisitor<'a, 'writer> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, &format_args!("{:?}", value))
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, &value)
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record(field, &value)
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record(field, &value)
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record(field, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use observability_deps::tracing::info;
    use tracing_subscriber::prelude::*;

    #[test]
    fn formats_known_fields() {
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().event_format(LogFmtLayer::new()));
        observability_deps::tracing::subscriber::with_default(subscriber, || {
            info!(contribution_id = 42, database = "foo", "submitted contribution");
        });
    }
}
