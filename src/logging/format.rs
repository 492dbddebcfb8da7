use colored::Color;
use std::fmt::{self, Debug, Display, Write};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(super) enum Style {
    /// short time, colored level, for an interactive terminal
    Terminal,
    /// full date and single letter level, for log files
    Plain,
}

pub(super) struct Formatter {
    style: Style,
}

impl Formatter {
    pub(super) fn new(style: Style) -> Self {
        Self { style }
    }
}

/// Span fields of the current scope. `request_id` is pulled out and printed as
/// `@id`, everything else is joined into `{...}`.
#[derive(Default)]
struct ScopeFields {
    request_id: Option<String>,
    rest: String,
}

impl ScopeFields {
    fn push(&mut self, fields: &str) {
        for part in fields.split(' ') {
            if let Some(id) = part.strip_prefix("request_id=") {
                self.request_id = Some(id.to_string());
                continue;
            }
            if part.is_empty() {
                continue;
            }
            self.rest.push_str(if self.rest.is_empty() { "{" } else { " " });
            self.rest.push_str(part);
        }
    }
}

impl Display for ScopeFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.request_id {
            write!(f, "@{}", id)?;
        }
        if !self.rest.is_empty() {
            write!(f, "{}}}", self.rest)?;
        }
        Ok(())
    }
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let now = chrono::Local::now();
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut scope = ScopeFields::default();
        for span in ctx
            .event_scope()
            .into_iter()
            .flat_map(tracing_subscriber::registry::Scope::from_root)
        {
            let exts = span.extensions();
            if let Some(fields) = exts.get::<FormattedFields<N>>() {
                scope.push(fields);
            }
        }
        let target = meta.target().replace("fleetbeat", "fb");

        match self.style {
            Style::Terminal => write!(
                writer,
                "[{} {}] {} {}",
                Dimmed(now.format("%X%.3f")),
                LevelLabel::colored(meta.level()),
                Dimmed(format!("{}{}:", target, scope)),
                visitor
            )?,
            Style::Plain => write!(
                writer,
                "{} {}{} {} {}",
                now.format("%F %X%.3f"),
                target,
                scope,
                LevelLabel::letter(meta.level()),
                visitor
            )?,
        }
        writeln!(writer)
    }
}

/// Collects the message first and the remaining event fields as `key=value`.
#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: String,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            write!(self.fields, " {}={}", field.name(), value).ok();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            write!(self.message, "{:?}", value).ok();
        } else {
            write!(self.fields, " {}={:?}", field.name(), value).ok();
        }
    }
}

impl Display for EventVisitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        f.write_str(&self.fields)
    }
}

struct LevelLabel {
    label: &'static str,
    color: Option<Color>,
}

impl LevelLabel {
    fn colored(level: &Level) -> Self {
        let (label, color) = match *level {
            Level::ERROR => ("ERR", Color::BrightRed),
            Level::WARN => ("WRN", Color::BrightYellow),
            Level::INFO => ("INF", Color::BrightBlue),
            Level::DEBUG => ("DBG", Color::BrightMagenta),
            Level::TRACE => ("TRC", Color::BrightWhite),
        };
        Self {
            label,
            color: Some(color),
        }
    }
    fn letter(level: &Level) -> Self {
        let label = match *level {
            Level::ERROR => "[E]",
            Level::WARN => "[W]",
            Level::INFO => "[I]",
            Level::DEBUG => "[D]",
            Level::TRACE => "[T]",
        };
        Self { label, color: None }
    }
}

impl Display for LevelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.color {
            Some(color) => write!(f, "\x1B[{}m{}\x1B[0m", color.to_fg_str(), self.label),
            None => f.write_str(self.label),
        }
    }
}

struct Dimmed<T>(T);

impl<T: Display> Display for Dimmed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1B[{}m{}\x1B[0m", Color::BrightBlack.to_fg_str(), self.0)
    }
}
