use crate::config::LogsConfig;
use crate::logging::format::{Formatter, Style};
pub use log_writer::LogWriter;
use tracing::{Level, Metadata};
use tracing_subscriber::Layer;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

mod format;
mod log_writer;

/// Own events honour the configured level, dependencies are capped at INFO.
fn accepts(metadata: &Metadata<'_>, level: Level) -> bool {
    let own = metadata
        .module_path()
        .is_some_and(|it| it == "fleetbeat" || it.starts_with("fleetbeat::"));
    if own {
        metadata.level() <= &level
    } else {
        metadata.level() <= &Level::INFO
    }
}

pub fn registry_logs(writer: &LogWriter, config: &LogsConfig) -> anyhow::Result<()> {
    let level = config.level;
    let layer = match config.parse_dir()? {
        Some(dir) => {
            let file = writer.create_file_writer(dir.join("fleetbeat.log"))?;
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .event_format(Formatter::new(Style::Plain))
                .with_writer(file)
                .with_filter(filter::filter_fn(move |metadata| accepts(metadata, level)))
                .boxed()
        }
        None => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .event_format(Formatter::new(Style::Terminal))
            .with_filter(filter::filter_fn(move |metadata| accepts(metadata, level)))
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(tracing_error::ErrorLayer::default())
        .try_init()?;
    Ok(())
}
