use colored::*;
use std::str::FromStr;
use ontapexec_traits::logging::LoggingService;
use tracing::Level;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{FmtContext, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Crates whose protocol chatter stays at `warn` unless `RUST_LOG` says otherwise.
const NOISY_DEPENDENCIES: &[&str] = &["russh=warn", "russh_keys=warn"];

fn level_label(level: Level, use_color: bool) -> ColoredString {
    let label = match level {
        Level::TRACE => "TRACE",
        Level::DEBUG => "DEBUG",
        Level::INFO => " INFO",
        Level::WARN => " WARN",
        Level::ERROR => "ERROR",
    };
    if !use_color {
        return label.normal();
    }
    match level {
        Level::TRACE => label.magenta().bold(),
        Level::DEBUG => label.blue().bold(),
        Level::INFO => label.green().bold(),
        Level::WARN => label.yellow().bold(),
        Level::ERROR => label.red().bold(),
    }
}

/// Formats events as `time LEVEL message`. Debug and trace events also name
/// the module that emitted them.
struct TranscriptFormatter {
    use_color: bool,
}

impl<S, N> FormatEvent<S, N> for TranscriptFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = *metadata.level();
        let time = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");

        write!(writer, "{} {} ", time, level_label(level, self.use_color))?;

        if level >= Level::DEBUG {
            let target = metadata.target();
            if self.use_color {
                write!(writer, "{} ", target.dimmed())?;
            } else {
                write!(writer, "{} ", target)?;
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

fn build_filter(level_str: &str) -> EnvFilter {
    let level = Level::from_str(level_str).unwrap_or(Level::INFO);

    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        for directive in NOISY_DEPENDENCIES {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

pub struct LoggingServiceImpl;

impl LoggingService for LoggingServiceImpl {
    fn init_logging(
        level: &str,
        use_color: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let layer = Layer::default()
            .with_writer(std::io::stderr)
            .event_format(TranscriptFormatter { use_color });

        tracing_subscriber::registry()
            .with(build_filter(level))
            .with(layer)
            .try_init()?;

        Ok(())
    }
}
