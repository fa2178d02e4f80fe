use std::{fs, io, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{Event, Subscriber};
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter,
    fmt::{
        self, FmtContext, FormatEvent, FormatFields, FormattedFields,
        format::{JsonFields, Writer},
    },
    layer::SubscriberExt,
    registry::LookupSpan,
};

/// Overrides the configured filter when set, e.g. `SG_XFER_LOG=sg_xfer::scheduler=trace`.
pub const LOG_ENV: &str = "SG_XFER_LOG";

#[derive(Debug, Deserialize)]
struct LoggerFile {
    logger: LogConfig,
}

/// The `logger:` block of the logger YAML file.
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub level: String,
    pub output: LogOutput,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub is_show_line: bool,
    #[serde(default)]
    pub is_show_module_path: bool,
    #[serde(default = "show_target")]
    pub is_show_target: bool,
    pub file: Option<LogFileConfig>,
}

fn show_target() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Compact,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationFrequency {
    Minutely,
    Hourly,
    Daily,
    #[default]
    Never,
}

impl From<RotationFrequency> for Rotation {
    fn from(r: RotationFrequency) -> Self {
        match r {
            RotationFrequency::Minutely => Rotation::MINUTELY,
            RotationFrequency::Hourly => Rotation::HOURLY,
            RotationFrequency::Daily => Rotation::DAILY,
            RotationFrequency::Never => Rotation::NEVER,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogFileConfig {
    pub path: String,
    #[serde(default)]
    pub rotation_frequency: RotationFrequency,
}

impl LogConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read logger config {}", path.display()))?;
        Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse logger config {}", path.display()))
    }

    pub fn from_yaml(s: &str) -> Result<Self> {
        let file: LoggerFile = serde_yaml::from_str(s)?;
        if file.logger.output == LogOutput::File {
            file.logger
                .file
                .as_ref()
                .context("output: file needs a `file:` block")?;
        }
        Ok(file.logger)
    }

    fn filter(&self) -> Result<EnvFilter> {
        match std::env::var(LOG_ENV) {
            Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
                .with_context(|| format!("bad {LOG_ENV} filter {directives:?}")),
            _ => EnvFilter::try_new(&self.level)
                .with_context(|| format!("bad log level {:?}", self.level)),
        }
    }

    fn writer(&self) -> Result<(NonBlocking, WorkerGuard)> {
        Ok(match self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File => {
                let file = self.file.as_ref().context("output: file needs a `file:` block")?;
                let path = Path::new(&file.path);
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let name = path
                    .file_name()
                    .with_context(|| format!("log path {:?} has no file name", file.path))?;
                let appender =
                    RollingFileAppender::new(file.rotation_frequency.into(), dir, name);
                tracing_appender::non_blocking(appender)
            },
        })
    }
}

/// One JSON object per line. Event fields sit at the top level next to
/// `ts` and `level`; fields of the enclosing spans are folded in and the
/// span path goes under `span`.
struct JsonLine {
    show_target: bool,
    show_module: bool,
    show_line: bool,
}

impl<S, N> FormatEvent<S, N> for JsonLine
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let mut line = Map::new();
        line.insert("ts".into(), json!(chrono::Local::now().to_rfc3339()));
        line.insert("level".into(), json!(meta.level().as_str()));
        if self.show_target {
            line.insert("target".into(), json!(meta.target()));
        }
        if self.show_module
            && let Some(module) = meta.module_path()
        {
            line.insert("module".into(), json!(module));
        }
        if self.show_line
            && let Some(n) = meta.line()
        {
            line.insert("line".into(), json!(n));
        }

        if let Some(scope) = ctx.event_scope() {
            let mut path = Vec::new();
            for span in scope.from_root() {
                path.push(span.name());
                if let Some(ext) = span.extensions().get::<FormattedFields<JsonFields>>()
                    && let Ok(Value::Object(fields)) = serde_json::from_str(&ext.fields)
                {
                    line.extend(fields);
                }
            }
            line.insert("span".into(), json!(path.join(":")));
        }

        let mut visitor = FieldVisitor(&mut line);
        event.record(&mut visitor);

        let out = serde_json::to_string(&line).map_err(|_| std::fmt::Error)?;
        writeln!(writer, "{out}")
    }
}

struct FieldVisitor<'a>(&'a mut Map<String, Value>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().into(), json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().into(), json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().into(), json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().into(), json!(value));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().into(), json!(format!("{value:?}")));
    }
}

/// Install the global subscriber described by the YAML file at
/// `config_path`. Keep the returned guard alive until exit or buffered
/// lines are lost.
pub fn init_logger<P: AsRef<Path>>(config_path: P) -> Result<WorkerGuard> {
    let config = LogConfig::load(config_path)?;
    let filter = config.filter()?;
    let (writer, guard) = config.writer()?;

    let json = (config.format == LogFormat::Json).then(|| {
        let writer = writer.clone();
        fmt::layer()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .event_format(JsonLine {
                show_target: config.is_show_target,
                show_module: config.is_show_module_path,
                show_line: config.is_show_line,
            })
            .fmt_fields(JsonFields::default())
    });
    let compact = (config.format == LogFormat::Compact).then(|| {
        fmt::layer()
            .with_writer(move || writer.clone())
            .with_ansi(config.output != LogOutput::File)
            .with_line_number(config.is_show_line)
            .with_target(config.is_show_target)
            .compact()
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(compact);
    tracing::subscriber::set_global_default(subscriber)
        .context("a global subscriber is already installed")?;

    Ok(guard)
}
