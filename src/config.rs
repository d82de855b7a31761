use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::FlushPolicy;
use crate::codec::{Codec, Decompressor, GzipDecompressor, JsonCodec, MessagePackCodec};
use crate::error::ConfigError;
use crate::filter::{AppendDate, Filter, MinSegments, RequireField, SetField, SetTimestamp};
use crate::log_entry::Value;
use crate::scheduler::SchedulerSettings;
use crate::tag::Pattern;

#[cfg(feature = "dashboard")]
use crate::sink::dashboard::DashboardConfig;
#[cfg(feature = "elasticsearch")]
use crate::sink::elasticsearch::ElasticSearchConfig;
#[cfg(feature = "postgres")]
use crate::sink::postgres::PostgresConfig;

fn default_listen_addr() -> String {
    "0.0.0.0:8888".to_string()
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_request_max_count_at_once() -> usize {
    2000
}

fn default_worker_count() -> usize {
    1
}

fn default_flush_interval_secs() -> u64 {
    300
}

fn default_tick_interval_ms() -> u64 {
    5
}

fn default_codecs() -> Vec<CodecKind> {
    vec![CodecKind::Json, CodecKind::Msgpack]
}

fn default_decompressors() -> Vec<DecompressorKind> {
    vec![DecompressorKind::Gzip]
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Json,
    Msgpack,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn Codec> {
        match self {
            CodecKind::Json => Arc::new(JsonCodec),
            CodecKind::Msgpack => Arc::new(MessagePackCodec),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecompressorKind {
    Gzip,
}

impl DecompressorKind {
    pub fn build(self) -> Arc<dyn Decompressor> {
        match self {
            DecompressorKind::Gzip => Arc::new(GzipDecompressor),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    MinSegments {
        count: usize,
    },
    AppendDate {
        #[serde(default = "default_date_format")]
        format: String,
    },
    SetTimestamp {
        field: String,
    },
    SetField {
        field: String,
        value: serde_json::Value,
    },
    RequireField {
        field: String,
    },
}

impl FilterConfig {
    pub fn build(&self) -> Arc<dyn Filter> {
        match self {
            FilterConfig::MinSegments { count } => Arc::new(MinSegments { count: *count }),
            FilterConfig::AppendDate { format } => Arc::new(AppendDate {
                format: format.clone(),
            }),
            FilterConfig::SetTimestamp { field } => Arc::new(SetTimestamp {
                field: field.clone(),
            }),
            FilterConfig::SetField { field, value } => Arc::new(SetField {
                field: field.clone(),
                value: Value::from(value.clone()),
            }),
            FilterConfig::RequireField { field } => Arc::new(RequireField {
                field: field.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    Stdout {},
    #[cfg(feature = "elasticsearch")]
    #[serde(rename = "elasticsearch")]
    ElasticSearch(ElasticSearchConfig),
    #[cfg(feature = "postgres")]
    Postgres(PostgresConfig),
    #[cfg(feature = "dashboard")]
    Dashboard(DashboardConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Dotted pattern; matches every tag when omitted.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    pub sinks: Vec<SinkConfig>,
}

impl PipelineConfig {
    pub fn pattern(&self) -> Result<Pattern, ConfigError> {
        match &self.pattern {
            None => Ok(Pattern::default()),
            Some(pattern) => Pattern::parse(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.clone(),
                source,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_request_max_count_at_once")]
    pub request_max_count_at_once: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default)]
    pub flush_max_count: Option<usize>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_codecs")]
    pub codecs: Vec<CodecKind>,
    #[serde(default = "default_decompressors")]
    pub decompressors: Vec<DecompressorKind>,
    pub pipelines: Vec<PipelineConfig>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            base_path: default_base_path(),
            request_max_count_at_once: default_request_max_count_at_once(),
            worker_count: default_worker_count(),
            flush_interval_secs: default_flush_interval_secs(),
            flush_max_count: None,
            tick_interval_ms: default_tick_interval_ms(),
            codecs: default_codecs(),
            decompressors: default_decompressors(),
            pipelines: vec![PipelineConfig {
                pattern: None,
                filters: Vec::new(),
                sinks: vec![SinkConfig::Stdout {}],
            }],
        }
    }
}

impl CollectorConfig {
    pub fn from_yaml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(input))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::Invalid(reason.to_string()));

        if self.base_path.trim().is_empty() {
            return invalid("base_path must not be empty");
        }
        if !self.base_path.starts_with('/') {
            return invalid("base_path must start with '/'");
        }
        if self.base_path != "/" && self.base_path.ends_with('/') {
            return invalid("base_path can not end with '/'");
        }
        if self.request_max_count_at_once == 0 {
            return invalid("request_max_count_at_once must be greater than zero");
        }
        if self.worker_count == 0 {
            return invalid("worker_count must be greater than zero");
        }
        if self.flush_interval_secs == 0 {
            return invalid("flush_interval_secs must be greater than zero");
        }
        if self.flush_max_count == Some(0) {
            return invalid("flush_max_count can not be equal or less than zero");
        }
        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be greater than zero");
        }
        if self.codecs.is_empty() {
            return invalid("codecs must have at least one item");
        }
        if self.pipelines.is_empty() {
            return invalid("pipelines must have at least one item");
        }
        for pipeline in &self.pipelines {
            pipeline.pattern()?;
            for filter in &pipeline.filters {
                let FilterConfig::AppendDate { format } = filter else {
                    continue;
                };
                if !AppendDate::is_valid_format(format) {
                    return Err(ConfigError::Invalid(format!(
                        "append_date format '{format}' is not a valid date format"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy::new(
            Duration::from_secs(self.flush_interval_secs),
            self.flush_max_count.and_then(NonZeroUsize::new),
        )
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            max_records_per_tick: self.request_max_count_at_once,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            flush: self.flush_policy(),
        }
    }

    pub fn codecs(&self) -> Vec<Arc<dyn Codec>> {
        self.codecs.iter().map(|c| c.build()).collect()
    }

    pub fn decompressors(&self) -> Vec<Arc<dyn Decompressor>> {
        self.decompressors.iter().map(|d| d.build()).collect()
    }
}

/// Expand `${VAR_NAME}` patterns in a string with environment variable values.
/// Unknown vars become empty strings.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let mut from = 0;
    while let Some(offset) = result[from..].find("${") {
        let start = from + offset;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        from = start + value.len();
    }
    result
}
