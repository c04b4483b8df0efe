//! Command-line arguments, the optional YAML settings file, and validation.
//!
//! `CliArgs` is what the user typed; `SplitConfig` is the resolved, checked
//! configuration the pipeline runs with. Everything that can be rejected is
//! rejected here, before any input is read.

mod vars;

use clap::Parser;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{
    ConfigError, ConflictingKeySourcesSnafu, DelimiterContainsNewlineSnafu, EmptyDelimiterSnafu,
    ExpressionCompileSnafu, InvalidFieldIndexSnafu, InvalidFieldPathSnafu, InvalidHeaderSnafu,
    InvalidOutputBaseSnafu, MissingKeySourceSnafu, MissingOutputBaseSnafu, PartSizeTooSmallSnafu,
    ReadFileSnafu, YamlParseSnafu, ZeroCopiesSnafu, ZeroReducersSnafu,
};
use crate::key::{ExpressionKey, FieldKey, JsonKey, KeyExtractor, Program};
use crate::partition::Partitioner;
use crate::pipeline::UploadLimits;
use crate::storage::BackendConfig;

pub use vars::interpolate;

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Environment variable holding the destination base for uploaded objects.
pub const OUTPUT_BASE_ENV: &str = "SLEET_OUTPUT_BASE";

/// Uploads allowed in flight at once.
pub const MAX_CONCURRENT_UPLOADS: usize = 10;

/// Default per-sink buffered byte count at which input is paused.
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * KB;

/// Staged buckets at least this large are uploaded in parts.
pub const DEFAULT_MULTIPART_THRESHOLD: usize = 16 * MB;

/// Default multipart part size.
pub const DEFAULT_PART_SIZE: usize = 8 * MB;

/// Smallest part size object stores accept for all but the last part.
pub const MIN_PART_SIZE: usize = 5 * MB;

/// Parts of one object uploading at once.
pub const MAX_PARTS_IN_FLIGHT: usize = 4;

/// Split a line-oriented record stream into N buckets and upload each bucket
/// as one object.
#[derive(Parser, Debug, Clone)]
#[command(name = "sleet", version, about, long_about = None)]
pub struct CliArgs {
    /// Number of reducers (buckets) to split the input into
    #[arg(short = 'n', long = "reducers", value_name = "N")]
    pub reducers: usize,

    /// Field delimiter for delimited records
    #[arg(short = 'd', long, default_value = "\t", value_name = "DELIM")]
    pub delimiter: String,

    /// Key fields: 1-based field numbers, or dotted paths with --json
    #[arg(short = 'f', long = "fields", value_delimiter = ',', value_name = "FIELDS")]
    pub fields: Vec<String>,

    /// Parse each record as a JSON document
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Treat the key as the bucket number instead of hashing it
    #[arg(short = 'i', long = "integer")]
    pub integer: bool,

    /// Key expression evaluated per record (see `line`, `fields`, `this`)
    #[arg(short = 'e', long = "expression", value_name = "EXPR")]
    pub expression: Option<String>,

    /// Replication factor, passed to storage as object metadata
    #[arg(short = 'c', long = "copies", value_name = "COPIES")]
    pub copies: Option<u32>,

    /// Extra header for uploaded objects, as 'name: value' (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Destination base for uploaded objects, e.g. s3://bucket/job/reduce.
    #[arg(long, env = OUTPUT_BASE_ENV, hide_env_values = true, value_name = "URL")]
    pub output_base: Option<String>,

    /// YAML settings file (storage options, staging directory, headers)
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    pub log_level: String,

    /// Validate the configuration and print the routing plan without reading input
    #[arg(long)]
    pub dry_run: bool,
}

/// Settings that only come from the YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Options passed to the object store builder (credentials, region, endpoint).
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Directory for staging files (default: system temp dir).
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Buffered bytes per sink before input is paused.
    #[serde(default = "default_high_water_mark")]
    pub sink_high_water_mark: usize,

    /// Headers applied to every uploaded object.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Staged size in bytes from which buckets are uploaded in parts.
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: usize,

    /// Part size in bytes for multipart uploads.
    #[serde(default = "default_part_size")]
    pub multipart_part_size: usize,
}

fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

fn default_multipart_threshold() -> usize {
    DEFAULT_MULTIPART_THRESHOLD
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            storage_options: HashMap::new(),
            staging_dir: None,
            sink_high_water_mark: default_high_water_mark(),
            headers: BTreeMap::new(),
            multipart_threshold: default_multipart_threshold(),
            multipart_part_size: default_part_size(),
        }
    }
}

impl FileConfig {
    /// Load settings from a YAML file, expanding environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_yaml(&content)
    }

    /// Parse settings from YAML text, expanding environment variables.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let content = vars::interpolate(content)?;
        serde_yaml::from_str(&content).context(YamlParseSnafu)
    }
}

/// Resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct SplitConfig {
    pub reducers: usize,
    pub extractor: KeyExtractor,
    pub partitioner: Partitioner,
    /// Destination base, e.g. `s3://bucket/job/reduce.`
    pub output_base: String,
    pub storage_options: HashMap<String, String>,
    /// Headers for uploaded objects, file defaults overridden by flags.
    pub headers: Vec<(String, String)>,
    pub copies: Option<u32>,
    pub staging_dir: PathBuf,
    pub high_water_mark: usize,
    pub upload: UploadLimits,
}

impl SplitConfig {
    /// Human-readable routing plan, printed by `--dry-run`.
    pub fn describe(&self) -> String {
        let key = match &self.extractor {
            KeyExtractor::Fields(_) | KeyExtractor::Json(_) => self.extractor.mode().to_string(),
            KeyExtractor::Expression(key) => format!("expression `{}`", key.program().source()),
        };
        let selection = match self.partitioner {
            Partitioner::Hash => "hash",
            Partitioner::Index => "integer",
        };

        let mut plan = format!(
            "reducers: {}\nkey: {key}\nselection: {selection}\noutput: {}<run id>.<bucket>\nstaging: {}\nhigh water mark: {} bytes\nmax concurrent uploads: {}\nmultipart: from {} bytes in {} byte parts",
            self.reducers,
            self.output_base,
            self.staging_dir.display(),
            self.high_water_mark,
            self.upload.max_concurrent,
            self.upload.multipart_threshold,
            self.upload.part_size,
        );
        if let Some(copies) = self.copies {
            plan.push_str(&format!("\ncopies: {copies}"));
        }
        for (name, value) in &self.headers {
            plan.push_str(&format!("\nheader: {name}: {value}"));
        }
        plan
    }
}

/// Split a `name: value` header.
fn parse_header(header: &str) -> Result<(String, String), ConfigError> {
    header
        .split_once(':')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty() && !name.contains(char::is_whitespace))
        .context(InvalidHeaderSnafu { header })
}

fn parse_field_index(field: &str) -> Result<usize, ConfigError> {
    field
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|index| *index > 0)
        .context(InvalidFieldIndexSnafu { field })
}

fn check_field_path(field: &str) -> Result<String, ConfigError> {
    ensure!(
        !field.is_empty() && field.split('.').all(|segment| !segment.is_empty()),
        InvalidFieldPathSnafu { field }
    );
    Ok(field.to_string())
}

impl CliArgs {
    /// Load the settings file, if one was given.
    pub fn file_config(&self) -> Result<FileConfig, ConfigError> {
        match &self.config {
            Some(path) => FileConfig::from_file(path),
            None => Ok(FileConfig::default()),
        }
    }

    /// Check every argument and resolve the run configuration.
    pub fn validate(&self) -> Result<SplitConfig, ConfigError> {
        let file = self.file_config()?;
        self.validate_with(file)
    }

    /// Like [`validate`](Self::validate), with settings already loaded.
    pub fn validate_with(&self, file: FileConfig) -> Result<SplitConfig, ConfigError> {
        ensure!(self.reducers > 0, ZeroReducersSnafu);
        ensure!(!self.delimiter.is_empty(), EmptyDelimiterSnafu);
        ensure!(
            !self.delimiter.contains('\n'),
            DelimiterContainsNewlineSnafu {
                delimiter: &self.delimiter
            }
        );
        ensure!(self.copies != Some(0), ZeroCopiesSnafu);
        ensure!(
            file.multipart_part_size >= MIN_PART_SIZE,
            PartSizeTooSmallSnafu {
                size: file.multipart_part_size,
                min: MIN_PART_SIZE,
            }
        );

        let extractor = self.key_extractor()?;

        let output_base = self.output_base.clone().context(MissingOutputBaseSnafu {
            var: OUTPUT_BASE_ENV,
        })?;
        BackendConfig::parse_url(&output_base).context(InvalidOutputBaseSnafu {
            base: &output_base,
        })?;

        let mut headers: BTreeMap<String, (String, String)> = file
            .headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), (name, value)))
            .collect();
        for header in &self.headers {
            let (name, value) = parse_header(header)?;
            headers.insert(name.to_ascii_lowercase(), (name, value));
        }

        Ok(SplitConfig {
            reducers: self.reducers,
            extractor,
            partitioner: if self.integer {
                Partitioner::Index
            } else {
                Partitioner::Hash
            },
            output_base,
            storage_options: file.storage_options,
            headers: headers.into_values().collect(),
            copies: self.copies,
            staging_dir: file.staging_dir.unwrap_or_else(std::env::temp_dir),
            high_water_mark: file.sink_high_water_mark.max(1),
            upload: UploadLimits {
                max_concurrent: MAX_CONCURRENT_UPLOADS,
                multipart_threshold: file.multipart_threshold as u64,
                part_size: file.multipart_part_size,
                max_parts_in_flight: MAX_PARTS_IN_FLIGHT,
            },
        })
    }

    fn key_extractor(&self) -> Result<KeyExtractor, ConfigError> {
        match (&self.expression, self.fields.is_empty()) {
            (Some(_), false) => ConflictingKeySourcesSnafu.fail(),
            (None, true) => MissingKeySourceSnafu.fail(),
            (Some(source), true) => {
                let program = Program::compile(source, self.json).context(ExpressionCompileSnafu)?;
                Ok(KeyExtractor::Expression(ExpressionKey::new(
                    program,
                    self.json,
                    self.delimiter.clone(),
                    self.integer,
                )))
            }
            (None, false) if self.json => {
                let paths = self
                    .fields
                    .iter()
                    .map(|field| check_field_path(field))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(KeyExtractor::Json(JsonKey::new(&self.delimiter, &paths)))
            }
            (None, false) => {
                let indices = self
                    .fields
                    .iter()
                    .map(|field| parse_field_index(field))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(KeyExtractor::Fields(FieldKey::new(&self.delimiter, indices)))
            }
        }
    }
}
