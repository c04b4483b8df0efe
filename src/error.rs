//! Error types for sleet using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase. Every error is fatal for the run;
//! `PipelineError::exit_code` decides how the process reports it.

use snafu::prelude::*;
use std::path::PathBuf;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error: {source}"))]
    GcsConfig { source: object_store::Error },

    /// Azure configuration error.
    #[snafu(display("Azure configuration error: {source}"))]
    AzureConfig { source: object_store::Error },
}

// ============ Expression Errors ============

/// Errors raised while compiling or evaluating a key expression.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExprError {
    #[snafu(display("unexpected character '{ch}' at offset {position}"))]
    UnexpectedChar { ch: char, position: usize },

    #[snafu(display("unterminated string starting at offset {position}"))]
    UnterminatedString { position: usize },

    #[snafu(display("invalid number '{text}' at offset {position}"))]
    InvalidNumber { text: String, position: usize },

    #[snafu(display("expected {expected} at offset {position}, found {found}"))]
    UnexpectedToken {
        expected: String,
        found: String,
        position: usize,
    },

    #[snafu(display("unknown identifier '{name}' (expected line, fields or this)"))]
    UnknownIdentifier { name: String },

    #[snafu(display("unknown function '{name}'"))]
    UnknownFunction { name: String },

    #[snafu(display("function '{name}' takes {expected} argument(s), got {found}"))]
    Arity {
        name: String,
        expected: &'static str,
        found: usize,
    },

    /// `this` is only bound when records are parsed as JSON.
    #[snafu(display("'this' is only available in JSON mode (-j)"))]
    ThisRequiresJson,

    #[snafu(display("cannot apply '{op}' to {left} and {right}"))]
    TypeMismatch {
        op: String,
        left: &'static str,
        right: &'static str,
    },

    #[snafu(display("{function}(): {message}"))]
    InvalidArgument {
        function: &'static str,
        message: String,
    },

    #[snafu(display("division by zero"))]
    DivisionByZero,

    #[snafu(display("arithmetic produced a non-finite number"))]
    NonFiniteNumber,
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
///
/// These are usage errors: they are detected before any input is read.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Reducer count is zero.
    #[snafu(display("Number of reducers (-n) must be a positive integer"))]
    ZeroReducers,

    /// Delimiter is empty.
    #[snafu(display("Delimiter (-d) cannot be empty"))]
    EmptyDelimiter,

    /// Delimiter would split records.
    #[snafu(display("Delimiter (-d) cannot contain a newline: {delimiter:?}"))]
    DelimiterContainsNewline { delimiter: String },

    /// Neither fields nor an expression were given.
    #[snafu(display("One of --fields (-f) or --expression (-e) is required"))]
    MissingKeySource,

    /// Both fields and an expression were given.
    #[snafu(display("--fields (-f) and --expression (-e) are mutually exclusive"))]
    ConflictingKeySources,

    /// Delimited-mode field is not a positive integer.
    #[snafu(display("Field '{field}' is not a valid 1-based field number"))]
    InvalidFieldIndex { field: String },

    /// JSON-mode field path is empty or has an empty segment.
    #[snafu(display("Field path '{field}' is not a valid dotted path"))]
    InvalidFieldPath { field: String },

    /// Multipart part size is below what object stores accept.
    #[snafu(display("multipart_part_size must be at least {min} bytes, got {size}"))]
    PartSizeTooSmall { size: usize, min: usize },

    /// Replication factor is zero.
    #[snafu(display("Number of copies (-c) must be a positive integer"))]
    ZeroCopies,

    /// Header is not `name: value`.
    #[snafu(display("Header '{header}' must have the form 'name: value'"))]
    InvalidHeader { header: String },

    /// Output base is not configured.
    #[snafu(display("{var} must be set in the environment"))]
    MissingOutputBase { var: String },

    /// Output base is not a usable storage location.
    #[snafu(display("Invalid output base '{base}': {source}"))]
    InvalidOutputBase { base: String, source: StorageError },

    /// Key expression failed to compile.
    #[snafu(display("Invalid expression: {source}"))]
    ExpressionCompile { source: ExprError },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Key Errors ============

/// Errors that prevent a single record from being assigned to a bucket.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum KeyError {
    /// Record is not valid JSON.
    #[snafu(display("malformed JSON: {source}"))]
    MalformedJson { source: serde_json::Error },

    /// Expression failed at runtime.
    #[snafu(display("expression failed: {source}"))]
    Evaluate { source: ExprError },

    /// Expression produced a value that cannot be used as a key.
    #[snafu(display("expression returned {type_name}, expected {allowed}"))]
    InvalidKeyType {
        type_name: &'static str,
        allowed: &'static str,
    },

    /// Integer mode key is not a base-10 integer.
    #[snafu(display("key '{key}' is not a valid bucket number"))]
    UnparseableBucket { key: String },

    /// Integer mode key is outside `[0, reducers)`.
    #[snafu(display("bucket {bucket} is out of range (reducers: {reducers})"))]
    BucketOutOfRange { bucket: i64, reducers: usize },
}

// ============ Sink Errors ============

/// Errors from the per-bucket staging sinks.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Failed to create the staging file.
    #[snafu(display("Failed to create staging file {}: {source}", path.display()))]
    CreateStaging {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to append to the staging file.
    #[snafu(display("Failed to write staging file {}: {source}", path.display()))]
    WriteStaging {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to flush the staging file on close.
    #[snafu(display("Failed to flush staging file {}: {source}", path.display()))]
    FlushStaging {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A sink closed while input could still arrive for it.
    #[snafu(display(
        "Sink for bucket {bucket} ({}) closed before end of input",
        path.display()
    ))]
    ClosedPrematurely { bucket: usize, path: PathBuf },

    /// The writer task for a sink went away without reporting.
    #[snafu(display("Sink writer for bucket {bucket} exited unexpectedly"))]
    SinkGone { bucket: usize },

    /// A lifecycle notification arrived in a state that cannot accept it.
    #[snafu(display("Sink for bucket {bucket} cannot move from {from} to {to}"))]
    InvalidTransition {
        bucket: usize,
        from: &'static str,
        to: &'static str,
    },
}

// ============ Upload Errors ============

/// Errors from the upload stage.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum UploadError {
    /// Failed to read a staging file back for upload.
    #[snafu(display("Failed to read staging file {}: {source}", path.display()))]
    ReadStaging {
        path: PathBuf,
        source: std::io::Error,
    },

    /// PUT to object storage failed.
    #[snafu(display("Failed to upload {key}: {source}"))]
    Put { key: String, source: StorageError },

    /// Failed to delete a staging file after a successful upload.
    #[snafu(display("Failed to remove staging file {}: {source}", path.display()))]
    RemoveStaging {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The upload task stopped accepting work.
    #[snafu(display("Upload queue closed unexpectedly"))]
    UploadQueueClosed,

    /// The upload task panicked or was cancelled.
    #[snafu(display("Upload task failed: {source}"))]
    UploadTaskJoin { source: tokio::task::JoinError },
}

// ============ Pipeline Errors ============

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Failed to read standard input.
    #[snafu(display("Failed to read input: {source}"))]
    Input { source: std::io::Error },

    /// Input line is not UTF-8 text.
    #[snafu(display("Record {line} is not valid UTF-8"))]
    InvalidUtf8 { line: u64 },

    /// A record could not be assigned to a bucket.
    #[snafu(display("Record {line} could not be partitioned: {source}\n  record: {record}"))]
    Record {
        line: u64,
        record: String,
        source: KeyError,
    },

    /// Sink error.
    #[snafu(display("Sink error: {source}"))]
    Sink { source: SinkError },

    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Upload error.
    #[snafu(display("Upload error: {source}"))]
    Upload { source: UploadError },

    /// Sink event channel closed while sinks were still pending.
    #[snafu(display("Sink event channel closed unexpectedly"))]
    EventChannelClosed,
}

impl PipelineError {
    /// Process exit status for this error: 2 for usage errors, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Config { .. } => 2,
            _ => 1,
        }
    }

    /// Check if this error was caused by bad configuration rather than data or I/O.
    pub fn is_usage_error(&self) -> bool {
        self.exit_code() == 2
    }
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(source: std::io::Error) -> Self {
        PipelineError::Input { source }
    }
}

impl From<SinkError> for PipelineError {
    fn from(source: SinkError) -> Self {
        PipelineError::Sink { source }
    }
}

impl From<StorageError> for PipelineError {
    fn from(source: StorageError) -> Self {
        PipelineError::Storage { source }
    }
}

impl From<UploadError> for PipelineError {
    fn from(source: UploadError) -> Self {
        PipelineError::Upload { source }
    }
}
