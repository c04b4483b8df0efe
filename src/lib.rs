//! sleet: split a line-oriented record stream into N reducer buckets and
//! upload each bucket to object storage.
//!
//! Records are read from an async reader, assigned a bucket from a key
//! (delimited fields, JSON paths, or a compiled key expression), staged per
//! bucket on local disk with backpressure, and uploaded once the whole
//! input has been routed.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use sleet::{CliArgs, run_split, error::PipelineError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = CliArgs::parse().validate()?;
//!     let stats = run_split(&config, tokio::io::stdin()).await?;
//!     println!("Routed {} records", stats.records);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod sink;
pub mod storage;

// Re-export main types
pub use config::{CliArgs, SplitConfig};
pub use key::{KeyExtractor, PartitionKey};
pub use partition::Partitioner;
pub use pipeline::{SplitStats, run_split, run_split_with_storage};
pub use storage::{StorageProvider, StorageProviderRef};
