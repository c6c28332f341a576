//! Resumable upload storage backend
//!
//! Adapts the tus resumable-upload protocol onto an S3-compatible object
//! store: creates a multipart upload per tus upload, spills PATCH bodies
//! into part-sized chunks, and completes the multipart upload once the
//! declared length is reached.
//!
//! # Example
//!
//! ```no_run
//! use tus_s3_store::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod s3;
pub mod server;
pub mod store;

pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
