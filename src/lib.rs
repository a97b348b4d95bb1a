//! turnstream: a streaming conversation request engine.
//!
//! Takes a user turn, checks it against the local send gate, assembles the
//! recent history into a request, and streams the NDJSON reply back into the
//! conversation with throttled updates. Failed attempts are retried within a
//! bounded budget; the caller can stop a reply at any time.
//!
//! # Quick Start
//!
//! ```no_run
//! use turnstream::prelude::*;
//!
//! # async fn example() -> turnstream::error::Result<()> {
//! let engine = ConversationEngine::from_config(EngineConfig::from_env()?);
//! let outcome = engine.submit("Hello!", None).await?;
//! println!("{}", outcome.message.content);
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod i18n;
pub mod prelude;
pub mod quota;
pub mod resolve;
pub mod stream;
pub mod transport;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
