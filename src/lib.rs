//! docop - document-operation execution engine
//!
//! Turns one logical read or write statement into batched physical requests
//! against a hash-partitioned document store and streams the rows back.
//!
//! # Quick Start
//!
//! ```ignore
//! use docop::{EngineConfig, ReadOperation};
//! use std::sync::Arc;
//!
//! let config = Arc::new(EngineConfig::from_file(path)?);
//! let op = ReadOperation::new(session, table, config)?;
//! op.execute()?;
//! while let Some(batch) = op.get_result()? {
//!     consume(batch);
//! }
//! ```
//!
//! # Architecture
//!
//! `docop-core` holds the request model, errors, configuration and the
//! `Session` / `TableDescriptor` traits the caller implements.
//! `docop-engine` holds the operation state machines.

pub use docop_core::*;
pub use docop_engine::*;
