//! Backup status core library: data model, scoped access, tolerant parser.
//!
//! Public API surface:
//! - [`types`]: [`Snapshot`], [`Destination`] and friends
//! - [`access`]: [`Token`], [`AccessProvider`], [`AccessScope`]
//! - [`parser`]: [`parse`] / [`parse_bytes`]
//! - [`error`]: [`AccessError`], [`ParseError`]

pub mod access;
pub mod error;
pub mod parser;
pub mod types;

pub use access::{AccessProvider, AccessScope, FileAccessProvider, Token};
pub use error::{AccessError, ParseError};
pub use parser::{parse, parse_bytes};
pub use types::{BackupResult, Destination, DestinationId, Snapshot};
