//! Spillway Core - Shared types for the spillway buffering engine.
//!
//! This crate provides the vocabulary used by every other spillway crate:
//! stream identifiers, the messages producers submit, the buffered form a
//! queue holds, and the limits that bound memory and flush scheduling.
//!
//! # Design Principles
//!
//! - **Value-typed identifiers**: Streams are compared by `(namespace, name)`
//! - **Explicit limits**: Every buffer has a bounded maximum
//! - **Fixed accounting**: A record's size is estimated once, at admission
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod record;
mod types;

pub use error::{Error, Result};
pub use limits::{Limits, MIB};
pub use record::{BufferedRecord, Message, StateScope, MESSAGE_OVERHEAD_BYTES};
pub use types::{FlushId, Namespace, SeqNo, StreamId, STREAM_NAME_BYTES_MAX};
