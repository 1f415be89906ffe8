//! Package framing and delivery tracking for the snapwire protocol engine.
//!
//! This crate owns the structure that snapshot reliability rides on: the
//! package header with its packed sequence numbers and ack bitfield, the
//! sequence-keyed stores used throughout the engine, and the outstanding
//! package table that turns inbound acks into exactly-once delivered/lost
//! feedback.
//!
//! # Design Principles
//!
//! - **No domain knowledge** - This crate handles framing, not game state.
//! - **Bounded decoding** - Headers are validated before anything is trusted.
//! - **Exactly-once feedback** - Every registered package is reported
//!   delivered or lost precisely once.

mod delivery;
mod error;
mod header;
mod limits;
mod seqbuf;

pub use delivery::{DeliveryTracker, InboundTracker};
pub use error::{WireError, WireResult};
pub use header::{
    contexts, expand_sequence, read_package_header, write_package_header, ContentFlags,
    PackageHeader, RawHeader, ACK_WINDOW,
};
pub use limits::Limits;
pub use seqbuf::{SequenceBuffer, SparseSequenceBuffer};
