#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Turn serialization and stale-replay suppression.
//!
//! Every inbound turn passes through [`TurnGatekeeper::process`], which
//! holds the conversation's lock for the whole turn, discards turns whose
//! correlation token no longer matches the last issued one, runs the
//! dialog handler, tags the outbound batch and saves state.

mod adapter;
mod gatekeeper;
mod tagger;

pub use adapter::{Adapter, ApologyNotifier};
pub use gatekeeper::{TurnGatekeeper, TurnOutcome, is_stale};
pub use tagger::OutboundTagger;
