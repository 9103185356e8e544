//! Tolerance-based regression comparison for groundwater simulator output.
//!
//! Candidate and reference outputs are loaded as [`domain::NamedArraySet`]s and
//! compared field by field under a per-cell and an aggregate tolerance. Every
//! failing comparison yields a structured [`compare::ComparisonOutcome`] and
//! writes one diagnostic block to an injected [`log::DiagnosticSink`].

pub mod compare;
pub mod domain;
pub mod export;
pub mod farm;
pub mod log;
pub mod netflux;
pub mod numerics;
pub mod regression;
pub mod snapshot;
