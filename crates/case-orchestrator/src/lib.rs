// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-orchestrator
//!
//! Ties the extractor, committee, resolver, and submitter together into
//! one case lifecycle state machine, backed by the durable stores in
//! `case_store` and gated at every step by `case_core::CaseStatus`'s
//! transition table.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Builds the committee's bounded evidence pack from a decoded workbook.
pub mod evidence_pack;
/// The case state machine itself.
pub mod engine;

pub use engine::{CaseEngine, CaseEngineError, CatalogSource};
