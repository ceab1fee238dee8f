// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The token-refresh controller: per-region state machine, bounded
//! orchestrator, failure classification, and the trait seams it drives.

pub mod adapters;
pub mod cancel;
pub mod controller;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod seams;

pub use cancel::CancellationToken;
pub use controller::{RefreshController, RefreshOutcome, RegionState};
pub use error::{FailureKind, RefreshError};
pub use orchestrator::RefreshOrchestrator;
pub use report::{Outcome, RefreshReport, RefreshSummary};
pub use seams::{CredentialError, CredentialSource, Gateway, Keys, Provider};
