// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::controller::RefreshOutcome;
use crate::error::{FailureKind, RefreshError};
use chrono::{DateTime, Utc};
use pia_api::RegionId;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Ok,
	Warn(FailureKind),
	Err(FailureKind),
}

#[derive(Debug, Clone)]
pub struct RefreshReport {
	pub region: RegionId,
	pub outcome: Outcome,
	pub duration: Duration,
	pub note: Option<String>,
}

impl RefreshReport {
	pub fn from_result(
		region: RegionId,
		result: Result<RefreshOutcome, RefreshError>,
		duration: Duration,
	) -> Self {
		match result {
			Ok(RefreshOutcome {
				saved_update_failed: None,
			}) => Self {
				region,
				outcome: Outcome::Ok,
				duration,
				note: None,
			},
			Ok(RefreshOutcome {
				saved_update_failed: Some(kind),
			}) => Self {
				region,
				outcome: Outcome::Ok,
				duration,
				note: Some(format!("saved-profile update failed: {kind}")),
			},
			Err(e) => {
				let outcome = if e.kind.is_warning() {
					Outcome::Warn(e.kind)
				} else {
					Outcome::Err(e.kind)
				};
				Self {
					region,
					outcome,
					duration,
					note: Some(e.to_string()),
				}
			}
		}
	}

	pub fn symbol(&self) -> &'static str {
		match self.outcome {
			Outcome::Ok => "✓",
			Outcome::Warn(_) => "⚠",
			Outcome::Err(_) => "✗",
		}
	}

	pub fn reason(&self) -> String {
		match (&self.outcome, &self.note) {
			(Outcome::Ok, None) => "refreshed".to_string(),
			(Outcome::Ok, Some(note)) => format!("refreshed ({note})"),
			(Outcome::Warn(kind), _) | (Outcome::Err(kind), _) => kind.label().to_string(),
		}
	}
}

/// Aggregate of one orchestrator run.
#[derive(Debug, Clone)]
pub struct RefreshSummary {
	pub reports: Vec<RefreshReport>,
	pub cancelled: bool,
	pub finished_at: DateTime<Utc>,
}

impl RefreshSummary {
	pub fn new(reports: Vec<RefreshReport>, cancelled: bool) -> Self {
		Self {
			reports,
			cancelled,
			finished_at: Utc::now(),
		}
	}

	/// Whether any region actually took a refresh this cycle.
	pub fn any_succeeded(&self) -> bool {
		self.reports
			.iter()
			.any(|r| matches!(r.outcome, Outcome::Ok))
	}

	/// Process exit code contract: 0 all ok, 1 warnings, 2 permanent
	/// failures, 130 cancelled.
	pub fn exit_code(&self) -> i32 {
		let cancelled = self.cancelled
			|| self
				.reports
				.iter()
				.any(|r| matches!(r.outcome, Outcome::Err(FailureKind::Cancelled)));
		if cancelled {
			return 130;
		}
		if self
			.reports
			.iter()
			.any(|r| matches!(r.outcome, Outcome::Err(_)))
		{
			return 2;
		}
		if self
			.reports
			.iter()
			.any(|r| matches!(r.outcome, Outcome::Warn(_)))
		{
			return 1;
		}
		0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn region() -> RegionId {
		"us-east".parse().unwrap()
	}

	fn report(outcome: Outcome) -> RefreshReport {
		RefreshReport {
			region: region(),
			outcome,
			duration: Duration::from_millis(10),
			note: None,
		}
	}

	#[test]
	fn clean_run_exits_zero() {
		let summary = RefreshSummary::new(vec![report(Outcome::Ok)], false);
		assert_eq!(summary.exit_code(), 0);
		assert!(summary.any_succeeded());
	}

	#[test]
	fn warnings_exit_one() {
		let summary = RefreshSummary::new(
			vec![
				report(Outcome::Ok),
				report(Outcome::Warn(FailureKind::VersionMismatch)),
			],
			false,
		);
		assert_eq!(summary.exit_code(), 1);
	}

	#[test]
	fn permanent_failures_exit_two_even_with_warnings() {
		let summary = RefreshSummary::new(
			vec![
				report(Outcome::Warn(FailureKind::NetTransient)),
				report(Outcome::Err(FailureKind::AuthPermanent)),
			],
			false,
		);
		assert_eq!(summary.exit_code(), 2);
	}

	#[test]
	fn cancellation_exits_130_regardless() {
		let summary = RefreshSummary::new(
			vec![report(Outcome::Err(FailureKind::AuthPermanent))],
			true,
		);
		assert_eq!(summary.exit_code(), 130);

		let summary = RefreshSummary::new(
			vec![report(Outcome::Err(FailureKind::Cancelled))],
			false,
		);
		assert_eq!(summary.exit_code(), 130);
	}

	#[test]
	fn warning_failures_group_as_warn() {
		let region = region();
		let err = RefreshError::new(
			&region,
			"reapply",
			FailureKind::VersionMismatch,
			"stale id",
		);
		let report =
			RefreshReport::from_result(region, Err(err), Duration::from_millis(5));

		assert_eq!(report.outcome, Outcome::Warn(FailureKind::VersionMismatch));
		assert_eq!(report.symbol(), "⚠");
	}

	#[test]
	fn ok_with_annotation_keeps_ok_symbol() {
		let report = RefreshReport::from_result(
			region(),
			Ok(RefreshOutcome {
				saved_update_failed: Some(FailureKind::NotAuthorized),
			}),
			Duration::from_millis(5),
		);

		assert_eq!(report.outcome, Outcome::Ok);
		assert_eq!(report.symbol(), "✓");
		assert!(report.reason().contains("saved-profile update failed"));
	}
}
