// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fan-out of the per-region controller across all configured regions,
//! with bounded concurrency and an overall deadline.

use crate::cancel::CancellationToken;
use crate::controller::RefreshController;
use crate::report::{RefreshReport, RefreshSummary};
use pia_api::{AccountPassword, RegionId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

/// How many regions refresh at once.
const DEFAULT_CONCURRENCY: usize = 4;

/// Whole-cycle deadline; generous against the per-call timeouts beneath it.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(300);

pub struct RefreshOrchestrator {
	controller: Arc<RefreshController>,
	concurrency: usize,
	deadline: Duration,
}

impl RefreshOrchestrator {
	pub fn new(controller: Arc<RefreshController>) -> Self {
		Self {
			controller,
			concurrency: DEFAULT_CONCURRENCY,
			deadline: DEFAULT_DEADLINE,
		}
	}

	pub fn with_concurrency(mut self, concurrency: usize) -> Self {
		self.concurrency = concurrency.max(1);
		self
	}

	pub fn with_deadline(mut self, deadline: Duration) -> Self {
		self.deadline = deadline;
		self
	}

	/// Refresh every region, collect per-region outcomes, and wait for all
	/// of them (or the deadline, which cancels the stragglers).
	#[instrument(skip_all, fields(regions = regions.len()))]
	pub async fn run(
		&self,
		regions: &[RegionId],
		username: &str,
		password: &AccountPassword,
		cancel: &CancellationToken,
	) -> RefreshSummary {
		let semaphore = Arc::new(Semaphore::new(self.concurrency));
		let credentials = Arc::new((username.to_string(), password.clone()));
		let mut tasks = JoinSet::new();

		for region in regions {
			let controller = Arc::clone(&self.controller);
			let semaphore = Arc::clone(&semaphore);
			let credentials = Arc::clone(&credentials);
			let cancel = cancel.clone();
			let region = region.clone();

			tasks.spawn(async move {
				let _permit = semaphore
					.acquire_owned()
					.await
					.expect("semaphore is never closed");
				let started = Instant::now();
				let result = controller
					.refresh(&region, &credentials.0, &credentials.1, &cancel)
					.await;
				RefreshReport::from_result(region, result, started.elapsed())
			});
		}

		let deadline = tokio::time::sleep(self.deadline);
		tokio::pin!(deadline);
		let mut deadline_hit = false;
		let mut reports = Vec::with_capacity(regions.len());

		loop {
			tokio::select! {
				joined = tasks.join_next() => match joined {
					Some(Ok(report)) => {
						info!(
							region = %report.region,
							outcome = report.symbol(),
							duration_ms = report.duration.as_millis() as u64,
							"region finished"
						);
						reports.push(report);
					}
					Some(Err(e)) => warn!(error = %e, "refresh task aborted"),
					None => break,
				},
				_ = &mut deadline, if !deadline_hit => {
					deadline_hit = true;
					warn!(deadline_secs = self.deadline.as_secs(), "cycle deadline reached, cancelling stragglers");
					cancel.cancel();
				}
			}
		}

		RefreshSummary::new(reports, cancel.is_cancelled())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::controller::tests::{MockGateway, MockKeys, MockProvider};
	use crate::error::FailureKind;
	use crate::report::Outcome;
	use pia_api::ApiError;
	use std::sync::atomic::Ordering;

	fn regions(ids: &[&str]) -> Vec<RegionId> {
		ids.iter().map(|s| s.parse().unwrap()).collect()
	}

	fn password() -> AccountPassword {
		AccountPassword::new("p1234567".to_string())
	}

	fn orchestrator(
		provider: MockProvider,
	) -> (RefreshOrchestrator, Arc<MockProvider>) {
		let (controller, provider, _, _) =
			crate::controller::tests::controller(provider, MockKeys::fresh(), MockGateway::empty());
		(
			RefreshOrchestrator::new(Arc::new(controller)),
			provider,
		)
	}

	#[tokio::test]
	async fn all_regions_report_and_exit_zero() {
		let (orchestrator, _) = orchestrator(MockProvider::ok());
		let summary = orchestrator
			.run(
				&regions(&["us-east", "japan", "uk-london"]),
				"alice",
				&password(),
				&CancellationToken::new(),
			)
			.await;

		assert_eq!(summary.reports.len(), 3);
		assert!(summary
			.reports
			.iter()
			.all(|r| matches!(r.outcome, Outcome::Ok)));
		assert_eq!(summary.exit_code(), 0);
	}

	#[tokio::test]
	async fn one_permanent_failure_exits_two() {
		let provider = MockProvider::ok().with_auth_script(vec![Err(ApiError::AuthInvalid)]);
		let (orchestrator, _) = orchestrator(provider);

		// Only one region, so the scripted failure lands deterministically.
		let summary = orchestrator
			.run(
				&regions(&["us-east"]),
				"alice",
				&password(),
				&CancellationToken::new(),
			)
			.await;

		assert_eq!(summary.exit_code(), 2);
		assert!(matches!(
			summary.reports[0].outcome,
			Outcome::Err(FailureKind::AuthPermanent)
		));
	}

	#[tokio::test]
	async fn concurrency_is_bounded() {
		let provider = MockProvider::ok().with_auth_delay(Duration::from_millis(40));
		let (orchestrator, provider) = orchestrator(provider);
		let orchestrator = orchestrator.with_concurrency(2);

		orchestrator
			.run(
				&regions(&["r1", "r2", "r3", "r4", "r5", "r6"]),
				"alice",
				&password(),
				&CancellationToken::new(),
			)
			.await;

		assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);
	}

	#[tokio::test]
	async fn deadline_cancels_stragglers_and_exits_130() {
		let provider = MockProvider::ok().with_auth_delay(Duration::from_millis(200));
		let (orchestrator, _) = orchestrator(provider);
		let orchestrator = orchestrator.with_deadline(Duration::from_millis(50));

		let summary = orchestrator
			.run(
				&regions(&["us-east", "japan"]),
				"alice",
				&password(),
				&CancellationToken::new(),
			)
			.await;

		assert_eq!(summary.exit_code(), 130);
		assert!(summary.cancelled);
	}

	#[tokio::test]
	async fn external_cancellation_is_observed() {
		let cancel = CancellationToken::new();
		cancel.cancel();
		let (orchestrator, provider) = orchestrator(MockProvider::ok());

		let summary = orchestrator
			.run(&regions(&["us-east"]), "alice", &password(), &cancel)
			.await;

		assert_eq!(summary.exit_code(), 130);
		assert_eq!(provider.auth_calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn empty_region_list_is_a_clean_noop() {
		let (orchestrator, provider) = orchestrator(MockProvider::ok());
		let summary = orchestrator
			.run(&[], "alice", &password(), &CancellationToken::new())
			.await;

		assert!(summary.reports.is_empty());
		assert_eq!(summary.exit_code(), 0);
		assert_eq!(provider.auth_calls.load(Ordering::SeqCst), 0);
	}
}
