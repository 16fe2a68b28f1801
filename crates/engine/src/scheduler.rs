// Copyright 2025 itscheems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{sync::Arc, time::Duration};

use relay_sdk::FixtureCatalog;
use tokio::{
	sync::watch,
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::supervisor::SupervisorHandle;

/// Sport Scheduler - polls the upstream catalog and feeds the supervisor
///
/// The sport list is loaded once (retried every interval until it
/// succeeds), then one poller task per sport enumerates its fixtures on a
/// fixed interval. Ticks missed while a slow enumeration runs are skipped
/// rather than bunched up.
pub struct SportScheduler {
	handle: Option<JoinHandle<()>>,
	shutdown: watch::Sender<bool>,
}

impl SportScheduler {
	pub fn start(
		catalog: Arc<dyn FixtureCatalog>,
		supervisor: SupervisorHandle,
		interval: Duration,
	) -> Self {
		let (shutdown, shutdown_rx) = watch::channel(false);

		let handle = tokio::spawn(async move {
			info!(
				target: "scheduler",
				interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
				"Sport scheduler started"
			);

			let Some(sports) = Self::load_sports(catalog.as_ref(), interval, shutdown_rx.clone()).await
			else {
				return;
			};

			let mut pollers = Vec::with_capacity(sports.len());
			for sport in sports {
				pollers.push(tokio::spawn(Self::poll_sport(
					catalog.clone(),
					supervisor.clone(),
					sport,
					interval,
					shutdown_rx.clone(),
				)));
			}

			for poller in pollers {
				if let Err(e) = poller.await {
					warn!(target: "scheduler", error = %e, "Sport poller failed");
				}
			}
			info!(target: "scheduler", "Sport scheduler stopped");
		});

		Self {
			handle: Some(handle),
			shutdown,
		}
	}

	async fn load_sports(
		catalog: &dyn FixtureCatalog,
		interval: Duration,
		mut shutdown: watch::Receiver<bool>,
	) -> Option<Vec<String>> {
		loop {
			match catalog.sports().await {
				Ok(sports) => {
					info!(target: "scheduler", sports = ?sports, "Sports loaded");
					return Some(sports);
				}
				Err(e) => {
					error!(target: "scheduler", error = %e, "Failed to load sports, retrying");
				}
			}

			tokio::select! {
				_ = time::sleep(interval) => {}
				_ = shutdown.changed() => return None,
			}
		}
	}

	async fn poll_sport(
		catalog: Arc<dyn FixtureCatalog>,
		supervisor: SupervisorHandle,
		sport: String,
		interval: Duration,
		mut shutdown: watch::Receiver<bool>,
	) {
		let mut ticker = time::interval(interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				_ = ticker.tick() => {}
				_ = shutdown.changed() => break,
			}

			match catalog.list_fixtures(&sport).await {
				Ok(fixtures) => {
					debug!(
						target: "scheduler",
						sport = %sport,
						fixtures = fixtures.len(),
						"Fixtures enumerated"
					);
					if supervisor.discovered(sport.clone(), fixtures).is_err() {
						warn!(target: "scheduler", sport = %sport, "Supervisor gone, stopping poller");
						break;
					}
				}
				Err(e) => {
					// Skipping the pass keeps the supervisor's removal marks intact
					error!(target: "scheduler", sport = %sport, error = %e, "Failed to list fixtures");
				}
			}
		}
	}

	pub async fn shutdown(mut self) {
		info!(target: "scheduler", "Shutting down sport scheduler");
		let _ = self.shutdown.send(true);

		if let Some(handle) = self.handle.take()
			&& let Err(e) = handle.await
		{
			warn!(target: "scheduler", error = %e, "Sport scheduler task failed");
		}
	}
}

impl Drop for SportScheduler {
	fn drop(&mut self) {
		let _ = self.shutdown.send(true);
		if let Some(handle) = self.handle.take() {
			handle.abort();
		}
	}
}
