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

use tokio::{
	sync::watch,
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
use tracing::{error, info, warn};

use super::FixtureStateStore;

/// StateFlusher - periodically persists the fixture state store
///
/// Runs as a background tokio task, writing the store only when it changed
/// since the previous tick. A final flush is performed on shutdown so the
/// last checkpoints survive a clean restart. Dropping the flusher without
/// calling [`shutdown`](Self::shutdown) aborts the task without the final
/// flush.
pub struct StateFlusher {
	handle: Option<JoinHandle<()>>,
	shutdown: watch::Sender<bool>,
}

impl StateFlusher {
	pub fn start(store: Arc<FixtureStateStore>, interval: Duration) -> Self {
		let (shutdown, mut shutdown_rx) = watch::channel(false);

		let handle = tokio::spawn(async move {
			info!(
				target: "state_store",
				interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
				"State flusher started"
			);

			let mut ticker = time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			// The first tick completes immediately
			ticker.tick().await;

			loop {
				tokio::select! {
					_ = ticker.tick() => {
						Self::flush(&store).await;
					}
					_ = shutdown_rx.changed() => break,
				}
			}

			Self::flush(&store).await;
			info!(target: "state_store", "State flusher stopped");
		});

		Self {
			handle: Some(handle),
			shutdown,
		}
	}

	async fn flush(store: &Arc<FixtureStateStore>) {
		let store = store.clone();
		match tokio::task::spawn_blocking(move || store.flush_if_dirty()).await {
			Ok(Ok(_)) => {}
			Ok(Err(e)) => {
				error!(target: "state_store", error = %e, "Failed to flush fixture state");
			}
			Err(e) => {
				error!(target: "state_store", error = %e, "Fixture state flush task panicked");
			}
		}
	}

	pub async fn shutdown(mut self) {
		info!(target: "state_store", "Shutting down state flusher");
		let _ = self.shutdown.send(true);

		if let Some(handle) = self.handle.take()
			&& let Err(e) = handle.await
		{
			warn!(target: "state_store", error = %e, "State flusher task failed");
		}
	}
}

impl Drop for StateFlusher {
	fn drop(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.abort();
		}
	}
}
