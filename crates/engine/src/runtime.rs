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

//! Relay runtime
//!
//! Wires every component of the engine and owns their lifetimes:
//! - Fixture State Store (checkpoints, loaded from persistence)
//! - State Flusher (periodic persistence)
//! - Supervisor (listeners, builder, removal)
//! - Sport Scheduler (catalog polling)
//!
//! Components start in that order and shut down in reverse.

use std::sync::Arc;

use relay_sdk::{ConsumerPlugin, FixtureCatalog};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::{
	config::{Settings, SettingsError},
	listener::ListenerContext,
	scheduler::SportScheduler,
	store::{FilePersistence, FixtureStateStore, StateFlusher, StatePersistence, StoreError},
	supervisor::{Supervisor, SupervisorError, SupervisorHandle},
	suspension::SuspensionManager,
};

/// Error types for runtime startup and shutdown
#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error("Invalid settings: {0}")]
	Settings(#[from] SettingsError),
	#[error("Fixture state unavailable: {0}")]
	Store(#[from] StoreError),
	#[error("Supervisor error: {0}")]
	Supervisor(#[from] SupervisorError),
}

/// Builder for [`RelayRuntime`]
pub struct RelayRuntimeBuilder {
	settings: Settings,
	catalog: Arc<dyn FixtureCatalog>,
	plugin: Arc<dyn ConsumerPlugin>,
	persistence: Option<Arc<dyn StatePersistence>>,
	suspension: Option<SuspensionManager>,
}

impl RelayRuntimeBuilder {
	/// Persistence for checkpoints; defaults to the configured state file
	pub fn persistence(mut self, persistence: Arc<dyn StatePersistence>) -> Self {
		self.persistence = Some(persistence);
		self
	}

	/// Suspension strategies; defaults to the built-in table
	pub fn suspension(mut self, suspension: SuspensionManager) -> Self {
		self.suspension = Some(suspension);
		self
	}

	pub async fn start(self) -> Result<RelayRuntime, RuntimeError> {
		let settings = self.settings;
		settings.validate()?;

		info!(target: "runtime", "Starting relay engine");
		info!(
			target: "runtime",
			"Fixture creation concurrency: {}",
			settings.fixture_creation_concurrency
		);
		info!(
			target: "runtime",
			"Fixture checker frequency: {}ms",
			settings.fixture_checker_frequency_ms
		);
		info!(target: "runtime", "Stream safety threshold: {}", settings.stream_safety_threshold);

		// Phase 1: Load fixture state
		info!(target: "runtime", "Loading fixture state...");
		let persistence = self.persistence.unwrap_or_else(|| {
			Arc::new(FilePersistence::new(&settings.fixtures_state_file_path))
		});
		let store = Arc::new(FixtureStateStore::new(persistence));
		let loader = store.clone();
		let loaded = tokio::task::spawn_blocking(move || loader.load())
			.await
			.map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
		info!(target: "runtime", "Fixture checkpoints loaded: {}", loaded);

		// Phase 2: Start state flusher
		info!(target: "runtime", "Starting state flusher...");
		let flusher = StateFlusher::start(store.clone(), settings.fixtures_state_auto_store_interval());

		// Phase 3: Start supervisor
		info!(target: "runtime", "Starting supervisor...");
		let settings = Arc::new(settings);
		let (events, events_rx) = mpsc::unbounded_channel();
		let mut ctx = ListenerContext::new(self.plugin, store.clone(), settings.clone(), events);
		if let Some(suspension) = self.suspension {
			ctx = ctx.with_suspension(suspension);
		}
		let (supervisor, supervisor_task) = Supervisor::start(ctx, events_rx);

		// Phase 4: Start sport scheduler
		info!(target: "runtime", "Starting sport scheduler...");
		let scheduler = SportScheduler::start(
			self.catalog,
			supervisor.clone(),
			settings.fixture_checker_frequency(),
		);

		info!(target: "runtime", "Relay engine started");
		Ok(RelayRuntime {
			store,
			supervisor,
			supervisor_task: Some(supervisor_task),
			scheduler: Some(scheduler),
			flusher: Some(flusher),
		})
	}
}

/// Running relay engine
pub struct RelayRuntime {
	store: Arc<FixtureStateStore>,
	supervisor: SupervisorHandle,
	supervisor_task: Option<JoinHandle<()>>,
	scheduler: Option<SportScheduler>,
	flusher: Option<StateFlusher>,
}

impl RelayRuntime {
	pub fn builder(
		settings: Settings,
		catalog: Arc<dyn FixtureCatalog>,
		plugin: Arc<dyn ConsumerPlugin>,
	) -> RelayRuntimeBuilder {
		RelayRuntimeBuilder {
			settings,
			catalog,
			plugin,
			persistence: None,
			suspension: None,
		}
	}

	pub fn store(&self) -> &Arc<FixtureStateStore> {
		&self.store
	}

	pub fn supervisor(&self) -> &SupervisorHandle {
		&self.supervisor
	}

	/// Graceful shutdown in reverse start order
	pub async fn shutdown(mut self) -> Result<(), RuntimeError> {
		info!(target: "runtime", "Shutting down components...");

		if let Some(scheduler) = self.scheduler.take() {
			scheduler.shutdown().await;
		}

		let stopped = self.supervisor.shutdown().await;
		if let Some(task) = self.supervisor_task.take()
			&& let Err(e) = task.await
		{
			warn!(target: "runtime", error = %e, "Supervisor task failed");
		}

		if let Some(flusher) = self.flusher.take() {
			flusher.shutdown().await;
		}

		stopped?;
		info!(target: "runtime", "Shutdown complete");
		Ok(())
	}
}
