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

//! Fixture stream listener
//!
//! One tokio task per fixture. The task owns two inboxes, control messages
//! and feed events, and funnels both into a [`ListenerCore`] guarded by a
//! processing gate. Snapshot fetches run as separate tasks that enter the
//! same gate, so a slow `get_snapshot` never blocks the inboxes and two
//! snapshots completing out of order are caught by the sequence guard.
//!
//! The supervisor talks to a listener through a [`ListenerHandle`] and is
//! notified of final transitions through [`ListenerEvent`]s.

mod machine;
mod message;
mod state;

use std::{sync::Arc, time::Duration};

use relay_sdk::{
	ConsumerPlugin, FeedError, FeedEvent, FeedEventStream, FeedResource, PluginError, feed_channel,
};
use thiserror::Error;
use tokio::{
	sync::{Mutex, MutexGuard, mpsc, oneshot, watch},
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
use tracing::{debug, info};
use uuid::Uuid;

use self::machine::ListenerCore;
pub use message::{
	ListenerEvent, ListenerEventKind, ListenerMessage, Outcome, Rejection, SnapshotKind,
	SnapshotRequest,
};
pub use state::{ListenerState, ListenerStatus};

use crate::{
	config::Settings,
	store::FixtureStateStore,
	suspension::{SuspensionManager, SuspensionReason},
};

/// Error types for listener processing
#[derive(Debug, Error)]
pub enum ListenerError {
	#[error("Consumer plugin error: {0}")]
	Plugin(#[from] PluginError),
	#[error("Feed error: {0}")]
	Feed(#[from] FeedError),
	#[error("Invalid payload: {0}")]
	Payload(#[from] serde_json::Error),
	#[error("Processing lock not acquired within {0:?}")]
	LockTimeout(Duration),
	#[error("Listener startup failed: {0}")]
	Startup(String),
	#[error("Listener already disposed")]
	Disposed,
}

/// Collaborators shared by every listener
#[derive(Clone)]
pub struct ListenerContext {
	pub plugin: Arc<dyn ConsumerPlugin>,
	pub store: Arc<FixtureStateStore>,
	pub suspension: Arc<SuspensionManager>,
	pub settings: Arc<Settings>,
	pub events: mpsc::UnboundedSender<ListenerEvent>,
}

impl ListenerContext {
	/// Context using the default suspension strategies
	pub fn new(
		plugin: Arc<dyn ConsumerPlugin>,
		store: Arc<FixtureStateStore>,
		settings: Arc<Settings>,
		events: mpsc::UnboundedSender<ListenerEvent>,
	) -> Self {
		Self {
			suspension: Arc::new(SuspensionManager::new(plugin.clone())),
			plugin,
			store,
			settings,
			events,
		}
	}

	pub fn with_suspension(mut self, suspension: SuspensionManager) -> Self {
		self.suspension = Arc::new(suspension);
		self
	}
}

/// Mutual exclusion over the listener core with a bounded wait
#[derive(Clone)]
struct ProcessingGate {
	core: Arc<Mutex<ListenerCore>>,
	timeout: Duration,
}

/// Exclusive access to the core, tagged with whether the wait timed out
struct GateEntry<'a> {
	core: MutexGuard<'a, ListenerCore>,
	timed_out: bool,
}

impl ProcessingGate {
	/// Enter the gate. A timeout is reported to the core as a processing
	/// error once the lock is finally acquired; the caller still gets the
	/// core and decides whether its own work is superseded by the recovery.
	async fn enter(&self) -> GateEntry<'_> {
		match time::timeout(self.timeout, self.core.lock()).await {
			Ok(core) => GateEntry {
				core,
				timed_out: false,
			},
			Err(_) => {
				let mut core = self.core.lock().await;
				core.on_error(ListenerError::LockTimeout(self.timeout)).await;
				core.publish_status();
				GateEntry {
					core,
					timed_out: true,
				}
			}
		}
	}
}

/// Cloneable handle to a running listener
#[derive(Clone)]
pub struct ListenerHandle {
	fixture_id: String,
	instance_id: Uuid,
	inbox: mpsc::UnboundedSender<ListenerMessage>,
	status: watch::Receiver<ListenerStatus>,
}

impl ListenerHandle {
	pub fn fixture_id(&self) -> &str {
		&self.fixture_id
	}

	pub fn instance_id(&self) -> Uuid {
		self.instance_id
	}

	pub fn status(&self) -> ListenerStatus {
		self.status.borrow().clone()
	}

	pub fn state(&self) -> ListenerState {
		self.status.borrow().state
	}

	pub fn subscribe(&self) -> watch::Receiver<ListenerStatus> {
		self.status.clone()
	}

	/// The listener finished or its task has exited
	pub fn is_closed(&self) -> bool {
		self.status.borrow().closed || self.inbox.is_closed()
	}

	/// Refresh the resource handle from a discovery pass
	pub fn update_resource(&self, resource: Arc<dyn FeedResource>) -> bool {
		self.inbox
			.send(ListenerMessage::ResourceUpdated(resource))
			.is_ok()
	}

	/// Run one watchdog tick now
	pub fn run_health_check(&self) -> bool {
		self.inbox.send(ListenerMessage::HealthCheck).is_ok()
	}

	/// Stop the listener and wait until it is disposed
	pub async fn stop(&self, reason: SuspensionReason) -> Result<(), ListenerError> {
		let (reply, done) = oneshot::channel();
		self.inbox
			.send(ListenerMessage::Stop { reason, reply })
			.map_err(|_| ListenerError::Disposed)?;
		done.await.map_err(|_| ListenerError::Disposed)
	}
}

/// Fixture Stream Listener actor
pub struct FixtureListener {
	fixture_id: String,
	gate: ProcessingGate,
	inbox_rx: mpsc::UnboundedReceiver<ListenerMessage>,
	feed_rx: FeedEventStream,
	tasks: Vec<JoinHandle<()>>,
	ticker: Option<JoinHandle<()>>,
}

impl FixtureListener {
	/// Build a listener for `resource` and start its task
	///
	/// Fails with [`ListenerError::Startup`] when streaming cannot be
	/// started; nothing is left running in that case.
	pub async fn spawn(
		resource: Arc<dyn FeedResource>,
		ctx: ListenerContext,
	) -> Result<ListenerHandle, ListenerError> {
		let instance_id = Uuid::new_v4();
		let fixture_id = resource.id().to_string();
		let (inbox, inbox_rx) = mpsc::unbounded_channel();
		let (feed_sink, feed_rx) = feed_channel();
		let (status_tx, status_rx) = watch::channel(ListenerStatus::default());
		let lock_timeout = ctx.settings.processing_lock_timeout();
		let health_interval = ctx.settings.health_check_interval();

		let mut core = ListenerCore::new(
			resource,
			ctx,
			instance_id,
			inbox.clone(),
			feed_sink,
			status_tx,
		);
		core.initialize().await?;

		let mut listener = Self {
			fixture_id: fixture_id.clone(),
			gate: ProcessingGate {
				core: Arc::new(Mutex::new(core)),
				timeout: lock_timeout,
			},
			inbox_rx,
			feed_rx,
			tasks: Vec::new(),
			ticker: None,
		};
		if let Some(interval) = health_interval {
			listener.ticker = Some(Self::spawn_ticker(inbox.clone(), interval));
		}

		tokio::spawn(listener.run());

		Ok(ListenerHandle {
			fixture_id,
			instance_id,
			inbox,
			status: status_rx,
		})
	}

	fn spawn_ticker(inbox: mpsc::UnboundedSender<ListenerMessage>, interval: Duration) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				if inbox.send(ListenerMessage::HealthCheck).is_err() {
					break;
				}
			}
		})
	}

	async fn run(mut self) {
		debug!(target: "listener", fixture_id = %self.fixture_id, "Listener task started");
		let mut feed_open = true;

		loop {
			tokio::select! {
				biased;

				message = self.inbox_rx.recv() => {
					let Some(message) = message else { break };
					if !self.handle_message(message).await {
						break;
					}
				}
				event = self.feed_rx.recv(), if feed_open => {
					match event {
						Some(event) => self.handle_feed_event(event).await,
						None => feed_open = false,
					}
				}
			}
		}

		self.teardown();
		debug!(target: "listener", fixture_id = %self.fixture_id, "Listener task exited");
	}

	/// Returns false once the listener must exit
	async fn handle_message(&mut self, message: ListenerMessage) -> bool {
		match message {
			ListenerMessage::FetchSnapshot { request, resource } => {
				self.spawn_snapshot_fetch(request, resource);
			}
			ListenerMessage::ResourceUpdated(resource) => {
				let mut entry = self.gate.enter().await;
				entry.core.on_resource_updated(resource).await;
			}
			ListenerMessage::HealthCheck => {
				let mut entry = self.gate.enter().await;
				// The recovery snapshot already resynchronizes the fixture
				if !entry.timed_out {
					entry.core.on_health_check().await;
				}
			}
			ListenerMessage::StopDelayElapsed => {
				let mut entry = self.gate.enter().await;
				entry.core.on_stop_delay_elapsed().await;
			}
			ListenerMessage::Stop { reason, reply } => {
				// Detach the feed first so nothing is processed after this point
				self.feed_rx.close();
				let mut core = self.gate.core.lock().await;
				for task in &self.tasks {
					task.abort();
				}
				core.dispose(reason).await;
				drop(core);
				let _ = reply.send(());
				return false;
			}
			ListenerMessage::Teardown => {
				info!(target: "listener", fixture_id = %self.fixture_id, "Listener finished");
				return false;
			}
		}
		true
	}

	async fn handle_feed_event(&mut self, event: FeedEvent) {
		let mut entry = self.gate.enter().await;
		let core = &mut entry.core;

		match event {
			FeedEvent::Connected => core.on_connected().await,
			FeedEvent::Disconnected => core.on_disconnected().await,
			FeedEvent::Update(_) if entry.timed_out => {
				debug!(
					target: "listener",
					fixture_id = %self.fixture_id,
					"Delta dropped after gate timeout"
				);
			}
			FeedEvent::Update(raw) => {
				let outcome = core.on_update(&raw).await;
				debug!(
					target: "listener",
					fixture_id = %self.fixture_id,
					outcome = %outcome,
					"Delta processed"
				);
			}
		}
	}

	fn spawn_snapshot_fetch(&mut self, request: SnapshotRequest, resource: Arc<dyn FeedResource>) {
		self.tasks.retain(|task| !task.is_finished());

		let gate = self.gate.clone();
		let fixture_id = self.fixture_id.clone();
		self.tasks.push(tokio::spawn(async move {
			let fetched = resource.get_snapshot().await;
			let mut entry = gate.enter().await;
			if entry.timed_out {
				debug!(
					target: "listener",
					fixture_id = %fixture_id,
					kind = ?request.kind,
					"Snapshot dropped after gate timeout"
				);
				return;
			}
			let outcome = entry.core.process_snapshot(request, fetched).await;
			debug!(
				target: "listener",
				fixture_id = %fixture_id,
				kind = ?request.kind,
				outcome = %outcome,
				state = %entry.core.state(),
				"Snapshot processed"
			);
		}));
	}

	fn teardown(&mut self) {
		self.feed_rx.close();
		self.inbox_rx.close();
		for task in self.tasks.drain(..) {
			task.abort();
		}
		if let Some(ticker) = self.ticker.take() {
			ticker.abort();
		}
	}
}
