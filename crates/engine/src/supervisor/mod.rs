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

//! Listener supervisor
//!
//! A single task owning every fixture listener. It receives discovery
//! passes from the scheduler, builds listeners through the
//! [`ListenerBuilder`], reacts to [`ListenerEvent`]s and removes fixtures
//! that stay absent from the catalog.
//!
//! Builds and stops run as spawned tasks so slow feed calls never stall the
//! supervisor loop.

mod builder;

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

use relay_sdk::{FeedResource, MatchStatus};
use thiserror::Error;
use tokio::{
	sync::{mpsc, oneshot},
	task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

pub use builder::{BuilderState, ListenerBuilder};

use crate::{
	listener::{
		FixtureListener, ListenerContext, ListenerError, ListenerEvent, ListenerEventKind,
		ListenerHandle,
	},
	suspension::SuspensionReason,
};

/// Error types for supervisor requests
#[derive(Debug, Error)]
pub enum SupervisorError {
	#[error("Supervisor is not running")]
	Closed,
}

/// Counters reported by [`SupervisorHandle::status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
	pub listeners: usize,
	pub builder_state: BuilderState,
	pub builds_in_flight: usize,
	pub builds_deferred: usize,
	pub pending_removal: usize,
}

enum SupervisorMessage {
	Discovered {
		sport: String,
		resources: Vec<Arc<dyn FeedResource>>,
	},
	BuildFinished {
		resource: Arc<dyn FeedResource>,
		result: Result<ListenerHandle, ListenerError>,
	},
	Listener {
		fixture_id: String,
		reply: oneshot::Sender<Option<ListenerHandle>>,
	},
	Status {
		reply: oneshot::Sender<SupervisorStatus>,
	},
	Shutdown {
		reply: oneshot::Sender<()>,
	},
}

#[derive(Clone)]
pub struct SupervisorHandle {
	inbox: mpsc::UnboundedSender<SupervisorMessage>,
}

impl SupervisorHandle {
	/// Deliver one catalog enumeration for `sport`
	pub fn discovered(
		&self,
		sport: impl Into<String>,
		resources: Vec<Arc<dyn FeedResource>>,
	) -> Result<(), SupervisorError> {
		self.inbox
			.send(SupervisorMessage::Discovered {
				sport: sport.into(),
				resources,
			})
			.map_err(|_| SupervisorError::Closed)
	}

	pub async fn listener(&self, fixture_id: &str) -> Result<Option<ListenerHandle>, SupervisorError> {
		let (reply, rx) = oneshot::channel();
		self.inbox
			.send(SupervisorMessage::Listener {
				fixture_id: fixture_id.to_string(),
				reply,
			})
			.map_err(|_| SupervisorError::Closed)?;
		rx.await.map_err(|_| SupervisorError::Closed)
	}

	pub async fn status(&self) -> Result<SupervisorStatus, SupervisorError> {
		let (reply, rx) = oneshot::channel();
		self.inbox
			.send(SupervisorMessage::Status { reply })
			.map_err(|_| SupervisorError::Closed)?;
		rx.await.map_err(|_| SupervisorError::Closed)
	}

	/// Stop every listener, flush the store and exit the supervisor
	pub async fn shutdown(&self) -> Result<(), SupervisorError> {
		let (reply, rx) = oneshot::channel();
		self.inbox
			.send(SupervisorMessage::Shutdown { reply })
			.map_err(|_| SupervisorError::Closed)?;
		rx.await.map_err(|_| SupervisorError::Closed)
	}
}

struct ListenerEntry {
	handle: ListenerHandle,
	sport: String,
	resource: Arc<dyn FeedResource>,
}

pub struct Supervisor {
	ctx: ListenerContext,
	builder: ListenerBuilder,
	listeners: HashMap<String, ListenerEntry>,
	/// Listeners absent from the last enumeration of their sport
	pending_removal: HashSet<String>,
	/// Checkpoints without a listener, absent from the last enumeration
	pending_purge: HashSet<String>,
	inbox: mpsc::UnboundedSender<SupervisorMessage>,
	inbox_rx: mpsc::UnboundedReceiver<SupervisorMessage>,
	events_rx: mpsc::UnboundedReceiver<ListenerEvent>,
	stops: JoinSet<()>,
}

impl Supervisor {
	/// Start the supervisor task
	///
	/// `ctx.events` must be the sending half of `events_rx`; every listener
	/// built by the supervisor reports through it.
	pub fn start(
		ctx: ListenerContext,
		events_rx: mpsc::UnboundedReceiver<ListenerEvent>,
	) -> (SupervisorHandle, JoinHandle<()>) {
		let (inbox, inbox_rx) = mpsc::unbounded_channel();
		let supervisor = Self {
			builder: ListenerBuilder::new(ctx.settings.fixture_creation_concurrency),
			ctx,
			listeners: HashMap::new(),
			pending_removal: HashSet::new(),
			pending_purge: HashSet::new(),
			inbox: inbox.clone(),
			inbox_rx,
			events_rx,
			stops: JoinSet::new(),
		};

		let task = tokio::spawn(supervisor.run());
		(SupervisorHandle { inbox }, task)
	}

	async fn run(mut self) {
		info!(
			target: "supervisor",
			concurrency = self.ctx.settings.fixture_creation_concurrency,
			"Supervisor started"
		);

		loop {
			tokio::select! {
				message = self.inbox_rx.recv() => {
					let Some(message) = message else { break };
					if let SupervisorMessage::Shutdown { reply } = message {
						self.shutdown().await;
						let _ = reply.send(());
						break;
					}
					self.handle_message(message);
				}
				Some(event) = self.events_rx.recv() => self.handle_event(event),
				Some(_) = self.stops.join_next(), if !self.stops.is_empty() => {}
			}
		}

		info!(target: "supervisor", "Supervisor stopped");
	}

	fn handle_message(&mut self, message: SupervisorMessage) {
		match message {
			SupervisorMessage::Discovered { sport, resources } => {
				self.on_discovered(&sport, resources);
			}
			SupervisorMessage::BuildFinished { resource, result } => {
				self.on_build_finished(resource, result);
			}
			SupervisorMessage::Listener { fixture_id, reply } => {
				let handle = self
					.listeners
					.get(&fixture_id)
					.map(|entry| entry.handle.clone());
				let _ = reply.send(handle);
			}
			SupervisorMessage::Status { reply } => {
				let _ = reply.send(self.status());
			}
			SupervisorMessage::Shutdown { .. } => {}
		}
	}

	fn status(&self) -> SupervisorStatus {
		SupervisorStatus {
			listeners: self.listeners.len(),
			builder_state: self.builder.state(),
			builds_in_flight: self.builder.in_flight(),
			builds_deferred: self.builder.deferred(),
			pending_removal: self.pending_removal.len() + self.pending_purge.len(),
		}
	}

	fn on_discovered(&mut self, sport: &str, resources: Vec<Arc<dyn FeedResource>>) {
		let present: HashSet<String> = resources.iter().map(|r| r.id().to_string()).collect();
		debug!(
			target: "supervisor",
			sport = sport,
			fixtures = present.len(),
			"Discovery pass received"
		);

		for resource in resources {
			let fixture_id = resource.id().to_string();
			self.pending_removal.remove(&fixture_id);
			self.pending_purge.remove(&fixture_id);

			if let Some(entry) = self.listeners.get_mut(&fixture_id) {
				entry.resource = resource.clone();
				if entry.handle.update_resource(resource.clone()) {
					continue;
				}
				debug!(target: "supervisor", fixture_id = %fixture_id, "Listener exited, dropping it");
				self.listeners.remove(&fixture_id);
			}

			self.request_build(resource);
		}

		self.remove_absent_listeners(sport, &present);
		self.purge_absent_checkpoints(sport, &present);
	}

	/// Two-pass removal: a listener absent from one enumeration is marked,
	/// absent from the next it is stopped.
	fn remove_absent_listeners(&mut self, sport: &str, present: &HashSet<String>) {
		let absent: Vec<String> = self
			.listeners
			.iter()
			.filter(|(id, entry)| entry.sport == sport && !present.contains(*id))
			.map(|(id, _)| id.clone())
			.collect();

		for fixture_id in absent {
			if !self.pending_removal.remove(&fixture_id) {
				debug!(target: "supervisor", fixture_id = %fixture_id, "Fixture absent, marked for removal");
				self.pending_removal.insert(fixture_id);
				continue;
			}

			if let Some(entry) = self.listeners.remove(&fixture_id) {
				info!(target: "supervisor", fixture_id = %fixture_id, "Fixture gone upstream, removing listener");
				self.ctx.store.remove(&fixture_id);
				self.spawn_stop(entry.handle, SuspensionReason::FixtureDisposing);
			}
		}

		let cancelled = self.builder.cancel_absent(sport, present);
		if cancelled > 0 {
			debug!(target: "supervisor", sport = sport, count = cancelled, "Deferred builds cancelled");
		}
	}

	fn purge_absent_checkpoints(&mut self, sport: &str, present: &HashSet<String>) {
		let orphaned: Vec<String> = self
			.ctx
			.store
			.absent_from(sport, present)
			.into_iter()
			.filter(|id| !self.listeners.contains_key(id) && !self.builder.is_pending(id))
			.collect();

		let mut confirmed = Vec::new();
		for fixture_id in orphaned {
			if self.pending_purge.remove(&fixture_id) {
				confirmed.push(fixture_id);
			} else {
				self.pending_purge.insert(fixture_id);
			}
		}

		if !confirmed.is_empty() {
			self.ctx.store.purge(&confirmed);
		}
	}

	fn request_build(&mut self, resource: Arc<dyn FeedResource>) {
		let fixture_id = resource.id().to_string();
		let status = resource.match_status();

		if status == MatchStatus::Deleted {
			debug!(target: "supervisor", fixture_id = %fixture_id, "Fixture deleted upstream, not building");
			return;
		}
		if status.is_match_over() && !self.ctx.store.contains(&fixture_id) {
			debug!(
				target: "supervisor",
				fixture_id = %fixture_id,
				"Fixture over with nothing to reconcile, not building"
			);
			return;
		}
		if self.ctx.store.is_ignored(&fixture_id) {
			debug!(target: "supervisor", fixture_id = %fixture_id, "Fixture ignored by consumer, not building");
			return;
		}

		if let Some(resource) = self.builder.submit(resource) {
			self.start_build(resource);
		}
	}

	fn start_build(&self, resource: Arc<dyn FeedResource>) {
		let ctx = self.ctx.clone();
		let inbox = self.inbox.clone();
		let shutdown_reason = self.shutdown_reason();

		tokio::spawn(async move {
			let result = FixtureListener::spawn(resource.clone(), ctx).await;

			if let Err(mpsc::error::SendError(message)) =
				inbox.send(SupervisorMessage::BuildFinished { resource, result })
				&& let SupervisorMessage::BuildFinished {
					result: Ok(handle), ..
				} = message
			{
				// Supervisor already gone; do not leak the listener
				let _ = handle.stop(shutdown_reason).await;
			}
		});
	}

	fn on_build_finished(
		&mut self,
		resource: Arc<dyn FeedResource>,
		result: Result<ListenerHandle, ListenerError>,
	) {
		let fixture_id = resource.id();
		let released = self.builder.complete(fixture_id);

		match result {
			Ok(handle) => {
				if let Some(previous) = self.listeners.remove(fixture_id) {
					self.spawn_stop(previous.handle, SuspensionReason::FixtureDisposing);
				}
				if handle.is_closed() {
					debug!(target: "supervisor", fixture_id = fixture_id, "Listener finished during build");
				} else {
					info!(target: "supervisor", fixture_id = fixture_id, "Listener created");
					self.listeners.insert(
						fixture_id.to_string(),
						ListenerEntry {
							handle,
							sport: resource.sport().to_string(),
							resource: resource.clone(),
						},
					);
				}
			}
			Err(e) => {
				warn!(
					target: "supervisor",
					fixture_id = fixture_id,
					error = %e,
					"Listener build failed, retrying on next discovery"
				);
			}
		}

		for resource in released {
			self.start_build(resource);
		}
	}

	fn handle_event(&mut self, event: ListenerEvent) {
		let current = self
			.listeners
			.get(&event.fixture_id)
			.is_some_and(|entry| entry.handle.instance_id() == event.instance_id);
		if !current {
			debug!(
				target: "supervisor",
				fixture_id = %event.fixture_id,
				kind = ?event.kind,
				"Event from a replaced listener ignored"
			);
			return;
		}

		if !event.kind.is_final() {
			debug!(target: "supervisor", fixture_id = %event.fixture_id, kind = ?event.kind, "Listener event");
			return;
		}

		let Some(entry) = self.listeners.remove(&event.fixture_id) else {
			return;
		};

		match event.kind {
			ListenerEventKind::Ended => {
				info!(target: "supervisor", fixture_id = %event.fixture_id, "Listener ended");
			}
			ListenerEventKind::Deleted => {
				info!(target: "supervisor", fixture_id = %event.fixture_id, "Listener removed, fixture deleted");
			}
			ListenerEventKind::Ignored => {
				info!(target: "supervisor", fixture_id = %event.fixture_id, "Listener removed, fixture ignored");
			}
			ListenerEventKind::Errored(reason) => {
				error!(
					target: "supervisor",
					fixture_id = %event.fixture_id,
					reason = %reason,
					"Listener gave up, rebuilding on next discovery"
				);
			}
			ListenerEventKind::ConnectTimeout => {
				warn!(
					target: "supervisor",
					fixture_id = %event.fixture_id,
					"Listener never connected, rebuilding on next discovery"
				);
			}
			ListenerEventKind::HealthCheckFailed { resource_match_over } => {
				warn!(
					target: "supervisor",
					fixture_id = %event.fixture_id,
					resource_match_over = resource_match_over,
					"Listener failed health checks"
				);
				if resource_match_over {
					self.request_build(entry.resource);
				}
			}
			ListenerEventKind::Disconnected => {}
		}
	}

	fn spawn_stop(&mut self, handle: ListenerHandle, reason: SuspensionReason) {
		self.stops.spawn(async move {
			if let Err(e) = handle.stop(reason).await {
				debug!(
					target: "supervisor",
					fixture_id = handle.fixture_id(),
					error = %e,
					"Listener already stopped"
				);
			}
		});
	}

	fn shutdown_reason(&self) -> SuspensionReason {
		if self.ctx.settings.suspend_all_markets_on_shutdown {
			SuspensionReason::Suspension
		} else {
			SuspensionReason::FixtureDisposing
		}
	}

	async fn shutdown(&mut self) {
		let reason = self.shutdown_reason();
		info!(
			target: "supervisor",
			listeners = self.listeners.len(),
			reason = %reason,
			"Stopping all listeners"
		);

		for (_, entry) in self.listeners.drain() {
			let handle = entry.handle;
			self.stops.spawn(async move {
				let _ = handle.stop(reason).await;
			});
		}
		while self.stops.join_next().await.is_some() {}

		if let Err(e) = self.ctx.store.flush() {
			error!(target: "supervisor", error = %e, "Failed to flush fixture state on shutdown");
		}
	}
}
