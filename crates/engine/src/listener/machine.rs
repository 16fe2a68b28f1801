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

use std::sync::Arc;

use chrono::Utc;
use relay_sdk::{Acceptance, FeedError, FeedEventSink, FeedResource, Fixture, MatchStatus};
use tokio::{
	sync::{mpsc, watch},
	task::AbortHandle,
	time::Instant,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
	ListenerContext, ListenerError,
	message::{
		ListenerEvent, ListenerEventKind, ListenerMessage, Outcome, Rejection, SnapshotKind,
		SnapshotRequest,
	},
	state::{ListenerState, ListenerStatus},
};
use crate::{
	health::{ConnectCheck, ConnectionState, DriftCheck, HealthPolicy, StreamHealthChecker},
	rules::{PassKind, RulePipeline},
	store::Checkpoint,
	suspension::SuspensionReason,
	validator::{self, SequenceCheck},
};

/// Per-fixture state machine
///
/// Only ever accessed through the listener's processing gate, so every
/// method runs with exclusive access and never observes two updates of
/// the same fixture at once.
pub(crate) struct ListenerCore {
	fixture_id: String,
	sport: String,
	instance_id: Uuid,
	resource: Arc<dyn FeedResource>,
	ctx: ListenerContext,
	inbox: mpsc::UnboundedSender<ListenerMessage>,
	feed_sink: FeedEventSink,
	status_tx: watch::Sender<ListenerStatus>,

	state: ListenerState,
	connection: ConnectionState,
	pipeline: RulePipeline,
	health: StreamHealthChecker,

	current_sequence: i64,
	current_epoch: i64,
	match_status: Option<MatchStatus>,
	last_snapshot_sequence: i64,
	first_snapshot_processed: bool,
	resync_pending: bool,
	errored: bool,
	finished: bool,
	disposed: bool,
	last_outcome: Option<Outcome>,
	stop_delay: Option<AbortHandle>,
}

impl ListenerCore {
	pub(crate) fn new(
		resource: Arc<dyn FeedResource>,
		ctx: ListenerContext,
		instance_id: Uuid,
		inbox: mpsc::UnboundedSender<ListenerMessage>,
		feed_sink: FeedEventSink,
		status_tx: watch::Sender<ListenerStatus>,
	) -> Self {
		let pipeline = RulePipeline::with_default_rules(ctx.settings.enable_delta_rule);
		let health = StreamHealthChecker::new(HealthPolicy::from_settings(&ctx.settings));

		Self {
			fixture_id: resource.id().to_string(),
			sport: resource.sport().to_string(),
			instance_id,
			resource,
			ctx,
			inbox,
			feed_sink,
			status_tx,
			state: ListenerState::NotStarted,
			connection: ConnectionState::Idle,
			pipeline,
			health,
			current_sequence: -1,
			current_epoch: -1,
			match_status: None,
			last_snapshot_sequence: -1,
			first_snapshot_processed: false,
			resync_pending: false,
			errored: false,
			finished: false,
			disposed: false,
			last_outcome: None,
			stop_delay: None,
		}
	}

	pub(crate) fn state(&self) -> ListenerState {
		self.state
	}

	fn is_closed(&self) -> bool {
		self.finished || self.disposed
	}

	fn is_ready_for_deltas(&self) -> bool {
		!self.errored && !self.is_closed() && !self.state.is_terminal() && self.first_snapshot_processed
	}

	fn set_state(&mut self, state: ListenerState) {
		if self.state != state {
			debug!(
				target: "listener",
				fixture_id = %self.fixture_id,
				from = %self.state,
				to = %state,
				"State transition"
			);
			self.state = state;
		}
		self.publish_status();
	}

	pub(crate) fn publish_status(&self) {
		self.status_tx.send_replace(ListenerStatus {
			state: self.state,
			sequence: self.current_sequence,
			epoch: self.current_epoch,
			match_status: self.match_status,
			errored: self.errored,
			closed: self.is_closed(),
			last_outcome: self.last_outcome.clone(),
		});
	}

	fn record(&mut self, outcome: Outcome) -> Outcome {
		self.last_outcome = Some(outcome.clone());
		self.publish_status();
		outcome
	}

	fn emit(&self, kind: ListenerEventKind) {
		let _ = self.ctx.events.send(ListenerEvent {
			fixture_id: self.fixture_id.clone(),
			instance_id: self.instance_id,
			kind,
		});
	}

	/// Decide the initial behavior from the checkpoint and the resource
	pub(crate) async fn initialize(&mut self) -> Result<(), ListenerError> {
		let content = self.resource.content();
		let stored = self.ctx.store.get(&self.fixture_id);
		if let Some(state) = &stored {
			self.current_sequence = state.sequence;
			self.current_epoch = state.epoch;
			self.match_status = state.match_status;
		}

		info!(
			target: "listener",
			fixture_id = %self.fixture_id,
			instance = %self.instance_id,
			sport = %self.sport,
			sequence = content.sequence,
			match_status = ?content.match_status,
			checkpoint_sequence = stored.as_ref().map(|s| s.sequence),
			"Listener starting"
		);

		if content.match_status.is_match_over() {
			self.request_snapshot(SnapshotKind::MatchOverCloseOut, true);
			self.publish_status();
			return Ok(());
		}

		if content.match_status.is_setup() && !self.ctx.settings.allow_fixture_streaming_in_setup_mode
		{
			self.set_state(ListenerState::FixtureSetup);
			if validator::is_snapshot_needed(&content, stored.as_ref()) {
				self.request_snapshot(SnapshotKind::Registration, false);
			}
			return Ok(());
		}

		self.connect()
			.await
			.map_err(|e| ListenerError::Startup(e.to_string()))
	}

	async fn connect(&mut self) -> Result<(), FeedError> {
		if self.is_closed()
			|| self.state.is_terminal()
			|| matches!(self.state, ListenerState::Connecting | ListenerState::Streaming)
		{
			debug!(
				target: "listener",
				fixture_id = %self.fixture_id,
				state = %self.state,
				"Connect refused"
			);
			return Ok(());
		}

		self.set_state(ListenerState::Connecting);
		self.connection = ConnectionState::Requested(Instant::now());

		if let Err(e) = self.resource.start_streaming(self.feed_sink.clone()).await {
			error!(
				target: "listener",
				fixture_id = %self.fixture_id,
				error = %e,
				"Failed to start streaming"
			);
			self.set_state(ListenerState::Errored);
			return Err(e);
		}

		info!(target: "listener", fixture_id = %self.fixture_id, "Streaming requested");
		Ok(())
	}

	async fn restart_streaming(&mut self) {
		if let Err(e) = self.resource.stop_streaming().await {
			warn!(target: "listener", fixture_id = %self.fixture_id, error = %e, "Failed to stop streaming");
		}

		self.connection = ConnectionState::Requested(Instant::now());
		if !self.errored {
			self.set_state(ListenerState::Connecting);
		}

		if let Err(e) = self.resource.start_streaming(self.feed_sink.clone()).await {
			warn!(
				target: "listener",
				fixture_id = %self.fixture_id,
				error = %e,
				"Failed to restart streaming"
			);
		}
	}

	/// Feed callback: stream established
	pub(crate) async fn on_connected(&mut self) {
		if self.is_closed() {
			return;
		}

		self.connection = ConnectionState::Connected;
		let content = self.resource.content();
		let stored = self.ctx.store.get(&self.fixture_id);

		match stored {
			Some(state) if !validator::is_snapshot_needed(&content, Some(&state)) => {
				info!(
					target: "listener",
					fixture_id = %self.fixture_id,
					sequence = state.sequence,
					"Stream resumed without a gap"
				);
				self.current_sequence = state.sequence;
				if self.current_epoch < 0 {
					self.current_epoch = state.epoch;
				}
				self.first_snapshot_processed = true;
				if let Err(e) = self
					.ctx
					.suspension
					.unsuspend(&self.fixture_id, self.pipeline.markets_mut())
				{
					warn!(target: "listener", fixture_id = %self.fixture_id, error = %e, "Unsuspend failed");
				}
			}
			_ => self.request_snapshot(SnapshotKind::Connect, false),
		}

		if self.state == ListenerState::MatchOverDelay {
			self.publish_status();
		} else if self.errored {
			self.set_state(ListenerState::Errored);
		} else {
			self.set_state(ListenerState::Streaming);
		}
	}

	/// Feed callback: stream dropped
	pub(crate) async fn on_disconnected(&mut self) {
		if self.is_closed() || self.state.is_terminal() {
			return;
		}

		if self.state == ListenerState::MatchOverDelay {
			info!(target: "listener", fixture_id = %self.fixture_id, "Disconnected during match over delay");
			self.finish_ended().await;
			return;
		}

		self.connection = ConnectionState::Lost(Instant::now());
		if !self.errored {
			self.set_state(ListenerState::Disconnected);
		}

		if self.should_suspend_on_disconnect() {
			self.suspend(SuspensionReason::DisconnectEvent);
		} else {
			info!(
				target: "listener",
				fixture_id = %self.fixture_id,
				"Prematch fixture disconnected, suspension skipped"
			);
		}

		self.emit(ListenerEventKind::Disconnected);
	}

	fn should_suspend_on_disconnect(&self) -> bool {
		if !self.ctx.settings.disable_prematch_suspension_on_disconnection {
			return true;
		}

		match self.resource.content().start_time {
			Some(start) => start - Utc::now() <= self.ctx.settings.prematch_suspension_lead(),
			None => true,
		}
	}

	/// Feed callback: delta payload
	pub(crate) async fn on_update(&mut self, raw: &str) -> Outcome {
		if !self.is_ready_for_deltas() {
			let rejection = if self.is_closed() {
				Rejection::Closed
			} else {
				Rejection::NotReady
			};
			debug!(
				target: "listener",
				fixture_id = %self.fixture_id,
				state = %self.state,
				"Delta dropped, listener not ready"
			);
			return self.record(Outcome::Rejected(rejection));
		}

		let delta: Fixture = match serde_json::from_str(raw) {
			Ok(delta) => delta,
			Err(e) => return self.handle_error(ListenerError::Payload(e)).await,
		};

		let rejection = match validator::classify_sequence(delta.sequence, self.current_sequence) {
			SequenceCheck::Valid => None,
			SequenceCheck::Stale => Some(Rejection::StaleSequence {
				sequence: delta.sequence,
				current: self.current_sequence,
			}),
			SequenceCheck::Gap => Some(Rejection::SequenceGap {
				sequence: delta.sequence,
				current: self.current_sequence,
			}),
		};

		if let Some(rejection) = rejection {
			warn!(
				target: "listener",
				fixture_id = %self.fixture_id,
				sequence = delta.sequence,
				current = self.current_sequence,
				"Invalid delta sequence, resynchronizing"
			);
			if !self.resync_pending {
				self.suspend(SuspensionReason::Suspension);
				self.request_snapshot(SnapshotKind::Resync, true);
			}
			return self.record(Outcome::Rejected(rejection));
		}

		if validator::is_delta_epoch_valid(&delta, self.current_epoch) {
			self.forward_delta(delta).await
		} else {
			self.handle_epoch_change(delta).await
		}
	}

	async fn forward_delta(&mut self, mut delta: Fixture) -> Outcome {
		let epoch_changed = delta.epoch != self.current_epoch;
		self.pipeline.apply_rules(&mut delta, PassKind::Delta);

		match self.ctx.plugin.process_stream_update(&delta, epoch_changed) {
			Ok(Acceptance::Accepted) => {
				self.pipeline.commit_changes();
				self.current_sequence = delta.sequence;
				self.current_epoch = delta.epoch;
				if delta.match_status.is_some() {
					self.match_status = delta.match_status;
				}
				self.ctx.store.update(
					&self.fixture_id,
					&self.sport,
					self.checkpoint(),
					false,
				);
				debug!(
					target: "listener",
					fixture_id = %self.fixture_id,
					sequence = delta.sequence,
					epoch = delta.epoch,
					markets = delta.markets.len(),
					"Delta forwarded"
				);
				self.record(Outcome::Forwarded)
			}
			Ok(Acceptance::Ignored) => {
				self.pipeline.rollback_changes();
				self.ignore().await
			}
			Err(e) => {
				self.pipeline.rollback_changes();
				self.handle_error(ListenerError::Plugin(e)).await
			}
		}
	}

	async fn handle_epoch_change(&mut self, delta: Fixture) -> Outcome {
		info!(
			target: "listener",
			fixture_id = %self.fixture_id,
			epoch = delta.epoch,
			current = self.current_epoch,
			reasons = ?delta.last_epoch_change_reason,
			"Epoch changed"
		);

		if delta.match_status.is_some() && delta.match_status != self.match_status {
			if let Err(e) = self.ctx.plugin.process_match_status(&delta) {
				return self.handle_error(ListenerError::Plugin(e)).await;
			}
			self.match_status = delta.match_status;
		}

		if delta.is_deleted() {
			return self.process_deletion(&delta).await;
		}

		if delta.is_match_over() {
			if self.state != ListenerState::MatchOverDelay {
				self.suspend(SuspensionReason::Suspension);
			}
			self.request_snapshot(SnapshotKind::MatchOverCloseOut, true);
		} else {
			self.suspend(SuspensionReason::Suspension);
			self.request_snapshot(SnapshotKind::Resync, true);
		}

		self.record(Outcome::Suspended)
	}

	async fn process_deletion(&mut self, fixture: &Fixture) -> Outcome {
		info!(target: "listener", fixture_id = %self.fixture_id, "Fixture deleted upstream");
		self.suspend(SuspensionReason::FixtureDeleted);

		if let Err(e) = self.ctx.plugin.process_fixture_deletion(fixture) {
			error!(
				target: "listener",
				fixture_id = %self.fixture_id,
				error = %e,
				"Plugin failed processing fixture deletion"
			);
		}

		self.ctx.store.reset_sequence(&self.fixture_id);
		self.current_sequence = -1;
		let outcome = self.record(Outcome::Suspended);
		self.finish(ListenerState::Deleted, ListenerEventKind::Deleted).await;
		outcome
	}

	/// Apply a fetched snapshot
	pub(crate) async fn process_snapshot(
		&mut self,
		request: SnapshotRequest,
		fetched: Result<String, FeedError>,
	) -> Outcome {
		if request.kind == SnapshotKind::Resync {
			self.resync_pending = false;
		}
		if self.is_closed() {
			return self.record(Outcome::Rejected(Rejection::Closed));
		}

		let raw = match fetched {
			Ok(raw) if raw.trim().is_empty() => {
				let e = FeedError::EmptySnapshot(self.fixture_id.clone());
				return self.handle_error(ListenerError::Feed(e)).await;
			}
			Ok(raw) => raw,
			Err(e) => return self.handle_error(ListenerError::Feed(e)).await,
		};

		let mut snapshot: Fixture = match serde_json::from_str(&raw) {
			Ok(snapshot) => snapshot,
			Err(e) => return self.handle_error(ListenerError::Payload(e)).await,
		};

		if snapshot.sequence < self.last_snapshot_sequence {
			warn!(
				target: "listener",
				fixture_id = %self.fixture_id,
				sequence = snapshot.sequence,
				last = self.last_snapshot_sequence,
				"Out of order snapshot"
			);
			let e = FeedError::OutOfOrderSnapshot {
				fixture_id: self.fixture_id.clone(),
				sequence: snapshot.sequence,
				last: self.last_snapshot_sequence,
			};
			return self.handle_error(ListenerError::Feed(e)).await;
		}
		if snapshot.sequence == self.last_snapshot_sequence && !request.force {
			debug!(
				target: "listener",
				fixture_id = %self.fixture_id,
				sequence = snapshot.sequence,
				"Duplicate snapshot skipped"
			);
			return self.record(Outcome::Rejected(Rejection::DuplicateSnapshot {
				sequence: snapshot.sequence,
			}));
		}

		let epoch_changed = snapshot.epoch != self.current_epoch;
		let skip_rules = self.errored;
		if skip_rules {
			self.pipeline.stage_unfiltered(&snapshot, PassKind::Snapshot);
		} else {
			self.pipeline.apply_rules(&mut snapshot, PassKind::Snapshot);
		}

		match self.ctx.plugin.process_snapshot(&snapshot, epoch_changed) {
			Ok(Acceptance::Accepted) => {}
			Ok(Acceptance::Ignored) => {
				self.pipeline.rollback_changes();
				return self.ignore().await;
			}
			Err(e) => {
				self.pipeline.rollback_changes();
				return self.handle_error(ListenerError::Plugin(e)).await;
			}
		}

		self.pipeline.commit_changes();
		self.last_snapshot_sequence = snapshot.sequence;
		self.current_sequence = snapshot.sequence;
		self.current_epoch = snapshot.epoch;
		if snapshot.match_status.is_some() {
			self.match_status = snapshot.match_status;
		}
		self.first_snapshot_processed = true;
		self.ctx
			.store
			.update(&self.fixture_id, &self.sport, self.checkpoint(), true);

		if self.errored {
			self.errored = false;
			info!(target: "listener", fixture_id = %self.fixture_id, "Recovered from error");
		}

		info!(
			target: "listener",
			fixture_id = %self.fixture_id,
			kind = ?request.kind,
			sequence = snapshot.sequence,
			epoch = snapshot.epoch,
			epoch_changed = epoch_changed,
			skip_rules = skip_rules,
			markets = snapshot.markets.len(),
			"Snapshot forwarded"
		);

		let outcome = self.record(Outcome::Forwarded);
		if snapshot.is_deleted() {
			self.process_deletion(&snapshot).await;
		} else if snapshot.is_match_over() {
			self.complete_match_over().await;
		} else {
			self.set_state(self.resume_state());
		}
		outcome
	}

	/// State to return to after a successful snapshot
	fn resume_state(&self) -> ListenerState {
		match (self.state, self.connection) {
			(ListenerState::MatchOverDelay, _) => ListenerState::MatchOverDelay,
			(_, ConnectionState::Connected) => ListenerState::Streaming,
			(_, ConnectionState::Requested(_)) => ListenerState::Connecting,
			(_, ConnectionState::Lost(_)) => ListenerState::Disconnected,
			(ListenerState::Errored, ConnectionState::Idle) => ListenerState::FixtureSetup,
			(state, ConnectionState::Idle) => state,
		}
	}

	async fn complete_match_over(&mut self) {
		let delay = self.ctx.settings.stop_streaming_delay();
		if delay.is_zero() || self.connection == ConnectionState::Idle {
			self.finish_ended().await;
			return;
		}

		if self.state == ListenerState::MatchOverDelay {
			return;
		}

		info!(
			target: "listener",
			fixture_id = %self.fixture_id,
			delay_secs = delay.as_secs(),
			"Match over, streaming until the stop delay elapses"
		);
		self.set_state(ListenerState::MatchOverDelay);

		let inbox = self.inbox.clone();
		let timer = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let _ = inbox.send(ListenerMessage::StopDelayElapsed);
		});
		self.stop_delay = Some(timer.abort_handle());
	}

	pub(crate) async fn on_stop_delay_elapsed(&mut self) {
		if self.state == ListenerState::MatchOverDelay && !self.is_closed() {
			self.finish_ended().await;
		}
	}

	async fn finish_ended(&mut self) {
		self.ctx.store.remove(&self.fixture_id);
		info!(target: "listener", fixture_id = %self.fixture_id, "Fixture ended");
		self.finish(ListenerState::Ended, ListenerEventKind::Ended).await;
	}

	async fn ignore(&mut self) -> Outcome {
		info!(target: "listener", fixture_id = %self.fixture_id, "Fixture ignored by consumer");
		self.ctx.store.mark_ignored(&self.fixture_id, &self.sport);
		let outcome = self.record(Outcome::Ignored);
		self.finish(ListenerState::Stopped, ListenerEventKind::Ignored).await;
		outcome
	}

	/// Contain a processing error
	///
	/// The first error suspends and triggers a recovery snapshot. An error
	/// while still recovering re-suspends and gives the fixture back to the
	/// supervisor instead of retrying.
	async fn handle_error(&mut self, err: ListenerError) -> Outcome {
		let reason = err.to_string();
		self.pipeline.rollback_changes();

		if self.errored {
			error!(
				target: "listener",
				fixture_id = %self.fixture_id,
				error = %reason,
				"Processing failed again while recovering"
			);
			self.set_state(ListenerState::Errored);
			self.suspend(SuspensionReason::FixtureErrored);
			let outcome = self.record(Outcome::Errored(reason.clone()));
			self.finish(ListenerState::Errored, ListenerEventKind::Errored(reason))
				.await;
			return outcome;
		}

		error!(
			target: "listener",
			fixture_id = %self.fixture_id,
			error = %reason,
			"Processing failed, recovering through snapshot"
		);
		self.errored = true;
		self.set_state(ListenerState::Errored);
		self.suspend(SuspensionReason::FixtureErrored);
		self.request_snapshot(SnapshotKind::Recovery, true);
		self.record(Outcome::Errored(reason))
	}

	/// Entry point for failures outside processing, such as a gate timeout
	pub(crate) async fn on_error(&mut self, err: ListenerError) {
		if !self.is_closed() {
			self.handle_error(err).await;
		}
	}

	pub(crate) async fn on_resource_updated(&mut self, resource: Arc<dyn FeedResource>) {
		if self.is_closed() {
			return;
		}

		self.resource = resource;
		if self.state != ListenerState::FixtureSetup {
			return;
		}

		let content = self.resource.content();
		if content.match_status.is_match_over() {
			self.request_snapshot(SnapshotKind::MatchOverCloseOut, true);
		} else if !content.match_status.is_setup() {
			info!(target: "listener", fixture_id = %self.fixture_id, "Fixture eligible to stream");
			if let Err(e) = self.connect().await {
				self.handle_error(ListenerError::Feed(e)).await;
			}
		} else if content.sequence != self.current_sequence {
			self.request_snapshot(SnapshotKind::Registration, false);
		}
	}

	pub(crate) async fn on_health_check(&mut self) {
		if self.is_closed() || self.state == ListenerState::MatchOverDelay {
			return;
		}

		match self.health.check_connect(self.connection, Instant::now()) {
			ConnectCheck::Healthy => {}
			ConnectCheck::Retry { attempt } => {
				warn!(
					target: "health",
					fixture_id = %self.fixture_id,
					attempt = attempt,
					"Stream not connected in time, restarting"
				);
				self.restart_streaming().await;
				return;
			}
			ConnectCheck::GiveUp { attempts } => {
				error!(
					target: "health",
					fixture_id = %self.fixture_id,
					attempts = attempts,
					"Stream never connected, giving up"
				);
				self.suspend(SuspensionReason::FixtureDisposing);
				self.finish(ListenerState::Stopped, ListenerEventKind::ConnectTimeout)
					.await;
				return;
			}
		}

		let content = self.resource.content();
		let eligible =
			self.health
				.is_drift_check_eligible(self.state, self.match_status, content.match_status);

		match self
			.health
			.check_drift(eligible, content.sequence, self.current_sequence)
		{
			DriftCheck::Healthy | DriftCheck::Skipped => {}
			DriftCheck::Recover { gap } => {
				warn!(
					target: "health",
					fixture_id = %self.fixture_id,
					gap = gap,
					observed = content.sequence,
					processed = self.current_sequence,
					"Sequence drift detected, resynchronizing"
				);
				self.suspend(SuspensionReason::HealthCheckFailure);
				self.request_snapshot(SnapshotKind::HealthCheck, true);
			}
			DriftCheck::Escalate { gap } => {
				let resource_match_over = content.match_status.is_match_over();
				error!(
					target: "health",
					fixture_id = %self.fixture_id,
					gap = gap,
					resource_match_over = resource_match_over,
					"Sequence drift persists, stopping listener"
				);
				self.suspend(SuspensionReason::HealthCheckFailure);
				self.finish(
					ListenerState::Stopped,
					ListenerEventKind::HealthCheckFailed {
						resource_match_over,
					},
				)
				.await;
			}
		}
	}

	/// Release the listener; idempotent
	///
	/// Issues one final suspension unless the fixture already ended, was
	/// deleted, or is within its match over delay.
	pub(crate) async fn dispose(&mut self, reason: SuspensionReason) {
		if self.disposed {
			return;
		}
		self.disposed = true;
		self.abort_stop_delay();

		if self.finished {
			return;
		}

		match self.state {
			ListenerState::MatchOverDelay => {
				self.ctx.store.remove(&self.fixture_id);
				self.state = ListenerState::Ended;
			}
			ListenerState::Ended | ListenerState::Deleted => {}
			_ => {
				self.suspend(reason);
				self.state = ListenerState::Stopped;
			}
		}

		self.stop_streaming().await;
		info!(
			target: "listener",
			fixture_id = %self.fixture_id,
			reason = %reason,
			state = %self.state,
			"Listener disposed"
		);
		self.publish_status();
	}

	async fn finish(&mut self, state: ListenerState, kind: ListenerEventKind) {
		if self.finished {
			return;
		}
		self.finished = true;
		self.abort_stop_delay();
		self.set_state(state);
		self.stop_streaming().await;

		self.emit(kind);
		let _ = self.inbox.send(ListenerMessage::Teardown);
	}

	async fn stop_streaming(&mut self) {
		if self.connection == ConnectionState::Idle {
			return;
		}
		self.connection = ConnectionState::Idle;
		if let Err(e) = self.resource.stop_streaming().await {
			warn!(target: "listener", fixture_id = %self.fixture_id, error = %e, "Failed to stop streaming");
		}
	}

	fn abort_stop_delay(&mut self) {
		if let Some(timer) = self.stop_delay.take() {
			timer.abort();
		}
	}

	fn suspend(&mut self, reason: SuspensionReason) {
		if let Err(e) = self
			.ctx
			.suspension
			.suspend(&self.fixture_id, self.pipeline.markets_mut(), reason)
		{
			warn!(target: "listener", fixture_id = %self.fixture_id, error = %e, "Suspension failed");
		}
	}

	fn request_snapshot(&mut self, kind: SnapshotKind, force: bool) {
		if self.is_closed() {
			return;
		}
		if kind == SnapshotKind::Resync {
			self.resync_pending = true;
		}

		debug!(
			target: "listener",
			fixture_id = %self.fixture_id,
			kind = ?kind,
			force = force,
			"Snapshot requested"
		);
		let _ = self.inbox.send(ListenerMessage::FetchSnapshot {
			request: SnapshotRequest::new(kind, force),
			resource: self.resource.clone(),
		});
	}

	fn checkpoint(&self) -> Checkpoint {
		Checkpoint {
			sequence: self.current_sequence,
			epoch: self.current_epoch,
			match_status: self.match_status,
		}
	}
}
