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

#![allow(dead_code)]

use std::{
	collections::VecDeque,
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_engine::{
	FixtureListener, FixtureStateStore, ListenerContext, ListenerEvent, ListenerHandle,
	ListenerState, MemoryPersistence, Settings,
};
use relay_sdk::{
	Acceptance, ConsumerPlugin, EpochChangeReason, FeedError, FeedEvent, FeedEventSink,
	FeedResource, Fixture, FixtureCatalog, Market, MatchStatus, PluginError, ResourceContent,
	Selection, SelectionStatus,
};
use tokio::sync::{mpsc, watch};

pub const SPORT: &str = "football";

/// Settings with the background ticker disabled; tests drive health checks
pub fn test_settings() -> Settings {
	Settings {
		health_check_interval_secs: 0,
		fixtures_state_auto_store_interval_ms: 50,
		fixture_checker_frequency_ms: 50,
		..Settings::default()
	}
}

pub fn active_market(id: &str) -> Market {
	Market::new(id)
		.with_name(format!("Market {}", id))
		.with_selection(Selection::new("home", SelectionStatus::Active).with_tradable(true).with_price(1.8))
		.with_selection(Selection::new("away", SelectionStatus::Active).with_tradable(true).with_price(2.1))
}

pub fn fixture(id: &str, sequence: i64, epoch: i64, status: MatchStatus) -> Fixture {
	let mut fixture = Fixture::new(id);
	fixture.sequence = sequence;
	fixture.epoch = epoch;
	fixture.match_status = Some(status);
	fixture.markets = vec![active_market("m1"), active_market("m2")];
	fixture
}

pub fn delta(id: &str, sequence: i64, epoch: i64) -> Fixture {
	let mut delta = Fixture::new(id);
	delta.sequence = sequence;
	delta.epoch = epoch;
	let mut market = Market::new("m1");
	market
		.selections
		.push(Selection::new("home", SelectionStatus::Active).with_tradable(true).with_price(1.5 + sequence as f64 / 100.0));
	delta.markets = vec![market];
	delta
}

pub fn epoch_delta(
	id: &str,
	sequence: i64,
	epoch: i64,
	reasons: Vec<EpochChangeReason>,
	status: Option<MatchStatus>,
) -> Fixture {
	let mut delta = delta(id, sequence, epoch);
	delta.last_epoch_change_reason = reasons;
	delta.match_status = status;
	delta
}

/// In-process feed resource
pub struct MockResource {
	id: String,
	sport: String,
	content: Mutex<ResourceContent>,
	snapshot: Mutex<Fixture>,
	queued: Mutex<VecDeque<Fixture>>,
	fail_snapshots: AtomicBool,
	fail_start: AtomicBool,
	auto_connect: AtomicBool,
	snapshot_requests: AtomicUsize,
	start_calls: AtomicUsize,
	stop_calls: AtomicUsize,
	sink: Mutex<Option<FeedEventSink>>,
	snapshot_gate: watch::Sender<bool>,
	start_gate: watch::Sender<bool>,
}

impl MockResource {
	pub fn new(id: &str, sequence: i64, status: MatchStatus) -> Arc<Self> {
		let (snapshot_gate, _) = watch::channel(true);
		let (start_gate, _) = watch::channel(true);
		Arc::new(Self {
			id: id.to_string(),
			sport: SPORT.to_string(),
			content: Mutex::new(ResourceContent::new(sequence, status)),
			snapshot: Mutex::new(fixture(id, sequence, 1, status)),
			queued: Mutex::new(VecDeque::new()),
			fail_snapshots: AtomicBool::new(false),
			fail_start: AtomicBool::new(false),
			auto_connect: AtomicBool::new(true),
			snapshot_requests: AtomicUsize::new(0),
			start_calls: AtomicUsize::new(0),
			stop_calls: AtomicUsize::new(0),
			sink: Mutex::new(None),
			snapshot_gate,
			start_gate,
		})
	}

	pub fn as_resource(self: &Arc<Self>) -> Arc<dyn FeedResource> {
		self.clone()
	}

	pub fn set_content(&self, sequence: i64, status: MatchStatus) {
		let mut content = self.content.lock().unwrap();
		content.sequence = sequence;
		content.match_status = status;
	}

	pub fn set_start_time(&self, start_time: DateTime<Utc>) {
		self.content.lock().unwrap().start_time = Some(start_time);
	}

	pub fn set_snapshot(&self, fixture: Fixture) {
		*self.snapshot.lock().unwrap() = fixture;
	}

	/// Serve `fixture` once, ahead of the standing snapshot
	pub fn queue_snapshot(&self, fixture: Fixture) {
		self.queued.lock().unwrap().push_back(fixture);
	}

	pub fn fail_snapshots(&self, fail: bool) {
		self.fail_snapshots.store(fail, Ordering::SeqCst);
	}

	pub fn fail_start(&self, fail: bool) {
		self.fail_start.store(fail, Ordering::SeqCst);
	}

	pub fn auto_connect(&self, enabled: bool) {
		self.auto_connect.store(enabled, Ordering::SeqCst);
	}

	pub fn block_snapshots(&self) {
		self.snapshot_gate.send_replace(false);
	}

	pub fn release_snapshots(&self) {
		self.snapshot_gate.send_replace(true);
	}

	pub fn block_start(&self) {
		self.start_gate.send_replace(false);
	}

	pub fn release_start(&self) {
		self.start_gate.send_replace(true);
	}

	pub fn snapshot_requests(&self) -> usize {
		self.snapshot_requests.load(Ordering::SeqCst)
	}

	pub fn start_calls(&self) -> usize {
		self.start_calls.load(Ordering::SeqCst)
	}

	pub fn stop_calls(&self) -> usize {
		self.stop_calls.load(Ordering::SeqCst)
	}

	fn send(&self, event: FeedEvent) -> bool {
		match self.sink.lock().unwrap().as_ref() {
			Some(sink) => sink.send(event).is_ok(),
			None => false,
		}
	}

	pub fn connect(&self) -> bool {
		self.send(FeedEvent::Connected)
	}

	pub fn disconnect(&self) -> bool {
		self.send(FeedEvent::Disconnected)
	}

	pub fn push_update(&self, delta: &Fixture) -> bool {
		self.send(FeedEvent::Update(serde_json::to_string(delta).unwrap()))
	}

	pub fn push_raw(&self, payload: &str) -> bool {
		self.send(FeedEvent::Update(payload.to_string()))
	}
}

#[async_trait]
impl FeedResource for MockResource {
	fn id(&self) -> &str {
		&self.id
	}

	fn sport(&self) -> &str {
		&self.sport
	}

	fn content(&self) -> ResourceContent {
		self.content.lock().unwrap().clone()
	}

	async fn start_streaming(&self, events: FeedEventSink) -> Result<(), FeedError> {
		self.start_calls.fetch_add(1, Ordering::SeqCst);
		let mut gate = self.start_gate.subscribe();
		let _ = gate.wait_for(|open| *open).await;

		if self.fail_start.load(Ordering::SeqCst) {
			return Err(FeedError::Connection("refused".to_string()));
		}
		if self.auto_connect.load(Ordering::SeqCst) {
			let _ = events.send(FeedEvent::Connected);
		}
		*self.sink.lock().unwrap() = Some(events);
		Ok(())
	}

	async fn stop_streaming(&self) -> Result<(), FeedError> {
		self.stop_calls.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn get_snapshot(&self) -> Result<String, FeedError> {
		self.snapshot_requests.fetch_add(1, Ordering::SeqCst);
		let mut gate = self.snapshot_gate.subscribe();
		let _ = gate.wait_for(|open| *open).await;

		if self.fail_snapshots.load(Ordering::SeqCst) {
			return Err(FeedError::Snapshot("unavailable".to_string()));
		}
		let queued = self.queued.lock().unwrap().pop_front();
		let snapshot = queued.unwrap_or_else(|| self.snapshot.lock().unwrap().clone());
		Ok(serde_json::to_string(&snapshot).unwrap())
	}
}

/// Catalog over a mutable list of mock resources
#[derive(Default)]
pub struct MockCatalog {
	resources: Mutex<Vec<Arc<MockResource>>>,
}

impl MockCatalog {
	pub fn set(&self, resources: Vec<Arc<MockResource>>) {
		*self.resources.lock().unwrap() = resources;
	}
}

#[async_trait]
impl FixtureCatalog for MockCatalog {
	async fn sports(&self) -> Result<Vec<String>, FeedError> {
		Ok(vec![SPORT.to_string()])
	}

	async fn list_fixtures(&self, sport: &str) -> Result<Vec<Arc<dyn FeedResource>>, FeedError> {
		Ok(self
			.resources
			.lock()
			.unwrap()
			.iter()
			.filter(|r| r.sport() == sport)
			.map(|r| r.as_resource())
			.collect())
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
	Snapshot(Fixture, bool),
	StreamUpdate(Fixture, bool),
	MatchStatus(Fixture),
	Deletion(Fixture),
	Suspend(String),
	Unsuspend(Fixture),
}

/// Consumer plugin recording every call
#[derive(Default)]
pub struct RecordingPlugin {
	calls: Mutex<Vec<Call>>,
	fail_snapshots: AtomicUsize,
	fail_updates: AtomicUsize,
	ignore: AtomicBool,
	stall_next_snapshot: Mutex<Option<Duration>>,
	stalling: AtomicBool,
}

impl RecordingPlugin {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Fail the next `count` snapshot calls
	pub fn fail_next_snapshots(&self, count: usize) {
		self.fail_snapshots.store(count, Ordering::SeqCst);
	}

	/// Fail the next `count` non-suspension stream updates
	pub fn fail_next_updates(&self, count: usize) {
		self.fail_updates.store(count, Ordering::SeqCst);
	}

	/// Hold the calling thread inside the next snapshot call for `duration`
	pub fn stall_next_snapshot(&self, duration: Duration) {
		*self.stall_next_snapshot.lock().unwrap() = Some(duration);
	}

	pub fn is_stalling(&self) -> bool {
		self.stalling.load(Ordering::SeqCst)
	}

	pub fn ignore_fixtures(&self, ignore: bool) {
		self.ignore.store(ignore, Ordering::SeqCst);
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().unwrap().clone()
	}

	pub fn snapshots(&self) -> Vec<(Fixture, bool)> {
		self.calls()
			.into_iter()
			.filter_map(|c| match c {
				Call::Snapshot(f, changed) => Some((f, changed)),
				_ => None,
			})
			.collect()
	}

	/// Forwarded deltas, excluding suspension payloads
	pub fn updates(&self) -> Vec<(Fixture, bool)> {
		self.calls()
			.into_iter()
			.filter_map(|c| match c {
				Call::StreamUpdate(f, changed) if !is_suspension(&f) => Some((f, changed)),
				_ => None,
			})
			.collect()
	}

	/// Suspension payloads and fixture-level suspend calls
	pub fn suspensions(&self) -> Vec<Call> {
		self.calls()
			.into_iter()
			.filter(|c| match c {
				Call::StreamUpdate(f, _) => is_suspension(f),
				Call::Suspend(_) => true,
				_ => false,
			})
			.collect()
	}

	pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
		self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
	}

	fn take_failure(counter: &AtomicUsize) -> bool {
		counter
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok()
	}

	fn acceptance(&self) -> Acceptance {
		if self.ignore.load(Ordering::SeqCst) {
			Acceptance::Ignored
		} else {
			Acceptance::Accepted
		}
	}
}

/// Suspension payloads are built by the engine rather than the feed and
/// carry no sequence.
pub fn is_suspension(fixture: &Fixture) -> bool {
	fixture.sequence == 0
		&& fixture
			.markets
			.iter()
			.all(|m| m.selections.iter().all(|s| !s.is_tradable()))
}

impl ConsumerPlugin for RecordingPlugin {
	fn process_snapshot(&self, fixture: &Fixture, epoch_changed: bool) -> Result<Acceptance, PluginError> {
		let stall = self.stall_next_snapshot.lock().unwrap().take();
		if let Some(duration) = stall {
			self.stalling.store(true, Ordering::SeqCst);
			std::thread::sleep(duration);
			self.stalling.store(false, Ordering::SeqCst);
		}
		if Self::take_failure(&self.fail_snapshots) {
			return Err(PluginError::failed(&fixture.id, "snapshot rejected"));
		}
		self.calls
			.lock()
			.unwrap()
			.push(Call::Snapshot(fixture.clone(), epoch_changed));
		Ok(self.acceptance())
	}

	fn process_stream_update(&self, fixture: &Fixture, epoch_changed: bool) -> Result<Acceptance, PluginError> {
		if !is_suspension(fixture) && Self::take_failure(&self.fail_updates) {
			return Err(PluginError::failed(&fixture.id, "update rejected"));
		}
		self.calls
			.lock()
			.unwrap()
			.push(Call::StreamUpdate(fixture.clone(), epoch_changed));
		Ok(self.acceptance())
	}

	fn process_match_status(&self, fixture: &Fixture) -> Result<(), PluginError> {
		self.calls.lock().unwrap().push(Call::MatchStatus(fixture.clone()));
		Ok(())
	}

	fn process_fixture_deletion(&self, fixture: &Fixture) -> Result<(), PluginError> {
		self.calls.lock().unwrap().push(Call::Deletion(fixture.clone()));
		Ok(())
	}

	fn suspend(&self, fixture_id: &str) -> Result<(), PluginError> {
		self.calls.lock().unwrap().push(Call::Suspend(fixture_id.to_string()));
		Ok(())
	}

	fn unsuspend(&self, fixture: &Fixture) -> Result<(), PluginError> {
		self.calls.lock().unwrap().push(Call::Unsuspend(fixture.clone()));
		Ok(())
	}
}

/// Listener wiring against mock collaborators
pub struct Harness {
	pub plugin: Arc<RecordingPlugin>,
	pub persistence: Arc<MemoryPersistence>,
	pub store: Arc<FixtureStateStore>,
	pub ctx: ListenerContext,
	pub events: mpsc::UnboundedReceiver<ListenerEvent>,
}

impl Harness {
	pub fn new(settings: Settings) -> Self {
		let plugin = RecordingPlugin::new();
		let persistence = Arc::new(MemoryPersistence::new());
		let store = Arc::new(FixtureStateStore::new(persistence.clone()));
		let (events_tx, events) = mpsc::unbounded_channel();
		let ctx = ListenerContext::new(
			plugin.clone(),
			store.clone(),
			Arc::new(settings),
			events_tx,
		);
		Self {
			plugin,
			persistence,
			store,
			ctx,
			events,
		}
	}

	pub async fn spawn(&self, resource: &Arc<MockResource>) -> ListenerHandle {
		FixtureListener::spawn(resource.as_resource(), self.ctx.clone())
			.await
			.expect("listener should start")
	}

	pub async fn next_event(&mut self) -> ListenerEvent {
		tokio::time::timeout(Duration::from_secs(5), self.events.recv())
			.await
			.expect("timed out waiting for listener event")
			.expect("event channel closed")
	}
}

/// Poll `check` until it holds or a few seconds pass
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
	for _ in 0..500 {
		if check() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("timed out waiting for {}", what);
}

pub async fn wait_for_state(handle: &ListenerHandle, state: ListenerState) {
	let mut status = handle.subscribe();
	tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.state == state))
		.await
		.unwrap_or_else(|_| panic!("timed out waiting for state {:?}, now {:?}", state, handle.state()))
		.expect("listener status channel closed");
}

/// Let queued messages and spawned tasks run
pub async fn settle() {
	tokio::time::sleep(Duration::from_millis(50)).await;
}
