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

pub mod flusher;
mod persistence;

use std::{
	collections::{BTreeMap, HashSet},
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
};

use dashmap::DashMap;
use relay_sdk::MatchStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use flusher::StateFlusher;
pub use persistence::{FilePersistence, MemoryPersistence, StatePersistence};

/// Error types for the fixture state store
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("State file I/O failed: {0}")]
	Io(#[from] std::io::Error),
	#[error("State serialization failed: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Durable checkpoint of one fixture
///
/// `ignored` is the sentinel written when the consumer refuses the fixture;
/// the supervisor never rebuilds a listener for an ignored fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FixtureState {
	pub id: String,
	pub sport: String,
	pub sequence: i64,
	pub epoch: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub match_status: Option<MatchStatus>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub ignored: bool,
}

impl FixtureState {
	pub fn new(id: impl Into<String>, sport: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			sport: sport.into(),
			sequence: -1,
			epoch: -1,
			match_status: None,
			ignored: false,
		}
	}
}

/// Checkpoint values recorded after a processed update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
	pub sequence: i64,
	pub epoch: i64,
	pub match_status: Option<MatchStatus>,
}

/// Fixture State Store - per-fixture checkpoints shared by every listener
///
/// The in-memory map is the source of truth while the engine runs. It is
/// written to the persistence layer by [`flush`](Self::flush), normally
/// driven by a [`StateFlusher`], and read back once at startup by
/// [`load`](Self::load).
///
/// Callers never coordinate among themselves: every operation is safe to
/// call concurrently from any listener task.
pub struct FixtureStateStore {
	states: DashMap<String, FixtureState>,
	persistence: Arc<dyn StatePersistence>,
	dirty: AtomicBool,
}

impl FixtureStateStore {
	pub fn new(persistence: Arc<dyn StatePersistence>) -> Self {
		Self {
			states: DashMap::new(),
			persistence,
			dirty: AtomicBool::new(false),
		}
	}

	/// In-memory store with no durable backing, for tests and embedding
	pub fn in_memory() -> Self {
		Self::new(Arc::new(MemoryPersistence::new()))
	}

	/// Load checkpoints from persistence, replacing the in-memory map
	///
	/// A corrupt state file is deleted and the store starts empty, so a bad
	/// file never blocks startup. Returns the number of loaded checkpoints.
	pub fn load(&self) -> Result<usize, StoreError> {
		let Some(raw) = self.persistence.read()? else {
			info!(target: "state_store", "No fixture state found, starting empty");
			return Ok(0);
		};

		let parsed: BTreeMap<String, FixtureState> = match serde_json::from_str(&raw) {
			Ok(parsed) => parsed,
			Err(e) => {
				warn!(
					target: "state_store",
					error = %e,
					"Fixture state is corrupt, deleting it and starting empty"
				);
				self.persistence.delete()?;
				self.states.clear();
				return Ok(0);
			}
		};

		self.states.clear();
		let count = parsed.len();
		for (id, state) in parsed {
			self.states.insert(id, state);
		}
		self.dirty.store(false, Ordering::Release);

		info!(target: "state_store", count = count, "Fixture state loaded");
		Ok(count)
	}

	pub fn get(&self, fixture_id: &str) -> Option<FixtureState> {
		self.states.get(fixture_id).map(|entry| entry.value().clone())
	}

	pub fn contains(&self, fixture_id: &str) -> bool {
		self.states.contains_key(fixture_id)
	}

	pub fn is_ignored(&self, fixture_id: &str) -> bool {
		self.states
			.get(fixture_id)
			.is_some_and(|entry| entry.ignored)
	}

	/// Record a processed update
	///
	/// The entry is created the first time a fixture is seen, taking the
	/// checkpoint's epoch. Afterwards the stored epoch only advances when
	/// `is_snapshot` is set; deltas move the sequence and status only.
	pub fn update(&self, fixture_id: &str, sport: &str, checkpoint: Checkpoint, is_snapshot: bool) {
		let mut entry = self
			.states
			.entry(fixture_id.to_string())
			.or_insert_with(|| {
				let mut state = FixtureState::new(fixture_id, sport);
				state.epoch = checkpoint.epoch;
				state
			});

		let state = entry.value_mut();
		state.sequence = checkpoint.sequence;
		if is_snapshot {
			state.epoch = checkpoint.epoch;
		}
		if checkpoint.match_status.is_some() {
			state.match_status = checkpoint.match_status;
		}
		drop(entry);

		self.dirty.store(true, Ordering::Release);
		debug!(
			target: "state_store",
			fixture_id = fixture_id,
			sequence = checkpoint.sequence,
			epoch = checkpoint.epoch,
			is_snapshot = is_snapshot,
			"Checkpoint updated"
		);
	}

	/// Reset the stored sequence so the next build always fetches a snapshot
	pub fn reset_sequence(&self, fixture_id: &str) {
		if let Some(mut entry) = self.states.get_mut(fixture_id) {
			entry.sequence = -1;
			self.dirty.store(true, Ordering::Release);
		}
	}

	/// Persist the FixtureIgnored sentinel
	pub fn mark_ignored(&self, fixture_id: &str, sport: &str) {
		self.states
			.entry(fixture_id.to_string())
			.or_insert_with(|| FixtureState::new(fixture_id, sport))
			.ignored = true;
		self.dirty.store(true, Ordering::Release);
		info!(target: "state_store", fixture_id = fixture_id, "Fixture marked as ignored");
	}

	pub fn remove(&self, fixture_id: &str) -> Option<FixtureState> {
		let removed = self.states.remove(fixture_id).map(|(_, state)| state);
		if removed.is_some() {
			self.dirty.store(true, Ordering::Release);
			debug!(target: "state_store", fixture_id = fixture_id, "Checkpoint removed");
		}
		removed
	}

	/// Checkpoints of `sport` whose fixture is not in `present`
	pub fn absent_from(&self, sport: &str, present: &HashSet<String>) -> Vec<String> {
		self.states
			.iter()
			.filter(|entry| entry.sport == sport && !present.contains(entry.key()))
			.map(|entry| entry.key().clone())
			.collect()
	}

	/// Remove every listed checkpoint, returning how many existed
	pub fn purge(&self, fixture_ids: &[String]) -> usize {
		let removed = fixture_ids
			.iter()
			.filter(|id| self.states.remove(id.as_str()).is_some())
			.count();
		if removed > 0 {
			self.dirty.store(true, Ordering::Release);
			info!(target: "state_store", count = removed, "Inactive checkpoints purged");
		}
		removed
	}

	pub fn len(&self) -> usize {
		self.states.len()
	}

	pub fn is_empty(&self) -> bool {
		self.states.is_empty()
	}

	pub fn is_dirty(&self) -> bool {
		self.dirty.load(Ordering::Acquire)
	}

	/// Serialize the map deterministically (sorted by fixture id)
	pub fn serialize(&self) -> Result<String, StoreError> {
		let ordered: BTreeMap<String, FixtureState> = self
			.states
			.iter()
			.map(|entry| (entry.key().clone(), entry.value().clone()))
			.collect();
		Ok(serde_json::to_string(&ordered)?)
	}

	/// Write the current map to persistence
	pub fn flush(&self) -> Result<(), StoreError> {
		self.dirty.store(false, Ordering::Release);
		let payload = self.serialize()?;
		if let Err(e) = self.persistence.write(&payload) {
			self.dirty.store(true, Ordering::Release);
			return Err(e);
		}
		debug!(target: "state_store", count = self.states.len(), "Fixture state flushed");
		Ok(())
	}

	/// Flush only when something changed since the last flush
	pub fn flush_if_dirty(&self) -> Result<bool, StoreError> {
		if !self.is_dirty() {
			return Ok(false);
		}
		self.flush()?;
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn checkpoint(sequence: i64, epoch: i64) -> Checkpoint {
		Checkpoint {
			sequence,
			epoch,
			match_status: Some(MatchStatus::InRunning),
		}
	}

	#[test]
	fn test_update_creates_then_advances_epoch_on_snapshot_only() {
		let store = FixtureStateStore::in_memory();
		store.update("fx-1", "football", checkpoint(5, 2), false);

		let state = store.get("fx-1").unwrap();
		assert_eq!(state.sequence, 5);
		assert_eq!(state.epoch, 2);
		assert_eq!(state.sport, "football");

		store.update("fx-1", "football", checkpoint(6, 3), false);
		let state = store.get("fx-1").unwrap();
		assert_eq!(state.sequence, 6);
		assert_eq!(state.epoch, 2);

		store.update("fx-1", "football", checkpoint(9, 3), true);
		let state = store.get("fx-1").unwrap();
		assert_eq!(state.sequence, 9);
		assert_eq!(state.epoch, 3);
	}

	#[test]
	fn test_flush_and_load_roundtrip() {
		let persistence = Arc::new(MemoryPersistence::new());
		let store = FixtureStateStore::new(persistence.clone());
		store.update("fx-1", "football", checkpoint(5, 2), true);
		store.mark_ignored("fx-2", "tennis");
		assert!(store.is_dirty());

		assert!(store.flush_if_dirty().unwrap());
		assert!(!store.is_dirty());
		assert!(!store.flush_if_dirty().unwrap());

		let reloaded = FixtureStateStore::new(persistence);
		assert_eq!(reloaded.load().unwrap(), 2);
		assert_eq!(reloaded.get("fx-1").unwrap().sequence, 5);
		assert!(reloaded.is_ignored("fx-2"));
		assert!(!reloaded.is_ignored("fx-1"));
	}

	#[test]
	fn test_corrupt_state_is_deleted() {
		let persistence = Arc::new(MemoryPersistence::with_contents("{not json"));
		let store = FixtureStateStore::new(persistence.clone());

		assert_eq!(store.load().unwrap(), 0);
		assert!(store.is_empty());
		assert!(persistence.contents().is_none());
	}

	#[test]
	fn test_missing_state_starts_empty() {
		let store = FixtureStateStore::in_memory();
		assert_eq!(store.load().unwrap(), 0);
	}

	#[test]
	fn test_absent_and_purge() {
		let store = FixtureStateStore::in_memory();
		store.update("fx-1", "football", checkpoint(1, 1), true);
		store.update("fx-2", "football", checkpoint(1, 1), true);
		store.update("fx-3", "tennis", checkpoint(1, 1), true);

		let present: HashSet<String> = ["fx-1".to_string()].into_iter().collect();
		let absent = store.absent_from("football", &present);
		assert_eq!(absent, vec!["fx-2".to_string()]);

		assert_eq!(store.purge(&absent), 1);
		assert!(store.get("fx-2").is_none());
		assert!(store.get("fx-3").is_some());
	}

	#[test]
	fn test_reset_sequence_and_remove() {
		let store = FixtureStateStore::in_memory();
		store.update("fx-1", "football", checkpoint(12, 4), true);
		store.reset_sequence("fx-1");
		assert_eq!(store.get("fx-1").unwrap().sequence, -1);

		assert!(store.remove("fx-1").is_some());
		assert!(store.remove("fx-1").is_none());
	}

	#[test]
	fn test_serialized_state_is_sorted() {
		let store = FixtureStateStore::in_memory();
		store.update("b", "football", checkpoint(1, 1), true);
		store.update("a", "football", checkpoint(1, 1), true);

		let json = store.serialize().unwrap();
		let a = json.find("\"a\"").unwrap();
		let b = json.find("\"b\"").unwrap();
		assert!(a < b);
		assert!(json.contains("\"MatchStatus\":\"40\""));
	}
}
