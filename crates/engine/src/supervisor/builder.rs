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

use std::{
	collections::{HashSet, VecDeque},
	sync::Arc,
};

use relay_sdk::FeedResource;
use tracing::debug;

/// Whether the builder accepts new creation requests right away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
	Active,
	Busy,
}

/// Admission control for listener builds
///
/// At most `concurrency` builds are in flight. Requests beyond that are
/// deferred in arrival order and released as builds complete or fail. A
/// request for a fixture that is already building or deferred is dropped;
/// a deferred request is refreshed in place with the newer resource.
pub struct ListenerBuilder {
	concurrency: usize,
	in_flight: HashSet<String>,
	deferred: VecDeque<Arc<dyn FeedResource>>,
}

impl ListenerBuilder {
	pub fn new(concurrency: usize) -> Self {
		Self {
			concurrency: concurrency.max(1),
			in_flight: HashSet::new(),
			deferred: VecDeque::new(),
		}
	}

	pub fn state(&self) -> BuilderState {
		if self.in_flight.len() >= self.concurrency {
			BuilderState::Busy
		} else {
			BuilderState::Active
		}
	}

	pub fn in_flight(&self) -> usize {
		self.in_flight.len()
	}

	pub fn deferred(&self) -> usize {
		self.deferred.len()
	}

	pub fn is_pending(&self, fixture_id: &str) -> bool {
		self.in_flight.contains(fixture_id) || self.deferred.iter().any(|r| r.id() == fixture_id)
	}

	/// Submit a build request
	///
	/// Returns the resource when the build may start now; `None` when it
	/// was deferred or is a duplicate.
	pub fn submit(&mut self, resource: Arc<dyn FeedResource>) -> Option<Arc<dyn FeedResource>> {
		let fixture_id = resource.id();
		if self.in_flight.contains(fixture_id) {
			debug!(target: "supervisor", fixture_id = fixture_id, "Build already in flight");
			return None;
		}

		if let Some(slot) = self.deferred.iter_mut().find(|r| r.id() == fixture_id) {
			*slot = resource;
			return None;
		}

		if self.state() == BuilderState::Busy {
			debug!(
				target: "supervisor",
				fixture_id = fixture_id,
				in_flight = self.in_flight.len(),
				"Builder busy, deferring build"
			);
			self.deferred.push_back(resource);
			return None;
		}

		self.in_flight.insert(fixture_id.to_string());
		Some(resource)
	}

	/// Record a finished build (success or failure) and release deferred
	/// requests that now fit, in arrival order.
	pub fn complete(&mut self, fixture_id: &str) -> Vec<Arc<dyn FeedResource>> {
		self.in_flight.remove(fixture_id);

		let mut released = Vec::new();
		while self.state() == BuilderState::Active {
			let Some(resource) = self.deferred.pop_front() else {
				break;
			};
			self.in_flight.insert(resource.id().to_string());
			released.push(resource);
		}
		released
	}

	/// Forget deferred requests of `sport` whose fixture is no longer listed
	pub fn cancel_absent(&mut self, sport: &str, present: &HashSet<String>) -> usize {
		let before = self.deferred.len();
		self.deferred
			.retain(|r| r.sport() != sport || present.contains(r.id()));
		before - self.deferred.len()
	}
}
