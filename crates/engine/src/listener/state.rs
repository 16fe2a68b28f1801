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

use std::fmt;

use relay_sdk::MatchStatus;

use super::message::Outcome;

/// Lifecycle state of a fixture listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListenerState {
	#[default]
	NotStarted,
	/// Fixture not yet eligible to stream; registered downstream by snapshot
	FixtureSetup,
	Connecting,
	Streaming,
	/// Transient; the feed transport reconnects on its own
	Disconnected,
	/// Transient; recovers through a snapshot
	Errored,
	/// Match over processed, updates still accepted until the stop delay ends
	MatchOverDelay,
	Ended,
	Deleted,
	Stopped,
}

impl ListenerState {
	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			ListenerState::Ended | ListenerState::Deleted | ListenerState::Stopped
		)
	}
}

impl fmt::Display for ListenerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Point-in-time view of a listener, published on every transition
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListenerStatus {
	pub state: ListenerState,
	pub sequence: i64,
	pub epoch: i64,
	pub match_status: Option<MatchStatus>,
	pub errored: bool,
	/// Finished or disposed; no further processing will happen
	pub closed: bool,
	pub last_outcome: Option<Outcome>,
}
