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

use thiserror::Error;

use crate::types::Fixture;

/// Error raised by a consumer plugin callback
#[derive(Debug, Clone, Error)]
pub enum PluginError {
	#[error("Plugin failed processing fixture {fixture_id}: {message}")]
	Failed { fixture_id: String, message: String },
	#[error("Plugin unavailable: {0}")]
	Unavailable(String),
}

impl PluginError {
	pub fn failed(fixture_id: impl Into<String>, message: impl Into<String>) -> Self {
		PluginError::Failed {
			fixture_id: fixture_id.into(),
			message: message.into(),
		}
	}
}

/// How the consumer disposed of a forwarded fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
	Accepted,
	/// The consumer does not want this fixture; the engine stops tracking it
	Ignored,
}

/// Downstream consumer of the reconciled feed
///
/// Implementations must tolerate a full snapshot being replayed after a
/// restart: delivery is at-least-once.
pub trait ConsumerPlugin: Send + Sync {
	fn process_snapshot(&self, fixture: &Fixture, epoch_changed: bool)
	-> Result<Acceptance, PluginError>;

	fn process_stream_update(
		&self,
		fixture: &Fixture,
		epoch_changed: bool,
	) -> Result<Acceptance, PluginError>;

	fn process_match_status(&self, fixture: &Fixture) -> Result<(), PluginError>;

	fn process_fixture_deletion(&self, fixture: &Fixture) -> Result<(), PluginError>;

	fn suspend(&self, fixture_id: &str) -> Result<(), PluginError>;

	fn unsuspend(&self, fixture: &Fixture) -> Result<(), PluginError>;
}
