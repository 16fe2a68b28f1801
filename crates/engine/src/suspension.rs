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

//! Suspension strategies
//!
//! A [`SuspensionManager`] maps every [`SuspensionReason`] to a
//! [`SuspensionAction`]. The table is configurable per deployment and is
//! handed to each listener at construction.

use std::{collections::HashMap, fmt, sync::Arc};

use relay_sdk::{ConsumerPlugin, Fixture, Market, MatchStatus, PluginError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::rules::MarketStateCollection;

/// Why a fixture is being suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspensionReason {
	Suspension,
	FixtureDisposing,
	DisconnectEvent,
	FixtureDeleted,
	FixtureErrored,
	HealthCheckFailure,
}

impl fmt::Display for SuspensionReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SuspensionReason::Suspension => "SUSPENSION",
			SuspensionReason::FixtureDisposing => "FIXTURE_DISPOSING",
			SuspensionReason::DisconnectEvent => "DISCONNECT_EVENT",
			SuspensionReason::FixtureDeleted => "FIXTURE_DELETED",
			SuspensionReason::FixtureErrored => "FIXTURE_ERRORED",
			SuspensionReason::HealthCheckFailure => "HEALTH_CHECK_FAILURE",
		};
		f.write_str(name)
	}
}

/// What a suspension does to the fixture's markets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionAction {
	SuspendAllMarkets,
	/// Only markets traded in play; untagged markets count as in play
	SuspendInPlayMarkets,
	SuspendAllAndMarkDeleted,
	/// Fixture-level suspend call without market details
	SuspendFixture,
	DoNothing,
}

/// Error types for suspension calls
#[derive(Debug, Error)]
pub enum SuspensionError {
	#[error("Plugin failed during {reason} suspension: {source}")]
	Plugin {
		reason: SuspensionReason,
		#[source]
		source: PluginError,
	},
	#[error("Plugin failed during unsuspend: {0}")]
	Unsuspend(#[source] PluginError),
}

impl SuspensionError {
	pub fn plugin_error(&self) -> &PluginError {
		match self {
			SuspensionError::Plugin { source, .. } => source,
			SuspensionError::Unsuspend(source) => source,
		}
	}
}

/// Default reason to action table
pub fn default_strategies() -> HashMap<SuspensionReason, SuspensionAction> {
	use SuspensionAction::*;
	use SuspensionReason::*;

	HashMap::from([
		(Suspension, SuspendAllMarkets),
		(FixtureDisposing, SuspendInPlayMarkets),
		(DisconnectEvent, SuspendInPlayMarkets),
		(FixtureDeleted, SuspendAllAndMarkDeleted),
		(FixtureErrored, SuspendAllMarkets),
		(HealthCheckFailure, SuspendAllMarkets),
	])
}

/// Suspension Manager - applies suspension strategies on behalf of listeners
///
/// Market flags are updated before the consumer is notified: a plugin
/// failure is reported to the caller, but the suspension still counts as
/// applied to the internal market state.
pub struct SuspensionManager {
	plugin: Arc<dyn ConsumerPlugin>,
	strategies: HashMap<SuspensionReason, SuspensionAction>,
}

impl SuspensionManager {
	pub fn new(plugin: Arc<dyn ConsumerPlugin>) -> Self {
		Self {
			plugin,
			strategies: default_strategies(),
		}
	}

	pub fn with_strategy(mut self, reason: SuspensionReason, action: SuspensionAction) -> Self {
		self.strategies.insert(reason, action);
		self
	}

	pub fn action_for(&self, reason: SuspensionReason) -> SuspensionAction {
		self.strategies
			.get(&reason)
			.copied()
			.unwrap_or(SuspensionAction::SuspendAllMarkets)
	}

	/// Suspend `fixture_id` according to the strategy for `reason`
	///
	/// Returns the action that was applied.
	pub fn suspend(
		&self,
		fixture_id: &str,
		markets: &mut MarketStateCollection,
		reason: SuspensionReason,
	) -> Result<SuspensionAction, SuspensionError> {
		let action = self.action_for(reason);
		let wrap = |source| SuspensionError::Plugin { reason, source };

		match action {
			SuspensionAction::DoNothing => {
				debug!(
					target: "suspension",
					fixture_id = fixture_id,
					reason = %reason,
					"Suspension strategy is a no-op"
				);
				return Ok(action);
			}
			SuspensionAction::SuspendFixture => {
				self.plugin.suspend(fixture_id).map_err(wrap)?;
			}
			SuspensionAction::SuspendAllMarkets
			| SuspensionAction::SuspendInPlayMarkets
			| SuspensionAction::SuspendAllAndMarkDeleted => {
				let in_play_only = action == SuspensionAction::SuspendInPlayMarkets;
				let suspended = Self::suspend_markets(markets, in_play_only);

				if markets.is_empty() {
					// Nothing known yet, fall back to the fixture-level call
					self.plugin.suspend(fixture_id).map_err(wrap)?;
				} else {
					let mut fixture = Fixture::new(fixture_id);
					fixture.markets = suspended;
					if action == SuspensionAction::SuspendAllAndMarkDeleted {
						fixture.match_status = Some(MatchStatus::Deleted);
					}
					self.plugin
						.process_stream_update(&fixture, false)
						.map_err(wrap)?;
				}
			}
		}

		info!(
			target: "suspension",
			fixture_id = fixture_id,
			reason = %reason,
			action = ?action,
			"Fixture suspended"
		);
		Ok(action)
	}

	fn suspend_markets(markets: &mut MarketStateCollection, in_play_only: bool) -> Vec<Market> {
		let mut suspended = Vec::new();
		for state in markets.iter_mut() {
			if state.is_closed() || (in_play_only && !state.traded_in_play) {
				continue;
			}
			state.is_forcibly_suspended = true;
			suspended.push(state.to_suspended_market());
		}
		suspended
	}

	/// Lift forced suspensions and notify the consumer
	pub fn unsuspend(
		&self,
		fixture_id: &str,
		markets: &mut MarketStateCollection,
	) -> Result<(), SuspensionError> {
		let mut fixture = Fixture::new(fixture_id);
		for state in markets.iter_mut() {
			if state.is_forcibly_suspended {
				state.is_forcibly_suspended = false;
				fixture.markets.push(state.to_market());
			}
		}

		let restored = fixture.markets.len();
		if let Err(e) = self.plugin.unsuspend(&fixture) {
			warn!(target: "suspension", fixture_id = fixture_id, error = %e, "Unsuspend failed");
			return Err(SuspensionError::Unsuspend(e));
		}

		info!(
			target: "suspension",
			fixture_id = fixture_id,
			markets = restored,
			"Fixture unsuspended"
		);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use relay_sdk::{Acceptance, Selection, SelectionStatus, TAG_TRADED_IN_PLAY};
	use serde_json::Value;

	use super::*;

	#[derive(Default)]
	struct Recorder {
		updates: Mutex<Vec<Fixture>>,
		suspends: Mutex<Vec<String>>,
		unsuspends: Mutex<Vec<Fixture>>,
		fail: bool,
	}

	impl ConsumerPlugin for Recorder {
		fn process_snapshot(&self, _: &Fixture, _: bool) -> Result<Acceptance, PluginError> {
			Ok(Acceptance::Accepted)
		}

		fn process_stream_update(&self, fixture: &Fixture, _: bool) -> Result<Acceptance, PluginError> {
			if self.fail {
				return Err(PluginError::failed(&fixture.id, "boom"));
			}
			self.updates.lock().unwrap().push(fixture.clone());
			Ok(Acceptance::Accepted)
		}

		fn process_match_status(&self, _: &Fixture) -> Result<(), PluginError> {
			Ok(())
		}

		fn process_fixture_deletion(&self, _: &Fixture) -> Result<(), PluginError> {
			Ok(())
		}

		fn suspend(&self, fixture_id: &str) -> Result<(), PluginError> {
			self.suspends.lock().unwrap().push(fixture_id.to_string());
			Ok(())
		}

		fn unsuspend(&self, fixture: &Fixture) -> Result<(), PluginError> {
			self.unsuspends.lock().unwrap().push(fixture.clone());
			Ok(())
		}
	}

	fn markets() -> MarketStateCollection {
		let mut markets = MarketStateCollection::new();
		let selection = Selection::new("s1", SelectionStatus::Active).with_tradable(true);
		markets.absorb(&Market::new("in_play").with_selection(selection.clone()), true);
		markets.absorb(
			&Market::new("prematch")
				.with_tag(TAG_TRADED_IN_PLAY, Value::Bool(false))
				.with_selection(selection),
			true,
		);
		markets.absorb(
			&Market::new("settled")
				.with_selection(Selection::new("s1", SelectionStatus::Settled).with_price(1.0)),
			true,
		);
		markets
	}

	#[test]
	fn test_suspend_all_skips_resulted_markets() {
		let plugin = Arc::new(Recorder::default());
		let manager = SuspensionManager::new(plugin.clone());
		let mut markets = markets();

		let action = manager
			.suspend("fx-1", &mut markets, SuspensionReason::Suspension)
			.unwrap();
		assert_eq!(action, SuspensionAction::SuspendAllMarkets);

		let updates = plugin.updates.lock().unwrap();
		let ids: Vec<&str> = updates[0].markets.iter().map(|m| m.id.as_str()).collect();
		assert_eq!(ids, vec!["in_play", "prematch"]);
		assert!(updates[0].markets.iter().all(Market::is_suspended));
		assert!(markets.get("in_play").unwrap().is_forcibly_suspended);
		assert!(!markets.get("settled").unwrap().is_forcibly_suspended);
	}

	#[test]
	fn test_disconnect_suspends_in_play_only() {
		let plugin = Arc::new(Recorder::default());
		let manager = SuspensionManager::new(plugin.clone());
		let mut markets = markets();

		manager
			.suspend("fx-1", &mut markets, SuspensionReason::DisconnectEvent)
			.unwrap();

		let updates = plugin.updates.lock().unwrap();
		let ids: Vec<&str> = updates[0].markets.iter().map(|m| m.id.as_str()).collect();
		assert_eq!(ids, vec!["in_play"]);
	}

	#[test]
	fn test_deleted_marks_fixture_status() {
		let plugin = Arc::new(Recorder::default());
		let manager = SuspensionManager::new(plugin.clone());
		let mut markets = markets();

		manager
			.suspend("fx-1", &mut markets, SuspensionReason::FixtureDeleted)
			.unwrap();
		let updates = plugin.updates.lock().unwrap();
		assert_eq!(updates[0].match_status, Some(MatchStatus::Deleted));
	}

	#[test]
	fn test_no_markets_falls_back_to_fixture_suspend() {
		let plugin = Arc::new(Recorder::default());
		let manager = SuspensionManager::new(plugin.clone());
		let mut markets = MarketStateCollection::new();

		manager
			.suspend("fx-1", &mut markets, SuspensionReason::FixtureErrored)
			.unwrap();
		assert_eq!(plugin.suspends.lock().unwrap().as_slice(), ["fx-1".to_string()]);
		assert!(plugin.updates.lock().unwrap().is_empty());
	}

	#[test]
	fn test_plugin_failure_is_wrapped_and_state_still_applied() {
		let plugin = Arc::new(Recorder {
			fail: true,
			..Default::default()
		});
		let manager = SuspensionManager::new(plugin);
		let mut markets = markets();

		let err = manager
			.suspend("fx-1", &mut markets, SuspensionReason::HealthCheckFailure)
			.unwrap_err();
		assert!(matches!(
			err,
			SuspensionError::Plugin {
				reason: SuspensionReason::HealthCheckFailure,
				..
			}
		));
		assert!(markets.get("in_play").unwrap().is_forcibly_suspended);
	}

	#[test]
	fn test_unsuspend_restores_forced_markets() {
		let plugin = Arc::new(Recorder::default());
		let manager = SuspensionManager::new(plugin.clone());
		let mut markets = markets();

		manager
			.suspend("fx-1", &mut markets, SuspensionReason::DisconnectEvent)
			.unwrap();
		manager.unsuspend("fx-1", &mut markets).unwrap();

		let unsuspends = plugin.unsuspends.lock().unwrap();
		assert_eq!(unsuspends[0].markets.len(), 1);
		assert!(unsuspends[0].markets[0].selections[0].is_tradable());
		assert!(markets.iter().all(|m| !m.is_forcibly_suspended));
	}

	#[test]
	fn test_custom_strategy() {
		let plugin = Arc::new(Recorder::default());
		let manager = SuspensionManager::new(plugin.clone())
			.with_strategy(SuspensionReason::DisconnectEvent, SuspensionAction::DoNothing);
		let mut markets = markets();

		manager
			.suspend("fx-1", &mut markets, SuspensionReason::DisconnectEvent)
			.unwrap();
		assert!(plugin.updates.lock().unwrap().is_empty());
		assert!(plugin.suspends.lock().unwrap().is_empty());
	}
}
