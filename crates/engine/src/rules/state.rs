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

use std::collections::{BTreeMap, btree_map};

use relay_sdk::{Market, Selection, SelectionStatus, TAG_NAME, selections_resulted, traded_in_play};
use serde_json::Value;

/// Last known view of one market, carried across updates
///
/// Besides the merged payload content it keeps the history the rules need:
/// whether the market was ever active, whether it was ever forwarded, and
/// which forced transitions (suspension, deletion, auto-void) were applied.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketState {
	pub id: String,
	pub name: Option<String>,
	pub tags: BTreeMap<String, Value>,
	pub selections: Vec<Selection>,
	pub is_active: bool,
	pub is_pending: bool,
	pub is_suspended: bool,
	pub is_resulted: bool,
	pub is_voided: bool,
	pub traded_in_play: bool,
	pub has_been_active: bool,
	pub has_been_forwarded: bool,
	pub is_forcibly_suspended: bool,
	pub is_deleted: bool,
	pub is_auto_voided: bool,
	pub(crate) last_forwarded: Option<Market>,
}

impl MarketState {
	pub fn from_market(market: &Market) -> Self {
		let mut state = Self {
			id: market.id.clone(),
			..Default::default()
		};
		state.replace(market);
		state
	}

	/// Take the market as the complete new content (snapshot semantics)
	pub fn replace(&mut self, market: &Market) {
		self.tags = market.tags.clone();
		self.selections = market.selections.clone();
		self.is_deleted = false;
		self.is_forcibly_suspended = false;
		self.refresh();
	}

	/// Fold a partial market into the known content (delta semantics)
	///
	/// Tags present in the delta overwrite known ones; selections are
	/// matched by id and replaced, unknown selections are appended.
	pub fn merge(&mut self, market: &Market) {
		for (key, value) in &market.tags {
			self.tags.insert(key.clone(), value.clone());
		}

		for selection in &market.selections {
			match self.selections.iter_mut().find(|s| s.id == selection.id) {
				Some(known) => *known = selection.clone(),
				None => self.selections.push(selection.clone()),
			}
		}

		self.is_deleted = false;
		self.refresh();
	}

	fn refresh(&mut self) {
		self.name = self
			.tags
			.get(TAG_NAME)
			.and_then(Value::as_str)
			.map(str::to_string);
		self.traded_in_play = traded_in_play(&self.tags);

		let any_selection = !self.selections.is_empty();
		self.is_active = self
			.selections
			.iter()
			.any(|s| s.status == SelectionStatus::Active);
		self.is_pending = any_selection
			&& self
				.selections
				.iter()
				.all(|s| s.status == SelectionStatus::Pending);
		self.is_suspended = self.is_active && !self.selections.iter().any(Selection::is_tradable);
		self.is_resulted = selections_resulted(self.selections.iter().map(|s| (s.status, s.price)));
		self.is_voided = any_selection
			&& self
				.selections
				.iter()
				.all(|s| s.status == SelectionStatus::Void);
		self.has_been_active |= self.is_active;
	}

	pub fn to_market(&self) -> Market {
		Market {
			id: self.id.clone(),
			tags: self.tags.clone(),
			selections: self.selections.clone(),
		}
	}

	/// The market with every selection made non-tradable
	pub fn to_suspended_market(&self) -> Market {
		let mut market = self.to_market();
		for selection in &mut market.selections {
			selection.tradable = Some(false);
		}
		market
	}

	/// The market with every selection voided
	pub fn to_voided_market(&self) -> Market {
		let mut market = self.to_market();
		for selection in &mut market.selections {
			selection.status = SelectionStatus::Void;
			selection.tradable = Some(false);
		}
		market
	}

	/// Settled state that must never be overwritten by a forced transition
	pub fn is_closed(&self) -> bool {
		self.is_resulted || self.is_voided || self.is_deleted
	}
}

/// Working memory of the rule pipeline for one fixture
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketStateCollection {
	markets: BTreeMap<String, MarketState>,
}

impl MarketStateCollection {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, market_id: &str) -> Option<&MarketState> {
		self.markets.get(market_id)
	}

	pub fn get_mut(&mut self, market_id: &str) -> Option<&mut MarketState> {
		self.markets.get_mut(market_id)
	}

	pub fn insert(&mut self, state: MarketState) {
		self.markets.insert(state.id.clone(), state);
	}

	/// Absorb a payload market, replacing or merging its known state
	pub fn absorb(&mut self, market: &Market, replace: bool) {
		match self.markets.get_mut(&market.id) {
			Some(state) if replace => state.replace(market),
			Some(state) => state.merge(market),
			None => self.insert(MarketState::from_market(market)),
		}
	}

	pub fn contains(&self, market_id: &str) -> bool {
		self.markets.contains_key(market_id)
	}

	pub fn iter(&self) -> btree_map::Values<'_, String, MarketState> {
		self.markets.values()
	}

	pub fn iter_mut(&mut self) -> btree_map::ValuesMut<'_, String, MarketState> {
		self.markets.values_mut()
	}

	pub fn len(&self) -> usize {
		self.markets.len()
	}

	pub fn is_empty(&self) -> bool {
		self.markets.is_empty()
	}

	pub fn clear(&mut self) {
		self.markets.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn market(id: &str, status: SelectionStatus) -> Market {
		Market::new(id)
			.with_name("Winner")
			.with_selection(Selection::new("s1", status).with_tradable(true))
			.with_selection(Selection::new("s2", status).with_tradable(true))
	}

	#[test]
	fn test_merge_partial_selection_update() {
		let mut state = MarketState::from_market(&market("m1", SelectionStatus::Active));
		assert!(state.is_active);
		assert!(state.has_been_active);

		let delta = Market::new("m1").with_selection(Selection::new("s1", SelectionStatus::Pending));
		state.merge(&delta);
		assert_eq!(state.selections.len(), 2);
		assert!(state.is_active);

		let delta = Market::new("m1").with_selection(Selection::new("s2", SelectionStatus::Pending));
		state.merge(&delta);
		assert!(!state.is_active);
		assert!(state.is_pending);
		assert!(state.has_been_active);
		assert_eq!(state.name.as_deref(), Some("Winner"));
	}

	#[test]
	fn test_forced_views() {
		let state = MarketState::from_market(&market("m1", SelectionStatus::Active));

		let suspended = state.to_suspended_market();
		assert!(suspended.selections.iter().all(|s| !s.is_tradable()));
		assert!(suspended.is_suspended());

		let voided = state.to_voided_market();
		assert!(voided.is_voided());
	}

	#[test]
	fn test_absorb_replace_drops_unknown_selections() {
		let mut markets = MarketStateCollection::new();
		markets.absorb(&market("m1", SelectionStatus::Active), true);

		let snapshot = Market::new("m1").with_selection(Selection::new("s3", SelectionStatus::Pending));
		markets.absorb(&snapshot, true);
		let state = markets.get("m1").unwrap();
		assert_eq!(state.selections.len(), 1);
		assert!(state.name.is_none());
		assert!(state.has_been_active);
	}
}
