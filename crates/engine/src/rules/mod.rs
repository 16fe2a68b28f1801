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

//! Market rule pipeline
//!
//! Every snapshot and delta passes through an ordered list of
//! [`MarketRule`]s before it is forwarded. Rules read and mutate a staged
//! copy of the fixture's [`MarketStateCollection`]; the listener promotes it
//! with [`RulePipeline::commit_changes`] once the consumer accepted the
//! payload, or discards it with [`RulePipeline::rollback_changes`].

mod deleted;
mod delta;
mod inactive;
mod state;
mod void_unsettled;

use std::collections::HashSet;

use relay_sdk::Fixture;
use tracing::debug;

pub use deleted::DeletedMarketsRule;
pub use delta::DeltaRule;
pub use inactive::InactiveMarketsRule;
pub use state::{MarketState, MarketStateCollection};
pub use void_unsettled::VoidUnsettledMarketsRule;

/// Kind of payload running through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
	Snapshot,
	Delta,
}

/// Everything a rule sees during one pass
pub struct RuleContext<'a> {
	/// Outgoing payload; rules remove or append markets here
	pub fixture: &'a mut Fixture,
	pub pass: PassKind,
	/// Market states before this payload was absorbed
	pub previous: &'a MarketStateCollection,
	/// Staged market states, already merged with this payload
	pub current: &'a mut MarketStateCollection,
	/// Ids of markets the feed currently carries
	pub upstream_ids: &'a HashSet<String>,
}

impl RuleContext<'_> {
	pub fn in_payload(&self, market_id: &str) -> bool {
		self.fixture.markets.iter().any(|m| m.id == market_id)
	}
}

pub trait MarketRule: Send + Sync {
	fn name(&self) -> &'static str;

	fn apply(&self, ctx: &mut RuleContext<'_>);
}

/// Ordered rule set plus the committed and staged market states
pub struct RulePipeline {
	rules: Vec<Box<dyn MarketRule>>,
	committed: MarketStateCollection,
	staged: Option<MarketStateCollection>,
}

impl RulePipeline {
	pub fn new(rules: Vec<Box<dyn MarketRule>>) -> Self {
		Self {
			rules,
			committed: MarketStateCollection::new(),
			staged: None,
		}
	}

	/// Built-in rules in their canonical order
	pub fn with_default_rules(enable_delta_rule: bool) -> Self {
		let mut rules: Vec<Box<dyn MarketRule>> = vec![Box::new(InactiveMarketsRule)];
		if enable_delta_rule {
			rules.push(Box::new(DeltaRule));
		}
		rules.push(Box::new(VoidUnsettledMarketsRule));
		rules.push(Box::new(DeletedMarketsRule));
		Self::new(rules)
	}

	pub fn rule_names(&self) -> Vec<&'static str> {
		self.rules.iter().map(|r| r.name()).collect()
	}

	/// Run every rule over `fixture`, staging the resulting market states
	///
	/// Stages on top of a pending uncommitted pass when there is one, so two
	/// passes applied back to back see each other's forced transitions.
	pub fn apply_rules(&mut self, fixture: &mut Fixture, pass: PassKind) {
		let previous = self
			.staged
			.take()
			.unwrap_or_else(|| self.committed.clone());
		let mut current = previous.clone();

		let replace = pass == PassKind::Snapshot;
		for market in &fixture.markets {
			current.absorb(market, replace);
		}

		let upstream_ids: HashSet<String> = match pass {
			PassKind::Snapshot => fixture.markets.iter().map(|m| m.id.clone()).collect(),
			PassKind::Delta => current.iter().map(|m| m.id.clone()).collect(),
		};

		let received = fixture.markets.len();
		{
			let mut ctx = RuleContext {
				fixture: &mut *fixture,
				pass,
				previous: &previous,
				current: &mut current,
				upstream_ids: &upstream_ids,
			};
			for rule in &self.rules {
				rule.apply(&mut ctx);
			}
		}

		for market in &fixture.markets {
			if let Some(state) = current.get_mut(&market.id) {
				state.has_been_forwarded = true;
				state.last_forwarded = Some(state.to_market());
			}
		}

		debug!(
			target: "rules",
			fixture_id = %fixture.id,
			pass = ?pass,
			received = received,
			forwarded = fixture.markets.len(),
			"Market rules applied"
		);

		self.staged = Some(current);
	}

	pub fn commit_changes(&mut self) {
		if let Some(staged) = self.staged.take() {
			self.committed = staged;
		}
	}

	pub fn rollback_changes(&mut self) {
		if self.staged.take().is_some() {
			debug!(target: "rules", "Staged market changes rolled back");
		}
	}

	pub fn has_staged_changes(&self) -> bool {
		self.staged.is_some()
	}

	pub fn markets(&self) -> &MarketStateCollection {
		&self.committed
	}

	pub fn markets_mut(&mut self) -> &mut MarketStateCollection {
		&mut self.committed
	}

	/// Stage a payload without running any rule
	///
	/// Used when rules are skipped, so the known market state still tracks
	/// what is forwarded. Committed or rolled back like a rule pass.
	pub fn stage_unfiltered(&mut self, fixture: &Fixture, pass: PassKind) {
		let mut current = self
			.staged
			.take()
			.unwrap_or_else(|| self.committed.clone());
		let replace = pass == PassKind::Snapshot;
		for market in &fixture.markets {
			current.absorb(market, replace);
			if let Some(state) = current.get_mut(&market.id) {
				state.has_been_forwarded = true;
				state.last_forwarded = Some(state.to_market());
			}
		}
		self.staged = Some(current);
	}
}

#[cfg(test)]
mod tests {
	use relay_sdk::{Market, MatchStatus, Selection, SelectionStatus};

	use super::*;

	fn active(id: &str) -> Market {
		Market::new(id)
			.with_name(format!("Market {}", id))
			.with_selection(Selection::new("s1", SelectionStatus::Active).with_tradable(true))
	}

	fn pending(id: &str) -> Market {
		Market::new(id)
			.with_name(format!("Market {}", id))
			.with_selection(Selection::new("s1", SelectionStatus::Pending))
	}

	fn resulted(id: &str) -> Market {
		Market::new(id)
			.with_name(format!("Market {}", id))
			.with_selection(Selection::new("s1", SelectionStatus::Settled).with_price(1.0))
			.with_selection(Selection::new("s2", SelectionStatus::Settled).with_price(0.0))
	}

	fn snapshot(markets: Vec<Market>) -> Fixture {
		let mut fixture = Fixture::new("fx-1");
		fixture.match_status = Some(MatchStatus::InRunning);
		fixture.markets = markets;
		fixture
	}

	fn ids(fixture: &Fixture) -> Vec<&str> {
		fixture.markets.iter().map(|m| m.id.as_str()).collect()
	}

	fn run(pipeline: &mut RulePipeline, mut fixture: Fixture, pass: PassKind) -> Fixture {
		pipeline.apply_rules(&mut fixture, pass);
		pipeline.commit_changes();
		fixture
	}

	#[test]
	fn test_default_rule_order() {
		let pipeline = RulePipeline::with_default_rules(true);
		assert_eq!(
			pipeline.rule_names(),
			vec!["inactive_markets", "delta", "void_unsettled_markets", "deleted_markets"]
		);
		let pipeline = RulePipeline::with_default_rules(false);
		assert_eq!(pipeline.rule_names().len(), 3);
	}

	#[test]
	fn test_inactive_market_round_trip() {
		let mut pipeline = RulePipeline::with_default_rules(false);

		// Pass N: m2 goes inactive and is removed from the payload
		let out = run(&mut pipeline, snapshot(vec![active("m1"), active("m2")]), PassKind::Snapshot);
		assert_eq!(ids(&out), vec!["m1", "m2"]);
		let mut closed = active("m2");
		closed.selections[0].status = SelectionStatus::Settled;
		closed.selections[0].price = Some(0.0);
		let out = run(&mut pipeline, snapshot(vec![active("m1"), closed.clone()]), PassKind::Snapshot);
		assert_eq!(ids(&out), vec!["m1", "m2"]);
		let out = run(&mut pipeline, snapshot(vec![active("m1"), closed.clone()]), PassKind::Snapshot);
		assert_eq!(ids(&out), vec!["m1"]);
		assert!(pipeline.markets().contains("m2"));

		// Pass N+1 unchanged: still absent
		let out = run(&mut pipeline, snapshot(vec![active("m1"), closed.clone()]), PassKind::Snapshot);
		assert_eq!(ids(&out), vec!["m1"]);

		// Name change: reappears
		let renamed = closed.clone().with_name("Renamed");
		let out = run(&mut pipeline, snapshot(vec![active("m1"), renamed]), PassKind::Snapshot);
		assert_eq!(ids(&out), vec!["m1", "m2"]);

		// Reactivation: reappears
		let out = run(&mut pipeline, snapshot(vec![active("m1"), active("m2")]), PassKind::Snapshot);
		assert_eq!(ids(&out), vec!["m1", "m2"]);
	}

	#[test]
	fn test_pending_after_activity_is_forwarded() {
		let mut pipeline = RulePipeline::with_default_rules(false);
		let out = run(&mut pipeline, snapshot(vec![pending("m1")]), PassKind::Snapshot);
		assert!(out.markets.is_empty());

		run(&mut pipeline, snapshot(vec![active("m1")]), PassKind::Snapshot);
		let out = run(&mut pipeline, snapshot(vec![pending("m1")]), PassKind::Snapshot);
		assert_eq!(ids(&out), vec!["m1"]);
	}

	#[test]
	fn test_auto_void_on_match_over() {
		let mut pipeline = RulePipeline::with_default_rules(false);
		run(
			&mut pipeline,
			snapshot(vec![active("m1"), pending("m2"), resulted("m3")]),
			PassKind::Snapshot,
		);

		let mut over = snapshot(vec![pending("m1"), pending("m2"), resulted("m3")]);
		over.match_status = Some(MatchStatus::MatchOver);
		let out = run(&mut pipeline, over.clone(), PassKind::Snapshot);

		// m1 was active before and stays forwarded; m2 was never forwarded
		// while active and is voided; m3 is resulted and never voided
		let m2 = out.market("m2").unwrap();
		assert!(m2.is_voided());
		assert!(out.market("m1").is_some_and(|m| !m.is_voided()));
		assert!(out.market("m3").is_none_or(|m| !m.is_voided()));
		assert!(pipeline.markets().get("m2").unwrap().is_auto_voided);

		// Voided exactly once
		let out = run(&mut pipeline, over, PassKind::Snapshot);
		assert!(out.markets.iter().all(|m| m.id != "m2"));
	}

	#[test]
	fn test_staged_auto_void_not_reprocessed() {
		let mut pipeline = RulePipeline::with_default_rules(false);
		run(&mut pipeline, snapshot(vec![pending("m2")]), PassKind::Snapshot);

		let mut over = snapshot(vec![pending("m2")]);
		over.match_status = Some(MatchStatus::MatchOver);

		let mut first = over.clone();
		pipeline.apply_rules(&mut first, PassKind::Snapshot);
		assert!(first.market("m2").is_some_and(Market::is_voided));

		// A second pass staged on top of the uncommitted one
		let mut second = over;
		pipeline.apply_rules(&mut second, PassKind::Snapshot);
		assert!(second.market("m2").is_none());
	}

	#[test]
	fn test_rollback_discards_staged_pass() {
		let mut pipeline = RulePipeline::with_default_rules(false);
		run(&mut pipeline, snapshot(vec![active("m1")]), PassKind::Snapshot);

		let mut next = snapshot(vec![active("m1"), active("m2")]);
		pipeline.apply_rules(&mut next, PassKind::Snapshot);
		assert!(pipeline.has_staged_changes());
		pipeline.rollback_changes();

		assert!(!pipeline.has_staged_changes());
		assert!(!pipeline.markets().contains("m2"));
	}

	#[test]
	fn test_deleted_market_resent_non_tradable_once() {
		let mut pipeline = RulePipeline::with_default_rules(false);
		run(&mut pipeline, snapshot(vec![active("m1"), active("m2")]), PassKind::Snapshot);

		let out = run(&mut pipeline, snapshot(vec![active("m1")]), PassKind::Snapshot);
		let m2 = out.market("m2").unwrap();
		assert!(m2.selections.iter().all(|s| !s.is_tradable()));
		assert!(pipeline.markets().get("m2").unwrap().is_deleted);

		let out = run(&mut pipeline, snapshot(vec![active("m1")]), PassKind::Snapshot);
		assert!(out.market("m2").is_none());

		// Reappearing upstream clears the deletion
		let out = run(&mut pipeline, snapshot(vec![active("m1"), active("m2")]), PassKind::Snapshot);
		assert!(out.market("m2").is_some_and(|m| m.selections[0].is_tradable()));
		assert!(!pipeline.markets().get("m2").unwrap().is_deleted);
	}

	#[test]
	fn test_delta_rule_drops_unchanged_markets() {
		let mut pipeline = RulePipeline::with_default_rules(true);
		run(&mut pipeline, snapshot(vec![active("m1"), active("m2")]), PassKind::Snapshot);

		let mut changed = active("m2");
		changed.selections[0].price = Some(2.5);
		let out = run(&mut pipeline, snapshot(vec![active("m1"), changed]), PassKind::Delta);
		assert_eq!(ids(&out), vec!["m2"]);
	}

	#[test]
	fn test_unfiltered_pass_tracks_forwarded_markets() {
		let mut pipeline = RulePipeline::with_default_rules(false);
		pipeline.stage_unfiltered(&snapshot(vec![pending("m1")]), PassKind::Snapshot);
		assert!(!pipeline.markets().contains("m1"));
		pipeline.commit_changes();
		let state = pipeline.markets().get("m1").unwrap();
		assert!(state.has_been_forwarded);
		assert!(state.is_pending);
	}
}
