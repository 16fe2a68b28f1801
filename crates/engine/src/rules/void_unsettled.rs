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

use relay_sdk::Market;
use tracing::info;

use super::{MarketRule, PassKind, RuleContext};

/// Voids every unsettled market held back from the consumer once the match
/// is over, so the consumer's books balance.
///
/// Runs on snapshot passes carrying MatchOver. Resulted markets are never
/// voided, and a market is voided at most once.
pub struct VoidUnsettledMarketsRule;

impl MarketRule for VoidUnsettledMarketsRule {
	fn name(&self) -> &'static str {
		"void_unsettled_markets"
	}

	fn apply(&self, ctx: &mut RuleContext<'_>) {
		if ctx.pass != PassKind::Snapshot || !ctx.fixture.is_match_over() {
			return;
		}

		let targets: Vec<String> = ctx
			.current
			.iter()
			.filter(|state| !state.is_resulted && !state.is_voided && !state.is_auto_voided)
			.filter(|state| !ctx.in_payload(&state.id))
			.map(|state| state.id.clone())
			.collect();

		let mut voided: Vec<Market> = Vec::with_capacity(targets.len());
		for market_id in &targets {
			if let Some(state) = ctx.current.get_mut(market_id) {
				state.is_auto_voided = true;
				voided.push(state.to_voided_market());
			}
		}

		if !voided.is_empty() {
			info!(
				target: "rules",
				fixture_id = %ctx.fixture.id,
				count = voided.len(),
				"Auto-voiding unsettled markets"
			);
			ctx.fixture.markets.extend(voided);
		}
	}
}
