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

/// Re-sends markets that disappeared upstream as non-tradable, once
pub struct DeletedMarketsRule;

impl MarketRule for DeletedMarketsRule {
	fn name(&self) -> &'static str {
		"deleted_markets"
	}

	fn apply(&self, ctx: &mut RuleContext<'_>) {
		if ctx.pass != PassKind::Snapshot {
			return;
		}

		let targets: Vec<String> = ctx
			.current
			.iter()
			.filter(|state| state.has_been_forwarded && !state.is_deleted)
			.filter(|state| !ctx.upstream_ids.contains(&state.id) && !ctx.in_payload(&state.id))
			.map(|state| state.id.clone())
			.collect();

		let mut removed: Vec<Market> = Vec::with_capacity(targets.len());
		for market_id in &targets {
			if let Some(state) = ctx.current.get_mut(market_id) {
				state.is_deleted = true;
				removed.push(state.to_suspended_market());
			}
		}

		if !removed.is_empty() {
			info!(
				target: "rules",
				fixture_id = %ctx.fixture.id,
				count = removed.len(),
				"Markets removed upstream, sending them non-tradable"
			);
			ctx.fixture.markets.extend(removed);
		}
	}
}
