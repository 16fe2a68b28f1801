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

use super::{MarketRule, MarketState, RuleContext};

/// Drops inactive markets from the outgoing payload
///
/// A market is forwarded when it is active, when it fell back to pending
/// after having been active, or when its name, active flag or settlement
/// changed since the previous pass. The state itself stays in the
/// collection so a later reactivation is detected by diff.
pub struct InactiveMarketsRule;

impl InactiveMarketsRule {
	fn should_forward(previous: Option<&MarketState>, current: &MarketState) -> bool {
		if current.is_active {
			return true;
		}

		match previous {
			Some(prev) => {
				(current.is_pending && prev.has_been_active)
					|| prev.name != current.name
					|| prev.is_active != current.is_active
					|| prev.is_resulted != current.is_resulted
					|| prev.is_voided != current.is_voided
			}
			None => current.is_resulted || current.is_voided,
		}
	}
}

impl MarketRule for InactiveMarketsRule {
	fn name(&self) -> &'static str {
		"inactive_markets"
	}

	fn apply(&self, ctx: &mut RuleContext<'_>) {
		let previous = ctx.previous;
		let current = &*ctx.current;
		ctx.fixture.markets.retain(|market| match current.get(&market.id) {
			Some(state) => Self::should_forward(previous.get(&market.id), state),
			None => true,
		});
	}
}
