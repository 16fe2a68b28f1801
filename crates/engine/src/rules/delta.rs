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

use super::{MarketRule, PassKind, RuleContext};

/// Drops delta markets whose merged content equals what was last forwarded
pub struct DeltaRule;

impl MarketRule for DeltaRule {
	fn name(&self) -> &'static str {
		"delta"
	}

	fn apply(&self, ctx: &mut RuleContext<'_>) {
		if ctx.pass != PassKind::Delta {
			return;
		}

		let current = &*ctx.current;
		ctx.fixture.markets.retain(|market| match current.get(&market.id) {
			Some(state) => state
				.last_forwarded
				.as_ref()
				.is_none_or(|forwarded| *forwarded != state.to_market()),
			None => true,
		});
	}
}
