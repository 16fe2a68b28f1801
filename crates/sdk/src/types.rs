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

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag carrying the display name of a market
pub const TAG_NAME: &str = "name";

/// Tag telling whether a market trades while the match is in play
pub const TAG_TRADED_IN_PLAY: &str = "traded_in_play";

/// Match status of a fixture, carried on the wire as a numeric string code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MatchStatus {
	#[default]
	Setup,
	Ready,
	PreMatch,
	InRunning,
	MatchOver,
	Deleted,
}

impl MatchStatus {
	pub fn code(self) -> &'static str {
		match self {
			MatchStatus::Setup => "10",
			MatchStatus::Ready => "20",
			MatchStatus::PreMatch => "30",
			MatchStatus::InRunning => "40",
			MatchStatus::MatchOver => "50",
			MatchStatus::Deleted => "80",
		}
	}

	pub fn from_code(code: &str) -> Option<Self> {
		match code.trim() {
			"10" => Some(MatchStatus::Setup),
			"20" => Some(MatchStatus::Ready),
			"30" => Some(MatchStatus::PreMatch),
			"40" => Some(MatchStatus::InRunning),
			"50" => Some(MatchStatus::MatchOver),
			"80" => Some(MatchStatus::Deleted),
			_ => None,
		}
	}

	/// Setup and Ready fixtures are not yet eligible to stream
	pub fn is_setup(self) -> bool {
		matches!(self, MatchStatus::Setup | MatchStatus::Ready)
	}

	pub fn is_match_over(self) -> bool {
		self == MatchStatus::MatchOver
	}
}

impl TryFrom<String> for MatchStatus {
	type Error = String;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		MatchStatus::from_code(&value).ok_or_else(|| format!("unknown match status code: {}", value))
	}
}

impl From<MatchStatus> for String {
	fn from(status: MatchStatus) -> Self {
		status.code().to_string()
	}
}

/// Selection status, carried on the wire as a numeric string code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SelectionStatus {
	#[default]
	Pending,
	Active,
	Settled,
	Void,
}

impl SelectionStatus {
	pub fn code(self) -> &'static str {
		match self {
			SelectionStatus::Pending => "0",
			SelectionStatus::Active => "1",
			SelectionStatus::Settled => "2",
			SelectionStatus::Void => "3",
		}
	}

	pub fn from_code(code: &str) -> Option<Self> {
		match code.trim() {
			"0" => Some(SelectionStatus::Pending),
			"1" => Some(SelectionStatus::Active),
			"2" => Some(SelectionStatus::Settled),
			"3" => Some(SelectionStatus::Void),
			_ => None,
		}
	}
}

impl TryFrom<String> for SelectionStatus {
	type Error = String;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		SelectionStatus::from_code(&value)
			.ok_or_else(|| format!("unknown selection status code: {}", value))
	}
}

impl From<SelectionStatus> for String {
	fn from(status: SelectionStatus) -> Self {
		status.code().to_string()
	}
}

/// Why the epoch of a fixture was incremented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum EpochChangeReason {
	StartTime,
	Participants,
	MatchStatus,
	Deleted,
	Markets,
	Other(i32),
}

impl From<i32> for EpochChangeReason {
	fn from(code: i32) -> Self {
		match code {
			10 => EpochChangeReason::StartTime,
			20 => EpochChangeReason::Participants,
			30 => EpochChangeReason::MatchStatus,
			40 => EpochChangeReason::Deleted,
			50 => EpochChangeReason::Markets,
			other => EpochChangeReason::Other(other),
		}
	}
}

impl From<EpochChangeReason> for i32 {
	fn from(reason: EpochChangeReason) -> Self {
		match reason {
			EpochChangeReason::StartTime => 10,
			EpochChangeReason::Participants => 20,
			EpochChangeReason::MatchStatus => 30,
			EpochChangeReason::Deleted => 40,
			EpochChangeReason::Markets => 50,
			EpochChangeReason::Other(code) => code,
		}
	}
}

/// A bettable outcome of a market
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Selection {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub price: Option<f64>,
	#[serde(default)]
	pub status: SelectionStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tradable: Option<bool>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub tags: BTreeMap<String, Value>,
}

impl Selection {
	pub fn new(id: impl Into<String>, status: SelectionStatus) -> Self {
		Self {
			id: id.into(),
			status,
			..Default::default()
		}
	}

	pub fn with_price(mut self, price: f64) -> Self {
		self.price = Some(price);
		self
	}

	pub fn with_tradable(mut self, tradable: bool) -> Self {
		self.tradable = Some(tradable);
		self
	}

	pub fn is_tradable(&self) -> bool {
		self.tradable.unwrap_or(false)
	}
}

/// A bettable proposition on a fixture
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Market {
	pub id: String,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub tags: BTreeMap<String, Value>,
	#[serde(default)]
	pub selections: Vec<Selection>,
}

impl Market {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			..Default::default()
		}
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.tags
			.insert(TAG_NAME.to_string(), Value::String(name.into()));
		self
	}

	pub fn with_tag(mut self, key: impl Into<String>, value: Value) -> Self {
		self.tags.insert(key.into(), value);
		self
	}

	pub fn with_selection(mut self, selection: Selection) -> Self {
		self.selections.push(selection);
		self
	}

	pub fn name(&self) -> Option<&str> {
		self.tags.get(TAG_NAME).and_then(Value::as_str)
	}

	/// Markets without the tag are treated as traded in play
	pub fn is_traded_in_play(&self) -> bool {
		traded_in_play(&self.tags)
	}

	pub fn is_active(&self) -> bool {
		self.selections
			.iter()
			.any(|s| s.status == SelectionStatus::Active)
	}

	pub fn is_pending(&self) -> bool {
		!self.selections.is_empty()
			&& self
				.selections
				.iter()
				.all(|s| s.status == SelectionStatus::Pending)
	}

	pub fn is_suspended(&self) -> bool {
		self.is_active() && !self.selections.iter().any(Selection::is_tradable)
	}

	pub fn is_resulted(&self) -> bool {
		selections_resulted(self.selections.iter().map(|s| (s.status, s.price)))
	}

	pub fn is_voided(&self) -> bool {
		!self.selections.is_empty()
			&& self
				.selections
				.iter()
				.all(|s| s.status == SelectionStatus::Void)
	}
}

/// Reads the `traded_in_play` tag, accepting booleans and "true"/"false" strings
pub fn traded_in_play(tags: &BTreeMap<String, Value>) -> bool {
	match tags.get(TAG_TRADED_IN_PLAY) {
		None => true,
		Some(Value::Bool(flag)) => *flag,
		Some(Value::String(text)) => !text.eq_ignore_ascii_case("false"),
		Some(_) => true,
	}
}

/// Settlement test shared by payload markets and tracked market state.
///
/// A market is resulted when every selection is settled or void, and the
/// settled selections contain exactly one non-zero price. A set settled
/// entirely at zero price, or with more than one winner, is not resulted.
pub fn selections_resulted<I>(selections: I) -> bool
where
	I: IntoIterator<Item = (SelectionStatus, Option<f64>)>,
{
	let mut settled = 0usize;
	let mut priced = 0usize;

	for (status, price) in selections {
		match status {
			SelectionStatus::Settled => {
				settled += 1;
				if price.is_some_and(|p| p != 0.0) {
					priced += 1;
				}
			}
			SelectionStatus::Void => {}
			SelectionStatus::Pending | SelectionStatus::Active => return false,
		}
	}

	settled > 0 && priced == 1
}

/// A sporting event as delivered by snapshots and deltas
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Fixture {
	pub id: String,
	#[serde(default)]
	pub sequence: i64,
	#[serde(default)]
	pub epoch: i64,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub last_epoch_change_reason: Vec<EpochChangeReason>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub match_status: Option<MatchStatus>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub start_time: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub tags: BTreeMap<String, Value>,
	#[serde(default)]
	pub markets: Vec<Market>,
}

impl Fixture {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			..Default::default()
		}
	}

	pub fn is_match_over(&self) -> bool {
		self.match_status == Some(MatchStatus::MatchOver)
	}

	pub fn is_deleted(&self) -> bool {
		self.match_status == Some(MatchStatus::Deleted)
			|| self
				.last_epoch_change_reason
				.contains(&EpochChangeReason::Deleted)
	}

	pub fn market(&self, market_id: &str) -> Option<&Market> {
		self.markets.iter().find(|m| m.id == market_id)
	}
}

/// Fixture header advertised by the feed at discovery time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceContent {
	pub sequence: i64,
	pub match_status: MatchStatus,
	#[serde(default)]
	pub start_time: Option<DateTime<Utc>>,
}

impl ResourceContent {
	pub fn new(sequence: i64, match_status: MatchStatus) -> Self {
		Self {
			sequence,
			match_status,
			start_time: None,
		}
	}
}
