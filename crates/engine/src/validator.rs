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

//! Ordering predicates for incoming fixture updates
//!
//! All functions are pure. They never touch the store and never log; the
//! listener decides what to do with the classification.

use relay_sdk::{EpochChangeReason, Fixture, ResourceContent};

use crate::store::FixtureState;

/// Result of classifying a delta's sequence against the last processed one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
	/// Next in line, or a replay of the current sequence
	Valid,
	/// Lower than the current sequence
	Stale,
	/// Skips one or more sequence numbers
	Gap,
}

/// True iff `sequence >= current && sequence - current <= 1`
pub fn is_sequence_valid(sequence: i64, current: i64) -> bool {
	classify_sequence(sequence, current) == SequenceCheck::Valid
}

pub fn classify_sequence(sequence: i64, current: i64) -> SequenceCheck {
	if sequence < current {
		SequenceCheck::Stale
	} else if sequence - current > 1 {
		SequenceCheck::Gap
	} else {
		SequenceCheck::Valid
	}
}

/// An epoch is valid when unchanged, or when it moved forward solely
/// because the start time changed.
pub fn is_epoch_valid(epoch: i64, current: i64, reasons: &[EpochChangeReason]) -> bool {
	if epoch == current {
		return true;
	}

	epoch > current && matches!(reasons, [EpochChangeReason::StartTime])
}

/// Convenience over [`is_epoch_valid`] using the fields of a delta
pub fn is_delta_epoch_valid(delta: &Fixture, current_epoch: i64) -> bool {
	is_epoch_valid(delta.epoch, current_epoch, &delta.last_epoch_change_reason)
}

/// A snapshot is needed when there is no checkpoint, or when the feed
/// advertises a different sequence than the one last processed.
pub fn is_snapshot_needed(content: &ResourceContent, stored: Option<&FixtureState>) -> bool {
	match stored {
		None => true,
		Some(state) => state.sequence != content.sequence,
	}
}
