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

use std::{fmt, sync::Arc};

use relay_sdk::FeedResource;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::suspension::SuspensionReason;

/// Why a snapshot is being fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
	/// Stream connected with a stale or missing checkpoint
	Connect,
	/// Setup fixture registered downstream before it streams
	Registration,
	/// Sequence gap, stale delta or epoch change
	Resync,
	/// First processing error
	Recovery,
	/// Sequence drift detected by the watchdog
	HealthCheck,
	/// Authoritative final state after match over
	MatchOverCloseOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotRequest {
	pub kind: SnapshotKind,
	/// Bypasses the duplicate guard for a snapshot at the last applied sequence
	pub force: bool,
}

impl SnapshotRequest {
	pub fn new(kind: SnapshotKind, force: bool) -> Self {
		Self { kind, force }
	}
}

/// Why an update was not processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
	StaleSequence { sequence: i64, current: i64 },
	SequenceGap { sequence: i64, current: i64 },
	DuplicateSnapshot { sequence: i64 },
	/// No snapshot applied yet, or recovering from an error
	NotReady,
	/// Listener finished or disposed
	Closed,
}

/// Result of processing one snapshot or delta
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
	Forwarded,
	Ignored,
	Suspended,
	Rejected(Rejection),
	Errored(String),
}

impl fmt::Display for Outcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Outcome::Forwarded => f.write_str("forwarded"),
			Outcome::Ignored => f.write_str("ignored"),
			Outcome::Suspended => f.write_str("suspended"),
			Outcome::Rejected(rejection) => write!(f, "rejected: {:?}", rejection),
			Outcome::Errored(reason) => write!(f, "errored: {}", reason),
		}
	}
}

/// Control messages for a listener actor
pub enum ListenerMessage {
	FetchSnapshot {
		request: SnapshotRequest,
		resource: Arc<dyn FeedResource>,
	},
	ResourceUpdated(Arc<dyn FeedResource>),
	HealthCheck,
	StopDelayElapsed,
	Stop {
		reason: SuspensionReason,
		reply: oneshot::Sender<()>,
	},
	/// Sent by the listener to itself once it reached a final state
	Teardown,
}

impl fmt::Debug for ListenerMessage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ListenerMessage::FetchSnapshot { request, .. } => {
				f.debug_struct("FetchSnapshot").field("request", request).finish()
			}
			ListenerMessage::ResourceUpdated(resource) => {
				f.debug_tuple("ResourceUpdated").field(&resource.id()).finish()
			}
			ListenerMessage::HealthCheck => f.write_str("HealthCheck"),
			ListenerMessage::StopDelayElapsed => f.write_str("StopDelayElapsed"),
			ListenerMessage::Stop { reason, .. } => {
				f.debug_struct("Stop").field("reason", reason).finish()
			}
			ListenerMessage::Teardown => f.write_str("Teardown"),
		}
	}
}

/// Notification sent by a listener to its supervisor
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerEvent {
	pub fixture_id: String,
	/// Identifies the listener instance, so events of a replaced listener
	/// can be told apart from the current one
	pub instance_id: Uuid,
	pub kind: ListenerEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEventKind {
	Ended,
	Deleted,
	Ignored,
	Disconnected,
	/// Consecutive errors; the listener gave up recovering
	Errored(String),
	ConnectTimeout,
	HealthCheckFailed { resource_match_over: bool },
}

impl ListenerEventKind {
	/// The listener stopped itself after sending this event
	pub fn is_final(&self) -> bool {
		!matches!(self, ListenerEventKind::Disconnected)
	}
}
