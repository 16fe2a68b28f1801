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

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{MatchStatus, ResourceContent};

/// Error types raised by the upstream feed
#[derive(Debug, Error)]
pub enum FeedError {
	#[error("Streaming connection failed: {0}")]
	Connection(String),
	#[error("Snapshot retrieval failed: {0}")]
	Snapshot(String),
	#[error("Empty snapshot returned for fixture {0}")]
	EmptySnapshot(String),
	#[error("Snapshot for fixture {fixture_id} went back to sequence {sequence} after {last}")]
	OutOfOrderSnapshot {
		fixture_id: String,
		sequence: i64,
		last: i64,
	},
	#[error("Catalog request failed: {0}")]
	Catalog(String),
}

/// Callbacks raised by a streaming connection
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
	/// The stream is established and deltas will follow
	Connected,
	/// The stream dropped; the transport may reconnect on its own
	Disconnected,
	/// A serialized delta payload
	Update(String),
}

/// Sending half handed to [`FeedResource::start_streaming`]
pub type FeedEventSink = mpsc::UnboundedSender<FeedEvent>;

/// Receiving half owned by the fixture listener
pub type FeedEventStream = mpsc::UnboundedReceiver<FeedEvent>;

pub fn feed_channel() -> (FeedEventSink, FeedEventStream) {
	mpsc::unbounded_channel()
}

/// A fixture exposed by the upstream feed
///
/// The handle is cheap to clone behind an `Arc` and may be refreshed on
/// every discovery pass. `content()` reflects what the feed advertised the
/// last time the handle was produced.
#[async_trait]
pub trait FeedResource: Send + Sync {
	fn id(&self) -> &str;

	fn sport(&self) -> &str;

	fn content(&self) -> ResourceContent;

	fn match_status(&self) -> MatchStatus {
		self.content().match_status
	}

	fn is_match_over(&self) -> bool {
		self.match_status().is_match_over()
	}

	/// Open the push stream. Connection callbacks and deltas are delivered
	/// through `events` once this returns.
	async fn start_streaming(&self, events: FeedEventSink) -> Result<(), FeedError>;

	async fn stop_streaming(&self) -> Result<(), FeedError>;

	/// Fetch the serialized full state of the fixture
	async fn get_snapshot(&self) -> Result<String, FeedError>;
}

/// Upstream catalog enumerating fixtures per sport
#[async_trait]
pub trait FixtureCatalog: Send + Sync {
	async fn sports(&self) -> Result<Vec<String>, FeedError>;

	async fn list_fixtures(&self, sport: &str) -> Result<Vec<Arc<dyn FeedResource>>, FeedError>;
}
