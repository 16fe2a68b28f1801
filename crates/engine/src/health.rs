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

//! Stream health checker
//!
//! Pure decision logic for the per-listener watchdog. The listener feeds it
//! on every health tick and acts on the verdicts; the checker itself never
//! talks to the feed or the consumer.
//!
//! Two independent checks run on each tick:
//! - connect watchdog: a streaming request (or a lost connection) that does
//!   not reach `Connected` within the timeout counts as a miss; streaming is
//!   restarted until the miss count exceeds the attempt limit.
//! - sequence drift: the sequence advertised by the feed may run ahead of the
//!   last processed one by at most the safety threshold, inclusive.

use std::time::Duration;

use relay_sdk::MatchStatus;
use tokio::time::Instant;

use crate::{config::Settings, listener::ListenerState};

/// Connection progress of a listener's feed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Idle,
	Requested(Instant),
	Connected,
	Lost(Instant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCheck {
	Healthy,
	/// Restart streaming; `attempt` misses so far
	Retry { attempt: u32 },
	/// Attempts exhausted; the listener must be torn down
	GiveUp { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftCheck {
	Healthy,
	/// Listener not in a state where drift is meaningful
	Skipped,
	/// First failure: suspend and resynchronize
	Recover { gap: i64 },
	/// Consecutive failure: stop the listener
	Escalate { gap: i64 },
}

/// Tunables of the watchdog
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
	pub safety_threshold: i64,
	pub connect_timeout: Duration,
	pub connect_attempts: u32,
	pub allow_setup_streaming: bool,
}

impl HealthPolicy {
	pub fn from_settings(settings: &Settings) -> Self {
		Self {
			safety_threshold: settings.stream_safety_threshold,
			connect_timeout: settings.start_streaming_timeout(),
			connect_attempts: settings.start_streaming_attempts,
			allow_setup_streaming: settings.allow_fixture_streaming_in_setup_mode,
		}
	}
}

/// True when the feed is further ahead than the threshold tolerates
pub fn is_drift_invalid(observed: i64, processed: i64, threshold: i64) -> bool {
	observed - processed > threshold
}

#[derive(Debug)]
pub struct StreamHealthChecker {
	policy: HealthPolicy,
	connect_misses: u32,
	consecutive_failures: u32,
}

impl StreamHealthChecker {
	pub fn new(policy: HealthPolicy) -> Self {
		Self {
			policy,
			connect_misses: 0,
			consecutive_failures: 0,
		}
	}

	pub fn policy(&self) -> &HealthPolicy {
		&self.policy
	}

	pub fn consecutive_failures(&self) -> u32 {
		self.consecutive_failures
	}

	pub fn check_connect(&mut self, connection: ConnectionState, now: Instant) -> ConnectCheck {
		let since = match connection {
			ConnectionState::Idle | ConnectionState::Connected => {
				self.connect_misses = 0;
				return ConnectCheck::Healthy;
			}
			ConnectionState::Requested(at) | ConnectionState::Lost(at) => at,
		};

		if now.saturating_duration_since(since) < self.policy.connect_timeout {
			return ConnectCheck::Healthy;
		}

		self.connect_misses += 1;
		if self.connect_misses > self.policy.connect_attempts {
			ConnectCheck::GiveUp {
				attempts: self.connect_misses,
			}
		} else {
			ConnectCheck::Retry {
				attempt: self.connect_misses,
			}
		}
	}

	/// Drift is only judged while streaming a live, eligible fixture
	pub fn is_drift_check_eligible(
		&self,
		state: ListenerState,
		listener_status: Option<MatchStatus>,
		resource_status: MatchStatus,
	) -> bool {
		state == ListenerState::Streaming
			&& listener_status != Some(MatchStatus::MatchOver)
			&& (!resource_status.is_setup() || self.policy.allow_setup_streaming)
	}

	pub fn check_drift(&mut self, eligible: bool, observed: i64, processed: i64) -> DriftCheck {
		if !eligible {
			return DriftCheck::Skipped;
		}

		let gap = observed - processed;
		if !is_drift_invalid(observed, processed, self.policy.safety_threshold) {
			self.consecutive_failures = 0;
			return DriftCheck::Healthy;
		}

		self.consecutive_failures += 1;
		if self.consecutive_failures >= 2 {
			DriftCheck::Escalate { gap }
		} else {
			DriftCheck::Recover { gap }
		}
	}
}
