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

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Logging configuration constants
/// Default log level (can be overridden by RUST_LOG environment variable)
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log directory component name
pub const LOG_COMPONENT_NAME: &str = "relay";

/// Default console output enabled (can be overridden by LOG_TO_CONSOLE environment variable)
pub const DEFAULT_LOG_TO_CONSOLE: bool = false;

/// Environment prefix for every engine setting (e.g. RELAY_STREAM_SAFETY_THRESHOLD)
pub const ENV_PREFIX: &str = "RELAY";

// Engine configuration constants
/// Default maximum number of listener builds in flight
pub const DEFAULT_FIXTURE_CREATION_CONCURRENCY: usize = 20;

/// Default catalog poll interval per sport in milliseconds
pub const DEFAULT_FIXTURE_CHECKER_FREQUENCY_MS: u64 = 60_000;

/// Default maximum tolerated gap between advertised and processed sequence
pub const DEFAULT_STREAM_SAFETY_THRESHOLD: i64 = 3;

/// Default time allowed for a stream to report connected
pub const DEFAULT_START_STREAMING_TIMEOUT_SECS: u64 = 60;

/// Default number of connect-timeout misses tolerated before teardown
pub const DEFAULT_START_STREAMING_ATTEMPTS: u32 = 3;

/// Default bound on acquiring a listener's processing gate
pub const DEFAULT_PROCESSING_LOCK_TIMEOUT_SECS: u64 = 60;

/// Default interval between fixture state flushes in milliseconds
pub const DEFAULT_FIXTURES_STATE_AUTO_STORE_INTERVAL_MS: u64 = 5_000;

/// Default checkpoint file path
pub const DEFAULT_FIXTURES_STATE_FILE_PATH: &str = "fixtures_state.json";

/// Default lead time (minutes) inside which disconnections always suspend
pub const DEFAULT_PREMATCH_SUSPENSION_BEFORE_START_TIME_MINS: i64 = 15;

/// Default interval between listener health checks
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

/// Error types for configuration loading
#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("Failed to load configuration: {0}")]
	Load(#[from] config::ConfigError),
	#[error("Invalid configuration: {0}")]
	Invalid(String),
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	/// Maximum number of listener builds in flight
	pub fixture_creation_concurrency: usize,
	/// Catalog poll interval per sport (milliseconds)
	pub fixture_checker_frequency_ms: u64,
	/// Maximum tolerated sequence gap while streaming
	pub stream_safety_threshold: i64,
	/// Time allowed between StartStreaming and the connected callback
	pub start_streaming_timeout_secs: u64,
	/// Connect-timeout misses tolerated before the listener is torn down
	pub start_streaming_attempts: u32,
	/// Stream fixtures that are still in Setup/Ready
	pub allow_fixture_streaming_in_setup_mode: bool,
	/// Bound on acquiring a listener's processing gate
	pub processing_lock_timeout_secs: u64,
	/// Interval between fixture state flushes (milliseconds)
	pub fixtures_state_auto_store_interval_ms: u64,
	/// Checkpoint file path
	pub fixtures_state_file_path: String,
	/// Skip suspension on disconnect for fixtures far from their start time
	pub disable_prematch_suspension_on_disconnection: bool,
	/// Lead time inside which disconnections always suspend (minutes)
	pub prematch_suspension_before_start_time_mins: i64,
	/// Keep streaming this long after match over before ending (0 = end at once)
	pub stop_streaming_delay_minutes: u64,
	/// Suspend every market instead of only in-play ones on shutdown
	pub suspend_all_markets_on_shutdown: bool,
	/// Interval between listener health checks (0 disables the ticker)
	pub health_check_interval_secs: u64,
	/// Drop markets whose content did not change from stream updates
	pub enable_delta_rule: bool,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			fixture_creation_concurrency: DEFAULT_FIXTURE_CREATION_CONCURRENCY,
			fixture_checker_frequency_ms: DEFAULT_FIXTURE_CHECKER_FREQUENCY_MS,
			stream_safety_threshold: DEFAULT_STREAM_SAFETY_THRESHOLD,
			start_streaming_timeout_secs: DEFAULT_START_STREAMING_TIMEOUT_SECS,
			start_streaming_attempts: DEFAULT_START_STREAMING_ATTEMPTS,
			allow_fixture_streaming_in_setup_mode: false,
			processing_lock_timeout_secs: DEFAULT_PROCESSING_LOCK_TIMEOUT_SECS,
			fixtures_state_auto_store_interval_ms: DEFAULT_FIXTURES_STATE_AUTO_STORE_INTERVAL_MS,
			fixtures_state_file_path: DEFAULT_FIXTURES_STATE_FILE_PATH.to_string(),
			disable_prematch_suspension_on_disconnection: false,
			prematch_suspension_before_start_time_mins:
				DEFAULT_PREMATCH_SUSPENSION_BEFORE_START_TIME_MINS,
			stop_streaming_delay_minutes: 0,
			suspend_all_markets_on_shutdown: true,
			health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
			enable_delta_rule: false,
		}
	}
}

impl Settings {
	/// Load configuration from environment variables
	pub fn from_env() -> Result<Self, SettingsError> {
		dotenv::dotenv().ok();

		let cfg = config::Config::builder()
			.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
			.build()?;

		let settings: Settings = cfg.try_deserialize()?;
		settings.validate()?;
		Ok(settings)
	}

	/// Load configuration from file, with environment variables taking precedence
	pub fn from_file(path: &str) -> Result<Self, SettingsError> {
		let cfg = config::Config::builder()
			.add_source(config::File::with_name(path))
			.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
			.build()?;

		let settings: Settings = cfg.try_deserialize()?;
		settings.validate()?;
		Ok(settings)
	}

	pub fn validate(&self) -> Result<(), SettingsError> {
		if self.fixture_creation_concurrency == 0 {
			return Err(SettingsError::Invalid(
				"fixture_creation_concurrency must be > 0".to_string(),
			));
		}
		if self.stream_safety_threshold < 0 {
			return Err(SettingsError::Invalid(
				"stream_safety_threshold must not be negative".to_string(),
			));
		}
		Ok(())
	}

	pub fn fixture_checker_frequency(&self) -> Duration {
		Duration::from_millis(self.fixture_checker_frequency_ms)
	}

	pub fn start_streaming_timeout(&self) -> Duration {
		Duration::from_secs(self.start_streaming_timeout_secs)
	}

	pub fn processing_lock_timeout(&self) -> Duration {
		Duration::from_secs(self.processing_lock_timeout_secs)
	}

	pub fn fixtures_state_auto_store_interval(&self) -> Duration {
		Duration::from_millis(self.fixtures_state_auto_store_interval_ms)
	}

	pub fn stop_streaming_delay(&self) -> Duration {
		Duration::from_secs(self.stop_streaming_delay_minutes.saturating_mul(60))
	}

	pub fn health_check_interval(&self) -> Option<Duration> {
		(self.health_check_interval_secs > 0)
			.then(|| Duration::from_secs(self.health_check_interval_secs))
	}

	pub fn prematch_suspension_lead(&self) -> chrono::Duration {
		chrono::Duration::minutes(self.prematch_suspension_before_start_time_mins)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_are_valid() {
		let settings = Settings::default();
		assert!(settings.validate().is_ok());
		assert_eq!(settings.stop_streaming_delay(), Duration::ZERO);
		assert_eq!(
			settings.health_check_interval(),
			Some(Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS))
		);
	}

	#[test]
	fn test_zero_concurrency_rejected() {
		let settings = Settings {
			fixture_creation_concurrency: 0,
			..Default::default()
		};
		assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));
	}

	#[test]
	fn test_from_file_overrides_defaults() {
		let path = std::env::temp_dir().join(format!("relay-settings-{}.toml", uuid::Uuid::new_v4()));
		std::fs::write(
			&path,
			"fixture_creation_concurrency = 4\nstream_safety_threshold = 7\nstop_streaming_delay_minutes = 2\n",
		)
		.unwrap();

		let settings = Settings::from_file(path.to_str().unwrap()).unwrap();
		std::fs::remove_file(&path).ok();

		assert_eq!(settings.fixture_creation_concurrency, 4);
		assert_eq!(settings.stream_safety_threshold, 7);
		assert_eq!(settings.stop_streaming_delay(), Duration::from_secs(120));
		assert_eq!(
			settings.fixture_checker_frequency_ms,
			DEFAULT_FIXTURE_CHECKER_FREQUENCY_MS
		);
	}

	#[test]
	fn test_health_ticker_disabled_at_zero() {
		let settings = Settings {
			health_check_interval_secs: 0,
			..Default::default()
		};
		assert_eq!(settings.health_check_interval(), None);
	}

	#[test]
	fn test_stop_delay_saturates() {
		let settings = Settings {
			stop_streaming_delay_minutes: u64::MAX,
			..Default::default()
		};
		assert_eq!(settings.stop_streaming_delay(), Duration::from_secs(u64::MAX));
	}
}
