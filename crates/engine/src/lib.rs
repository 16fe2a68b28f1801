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

//! Relay Engine - fixture stream reconciliation
//!
//! This crate republishes a live sporting feed to a downstream consumer
//! plugin, keeping the forwarded view consistent when the feed is not:
//! updates may arrive out of order, with gaps, or not at all across
//! reconnects.
//!
//! Architecture:
//! - One listener task per fixture, serializing its snapshot and delta
//!   processing behind a processing gate
//! - Sequence/epoch validation with snapshot resynchronization on gaps
//! - Transactional market rule pipeline applied before forwarding
//! - Pluggable suspension strategies whenever freshness is not guaranteed
//! - Supervisor with bounded concurrent listener builds and a per-sport
//!   catalog scheduler
//! - Durable per-fixture checkpoints for resuming after restart

pub mod config;
pub mod health;
pub mod listener;
pub mod logging;
pub mod rules;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod suspension;
pub mod validator;

pub use config::{Settings, SettingsError};
pub use health::{ConnectCheck, ConnectionState, DriftCheck, HealthPolicy, StreamHealthChecker};
pub use listener::{
	FixtureListener, ListenerContext, ListenerError, ListenerEvent, ListenerEventKind,
	ListenerHandle, ListenerState, ListenerStatus, Outcome, Rejection, SnapshotKind,
};
pub use rules::{MarketRule, MarketState, MarketStateCollection, PassKind, RulePipeline};
pub use runtime::{RelayRuntime, RelayRuntimeBuilder, RuntimeError};
pub use scheduler::SportScheduler;
pub use store::{
	Checkpoint, FilePersistence, FixtureState, FixtureStateStore, MemoryPersistence,
	StateFlusher, StatePersistence, StoreError,
};
pub use supervisor::{Supervisor, SupervisorError, SupervisorHandle, SupervisorStatus};
pub use suspension::{SuspensionAction, SuspensionError, SuspensionManager, SuspensionReason};
