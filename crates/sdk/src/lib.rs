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

//! Relay SDK - boundary types for the fixture relay
//!
//! This crate defines what the reconciliation engine exchanges with the
//! world around it: the fixture data model carried by snapshots and deltas,
//! the upstream feed capabilities the engine calls, and the consumer plugin
//! interface that receives the reconciled view.
//!
//! The SDK is designed to be lightweight and embeddable:
//! - No background tasks
//! - No runtime initialization
//! - No environment or configuration loading

pub mod feed;
pub mod plugin;
pub mod types;

pub use feed::{
	FeedError, FeedEvent, FeedEventSink, FeedEventStream, FeedResource, FixtureCatalog,
	feed_channel,
};
pub use plugin::{Acceptance, ConsumerPlugin, PluginError};
pub use types::*;
