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

mod common;

use std::sync::Arc;

use common::*;
use relay_engine::{MemoryPersistence, RelayRuntime, RuntimeError, Settings};
use relay_sdk::MatchStatus;

#[tokio::test]
async fn test_runtime_discovers_and_persists() {
	let catalog = Arc::new(MockCatalog::default());
	let a = MockResource::new("a", 5, MatchStatus::InRunning);
	let b = MockResource::new("b", 2, MatchStatus::PreMatch);
	catalog.set(vec![a.clone(), b.clone()]);
	let plugin = RecordingPlugin::new();
	let persistence = Arc::new(MemoryPersistence::new());

	let runtime = RelayRuntime::builder(test_settings(), catalog.clone(), plugin.clone())
		.persistence(persistence.clone())
		.start()
		.await
		.unwrap();

	eventually("both fixtures", || plugin.snapshots().len() == 2).await;
	eventually("checkpoints", || runtime.store().len() == 2).await;
	eventually("auto store", || persistence.contents().is_some()).await;
	assert!(runtime.supervisor().listener("a").await.unwrap().is_some());

	runtime.shutdown().await.unwrap();
	let persisted = persistence.contents().unwrap();
	assert!(persisted.contains("\"a\""));
	assert!(persisted.contains("\"b\""));
	assert_eq!(a.stop_calls(), 1);
}

#[tokio::test]
async fn test_runtime_resumes_from_persisted_state() {
	let catalog = Arc::new(MockCatalog::default());
	let a = MockResource::new("a", 5, MatchStatus::InRunning);
	catalog.set(vec![a.clone()]);
	let plugin = RecordingPlugin::new();
	let persistence = Arc::new(MemoryPersistence::with_contents(
		r#"{"a":{"Id":"a","Sport":"football","Sequence":5,"Epoch":1,"MatchStatus":"40"}}"#,
	));

	let runtime = RelayRuntime::builder(test_settings(), catalog, plugin.clone())
		.persistence(persistence)
		.start()
		.await
		.unwrap();

	eventually("unsuspend", || plugin.count(|c| matches!(c, Call::Unsuspend(_))) == 1).await;
	assert!(plugin.snapshots().is_empty());
	assert_eq!(a.snapshot_requests(), 0);
	runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_runtime_rejects_invalid_settings() {
	let result = RelayRuntime::builder(
		Settings {
			fixture_creation_concurrency: 0,
			..test_settings()
		},
		Arc::new(MockCatalog::default()),
		RecordingPlugin::new(),
	)
	.persistence(Arc::new(MemoryPersistence::new()))
	.start()
	.await;

	assert!(matches!(result, Err(RuntimeError::Settings(_))));
}
