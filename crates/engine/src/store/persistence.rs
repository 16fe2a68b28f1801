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

use std::{
	fs,
	io::ErrorKind,
	path::{Path, PathBuf},
	sync::Mutex,
};

use super::StoreError;

/// State Persistence trait - durable backing of the fixture state store
///
/// The store owns the in-memory map and its serialization; persistence only
/// moves an opaque serialized document in and out.
///
/// Implementations:
/// - [`FilePersistence`]: a single JSON file on local disk
/// - [`MemoryPersistence`]: in-process, for tests and embedding
pub trait StatePersistence: Send + Sync {
	/// Read the stored document, `None` when nothing has been written yet
	fn read(&self) -> Result<Option<String>, StoreError>;

	fn write(&self, data: &str) -> Result<(), StoreError>;

	fn delete(&self) -> Result<(), StoreError>;
}

/// Single-file persistence
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash mid-write leaves the previous document intact.
pub struct FilePersistence {
	path: PathBuf,
}

impl FilePersistence {
	pub fn new(path: impl AsRef<Path>) -> Self {
		Self {
			path: path.as_ref().to_path_buf(),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn temp_path(&self) -> PathBuf {
		let mut name = self
			.path
			.file_name()
			.map(|n| n.to_os_string())
			.unwrap_or_default();
		name.push(".tmp");
		self.path.with_file_name(name)
	}
}

impl StatePersistence for FilePersistence {
	fn read(&self) -> Result<Option<String>, StoreError> {
		match fs::read_to_string(&self.path) {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	fn write(&self, data: &str) -> Result<(), StoreError> {
		if let Some(parent) = self.path.parent()
			&& !parent.as_os_str().is_empty()
		{
			fs::create_dir_all(parent)?;
		}

		let temp = self.temp_path();
		fs::write(&temp, data)?;
		fs::rename(&temp, &self.path)?;
		Ok(())
	}

	fn delete(&self) -> Result<(), StoreError> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

/// In-memory persistence
pub struct MemoryPersistence {
	contents: Mutex<Option<String>>,
}

impl MemoryPersistence {
	pub fn new() -> Self {
		Self {
			contents: Mutex::new(None),
		}
	}

	pub fn with_contents(data: impl Into<String>) -> Self {
		Self {
			contents: Mutex::new(Some(data.into())),
		}
	}

	/// Last written document
	pub fn contents(&self) -> Option<String> {
		self.contents
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.clone()
	}
}

impl Default for MemoryPersistence {
	fn default() -> Self {
		Self::new()
	}
}

impl StatePersistence for MemoryPersistence {
	fn read(&self) -> Result<Option<String>, StoreError> {
		Ok(self.contents())
	}

	fn write(&self, data: &str) -> Result<(), StoreError> {
		*self
			.contents
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(data.to_string());
		Ok(())
	}

	fn delete(&self) -> Result<(), StoreError> {
		*self
			.contents
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
		Ok(())
	}
}
