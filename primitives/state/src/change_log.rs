// This file is part of Arbor.

// Copyright (C) 2021 Arbor Contributors.
// SPDX-License-Identifier: Apache-2.0

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// 	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The unit of atomic commit against the persistent store.

use arbor_core::ItemId;

use crate::state::ItemState;

/// A batch of state changes, applied all-or-nothing by
/// [`crate::ItemStateStore::apply`].
///
/// Insertion order is preserved within each bucket; the store processes
/// deletions first, then modifications, then additions.
#[derive(Debug, Default, Clone)]
pub struct ChangeLog {
	/// States committed for the first time.
	pub added: Vec<ItemState>,
	/// States replacing their persistent twin. `mod_count` must equal the
	/// stored twin's count.
	pub modified: Vec<ItemState>,
	/// States to delete. `mod_count` is checked like for modifications.
	pub deleted: Vec<ItemState>,
}

impl ChangeLog {
	/// An empty change log.
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether the log carries no changes.
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
	}

	/// Number of changes in the log.
	pub fn len(&self) -> usize {
		self.added.len() + self.modified.len() + self.deleted.len()
	}

	/// Whether the log touches the given id.
	pub fn touches(&self, id: &ItemId) -> bool {
		self.added.iter().chain(&self.modified).chain(&self.deleted).any(|s| &s.id() == id)
	}
}
