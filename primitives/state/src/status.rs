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

//! The item-state status machine.

use std::fmt;

/// Lifecycle status of an item state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
	/// Created in this session, never committed.
	New,
	/// In sync with the persistent store.
	Existing,
	/// Committed state with uncommitted local modifications.
	ExistingModified,
	/// Committed state scheduled for removal; lives in the attic.
	ExistingRemoved,
	/// Locally modified, but the persistent twin changed underneath.
	/// Terminal for the session; only a refresh recovers.
	StaleModified,
	/// The persistent twin was destroyed underneath local modifications.
	/// Terminal for the session; only a refresh recovers.
	StaleDestroyed,
	/// Disposed; holds no usable data.
	Destroyed,
	/// Not determinable. Unrecoverable.
	Undefined,
}

impl ItemStatus {
	/// Whether the state belongs to a session's transient space.
	pub fn is_transient(self) -> bool {
		matches!(
			self,
			ItemStatus::New
				| ItemStatus::ExistingModified
				| ItemStatus::ExistingRemoved
				| ItemStatus::StaleModified
				| ItemStatus::StaleDestroyed,
		)
	}

	/// Whether the persistent twin moved underneath the session.
	pub fn is_stale(self) -> bool {
		matches!(self, ItemStatus::StaleModified | ItemStatus::StaleDestroyed)
	}

	/// Whether a persistent twin must exist for this status.
	pub fn has_overlayed(self) -> bool {
		matches!(
			self,
			ItemStatus::ExistingModified
				| ItemStatus::ExistingRemoved
				| ItemStatus::StaleModified
				| ItemStatus::StaleDestroyed,
		)
	}

	/// Whether the status machine permits `self → to`.
	pub fn can_transition_to(self, to: ItemStatus) -> bool {
		use ItemStatus::*;
		if self == to {
			return true;
		}
		match self {
			New => matches!(to, Existing | Destroyed),
			Existing => matches!(to, ExistingModified | ExistingRemoved | Destroyed),
			ExistingModified => matches!(to, Existing | StaleModified | StaleDestroyed),
			ExistingRemoved => matches!(to, Destroyed | Existing),
			StaleModified | StaleDestroyed => false,
			Destroyed | Undefined => false,
		}
	}
}

impl fmt::Display for ItemStatus {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let s = match self {
			ItemStatus::New => "NEW",
			ItemStatus::Existing => "EXISTING",
			ItemStatus::ExistingModified => "EXISTING_MODIFIED",
			ItemStatus::ExistingRemoved => "EXISTING_REMOVED",
			ItemStatus::StaleModified => "STALE_MODIFIED",
			ItemStatus::StaleDestroyed => "STALE_DESTROYED",
			ItemStatus::Destroyed => "DESTROYED",
			ItemStatus::Undefined => "UNDEFINED",
		};
		write!(f, "{}", s)
	}
}

#[cfg(test)]
mod tests {
	use super::ItemStatus::*;

	#[test]
	fn stale_states_are_terminal() {
		for to in &[New, Existing, ExistingModified, ExistingRemoved, Destroyed] {
			assert!(!StaleModified.can_transition_to(*to));
			assert!(!StaleDestroyed.can_transition_to(*to));
		}
	}

	#[test]
	fn commit_transitions() {
		assert!(New.can_transition_to(Existing));
		assert!(ExistingModified.can_transition_to(Existing));
		assert!(ExistingRemoved.can_transition_to(Destroyed));
		assert!(!Destroyed.can_transition_to(Existing));
	}

	#[test]
	fn transient_classification() {
		assert!(New.is_transient());
		assert!(ExistingRemoved.is_transient());
		assert!(!Existing.is_transient());
		assert!(!Destroyed.is_transient());
		assert!(StaleModified.is_stale() && StaleModified.is_transient());
	}
}
