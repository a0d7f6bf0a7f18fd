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

//! Observation of committed state changes.

use arbor_core::ItemId;

use crate::state::ItemState;

/// One committed change, observed after a successful
/// [`crate::ItemStateStore::apply`].
#[derive(Debug, Clone)]
pub enum StateChange {
	/// A state was committed for the first time.
	Created(ItemState),
	/// A state was overwritten.
	Modified(ItemState),
	/// A state was deleted.
	Destroyed(ItemId),
}

/// Callback interface for committed-change observation.
///
/// Listeners are invoked after the store's write lock is released, in
/// registration order, on the committing thread.
pub trait StateListener: Send + Sync {
	/// One committed change.
	fn on_state_change(&self, change: &StateChange);
}
