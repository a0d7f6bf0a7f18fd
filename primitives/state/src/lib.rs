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

//! Item states and the persistent item-state store.
//!
//! A state is the raw typed data of one node or property, stamped with a
//! lifecycle status and an optimistic modification counter. Sessions overlay
//! transient copies of these states on top of a [`SharedItemStateManager`],
//! which commits whole [`ChangeLog`]s atomically and keeps the
//! node-references index current.

#![warn(missing_docs)]

mod change_log;
mod event;
mod state;
mod status;
mod store;

pub use change_log::ChangeLog;
pub use event::{StateChange, StateListener};
pub use state::{ChildEntry, ItemState, NodeState, PropertyState, StateData};
pub use status::ItemStatus;
pub use store::{ItemStateStore, SharedItemStateManager, StateError};
