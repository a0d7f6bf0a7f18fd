// Copyright 2021 Arbor Contributors.
// This file is part of Arbor.

// Arbor is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Arbor is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Arbor.  If not, see <http://www.gnu.org/licenses/>.

//! Per-session item management for the Arbor content repository.
//!
//! A [`Repository`] binds the shared store, the node-type registry and the
//! access/lock/version managers; a [`Session`] overlays its own transient
//! changes on the shared tree, caches the items it hands out, and commits
//! whole subtrees atomically on save. Structural operations that must stay
//! consistent across many states (copy, clone, move, remove) run through
//! the batched-operations layer against a state manager in edit mode.

#![warn(missing_docs)]

mod access;
mod cache;
mod error;
mod events;
mod hierarchy;
mod item;
mod item_mgr;
mod lock;
mod ops;
mod repository;
mod session;
mod state_mgr;
mod version;
mod workspace;

#[cfg(test)]
mod tests;

pub use access::{AccessManager, OpenAccess, PathAccess, Permission};
pub use cache::{ItemCache, ItemData, ItemDataStatus};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use hierarchy::HierarchyManager;
pub use item::{Node, Nodes, Properties, Property};
pub use item_mgr::ItemManager;
pub use lock::{LockManager, MemoryLockManager};
pub use ops::{BatchedOperations, CheckOptions, CopyFlag, CopySource};
pub use repository::{Repository, RepositoryBuilder};
pub use session::{Session, SessionContext, SessionId};
pub use state_mgr::{AtticView, ItemStateProvider, SessionItemStateManager, StoreProvider};
pub use version::{MemoryVersionManager, VersionHistoryInfo, VersionManager};
pub use workspace::Workspace;
