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

//! Repository construction and session login.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;

use arbor_core::{well_known as wk, Name, NodeId};
use arbor_nodetype::{builtin, NodeTypeRegistry};
use arbor_state::{
	ChangeLog, ItemState, ItemStateStore, NodeState, SharedItemStateManager, StateListener,
};

use crate::access::{AccessManager, OpenAccess};
use crate::error::{Error, Result};
use crate::lock::{LockManager, MemoryLockManager};
use crate::ops;
use crate::session::{Session, SessionContext, SessionId};
use crate::version::{MemoryVersionManager, VersionManager};

/// A content repository: the shared store, the type registry, the shared
/// managers and the bootstrapped root.
pub struct Repository {
	store: Arc<SharedItemStateManager>,
	registry: Arc<NodeTypeRegistry>,
	access: Arc<dyn AccessManager>,
	locks: Arc<dyn LockManager>,
	versions: Arc<dyn VersionManager>,
	root_id: NodeId,
	next_session: AtomicU64,
}

/// Configures a [`Repository`].
#[derive(Default)]
pub struct RepositoryBuilder {
	access: Option<Arc<dyn AccessManager>>,
	locks: Option<Arc<dyn LockManager>>,
}

impl RepositoryBuilder {
	/// Use the given access manager instead of [`OpenAccess`].
	pub fn access(mut self, access: Arc<dyn AccessManager>) -> Self {
		self.access = Some(access);
		self
	}

	/// Use the given lock manager instead of [`MemoryLockManager`].
	pub fn locks(mut self, locks: Arc<dyn LockManager>) -> Self {
		self.locks = Some(locks);
		self
	}

	/// Build the repository: register the built-in types and bootstrap
	/// the root and the system subtree.
	pub fn build(self) -> Result<Repository> {
		let registry = Arc::new(builtin());
		let store = Arc::new(SharedItemStateManager::new());

		// root
		let mut root = NodeState::new(NodeId::random(), wk::NT_ROOT.clone(), None);
		let root_id = root.id();
		let root_ent = registry.effective(&root.primary_type, &[])?;
		let mut added = ops::auto_created_property_states(&mut root, &root_ent)?;

		// /sys:system/sys:versionStorage
		let system_name = Name::new(wk::NS_SYS, "system");
		let storage_name = Name::new(wk::NS_SYS, "versionStorage");
		let system_def = root_ent.applicable_child_def(
			&system_name,
			Some(&wk::NT_UNSTRUCTURED),
			&registry,
		)?;

		let mut system =
			NodeState::new(NodeId::random(), wk::NT_UNSTRUCTURED.clone(), Some(root_id));
		system.def_id = Some(system_def.id);
		let system_id = system.id();
		root.add_child_entry(system_name, system_id);
		let system_ent = registry.effective(&system.primary_type, &[])?;
		added.extend(ops::auto_created_property_states(&mut system, &system_ent)?);

		let mut storage =
			NodeState::new(NodeId::random(), wk::NT_UNSTRUCTURED.clone(), Some(system_id));
		storage.def_id = Some(
			system_ent
				.applicable_child_def(&storage_name, Some(&wk::NT_UNSTRUCTURED), &registry)?
				.id,
		);
		let storage_id = storage.id();
		system.add_child_entry(storage_name, storage_id);
		added.extend(ops::auto_created_property_states(&mut storage, &system_ent)?);

		added.push(ItemState::new_node(root));
		added.push(ItemState::new_node(system));
		added.push(ItemState::new_node(storage));
		store.apply(ChangeLog { added, ..Default::default() }).map_err(Error::from)?;
		debug!(target: "repository", "bootstrapped root {}", root_id);

		Ok(Repository {
			versions: Arc::new(MemoryVersionManager::new(storage_id, registry.clone())),
			store,
			registry,
			access: self.access.unwrap_or_else(|| Arc::new(OpenAccess)),
			locks: self.locks.unwrap_or_else(|| Arc::new(MemoryLockManager::new())),
			root_id,
			next_session: AtomicU64::new(1),
		})
	}
}

impl Repository {
	/// A repository with default managers (everything granted, in-memory
	/// locks).
	pub fn new() -> Result<Self> {
		Self::builder().build()
	}

	/// A builder for custom managers.
	pub fn builder() -> RepositoryBuilder {
		RepositoryBuilder::default()
	}

	/// Id of the root node.
	pub fn root_id(&self) -> NodeId {
		self.root_id
	}

	/// The shared node-type registry.
	pub fn registry(&self) -> &Arc<NodeTypeRegistry> {
		&self.registry
	}

	/// The shared store. Exposed for observation and tests.
	pub fn store(&self) -> &Arc<SharedItemStateManager> {
		&self.store
	}

	/// Observe committed changes.
	pub fn add_listener(&self, listener: Arc<dyn StateListener>) {
		self.store.add_listener(listener);
	}

	/// Open a new session.
	pub fn login(&self) -> Session {
		let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
		let ctx = SessionContext {
			session_id: id,
			root_id: self.root_id,
			store: self.store.clone(),
			registry: self.registry.clone(),
			access: self.access.clone(),
			locks: self.locks.clone(),
			versions: self.versions.clone(),
		};
		debug!(target: "repository", "session {} opened", id);
		Session::new(Arc::new(ctx))
	}
}
