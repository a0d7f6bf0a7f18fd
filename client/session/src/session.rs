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

//! The session: one principal's serialized view of the repository.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use arbor_core::{ItemId, NodeId, Path, PropertyId};
use arbor_nodetype::NodeTypeRegistry;
use arbor_state::ItemStateStore;

use crate::access::AccessManager;
use crate::cache::ItemCache;
use crate::error::{Error, Result};
use crate::item::{self, Node, Property};
use crate::item_mgr::ItemManager;
use crate::lock::LockManager;
use crate::ops::BatchedOperations;
use crate::state_mgr::SessionItemStateManager;
use crate::version::VersionManager;

/// Identifies a session for lock ownership and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(
	/// The raw counter value.
	pub u64,
);

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// The shared services a session operates against.
pub struct SessionContext {
	/// This session's id.
	pub session_id: SessionId,
	/// Id of the repository root node.
	pub root_id: NodeId,
	/// The shared persistent store.
	pub store: Arc<dyn ItemStateStore>,
	/// The shared node-type registry.
	pub registry: Arc<NodeTypeRegistry>,
	/// Access decisions for this session.
	pub access: Arc<dyn AccessManager>,
	/// The shared lock manager.
	pub locks: Arc<dyn LockManager>,
	/// The shared version manager.
	pub versions: Arc<dyn VersionManager>,
}

struct SessionInner {
	states: SessionItemStateManager,
	live: bool,
}

/// The per-session environment handed to item operations.
pub(crate) struct Env<'e> {
	pub ctx: &'e Arc<SessionContext>,
	pub items: &'e ItemManager,
}

/// A repository session.
///
/// All observable mutation is serialized on a per-session re-entrant lock;
/// a session value can be shared across threads, but its operations run one
/// at a time.
pub struct Session {
	ctx: Arc<SessionContext>,
	items: ItemManager,
	inner: ReentrantMutex<RefCell<SessionInner>>,
}

impl Session {
	/// A fresh session over the given context.
	pub fn new(ctx: Arc<SessionContext>) -> Self {
		let cache = Arc::new(ItemCache::new());
		let items = ItemManager::new(ctx.clone(), cache);
		let states = SessionItemStateManager::new(ctx.store.clone());
		Session {
			ctx,
			items,
			inner: ReentrantMutex::new(RefCell::new(SessionInner { states, live: true })),
		}
	}

	/// This session's id.
	pub fn id(&self) -> SessionId {
		self.ctx.session_id
	}

	pub(crate) fn ctx(&self) -> &Arc<SessionContext> {
		&self.ctx
	}

	/// Run `f` under the session lock, then fold the produced state events
	/// into the item cache.
	pub(crate) fn with<R>(
		&self,
		f: impl FnOnce(&mut SessionItemStateManager, &Env<'_>) -> Result<R>,
	) -> Result<R> {
		let guard = self.inner.lock();
		let mut borrow = guard.borrow_mut();
		if !borrow.live {
			return Err(Error::InvalidItemState("session is closed".into()));
		}
		let env = Env { ctx: &self.ctx, items: &self.items };
		let result = f(&mut borrow.states, &env);
		let events = borrow.states.take_events();
		drop(borrow);
		self.items.handle_events(events);
		result
	}

	/// The root node.
	pub fn root(&self) -> Result<Node<'_>> {
		let root_id = self.ctx.root_id;
		let data = self.with(|states, env| env.items.node_by_id(states, root_id))?;
		Ok(Node::new(self, data))
	}

	/// The node at the given absolute path.
	pub fn node(&self, path: &str) -> Result<Node<'_>> {
		let path = parse_path(path)?;
		let data = self.with(|states, env| env.items.node_by_path(states, &path))?;
		Ok(Node::new(self, data))
	}

	/// The property at the given absolute path.
	pub fn property(&self, path: &str) -> Result<Property<'_>> {
		let path = parse_path(path)?;
		let data = self.with(|states, env| env.items.property_by_path(states, &path))?;
		Ok(Property::new(self, data))
	}

	/// The node with the given id.
	pub fn node_by_id(&self, id: NodeId) -> Result<Node<'_>> {
		let data = self.with(|states, env| env.items.node_by_id(states, id))?;
		Ok(Node::new(self, data))
	}

	/// The property with the given id.
	pub fn property_by_id(&self, id: PropertyId) -> Result<Property<'_>> {
		let data = self.with(|states, env| env.items.property_by_id(states, id))?;
		Ok(Property::new(self, data))
	}

	/// The share view of node `id` under `parent`. Fails with `NotFound`
	/// when `parent` is not in the node's shared set.
	pub fn shared_node(&self, id: NodeId, parent: NodeId) -> Result<Node<'_>> {
		let data = self.with(|states, env| env.items.item_data_shared(states, id, parent))?;
		Ok(Node::new(self, data))
	}

	/// Whether a node exists at `path` and is readable. Never fails.
	pub fn node_exists(&self, path: &str) -> bool {
		let path = match parse_path(path) {
			Ok(path) => path,
			Err(_) => return false,
		};
		self.with(|states, env| env.items.node_by_path(states, &path))
			.is_ok()
	}

	/// Whether a property exists at `path` and is readable. Never fails.
	pub fn property_exists(&self, path: &str) -> bool {
		let path = match parse_path(path) {
			Ok(path) => path,
			Err(_) => return false,
		};
		self.with(|states, env| env.items.property_by_path(states, &path))
			.is_ok()
	}

	/// Whether any item exists at `path` and is readable. Never fails.
	pub fn item_exists(&self, path: &str) -> bool {
		let path = match parse_path(path) {
			Ok(path) => path,
			Err(_) => return false,
		};
		self.with(|states, env| Ok(env.items.exists(states, &path)))
			.unwrap_or(false)
	}

	/// Move the node at `src` to `dest` in this session's transient space;
	/// the move becomes durable on save.
	pub fn move_node(&self, src: &str, dest: &str) -> Result<()> {
		let src = parse_path(src)?;
		let dest = parse_path(dest)?;
		self.with(|states, env| {
			states.ensure_edit();
			let mut ops = BatchedOperations::new(states, env.ctx)?;
			ops.move_node(&src, &dest)
		})
	}

	/// Remove the item at `path` in this session's transient space. For a
	/// shareable node the share reached through `path` is unlinked.
	pub fn remove(&self, path: &str) -> Result<()> {
		let parsed = parse_path(path)?;
		self.with(|states, env| {
			let hier = crate::hierarchy::HierarchyManager::new(&*states, env.ctx.root_id);
			match hier.resolve_path(&parsed)? {
				Some(ItemId::Node(node)) => {
					let parent_path =
						parsed.parent().ok_or_else(|| {
							Error::Repository("cannot remove the root node".into())
						})?;
					let parent = hier
						.resolve_node_path(&parent_path)?
						.ok_or_else(|| Error::NotFound(parent_path.to_string()))?;
					item::remove_node_from_impl(states, env, parent, node)
				},
				Some(ItemId::Property(prop)) => {
					item::remove_property_impl(states, env, prop.parent, &prop.name, false)
				},
				None => Err(Error::NotFound(parsed.to_string())),
			}
		})
	}

	/// Persist every transient change of this session.
	pub fn save(&self) -> Result<()> {
		let root_id = self.ctx.root_id;
		self.with(|states, env| item::save_item(states, env, &ItemId::Node(root_id)))
	}

	/// Discard (or, with `keep_changes`, keep) every transient change.
	pub fn refresh(&self, keep_changes: bool) -> Result<()> {
		let root_id = self.ctx.root_id;
		self.with(|states, env| {
			item::refresh_item(states, env, &ItemId::Node(root_id), keep_changes)
		})
	}

	/// Whether the session carries uncommitted changes.
	pub fn has_pending_changes(&self) -> bool {
		self.with(|states, _| Ok(states.has_any_transient())).unwrap_or(false)
	}

	/// End the session: discard transient changes and invalidate every
	/// outstanding item.
	pub fn logout(&self) {
		let guard = self.inner.lock();
		let mut borrow = guard.borrow_mut();
		if !borrow.live {
			return;
		}
		borrow.states.cancel();
		borrow.states.take_events();
		borrow.live = false;
		drop(borrow);
		self.items.cache().clear();
	}

	/// Whether the session is still usable.
	pub fn is_live(&self) -> bool {
		let guard = self.inner.lock();
		let borrow = guard.borrow();
		borrow.live
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		self.logout();
	}
}

pub(crate) fn parse_path(path: &str) -> Result<Path> {
	Path::parse(path).map_err(|err| Error::Repository(format!("bad path {:?}: {}", path, err)))
}
