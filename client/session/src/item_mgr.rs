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

//! The item manager: item materialization, read-access enforcement and the
//! bridge from state events to the item cache.

use std::sync::Arc;

use log::trace;

use arbor_core::{ItemId, Name, NodeId, Path, PropertyId};
use arbor_state::ItemStatus;

use crate::cache::{ItemCache, ItemData, ItemDataStatus};
use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::hierarchy::HierarchyManager;
use crate::session::SessionContext;
use crate::state_mgr::SessionItemStateManager;

/// Materializes item views from states, checks read access and keeps the
/// cache in sync with transient-state lifecycle events.
pub struct ItemManager {
	ctx: Arc<SessionContext>,
	cache: Arc<ItemCache>,
}

impl ItemManager {
	/// A manager over the given context and cache.
	pub fn new(ctx: Arc<SessionContext>, cache: Arc<ItemCache>) -> Self {
		ItemManager { ctx, cache }
	}

	/// The cache this manager maintains.
	pub fn cache(&self) -> &Arc<ItemCache> {
		&self.cache
	}

	/// The cached data for `id`, created from its state when absent.
	/// No access check; callers decide how denial surfaces.
	pub fn item_data(
		&self,
		states: &SessionItemStateManager,
		id: &ItemId,
	) -> Result<Arc<ItemData>> {
		if let Some(data) = self.cache.lookup(id) {
			// cached data whose backing state is gone is treated as absent
			if states.has(id) {
				return Ok(data);
			}
			self.cache.evict(id);
		}
		let state = states.get(id)?;
		let data = match state.node() {
			Some(node) if node.is_shareable() => {
				let parent = node.parent.ok_or_else(|| {
					Error::Repository(format!("shareable node {} has no parent", id))
				})?;
				Arc::new(ItemData::new_shared(node.id(), parent, node.def_id))
			},
			Some(node) => Arc::new(ItemData::new(id.clone(), node.def_id, None)),
			None => {
				let def = state.property().and_then(|prop| prop.def_id);
				Arc::new(ItemData::new(id.clone(), None, def))
			},
		};
		if state.status.is_transient() {
			data.set_status(ItemDataStatus::Modified);
		}
		self.cache.put(&data);
		Ok(data)
	}

	/// The share view of `node` under `parent`. Fails with `NotFound` when
	/// `parent` is not in the node's shared set.
	pub fn item_data_shared(
		&self,
		states: &SessionItemStateManager,
		node: NodeId,
		parent: NodeId,
	) -> Result<Arc<ItemData>> {
		let state = states.get(&ItemId::Node(node))?;
		let node_state = state
			.node()
			.ok_or_else(|| Error::Repository(format!("{} is not a node", node)))?;
		if !node_state.is_shared_with(parent) {
			return Err(Error::NotFound(format!("{} is not shared under {}", node, parent)));
		}
		if let Some(data) = self.cache.lookup_shared(node, parent) {
			return Ok(data);
		}
		let data = Arc::new(ItemData::new_shared(node, parent, node_state.def_id));
		if state.status.is_transient() {
			data.set_status(ItemDataStatus::Modified);
		}
		self.cache.put(&data);
		Ok(data)
	}

	/// Resolve a node by path, enforcing read access. Denial and absence
	/// both surface as `NotFound`.
	pub fn node_by_path(
		&self,
		states: &SessionItemStateManager,
		path: &Path,
	) -> Result<Arc<ItemData>> {
		let hier = HierarchyManager::new(states, self.ctx.root_id);
		let id = hier
			.resolve_node_path(path)?
			.ok_or_else(|| Error::NotFound(path.to_string()))?;
		if !self.ctx.access.can_read(path) {
			// the path was supplied: do not reveal that the node exists
			self.cache.evict(&ItemId::Node(id));
			return Err(Error::NotFound(path.to_string()));
		}
		// a shareable node resolved by path is viewed under the parent the
		// path walked through, not under its primary parent
		let state = states.get(&ItemId::Node(id))?;
		if state.node().map(|node| node.is_shareable()).unwrap_or(false) {
			if let Some(parent_path) = path.parent() {
				if let Some(parent) = hier.resolve_node_path(&parent_path)? {
					return self.item_data_shared(states, id, parent);
				}
			}
		}
		self.item_data(states, &ItemId::Node(id))
	}

	/// Resolve a property by path, enforcing read access.
	pub fn property_by_path(
		&self,
		states: &SessionItemStateManager,
		path: &Path,
	) -> Result<Arc<ItemData>> {
		let hier = HierarchyManager::new(states, self.ctx.root_id);
		let id = hier
			.resolve_property_path(path)?
			.ok_or_else(|| Error::NotFound(path.to_string()))?;
		if !self.ctx.access.can_read(path) {
			self.cache.evict(&ItemId::Property(id.clone()));
			return Err(Error::NotFound(path.to_string()));
		}
		self.item_data(states, &ItemId::Property(id))
	}

	/// Resolve a node by id, enforcing read access. Denial surfaces as
	/// `AccessDenied`; the caller evidently holds the id already.
	pub fn node_by_id(
		&self,
		states: &SessionItemStateManager,
		id: NodeId,
	) -> Result<Arc<ItemData>> {
		let data = self.item_data(states, &ItemId::Node(id))?;
		let hier = HierarchyManager::new(states, self.ctx.root_id);
		let path = hier.path_of(&ItemId::Node(id))?;
		if !self.ctx.access.can_read(&path) {
			self.cache.evict(&ItemId::Node(id));
			return Err(Error::AccessDenied(path.to_string()));
		}
		Ok(data)
	}

	/// Resolve a property by id, enforcing read access like
	/// [`Self::node_by_id`].
	pub fn property_by_id(
		&self,
		states: &SessionItemStateManager,
		id: PropertyId,
	) -> Result<Arc<ItemData>> {
		let item_id = ItemId::Property(id);
		let data = self.item_data(states, &item_id)?;
		let hier = HierarchyManager::new(states, self.ctx.root_id);
		let path = hier.path_of(&item_id)?;
		if !self.ctx.access.can_read(&path) {
			self.cache.evict(&item_id);
			return Err(Error::AccessDenied(path.to_string()));
		}
		Ok(data)
	}

	/// Whether the item at `path` exists and is readable. Never fails.
	pub fn exists(&self, states: &SessionItemStateManager, path: &Path) -> bool {
		self.node_by_path(states, path).is_ok() || self.property_by_path(states, path).is_ok()
	}

	/// Child-node ids of `node` in entry order.
	pub fn child_ids(
		&self,
		states: &SessionItemStateManager,
		node: NodeId,
	) -> Result<Vec<NodeId>> {
		let state = states.get(&ItemId::Node(node))?;
		let node_state = state
			.node()
			.ok_or_else(|| Error::Repository(format!("{} is not a node", node)))?;
		Ok(node_state.child_entries().iter().map(|entry| entry.id).collect())
	}

	/// Property ids of `node` in name order.
	pub fn property_ids(
		&self,
		states: &SessionItemStateManager,
		node: NodeId,
	) -> Result<Vec<PropertyId>> {
		let state = states.get(&ItemId::Node(node))?;
		let node_state = state
			.node()
			.ok_or_else(|| Error::Repository(format!("{} is not a node", node)))?;
		Ok(node_state
			.property_names
			.iter()
			.map(|name: &Name| PropertyId::new(node, name.clone()))
			.collect())
	}

	/// Fold a batch of state events into the cache.
	pub fn handle_events(&self, events: Vec<SessionEvent>) {
		for event in events {
			trace!(target: "session", "event {:?}", event);
			match event {
				SessionEvent::Created(id) => {
					if let Some(data) = self.cache.lookup(&id) {
						data.set_status(ItemDataStatus::Normal);
					}
				},
				SessionEvent::Modified(id) => {
					if let Some(data) = self.cache.lookup(&id) {
						data.set_status(ItemDataStatus::Modified);
					}
				},
				SessionEvent::Destroyed(id) => {
					if let Some(data) = self.cache.lookup(&id) {
						data.set_status(ItemDataStatus::Destroyed);
					}
					self.cache.evict(&id);
				},
				SessionEvent::Discarded { id, status, .. } => match status {
					ItemStatus::ExistingRemoved
					| ItemStatus::ExistingModified
					| ItemStatus::StaleModified => {
						// the persistent state is back in force
						if let Some(data) = self.cache.lookup(&id) {
							data.set_status(ItemDataStatus::Normal);
						}
					},
					ItemStatus::New | ItemStatus::StaleDestroyed => {
						if let Some(data) = self.cache.lookup(&id) {
							data.set_status(ItemDataStatus::Destroyed);
						}
						self.cache.evict(&id);
					},
					_ => self.cache.invalidate(&id),
				},
			}
		}
	}
}
