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

//! The per-session item cache and the shareable-nodes index.
//!
//! Values are weak: an item the session no longer references is collected,
//! and a later lookup recreates it from its state. The shareable index maps
//! a node id to one cached view per share parent, so the same underlying
//! node can be materialized under every parent it is reachable from.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use fnv::FnvHashMap;
use log::trace;
use parking_lot::Mutex;

use arbor_core::{ItemId, NodeId};
use arbor_nodetype::{NodeDefId, PropDefId};

/// View status of a cached item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemDataStatus {
	/// In sync with the session view.
	Normal,
	/// The backing state carries uncommitted modifications.
	Modified,
	/// The backing item no longer exists.
	Destroyed,
	/// Evicted while still referenced; unusable.
	Invalidated,
}

impl ItemDataStatus {
	fn from_u8(raw: u8) -> Self {
		match raw {
			0 => ItemDataStatus::Normal,
			1 => ItemDataStatus::Modified,
			2 => ItemDataStatus::Destroyed,
			_ => ItemDataStatus::Invalidated,
		}
	}

	fn as_u8(self) -> u8 {
		match self {
			ItemDataStatus::Normal => 0,
			ItemDataStatus::Modified => 1,
			ItemDataStatus::Destroyed => 2,
			ItemDataStatus::Invalidated => 3,
		}
	}
}

/// The cached identity of one item view.
///
/// Holds no state data; states live in the session item-state manager and
/// are fetched by id on every access. What is cached is the identity, the
/// definition resolved at materialization and the view status.
#[derive(Debug)]
pub struct ItemData {
	id: ItemId,
	share_parent: Option<NodeId>,
	node_def: Option<NodeDefId>,
	prop_def: Option<PropDefId>,
	status: AtomicU8,
}

impl ItemData {
	/// Data for a regular (non-share-view) item.
	pub fn new(id: ItemId, node_def: Option<NodeDefId>, prop_def: Option<PropDefId>) -> Self {
		ItemData {
			id,
			share_parent: None,
			node_def,
			prop_def,
			status: AtomicU8::new(ItemDataStatus::Normal.as_u8()),
		}
	}

	/// Data for a shareable node viewed under a specific parent.
	pub fn new_shared(id: NodeId, parent: NodeId, node_def: Option<NodeDefId>) -> Self {
		ItemData {
			id: ItemId::Node(id),
			share_parent: Some(parent),
			node_def,
			prop_def: None,
			status: AtomicU8::new(ItemDataStatus::Normal.as_u8()),
		}
	}

	/// The item id.
	pub fn id(&self) -> &ItemId {
		&self.id
	}

	/// The share parent of a shareable view, if any.
	pub fn share_parent(&self) -> Option<NodeId> {
		self.share_parent
	}

	/// The node definition resolved at materialization.
	pub fn node_def(&self) -> Option<NodeDefId> {
		self.node_def
	}

	/// The property definition resolved at materialization.
	pub fn prop_def(&self) -> Option<PropDefId> {
		self.prop_def
	}

	/// Current view status.
	pub fn status(&self) -> ItemDataStatus {
		ItemDataStatus::from_u8(self.status.load(Ordering::Acquire))
	}

	/// Set the view status.
	pub fn set_status(&self, status: ItemDataStatus) {
		self.status.store(status.as_u8(), Ordering::Release);
	}
}

#[derive(Default)]
struct CacheInner {
	items: FnvHashMap<ItemId, Weak<ItemData>>,
	shareable: FnvHashMap<NodeId, FnvHashMap<NodeId, Weak<ItemData>>>,
}

/// Weak-valued cache from item id (and id + share parent) to [`ItemData`].
///
/// One coarse mutex protects both maps; every operation is short.
#[derive(Default)]
pub struct ItemCache {
	inner: Mutex<CacheInner>,
}

impl ItemCache {
	/// An empty cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// Look up by id. For nodes absent from the primary map, the first
	/// live entry of the shareable index is returned.
	pub fn lookup(&self, id: &ItemId) -> Option<Arc<ItemData>> {
		let mut inner = self.inner.lock();
		if let Some(weak) = inner.items.get(id) {
			match weak.upgrade() {
				Some(data) => return Some(data),
				None => {
					inner.items.remove(id);
				},
			}
		}
		if let ItemId::Node(node) = id {
			if let Some(views) = inner.shareable.get_mut(node) {
				views.retain(|_, weak| weak.strong_count() > 0);
				if let Some(data) = views.values().find_map(Weak::upgrade) {
					return Some(data);
				}
			}
		}
		None
	}

	/// Look up the share view of `node` under `parent`.
	pub fn lookup_shared(&self, node: NodeId, parent: NodeId) -> Option<Arc<ItemData>> {
		let mut inner = self.inner.lock();
		let views = inner.shareable.get_mut(&node)?;
		match views.get(&parent)?.upgrade() {
			Some(data) => Some(data),
			None => {
				views.remove(&parent);
				None
			},
		}
	}

	/// Cache an item view. Share views go into the shareable index keyed
	/// by their parent; everything else into the primary map.
	pub fn put(&self, data: &Arc<ItemData>) {
		let mut inner = self.inner.lock();
		match (data.id(), data.share_parent()) {
			(ItemId::Node(node), Some(parent)) => {
				trace!(target: "cache", "caching share view {} under {}", node, parent);
				inner
					.shareable
					.entry(*node)
					.or_default()
					.insert(parent, Arc::downgrade(data));
			},
			(id, _) => {
				inner.items.insert(id.clone(), Arc::downgrade(data));
			},
		}
	}

	/// Remove every entry for `id` from both maps.
	pub fn evict(&self, id: &ItemId) {
		let mut inner = self.inner.lock();
		inner.items.remove(id);
		if let ItemId::Node(node) = id {
			inner.shareable.remove(node);
		}
	}

	/// Remove only the exact entry for `data`: its share-index slot, or
	/// the primary entry when it is identity-equal to the cached one.
	pub fn evict_data(&self, data: &Arc<ItemData>) {
		let mut inner = self.inner.lock();
		match (data.id(), data.share_parent()) {
			(ItemId::Node(node), Some(parent)) => {
				if let Some(views) = inner.shareable.get_mut(node) {
					if let Some(weak) = views.get(&parent) {
						if weak.upgrade().map(|c| Arc::ptr_eq(&c, data)).unwrap_or(true) {
							views.remove(&parent);
						}
					}
					if views.is_empty() {
						inner.shareable.remove(node);
					}
				}
			},
			(id, _) => {
				if let Some(weak) = inner.items.get(id) {
					if weak.upgrade().map(|c| Arc::ptr_eq(&c, data)).unwrap_or(true) {
						inner.items.remove(id);
					}
				}
			},
		}
	}

	/// Mark every cached view of `id` invalidated and drop the entries.
	pub fn invalidate(&self, id: &ItemId) {
		let mut inner = self.inner.lock();
		if let Some(data) = inner.items.remove(id).and_then(|weak| weak.upgrade()) {
			data.set_status(ItemDataStatus::Invalidated);
		}
		if let ItemId::Node(node) = id {
			if let Some(views) = inner.shareable.remove(node) {
				for data in views.values().filter_map(Weak::upgrade) {
					data.set_status(ItemDataStatus::Invalidated);
				}
			}
		}
	}

	/// Invalidate everything. Used on session dispose.
	pub fn clear(&self) {
		let mut inner = self.inner.lock();
		for data in inner.items.values().filter_map(Weak::upgrade) {
			data.set_status(ItemDataStatus::Invalidated);
		}
		for views in inner.shareable.values() {
			for data in views.values().filter_map(Weak::upgrade) {
				data.set_status(ItemDataStatus::Invalidated);
			}
		}
		inner.items.clear();
		inner.shareable.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn data(id: ItemId) -> Arc<ItemData> {
		Arc::new(ItemData::new(id, None, None))
	}

	#[test]
	fn weak_values_are_collected() {
		let cache = ItemCache::new();
		let id = ItemId::Node(NodeId::random());
		let strong = data(id.clone());
		cache.put(&strong);
		assert!(cache.lookup(&id).is_some());

		drop(strong);
		assert!(cache.lookup(&id).is_none());
	}

	#[test]
	fn share_views_are_keyed_by_parent() {
		let cache = ItemCache::new();
		let node = NodeId::random();
		let p1 = NodeId::random();
		let p2 = NodeId::random();
		let v1 = Arc::new(ItemData::new_shared(node, p1, None));
		let v2 = Arc::new(ItemData::new_shared(node, p2, None));
		cache.put(&v1);
		cache.put(&v2);

		assert!(Arc::ptr_eq(&cache.lookup_shared(node, p1).unwrap(), &v1));
		assert!(Arc::ptr_eq(&cache.lookup_shared(node, p2).unwrap(), &v2));
		// the plain lookup falls back to some live share view
		assert!(cache.lookup(&ItemId::Node(node)).is_some());
	}

	#[test]
	fn evict_data_removes_only_the_exact_entry() {
		let cache = ItemCache::new();
		let node = NodeId::random();
		let p1 = NodeId::random();
		let p2 = NodeId::random();
		let v1 = Arc::new(ItemData::new_shared(node, p1, None));
		let v2 = Arc::new(ItemData::new_shared(node, p2, None));
		cache.put(&v1);
		cache.put(&v2);

		cache.evict_data(&v1);
		assert!(cache.lookup_shared(node, p1).is_none());
		assert!(cache.lookup_shared(node, p2).is_some());

		// identity mismatch leaves the cached entry alone
		let id = ItemId::Node(NodeId::random());
		let cached = data(id.clone());
		let imposter = data(id.clone());
		cache.put(&cached);
		cache.evict_data(&imposter);
		assert!(cache.lookup(&id).is_some());
	}

	#[test]
	fn invalidate_marks_live_references() {
		let cache = ItemCache::new();
		let id = ItemId::Node(NodeId::random());
		let strong = data(id.clone());
		cache.put(&strong);

		cache.invalidate(&id);
		assert_eq!(strong.status(), ItemDataStatus::Invalidated);
		assert!(cache.lookup(&id).is_none());
	}

	#[test]
	fn clear_invalidates_everything() {
		let cache = ItemCache::new();
		let a = data(ItemId::Node(NodeId::random()));
		let shared = Arc::new(ItemData::new_shared(NodeId::random(), NodeId::random(), None));
		cache.put(&a);
		cache.put(&shared);

		cache.clear();
		assert_eq!(a.status(), ItemDataStatus::Invalidated);
		assert_eq!(shared.status(), ItemDataStatus::Invalidated);
	}
}
