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

//! The session item-state manager: the view of the persistent tree
//! overlaid with one session's uncommitted changes.
//!
//! Removed states live in the *attic* until the removal is committed or the
//! session refreshes; disposing an attic state resurrects the item.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use linked_hash_map::LinkedHashMap;
use log::trace;

use arbor_core::{ItemId, NodeId};
use arbor_state::{ChangeLog, ItemState, ItemStateStore, ItemStatus};

use crate::error::{Error, Result};
use crate::events::SessionEvent;

/// Read access to item states, however they are overlaid.
///
/// Implemented by the session manager (transient view), by [`StoreProvider`]
/// (persistent view) and by [`AtticView`] (transient view including removed
/// states).
pub trait ItemStateProvider {
	/// Load the state under `id`.
	fn state(&self, id: &ItemId) -> Result<ItemState>;

	/// Whether `id` resolves to a state.
	fn has_state(&self, id: &ItemId) -> bool;
}

/// Persistent-only provider over a shared store.
pub struct StoreProvider(
	/// The store to read from.
	pub Arc<dyn ItemStateStore>,
);

impl ItemStateProvider for StoreProvider {
	fn state(&self, id: &ItemId) -> Result<ItemState> {
		Ok(self.0.get(id)?)
	}

	fn has_state(&self, id: &ItemId) -> bool {
		self.0.has(id)
	}
}

/// Transient view that also resolves attic states.
pub struct AtticView<'a>(
	/// The manager to read through.
	pub &'a SessionItemStateManager,
);

impl<'a> ItemStateProvider for AtticView<'a> {
	fn state(&self, id: &ItemId) -> Result<ItemState> {
		self.0.get_with_attic(id)
	}

	fn has_state(&self, id: &ItemId) -> bool {
		self.0.get_with_attic(id).is_ok()
	}
}

/// One session's overlay of transient changes on the shared store.
pub struct SessionItemStateManager {
	store: Arc<dyn ItemStateStore>,
	transient: HashMap<ItemId, ItemState>,
	attic: LinkedHashMap<ItemId, ItemState>,
	editing: bool,
	events: VecDeque<SessionEvent>,
}

impl SessionItemStateManager {
	/// A manager with no transient changes.
	pub fn new(store: Arc<dyn ItemStateStore>) -> Self {
		SessionItemStateManager {
			store,
			transient: HashMap::new(),
			attic: LinkedHashMap::new(),
			editing: false,
			events: VecDeque::new(),
		}
	}

	/// The backing shared store.
	pub fn store(&self) -> &Arc<dyn ItemStateStore> {
		&self.store
	}

	/// The state as this session sees it: transient first, then persistent.
	pub fn get(&self, id: &ItemId) -> Result<ItemState> {
		if let Some(state) = self.transient.get(id) {
			return Ok(state.clone());
		}
		Ok(self.store.get(id)?)
	}

	/// Like [`Self::get`] but also resolving attic states.
	pub fn get_with_attic(&self, id: &ItemId) -> Result<ItemState> {
		if let Some(state) = self.transient.get(id) {
			return Ok(state.clone());
		}
		if let Some(state) = self.attic.get(id) {
			return Ok(state.clone());
		}
		Ok(self.store.get(id)?)
	}

	/// The persistent twin of a state, bypassing the overlay.
	pub fn overlayed(&self, id: &ItemId) -> Result<ItemState> {
		Ok(self.store.get(id)?)
	}

	/// Whether [`Self::get`] would succeed.
	pub fn has(&self, id: &ItemId) -> bool {
		self.transient.contains_key(id) || self.store.has(id)
	}

	/// The transient state, if one exists.
	pub fn transient(&self, id: &ItemId) -> Option<&ItemState> {
		self.transient.get(id)
	}

	/// The attic state, if one exists.
	pub fn attic_state(&self, id: &ItemId) -> Option<&ItemState> {
		self.attic.get(id)
	}

	/// Whether a transient (non-attic) state exists for `id`.
	pub fn has_transient(&self, id: &ItemId) -> bool {
		self.transient.contains_key(id)
	}

	/// Whether an attic state exists for `id`.
	pub fn has_transient_in_attic(&self, id: &ItemId) -> bool {
		self.attic.contains_key(id)
	}

	/// Whether the session carries any uncommitted change.
	pub fn has_any_transient(&self) -> bool {
		!self.transient.is_empty() || !self.attic.is_empty()
	}

	/// Enter edit mode. Illegal when already editing.
	pub fn edit(&mut self) -> Result<()> {
		if self.editing {
			return Err(Error::Repository("already in edit mode".into()));
		}
		self.editing = true;
		Ok(())
	}

	/// Whether the manager is in edit mode.
	pub fn in_edit(&self) -> bool {
		self.editing
	}

	/// Enter edit mode unless already entered.
	pub fn ensure_edit(&mut self) {
		self.editing = true;
	}

	/// Record a mutation. Legal only in edit mode.
	///
	/// `Existing` states become `ExistingModified`; `New` states stay
	/// `New`. Storing the same state twice per edit is idempotent.
	pub fn store_state(&mut self, mut state: ItemState) -> Result<()> {
		if !self.editing {
			return Err(Error::Repository("store outside edit mode".into()));
		}
		match state.status {
			ItemStatus::New | ItemStatus::ExistingModified => (),
			ItemStatus::Existing => state.status = ItemStatus::ExistingModified,
			other => {
				return Err(Error::InvalidItemState(format!(
					"cannot store state {} with status {}",
					state.id(),
					other,
				)))
			},
		}
		let id = state.id();
		let event = if self.transient.insert(id.clone(), state).is_some() {
			SessionEvent::Modified(id)
		} else {
			SessionEvent::Created(id)
		};
		self.events.push_back(event);
		Ok(())
	}

	/// Schedule removal. `New` states are fully disposed; committed states
	/// move to the attic with status `ExistingRemoved`.
	pub fn destroy(&mut self, id: &ItemId) -> Result<()> {
		if !self.editing {
			return Err(Error::Repository("destroy outside edit mode".into()));
		}
		if self.attic.contains_key(id) {
			return Ok(());
		}
		let state = match self.transient.remove(id) {
			Some(state) => state,
			None => self.store.get(id)?,
		};
		match state.status {
			ItemStatus::New => {
				trace!(target: "session", "disposing new state {}", id);
			},
			ItemStatus::Existing | ItemStatus::ExistingModified => {
				let mut atticked = state;
				atticked.status = ItemStatus::ExistingRemoved;
				self.attic.insert(id.clone(), atticked);
			},
			other => {
				return Err(Error::InvalidItemState(format!(
					"cannot destroy state {} with status {}",
					id, other,
				)))
			},
		}
		self.events.push_back(SessionEvent::Destroyed(id.clone()));
		Ok(())
	}

	/// Drop a single transient state without committing it.
	pub fn dispose_transient(&mut self, id: &ItemId) -> Option<ItemState> {
		let state = self.transient.remove(id)?;
		self.events.push_back(SessionEvent::Discarded {
			id: id.clone(),
			status: state.status,
			from_attic: false,
		});
		if !self.has_any_transient() {
			self.editing = false;
		}
		Some(state)
	}

	/// Drop a single attic state, resurrecting the removed item.
	pub fn dispose_transient_in_attic(&mut self, id: &ItemId) -> Option<ItemState> {
		let state = self.attic.remove(id)?;
		self.events.push_back(SessionEvent::Discarded {
			id: id.clone(),
			status: state.status,
			from_attic: true,
		});
		if !self.has_any_transient() {
			self.editing = false;
		}
		Some(state)
	}

	/// Ids of the transient states in the subtree under `root`, the root
	/// itself excluded, in depth-first pre-order of the overlay view.
	pub fn descendant_transients(&self, root: NodeId) -> Vec<ItemId> {
		let mut out = Vec::new();
		self.collect_descendants(root, &mut out);
		out
	}

	fn collect_descendants(&self, node: NodeId, out: &mut Vec<ItemId>) {
		let state = match self.get(&ItemId::Node(node)) {
			Ok(state) => state,
			Err(_) => return,
		};
		let node_state = match state.node() {
			Some(node_state) => node_state,
			None => return,
		};
		for name in &node_state.property_names {
			let id = ItemId::Property(arbor_core::PropertyId::new(node, name.clone()));
			if self.transient.contains_key(&id) {
				out.push(id);
			}
		}
		for entry in node_state.child_entries() {
			let id = ItemId::Node(entry.id);
			if self.transient.contains_key(&id) {
				out.push(id.clone());
			}
			self.collect_descendants(entry.id, out);
		}
	}

	/// Ids of the attic states whose (removed) ancestry passes through
	/// `root`, in attic insertion order.
	pub fn descendant_transients_in_attic(&self, root: NodeId) -> Vec<ItemId> {
		self.attic
			.iter()
			.filter(|(id, state)| **id != ItemId::Node(root) && {
				let mut current = state.parent_id();
				let mut hops = 0usize;
				loop {
					match current {
						Some(parent) if parent == root => break true,
						Some(parent) => {
							hops += 1;
							if hops > 1024 {
								break false;
							}
							current = self
								.get_with_attic(&ItemId::Node(parent))
								.ok()
								.and_then(|s| s.parent_id());
						},
						None => break false,
					}
				}
			})
			.map(|(id, _)| id.clone())
			.collect()
	}

	/// Commit every transient change atomically and leave edit mode.
	///
	/// On failure nothing is applied and the transient space is untouched.
	pub fn update(&mut self) -> Result<()> {
		let mut log = ChangeLog::new();
		for state in self.attic.values() {
			log.deleted.push(state.clone());
		}
		for state in self.transient.values() {
			match state.status {
				ItemStatus::New => log.added.push(state.clone()),
				ItemStatus::ExistingModified => log.modified.push(state.clone()),
				other => {
					return Err(Error::InvalidItemState(format!(
						"cannot commit state {} with status {}",
						state.id(),
						other,
					)))
				},
			}
		}
		trace!(target: "session", "update: committing {} changes", log.len());
		self.store.apply(log)?;
		self.transient.clear();
		self.attic.clear();
		self.editing = false;
		Ok(())
	}

	/// Discard every transient change and leave edit mode.
	pub fn cancel(&mut self) {
		let transient: Vec<ItemId> = self.transient.keys().cloned().collect();
		for id in transient {
			self.dispose_transient(&id);
		}
		let attic: Vec<ItemId> = self.attic.keys().cloned().collect();
		for id in attic {
			self.dispose_transient_in_attic(&id);
		}
		self.editing = false;
	}

	/// Drop a transient state that was just committed. Unlike
	/// [`Self::dispose_transient`] this fires no discard event: the state
	/// was not thrown away, it became persistent.
	pub fn commit_transient(&mut self, id: &ItemId) -> Option<ItemState> {
		let state = self.transient.remove(id);
		if !self.has_any_transient() {
			self.editing = false;
		}
		state
	}

	/// Drop an attic state whose removal was just committed.
	pub fn commit_attic(&mut self, id: &ItemId) -> Option<ItemState> {
		let state = self.attic.remove(id);
		if !self.has_any_transient() {
			self.editing = false;
		}
		state
	}

	/// Mark a transient state stale: the persistent twin moved (or went
	/// away) underneath the session.
	pub fn mark_stale(&mut self, id: &ItemId, destroyed: bool) {
		let status = if destroyed {
			ItemStatus::StaleDestroyed
		} else {
			ItemStatus::StaleModified
		};
		if let Some(state) = self.transient.get_mut(id) {
			state.status = status;
		} else if let Some(state) = self.attic.get_mut(id) {
			state.status = status;
		}
	}

	/// Drain the queued lifecycle events.
	pub fn take_events(&mut self) -> Vec<SessionEvent> {
		self.events.drain(..).collect()
	}
}

impl ItemStateProvider for SessionItemStateManager {
	fn state(&self, id: &ItemId) -> Result<ItemState> {
		self.get(id)
	}

	fn has_state(&self, id: &ItemId) -> bool {
		self.has(id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use arbor_core::Name;
	use arbor_state::{NodeState, SharedItemStateManager};

	fn name(s: &str) -> Name {
		Name::parse(s).unwrap()
	}

	fn manager_with_root() -> (SessionItemStateManager, NodeId) {
		let store = Arc::new(SharedItemStateManager::new());
		let root = NodeState::new(NodeId::random(), name("sys:root"), None);
		let root_id = root.id();
		store
			.apply(ChangeLog {
				added: vec![ItemState::new_node(root)],
				..Default::default()
			})
			.unwrap();
		(SessionItemStateManager::new(store), root_id)
	}

	fn new_child(mgr: &mut SessionItemStateManager, parent: NodeId) -> NodeId {
		let child = NodeState::new(NodeId::random(), name("t"), Some(parent));
		let child_id = child.id();
		let mut parent_state = mgr.get(&ItemId::Node(parent)).unwrap();
		parent_state
			.node_mut()
			.unwrap()
			.add_child_entry(name("c"), child_id);
		mgr.store_state(parent_state).unwrap();
		mgr.store_state(ItemState::new_node(child)).unwrap();
		child_id
	}

	#[test]
	fn store_requires_edit_mode() {
		let (mut mgr, root) = manager_with_root();
		let state = mgr.get(&ItemId::Node(root)).unwrap();
		assert!(matches!(mgr.store_state(state), Err(Error::Repository(_))));
	}

	#[test]
	fn double_edit_is_rejected() {
		let (mut mgr, _) = manager_with_root();
		mgr.edit().unwrap();
		assert!(mgr.edit().is_err());
	}

	#[test]
	fn transient_overlays_persistent() {
		let (mut mgr, root) = manager_with_root();
		mgr.edit().unwrap();
		let child = new_child(&mut mgr, root);

		// overlay view sees the child entry, the store does not
		let overlaid = mgr.get(&ItemId::Node(root)).unwrap();
		assert_eq!(overlaid.node().unwrap().child_entries().len(), 1);
		assert_eq!(overlaid.status, ItemStatus::ExistingModified);
		let persistent = mgr.overlayed(&ItemId::Node(root)).unwrap();
		assert!(!persistent.node().unwrap().has_child_entries());
		assert!(mgr.has(&ItemId::Node(child)));
	}

	#[test]
	fn destroy_new_disposes_destroy_existing_attics() {
		let (mut mgr, root) = manager_with_root();
		mgr.edit().unwrap();
		let child = new_child(&mut mgr, root);

		mgr.destroy(&ItemId::Node(child)).unwrap();
		assert!(!mgr.has_transient(&ItemId::Node(child)));
		assert!(!mgr.has_transient_in_attic(&ItemId::Node(child)));

		mgr.destroy(&ItemId::Node(root)).unwrap();
		let atticked = mgr.attic_state(&ItemId::Node(root)).unwrap();
		assert_eq!(atticked.status, ItemStatus::ExistingRemoved);
		// plain gets fall back to the still-committed persistent state;
		// only the attic view sees the pending removal
		assert_eq!(mgr.get(&ItemId::Node(root)).unwrap().status, ItemStatus::Existing);
		assert_eq!(
			mgr.get_with_attic(&ItemId::Node(root)).unwrap().status,
			ItemStatus::ExistingRemoved,
		);
	}

	#[test]
	fn update_commits_atomically_and_clears() {
		let (mut mgr, root) = manager_with_root();
		mgr.edit().unwrap();
		let child = new_child(&mut mgr, root);

		mgr.update().unwrap();
		assert!(!mgr.has_any_transient());
		assert!(!mgr.in_edit());
		let committed = mgr.store().get(&ItemId::Node(child)).unwrap();
		assert_eq!(committed.status, ItemStatus::Existing);
	}

	#[test]
	fn cancel_discards_everything() {
		let (mut mgr, root) = manager_with_root();
		mgr.edit().unwrap();
		let child = new_child(&mut mgr, root);
		mgr.cancel();

		assert!(!mgr.has_any_transient());
		assert!(!mgr.has(&ItemId::Node(child)));
		let persistent = mgr.get(&ItemId::Node(root)).unwrap();
		assert_eq!(persistent.status, ItemStatus::Existing);
	}

	#[test]
	fn descendant_iteration_covers_transient_closure() {
		let (mut mgr, root) = manager_with_root();
		mgr.edit().unwrap();
		let child = new_child(&mut mgr, root);
		let grandchild = new_child(&mut mgr, child);

		let ids = mgr.descendant_transients(root);
		assert!(ids.contains(&ItemId::Node(child)));
		assert!(ids.contains(&ItemId::Node(grandchild)));
		// pre-order: parent before its children
		let child_pos = ids.iter().position(|id| id == &ItemId::Node(child)).unwrap();
		let grand_pos = ids.iter().position(|id| id == &ItemId::Node(grandchild)).unwrap();
		assert!(child_pos < grand_pos);
	}

	#[test]
	fn attic_descendants_resolve_through_removed_ancestry() {
		let (mut mgr, root) = manager_with_root();
		mgr.edit().unwrap();
		let child = new_child(&mut mgr, root);
		mgr.update().unwrap();

		mgr.edit().unwrap();
		// remove the committed child; it moves to the attic
		mgr.destroy(&ItemId::Node(child)).unwrap();
		let ids = mgr.descendant_transients_in_attic(root);
		assert_eq!(ids, vec![ItemId::Node(child)]);

		// disposing the attic state resurrects the child
		mgr.dispose_transient_in_attic(&ItemId::Node(child));
		assert!(mgr.get(&ItemId::Node(child)).is_ok());
	}
}
