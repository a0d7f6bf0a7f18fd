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

//! The persistent item-state store shared by all sessions.

use std::collections::BTreeSet;
use std::sync::Arc;

use fnv::FnvHashMap;
use log::trace;
use parking_lot::RwLock;

use arbor_core::{ItemId, NodeId, PropertyId, Value};

use crate::change_log::ChangeLog;
use crate::event::{StateChange, StateListener};
use crate::state::ItemState;
use crate::status::ItemStatus;

/// Errors raised by an item-state store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateError {
	/// The id does not resolve to a stored state.
	#[error("no such item state: {0}")]
	NoSuchItemState(ItemId),
	/// The caller's base state no longer matches the stored one.
	#[error("stale item state: {0}")]
	Stale(ItemId),
	/// A state to add is already stored.
	#[error("item state already exists: {0}")]
	Exists(ItemId),
	/// Any other store failure.
	#[error("item state store: {0}")]
	Store(String),
}

/// Contract of the durable item-state layer.
///
/// `apply` is the only write path and must be atomic: either the whole
/// change log becomes visible or none of it does.
pub trait ItemStateStore: Send + Sync {
	/// Load a state snapshot.
	fn get(&self, id: &ItemId) -> Result<ItemState, StateError>;

	/// Whether a state is stored under the id.
	fn has(&self, id: &ItemId) -> bool;

	/// Ids of the `Reference` properties pointing at the node.
	fn node_references(&self, id: NodeId) -> Vec<PropertyId>;

	/// Whether any `Reference` property points at the node.
	fn has_node_references(&self, id: NodeId) -> bool {
		!self.node_references(id).is_empty()
	}

	/// Commit a change log atomically.
	fn apply(&self, log: ChangeLog) -> Result<(), StateError>;

	/// Register a committed-change observer.
	fn add_listener(&self, listener: Arc<dyn StateListener>);
}

#[derive(Default)]
struct StoreInner {
	states: FnvHashMap<ItemId, ItemState>,
	references: FnvHashMap<NodeId, BTreeSet<PropertyId>>,
}

impl StoreInner {
	fn reference_targets(state: &ItemState) -> Vec<NodeId> {
		state
			.property()
			.map(|prop| prop.values.iter().filter_map(Value::as_reference).collect())
			.unwrap_or_default()
	}

	fn index_references(&mut self, state: &ItemState) {
		if let Some(prop) = state.property() {
			for target in Self::reference_targets(state) {
				self.references.entry(target).or_default().insert(prop.id().clone());
			}
		}
	}

	fn unindex_references(&mut self, state: &ItemState) {
		if let Some(prop) = state.property() {
			for target in Self::reference_targets(state) {
				if let Some(sources) = self.references.get_mut(&target) {
					sources.remove(prop.id());
					if sources.is_empty() {
						self.references.remove(&target);
					}
				}
			}
		}
	}
}

/// In-memory implementation of [`ItemStateStore`].
///
/// One instance backs every session of a repository. Staleness is detected
/// through the `mod_count` stamp: a commit whose base count differs from
/// the stored one is rejected with [`StateError::Stale`].
#[derive(Default)]
pub struct SharedItemStateManager {
	inner: RwLock<StoreInner>,
	listeners: RwLock<Vec<Arc<dyn StateListener>>>,
}

impl SharedItemStateManager {
	/// An empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of stored states.
	pub fn len(&self) -> usize {
		self.inner.read().states.len()
	}

	/// Whether the store holds no states.
	pub fn is_empty(&self) -> bool {
		self.inner.read().states.is_empty()
	}

	fn validate(inner: &StoreInner, log: &ChangeLog) -> Result<(), StateError> {
		for state in &log.added {
			let id = state.id();
			// deletions run first, so an id deleted by this same log may
			// be re-added by it
			if inner.states.contains_key(&id)
				&& !log.deleted.iter().any(|deleted| deleted.id() == id)
			{
				return Err(StateError::Exists(id));
			}
		}
		for state in log.modified.iter().chain(&log.deleted) {
			let id = state.id();
			let stored = inner
				.states
				.get(&id)
				.ok_or_else(|| StateError::NoSuchItemState(id.clone()))?;
			if stored.mod_count != state.mod_count {
				return Err(StateError::Stale(id));
			}
		}
		Ok(())
	}
}

impl ItemStateStore for SharedItemStateManager {
	fn get(&self, id: &ItemId) -> Result<ItemState, StateError> {
		self.inner
			.read()
			.states
			.get(id)
			.cloned()
			.ok_or_else(|| StateError::NoSuchItemState(id.clone()))
	}

	fn has(&self, id: &ItemId) -> bool {
		self.inner.read().states.contains_key(id)
	}

	fn node_references(&self, id: NodeId) -> Vec<PropertyId> {
		self.inner
			.read()
			.references
			.get(&id)
			.map(|sources| sources.iter().cloned().collect())
			.unwrap_or_default()
	}

	fn apply(&self, log: ChangeLog) -> Result<(), StateError> {
		let mut events = Vec::with_capacity(log.len());
		{
			let mut inner = self.inner.write();
			// All-or-nothing: every failure mode is checked before the
			// first mutation.
			Self::validate(&inner, &log)?;
			trace!(
				target: "state",
				"applying change log: {} added, {} modified, {} deleted",
				log.added.len(), log.modified.len(), log.deleted.len(),
			);

			for state in log.deleted {
				let id = state.id();
				if let Some(old) = inner.states.remove(&id) {
					inner.unindex_references(&old);
				}
				events.push(StateChange::Destroyed(id));
			}
			for mut state in log.modified {
				let id = state.id();
				state.status = ItemStatus::Existing;
				let old = inner.states.get(&id).cloned();
				// the committed stamp derives from the stored twin, never
				// from caller input
				state.mod_count = old
					.as_ref()
					.map(|old| old.mod_count)
					.unwrap_or(state.mod_count)
					.wrapping_add(1);
				if let Some(old) = old {
					inner.unindex_references(&old);
				}
				inner.index_references(&state);
				inner.states.insert(id, state.clone());
				events.push(StateChange::Modified(state));
			}
			for mut state in log.added {
				let id = state.id();
				state.status = ItemStatus::Existing;
				state.mod_count = 0;
				inner.index_references(&state);
				inner.states.insert(id, state.clone());
				events.push(StateChange::Created(state));
			}
		}

		let listeners = self.listeners.read().clone();
		for listener in &listeners {
			for event in &events {
				listener.on_state_change(event);
			}
		}
		Ok(())
	}

	fn add_listener(&self, listener: Arc<dyn StateListener>) {
		self.listeners.write().push(listener);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::{NodeState, PropertyState};
	use arbor_core::{Name, PropertyType};
	use parking_lot::Mutex;

	fn name(s: &str) -> Name {
		Name::parse(s).unwrap()
	}

	fn node_state(parent: Option<NodeId>) -> ItemState {
		ItemState::new_node(NodeState::new(NodeId::random(), name("t"), parent))
	}

	fn reference_prop(parent: NodeId, prop: &str, target: NodeId) -> ItemState {
		let mut state = PropertyState::new(
			PropertyId::new(parent, name(prop)),
			PropertyType::Reference,
			false,
		);
		state.values.push(Value::Reference(target));
		ItemState::new_property(state)
	}

	#[test]
	fn apply_then_get() {
		let store = SharedItemStateManager::new();
		let state = node_state(None);
		let id = state.id();
		store.apply(ChangeLog { added: vec![state], ..Default::default() }).unwrap();

		let loaded = store.get(&id).unwrap();
		assert_eq!(loaded.status, ItemStatus::Existing);
		assert_eq!(loaded.mod_count, 0);
		assert!(store.has(&id));
	}

	#[test]
	fn apply_is_atomic_on_validation_failure() {
		let store = SharedItemStateManager::new();
		let good = node_state(None);
		let missing = node_state(None);
		let log = ChangeLog {
			added: vec![good.clone()],
			deleted: vec![missing],
			..Default::default()
		};
		assert!(matches!(store.apply(log), Err(StateError::NoSuchItemState(_))));
		// nothing from the failed log is visible
		assert!(!store.has(&good.id()));
	}

	#[test]
	fn stale_modification_is_rejected() {
		let store = SharedItemStateManager::new();
		let state = node_state(None);
		let id = state.id();
		store.apply(ChangeLog { added: vec![state], ..Default::default() }).unwrap();

		// two sessions load the same base
		let base_a = store.get(&id).unwrap();
		let base_b = store.get(&id).unwrap();

		store
			.apply(ChangeLog { modified: vec![base_a], ..Default::default() })
			.unwrap();
		let result = store.apply(ChangeLog { modified: vec![base_b], ..Default::default() });
		assert!(matches!(result, Err(StateError::Stale(_))));
	}

	#[test]
	fn reference_index_tracks_property_lifecycle() {
		let store = SharedItemStateManager::new();
		let target = node_state(None);
		let target_id = target.id().node_id().unwrap();
		let holder = node_state(None);
		let holder_id = holder.id().node_id().unwrap();
		let prop = reference_prop(holder_id, "r", target_id);
		let prop_item_id = prop.id();
		store
			.apply(ChangeLog { added: vec![target, holder, prop], ..Default::default() })
			.unwrap();
		assert!(store.has_node_references(target_id));

		// retarget the property; the old index entry goes away
		let mut reloaded = store.get(&prop_item_id).unwrap();
		let other = NodeId::random();
		reloaded.property_mut().unwrap().values = vec![Value::Reference(other)];
		store
			.apply(ChangeLog { modified: vec![reloaded], ..Default::default() })
			.unwrap();
		assert!(!store.has_node_references(target_id));
		assert!(store.has_node_references(other));

		// deleting the property clears the index
		let reloaded = store.get(&prop_item_id).unwrap();
		store
			.apply(ChangeLog { deleted: vec![reloaded], ..Default::default() })
			.unwrap();
		assert!(!store.has_node_references(other));
	}

	#[test]
	fn listeners_observe_committed_changes() {
		struct Recorder(Mutex<Vec<String>>);
		impl StateListener for Recorder {
			fn on_state_change(&self, change: &StateChange) {
				let tag = match change {
					StateChange::Created(_) => "created",
					StateChange::Modified(_) => "modified",
					StateChange::Destroyed(_) => "destroyed",
				};
				self.0.lock().push(tag.to_string());
			}
		}

		let store = SharedItemStateManager::new();
		let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
		store.add_listener(recorder.clone());

		let state = node_state(None);
		let id = state.id();
		store.apply(ChangeLog { added: vec![state], ..Default::default() }).unwrap();
		let loaded = store.get(&id).unwrap();
		store.apply(ChangeLog { modified: vec![loaded], ..Default::default() }).unwrap();
		let loaded = store.get(&id).unwrap();
		store.apply(ChangeLog { deleted: vec![loaded], ..Default::default() }).unwrap();

		assert_eq!(*recorder.0.lock(), vec!["created", "modified", "destroyed"]);
	}
}
