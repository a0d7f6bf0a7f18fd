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

//! Node and property states.

use std::collections::BTreeSet;

use arbor_core::{ItemId, Name, NodeId, PropertyId, PropertyType, Value};
use arbor_nodetype::{NodeDefId, PropDefId};

use crate::status::ItemStatus;

/// One ordered child-node entry of a parent node.
///
/// Entries of the same name form a group whose indices are kept contiguous
/// `1..=k`; the maintenance lives in [`NodeState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
	/// Child name.
	pub name: Name,
	/// 1-based index within the same-name group.
	pub index: u32,
	/// Id of the child node.
	pub id: NodeId,
}

/// The raw data of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
	id: NodeId,
	/// Primary type name.
	pub primary_type: Name,
	/// Mixin type names.
	pub mixins: BTreeSet<Name>,
	/// The child-node definition this node was created under. `None` only
	/// for the root.
	pub def_id: Option<NodeDefId>,
	/// Primary parent. `None` only for the root.
	pub parent: Option<NodeId>,
	/// Names of the properties attached to this node.
	pub property_names: BTreeSet<Name>,
	/// All parents of a shareable node, the primary one included.
	/// `None` for non-shareable nodes.
	pub shared_set: Option<BTreeSet<NodeId>>,
	child_entries: Vec<ChildEntry>,
}

impl NodeState {
	/// A node with no children, properties or mixins.
	pub fn new(id: NodeId, primary_type: Name, parent: Option<NodeId>) -> Self {
		NodeState {
			id,
			primary_type,
			mixins: BTreeSet::new(),
			def_id: None,
			parent,
			property_names: BTreeSet::new(),
			shared_set: None,
			child_entries: Vec::new(),
		}
	}

	/// The node id.
	pub fn id(&self) -> NodeId {
		self.id
	}

	/// The ordered child entries.
	pub fn child_entries(&self) -> &[ChildEntry] {
		&self.child_entries
	}

	/// The entries of one name group, in index order.
	pub fn child_entries_named<'a>(
		&'a self,
		name: &'a Name,
	) -> impl Iterator<Item = &'a ChildEntry> {
		self.child_entries.iter().filter(move |entry| &entry.name == name)
	}

	/// Entry lookup by name and 1-based index.
	pub fn child_entry(&self, name: &Name, index: u32) -> Option<&ChildEntry> {
		self.child_entries
			.iter()
			.find(|entry| &entry.name == name && entry.index == index)
	}

	/// First entry carrying the given child id.
	pub fn child_entry_by_id(&self, id: NodeId) -> Option<&ChildEntry> {
		self.child_entries.iter().find(|entry| entry.id == id)
	}

	/// Whether any child entry carries the given name.
	pub fn has_child_entry_named(&self, name: &Name) -> bool {
		self.child_entries.iter().any(|entry| &entry.name == name)
	}

	/// Whether the node has any child entries.
	pub fn has_child_entries(&self) -> bool {
		!self.child_entries.is_empty()
	}

	/// Append a child entry, assigning the next index of its name group.
	pub fn add_child_entry(&mut self, name: Name, id: NodeId) -> ChildEntry {
		let index = self.child_entries_named(&name).count() as u32 + 1;
		let entry = ChildEntry { name, index, id };
		self.child_entries.push(entry.clone());
		entry
	}

	/// Remove the entry carrying `id`, renumbering its name group so the
	/// indices stay contiguous. Returns the removed entry.
	pub fn remove_child_entry_by_id(&mut self, id: NodeId) -> Option<ChildEntry> {
		let pos = self.child_entries.iter().position(|entry| entry.id == id)?;
		Some(self.remove_child_entry_at(pos))
	}

	/// Remove the entry at `(name, index)`, renumbering the group.
	pub fn remove_child_entry(&mut self, name: &Name, index: u32) -> Option<ChildEntry> {
		let pos = self
			.child_entries
			.iter()
			.position(|entry| &entry.name == name && entry.index == index)?;
		Some(self.remove_child_entry_at(pos))
	}

	fn remove_child_entry_at(&mut self, pos: usize) -> ChildEntry {
		let removed = self.child_entries.remove(pos);
		for entry in &mut self.child_entries {
			if entry.name == removed.name && entry.index > removed.index {
				entry.index -= 1;
			}
		}
		removed
	}

	/// Rename the entry carrying `id` in place: it keeps its position in
	/// the ordered list, leaves its old name group renumbered and joins the
	/// end of the new group. Returns the new entry.
	pub fn rename_child_entry(&mut self, id: NodeId, new_name: Name) -> Option<ChildEntry> {
		let pos = self.child_entries.iter().position(|entry| entry.id == id)?;
		let old = self.child_entries[pos].clone();
		let new_index = self.child_entries_named(&new_name).count() as u32 + 1;
		for entry in &mut self.child_entries {
			if entry.name == old.name && entry.index > old.index {
				entry.index -= 1;
			}
		}
		let entry = ChildEntry { name: new_name, index: new_index, id };
		self.child_entries[pos] = entry.clone();
		Some(entry)
	}

	/// Record a property of the given name. Returns whether it was new.
	pub fn add_property_name(&mut self, name: Name) -> bool {
		self.property_names.insert(name)
	}

	/// Forget a property name. Returns whether it was present.
	pub fn remove_property_name(&mut self, name: &Name) -> bool {
		self.property_names.remove(name)
	}

	/// Whether a property of the given name is recorded.
	pub fn has_property_name(&self, name: &Name) -> bool {
		self.property_names.contains(name)
	}

	/// Whether the node is shareable (has a shared-parent set).
	pub fn is_shareable(&self) -> bool {
		self.shared_set.is_some()
	}

	/// Initialize the shared-parent set from the current parent.
	pub fn init_shared_set(&mut self) {
		let mut set = BTreeSet::new();
		if let Some(parent) = self.parent {
			set.insert(parent);
		}
		self.shared_set = Some(set);
	}

	/// Add a parent to the shared set. Returns false when already present.
	pub fn add_share(&mut self, parent: NodeId) -> bool {
		self.shared_set.get_or_insert_with(BTreeSet::new).insert(parent)
	}

	/// Remove a parent from the shared set. Returns whether it was present.
	pub fn remove_share(&mut self, parent: NodeId) -> bool {
		self.shared_set.as_mut().map(|set| set.remove(&parent)).unwrap_or(false)
	}

	/// Whether `parent` is in the shared set (or is the primary parent of
	/// a non-shareable node).
	pub fn is_shared_with(&self, parent: NodeId) -> bool {
		match &self.shared_set {
			Some(set) => set.contains(&parent),
			None => self.parent == Some(parent),
		}
	}
}

/// The raw data of a property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyState {
	id: PropertyId,
	/// Value type.
	pub ty: PropertyType,
	/// Whether the property holds a list of values.
	pub multi_valued: bool,
	/// The values; exactly one for single-valued properties.
	pub values: Vec<Value>,
	/// The property definition this property was created under.
	pub def_id: Option<PropDefId>,
}

impl PropertyState {
	/// A property with no values yet.
	pub fn new(id: PropertyId, ty: PropertyType, multi_valued: bool) -> Self {
		PropertyState { id, ty, multi_valued, values: Vec::new(), def_id: None }
	}

	/// The property id.
	pub fn id(&self) -> &PropertyId {
		&self.id
	}

	/// The owning node.
	pub fn parent(&self) -> NodeId {
		self.id.parent
	}

	/// The property name.
	pub fn name(&self) -> &Name {
		&self.id.name
	}

	/// The single value of a single-valued property.
	pub fn value(&self) -> Option<&Value> {
		if self.multi_valued {
			None
		} else {
			self.values.first()
		}
	}
}

/// Node or property data.
#[derive(Debug, Clone, PartialEq)]
pub enum StateData {
	/// A node.
	Node(NodeState),
	/// A property.
	Property(PropertyState),
}

/// An item state: data plus lifecycle status and modification stamp.
///
/// The `mod_count` is the optimistic concurrency token: transient states
/// remember the persistent twin's count at load, and the store rejects a
/// commit whose base count no longer matches.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemState {
	/// Lifecycle status.
	pub status: ItemStatus,
	/// Modification stamp of the persistent twin this state was loaded
	/// from; 0 for states never committed.
	pub mod_count: u32,
	/// The data.
	pub data: StateData,
}

impl ItemState {
	/// Wrap a node state with status `New`.
	pub fn new_node(node: NodeState) -> Self {
		ItemState { status: ItemStatus::New, mod_count: 0, data: StateData::Node(node) }
	}

	/// Wrap a property state with status `New`.
	pub fn new_property(prop: PropertyState) -> Self {
		ItemState { status: ItemStatus::New, mod_count: 0, data: StateData::Property(prop) }
	}

	/// Builder-style status override.
	pub fn with_status(mut self, status: ItemStatus) -> Self {
		self.status = status;
		self
	}

	/// The item id.
	pub fn id(&self) -> ItemId {
		match &self.data {
			StateData::Node(node) => ItemId::Node(node.id()),
			StateData::Property(prop) => ItemId::Property(prop.id().clone()),
		}
	}

	/// The primary parent id; `None` for the root node.
	pub fn parent_id(&self) -> Option<NodeId> {
		match &self.data {
			StateData::Node(node) => node.parent,
			StateData::Property(prop) => Some(prop.parent()),
		}
	}

	/// Whether this is a node state.
	pub fn is_node(&self) -> bool {
		matches!(self.data, StateData::Node(_))
	}

	/// The node data, if any.
	pub fn node(&self) -> Option<&NodeState> {
		match &self.data {
			StateData::Node(node) => Some(node),
			StateData::Property(_) => None,
		}
	}

	/// Mutable node data, if any.
	pub fn node_mut(&mut self) -> Option<&mut NodeState> {
		match &mut self.data {
			StateData::Node(node) => Some(node),
			StateData::Property(_) => None,
		}
	}

	/// The property data, if any.
	pub fn property(&self) -> Option<&PropertyState> {
		match &self.data {
			StateData::Node(_) => None,
			StateData::Property(prop) => Some(prop),
		}
	}

	/// Mutable property data, if any.
	pub fn property_mut(&mut self) -> Option<&mut PropertyState> {
		match &mut self.data {
			StateData::Node(_) => None,
			StateData::Property(prop) => Some(prop),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn name(s: &str) -> Name {
		Name::parse(s).unwrap()
	}

	fn node() -> NodeState {
		NodeState::new(NodeId::random(), name("sys:unstructured"), Some(NodeId::random()))
	}

	#[test]
	fn sibling_indices_stay_contiguous() {
		let mut state = node();
		let c = name("c");
		let first = state.add_child_entry(c.clone(), NodeId::random());
		let second = state.add_child_entry(c.clone(), NodeId::random());
		let third = state.add_child_entry(c.clone(), NodeId::random());
		assert_eq!((first.index, second.index, third.index), (1, 2, 3));

		state.remove_child_entry(&c, 2).unwrap();
		let indices: Vec<u32> = state.child_entries_named(&c).map(|e| e.index).collect();
		assert_eq!(indices, vec![1, 2]);
		assert_eq!(state.child_entry(&c, 2).unwrap().id, third.id);
	}

	#[test]
	fn interleaved_names_renumber_independently() {
		let mut state = node();
		let a = name("a");
		let b = name("b");
		state.add_child_entry(a.clone(), NodeId::random());
		state.add_child_entry(b.clone(), NodeId::random());
		let a2 = state.add_child_entry(a.clone(), NodeId::random());
		state.remove_child_entry(&a, 1).unwrap();

		assert_eq!(state.child_entry(&a, 1).unwrap().id, a2.id);
		assert_eq!(state.child_entry(&b, 1).map(|e| e.index), Some(1));
		assert_eq!(state.child_entries().len(), 2);
	}

	#[test]
	fn rename_keeps_position_and_renumbers() {
		let mut state = node();
		let a = name("a");
		let b = name("b");
		state.add_child_entry(a.clone(), NodeId::random());
		let target = state.add_child_entry(a.clone(), NodeId::random());
		state.add_child_entry(b.clone(), NodeId::random());

		let renamed = state.rename_child_entry(target.id, b.clone()).unwrap();
		assert_eq!(renamed.index, 2);
		assert_eq!(state.child_entries_named(&a).count(), 1);
		// the renamed entry kept its position in the ordered list
		assert_eq!(state.child_entries()[1].id, target.id);
	}

	#[test]
	fn shared_set_membership() {
		let parent = NodeId::random();
		let mut state = NodeState::new(NodeId::random(), name("t"), Some(parent));
		assert!(state.is_shared_with(parent));
		assert!(!state.is_shareable());

		state.init_shared_set();
		assert!(state.is_shareable());
		assert!(state.is_shared_with(parent));

		let other = NodeId::random();
		assert!(state.add_share(other));
		assert!(!state.add_share(other));
		assert!(state.is_shared_with(other));
		assert!(state.remove_share(other));
		assert!(!state.is_shared_with(other));
	}

	#[test]
	fn item_state_accessors() {
		let node_state = node();
		let id = node_state.id();
		let state = ItemState::new_node(node_state);
		assert_eq!(state.id(), ItemId::Node(id));
		assert_eq!(state.status, ItemStatus::New);
		assert!(state.is_node());

		let prop_id = PropertyId::new(id, name("p"));
		let state = ItemState::new_property(PropertyState::new(
			prop_id.clone(),
			PropertyType::String,
			false,
		));
		assert_eq!(state.parent_id(), Some(id));
		assert_eq!(state.id(), ItemId::Property(prop_id));
	}
}
