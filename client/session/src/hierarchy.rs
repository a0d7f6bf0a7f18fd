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

//! Path ↔ id resolution over an item-state provider.

use std::collections::HashSet;

use arbor_core::{ItemId, NodeId, Path, PropertyId};

use crate::error::{Error, Result};
use crate::state_mgr::ItemStateProvider;

/// Resolves paths to ids and back over whatever state view it is given:
/// the session overlay, the persistent store, or the overlay including the
/// attic.
pub struct HierarchyManager<'a> {
	provider: &'a dyn ItemStateProvider,
	root_id: NodeId,
}

impl<'a> HierarchyManager<'a> {
	/// A manager resolving against `provider`, rooted at `root_id`.
	pub fn new(provider: &'a dyn ItemStateProvider, root_id: NodeId) -> Self {
		HierarchyManager { provider, root_id }
	}

	/// The root node id.
	pub fn root_id(&self) -> NodeId {
		self.root_id
	}

	/// Resolve a path to an item id. Nodes shadow properties of the same
	/// name; `None` when nothing matches.
	pub fn resolve_path(&self, path: &Path) -> Result<Option<ItemId>> {
		if let Some(node) = self.resolve_node_path(path)? {
			return Ok(Some(ItemId::Node(node)));
		}
		Ok(self.resolve_property_path(path)?.map(ItemId::Property))
	}

	/// Resolve a path to a node id.
	pub fn resolve_node_path(&self, path: &Path) -> Result<Option<NodeId>> {
		let mut current = self.root_id;
		for element in path.elements() {
			let state = match self.provider.state(&ItemId::Node(current)) {
				Ok(state) => state,
				Err(Error::NotFound(_)) => return Ok(None),
				Err(err) => return Err(err),
			};
			let node = state
				.node()
				.ok_or_else(|| Error::Repository(format!("{} is not a node", current)))?;
			match node.child_entry(element.name(), element.index()) {
				Some(entry) => current = entry.id,
				None => return Ok(None),
			}
		}
		Ok(Some(current))
	}

	/// Resolve a path to a property id. The last element must carry no
	/// sibling index above 1.
	pub fn resolve_property_path(&self, path: &Path) -> Result<Option<PropertyId>> {
		let element = match path.name_element() {
			Some(element) => element,
			None => return Ok(None),
		};
		if element.index() > 1 {
			return Ok(None);
		}
		let parent_path = path.parent().expect("non-root path has a parent; qed");
		let parent = match self.resolve_node_path(&parent_path)? {
			Some(parent) => parent,
			None => return Ok(None),
		};
		let state = match self.provider.state(&ItemId::Node(parent)) {
			Ok(state) => state,
			Err(Error::NotFound(_)) => return Ok(None),
			Err(err) => return Err(err),
		};
		let node = state
			.node()
			.ok_or_else(|| Error::Repository(format!("{} is not a node", parent)))?;
		if node.has_property_name(element.name()) {
			Ok(Some(PropertyId::new(parent, element.name().clone())))
		} else {
			Ok(None)
		}
	}

	/// The path of an item. For shareable nodes this is the primary-parent
	/// path.
	pub fn path_of(&self, id: &ItemId) -> Result<Path> {
		match id {
			ItemId::Node(node) => self.node_path(*node),
			ItemId::Property(prop) => {
				let parent = self.node_path(prop.parent)?;
				Ok(parent.child(prop.name.clone(), 1))
			},
		}
	}

	fn node_path(&self, id: NodeId) -> Result<Path> {
		let mut elements = Vec::new();
		let mut current = id;
		let mut seen = HashSet::new();
		while current != self.root_id {
			if !seen.insert(current) {
				return Err(Error::Repository(format!("parent cycle at {}", current)));
			}
			let state = self.provider.state(&ItemId::Node(current))?;
			let node = state
				.node()
				.ok_or_else(|| Error::Repository(format!("{} is not a node", current)))?;
			let parent = node
				.parent
				.ok_or_else(|| Error::NotFound(format!("{} is not reachable from the root", current)))?;
			let parent_state = self.provider.state(&ItemId::Node(parent))?;
			let parent_node = parent_state
				.node()
				.ok_or_else(|| Error::Repository(format!("{} is not a node", parent)))?;
			let entry = parent_node.child_entry_by_id(current).ok_or_else(|| {
				Error::NotFound(format!("{} is not linked under its parent {}", current, parent))
			})?;
			elements.push((entry.name.clone(), entry.index));
			current = parent;
		}
		let mut path = Path::root();
		for (name, index) in elements.into_iter().rev() {
			path = path.child(name, index);
		}
		Ok(path)
	}

	/// Depth of the item below the root; the root has depth 0.
	pub fn depth_of(&self, id: &ItemId) -> Result<usize> {
		Ok(self.path_of(id)?.depth())
	}

	/// Whether node `ancestor` lies on the primary-parent chain of `item`.
	pub fn is_ancestor(&self, ancestor: NodeId, item: &ItemId) -> Result<bool> {
		let mut current = match item {
			ItemId::Node(node) => {
				if *node == ancestor {
					return Ok(false);
				}
				self.provider.state(item)?.parent_id()
			},
			ItemId::Property(prop) => Some(prop.parent),
		};
		let mut seen = HashSet::new();
		while let Some(node) = current {
			if node == ancestor {
				return Ok(true);
			}
			if !seen.insert(node) {
				return Err(Error::Repository(format!("parent cycle at {}", node)));
			}
			current = self.provider.state(&ItemId::Node(node))?.parent_id();
		}
		Ok(false)
	}

	/// Whether `ancestor` is reachable from `node` walking up through any
	/// parent in the shared-parent sets.
	pub fn is_share_ancestor(&self, ancestor: NodeId, node: NodeId) -> Result<bool> {
		if ancestor == node {
			return Ok(false);
		}
		let mut seen = HashSet::new();
		let mut frontier = vec![node];
		while let Some(current) = frontier.pop() {
			if !seen.insert(current) {
				continue;
			}
			let state = match self.provider.state(&ItemId::Node(current)) {
				Ok(state) => state,
				Err(Error::NotFound(_)) => continue,
				Err(err) => return Err(err),
			};
			let node_state = match state.node() {
				Some(node_state) => node_state,
				None => continue,
			};
			let parents: Vec<NodeId> = match &node_state.shared_set {
				Some(set) => set.iter().copied().collect(),
				None => node_state.parent.into_iter().collect(),
			};
			for parent in parents {
				if parent == ancestor {
					return Ok(true);
				}
				frontier.push(parent);
			}
		}
		Ok(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state_mgr::SessionItemStateManager;
	use arbor_core::Name;
	use arbor_state::{ChangeLog, ItemState, ItemStateStore, NodeState, PropertyState, SharedItemStateManager};
	use arbor_core::PropertyType;
	use std::sync::Arc;

	fn name(s: &str) -> Name {
		Name::parse(s).unwrap()
	}

	struct Fixture {
		mgr: SessionItemStateManager,
		root: NodeId,
		a: NodeId,
		b2: NodeId,
	}

	// Builds `/a`, `/a/b`, `/a/b[2]`, and property `/a/p`.
	fn fixture() -> Fixture {
		let store = Arc::new(SharedItemStateManager::new());
		let mut root = NodeState::new(NodeId::random(), name("sys:root"), None);
		let root_id = root.id();
		let mut a = NodeState::new(NodeId::random(), name("t"), Some(root_id));
		let a_id = a.id();
		root.add_child_entry(name("a"), a_id);
		let b1 = NodeState::new(NodeId::random(), name("t"), Some(a_id));
		let b2 = NodeState::new(NodeId::random(), name("t"), Some(a_id));
		let b2_id = b2.id();
		a.add_child_entry(name("b"), b1.id());
		a.add_child_entry(name("b"), b2_id);
		a.add_property_name(name("p"));
		let prop = PropertyState::new(
			arbor_core::PropertyId::new(a_id, name("p")),
			PropertyType::String,
			false,
		);

		store
			.apply(ChangeLog {
				added: vec![
					ItemState::new_node(root),
					ItemState::new_node(a),
					ItemState::new_node(b1),
					ItemState::new_node(b2),
					ItemState::new_property(prop),
				],
				..Default::default()
			})
			.unwrap();
		Fixture { mgr: SessionItemStateManager::new(store), root: root_id, a: a_id, b2: b2_id }
	}

	fn path(s: &str) -> Path {
		Path::parse(s).unwrap()
	}

	#[test]
	fn resolve_and_round_trip() {
		let fx = fixture();
		let hier = HierarchyManager::new(&fx.mgr, fx.root);

		assert_eq!(hier.resolve_node_path(&path("/")).unwrap(), Some(fx.root));
		assert_eq!(hier.resolve_node_path(&path("/a")).unwrap(), Some(fx.a));
		assert_eq!(hier.resolve_node_path(&path("/a/b[2]")).unwrap(), Some(fx.b2));
		assert_eq!(hier.resolve_node_path(&path("/a/b[3]")).unwrap(), None);
		assert_eq!(hier.resolve_node_path(&path("/missing")).unwrap(), None);

		// round trip: path_of(resolve(p)) == p
		for p in &["/a", "/a/b", "/a/b[2]"] {
			let id = hier.resolve_node_path(&path(p)).unwrap().unwrap();
			assert_eq!(hier.path_of(&ItemId::Node(id)).unwrap(), path(p));
		}
	}

	#[test]
	fn resolve_properties() {
		let fx = fixture();
		let hier = HierarchyManager::new(&fx.mgr, fx.root);

		let prop = hier.resolve_property_path(&path("/a/p")).unwrap().unwrap();
		assert_eq!(prop.parent, fx.a);
		// nodes shadow properties in the generic resolution
		assert!(matches!(
			hier.resolve_path(&path("/a/b")).unwrap(),
			Some(ItemId::Node(_)),
		));
		// a property path never carries a sibling index
		assert_eq!(hier.resolve_property_path(&path("/a/p[2]")).unwrap(), None);
		let prop_path = hier
			.path_of(&ItemId::Property(prop))
			.unwrap();
		assert_eq!(prop_path, path("/a/p"));
	}

	#[test]
	fn depth_and_ancestry() {
		let fx = fixture();
		let hier = HierarchyManager::new(&fx.mgr, fx.root);

		assert_eq!(hier.depth_of(&ItemId::Node(fx.root)).unwrap(), 0);
		assert_eq!(hier.depth_of(&ItemId::Node(fx.b2)).unwrap(), 2);
		assert!(hier.is_ancestor(fx.root, &ItemId::Node(fx.b2)).unwrap());
		assert!(hier.is_ancestor(fx.a, &ItemId::Node(fx.b2)).unwrap());
		assert!(!hier.is_ancestor(fx.b2, &ItemId::Node(fx.a)).unwrap());
		assert!(!hier.is_ancestor(fx.a, &ItemId::Node(fx.a)).unwrap());
	}

	#[test]
	fn share_ancestry_covers_all_parents() {
		let fx = fixture();
		let store = fx.mgr.store().clone();

		// make b2 shareable with a second parent under the root
		let mut other = NodeState::new(NodeId::random(), name("t"), Some(fx.root));
		let other_id = other.id();
		other.add_child_entry(name("shared"), fx.b2);
		let mut root_state = store.get(&ItemId::Node(fx.root)).unwrap();
		root_state.node_mut().unwrap().add_child_entry(name("other"), other_id);
		let mut b2_state = store.get(&ItemId::Node(fx.b2)).unwrap();
		{
			let node = b2_state.node_mut().unwrap();
			node.init_shared_set();
			node.add_share(other_id);
		}
		store
			.apply(ChangeLog {
				added: vec![ItemState::new_node(other)],
				modified: vec![root_state, b2_state],
				..Default::default()
			})
			.unwrap();

		let hier = HierarchyManager::new(&fx.mgr, fx.root);
		// primary ancestry is unchanged
		assert!(hier.is_ancestor(fx.a, &ItemId::Node(fx.b2)).unwrap());
		assert!(!hier.is_ancestor(other_id, &ItemId::Node(fx.b2)).unwrap());
		// share ancestry sees the second parent
		assert!(hier.is_share_ancestor(other_id, fx.b2).unwrap());
		assert!(hier.is_share_ancestor(fx.a, fx.b2).unwrap());
		assert!(!hier.is_share_ancestor(fx.b2, fx.a).unwrap());
		// the primary-parent path wins for shareable nodes
		assert_eq!(hier.path_of(&ItemId::Node(fx.b2)).unwrap(), path("/a/b[2]"));
	}
}
