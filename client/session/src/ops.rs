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

//! Batched tree operations: add, remove, share, copy and move of whole
//! subtrees against an item-state manager in edit mode.
//!
//! Every operation takes a set of check options so internal callers can
//! skip the checks an enclosing operation has already passed.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use log::trace;

use arbor_core::{well_known as wk, ItemId, Name, NodeId, Path, PropertyId, PropertyType, Value};
use arbor_nodetype::{
	EffectiveNodeType, NodeTypeRegistry, RegisteredChildNodeDef, RegisteredPropertyDef,
};
use arbor_state::{ItemState, NodeState, PropertyState};

use crate::access::{AccessManager, Permission};
use crate::error::{Error, Result};
use crate::hierarchy::HierarchyManager;
use crate::session::SessionContext;
use crate::state_mgr::{ItemStateProvider, SessionItemStateManager};

bitflags! {
	/// Which precondition families an operation verifies.
	pub struct CheckOptions: u32 {
		/// Permission checks against the access manager.
		const ACCESS = 0b00001;
		/// Lock checks against the lock manager.
		const LOCK = 0b00010;
		/// Check-out status of the nearest versionable ancestor.
		const VERSIONING = 0b00100;
		/// Node-type constraints and protection flags.
		const CONSTRAINTS = 0b01000;
		/// The node-references index must permit a removal.
		const REFERENCES = 0b10000;
	}
}

/// How [`BatchedOperations::copy`] treats identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFlag {
	/// Fresh uuids everywhere; references inside the subtree are remapped.
	Copy,
	/// Reuse uuids of referenceable nodes; collide on existing ones.
	Clone,
	/// Like `Clone`, but an existing node carrying a reused uuid is
	/// removed first.
	CloneRemoveExisting,
}

/// The source side of a cross-workspace copy.
pub struct CopySource<'a> {
	/// State view of the source tree.
	pub provider: &'a dyn ItemStateProvider,
	/// Access decisions of the source side.
	pub access: &'a dyn AccessManager,
	/// Root node of the source tree.
	pub root_id: NodeId,
}

/// Tree mutations against a state manager in edit mode.
pub struct BatchedOperations<'a> {
	mgr: &'a mut SessionItemStateManager,
	ctx: &'a SessionContext,
}

impl<'a> BatchedOperations<'a> {
	/// Wrap a manager. Fails unless the manager is in edit mode.
	pub fn new(mgr: &'a mut SessionItemStateManager, ctx: &'a SessionContext) -> Result<Self> {
		if !mgr.in_edit() {
			return Err(Error::Repository("batched operations require edit mode".into()));
		}
		Ok(BatchedOperations { mgr, ctx })
	}

	fn registry(&self) -> &NodeTypeRegistry {
		&self.ctx.registry
	}

	/// Read access to the underlying manager, for resolution before a
	/// mutating call.
	pub(crate) fn provider(&self) -> &SessionItemStateManager {
		&*self.mgr
	}

	pub(crate) fn node_state(&self, id: NodeId) -> Result<NodeState> {
		let state = self.mgr.get(&ItemId::Node(id))?;
		state
			.node()
			.cloned()
			.ok_or_else(|| Error::Repository(format!("{} is not a node", id)))
	}

	fn store_node(&mut self, mut state: ItemState, node: NodeState) -> Result<()> {
		*state.node_mut().expect("node state stores node data; qed") = node;
		self.mgr.store_state(state)
	}

	fn path_of(&self, id: NodeId) -> Result<Path> {
		HierarchyManager::new(&*self.mgr, self.ctx.root_id).path_of(&ItemId::Node(id))
	}

	/// Preconditions for adding a child `child_name` of `child_type` under
	/// `parent`.
	pub fn check_add_node(
		&self,
		parent: &NodeState,
		child_name: &Name,
		child_type: Option<&Name>,
		options: CheckOptions,
	) -> Result<()> {
		let parent_path = self.path_of(parent.id())?;
		if options.contains(CheckOptions::LOCK) {
			self.ctx.locks.check_lock(&parent_path, self.ctx.session_id)?;
		}
		if options.contains(CheckOptions::VERSIONING)
			&& !is_checked_out(&*self.mgr, parent.id())?
		{
			return Err(Error::Versioning(format!("{} is checked in", parent_path)));
		}
		if options.contains(CheckOptions::ACCESS) {
			if !self.ctx.access.can_read(&parent_path) {
				return Err(Error::AccessDenied(format!("cannot read {}", parent_path)));
			}
			if !self.ctx.access.is_granted_on_child(
				&parent_path,
				child_name,
				Permission::ADD_NODE,
			) {
				return Err(Error::AccessDenied(format!(
					"cannot add {} under {}",
					child_name, parent_path,
				)));
			}
		}
		if options.contains(CheckOptions::CONSTRAINTS) {
			if let Some(def_id) = parent.def_id {
				if self.registry().node_def(def_id)?.def.protected {
					return Err(Error::ConstraintViolation(format!(
						"{} is protected",
						parent_path,
					)));
				}
			}
			let ent = effective_of(self.registry(), parent)?;
			let new_def = ent.check_add_node_constraints(child_name, child_type, self.registry())?;
			if let Some(existing) = parent.child_entries_named(child_name).next() {
				let existing_allows = self
					.node_state(existing.id)?
					.def_id
					.map(|def_id| {
						self.registry().node_def(def_id).map(|rec| rec.def.allows_sns)
					})
					.transpose()?
					.unwrap_or(false);
				if !existing_allows || !new_def.def.allows_sns {
					return Err(Error::ItemExists(format!(
						"{} below {}",
						child_name, parent_path,
					)));
				}
			}
		}
		Ok(())
	}

	/// Preconditions for removing `target` from under `parent`.
	pub fn check_remove_node(
		&self,
		target: NodeId,
		parent: NodeId,
		options: CheckOptions,
	) -> Result<()> {
		if target == self.ctx.root_id {
			return Err(Error::Repository("cannot remove the root node".into()));
		}
		let parent_path = self.path_of(parent)?;
		let target_state = self.node_state(target)?;
		if options.contains(CheckOptions::LOCK) {
			self.ctx.locks.check_lock(&parent_path, self.ctx.session_id)?;
		}
		if options.contains(CheckOptions::VERSIONING) && !is_checked_out(&*self.mgr, parent)? {
			return Err(Error::Versioning(format!("{} is checked in", parent_path)));
		}
		if options.contains(CheckOptions::ACCESS) {
			let target_path = self.path_of(target)?;
			if !self.ctx.access.can_read(&target_path) {
				return Err(Error::AccessDenied(format!("cannot read {}", target_path)));
			}
			if !self.ctx.access.is_granted(&target_path, Permission::REMOVE_NODE) {
				return Err(Error::AccessDenied(format!("cannot remove {}", target_path)));
			}
		}
		if options.contains(CheckOptions::CONSTRAINTS) {
			let parent_state = self.node_state(parent)?;
			if let Some(def_id) = parent_state.def_id {
				if self.registry().node_def(def_id)?.def.protected {
					return Err(Error::ConstraintViolation(format!(
						"{} is protected",
						parent_path,
					)));
				}
			}
			if let Some(def_id) = target_state.def_id {
				let rec = self.registry().node_def(def_id)?;
				if rec.def.mandatory {
					return Err(Error::ConstraintViolation(format!(
						"{} is mandatory",
						target,
					)));
				}
				if rec.def.protected {
					return Err(Error::ConstraintViolation(format!(
						"{} is protected",
						target,
					)));
				}
			}
		}
		if options.contains(CheckOptions::REFERENCES) {
			let ent = effective_of(self.registry(), &target_state)?;
			if ent.includes(&wk::MIX_REFERENCEABLE)
				&& self.mgr.store().has_node_references(target)
			{
				return Err(Error::ReferentialIntegrity(format!(
					"{} is still referenced",
					target,
				)));
			}
		}
		Ok(())
	}

	/// Share an existing shareable node under an additional parent.
	/// Returns the id of the now-shared node.
	pub fn clone_node(
		&mut self,
		src: NodeId,
		dest_parent: NodeId,
		dest_name: &Name,
	) -> Result<NodeId> {
		let src_state = self.node_state(src)?;
		let dest_parent_item = self.mgr.get(&ItemId::Node(dest_parent))?;
		let dest_parent_state = dest_parent_item
			.node()
			.cloned()
			.ok_or_else(|| Error::Repository(format!("{} is not a node", dest_parent)))?;

		self.check_add_node(
			&dest_parent_state,
			dest_name,
			Some(&src_state.primary_type),
			CheckOptions::all(),
		)?;

		let ent = effective_of(self.registry(), &src_state)?;
		if !ent.includes(&wk::MIX_SHAREABLE) {
			return Err(Error::UnsupportedOperation(format!("{} is not shareable", src)));
		}
		// A share must not land inside the shared node's own subtree.
		let hier = HierarchyManager::new(&*self.mgr, self.ctx.root_id);
		if dest_parent == src || hier.is_share_ancestor(src, dest_parent)? {
			return Err(Error::Repository(format!(
				"sharing {} below itself would create a share cycle",
				src,
			)));
		}

		let src_item = self.mgr.get(&ItemId::Node(src))?;
		let mut src_node = src_state;
		if src_node.shared_set.is_none() {
			src_node.init_shared_set();
		}
		if !src_node.add_share(dest_parent) {
			return Err(Error::UnsupportedOperation(format!(
				"{} is already shared under {}",
				src, dest_parent,
			)));
		}

		let mut dest_node = dest_parent_state;
		dest_node.add_child_entry(dest_name.clone(), src);

		self.store_node(src_item, src_node)?;
		self.store_node(dest_parent_item, dest_node)?;
		trace!(target: "ops", "shared {} under {}", src, dest_parent);
		Ok(src)
	}

	/// Deep-copy the subtree at `src_path` (read through `source`) to
	/// `dest_path`. Returns the id of the new subtree root.
	pub fn copy(
		&mut self,
		src_path: &Path,
		source: &CopySource<'_>,
		dest_path: &Path,
		flag: CopyFlag,
	) -> Result<NodeId> {
		if dest_path.name_element().map(|e| e.index() > 1).unwrap_or(true) {
			return Err(Error::Repository(format!(
				"destination {} must not carry a sibling index",
				dest_path,
			)));
		}
		let src_hier = HierarchyManager::new(source.provider, source.root_id);
		let src_id = src_hier
			.resolve_node_path(src_path)?
			.ok_or_else(|| Error::NotFound(src_path.to_string()))?;
		let src_state = source
			.provider
			.state(&ItemId::Node(src_id))?
			.node()
			.cloned()
			.ok_or_else(|| Error::Repository(format!("{} is not a node", src_path)))?;
		if !source.access.can_read(src_path) {
			return Err(Error::AccessDenied(format!("cannot read {}", src_path)));
		}

		let dest_name = dest_path
			.name_element()
			.expect("non-root destination checked above; qed")
			.name()
			.clone();
		let dest_parent_path = dest_path.parent().expect("non-root path has a parent; qed");
		let local_hier = HierarchyManager::new(&*self.mgr, self.ctx.root_id);
		let dest_parent = local_hier
			.resolve_node_path(&dest_parent_path)?
			.ok_or_else(|| Error::NotFound(dest_parent_path.to_string()))?;
		let dest_parent_state = self.node_state(dest_parent)?;

		self.check_add_node(
			&dest_parent_state,
			&dest_name,
			Some(&src_state.primary_type),
			CheckOptions::ACCESS | CheckOptions::LOCK | CheckOptions::VERSIONING
				| CheckOptions::CONSTRAINTS,
		)?;

		// uuid collision handling for the clone flavours
		let src_ent = effective_of(self.registry(), &src_state)?;
		if src_ent.includes(&wk::MIX_REFERENCEABLE)
			&& flag != CopyFlag::Copy
			&& self.mgr.has(&ItemId::Node(src_id))
		{
			match flag {
				CopyFlag::Clone => {
					return Err(Error::ItemExists(format!(
						"a node with id {} already exists",
						src_id,
					)))
				},
				CopyFlag::CloneRemoveExisting => {
					let existing_state = self.node_state(src_id)?;
					let hier = HierarchyManager::new(&*self.mgr, self.ctx.root_id);
					if src_id == dest_parent
						|| hier.is_ancestor(src_id, &ItemId::Node(dest_parent))?
					{
						return Err(Error::Repository(format!(
							"cannot remove {}: it contains the destination",
							src_id,
						)));
					}
					let parent = existing_state.parent.ok_or_else(|| {
						Error::Repository("existing node has no parent".into())
					})?;
					self.check_remove_node(src_id, parent, CheckOptions::all())?;
					self.remove_child_node(parent, src_id)?;
				},
				CopyFlag::Copy => unreachable!("guarded by the flag check above"),
			}
		}

		let mut copier = Copier {
			flag,
			source,
			registry: self.ctx.registry.clone(),
			versions: self.ctx.versions.clone(),
			remap: HashMap::new(),
			reference_props: Vec::new(),
		};
		let new_id = copier.copy_node(self.mgr, &src_state, dest_parent)?;

		// rewrite every reference caught inside the copied subtree
		for prop_id in copier.reference_props {
			let item_id = ItemId::Property(prop_id);
			let mut state = self.mgr.get(&item_id)?;
			if let Some(prop) = state.property_mut() {
				for value in prop.values.iter_mut() {
					if let Value::Reference(target) = value {
						if let Some(mapped) = copier.remap.get(target) {
							*value = Value::Reference(*mapped);
						}
					}
				}
			}
			self.mgr.store_state(state)?;
		}

		// attach to the destination parent under the recomputed definition
		let dest_ent = effective_of(self.registry(), &dest_parent_state)?;
		let def = dest_ent.applicable_child_def(
			&dest_name,
			Some(&src_state.primary_type),
			self.registry(),
		)?;
		let new_item = self.mgr.get(&ItemId::Node(new_id))?;
		let mut new_node = new_item.node().cloned().expect("copied state is a node; qed");
		new_node.def_id = Some(def.id);
		self.store_node(new_item, new_node)?;

		let dest_parent_item = self.mgr.get(&ItemId::Node(dest_parent))?;
		let mut dest_node = dest_parent_item
			.node()
			.cloned()
			.expect("destination parent is a node; qed");
		dest_node.add_child_entry(dest_name, new_id);
		self.store_node(dest_parent_item, dest_node)?;

		trace!(target: "ops", "copied {} to {} as {}", src_path, dest_path, new_id);
		Ok(new_id)
	}

	/// Move the node at `src_path` to `dest_path`.
	pub fn move_node(&mut self, src_path: &Path, dest_path: &Path) -> Result<()> {
		if dest_path.is_equal_or_descendant_of(src_path) {
			return Err(Error::Repository(format!(
				"cannot move {} into its own subtree {}",
				src_path, dest_path,
			)));
		}
		if dest_path.name_element().map(|e| e.index() > 1).unwrap_or(true) {
			return Err(Error::Repository(format!(
				"destination {} must not carry a sibling index",
				dest_path,
			)));
		}
		let hier = HierarchyManager::new(&*self.mgr, self.ctx.root_id);
		let target = hier
			.resolve_node_path(src_path)?
			.ok_or_else(|| Error::NotFound(src_path.to_string()))?;
		let dest_parent_path = dest_path.parent().expect("non-root path has a parent; qed");
		let dest_parent = hier
			.resolve_node_path(&dest_parent_path)?
			.ok_or_else(|| Error::NotFound(dest_parent_path.to_string()))?;
		let dest_name = dest_path
			.name_element()
			.expect("non-root destination checked above; qed")
			.name()
			.clone();

		let target_state = self.node_state(target)?;
		let src_parent = target_state
			.parent
			.ok_or_else(|| Error::Repository("cannot move the root node".into()))?;

		if hier.is_share_ancestor(target, dest_parent)? {
			return Err(Error::Repository(format!(
				"moving {} below {} would create a cycle",
				src_path, dest_path,
			)));
		}

		let options = CheckOptions::ACCESS | CheckOptions::LOCK | CheckOptions::VERSIONING
			| CheckOptions::CONSTRAINTS;
		self.check_remove_node(target, src_parent, options)?;
		let dest_parent_state = self.node_state(dest_parent)?;
		self.check_add_node(
			&dest_parent_state,
			&dest_name,
			Some(&target_state.primary_type),
			options,
		)?;

		let ent = effective_of(self.registry(), &target_state)?;
		if ent.includes(&wk::MIX_SHAREABLE) {
			return Err(Error::UnsupportedOperation(format!(
				"cannot move shareable node {}",
				src_path,
			)));
		}

		if src_parent == dest_parent {
			let parent_item = self.mgr.get(&ItemId::Node(src_parent))?;
			let mut parent_node =
				parent_item.node().cloned().expect("parent is a node; qed");
			parent_node
				.rename_child_entry(target, dest_name.clone())
				.ok_or_else(|| Error::NotFound(src_path.to_string()))?;
			self.store_node(parent_item, parent_node)?;
		} else {
			let src_item = self.mgr.get(&ItemId::Node(src_parent))?;
			let mut src_node = src_item.node().cloned().expect("parent is a node; qed");
			src_node
				.remove_child_entry_by_id(target)
				.ok_or_else(|| Error::NotFound(src_path.to_string()))?;
			self.store_node(src_item, src_node)?;

			let dest_item = self.mgr.get(&ItemId::Node(dest_parent))?;
			let mut dest_node = dest_item.node().cloned().expect("parent is a node; qed");
			dest_node.add_child_entry(dest_name.clone(), target);
			self.store_node(dest_item, dest_node)?;
		}

		// the definition follows the new name and parent
		let dest_ent = effective_of(self.registry(), &dest_parent_state)?;
		let def = dest_ent.applicable_child_def(
			&dest_name,
			Some(&target_state.primary_type),
			self.registry(),
		)?;
		let target_item = self.mgr.get(&ItemId::Node(target))?;
		let mut target_node = target_item.node().cloned().expect("target is a node; qed");
		target_node.parent = Some(dest_parent);
		target_node.def_id = Some(def.id);
		self.store_node(target_item, target_node)?;

		trace!(target: "ops", "moved {} to {}", src_path, dest_path);
		Ok(())
	}

	/// Create a node state under `parent`, including every auto-created
	/// child and property. Returns the new node's id.
	pub fn create_node_state(
		&mut self,
		parent: NodeId,
		name: &Name,
		type_name: Option<&Name>,
		mixins: &[Name],
		id: Option<NodeId>,
		def: Option<Arc<RegisteredChildNodeDef>>,
	) -> Result<NodeId> {
		let parent_item = self.mgr.get(&ItemId::Node(parent))?;
		let parent_state = parent_item
			.node()
			.cloned()
			.ok_or_else(|| Error::Repository(format!("{} is not a node", parent)))?;
		let parent_ent = effective_of(self.registry(), &parent_state)?;
		let def = match def {
			Some(def) => def,
			None => parent_ent.applicable_child_def(name, type_name, self.registry())?,
		};
		if !def.def.allows_sns && parent_state.has_child_entry_named(name) {
			return Err(Error::ItemExists(format!("{} below {}", name, parent)));
		}
		let primary = match type_name.or(def.def.default_type.as_ref()) {
			Some(primary) => primary.clone(),
			None => {
				return Err(Error::ConstraintViolation(format!(
					"no primary type for {}",
					name,
				)))
			},
		};

		let id = id.unwrap_or_else(NodeId::random);
		let mut node = NodeState::new(id, primary, Some(parent));
		node.def_id = Some(def.id);
		node.mixins = mixins.iter().cloned().collect();

		let ent = self.registry().effective(
			&node.primary_type,
			&node.mixins.iter().cloned().collect::<Vec<_>>(),
		)?;
		if ent.includes(&wk::MIX_SHAREABLE) {
			node.init_shared_set();
		}

		for prop_state in auto_created_property_states(&mut node, &ent)? {
			self.mgr.store_state(prop_state)?;
		}

		let auto_children: Vec<Arc<RegisteredChildNodeDef>> =
			ent.auto_create_child_defs().cloned().collect();

		self.mgr.store_state(ItemState::new_node(node))?;

		// attach to the parent
		let parent_item = self.mgr.get(&ItemId::Node(parent))?;
		let mut parent_node = parent_item.node().cloned().expect("parent is a node; qed");
		parent_node.add_child_entry(name.clone(), id);
		self.store_node(parent_item, parent_node)?;

		for child_def in auto_children {
			let child_name = match &child_def.def.name {
				Some(child_name) => child_name.clone(),
				// a residual definition cannot name what to auto-create
				None => continue,
			};
			self.create_node_state(id, &child_name, None, &[], None, Some(child_def))?;
		}

		Ok(id)
	}

	/// Create a property state on `parent`. Returns the new property's id.
	pub fn create_property_state(
		&mut self,
		parent: NodeId,
		name: &Name,
		ty: PropertyType,
		num_values: usize,
	) -> Result<PropertyId> {
		let parent_state = self.node_state(parent)?;
		if parent_state.has_property_name(name) {
			return Err(Error::ItemExists(format!("property {} on {}", name, parent)));
		}
		let ent = effective_of(self.registry(), &parent_state)?;
		let def = if num_values == 1 {
			ent.applicable_property_def(name, ty, false)
				.or_else(|_| ent.applicable_property_def(name, ty, true))?
		} else {
			ent.applicable_property_def(name, ty, true)?
		};

		let effective_ty = match def.def.required_type {
			PropertyType::Undefined => match ty {
				PropertyType::Undefined => PropertyType::String,
				ty => ty,
			},
			required => required,
		};
		let prop_id = PropertyId::new(parent, name.clone());
		let mut prop = PropertyState::new(prop_id.clone(), effective_ty, def.def.multi_valued);
		prop.def_id = Some(def.id);
		if let Some(values) = system_generated_values(&parent_state, name) {
			prop.values = values;
		} else if !def.def.default_values.is_empty() {
			prop.values = def.def.default_values.clone();
		}
		self.mgr.store_state(ItemState::new_property(prop))?;

		let parent_item = self.mgr.get(&ItemId::Node(parent))?;
		let mut parent_node = parent_item.node().cloned().expect("parent is a node; qed");
		parent_node.add_property_name(name.clone());
		self.store_node(parent_item, parent_node)?;
		Ok(prop_id)
	}

	/// Unlink `target` from `parent`. A node shared under other parents
	/// only loses this share; otherwise the whole subtree is destroyed.
	pub fn remove_child_node(&mut self, parent: NodeId, target: NodeId) -> Result<()> {
		let target_state = self.node_state(target)?;
		let shared_elsewhere = target_state
			.shared_set
			.as_ref()
			.map(|set| set.iter().any(|p| *p != parent))
			.unwrap_or(false);

		let parent_item = self.mgr.get(&ItemId::Node(parent))?;
		let mut parent_node = parent_item.node().cloned().expect("parent is a node; qed");
		parent_node
			.remove_child_entry_by_id(target)
			.ok_or_else(|| Error::NotFound(format!("{} below {}", target, parent)))?;
		self.store_node(parent_item, parent_node)?;

		if shared_elsewhere {
			let target_item = self.mgr.get(&ItemId::Node(target))?;
			let mut target_node = target_state;
			target_node.remove_share(parent);
			// the primary parent moves to another member of the set
			if target_node.parent == Some(parent) {
				target_node.parent =
					target_node.shared_set.as_ref().and_then(|set| set.iter().next().copied());
			}
			self.store_node(target_item, target_node)?;
			trace!(target: "ops", "removed share of {} from {}", target, parent);
			return Ok(());
		}
		self.remove_node_state(target)
	}

	/// Destroy the subtree rooted at `target`: children depth-first and
	/// tail-first, then properties, then the node itself.
	pub fn remove_node_state(&mut self, target: NodeId) -> Result<()> {
		if target == self.ctx.root_id {
			return Err(Error::Repository("cannot remove the root node".into()));
		}
		loop {
			let target_state = self.node_state(target)?;
			let entry = match target_state.child_entries().last() {
				Some(entry) => entry.clone(),
				None => break,
			};
			// Destruction inside an already-admitted removal skips the
			// constraint checks: mandatory children go down with the tree.
			self.check_remove_node(
				entry.id,
				target,
				CheckOptions::ACCESS | CheckOptions::LOCK | CheckOptions::VERSIONING,
			)?;
			self.remove_child_node(target, entry.id)?;
		}

		let target_item = self.mgr.get(&ItemId::Node(target))?;
		let mut target_node = target_item.node().cloned().expect("target is a node; qed");
		let names: Vec<Name> = target_node.property_names.iter().cloned().collect();
		for name in names {
			target_node.remove_property_name(&name);
			let prop_id = ItemId::Property(PropertyId::new(target, name));
			if self.mgr.has(&prop_id) {
				self.mgr.destroy(&prop_id)?;
			}
		}
		self.store_node(target_item, target_node)?;
		self.mgr.destroy(&ItemId::Node(target))?;
		Ok(())
	}
}

struct Copier<'a, 'b> {
	flag: CopyFlag,
	source: &'b CopySource<'a>,
	registry: Arc<NodeTypeRegistry>,
	versions: Arc<dyn crate::version::VersionManager>,
	remap: HashMap<NodeId, NodeId>,
	reference_props: Vec<PropertyId>,
}

impl<'a, 'b> Copier<'a, 'b> {
	fn copy_node(
		&mut self,
		mgr: &mut SessionItemStateManager,
		src: &NodeState,
		dest_parent: NodeId,
	) -> Result<NodeId> {
		let src_ent = self
			.registry
			.effective(&src.primary_type, &src.mixins.iter().cloned().collect::<Vec<_>>())?;
		let referenceable = src_ent.includes(&wk::MIX_REFERENCEABLE);

		let new_id = match self.flag {
			CopyFlag::Copy => {
				let new_id = NodeId::random();
				if referenceable {
					self.remap.insert(src.id(), new_id);
				}
				new_id
			},
			CopyFlag::Clone | CopyFlag::CloneRemoveExisting => {
				if referenceable {
					// identity mapping, so a second share of this node
					// inside the subtree reattaches instead of re-copying
					self.remap.insert(src.id(), src.id());
					src.id()
				} else {
					NodeId::random()
				}
			},
		};

		let mut node = NodeState::new(new_id, src.primary_type.clone(), Some(dest_parent));
		node.mixins = src.mixins.clone();
		node.def_id = src.def_id;
		if src_ent.includes(&wk::MIX_SHAREABLE) {
			node.init_shared_set();
		}

		// properties first, so the node state lists them on store
		for name in &src.property_names {
			let src_prop_id = ItemId::Property(PropertyId::new(src.id(), name.clone()));
			let src_prop = match self.source.provider.state(&src_prop_id) {
				Ok(state) => state,
				Err(Error::NotFound(_)) => continue,
				Err(err) => return Err(err),
			};
			let src_prop = match src_prop.property() {
				Some(prop) => prop.clone(),
				None => continue,
			};
			// lock state never travels with a copy
			if let Some(def_id) = src_prop.def_id {
				if let Ok(rec) = self.registry.prop_def(def_id) {
					if rec.declaring_type == *wk::MIX_LOCKABLE {
						continue;
					}
				}
			}
			let new_prop_id = PropertyId::new(new_id, name.clone());
			let mut prop = PropertyState::new(new_prop_id.clone(), src_prop.ty, src_prop.multi_valued);
			prop.def_id = src_prop.def_id;
			prop.values = if name == &*wk::UUID {
				vec![Value::String(new_id.to_string())]
			} else {
				src_prop.values.clone()
			};
			if prop.values.iter().any(|v| matches!(v, Value::Reference(_))) {
				self.reference_props.push(new_prop_id);
			}
			node.add_property_name(name.clone());
			mgr.store_state(ItemState::new_property(prop))?;
		}

		// a plain copy of a versionable node starts its own history
		if self.flag == CopyFlag::Copy && src_ent.includes(&wk::MIX_VERSIONABLE) {
			let info = self.versions.version_history(&node, &*mgr)?;
			for state in info.states {
				mgr.store_state(state)?;
			}
			let values: [(&Name, Value); 4] = [
				(&wk::VERSION_HISTORY, Value::Reference(info.history_id)),
				(&wk::BASE_VERSION, Value::Reference(info.root_version_id)),
				(&wk::IS_CHECKED_OUT, Value::Boolean(true)),
				(&wk::PREDECESSORS, Value::Reference(info.root_version_id)),
			];
			for (prop_name, value) in values.iter() {
				let prop_id = PropertyId::new(new_id, (*prop_name).clone());
				let multi = *prop_name == &*wk::PREDECESSORS;
				let mut prop = PropertyState::new(prop_id, value.ty(), multi);
				prop.values = vec![value.clone()];
				if let Ok(rec) =
					src_ent.applicable_property_def(prop_name, value.ty(), multi)
				{
					prop.def_id = Some(rec.id);
				}
				node.add_property_name((*prop_name).clone());
				mgr.store_state(ItemState::new_property(prop))?;
			}
		}

		let src_hier = HierarchyManager::new(self.source.provider, self.source.root_id);
		for entry in src.child_entries() {
			// a child already copied through another share of it is
			// attached as a share instead of being copied again
			if let Some(mapped) = self.remap.get(&entry.id).copied() {
				let mapped_item = mgr.get(&ItemId::Node(mapped))?;
				let mut mapped_node =
					mapped_item.node().cloned().expect("copied state is a node; qed");
				if mapped_node.is_shareable() {
					mapped_node.add_share(new_id);
					node.add_child_entry(entry.name.clone(), mapped);
					let mut item = mapped_item;
					*item.node_mut().expect("node state; qed") = mapped_node;
					mgr.store_state(item)?;
					continue;
				}
			}
			let child_state = match self.source.provider.state(&ItemId::Node(entry.id)) {
				Ok(state) => state,
				Err(Error::NotFound(_)) => continue,
				Err(err) => return Err(err),
			};
			let child = match child_state.node() {
				Some(child) => child.clone(),
				None => continue,
			};
			// unreadable children are silently left out of the copy
			if let Ok(child_path) = src_hier.path_of(&ItemId::Node(entry.id)) {
				if !self.source.access.can_read(&child_path) {
					continue;
				}
			}
			let new_child = self.copy_node(mgr, &child, new_id)?;
			node.add_child_entry(entry.name.clone(), new_child);
		}

		mgr.store_state(ItemState::new_node(node))?;
		Ok(new_id)
	}
}

/// The effective node type of a node state.
pub(crate) fn effective_of(
	registry: &NodeTypeRegistry,
	node: &NodeState,
) -> Result<Arc<EffectiveNodeType>> {
	let mixins: Vec<Name> = node.mixins.iter().cloned().collect();
	Ok(registry.effective(&node.primary_type, &mixins)?)
}

/// Whether the nearest ancestor-or-self of `node` carrying a check-out flag
/// is checked out. Nodes outside any versionable subtree pass.
pub(crate) fn is_checked_out(
	provider: &dyn ItemStateProvider,
	node: NodeId,
) -> Result<bool> {
	let mut current = Some(node);
	let mut hops = 0usize;
	while let Some(id) = current {
		let state = provider.state(&ItemId::Node(id))?;
		let node_state = state
			.node()
			.ok_or_else(|| Error::Repository(format!("{} is not a node", id)))?;
		if node_state.has_property_name(&wk::IS_CHECKED_OUT) {
			let prop_id = ItemId::Property(PropertyId::new(id, wk::IS_CHECKED_OUT.clone()));
			let prop_state = provider.state(&prop_id)?;
			return Ok(prop_state
				.property()
				.and_then(PropertyState::value)
				.and_then(Value::as_boolean)
				.unwrap_or(false));
		}
		current = node_state.parent;
		hops += 1;
		if hops > 1024 {
			return Err(Error::Repository(format!("parent cycle above {}", node)));
		}
	}
	Ok(true)
}

/// The system-generated values of a well-known property, if `name` is one.
pub(crate) fn system_generated_values(node: &NodeState, name: &Name) -> Option<Vec<Value>> {
	if name == &*wk::UUID {
		Some(vec![Value::String(node.id().to_string())])
	} else if name == &*wk::PRIMARY_TYPE {
		Some(vec![Value::Name(node.primary_type.clone())])
	} else if name == &*wk::MIXIN_TYPES {
		Some(node.mixins.iter().cloned().map(Value::Name).collect())
	} else if name == &*wk::CREATED || name == &*wk::LAST_MODIFIED {
		Some(vec![Value::now()])
	} else {
		None
	}
}

/// Materialize the auto-created properties of `node`'s effective type as
/// `New` states, recording their names on the node.
pub(crate) fn auto_created_property_states(
	node: &mut NodeState,
	ent: &EffectiveNodeType,
) -> Result<Vec<ItemState>> {
	let defs: Vec<Arc<RegisteredPropertyDef>> = ent.auto_create_prop_defs().cloned().collect();
	let mut out = Vec::new();
	for rec in defs {
		let name = match &rec.def.name {
			Some(name) => name.clone(),
			// nothing to auto-create from a residual definition
			None => continue,
		};
		if node.has_property_name(&name) {
			continue;
		}
		let values = system_generated_values(node, &name)
			.unwrap_or_else(|| rec.def.default_values.clone());
		let ty = match rec.def.required_type {
			PropertyType::Undefined => values
				.first()
				.map(Value::ty)
				.unwrap_or(PropertyType::String),
			required => required,
		};
		let mut prop = PropertyState::new(PropertyId::new(node.id(), name.clone()), ty, rec.def.multi_valued);
		prop.def_id = Some(rec.id);
		prop.values = values;
		node.add_property_name(name);
		out.push(ItemState::new_property(prop));
	}
	Ok(out)
}
