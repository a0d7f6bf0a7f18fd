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

//! Node and property views, and the transient-change orchestration behind
//! `save`, `refresh` and `remove`.

use std::collections::HashSet;
use std::sync::Arc;

use log::trace;

use arbor_core::{well_known as wk, ItemId, Name, NodeId, Path, PropertyId, PropertyType, Value};
use arbor_nodetype::EffectiveNodeType;
use arbor_state::{ChangeLog, ItemState, ItemStatus, NodeState, PropertyState, StateError};

use crate::access::Permission;
use crate::cache::{ItemData, ItemDataStatus};
use crate::error::{Error, Result};
use crate::hierarchy::HierarchyManager;
use crate::ops::{self, BatchedOperations, CheckOptions};
use crate::session::{parse_path, Env, Session};
use crate::state_mgr::{AtticView, SessionItemStateManager, StoreProvider};

/// A node as seen by one session.
///
/// The view holds only the cached identity; every access re-reads the
/// state through the session, so staleness is always detected.
pub struct Node<'s> {
	session: &'s Session,
	data: Arc<ItemData>,
}

/// A property as seen by one session.
pub struct Property<'s> {
	session: &'s Session,
	data: Arc<ItemData>,
}

fn sanity(data: &ItemData) -> Result<()> {
	match data.status() {
		ItemDataStatus::Destroyed => {
			Err(Error::InvalidItemState(format!("{} no longer exists", data.id())))
		},
		ItemDataStatus::Invalidated => {
			Err(Error::InvalidItemState(format!("{} has been invalidated", data.id())))
		},
		_ => Ok(()),
	}
}

/// Load the backing state of a view. A missing state means the item went
/// away underneath the session.
fn state_of(
	states: &SessionItemStateManager,
	data: &ItemData,
) -> Result<ItemState> {
	match states.get(data.id()) {
		Ok(state) => Ok(state),
		Err(Error::NotFound(_)) => {
			data.set_status(ItemDataStatus::Destroyed);
			Err(Error::InvalidItemState(format!("{} no longer exists", data.id())))
		},
		Err(err) => Err(err),
	}
}

fn node_state_of(states: &SessionItemStateManager, data: &ItemData) -> Result<NodeState> {
	state_of(states, data)?.node().cloned().ok_or_else(|| {
		Error::Repository(format!("{} is not a node", data.id()))
	})
}

impl<'s> Node<'s> {
	pub(crate) fn new(session: &'s Session, data: Arc<ItemData>) -> Self {
		Node { session, data }
	}

	/// The node id.
	pub fn id(&self) -> NodeId {
		self.data.id().node_id().expect("node views wrap node ids; qed")
	}

	/// Whether this is the repository root.
	pub fn is_root(&self) -> bool {
		self.id() == self.session.ctx().root_id
	}

	/// Whether the view carries uncommitted changes.
	pub fn is_modified(&self) -> bool {
		self.data.status() == ItemDataStatus::Modified
	}

	/// The absolute path. For shareable nodes, the primary-parent path.
	pub fn path(&self) -> Result<Path> {
		sanity(&self.data)?;
		let id = ItemId::Node(self.id());
		self.session.with(|states, env| {
			state_of(states, &self.data)?;
			HierarchyManager::new(&*states, env.ctx.root_id).path_of(&id)
		})
	}

	/// The node name; `None` for the root.
	pub fn name(&self) -> Result<Option<Name>> {
		Ok(self.path()?.name_element().map(|e| e.name().clone()))
	}

	/// The primary type name.
	pub fn primary_type(&self) -> Result<Name> {
		sanity(&self.data)?;
		self.session
			.with(|states, _| Ok(node_state_of(states, &self.data)?.primary_type))
	}

	/// The mixin type names.
	pub fn mixins(&self) -> Result<Vec<Name>> {
		sanity(&self.data)?;
		self.session.with(|states, _| {
			Ok(node_state_of(states, &self.data)?.mixins.into_iter().collect())
		})
	}

	/// The node's uuid: its id, for referenceable nodes.
	pub fn uuid(&self) -> Result<Option<NodeId>> {
		sanity(&self.data)?;
		let id = self.id();
		self.session.with(|states, env| {
			let node = node_state_of(states, &self.data)?;
			let ent = ops::effective_of(&env.ctx.registry, &node)?;
			Ok(if ent.includes(&wk::MIX_REFERENCEABLE) { Some(id) } else { None })
		})
	}

	/// The parent node; fails on the root.
	pub fn parent(&self) -> Result<Node<'s>> {
		sanity(&self.data)?;
		let parent = self.session.with(|states, _| {
			node_state_of(states, &self.data)?
				.parent
				.ok_or_else(|| Error::NotFound("the root has no parent".into()))
		})?;
		self.session.node_by_id(parent)
	}

	/// The child node at the given relative path.
	pub fn child(&self, rel_path: &str) -> Result<Node<'s>> {
		let path = self.resolve_relative(rel_path)?;
		self.session.node(&path.to_string())
	}

	/// The property of the given name.
	pub fn property(&self, name: &str) -> Result<Property<'s>> {
		let path = self.resolve_relative(name)?;
		self.session.property(&path.to_string())
	}

	fn resolve_relative(&self, rel_path: &str) -> Result<Path> {
		let own = self.path()?;
		parse_path(&format!(
			"{}/{}",
			if own.is_root() { String::new() } else { own.to_string() },
			rel_path,
		))
	}

	/// Whether the node has any child nodes.
	pub fn has_children(&self) -> Result<bool> {
		sanity(&self.data)?;
		self.session
			.with(|states, _| Ok(node_state_of(states, &self.data)?.has_child_entries()))
	}

	/// Whether the node has any properties.
	pub fn has_properties(&self) -> Result<bool> {
		sanity(&self.data)?;
		self.session
			.with(|states, _| Ok(!node_state_of(states, &self.data)?.property_names.is_empty()))
	}

	/// The child nodes. Access checks run as elements are materialized;
	/// unreadable children are skipped, so the size is best-effort.
	pub fn children(&self) -> Result<Nodes<'s>> {
		sanity(&self.data)?;
		let id = self.id();
		let ids = self
			.session
			.with(|states, env| env.items.child_ids(states, id))?;
		Ok(Nodes { session: self.session, ids, pos: 0 })
	}

	/// The properties. Same lazy-check semantics as [`Self::children`].
	pub fn properties(&self) -> Result<Properties<'s>> {
		sanity(&self.data)?;
		let id = self.id();
		let ids = self
			.session
			.with(|states, env| env.items.property_ids(states, id))?;
		Ok(Properties { session: self.session, ids, pos: 0 })
	}

	/// Add a child node of the given primary type (the definition's
	/// default when `None`). The change is transient until save.
	pub fn add_node(&self, name: &str, primary_type: Option<&str>) -> Result<Node<'s>> {
		sanity(&self.data)?;
		let parent = self.id();
		let name = Name::parse(name)
			.map_err(|err| Error::Repository(format!("bad name: {}", err)))?;
		let ty = primary_type
			.map(Name::parse)
			.transpose()
			.map_err(|err| Error::Repository(format!("bad type name: {}", err)))?;
		let new_id = self.session.with(|states, env| {
			state_of(states, &self.data)?;
			add_node_impl(states, env, parent, &name, ty.as_ref())
		})?;
		self.session.node_by_id(new_id)
	}

	/// Set a single-valued property. The change is transient until save.
	pub fn set_property(&self, name: &str, value: Value) -> Result<Property<'s>> {
		self.set_property_values(name, vec![value], false)
	}

	/// Set a multi-valued property.
	pub fn set_property_multi(&self, name: &str, values: Vec<Value>) -> Result<Property<'s>> {
		self.set_property_values(name, values, true)
	}

	fn set_property_values(
		&self,
		name: &str,
		values: Vec<Value>,
		multi: bool,
	) -> Result<Property<'s>> {
		sanity(&self.data)?;
		let parent = self.id();
		let name = Name::parse(name)
			.map_err(|err| Error::Repository(format!("bad name: {}", err)))?;
		let prop_id = self.session.with(|states, env| {
			state_of(states, &self.data)?;
			set_property_impl(states, env, parent, &name, values, multi, false)
		})?;
		self.session.property_by_id(prop_id)
	}

	/// Remove the property of the given name.
	pub fn remove_property(&self, name: &str) -> Result<()> {
		sanity(&self.data)?;
		let parent = self.id();
		let name = Name::parse(name)
			.map_err(|err| Error::Repository(format!("bad name: {}", err)))?;
		self.session
			.with(|states, env| remove_property_impl(states, env, parent, &name, false))
	}

	/// Add a mixin type. Auto-created properties of the mixin materialize
	/// immediately; shareable/versionable bootstrapping happens at save.
	pub fn add_mixin(&self, mixin: &Name) -> Result<()> {
		sanity(&self.data)?;
		let id = self.id();
		self.session.with(|states, env| add_mixin_impl(states, env, id, mixin))
	}

	/// Remove a mixin type. Removing the shareable mixin is rejected.
	pub fn remove_mixin(&self, mixin: &Name) -> Result<()> {
		sanity(&self.data)?;
		let id = self.id();
		self.session.with(|states, env| remove_mixin_impl(states, env, id, mixin))
	}

	/// Change the primary type. Validated against the node's definition
	/// at save.
	pub fn set_primary_type(&self, primary: &Name) -> Result<()> {
		sanity(&self.data)?;
		let id = self.id();
		self.session
			.with(|states, env| set_primary_type_impl(states, env, id, primary))
	}

	/// Remove this node (transient until save). A share under this
	/// node's parent only unlinks the share.
	pub fn remove(self) -> Result<()> {
		sanity(&self.data)?;
		let id = self.id();
		let share_parent = self.data.share_parent();
		self.session.with(|states, env| {
			state_of(states, &self.data)?;
			match share_parent {
				Some(parent) => remove_node_from_impl(states, env, parent, id),
				None => remove_node_impl(states, env, id),
			}
		})
	}

	/// Persist the transient changes of this subtree.
	pub fn save(&self) -> Result<()> {
		sanity(&self.data)?;
		let id = ItemId::Node(self.id());
		self.session.with(|states, env| save_item(states, env, &id))
	}

	/// Discard the transient changes of this subtree.
	pub fn refresh(&self, keep_changes: bool) -> Result<()> {
		sanity(&self.data)?;
		let id = ItemId::Node(self.id());
		self.session
			.with(|states, env| refresh_item(states, env, &id, keep_changes))
	}
}

impl<'s> Property<'s> {
	pub(crate) fn new(session: &'s Session, data: Arc<ItemData>) -> Self {
		Property { session, data }
	}

	/// The property id.
	pub fn id(&self) -> PropertyId {
		self.data
			.id()
			.property_id()
			.expect("property views wrap property ids; qed")
			.clone()
	}

	/// The property name.
	pub fn name(&self) -> Name {
		self.id().name
	}

	/// The absolute path.
	pub fn path(&self) -> Result<Path> {
		sanity(&self.data)?;
		let id = self.data.id().clone();
		self.session.with(|states, env| {
			state_of(states, &self.data)?;
			HierarchyManager::new(&*states, env.ctx.root_id).path_of(&id)
		})
	}

	/// The value type.
	pub fn ty(&self) -> Result<PropertyType> {
		sanity(&self.data)?;
		self.session.with(|states, _| {
			Ok(state_of(states, &self.data)?
				.property()
				.expect("property state; qed")
				.ty)
		})
	}

	/// The single value of a single-valued property.
	pub fn value(&self) -> Result<Value> {
		sanity(&self.data)?;
		self.session.with(|states, _| {
			let state = state_of(states, &self.data)?;
			let prop = state.property().expect("property state; qed");
			if prop.multi_valued {
				return Err(Error::Repository(format!("{} is multi-valued", self.data.id())));
			}
			prop.values
				.first()
				.cloned()
				.ok_or_else(|| Error::Repository(format!("{} has no value", self.data.id())))
		})
	}

	/// All values.
	pub fn values(&self) -> Result<Vec<Value>> {
		sanity(&self.data)?;
		self.session.with(|states, _| {
			Ok(state_of(states, &self.data)?
				.property()
				.expect("property state; qed")
				.values
				.clone())
		})
	}

	/// Replace the value. Transient until save.
	pub fn set_value(&self, value: Value) -> Result<()> {
		sanity(&self.data)?;
		let id = self.id();
		self.session.with(|states, env| {
			set_property_impl(states, env, id.parent, &id.name, vec![value], false, false)
				.map(|_| ())
		})
	}

	/// Replace all values of a multi-valued property.
	pub fn set_values(&self, values: Vec<Value>) -> Result<()> {
		sanity(&self.data)?;
		let id = self.id();
		self.session.with(|states, env| {
			set_property_impl(states, env, id.parent, &id.name, values, true, false).map(|_| ())
		})
	}

	/// The owning node.
	pub fn parent(&self) -> Result<Node<'s>> {
		self.session.node_by_id(self.id().parent)
	}

	/// Remove this property (transient until save).
	pub fn remove(self) -> Result<()> {
		sanity(&self.data)?;
		let id = self.id();
		self.session
			.with(|states, env| remove_property_impl(states, env, id.parent, &id.name, false))
	}

	/// Persist the transient change of this property.
	pub fn save(&self) -> Result<()> {
		sanity(&self.data)?;
		let id = self.data.id().clone();
		self.session.with(|states, env| save_item(states, env, &id))
	}

	/// Discard the transient change of this property.
	pub fn refresh(&self, keep_changes: bool) -> Result<()> {
		sanity(&self.data)?;
		let id = self.data.id().clone();
		self.session
			.with(|states, env| refresh_item(states, env, &id, keep_changes))
	}
}

/// Lazy child-node sequence; unreadable entries are skipped at
/// materialization time.
pub struct Nodes<'s> {
	session: &'s Session,
	ids: Vec<NodeId>,
	pos: usize,
}

impl<'s> Iterator for Nodes<'s> {
	type Item = Node<'s>;

	fn next(&mut self) -> Option<Node<'s>> {
		while self.pos < self.ids.len() {
			let id = self.ids[self.pos];
			self.pos += 1;
			if let Ok(node) = self.session.node_by_id(id) {
				return Some(node);
			}
		}
		None
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(0, Some(self.ids.len() - self.pos))
	}
}

/// Lazy property sequence; unreadable entries are skipped.
pub struct Properties<'s> {
	session: &'s Session,
	ids: Vec<PropertyId>,
	pos: usize,
}

impl<'s> Iterator for Properties<'s> {
	type Item = Property<'s>;

	fn next(&mut self) -> Option<Property<'s>> {
		while self.pos < self.ids.len() {
			let id = self.ids[self.pos].clone();
			self.pos += 1;
			if let Ok(prop) = self.session.property_by_id(id) {
				return Some(prop);
			}
		}
		None
	}
}

// --- transient mutation internals ---------------------------------------

pub(crate) fn add_node_impl(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	parent: NodeId,
	name: &Name,
	primary_type: Option<&Name>,
) -> Result<NodeId> {
	states.ensure_edit();
	let mut batch = BatchedOperations::new(states, env.ctx)?;
	let parent_state = batch.node_state(parent)?;
	batch.check_add_node(
		&parent_state,
		name,
		primary_type,
		CheckOptions::ACCESS | CheckOptions::LOCK | CheckOptions::VERSIONING
			| CheckOptions::CONSTRAINTS,
	)?;
	batch.create_node_state(parent, name, primary_type, &[], None, None)
}

pub(crate) fn set_property_impl(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	parent: NodeId,
	name: &Name,
	values: Vec<Value>,
	multi: bool,
	internal: bool,
) -> Result<PropertyId> {
	states.ensure_edit();
	let parent_state = states
		.get(&ItemId::Node(parent))?
		.node()
		.cloned()
		.ok_or_else(|| Error::Repository(format!("{} is not a node", parent)))?;

	if !internal {
		let hier = HierarchyManager::new(&*states, env.ctx.root_id);
		let parent_path = hier.path_of(&ItemId::Node(parent))?;
		env.ctx.locks.check_lock(&parent_path, env.ctx.session_id)?;
		if !ops::is_checked_out(&*states, parent)? {
			return Err(Error::Versioning(format!("{} is checked in", parent_path)));
		}
		if !env.ctx.access.is_granted_on_child(&parent_path, name, Permission::SET_PROPERTY) {
			return Err(Error::AccessDenied(format!(
				"cannot set {} on {}",
				name, parent_path,
			)));
		}
	}

	let value_ty = values.first().map(Value::ty).unwrap_or(PropertyType::String);
	let prop_id = PropertyId::new(parent, name.clone());
	let item_id = ItemId::Property(prop_id.clone());

	let ent = ops::effective_of(&env.ctx.registry, &parent_state)?;
	let def = if parent_state.has_property_name(name) {
		// an existing property keeps its definition
		let existing = states.get(&item_id)?;
		let existing = existing.property().expect("property state; qed");
		match existing.def_id {
			Some(def_id) => env.ctx.registry.prop_def(def_id)?,
			None => ent.applicable_property_def(name, value_ty, multi)?,
		}
	} else {
		ent.applicable_property_def(name, value_ty, multi)?
	};

	if def.def.protected && !internal {
		return Err(Error::ConstraintViolation(format!("{} is protected", name)));
	}
	if def.def.multi_valued != multi {
		return Err(Error::ConstraintViolation(format!(
			"{} is {}-valued",
			name,
			if def.def.multi_valued { "multi" } else { "single" },
		)));
	}
	if def.def.required_type != PropertyType::Undefined {
		if let Some(bad) = values.iter().find(|v| v.ty() != def.def.required_type) {
			return Err(Error::ConstraintViolation(format!(
				"{} requires {} values, got {:?}",
				name, def.def.required_type, bad,
			)));
		}
	}
	EffectiveNodeType::check_set_property_constraints(&def, &values)?;

	if parent_state.has_property_name(name) {
		let mut state = states.get(&item_id)?;
		{
			let prop = state.property_mut().expect("property state; qed");
			prop.values = values;
			if prop.ty == PropertyType::Undefined {
				prop.ty = value_ty;
			}
		}
		states.store_state(state)?;
	} else {
		let ty = match def.def.required_type {
			PropertyType::Undefined => value_ty,
			required => required,
		};
		let mut prop = PropertyState::new(prop_id.clone(), ty, multi);
		prop.def_id = Some(def.id);
		prop.values = values;
		states.store_state(ItemState::new_property(prop))?;

		let mut parent_item = states.get(&ItemId::Node(parent))?;
		parent_item
			.node_mut()
			.expect("parent is a node; qed")
			.add_property_name(name.clone());
		states.store_state(parent_item)?;
	}
	Ok(prop_id)
}

pub(crate) fn remove_property_impl(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	parent: NodeId,
	name: &Name,
	internal: bool,
) -> Result<()> {
	states.ensure_edit();
	let prop_id = ItemId::Property(PropertyId::new(parent, name.clone()));
	let state = states.get(&prop_id)?;

	if !internal {
		let hier = HierarchyManager::new(&*states, env.ctx.root_id);
		let path = hier.path_of(&prop_id)?;
		env.ctx.locks.check_lock(&path, env.ctx.session_id)?;
		if !ops::is_checked_out(&*states, parent)? {
			return Err(Error::Versioning(format!("{} is checked in", path)));
		}
		if !env.ctx.access.is_granted(&path, Permission::REMOVE_PROPERTY) {
			return Err(Error::AccessDenied(format!("cannot remove {}", path)));
		}
		if let Some(def_id) = state.property().and_then(|prop| prop.def_id) {
			if env.ctx.registry.prop_def(def_id)?.def.protected {
				return Err(Error::ConstraintViolation(format!("{} is protected", path)));
			}
		}
	}

	let mut parent_item = states.get(&ItemId::Node(parent))?;
	parent_item
		.node_mut()
		.expect("parent is a node; qed")
		.remove_property_name(name);
	states.store_state(parent_item)?;
	states.destroy(&prop_id)
}

pub(crate) fn add_mixin_impl(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	node: NodeId,
	mixin: &Name,
) -> Result<()> {
	states.ensure_edit();
	let ty = env.ctx.registry.get_type(mixin)?;
	if !ty.is_mixin {
		return Err(Error::ConstraintViolation(format!("{} is not a mixin", mixin)));
	}
	check_type_change(states, env, node)?;

	let mut item = states.get(&ItemId::Node(node))?;
	let mut node_state = item.node().cloned().expect("node state; qed");
	if !node_state.mixins.insert(mixin.clone()) {
		return Ok(());
	}
	let ent = ops::effective_of(&env.ctx.registry, &node_state)?;
	let new_props = ops::auto_created_property_states(&mut node_state, &ent)?;
	*item.node_mut().expect("node state; qed") = node_state.clone();
	states.store_state(item)?;
	for prop in new_props {
		states.store_state(prop)?;
	}
	sync_type_properties(states, env, &node_state)
}

pub(crate) fn remove_mixin_impl(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	node: NodeId,
	mixin: &Name,
) -> Result<()> {
	states.ensure_edit();
	if mixin == &*wk::MIX_SHAREABLE {
		return Err(Error::UnsupportedOperation(
			"the shareable mixin cannot be removed".into(),
		));
	}
	check_type_change(states, env, node)?;

	let mut item = states.get(&ItemId::Node(node))?;
	let mut node_state = item.node().cloned().expect("node state; qed");
	if !node_state.mixins.remove(mixin) {
		return Err(Error::NotFound(format!("mixin {} not present on {}", mixin, node)));
	}

	// auto-created properties of the departing mixin go away with it
	let names: Vec<Name> = node_state.property_names.iter().cloned().collect();
	let mut dropped = Vec::new();
	for name in names {
		let prop_id = ItemId::Property(PropertyId::new(node, name.clone()));
		let declaring = states
			.get(&prop_id)
			.ok()
			.and_then(|state| state.property().and_then(|prop| prop.def_id))
			.and_then(|def_id| env.ctx.registry.prop_def(def_id).ok())
			.map(|rec| rec.declaring_type.clone());
		if declaring.as_ref() == Some(mixin) {
			node_state.remove_property_name(&name);
			dropped.push(prop_id);
		}
	}
	*item.node_mut().expect("node state; qed") = node_state.clone();
	states.store_state(item)?;
	for prop_id in dropped {
		states.destroy(&prop_id)?;
	}
	sync_type_properties(states, env, &node_state)
}

pub(crate) fn set_primary_type_impl(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	node: NodeId,
	primary: &Name,
) -> Result<()> {
	states.ensure_edit();
	let ty = env.ctx.registry.get_type(primary)?;
	if ty.is_mixin {
		return Err(Error::ConstraintViolation(format!("{} is a mixin", primary)));
	}
	check_type_change(states, env, node)?;

	let mut item = states.get(&ItemId::Node(node))?;
	let mut node_state = item.node().cloned().expect("node state; qed");
	node_state.primary_type = primary.clone();
	*item.node_mut().expect("node state; qed") = node_state.clone();
	states.store_state(item)?;
	sync_type_properties(states, env, &node_state)
}

/// The preconditions every type change (mixin add/remove, primary-type
/// change) shares: the node must be unlocked, checked out and writable by
/// this session.
fn check_type_change(
	states: &SessionItemStateManager,
	env: &Env<'_>,
	node: NodeId,
) -> Result<()> {
	let hier = HierarchyManager::new(states, env.ctx.root_id);
	let path = hier.path_of(&ItemId::Node(node))?;
	env.ctx.locks.check_lock(&path, env.ctx.session_id)?;
	if !ops::is_checked_out(states, node)? {
		return Err(Error::Versioning(format!("{} is checked in", path)));
	}
	if !env.ctx.access.is_granted(&path, Permission::SET_PROPERTY) {
		return Err(Error::AccessDenied(format!("cannot change the type of {}", path)));
	}
	Ok(())
}

/// Keep the system type properties in line with the state fields.
fn sync_type_properties(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	node: &NodeState,
) -> Result<()> {
	if node.has_property_name(&wk::PRIMARY_TYPE) {
		set_property_impl(
			states,
			env,
			node.id(),
			&wk::PRIMARY_TYPE,
			vec![Value::Name(node.primary_type.clone())],
			false,
			true,
		)?;
	}
	if node.has_property_name(&wk::MIXIN_TYPES) {
		set_property_impl(
			states,
			env,
			node.id(),
			&wk::MIXIN_TYPES,
			node.mixins.iter().cloned().map(Value::Name).collect(),
			true,
			true,
		)?;
	}
	Ok(())
}

pub(crate) fn remove_node_impl(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	node: NodeId,
) -> Result<()> {
	let parent = states
		.get(&ItemId::Node(node))?
		.node()
		.and_then(|state| state.parent)
		.ok_or_else(|| Error::Repository("cannot remove the root node".into()))?;
	remove_node_from_impl(states, env, parent, node)
}

/// Unlink `node` from `parent`; for a share this only drops the share.
pub(crate) fn remove_node_from_impl(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	parent: NodeId,
	node: NodeId,
) -> Result<()> {
	states.ensure_edit();
	let mut batch = BatchedOperations::new(states, env.ctx)?;
	batch.check_remove_node(
		node,
		parent,
		CheckOptions::ACCESS | CheckOptions::LOCK | CheckOptions::VERSIONING
			| CheckOptions::CONSTRAINTS,
	)?;
	batch.remove_child_node(parent, node)
}

// --- save ----------------------------------------------------------------

/// Persist the transient closure under `target` per the save contract:
/// collect, check independence, validate, transition, commit atomically.
pub(crate) fn save_item(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	target: &ItemId,
) -> Result<()> {
	// the item itself must exist, possibly only transiently or in the attic
	states.get_with_attic(target)?;

	let mut dirty = collect_dirty(states, target)?;
	let removed = collect_removed(states, target);
	check_independence(states, env, &dirty, &removed)?;
	validate_access(states, env, &dirty, &removed)?;
	validate_node_types(states, env, &dirty)?;
	validate_properties(states, env, &dirty)?;
	validate_references_on_remove(states, env, &dirty, &removed)?;

	let folded = apply_type_transitions(states, env, &dirty)?;
	if !folded.is_empty() {
		// version-history initialization created new transient state
		dirty = collect_dirty(states, target)?;
		for id in folded {
			if !dirty.contains(&id) && states.has_transient(&id) {
				dirty.push(id);
			}
		}
	}

	if dirty.is_empty() && removed.is_empty() {
		return Ok(());
	}
	trace!(
		target: "session",
		"saving {}: {} dirty, {} removed",
		target, dirty.len(), removed.len(),
	);

	let mut log = ChangeLog::new();
	for id in &removed {
		let state = states
			.attic_state(id)
			.cloned()
			.ok_or_else(|| Error::InvalidItemState(format!("attic state {} vanished", id)))?;
		log.deleted.push(state);
	}
	for id in &dirty {
		let state = states
			.transient(id)
			.cloned()
			.ok_or_else(|| Error::InvalidItemState(format!("transient state {} vanished", id)))?;
		match state.status {
			ItemStatus::New => log.added.push(state),
			ItemStatus::ExistingModified => log.modified.push(state),
			other => {
				return Err(Error::InvalidItemState(format!(
					"cannot save {} in status {}",
					id, other,
				)))
			},
		}
	}

	if let Err(err) = states.store().apply(log) {
		// nothing was applied; mark what went stale and report
		if let StateError::Stale(id) = &err {
			let destroyed = !states.store().has(id);
			states.mark_stale(id, destroyed);
		}
		return Err(err.into());
	}

	for id in &removed {
		states.commit_attic(id);
		if let Some(data) = env.items.cache().lookup(id) {
			data.set_status(ItemDataStatus::Destroyed);
		}
		env.items.cache().evict(id);
	}
	for id in &dirty {
		states.commit_transient(id);
		if let Some(data) = env.items.cache().lookup(id) {
			data.set_status(ItemDataStatus::Normal);
		}
	}
	Ok(())
}

fn collect_dirty(states: &SessionItemStateManager, target: &ItemId) -> Result<Vec<ItemId>> {
	let mut dirty = Vec::new();
	if let Some(state) = states.transient(target) {
		check_saveable(target, state.status)?;
		dirty.push(target.clone());
	}
	if let ItemId::Node(node) = target {
		for id in states.descendant_transients(*node) {
			let state = states
				.transient(&id)
				.expect("descendant iteration yields transient ids; qed");
			check_saveable(&id, state.status)?;
			dirty.push(id);
		}
	}
	Ok(dirty)
}

fn check_saveable(id: &ItemId, status: ItemStatus) -> Result<()> {
	match status {
		ItemStatus::New | ItemStatus::ExistingModified => Ok(()),
		ItemStatus::StaleModified => Err(Error::InvalidItemState(format!(
			"{} was modified externally",
			id,
		))),
		ItemStatus::StaleDestroyed => Err(Error::InvalidItemState(format!(
			"{} was destroyed externally",
			id,
		))),
		other => Err(Error::InvalidItemState(format!("{} is {}", id, other))),
	}
}

fn collect_removed(states: &SessionItemStateManager, target: &ItemId) -> Vec<ItemId> {
	match target {
		ItemId::Node(node) => states
			.descendant_transients_in_attic(*node)
			.into_iter()
			.filter(|id| {
				states
					.attic_state(id)
					.map(|state| state.status == ItemStatus::ExistingRemoved)
					.unwrap_or(false)
			})
			.collect(),
		ItemId::Property(_) => match states.attic_state(target) {
			Some(_) => vec![target.clone()],
			None => Vec::new(),
		},
	}
}

/// Every transient dependency of an affected state must itself be saved in
/// this call; otherwise the caller must save from a higher node.
fn check_independence(
	states: &SessionItemStateManager,
	env: &Env<'_>,
	dirty: &[ItemId],
	removed: &[ItemId],
) -> Result<()> {
	let affected: HashSet<&ItemId> = dirty.iter().chain(removed.iter()).collect();
	let require = |dep: NodeId| -> Result<()> {
		let dep_id = ItemId::Node(dep);
		if (states.has_transient(&dep_id) || states.has_transient_in_attic(&dep_id))
			&& !affected.contains(&dep_id)
		{
			return Err(Error::ConstraintViolation(format!(
				"item cannot be saved alone: related node {} has pending changes; save an ancestor",
				dep,
			)));
		}
		Ok(())
	};

	for id in dirty.iter().chain(removed.iter()) {
		let state = match states.get_with_attic(id) {
			Ok(state) => state,
			Err(_) => continue,
		};
		let node = match state.node() {
			Some(node) => node,
			None => {
				// a created or removed property changes the parent's
				// property-name set, so the parent must come along
				if matches!(state.status, ItemStatus::New | ItemStatus::ExistingRemoved) {
					if let Some(parent) = state.parent_id() {
						require(parent)?;
					}
				}
				continue;
			},
		};
		match state.status {
			ItemStatus::New => {
				if let Some(parent) = node.parent {
					require(parent)?;
				}
			},
			ItemStatus::ExistingModified | ItemStatus::ExistingRemoved => {
				let twin = match states.overlayed(id) {
					Ok(twin) => twin,
					Err(_) => continue,
				};
				let twin_node = twin.node().expect("node twin; qed");
				if twin_node.parent != node.parent {
					// moved: both ends are involved
					if let Some(parent) = twin_node.parent {
						require(parent)?;
					}
					if let Some(parent) = node.parent {
						require(parent)?;
					}
				} else if let Some(parent) = node.parent {
					// renamed in place: the parent carries the renamed entry
					if renamed_under(states, node.id(), parent) {
						require(parent)?;
					}
				}
				if state.status == ItemStatus::ExistingModified {
					for added in entry_diff(node, twin_node) {
						require(added)?;
					}
					for gone in entry_diff(twin_node, node) {
						require(gone)?;
					}
				}
				if state.status == ItemStatus::ExistingRemoved {
					if let Some(set) = &node.shared_set {
						for parent in set {
							require(*parent)?;
						}
					}
				}
			},
			_ => (),
		}
	}
	let _ = env;
	Ok(())
}

/// Child ids present in `a` but not in `b`.
fn entry_diff(a: &NodeState, b: &NodeState) -> Vec<NodeId> {
	a.child_entries()
		.iter()
		.filter(|entry| b.child_entry_by_id(entry.id).is_none())
		.map(|entry| entry.id)
		.collect()
}

fn renamed_under(states: &SessionItemStateManager, node: NodeId, parent: NodeId) -> bool {
	let twin_parent = match states.overlayed(&ItemId::Node(parent)) {
		Ok(twin) => twin,
		Err(_) => return false,
	};
	let current_parent = match states.get(&ItemId::Node(parent)) {
		Ok(state) => state,
		Err(_) => return false,
	};
	let old_name = twin_parent
		.node()
		.and_then(|state| state.child_entry_by_id(node))
		.map(|entry| entry.name.clone());
	let new_name = current_parent
		.node()
		.and_then(|state| state.child_entry_by_id(node))
		.map(|entry| entry.name.clone());
	matches!((old_name, new_name), (Some(old), Some(new)) if old != new)
}

fn validate_access(
	states: &SessionItemStateManager,
	env: &Env<'_>,
	dirty: &[ItemId],
	removed: &[ItemId],
) -> Result<()> {
	let view = AtticView(states);
	let hier = HierarchyManager::new(&view, env.ctx.root_id);
	for id in dirty {
		let state = states
			.transient(id)
			.ok_or_else(|| Error::InvalidItemState(format!("transient state {} vanished", id)))?;
		if state.status != ItemStatus::ExistingModified {
			// permissions for new states were enforced by the add
			continue;
		}
		let path = hier.path_of(id)?;
		match state.node() {
			Some(node) => {
				let twin = states.overlayed(id)?;
				let twin_node = twin.node().expect("node twin; qed");
				for added in node
					.child_entries()
					.iter()
					.filter(|entry| twin_node.child_entry_by_id(entry.id).is_none())
				{
					if !env.ctx.access.is_granted_on_child(
						&path,
						&added.name,
						Permission::ADD_NODE,
					) {
						return Err(Error::AccessDenied(format!(
							"cannot add {} under {}",
							added.name, path,
						)));
					}
				}
				for name in node
					.property_names
					.iter()
					.filter(|name| !twin_node.has_property_name(name))
				{
					if !env.ctx.access.is_granted_on_child(
						&path,
						name,
						Permission::SET_PROPERTY,
					) {
						return Err(Error::AccessDenied(format!(
							"cannot set {} on {}",
							name, path,
						)));
					}
				}
			},
			None => {
				if !env.ctx.access.is_granted(&path, Permission::SET_PROPERTY) {
					return Err(Error::AccessDenied(format!("cannot set {}", path)));
				}
			},
		}
	}
	// removed items are no longer linked in the overlay; their paths come
	// from the persistent view, where the removal is not yet committed
	let store_view = StoreProvider(states.store().clone());
	let store_hier = HierarchyManager::new(&store_view, env.ctx.root_id);
	for id in removed {
		let path = store_hier.path_of(id)?;
		let perm = if id.is_node() { Permission::REMOVE_NODE } else { Permission::REMOVE_PROPERTY };
		if !env.ctx.access.is_granted(&path, perm) {
			return Err(Error::AccessDenied(format!("cannot remove {}", path)));
		}
	}
	Ok(())
}

fn validate_node_types(
	states: &SessionItemStateManager,
	env: &Env<'_>,
	dirty: &[ItemId],
) -> Result<()> {
	let registry = &env.ctx.registry;
	for id in dirty {
		let state = states
			.transient(id)
			.ok_or_else(|| Error::InvalidItemState(format!("transient state {} vanished", id)))?;
		let node = match state.node() {
			Some(node) => node,
			None => continue,
		};

		let type_changed = match states.overlayed(id) {
			Ok(twin) => {
				twin.node().map(|twin| twin.primary_type != node.primary_type).unwrap_or(true)
			},
			Err(_) => true,
		};
		if (state.status == ItemStatus::New || type_changed) && node.def_id.is_some() {
			let rec = registry.node_def(node.def_id.expect("checked above; qed"))?;
			for required in &rec.def.required_types {
				if !registry.is_derived_from(&node.primary_type, required)? {
					return Err(Error::ConstraintViolation(format!(
						"type {} of {} does not satisfy required type {}",
						node.primary_type,
						id,
						required,
					)));
				}
			}
		}

		let ent = ops::effective_of(registry, node)?;
		for rec in ent.mandatory_prop_defs() {
			let name = match &rec.def.name {
				Some(name) => name,
				None => continue,
			};
			// written by the version-history initialization, not by users
			if is_version_autoprop(name) {
				continue;
			}
			if !node.has_property_name(name) {
				return Err(Error::ConstraintViolation(format!(
					"mandatory property {} missing on {}",
					name, id,
				)));
			}
		}
		for rec in ent.mandatory_child_defs() {
			let name = match &rec.def.name {
				Some(name) => name,
				None => continue,
			};
			if !node.has_child_entry_named(name) {
				return Err(Error::ConstraintViolation(format!(
					"mandatory child {} missing on {}",
					name, id,
				)));
			}
		}
	}
	Ok(())
}

fn is_version_autoprop(name: &Name) -> bool {
	name == &*wk::VERSION_HISTORY
		|| name == &*wk::BASE_VERSION
		|| name == &*wk::IS_CHECKED_OUT
		|| name == &*wk::PREDECESSORS
}

fn validate_properties(
	states: &SessionItemStateManager,
	env: &Env<'_>,
	dirty: &[ItemId],
) -> Result<()> {
	let registry = &env.ctx.registry;
	for id in dirty {
		let state = states
			.transient(id)
			.ok_or_else(|| Error::InvalidItemState(format!("transient state {} vanished", id)))?;
		let prop = match state.property() {
			Some(prop) => prop,
			None => continue,
		};
		let rec = match prop.def_id {
			Some(def_id) => registry.prop_def(def_id)?,
			None => continue,
		};
		if rec.def.protected {
			continue;
		}
		EffectiveNodeType::check_set_property_constraints(&rec, &prop.values)?;

		// reference targets must exist and satisfy the constraint types
		let target_types: Vec<&Name> = rec
			.def
			.constraints
			.iter()
			.filter_map(|constraint| match constraint {
				arbor_nodetype::ValueConstraint::ReferenceType(name) => Some(name),
				_ => None,
			})
			.collect();
		for value in &prop.values {
			let target = match value.as_reference() {
				Some(target) => target,
				None => continue,
			};
			let target_state = states.get(&ItemId::Node(target)).map_err(|_| {
				Error::ReferentialIntegrity(format!(
					"{} references missing node {}",
					id, target,
				))
			})?;
			if target_types.is_empty() {
				continue;
			}
			let target_node = target_state
				.node()
				.ok_or_else(|| Error::Repository(format!("{} is not a node", target)))?;
			let target_ent = ops::effective_of(registry, target_node)?;
			if !target_types.iter().any(|name| target_ent.includes(name)) {
				return Err(Error::ConstraintViolation(format!(
					"reference target {} of {} has none of the required types",
					target, id,
				)));
			}
		}
	}
	Ok(())
}

/// A removed referenceable node must not stay referenced, except through
/// properties that go away or change in the same save.
fn validate_references_on_remove(
	states: &SessionItemStateManager,
	env: &Env<'_>,
	dirty: &[ItemId],
	removed: &[ItemId],
) -> Result<()> {
	let registry = &env.ctx.registry;
	for id in removed {
		let node = match states.attic_state(id).and_then(|state| state.node()) {
			Some(node) => node.clone(),
			None => continue,
		};
		let ent = ops::effective_of(registry, &node)?;
		if !ent.includes(&wk::MIX_REFERENCEABLE) {
			continue;
		}
		for source in states.store().node_references(node.id()) {
			let source_id = ItemId::Property(source.clone());
			if removed.contains(&source_id) {
				continue;
			}
			if dirty.contains(&source_id) {
				let still_references = states
					.transient(&source_id)
					.and_then(|state| state.property())
					.map(|prop| {
						prop.values
							.iter()
							.any(|value| value.as_reference() == Some(node.id()))
					})
					.unwrap_or(false);
				if !still_references {
					continue;
				}
			}
			return Err(Error::ReferentialIntegrity(format!(
				"{} is still referenced by {}",
				node.id(),
				source,
			)));
		}
	}
	Ok(())
}

/// Shareable and versionable transitions of §save: initialize shared-parent
/// sets and version histories. Returns ids of states folded in by the
/// version manager.
fn apply_type_transitions(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	dirty: &[ItemId],
) -> Result<Vec<ItemId>> {
	let registry = &env.ctx.registry;
	let mut folded = Vec::new();
	for id in dirty {
		let state = match states.transient(id) {
			Some(state) => state.clone(),
			None => continue,
		};
		let node = match state.node() {
			Some(node) => node.clone(),
			None => continue,
		};
		let ent = ops::effective_of(registry, &node)?;

		if ent.includes(&wk::MIX_SHAREABLE) {
			if node.shared_set.is_none() {
				let mut item = state.clone();
				item.node_mut().expect("node state; qed").init_shared_set();
				states.store_state(item)?;
			}
		} else if let Ok(twin) = states.overlayed(id) {
			if twin.node().map(|twin| twin.is_shareable()).unwrap_or(false) {
				return Err(Error::UnsupportedOperation(format!(
					"cannot remove the shareable mixin from {}",
					id,
				)));
			}
		}

		if ent.includes(&wk::MIX_VERSIONABLE) && !node.has_property_name(&wk::VERSION_HISTORY) {
			let info = env.ctx.versions.version_history(&node, &*states)?;
			for new_state in info.states {
				folded.push(new_state.id());
				states.store_state(new_state)?;
			}

			let mut item = states.get(id)?;
			let node_mut = item.node_mut().expect("node state; qed");
			let four: [(&Name, Value, bool); 4] = [
				(&wk::VERSION_HISTORY, Value::Reference(info.history_id), false),
				(&wk::BASE_VERSION, Value::Reference(info.root_version_id), false),
				(&wk::IS_CHECKED_OUT, Value::Boolean(true), false),
				(&wk::PREDECESSORS, Value::Reference(info.root_version_id), true),
			];
			let mut prop_states = Vec::new();
			for (name, value, multi) in four.iter() {
				let prop_id = PropertyId::new(node.id(), (*name).clone());
				let mut prop = PropertyState::new(prop_id.clone(), value.ty(), *multi);
				if let Ok(rec) = ent.applicable_property_def(name, value.ty(), *multi) {
					prop.def_id = Some(rec.id);
				}
				prop.values = vec![value.clone()];
				node_mut.add_property_name((*name).clone());
				prop_states.push(ItemState::new_property(prop));
			}
			states.store_state(item)?;
			for prop_state in prop_states {
				folded.push(prop_state.id());
				states.store_state(prop_state)?;
			}
		}
	}
	Ok(folded)
}

// --- refresh -------------------------------------------------------------

/// Discard the transient closure under `target`. A never-saved item in the
/// closure rejects the whole refresh before anything is discarded. With
/// `keep_changes` this is a documented no-op.
pub(crate) fn refresh_item(
	states: &mut SessionItemStateManager,
	env: &Env<'_>,
	target: &ItemId,
	keep_changes: bool,
) -> Result<()> {
	if keep_changes {
		return Ok(());
	}
	if let Some(state) = states.transient(target) {
		if state.status == ItemStatus::New {
			return Err(Error::Repository(format!(
				"cannot refresh {}: it has never been saved",
				target,
			)));
		}
	}

	let descendants = match target {
		ItemId::Node(node) => states.descendant_transients(*node),
		ItemId::Property(_) => Vec::new(),
	};
	// a never-saved item has no persistent state to fall back to; the
	// refresh fails as a whole rather than discarding it
	for id in &descendants {
		if states.transient(id).map(|state| state.status) == Some(ItemStatus::New) {
			return Err(Error::Repository(format!(
				"cannot refresh {}: {} has never been saved",
				target, id,
			)));
		}
	}

	// dispose deepest-first so parents see their children go first
	for id in descendants.into_iter().rev() {
		states.dispose_transient(&id);
	}
	if let ItemId::Node(node) = target {
		for id in states.descendant_transients_in_attic(*node) {
			states.dispose_transient_in_attic(&id);
		}
	}
	if states.has_transient(target) {
		states.dispose_transient(target);
	}
	if states.has_transient_in_attic(target) {
		states.dispose_transient_in_attic(target);
	}
	let _ = env;
	Ok(())
}
