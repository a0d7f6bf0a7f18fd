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

//! The shared node-type registry.

use std::collections::HashMap;
use std::sync::Arc;

use fnv::FnvHashMap;
use log::trace;
use parking_lot::RwLock;

use arbor_core::Name;

use crate::defs::{
	NodeDefId, NodeTypeDef, PropDefId, RegisteredChildNodeDef, RegisteredPropertyDef,
};
use crate::effective::EffectiveNodeType;

/// Errors raised by the node-type system.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeTypeError {
	/// A referenced type is not registered.
	#[error("no such node type: {0}")]
	NoSuchType(Name),
	/// A definition handle did not resolve.
	#[error("no such definition: {0}")]
	NoSuchDef(String),
	/// The type is already registered.
	#[error("node type {0} already registered")]
	AlreadyRegistered(Name),
	/// The supertype chain loops.
	#[error("cyclic inheritance involving {0}")]
	CyclicInheritance(Name),
	/// No definition admits the requested child or property.
	#[error("no applicable definition for {0}")]
	NoApplicableDef(String),
	/// A value violated the definition's constraints.
	#[error("value constraint violated: {0}")]
	ConstraintViolation(String),
}

#[derive(Default)]
struct Inner {
	types: HashMap<Name, Arc<NodeTypeDef>>,
	node_defs: FnvHashMap<u64, Arc<RegisteredChildNodeDef>>,
	prop_defs: FnvHashMap<u64, Arc<RegisteredPropertyDef>>,
	effective: HashMap<Vec<Name>, Arc<EffectiveNodeType>>,
	next_def_id: u64,
}

/// Registry of node types, shared by every session of a repository.
///
/// Read paths are lock-free apart from the inner `RwLock` read guard;
/// registration invalidates the effective-type cache.
#[derive(Default)]
pub struct NodeTypeRegistry {
	inner: RwLock<Inner>,
}

impl NodeTypeRegistry {
	/// An empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a node type. All supertypes must already be registered.
	pub fn register(&self, def: NodeTypeDef) -> Result<(), NodeTypeError> {
		let mut inner = self.inner.write();
		if inner.types.contains_key(&def.name) {
			return Err(NodeTypeError::AlreadyRegistered(def.name));
		}
		for supertype in &def.supertypes {
			if !inner.types.contains_key(supertype) {
				return Err(NodeTypeError::NoSuchType(supertype.clone()));
			}
		}
		trace!(target: "nodetype", "registering type {}", def.name);
		let name = def.name.clone();
		for child in &def.child_defs {
			let id = NodeDefId(inner.next_def_id);
			inner.next_def_id += 1;
			inner.node_defs.insert(
				id.0,
				Arc::new(RegisteredChildNodeDef {
					id,
					declaring_type: name.clone(),
					def: child.clone(),
				}),
			);
		}
		for prop in &def.prop_defs {
			let id = PropDefId(inner.next_def_id);
			inner.next_def_id += 1;
			inner.prop_defs.insert(
				id.0,
				Arc::new(RegisteredPropertyDef {
					id,
					declaring_type: name.clone(),
					def: prop.clone(),
				}),
			);
		}
		inner.types.insert(name, Arc::new(def));
		inner.effective.clear();
		Ok(())
	}

	/// Look up a registered type.
	pub fn get_type(&self, name: &Name) -> Result<Arc<NodeTypeDef>, NodeTypeError> {
		self.inner
			.read()
			.types
			.get(name)
			.cloned()
			.ok_or_else(|| NodeTypeError::NoSuchType(name.clone()))
	}

	/// Whether the type is registered.
	pub fn has_type(&self, name: &Name) -> bool {
		self.inner.read().types.contains_key(name)
	}

	/// Resolve a child-node definition handle.
	pub fn node_def(&self, id: NodeDefId) -> Result<Arc<RegisteredChildNodeDef>, NodeTypeError> {
		self.inner
			.read()
			.node_defs
			.get(&id.0)
			.cloned()
			.ok_or_else(|| NodeTypeError::NoSuchDef(id.to_string()))
	}

	/// Resolve a property definition handle.
	pub fn prop_def(&self, id: PropDefId) -> Result<Arc<RegisteredPropertyDef>, NodeTypeError> {
		self.inner
			.read()
			.prop_defs
			.get(&id.0)
			.cloned()
			.ok_or_else(|| NodeTypeError::NoSuchDef(id.to_string()))
	}

	/// Whether `sub` equals `sup` or transitively inherits from it.
	pub fn is_derived_from(&self, sub: &Name, sup: &Name) -> Result<bool, NodeTypeError> {
		if sub == sup {
			return Ok(true);
		}
		let inner = self.inner.read();
		let mut stack = vec![sub.clone()];
		let mut seen = Vec::new();
		while let Some(current) = stack.pop() {
			if seen.contains(&current) {
				continue;
			}
			let def = inner
				.types
				.get(&current)
				.ok_or_else(|| NodeTypeError::NoSuchType(current.clone()))?;
			for supertype in &def.supertypes {
				if supertype == sup {
					return Ok(true);
				}
				stack.push(supertype.clone());
			}
			seen.push(current);
		}
		Ok(false)
	}

	/// The effective node type of `primary` plus `mixins`.
	pub fn effective(
		&self,
		primary: &Name,
		mixins: &[Name],
	) -> Result<Arc<EffectiveNodeType>, NodeTypeError> {
		let mut key: Vec<Name> = Vec::with_capacity(1 + mixins.len());
		key.push(primary.clone());
		let mut sorted: Vec<Name> = mixins.to_vec();
		sorted.sort();
		key.extend(sorted);

		if let Some(cached) = self.inner.read().effective.get(&key) {
			return Ok(cached.clone());
		}

		let ent = Arc::new(self.build_effective(&key)?);
		self.inner.write().effective.insert(key, ent.clone());
		Ok(ent)
	}

	fn build_effective(&self, types: &[Name]) -> Result<EffectiveNodeType, NodeTypeError> {
		let inner = self.inner.read();
		let mut all_types = Vec::new();
		let mut stack: Vec<Name> = types.to_vec();
		// Transitive closure over supertypes, cycle-guarded.
		let mut fuel = inner.types.len() * (types.len() + 1) + types.len() + 1;
		while let Some(current) = stack.pop() {
			if all_types.contains(&current) {
				continue;
			}
			if fuel == 0 {
				return Err(NodeTypeError::CyclicInheritance(current));
			}
			fuel -= 1;
			let def = inner
				.types
				.get(&current)
				.ok_or_else(|| NodeTypeError::NoSuchType(current.clone()))?;
			stack.extend(def.supertypes.iter().cloned());
			all_types.push(current);
		}
		all_types.sort();

		let mut child_defs = Vec::new();
		let mut prop_defs = Vec::new();
		for rec in inner.node_defs.values() {
			if all_types.contains(&rec.declaring_type) {
				child_defs.push(rec.clone());
			}
		}
		for rec in inner.prop_defs.values() {
			if all_types.contains(&rec.declaring_type) {
				prop_defs.push(rec.clone());
			}
		}
		// Stable order so lookups prefer the same definition every time.
		child_defs.sort_by_key(|rec| rec.id);
		prop_defs.sort_by_key(|rec| rec.id);

		Ok(EffectiveNodeType::new(all_types, child_defs, prop_defs))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::defs::{ChildNodeDef, PropertyDef};
	use arbor_core::PropertyType;

	fn name(s: &str) -> Name {
		Name::parse(s).unwrap()
	}

	fn registry_with_base() -> NodeTypeRegistry {
		let registry = NodeTypeRegistry::new();
		registry.register(NodeTypeDef::new(name("t:base"))).unwrap();
		registry
	}

	#[test]
	fn register_requires_known_supertypes() {
		let registry = NodeTypeRegistry::new();
		let mut def = NodeTypeDef::new(name("t:sub"));
		def.supertypes.push(name("t:missing"));
		assert!(matches!(registry.register(def), Err(NodeTypeError::NoSuchType(_))));
	}

	#[test]
	fn double_registration_is_rejected() {
		let registry = registry_with_base();
		assert!(matches!(
			registry.register(NodeTypeDef::new(name("t:base"))),
			Err(NodeTypeError::AlreadyRegistered(_)),
		));
	}

	#[test]
	fn derivation_is_transitive() {
		let registry = registry_with_base();
		let mut mid = NodeTypeDef::new(name("t:mid"));
		mid.supertypes.push(name("t:base"));
		registry.register(mid).unwrap();
		let mut leaf = NodeTypeDef::new(name("t:leaf"));
		leaf.supertypes.push(name("t:mid"));
		registry.register(leaf).unwrap();

		assert!(registry.is_derived_from(&name("t:leaf"), &name("t:base")).unwrap());
		assert!(registry.is_derived_from(&name("t:leaf"), &name("t:leaf")).unwrap());
		assert!(!registry.is_derived_from(&name("t:base"), &name("t:leaf")).unwrap());
	}

	#[test]
	fn effective_type_merges_supertype_defs() {
		let registry = registry_with_base();
		let mut parent = NodeTypeDef::new(name("t:parent"));
		parent.supertypes.push(name("t:base"));
		parent.prop_defs.push(PropertyDef {
			name: Some(name("t:title")),
			required_type: PropertyType::String,
			..Default::default()
		});
		registry.register(parent).unwrap();

		let mut sub = NodeTypeDef::new(name("t:sub"));
		sub.supertypes.push(name("t:parent"));
		sub.child_defs.push(ChildNodeDef {
			name: Some(name("t:child")),
			..Default::default()
		});
		registry.register(sub).unwrap();

		let ent = registry.effective(&name("t:sub"), &[]).unwrap();
		assert!(ent.includes(&name("t:base")));
		assert!(ent.includes(&name("t:parent")));
		assert!(ent.includes(&name("t:sub")));
		assert!(ent
			.applicable_property_def(&name("t:title"), PropertyType::String, false)
			.is_ok());
		assert!(ent.applicable_child_def(&name("t:child"), None, &registry).is_ok());
	}

	#[test]
	fn effective_type_is_cached() {
		let registry = registry_with_base();
		let a = registry.effective(&name("t:base"), &[]).unwrap();
		let b = registry.effective(&name("t:base"), &[]).unwrap();
		assert!(Arc::ptr_eq(&a, &b));
	}
}
