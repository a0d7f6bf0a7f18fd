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

//! The built-in `sys` node types every repository starts with.

use arbor_core::{well_known as wk, PropertyType};

use crate::defs::{ChildNodeDef, NodeTypeDef, PropertyDef};
use crate::registry::NodeTypeRegistry;

/// A registry pre-loaded with the built-in types.
///
/// Registration order respects the supertype graph, so this cannot fail.
pub fn builtin() -> NodeTypeRegistry {
	let registry = NodeTypeRegistry::new();

	// sys:base — the implicit root of the type lattice. Declares the two
	// system-maintained type properties.
	let mut base = NodeTypeDef::new(wk::NT_BASE.clone());
	base.prop_defs.push(PropertyDef {
		name: Some(wk::PRIMARY_TYPE.clone()),
		required_type: PropertyType::Name,
		auto_create: true,
		mandatory: true,
		protected: true,
		..Default::default()
	});
	base.prop_defs.push(PropertyDef {
		name: Some(wk::MIXIN_TYPES.clone()),
		required_type: PropertyType::Name,
		multi_valued: true,
		auto_create: true,
		protected: true,
		..Default::default()
	});
	registry.register(base).expect("empty registry accepts sys:base");

	// sys:referenceable — assigns the uuid property.
	let mut referenceable = NodeTypeDef::new(wk::MIX_REFERENCEABLE.clone());
	referenceable.is_mixin = true;
	referenceable.prop_defs.push(PropertyDef {
		name: Some(wk::UUID.clone()),
		required_type: PropertyType::String,
		auto_create: true,
		mandatory: true,
		protected: true,
		..Default::default()
	});
	registry.register(referenceable).expect("sys:referenceable registers");

	// sys:shareable — a shareable node is necessarily referenceable.
	let mut shareable = NodeTypeDef::new(wk::MIX_SHAREABLE.clone());
	shareable.is_mixin = true;
	shareable.supertypes.push(wk::MIX_REFERENCEABLE.clone());
	registry.register(shareable).expect("sys:shareable registers");

	// sys:versionable — the four version properties, written by the
	// version-history initialization at save.
	let mut versionable = NodeTypeDef::new(wk::MIX_VERSIONABLE.clone());
	versionable.is_mixin = true;
	versionable.supertypes.push(wk::MIX_REFERENCEABLE.clone());
	for (name, ty, multi) in &[
		(&*wk::VERSION_HISTORY, PropertyType::Reference, false),
		(&*wk::BASE_VERSION, PropertyType::Reference, false),
		(&*wk::IS_CHECKED_OUT, PropertyType::Boolean, false),
		(&*wk::PREDECESSORS, PropertyType::Reference, true),
	] {
		versionable.prop_defs.push(PropertyDef {
			name: Some((*name).clone()),
			required_type: *ty,
			multi_valued: *multi,
			mandatory: true,
			protected: true,
			..Default::default()
		});
	}
	registry.register(versionable).expect("sys:versionable registers");

	// sys:lockable.
	let mut lockable = NodeTypeDef::new(wk::MIX_LOCKABLE.clone());
	lockable.is_mixin = true;
	lockable.prop_defs.push(PropertyDef {
		name: Some(wk::LOCK_OWNER.clone()),
		required_type: PropertyType::String,
		protected: true,
		..Default::default()
	});
	registry.register(lockable).expect("sys:lockable registers");

	// sys:unstructured — residual children (same-name siblings allowed,
	// defaulting to itself) and residual properties of both cardinalities.
	let mut unstructured = NodeTypeDef::new(wk::NT_UNSTRUCTURED.clone());
	unstructured.supertypes.push(wk::NT_BASE.clone());
	unstructured.child_defs.push(ChildNodeDef {
		name: None,
		default_type: Some(wk::NT_UNSTRUCTURED.clone()),
		allows_sns: true,
		..Default::default()
	});
	unstructured.prop_defs.push(PropertyDef::default());
	unstructured.prop_defs.push(PropertyDef {
		multi_valued: true,
		..Default::default()
	});
	registry.register(unstructured).expect("sys:unstructured registers");

	// sys:root — the repository root.
	let mut root = NodeTypeDef::new(wk::NT_ROOT.clone());
	root.supertypes.push(wk::NT_UNSTRUCTURED.clone());
	registry.register(root).expect("sys:root registers");

	// sys:hierarchyNode / sys:resource — timestamped content types.
	let mut hierarchy = NodeTypeDef::new(wk::NT_HIERARCHY_NODE.clone());
	hierarchy.supertypes.push(wk::NT_BASE.clone());
	hierarchy.prop_defs.push(PropertyDef {
		name: Some(wk::CREATED.clone()),
		required_type: PropertyType::Date,
		auto_create: true,
		protected: true,
		..Default::default()
	});
	registry.register(hierarchy).expect("sys:hierarchyNode registers");

	let mut resource = NodeTypeDef::new(wk::NT_RESOURCE.clone());
	resource.supertypes.push(wk::NT_BASE.clone());
	resource.prop_defs.push(PropertyDef {
		name: Some(wk::LAST_MODIFIED.clone()),
		required_type: PropertyType::Date,
		auto_create: true,
		..Default::default()
	});
	resource.prop_defs.push(PropertyDef {
		required_type: PropertyType::Binary,
		..Default::default()
	});
	registry.register(resource).expect("sys:resource registers");

	// Version storage types.
	let mut frozen = NodeTypeDef::new(wk::NT_FROZEN_NODE.clone());
	frozen.supertypes.push(wk::NT_BASE.clone());
	frozen.prop_defs.push(PropertyDef {
		protected: true,
		..Default::default()
	});
	frozen.prop_defs.push(PropertyDef {
		multi_valued: true,
		protected: true,
		..Default::default()
	});
	registry.register(frozen).expect("sys:frozenNode registers");

	let mut version = NodeTypeDef::new(wk::NT_VERSION.clone());
	version.supertypes.push(wk::NT_BASE.clone());
	version.supertypes.push(wk::MIX_REFERENCEABLE.clone());
	version.prop_defs.push(PropertyDef {
		name: Some(wk::CREATED.clone()),
		required_type: PropertyType::Date,
		auto_create: true,
		protected: true,
		..Default::default()
	});
	version.child_defs.push(ChildNodeDef {
		name: Some(wk::FROZEN_NODE.clone()),
		required_types: vec![wk::NT_FROZEN_NODE.clone()],
		default_type: Some(wk::NT_FROZEN_NODE.clone()),
		protected: true,
		..Default::default()
	});
	registry.register(version).expect("sys:version registers");

	let mut history = NodeTypeDef::new(wk::NT_VERSION_HISTORY.clone());
	history.supertypes.push(wk::NT_BASE.clone());
	history.supertypes.push(wk::MIX_REFERENCEABLE.clone());
	history.child_defs.push(ChildNodeDef {
		name: Some(wk::ROOT_VERSION.clone()),
		required_types: vec![wk::NT_VERSION.clone()],
		default_type: Some(wk::NT_VERSION.clone()),
		protected: true,
		..Default::default()
	});
	registry.register(history).expect("sys:versionHistory registers");

	registry
}

#[cfg(test)]
mod tests {
	use super::*;
	use arbor_core::Name;

	#[test]
	fn builtin_types_resolve() {
		let registry = builtin();
		for name in &[
			&*wk::NT_BASE,
			&*wk::NT_UNSTRUCTURED,
			&*wk::NT_ROOT,
			&*wk::NT_HIERARCHY_NODE,
			&*wk::NT_RESOURCE,
			&*wk::NT_VERSION,
			&*wk::NT_VERSION_HISTORY,
			&*wk::MIX_REFERENCEABLE,
			&*wk::MIX_SHAREABLE,
			&*wk::MIX_VERSIONABLE,
			&*wk::MIX_LOCKABLE,
		] {
			assert!(registry.has_type(name), "missing {}", name);
		}
	}

	#[test]
	fn shareable_is_referenceable() {
		let registry = builtin();
		assert!(registry
			.is_derived_from(&wk::MIX_SHAREABLE, &wk::MIX_REFERENCEABLE)
			.unwrap());
	}

	#[test]
	fn unstructured_accepts_arbitrary_children() {
		let registry = builtin();
		let ent = registry.effective(&wk::NT_UNSTRUCTURED, &[]).unwrap();
		let rec = ent
			.applicable_child_def(&Name::parse("anything").unwrap(), None, &registry)
			.unwrap();
		assert!(rec.def.allows_sns);
		assert_eq!(rec.def.default_type, Some(wk::NT_UNSTRUCTURED.clone()));
	}

	#[test]
	fn effective_unstructured_with_shareable_includes_referenceable() {
		let registry = builtin();
		let ent = registry
			.effective(&wk::NT_UNSTRUCTURED, &[wk::MIX_SHAREABLE.clone()])
			.unwrap();
		assert!(ent.includes(&wk::MIX_REFERENCEABLE));
		assert!(ent.includes(&wk::MIX_SHAREABLE));
		assert!(!ent.includes(&wk::MIX_VERSIONABLE));
	}
}
