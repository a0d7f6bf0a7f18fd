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

//! Node-type, child-node and property definitions.

use std::fmt;

use arbor_core::{Name, PropertyType, Value};

/// Handle of a registered child-node definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeDefId(
	/// The raw registry index.
	pub u64,
);

/// Handle of a registered property definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropDefId(
	/// The raw registry index.
	pub u64,
);

impl fmt::Display for NodeDefId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "nd:{}", self.0)
	}
}

impl fmt::Display for PropDefId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "pd:{}", self.0)
	}
}

/// A constraint on the values of a property.
///
/// Constraints on one definition are OR-combined: a value is acceptable if
/// any constraint admits it.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueConstraint {
	/// For `Reference` properties: the target node's effective type must
	/// include this type.
	ReferenceType(Name),
	/// The value must equal one of the listed values.
	OneOf(Vec<Value>),
	/// Inclusive range on `Long` values.
	LongRange(Option<i64>, Option<i64>),
}

/// Declaration of a child node on a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildNodeDef {
	/// Child name; `None` declares a residual definition matching any name.
	pub name: Option<Name>,
	/// Types the child's primary type must equal or be derived from.
	pub required_types: Vec<Name>,
	/// Primary type used when the caller does not name one.
	pub default_type: Option<Name>,
	/// Created automatically together with the parent.
	pub auto_create: bool,
	/// Must exist for the parent to be valid.
	pub mandatory: bool,
	/// Only the implementation may add or remove the child.
	pub protected: bool,
	/// Whether several children of the same name are allowed.
	pub allows_sns: bool,
}

impl Default for ChildNodeDef {
	fn default() -> Self {
		ChildNodeDef {
			name: None,
			required_types: Vec::new(),
			default_type: None,
			auto_create: false,
			mandatory: false,
			protected: false,
			allows_sns: false,
		}
	}
}

/// Declaration of a property on a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
	/// Property name; `None` declares a residual definition.
	pub name: Option<Name>,
	/// Required value type; `Undefined` admits any.
	pub required_type: PropertyType,
	/// Whether the property holds a list of values.
	pub multi_valued: bool,
	/// Created automatically together with the node.
	pub auto_create: bool,
	/// Must exist for the node to be valid.
	pub mandatory: bool,
	/// Only the implementation may write the property.
	pub protected: bool,
	/// Value constraints, OR-combined.
	pub constraints: Vec<ValueConstraint>,
	/// Default values applied on auto-creation when no system-generated
	/// value rule matches.
	pub default_values: Vec<Value>,
}

impl Default for PropertyDef {
	fn default() -> Self {
		PropertyDef {
			name: None,
			required_type: PropertyType::Undefined,
			multi_valued: false,
			auto_create: false,
			mandatory: false,
			protected: false,
			constraints: Vec::new(),
			default_values: Vec::new(),
		}
	}
}

/// Declaration of a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTypeDef {
	/// The type name.
	pub name: Name,
	/// Direct supertypes. The closure over these contributes definitions.
	pub supertypes: Vec<Name>,
	/// Whether the type is a mixin.
	pub is_mixin: bool,
	/// Child-node declarations.
	pub child_defs: Vec<ChildNodeDef>,
	/// Property declarations.
	pub prop_defs: Vec<PropertyDef>,
}

impl NodeTypeDef {
	/// A type with no supertypes and no declarations.
	pub fn new(name: Name) -> Self {
		NodeTypeDef {
			name,
			supertypes: Vec::new(),
			is_mixin: false,
			child_defs: Vec::new(),
			prop_defs: Vec::new(),
		}
	}
}

/// A child-node definition as registered: the declaration plus its handle
/// and the type that declared it.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredChildNodeDef {
	/// Registry handle.
	pub id: NodeDefId,
	/// The type the definition was declared on.
	pub declaring_type: Name,
	/// The declaration itself.
	pub def: ChildNodeDef,
}

impl RegisteredChildNodeDef {
	/// Whether this definition matches the given child name.
	pub fn matches_name(&self, name: &Name) -> bool {
		match &self.def.name {
			Some(own) => own == name,
			None => true,
		}
	}

	/// Whether the definition is residual (matches any name).
	pub fn is_residual(&self) -> bool {
		self.def.name.is_none()
	}
}

/// A property definition as registered.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredPropertyDef {
	/// Registry handle.
	pub id: PropDefId,
	/// The type the definition was declared on.
	pub declaring_type: Name,
	/// The declaration itself.
	pub def: PropertyDef,
}

impl RegisteredPropertyDef {
	/// Whether this definition matches the given property name.
	pub fn matches_name(&self, name: &Name) -> bool {
		match &self.def.name {
			Some(own) => own == name,
			None => true,
		}
	}

	/// Whether the definition is residual (matches any name).
	pub fn is_residual(&self) -> bool {
		self.def.name.is_none()
	}
}
