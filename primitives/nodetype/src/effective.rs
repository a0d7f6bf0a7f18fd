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

//! The effective node type: the merged view over a primary type, its
//! mixins and all their supertypes.

use std::sync::Arc;

use arbor_core::{Name, PropertyType, Value};

use crate::defs::{RegisteredChildNodeDef, RegisteredPropertyDef, ValueConstraint};
use crate::registry::{NodeTypeError, NodeTypeRegistry};

/// Merged child/property declarations of a set of types.
///
/// Named definitions take precedence over residual ones; among equally
/// specific candidates the first registered wins.
#[derive(Debug)]
pub struct EffectiveNodeType {
	all_types: Vec<Name>,
	child_defs: Vec<Arc<RegisteredChildNodeDef>>,
	prop_defs: Vec<Arc<RegisteredPropertyDef>>,
}

impl EffectiveNodeType {
	pub(crate) fn new(
		all_types: Vec<Name>,
		child_defs: Vec<Arc<RegisteredChildNodeDef>>,
		prop_defs: Vec<Arc<RegisteredPropertyDef>>,
	) -> Self {
		EffectiveNodeType { all_types, child_defs, prop_defs }
	}

	/// Whether the closure contains `name`.
	pub fn includes(&self, name: &Name) -> bool {
		self.all_types.binary_search(name).is_ok()
	}

	/// Every type in the closure.
	pub fn all_types(&self) -> &[Name] {
		&self.all_types
	}

	/// Property definitions flagged mandatory.
	pub fn mandatory_prop_defs(&self) -> impl Iterator<Item = &Arc<RegisteredPropertyDef>> {
		self.prop_defs.iter().filter(|rec| rec.def.mandatory)
	}

	/// Child definitions flagged mandatory.
	pub fn mandatory_child_defs(&self) -> impl Iterator<Item = &Arc<RegisteredChildNodeDef>> {
		self.child_defs.iter().filter(|rec| rec.def.mandatory)
	}

	/// Property definitions flagged auto-create.
	pub fn auto_create_prop_defs(&self) -> impl Iterator<Item = &Arc<RegisteredPropertyDef>> {
		self.prop_defs.iter().filter(|rec| rec.def.auto_create)
	}

	/// Child definitions flagged auto-create.
	pub fn auto_create_child_defs(&self) -> impl Iterator<Item = &Arc<RegisteredChildNodeDef>> {
		self.child_defs.iter().filter(|rec| rec.def.auto_create)
	}

	/// The definition governing a property of the given name, type and
	/// cardinality.
	///
	/// Resolution order: named definition with matching type, named with
	/// `Undefined` type, then the residual equivalents.
	pub fn applicable_property_def(
		&self,
		name: &Name,
		ty: PropertyType,
		multi_valued: bool,
	) -> Result<Arc<RegisteredPropertyDef>, NodeTypeError> {
		let candidates = |residual: bool, exact: bool| {
			self.prop_defs.iter().find(|rec| {
				rec.is_residual() == residual
					&& rec.matches_name(name)
					&& rec.def.multi_valued == multi_valued
					&& if exact {
						rec.def.required_type == ty
					} else {
						rec.def.required_type == PropertyType::Undefined
					}
			})
		};
		candidates(false, true)
			.or_else(|| candidates(false, false))
			.or_else(|| candidates(true, true))
			.or_else(|| candidates(true, false))
			.cloned()
			.ok_or_else(|| {
				NodeTypeError::NoApplicableDef(format!(
					"property {} of type {} ({})",
					name,
					ty,
					if multi_valued { "multiple" } else { "single" },
				))
			})
	}

	/// The definition governing a child node of the given name and primary
	/// type. When `child_type` is `None` the definition's default type is
	/// assumed.
	pub fn applicable_child_def(
		&self,
		name: &Name,
		child_type: Option<&Name>,
		registry: &NodeTypeRegistry,
	) -> Result<Arc<RegisteredChildNodeDef>, NodeTypeError> {
		let mut fallback_err = None;
		for residual in &[false, true] {
			for rec in self.child_defs.iter().filter(|rec| {
				rec.is_residual() == *residual && rec.matches_name(name)
			}) {
				let effective_type = child_type.or(rec.def.default_type.as_ref());
				let effective_type = match effective_type {
					Some(ty) => ty,
					// A definition without a default cannot serve an
					// untyped request.
					None => {
						fallback_err.get_or_insert_with(|| {
							NodeTypeError::NoApplicableDef(format!(
								"child {} has no default type",
								name,
							))
						});
						continue;
					},
				};
				match self.satisfies_required_types(effective_type, rec, registry) {
					Ok(true) => return Ok(rec.clone()),
					Ok(false) => (),
					Err(err) => {
						fallback_err.get_or_insert(err);
					},
				}
			}
		}
		Err(fallback_err.unwrap_or_else(|| {
			NodeTypeError::NoApplicableDef(format!(
				"child {} of type {}",
				name,
				child_type.map(|ty| ty.to_string()).unwrap_or_else(|| "<default>".into()),
			))
		}))
	}

	fn satisfies_required_types(
		&self,
		ty: &Name,
		rec: &RegisteredChildNodeDef,
		registry: &NodeTypeRegistry,
	) -> Result<bool, NodeTypeError> {
		for required in &rec.def.required_types {
			if !registry.is_derived_from(ty, required)? {
				return Ok(false);
			}
		}
		Ok(true)
	}

	/// Whether adding a child of the given name and type is admissible:
	/// an applicable, unprotected definition must exist.
	pub fn check_add_node_constraints(
		&self,
		name: &Name,
		child_type: Option<&Name>,
		registry: &NodeTypeRegistry,
	) -> Result<Arc<RegisteredChildNodeDef>, NodeTypeError> {
		let rec = self.applicable_child_def(name, child_type, registry)?;
		if rec.def.protected {
			return Err(NodeTypeError::ConstraintViolation(format!(
				"child {} is protected",
				name,
			)));
		}
		Ok(rec)
	}

	/// Check values against a definition's constraints.
	///
	/// `ReferenceType` constraints admit any reference value here; resolving
	/// the target and checking its type needs a session and happens at save.
	pub fn check_set_property_constraints(
		def: &RegisteredPropertyDef,
		values: &[Value],
	) -> Result<(), NodeTypeError> {
		if def.def.constraints.is_empty() {
			return Ok(());
		}
		for value in values {
			let admitted = def.def.constraints.iter().any(|constraint| match constraint {
				ValueConstraint::ReferenceType(_) => {
					matches!(value, Value::Reference(_))
				},
				ValueConstraint::OneOf(allowed) => allowed.contains(value),
				ValueConstraint::LongRange(lo, hi) => match value {
					Value::Long(v) => {
						lo.map(|lo| *v >= lo).unwrap_or(true)
							&& hi.map(|hi| *v <= hi).unwrap_or(true)
					},
					_ => false,
				},
			});
			if !admitted {
				return Err(NodeTypeError::ConstraintViolation(format!(
					"value {:?} not admitted by {}",
					value, def.id,
				)));
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::defs::{NodeTypeDef, PropertyDef};
	use pretty_assertions::assert_eq;

	fn name(s: &str) -> Name {
		Name::parse(s).unwrap()
	}

	fn registry() -> NodeTypeRegistry {
		let registry = NodeTypeRegistry::new();
		let mut base = NodeTypeDef::new(name("t:base"));
		base.prop_defs.push(PropertyDef {
			name: Some(name("t:level")),
			required_type: PropertyType::Long,
			constraints: vec![ValueConstraint::LongRange(Some(0), Some(10))],
			..Default::default()
		});
		base.prop_defs.push(PropertyDef {
			name: None,
			required_type: PropertyType::Undefined,
			..Default::default()
		});
		registry.register(base).unwrap();
		registry
	}

	#[test]
	fn named_def_preferred_over_residual() {
		let registry = registry();
		let ent = registry.effective(&name("t:base"), &[]).unwrap();
		let rec = ent
			.applicable_property_def(&name("t:level"), PropertyType::Long, false)
			.unwrap();
		assert_eq!(rec.def.name, Some(name("t:level")));

		let rec = ent
			.applicable_property_def(&name("t:other"), PropertyType::String, false)
			.unwrap();
		assert_eq!(rec.def.name, None);
	}

	#[test]
	fn long_range_constraint() {
		let registry = registry();
		let ent = registry.effective(&name("t:base"), &[]).unwrap();
		let rec = ent
			.applicable_property_def(&name("t:level"), PropertyType::Long, false)
			.unwrap();
		assert!(EffectiveNodeType::check_set_property_constraints(&rec, &[Value::Long(5)])
			.is_ok());
		assert!(EffectiveNodeType::check_set_property_constraints(&rec, &[Value::Long(11)])
			.is_err());
	}
}
