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

//! The Arbor node-type system.
//!
//! A node type declares which children and properties a node may, must and
//! automatically does carry. Types form a single-inheritance-plus-mixins
//! lattice; the *effective node type* of a node is the closure over its
//! primary type, its mixins and all their supertypes, and is the object
//! every structural check is asked against.

#![warn(missing_docs)]

mod builtin;
mod defs;
mod effective;
mod registry;

pub use builtin::builtin;
pub use defs::{
	ChildNodeDef, NodeDefId, NodeTypeDef, PropDefId, PropertyDef, RegisteredChildNodeDef,
	RegisteredPropertyDef, ValueConstraint,
};
pub use effective::EffectiveNodeType;
pub use registry::{NodeTypeError, NodeTypeRegistry};
