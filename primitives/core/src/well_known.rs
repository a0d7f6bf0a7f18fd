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

//! Names of the built-in types and system properties.

use lazy_static::lazy_static;

use crate::name::Name;

/// Namespace of everything the system defines.
pub const NS_SYS: &str = "sys";

lazy_static! {
	// System-maintained properties.

	/// Name of the primary-type property present on every node.
	pub static ref PRIMARY_TYPE: Name = Name::new(NS_SYS, "primaryType");
	/// Name of the mixin-types property.
	pub static ref MIXIN_TYPES: Name = Name::new(NS_SYS, "mixinTypes");
	/// Name of the uuid property of referenceable nodes.
	pub static ref UUID: Name = Name::new(NS_SYS, "uuid");
	/// Creation timestamp of hierarchy nodes.
	pub static ref CREATED: Name = Name::new(NS_SYS, "created");
	/// Modification timestamp of resources.
	pub static ref LAST_MODIFIED: Name = Name::new(NS_SYS, "lastModified");
	/// Version-history reference of versionable nodes.
	pub static ref VERSION_HISTORY: Name = Name::new(NS_SYS, "versionHistory");
	/// Base-version reference of versionable nodes.
	pub static ref BASE_VERSION: Name = Name::new(NS_SYS, "baseVersion");
	/// Check-out flag of versionable nodes.
	pub static ref IS_CHECKED_OUT: Name = Name::new(NS_SYS, "isCheckedOut");
	/// Predecessor references of versionable nodes.
	pub static ref PREDECESSORS: Name = Name::new(NS_SYS, "predecessors");
	/// Owner of a lock on a lockable node.
	pub static ref LOCK_OWNER: Name = Name::new(NS_SYS, "lockOwner");

	// Primary types.

	/// Abstract base type of every node.
	pub static ref NT_BASE: Name = Name::new(NS_SYS, "base");
	/// Free-form type: residual properties and same-name-sibling children.
	pub static ref NT_UNSTRUCTURED: Name = Name::new(NS_SYS, "unstructured");
	/// Folder-like type carrying a creation timestamp.
	pub static ref NT_HIERARCHY_NODE: Name = Name::new(NS_SYS, "hierarchyNode");
	/// Leaf content type carrying a modification timestamp.
	pub static ref NT_RESOURCE: Name = Name::new(NS_SYS, "resource");
	/// Type of the repository root node.
	pub static ref NT_ROOT: Name = Name::new(NS_SYS, "root");
	/// A single version inside a version history.
	pub static ref NT_VERSION: Name = Name::new(NS_SYS, "version");
	/// A version history.
	pub static ref NT_VERSION_HISTORY: Name = Name::new(NS_SYS, "versionHistory");
	/// Frozen state captured by a version.
	pub static ref NT_FROZEN_NODE: Name = Name::new(NS_SYS, "frozenNode");

	// Mixin types.

	/// Marks a node as referenceable; assigns the uuid property.
	pub static ref MIX_REFERENCEABLE: Name = Name::new(NS_SYS, "referenceable");
	/// Marks a node as shareable across multiple parents.
	pub static ref MIX_SHAREABLE: Name = Name::new(NS_SYS, "shareable");
	/// Marks a node as versionable.
	pub static ref MIX_VERSIONABLE: Name = Name::new(NS_SYS, "versionable");
	/// Marks a node as lockable.
	pub static ref MIX_LOCKABLE: Name = Name::new(NS_SYS, "lockable");

	// Structural names used by the version storage.

	/// Name of the root version inside a version history.
	pub static ref ROOT_VERSION: Name = Name::new(NS_SYS, "rootVersion");
	/// Name of the frozen child of a version.
	pub static ref FROZEN_NODE: Name = Name::new(NS_SYS, "frozenNode");
}
