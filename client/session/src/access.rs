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

//! The access-control seam.
//!
//! Policy evaluation is not this crate's business; sessions only ask the
//! yes/no questions defined here.

use bitflags::bitflags;

use arbor_core::{Name, Path};

bitflags! {
	/// The permissions a session operation may require.
	pub struct Permission: u32 {
		/// Read an item.
		const READ = 0b00001;
		/// Add a child node.
		const ADD_NODE = 0b00010;
		/// Create or change a property.
		const SET_PROPERTY = 0b00100;
		/// Remove a node.
		const REMOVE_NODE = 0b01000;
		/// Remove a property.
		const REMOVE_PROPERTY = 0b10000;
	}
}

/// Access decisions for one session.
pub trait AccessManager: Send + Sync {
	/// Whether all of `perms` are granted on the item at `path`.
	fn is_granted(&self, path: &Path, perms: Permission) -> bool;

	/// Whether all of `perms` are granted on the yet-to-exist child
	/// `child_name` of `parent_path`.
	fn is_granted_on_child(&self, parent_path: &Path, child_name: &Name, perms: Permission) -> bool {
		self.is_granted(&parent_path.child(child_name.clone(), 1), perms)
	}

	/// Shorthand for a read check.
	fn can_read(&self, path: &Path) -> bool {
		self.is_granted(path, Permission::READ)
	}
}

/// Grants everything. The default for repositories without a policy.
pub struct OpenAccess;

impl AccessManager for OpenAccess {
	fn is_granted(&self, _path: &Path, _perms: Permission) -> bool {
		true
	}
}

/// Deny-list access manager: a rule denies the given permissions on a path
/// and its whole subtree. Everything else is granted.
pub struct PathAccess {
	denied: Vec<(Path, Permission)>,
}

impl PathAccess {
	/// A manager with no rules (grants everything).
	pub fn new() -> Self {
		PathAccess { denied: Vec::new() }
	}

	/// Deny `perms` on `path` and its subtree.
	pub fn deny(mut self, path: Path, perms: Permission) -> Self {
		self.denied.push((path, perms));
		self
	}
}

impl Default for PathAccess {
	fn default() -> Self {
		Self::new()
	}
}

impl AccessManager for PathAccess {
	fn is_granted(&self, path: &Path, perms: Permission) -> bool {
		!self
			.denied
			.iter()
			.any(|(root, denied)| path.is_equal_or_descendant_of(root) && denied.intersects(perms))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn p(s: &str) -> Path {
		Path::parse(s).unwrap()
	}

	#[test]
	fn open_access_grants_all() {
		assert!(OpenAccess.is_granted(&p("/a"), Permission::all()));
	}

	#[test]
	fn deny_rules_cover_subtrees() {
		let access = PathAccess::new().deny(p("/secret"), Permission::READ);
		assert!(!access.can_read(&p("/secret")));
		assert!(!access.can_read(&p("/secret/inner")));
		assert!(access.can_read(&p("/public")));
		// only the denied permission is withheld
		assert!(access.is_granted(&p("/secret"), Permission::ADD_NODE));
	}
}
