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

//! The repository error taxonomy.

use arbor_state::StateError;

/// Result alias used throughout the session layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything a repository operation can fail with.
///
/// Path-addressed lookups that hit an access denial surface [`Error::NotFound`]
/// rather than [`Error::AccessDenied`] so that path probing cannot reveal the
/// existence of unreadable items; id-addressed lookups surface the denial.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	/// Permission missing for a required operation.
	#[error("access denied: {0}")]
	AccessDenied(String),
	/// The id or path does not resolve.
	#[error("not found: {0}")]
	NotFound(String),
	/// The item or its state is stale, destroyed or otherwise unusable.
	#[error("invalid item state: {0}")]
	InvalidItemState(String),
	/// A same-name sibling is disallowed, or a reused uuid collides.
	#[error("item exists: {0}")]
	ItemExists(String),
	/// Node-type, mandatory-child, value-constraint or protection violation.
	#[error("constraint violation: {0}")]
	ConstraintViolation(String),
	/// A referenceable node cannot go away while references remain.
	#[error("referential integrity: {0}")]
	ReferentialIntegrity(String),
	/// Modification of a checked-in node.
	#[error("versioning: {0}")]
	Versioning(String),
	/// Modification of a node locked by another session.
	#[error("locked: {0}")]
	Lock(String),
	/// The operation is not supported on this item.
	#[error("unsupported operation: {0}")]
	UnsupportedOperation(String),
	/// A lower-layer failure.
	#[error("repository: {0}")]
	Repository(String),
}

impl From<StateError> for Error {
	fn from(err: StateError) -> Self {
		match err {
			StateError::NoSuchItemState(id) => Error::NotFound(id.to_string()),
			StateError::Stale(id) => Error::InvalidItemState(format!("stale: {}", id)),
			StateError::Exists(id) => Error::ItemExists(id.to_string()),
			StateError::Store(msg) => Error::Repository(msg),
		}
	}
}

impl From<arbor_nodetype::NodeTypeError> for Error {
	fn from(err: arbor_nodetype::NodeTypeError) -> Self {
		use arbor_nodetype::NodeTypeError::*;
		match err {
			NoApplicableDef(msg) => Error::ConstraintViolation(msg),
			ConstraintViolation(msg) => Error::ConstraintViolation(msg),
			other => Error::Repository(other.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use arbor_core::{ItemId, NodeId};

	#[test]
	fn state_errors_map_to_repository_kinds() {
		let id = ItemId::Node(NodeId::random());
		assert!(matches!(
			Error::from(StateError::NoSuchItemState(id.clone())),
			Error::NotFound(_),
		));
		assert!(matches!(
			Error::from(StateError::Stale(id.clone())),
			Error::InvalidItemState(_),
		));
		assert!(matches!(Error::from(StateError::Exists(id)), Error::ItemExists(_)));
		assert!(matches!(
			Error::from(StateError::Store("io".into())),
			Error::Repository(_),
		));
	}
}
