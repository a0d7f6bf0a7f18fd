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

//! Stable item identifiers.

use std::fmt;

use rand::RngCore;

use crate::name::Name;

/// Globally unique, immutable 128-bit node identifier.
///
/// Two live nodes share an id only in the shareable-node case, where one
/// underlying node is reachable under multiple parents.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; 16]);

impl NodeId {
	/// Create an id from its raw byte representation.
	pub const fn from_bytes(bytes: [u8; 16]) -> Self {
		NodeId(bytes)
	}

	/// Allocate a fresh random id.
	pub fn random() -> Self {
		let mut bytes = [0u8; 16];
		rand::thread_rng().fill_bytes(&mut bytes);
		NodeId(bytes)
	}

	/// The raw byte representation.
	pub fn as_bytes(&self) -> &[u8; 16] {
		&self.0
	}

	/// Parse an id from its 32-digit lower-hex rendering.
	pub fn from_hex(s: &str) -> Result<Self, IdParseError> {
		if s.len() != 32 {
			return Err(IdParseError::BadLength(s.len()));
		}
		let mut bytes = [0u8; 16];
		for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
			let hi = hex_val(chunk[0]).ok_or(IdParseError::BadDigit)?;
			let lo = hex_val(chunk[1]).ok_or(IdParseError::BadDigit)?;
			bytes[i] = hi << 4 | lo;
		}
		Ok(NodeId(bytes))
	}
}

fn hex_val(b: u8) -> Option<u8> {
	match b {
		b'0'..=b'9' => Some(b - b'0'),
		b'a'..=b'f' => Some(b - b'a' + 10),
		b'A'..=b'F' => Some(b - b'A' + 10),
		_ => None,
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for byte in &self.0 {
			write!(f, "{:02x}", byte)?;
		}
		Ok(())
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "NodeId({})", self)
	}
}

/// Failure to parse an identifier from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
	/// The input was not exactly 32 hex digits.
	#[error("expected 32 hex digits, got {0}")]
	BadLength(usize),
	/// The input contained a non-hex character.
	#[error("invalid hex digit")]
	BadDigit,
}

/// Identifier of a property: the owning node plus the property name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyId {
	/// Id of the node the property is attached to.
	pub parent: NodeId,
	/// Qualified name of the property.
	pub name: Name,
}

impl PropertyId {
	/// Create a property id.
	pub fn new(parent: NodeId, name: Name) -> Self {
		PropertyId { parent, name }
	}
}

impl fmt::Display for PropertyId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}/{}", self.parent, self.name)
	}
}

impl fmt::Debug for PropertyId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "PropertyId({})", self)
	}
}

/// Identifier of an item, node or property.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemId {
	/// A node.
	Node(NodeId),
	/// A property.
	Property(PropertyId),
}

impl ItemId {
	/// Whether this identifies a node.
	pub fn is_node(&self) -> bool {
		matches!(self, ItemId::Node(_))
	}

	/// Whether this identifies a property.
	pub fn is_property(&self) -> bool {
		matches!(self, ItemId::Property(_))
	}

	/// The node id, if this identifies a node.
	pub fn node_id(&self) -> Option<NodeId> {
		match self {
			ItemId::Node(id) => Some(*id),
			ItemId::Property(_) => None,
		}
	}

	/// The property id, if this identifies a property.
	pub fn property_id(&self) -> Option<&PropertyId> {
		match self {
			ItemId::Node(_) => None,
			ItemId::Property(id) => Some(id),
		}
	}
}

impl From<NodeId> for ItemId {
	fn from(id: NodeId) -> Self {
		ItemId::Node(id)
	}
}

impl From<PropertyId> for ItemId {
	fn from(id: PropertyId) -> Self {
		ItemId::Property(id)
	}
}

impl fmt::Display for ItemId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ItemId::Node(id) => write!(f, "{}", id),
			ItemId::Property(id) => write!(f, "{}", id),
		}
	}
}

impl fmt::Debug for ItemId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "ItemId({})", self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hex_round_trip() {
		let id = NodeId::random();
		let parsed = NodeId::from_hex(&id.to_string()).unwrap();
		assert_eq!(id, parsed);
	}

	#[test]
	fn rejects_malformed_hex() {
		assert_eq!(NodeId::from_hex("abc"), Err(IdParseError::BadLength(3)));
		assert_eq!(
			NodeId::from_hex("zz000000000000000000000000000000"),
			Err(IdParseError::BadDigit),
		);
	}

	#[test]
	fn random_ids_are_distinct() {
		let a = NodeId::random();
		let b = NodeId::random();
		assert_ne!(a, b);
	}
}
