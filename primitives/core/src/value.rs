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

//! Property values and their types.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::id::NodeId;
use crate::name::Name;
use crate::path::Path;

/// The type of a property, or of a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
	/// UTF-8 text.
	String,
	/// 64-bit signed integer.
	Long,
	/// 64-bit float.
	Double,
	/// Boolean.
	Boolean,
	/// Milliseconds since the Unix epoch.
	Date,
	/// A qualified name.
	Name,
	/// An absolute path.
	Path,
	/// A reference to a referenceable node.
	Reference,
	/// Opaque bytes.
	Binary,
	/// No constraint; only legal on definitions, never on values.
	Undefined,
}

impl fmt::Display for PropertyType {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let s = match self {
			PropertyType::String => "String",
			PropertyType::Long => "Long",
			PropertyType::Double => "Double",
			PropertyType::Boolean => "Boolean",
			PropertyType::Date => "Date",
			PropertyType::Name => "Name",
			PropertyType::Path => "Path",
			PropertyType::Reference => "Reference",
			PropertyType::Binary => "Binary",
			PropertyType::Undefined => "Undefined",
		};
		write!(f, "{}", s)
	}
}

/// A single property value.
#[derive(Clone, PartialEq)]
pub enum Value {
	/// UTF-8 text.
	String(String),
	/// 64-bit signed integer.
	Long(i64),
	/// 64-bit float.
	Double(f64),
	/// Boolean.
	Boolean(bool),
	/// Milliseconds since the Unix epoch.
	Date(i64),
	/// A qualified name.
	Name(Name),
	/// An absolute path.
	Path(Path),
	/// A reference to a referenceable node.
	Reference(NodeId),
	/// Opaque bytes.
	Binary(Vec<u8>),
}

impl Value {
	/// The type of this value.
	pub fn ty(&self) -> PropertyType {
		match self {
			Value::String(_) => PropertyType::String,
			Value::Long(_) => PropertyType::Long,
			Value::Double(_) => PropertyType::Double,
			Value::Boolean(_) => PropertyType::Boolean,
			Value::Date(_) => PropertyType::Date,
			Value::Name(_) => PropertyType::Name,
			Value::Path(_) => PropertyType::Path,
			Value::Reference(_) => PropertyType::Reference,
			Value::Binary(_) => PropertyType::Binary,
		}
	}

	/// A `Date` value holding the current wall-clock time.
	pub fn now() -> Self {
		let millis = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_millis() as i64)
			.unwrap_or(0);
		Value::Date(millis)
	}

	/// The referenced node id, if this is a `Reference`.
	pub fn as_reference(&self) -> Option<NodeId> {
		match self {
			Value::Reference(id) => Some(*id),
			_ => None,
		}
	}

	/// The contained string, if this is a `String`.
	pub fn as_string(&self) -> Option<&str> {
		match self {
			Value::String(s) => Some(s),
			_ => None,
		}
	}

	/// The contained boolean, if this is a `Boolean`.
	pub fn as_boolean(&self) -> Option<bool> {
		match self {
			Value::Boolean(b) => Some(*b),
			_ => None,
		}
	}

	/// The contained name, if this is a `Name`.
	pub fn as_name(&self) -> Option<&Name> {
		match self {
			Value::Name(name) => Some(name),
			_ => None,
		}
	}
}

impl fmt::Debug for Value {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Value::String(s) => write!(f, "{:?}", s),
			Value::Long(v) => write!(f, "{}", v),
			Value::Double(v) => write!(f, "{}", v),
			Value::Boolean(v) => write!(f, "{}", v),
			Value::Date(v) => write!(f, "@{}", v),
			Value::Name(v) => write!(f, "{}", v),
			Value::Path(v) => write!(f, "{}", v),
			Value::Reference(v) => write!(f, "ref:{}", v),
			Value::Binary(v) => write!(f, "<{} bytes>", v.len()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn value_types() {
		assert_eq!(Value::Long(7).ty(), PropertyType::Long);
		assert_eq!(Value::Reference(NodeId::random()).ty(), PropertyType::Reference);
		assert_eq!(Value::now().ty(), PropertyType::Date);
	}

	#[test]
	fn reference_accessor() {
		let id = NodeId::random();
		assert_eq!(Value::Reference(id).as_reference(), Some(id));
		assert_eq!(Value::Long(1).as_reference(), None);
	}
}
