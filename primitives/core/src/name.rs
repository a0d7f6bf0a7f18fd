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

//! Qualified names.

use std::fmt;
use std::sync::Arc;

/// A qualified name: namespace plus local name.
///
/// Equality, ordering and hashing consider both parts. Clones are cheap; the
/// backing strings are shared.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
	namespace: Arc<str>,
	local: Arc<str>,
}

impl Name {
	/// Create a name in the given namespace.
	pub fn new(namespace: &str, local: &str) -> Self {
		Name { namespace: namespace.into(), local: local.into() }
	}

	/// Create a name in the empty namespace.
	pub fn unqualified(local: &str) -> Self {
		Name::new("", local)
	}

	/// The namespace part. Empty for unqualified names.
	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	/// The local part.
	pub fn local(&self) -> &str {
		&self.local
	}

	/// Parse a `ns:local` or bare `local` rendering.
	pub fn parse(s: &str) -> Result<Self, NameParseError> {
		let (ns, local) = match s.find(':') {
			Some(pos) => (&s[..pos], &s[pos + 1..]),
			None => ("", s),
		};
		if local.is_empty() {
			return Err(NameParseError::EmptyLocalName(s.to_string()));
		}
		if local.contains(|c| c == '/' || c == ':' || c == '[' || c == ']') {
			return Err(NameParseError::IllegalCharacter(s.to_string()));
		}
		Ok(Name::new(ns, local))
	}
}

impl fmt::Display for Name {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.namespace.is_empty() {
			write!(f, "{}", self.local)
		} else {
			write!(f, "{}:{}", self.namespace, self.local)
		}
	}
}

impl fmt::Debug for Name {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Name({})", self)
	}
}

/// Failure to parse a qualified name from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameParseError {
	/// The local part was empty.
	#[error("empty local name in {0:?}")]
	EmptyLocalName(String),
	/// The local part contained a reserved character.
	#[error("illegal character in name {0:?}")]
	IllegalCharacter(String),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_and_display() {
		let name = Name::parse("sys:primaryType").unwrap();
		assert_eq!(name.namespace(), "sys");
		assert_eq!(name.local(), "primaryType");
		assert_eq!(name.to_string(), "sys:primaryType");

		let bare = Name::parse("data").unwrap();
		assert_eq!(bare.namespace(), "");
		assert_eq!(bare.to_string(), "data");
	}

	#[test]
	fn equality_covers_namespace() {
		assert_ne!(Name::new("a", "x"), Name::new("b", "x"));
		assert_eq!(Name::new("a", "x"), Name::new("a", "x"));
	}

	#[test]
	fn rejects_reserved_characters() {
		assert!(Name::parse("sys:").is_err());
		assert!(Name::parse("a:b/c").is_err());
		assert!(Name::parse("a:b[1]").is_err());
	}
}
