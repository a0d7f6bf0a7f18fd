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

//! Immutable absolute paths with ancestor/descendant algebra.

use std::fmt;

use smallvec::SmallVec;

use crate::name::{Name, NameParseError};

/// One path segment: a qualified name plus a 1-based same-name-sibling index.
///
/// Index 1 is the default and is normalized away when rendering, so
/// `/a/b` and `/a/b[1]` are the same path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathElement {
	name: Name,
	index: u32,
}

impl PathElement {
	/// Create an element. An `index` of zero is normalized to 1.
	pub fn new(name: Name, index: u32) -> Self {
		PathElement { name, index: index.max(1) }
	}

	/// The element name.
	pub fn name(&self) -> &Name {
		&self.name
	}

	/// The 1-based same-name-sibling index.
	pub fn index(&self) -> u32 {
		self.index
	}
}

impl fmt::Display for PathElement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.index > 1 {
			write!(f, "{}[{}]", self.name, self.index)
		} else {
			write!(f, "{}", self.name)
		}
	}
}

impl fmt::Debug for PathElement {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "PathElement({})", self)
	}
}

/// An absolute path. The empty element sequence denotes the root `/`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path {
	elements: SmallVec<[PathElement; 6]>,
}

impl Path {
	/// The root path `/`.
	pub fn root() -> Self {
		Path { elements: SmallVec::new() }
	}

	/// Whether this is the root path.
	pub fn is_root(&self) -> bool {
		self.elements.is_empty()
	}

	/// Number of elements; 0 for the root.
	pub fn depth(&self) -> usize {
		self.elements.len()
	}

	/// The elements in order, topmost first.
	pub fn elements(&self) -> &[PathElement] {
		&self.elements
	}

	/// The last element, `None` for the root.
	pub fn name_element(&self) -> Option<&PathElement> {
		self.elements.last()
	}

	/// Extend this path by one child element.
	pub fn child(&self, name: Name, index: u32) -> Self {
		let mut elements = self.elements.clone();
		elements.push(PathElement::new(name, index));
		Path { elements }
	}

	/// The parent path, `None` for the root.
	pub fn parent(&self) -> Option<Self> {
		if self.is_root() {
			return None;
		}
		let mut elements = self.elements.clone();
		elements.pop();
		Some(Path { elements })
	}

	/// The ancestor `degree` steps up. Degree 0 is the path itself, degree
	/// 1 the parent. `None` when the path is not deep enough.
	pub fn ancestor(&self, degree: usize) -> Option<Self> {
		if degree > self.elements.len() {
			return None;
		}
		let keep = self.elements.len() - degree;
		Some(Path { elements: self.elements[..keep].iter().cloned().collect() })
	}

	/// Whether `self` is a strict ancestor of `other`.
	pub fn is_ancestor_of(&self, other: &Path) -> bool {
		self.elements.len() < other.elements.len()
			&& other.elements[..self.elements.len()] == self.elements[..]
	}

	/// Whether `self` is a strict descendant of `other`.
	pub fn is_descendant_of(&self, other: &Path) -> bool {
		other.is_ancestor_of(self)
	}

	/// Whether `self` equals `other` or descends from it.
	pub fn is_equal_or_descendant_of(&self, other: &Path) -> bool {
		self == other || self.is_descendant_of(other)
	}

	/// Parse an absolute path such as `/sys:a/b[2]`.
	pub fn parse(s: &str) -> Result<Self, PathParseError> {
		if !s.starts_with('/') {
			return Err(PathParseError::NotAbsolute(s.to_string()));
		}
		if s == "/" {
			return Ok(Path::root());
		}
		let mut elements = SmallVec::new();
		for segment in s[1..].split('/') {
			if segment.is_empty() {
				return Err(PathParseError::EmptySegment(s.to_string()));
			}
			let (name_part, index) = match segment.find('[') {
				Some(pos) => {
					if !segment.ends_with(']') {
						return Err(PathParseError::BadIndex(segment.to_string()));
					}
					let index: u32 = segment[pos + 1..segment.len() - 1]
						.parse()
						.map_err(|_| PathParseError::BadIndex(segment.to_string()))?;
					if index == 0 {
						return Err(PathParseError::BadIndex(segment.to_string()));
					}
					(&segment[..pos], index)
				},
				None => (segment, 1),
			};
			let name = Name::parse(name_part)?;
			elements.push(PathElement::new(name, index));
		}
		Ok(Path { elements })
	}
}

impl fmt::Display for Path {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.is_root() {
			return write!(f, "/");
		}
		for element in &self.elements {
			write!(f, "/{}", element)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Path {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Path({})", self)
	}
}

/// Failure to parse a path from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathParseError {
	/// The input did not start with `/`.
	#[error("path {0:?} is not absolute")]
	NotAbsolute(String),
	/// The input contained an empty segment (`//`).
	#[error("empty segment in path {0:?}")]
	EmptySegment(String),
	/// A sibling index was malformed or zero.
	#[error("malformed sibling index in segment {0:?}")]
	BadIndex(String),
	/// A segment name was malformed.
	#[error(transparent)]
	Name(#[from] NameParseError),
}

#[cfg(test)]
mod tests {
	use super::*;
	use quickcheck::{quickcheck, Arbitrary, Gen};

	fn p(s: &str) -> Path {
		Path::parse(s).unwrap()
	}

	#[test]
	fn parse_and_display() {
		assert_eq!(p("/").to_string(), "/");
		assert_eq!(p("/a/b").to_string(), "/a/b");
		assert_eq!(p("/sys:a/b[2]").to_string(), "/sys:a/b[2]");
		// index 1 is normalized away
		assert_eq!(p("/a/b[1]"), p("/a/b"));
		assert_eq!(p("/a/b[1]").to_string(), "/a/b");
	}

	#[test]
	fn parse_rejects_malformed() {
		assert!(Path::parse("a/b").is_err());
		assert!(Path::parse("/a//b").is_err());
		assert!(Path::parse("/a[0]").is_err());
		assert!(Path::parse("/a[x]").is_err());
		assert!(Path::parse("/a[2").is_err());
	}

	#[test]
	fn ancestry() {
		let root = Path::root();
		let a = p("/a");
		let ab = p("/a/b");
		let abc = p("/a/b/c");

		assert!(root.is_ancestor_of(&abc));
		assert!(a.is_ancestor_of(&abc));
		assert!(ab.is_ancestor_of(&abc));
		assert!(!abc.is_ancestor_of(&abc));
		assert!(!abc.is_ancestor_of(&ab));
		assert!(abc.is_descendant_of(&a));
		assert!(!p("/a/bx").is_descendant_of(&ab));

		assert_eq!(abc.ancestor(0), Some(abc.clone()));
		assert_eq!(abc.ancestor(1), Some(ab.clone()));
		assert_eq!(abc.ancestor(3), Some(root));
		assert_eq!(abc.ancestor(4), None);
	}

	#[test]
	fn sibling_index_distinguishes_elements() {
		assert_ne!(p("/a/c"), p("/a/c[2]"));
		assert_eq!(p("/a/c[2]").name_element().unwrap().index(), 2);
	}

	#[derive(Clone, Debug)]
	struct ArbPath(Path);

	impl Arbitrary for ArbPath {
		fn arbitrary(g: &mut Gen) -> Self {
			let depth = usize::arbitrary(g) % 6;
			let mut path = Path::root();
			for _ in 0..depth {
				let name = ["a", "b", "c", "sys:x", "long-name"]
					[usize::arbitrary(g) % 5];
				let index = (u32::arbitrary(g) % 3) + 1;
				path = path.child(Name::parse(name).unwrap(), index);
			}
			ArbPath(path)
		}
	}

	quickcheck! {
		fn display_parse_round_trip(path: ArbPath) -> bool {
			Path::parse(&path.0.to_string()) == Ok(path.0)
		}
	}
}
