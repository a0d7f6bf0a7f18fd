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

//! Identifier, name and path primitives shared by every layer of the Arbor
//! content repository.
//!
//! Everything here is a plain value type: identifiers are `Copy`, names are
//! cheaply cloneable interned strings, and paths are immutable element
//! sequences with ancestor/descendant algebra. No layer above this crate is
//! allowed to invent its own addressing scheme.

#![warn(missing_docs)]

mod id;
mod name;
mod path;
mod value;
pub mod well_known;

pub use id::{IdParseError, ItemId, NodeId, PropertyId};
pub use name::{Name, NameParseError};
pub use path::{Path, PathElement, PathParseError};
pub use value::{PropertyType, Value};
