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

//! Workspace-scope operations: copy, clone and move that commit in one
//! atomic step instead of joining the session's transient space.

use arbor_core::NodeId;

use crate::error::{Error, Result};
use crate::hierarchy::HierarchyManager;
use crate::ops::{BatchedOperations, CopyFlag, CopySource};
use crate::session::{parse_path, Session};
use crate::state_mgr::{SessionItemStateManager, StoreProvider};

/// The committed-scope surface of a session.
pub struct Workspace<'s> {
	session: &'s Session,
}

impl Session {
	/// The workspace surface of this session.
	pub fn workspace(&self) -> Workspace<'_> {
		Workspace { session: self }
	}
}

impl<'s> Workspace<'s> {
	/// Run `f` against a scratch overlay of the shared store and commit
	/// the result atomically.
	fn commit<R>(
		&self,
		f: impl FnOnce(&mut BatchedOperations<'_>) -> Result<R>,
	) -> Result<R> {
		let ctx = self.session.ctx();
		let mut scratch = SessionItemStateManager::new(ctx.store.clone());
		scratch.edit()?;
		let result = {
			let mut ops = BatchedOperations::new(&mut scratch, ctx)?;
			f(&mut ops)
		};
		match result {
			Ok(value) => {
				scratch.update()?;
				Ok(value)
			},
			Err(err) => {
				scratch.cancel();
				Err(err)
			},
		}
	}

	/// Copy the subtree at `src` to `dest` within this workspace. Every
	/// copied node gets a fresh identity; references inside the subtree
	/// follow the new identities.
	pub fn copy(&self, src: &str, dest: &str) -> Result<NodeId> {
		let src = parse_path(src)?;
		let dest = parse_path(dest)?;
		let ctx = self.session.ctx();
		let provider = StoreProvider(ctx.store.clone());
		let source = CopySource {
			provider: &provider,
			access: &*ctx.access,
			root_id: ctx.root_id,
		};
		self.commit(|ops| ops.copy(&src, &source, &dest, CopyFlag::Copy))
	}

	/// Copy or clone the subtree at `src` in `source`'s workspace to
	/// `dest` in this one.
	pub fn copy_from(
		&self,
		source_session: &Session,
		src: &str,
		dest: &str,
		flag: CopyFlag,
	) -> Result<NodeId> {
		let src = parse_path(src)?;
		let dest = parse_path(dest)?;
		let src_ctx = source_session.ctx();
		let provider = StoreProvider(src_ctx.store.clone());
		let source = CopySource {
			provider: &provider,
			access: &*src_ctx.access,
			root_id: src_ctx.root_id,
		};
		self.commit(|ops| ops.copy(&src, &source, &dest, flag))
	}

	/// Share the shareable node at `src` under the additional parent named
	/// by `dest`. Returns the shared node's id.
	pub fn clone_shared(&self, src: &str, dest: &str) -> Result<NodeId> {
		let src = parse_path(src)?;
		let dest = parse_path(dest)?;
		let ctx = self.session.ctx();
		if dest.name_element().map(|e| e.index() > 1).unwrap_or(true) {
			return Err(Error::Repository(format!(
				"destination {} must not carry a sibling index",
				dest,
			)));
		}
		self.commit(|ops| {
			let hier = HierarchyManager::new(ops.provider(), ctx.root_id);
			let src_id = hier
				.resolve_node_path(&src)?
				.ok_or_else(|| Error::NotFound(src.to_string()))?;
			let dest_parent_path = dest.parent().expect("non-root destination; qed");
			let dest_parent = hier
				.resolve_node_path(&dest_parent_path)?
				.ok_or_else(|| Error::NotFound(dest_parent_path.to_string()))?;
			let dest_name = dest.name_element().expect("non-root destination; qed").name().clone();
			ops.clone_node(src_id, dest_parent, &dest_name)
		})
	}

	/// Move the subtree at `src` to `dest`, committed atomically.
	pub fn move_node(&self, src: &str, dest: &str) -> Result<()> {
		let src = parse_path(src)?;
		let dest = parse_path(dest)?;
		self.commit(|ops| ops.move_node(&src, &dest))
	}
}
