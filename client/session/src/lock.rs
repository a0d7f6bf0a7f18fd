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

//! The locking seam and a working in-memory lock manager.

use parking_lot::Mutex;

use arbor_core::Path;

use crate::error::{Error, Result};
use crate::session::SessionId;

/// Lock decisions for mutation paths.
pub trait LockManager: Send + Sync {
	/// Fails with [`Error::Lock`] when the item at `path` is covered by a
	/// lock held by a session other than `session`.
	fn check_lock(&self, path: &Path, session: SessionId) -> Result<()>;

	/// Place an exclusive lock. A deep lock covers the whole subtree.
	fn lock(&self, path: &Path, session: SessionId, deep: bool) -> Result<()>;

	/// Release a lock held by `session`.
	fn unlock(&self, path: &Path, session: SessionId) -> Result<()>;
}

struct LockRecord {
	path: Path,
	owner: SessionId,
	deep: bool,
}

impl LockRecord {
	fn covers(&self, path: &Path) -> bool {
		if self.deep {
			path.is_equal_or_descendant_of(&self.path)
		} else {
			path == &self.path
		}
	}
}

/// Exclusive path locks held in memory, shared by every session of a
/// repository.
#[derive(Default)]
pub struct MemoryLockManager {
	locks: Mutex<Vec<LockRecord>>,
}

impl MemoryLockManager {
	/// A manager with no locks.
	pub fn new() -> Self {
		Self::default()
	}
}

impl LockManager for MemoryLockManager {
	fn check_lock(&self, path: &Path, session: SessionId) -> Result<()> {
		let locks = self.locks.lock();
		match locks.iter().find(|rec| rec.covers(path) && rec.owner != session) {
			Some(rec) => Err(Error::Lock(format!(
				"{} is locked by session {}",
				rec.path, rec.owner,
			))),
			None => Ok(()),
		}
	}

	fn lock(&self, path: &Path, session: SessionId, deep: bool) -> Result<()> {
		let mut locks = self.locks.lock();
		if let Some(rec) = locks.iter().find(|rec| rec.covers(path) || path.is_ancestor_of(&rec.path)) {
			return Err(Error::Lock(format!("{} is already locked", rec.path)));
		}
		locks.push(LockRecord { path: path.clone(), owner: session, deep });
		Ok(())
	}

	fn unlock(&self, path: &Path, session: SessionId) -> Result<()> {
		let mut locks = self.locks.lock();
		let pos = locks.iter().position(|rec| &rec.path == path);
		match pos {
			Some(pos) if locks[pos].owner == session => {
				locks.remove(pos);
				Ok(())
			},
			Some(_) => Err(Error::Lock(format!("{} is locked by another session", path))),
			None => Err(Error::Lock(format!("{} holds no lock", path))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn p(s: &str) -> Path {
		Path::parse(s).unwrap()
	}

	#[test]
	fn shallow_lock_covers_only_itself() {
		let locks = MemoryLockManager::new();
		let owner = SessionId(1);
		let other = SessionId(2);
		locks.lock(&p("/a"), owner, false).unwrap();

		assert!(locks.check_lock(&p("/a"), owner).is_ok());
		assert!(matches!(locks.check_lock(&p("/a"), other), Err(Error::Lock(_))));
		assert!(locks.check_lock(&p("/a/b"), other).is_ok());
	}

	#[test]
	fn deep_lock_covers_subtree() {
		let locks = MemoryLockManager::new();
		let owner = SessionId(1);
		let other = SessionId(2);
		locks.lock(&p("/a"), owner, true).unwrap();

		assert!(matches!(locks.check_lock(&p("/a/b/c"), other), Err(Error::Lock(_))));
		assert!(locks.check_lock(&p("/b"), other).is_ok());
	}

	#[test]
	fn unlock_requires_ownership() {
		let locks = MemoryLockManager::new();
		locks.lock(&p("/a"), SessionId(1), false).unwrap();
		assert!(locks.unlock(&p("/a"), SessionId(2)).is_err());
		locks.unlock(&p("/a"), SessionId(1)).unwrap();
		assert!(locks.check_lock(&p("/a"), SessionId(2)).is_ok());
	}
}
