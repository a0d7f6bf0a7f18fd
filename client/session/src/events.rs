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

//! The in-session state event bus.
//!
//! The session item-state manager records an event for every transient
//! lifecycle transition; the item manager drains the queue at the end of
//! each session operation and folds the events into the item cache. All of
//! this happens on the session thread, so the bus is a plain queue.

use arbor_core::ItemId;
use arbor_state::ItemStatus;

/// One transient-state lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
	/// A state entered the transient space for the first time.
	Created(ItemId),
	/// An already-transient state was stored again.
	Modified(ItemId),
	/// A state was scheduled for removal or fully disposed.
	Destroyed(ItemId),
	/// A transient state was dropped without being committed.
	Discarded {
		/// The id of the discarded state.
		id: ItemId,
		/// The status the state had when discarded.
		status: ItemStatus,
		/// Whether it was discarded out of the attic.
		from_attic: bool,
	},
}

impl SessionEvent {
	/// The id the event is about.
	pub fn id(&self) -> &ItemId {
		match self {
			SessionEvent::Created(id)
			| SessionEvent::Modified(id)
			| SessionEvent::Destroyed(id) => id,
			SessionEvent::Discarded { id, .. } => id,
		}
	}
}
