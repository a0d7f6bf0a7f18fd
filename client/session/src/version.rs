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

//! The versioning seam: version-history allocation for versionable nodes.

use std::sync::Arc;

use arbor_core::{well_known as wk, ItemId, Name, NodeId};
use arbor_nodetype::NodeTypeRegistry;
use arbor_state::{ItemState, NodeState};

use crate::error::{Error, Result};
use crate::ops;
use crate::state_mgr::ItemStateProvider;

/// What the version manager hands back for a freshly versionable node.
#[derive(Debug)]
pub struct VersionHistoryInfo {
	/// Id of the version-history node.
	pub history_id: NodeId,
	/// Id of the root version inside the history.
	pub root_version_id: NodeId,
	/// The states making up the history subtree plus the modified version
	/// storage node. All are transient and must be folded into the
	/// caller's change set.
	pub states: Vec<ItemState>,
}

/// Allocates version histories.
pub trait VersionManager: Send + Sync {
	/// Produce a version history for `target`, reading current states
	/// through `view`.
	fn version_history(
		&self,
		target: &NodeState,
		view: &dyn ItemStateProvider,
	) -> Result<VersionHistoryInfo>;
}

/// Version manager storing histories under a dedicated storage node.
pub struct MemoryVersionManager {
	storage_id: NodeId,
	registry: Arc<NodeTypeRegistry>,
}

impl MemoryVersionManager {
	/// A manager parenting histories under `storage_id`.
	pub fn new(storage_id: NodeId, registry: Arc<NodeTypeRegistry>) -> Self {
		MemoryVersionManager { storage_id, registry }
	}
}

impl VersionManager for MemoryVersionManager {
	fn version_history(
		&self,
		target: &NodeState,
		view: &dyn ItemStateProvider,
	) -> Result<VersionHistoryInfo> {
		let mut storage = view.state(&ItemId::Node(self.storage_id)).map_err(|err| {
			Error::Repository(format!("version storage unavailable: {}", err))
		})?;
		let storage_node = storage
			.node_mut()
			.ok_or_else(|| Error::Repository("version storage is not a node".into()))?;

		// One history node per target, named after the target's id.
		let history_name = Name::new(wk::NS_SYS, &target.id().to_string());
		if storage_node.has_child_entry_named(&history_name) {
			return Err(Error::Repository(format!(
				"version history for {} already exists",
				target.id(),
			)));
		}

		let mut states = Vec::new();

		let mut history = NodeState::new(
			NodeId::random(),
			wk::NT_VERSION_HISTORY.clone(),
			Some(self.storage_id),
		);
		let history_id = history.id();
		let mut root_version =
			NodeState::new(NodeId::random(), wk::NT_VERSION.clone(), Some(history_id));
		let root_version_id = root_version.id();
		history.add_child_entry(wk::ROOT_VERSION.clone(), root_version_id);
		storage_node.add_child_entry(history_name, history_id);

		let history_ent = self.registry.effective(&history.primary_type, &[])?;
		states.extend(ops::auto_created_property_states(&mut history, &history_ent)?);
		let version_ent = self.registry.effective(&root_version.primary_type, &[])?;
		states.extend(ops::auto_created_property_states(&mut root_version, &version_ent)?);

		states.push(ItemState::new_node(history));
		states.push(ItemState::new_node(root_version));
		states.push(storage);

		Ok(VersionHistoryInfo { history_id, root_version_id, states })
	}
}
