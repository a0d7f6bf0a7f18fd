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

//! End-to-end scenarios driven through `Repository` and `Session`.

use std::sync::Arc;

use pretty_assertions::{assert_eq, assert_ne};

use arbor_core::{well_known as wk, ItemId, Name, NodeId, PropertyId, Value};
use arbor_nodetype::{ChildNodeDef, NodeTypeDef};
use arbor_state::{ChangeLog, ItemStateStore};

use crate::access::{PathAccess, Permission};
use crate::error::Error;
use crate::lock::{LockManager, MemoryLockManager};
use crate::ops::CopyFlag;
use crate::repository::Repository;
use crate::session::SessionId;

fn name(s: &str) -> Name {
	Name::parse(s).unwrap()
}

fn repo() -> Repository {
	Repository::new().unwrap()
}

#[test]
fn add_save_reread() {
	let repo = repo();
	let session = repo.login();
	session.root().unwrap().add_node("a", None).unwrap();
	session.save().unwrap();

	let a = session.node("/a").unwrap();
	a.add_node("b", None).unwrap();
	// saving the modified subtree alone is enough
	a.save().unwrap();

	let other = repo.login();
	assert!(other.node_exists("/a/b"));
	assert_eq!(
		other.node("/a/b").unwrap().primary_type().unwrap(),
		*wk::NT_UNSTRUCTURED,
	);
}

#[test]
fn new_node_cannot_be_saved_alone() {
	let repo = repo();
	let session = repo.login();
	let a = session.root().unwrap().add_node("a", None).unwrap();
	// the root carries the new child entry, so saving `/a` alone is not
	// self-contained
	assert!(matches!(a.save(), Err(Error::ConstraintViolation(_))));
	session.save().unwrap();
	assert!(session.node_exists("/a"));
}

#[test]
fn same_name_sibling_rules() {
	let repo = repo();
	let mut folder = NodeTypeDef::new(name("t:folder"));
	folder.supertypes.push(wk::NT_BASE.clone());
	folder.child_defs.push(ChildNodeDef {
		name: Some(name("c")),
		default_type: Some(wk::NT_UNSTRUCTURED.clone()),
		allows_sns: false,
		..Default::default()
	});
	repo.registry().register(folder).unwrap();

	let session = repo.login();
	let root = session.root().unwrap();

	// no-SNS parent: the second `c` collides before save
	let p = root.add_node("p", Some("t:folder")).unwrap();
	p.add_node("c", None).unwrap();
	assert!(matches!(p.add_node("c", None), Err(Error::ItemExists(_))));

	// SNS parent: siblings get contiguous indices
	let p2 = root.add_node("p2", None).unwrap();
	p2.add_node("c", None).unwrap();
	p2.add_node("c", None).unwrap();
	session.save().unwrap();

	let other = repo.login();
	assert!(other.node_exists("/p2/c"));
	assert!(other.node_exists("/p2/c[2]"));
	assert!(!other.node_exists("/p2/c[3]"));
}

#[test]
fn sibling_indices_stay_contiguous_after_removal() {
	let repo = repo();
	let session = repo.login();
	let p = session.root().unwrap().add_node("p", None).unwrap();
	for _ in 0..3 {
		p.add_node("c", None).unwrap();
	}
	session.save().unwrap();
	let third = session.node("/p/c[3]").unwrap().id();

	session.remove("/p/c[2]").unwrap();
	session.save().unwrap();

	let other = repo.login();
	assert!(other.node_exists("/p/c[2]"));
	assert!(!other.node_exists("/p/c[3]"));
	// the former third sibling now answers to index 2
	assert_eq!(other.node("/p/c[2]").unwrap().id(), third);
}

#[test]
fn remove_with_references_is_rejected() {
	let repo = repo();
	let session = repo.login();
	let root = session.root().unwrap();
	let x = root.add_node("x", None).unwrap();
	x.add_mixin(&wk::MIX_REFERENCEABLE).unwrap();
	let y = root.add_node("y", None).unwrap();
	y.set_property("ref", Value::Reference(x.id())).unwrap();
	session.save().unwrap();

	// removing the target while the reference stands must fail at save
	session.remove("/x").unwrap();
	assert!(matches!(session.save(), Err(Error::ReferentialIntegrity(_))));
	session.refresh(false).unwrap();
	assert!(session.node_exists("/x"));

	// dropping the referring property first makes the removal legal
	session.remove("/y/ref").unwrap();
	session.remove("/x").unwrap();
	session.save().unwrap();
	assert!(!session.node_exists("/x"));

	let other = repo.login();
	assert!(!other.node_exists("/x"));
	assert!(!other.property_exists("/y/ref"));
}

#[test]
fn uuid_property_equals_node_id() {
	let repo = repo();
	let session = repo.login();
	let x = session.root().unwrap().add_node("x", None).unwrap();
	x.add_mixin(&wk::MIX_REFERENCEABLE).unwrap();
	session.save().unwrap();

	let x = session.node("/x").unwrap();
	assert_eq!(x.uuid().unwrap(), Some(x.id()));
	let uuid = session.property("/x/sys:uuid").unwrap().value().unwrap();
	assert_eq!(uuid, Value::String(x.id().to_string()));
}

#[test]
fn copy_remaps_references_inside_the_subtree() {
	let repo = repo();
	let session = repo.login();
	let root = session.root().unwrap();
	let src = root.add_node("src", None).unwrap();
	let a = src.add_node("A", None).unwrap();
	a.add_mixin(&wk::MIX_REFERENCEABLE).unwrap();
	let b = a.add_node("B", None).unwrap();
	b.set_property("r", Value::Reference(a.id())).unwrap();
	root.add_node("dst", None).unwrap();
	session.save().unwrap();
	let u1 = a.id();

	session.workspace().copy("/src/A", "/dst/A2").unwrap();

	// the original identity still resolves to the source
	assert_eq!(session.node_by_id(u1).unwrap().path().unwrap().to_string(), "/src/A");

	// the copy got a fresh identity
	let a2 = session.node("/dst/A2").unwrap();
	let u2 = a2.uuid().unwrap().expect("copy of a referenceable node is referenceable");
	assert_ne!(u1, u2);
	assert_eq!(a2.id(), u2);

	// the self-reference followed the copy
	let r = session.property("/dst/A2/B/r").unwrap().value().unwrap();
	assert_eq!(r, Value::Reference(u2));
	// the source is untouched
	let r = session.property("/src/A/B/r").unwrap().value().unwrap();
	assert_eq!(r, Value::Reference(u1));
}

#[test]
fn clone_creates_a_share() {
	let repo = repo();
	let session = repo.login();
	let root = session.root().unwrap();
	let a = root.add_node("src", None).unwrap().add_node("A", None).unwrap();
	a.add_mixin(&wk::MIX_SHAREABLE).unwrap();
	root.add_node("dst", None).unwrap();
	session.save().unwrap();

	let shared_id = session.workspace().clone_shared("/src/A", "/dst/A").unwrap();
	assert_eq!(shared_id, a.id());

	// both paths resolve to the same node
	let via_src = session.node("/src/A").unwrap();
	let via_dst = session.node("/dst/A").unwrap();
	assert_eq!(via_src.id(), via_dst.id());

	// a mutation through one path is visible through the other
	via_src.set_property("k", Value::Long(7)).unwrap();
	assert_eq!(
		session.property("/dst/A/k").unwrap().value().unwrap(),
		Value::Long(7),
	);
	session.save().unwrap();

	// a second share under the same parent is refused
	assert!(matches!(
		session.workspace().clone_shared("/src/A", "/dst/A"),
		Err(Error::UnsupportedOperation(_)),
	));

	// removing one share leaves the node reachable through the other
	session.remove("/dst/A").unwrap();
	session.save().unwrap();
	assert!(!session.node_exists("/dst/A"));
	assert!(session.node_exists("/src/A"));
	assert_eq!(
		session.property("/src/A/k").unwrap().value().unwrap(),
		Value::Long(7),
	);
}

#[test]
fn shareable_paths_round_trip() {
	let repo = repo();
	let session = repo.login();
	let root = session.root().unwrap();
	let a = root.add_node("src", None).unwrap().add_node("A", None).unwrap();
	a.add_mixin(&wk::MIX_SHAREABLE).unwrap();
	root.add_node("dst", None).unwrap();
	session.save().unwrap();
	session.workspace().clone_shared("/src/A", "/dst/A").unwrap();

	// the primary-parent path wins, whichever way the node was reached
	let node = session.node_by_id(a.id()).unwrap();
	assert_eq!(node.path().unwrap().to_string(), "/src/A");
	let via_dst = session.node("/dst/A").unwrap();
	assert_eq!(via_dst.path().unwrap().to_string(), "/src/A");
	let dst_parent = session.node("/dst").unwrap().id();
	let share_view = session.shared_node(a.id(), dst_parent).unwrap();
	assert_eq!(share_view.id(), a.id());
	// an unrelated parent is not a share view
	let unrelated = session.root().unwrap().id();
	assert!(matches!(
		session.shared_node(a.id(), unrelated),
		Err(Error::NotFound(_)),
	));
}

#[test]
fn move_into_own_subtree_is_rejected() {
	let repo = repo();
	let session = repo.login();
	let a = session.root().unwrap().add_node("a", None).unwrap();
	a.add_node("b", None).unwrap().add_node("c", None).unwrap();
	session.save().unwrap();

	for surface in &["session", "workspace"] {
		let result = if *surface == "session" {
			session.move_node("/a", "/a/b/c/d")
		} else {
			session.workspace().move_node("/a", "/a/b/c/d")
		};
		assert!(matches!(result, Err(Error::Repository(_))), "{}", surface);
		assert!(session.node_exists("/a/b/c"));
		assert!(!session.node_exists("/a/b/c/d"));
	}
}

#[test]
fn transient_move_and_rename() {
	let repo = repo();
	let session = repo.login();
	let root = session.root().unwrap();
	root.add_node("a", None).unwrap().add_node("x", None).unwrap();
	root.add_node("b", None).unwrap();
	session.save().unwrap();
	let x = session.node("/a/x").unwrap().id();

	// move across parents, transient until save
	session.move_node("/a/x", "/b/y").unwrap();
	assert!(!session.node_exists("/a/x"));
	assert!(session.node_exists("/b/y"));
	let other = repo.login();
	assert!(other.node_exists("/a/x"), "transient move must not leak");
	session.save().unwrap();
	assert!(other.node_exists("/b/y"));
	assert_eq!(other.node("/b/y").unwrap().id(), x);

	// rename within the same parent
	session.move_node("/b/y", "/b/z").unwrap();
	session.save().unwrap();
	assert!(other.node_exists("/b/z"));
	assert!(!other.node_exists("/b/y"));
}

#[test]
fn external_destruction_surfaces_as_invalid_state() {
	let repo = repo();
	let session_a = repo.login();
	session_a
		.root()
		.unwrap()
		.add_node("p", None)
		.unwrap()
		.add_node("q", None)
		.unwrap();
	session_a.save().unwrap();
	let q = session_a.node("/p/q").unwrap();

	let session_b = repo.login();
	session_b.remove("/p/q").unwrap();
	session_b.save().unwrap();

	// the held view observes the destruction on next access
	assert!(matches!(q.primary_type(), Err(Error::InvalidItemState(_))));
	assert!(matches!(q.primary_type(), Err(Error::InvalidItemState(_))));
	session_a.refresh(false).unwrap();
	assert!(!session_a.node_exists("/p/q"));
}

#[test]
fn concurrent_modification_is_stale_and_save_is_atomic() {
	let repo = repo();
	let setup = repo.login();
	let p = setup.root().unwrap().add_node("p", None).unwrap();
	p.set_property("k", Value::Long(0)).unwrap();
	setup.save().unwrap();

	let session_a = repo.login();
	let session_b = repo.login();
	session_a
		.node("/p")
		.unwrap()
		.set_property("k", Value::Long(1))
		.unwrap();
	session_b
		.node("/p")
		.unwrap()
		.set_property("k", Value::Long(2))
		.unwrap();

	session_b.save().unwrap();
	// the loser's base is gone; nothing of its save may stick
	assert!(matches!(session_a.save(), Err(Error::InvalidItemState(_))));
	let check = repo.login();
	assert_eq!(check.property("/p/k").unwrap().value().unwrap(), Value::Long(2));

	// refresh brings the loser back in line with the store
	session_a.refresh(false).unwrap();
	assert_eq!(
		session_a.property("/p/k").unwrap().value().unwrap(),
		Value::Long(2),
	);
	assert!(!session_a.has_pending_changes());
}

#[test]
fn refresh_rejects_never_saved_descendants() {
	let repo = repo();
	let session = repo.login();
	session.root().unwrap().add_node("fresh", None).unwrap();

	// a never-saved node has nothing to refresh back to; the refresh
	// fails as a whole and discards nothing
	assert!(matches!(session.refresh(false), Err(Error::Repository(_))));
	assert!(session.node_exists("/fresh"));
	assert!(session.has_pending_changes());

	session.save().unwrap();
	session.refresh(false).unwrap();
	assert!(session.node_exists("/fresh"));
}

#[test]
fn refresh_discards_and_resurrects() {
	let repo = repo();
	let session = repo.login();
	let keep = session.root().unwrap().add_node("keep", None).unwrap();
	keep.set_property("k", Value::Long(1)).unwrap();
	session.save().unwrap();

	// discard a modification and a removal in one refresh
	session
		.node("/keep")
		.unwrap()
		.set_property("k", Value::Long(2))
		.unwrap();
	session.remove("/keep").unwrap();
	assert!(session.has_pending_changes());

	session.refresh(false).unwrap();
	assert!(!session.has_pending_changes());
	assert!(session.node_exists("/keep"));
	assert_eq!(
		session.property("/keep/k").unwrap().value().unwrap(),
		Value::Long(1),
	);
}

#[test]
fn versionable_nodes_get_a_history_at_save() {
	let repo = repo();
	let session = repo.login();
	let v = session.root().unwrap().add_node("v", None).unwrap();
	v.add_mixin(&wk::MIX_VERSIONABLE).unwrap();
	session.save().unwrap();

	let checked_out = session
		.property("/v/sys:isCheckedOut")
		.unwrap()
		.value()
		.unwrap();
	assert_eq!(checked_out, Value::Boolean(true));

	let history = session
		.property("/v/sys:versionHistory")
		.unwrap()
		.value()
		.unwrap();
	let history_id = match history {
		Value::Reference(id) => id,
		other => panic!("expected a reference, got {:?}", other),
	};
	// the history subtree was committed along with the node
	let history_node = session.node_by_id(history_id).unwrap();
	assert_eq!(history_node.primary_type().unwrap(), *wk::NT_VERSION_HISTORY);
	assert!(history_node.has_children().unwrap());
}

#[test]
fn checked_in_ancestors_reject_mutation() {
	let repo = repo();
	let session = repo.login();
	let v = session.root().unwrap().add_node("v", None).unwrap();
	v.add_mixin(&wk::MIX_VERSIONABLE).unwrap();
	session.save().unwrap();
	let v_id = session.node("/v").unwrap().id();

	// flip the check-out flag behind the session's back
	let prop_id = ItemId::Property(PropertyId::new(v_id, wk::IS_CHECKED_OUT.clone()));
	let mut state = repo.store().get(&prop_id).unwrap();
	state.property_mut().unwrap().values = vec![Value::Boolean(false)];
	repo.store()
		.apply(ChangeLog { modified: vec![state], ..Default::default() })
		.unwrap();

	let other = repo.login();
	let v = other.node("/v").unwrap();
	assert!(matches!(v.add_node("child", None), Err(Error::Versioning(_))));
	assert!(matches!(
		v.set_property("k", Value::Long(1)),
		Err(Error::Versioning(_)),
	));
	// type changes are gated on the check-out status like any mutation
	assert!(matches!(
		v.add_mixin(&wk::MIX_LOCKABLE),
		Err(Error::Versioning(_)),
	));
	assert!(matches!(
		v.remove_mixin(&wk::MIX_VERSIONABLE),
		Err(Error::Versioning(_)),
	));
	assert!(matches!(
		v.set_primary_type(&wk::NT_HIERARCHY_NODE),
		Err(Error::Versioning(_)),
	));
}

#[test]
fn locks_held_by_other_sessions_block_mutation() {
	let locks = Arc::new(MemoryLockManager::new());
	let repo = Repository::builder().locks(locks.clone()).build().unwrap();
	let session = repo.login();
	session.root().unwrap().add_node("a", None).unwrap();
	session.save().unwrap();

	let foreign = SessionId(u64::max_value());
	locks
		.lock(&arbor_core::Path::parse("/a").unwrap(), foreign, true)
		.unwrap();

	let a = session.node("/a").unwrap();
	assert!(matches!(a.add_node("b", None), Err(Error::Lock(_))));
	assert!(matches!(
		a.set_property("k", Value::Long(1)),
		Err(Error::Lock(_)),
	));
	// type changes respect foreign locks as well
	assert!(matches!(
		a.add_mixin(&wk::MIX_REFERENCEABLE),
		Err(Error::Lock(_)),
	));
	assert!(matches!(
		a.set_primary_type(&wk::NT_HIERARCHY_NODE),
		Err(Error::Lock(_)),
	));

	locks
		.unlock(&arbor_core::Path::parse("/a").unwrap(), foreign)
		.unwrap();
	a.add_node("b", None).unwrap();
	session.save().unwrap();
}

#[test]
fn access_control_disclosure_rules() {
	let access = PathAccess::new()
		.deny(arbor_core::Path::parse("/secret").unwrap(), Permission::READ)
		.deny(arbor_core::Path::parse("/frozen").unwrap(), Permission::ADD_NODE);
	let repo = Repository::builder().access(Arc::new(access)).build().unwrap();

	let session = repo.login();
	let root = session.root().unwrap();
	let secret = root.add_node("secret", None).unwrap();
	root.add_node("frozen", None).unwrap();
	session.save().unwrap();
	let secret_id = secret.id();

	// path-based access to an unreadable node reads as absence
	assert!(!session.node_exists("/secret"));
	assert!(matches!(session.node("/secret"), Err(Error::NotFound(_))));
	// id-based access discloses the denial
	assert!(matches!(session.node_by_id(secret_id), Err(Error::AccessDenied(_))));

	// write denial is its own failure
	let frozen = session.node("/frozen").unwrap();
	assert!(matches!(frozen.add_node("x", None), Err(Error::AccessDenied(_))));

	// unreadable children disappear from iteration
	let visible: Vec<String> = session
		.root()
		.unwrap()
		.children()
		.unwrap()
		.map(|child| child.path().unwrap().to_string())
		.collect();
	assert!(visible.iter().any(|p| p.ends_with("frozen")));
	assert!(!visible.iter().any(|p| p.ends_with("secret")));
}

#[test]
fn clone_copy_between_sessions_keeps_identity() {
	let repo = repo();
	let source = repo.login();
	let root = source.root().unwrap();
	let a = root.add_node("src", None).unwrap().add_node("A", None).unwrap();
	a.add_mixin(&wk::MIX_REFERENCEABLE).unwrap();
	root.add_node("dst", None).unwrap();
	source.save().unwrap();
	let original = a.id();

	// a same-identity clone into an occupied workspace collides
	let target = repo.login();
	assert!(matches!(
		target
			.workspace()
			.copy_from(&source, "/src/A", "/dst/A3", CopyFlag::Clone),
		Err(Error::ItemExists(_)),
	));

	// removing the original first is exactly what the third flavour does
	let new_id = target
		.workspace()
		.copy_from(&source, "/src/A", "/dst/A3", CopyFlag::CloneRemoveExisting)
		.unwrap();
	assert_eq!(new_id, original);
	assert!(target.node_exists("/dst/A3"));
	assert!(!target.node_exists("/src/A"));
}

#[test]
fn logout_invalidates_outstanding_items() {
	let repo = repo();
	let session = repo.login();
	session.root().unwrap().add_node("a", None).unwrap();
	session.save().unwrap();
	let a = session.node("/a").unwrap();

	session.logout();
	assert!(!session.is_live());
	assert!(matches!(a.primary_type(), Err(Error::InvalidItemState(_))));
}

#[test]
fn properties_and_children_are_consistent_after_save() {
	let repo = repo();
	let session = repo.login();
	let root = session.root().unwrap();
	let n = root.add_node("n", None).unwrap();
	n.set_property("p1", Value::Long(1)).unwrap();
	n.set_property_multi("p2", vec![Value::Long(1), Value::Long(2)]).unwrap();
	n.add_node("c1", None).unwrap();
	session.save().unwrap();

	let other = repo.login();
	let n = other.node("/n").unwrap();
	// every listed property materializes, and vice versa
	let names: Vec<Name> = n.properties().unwrap().map(|prop| prop.name()).collect();
	for name in &names {
		assert!(other.property_exists(&format!("/n/{}", name)));
	}
	assert!(names.contains(&name("p1")));
	assert!(names.contains(&name("p2")));
	assert!(names.contains(&wk::PRIMARY_TYPE.clone()));
	let children: Vec<NodeId> = n.children().unwrap().map(|child| child.id()).collect();
	assert_eq!(children.len(), 1);
	assert_eq!(
		other.property("/n/p2").unwrap().values().unwrap(),
		vec![Value::Long(1), Value::Long(2)],
	);
}

#[test]
fn batched_operations_create_states_directly() {
	use crate::access::OpenAccess;
	use crate::ops::{BatchedOperations, CheckOptions};
	use crate::session::SessionContext;
	use crate::state_mgr::SessionItemStateManager;
	use crate::version::MemoryVersionManager;
	use arbor_core::PropertyType;
	use arbor_nodetype::builtin;
	use arbor_state::{ItemState, NodeState, SharedItemStateManager};

	let registry = Arc::new(builtin());
	let store = Arc::new(SharedItemStateManager::new());
	let mut root = NodeState::new(NodeId::random(), wk::NT_ROOT.clone(), None);
	let root_ent = registry.effective(&root.primary_type, &[]).unwrap();
	let mut added = crate::ops::auto_created_property_states(&mut root, &root_ent).unwrap();
	let root_id = root.id();
	added.push(ItemState::new_node(root));
	store.apply(ChangeLog { added, ..Default::default() }).unwrap();

	let ctx = SessionContext {
		session_id: SessionId(1),
		root_id,
		store: store.clone(),
		registry: registry.clone(),
		access: Arc::new(OpenAccess),
		locks: Arc::new(MemoryLockManager::new()),
		versions: Arc::new(MemoryVersionManager::new(NodeId::random(), registry.clone())),
	};

	let mut mgr = SessionItemStateManager::new(store.clone());
	// edit mode is a hard precondition
	assert!(BatchedOperations::new(&mut mgr, &ctx).is_err());
	mgr.edit().unwrap();
	let mut ops = BatchedOperations::new(&mut mgr, &ctx).unwrap();

	let n = ops
		.create_node_state(root_id, &name("n"), None, &[], None, None)
		.unwrap();
	let flag = ops
		.create_property_state(n, &name("flag"), PropertyType::Boolean, 1)
		.unwrap();
	// one property per name
	assert!(matches!(
		ops.create_property_state(n, &name("flag"), PropertyType::Boolean, 1),
		Err(Error::ItemExists(_)),
	));
	ops.check_remove_node(n, root_id, CheckOptions::all()).unwrap();
	mgr.update().unwrap();

	assert!(store.has(&ItemId::Node(n)));
	let committed = store.get(&ItemId::Property(flag)).unwrap();
	let prop = committed.property().unwrap();
	assert!(!prop.multi_valued);
	assert_eq!(prop.ty, PropertyType::Boolean);
}

#[test]
fn removing_the_shareable_mixin_is_rejected() {
	let repo = repo();
	let session = repo.login();
	let a = session.root().unwrap().add_node("a", None).unwrap();
	a.add_mixin(&wk::MIX_SHAREABLE).unwrap();
	session.save().unwrap();

	let a = session.node("/a").unwrap();
	assert!(matches!(
		a.remove_mixin(&wk::MIX_SHAREABLE),
		Err(Error::UnsupportedOperation(_)),
	));
}
