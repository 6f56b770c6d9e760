//! Delta reconciliation: folds a fetched delta batch into the snapshot and
//! computes the set of users whose transitive memberships may have changed.

use std::collections::HashSet;

use tracing::error;
use uuid::Uuid;

use crate::fetcher::{Group, MemberType, User};
use crate::state::StateStore;

/// One drained delta: the changed entities plus the continuation links to
/// persist for the next cycle.
pub(crate) struct DeltaBatch {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    pub users_link: String,
    pub groups_link: String,
}

/// Applies `batch` to `state` and returns the affected user set: users
/// changed directly, plus users whose closure may have changed because a
/// group-level delta touched a group they transitively reach.
pub(crate) fn reconcile(state: &mut StateStore, batch: DeltaBatch) -> HashSet<Uuid> {
    let mut affected = HashSet::new();

    state.users_link = Some(batch.users_link);
    state.groups_link = Some(batch.groups_link);

    for user in batch.users {
        let _ = affected.insert(user.id);
        state.store_user(user);
    }
    for group in &batch.groups {
        state.store_group(group.clone());
    }

    // Fold membership deltas into the relationship graph and the users'
    // direct membership sets. Affected users must be collected BEFORE an
    // edge is mutated, so removals still flag users whose closure
    // previously traversed the edge.
    for group in &batch.groups {
        state.relationships.add_vertex(group.id);

        for member in &group.members {
            match member.member_type {
                MemberType::Group => {
                    for user in state.users.values() {
                        if user.is_transitive_member_of(member.id) {
                            let _ = affected.insert(user.id);
                        }
                    }
                    if member.deleted {
                        state.relationships.delete_edge(member.id, group.id);
                    } else {
                        state.relationships.add_edge(member.id, group.id);
                    }
                }
                MemberType::User => {
                    // Unknown users are skipped here; they are learned
                    // through the users delta.
                    if let Some(user) = state.users.get_mut(&member.id) {
                        let _ = affected.insert(user.id);
                        if member.deleted {
                            user.remove_member_of(group.id);
                        } else {
                            user.add_member_of(group.id);
                        }
                    }
                }
            }
        }
    }

    expand_updated(state, &affected);

    affected
}

/// Recomputes the transitive membership closure for every affected user.
/// Deleted users are tombstones and are not expanded.
fn expand_updated(state: &mut StateStore, affected: &HashSet<Uuid>) {
    let users = &mut state.users;
    let relationships = &state.relationships;

    for user_id in affected {
        match users.get_mut(user_id) {
            None => error!(user = %user_id, "unable to find user in state"),
            Some(user) if user.deleted => {}
            Some(user) => {
                // A user flagged only through a group-level delta still
                // counts as modified for the emitted event.
                if !user.added {
                    user.modified = true;
                }
                user.transitive_member_of = relationships.expand_from_set(&user.member_of);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    use idsync_kvstore::Store;

    use crate::fetcher::Member;

    use super::*;

    fn open_store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("state.db")).unwrap();
        (store, dir)
    }

    fn api_user(id: Uuid, name: &str, removed: bool) -> User {
        let mut raw = json!({"id": id.to_string(), "displayName": name});
        if removed {
            raw["@removed"] = json!({"reason": "deleted"});
        }
        User::from_api(raw.as_object().unwrap().clone()).unwrap()
    }

    fn api_group(id: Uuid, name: &str, members: Vec<Member>) -> Group {
        Group {
            id,
            name: name.to_owned(),
            deleted: false,
            members,
        }
    }

    fn member(id: Uuid, member_type: MemberType, deleted: bool) -> Member {
        Member {
            id,
            member_type,
            deleted,
        }
    }

    fn batch(users: Vec<User>, groups: Vec<Group>, round: u32) -> DeltaBatch {
        DeltaBatch {
            users,
            groups,
            users_link: format!("users-delta-{round}"),
            groups_link: format!("groups-delta-{round}"),
        }
    }

    #[tokio::test]
    async fn cold_start_builds_snapshot_and_closures() {
        let (store, _dir) = open_store();
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let g1 = Uuid::new_v4();

        let mut state = StateStore::open(&store).await.unwrap();
        let affected = reconcile(
            &mut state,
            batch(
                vec![api_user(u1, "One", false), api_user(u2, "Two", false)],
                vec![api_group(
                    g1,
                    "Engineering",
                    vec![member(u1, MemberType::User, false)],
                )],
                1,
            ),
        );

        assert_eq!(affected, HashSet::from([u1, u2]));
        assert_eq!(state.users_link.as_deref(), Some("users-delta-1"));
        assert_eq!(state.groups_link.as_deref(), Some("groups-delta-1"));
        assert!(state.relationships.has_vertex(g1));
        assert_eq!(state.users[&u1].member_of, HashSet::from([g1]));
        assert_eq!(state.users[&u1].transitive_member_of, HashSet::from([g1]));
        assert!(state.users[&u2].member_of.is_empty());
        assert!(state.users[&u2].transitive_member_of.is_empty());
        assert!(state.users[&u1].added);

        state.close(true).unwrap();
    }

    #[tokio::test]
    async fn nested_group_extends_existing_closures() {
        let (store, _dir) = open_store();
        let u1 = Uuid::new_v4();
        let g1 = Uuid::new_v4();
        let g2 = Uuid::new_v4();

        let mut state = StateStore::open(&store).await.unwrap();
        let _ = reconcile(
            &mut state,
            batch(
                vec![api_user(u1, "One", false)],
                vec![api_group(
                    g1,
                    "Engineering",
                    vec![member(u1, MemberType::User, false)],
                )],
                1,
            ),
        );
        state.close(true).unwrap();

        // Next cycle: G1 becomes a member of G2; U1 reached G1, so its
        // closure grows.
        let mut state = StateStore::open(&store).await.unwrap();
        let affected = reconcile(
            &mut state,
            batch(
                vec![],
                vec![api_group(
                    g2,
                    "Department",
                    vec![member(g1, MemberType::Group, false)],
                )],
                2,
            ),
        );

        assert_eq!(affected, HashSet::from([u1]));
        assert_eq!(state.users[&u1].member_of, HashSet::from([g1]));
        assert_eq!(
            state.users[&u1].transitive_member_of,
            HashSet::from([g1, g2])
        );
        assert!(state.users[&u1].modified);

        state.close(false).unwrap();
    }

    #[tokio::test]
    async fn member_removal_shrinks_closure() {
        let (store, _dir) = open_store();
        let u1 = Uuid::new_v4();
        let g1 = Uuid::new_v4();

        let mut state = StateStore::open(&store).await.unwrap();
        let _ = reconcile(
            &mut state,
            batch(
                vec![api_user(u1, "One", false)],
                vec![api_group(
                    g1,
                    "Engineering",
                    vec![member(u1, MemberType::User, false)],
                )],
                1,
            ),
        );

        let affected = reconcile(
            &mut state,
            batch(
                vec![],
                vec![api_group(
                    g1,
                    "Engineering",
                    vec![member(u1, MemberType::User, true)],
                )],
                2,
            ),
        );

        assert_eq!(affected, HashSet::from([u1]));
        assert!(state.users[&u1].member_of.is_empty());
        assert!(state.users[&u1].transitive_member_of.is_empty());

        state.close(false).unwrap();
    }

    #[tokio::test]
    async fn group_edge_removal_flags_transitive_members() {
        let (store, _dir) = open_store();
        let u1 = Uuid::new_v4();
        let g1 = Uuid::new_v4();
        let g2 = Uuid::new_v4();

        let mut state = StateStore::open(&store).await.unwrap();
        let _ = reconcile(
            &mut state,
            batch(
                vec![api_user(u1, "One", false)],
                vec![
                    api_group(g1, "Engineering", vec![member(u1, MemberType::User, false)]),
                    api_group(g2, "Department", vec![member(g1, MemberType::Group, false)]),
                ],
                1,
            ),
        );
        assert_eq!(
            state.users[&u1].transitive_member_of,
            HashSet::from([g1, g2])
        );

        // Removing the G1 -> G2 edge must still flag U1, whose closure
        // traversed it before the mutation.
        let affected = reconcile(
            &mut state,
            batch(
                vec![],
                vec![api_group(
                    g2,
                    "Department",
                    vec![member(g1, MemberType::Group, true)],
                )],
                2,
            ),
        );

        assert_eq!(affected, HashSet::from([u1]));
        assert_eq!(state.users[&u1].transitive_member_of, HashSet::from([g1]));

        state.close(false).unwrap();
    }

    #[tokio::test]
    async fn deleted_user_is_not_expanded() {
        let (store, _dir) = open_store();
        let u2 = Uuid::new_v4();
        let g1 = Uuid::new_v4();

        let mut state = StateStore::open(&store).await.unwrap();
        let _ = reconcile(
            &mut state,
            batch(
                vec![api_user(u2, "Two", false)],
                vec![api_group(
                    g1,
                    "Engineering",
                    vec![member(u2, MemberType::User, false)],
                )],
                1,
            ),
        );
        assert_eq!(state.users[&u2].transitive_member_of, HashSet::from([g1]));

        let affected = reconcile(&mut state, batch(vec![api_user(u2, "Two", true)], vec![], 2));

        assert_eq!(affected, HashSet::from([u2]));
        let user = &state.users[&u2];
        assert!(user.deleted);
        assert!(user.modified);
        // Closure untouched for tombstones.
        assert_eq!(user.transitive_member_of, HashSet::from([g1]));

        state.close(false).unwrap();
    }

    #[tokio::test]
    async fn cyclic_groups_terminate() {
        let (store, _dir) = open_store();
        let u1 = Uuid::new_v4();
        let ga = Uuid::new_v4();
        let gb = Uuid::new_v4();

        let mut state = StateStore::open(&store).await.unwrap();
        let affected = reconcile(
            &mut state,
            batch(
                vec![api_user(u1, "One", false)],
                vec![
                    api_group(ga, "A", vec![
                        member(u1, MemberType::User, false),
                        member(gb, MemberType::Group, false),
                    ]),
                    api_group(gb, "B", vec![member(ga, MemberType::Group, false)]),
                ],
                1,
            ),
        );

        assert!(affected.contains(&u1));
        assert_eq!(
            state.users[&u1].transitive_member_of,
            HashSet::from([ga, gb])
        );

        state.close(false).unwrap();
    }

    #[tokio::test]
    async fn unknown_member_users_are_ignored() {
        let (store, _dir) = open_store();
        let stranger = Uuid::new_v4();
        let g1 = Uuid::new_v4();

        let mut state = StateStore::open(&store).await.unwrap();
        let affected = reconcile(
            &mut state,
            batch(
                vec![],
                vec![api_group(
                    g1,
                    "Engineering",
                    vec![member(stranger, MemberType::User, false)],
                )],
                1,
            ),
        );

        assert!(affected.is_empty());
        assert!(state.users.is_empty());

        state.close(false).unwrap();
    }
}
