//! Typed snapshot view over one writable store transaction.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use eyre::{Result as EyreResult, WrapErr};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use idsync_collections::Graph;
use idsync_kvstore::{Error as StoreError, Store, Transaction};

use crate::fetcher::{Group, User};

pub(crate) const STATE_BUCKET: &str = "state";
pub(crate) const USERS_BUCKET: &str = "users";
pub(crate) const GROUPS_BUCKET: &str = "groups";
pub(crate) const RELATIONSHIPS_BUCKET: &str = "relationships";

pub(crate) const LAST_SYNC_KEY: &[u8] = b"last_sync";
pub(crate) const LAST_UPDATE_KEY: &[u8] = b"last_update";
pub(crate) const USERS_LINK_KEY: &[u8] = b"users_link";
pub(crate) const GROUPS_LINK_KEY: &[u8] = b"groups_link";
pub(crate) const GROUP_MEMBERSHIPS_KEY: &[u8] = b"group_memberships";

/// The in-memory snapshot for one sync cycle, backed by a writable
/// transaction. Mutations are private to the cycle until
/// [`close`](Self::close) commits them; dropping the snapshot (or closing
/// without commit) rolls everything back.
pub(crate) struct StateStore {
    tx: Transaction,

    pub last_sync: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub users_link: Option<String>,
    pub groups_link: Option<String>,
    pub users: HashMap<Uuid, User>,
    pub groups: HashMap<Uuid, Group>,
    pub relationships: Graph<Uuid>,
}

fn get_optional<T>(tx: &Transaction, bucket: &str, key: &[u8]) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
{
    match tx.get(bucket, key) {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

impl StateStore {
    /// Opens a writable transaction and loads the persisted snapshot.
    /// Missing buckets and keys mean a first run, not an error; a decode
    /// failure is state corruption and is fatal.
    pub async fn open(store: &Store) -> EyreResult<Self> {
        let tx = store
            .begin_tx(true)
            .await
            .wrap_err("unable to open state store transaction")?;

        let last_sync = get_optional(&tx, STATE_BUCKET, LAST_SYNC_KEY)
            .wrap_err("unable to get last sync time from state")?;
        let last_update = get_optional(&tx, STATE_BUCKET, LAST_UPDATE_KEY)
            .wrap_err("unable to get last update time from state")?;
        let users_link = get_optional(&tx, STATE_BUCKET, USERS_LINK_KEY)
            .wrap_err("unable to get users link from state")?;
        let groups_link = get_optional(&tx, STATE_BUCKET, GROUPS_LINK_KEY)
            .wrap_err("unable to get groups link from state")?;

        let mut users = HashMap::new();
        let loaded = tx.for_each(USERS_BUCKET, |_key, value| {
            let user: User = serde_json::from_slice(value).map_err(StoreError::Decode)?;
            let _ = users.insert(user.id, user);
            Ok(())
        });
        match loaded {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err).wrap_err("unable to get users from state"),
        }

        let mut groups = HashMap::new();
        let loaded = tx.for_each(GROUPS_BUCKET, |_key, value| {
            let group: Group = serde_json::from_slice(value).map_err(StoreError::Decode)?;
            let _ = groups.insert(group.id, group);
            Ok(())
        });
        match loaded {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err).wrap_err("unable to get groups from state"),
        }

        let relationships = get_optional(&tx, RELATIONSHIPS_BUCKET, GROUP_MEMBERSHIPS_KEY)
            .wrap_err("unable to get group relationships from state")?
            .unwrap_or_default();

        Ok(Self {
            tx,
            last_sync,
            last_update,
            users_link,
            groups_link,
            users,
            groups,
            relationships,
        })
    }

    /// Stores a user into the snapshot. An already-known user is merged and
    /// flagged modified; a new user is inserted and flagged added.
    pub fn store_user(&mut self, mut user: User) {
        match self.users.entry(user.id) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                existing.merge(user);
                existing.modified = true;
            }
            Entry::Vacant(vacant) => {
                user.added = true;
                let _ = vacant.insert(user);
            }
        }
    }

    /// Stores a group into the snapshot, last write wins.
    pub fn store_group(&mut self, group: Group) {
        let _ = self.groups.insert(group.id, group);
    }

    /// Closes the snapshot. On commit, persists set timestamps, known
    /// links, all users and groups, and the relationship graph; on
    /// rollback, aborts the transaction.
    pub fn close(self, commit: bool) -> EyreResult<()> {
        let Self {
            mut tx,
            last_sync,
            last_update,
            users_link,
            groups_link,
            users,
            groups,
            relationships,
        } = self;

        if !commit {
            tx.rollback();
            return Ok(());
        }

        if let Some(last_sync) = last_sync {
            tx.set(STATE_BUCKET, LAST_SYNC_KEY, &last_sync)
                .wrap_err("unable to save last sync time to state")?;
        }
        if let Some(last_update) = last_update {
            tx.set(STATE_BUCKET, LAST_UPDATE_KEY, &last_update)
                .wrap_err("unable to save last update time to state")?;
        }
        if let Some(users_link) = &users_link {
            tx.set(STATE_BUCKET, USERS_LINK_KEY, users_link)
                .wrap_err("unable to save users link to state")?;
        }
        if let Some(groups_link) = &groups_link {
            tx.set(STATE_BUCKET, GROUPS_LINK_KEY, groups_link)
                .wrap_err("unable to save groups link to state")?;
        }

        for (id, user) in &users {
            tx.set(USERS_BUCKET, id.as_bytes(), user)
                .wrap_err_with(|| format!("unable to save user {id} to state"))?;
        }
        for (id, group) in &groups {
            tx.set(GROUPS_BUCKET, id.as_bytes(), group)
                .wrap_err_with(|| format!("unable to save group {id} to state"))?;
        }

        tx.set(RELATIONSHIPS_BUCKET, GROUP_MEMBERSHIPS_KEY, &relationships)
            .wrap_err("unable to save group memberships to state")?;

        tx.commit().wrap_err("unable to commit state")
    }
}

/// Reads the last full sync time through a read-only transaction.
pub(crate) async fn last_sync_time(store: &Store) -> Result<Option<DateTime<Utc>>, StoreError> {
    read_state_time(store, LAST_SYNC_KEY).await
}

/// Reads the last incremental update time through a read-only transaction.
pub(crate) async fn last_update_time(store: &Store) -> Result<Option<DateTime<Utc>>, StoreError> {
    read_state_time(store, LAST_UPDATE_KEY).await
}

async fn read_state_time(
    store: &Store,
    key: &[u8],
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let mut value = None;
    store
        .run_transaction(false, |tx| {
            match get_optional(tx, STATE_BUCKET, key) {
                Ok(time) => {
                    value = time;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
        .await?;

    Ok(value)
}
