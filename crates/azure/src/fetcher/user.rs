use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UserParseError {
    #[error("user missing required id field")]
    MissingId,

    #[error("unable to unmarshal user, invalid ID: {0}")]
    InvalidId(#[source] uuid::Error),
}

/// A directory user.
///
/// `fields` holds the raw API payload minus the `id` and `@removed`
/// markers. `member_of` tracks direct group memberships as reported by
/// deltas; `transitive_member_of` is its closure over the group
/// relationship graph and is recomputed on every reconciliation, never
/// trusted from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub member_of: HashSet<Uuid>,
    #[serde(default)]
    pub transitive_member_of: HashSet<Uuid>,
    #[serde(default)]
    pub deleted: bool,

    #[serde(skip)]
    pub modified: bool,
    #[serde(skip)]
    pub added: bool,
}

impl User {
    /// Builds a user from a raw delta payload. The `id` field is required
    /// and removed from `fields`; a top-level `@removed` marks the user
    /// deleted and is removed as well.
    pub fn from_api(mut fields: Map<String, Value>) -> Result<Self, UserParseError> {
        let id = match fields.remove("id") {
            Some(raw) => {
                let text = raw.as_str().unwrap_or_default();
                Uuid::parse_str(text).map_err(UserParseError::InvalidId)?
            }
            None => return Err(UserParseError::MissingId),
        };

        let deleted = fields.remove("@removed").is_some();

        Ok(Self {
            id,
            fields,
            member_of: HashSet::new(),
            transitive_member_of: HashSet::new(),
            deleted,
            modified: false,
            added: false,
        })
    }

    /// Folds `other` into this user: fields overwrite key-wise, membership
    /// sets union, and the deletion flag takes the incoming value.
    pub fn merge(&mut self, other: User) {
        if self.id != other.id {
            return;
        }

        for (key, value) in other.fields {
            let _ = self.fields.insert(key, value);
        }
        self.member_of.extend(other.member_of);
        self.transitive_member_of.extend(other.transitive_member_of);
        self.deleted = other.deleted;
    }

    pub fn add_member_of(&mut self, group: Uuid) {
        let _ = self.member_of.insert(group);
    }

    pub fn remove_member_of(&mut self, group: Uuid) {
        let _ = self.member_of.remove(&group);
    }

    pub fn is_transitive_member_of(&self, group: Uuid) -> bool {
        self.transitive_member_of.contains(&group)
    }
}
