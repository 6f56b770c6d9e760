use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    User,
    Group,
}

/// One entry of a group's `members@delta` batch. Transient; learned
/// memberships are folded into users and the relationship graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub id: Uuid,
    pub member_type: MemberType,
    pub deleted: bool,
}

/// A directory group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub deleted: bool,

    #[serde(skip)]
    pub members: Vec<Member>,
}

/// The ECS rendering of a group reference on an emitted user event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEcs {
    pub id: String,
    pub name: String,
}

impl Group {
    pub fn to_ecs(&self) -> GroupEcs {
        GroupEcs {
            id: self.id.to_string(),
            name: self.name.clone(),
        }
    }
}
