//! Shapes the per-user event emitted to the pipeline.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tracing::warn;
use uuid::Uuid;

use idsync_collections::Document;

use crate::fetcher::{Group, User};

pub(crate) const ECS_VERSION: &str = "8.5.0";

// Well-known API fields remapped onto ECS keys. The third column marks
// fields collected into a list rather than set directly.
const USER_FIELD_MAP: &[(&str, &str, bool)] = &[
    ("userPrincipalName", "user.name", true),
    ("mail", "user.email", false),
    ("displayName", "user.full_name", false),
    ("givenName", "user.first_name", false),
    ("surname", "user.last_name", false),
    ("jobTitle", "user.job_title", false),
    ("officeLocation", "user.work.location", false),
    ("mobilePhone", "user.phone", true),
    ("businessPhones", "user.phone", true),
];

/// Builds the flattened event document for one user: the raw retained
/// fields under `azure_ad.*`, the ECS remapping of well-known fields, the
/// event envelope, and the transitive group list.
pub(crate) fn user_event(user: &User, groups: &HashMap<Uuid, Group>, input_id: &str) -> Document {
    let mut doc = Document::new();

    for (key, value) in &user.fields {
        doc.put(format!("azure_ad.{key}"), value.clone());
    }
    remap_ecs_fields(&mut doc, &user.fields);

    doc.put("ecs.version", ECS_VERSION);
    doc.put("event.kind", "state");
    doc.put("event.provider", "Azure AD");
    doc.put("event.type", "user");
    if user.deleted {
        doc.put("event.action", "user-deleted");
    } else if user.modified {
        doc.put("event.action", "user-modified");
    }
    doc.put("labels.identity_source", input_id);
    doc.put("user.id", user.id.to_string());

    let mut ecs_groups = Vec::new();
    for group_id in &user.transitive_member_of {
        match groups.get(group_id) {
            Some(group) => {
                let ecs = group.to_ecs();
                ecs_groups.push(json!({"id": ecs.id, "name": ecs.name}));
            }
            None => warn!(group = %group_id, user = %user.id, "unable to lookup group for user"),
        }
    }
    if !ecs_groups.is_empty() {
        doc.put("user.group", Value::Array(ecs_groups));
    }

    doc
}

fn remap_ecs_fields(doc: &mut Document, fields: &Map<String, Value>) {
    for (field, key, append) in USER_FIELD_MAP {
        let Some(value) = fields.get(*field) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        if *append {
            match value {
                Value::String(value) => doc.append_str(key, value),
                Value::Array(items) => {
                    for item in items {
                        if let Some(item) = item.as_str() {
                            doc.append_str(key, item);
                        }
                    }
                }
                _ => {}
            }
        } else {
            doc.put(*key, value.clone());
        }
    }
}
