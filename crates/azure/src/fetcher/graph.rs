//! Microsoft Graph API delta fetcher.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use crate::authenticator::Authenticator;
use crate::config::AzureConfig;

use super::{FetchError, Fetcher, Group, Member, MemberType, User};

const DEFAULT_GROUPS_QUERY: &str = "$select=displayName,members";
const DEFAULT_USERS_QUERY: &str = "$select=accountEnabled,userPrincipalName,mail,displayName,givenName,surname,jobTitle,officeLocation,mobilePhone,businessPhones";

const API_GROUP_TYPE: &str = "#microsoft.graph.group";
const API_USER_TYPE: &str = "#microsoft.graph.user";

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
struct DeltaPage<T> {
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
    #[serde(rename = "value", default)]
    values: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct GroupApi {
    id: Uuid,
    #[serde(rename = "displayName", default)]
    display_name: String,
    #[serde(rename = "members@delta", default)]
    members_delta: Vec<MemberApi>,
    #[serde(rename = "@removed")]
    removed: Option<Removed>,
}

#[derive(Debug, Deserialize)]
struct MemberApi {
    id: Uuid,
    #[serde(rename = "@odata.type")]
    odata_type: String,
    #[serde(rename = "@removed")]
    removed: Option<Removed>,
}

#[derive(Debug, Deserialize)]
struct Removed {
    #[serde(default)]
    reason: String,
}

fn group_from_api(api: GroupApi) -> Group {
    if let Some(removed) = &api.removed {
        debug!(group = %api.id, reason = %removed.reason, "group removed");
    }

    let mut group = Group {
        id: api.id,
        name: api.display_name,
        deleted: api.removed.is_some(),
        members: Vec::new(),
    };

    for member in api.members_delta {
        let member_type = match member.odata_type.as_str() {
            API_USER_TYPE => MemberType::User,
            API_GROUP_TYPE => MemberType::Group,
            other => {
                debug!(member = %member.id, member_type = other, "ignoring unknown member type");
                continue;
            }
        };
        group.members.push(Member {
            id: member.id,
            member_type,
            deleted: member.removed.is_some(),
        });
    }

    group
}

/// Fetches user and group deltas from the Microsoft Graph API, following
/// `@odata.nextLink` pagination until the endpoint hands back an
/// `@odata.deltaLink` continuation.
pub struct GraphFetcher {
    client: reqwest::Client,
    auth: Arc<dyn Authenticator>,
    users_url: String,
    groups_url: String,
}

impl GraphFetcher {
    pub fn new(
        conf: &AzureConfig,
        auth: Arc<dyn Authenticator>,
        client: reqwest::Client,
    ) -> Result<Self, FetchError> {
        let endpoint = conf.api_endpoint.trim_end_matches('/');

        let mut users_url = Url::parse(&format!("{endpoint}/users/delta"))?;
        users_url.set_query(Some(DEFAULT_USERS_QUERY));

        let mut groups_url = Url::parse(&format!("{endpoint}/groups/delta"))?;
        groups_url.set_query(Some(DEFAULT_GROUPS_QUERY));

        Ok(Self {
            client,
            auth,
            users_url: users_url.into(),
            groups_url: groups_url.into(),
        })
    }

    async fn do_request(&self, url: &str) -> Result<String, FetchError> {
        let bearer = self.auth.token().await?;

        let response = self.client.get(url).bearer_auth(bearer).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl Fetcher for GraphFetcher {
    async fn users(&self, delta_link: Option<&str>) -> Result<(Vec<User>, String), FetchError> {
        let mut fetch_url = match delta_link {
            Some(link) => link.to_owned(),
            None => self.users_url.clone(),
        };

        let mut users = Vec::new();
        loop {
            let body = self.do_request(&fetch_url).await?;
            let page: DeltaPage<Map<String, Value>> =
                serde_json::from_str(&body).map_err(FetchError::Decode)?;

            for raw in page.values {
                match User::from_api(raw) {
                    Ok(user) => {
                        debug!(user = %user.id, "got user from API");
                        users.push(user);
                    }
                    // A malformed user must not abort the page.
                    Err(err) => error!(error = %err, "unable to parse user from API"),
                }
            }

            if let Some(delta) = page.delta_link.filter(|link| !link.is_empty()) {
                return Ok((users, delta));
            }
            match page.next_link.filter(|link| !link.is_empty()) {
                Some(next) if next == fetch_url => return Err(FetchError::NextLinkLoop),
                Some(next) => fetch_url = next,
                None => return Err(FetchError::MissingLinks),
            }
        }
    }

    async fn groups(&self, delta_link: Option<&str>) -> Result<(Vec<Group>, String), FetchError> {
        let mut fetch_url = match delta_link {
            Some(link) => link.to_owned(),
            None => self.groups_url.clone(),
        };

        let mut groups = Vec::new();
        loop {
            let body = self.do_request(&fetch_url).await?;
            let page: DeltaPage<GroupApi> =
                serde_json::from_str(&body).map_err(FetchError::Decode)?;

            for api in page.values {
                debug!(group = %api.id, "got group from API");
                groups.push(group_from_api(api));
            }

            if let Some(delta) = page.delta_link.filter(|link| !link.is_empty()) {
                return Ok((groups, delta));
            }
            match page.next_link.filter(|link| !link.is_empty()) {
                Some(next) if next == fetch_url => return Err(FetchError::NextLinkLoop),
                Some(next) => fetch_url = next,
                None => return Err(FetchError::MissingLinks),
            }
        }
    }
}
