//! Caller identity and request descriptors.
//!
//! These are plain data supplied by the classification middleware. The scheduler never looks at
//! them when deciding; they only show up in detailed dumps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Members of this group bypass most authorization checks.
pub const SYSTEM_PRIVILEGED_GROUP: &str = "system:masters";
pub const NODES_GROUP: &str = "system:nodes";
pub const ALL_UNAUTHENTICATED: &str = "system:unauthenticated";
pub const ALL_AUTHENTICATED: &str = "system:authenticated";

pub const ANONYMOUS: &str = "system:anonymous";
pub const API_SERVER_USER: &str = "system:apiserver";

/// An authenticated (or anonymous) user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Name unique among all active users.
    pub name: String,
    /// Changes if the user is removed and another is added under the same name.
    pub uid: String,
    pub groups: Vec<String>,
    /// Authenticator-specific attributes. Keys are lowercase and namespaced, e.g.
    /// `example.org/scopes`.
    #[serde(default)]
    pub extra: HashMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Append a value under `key`. The key is lowercased.
    pub fn with_extra(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extra
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Resolved description of what an API request is doing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// True for resource requests, false for non-resource paths such as `/healthz`.
    pub is_resource_request: bool,
    pub path: String,
    pub verb: String,
    #[serde(default)]
    pub api_prefix: String,
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub subresource: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parts: Vec<String>,
}

/// Per-request metadata carried alongside a scheduled request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user: Option<UserInfo>,
    pub request_info: Option<RequestInfo>,
}

impl RequestContext {
    pub fn new(user: UserInfo, request_info: RequestInfo) -> Self {
        Self {
            user: Some(user),
            request_info: Some(request_info),
        }
    }

    /// Name of the user, empty when none is attached.
    pub fn user_name(&self) -> &str {
        self.user.as_ref().map(|u| u.name.as_str()).unwrap_or("")
    }
}
