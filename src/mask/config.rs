use serde::Deserialize;

use crate::account::id::UserId;
use crate::account::user::User;
use crate::error::{ProxyError, Result};

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
}

#[derive(Debug, Deserialize)]
pub struct MaskListenerConfig {
    users: Vec<RawUser>,
}

impl MaskListenerConfig {
    /// Parse every user's UUID. A user whose UUID fails to parse is
    /// skipped (its `id` is logged), not fatal by itself -- only an empty
    /// resulting list is a fatal config error.
    pub fn into_users(self) -> Result<Vec<User>> {
        let mut users = Vec::new();
        for raw in self.users {
            match UserId::parse(&raw.id) {
                Ok(id) => users.push(User::new(id)),
                Err(err) => tracing::warn!(id = %raw.id, error = %err, "dropping unparseable mask user"),
            }
        }
        if users.is_empty() {
            return Err(ProxyError::Config("mask listener has no usable users".into()));
        }
        Ok(users)
    }
}

#[derive(Debug, Deserialize)]
struct RawNextNode {
    address: String,
    port: u16,
    users: Vec<RawUser>,
}

/// A configured next hop for the mask caller: where to dial, and the pool
/// of users whose identity it may present.
#[derive(Debug, Clone)]
pub struct NextNode {
    pub address: String,
    pub port: u16,
    pub users: Vec<std::sync::Arc<User>>,
}

#[derive(Debug, Deserialize)]
pub struct MaskCallerConfig(Vec<RawNextNode>);

impl MaskCallerConfig {
    /// Drops nodes with zero parseable users; fails if none remain.
    pub fn into_next_nodes(self) -> Result<Vec<NextNode>> {
        let mut nodes = Vec::new();
        for raw in self.0 {
            let mut users = Vec::new();
            for raw_user in raw.users {
                match UserId::parse(&raw_user.id) {
                    Ok(id) => users.push(std::sync::Arc::new(User::new(id))),
                    Err(err) => {
                        tracing::warn!(id = %raw_user.id, error = %err, "dropping unparseable mask user")
                    }
                }
            }
            if users.is_empty() {
                tracing::warn!(address = %raw.address, port = raw.port, "dropping next node with no usable users");
                continue;
            }
            nodes.push(NextNode { address: raw.address, port: raw.port, users });
        }
        if nodes.is_empty() {
            return Err(ProxyError::Config("mask caller has no usable next node".into()));
        }
        Ok(nodes)
    }
}
