//! Connect-time authorization hook.
//!
//! The chat core does not know who participates in a transaction. The
//! integrating system plugs its membership check in here; the default trusts
//! the identity supplied in the handshake.

use std::collections::HashSet;

use crate::db::models::UserRole;

/// Identity claimed by a socket handshake, after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub transaction_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_role: UserRole,
}

pub trait ConnectAuthorizer: Send + Sync {
    /// Return `Err(reason)` to refuse the handshake.
    fn authorize(&self, params: &ConnectParams) -> Result<(), String>;
}

/// Accepts every handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ConnectAuthorizer for AllowAll {
    fn authorize(&self, _params: &ConnectParams) -> Result<(), String> {
        Ok(())
    }
}

/// Refuses handshakes that claim one of the listed roles, e.g. `system`,
/// which only server-side integrations should use.
#[derive(Debug, Clone, Default)]
pub struct RestrictRoles {
    denied: HashSet<UserRole>,
}

impl RestrictRoles {
    pub fn new(denied: impl IntoIterator<Item = UserRole>) -> Self {
        Self {
            denied: denied.into_iter().collect(),
        }
    }
}

impl ConnectAuthorizer for RestrictRoles {
    fn authorize(&self, params: &ConnectParams) -> Result<(), String> {
        if self.denied.contains(&params.user_role) {
            return Err(format!(
                "role '{}' may not open a chat connection",
                params.user_role
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(role: UserRole) -> ConnectParams {
        ConnectParams {
            transaction_id: "t1".to_string(),
            user_id: "u1".to_string(),
            user_name: "Sam".to_string(),
            user_role: role,
        }
    }

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.authorize(&params(UserRole::System)).is_ok());
    }

    #[test]
    fn test_restrict_roles() {
        let authorizer = RestrictRoles::new([UserRole::System]);
        assert!(authorizer.authorize(&params(UserRole::Client)).is_ok());
        let err = authorizer.authorize(&params(UserRole::System)).unwrap_err();
        assert!(err.contains("system"));
    }
}
