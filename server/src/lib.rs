//! Dealroom transaction chat server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod chat;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use std::sync::Arc;

use chat::authorize::{AllowAll, ConnectAuthorizer, RestrictRoles};
use config::ChatSettings;
use db::models::UserRole;

/// Connect authorizer implied by the chat settings.
pub fn authorizer_for(settings: &ChatSettings) -> Arc<dyn ConnectAuthorizer> {
    if settings.deny_system_role {
        Arc::new(RestrictRoles::new([UserRole::System]))
    } else {
        Arc::new(AllowAll)
    }
}
