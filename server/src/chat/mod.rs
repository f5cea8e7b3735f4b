pub mod authorize;
pub mod broadcast;
pub mod dispatcher;
pub mod messages;
pub mod reaper;
pub mod registry;
