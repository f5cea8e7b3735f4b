use std::sync::Arc;

use crate::chat::authorize::ConnectAuthorizer;
use crate::chat::dispatcher::Dispatcher;
use crate::config::ChatSettings;
use crate::db::DbPool;
use crate::ws::PushGateway;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Writer channels of the sockets owned by this process
    pub push: PushGateway,
    /// Routes socket events to the registry and message log
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(
        db: DbPool,
        authorizer: Arc<dyn ConnectAuthorizer>,
        settings: ChatSettings,
    ) -> Self {
        let push = PushGateway::new();
        let dispatcher = Dispatcher::new(db.clone(), Arc::new(push.clone()), authorizer, settings);
        Self {
            db,
            push,
            dispatcher,
        }
    }
}
