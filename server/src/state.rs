use std::time::Duration;

use crate::bus::SharedBus;
use crate::db::DbPool;
use crate::notifications::dispatcher::Notifier;
use crate::notifications::push::SharedPushGateway;
use crate::ws::actor::Heartbeat;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Group bus carrying events to live connections
    pub bus: SharedBus,
    pub notifier: Notifier,
    /// Upper bound on WebSocket handshake authentication
    pub auth_timeout: Duration,
    pub heartbeat: Heartbeat,
}

impl AppState {
    pub fn new(
        db: DbPool,
        jwt_secret: Vec<u8>,
        bus: SharedBus,
        push: SharedPushGateway,
        auth_timeout: Duration,
    ) -> Self {
        let notifier = Notifier::new(db.clone(), bus.clone(), push);
        Self {
            db,
            jwt_secret,
            bus,
            notifier,
            auth_timeout,
            heartbeat: Heartbeat::default(),
        }
    }

    /// Override the keepalive timing of new connections.
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}
