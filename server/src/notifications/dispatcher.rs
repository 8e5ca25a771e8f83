//! Best-effort notification dispatch.
//!
//! [`Notifier::notify`] hands the work to its own task and returns at once,
//! so nothing that goes wrong here can reach the operation that asked for the
//! notification. Inside the task each step logs and swallows its own failure:
//! the durable record comes first, then the live event, then one push attempt
//! per registered device.

use futures_util::future::join_all;

use crate::bus::{BusEvent, GroupName, SharedBus};
use crate::db::models::{Device, Notification};
use crate::db::DbPool;
use crate::notifications::push::{PushMessage, SharedPushGateway};
use crate::notifications::store;

#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub user_id: i64,
    /// Text of the durable notification record
    pub message: String,
    pub property_id: Option<i64>,
    /// Sent to every registered device when present
    pub push: Option<PushMessage>,
    /// Also publish a `notification` event to the user's live connections
    pub live: bool,
}

#[derive(Clone)]
pub struct Notifier {
    db: DbPool,
    bus: SharedBus,
    push: SharedPushGateway,
}

impl Notifier {
    pub fn new(db: DbPool, bus: SharedBus, push: SharedPushGateway) -> Self {
        Self { db, bus, push }
    }

    /// Fire and forget.
    pub fn notify(&self, request: NotifyRequest) {
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.deliver(request).await;
        });
    }

    /// Run every step of a notification in the current task. Returns the
    /// stored record when one was created.
    pub async fn deliver(&self, request: NotifyRequest) -> Option<Notification> {
        let user_id = request.user_id;

        let record = self.record(&request).await;

        if request.live {
            if let Some(notification) = &record {
                self.bus.publish(
                    &GroupName::for_user(user_id),
                    BusEvent::Notification {
                        notification: notification.clone(),
                    },
                );
            }
        }

        if let Some(message) = &request.push {
            self.push_to_devices(user_id, message).await;
        }

        record
    }

    async fn record(&self, request: &NotifyRequest) -> Option<Notification> {
        let db = self.db.clone();
        let user_id = request.user_id;
        let message = request.message.clone();
        let property_id = request.property_id;

        let result = tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| "database lock poisoned".to_string())?;
            store::create_notification(&conn, user_id, &message, property_id)
                .map_err(|e| e.to_string())
        })
        .await;

        match result {
            Ok(Ok(notification)) => {
                tracing::debug!(
                    user_id = user_id,
                    notification_id = notification.id,
                    "Notification recorded"
                );
                Some(notification)
            }
            Ok(Err(e)) => {
                tracing::warn!(user_id = user_id, error = %e, "Failed to record notification");
                None
            }
            Err(e) => {
                tracing::warn!(user_id = user_id, error = %e, "Notification task failed");
                None
            }
        }
    }

    async fn push_to_devices(&self, user_id: i64, message: &PushMessage) {
        let db = self.db.clone();
        let devices = tokio::task::spawn_blocking(move || -> Result<Vec<Device>, String> {
            let conn = db.lock().map_err(|_| "database lock poisoned".to_string())?;
            store::list_devices(&conn, user_id).map_err(|e| e.to_string())
        })
        .await;

        let devices = match devices {
            Ok(Ok(devices)) => devices,
            Ok(Err(e)) => {
                tracing::warn!(user_id = user_id, error = %e, "Failed to load push devices");
                return;
            }
            Err(e) => {
                tracing::warn!(user_id = user_id, error = %e, "Device lookup task failed");
                return;
            }
        };

        if devices.is_empty() {
            return;
        }

        let attempts = devices.iter().map(|device| async move {
            let result = self.push.send(&device.registration_id, message).await;
            if let Err(e) = &result {
                tracing::warn!(
                    user_id = user_id,
                    device_id = device.id,
                    gateway = self.push.name(),
                    error = %e,
                    "Push delivery failed"
                );
            }
            result.is_ok()
        });

        let delivered = join_all(attempts).await.into_iter().filter(|ok| *ok).count();
        tracing::debug!(
            user_id = user_id,
            devices = devices.len(),
            delivered = delivered,
            "Push fan-out finished"
        );
    }
}
