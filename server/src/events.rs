//! Domain events raised by property and contract updates.
//!
//! The mutating handler calls [`dispatch`] after its change is committed;
//! each event becomes one or more notifications.

use std::collections::BTreeMap;

use crate::notifications::dispatcher::{NotifyRequest, Notifier};
use crate::notifications::push::PushMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    PropertyPriceChanged {
        property_id: i64,
        title: String,
        /// Prices in cents
        old_price: i64,
        new_price: i64,
        favorited_by: Vec<i64>,
    },
    ContractStatusChanged {
        contract_id: i64,
        property_id: i64,
        title: String,
        requester_id: i64,
        status: String,
    },
    PaymentConfirmed {
        contract_id: i64,
        property_id: i64,
        title: String,
        tenant_id: i64,
        owner_id: i64,
    },
}

/// Hand every notification for `event` to the dispatcher.
pub fn dispatch(notifier: &Notifier, event: DomainEvent) {
    let requests = notifications_for(&event);
    tracing::info!(event = ?event, notifications = requests.len(), "Domain event dispatched");
    for request in requests {
        notifier.notify(request);
    }
}

/// Format cents as `1234.50`.
pub fn format_price(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

fn push_data(kind: &str, contract_id: i64, property_id: i64) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert("type".to_string(), kind.to_string());
    data.insert("contract".to_string(), contract_id.to_string());
    data.insert("imovel".to_string(), property_id.to_string());
    data
}

pub fn notifications_for(event: &DomainEvent) -> Vec<NotifyRequest> {
    match event {
        DomainEvent::PropertyPriceChanged {
            property_id,
            title,
            old_price,
            new_price,
            favorited_by,
        } => {
            let message = format!(
                "Price alert! The property '{}' you favorited changed price from R$ {} to R$ {}.",
                title,
                format_price(*old_price),
                format_price(*new_price)
            );
            favorited_by
                .iter()
                .map(|user_id| NotifyRequest {
                    user_id: *user_id,
                    message: message.clone(),
                    property_id: Some(*property_id),
                    push: None,
                    live: false,
                })
                .collect()
        }

        DomainEvent::ContractStatusChanged {
            contract_id,
            property_id,
            title,
            requester_id,
            status,
        } => {
            let message = match status.as_str() {
                "approved" => format!("Your rental request for '{}' was approved.", title),
                "rejected" => format!("Your rental request for '{}' was rejected.", title),
                _ => format!("Your rental request for '{}' is pending again.", title),
            };
            let mut data = push_data("contract", *contract_id, *property_id);
            data.insert("status".to_string(), status.clone());

            vec![NotifyRequest {
                user_id: *requester_id,
                message: message.clone(),
                property_id: Some(*property_id),
                push: Some(PushMessage {
                    title: "Rental request updated".to_string(),
                    body: message,
                    data,
                }),
                live: true,
            }]
        }

        DomainEvent::PaymentConfirmed {
            contract_id,
            property_id,
            title,
            tenant_id,
            owner_id,
        } => {
            let data = push_data("payment", *contract_id, *property_id);
            let to_tenant = format!("Your first rent payment for '{}' was confirmed.", title);
            let to_owner = format!("The first rent for '{}' has been paid.", title);

            [(*tenant_id, to_tenant), (*owner_id, to_owner)]
                .into_iter()
                .map(|(user_id, message)| NotifyRequest {
                    user_id,
                    message: message.clone(),
                    property_id: Some(*property_id),
                    push: Some(PushMessage {
                        title: "Payment confirmed".to_string(),
                        body: message,
                        data: data.clone(),
                    }),
                    live: true,
                })
                .collect()
        }
    }
}
