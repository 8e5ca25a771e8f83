//! Rental contract requests: owner decisions and first-rent payment.

use axum::{
    extract::{Path, State},
    Json,
};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::db::models::ContractRequest;
use crate::db::now_timestamp;
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::events::{self, DomainEvent};
use crate::properties;
use crate::state::AppState;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";

/// Payment status reported by the payment provider for a settled payment.
const PAYMENT_APPROVED: &str = "approved";

pub fn is_valid_status(status: &str) -> bool {
    matches!(status, STATUS_PENDING | STATUS_APPROVED | STATUS_REJECTED)
}

pub fn create_contract(conn: &Connection, property_id: i64, requester_id: i64) -> rusqlite::Result<i64> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO contract_requests (property_id, requester_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        rusqlite::params![property_id, requester_id, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_contract(conn: &Connection, contract_id: i64) -> rusqlite::Result<Option<ContractRequest>> {
    conn.query_row(
        "SELECT id, property_id, requester_id, status, owner_response, first_rent_paid,
                payment_id, payment_status, updated_at
         FROM contract_requests WHERE id = ?1",
        rusqlite::params![contract_id],
        |row| {
            Ok(ContractRequest {
                id: row.get(0)?,
                property_id: row.get(1)?,
                requester_id: row.get(2)?,
                status: row.get(3)?,
                owner_response: row.get(4)?,
                first_rent_paid: row.get(5)?,
                payment_id: row.get(6)?,
                payment_status: row.get(7)?,
                updated_at: row.get(8)?,
            })
        },
    )
    .optional()
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
    pub owner_response: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentConfirmedRequest {
    pub payment_id: String,
    pub payment_status: String,
}

/// POST /api/contracts/{id}/status
/// Owner of the property only. A status change notifies the requester.
pub async fn set_status(
    State(state): State<AppState>,
    claims: Claims,
    Path(contract_id): Path<i64>,
    JsonBody(body): JsonBody<SetStatusRequest>,
) -> ApiResult<Json<ContractRequest>> {
    if !is_valid_status(&body.status) {
        return Err(ApiError::BadRequest("invalid status".to_string()));
    }

    let db = state.db.clone();
    let user_id = claims.user_id;

    let (contract, event) = tokio::task::spawn_blocking(move || -> ApiResult<_> {
        let mut conn = db.lock().map_err(|_| ApiError::lock_poisoned())?;
        let tx = conn.transaction()?;

        let contract = find_contract(&tx, contract_id)?
            .ok_or_else(|| ApiError::NotFound("contract not found".to_string()))?;
        let property = properties::find_property(&tx, contract.property_id)?
            .ok_or_else(|| ApiError::NotFound("property not found".to_string()))?;
        if property.owner_id != user_id {
            return Err(ApiError::Forbidden("only the property owner can change the status".to_string()));
        }

        tx.execute(
            "UPDATE contract_requests
             SET status = ?2, owner_response = COALESCE(?3, owner_response), updated_at = ?4
             WHERE id = ?1",
            rusqlite::params![contract_id, body.status, body.owner_response, now_timestamp()],
        )?;

        let updated = find_contract(&tx, contract_id)?
            .ok_or_else(|| ApiError::NotFound("contract not found".to_string()))?;
        tx.commit()?;

        let event = (contract.status != updated.status).then(|| DomainEvent::ContractStatusChanged {
            contract_id,
            property_id: property.id,
            title: property.title.clone(),
            requester_id: updated.requester_id,
            status: updated.status.clone(),
        });

        Ok((updated, event))
    })
    .await
    .map_err(ApiError::task_failed)??;

    tracing::info!(
        contract_id = contract_id,
        status = %contract.status,
        "Contract status set"
    );

    if let Some(event) = event {
        events::dispatch(&state.notifier, event);
    }

    Ok(Json(contract))
}

/// POST /api/contracts/{id}/payment-confirmed
/// Records the provider's payment result for the requester's contract. The
/// first time an approved payment lands on an approved contract, the rent is
/// marked paid and both tenant and owner are notified.
pub async fn payment_confirmed(
    State(state): State<AppState>,
    claims: Claims,
    Path(contract_id): Path<i64>,
    JsonBody(body): JsonBody<PaymentConfirmedRequest>,
) -> ApiResult<Json<ContractRequest>> {
    if body.payment_id.trim().is_empty() {
        return Err(ApiError::BadRequest("payment_id required".to_string()));
    }

    let db = state.db.clone();
    let user_id = claims.user_id;

    let (contract, event) = tokio::task::spawn_blocking(move || -> ApiResult<_> {
        let mut conn = db.lock().map_err(|_| ApiError::lock_poisoned())?;
        let tx = conn.transaction()?;

        let contract = find_contract(&tx, contract_id)?
            .ok_or_else(|| ApiError::NotFound("contract not found".to_string()))?;
        if contract.requester_id != user_id {
            return Err(ApiError::NotFound("contract not found".to_string()));
        }
        if contract.status != STATUS_APPROVED {
            return Err(ApiError::BadRequest("contract is not approved".to_string()));
        }

        let settles = body.payment_status == PAYMENT_APPROVED && !contract.first_rent_paid;

        tx.execute(
            "UPDATE contract_requests
             SET payment_id = ?2, payment_status = ?3,
                 first_rent_paid = first_rent_paid OR ?4, updated_at = ?5
             WHERE id = ?1",
            rusqlite::params![
                contract_id,
                body.payment_id,
                body.payment_status,
                settles,
                now_timestamp()
            ],
        )?;

        let event = if settles {
            let property = properties::find_property(&tx, contract.property_id)?
                .ok_or_else(|| ApiError::NotFound("property not found".to_string()))?;
            Some(DomainEvent::PaymentConfirmed {
                contract_id,
                property_id: property.id,
                title: property.title,
                tenant_id: contract.requester_id,
                owner_id: property.owner_id,
            })
        } else {
            None
        };

        let updated = find_contract(&tx, contract_id)?
            .ok_or_else(|| ApiError::NotFound("contract not found".to_string()))?;
        tx.commit()?;

        Ok((updated, event))
    })
    .await
    .map_err(ApiError::task_failed)??;

    tracing::info!(
        contract_id = contract_id,
        payment_status = ?contract.payment_status,
        first_rent_paid = contract.first_rent_paid,
        "Payment result recorded"
    );

    if let Some(event) = event {
        events::dispatch(&state.notifier, event);
    }

    Ok(Json(contract))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;
    use crate::users::create_user;

    #[test]
    fn test_status_values() {
        assert!(is_valid_status("pending"));
        assert!(is_valid_status("approved"));
        assert!(is_valid_status("rejected"));
        assert!(!is_valid_status("paid"));
        assert!(!is_valid_status(""));
    }

    #[test]
    fn test_new_contract_defaults() {
        let db = init_memory_db().unwrap();
        let conn = db.lock().unwrap();
        let owner = create_user(&conn, "Owner", None).unwrap();
        let tenant = create_user(&conn, "Tenant", None).unwrap();
        let property = properties::create_property(&conn, owner, "Loft", 100000).unwrap();

        let id = create_contract(&conn, property, tenant).unwrap();
        let contract = find_contract(&conn, id).unwrap().unwrap();
        assert_eq!(contract.status, STATUS_PENDING);
        assert!(!contract.first_rent_paid);
        assert_eq!(contract.payment_id, None);
    }
}
