//! Property listings, reduced to what the notification flows need: existence
//! checks for shared listings, price updates and favorites.

use axum::{
    extract::{Path, State},
    Json,
};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db::models::Property;
use crate::db::now_timestamp;
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::events::{self, DomainEvent};
use crate::state::AppState;

pub fn create_property(
    conn: &Connection,
    owner_id: i64,
    title: &str,
    price_cents: i64,
) -> rusqlite::Result<i64> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO properties (owner_id, title, price_cents, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        rusqlite::params![owner_id, title, price_cents, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_property(conn: &Connection, property_id: i64) -> rusqlite::Result<Option<Property>> {
    conn.query_row(
        "SELECT id, owner_id, title, price_cents FROM properties WHERE id = ?1",
        rusqlite::params![property_id],
        |row| {
            Ok(Property {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                title: row.get(2)?,
                price_cents: row.get(3)?,
            })
        },
    )
    .optional()
}

pub fn property_exists(conn: &Connection, property_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM properties WHERE id = ?1)",
        rusqlite::params![property_id],
        |row| row.get(0),
    )
}

/// Users who favorited a property, by id.
pub fn favorited_by(conn: &Connection, property_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM property_favorites WHERE property_id = ?1 ORDER BY user_id",
    )?;
    let rows = stmt.query_map(rusqlite::params![property_id], |row| row.get(0))?;
    rows.collect()
}

/// Flip the caller's favorite; returns whether the property is now favorited.
pub fn toggle_favorite(conn: &Connection, property_id: i64, user_id: i64) -> rusqlite::Result<bool> {
    let removed = conn.execute(
        "DELETE FROM property_favorites WHERE property_id = ?1 AND user_id = ?2",
        rusqlite::params![property_id, user_id],
    )?;
    if removed > 0 {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO property_favorites (property_id, user_id) VALUES (?1, ?2)",
        rusqlite::params![property_id, user_id],
    )?;
    Ok(true)
}

/// Convert a decimal price to cents, rejecting negatives and non-numbers.
fn price_to_cents(price: f64) -> Option<i64> {
    if !price.is_finite() || price < 0.0 {
        return None;
    }
    Some((price * 100.0).round() as i64)
}

#[derive(Debug, Deserialize)]
pub struct UpdatePropertyRequest {
    pub price: Option<f64>,
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FavoriteResponse {
    pub favorited: bool,
}

/// PATCH /api/properties/{id}
/// Owner only. A price change notifies everyone who favorited the listing.
pub async fn update_property(
    State(state): State<AppState>,
    claims: Claims,
    Path(property_id): Path<i64>,
    JsonBody(body): JsonBody<UpdatePropertyRequest>,
) -> ApiResult<Json<Property>> {
    let new_price = match body.price {
        Some(price) => Some(
            price_to_cents(price).ok_or_else(|| ApiError::BadRequest("invalid price".to_string()))?,
        ),
        None => None,
    };

    let db = state.db.clone();
    let user_id = claims.user_id;

    let (property, event) = tokio::task::spawn_blocking(move || -> ApiResult<_> {
        let mut conn = db.lock().map_err(|_| ApiError::lock_poisoned())?;
        let tx = conn.transaction()?;

        let original = find_property(&tx, property_id)?
            .ok_or_else(|| ApiError::NotFound("property not found".to_string()))?;
        if original.owner_id != user_id {
            return Err(ApiError::Forbidden("only the owner can update this property".to_string()));
        }

        let title = body.title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| original.title.clone());
        let price_cents = new_price.unwrap_or(original.price_cents);

        tx.execute(
            "UPDATE properties SET title = ?2, price_cents = ?3, updated_at = ?4 WHERE id = ?1",
            rusqlite::params![property_id, title, price_cents, now_timestamp()],
        )?;

        let event = if price_cents != original.price_cents {
            Some(DomainEvent::PropertyPriceChanged {
                property_id,
                title: title.clone(),
                old_price: original.price_cents,
                new_price: price_cents,
                favorited_by: favorited_by(&tx, property_id)?,
            })
        } else {
            None
        };

        tx.commit()?;

        Ok((
            Property {
                id: property_id,
                owner_id: original.owner_id,
                title,
                price_cents,
            },
            event,
        ))
    })
    .await
    .map_err(ApiError::task_failed)??;

    if let Some(event) = event {
        events::dispatch(&state.notifier, event);
    }

    Ok(Json(property))
}

/// POST /api/properties/{id}/favorite
/// Toggle the caller's favorite.
pub async fn favorite_property(
    State(state): State<AppState>,
    claims: Claims,
    Path(property_id): Path<i64>,
) -> ApiResult<Json<FavoriteResponse>> {
    let db = state.db.clone();
    let user_id = claims.user_id;

    let favorited = tokio::task::spawn_blocking(move || -> ApiResult<bool> {
        let conn = db.lock().map_err(|_| ApiError::lock_poisoned())?;
        if !property_exists(&conn, property_id)? {
            return Err(ApiError::NotFound("property not found".to_string()));
        }
        Ok(toggle_favorite(&conn, property_id, user_id)?)
    })
    .await
    .map_err(ApiError::task_failed)??;

    tracing::debug!(property_id = property_id, user_id = user_id, favorited = favorited, "Favorite toggled");
    Ok(Json(FavoriteResponse { favorited }))
}
