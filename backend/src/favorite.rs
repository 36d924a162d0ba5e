use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use diesel::prelude::*;
use serde_json::{json, Value};

use crate::auth::CurrentUser;
use crate::db;
use crate::error::{AppError, Result};
use crate::listing::{find_listing, ListingCard};
use crate::models::{Listing, NewFavorite};
use crate::schema::{favorites, listings};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/favorites", get(list_favorites))
        .route(
            "/favorites/:listing_id",
            post(add_favorite).delete(remove_favorite),
        )
}

async fn list_favorites(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    let user_id = user.id;
    let cards = db::run(&state.pool, move |conn| {
        let saved: Vec<Listing> = favorites::table
            .inner_join(listings::table)
            .filter(favorites::user_id.eq(user_id))
            .order(listings::title.asc())
            .select(Listing::as_select())
            .load(conn)?;
        Ok(saved.iter().map(ListingCard::from).collect::<Vec<_>>())
    })
    .await?;
    Ok(Json(json!({"success": true, "data": cards})))
}

async fn add_favorite(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(listing_id): Path<i32>,
) -> Result<(StatusCode, Json<Value>)> {
    let user_id = user.id;
    db::run(&state.pool, move |conn| {
        find_listing(conn, listing_id)?;
        let inserted = diesel::insert_into(favorites::table)
            .values(&NewFavorite {
                user_id,
                listing_id,
            })
            .on_conflict_do_nothing()
            .execute(conn)?;
        if inserted == 0 {
            return Err(AppError::conflict("Listing is already in favorites"));
        }
        Ok(())
    })
    .await?;

    log::info!("User {} saved listing {}", user_id, listing_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({"success": true, "message": "Listing added to favorites"})),
    ))
}

async fn remove_favorite(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(listing_id): Path<i32>,
) -> Result<StatusCode> {
    let user_id = user.id;
    db::run(&state.pool, move |conn| {
        let removed = diesel::delete(favorites::table.find((user_id, listing_id))).execute(conn)?;
        if removed == 0 {
            return Err(AppError::not_found("Listing not found in favorites"));
        }
        Ok(())
    })
    .await?;
    log::info!("User {} removed listing {} from favorites", user_id, listing_id);
    Ok(StatusCode::NO_CONTENT)
}
