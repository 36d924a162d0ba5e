use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::CurrentUser;
use crate::db;
use crate::error::{AppError, AppJson, Result};
use crate::listing::{booked_attendees, users_by_id};
use crate::models::{json_integer, Booking, BookingStatus, Listing, NewBooking, User};
use crate::schema::{bookings, listings};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings/create", post(create_booking))
        .route("/bookings/my", get(my_bookings))
        .route("/bookings/owner", get(owner_bookings))
        .route("/bookings/:booking_id", patch(update_booking_status))
        .route("/bookings/:booking_id/cancel", delete(cancel_booking))
}

/// The current calendar date (UTC), used for availability and past/future checks.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Debug, Serialize)]
pub struct ListingSummary {
    pub id: i32,
    pub title: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    #[serde(rename = "monthlyRent")]
    pub monthly_rent: f64,
    pub owner_id: i32,
    pub main_image_url: Option<String>,
}

impl From<&Listing> for ListingSummary {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id,
            title: listing.title.clone(),
            street_address: listing.street_address.clone(),
            city: listing.city.clone(),
            state: listing.state.clone(),
            monthly_rent: listing.monthly_rent,
            owner_id: listing.owner_id,
            main_image_url: listing.main_image_url(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub mobile_no: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            mobile_no: user.mobile_no.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub id: i32,
    pub user_id: i32,
    pub listing_id: i32,
    pub appointment_date: NaiveDate,
    pub booking_date: NaiveDate,
    pub attendees: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub listing: ListingSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<UserSummary>,
}

impl BookingView {
    pub fn new(booking: Booking, listing: &Listing, tenant: Option<&User>) -> Self {
        Self {
            id: booking.id,
            user_id: booking.user_id,
            listing_id: booking.listing_id,
            appointment_date: booking.appointment_date,
            booking_date: booking.booking_date(),
            attendees: booking.attendees,
            status: booking.status,
            created_at: booking.created_at,
            listing: ListingSummary::from(listing),
            tenant: tenant.map(UserSummary::from),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateBookingRequest {
    pub listing_id: Option<Value>,
    pub attendees: Option<Value>,
    pub appointment_date: Option<String>,
}

#[derive(Debug, PartialEq)]
pub struct BookingRequest {
    pub listing_id: i32,
    pub attendees: i32,
    pub appointment_date: NaiveDate,
}

impl CreateBookingRequest {
    /// Checks the shape of the request. `today` anchors the default date and the past-date rule.
    pub fn validate(self, today: NaiveDate) -> Result<BookingRequest> {
        let listing_id = self
            .listing_id
            .filter(|v| !v.is_null())
            .ok_or_else(|| AppError::bad_request("Listing ID is required"))?;
        let listing_id = json_integer(&listing_id)
            .and_then(|id| i32::try_from(id).ok())
            .ok_or_else(|| AppError::bad_request("Listing ID must be an integer"))?;

        let attendees = match self.attendees.filter(|v| !v.is_null()) {
            None => 1,
            Some(raw) => json_integer(&raw)
                .and_then(|n| i32::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    AppError::bad_request("Number of attendees must be a positive integer")
                })?,
        };

        let appointment_date = match self.appointment_date.as_deref().map(str::trim) {
            None | Some("") => today,
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                AppError::bad_request("Invalid appointment date format. Use YYYY-MM-DD.")
            })?,
        };
        if appointment_date < today {
            return Err(AppError::bad_request(
                "Cannot book an appointment for a past date",
            ));
        }

        Ok(BookingRequest {
            listing_id,
            attendees,
            appointment_date,
        })
    }
}

/// Seats still free after the active bookings already taken for the day.
pub fn check_capacity(seating: i32, already_booked: i64, requested: i32) -> Result<()> {
    if already_booked + i64::from(requested) > i64::from(seating) {
        return Err(AppError::conflict(format!(
            "Not enough capacity: {} of {} seats left for this date",
            (i64::from(seating) - already_booked).max(0),
            seating
        )));
    }
    Ok(())
}

async fn create_booking(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(body): AppJson<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let request = body.validate(today())?;
    let user_id = user.id;

    let view = db::run(&state.pool, move |conn| {
        conn.transaction::<_, AppError, _>(|conn| {
            let listing: Listing = listings::table
                .find(request.listing_id)
                .select(Listing::as_select())
                .for_update()
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found("Listing not found"))?;

            if listing.owner_id == user_id {
                return Err(AppError::forbidden("You cannot book your own listing"));
            }

            let existing: i64 = bookings::table
                .filter(bookings::user_id.eq(user_id))
                .filter(bookings::listing_id.eq(listing.id))
                .filter(bookings::status.ne(BookingStatus::Cancelled.as_str()))
                .count()
                .get_result(conn)?;
            if existing > 0 {
                return Err(AppError::conflict("You have already booked this listing"));
            }

            let booked = booked_attendees(conn, &[listing.id], request.appointment_date)?
                .get(&listing.id)
                .copied()
                .unwrap_or(0);
            check_capacity(listing.seating, booked, request.attendees)?;

            let booking: Booking = diesel::insert_into(bookings::table)
                .values(&NewBooking {
                    user_id,
                    listing_id: listing.id,
                    appointment_date: request.appointment_date,
                    attendees: request.attendees,
                    status: BookingStatus::Pending.to_string(),
                })
                .returning(Booking::as_returning())
                .get_result(conn)?;
            Ok(BookingView::new(booking, &listing, None))
        })
    })
    .await?;

    log::info!(
        "User {} booked listing {} for {} ({} attendees)",
        user_id,
        view.listing_id,
        view.appointment_date,
        view.attendees
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Booking created successfully",
            "data": view,
        })),
    ))
}

/// The tenant's own bookings, newest first.
pub(crate) fn tenant_bookings(conn: &mut PgConnection, user_id: i32) -> Result<Vec<BookingView>> {
    let rows: Vec<(Booking, Listing)> = bookings::table
        .inner_join(listings::table)
        .filter(bookings::user_id.eq(user_id))
        .order(bookings::created_at.desc())
        .select((Booking::as_select(), Listing::as_select()))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(booking, listing)| BookingView::new(booking, &listing, None))
        .collect())
}

async fn my_bookings(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    let user_id = user.id;
    let views = db::run(&state.pool, move |conn| tenant_bookings(conn, user_id)).await?;
    Ok(Json(json!({"success": true, "data": views})))
}

/// Bookings on the owner's listings, newest appointment first, with each tenant attached.
pub(crate) fn received_bookings(conn: &mut PgConnection, owner_id: i32) -> Result<Vec<BookingView>> {
    let rows: Vec<(Booking, Listing)> = bookings::table
        .inner_join(listings::table)
        .filter(listings::owner_id.eq(owner_id))
        .order((bookings::appointment_date.desc(), bookings::created_at.desc()))
        .select((Booking::as_select(), Listing::as_select()))
        .load(conn)?;
    let tenant_ids: Vec<i32> = rows.iter().map(|(b, _)| b.user_id).collect();
    let tenants = users_by_id(conn, &tenant_ids)?;
    Ok(rows
        .into_iter()
        .map(|(booking, listing)| {
            let tenant = tenants.get(&booking.user_id);
            BookingView::new(booking, &listing, tenant)
        })
        .collect())
}

async fn owner_bookings(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    let user_id = user.id;
    let views = db::run(&state.pool, move |conn| received_bookings(conn, user_id)).await?;
    Ok(Json(json!({"success": true, "data": views})))
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    status: Option<String>,
}

/// Moving a cancelled or departed booking back to an active status takes its seats again.
fn reclaims_seats(booking: &Booking, next: BookingStatus) -> bool {
    next.is_active() && !booking.holds_seats()
}

async fn update_booking_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(booking_id): Path<i32>,
    AppJson(body): AppJson<StatusUpdate>,
) -> Result<Json<Value>> {
    let status = body
        .status
        .as_deref()
        .and_then(BookingStatus::parse_update)
        .ok_or_else(|| {
            AppError::bad_request("Invalid status. Use 'confirmed', 'cancelled' or 'left'.")
        })?;
    let user_id = user.id;

    let view = db::run(&state.pool, move |conn| {
        conn.transaction::<_, AppError, _>(|conn| {
            let (booking, listing): (Booking, Listing) = bookings::table
                .inner_join(listings::table)
                .filter(bookings::id.eq(booking_id))
                .select((Booking::as_select(), Listing::as_select()))
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found("Booking not found"))?;
            if listing.owner_id != user_id {
                return Err(AppError::forbidden(
                    "You can only update bookings for your own listings",
                ));
            }

            if reclaims_seats(&booking, status) {
                let seating: i32 = listings::table
                    .find(listing.id)
                    .select(listings::seating)
                    .for_update()
                    .first(conn)?;
                let booked = booked_attendees(conn, &[listing.id], booking.appointment_date)?
                    .get(&listing.id)
                    .copied()
                    .unwrap_or(0);
                check_capacity(seating, booked, booking.attendees)?;
            }

            let booking: Booking = diesel::update(bookings::table.find(booking.id))
                .set(bookings::status.eq(status.as_str()))
                .returning(Booking::as_returning())
                .get_result(conn)?;
            let tenant = users_by_id(conn, &[booking.user_id])?;
            Ok(BookingView::new(booking, &listing, tenant.values().next()))
        })
    })
    .await?;

    log::info!("Booking {} set to {} by owner {}", booking_id, view.status, user_id);
    Ok(Json(json!({
        "success": true,
        "message": format!("Booking status updated to {}", view.status),
        "data": view,
    })))
}

async fn cancel_booking(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(booking_id): Path<i32>,
) -> Result<Json<Value>> {
    let user_id = user.id;
    db::run(&state.pool, move |conn| {
        let booking: Booking = bookings::table
            .find(booking_id)
            .select(Booking::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Booking not found"))?;
        if booking.user_id != user_id {
            return Err(AppError::forbidden("You can only cancel your own bookings"));
        }
        diesel::delete(bookings::table.find(booking_id)).execute(conn)?;
        Ok(())
    })
    .await?;

    log::info!("Booking {} cancelled by user {}", booking_id, user_id);
    Ok(Json(json!({"success": true, "message": "Booking cancelled successfully"})))
}
