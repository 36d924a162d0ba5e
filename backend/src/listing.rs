use axum::{
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::dsl::{count, sum};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::auth::CurrentUser;
use crate::booking::today;
use crate::db;
use crate::error::{AppError, AppJson, Result};
use crate::media::{is_multipart, UploadForm};
use crate::models::{
    json_integer, present, string_list, BookingStatus, Listing, NewListing, NewReview, Review, User,
};
use crate::schema::{bookings, listings, reviews, users};
use crate::AppState;

const FEATURED_MIN_RATING: f64 = 4.0;
const FEATURED_LIMIT: usize = 5;

const REQUIRED_FIELDS: [&str; 15] = [
    "pid",
    "title",
    "street_address",
    "city",
    "state",
    "pincode",
    "propertyType",
    "monthlyRent",
    "securityDeposit",
    "bedrooms",
    "bathrooms",
    "seating",
    "area",
    "furnishing",
    "amenities",
];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/listings", get(list_listings))
        .route("/listings/create", post(create_listing))
        .route("/listings/search", get(search_listings))
        .route(
            "/listings/:listing_id",
            get(get_listing).patch(update_listing).delete(delete_listing),
        )
        .route("/listings/:listing_id/images", post(upload_images))
        .route("/listings/:listing_id/reviews", post(create_review))
        .route("/listings/:listing_id/verify", patch(verify_listing))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Availability {
    Available,
    Booked,
}

/// A listing is booked for the day once active bookings fill its seating.
pub fn availability_status(seating: i32, booked_attendees: i64) -> Availability {
    if booked_attendees >= i64::from(seating) {
        Availability::Booked
    } else {
        Availability::Available
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RatingStats {
    pub total: i64,
    pub count: i64,
}

impl RatingStats {
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(round2(self.total as f64 / self.count as f64))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnerSummary {
    pub id: i32,
    pub username: String,
    pub mobile_no: String,
    pub gender: Option<String>,
    pub age: Option<i32>,
}

impl From<&User> for OwnerSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            mobile_no: user.mobile_no.clone(),
            gender: user.gender.clone(),
            age: user.age,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingDetail {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    #[serde(rename = "propertyType")]
    pub property_type: String,
    #[serde(rename = "monthlyRent")]
    pub monthly_rent: f64,
    #[serde(rename = "securityDeposit")]
    pub security_deposit: f64,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub seating: i32,
    pub area: Option<String>,
    pub furnishing: Option<String>,
    pub amenities: Vec<String>,
    pub pid: String,
    #[serde(rename = "ownerName")]
    pub owner_name: String,
    pub is_verified: bool,
    pub image_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerSummary>,
}

impl ListingDetail {
    pub fn new(listing: &Listing, owner: Option<&User>) -> Self {
        Self {
            id: listing.id,
            title: listing.title.clone(),
            description: listing.description.clone(),
            street_address: listing.street_address.clone(),
            city: listing.city.clone(),
            state: listing.state.clone(),
            pincode: listing.pincode.clone(),
            property_type: listing.property_type.clone(),
            monthly_rent: listing.monthly_rent,
            security_deposit: listing.security_deposit,
            bedrooms: listing.bedrooms,
            bathrooms: listing.bathrooms,
            seating: listing.seating,
            area: listing.area.clone(),
            furnishing: listing.furnishing.clone(),
            amenities: string_list(&listing.amenities),
            pid: listing.pid.clone(),
            owner_name: listing.owner_name.clone(),
            is_verified: listing.is_verified,
            image_urls: listing.images(),
            owner: owner.map(OwnerSummary::from),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingWithStats {
    #[serde(flatten)]
    pub detail: ListingDetail,
    pub availability_status: Availability,
    pub average_rating: Option<f64>,
    pub review_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ReviewView {
    pub id: i32,
    pub author_username: String,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReviewView {
    fn new(review: Review, author_username: String) -> Self {
        Self {
            id: review.id,
            author_username,
            rating: review.rating,
            comment: review.comment,
            created_at: review.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListingPage {
    #[serde(flatten)]
    pub listing: ListingWithStats,
    pub reviews: Vec<ReviewView>,
}

/// Compact listing shape used by favorites and profile pages.
#[derive(Debug, Serialize)]
pub struct ListingCard {
    pub id: i32,
    pub title: String,
    #[serde(rename = "monthlyRent")]
    pub monthly_rent: f64,
    pub city: String,
    pub state: String,
    pub main_image_url: Option<String>,
}

impl From<&Listing> for ListingCard {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id,
            title: listing.title.clone(),
            monthly_rent: listing.monthly_rent,
            city: listing.city.clone(),
            state: listing.state.clone(),
            main_image_url: listing.main_image_url(),
        }
    }
}

/// Listings rated at least 4.0, best first, at most five.
pub fn select_featured(listings: &[ListingWithStats]) -> Vec<ListingWithStats> {
    let mut featured: Vec<ListingWithStats> = listings
        .iter()
        .filter(|l| l.average_rating.is_some_and(|r| r >= FEATURED_MIN_RATING))
        .cloned()
        .collect();
    featured.sort_by(|a, b| {
        b.average_rating
            .unwrap_or(0.0)
            .total_cmp(&a.average_rating.unwrap_or(0.0))
    });
    featured.truncate(FEATURED_LIMIT);
    featured
}

/// Attendees held by active bookings per listing on the given date.
pub(crate) fn booked_attendees(
    conn: &mut PgConnection,
    listing_ids: &[i32],
    on: NaiveDate,
) -> QueryResult<HashMap<i32, i64>> {
    let rows: Vec<(i32, Option<i64>)> = bookings::table
        .filter(bookings::listing_id.eq_any(listing_ids))
        .filter(bookings::appointment_date.eq(on))
        .filter(bookings::status.eq_any(BookingStatus::active_names()))
        .group_by(bookings::listing_id)
        .select((bookings::listing_id, sum(bookings::attendees)))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(id, total)| (id, total.unwrap_or(0)))
        .collect())
}

pub(crate) fn availability_today(
    conn: &mut PgConnection,
    listings: &[Listing],
) -> QueryResult<HashMap<i32, Availability>> {
    let ids: Vec<i32> = listings.iter().map(|l| l.id).collect();
    let booked = booked_attendees(conn, &ids, today())?;
    Ok(listings
        .iter()
        .map(|l| {
            let taken = booked.get(&l.id).copied().unwrap_or(0);
            (l.id, availability_status(l.seating, taken))
        })
        .collect())
}

fn rating_stats(conn: &mut PgConnection, listing_ids: &[i32]) -> QueryResult<HashMap<i32, RatingStats>> {
    let rows: Vec<(i32, Option<i64>, i64)> = reviews::table
        .filter(reviews::listing_id.eq_any(listing_ids))
        .group_by(reviews::listing_id)
        .select((reviews::listing_id, sum(reviews::rating), count(reviews::id)))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(id, total, count)| {
            (
                id,
                RatingStats {
                    total: total.unwrap_or(0),
                    count,
                },
            )
        })
        .collect())
}

pub(crate) fn users_by_id(conn: &mut PgConnection, ids: &[i32]) -> QueryResult<HashMap<i32, User>> {
    let found: Vec<User> = users::table
        .filter(users::id.eq_any(ids))
        .select(User::as_select())
        .load(conn)?;
    Ok(found.into_iter().map(|u| (u.id, u)).collect())
}

fn with_stats(conn: &mut PgConnection, listings: &[Listing]) -> QueryResult<Vec<ListingWithStats>> {
    let ids: Vec<i32> = listings.iter().map(|l| l.id).collect();
    let owner_ids: Vec<i32> = listings.iter().map(|l| l.owner_id).collect();
    let availability = availability_today(conn, listings)?;
    let ratings = rating_stats(conn, &ids)?;
    let owners = users_by_id(conn, &owner_ids)?;

    Ok(listings
        .iter()
        .map(|l| {
            let stats = ratings.get(&l.id).copied().unwrap_or_default();
            ListingWithStats {
                detail: ListingDetail::new(l, owners.get(&l.owner_id)),
                availability_status: availability
                    .get(&l.id)
                    .copied()
                    .unwrap_or(Availability::Available),
                average_rating: stats.average(),
                review_count: stats.count,
            }
        })
        .collect())
}

pub(crate) fn find_listing(conn: &mut PgConnection, listing_id: i32) -> Result<Listing> {
    listings::table
        .find(listing_id)
        .select(Listing::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Listing not found"))
}

fn find_owned_listing(conn: &mut PgConnection, listing_id: i32, user_id: i32) -> Result<Listing> {
    let listing = find_listing(conn, listing_id)?;
    if listing.owner_id != user_id {
        return Err(AppError::forbidden("Unauthorized"));
    }
    Ok(listing)
}

fn load_page(conn: &mut PgConnection, listing_id: i32) -> Result<ListingPage> {
    let listing = find_listing(conn, listing_id)?;
    let listing = with_stats(conn, &[listing])?
        .pop()
        .ok_or_else(|| AppError::not_found("Listing not found"))?;
    let reviews = reviews::table
        .inner_join(users::table)
        .filter(reviews::listing_id.eq(listing_id))
        .order(reviews::created_at.desc())
        .select((Review::as_select(), users::username))
        .load::<(Review, String)>(conn)?
        .into_iter()
        .map(|(review, author)| ReviewView::new(review, author))
        .collect();
    Ok(ListingPage { listing, reviews })
}

async fn list_listings(State(state): State<AppState>) -> Result<Json<Value>> {
    let (featured, all) = db::run(&state.pool, |conn| {
        let all: Vec<Listing> = listings::table
            .order(listings::id.asc())
            .select(Listing::as_select())
            .load(conn)?;
        let all = with_stats(conn, &all)?;
        Ok((select_featured(&all), all))
    })
    .await?;
    log::info!("Fetched {} listings ({} featured)", all.len(), featured.len());
    Ok(Json(json!({
        "success": true,
        "data": { "featured": featured, "all_listings": all },
    })))
}

async fn get_listing(State(state): State<AppState>, Path(listing_id): Path<i32>) -> Result<Json<Value>> {
    let page = db::run(&state.pool, move |conn| load_page(conn, listing_id)).await?;
    Ok(Json(json!({"success": true, "data": page})))
}

#[derive(Debug, Deserialize)]
struct CreateListing {
    pid: String,
    #[serde(rename = "ownerName")]
    owner_name: Option<String>,
    title: String,
    description: Option<String>,
    street_address: String,
    city: String,
    state: String,
    pincode: String,
    #[serde(rename = "propertyType")]
    property_type: String,
    #[serde(rename = "monthlyRent")]
    monthly_rent: f64,
    #[serde(rename = "securityDeposit")]
    security_deposit: f64,
    bedrooms: i32,
    bathrooms: i32,
    seating: i32,
    area: Option<String>,
    furnishing: Option<String>,
    amenities: Vec<String>,
}

fn parse_create_payload(raw: Option<&str>) -> Result<CreateListing> {
    let raw = raw.ok_or_else(|| AppError::bad_request("Missing 'data' field"))?;
    let value: Value = serde_json::from_str(raw)
        .map_err(|_| AppError::bad_request("Invalid JSON in 'data' field"))?;
    if !REQUIRED_FIELDS.iter().all(|field| value.get(field).is_some()) {
        return Err(AppError::bad_request("Missing required fields"));
    }
    let payload: CreateListing = serde_json::from_value(value)
        .map_err(|e| AppError::bad_request(format!("Invalid listing data: {}", e)))?;
    check_listing_numbers(payload.seating, payload.monthly_rent, payload.security_deposit)?;
    Ok(payload)
}

/// Seating and money fields a listing must satisfy on create and on every update.
pub fn check_listing_numbers(seating: i32, monthly_rent: f64, security_deposit: f64) -> Result<()> {
    if seating < 1 {
        return Err(AppError::bad_request("Seating must be at least 1"));
    }
    if !(monthly_rent >= 0.0 && security_deposit >= 0.0) {
        return Err(AppError::bad_request("Rent and deposit cannot be negative"));
    }
    Ok(())
}

async fn create_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Value>)> {
    let user_id = user.id;
    let owner = db::run(&state.pool, move |conn| {
        users::table
            .find(user_id)
            .select(User::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("User not found"))
    })
    .await?;
    if !owner.is_owner() {
        return Err(AppError::forbidden("Unauthorized"));
    }

    let form = UploadForm::read(multipart).await?;
    let payload = parse_create_payload(form.data.as_deref())?;
    let images = form.files("images");
    if images.is_empty() {
        return Err(AppError::bad_request("At least one image is required."));
    }

    let pid = payload.pid.clone();
    let pid_taken = db::run(&state.pool, move |conn| {
        let existing: i64 = listings::table
            .filter(listings::pid.eq(&pid))
            .count()
            .get_result(conn)?;
        Ok(existing > 0)
    })
    .await?;
    if pid_taken {
        return Err(AppError::conflict("Property ID (pid) is already in use."));
    }

    let image_urls = state.images.upload_all(&images).await?;

    let new_listing = NewListing {
        owner_id: owner.id,
        pid: payload.pid,
        owner_name: payload
            .owner_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| owner.username.clone()),
        title: payload.title,
        description: payload.description.unwrap_or_default(),
        street_address: payload.street_address,
        city: payload.city,
        state: payload.state,
        pincode: payload.pincode,
        property_type: payload.property_type,
        monthly_rent: payload.monthly_rent,
        security_deposit: payload.security_deposit,
        bedrooms: payload.bedrooms,
        bathrooms: payload.bathrooms,
        seating: payload.seating,
        area: payload.area,
        furnishing: payload.furnishing,
        amenities: Value::from(payload.amenities),
        image_urls: Value::from(image_urls),
    };
    let listing: Listing = db::run(&state.pool, move |conn| {
        Ok(diesel::insert_into(listings::table)
            .values(&new_listing)
            .returning(Listing::as_returning())
            .get_result(conn)?)
    })
    .await?;

    log::info!("Owner {} created listing {} ({})", owner.id, listing.id, listing.pid);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": ListingDetail::new(&listing, Some(&owner)),
            "message": "Listing created successfully",
        })),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListingPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    #[serde(rename = "propertyType")]
    pub property_type: Option<String>,
    #[serde(rename = "monthlyRent")]
    pub monthly_rent: Option<f64>,
    #[serde(rename = "securityDeposit")]
    pub security_deposit: Option<f64>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub seating: Option<i32>,
    #[serde(deserialize_with = "present")]
    pub area: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub furnishing: Option<Option<String>>,
    pub amenities: Option<Vec<String>>,
    /// When present, replaces the gallery instead of appending to it.
    pub image_urls: Option<Vec<String>>,
}

impl ListingPatch {
    /// Validates the numbers the listing would end up with once the patch is applied.
    pub fn check_against(&self, listing: &Listing) -> Result<()> {
        check_listing_numbers(
            self.seating.unwrap_or(listing.seating),
            self.monthly_rent.unwrap_or(listing.monthly_rent),
            self.security_deposit.unwrap_or(listing.security_deposit),
        )
    }
}

/// Applies the provided fields. Uploaded images extend either the replacement gallery
/// (when `image_urls` was sent) or the existing one.
pub fn apply_patch(listing: &mut Listing, patch: ListingPatch, uploaded: Vec<String>) {
    macro_rules! assign {
        ($($field:ident),*) => {
            $(if let Some(value) = patch.$field { listing.$field = value; })*
        };
    }
    assign!(
        title,
        description,
        street_address,
        city,
        state,
        pincode,
        property_type,
        monthly_rent,
        security_deposit,
        bedrooms,
        bathrooms,
        seating,
        area,
        furnishing
    );
    if let Some(amenities) = patch.amenities {
        listing.amenities = Value::from(amenities);
    }
    let mut gallery = patch.image_urls.unwrap_or_else(|| listing.images());
    gallery.extend(uploaded);
    listing.set_images(gallery);
}

async fn update_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(listing_id): Path<i32>,
    request: Request,
) -> Result<Json<Value>> {
    let user_id = user.id;
    let current =
        db::run(&state.pool, move |conn| find_owned_listing(conn, listing_id, user_id)).await?;

    let (patch, uploads) = if is_multipart(&request) {
        let form = UploadForm::from_request(request, &state).await?;
        (form.parse_data::<ListingPatch>()?.unwrap_or_default(), form.files("images"))
    } else {
        let AppJson(patch) = AppJson::<ListingPatch>::from_request(request, &state).await?;
        (patch, Vec::new())
    };
    patch.check_against(&current)?;
    let uploaded = state.images.upload_all(&uploads).await?;

    let page = db::run(&state.pool, move |conn| {
        let mut listing = find_owned_listing(conn, listing_id, user_id)?;
        apply_patch(&mut listing, patch, uploaded);
        check_listing_numbers(listing.seating, listing.monthly_rent, listing.security_deposit)?;
        diesel::update(listings::table.find(listing_id))
            .set(&listing)
            .execute(conn)?;
        load_page(conn, listing_id)
    })
    .await?;

    log::info!("Listing {} updated by owner {}", listing_id, user_id);
    Ok(Json(json!({"success": true, "data": page})))
}

async fn delete_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(listing_id): Path<i32>,
) -> Result<StatusCode> {
    let user_id = user.id;
    db::run(&state.pool, move |conn| {
        find_owned_listing(conn, listing_id, user_id)?;
        diesel::delete(listings::table.find(listing_id)).execute(conn)?;
        Ok(())
    })
    .await?;
    log::info!("Listing {} deleted by owner {}", listing_id, user_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_images(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(listing_id): Path<i32>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Value>)> {
    let user_id = user.id;
    db::run(&state.pool, move |conn| find_owned_listing(conn, listing_id, user_id)).await?;

    let form = UploadForm::read(multipart).await?;
    let files = form.files("images");
    if files.is_empty() {
        return Err(AppError::bad_request("No files selected"));
    }
    let uploaded = state.images.upload_all(&files).await?;

    let added = uploaded.clone();
    db::run(&state.pool, move |conn| {
        let mut listing = find_owned_listing(conn, listing_id, user_id)?;
        let mut gallery = listing.images();
        gallery.extend(added);
        listing.set_images(gallery);
        diesel::update(listings::table.find(listing_id))
            .set(listings::image_urls.eq(&listing.image_urls))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Images added successfully",
            "image_urls": uploaded,
        })),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub pid: Option<String>,
    #[serde(rename = "ownerName")]
    pub owner_name: Option<String>,
    pub location: Option<String>,
    pub min_rent: Option<String>,
    pub max_rent: Option<String>,
    pub amenities: Option<String>,
    pub keyword: Option<String>,
    pub sort_by: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn contains_pattern(term: &str) -> String {
    format!("%{}%", term)
}

/// Comma-separated amenity names, trimmed, empties dropped.
pub fn parse_amenities(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

async fn search_listings(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>> {
    let found = db::run(&state.pool, move |conn| {
        let mut query = listings::table.select(Listing::as_select()).into_boxed();

        if let Some(pid) = non_empty(&params.pid) {
            query = query.filter(listings::pid.ilike(contains_pattern(pid)));
        }
        if let Some(owner_name) = non_empty(&params.owner_name) {
            query = query.filter(listings::owner_name.ilike(contains_pattern(owner_name)));
        }
        if let Some(location) = non_empty(&params.location) {
            let pattern = contains_pattern(location);
            query = query.filter(
                listings::city
                    .ilike(pattern.clone())
                    .or(listings::state.ilike(pattern.clone()))
                    .or(listings::pincode.ilike(pattern.clone()))
                    .or(listings::street_address.ilike(pattern)),
            );
        }
        if let Some(min_rent) = non_empty(&params.min_rent).and_then(|v| v.parse::<f64>().ok()) {
            query = query.filter(listings::monthly_rent.ge(min_rent));
        }
        if let Some(max_rent) = non_empty(&params.max_rent).and_then(|v| v.parse::<f64>().ok()) {
            query = query.filter(listings::monthly_rent.le(max_rent));
        }
        if let Some(amenities) = non_empty(&params.amenities) {
            for amenity in parse_amenities(amenities) {
                query = query.filter(listings::amenities.contains(json!([amenity])));
            }
        }
        if let Some(keyword) = non_empty(&params.keyword) {
            let pattern = contains_pattern(keyword);
            query = query.filter(
                listings::title
                    .ilike(pattern.clone())
                    .or(listings::description.ilike(pattern.clone()))
                    .or(listings::pid.ilike(pattern.clone()))
                    .or(listings::owner_name.ilike(pattern)),
            );
        }
        query = match params.sort_by.as_deref() {
            Some("rent_asc") => query.order(listings::monthly_rent.asc()),
            Some("rent_desc") => query.order(listings::monthly_rent.desc()),
            _ => query.order(listings::id.asc()),
        };

        let found: Vec<Listing> = query.load(conn)?;
        let owner_ids: Vec<i32> = found.iter().map(|l| l.owner_id).collect();
        let owners = users_by_id(conn, &owner_ids)?;
        Ok(found
            .iter()
            .map(|l| ListingDetail::new(l, owners.get(&l.owner_id)))
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(json!({"success": true, "count": found.len(), "data": found})))
}

async fn verify_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(listing_id): Path<i32>,
    AppJson(body): AppJson<Value>,
) -> Result<Json<Value>> {
    let user_id = user.id;
    db::run(&state.pool, move |conn| {
        let listing = find_listing(conn, listing_id)?;
        if listing.owner_id != user_id {
            return Err(AppError::forbidden(
                "Unauthorized: You can only verify your own listings.",
            ));
        }
        Ok(())
    })
    .await?;

    let is_verified = body.get("is_verified").and_then(Value::as_bool).ok_or_else(|| {
        AppError::bad_request(
            "Request body must include 'is_verified' as a boolean (true or false).",
        )
    })?;

    let page = db::run(&state.pool, move |conn| {
        diesel::update(listings::table.find(listing_id))
            .set(listings::is_verified.eq(is_verified))
            .execute(conn)?;
        load_page(conn, listing_id)
    })
    .await?;
    Ok(Json(json!({"success": true, "data": page})))
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    rating: Option<Value>,
    comment: Option<String>,
}

/// Ratings are whole numbers from 1 to 5, sent as a number or numeric string.
pub fn parse_rating(rating: Option<&Value>) -> Result<i32> {
    let rating = rating
        .filter(|v| !v.is_null())
        .ok_or_else(|| AppError::bad_request("Rating is a required field"))?;
    let value = json_integer(rating)
        .ok_or_else(|| AppError::bad_request("Rating must be a valid integer"))?;
    if !(1..=5).contains(&value) {
        return Err(AppError::bad_request("Rating must be an integer between 1 and 5"));
    }
    Ok(value as i32)
}

async fn create_review(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(listing_id): Path<i32>,
    AppJson(body): AppJson<ReviewRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let rating = parse_rating(body.rating.as_ref())?;
    let user_id = user.id;
    let comment = body.comment;

    let review = db::run(&state.pool, move |conn| {
        find_listing(conn, listing_id)?;

        let completed: i64 = bookings::table
            .filter(bookings::user_id.eq(user_id))
            .filter(bookings::listing_id.eq(listing_id))
            .filter(bookings::status.eq(BookingStatus::Confirmed.as_str()))
            .filter(bookings::appointment_date.lt(today()))
            .count()
            .get_result(conn)?;
        if completed == 0 {
            return Err(AppError::forbidden(
                "You can only review listings after a completed, past appointment.",
            ));
        }

        let already: i64 = reviews::table
            .filter(reviews::user_id.eq(user_id))
            .filter(reviews::listing_id.eq(listing_id))
            .count()
            .get_result(conn)?;
        if already > 0 {
            return Err(AppError::conflict(
                "You have already submitted a review for this listing.",
            ));
        }

        let review: Review = diesel::insert_into(reviews::table)
            .values(&NewReview {
                rating,
                comment,
                user_id,
                listing_id,
            })
            .returning(Review::as_returning())
            .get_result(conn)?;
        let author: String = users::table
            .find(user_id)
            .select(users::username)
            .first(conn)?;
        Ok(ReviewView::new(review, author))
    })
    .await?;

    log::info!("User {} reviewed listing {}", user_id, listing_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": review,
            "message": "Review submitted successfully",
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Listing {
        Listing {
            id: 1,
            owner_id: 9,
            pid: "PID-1".into(),
            owner_name: "olivia".into(),
            is_verified: false,
            title: "Sunny flat".into(),
            description: "Two rooms".into(),
            street_address: "1 Main St".into(),
            city: "Pune".into(),
            state: "MH".into(),
            pincode: "411001".into(),
            property_type: "Apartment".into(),
            monthly_rent: 15000.0,
            security_deposit: 30000.0,
            bedrooms: 2,
            bathrooms: 1,
            seating: 4,
            area: Some("900 sqft".into()),
            furnishing: None,
            amenities: json!(["wifi"]),
            image_urls: json!(["https://img/1.png"]),
            created_at: Utc::now(),
        }
    }

    fn rated(id: i32, rating: Option<f64>) -> ListingWithStats {
        let mut l = listing();
        l.id = id;
        ListingWithStats {
            detail: ListingDetail::new(&l, None),
            availability_status: Availability::Available,
            average_rating: rating,
            review_count: rating.map_or(0, |_| 1),
        }
    }

    #[test]
    fn availability_turns_booked_at_capacity() {
        assert_eq!(availability_status(4, 0), Availability::Available);
        assert_eq!(availability_status(4, 3), Availability::Available);
        assert_eq!(availability_status(4, 4), Availability::Booked);
        assert_eq!(availability_status(4, 7), Availability::Booked);
    }

    #[test]
    fn average_rating_is_rounded_and_absent_without_reviews() {
        assert_eq!(RatingStats::default().average(), None);
        assert_eq!(RatingStats { total: 14, count: 3 }.average(), Some(4.67));
        assert_eq!(RatingStats { total: 5, count: 1 }.average(), Some(5.0));
    }

    #[test]
    fn featured_keeps_top_five_rated_four_or_more() {
        let all = vec![
            rated(1, Some(4.0)),
            rated(2, Some(3.99)),
            rated(3, None),
            rated(4, Some(4.8)),
            rated(5, Some(4.5)),
            rated(6, Some(5.0)),
            rated(7, Some(4.1)),
            rated(8, Some(4.2)),
        ];
        let featured: Vec<i32> = select_featured(&all).iter().map(|l| l.detail.id).collect();
        assert_eq!(featured, vec![6, 4, 5, 8, 7]);
    }

    #[test]
    fn detail_uses_wire_field_names() {
        let value = serde_json::to_value(ListingDetail::new(&listing(), None)).unwrap();
        assert_eq!(value["monthlyRent"], 15000.0);
        assert_eq!(value["propertyType"], "Apartment");
        assert_eq!(value["ownerName"], "olivia");
        assert_eq!(value["amenities"], json!(["wifi"]));
        assert!(value.get("owner").is_none());
    }

    #[test]
    fn stats_flatten_into_detail() {
        let value = serde_json::to_value(rated(3, Some(4.5))).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["availability_status"], "Available");
        assert_eq!(value["average_rating"], 4.5);
        assert_eq!(value["review_count"], 1);
    }

    #[test]
    fn patch_appends_uploads_to_existing_gallery() {
        let mut l = listing();
        let patch: ListingPatch =
            serde_json::from_value(json!({"title": "Renovated flat", "monthlyRent": 16000.0})).unwrap();
        apply_patch(&mut l, patch, vec!["https://img/2.png".into()]);
        assert_eq!(l.title, "Renovated flat");
        assert_eq!(l.monthly_rent, 16000.0);
        assert_eq!(l.images(), vec!["https://img/1.png", "https://img/2.png"]);
    }

    #[test]
    fn patch_with_image_urls_replaces_gallery() {
        let mut l = listing();
        let patch: ListingPatch =
            serde_json::from_value(json!({"image_urls": [], "furnishing": "Semi"})).unwrap();
        apply_patch(&mut l, patch, vec!["https://img/3.png".into()]);
        assert_eq!(l.images(), vec!["https://img/3.png"]);
        assert_eq!(l.furnishing.as_deref(), Some("Semi"));
    }

    #[test]
    fn patch_can_clear_optional_fields() {
        let mut l = listing();
        let patch: ListingPatch = serde_json::from_value(json!({"area": null})).unwrap();
        apply_patch(&mut l, patch, vec![]);
        assert_eq!(l.area, None);
        assert_eq!(l.title, "Sunny flat");
    }

    #[test]
    fn patch_cannot_zero_seating_or_negate_rent() {
        let l = listing();
        let patch: ListingPatch = serde_json::from_value(json!({"seating": 0})).unwrap();
        assert_eq!(
            patch.check_against(&l).unwrap_err().to_string(),
            "Seating must be at least 1"
        );
        let patch: ListingPatch = serde_json::from_value(json!({"monthlyRent": -5.0})).unwrap();
        assert_eq!(
            patch.check_against(&l).unwrap_err().to_string(),
            "Rent and deposit cannot be negative"
        );
        let patch: ListingPatch = serde_json::from_value(json!({"title": "Same numbers"})).unwrap();
        assert!(patch.check_against(&l).is_ok());
    }

    #[test]
    fn create_payload_rejects_bad_numbers() {
        let payload = |seating: i32, rent: f64| {
            json!({
                "pid": "P1", "title": "t", "street_address": "s", "city": "c", "state": "st",
                "pincode": "411001", "propertyType": "Flat", "monthlyRent": rent,
                "securityDeposit": 0.0, "bedrooms": 1, "bathrooms": 1, "seating": seating,
                "area": null, "furnishing": null, "amenities": []
            })
            .to_string()
        };
        assert_eq!(
            parse_create_payload(Some(&payload(0, 10.0))).unwrap_err().to_string(),
            "Seating must be at least 1"
        );
        assert_eq!(
            parse_create_payload(Some(&payload(2, -1.0))).unwrap_err().to_string(),
            "Rent and deposit cannot be negative"
        );
    }

    #[test]
    fn create_payload_requires_every_field() {
        assert!(matches!(parse_create_payload(None), Err(AppError::BadRequest(_))));
        let err = parse_create_payload(Some(r#"{"title":"x"}"#)).unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields");
        let full = json!({
            "pid": "P1", "title": "t", "street_address": "s", "city": "c", "state": "st",
            "pincode": "411001", "propertyType": "Flat", "monthlyRent": 100.0,
            "securityDeposit": 200.0, "bedrooms": 1, "bathrooms": 1, "seating": 2,
            "area": null, "furnishing": null, "amenities": ["wifi"]
        });
        let parsed = parse_create_payload(Some(&full.to_string())).unwrap();
        assert_eq!(parsed.seating, 2);
        assert_eq!(parsed.amenities, vec!["wifi"]);
    }

    #[test]
    fn ratings_must_be_whole_numbers_in_range() {
        assert_eq!(parse_rating(Some(&json!(5))).unwrap(), 5);
        assert_eq!(parse_rating(Some(&json!("3"))).unwrap(), 3);
        assert_eq!(
            parse_rating(None).unwrap_err().to_string(),
            "Rating is a required field"
        );
        assert_eq!(
            parse_rating(Some(&json!("great"))).unwrap_err().to_string(),
            "Rating must be a valid integer"
        );
        assert_eq!(
            parse_rating(Some(&json!(6))).unwrap_err().to_string(),
            "Rating must be an integer between 1 and 5"
        );
    }

    #[test]
    fn amenity_lists_are_trimmed() {
        assert_eq!(parse_amenities(" wifi, parking ,,gym"), vec!["wifi", "parking", "gym"]);
    }

    mod with_database {
        use super::*;
        use crate::models::{BookingStatus, Role};
        use crate::testing::{in_days, TestDb};
        use axum::http::Method;

        #[tokio::test]
        async fn only_owners_create_listings() {
            let Some(db) = TestDb::connect() else { return };
            let tenant = db.account(Role::User);
            let (status, body) = db.send_empty_form("/listings/create", &tenant).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body["message"], "Unauthorized");
        }

        #[tokio::test]
        async fn review_needs_a_past_confirmed_appointment() {
            let Some(db) = TestDb::connect() else { return };
            let owner = db.account(Role::Owner);
            let tenant = db.account(Role::User);
            let listing = db.listing(&owner, 2);
            db.booking(&tenant, &listing, in_days(2), 1, BookingStatus::Confirmed);
            let uri = format!("/listings/{}/reviews", listing.id);

            let (status, body) = db
                .send(Method::POST, &uri, Some(&tenant), Some(json!({"rating": 5})))
                .await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(
                body["message"],
                "You can only review listings after a completed, past appointment."
            );
        }

        #[tokio::test]
        async fn second_review_conflicts() {
            let Some(db) = TestDb::connect() else { return };
            let owner = db.account(Role::Owner);
            let tenant = db.account(Role::User);
            let listing = db.listing(&owner, 2);
            db.booking(&tenant, &listing, in_days(-1), 1, BookingStatus::Confirmed);
            let uri = format!("/listings/{}/reviews", listing.id);
            let review = json!({"rating": 4, "comment": "Bright and quiet"});

            let (status, body) = db
                .send(Method::POST, &uri, Some(&tenant), Some(review.clone()))
                .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(body["data"]["rating"], 4);
            let (status, body) = db.send(Method::POST, &uri, Some(&tenant), Some(review)).await;
            assert_eq!(status, StatusCode::CONFLICT);
            assert_eq!(
                body["message"],
                "You have already submitted a review for this listing."
            );
        }

        #[tokio::test]
        async fn patch_rejects_zero_seating_and_keeps_listing() {
            let Some(db) = TestDb::connect() else { return };
            let owner = db.account(Role::Owner);
            let listing = db.listing(&owner, 2);
            let uri = format!("/listings/{}", listing.id);

            let (status, body) = db
                .send(
                    Method::PATCH,
                    &uri,
                    Some(&owner),
                    Some(json!({"seating": 0, "monthlyRent": -5.0})),
                )
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["message"], "Seating must be at least 1");

            let (status, body) = db.send(Method::GET, &uri, None, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["seating"], 2);
            assert_eq!(body["data"]["monthlyRent"], 12000.0);
        }

        #[tokio::test]
        async fn patch_by_another_owner_is_forbidden() {
            let Some(db) = TestDb::connect() else { return };
            let owner = db.account(Role::Owner);
            let other = db.account(Role::Owner);
            let listing = db.listing(&owner, 2);
            let (status, _) = db
                .send(
                    Method::PATCH,
                    &format!("/listings/{}", listing.id),
                    Some(&other),
                    Some(json!({"title": "Mine now"})),
                )
                .await;
            assert_eq!(status, StatusCode::FORBIDDEN);
        }
    }
}
