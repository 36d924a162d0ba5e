use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::auth::CurrentUser;
use crate::booking::today;
use crate::db;
use crate::error::{AppError, Result};
use crate::listing::{availability_today, round2, users_by_id, Availability, ListingDetail};
use crate::models::{Booking, BookingStatus, Listing, User};
use crate::schema::{bookings, listings, users};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/owner/dashboard", get(dashboard))
}

#[derive(Debug, Serialize)]
pub struct DashboardListing {
    #[serde(flatten)]
    pub detail: ListingDetail,
    pub created_at: DateTime<Utc>,
    pub availability_status: Availability,
}

#[derive(Debug, Serialize)]
pub struct TenantProfile {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub mobile_no: String,
    pub bio: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
    pub age: Option<i32>,
    pub profile_image_url: Option<String>,
}

impl From<&User> for TenantProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            mobile_no: user.mobile_no.clone(),
            bio: user.bio.clone(),
            address: user.address.clone(),
            gender: user.gender.clone(),
            age: user.age,
            profile_image_url: user.profile_image_url.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardBooking {
    pub booking_id: i32,
    pub appointment_date: NaiveDate,
    pub booking_date: NaiveDate,
    pub status: String,
    pub attendees: i32,
    pub listing: DashboardListing,
    pub tenant: Option<TenantProfile>,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_listings: usize,
    pub total_bookings: usize,
    pub total_revenue: f64,
}

/// Confirmed bookings count toward the totals; only those whose appointment has passed earn rent.
pub fn summarize(listings: &[Listing], bookings: &[Booking], today: NaiveDate) -> SummaryStats {
    let rent: HashMap<i32, f64> = listings.iter().map(|l| (l.id, l.monthly_rent)).collect();
    let confirmed = bookings
        .iter()
        .filter(|b| b.status == BookingStatus::Confirmed.as_str());

    let mut stats = SummaryStats {
        total_listings: listings.len(),
        ..SummaryStats::default()
    };
    let mut revenue = 0.0;
    for booking in confirmed {
        stats.total_bookings += 1;
        if booking.appointment_date < today {
            revenue += rent.get(&booking.listing_id).copied().unwrap_or(0.0);
        }
    }
    stats.total_revenue = round2(revenue);
    stats
}

fn dashboard_listing(listing: &Listing, availability: &HashMap<i32, Availability>) -> DashboardListing {
    DashboardListing {
        detail: ListingDetail::new(listing, None),
        created_at: listing.created_at,
        availability_status: availability
            .get(&listing.id)
            .copied()
            .unwrap_or(Availability::Available),
    }
}

async fn dashboard(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    let user_id = user.id;
    let data = db::run(&state.pool, move |conn| {
        let owner: User = users::table
            .find(user_id)
            .select(User::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        if !owner.is_owner() {
            return Err(AppError::forbidden("Access denied: Owner role required."));
        }

        let my_listings: Vec<Listing> = listings::table
            .filter(listings::owner_id.eq(user_id))
            .order(listings::title.asc())
            .select(Listing::as_select())
            .load(conn)?;
        let listing_ids: Vec<i32> = my_listings.iter().map(|l| l.id).collect();
        let received: Vec<Booking> = bookings::table
            .filter(bookings::listing_id.eq_any(&listing_ids))
            .order(bookings::created_at.desc())
            .select(Booking::as_select())
            .load(conn)?;

        let availability = availability_today(conn, &my_listings)?;
        let tenant_ids: Vec<i32> = received.iter().map(|b| b.user_id).collect();
        let tenants = users_by_id(conn, &tenant_ids)?;
        let by_id: HashMap<i32, &Listing> = my_listings.iter().map(|l| (l.id, l)).collect();

        let summary = summarize(&my_listings, &received, today());
        let all_bookings: Vec<DashboardBooking> = received
            .iter()
            .filter_map(|b| {
                let listing = by_id.get(&b.listing_id)?;
                Some(DashboardBooking {
                    booking_id: b.id,
                    appointment_date: b.appointment_date,
                    booking_date: b.booking_date(),
                    status: b.status.clone(),
                    attendees: b.attendees,
                    listing: dashboard_listing(listing, &availability),
                    tenant: tenants.get(&b.user_id).map(TenantProfile::from),
                })
            })
            .collect();
        let my_listings: Vec<DashboardListing> = my_listings
            .iter()
            .map(|l| dashboard_listing(l, &availability))
            .collect();

        Ok(json!({
            "summary_stats": summary,
            "all_bookings": all_bookings,
            "my_listings": my_listings,
        }))
    })
    .await?;

    Ok(Json(json!({"success": true, "data": data})))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn listing(id: i32, rent: f64) -> Listing {
        Listing {
            id,
            owner_id: 1,
            pid: format!("P{}", id),
            owner_name: "owner".into(),
            is_verified: false,
            title: format!("Listing {}", id),
            description: String::new(),
            street_address: "s".into(),
            city: "c".into(),
            state: "st".into(),
            pincode: "400001".into(),
            property_type: "Flat".into(),
            monthly_rent: rent,
            security_deposit: 0.0,
            bedrooms: 1,
            bathrooms: 1,
            seating: 3,
            area: None,
            furnishing: None,
            amenities: json!([]),
            image_urls: json!([]),
            created_at: Utc::now(),
        }
    }

    fn booking(id: i32, listing_id: i32, status: BookingStatus, date: &str) -> Booking {
        Booking {
            id,
            user_id: 9,
            listing_id,
            appointment_date: day(date),
            attendees: 1,
            status: status.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn revenue_counts_confirmed_past_appointments_only() {
        let listings = vec![listing(1, 1000.5), listing(2, 250.25)];
        let bookings = vec![
            booking(1, 1, BookingStatus::Confirmed, "2026-01-01"),
            booking(2, 2, BookingStatus::Confirmed, "2026-01-02"),
            booking(3, 2, BookingStatus::Confirmed, "2026-02-01"),
            booking(4, 1, BookingStatus::Pending, "2026-01-01"),
            booking(5, 1, BookingStatus::Cancelled, "2026-01-01"),
        ];
        let stats = summarize(&listings, &bookings, day("2026-01-15"));
        assert_eq!(
            stats,
            SummaryStats {
                total_listings: 2,
                total_bookings: 3,
                total_revenue: 1250.75,
            }
        );
    }

    #[test]
    fn empty_dashboard_is_all_zero() {
        assert_eq!(summarize(&[], &[], day("2026-01-15")), SummaryStats::default());
    }

    #[test]
    fn dashboard_listing_carries_status_and_creation_time() {
        let l = listing(4, 10.0);
        let availability = HashMap::from([(4, Availability::Booked)]);
        let value = serde_json::to_value(dashboard_listing(&l, &availability)).unwrap();
        assert_eq!(value["availability_status"], "Booked");
        assert_eq!(value["pid"], "P4");
        assert!(value.get("created_at").is_some());
    }

    mod with_database {
        use super::*;
        use crate::models::Role;
        use crate::testing::{in_days, TestDb};
        use axum::http::{Method, StatusCode};

        #[tokio::test]
        async fn tenants_cannot_open_the_dashboard() {
            let Some(db) = TestDb::connect() else { return };
            let tenant = db.account(Role::User);
            let (status, body) = db.send(Method::GET, "/owner/dashboard", Some(&tenant), None).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body["message"], "Access denied: Owner role required.");
        }

        #[tokio::test]
        async fn dashboard_lists_received_bookings() {
            let Some(db) = TestDb::connect() else { return };
            let owner = db.account(Role::Owner);
            let tenant = db.account(Role::User);
            let listing = db.listing(&owner, 2);
            let booking = db.booking(&tenant, &listing, in_days(-3), 1, BookingStatus::Confirmed);

            let (status, body) = db.send(Method::GET, "/owner/dashboard", Some(&owner), None).await;
            assert_eq!(status, StatusCode::OK);
            let data = &body["data"];
            assert_eq!(data["summary_stats"]["total_listings"], 1);
            assert_eq!(data["summary_stats"]["total_bookings"], 1);
            assert_eq!(data["summary_stats"]["total_revenue"], 12000.0);
            let received = &data["all_bookings"][0];
            assert_eq!(received["booking_id"], booking.id);
            assert_eq!(received["appointment_date"], in_days(-3).to_string());
            assert_eq!(received["booking_date"], booking.booking_date().to_string());
            assert_eq!(received["tenant"]["username"], tenant.user.username.as_str());
        }
    }
}
