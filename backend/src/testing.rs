//! Router tests against a live Postgres database.
//!
//! They run only when `DATABASE_URL` is set; every row they seed carries a fresh uuid
//! so tests can share one database and run in parallel.

use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, Request, StatusCode,
    },
    Router,
};
use chrono::{Duration, NaiveDate};
use diesel::prelude::*;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tower::ServiceExt;

use crate::auth::create_access_token;
use crate::booking::today;
use crate::config::test_config;
use crate::db::{build_pool, ensure_schema, DbPool};
use crate::mailer::Mailer;
use crate::media::ImageHost;
use crate::models::{Booking, BookingStatus, Listing, NewBooking, NewListing, NewUser, Role, User};
use crate::routes::app;
use crate::schema::{bookings, listings, users};
use crate::AppState;

static SCHEMA: OnceLock<()> = OnceLock::new();

pub struct TestDb {
    pub pool: DbPool,
    state: AppState,
}

/// A seeded account and the bearer header that authenticates it.
pub struct Account {
    pub user: User,
    pub bearer: String,
}

pub fn in_days(days: i64) -> NaiveDate {
    today() + Duration::days(days)
}

fn unique(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &id[..12])
}

impl TestDb {
    /// `None` when no database is configured; callers return early.
    pub fn connect() -> Option<Self> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping database test");
            return None;
        };
        let mut config = test_config();
        config.database_url = url;
        config.database_pool_size = 2;
        let pool = build_pool(&config).expect("database pool");
        SCHEMA.get_or_init(|| {
            let mut conn = pool.get().expect("connection");
            ensure_schema(&mut conn).expect("schema");
        });
        let state = AppState {
            pool: pool.clone(),
            mailer: Mailer::new(&config).expect("mailer"),
            images: ImageHost::new(&config),
            config,
        };
        Some(Self { pool, state })
    }

    fn router(&self) -> Router {
        app(self.state.clone()).expect("router")
    }

    pub fn account(&self, role: Role) -> Account {
        let name = unique("u");
        let mut conn = self.pool.get().expect("connection");
        let user: User = diesel::insert_into(users::table)
            .values(&NewUser {
                username: name.clone(),
                email: format!("{}@example.com", name),
                mobile_no: "9876543210".into(),
                password: "not-a-real-hash".into(),
                role: role.as_str().to_string(),
            })
            .returning(User::as_returning())
            .get_result(&mut conn)
            .expect("insert user");
        let token = create_access_token(user.id, &self.state.config).expect("token");
        Account {
            user,
            bearer: format!("Bearer {}", token),
        }
    }

    pub fn listing(&self, owner: &Account, seating: i32) -> Listing {
        let mut conn = self.pool.get().expect("connection");
        diesel::insert_into(listings::table)
            .values(&NewListing {
                owner_id: owner.user.id,
                pid: unique("PID-"),
                owner_name: owner.user.username.clone(),
                title: "Garden flat".into(),
                description: String::new(),
                street_address: "12 Lake Road".into(),
                city: "Pune".into(),
                state: "MH".into(),
                pincode: "411001".into(),
                property_type: "Apartment".into(),
                monthly_rent: 12000.0,
                security_deposit: 24000.0,
                bedrooms: 2,
                bathrooms: 1,
                seating,
                area: None,
                furnishing: None,
                amenities: json!([]),
                image_urls: json!(["https://img.test/1.png"]),
            })
            .returning(Listing::as_returning())
            .get_result(&mut conn)
            .expect("insert listing")
    }

    pub fn booking(
        &self,
        tenant: &Account,
        listing: &Listing,
        on: NaiveDate,
        attendees: i32,
        status: BookingStatus,
    ) -> Booking {
        let mut conn = self.pool.get().expect("connection");
        diesel::insert_into(bookings::table)
            .values(&NewBooking {
                user_id: tenant.user.id,
                listing_id: listing.id,
                appointment_date: on,
                attendees,
                status: status.to_string(),
            })
            .returning(Booking::as_returning())
            .get_result(&mut conn)
            .expect("insert booking")
    }

    pub fn booking_status(&self, booking_id: i32) -> String {
        let mut conn = self.pool.get().expect("connection");
        bookings::table
            .find(booking_id)
            .select(bookings::status)
            .first(&mut conn)
            .expect("booking status")
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        who: Option<&Account>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(account) = who {
            builder = builder.header(AUTHORIZATION, account.bearer.as_str());
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        self.dispatch(request).await
    }

    /// An empty multipart form, for handlers that only accept uploads.
    pub async fn send_empty_form(&self, uri: &str, who: &Account) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(AUTHORIZATION, who.bearer.as_str())
            .header(CONTENT_TYPE, "multipart/form-data; boundary=X-TEST-BOUNDARY")
            .body(Body::from("--X-TEST-BOUNDARY--\r\n"))
            .expect("request");
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}
