use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

use crate::schema::{bookings, favorites, listings, reviews, token_blocklist, users};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Owner => "owner",
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "owner" => Ok(Role::Owner),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Left,
}

impl BookingStatus {
    /// Statuses that hold seats on the appointment date.
    pub const ACTIVE: [BookingStatus; 2] = [BookingStatus::Pending, BookingStatus::Confirmed];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::Left => "Left",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn active_names() -> [&'static str; 2] {
        [Self::ACTIVE[0].as_str(), Self::ACTIVE[1].as_str()]
    }

    /// Parses a status an owner may move a booking to.
    pub fn parse_update(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "left" => Some(BookingStatus::Left),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, AsChangeset)]
#[diesel(table_name = users, treat_none_as_null = true)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub mobile_no: String,
    pub password: String, // Argon2 PHC string
    pub role: String,
    pub is_verified: bool,
    pub bio: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
    pub age: Option<i32>,
    pub profile_image_url: Option<String>,
}

impl User {
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }

    pub fn is_owner(&self) -> bool {
        self.role() == Some(Role::Owner)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub mobile_no: String,
    pub password: String,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, AsChangeset)]
#[diesel(table_name = listings, treat_none_as_null = true)]
pub struct Listing {
    pub id: i32,
    pub owner_id: i32,
    pub pid: String,
    pub owner_name: String,
    pub is_verified: bool,
    pub title: String,
    pub description: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub property_type: String,
    pub monthly_rent: f64,
    pub security_deposit: f64,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub seating: i32,
    pub area: Option<String>,
    pub furnishing: Option<String>,
    pub amenities: JsonValue,  // Jsonb array of strings
    pub image_urls: JsonValue, // Jsonb array of strings
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn images(&self) -> Vec<String> {
        string_list(&self.image_urls)
    }

    pub fn main_image_url(&self) -> Option<String> {
        self.images().into_iter().next()
    }

    pub fn set_images(&mut self, urls: Vec<String>) {
        self.image_urls = JsonValue::from(urls);
    }
}

/// Reads a Jsonb column holding a list of strings, tolerating anything else as empty.
pub fn string_list(value: &JsonValue) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Insertable)]
#[diesel(table_name = listings)]
pub struct NewListing {
    pub owner_id: i32,
    pub pid: String,
    pub owner_name: String,
    pub title: String,
    pub description: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub property_type: String,
    pub monthly_rent: f64,
    pub security_deposit: f64,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub seating: i32,
    pub area: Option<String>,
    pub furnishing: Option<String>,
    pub amenities: JsonValue,
    pub image_urls: JsonValue,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = bookings)]
pub struct Booking {
    pub id: i32,
    pub user_id: i32,
    pub listing_id: i32,
    pub appointment_date: NaiveDate,
    pub attendees: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn holds_seats(&self) -> bool {
        BookingStatus::active_names().contains(&self.status.as_str())
    }

    /// The day the booking was made, as opposed to the day of the appointment.
    pub fn booking_date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = bookings)]
pub struct NewBooking {
    pub user_id: i32,
    pub listing_id: i32,
    pub appointment_date: NaiveDate,
    pub attendees: i32,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = reviews)]
pub struct Review {
    pub id: i32,
    pub rating: i32,
    pub comment: Option<String>,
    pub user_id: i32,
    pub listing_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = reviews)]
pub struct NewReview {
    pub rating: i32,
    pub comment: Option<String>,
    pub user_id: i32,
    pub listing_id: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = token_blocklist)]
pub struct NewBlockedToken {
    pub jti: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = favorites)]
pub struct NewFavorite {
    pub user_id: i32,
    pub listing_id: i32,
}

/// Serde helper separating "field absent" (`None`) from "field set to null" (`Some(None)`).
pub fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Accepts integers sent either as JSON numbers or numeric strings.
pub fn json_integer(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
