// Mirrors src/db/schema.sql.

diesel::table! {
    users (id) {
        id -> Int4,
        #[max_length = 50]
        username -> Varchar,
        #[max_length = 254]
        email -> Varchar,
        #[max_length = 20]
        mobile_no -> Varchar,
        #[max_length = 200]
        password -> Varchar,
        #[max_length = 20]
        role -> Varchar,
        is_verified -> Bool,
        bio -> Nullable<Text>,
        address -> Nullable<Text>,
        #[max_length = 20]
        gender -> Nullable<Varchar>,
        age -> Nullable<Int4>,
        #[max_length = 255]
        profile_image_url -> Nullable<Varchar>,
    }
}

diesel::table! {
    listings (id) {
        id -> Int4,
        owner_id -> Int4,
        #[max_length = 50]
        pid -> Varchar,
        #[max_length = 100]
        owner_name -> Varchar,
        is_verified -> Bool,
        #[max_length = 200]
        title -> Varchar,
        description -> Text,
        #[max_length = 255]
        street_address -> Varchar,
        #[max_length = 100]
        city -> Varchar,
        #[max_length = 100]
        state -> Varchar,
        #[max_length = 10]
        pincode -> Varchar,
        #[max_length = 50]
        property_type -> Varchar,
        monthly_rent -> Float8,
        security_deposit -> Float8,
        bedrooms -> Int4,
        bathrooms -> Int4,
        seating -> Int4,
        #[max_length = 50]
        area -> Nullable<Varchar>,
        #[max_length = 50]
        furnishing -> Nullable<Varchar>,
        amenities -> Jsonb,
        image_urls -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    bookings (id) {
        id -> Int4,
        user_id -> Int4,
        listing_id -> Int4,
        appointment_date -> Date,
        attendees -> Int4,
        #[max_length = 20]
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    reviews (id) {
        id -> Int4,
        rating -> Int4,
        comment -> Nullable<Text>,
        user_id -> Int4,
        listing_id -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    token_blocklist (id) {
        id -> Int4,
        #[max_length = 36]
        jti -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    favorites (user_id, listing_id) {
        user_id -> Int4,
        listing_id -> Int4,
    }
}

diesel::joinable!(listings -> users (owner_id));
diesel::joinable!(bookings -> listings (listing_id));
diesel::joinable!(reviews -> users (user_id));
diesel::joinable!(favorites -> listings (listing_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    listings,
    bookings,
    reviews,
    token_blocklist,
    favorites,
);
