use axum::{
    extract::{FromRequest, Path, Request, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{
    confirm_email_token, create_access_token, create_email_token, create_refresh_token,
    hash_password, verify_password, CurrentUser, EmailPurpose, RefreshUser,
};
use crate::booking::{received_bookings, tenant_bookings, BookingView};
use crate::db;
use crate::error::{AppError, AppJson, Result};
use crate::listing::ListingCard;
use crate::media::{is_multipart, UploadForm};
use crate::models::{present, Listing, NewBlockedToken, NewUser, Role, User};
use crate::schema::{listings, token_blocklist, users};
use crate::validation::{is_strong_password, is_valid_email, is_valid_mobile};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/confirm/:token", get(confirm_email))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/change-password", post(change_password))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password/:token", post(reset_password))
        .route(
            "/profile",
            get(get_profile).patch(update_profile).delete(delete_profile),
        )
}

/// Text fields may arrive as JSON strings or numbers (mobile numbers often do).
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub mobile_no: Option<Value>,
    pub role: Option<String>,
}

impl RegisterRequest {
    /// Checks presence and format, in the order clients see the errors.
    pub fn validate(self) -> Result<(NewUser, String)> {
        let (Some(username), Some(email), Some(password), Some(mobile_no), Some(role)) = (
            required(self.username),
            required(self.email),
            self.password.filter(|p| !p.is_empty()),
            self.mobile_no.as_ref().and_then(text_value).filter(|m| !m.is_empty()),
            required(self.role),
        ) else {
            return Err(AppError::bad_request("Missing fields"));
        };

        let role: Role = role
            .parse()
            .map_err(|_| AppError::bad_request("Invalid role"))?;
        if !is_valid_email(&email) {
            return Err(AppError::bad_request("Invalid email format"));
        }
        if !is_strong_password(&password) {
            return Err(AppError::bad_request(
                "Password must meet complexity requirements",
            ));
        }
        if !is_valid_mobile(&mobile_no) {
            return Err(AppError::bad_request("Invalid mobile number format"));
        }

        Ok((
            NewUser {
                username,
                email,
                mobile_no,
                password: String::new(),
                role: role.as_str().to_string(),
            },
            password,
        ))
    }
}

async fn register(
    State(state): State<AppState>,
    AppJson(body): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let (mut new_user, password) = body.validate()?;

    let (user_id, email) = db::run(&state.pool, move |conn| {
        let taken: i64 = users::table
            .filter(
                users::username
                    .eq(&new_user.username)
                    .or(users::email.eq(&new_user.email)),
            )
            .count()
            .get_result(conn)?;
        if taken > 0 {
            return Err(AppError::conflict("Username or Email already taken"));
        }
        new_user.password = hash_password(&password)?;
        let user_id: i32 = diesel::insert_into(users::table)
            .values(&new_user)
            .returning(users::id)
            .get_result(conn)?;
        Ok((user_id, new_user.email))
    })
    .await?;

    let token = create_email_token(&email, EmailPurpose::ConfirmEmail, &state.config)?;
    if let Err(e) = state.mailer.send_verification_email(&email, &token).await {
        log::error!("Verification email to {} failed: {}", email, e);
        db::run(&state.pool, move |conn| {
            diesel::delete(users::table.find(user_id)).execute(conn)?;
            Ok(())
        })
        .await?;
        return Err(AppError::Internal(format!(
            "An error occurred: could not send verification email ({})",
            e
        )));
    }

    log::info!("Registered user {} ({})", user_id, email);
    Ok((
        StatusCode::CREATED,
        Json(json!({"success": true, "message": "Check email for verification link"})),
    ))
}

async fn confirm_email(State(state): State<AppState>, Path(token): Path<String>) -> Result<Json<Value>> {
    let email = confirm_email_token(&token, EmailPurpose::ConfirmEmail, &state.config)
        .ok_or_else(|| AppError::bad_request("Invalid or expired link"))?;

    let newly_verified = db::run(&state.pool, move |conn| {
        let user: User = users::table
            .filter(users::email.eq(&email))
            .select(User::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        if user.is_verified {
            return Ok(false);
        }
        diesel::update(users::table.find(user.id))
            .set(users::is_verified.eq(true))
            .execute(conn)?;
        Ok(true)
    })
    .await?;

    let message = if newly_verified {
        "Email verified successfully"
    } else {
        "Already verified"
    };
    Ok(Json(json!({"success": true, "message": message})))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionUser {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub mobile_no: String,
    pub role: String,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            mobile_no: user.mobile_no.clone(),
            role: user.role.clone(),
        }
    }
}

async fn login(
    State(state): State<AppState>,
    AppJson(body): AppJson<LoginRequest>,
) -> Result<Json<Value>> {
    let (Some(username), Some(password)) = (
        required(body.username),
        body.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::bad_request("Missing username or password"));
    };

    let user = db::run(&state.pool, move |conn| {
        let user: User = users::table
            .filter(users::username.eq(&username))
            .select(User::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::unauthorized("Invalid credentials"))?;
        if !verify_password(&password, &user.password)? {
            return Err(AppError::unauthorized("Invalid credentials"));
        }
        Ok(user)
    })
    .await?;

    if !user.is_verified {
        return Err(AppError::forbidden("Email not verified. Check your inbox."));
    }

    let access_token = create_access_token(user.id, &state.config)?;
    let refresh_token = create_refresh_token(user.id, &state.config)?;
    log::info!("User {} logged in", user.id);
    Ok(Json(json!({
        "success": true,
        "access_token": access_token,
        "refresh_token": refresh_token,
        "user": SessionUser::from(&user),
    })))
}

async fn refresh(State(state): State<AppState>, RefreshUser(user): RefreshUser) -> Result<Json<Value>> {
    let access_token = create_access_token(user.id, &state.config)?;
    Ok(Json(json!({"success": true, "access_token": access_token})))
}

async fn logout(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    let jti = user.jti.clone();
    db::run(&state.pool, move |conn| {
        diesel::insert_into(token_blocklist::table)
            .values(&NewBlockedToken { jti })
            .execute(conn)?;
        Ok(())
    })
    .await?;
    log::info!("User {} logged out", user.id);
    Ok(Json(json!({"success": true, "message": "Successfully logged out"})))
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    old_password: Option<String>,
    new_password: Option<String>,
}

async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(body): AppJson<ChangePasswordRequest>,
) -> Result<Json<Value>> {
    let (Some(old_password), Some(new_password)) = (
        body.old_password.filter(|p| !p.is_empty()),
        body.new_password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::bad_request("Missing fields"));
    };
    if !is_strong_password(&new_password) {
        return Err(AppError::bad_request(
            "New password does not meet complexity requirements",
        ));
    }

    let user_id = user.id;
    db::run(&state.pool, move |conn| {
        let stored: String = users::table
            .find(user_id)
            .select(users::password)
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        if !verify_password(&old_password, &stored)? {
            return Err(AppError::unauthorized("Old password is incorrect"));
        }
        let hashed = hash_password(&new_password)?;
        diesel::update(users::table.find(user_id))
            .set(users::password.eq(hashed))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    log::info!("User {} changed their password", user_id);
    Ok(Json(json!({"success": true, "message": "Password updated successfully"})))
}

#[derive(Debug, Deserialize)]
struct ForgotPasswordRequest {
    email: Option<String>,
}

async fn forgot_password(
    State(state): State<AppState>,
    AppJson(body): AppJson<ForgotPasswordRequest>,
) -> Result<Json<Value>> {
    let email = required(body.email)
        .filter(|e| is_valid_email(e))
        .ok_or_else(|| AppError::bad_request("Valid email is required"))?;

    let lookup = email.clone();
    let exists = db::run(&state.pool, move |conn| {
        let count: i64 = users::table
            .filter(users::email.eq(&lookup))
            .count()
            .get_result(conn)?;
        Ok(count > 0)
    })
    .await?;

    if exists {
        let token = create_email_token(&email, EmailPurpose::ResetPassword, &state.config)?;
        if let Err(e) = state.mailer.send_password_reset_email(&email, &token).await {
            log::error!("Password reset email to {} failed: {}", email, e);
        }
    }

    Ok(Json(json!({
        "success": true,
        "message": "If an account with that email exists, a reset link has been sent.",
    })))
}

#[derive(Debug, Deserialize)]
struct ResetPasswordRequest {
    new_password: Option<String>,
}

async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    AppJson(body): AppJson<ResetPasswordRequest>,
) -> Result<Json<Value>> {
    let new_password = body
        .new_password
        .filter(|p| is_strong_password(p))
        .ok_or_else(|| {
            AppError::bad_request("New password does not meet complexity requirements")
        })?;
    let email = confirm_email_token(&token, EmailPurpose::ResetPassword, &state.config)
        .ok_or_else(|| AppError::bad_request("Invalid or expired token"))?;

    db::run(&state.pool, move |conn| {
        let user_id: i32 = users::table
            .filter(users::email.eq(&email))
            .select(users::id)
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        let hashed = hash_password(&new_password)?;
        diesel::update(users::table.find(user_id))
            .set(users::password.eq(hashed))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    Ok(Json(json!({"success": true, "message": "Password updated successfully"})))
}

#[derive(Debug, Serialize)]
pub struct Profile {
    pub username: String,
    pub email: String,
    pub mobile_no: String,
    pub role: String,
    pub bio: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
    pub age: Option<i32>,
    pub profile_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_listings: Option<Vec<ListingCard>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_appointments: Option<Vec<BookingView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_appointments: Option<Vec<BookingView>>,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            mobile_no: user.mobile_no.clone(),
            role: user.role.clone(),
            bio: user.bio.clone(),
            address: user.address.clone(),
            gender: user.gender.clone(),
            age: user.age,
            profile_image_url: user.profile_image_url.clone(),
            my_listings: None,
            received_appointments: None,
            my_appointments: None,
        }
    }
}

fn load_profile(conn: &mut PgConnection, user_id: i32) -> Result<Profile> {
    let user: User = users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    let mut profile = Profile::from(&user);

    match user.role() {
        Some(Role::Owner) => {
            let owned: Vec<Listing> = listings::table
                .filter(listings::owner_id.eq(user_id))
                .order(listings::id.asc())
                .select(Listing::as_select())
                .load(conn)?;
            profile.my_listings = Some(owned.iter().map(ListingCard::from).collect());
            profile.received_appointments = Some(received_bookings(conn, user_id)?);
        }
        Some(Role::User) => {
            profile.my_appointments = Some(tenant_bookings(conn, user_id)?);
        }
        None => {}
    }
    Ok(profile)
}

async fn get_profile(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    let user_id = user.id;
    let profile = db::run(&state.pool, move |conn| load_profile(conn, user_id)).await?;
    Ok(Json(json!({"success": true, "data": profile})))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProfilePatch {
    pub username: Option<String>,
    pub mobile_no: Option<Value>,
    #[serde(deserialize_with = "present")]
    pub age: Option<Option<i32>>,
    #[serde(deserialize_with = "present")]
    pub gender: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub bio: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub address: Option<Option<String>>,
}

impl ProfilePatch {
    /// Applies every field that was sent. Username uniqueness is checked by the caller.
    pub fn apply(self, user: &mut User) -> Result<()> {
        if let Some(username) = required(self.username) {
            user.username = username;
        }
        if let Some(raw) = self.mobile_no.filter(|v| !v.is_null()) {
            let mobile_no = text_value(&raw)
                .filter(|m| is_valid_mobile(m))
                .ok_or_else(|| AppError::bad_request("Invalid mobile number format"))?;
            user.mobile_no = mobile_no;
        }
        if let Some(age) = self.age {
            user.age = age;
        }
        if let Some(gender) = self.gender {
            user.gender = gender;
        }
        if let Some(bio) = self.bio {
            user.bio = bio;
        }
        if let Some(address) = self.address {
            user.address = address;
        }
        Ok(())
    }
}

fn ensure_username_free(conn: &mut PgConnection, username: Option<&str>, user_id: i32) -> Result<()> {
    let Some(username) = username.map(str::trim).filter(|u| !u.is_empty()) else {
        return Ok(());
    };
    let taken: i64 = users::table
        .filter(users::username.eq(username))
        .filter(users::id.ne(user_id))
        .count()
        .get_result(conn)?;
    if taken > 0 {
        return Err(AppError::conflict("Username already taken"));
    }
    Ok(())
}

async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    request: Request,
) -> Result<Json<Value>> {
    let (patch, image) = if is_multipart(&request) {
        let form = UploadForm::from_request(request, &state).await?;
        let image = form.files("image").into_iter().next();
        (form.parse_data::<ProfilePatch>()?.unwrap_or_default(), image)
    } else {
        let AppJson(patch) = AppJson::<ProfilePatch>::from_request(request, &state).await?;
        (patch, None)
    };

    let user_id = user.id;
    let mut updated = db::run(&state.pool, move |conn| {
        let mut user: User = users::table
            .find(user_id)
            .select(User::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        ensure_username_free(conn, patch.username.as_deref(), user_id)?;
        patch.apply(&mut user)?;
        Ok(user)
    })
    .await?;

    if let Some(image) = image {
        updated.profile_image_url = state
            .images
            .upload_all(std::slice::from_ref(&image))
            .await?
            .pop();
    }

    let profile = db::run(&state.pool, move |conn| {
        ensure_username_free(conn, Some(updated.username.as_str()), user_id)?;
        diesel::update(users::table.find(user_id))
            .set(&updated)
            .execute(conn)?;
        load_profile(conn, user_id)
    })
    .await?;

    log::info!("User {} updated their profile", user_id);
    Ok(Json(json!({"success": true, "data": profile})))
}

async fn delete_profile(State(state): State<AppState>, user: CurrentUser) -> Result<StatusCode> {
    let CurrentUser { id: user_id, jti } = user;
    db::run(&state.pool, move |conn| {
        conn.transaction::<_, AppError, _>(|conn| {
            let deleted = diesel::delete(users::table.find(user_id)).execute(conn)?;
            if deleted == 0 {
                return Err(AppError::not_found("User not found"));
            }
            diesel::insert_into(token_blocklist::table)
                .values(&NewBlockedToken { jti })
                .execute(conn)?;
            Ok(())
        })
    })
    .await?;
    log::info!("User {} deleted their account", user_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 3,
            username: "tenant".into(),
            email: "tenant@example.com".into(),
            mobile_no: "9876543210".into(),
            password: "hash".into(),
            role: "user".into(),
            is_verified: true,
            bio: Some("Hello".into()),
            address: None,
            gender: None,
            age: Some(30),
            profile_image_url: None,
        }
    }

    fn register(value: Value) -> Result<(NewUser, String)> {
        serde_json::from_value::<RegisterRequest>(value).unwrap().validate()
    }

    #[test]
    fn registration_normalises_role_and_accepts_numeric_mobile() {
        let (new_user, password) = register(json!({
            "username": "olivia", "email": "olivia@example.com", "password": "Secret@123",
            "mobile_no": 9876543210u64, "role": "Owner"
        }))
        .unwrap();
        assert_eq!(new_user.role, "owner");
        assert_eq!(new_user.mobile_no, "9876543210");
        assert_eq!(password, "Secret@123");
    }

    #[test]
    fn registration_errors_in_order() {
        let base = json!({
            "username": "olivia", "email": "olivia@example.com", "password": "Secret@123",
            "mobile_no": "9876543210", "role": "user"
        });
        let with = |key: &str, value: Value| {
            let mut body = base.clone();
            body[key] = value;
            register(body).unwrap_err().to_string()
        };
        assert_eq!(with("username", json!("  ")), "Missing fields");
        assert_eq!(with("role", json!("admin")), "Invalid role");
        assert_eq!(with("email", json!("olivia")), "Invalid email format");
        assert_eq!(
            with("password", json!("password")),
            "Password must meet complexity requirements"
        );
        assert_eq!(with("mobile_no", json!("12345")), "Invalid mobile number format");
    }

    #[test]
    fn profile_fields_update_independently() {
        let mut u = user();
        let patch: ProfilePatch =
            serde_json::from_value(json!({"age": 31, "address": "12 Park Lane", "bio": null}))
                .unwrap();
        patch.apply(&mut u).unwrap();
        assert_eq!(u.age, Some(31));
        assert_eq!(u.address.as_deref(), Some("12 Park Lane"));
        assert_eq!(u.bio, None);
        assert_eq!(u.mobile_no, "9876543210");
        assert_eq!(u.username, "tenant");
    }

    #[test]
    fn profile_mobile_is_validated() {
        let mut u = user();
        let bad: ProfilePatch = serde_json::from_value(json!({"mobile_no": "123"})).unwrap();
        assert!(matches!(bad.apply(&mut u), Err(AppError::BadRequest(_))));

        let good: ProfilePatch =
            serde_json::from_value(json!({"mobile_no": 7000000000u64, "username": "renamed"}))
                .unwrap();
        good.apply(&mut u).unwrap();
        assert_eq!(u.mobile_no, "7000000000");
        assert_eq!(u.username, "renamed");
    }

    #[test]
    fn profile_omits_sections_for_other_roles() {
        let value = serde_json::to_value(Profile::from(&user())).unwrap();
        assert_eq!(value["username"], "tenant");
        assert!(value.get("my_listings").is_none());
        assert!(value.get("my_appointments").is_none());
        assert!(value.get("password").is_none());
    }

    mod with_database {
        use super::*;
        use crate::testing::TestDb;
        use axum::http::{Method, StatusCode};

        #[tokio::test]
        async fn taken_username_leaves_profile_untouched() {
            let Some(db) = TestDb::connect() else { return };
            let first = db.account(Role::User);
            let second = db.account(Role::User);

            let (status, body) = db
                .send(
                    Method::PATCH,
                    "/profile",
                    Some(&second),
                    Some(json!({"username": first.user.username, "bio": "hello"})),
                )
                .await;
            assert_eq!(status, StatusCode::CONFLICT);
            assert_eq!(body["message"], "Username already taken");

            let (status, body) = db.send(Method::GET, "/profile", Some(&second), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["username"], second.user.username.as_str());
            assert!(body["data"]["bio"].is_null());
        }

        #[tokio::test]
        async fn profile_fields_update_independently() {
            let Some(db) = TestDb::connect() else { return };
            let tenant = db.account(Role::User);
            let (status, body) = db
                .send(Method::PATCH, "/profile", Some(&tenant), Some(json!({"age": 31})))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["age"], 31);
            assert_eq!(body["data"]["username"], tenant.user.username.as_str());
            assert_eq!(body["data"]["my_appointments"], json!([]));
        }
    }
}
