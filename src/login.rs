use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Form, Json,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::app::AppState;
use crate::config::DEFAULT_SESSION_HOURS;
use crate::error::{AppError, AuthError};

pub const SESSION_COOKIE: &str = "session";
pub const SERVICE_KEY_HEADER: &str = "x-service-key";
const USERS_FILE: &str = "users.json";

/// What a signed-in user may do. Anything unrecognised is `View`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Edit,
    #[default]
    View,
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Edit" => Ok(Role::Edit),
            "View" => Ok(Role::View),
            _ => Err(AuthError::MissingFields),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Edit => write!(f, "Edit"),
            Role::View => write!(f, "View"),
        }
    }
}

/// Whether `user` satisfies `required`. Nobody signed in satisfies nothing.
pub fn require_role(required: Role, user: Option<&AuthUser>) -> bool {
    match (user, required) {
        (None, _) => false,
        (Some(_), Role::View) => true,
        (Some(user), Role::Edit) => user.role == Role::Edit,
    }
}

/// Fail with 403 unless the user can edit.
pub fn require_edit(user: &AuthUser) -> Result<(), AppError> {
    if require_role(Role::Edit, Some(user)) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Edit role required".to_string()))
    }
}

/// A registered account as stored in `users.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    /// Argon2 hash of the password
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// The caller of a request, attached to its extensions by [`require_auth`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        AuthUser {
            id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// Accounts keyed by id, written through to `<data_dir>/users.json`.
pub struct UserDirectory {
    path: PathBuf,
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    /// Open the users file under `data_dir`, creating an empty one if needed.
    ///
    /// # Errors
    /// * `AuthError::Io` if the directory or file cannot be created or read
    /// * `AuthError::Parse` if the file is not a JSON object of users
    pub fn open(data_dir: &Path) -> Result<Self, AuthError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(USERS_FILE);
        if !path.exists() {
            let mut file = File::create(&path)?;
            file.write_all(b"{}")?;
        }

        let mut contents = String::new();
        File::open(&path)?.read_to_string(&mut contents)?;
        let users: HashMap<String, User> = serde_json::from_str(&contents)?;
        info!("Loaded {} users from {}", users.len(), path.display());

        Ok(UserDirectory {
            path,
            users: RwLock::new(users),
        })
    }

    fn save(&self, users: &HashMap<String, User>) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(users)?;
        let mut file = File::create(&self.path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Register a new account. Emails are compared case-insensitively.
    ///
    /// # Errors
    /// * `AuthError::MissingFields` for a blank email or password
    /// * `AuthError::EmailTaken` if the email is already registered
    pub fn create_user(&self, email: &str, password: &str, role: Role) -> Result<User, AuthError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingFields);
        }

        let password_hash = hash_password(password)?;

        let mut users = self.users.write().map_err(|_| AuthError::Poisoned)?;
        if users.values().any(|user| user.email == email) {
            return Err(AuthError::EmailTaken);
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            password_hash,
            role,
            created_at: Utc::now(),
        };
        users.insert(user.id.clone(), user.clone());
        self.save(&users)?;

        info!("Created {} user {}", user.role, user.email);
        Ok(user)
    }

    pub fn set_role(&self, id: &str, role: Role) -> Result<User, AuthError> {
        let mut users = self.users.write().map_err(|_| AuthError::Poisoned)?;
        let user = users.get_mut(id).ok_or(AuthError::UserNotFound)?;
        user.role = role;
        let updated = user.clone();
        self.save(&users)?;

        info!("Set role of {} to {}", updated.email, role);
        Ok(updated)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>, AuthError> {
        let users = self.users.read().map_err(|_| AuthError::Poisoned)?;
        Ok(users.get(id).cloned())
    }

    /// The user whose email and password match, if any.
    pub fn verify_user(&self, email: &str, password: &str) -> Result<Option<User>, AuthError> {
        let email = email.trim().to_lowercase();
        let found = {
            let users = self.users.read().map_err(|_| AuthError::Poisoned)?;
            users.values().find(|user| user.email == email).cloned()
        };
        match found {
            Some(user) if verify_password(password, &user.password_hash)? => Ok(Some(user)),
            _ => Ok(None),
        }
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err(AuthError::Hashing),
    }
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::Hashing)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

#[derive(Debug, Clone)]
struct Session {
    user_id: String,
    expires_at: SystemTime,
}

fn default_ttl() -> Duration {
    Duration::from_secs(DEFAULT_SESSION_HOURS * 60 * 60)
}

/// Opaque session ids handed out as the `session` cookie.
pub struct Sessions {
    ttl: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

impl Sessions {
    pub fn new(hours: u64) -> Self {
        let ttl = hours
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .filter(|ttl| SystemTime::now().checked_add(*ttl).is_some())
            .unwrap_or_else(|| {
                warn!("Session lifetime of {hours} hours is out of range, using {DEFAULT_SESSION_HOURS}");
                default_ttl()
            });

        Sessions {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, user_id: &str) -> Result<String, AuthError> {
        let session_id = Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let session = Session {
            user_id: user_id.to_string(),
            expires_at: now.checked_add(self.ttl).unwrap_or(now + default_ttl()),
        };

        let mut sessions = self.sessions.write().map_err(|_| AuthError::Poisoned)?;
        sessions.retain(|_, s| s.expires_at > SystemTime::now());
        sessions.insert(session_id.clone(), session);

        Ok(session_id)
    }

    /// The user id behind a live session.
    pub fn validate(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.read().ok()?;
        sessions
            .get(session_id)
            .filter(|s| s.expires_at > SystemTime::now())
            .map(|s| s.user_id.clone())
    }

    pub fn remove(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(session_id);
        }
    }
}

/// Resolve the session cookie to the current account, re-reading the role so
/// role changes apply to existing sessions.
pub fn session_user(state: &AppState, jar: &CookieJar) -> Option<AuthUser> {
    let session_id = jar.get(SESSION_COOKIE)?;
    let user_id = state.sessions.validate(session_id.value())?;
    match state.users.get_user(&user_id) {
        Ok(user) => user.as_ref().map(AuthUser::from),
        Err(e) => {
            warn!("Session lookup failed: {}", e);
            None
        }
    }
}

fn session_cookie(value: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub async fn serve_login_page() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

pub async fn serve_signup_page() -> Html<&'static str> {
    Html(include_str!("./static/signup.html"))
}

/// `/` goes to the master view when signed in, else to the login page.
pub async fn serve_index(State(state): State<Arc<AppState>>, jar: CookieJar) -> Redirect {
    match session_user(&state, &jar) {
        Some(_) => Redirect::to("/mv"),
        None => Redirect::to("/login"),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    /// Page to return to after signing in
    #[serde(default)]
    pub next: Option<String>,
}

/// Check the submitted credentials and start a session.
///
/// # Returns
/// * Redirect to `next` (or `/mv`) with the session cookie set
/// * 401 if the email or password is wrong
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let user = match state.users.verify_user(&form.email, &form.password)? {
        Some(user) => user,
        None => {
            info!("Failed sign-in for {}", form.email.trim());
            return Err(AppError::Unauthorized);
        }
    };

    let session_id = state.sessions.create(&user.id)?;
    let target = form
        .next
        .filter(|next| next.starts_with('/') && !next.starts_with("//"))
        .unwrap_or_else(|| "/mv".to_string());

    info!("{} signed in", user.email);
    Ok((jar.add(session_cookie(session_id)), Redirect::to(&target)).into_response())
}

/// Drop the session and clear the cookie.
pub async fn handle_logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.remove(cookie.value());
    }

    (jar.remove(session_cookie(String::new())), Redirect::to("/login"))
}

/// Authentication middleware.
///
/// Attaches the [`AuthUser`] to the request when the session is valid.
/// Otherwise API calls get 401 and pages are redirected to `/login`, carrying
/// the requested path along.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(user) = session_user(&state, &jar) {
        request.extensions_mut().insert(user);
        return next.run(request).await;
    }

    let path = request.uri().path();
    if path.starts_with("/api/") {
        return AppError::Unauthorized.into_response();
    }

    Redirect::to(&format!("/login?next={}", urlencoding::encode(path))).into_response()
}

pub async fn session_info(Extension(user): Extension<AuthUser>) -> Json<serde_json::Value> {
    Json(json!({ "email": user.email, "role": user.role }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

/// Register an account. Open to anyone while signup is allowed, otherwise
/// only to Edit users.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.config.allow_signup {
        let caller = session_user(&state, &jar).ok_or(AppError::Unauthorized)?;
        require_edit(&caller)?;
    }

    let (email, password, role) = match (body.email, body.password, body.role) {
        (Some(email), Some(password), Some(role)) if !email.trim().is_empty() && !password.is_empty() => {
            (email, password, role.parse::<Role>()?)
        }
        _ => return Err(AuthError::MissingFields.into()),
    };

    let user = state.users.create_user(&email, &password, role)?;
    Ok(Json(json!({ "ok": true, "userId": user.id })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetRoleRequest {
    pub user_id: Option<String>,
    pub role: Option<String>,
}

/// Change an account's role. Guarded by the service key rather than a session.
pub async fn set_role(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SetRoleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (user_id, role) = match (body.user_id, body.role.as_deref().map(str::parse::<Role>)) {
        (Some(user_id), Some(Ok(role))) if !user_id.trim().is_empty() => (user_id, role),
        _ => return Err(AppError::BadRequest("userId and role (Edit|View) are required".to_string())),
    };

    let expected = state
        .config
        .service_key
        .as_deref()
        .ok_or_else(|| AppError::Misconfigured("Service key is not configured".to_string()))?;
    let provided = headers.get(SERVICE_KEY_HEADER).and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        return Err(AppError::Unauthorized);
    }

    let user = state.users.set_role(user_id.trim(), role)?;
    Ok(Json(json!({
        "ok": true,
        "userId": user.id,
        "app_metadata": { "role": user.role },
    })))
}
