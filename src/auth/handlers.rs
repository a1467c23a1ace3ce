use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::extract::{
    cookie::{Cookie, CookieJar, SameSite},
    WithRejection,
};
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AccessResponse, ChangePasswordRequest, LoginRequest, LogoutRequest, MessageResponse,
            OAuthCallbackParams, OAuthLoginResponse, ProfileResponse, RefreshRequest,
            RegisterRequest, TokenResponse, VerifyTokenRequest,
        },
        claims::TokenKind,
        extractors::AuthUser,
        jwt::TokenError,
        oauth::{
            authorization_url, issue_state, states_match, verify_state, ProviderError,
            STATE_MAX_AGE_SECS,
        },
        repo_types::User,
    },
    error::{AppError, Result},
    state::AppState,
};

const MAX_PICTURE_BYTES: usize = 5 * 1024 * 1024;

/// Browser-bound copy of the OAuth `state` handed out by the login step.
const OAUTH_STATE_COOKIE: &str = "oauth_state";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/token/refresh", post(refresh))
        .route("/token/verify", post(verify_token))
        .route("/google/login", get(google_login))
        .route("/google/login/callback", get(google_callback))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(profile))
        .route("/logout", post(logout))
        .route("/change-password", post(change_password))
        .route(
            "/update-profile-picture",
            put(update_profile_picture).layer(DefaultBodyLimit::max(MAX_PICTURE_BYTES)),
        )
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<RegisterRequest>, AppError>,
) -> Result<Json<TokenResponse>> {
    if payload.password != payload.password2 {
        return Err(AppError::Validation(
            "Password and Confirm Password don't match".into(),
        ));
    }

    let user = state
        .identity
        .create_user(&payload.email, &payload.name, &payload.password)
        .await?;
    let token = state.tokens.issue_pair(user.id)?;

    info!(user_id = %user.id, "user registered");
    Ok(Json(TokenResponse { token, msg: None }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, AppError>,
) -> Result<Json<TokenResponse>> {
    let Some(user) = state
        .identity
        .verify_credential(&payload.email, &payload.password)
        .await?
    else {
        warn!("login rejected");
        return Err(AppError::AuthenticationFailed);
    };

    let token = state.tokens.issue_pair(user.id)?;
    info!(user_id = %user.id, "login success");
    Ok(Json(TokenResponse {
        token,
        msg: Some("Login Success"),
    }))
}

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>> {
    let user = current_user(&state, user_id).await?;
    Ok(Json(profile_of(&state, user).await?))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    WithRejection(Json(payload), _): WithRejection<Json<LogoutRequest>, AppError>,
) -> Result<Json<MessageResponse>> {
    let refresh_token = payload
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Refresh token is required".into()))?;

    state.tokens.revoke(&refresh_token, user_id).await.map_err(|e| match e {
        TokenError::Backend(err) => AppError::Internal(err),
        other => AppError::BadRequest(other.to_string()),
    })?;

    info!(%user_id, "logged out");
    Ok(Json(MessageResponse {
        msg: "Logout Successfully",
    }))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    WithRejection(Json(payload), _): WithRejection<Json<ChangePasswordRequest>, AppError>,
) -> Result<Json<MessageResponse>> {
    if payload.password != payload.password2 {
        return Err(AppError::Validation(
            "Password and Confirm Password don't match".into(),
        ));
    }
    let user = current_user(&state, user_id).await?;
    state.identity.change_password(&user, &payload.password).await?;
    Ok(Json(MessageResponse {
        msg: "Password Changed Successfully",
    }))
}

/// Multipart upload; the file goes in `image` (or `profile_picture`).
#[instrument(skip(state, mp))]
pub async fn update_profile_picture(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<Json<ProfileResponse>> {
    let user = current_user(&state, user_id).await?;

    let mut upload = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if !matches!(field.name(), Some("image") | Some("profile_picture")) {
            continue;
        }
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".into());
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        upload = Some((data, content_type));
        break;
    }

    let (data, content_type) =
        upload.ok_or_else(|| AppError::Validation("No file was submitted.".into()))?;
    let updated = state
        .identity
        .update_profile_image(&user, data, &content_type)
        .await?;
    Ok(Json(profile_of(&state, updated).await?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<RefreshRequest>, AppError>,
) -> Result<Json<AccessResponse>> {
    let access = state.tokens.refresh(&payload.refresh).await?;
    Ok(Json(AccessResponse { access }))
}

#[instrument(skip(state, payload))]
pub async fn verify_token(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<VerifyTokenRequest>, AppError>,
) -> Result<Json<serde_json::Value>> {
    // Either kind is accepted; revoked refresh tokens are not.
    if state.tokens.verify(&payload.token, TokenKind::Access).await.is_err() {
        state.tokens.verify(&payload.token, TokenKind::Refresh).await?;
    }
    Ok(Json(serde_json::json!({})))
}

#[instrument(skip(state, jar))]
pub async fn google_login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<OAuthLoginResponse>)> {
    let cfg = &state.config.oauth;
    let oauth_state = issue_state(cfg.state_secret.as_bytes(), OffsetDateTime::now_utc())?;

    let cookie = Cookie::build((OAUTH_STATE_COOKIE, oauth_state.clone()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(cfg.redirect_uri.starts_with("https://"))
        .path("/")
        .max_age(Duration::seconds(STATE_MAX_AGE_SECS));

    Ok((
        jar.add(cookie),
        Json(OAuthLoginResponse {
            redirect_url: authorization_url(cfg, &oauth_state),
            state: oauth_state,
        }),
    ))
}

/// The `state` must carry a valid signature, match the cookie set by
/// [`google_login`] and not have been used before.
#[instrument(skip(state, jar, params))]
pub async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<OAuthCallbackParams>,
) -> Result<(CookieJar, Json<TokenResponse>)> {
    let access_token = params
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("Access token is missing".into()))?;

    let invalid_state = || AppError::BadRequest("Invalid or expired state".into());
    let secret = state.config.oauth.state_secret.as_bytes();
    let presented = params.state.unwrap_or_default();
    let Some(verified) = verify_state(&presented, secret, OffsetDateTime::now_utc()) else {
        warn!("federated login with missing or invalid state");
        return Err(invalid_state());
    };

    let bound = jar
        .get(OAUTH_STATE_COOKIE)
        .is_some_and(|c| states_match(c.value(), &presented));
    if !bound {
        warn!("federated login state does not match the browser cookie");
        return Err(invalid_state());
    }

    if !state
        .oauth_states
        .consume(&verified.nonce, verified.expires_at())
        .await?
    {
        warn!("federated login state replayed");
        return Err(invalid_state());
    }
    let jar = jar.remove(Cookie::build(OAUTH_STATE_COOKIE).path("/"));

    let profile = state
        .oauth_provider
        .user_info(&access_token)
        .await
        .map_err(|e| {
            warn!(error = %e, "identity provider call failed");
            match e {
                ProviderError::Unavailable(_) => AppError::ServiceUnavailable,
                ProviderError::Rejected(_) => {
                    AppError::BadRequest("Failed to fetch user info from provider".into())
                }
            }
        })?;

    let email = profile.email.filter(|e| !e.trim().is_empty());
    let name = profile.name.filter(|n| !n.trim().is_empty());
    let (Some(email), Some(name)) = (email, name) else {
        return Err(AppError::BadRequest(
            "Email or name not provided by the identity provider".into(),
        ));
    };

    let (user, created) = state
        .identity
        .create_or_get_federated_user(&email, &name)
        .await?;
    let token = state.tokens.issue_pair(user.id)?;
    info!(user_id = %user.id, created, "federated login");
    Ok((
        jar,
        Json(TokenResponse {
            token,
            msg: Some("Success"),
        }),
    ))
}

async fn current_user(state: &AppState, user_id: uuid::Uuid) -> Result<User> {
    state
        .identity
        .get(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".into()))
}

async fn profile_of(state: &AppState, user: User) -> Result<ProfileResponse> {
    let image = state.identity.image_url(&user).await?;
    Ok(ProfileResponse {
        id: user.id,
        email: user.email,
        name: user.name,
        slug: user.slug,
        image,
    })
}
