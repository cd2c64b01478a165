use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use cookie::time::Duration as CookieDuration;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    gateway::GatewayError,
    session::{self, Session},
    web::{
        AppState,
        responses::{ApiResult, field_error, gateway_error, json_error},
    },
};

pub const SESSION_COOKIE: &str = "admin_session";

#[derive(Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

/// Auth failure for JSON endpoints.
#[derive(Debug)]
pub struct JsonAuthError {
    pub status: StatusCode,
    pub message: String,
}

impl JsonAuthError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "sign in required".to_string(),
        }
    }
}

/// Resolve the staff session named by the session cookie.
pub fn require_admin(state: &AppState, jar: &CookieJar) -> Result<Arc<Session>, JsonAuthError> {
    let cookie = jar.get(SESSION_COOKIE).ok_or_else(JsonAuthError::unauthorized)?;
    let id = Uuid::parse_str(cookie.value()).map_err(|_| JsonAuthError::unauthorized())?;
    state
        .sessions()
        .validate(id)
        .ok_or_else(JsonAuthError::unauthorized)
}

/// [`require_admin`] shaped for JSON handlers.
pub fn authorize(state: &AppState, jar: &CookieJar) -> ApiResult<Arc<Session>> {
    require_admin(state, jar)
        .map_err(|JsonAuthError { status, message }| json_error(status, message))
}

/// Run the rest of the request on behalf of the caller's staff session, if any.
pub async fn scope_session(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let jar = CookieJar::from_headers(request.headers());
    let session = require_admin(&state, &jar).ok();
    session::scoped(session, next.run(request)).await
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(form): Json<LoginForm>,
) -> ApiResult<(CookieJar, Json<Session>)> {
    let email = form.email.trim();
    if email.is_empty() {
        return Err(field_error("email", "email is required"));
    }
    if form.password.is_empty() {
        return Err(field_error("password", "password is required"));
    }

    let session = match state.auth().sign_in(email, &form.password).await {
        Ok(session) => session,
        Err(GatewayError::Api { status, .. }) if (400..500).contains(&status) => {
            return Err(json_error(
                StatusCode::UNAUTHORIZED,
                "invalid email or password",
            ));
        }
        Err(err) => return Err(gateway_error(err)),
    };

    let is_admin = state.auth().is_admin(&session.user_id).await;
    if !matches!(is_admin, Ok(true)) {
        if let Err(err) = state.auth().sign_out(&session).await {
            warn!(?err, "failed to revoke rejected sign-in");
        }
        return Err(match is_admin {
            Err(err) => gateway_error(err),
            Ok(_) => {
                info!(user_id = %session.user_id, "sign-in refused: not an admin");
                json_error(StatusCode::FORBIDDEN, "admin access required")
            }
        });
    }

    let session = state.sessions().insert(session);
    let max_age = (session.expires_at - Utc::now()).num_seconds().max(0);

    let mut cookie = Cookie::new(SESSION_COOKIE, session.id.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::seconds(max_age));

    Ok((jar.add(cookie), Json(session.as_ref().clone())))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, StatusCode) {
    if let Ok(session) = require_admin(&state, &jar) {
        if let Some(session) = state.sessions().remove(session.id) {
            if let Err(err) = state.auth().sign_out(&session).await {
                error!(?err, "failed to sign out from the backend");
            }
        }
    }

    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));

    (jar.remove(removal), StatusCode::NO_CONTENT)
}

pub async fn current_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<Session>> {
    let session = authorize(&state, &jar)?;
    Ok(Json(session.as_ref().clone()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::gateway::{
        AuthProvider, GatewayResult,
        memory::{MemoryObjectStore, MemoryRowStore},
    };

    #[derive(Default)]
    struct FakeAuth {
        signed_out: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuthProvider for FakeAuth {
        async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session> {
            if password != "secret" {
                return Err(GatewayError::Api {
                    status: 400,
                    message: "Invalid login credentials".into(),
                });
            }
            let user_id = email.split('@').next().unwrap_or_default();
            Ok(Session::new(
                user_id,
                Some(email.to_string()),
                format!("token-{user_id}"),
                Utc::now() + Duration::hours(1),
            ))
        }

        async fn sign_out(&self, session: &Session) -> GatewayResult<()> {
            self.signed_out
                .lock()
                .unwrap()
                .push(session.user_id.clone());
            Ok(())
        }

        async fn is_admin(&self, user_id: &str) -> GatewayResult<bool> {
            Ok(user_id == "clerk")
        }
    }

    fn state(auth: Arc<FakeAuth>) -> AppState {
        AppState::for_tests(
            Arc::new(MemoryRowStore::new()),
            Arc::new(MemoryObjectStore::new()),
            auth,
        )
    }

    fn form(email: &str, password: &str) -> Json<LoginForm> {
        Json(LoginForm {
            email: email.to_string(),
            password: password.to_string(),
        })
    }

    #[tokio::test]
    async fn admin_sign_in_sets_cookie_and_session() {
        let state = state(Arc::new(FakeAuth::default()));
        let (jar, Json(session)) = login(
            State(state.clone()),
            CookieJar::new(),
            form("clerk@ward.gov", "secret"),
        )
        .await
        .unwrap();

        let cookie = jar.get(SESSION_COOKIE).unwrap();
        assert_eq!(cookie.value(), session.id.to_string());
        let active = require_admin(&state, &jar).unwrap();
        assert_eq!(active.access_token(), "token-clerk");
    }

    #[tokio::test]
    async fn non_admins_are_signed_out_again() {
        let auth = Arc::new(FakeAuth::default());
        let state = state(auth.clone());
        let err = login(
            State(state.clone()),
            CookieJar::new(),
            form("citizen@ward.gov", "secret"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.0, StatusCode::FORBIDDEN);
        assert_eq!(*auth.signed_out.lock().unwrap(), vec!["citizen".to_string()]);
        assert_eq!(state.sessions().len(), 0);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let state = state(Arc::new(FakeAuth::default()));
        let err = login(State(state), CookieJar::new(), form("clerk@ward.gov", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_clears_session_and_revokes_token() {
        let auth = Arc::new(FakeAuth::default());
        let state = state(auth.clone());
        let (jar, _) = login(
            State(state.clone()),
            CookieJar::new(),
            form("clerk@ward.gov", "secret"),
        )
        .await
        .unwrap();

        let (jar, status) = logout(State(state.clone()), jar).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(state.sessions().len(), 0);
        assert!(require_admin(&state, &jar).is_err());
        assert_eq!(auth.signed_out.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_sign_in_keeps_the_first_browser_signed_in() {
        let auth = Arc::new(FakeAuth::default());
        let state = state(auth.clone());
        let sign_in = || {
            login(
                State(state.clone()),
                CookieJar::new(),
                form("clerk@ward.gov", "secret"),
            )
        };
        let (first, _) = sign_in().await.unwrap();
        let (second, _) = sign_in().await.unwrap();

        assert!(require_admin(&state, &first).is_ok());
        assert!(require_admin(&state, &second).is_ok());
        assert!(auth.signed_out.lock().unwrap().is_empty());

        logout(State(state.clone()), first.clone()).await;
        assert!(require_admin(&state, &first).is_err());
        assert!(require_admin(&state, &second).is_ok());
        assert_eq!(auth.signed_out.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_cookie_is_rejected() {
        let state = state(Arc::new(FakeAuth::default()));
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, Uuid::new_v4().to_string()));
        let err = require_admin(&state, &jar).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }
}
