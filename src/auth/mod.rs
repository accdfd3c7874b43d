pub mod credentials;

use axum::{
    Form, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::{
    session::{Notice, Session},
    state::AppState,
    template::{self, PageContext},
};
use credentials::CredentialError;

pub const SIGN_IN_PATH: &str = "/users/signin";
const SIGN_IN_REQUIRED: &str = "You must be signed in to do that.";

// ── Router ────────────────────────────────────────────────────────────────────

/// Sign-in and sign-up forms. Sign-out is gated and registered by the caller.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(SIGN_IN_PATH, get(get_signin).post(post_signin))
        .route("/users/signup", get(get_signup).post(post_signup))
}

pub fn signout_route() -> Router<AppState> {
    Router::new().route("/users/signout", post(post_signout))
}

// ── Auth gate ─────────────────────────────────────────────────────────────────

/// Refuse the request unless the session carries a signed-in user. The
/// wrapped handler never runs on refusal.
pub async fn require_auth(session: Session, req: Request, next: Next) -> Response {
    if session.username().is_some() {
        return next.run(req).await;
    }

    tracing::warn!("Refused unauthenticated {} {}", req.method(), req.uri().path());
    session.notify(Notice::error(SIGN_IN_REQUIRED));
    Redirect::to(SIGN_IN_PATH).into_response()
}

// ── Sign in / sign out ────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CredentialsForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn get_signin(session: Session) -> Response {
    Html(template::signin_page(&session.page_context(), "").into_string()).into_response()
}

async fn post_signin(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CredentialsForm>,
) -> Response {
    let username = form.username.trim();

    if state.credentials.verify(username, &form.password).await {
        tracing::info!(user = %username, "signed in");
        session.sign_in(username);
        session.notify(Notice::info("Welcome"));
        return Redirect::to("/").into_response();
    }

    tracing::warn!(user = %username, "failed sign-in");
    let ctx = with_notice(&session, Notice::error("Invalid credentials"));
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Html(template::signin_page(&ctx, username).into_string()),
    )
        .into_response()
}

async fn post_signout(session: Session) -> Response {
    if let Some(user) = session.username() {
        tracing::info!(user = %user, "signed out");
    }
    session.sign_out();
    session.notify(Notice::info("You have been signed out"));
    Redirect::to("/").into_response()
}

// ── Sign up ───────────────────────────────────────────────────────────────────

async fn get_signup(session: Session) -> Response {
    Html(template::signup_page(&session.page_context(), "").into_string()).into_response()
}

async fn post_signup(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CredentialsForm>,
) -> Response {
    match state.credentials.add_user(&form.username, &form.password).await {
        Ok(()) => {
            tracing::info!(user = %form.username.trim(), "user created");
            session.notify(Notice::success("User created."));
            Redirect::to(SIGN_IN_PATH).into_response()
        }
        Err(e @ (CredentialError::MissingFields | CredentialError::UsernameTaken)) => {
            let ctx = with_notice(&session, Notice::error(e.to_string()));
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Html(template::signup_page(&ctx, form.username.trim()).into_string()),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Sign-up failed: {}", e);
            crate::error::AppError::Internal("Could not create the user.".to_string())
                .into_response()
        }
    }
}

/// Page context for a re-rendered form: pending notices plus `notice`.
pub fn with_notice(session: &Session, notice: Notice) -> PageContext {
    let mut ctx = session.page_context();
    ctx.notices.push(notice);
    ctx
}
