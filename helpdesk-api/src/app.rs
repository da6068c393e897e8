//! Application state and router builder
//!
//! # Example
//!
//! ```no_run
//! use helpdesk_api::{app::AppState, config::Config};
//! use sqlx::PgPool;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let pool = PgPool::connect(&config.database.url).await?;
//! let state = AppState::new(pool, config)?;
//! let app = helpdesk_api::app::build_router(state);
//! # Ok(())
//! # }
//! ```

use crate::clients::assistant::{AiAssistant, OpenAiAssistant};
use crate::clients::checkout::{CheckoutProvider, StripeCheckout};
use crate::{config::Config, error::ApiError, middleware::security::SecurityHeadersLayer};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{from_fn_with_state, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use helpdesk_shared::auth::middleware::authenticate;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state, cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,

    /// Ticket suggestions and chat
    pub assistant: Arc<dyn AiAssistant>,

    /// Hosted checkout for paid plans
    pub checkout: Arc<dyn CheckoutProvider>,
}

impl AppState {
    /// State backed by the configured OpenAI and Stripe accounts
    pub fn new(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let assistant = OpenAiAssistant::new(&config.openai)?;
        let checkout = StripeCheckout::new(&config.stripe)?;
        Ok(Self::with_providers(db, config, Arc::new(assistant), Arc::new(checkout)))
    }

    /// State with explicit provider implementations
    pub fn with_providers(
        db: PgPool,
        config: Config,
        assistant: Arc<dyn AiAssistant>,
        checkout: Arc<dyn CheckoutProvider>,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            assistant,
            checkout,
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }

    /// Absolute URL for `path` on the public host
    pub fn public_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api.public_url, path)
    }
}

/// Builds the complete router with all routes and middleware
///
/// ```text
/// /
/// ├── GET  /health
/// ├── POST /admin/webhook                  payment provider callbacks
/// └── /v1
///     ├── /auth                            register, login, refresh,
///     │                                    forgot-password, reset-password,
///     │                                    me*, change-password*
///     ├── GET  /plans
///     ├── POST /organizations*
///     ├── /invitations*                    list, join, :token/accept, :token/decline
///     ├── /admin*                          organization, invitations, members,
///     │                                    emails/failed, subscription, checkout-session
///     ├── /tickets*                        list, create, filter, :id, status,
///     │                                    responses, comments, chat
///     ├── GET  /dashboard*
///     └── POST /assistant/chat*
///
/// * requires `Authorization: Bearer <jwt>`
/// ```
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let public_routes = Router::new()
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/refresh", post(routes::auth::refresh))
        .route("/auth/forgot-password", post(routes::auth::forgot_password))
        .route("/auth/reset-password", post(routes::auth::reset_password))
        .route("/plans", get(routes::plans::list_plans));

    let admin_routes = Router::new()
        .route("/organization", get(routes::organizations::overview))
        .route("/invitations", post(routes::invitations::invite))
        .route("/invitations/:token/resend", post(routes::invitations::resend))
        .route("/invitations/:token", delete(routes::invitations::cancel))
        .route("/members/:user_id", delete(routes::organizations::remove_member))
        .route("/members/:user_id/role", put(routes::organizations::change_role))
        .route("/emails/failed", get(routes::organizations::failed_emails))
        .route("/subscription", get(routes::subscriptions::show))
        .route("/subscription/change", post(routes::subscriptions::change_plan))
        .route("/subscription/cancel", post(routes::subscriptions::cancel))
        .route("/subscription/reactivate", post(routes::subscriptions::reactivate))
        .route(
            "/subscription/revert-downgrade",
            post(routes::subscriptions::revert_downgrade),
        )
        .route("/checkout-session", post(routes::subscriptions::checkout_session));

    let ticket_routes = Router::new()
        .route("/", get(routes::tickets::list).post(routes::tickets::create))
        .route("/filter", get(routes::tickets::filter))
        .route("/:id", get(routes::tickets::show).delete(routes::tickets::delete))
        .route("/:id/status", put(routes::tickets::update_status))
        .route("/:id/responses", post(routes::tickets::add_response))
        .route("/:id/comments", post(routes::tickets::add_comment))
        .route("/:id/chat", post(routes::tickets::chat));

    let protected_routes = Router::new()
        .route("/auth/me", get(routes::auth::me))
        .route("/auth/change-password", post(routes::auth::change_password))
        .route("/organizations", post(routes::organizations::create))
        .route("/invitations", get(routes::invitations::list_pending))
        .route("/invitations/join", post(routes::invitations::join))
        .route("/invitations/:token/accept", post(routes::invitations::accept))
        .route("/invitations/:token/decline", post(routes::invitations::decline))
        .route("/dashboard", get(routes::dashboard::dashboard))
        .route("/assistant/chat", post(routes::assistant::chat))
        .nest("/admin", admin_routes)
        .nest("/tickets", ticket_routes)
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_layer));

    let v1_routes = Router::new().merge(public_routes).merge(protected_routes);

    let cors = if state.config.api.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/admin/webhook", post(routes::webhook::receive))
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

/// Resolves the bearer token into an `AuthContext` request extension
///
/// Role, organization and active flag are read from the user row on every
/// request, so a removed member loses access immediately.
async fn jwt_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let auth = authenticate(&state.db, state.jwt_secret(), authorization.as_deref()).await?;
    req.extensions_mut().insert(auth);

    Ok(next.run(req).await)
}
