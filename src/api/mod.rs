#![allow(clippy::needless_for_each)]

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::{get, post},
    Extension, Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    clock::SystemClock,
    identity::{PublicIdentity, Role},
    session::{
        password::{Argon2Passwords, PasswordHasher},
        postgres::PgIdentityStore,
        store::IdentityStore,
        SessionIssuer,
    },
    token::TokenCodec,
};
use handlers::{
    admin,
    auth::{self, AccessPolicy, AuthConfig, AuthState},
    health, me,
};

pub mod handlers;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::auth::session::login,
        handlers::auth::session::refresh,
        handlers::auth::session::logout,
        handlers::auth::session::revoke,
        handlers::me::me,
        handlers::admin::identity,
    ),
    components(
        schemas(
            health::Health,
            auth::types::LoginRequest,
            auth::types::AccessTokenResponse,
            auth::types::ErrorBody,
            auth::types::ErrorDetail,
            PublicIdentity,
            Role,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Login, refresh rotation and logout"),
        (name = "admin", description = "Role-gated administration"),
        (name = "health", description = "Liveness"),
    )
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Connect the postgres pool used by the identity store.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

/// Assemble the session issuer and auth state from configuration.
///
/// # Errors
///
/// Returns an error if the signing secret is too short or the password
/// hasher cannot be initialized.
pub fn auth_state(
    config: AuthConfig,
    jwt_secret: &SecretString,
    store: Arc<dyn IdentityStore>,
    passwords: Arc<dyn PasswordHasher>,
) -> Result<AuthState> {
    let codec = TokenCodec::new(
        jwt_secret.expose_secret().as_bytes(),
        config.jwt_issuer(),
        config.access_ttl_seconds(),
    )
    .context("Invalid JWT configuration")?;
    let issuer = SessionIssuer::new(store, passwords, codec, Arc::new(SystemClock))
        .with_refresh_ttl_seconds(config.refresh_ttl_seconds());
    Ok(AuthState::new(config, issuer))
}

/// Build the application router.
///
/// # Errors
///
/// Returns an error if the public base URL cannot be turned into a CORS origin.
pub fn router(auth_state: Arc<AuthState>) -> Result<Router> {
    let origin = frontend_origin(auth_state.config().public_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(origin))
        // the refresh carrier is a cookie
        .allow_credentials(true);

    let admin = Router::new()
        .route("/admin/identities/:id", get(admin::identity))
        .route_layer(middleware::from_fn_with_state(
            Arc::new(AccessPolicy::roles([Role::Admin])),
            auth::require_roles,
        ));

    let app = Router::new()
        .route("/auth/login", post(auth::session::login))
        .route("/auth/refresh", post(auth::session::refresh))
        .route("/auth/refresh/revoke", post(auth::session::revoke))
        .route("/auth/logout", post(auth::session::logout))
        .route("/auth/me", get(me::me))
        .merge(admin)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state)),
        )
        .route("/health", get(health::health).options(health::health));

    Ok(app)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: AuthConfig,
    jwt_secret: &SecretString,
) -> Result<()> {
    let pool = connect(&dsn).await?;

    let passwords = Arc::new(Argon2Passwords::new()?);
    let auth_state = Arc::new(auth_state(
        auth_config,
        jwt_secret,
        Arc::new(PgIdentityStore::new(pool)),
        passwords,
    )?);

    let app = router(auth_state)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(public_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(public_base_url)
        .with_context(|| format!("Invalid public base URL: {public_base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Public base URL must include a valid host: {public_base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
