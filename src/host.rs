//! Axum host adapter.
//!
//! The only HTTP-aware layer: it decodes each request into a [`Transaction`],
//! runs the pipeline, and renders the outcome (JSON body, 302 redirect,
//! auto-submitting form-post page or signed JWT). Credentials arriving
//! through HTTP conventions — Basic authentication, bearer tokens — are
//! normalized into protocol parameters before dispatch so the pipeline stays
//! host-agnostic.

use axum::{
    extract::{RawForm, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response as AxumResponse},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use url::Url;

use crate::config::AppState;
use crate::error::{ErrorCode, ServerError};
use crate::handlers::discovery::configuration_document;
use crate::pipeline::{process_request, Disposition, PipelineOutcome};
use crate::protocol::constants::params;
use crate::protocol::transaction::properties;
use crate::protocol::{EndpointType, Transaction};

/// Header a fronting authentication proxy uses to assert the signed-in user.
/// Absent on the authorization endpoint, the request fails with
/// `login_required`.
pub const AUTHENTICATED_SUBJECT_HEADER: &str = "x-authenticated-subject";

pub fn create_router(state: AppState) -> Router {
    let options = &state.options;
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route(
            &options.authorization_endpoint_path,
            get(authorize_handler).post(authorize_handler),
        )
        .route(&options.token_endpoint_path, post(token_handler))
        .route(&options.introspection_endpoint_path, post(introspect_handler))
        .route(&options.revocation_endpoint_path, post(revoke_handler))
        .route(
            &options.userinfo_endpoint_path,
            get(userinfo_handler).post(userinfo_handler),
        )
        .route(
            &options.logout_endpoint_path,
            get(logout_handler).post(logout_handler),
        )
        .route("/.well-known/openid-configuration", get(configuration_handler))
        .route("/.well-known/jwks", get(jwks_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ready_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, StatusCode> {
    if let Some(pool) = &state.pool {
        sqlx::query("SELECT 1")
            .execute(pool)
            .await
            .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    }
    Ok(Json(HealthResponse {
        status: "ready",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

// RawForm reads the query string on GET/HEAD and the body elsewhere, which
// is exactly the extraction rule of the user-agent-facing endpoints.

async fn authorize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawForm(bytes): RawForm,
) -> AxumResponse {
    run_endpoint(state, EndpointType::Authorization, headers, decode_form(&bytes)).await
}

async fn token_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawForm(bytes): RawForm,
) -> AxumResponse {
    run_endpoint(state, EndpointType::Token, headers, decode_form(&bytes)).await
}

async fn introspect_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawForm(bytes): RawForm,
) -> AxumResponse {
    run_endpoint(state, EndpointType::Introspection, headers, decode_form(&bytes)).await
}

async fn revoke_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawForm(bytes): RawForm,
) -> AxumResponse {
    run_endpoint(state, EndpointType::Revocation, headers, decode_form(&bytes)).await
}

async fn userinfo_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawForm(bytes): RawForm,
) -> AxumResponse {
    run_endpoint(state, EndpointType::Userinfo, headers, decode_form(&bytes)).await
}

async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawForm(bytes): RawForm,
) -> AxumResponse {
    run_endpoint(state, EndpointType::Logout, headers, decode_form(&bytes)).await
}

async fn configuration_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AxumResponse {
    match effective_issuer(&state, &headers) {
        Ok(issuer) => Json(configuration_document(
            &state.options,
            &issuer,
            state.serializer.as_ref(),
        ))
        .into_response(),
        Err(error) => error.into_response(),
    }
}

async fn jwks_handler(State(state): State<AppState>) -> AxumResponse {
    Json(state.serializer.jwks()).into_response()
}

/// Builds the transaction, runs the pipeline and renders the outcome.
async fn run_endpoint(
    state: AppState,
    endpoint: EndpointType,
    headers: HeaderMap,
    mut pairs: Vec<(String, String)>,
) -> AxumResponse {
    normalize_credentials(endpoint, &headers, &mut pairs);

    let mut transaction = Transaction::new(endpoint, state.options.clone());
    match effective_issuer(&state, &headers) {
        Ok(issuer) => transaction.set_issuer(issuer),
        Err(error) => return error.into_response(),
    }
    if let Some(subject) = headers
        .get(AUTHENTICATED_SUBJECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
    {
        transaction.set_property(properties::AUTHENTICATED_SUBJECT, subject.to_string());
    }
    transaction.raw_parameters = Some(pairs);

    match process_request(&state, transaction).await {
        Ok(processed) => render(processed.outcome, processed.transaction),
        Err(error) => error.into_response(),
    }
}

/// Moves HTTP-level credentials into protocol parameters: Basic
/// authentication on the client-authenticated endpoints, bearer tokens on
/// userinfo.
fn normalize_credentials(
    endpoint: EndpointType,
    headers: &HeaderMap,
    pairs: &mut Vec<(String, String)>,
) {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match endpoint {
        EndpointType::Token | EndpointType::Introspection | EndpointType::Revocation => {
            if let Some((client_id, client_secret)) =
                authorization.and_then(decode_basic_credentials)
            {
                if !pairs.iter().any(|(k, _)| k == params::CLIENT_ID) {
                    pairs.push((params::CLIENT_ID.to_string(), client_id));
                }
                if !pairs.iter().any(|(k, _)| k == params::CLIENT_SECRET) {
                    pairs.push((params::CLIENT_SECRET.to_string(), client_secret));
                }
            }
        }
        EndpointType::Userinfo => {
            if let Some(token) = authorization.and_then(|v| v.strip_prefix("Bearer ")) {
                if !pairs.iter().any(|(k, _)| k == params::ACCESS_TOKEN) {
                    pairs.push((params::ACCESS_TOKEN.to_string(), token.to_string()));
                }
            }
        }
        _ => {}
    }
}

/// RFC 6749 §2.3.1: Basic credentials are form-urlencoded before base64.
fn decode_basic_credentials(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((
        urlencoding::decode(user).ok()?.into_owned(),
        urlencoding::decode(password).ok()?.into_owned(),
    ))
}

fn decode_form(bytes: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(bytes)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// The configured issuer, or one inferred from the request's scheme and
/// host. Inference without a Host header is a hard failure.
fn effective_issuer(state: &AppState, headers: &HeaderMap) -> Result<Url, ServerError> {
    if let Some(issuer) = &state.options.issuer {
        return Ok(issuer.clone());
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ServerError::Configuration(
                "the issuer cannot be inferred without a Host header".to_string(),
            )
        })?;
    // Scheme negotiation behind a proxy is the proxy's concern; direct
    // exposure is assumed to be TLS except for loopback development.
    let scheme = if host.starts_with("localhost") || host.starts_with("127.0.0.1") {
        "http"
    } else {
        "https"
    };

    Url::parse(&format!("{scheme}://{host}/")).map_err(|e| {
        ServerError::Configuration(format!("the inferred issuer is not an absolute URL: {e}"))
    })
}

/// Renders the pipeline outcome as an HTTP response.
fn render(outcome: PipelineOutcome, transaction: Transaction) -> AxumResponse {
    match outcome {
        PipelineOutcome::Skipped => StatusCode::NOT_FOUND.into_response(),
        PipelineOutcome::Handled => {
            (StatusCode::OK, Json(transaction.response.to_json())).into_response()
        }
        PipelineOutcome::Completed(Disposition::Redirect { location }) => (
            StatusCode::FOUND,
            [(header::LOCATION, location)],
        )
            .into_response(),
        PipelineOutcome::Completed(Disposition::FormPost { action }) => {
            Html(form_post_page(&action, &transaction)).into_response()
        }
        PipelineOutcome::Completed(Disposition::Jwt { token }) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/jwt")],
            token,
        )
            .into_response(),
        PipelineOutcome::Completed(Disposition::Json) => {
            let status = transaction
                .response
                .error()
                .map(status_for_error)
                .unwrap_or(StatusCode::OK);
            (status, Json(transaction.response.to_json())).into_response()
        }
    }
}

fn status_for_error(error: &str) -> StatusCode {
    match error {
        "invalid_client" | "invalid_token" => StatusCode::UNAUTHORIZED,
        "server_error" => StatusCode::INTERNAL_SERVER_ERROR,
        "temporarily_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// The auto-submitting form_post page (OAuth 2.0 Form Post Response Mode).
fn form_post_page(action: &str, transaction: &Transaction) -> String {
    let mut inputs = String::new();
    for (name, parameter) in transaction.response.iter() {
        let value = match parameter {
            crate::protocol::Parameter::String(s) => s.clone(),
            crate::protocol::Parameter::Integer(i) => i.to_string(),
            crate::protocol::Parameter::Bool(b) => b.to_string(),
            _ => continue,
        };
        inputs.push_str(&format!(
            "<input type=\"hidden\" name=\"{}\" value=\"{}\"/>",
            html_escape(name),
            html_escape(&value)
        ));
    }

    format!(
        "<!DOCTYPE html><html><head><title>Submitting...</title></head>\
         <body onload=\"document.forms[0].submit()\">\
         <form method=\"post\" action=\"{}\">{}</form>\
         </body></html>",
        html_escape(action),
        inputs
    )
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Default host handler for the authorization endpoint: trusts the identity
/// asserted by the fronting proxy, or demands interaction.
pub struct AttachProxiedPrincipal;

#[async_trait::async_trait]
impl crate::pipeline::EventHandler<crate::pipeline::HandleContext> for AttachProxiedPrincipal {
    async fn handle(
        &self,
        context: &mut crate::pipeline::HandleContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        match context
            .transaction
            .property_str(properties::AUTHENTICATED_SUBJECT)
            .map(str::to_owned)
        {
            Some(subject) => {
                context.principal = Some(crate::protocol::Principal::new(subject));
            }
            None => {
                context.reject(
                    ErrorCode::LoginRequired,
                    "The request cannot be processed without an authenticated session.",
                );
            }
        }
        Ok(())
    }
}

/// Default host handler for the logout endpoint: session state lives at the
/// proxy, so sign-out is always acknowledged.
pub struct ApproveLogout;

#[async_trait::async_trait]
impl crate::pipeline::EventHandler<crate::pipeline::HandleContext> for ApproveLogout {
    async fn handle(
        &self,
        context: &mut crate::pipeline::HandleContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        context.is_logout_allowed = true;
        Ok(())
    }
}
