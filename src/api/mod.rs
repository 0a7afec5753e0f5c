/*
 * REST API: route mounting, JSON error mapping and catchers
 */

mod chains;
mod connectors;

use rocket::http::{ContentType, Status};
use rocket::response::{self, status, Responder};
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, routes, Request, State};
use serde::Serialize;
use tracing::error;
use crate::gateway::Gateway;
use crate::models::{ErrorKind, GatewayError};

/// Body of every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let error = self.0;
        let code = error.status_code();
        if code >= 500 {
            error!("{} {} failed: {:?}", request.method(), request.uri(), error);
        }
        let body = ErrorResponse {
            error: error.kind(),
            message: error.public_message(),
            status_code: code,
            signature: error.signature().map(str::to_string),
        };
        status::Custom(Status::new(code), Json(body)).respond_to(request)
    }
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[get("/health")]
pub async fn health_check() -> &'static str {
    "OK"
}

#[get("/metrics")]
pub async fn metrics(gateway: &State<Gateway>) -> std::result::Result<(ContentType, String), ApiError> {
    Ok((ContentType::Plain, gateway.metrics.render()?))
}

fn catcher_kind(status: Status) -> ErrorKind {
    match status.code {
        404 => ErrorKind::NotFound,
        code if code < 500 => ErrorKind::BadRequest,
        _ => ErrorKind::InternalError,
    }
}

/// Rocket answers malformed JSON bodies and query forms with 422; clients see
/// those as 400 like every other invalid parameter.
#[catch(default)]
fn default_catcher(status: Status, request: &Request<'_>) -> status::Custom<Json<ErrorResponse>> {
    let (status, message) = match status.code {
        404 => (
            status,
            format!("Route {} {} not found", request.method(), request.uri().path()),
        ),
        422 => (
            Status::BadRequest,
            "Request is missing required fields or has malformed values".to_string(),
        ),
        code if code >= 500 => (status, "Internal server error".to_string()),
        _ => (status, status.reason_lossy().to_string()),
    };
    status::Custom(
        status,
        Json(ErrorResponse {
            error: catcher_kind(status),
            message,
            status_code: status.code,
            signature: None,
        }),
    )
}

#[must_use]
pub fn create_rocket(gateway: Gateway) -> rocket::Rocket<rocket::Build> {
    let figment = rocket::Config::figment()
        .merge(("address", gateway.config.server.host.clone()))
        .merge(("port", gateway.config.server.port));

    rocket::custom(figment)
        .manage(gateway)
        .mount("/", routes![health_check, metrics])
        .mount(
            "/connectors",
            routes![
                connectors::list_connectors,
                connectors::quote_swap,
                connectors::execute_quote,
                connectors::execute_swap,
                connectors::pool_info,
                connectors::position_info,
                connectors::open_position,
                connectors::add_liquidity,
                connectors::remove_liquidity,
                connectors::collect_fees,
                connectors::close_position,
                connectors::approve,
            ],
        )
        .mount("/chains", routes![chains::list_tokens, chains::wallet_balances])
        .register("/", catchers![default_catcher])
}
