mod callback;
mod login;
mod logout;
mod status;
mod stream;

pub use callback::oauth_callback;
pub use login::login;
pub use logout::logout;
pub use status::status;
pub use stream::{open_stream, submit_message};

use crate::models::HealthResponse;
use axum::Json;

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
