use std::{sync::Arc, time::Duration};

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use http::{header, HeaderValue, Method};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;

use crate::{request_tracing, server_config::cfg, ServerState};

use super::{calendar, gmail};

#[cfg(debug_assertions)]
mod dev {
    use axum::{extract::Query, http::StatusCode, response::IntoResponse, Json};
    use serde::{Deserialize, Serialize};

    use crate::auth::jwt::generate_dev_token;

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DevTokenParams {
        #[serde(default = "default_user_id")]
        pub user_id: i32,
        #[serde(default = "default_email")]
        pub email: String,
    }

    fn default_user_id() -> i32 {
        1
    }

    fn default_email() -> String {
        "student@example.edu".to_string()
    }

    #[derive(Serialize)]
    struct DevTokenResponse {
        token: String,
    }

    pub async fn dev_token(Query(params): Query<DevTokenParams>) -> impl IntoResponse {
        match generate_dev_token(params.user_id, &params.email) {
            Ok(token) => (StatusCode::OK, Json(DevTokenResponse { token })).into_response(),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token").into_response(),
        }
    }
}

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        let origins = cfg
            .settings
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring invalid allowed origin {:?}", origin);
                    None
                }
            })
            .collect::<Vec<_>>();

        let cors_layer = CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                header::HeaderName::from_static(crate::auth::gmail_token::GMAIL_TOKEN_HEADER),
            ])
            .allow_credentials(true);

        let ip_limiter_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(cfg.rate_limit.replenish_secs)
                .burst_size(cfg.rate_limit.burst_size)
                .finish()
                .expect("Invalid IP rate limit config"),
        );

        let ip_limiter = ip_limiter_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        // a separate background task to clean up
        tokio::task::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                ip_limiter.retain_recent();
            }
        });

        let router = Self::routes(state)
            .layer(GovernorLayer {
                config: ip_limiter_conf,
            })
            .layer(request_tracing::trace_with_request_id_layer())
            .layer(cors_layer);

        #[cfg(debug_assertions)]
        let router = router.route("/dev/token", get(dev::dev_token));

        router
    }

    /// Handlers without the network-facing layers
    pub(crate) fn routes(state: ServerState) -> Router {
        Router::new()
            .route("/", get(|| async { "Enrichment server" }))
            .route("/gmail/sync", get(gmail::sync))
            .route("/gmail/stream", get(gmail::stream))
            .route("/gmail/emails", get(gmail::emails))
            .route(
                "/calendar/events",
                get(calendar::events)
                    .post(calendar::add_event)
                    .delete(calendar::delete_event),
            )
            .with_state(state)
            .fallback(handler_404)
    }
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
