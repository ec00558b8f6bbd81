//! HTTP surface
//!
//! Every handler returns `Result<HttpResponse, RecommenderError>` and relies
//! on `ResponseError` for status mapping.

use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::engine::RecommendationEngine;
use crate::error::RecommenderError;
use crate::types::{
    Algorithm, ItemId, Recommendation, RecommendationRequest, RecommendationResponse, SignalEvent,
    UserId,
};

/// Application state shared across all handlers
pub struct AppState {
    pub engine: Arc<RecommendationEngine>,
}

impl AppState {
    pub fn new(engine: Arc<RecommendationEngine>) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default)]
    pub force_refresh: bool,
}

fn default_algorithm() -> String {
    Algorithm::Popular.as_str().to_string()
}

fn default_limit() -> i64 {
    5
}

#[derive(Debug, Deserialize)]
pub struct ClearCacheQuery {
    pub algorithm: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationsBody {
    pub user_id: UserId,
    pub algorithm: Algorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<ItemId>,
    pub count: usize,
    pub cached: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_signals: Vec<String>,
    pub data: Vec<Recommendation>,
}

impl RecommendationsBody {
    fn new(
        request: &RecommendationRequest,
        course_id: Option<ItemId>,
        response: RecommendationResponse,
    ) -> Self {
        Self {
            user_id: request.user_id,
            algorithm: request.algorithm,
            course_id,
            count: response.recommendations.len(),
            cached: response.cached,
            degraded_signals: response.degraded_signals,
            data: response.recommendations,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "recommender-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/v1/recommendation-types
async fn recommendation_types(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "data": state.engine.algorithms()
    }))
}

/// GET /api/v1/users/{user_id}/recommendations/courses
#[instrument(skip(state, query), fields(request_id = %Uuid::new_v4()))]
async fn course_recommendations(
    state: web::Data<AppState>,
    path: web::Path<UserId>,
    query: web::Query<RecommendationQuery>,
) -> Result<HttpResponse, RecommenderError> {
    let user_id = path.into_inner();
    let request =
        RecommendationRequest::parse(user_id, &query.algorithm, query.limit, query.force_refresh)?;

    let response = state.engine.recommend_courses(&request).await?;
    Ok(HttpResponse::Ok().json(RecommendationsBody::new(&request, None, response)))
}

/// GET /api/v1/users/{user_id}/recommendations/courses/{course_id}/activities
#[instrument(skip(state, query), fields(request_id = %Uuid::new_v4()))]
async fn activity_recommendations(
    state: web::Data<AppState>,
    path: web::Path<(UserId, ItemId)>,
    query: web::Query<RecommendationQuery>,
) -> Result<HttpResponse, RecommenderError> {
    let (user_id, course_id) = path.into_inner();
    let request =
        RecommendationRequest::parse(user_id, &query.algorithm, query.limit, query.force_refresh)?;

    let response = state
        .engine
        .recommend_activities(&request, course_id)
        .await?;
    Ok(HttpResponse::Ok().json(RecommendationsBody::new(
        &request,
        Some(course_id),
        response,
    )))
}

/// POST /api/v1/events
#[instrument(skip(state), fields(request_id = %Uuid::new_v4()))]
async fn signal_event(
    state: web::Data<AppState>,
    event: web::Json<SignalEvent>,
) -> Result<HttpResponse, RecommenderError> {
    state.engine.notify(event.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(serde_json::json!({ "status": "accepted" })))
}

/// POST /api/v1/cache/clear
#[instrument(skip(state), fields(request_id = %Uuid::new_v4()))]
async fn clear_cache(
    state: web::Data<AppState>,
    query: web::Query<ClearCacheQuery>,
) -> Result<HttpResponse, RecommenderError> {
    let algorithm = query
        .algorithm
        .as_deref()
        .map(str::parse::<Algorithm>)
        .transpose()?;

    let removed = state.engine.clear_cache(algorithm).await?;
    info!(removed, "Cache cleared via API");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "cleared": removed,
        "algorithm": algorithm,
    })))
}

/// GET /api/v1/cache/stats
async fn cache_stats(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.engine.cache_stats().await)
}

/// Configure application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/api/v1")
            .route("/recommendation-types", web::get().to(recommendation_types))
            .service(
                web::scope("/users/{user_id}/recommendations")
                    .route("/courses", web::get().to(course_recommendations))
                    .route(
                        "/courses/{course_id}/activities",
                        web::get().to(activity_recommendations),
                    ),
            )
            .route("/events", web::post().to(signal_event))
            .service(
                web::scope("/cache")
                    .route("/clear", web::post().to(clear_cache))
                    .route("/stats", web::get().to(cache_stats)),
            ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecommenderConfig;
    use crate::signals::{InMemoryCatalog, InMemoryProfiles};
    use crate::types::Item;
    use actix_web::{http::StatusCode, test, App};

    fn state(catalog: InMemoryCatalog) -> web::Data<AppState> {
        let engine = RecommendationEngine::new(
            Arc::new(catalog),
            Arc::new(InMemoryProfiles::new()),
            RecommenderConfig::default(),
        );
        web::Data::new(AppState::new(Arc::new(engine)))
    }

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_course(Item::course(10, "Rust"))
            .with_course(Item::course(11, "Go"))
            .with_enrollment(2, 10)
    }

    #[actix_web::test]
    async fn test_health_endpoint() {
        let app = test::init_service(App::new().configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_course_recommendations_default_to_popular() {
        let app = test::init_service(
            App::new()
                .app_data(state(catalog()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/v1/users/7/recommendations/courses")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["algorithm"], "popular");
        assert_eq!(body["count"], 2);
        assert_eq!(body["cached"], false);
    }

    #[actix_web::test]
    async fn test_invalid_parameters_are_bad_requests() {
        let app = test::init_service(
            App::new()
                .app_data(state(catalog()))
                .configure(configure_routes),
        )
        .await;

        for uri in [
            "/api/v1/users/7/recommendations/courses?algorithm=magic",
            "/api/v1/users/7/recommendations/courses?limit=0",
            "/api/v1/cache/clear?algorithm=magic",
        ] {
            let req = if uri.contains("cache") {
                test::TestRequest::post().uri(uri).to_request()
            } else {
                test::TestRequest::get().uri(uri).to_request()
            };
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn test_unreachable_catalog_is_service_unavailable() {
        let catalog = catalog();
        catalog.set_available(false);
        let app = test::init_service(
            App::new()
                .app_data(state(catalog))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/v1/users/7/recommendations/courses?algorithm=hybrid")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[actix_web::test]
    async fn test_events_are_accepted() {
        let app = test::init_service(
            App::new()
                .app_data(state(catalog()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/events")
            .set_json(serde_json::json!({ "type": "enrollment_changed", "user_id": 7 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[actix_web::test]
    async fn test_recommendation_types_listed() {
        let app = test::init_service(
            App::new()
                .app_data(state(catalog()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/v1/recommendation-types")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().map(Vec::len), Some(5));
        assert_eq!(body["data"][4]["id"], "hybrid");
    }
}
