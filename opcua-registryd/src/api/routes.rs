use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use shared::types::{
    ApplicationInfo, ApplicationQuery, ApplicationRecord, ApplicationRegistrationRequest,
    ApplicationRegistrationResult, ApplicationRegistrationUpdate, DiscovererInfo, DiscoveryEvent,
    DiscoveryResult, EndpointInfo, EndpointQuery, GatewayInfo, ListResult, ModuleInfo,
    PublisherInfo, SupervisorInfo,
};
use shared::protocol::API_PREFIX;
use crate::error::RegistryError;
use crate::registry::{DiscoveryStats, OperationContext, Registry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub authority_id: Arc<str>,
    /// Cancelled on shutdown; every request context derives from it
    pub cancel: CancellationToken,
}

impl AppState {
    fn ctx(&self) -> OperationContext {
        OperationContext::new(&*self.authority_id).with_cancel(self.cancel.child_token())
    }
}

/// Registry error rendered as a status code and JSON body
pub struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError(err)
    }
}

fn status_for(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::OutOfDate(_) | RegistryError::Conflict(_) | RegistryError::Contention { .. } => {
            StatusCode::CONFLICT
        }
        RegistryError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub continuation: Option<String>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetApplicationParams {
    #[serde(default)]
    pub filter_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct PurgeParams {
    pub not_seen_for_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct SiteParams {
    pub site_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub supervisor_id: String,
}

/// Body of a discovery report
#[derive(Debug, Deserialize)]
pub struct DiscoveryReport {
    #[serde(default)]
    pub result: DiscoveryResult,
    pub events: Option<Vec<DiscoveryEvent>>,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/applications", get(list_applications).post(register_application))
        .route("/applications/query", post(query_applications))
        .route("/applications/sites", get(list_sites))
        .route("/applications/purge", post(purge_applications))
        .route(
            "/applications/:id",
            get(get_application).patch(update_application).delete(unregister_application),
        )
        .route("/applications/:id/enable", post(enable_application))
        .route("/applications/:id/disable", post(disable_application))
        .route("/endpoints", get(list_endpoints))
        .route("/endpoints/query", post(query_endpoints))
        .route("/endpoints/:id", get(get_endpoint))
        .route("/endpoints/:id/activate", post(activate_endpoint))
        .route("/endpoints/:id/deactivate", post(deactivate_endpoint))
        .route("/endpoints/:id/enable", post(enable_endpoint))
        .route("/endpoints/:id/disable", post(disable_endpoint))
        .route("/discovery/:discoverer_id", post(process_discovery))
        .route("/modules", post(register_module))
        .route("/modules/:id", get(get_module))
        .route("/supervisors", get(list_supervisors))
        .route("/discoverers", get(list_discoverers))
        .route("/publishers", get(list_publishers))
        .route("/gateways", get(list_gateways));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

async fn list_applications(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<ListResult<ApplicationInfo>>> {
    let result = state.registry.list_applications(&state.ctx(), page.continuation, page.page_size).await?;
    Ok(Json(result))
}

async fn register_application(
    State(state): State<AppState>,
    Json(request): Json<ApplicationRegistrationRequest>,
) -> ApiResult<Json<ApplicationRegistrationResult>> {
    Ok(Json(state.registry.register_application(&state.ctx(), request).await?))
}

async fn query_applications(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Json(query): Json<ApplicationQuery>,
) -> ApiResult<Json<ListResult<ApplicationInfo>>> {
    let result = state
        .registry
        .query_applications(&state.ctx(), &query, page.continuation, page.page_size)
        .await?;
    Ok(Json(result))
}

async fn list_sites(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.registry.list_sites(&state.ctx()).await?))
}

async fn purge_applications(
    State(state): State<AppState>,
    Query(params): Query<PurgeParams>,
) -> ApiResult<Json<PurgeResponse>> {
    let not_seen_for = chrono::Duration::seconds(params.not_seen_for_secs.min(3_153_600_000) as i64);
    let purged = state.registry.purge_disabled_applications(&state.ctx(), not_seen_for).await?;
    Ok(Json(PurgeResponse { purged }))
}

async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<GetApplicationParams>,
) -> ApiResult<Json<ApplicationRecord>> {
    let record = state.registry.get_application(&state.ctx(), &id, params.filter_inactive).await?;
    Ok(Json(record))
}

async fn update_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<ApplicationRegistrationUpdate>,
) -> ApiResult<StatusCode> {
    state.registry.update_application(&state.ctx(), &id, update).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unregister_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.unregister_application(&state.ctx(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_application(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.registry.enable_application(&state.ctx(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disable_application(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.registry.disable_application(&state.ctx(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_endpoints(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<ListResult<EndpointInfo>>> {
    let result = state.registry.list_endpoints(&state.ctx(), page.continuation, page.page_size).await?;
    Ok(Json(result))
}

async fn query_endpoints(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Json(query): Json<EndpointQuery>,
) -> ApiResult<Json<ListResult<EndpointInfo>>> {
    let result = state
        .registry
        .query_endpoints(&state.ctx(), &query, page.continuation, page.page_size)
        .await?;
    Ok(Json(result))
}

async fn get_endpoint(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<EndpointInfo>> {
    Ok(Json(state.registry.get_endpoint(&state.ctx(), &id).await?))
}

async fn activate_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActivateRequest>,
) -> ApiResult<StatusCode> {
    state.registry.activate_endpoint(&state.ctx(), &id, &request.supervisor_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deactivate_endpoint(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.registry.deactivate_endpoint(&state.ctx(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_endpoint(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.registry.enable_endpoint(&state.ctx(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disable_endpoint(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.registry.disable_endpoint(&state.ctx(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn process_discovery(
    State(state): State<AppState>,
    Path(discoverer_id): Path<String>,
    Json(report): Json<DiscoveryReport>,
) -> ApiResult<Json<DiscoveryStats>> {
    let stats = state
        .registry
        .process_discovery_results(&state.ctx(), &discoverer_id, &report.result, report.events)
        .await?;
    Ok(Json(stats))
}

async fn register_module(State(state): State<AppState>, Json(module): Json<ModuleInfo>) -> ApiResult<StatusCode> {
    state.registry.register_module(&state.ctx(), module).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_module(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<ModuleInfo>> {
    Ok(Json(state.registry.get_module(&state.ctx(), &id).await?))
}

async fn list_supervisors(
    State(state): State<AppState>,
    Query(params): Query<SiteParams>,
) -> ApiResult<Json<Vec<SupervisorInfo>>> {
    Ok(Json(state.registry.list_supervisors(&state.ctx(), params.site_id.as_deref()).await?))
}

async fn list_discoverers(
    State(state): State<AppState>,
    Query(params): Query<SiteParams>,
) -> ApiResult<Json<Vec<DiscovererInfo>>> {
    Ok(Json(state.registry.list_discoverers(&state.ctx(), params.site_id.as_deref()).await?))
}

async fn list_publishers(
    State(state): State<AppState>,
    Query(params): Query<SiteParams>,
) -> ApiResult<Json<Vec<PublisherInfo>>> {
    Ok(Json(state.registry.list_publishers(&state.ctx(), params.site_id.as_deref()).await?))
}

async fn list_gateways(
    State(state): State<AppState>,
    Query(params): Query<SiteParams>,
) -> ApiResult<Json<Vec<GatewayInfo>>> {
    Ok(Json(state.registry.list_gateways(&state.ctx(), params.site_id.as_deref()).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::{test_event, TestRegistry};

    fn state(t: &TestRegistry) -> AppState {
        AppState {
            registry: t.registry.clone(),
            authority_id: Arc::from("api-test"),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&RegistryError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&RegistryError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&RegistryError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&RegistryError::Contention { id: "x".into(), attempts: 3 }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(&RegistryError::Cancelled), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&RegistryError::Store(anyhow::anyhow!("disk"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_register_then_fetch() {
        let t = TestRegistry::new().await;
        let request = ApplicationRegistrationRequest {
            application_uri: "urn:press:1".to_string(),
            ..Default::default()
        };
        let Json(result) = register_application(State(state(&t)), Json(request)).await.ok().unwrap();

        let Json(record) = get_application(
            State(state(&t)),
            Path(result.id.clone()),
            Query(GetApplicationParams::default()),
        )
        .await
        .ok()
        .unwrap();
        assert_eq!(record.application.application_id, result.id);
        assert_eq!(record.application.created.unwrap().authority_id, "api-test");
    }

    #[tokio::test]
    async fn test_missing_application_is_404() {
        let t = TestRegistry::new().await;
        let response = get_application(
            State(state(&t)),
            Path("uat-missing".to_string()),
            Query(GetApplicationParams::default()),
        )
        .await
        .err()
        .unwrap()
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_discovery_report_without_events_is_400() {
        let t = TestRegistry::new().await;
        let report: DiscoveryReport = serde_json::from_str("{}").unwrap();
        let response = process_discovery(State(state(&t)), Path("gw1_module_discoverer".to_string()), Json(report))
            .await
            .err()
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_discovery_report() {
        let t = TestRegistry::new().await;
        let report = DiscoveryReport {
            result: DiscoveryResult::default(),
            events: Some(vec![test_event("urn:plc:1", "opc.tcp://plc:4840")]),
        };
        let Json(stats) = process_discovery(State(state(&t)), Path("gw1_module_discoverer".to_string()), Json(report))
            .await
            .ok()
            .unwrap();
        assert_eq!(stats.applications.added, 1);

        let Json(sites) = list_sites(State(state(&t))).await.ok().unwrap();
        assert_eq!(sites, vec!["gw1"]);
    }
}
