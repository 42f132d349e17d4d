//! HTTP transport: request/response DTOs and actix-web handlers for the
//! registry, discovery, cluster and operational endpoints.

use actix_web::{HttpRequest, HttpResponse, Responder, web};
use beacon_common::{ErrorEnvelope, RegistryError};
use beacon_core::{HealthCheckConfig, InstanceStatus, ServiceInstance};
use beacon_cluster::GossipMessage;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::state::AppState;

pub fn unauthorized_response(path: &str) -> HttpResponse {
    let err = RegistryError::invalid("missing or invalid credentials");
    let mut envelope = ErrorEnvelope::from_error(&err, path);
    envelope.code = "UNAUTHORIZED".to_string();
    HttpResponse::Unauthorized().json(envelope)
}

fn error_response(err: RegistryError, path: &str) -> HttpResponse {
    let envelope = ErrorEnvelope::from_error(&err, path);
    match err {
        RegistryError::InvalidArgument(_) => HttpResponse::BadRequest().json(envelope),
        RegistryError::IllegalStateTransition { .. } => HttpResponse::Conflict().json(envelope),
        RegistryError::Unavailable(_) => HttpResponse::ServiceUnavailable().json(envelope),
        RegistryError::Transient(_) => HttpResponse::ServiceUnavailable().json(envelope),
        RegistryError::Internal(_) => HttpResponse::InternalServerError().json(envelope),
    }
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

pub async fn register_instance(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RegisterRequest>,
) -> impl Responder {
    let service_id = path.into_inner();
    let body = body.into_inner();

    let mut instance = ServiceInstance::new(service_id, body.instance_id, body.host, body.port);
    instance.secure = body.secure;
    instance.metadata = body.metadata;
    instance.health_check = body.health_check.or_else(|| state.default_health_check.clone());
    instance.status = InstanceStatus::Starting;

    match state.registry.register(instance) {
        Ok(()) => HttpResponse::Created().finish(),
        Err(err) => error_response(err, "/api/v1/services/{serviceId}/instances"),
    }
}

pub async fn deregister_instance(state: web::Data<AppState>, path: web::Path<(String, String)>) -> impl Responder {
    let (service_id, instance_id) = path.into_inner();
    match state.registry.deregister(&service_id, &instance_id) {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(err) => error_response(err, "/api/v1/services/{serviceId}/instances/{instanceId}"),
    }
}

pub async fn renew_instance(state: web::Data<AppState>, path: web::Path<(String, String)>) -> impl Responder {
    let (service_id, instance_id) = path.into_inner();
    match state.registry.renew(&service_id, &instance_id) {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(err) => error_response(err, "/api/v1/services/{serviceId}/instances/{instanceId}/heartbeat"),
    }
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: InstanceStatus,
}

pub async fn update_instance_status(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<UpdateStatusRequest>,
) -> impl Responder {
    let (service_id, instance_id) = path.into_inner();
    match state.registry.update_status(&service_id, &instance_id, body.status) {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(err) => error_response(err, "/api/v1/services/{serviceId}/instances/{instanceId}/status"),
    }
}

#[derive(Deserialize)]
pub struct ListInstancesQuery {
    #[serde(default)]
    pub healthy_only: bool,
}

pub async fn list_instances(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ListInstancesQuery>,
) -> impl Responder {
    let service_id = path.into_inner();
    let result = if query.healthy_only {
        state.discovery.discover_healthy(&service_id)
    } else {
        state.discovery.discover(&service_id)
    };
    match result {
        Ok(instances) => HttpResponse::Ok().json(instances),
        Err(err) => error_response(err, "/api/v1/services/{serviceId}/instances"),
    }
}

pub async fn get_instance(state: web::Data<AppState>, path: web::Path<(String, String)>) -> impl Responder {
    let (service_id, instance_id) = path.into_inner();
    match state.discovery.get_instance(&service_id, &instance_id) {
        Some(instance) => HttpResponse::Ok().json(instance),
        None => HttpResponse::NotFound().finish(),
    }
}

pub async fn list_services(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.discovery.get_catalog())
}

pub async fn statistics(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.discovery.statistics())
}

pub async fn watch_service_events(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let service_id = path.into_inner();
    let stream = state
        .discovery
        .watch_service(&service_id)
        .filter_map(|item| item.ok())
        .map(|event| {
            let mut line = serde_json::to_vec(&event).unwrap_or_default();
            line.push(b'\n');
            Ok::<_, actix_web::Error>(web::Bytes::from(line))
        });

    HttpResponse::Ok().content_type("application/x-ndjson").streaming(stream)
}

pub async fn health(state: web::Data<AppState>) -> impl Responder {
    if state.catalog.is_healthy() {
        HttpResponse::Ok().finish()
    } else {
        HttpResponse::ServiceUnavailable().finish()
    }
}

#[derive(Serialize)]
pub struct ClusterStatusResponse {
    pub is_leader: bool,
    pub leader_id: Option<String>,
    #[serde(flatten)]
    pub status: beacon_cluster::ClusterStatus,
}

pub async fn cluster_status(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(ClusterStatusResponse {
        is_leader: state.cluster_manager.is_leader(),
        leader_id: state.cluster_manager.elect_leader(),
        status: state.cluster_manager.cluster_status(),
    })
}

#[derive(Deserialize)]
pub struct AddNodeRequest {
    pub host: String,
    pub port: u16,
}

pub async fn add_cluster_node(state: web::Data<AppState>, body: web::Json<AddNodeRequest>) -> impl Responder {
    state.cluster_manager.add_node(beacon_cluster::ClusterNode::new(body.host.clone(), body.port));
    HttpResponse::Created().finish()
}

pub async fn remove_cluster_node(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    state.cluster_manager.remove_node(&path.into_inner());
    HttpResponse::NoContent().finish()
}

pub async fn receive_gossip_event(state: web::Data<AppState>, body: web::Json<GossipMessage>) -> impl Responder {
    state.cluster_sync.receive(body.into_inner());
    HttpResponse::Ok().finish()
}

pub async fn internal_cluster_health() -> impl Responder {
    HttpResponse::Ok().finish()
}

pub async fn cluster_snapshot(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.cluster_sync.snapshot())
}

pub async fn not_found(req: HttpRequest) -> impl Responder {
    error_response(RegistryError::invalid("no such route"), req.path())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .service(
            web::scope("/api/v1")
                .route("/services", web::get().to(list_services))
                .route("/catalog", web::get().to(list_services))
                .route("/stats", web::get().to(statistics))
                .route("/cluster", web::get().to(cluster_status))
                .route("/cluster/nodes", web::post().to(add_cluster_node))
                .route("/cluster/nodes/{nodeId}", web::delete().to(remove_cluster_node))
                .route("/services/{serviceId}/instances", web::post().to(register_instance))
                .route("/services/{serviceId}/instances", web::get().to(list_instances))
                .route("/services/{serviceId}/instances/{instanceId}", web::get().to(get_instance))
                .route("/services/{serviceId}/instances/{instanceId}", web::delete().to(deregister_instance))
                .route(
                    "/services/{serviceId}/instances/{instanceId}/heartbeat",
                    web::put().to(renew_instance),
                )
                .route(
                    "/services/{serviceId}/instances/{instanceId}/status",
                    web::put().to(update_instance_status),
                )
                .route("/services/{serviceId}/events", web::get().to(watch_service_events)),
        )
        .service(
            web::scope("/internal/cluster")
                .route("/health", web::get().to(internal_cluster_health))
                .route("/events", web::post().to(receive_gossip_event))
                .route("/snapshot", web::get().to(cluster_snapshot)),
        )
        .default_service(web::route().to(not_found));
}
