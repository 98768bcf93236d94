//! Switchyard API server
//!
//! Thin axum handlers over the OVS topology engine: hosts, bridges, ports,
//! bonds, VLANs, mirrors, flow export, workloads, port mappings and the
//! per-host cache. Handlers delegate to the services; no business logic
//! lives here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use switchyard_api::config::SwitchyardConfig;
use switchyard_api::db::Database;
use switchyard_api::error::ApiError;
use switchyard_api::logging::LoggingConfig;
use switchyard_api::ovs::flow_export::FlowExportService;
use switchyard_api::ovs::OvsService;
use switchyard_api::remote::SshShell;
use switchyard_api::state::{AppState, HostLocks};
use switchyard_common::{
    ConfigureFlowExportRequest, CreateBondRequest, CreateBridgeRequest, CreateMirrorRequest,
    CreatePortRequest, DeleteMirrorRequest, Error, FlowProtocol, HostConfig, SetVlanRequest,
};

const CACHE_CATEGORIES: [&str; 4] = ["bridges", "mirrors", "vms", "containers"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SwitchyardConfig::load();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let _log_guard = LoggingConfig::from_settings(&config.logging)
        .init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    info!("Configuration loaded");

    let database = Arc::new(Database::new(&config.database.url).await?);
    database.migrate().await?;
    info!("Database initialized");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState {
        config: Arc::new(config),
        database,
        host_locks: HostLocks::new(),
    });

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = TcpListener::bind(&addr).await?;
    info!("Switchyard API listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        // Hosts
        .route("/api/hosts", get(list_hosts))
        .route("/api/hosts", post(create_host))
        .route("/api/hosts/:host_id", delete(delete_host))
        // Bridges
        .route("/api/hosts/:host_id/bridges", get(list_bridges))
        .route("/api/hosts/:host_id/bridges", post(create_bridge))
        .route("/api/hosts/:host_id/bridges/:name", get(get_bridge))
        .route("/api/hosts/:host_id/bridges/:name", put(update_bridge))
        .route("/api/hosts/:host_id/bridges/:name", delete(delete_bridge))
        .route("/api/hosts/:host_id/bridges/:name/flush-fdb", post(flush_bridge_fdb))
        // Ports
        .route("/api/hosts/:host_id/bridges/:name/ports", post(add_port))
        .route("/api/hosts/:host_id/bridges/:name/ports/:port", delete(delete_port))
        .route("/api/hosts/:host_id/ports/:port", get(get_port))
        .route("/api/hosts/:host_id/ports/:port", put(update_port))
        .route("/api/hosts/:host_id/ports/:port/vlan", put(set_port_vlan))
        .route("/api/hosts/:host_id/interfaces", get(list_available_interfaces))
        .route("/api/hosts/:host_id/interfaces/:iface/stats", get(interface_stats))
        // Bonds
        .route("/api/hosts/:host_id/bridges/:name/bonds", post(create_bond))
        .route("/api/hosts/:host_id/bonds/:bond/status", get(bond_status))
        .route("/api/hosts/:host_id/bonds/:bond/lacp", get(lacp_status))
        // Mirrors
        .route("/api/hosts/:host_id/mirrors", get(list_mirrors))
        .route("/api/hosts/:host_id/mirrors", post(create_mirror))
        .route("/api/hosts/:host_id/mirrors", delete(delete_mirror))
        .route("/api/hosts/:host_id/mirrors/:name/statistics", get(mirror_statistics))
        .route("/api/hosts/:host_id/bridges/:name/mirrors/clear", post(clear_bridge_mirrors))
        // Flow export
        .route(
            "/api/hosts/:host_id/bridges/:name/flow-export/:protocol",
            get(get_flow_export).post(configure_flow_export).delete(disable_flow_export),
        )
        // Workloads
        .route("/api/hosts/:host_id/vms", get(list_vms))
        .route("/api/hosts/:host_id/containers", get(list_containers))
        // Port mappings
        .route("/api/hosts/:host_id/port-mappings", get(get_port_mappings))
        .route("/api/hosts/:host_id/port-mappings/refresh", post(refresh_port_mappings))
        // Cache and refresh
        .route("/api/hosts/:host_id/refresh", post(refresh_host))
        .route("/api/hosts/:host_id/cache/:category", delete(invalidate_cache))
        .with_state(state)
}

fn shell_for(state: &AppState, host: &HostConfig) -> SshShell {
    SshShell::new(
        host.clone(),
        Duration::from_secs(state.config.ssh.connect_timeout_secs),
        Duration::from_secs(state.config.ssh.command_timeout_secs),
    )
}

async fn host_and_shell(
    state: &AppState,
    host_id: &str,
) -> Result<(HostConfig, SshShell), ApiError> {
    let host = state.database.get_host(host_id).await?;
    let shell = shell_for(state, &host);
    Ok((host, shell))
}

fn parse_protocol(protocol: &str) -> Result<FlowProtocol, ApiError> {
    match protocol {
        "netflow" => Ok(FlowProtocol::Netflow),
        "sflow" => Ok(FlowProtocol::Sflow),
        "ipfix" => Ok(FlowProtocol::Ipfix),
        other => Err(ApiError::BadRequest(format!(
            "Unknown flow export protocol '{}'. Must be one of: netflow, sflow, ipfix",
            other
        ))),
    }
}

#[derive(Deserialize)]
struct RefreshQuery {
    #[serde(default)]
    refresh: bool,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

// ======================
// Hosts
// ======================

async fn list_hosts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HostConfig>>, ApiError> {
    let hosts = state
        .database
        .list_hosts()
        .await?
        .into_iter()
        .map(|mut host| {
            host.password = None;
            host
        })
        .collect();
    Ok(Json(hosts))
}

async fn create_host(
    State(state): State<Arc<AppState>>,
    Json(host): Json<HostConfig>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if host.name.is_empty() || host.hostname.is_empty() || host.username.is_empty() {
        return Err(ApiError::ValidationError(
            "name, hostname and username are required".to_string(),
        ));
    }
    if state.database.get_host(&host.name).await.is_ok() {
        return Err(ApiError::Conflict(format!(
            "Host '{}' already exists",
            host.name
        )));
    }
    state.database.create_host(&host).await?;
    Ok((StatusCode::CREATED, Json(json!({ "name": host.name }))))
}

async fn delete_host(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.database.delete_host(&host_id).await?;
    for category in CACHE_CATEGORIES {
        let _ = state.database.invalidate_cache(&host_id, category).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

// ======================
// Bridges
// ======================

async fn list_bridges(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !query.refresh {
        if let Some(entry) = state.database.get_cache(&host_id, "bridges").await? {
            return Ok(Json(entry.data));
        }
    }

    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let bridges = OvsService::new(&shell).bridges().await?;
    let data = serde_json::to_value(&bridges)?;
    state.database.put_cache(&host_id, "bridges", &data).await?;
    Ok(Json(data))
}

async fn get_bridge(
    State(state): State<Arc<AppState>>,
    Path((host_id, name)): Path<(String, String)>,
) -> Result<Json<switchyard_common::BridgeDetail>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let detail = OvsService::new(&shell).bridge_details(&name).await?;
    Ok(Json(detail))
}

async fn create_bridge(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
    Json(request): Json<CreateBridgeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;

    // One bridge mutation per host at a time: the interfaces-file edit must
    // not race another edit of the same file.
    let _guard = state.host_locks.acquire(&host_id).await;
    OvsService::new(&shell).create_bridge(&request).await?;
    drop(_guard);

    let _ = state.database.invalidate_cache(&host_id, "bridges").await;
    Ok((StatusCode::CREATED, Json(json!({ "name": request.name }))))
}

async fn update_bridge(
    State(state): State<Arc<AppState>>,
    Path((host_id, name)): Path<(String, String)>,
    Json(properties): Json<BTreeMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    OvsService::new(&shell).update_bridge(&name, &properties).await?;
    let _ = state.database.invalidate_cache(&host_id, "bridges").await;
    Ok(Json(json!({ "status": "success" })))
}

async fn delete_bridge(
    State(state): State<Arc<AppState>>,
    Path((host_id, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;

    let _guard = state.host_locks.acquire(&host_id).await;
    OvsService::new(&shell).delete_bridge(&name).await?;
    drop(_guard);

    let _ = state.database.invalidate_cache(&host_id, "bridges").await;
    Ok(StatusCode::NO_CONTENT)
}

async fn flush_bridge_fdb(
    State(state): State<Arc<AppState>>,
    Path((host_id, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    OvsService::new(&shell).flush_bridge_fdb(&name).await?;
    Ok(Json(json!({ "status": "success" })))
}

// ======================
// Ports
// ======================

async fn add_port(
    State(state): State<Arc<AppState>>,
    Path((host_id, name)): Path<(String, String)>,
    Json(request): Json<CreatePortRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    OvsService::new(&shell).add_port(&name, &request).await?;
    let _ = state.database.invalidate_cache(&host_id, "bridges").await;
    Ok((StatusCode::CREATED, Json(json!({ "name": request.name }))))
}

async fn delete_port(
    State(state): State<Arc<AppState>>,
    Path((host_id, name, port)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    OvsService::new(&shell).delete_port(&name, &port).await?;
    let _ = state.database.invalidate_cache(&host_id, "bridges").await;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_port(
    State(state): State<Arc<AppState>>,
    Path((host_id, port)): Path<(String, String)>,
) -> Result<Json<switchyard_common::PortDetail>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let detail = OvsService::new(&shell).port_details(&port).await?;
    Ok(Json(detail))
}

async fn update_port(
    State(state): State<Arc<AppState>>,
    Path((host_id, port)): Path<(String, String)>,
    Json(properties): Json<BTreeMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    OvsService::new(&shell).update_port(&port, &properties).await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn set_port_vlan(
    State(state): State<Arc<AppState>>,
    Path((host_id, port)): Path<(String, String)>,
    Json(request): Json<SetVlanRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    OvsService::new(&shell).set_port_vlan(&port, &request).await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn list_available_interfaces(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let interfaces = OvsService::new(&shell).available_interfaces().await?;
    Ok(Json(interfaces))
}

async fn interface_stats(
    State(state): State<Arc<AppState>>,
    Path((host_id, iface)): Path<(String, String)>,
) -> Result<Json<switchyard_common::InterfaceStats>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let stats = OvsService::new(&shell).interface_stats(&iface).await?;
    Ok(Json(stats))
}

// ======================
// Bonds
// ======================

async fn create_bond(
    State(state): State<Arc<AppState>>,
    Path((host_id, name)): Path<(String, String)>,
    Json(request): Json<CreateBondRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    OvsService::new(&shell).create_bond(&name, &request).await?;
    let _ = state.database.invalidate_cache(&host_id, "bridges").await;
    Ok((StatusCode::CREATED, Json(json!({ "name": request.name }))))
}

async fn bond_status(
    State(state): State<Arc<AppState>>,
    Path((host_id, bond)): Path<(String, String)>,
) -> Result<Json<switchyard_common::BondStatus>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let status = OvsService::new(&shell).bond_status(&bond).await?;
    Ok(Json(status))
}

async fn lacp_status(
    State(state): State<Arc<AppState>>,
    Path((host_id, bond)): Path<(String, String)>,
) -> Result<Json<switchyard_common::LacpStatus>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let status = OvsService::new(&shell).lacp_status(&bond).await?;
    Ok(Json(status))
}

// ======================
// Mirrors
// ======================

async fn list_mirrors(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !query.refresh {
        if let Some(entry) = state.database.get_cache(&host_id, "mirrors").await? {
            return Ok(Json(entry.data));
        }
    }

    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let mirrors = OvsService::new(&shell).mirrors().await?;
    let data = serde_json::to_value(&mirrors)?;
    state.database.put_cache(&host_id, "mirrors", &data).await?;
    Ok(Json(data))
}

async fn create_mirror(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
    Json(request): Json<CreateMirrorRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    OvsService::new(&shell).create_mirror(&request).await?;
    let _ = state.database.invalidate_cache(&host_id, "mirrors").await;
    Ok((StatusCode::CREATED, Json(json!({ "name": request.name }))))
}

async fn delete_mirror(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
    Json(request): Json<DeleteMirrorRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    OvsService::new(&shell).delete_mirror(&request).await?;
    let _ = state.database.invalidate_cache(&host_id, "mirrors").await;
    Ok(Json(json!({ "status": "success" })))
}

async fn clear_bridge_mirrors(
    State(state): State<Arc<AppState>>,
    Path((host_id, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    OvsService::new(&shell).clear_bridge_mirrors(&name).await?;
    let _ = state.database.invalidate_cache(&host_id, "mirrors").await;
    Ok(Json(json!({ "status": "success" })))
}

async fn mirror_statistics(
    State(state): State<Arc<AppState>>,
    Path((host_id, name)): Path<(String, String)>,
) -> Result<Json<BTreeMap<String, u64>>, ApiError> {
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let stats = OvsService::new(&shell).mirror_statistics(&name).await?;
    Ok(Json(stats))
}

// ======================
// Flow export
// ======================

async fn configure_flow_export(
    State(state): State<Arc<AppState>>,
    Path((host_id, name, protocol)): Path<(String, String, String)>,
    Json(request): Json<ConfigureFlowExportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let protocol = parse_protocol(&protocol)?;
    if request.targets.is_empty() {
        return Err(ApiError::ValidationError(
            "at least one collector target is required".to_string(),
        ));
    }
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    FlowExportService::new(&shell)
        .configure(protocol, &name, &request)
        .await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn get_flow_export(
    State(state): State<Arc<AppState>>,
    Path((host_id, name, protocol)): Path<(String, String, String)>,
) -> Result<Json<switchyard_common::FlowExportConfig>, ApiError> {
    let protocol = parse_protocol(&protocol)?;
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let config = FlowExportService::new(&shell)
        .get(protocol, &name)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "No {} export configured on bridge '{}'",
                protocol, name
            ))
        })?;
    Ok(Json(config))
}

async fn disable_flow_export(
    State(state): State<Arc<AppState>>,
    Path((host_id, name, protocol)): Path<(String, String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let protocol = parse_protocol(&protocol)?;
    let (_, shell) = host_and_shell(&state, &host_id).await?;
    FlowExportService::new(&shell).disable(protocol, &name).await?;
    Ok(Json(json!({ "status": "success" })))
}

// ======================
// Workloads
// ======================

async fn list_vms(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !query.refresh {
        if let Some(entry) = state.database.get_cache(&host_id, "vms").await? {
            return Ok(Json(entry.data));
        }
    }

    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let vms = OvsService::new(&shell).vms().await?;
    let data = serde_json::to_value(&vms)?;
    state.database.put_cache(&host_id, "vms", &data).await?;
    Ok(Json(data))
}

async fn list_containers(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !query.refresh {
        if let Some(entry) = state.database.get_cache(&host_id, "containers").await? {
            return Ok(Json(entry.data));
        }
    }

    let (_, shell) = host_and_shell(&state, &host_id).await?;
    let containers = OvsService::new(&shell).containers().await?;
    let data = serde_json::to_value(&containers)?;
    state
        .database
        .put_cache(&host_id, "containers", &data)
        .await?;
    Ok(Json(data))
}

// ======================
// Port mappings
// ======================

async fn get_port_mappings(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
) -> Result<Json<switchyard_common::PortMapping>, ApiError> {
    let mapping = state
        .database
        .load_port_mapping(&host_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "No port mapping cached for host '{}'. Refresh it first.",
                host_id
            ))
        })?;
    Ok(Json(mapping))
}

async fn refresh_port_mappings(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
) -> Result<Json<switchyard_common::PortMapping>, ApiError> {
    let (host, shell) = host_and_shell(&state, &host_id).await?;
    let mapping = OvsService::new(&shell).port_mapping(&host).await?;
    state.database.save_port_mapping(&mapping).await?;
    Ok(Json(mapping))
}

// ======================
// Cache and refresh
// ======================

async fn refresh_host(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (host, shell) = host_and_shell(&state, &host_id).await?;
    let service = OvsService::new(&shell);

    let bridges = service.bridges().await?;
    let mirrors = service.mirrors().await?;
    let vms = service.vms().await?;
    let containers = match service.containers().await {
        Ok(containers) => containers,
        Err(Error::CommandFailed(msg)) => {
            warn!(host = %host_id, error = %msg, "container listing failed during refresh");
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    state
        .database
        .put_cache(&host_id, "bridges", &serde_json::to_value(&bridges)?)
        .await?;
    state
        .database
        .put_cache(&host_id, "mirrors", &serde_json::to_value(&mirrors)?)
        .await?;
    state
        .database
        .put_cache(&host_id, "vms", &serde_json::to_value(&vms)?)
        .await?;
    state
        .database
        .put_cache(&host_id, "containers", &serde_json::to_value(&containers)?)
        .await?;

    let mapping = service.port_mapping(&host).await?;
    state.database.save_port_mapping(&mapping).await?;

    Ok(Json(json!({
        "status": "success",
        "bridges_count": bridges.len(),
        "mirrors_count": mirrors.len(),
        "vms_count": vms.len(),
        "containers_count": containers.len(),
        "ports_mapped": mapping.ports.len(),
    })))
}

async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
    Path((host_id, category)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !CACHE_CATEGORIES.contains(&category.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "Invalid cache category. Must be one of: {}",
            CACHE_CATEGORIES.join(", ")
        )));
    }

    let deleted = state.database.invalidate_cache(&host_id, &category).await?;
    Ok(Json(json!({
        "status": "success",
        "deleted": deleted,
    })))
}
