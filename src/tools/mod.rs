//! Tool registration & logging facade: composes the fan-out
//! engine, client factory, classifiers, and scrubber into the six named
//! tools, timing every invocation and emitting one structured log line per
//! outcome. Generalizes a single-cluster, sequential inspection runner into
//! a registry of independently dispatchable, fleet-aware handlers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::classifiers::{pdb_risk, pod_health, pressure, upgrade_duration, upgrade_progress, upgrade_status};
use crate::clients::{ClientError, ClientFactory};
use crate::config::ClusterRegistry;
use crate::domain::{Envelope, ThresholdBundle, ToolError};
use crate::fanout::{self, CancellationToken, ClusterOutcome};
use crate::scrub::Scrubber;
use crate::validation::{self, PdbMode, StatusFilter, ValidationError};

pub struct ToolContext {
    pub registry: ClusterRegistry,
    pub thresholds: ThresholdBundle,
    pub factory: Arc<ClientFactory>,
    pub scrubber: Scrubber,
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(registry: ClusterRegistry, thresholds: ThresholdBundle) -> Self {
        let subscription_ids = registry.all().map(|c| c.subscription_id.clone()).collect();
        let cluster_fqdns = registry
            .all()
            .map(|c| format!("{}.hcp.{}.azmk8s.io", c.cluster_name, c.region))
            .collect();
        Self {
            registry,
            thresholds,
            factory: Arc::new(ClientFactory::new()),
            scrubber: Scrubber::new(subscription_ids, cluster_fqdns),
            cancellation: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FleetPayload<T> {
    pub clusters: Vec<T>,
}

fn validation_error_envelope(err: ValidationError) -> Value {
    let envelope = Envelope::new(
        serde_json::json!({}),
        vec![ToolError::fatal("validation", "", err.to_string())],
        false,
    );
    serde_json::to_value(envelope).unwrap()
}

fn cluster_resolution_error(err: crate::config::ConfigError) -> Value {
    let envelope = Envelope::new(
        serde_json::json!({}),
        vec![ToolError::fatal("config", "", err.to_string())],
        false,
    );
    serde_json::to_value(envelope).unwrap()
}

/// Dispatch one named tool call, timing it and emitting one structured log
/// line on both success and failure.
pub async fn dispatch(ctx: &ToolContext, tool: &str, params: Value) -> Value {
    let start = Instant::now();
    let cluster_arg = params.get("cluster").and_then(Value::as_str).unwrap_or("all").to_string();

    // A stale cancellation from a previous, already-finished call must never
    // carry over and short-circuit this one.
    ctx.cancellation.reset();

    let result = run_tool(ctx, tool, &params).await;
    let elapsed_ms = start.elapsed().as_millis();

    match &result {
        Ok(value) => {
            log::info!(
                "tool={} cluster={} elapsed_ms={} outcome=ok",
                tool,
                cluster_arg,
                elapsed_ms
            );
            ctx.scrubber.scrub_json(value).unwrap_or_else(|_| value.clone())
        }
        Err(scrubbed_error) => {
            log::warn!(
                "tool={} cluster={} elapsed_ms={} outcome=error error={}",
                tool,
                cluster_arg,
                elapsed_ms,
                scrubbed_error
            );
            serde_json::to_value(Envelope::new(
                serde_json::json!({}),
                vec![ToolError::fatal("validation", cluster_arg, scrubbed_error.clone())],
                false,
            ))
            .unwrap()
        }
    }
}

async fn run_tool(ctx: &ToolContext, tool: &str, params: &Value) -> Result<Value, String> {
    let cluster_arg = params.get("cluster").and_then(Value::as_str).unwrap_or("all");

    let value = match tool {
        "check_node_pool_pressure" => check_node_pool_pressure(ctx, cluster_arg).await,
        "get_pod_health" => {
            let namespace = params.get("namespace").and_then(Value::as_str);
            let status_filter = params.get("status_filter").and_then(Value::as_str).unwrap_or("all");
            get_pod_health(ctx, cluster_arg, namespace, status_filter).await
        }
        "get_kubernetes_upgrade_status" => get_kubernetes_upgrade_status(ctx, cluster_arg).await,
        "get_upgrade_progress" => {
            let node_pool = params.get("node_pool").and_then(Value::as_str);
            get_upgrade_progress(ctx, cluster_arg, node_pool).await
        }
        "get_upgrade_duration_metrics" => {
            let node_pool = params.get("node_pool").and_then(Value::as_str).unwrap_or("");
            let history_count = params.get("history_count").and_then(Value::as_u64).unwrap_or(10) as u32;
            get_upgrade_duration_metrics(ctx, cluster_arg, node_pool, history_count).await
        }
        "check_pdb_upgrade_risk" => {
            let node_pool = params.get("node_pool").and_then(Value::as_str);
            let mode = params.get("mode").and_then(Value::as_str).unwrap_or("preflight");
            check_pdb_upgrade_risk(ctx, cluster_arg, node_pool, mode).await
        }
        other => return Err(format!("unknown tool '{other}'")),
    };
    Ok(value)
}

async fn check_node_pool_pressure(ctx: &ToolContext, cluster_arg: &str) -> Value {
    let targets = match ctx.registry.resolve_target(cluster_arg) {
        Ok(t) => t,
        Err(e) => return cluster_resolution_error(e),
    };

    let factory = ctx.factory.clone();
    let thresholds = ctx.thresholds;
    let results = fanout::dispatch(targets, &ctx.cancellation, |cluster| {
        let factory = factory.clone();
        async move {
            let clients = match factory.get(cluster).await {
                Ok(c) => c,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let nodes = match clients.node_pods.list_nodes().await {
                Ok(n) => n,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let pods = match clients.node_pods.list_pods(None).await {
                Ok(p) => p,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let metrics = clients.metrics.list_node_metrics().await.ok();
            let metrics_failed = metrics.is_none();
            let (report, mut warnings) = pressure::classify(&cluster.cluster_id, &nodes, &pods, metrics.as_deref(), &thresholds);
            if metrics_failed {
                warnings.push(ToolError::new("metrics-api", cluster.cluster_id.clone(), "metrics endpoint not reachable"));
            }
            ClusterOutcome::Ok((report, warnings))
        }
    })
    .await;

    let mut payloads = Vec::new();
    let mut errors = Vec::new();
    for (_, outcome) in results {
        match outcome {
            ClusterOutcome::Ok((report, warnings)) => {
                payloads.push(report);
                errors.extend(warnings);
            }
            ClusterOutcome::Err(err) => errors.push(err),
        }
    }

    let has_payload = !payloads.is_empty();
    let envelope = Envelope::new(FleetPayload { clusters: payloads }, errors, has_payload);
    serde_json::to_value(envelope).unwrap()
}

async fn get_pod_health(ctx: &ToolContext, cluster_arg: &str, namespace: Option<&str>, status_filter: &str) -> Value {
    if let Some(ns) = namespace {
        if let Err(e) = validation::validate_namespace(ns) {
            return validation_error_envelope(e);
        }
    }
    let filter = match validation::validate_status_filter(status_filter) {
        Ok(f) => f,
        Err(e) => return validation_error_envelope(e),
    };

    let targets = match ctx.registry.resolve_target(cluster_arg) {
        Ok(t) => t,
        Err(e) => return cluster_resolution_error(e),
    };

    let factory = ctx.factory.clone();
    let namespace_owned = namespace.map(str::to_string);
    let results = fanout::dispatch(targets, &ctx.cancellation, |cluster| {
        let factory = factory.clone();
        let namespace_owned = namespace_owned.clone();
        async move {
            let clients = match factory.get(cluster).await {
                Ok(c) => c,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let pods = match clients.node_pods.list_pods(namespace_owned.as_deref()).await {
                Ok(p) => p,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let events = clients.events.list_pod_events(namespace_owned.as_deref()).await.unwrap_or_default();
            let report = pod_health::classify(&cluster.cluster_id, &pods, &events, namespace_owned.as_deref(), filter);
            ClusterOutcome::Ok(report)
        }
    })
    .await;

    let (payloads, errors) = fanout::split(results);
    let has_payload = !payloads.is_empty();
    let envelope = Envelope::new(FleetPayload { clusters: payloads }, errors, has_payload);
    serde_json::to_value(envelope).unwrap()
}

async fn get_kubernetes_upgrade_status(ctx: &ToolContext, cluster_arg: &str) -> Value {
    let targets = match ctx.registry.resolve_target(cluster_arg) {
        Ok(t) => t,
        Err(e) => return cluster_resolution_error(e),
    };

    let factory = ctx.factory.clone();
    let results = fanout::dispatch(targets, &ctx.cancellation, |cluster| {
        let factory = factory.clone();
        async move {
            let clients = match factory.get(cluster).await {
                Ok(c) => c,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let description = match clients.control_plane.describe_cluster().await {
                Ok(d) => d,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let profile = match clients.control_plane.upgrade_profile().await {
                Ok(p) => p,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let report = upgrade_status::classify(&cluster.cluster_id, &description, &profile, Utc::now());
            ClusterOutcome::Ok(report)
        }
    })
    .await;

    let (payloads, errors) = fanout::split(results);
    let has_payload = !payloads.is_empty();
    let envelope = Envelope::new(FleetPayload { clusters: payloads }, errors, has_payload);
    serde_json::to_value(envelope).unwrap()
}

async fn get_upgrade_progress(ctx: &ToolContext, cluster_arg: &str, node_pool: Option<&str>) -> Value {
    if let Some(pool) = node_pool {
        if let Err(e) = validation::validate_pool_name(pool) {
            return validation_error_envelope(e);
        }
    }

    let targets = match ctx.registry.resolve_target(cluster_arg) {
        Ok(t) => t,
        Err(e) => return cluster_resolution_error(e),
    };

    let factory = ctx.factory.clone();
    let thresholds = ctx.thresholds;
    let pool_owned = node_pool.map(str::to_string);
    let results = fanout::dispatch(targets, &ctx.cancellation, |cluster| {
        let factory = factory.clone();
        let pool_owned = pool_owned.clone();
        async move {
            let clients = match factory.get(cluster).await {
                Ok(c) => c,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };

            // A failed control-plane description is non-fatal here: report
            // upgrade_in_progress=false with a ToolError attached, rather
            // than aborting this cluster's whole result.
            let description = match clients.control_plane.describe_cluster().await {
                Ok(d) => d,
                Err(e) => {
                    let err = client_error(&cluster.cluster_id, &e);
                    let report = upgrade_progress::UpgradeProgressReport {
                        cluster: cluster.cluster_id.clone(),
                        upgrade_in_progress: false,
                        nodes: vec![],
                        total_nodes: None,
                        upgraded_nodes: None,
                        remaining_nodes: None,
                        elapsed_seconds: None,
                        estimated_remaining_seconds: None,
                        anomaly: None,
                        pod_transitions: None,
                        summary: "control-plane description unavailable".to_string(),
                    };
                    return ClusterOutcome::Ok((report, Some(err)));
                }
            };

            let upgrading_pools: Vec<&str> = description
                .pool_versions
                .iter()
                .filter(|p| p.is_upgrading)
                .filter(|p| pool_owned.as_deref().map(|wanted| wanted == p.pool_name).unwrap_or(true))
                .map(|p| p.pool_name.as_str())
                .collect();
            let upgrade_in_progress = !upgrading_pools.is_empty();

            let nodes = clients.node_pods.list_nodes().await.unwrap_or_default();
            let nodes: Vec<_> = nodes
                .into_iter()
                .filter(|n| {
                    pool_owned
                        .as_deref()
                        .map(|wanted| n.pool.as_deref() == Some(wanted))
                        .unwrap_or(true)
                })
                .collect();
            let events = clients.events.list_node_events().await.unwrap_or_default();
            let pdbs = clients.policy.list_pdbs().await.unwrap_or_default();
            let pods = clients.node_pods.list_pods(None).await.unwrap_or_default();

            let live_report = pdb_risk::live(&cluster.cluster_id, &nodes, &pods, &pdbs, &events, Utc::now());

            let mut pods_by_node: BTreeMap<String, Vec<_>> = BTreeMap::new();
            for pod in &pods {
                if let Some(node_name) = &pod.node {
                    pods_by_node.entry(node_name.clone()).or_default().push(pod.clone());
                }
            }

            let target_version = description.target_version.as_deref();
            let report = upgrade_progress::classify(
                &cluster.cluster_id,
                upgrade_in_progress,
                &nodes,
                target_version,
                &events,
                &live_report.blocks,
                &pods_by_node,
                &thresholds,
                Utc::now(),
            );
            ClusterOutcome::Ok((report, None))
        }
    })
    .await;

    let mut payloads = Vec::new();
    let mut errors = Vec::new();
    for (_, outcome) in results {
        match outcome {
            ClusterOutcome::Ok((report, maybe_err)) => {
                payloads.push(report);
                if let Some(err) = maybe_err {
                    errors.push(err);
                }
            }
            ClusterOutcome::Err(err) => errors.push(err),
        }
    }

    let has_payload = !payloads.is_empty();
    let envelope = Envelope::new(FleetPayload { clusters: payloads }, errors, has_payload);
    serde_json::to_value(envelope).unwrap()
}

async fn get_upgrade_duration_metrics(ctx: &ToolContext, cluster_arg: &str, node_pool: &str, history_count: u32) -> Value {
    if let Err(e) = validation::validate_pool_name(node_pool) {
        return validation_error_envelope(e);
    }
    if let Err(e) = validation::validate_history_count(history_count) {
        return validation_error_envelope(e);
    }

    let targets = match ctx.registry.resolve_target(cluster_arg) {
        Ok(t) => t,
        Err(e) => return cluster_resolution_error(e),
    };

    let factory = ctx.factory.clone();
    let thresholds = ctx.thresholds;
    let node_pool_owned = node_pool.to_string();
    let results = fanout::dispatch(targets, &ctx.cancellation, |cluster| {
        let factory = factory.clone();
        let node_pool_owned = node_pool_owned.clone();
        async move {
            let clients = match factory.get(cluster).await {
                Ok(c) => c,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let events = clients.events.list_node_events().await.unwrap_or_default();
            let historical = match clients.control_plane.historical_upgrades(history_count).await {
                Ok(h) => h,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let report = upgrade_duration::classify(
                &cluster.cluster_id,
                &node_pool_owned,
                &events,
                &historical,
                history_count,
                &thresholds,
            );
            ClusterOutcome::Ok(report)
        }
    })
    .await;

    let (payloads, errors) = fanout::split(results);
    let has_payload = !payloads.is_empty();
    let envelope = Envelope::new(FleetPayload { clusters: payloads }, errors, has_payload);
    serde_json::to_value(envelope).unwrap()
}

async fn check_pdb_upgrade_risk(ctx: &ToolContext, cluster_arg: &str, node_pool: Option<&str>, mode: &str) -> Value {
    if let Some(pool) = node_pool {
        if let Err(e) = validation::validate_pool_name(pool) {
            return validation_error_envelope(e);
        }
    }
    let mode = match validation::validate_mode(mode) {
        Ok(m) => m,
        Err(e) => return validation_error_envelope(e),
    };

    let targets = match ctx.registry.resolve_target(cluster_arg) {
        Ok(t) => t,
        Err(e) => return cluster_resolution_error(e),
    };

    let factory = ctx.factory.clone();
    let pool_owned = node_pool.map(str::to_string);
    let results = fanout::dispatch(targets, &ctx.cancellation, |cluster| {
        let factory = factory.clone();
        let pool_owned = pool_owned.clone();
        async move {
            let clients = match factory.get(cluster).await {
                Ok(c) => c,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };
            let pdbs = match clients.policy.list_pdbs().await {
                Ok(p) => p,
                Err(e) => return ClusterOutcome::Err(client_error(&cluster.cluster_id, &e)),
            };

            match mode {
                PdbMode::Preflight => {
                    let pool_pod_labels = if let Some(pool) = &pool_owned {
                        let nodes = clients.node_pods.list_nodes().await.unwrap_or_default();
                        let pods = clients.node_pods.list_pods(None).await.unwrap_or_default();
                        let pool_node_names: std::collections::HashSet<_> = nodes
                            .iter()
                            .filter(|n| n.pool.as_deref() == Some(pool.as_str()))
                            .map(|n| n.name.clone())
                            .collect();
                        Some(
                            pods.iter()
                                .filter(|p| p.node.as_ref().map(|n| pool_node_names.contains(n)).unwrap_or(false))
                                .map(|p| p.labels.clone())
                                .collect::<Vec<_>>(),
                        )
                    } else {
                        None
                    };
                    let report = pdb_risk::preflight(&cluster.cluster_id, &pdbs, pool_pod_labels.as_deref());
                    ClusterOutcome::Ok(PdbRiskPayload::Preflight(report))
                }
                PdbMode::Live => {
                    let nodes = clients.node_pods.list_nodes().await.unwrap_or_default();
                    let nodes: Vec<_> = nodes
                        .into_iter()
                        .filter(|n| {
                            pool_owned
                                .as_deref()
                                .map(|wanted| n.pool.as_deref() == Some(wanted))
                                .unwrap_or(true)
                        })
                        .collect();
                    let pods = clients.node_pods.list_pods(None).await.unwrap_or_default();
                    let events = clients.events.list_node_events().await.unwrap_or_default();
                    let report = pdb_risk::live(&cluster.cluster_id, &nodes, &pods, &pdbs, &events, Utc::now());
                    ClusterOutcome::Ok(PdbRiskPayload::Live(report))
                }
            }
        }
    })
    .await;

    let (payloads, errors) = fanout::split(results);
    let has_payload = !payloads.is_empty();
    let envelope = Envelope::new(FleetPayload { clusters: payloads }, errors, has_payload);
    serde_json::to_value(envelope).unwrap()
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum PdbRiskPayload {
    Preflight(pdb_risk::PreflightReport),
    Live(pdb_risk::LiveReport),
}

fn client_error(cluster_id: &str, e: &ClientError) -> ToolError {
    ToolError::new(e.source_tag(), cluster_id, e.to_string())
}
