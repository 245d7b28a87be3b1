//! Cluster Status Aggregator (§4.7): concurrent node probing with TTL
//! cache and stale-while-revalidate, keyed by `(view, includeMask)`.
//! Hand-rolled `tokio::sync::Mutex<HashMap<..>>` cache (no `moka`), in the
//! same shared-state style as the rest of this crate's locking.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fabric_model::{ClusterStatus, ClusterView, DgxStatus, GpuDeviceMetric, IncludeFlag, NodeMetrics, NodeRoute, NodeStatus};
use tokio::sync::Mutex;

use crate::error::ClusterStatusError;
use crate::exec::{Exec, ExecContext, ExecRequest};
use crate::inventory::Inventory;

pub type CacheKey = (ClusterView, BTreeSet<IncludeFlag>);

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub status: ClusterStatus,
    pub cached_at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Fresh,
    Stale,
    Miss,
}

pub struct StatusResponse {
    pub status: ClusterStatus,
    pub cache_state: CacheState,
    pub cache_age_ms: u64,
    pub stage_timings_ms: HashMap<&'static str, u64>,
}

struct Shared {
    exec: Arc<dyn Exec>,
    inventory: Arc<Inventory>,
    ttl: Duration,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    in_flight: Mutex<HashSet<CacheKey>>,
}

/// Cloneable handle; cheap to pass around the server's shared state since
/// everything mutable lives behind the inner `Arc`.
#[derive(Clone)]
pub struct ClusterStatusAggregator {
    shared: Arc<Shared>,
}

impl ClusterStatusAggregator {
    pub fn new(exec: Arc<dyn Exec>, inventory: Arc<Inventory>, ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                exec,
                inventory,
                ttl,
                cache: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    fn key(view: ClusterView, include: &[IncludeFlag]) -> CacheKey {
        (view, include.iter().copied().collect())
    }

    /// Entry point (§4.7 cache semantics). `force_refresh` always loads
    /// synchronously; otherwise fresh hits return cached, stale hits
    /// either return immediately (triggering a background refresh, with
    /// coalescing) when `allow_stale`, or load synchronously.
    pub async fn get(
        &self,
        view: ClusterView,
        include: &[IncludeFlag],
        force_refresh: bool,
        allow_stale: bool,
    ) -> Result<StatusResponse, ClusterStatusError> {
        let key = Self::key(view, include);

        if !force_refresh {
            let cached = self.shared.cache.lock().await.get(&key).cloned();
            if let Some(entry) = cached {
                let age = entry.cached_at.elapsed();
                if self.shared.ttl.is_zero() || age < self.shared.ttl {
                    return Ok(self.respond(entry, CacheState::Fresh));
                }
                if allow_stale {
                    self.maybe_spawn_refresh(key.clone(), view, include.to_vec());
                    return Ok(self.respond(entry, CacheState::Stale));
                }
            }
        }

        let (status, timings) = load_pipeline(&*self.shared.exec, &self.shared.inventory, view, include).await?;
        let entry = CacheEntry { status, cached_at: Instant::now() };
        self.shared.cache.lock().await.insert(key, entry.clone());
        let mut resp = self.respond(entry, CacheState::Miss);
        resp.stage_timings_ms = timings;
        Ok(resp)
    }

    fn respond(&self, entry: CacheEntry, cache_state: CacheState) -> StatusResponse {
        let cache_age_ms = entry.cached_at.elapsed().as_millis() as u64;
        StatusResponse { status: entry.status, cache_state, cache_age_ms, stage_timings_ms: HashMap::new() }
    }

    /// Coalesces concurrent refreshes for the same key (I4): only one
    /// background load per key may be in flight at a time.
    fn maybe_spawn_refresh(&self, key: CacheKey, view: ClusterView, include: Vec<IncludeFlag>) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            {
                let mut guard = shared.in_flight.lock().await;
                if guard.contains(&key) {
                    return;
                }
                guard.insert(key.clone());
            }
            let result = load_pipeline(&*shared.exec, &shared.inventory, view, &include).await;
            if let Ok((status, _)) = result {
                shared.cache.lock().await.insert(key.clone(), CacheEntry { status, cached_at: Instant::now() });
            }
            shared.in_flight.lock().await.remove(&key);
        });
    }
}

async fn load_pipeline(
    exec: &dyn Exec,
    inventory: &Inventory,
    view: ClusterView,
    include: &[IncludeFlag],
) -> Result<(ClusterStatus, HashMap<&'static str, u64>), ClusterStatusError> {
    let mut timings = HashMap::new();
    let t_probe = Instant::now();
    let nodes = inventory.sorted_for_probe();
    let probe_results = probe_all(exec, &nodes).await;
    timings.insert("probe", t_probe.elapsed().as_millis() as u64);

    let mut statuses: Vec<NodeStatus> = Vec::new();
    let include_metrics = include.contains(&IncludeFlag::Metrics);
    let include_storage = include.contains(&IncludeFlag::Storage);
    let include_dgx = include.contains(&IncludeFlag::Dgx);

    let t_metrics = Instant::now();
    for (node, reachable, latency_ms, error) in probe_results {
        let metrics = if include_metrics && reachable && view == ClusterView::Full {
            metrics_for(exec, node).await
        } else {
            None
        };
        let storage_present = if include_storage && reachable && view == ClusterView::Full {
            Some(storage_presence(exec, node).await)
        } else {
            None
        };
        let dgx = if include_dgx && reachable && view == ClusterView::Full {
            Some(dgx_probe(exec, node).await)
        } else {
            None
        };
        statuses.push(NodeStatus { id: node.id.clone(), reachable, latency_ms, error, metrics, storage_present, dgx });
    }
    timings.insert("metrics_storage_dgx", t_metrics.elapsed().as_millis() as u64);

    let local_id = inventory.local_node().map(|n| n.id.clone()).unwrap_or_default();
    let discovery_errored = statuses.is_empty();
    let overall = ClusterStatus::classify(&statuses, &local_id, discovery_errored);

    Ok((
        ClusterStatus { overall, nodes: statuses, generated_at_ms: chrono::Utc::now().timestamp_millis() },
        timings,
    ))
}

async fn probe_all<'a>(
    exec: &dyn Exec,
    nodes: &[&'a NodeRoute],
) -> Vec<(&'a NodeRoute, bool, Option<u64>, Option<String>)> {
    let tasks = nodes.iter().map(|node| async move {
        let ctx = ExecContext::with_timeout(Duration::from_secs(2));
        let start = Instant::now();
        let req = ExecRequest { host: node.id.clone(), is_local: false, script: "true".to_string() };
        let result = tokio::time::timeout(Duration::from_secs(8), exec.run(&ctx, req)).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(_)) => (*node, true, Some(latency_ms), None),
            Ok(Err(e)) => (*node, false, Some(latency_ms), Some(e.to_string())),
            Err(_) => (*node, false, None, Some("probe timed out".to_string())),
        }
    });
    futures::future::join_all(tasks).await
}

async fn metrics_for(exec: &dyn Exec, node: &NodeRoute) -> Option<NodeMetrics> {
    let ctx = ExecContext::with_timeout(Duration::from_secs(4));
    let cpu_req = ExecRequest {
        host: node.id.clone(),
        is_local: false,
        script: "a=$(cat /proc/stat | head -1); sleep 0.2; b=$(cat /proc/stat | head -1); echo \"$a|$b\"".to_string(),
    };
    let cpu_percent = exec.run(&ctx, cpu_req).await.ok().and_then(|o| parse_cpu_delta(&o.output_tail));

    let disk_req = ExecRequest { host: node.id.clone(), is_local: false, script: "df -Pk /".to_string() };
    let disk_free_kb = exec.run(&ctx, disk_req).await.ok().and_then(|o| parse_df(&o.output_tail));

    let gpu_req = ExecRequest {
        host: node.id.clone(),
        is_local: false,
        script: "nvidia-smi --query-gpu=memory.total,memory.used --format=csv,noheader,nounits".to_string(),
    };
    let gpus = exec.run(&ctx, gpu_req).await.map(|o| parse_gpu_csv(&o.output_tail)).unwrap_or_default();

    Some(NodeMetrics { cpu_percent, disk_free_kb, gpus })
}

fn parse_gpu_csv(output: &str) -> Vec<GpuDeviceMetric> {
    output
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let mut parts = line.split(',').map(str::trim);
            let total: u64 = parts.next()?.parse().ok()?;
            let used: u64 = parts.next()?.parse().ok()?;
            Some(GpuDeviceMetric { index: idx as u32, total_mib: total, used_mib: used })
        })
        .collect()
}

fn parse_cpu_delta(output: &str) -> Option<f64> {
    let (a, b) = output.trim().split_once('|')?;
    let parse_stat = |line: &str| -> Option<(u64, u64)> {
        let fields: Vec<u64> = line.split_whitespace().skip(1).filter_map(|f| f.parse().ok()).collect();
        if fields.len() < 4 {
            return None;
        }
        let idle = fields[3];
        let total: u64 = fields.iter().sum();
        Some((idle, total))
    };
    let (idle_a, total_a) = parse_stat(a)?;
    let (idle_b, total_b) = parse_stat(b)?;
    let total_delta = total_b.saturating_sub(total_a);
    if total_delta == 0 {
        return Some(0.0);
    }
    let idle_delta = idle_b.saturating_sub(idle_a);
    Some(100.0 * (1.0 - (idle_delta as f64 / total_delta as f64)))
}

fn parse_df(output: &str) -> Option<u64> {
    let line = output.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    fields.get(3)?.parse().ok()
}

async fn storage_presence(exec: &dyn Exec, node: &NodeRoute) -> std::collections::BTreeMap<String, bool> {
    const CACHE_PATHS: &[&str] = &["/mnt/shared/hf-cache", "/mnt/shared/models"];
    let ctx = ExecContext::with_timeout(Duration::from_secs(4));
    let mut out = std::collections::BTreeMap::new();
    for path in CACHE_PATHS {
        let req = ExecRequest {
            host: node.id.clone(),
            is_local: false,
            script: format!("test -d {}", shlex::try_quote(path).unwrap_or_default()),
        };
        let present = exec.run(&ctx, req).await.is_ok();
        out.insert((*path).to_string(), present);
    }
    out
}

/// Vendor-specific DGX update/reboot probe (§4.7 stage 5), own sub-timeout.
/// Swallows exec failures into `error` rather than aborting the pipeline —
/// this is a best-effort add-on, not load-bearing for `overall`.
async fn dgx_probe(exec: &dyn Exec, node: &NodeRoute) -> DgxStatus {
    let ctx = ExecContext::with_timeout(Duration::from_secs(4));
    let req = ExecRequest {
        host: node.id.clone(),
        is_local: false,
        script: "nv-hostengine --version >/dev/null 2>&1 && echo UPDATE_OK; [ -f /var/run/reboot-required ] && echo REBOOT_REQUIRED".to_string(),
    };
    match exec.run(&ctx, req).await {
        Ok(out) => DgxStatus {
            update_available: Some(!out.output_tail.contains("UPDATE_OK")),
            reboot_required: Some(out.output_tail.contains("REBOOT_REQUIRED")),
            error: None,
        },
        Err(e) => DgxStatus { update_available: None, reboot_required: None, error: Some(e.to_string()) },
    }
}
