//! Service loop: owns every long-lived subsystem and drives one cycle
//! (probe -> refresh stale WoT -> publish -> retention -> checkpoint) on
//! a fixed interval, the same shape as the teacher's background-task
//! spawning in `main.rs` generalized into its own module since this
//! crate has one cycle instead of several independent scrapers.

use crate::config::Config;
use crate::ingest::{monitor, report};
use crate::jurisdiction::JurisdictionResolver;
use crate::model::{now_unix, ProbeObservation, RelayUrl};
use crate::operator::OperatorResolver;
use crate::prober;
use crate::publish::{Publisher, RelayPool, PublishScheduler, DEFAULT_ACK_TIMEOUT};
use crate::scorer::score_relay;
use crate::store::Store;
use crate::wot::{TrustProvider, WotClient};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use nostr::Keys;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{info, warn};

const PROBE_BATCH_SETTLE_DELAY: Duration = Duration::from_millis(200);
const WOT_REFRESH_BATCH_SIZE: usize = 20;
const SCORING_WINDOW_SECS: i64 = 7 * 24 * 3600;

/// Bag of `Arc<...>` subsystem handles shared between the cycle-timer
/// task, the ingestors, and the HTTP API, grounded on the teacher's
/// `AppState` in `main.rs`.
pub struct AppState {
    pub store: Arc<Store>,
    pub wot: Arc<WotClient>,
    pub pool: Option<Arc<RelayPool>>,
    pub publisher: Option<Arc<Publisher>>,
    pub dns: Arc<TokioAsyncResolver>,
    pub operator_resolver: Arc<OperatorResolver>,
    pub jurisdiction_resolver: Arc<JurisdictionResolver>,
    pub config: Arc<Config>,
    running: watch::Sender<bool>,
}

impl AppState {
    pub async fn build(config: Arc<Config>, keys: Option<Keys>) -> anyhow::Result<Arc<Self>> {
        if let Some(parent) = config.database.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Arc::new(Store::open(&config.database.path).await?);

        let providers = config
            .wot
            .providers
            .iter()
            .map(|p| TrustProvider {
                endpoint: p.url.clone(),
                weight: p.weight,
            })
            .collect();
        let wot = Arc::new(WotClient::new(
            providers,
            Duration::from_secs(config.wot.timeout_secs),
        ));

        let dns = Arc::new(TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            ResolverOpts::default(),
        ));
        let operator_resolver = Arc::new(OperatorResolver::new(
            dns.clone(),
            Duration::from_secs(config.resolution.http_timeout_secs),
        ));
        let jurisdiction_resolver = Arc::new(JurisdictionResolver::new(
            dns.clone(),
            config.resolution.geo_endpoint.clone(),
            Duration::from_secs(config.resolution.dns_timeout_secs),
        ));

        let (pool, publisher) = if config.publishing.enabled {
            let keys = keys.ok_or_else(|| {
                anyhow::anyhow!("publishing.enabled is true but no signing key was provided")
            })?;
            let pool = RelayPool::spawn(config.publishing.pool_endpoints.clone());
            let scheduler = PublishScheduler::spawn(
                pool.clone(),
                Duration::from_millis(config.publishing.min_delay_ms),
                DEFAULT_ACK_TIMEOUT,
            );
            let publisher = Arc::new(Publisher::new(
                scheduler,
                keys,
                config.provider.clone(),
                config.publishing.clone(),
            ));
            (Some(pool), Some(publisher))
        } else {
            (None, None)
        };

        let (running, _) = watch::channel(true);

        Ok(Arc::new(Self {
            store,
            wot,
            pool,
            publisher,
            dns,
            operator_resolver,
            jurisdiction_resolver,
            config,
            running,
        }))
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn stop(&self) {
        let _ = self.running.send(false);
    }
}

pub struct Ingestors {
    monitor: Option<monitor::MonitorIngestorHandle>,
    report: Option<report::ReportIngestorHandle>,
}

impl Ingestors {
    pub async fn shutdown(&self) {
        if let Some(handle) = &self.monitor {
            handle.shutdown().await;
        }
        if let Some(handle) = &self.report {
            handle.shutdown().await;
        }
    }
}

/// Starts MonitorIngestor/ReportIngestor for every configured source
/// endpoint. A relay whose hostname contains `nostr.watch` is treated as
/// a well-known monitor aggregator when `targets.discover_from_monitors`
/// asks this service to widen its probe set from monitor traffic alone.
pub fn spawn_ingestors(state: &Arc<AppState>, now: i64) -> Ingestors {
    let monitor_endpoints = state.config.sources.monitor_endpoints.clone();
    let report_endpoints = state.config.sources.report_endpoints.clone();

    let monitor = if monitor_endpoints.is_empty() {
        None
    } else {
        Some(monitor::spawn(state.store.clone(), monitor_endpoints, now))
    };

    let report = if report_endpoints.is_empty() {
        None
    } else {
        Some(report::spawn(
            state.store.clone(),
            Some(state.wot.clone()),
            report_endpoints,
            100,
            now,
        ))
    };

    Ingestors { monitor, report }
}

/// Relay targets for this cycle: the configured static list, widened by
/// every relay this service has ever probed or received a monitor metric
/// for when `targets.discover_from_monitors` is set.
async fn resolve_targets(state: &Arc<AppState>) -> Vec<RelayUrl> {
    let mut urls: Vec<RelayUrl> = state
        .config
        .targets
        .urls
        .iter()
        .filter_map(|raw| RelayUrl::parse(raw).ok())
        .collect();

    if state.config.targets.discover_from_monitors {
        if let Ok(scores) = state.store.all_latest_scores().await {
            for snapshot in scores {
                if !urls.contains(&snapshot.url) {
                    urls.push(snapshot.url);
                }
            }
        }
    }

    urls
}

/// One full evaluation cycle: probe every target, refresh stale
/// operator-trust entries, rescore, publish materially-changed
/// assertions, then run the at-most-once-per-interval housekeeping
/// tasks.
pub async fn run_cycle(state: &Arc<AppState>) -> anyhow::Result<()> {
    let now = now_unix();
    let targets = resolve_targets(state).await;
    info!(count = targets.len(), "starting cycle");

    probe_all(state, &targets, now).await;

    if let Err(e) = refresh_stale_operator_trust(state, now).await {
        warn!(error = %e, "wot refresh phase failed");
    }

    if let Err(e) = rescore_and_publish(state, &targets, now).await {
        warn!(error = %e, "scoring/publish phase failed");
    }

    maybe_run_retention(state, now).await;
    maybe_checkpoint(state, now).await;

    info!("cycle complete");
    Ok(())
}

async fn probe_all(state: &Arc<AppState>, targets: &[RelayUrl], now: i64) {
    let semaphore = Arc::new(Semaphore::new(state.config.probing.concurrency.max(1)));
    let mut handles = Vec::with_capacity(targets.len());

    for url in targets {
        let url = url.clone();
        let store = state.store.clone();
        let cfg = state.config.probing.clone();
        let permit = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit.acquire_owned().await;
            let observation: ProbeObservation = prober::probe(&url, &cfg, now).await;
            if let Err(e) = store.insert_probe(&observation).await {
                warn!(url = %url, error = %e, "failed to persist probe observation");
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
        tokio::time::sleep(PROBE_BATCH_SETTLE_DELAY).await;
    }
}

async fn refresh_stale_operator_trust(state: &Arc<AppState>, now: i64) -> anyhow::Result<()> {
    let stale = state.store.stale_or_missing_operator_pubkeys(now).await?;
    if stale.is_empty() {
        return Ok(());
    }
    info!(count = stale.len(), "refreshing stale operator trust");

    for batch in stale.chunks(WOT_REFRESH_BATCH_SIZE) {
        let mut handles = Vec::with_capacity(batch.len());
        for pubkey in batch {
            let pubkey = pubkey.clone();
            let wot = state.wot.clone();
            let store = state.store.clone();
            handles.push(tokio::spawn(async move {
                if let Some(trust) = wot.resolve(&pubkey, now).await {
                    if let Err(e) = store.upsert_operator_trust(&trust).await {
                        warn!(pubkey = %pubkey, error = %e, "failed to persist operator trust");
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    Ok(())
}

async fn rescore_and_publish(
    state: &Arc<AppState>,
    targets: &[RelayUrl],
    now: i64,
) -> anyhow::Result<()> {
    let bundles = state
        .store
        .build_aggregate_bundles(SCORING_WINDOW_SECS, now)
        .await?;

    for url in targets {
        let Some(bundle) = bundles.get(url.as_str()) else {
            continue;
        };
        let probe_count = bundle.probes.len() as u64;
        let scores = score_relay(bundle, probe_count, now);

        let snapshot = crate::model::ScoreSnapshot {
            url: url.clone(),
            timestamp: now,
            overall: scores.overall,
            reliability: scores.reliability,
            quality: scores.quality,
            accessibility: scores.accessibility,
            operator_trust: scores.operator_trust,
            confidence: scores.confidence,
            observation_count: probe_count,
        };
        state.store.insert_score_snapshot(&snapshot).await?;

        if let Some(publisher) = &state.publisher {
            let jurisdiction = bundle.jurisdiction.clone();
            let operator_resolution = bundle.operator_resolution.clone();
            if let Err(e) = publisher
                .publish_relay(
                    &state.store,
                    url,
                    scores,
                    probe_count,
                    operator_resolution.as_ref(),
                    jurisdiction.as_ref(),
                    now,
                )
                .await
            {
                warn!(url = %url, error = %e, "publish failed");
            }
        }
    }

    Ok(())
}

async fn maybe_run_retention(state: &Arc<AppState>, now: i64) {
    let interval = state.config.intervals.retention_secs as i64;
    let Ok(Some(last)) = state.store.latest_checkpoint_marker("retention").await else {
        run_retention(state, now).await;
        return;
    };
    if now - last >= interval {
        run_retention(state, now).await;
    }
}

async fn run_retention(state: &Arc<AppState>, now: i64) {
    match state.store.cleanup(state.config.database.retention_days).await {
        Ok(counts) => info!(?counts, "retention cleanup complete"),
        Err(e) => warn!(error = %e, "retention cleanup failed"),
    }
    let _ = state.store.record_checkpoint_marker("retention", now).await;
}

async fn maybe_checkpoint(state: &Arc<AppState>, now: i64) {
    let interval = state.config.intervals.checkpoint_secs as i64;
    let Ok(Some(last)) = state.store.latest_checkpoint_marker("wal").await else {
        do_checkpoint(state, now).await;
        return;
    };
    if now - last >= interval {
        do_checkpoint(state, now).await;
    }
}

async fn do_checkpoint(state: &Arc<AppState>, now: i64) {
    if let Err(e) = state.store.checkpoint().await {
        warn!(error = %e, "checkpoint failed");
        return;
    }
    let _ = state.store.record_checkpoint_marker("wal", now).await;
}

/// Runs `run_cycle` immediately, then every `intervals.cycle_secs` until
/// `state.is_running()` turns false.
pub async fn run_cycle_loop(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.intervals.cycle_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut running_rx = state.running.subscribe();

    loop {
        if !*running_rx.borrow() {
            return;
        }
        if let Err(e) = run_cycle(&state).await {
            warn!(error = %e, "cycle failed");
        }
        tokio::select! {
            _ = ticker.tick() => {}
            result = running_rx.changed() => {
                if result.is_err() || !*running_rx.borrow() {
                    return;
                }
            }
        }
    }
}
