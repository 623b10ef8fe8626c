//! Event loop
//!
//! Single-threaded, cooperative delivery of lifecycle and configuration
//! events to the reconciler. Each event is handled to completion (or to a
//! deferral point) before the next is processed; a deferred event is
//! re-queued behind any newer events and redelivered on a later tick.
//! Redelivery acts on the inputs as they are at delivery time, never on
//! the snapshot taken when the event was first queued. There is no
//! backoff of our own; redelivery pacing is the tick interval.

use crate::error::Result;
use crate::reconciler::{DeferReason, Event, Outcome, Reconciler, UnitStatus};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// =============================================================================
// Input Source
// =============================================================================

/// The externally-owned inputs, re-read on every tick: the controller
/// relation's `url` key and the storage-pool config option.
pub trait InputSource: Send + Sync {
    /// `None` means the controller relation is absent or carries no url
    fn controller_url(&self) -> Result<Option<String>>;
    /// Raw pool-config text; empty when unset
    fn pool_config(&self) -> Result<String>;
}

/// Inputs projected onto the filesystem: a JSON relation-data file and a
/// plain-text pool-config file. A missing file reads as "not set".
pub struct FileInputSource {
    relation_data: PathBuf,
    pool_config: PathBuf,
}

impl FileInputSource {
    pub fn new(relation_data: impl Into<PathBuf>, pool_config: impl Into<PathBuf>) -> Self {
        Self {
            relation_data: relation_data.into(),
            pool_config: pool_config.into(),
        }
    }
}

impl InputSource for FileInputSource {
    fn controller_url(&self) -> Result<Option<String>> {
        let bytes = match std::fs::read(&self.relation_data) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data: HashMap<String, String> = serde_json::from_slice(&bytes)?;
        Ok(data.get("url").filter(|u| !u.is_empty()).cloned())
    }

    fn pool_config(&self) -> Result<String> {
        match std::fs::read_to_string(&self.pool_config) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Event Handler Seam
// =============================================================================

/// Handles one delivered event; implemented by the reconciler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<Outcome>;
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event: &Event) -> Result<Outcome> {
        Reconciler::handle(self, event).await
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Drives the reconciler from the input source
pub struct Runner<H: EventHandler> {
    handler: H,
    source: Box<dyn InputSource>,
    queue: VecDeque<Event>,
    /// Relation url observed on the previous tick; `None` until the
    /// first tick has run
    last_url: Option<Option<String>>,
}

impl<H: EventHandler> Runner<H> {
    pub fn new(handler: H, source: Box<dyn InputSource>) -> Self {
        Self {
            handler,
            source,
            queue: VecDeque::new(),
            last_url: None,
        }
    }

    /// Run forever, ticking at the given redelivery interval
    pub async fn run(mut self, interval: Duration) -> Result<()> {
        info!(interval_secs = interval.as_secs(), "Starting reconciliation loop");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One tick: re-read the inputs, enqueue the resulting events behind
    /// any deferred ones, then drain the queue.
    pub async fn tick(&mut self) {
        match self.observe() {
            Ok(events) => self.queue.extend(events),
            Err(e) => {
                error!(error = %e, "Failed to read operator inputs");
                return;
            }
        }
        self.drain().await;
    }

    /// Compare the relation url against the previous observation and
    /// translate the difference into lifecycle events; every tick also
    /// carries a convergence pass with freshly re-read config.
    ///
    /// Deferred events still queued from earlier ticks are reconciled
    /// against the same observation first: payloads are refreshed to the
    /// current inputs, and an `EndpointChanged` whose url no longer
    /// matches is dropped so a redelivery cannot act on relation data
    /// that has since changed or disappeared.
    fn observe(&mut self) -> Result<Vec<Event>> {
        let url = self.source.controller_url()?;
        let pool_config = self.source.pool_config()?;

        self.queue.retain_mut(|event| match event {
            Event::EndpointChanged {
                url: queued,
                pool_config: queued_config,
            } => {
                if queued.as_deref() != url.as_deref() {
                    debug!(?queued, "Dropping stale deferred endpoint event");
                    return false;
                }
                *queued_config = pool_config.clone();
                true
            }
            Event::ConfigChanged {
                pool_config: queued_config,
            } => {
                *queued_config = pool_config.clone();
                true
            }
            Event::RelationBroken => true,
        });

        let mut events = Vec::new();
        match (&self.last_url, &url) {
            // Relation data disappeared since the last observation.
            (Some(Some(_)), None) => events.push(Event::RelationBroken),
            // New or changed endpoint.
            (last, Some(current)) if last.as_ref().and_then(|u| u.as_ref()) != Some(current) => {
                events.push(Event::EndpointChanged {
                    url: Some(current.clone()),
                    pool_config: pool_config.clone(),
                });
            }
            _ => {}
        }
        self.last_url = Some(url);

        events.push(Event::ConfigChanged { pool_config });
        // A deferred twin already in the queue covers the same pass; a
        // controller outage must not grow the queue tick over tick.
        events.retain(|event| !self.queue.contains(event));
        Ok(events)
    }

    async fn drain(&mut self) {
        // Only the events queued at the start of the drain are processed;
        // redelivery of anything deferred waits for the next tick.
        let mut pending = self.queue.len();
        while pending > 0 {
            pending -= 1;
            let Some(event) = self.queue.pop_front() else {
                break;
            };

            match self.handler.handle(&event).await {
                Ok(Outcome::Completed(status)) => report_status(&status),
                Ok(Outcome::Deferred(reason)) => {
                    debug!(?event, ?reason, "Event deferred; re-queueing for redelivery");
                    report_defer(reason);
                    self.queue.push_back(event);
                }
                Err(e) => {
                    // Fatal for this pass; surfaced, not retried.
                    error!(?event, error = %e, "Reconciliation pass failed");
                    report_status(&UnitStatus::Waiting(e.to_string()));
                }
            }
        }
    }
}

fn report_status(status: &UnitStatus) {
    match status {
        UnitStatus::Waiting(msg) => info!(status = "waiting", %msg, "Unit status"),
        UnitStatus::Maintenance(msg) => info!(status = "maintenance", %msg, "Unit status"),
        UnitStatus::Active => info!(status = "active", "Unit status"),
    }
}

fn report_defer(reason: DeferReason) {
    match reason {
        DeferReason::ClusterUnreachable => {
            warn!(status = "maintenance", "Waiting for cluster controller to answer")
        }
        DeferReason::NodeNotScheduled => {
            info!(status = "maintenance", "Waiting for pod scheduling")
        }
        DeferReason::NodeNotOnline => {
            info!(status = "maintenance", "Waiting for satellite to come online")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use std::sync::Arc;

    struct StaticSource {
        url: Arc<Mutex<Option<String>>>,
        pool_config: String,
    }

    impl InputSource for StaticSource {
        fn controller_url(&self) -> Result<Option<String>> {
            Ok(self.url.lock().clone())
        }

        fn pool_config(&self) -> Result<String> {
            Ok(self.pool_config.clone())
        }
    }

    /// Scripted handler: returns the next queued outcome per delivery and
    /// records what it was asked to handle.
    struct ScriptedHandler {
        outcomes: Mutex<VecDeque<Outcome>>,
        handled: Mutex<Vec<Event>>,
    }

    impl ScriptedHandler {
        fn new(outcomes: Vec<Outcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                handled: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventHandler for ScriptedHandler {
        async fn handle(&self, event: &Event) -> Result<Outcome> {
            self.handled.lock().push(event.clone());
            Ok(self
                .outcomes
                .lock()
                .pop_front()
                .unwrap_or(Outcome::Completed(UnitStatus::Active)))
        }
    }

    fn source(url: Option<&str>) -> (Box<StaticSource>, Arc<Mutex<Option<String>>>) {
        let shared = Arc::new(Mutex::new(url.map(String::from)));
        let source = Box::new(StaticSource {
            url: shared.clone(),
            pool_config: "name=a,provider=lvm".into(),
        });
        (source, shared)
    }

    #[tokio::test]
    async fn test_first_tick_emits_endpoint_then_config() {
        let handler = ScriptedHandler::new(vec![]);
        let (src, _url) = source(Some("http://c:3370"));
        let mut runner = Runner::new(handler, src);

        runner.tick().await;

        let handled = runner.handler.handled.lock().clone();
        assert_eq!(handled.len(), 2);
        assert_matches::assert_matches!(
            handled[0],
            Event::EndpointChanged { url: Some(ref u), .. } if u == "http://c:3370"
        );
        assert_matches::assert_matches!(handled[1], Event::ConfigChanged { .. });
    }

    #[tokio::test]
    async fn test_deferred_event_redelivered_next_tick() {
        let handler = ScriptedHandler::new(vec![
            Outcome::Deferred(DeferReason::ClusterUnreachable),
            Outcome::Completed(UnitStatus::Active),
        ]);
        let (src, _url) = source(Some("http://c:3370"));
        let mut runner = Runner::new(handler, src);

        runner.tick().await;
        // The deferred EndpointChanged stays queued for the next tick
        // rather than spinning within this one.
        assert_eq!(runner.queue.len(), 1);

        runner.tick().await;
        let handled = runner.handler.handled.lock().clone();
        // Tick 1: EndpointChanged (deferred) + ConfigChanged.
        // Tick 2: redelivered EndpointChanged + fresh ConfigChanged.
        let endpoint_deliveries = handled
            .iter()
            .filter(|e| matches!(e, Event::EndpointChanged { .. }))
            .count();
        assert_eq!(endpoint_deliveries, 2);
        assert!(runner.queue.is_empty());
    }

    #[tokio::test]
    async fn test_relation_disappearing_emits_broken() {
        let handler = ScriptedHandler::new(vec![]);
        let (src, url) = source(Some("http://c:3370"));
        let mut runner = Runner::new(handler, src);

        runner.tick().await;
        *url.lock() = None;
        runner.tick().await;

        let handled = runner.handler.handled.lock().clone();
        assert!(handled.iter().any(|e| matches!(e, Event::RelationBroken)));
    }

    #[tokio::test]
    async fn test_unchanged_url_only_emits_config() {
        let handler = ScriptedHandler::new(vec![]);
        let (src, _url) = source(Some("http://c:3370"));
        let mut runner = Runner::new(handler, src);

        runner.tick().await;
        runner.tick().await;

        let handled = runner.handler.handled.lock().clone();
        let endpoint_deliveries = handled
            .iter()
            .filter(|e| matches!(e, Event::EndpointChanged { .. }))
            .count();
        assert_eq!(endpoint_deliveries, 1);
    }

    #[tokio::test]
    async fn test_failed_pass_is_not_requeued() {
        struct FailingHandler;

        #[async_trait]
        impl EventHandler for FailingHandler {
            async fn handle(&self, _event: &Event) -> Result<Outcome> {
                Err(crate::error::Error::ConfigParse("bogus".into()))
            }
        }

        let (src, _url) = source(Some("http://c:3370"));
        let mut runner = Runner::new(FailingHandler, src);
        runner.tick().await;
        assert!(runner.queue.is_empty());
    }

    #[tokio::test]
    async fn test_stale_endpoint_event_dropped_when_relation_breaks() {
        let handler = ScriptedHandler::new(vec![
            Outcome::Deferred(DeferReason::ClusterUnreachable),
            Outcome::Deferred(DeferReason::ClusterUnreachable),
        ]);
        let (src, url) = source(Some("http://c:3370"));
        let mut runner = Runner::new(handler, src);

        runner.tick().await;
        *url.lock() = None;
        runner.tick().await;

        let handled = runner.handler.handled.lock().clone();
        // Tick 2 must not redeliver the EndpointChanged queued before the
        // relation disappeared; only the teardown and a convergence pass
        // remain.
        let tick2 = &handled[2..];
        assert!(tick2
            .iter()
            .all(|e| !matches!(e, Event::EndpointChanged { .. })));
        assert!(tick2.iter().any(|e| matches!(e, Event::RelationBroken)));
    }

    struct DeferringHandler {
        handled: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventHandler for DeferringHandler {
        async fn handle(&self, event: &Event) -> Result<Outcome> {
            self.handled.lock().push(event.clone());
            Ok(Outcome::Deferred(DeferReason::ClusterUnreachable))
        }
    }

    #[tokio::test]
    async fn test_sustained_deferral_does_not_grow_queue() {
        let handler = DeferringHandler {
            handled: Mutex::new(Vec::new()),
        };
        let (src, _url) = source(None);
        let mut runner = Runner::new(handler, src);

        for _ in 0..6 {
            runner.tick().await;
        }

        // One convergence pass per tick; the deferred event is reused,
        // never duplicated behind a fresh one.
        assert_eq!(runner.handler.handled.lock().len(), 6);
        assert_eq!(runner.queue.len(), 1);
    }

    // -------------------------------------------------------------------------
    // End-to-End Deferral
    // -------------------------------------------------------------------------

    use crate::cluster::{
        ClusterApi, ClusterApiFactory, CreateDevicePool, CreateStoragePool, NodeRegistration,
        StoragePool,
    };
    use crate::error::Error;
    use crate::node::{IdentityResolver, NodeIdentity};
    use crate::reconciler::{Reconciler, ENDPOINT_KEY};
    use crate::state::{MemoryStateStore, StateStore};

    struct UnreachableCluster;

    #[async_trait]
    impl ClusterApi for UnreachableCluster {
        async fn list_nodes(&self, _filter: Option<&str>) -> Result<Vec<NodeRegistration>> {
            Err(Error::ClusterUnreachable("connection refused".into()))
        }

        async fn create_node(&self, _registration: &NodeRegistration) -> Result<()> {
            Err(Error::ClusterUnreachable("connection refused".into()))
        }

        async fn delete_node(&self, _name: &str) -> Result<()> {
            Err(Error::ClusterUnreachable("connection refused".into()))
        }

        async fn list_storage_pools(&self, _node: &str) -> Result<Vec<StoragePool>> {
            Err(Error::ClusterUnreachable("connection refused".into()))
        }

        async fn create_storage_pool(
            &self,
            _node: &str,
            _request: &CreateStoragePool,
        ) -> Result<()> {
            Err(Error::ClusterUnreachable("connection refused".into()))
        }

        async fn create_storage_pool_from_devices(
            &self,
            _node: &str,
            _request: &CreateDevicePool,
        ) -> Result<()> {
            Err(Error::ClusterUnreachable("connection refused".into()))
        }
    }

    struct UnreachableFactory;

    impl ClusterApiFactory for UnreachableFactory {
        fn connect(&self, _endpoint: &str) -> Arc<dyn ClusterApi> {
            Arc::new(UnreachableCluster)
        }
    }

    struct FixedResolver;

    #[async_trait]
    impl IdentityResolver for FixedResolver {
        async fn resolve(&self) -> Result<Option<NodeIdentity>> {
            Ok(Some(NodeIdentity {
                node_name: "worker-0".into(),
                address: "10.1.0.4".into(),
            }))
        }
    }

    #[tokio::test]
    async fn test_endpoint_stays_cleared_after_relation_breaks_mid_outage() {
        let store = Arc::new(MemoryStateStore::new());
        let reconciler = Reconciler::new(
            Arc::new(UnreachableFactory),
            Arc::new(FixedResolver),
            store.clone(),
            "satellite-storage",
        );
        let (src, url) = source(Some("http://c:3370"));
        let mut runner = Runner::new(reconciler, src);

        // The first tick stores the endpoint and defers against the
        // unreachable controller.
        runner.tick().await;
        assert_eq!(
            store.get(ENDPOINT_KEY).unwrap().as_deref(),
            Some("http://c:3370")
        );

        // The relation breaks while the deferred event is still queued.
        *url.lock() = None;
        runner.tick().await;
        assert_eq!(store.get(ENDPOINT_KEY).unwrap(), None);

        // Later ticks must not resurrect the dead endpoint.
        runner.tick().await;
        runner.tick().await;
        assert_eq!(store.get(ENDPOINT_KEY).unwrap(), None);
    }
}
