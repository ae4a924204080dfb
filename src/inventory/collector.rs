use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::ManagementBackend;
use crate::inventory::{
    FactEntry, FactOutcome, FactSource, InventoryError, InventoryPlan, InventoryResult,
};
use crate::log_timing;
use crate::provider::{ModuleCache, ProviderHandle};
use crate::query::QueryRequest;
use crate::session::QuerySession;

/// Reason recorded for facts skipped after cancellation
pub const PASS_ABANDONED: &str = "pass abandoned";

/// Reason recorded when a query returns no records
pub const NO_MATCHING_RECORD: &str = "no matching record";

/// Runs inventory passes for a plan
///
/// A pass is synchronous and blocks on backend reads; run it on a blocking
/// thread (see [`crate::runner`]). Provider modules are acquired through the
/// shared [`ModuleCache`], the query session is opened per pass.
#[derive(Debug, Clone)]
pub struct InventoryCollector {
    plan: InventoryPlan,
    modules: Arc<ModuleCache>,
    cancel: CancellationToken,
}

/// Acquisition bookkeeping for the environment check
#[derive(Debug, Default)]
struct Acquisitions {
    attempted: usize,
    succeeded: usize,
    last_failure: Option<String>,
}

impl Acquisitions {
    fn record<T, E: ToString>(&mut self, result: &Result<T, E>) {
        self.attempted += 1;
        match result {
            Ok(_) => self.succeeded += 1,
            Err(e) => self.last_failure = Some(e.to_string()),
        }
    }
}

impl InventoryCollector {
    pub fn new(plan: InventoryPlan, modules: Arc<ModuleCache>) -> Self {
        Self {
            plan,
            modules,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn plan(&self) -> &InventoryPlan {
        &self.plan
    }

    pub fn modules(&self) -> &Arc<ModuleCache> {
        &self.modules
    }

    /// Run one pass against `backend`
    ///
    /// Every fact gets an outcome. The only error is `Environment`: at least
    /// one acquisition was attempted, none succeeded, and no fact was
    /// obtained.
    #[instrument(
        name = "inventory_pass",
        skip(self, backend),
        fields(namespace = %self.plan.namespace, facts = self.plan.facts.len())
    )]
    pub fn collect(
        &self,
        backend: Box<dyn ManagementBackend>,
    ) -> Result<InventoryResult, InventoryError> {
        let start = Instant::now();
        let pass_id = Uuid::new_v4();
        info!("Starting inventory pass {}", pass_id);

        let mut acquisitions = Acquisitions::default();
        let mut session: Option<QuerySession> = None;
        let mut session_failure: Option<String> = None;

        if self.plan.has_query_facts() && !self.cancel.is_cancelled() {
            let opened = QuerySession::open(backend, self.plan.namespace.clone());
            acquisitions.record(&opened);
            match opened {
                Ok(opened) => session = Some(opened),
                Err(e) => {
                    warn!("Query session unavailable: {}", e);
                    session_failure = Some(e.to_string());
                }
            }
        }

        // One acquisition per module per pass
        let mut handles: HashMap<String, Result<Arc<ProviderHandle>, String>> = HashMap::new();
        let mut facts = Vec::with_capacity(self.plan.facts.len());

        for spec in &self.plan.facts {
            if self.cancel.is_cancelled() {
                if let Some(mut open) = session.take() {
                    info!("Inventory pass cancelled, closing query session");
                    open.close();
                }
                facts.push(FactEntry {
                    name: spec.name.clone(),
                    outcome: FactOutcome::unavailable(PASS_ABANDONED),
                });
                continue;
            }

            let outcome = match &spec.source {
                FactSource::Query(request) => match session.as_mut() {
                    Some(open) => Self::query_fact(open, request),
                    None => FactOutcome::Unavailable(
                        session_failure
                            .clone()
                            .unwrap_or_else(|| PASS_ABANDONED.to_string()),
                    ),
                },
                FactSource::Provider {
                    module,
                    entry_point,
                } => {
                    let handle = handles.entry(module.clone()).or_insert_with(|| {
                        let acquired = self.modules.acquire(module);
                        acquisitions.record(&acquired);
                        acquired.map_err(|e| {
                            warn!("Provider module {} unavailable: {}", module, e);
                            e.to_string()
                        })
                    });
                    match handle {
                        Ok(handle) => Self::provider_fact(handle, entry_point),
                        Err(reason) => FactOutcome::Unavailable(reason.clone()),
                    }
                }
            };
            debug!("Fact {}: {}", spec.name, outcome);
            facts.push(FactEntry {
                name: spec.name.clone(),
                outcome,
            });
        }

        if let Some(mut open) = session.take() {
            open.close();
        }
        drop(handles);

        let result = InventoryResult::new(pass_id, self.plan.namespace.clone(), facts);
        log_timing!(Level::INFO, "inventory_pass", start.elapsed());
        info!(
            "Inventory pass {} finished: {} available, {} unavailable",
            pass_id,
            result.available_count(),
            result.unavailable_count()
        );

        if acquisitions.attempted > 0
            && acquisitions.succeeded == 0
            && result.available_count() == 0
        {
            let reason = acquisitions
                .last_failure
                .unwrap_or_else(|| "no backend or provider module could be acquired".into());
            return Err(InventoryError::environment(reason));
        }
        Ok(result)
    }

    /// First record of the query, field extracted; extra records are discarded
    fn query_fact(session: &mut QuerySession, request: &QueryRequest) -> FactOutcome {
        let first = session
            .execute(request)
            .and_then(|cursor| cursor.first());
        match first {
            Ok(Some(record)) => match record.get(&request.field) {
                Some(value) if !value.is_null() => FactOutcome::Available(value.clone()),
                Some(_) => FactOutcome::Unavailable(format!("field {} is null", request.field)),
                None => FactOutcome::Unavailable(format!(
                    "field {} missing from record",
                    request.field
                )),
            },
            Ok(None) => FactOutcome::unavailable(NO_MATCHING_RECORD),
            Err(e) => FactOutcome::Unavailable(e.to_string()),
        }
    }

    fn provider_fact(handle: &ProviderHandle, entry_point: &str) -> FactOutcome {
        match handle
            .resolve_symbol(entry_point)
            .and_then(|entry| entry.invoke())
        {
            Ok(value) => FactOutcome::Available(value),
            Err(e) => FactOutcome::Unavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendError, FixtureBackend, FixtureSnapshot, RecordStream, ResourceLedger,
        SecurityContext, VecRecordStream,
    };
    use crate::inventory::FactSpec;
    use crate::provider::{ModuleError, ModuleLoader, ProviderModule, StaticLoader};
    use crate::query::{PropertyRecord, PropertyValue};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[cfg(feature = "test-logging")]
    #[ctor::ctor]
    fn init_test_logging() {
        crate::test_utils::logging::init();
    }

    fn serial_plan() -> InventoryPlan {
        InventoryPlan::empty().with_fact(FactSpec::query(
            "serial",
            QueryRequest::select("Win32_BaseBoard", "SerialNumber"),
        ))
    }

    fn builtin_cache() -> Arc<ModuleCache> {
        Arc::new(ModuleCache::new(Arc::new(
            StaticLoader::with_builtin_providers(),
        )))
    }

    fn board(serials: &[&str]) -> FixtureSnapshot {
        serials
            .iter()
            .fold(FixtureSnapshot::new().with_class("Win32_BaseBoard"), |s, serial| {
                s.with_instance(
                    "Win32_BaseBoard",
                    PropertyRecord::new().with("SerialNumber", *serial),
                )
            })
    }

    #[test]
    fn test_single_record_yields_value() {
        let backend = FixtureBackend::new(board(&["ABC123"]));
        let ledger = backend.ledger();
        let collector = InventoryCollector::new(serial_plan(), builtin_cache());

        let result = collector.collect(Box::new(backend)).unwrap();
        assert_eq!(
            result.fact("serial"),
            Some(&FactOutcome::Available(PropertyValue::from("ABC123")))
        );
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_zero_records_is_unavailable_not_error() {
        let backend = FixtureBackend::new(board(&[]));
        let collector = InventoryCollector::new(serial_plan(), builtin_cache());

        let result = collector.collect(Box::new(backend)).unwrap();
        assert_eq!(
            result.fact("serial"),
            Some(&FactOutcome::unavailable(NO_MATCHING_RECORD))
        );
    }

    #[test]
    fn test_extra_records_are_discarded() {
        let backend = FixtureBackend::new(board(&["FIRST", "SECOND"]));
        let ledger = backend.ledger();
        let collector = InventoryCollector::new(serial_plan(), builtin_cache());

        let result = collector.collect(Box::new(backend)).unwrap();
        assert_eq!(
            result.fact("serial"),
            Some(&FactOutcome::Available(PropertyValue::from("FIRST")))
        );
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_missing_and_null_fields() {
        let snapshot = FixtureSnapshot::new().with_instance(
            "Win32_BaseBoard",
            PropertyRecord::new().with("Product", PropertyValue::Null),
        );
        let plan = InventoryPlan::empty()
            .with_fact(FactSpec::query(
                "serial",
                QueryRequest::wql("SELECT * FROM Win32_BaseBoard", "SerialNumber"),
            ))
            .with_fact(FactSpec::query(
                "product",
                QueryRequest::wql("SELECT * FROM Win32_BaseBoard", "Product"),
            ));
        let collector = InventoryCollector::new(plan, builtin_cache());

        // Nothing obtained, but the session was acquired: not an environment error
        let result = collector
            .collect(Box::new(FixtureBackend::new(snapshot)))
            .unwrap();
        assert!(matches!(
            result.fact("serial"),
            Some(FactOutcome::Unavailable(reason)) if reason.contains("SerialNumber")
        ));
        assert!(matches!(
            result.fact("product"),
            Some(FactOutcome::Unavailable(reason)) if reason.contains("Product")
        ));
    }

    #[test]
    fn test_missing_module_does_not_affect_queries() {
        let plan = serial_plan().with_fact(FactSpec::provider(
            "vendor_serial",
            "missing_provider",
            "GetSerial",
        ));
        let collector = InventoryCollector::new(plan, builtin_cache());

        let result = collector
            .collect(Box::new(FixtureBackend::new(board(&["ABC123"]))))
            .unwrap();
        assert!(result.fact("serial").unwrap().is_available());
        match result.fact("vendor_serial").unwrap() {
            FactOutcome::Unavailable(reason) => assert!(reason.contains("missing_provider")),
            other => panic!("unexpected outcome: {other}"),
        }
    }

    #[test]
    fn test_security_failure_with_provider_success() {
        let backend = FixtureBackend::new(board(&["ABC123"])).fail_security("COM unavailable");
        let ledger = backend.ledger();
        let plan = serial_plan().with_fact(FactSpec::provider("os", "host", "GetOsFamily"));
        let collector = InventoryCollector::new(plan, builtin_cache());

        let result = collector.collect(Box::new(backend)).unwrap();
        match result.fact("serial").unwrap() {
            FactOutcome::Unavailable(reason) => assert!(reason.contains("COM unavailable")),
            other => panic!("unexpected outcome: {other}"),
        }
        assert_eq!(
            result.fact("os"),
            Some(&FactOutcome::Available(PropertyValue::from(
                std::env::consts::OS
            )))
        );
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_nothing_acquired_is_environment_error() {
        let backend = FixtureBackend::new(board(&["ABC123"])).fail_connect("access denied");
        let ledger = backend.ledger();
        let plan = serial_plan().with_fact(FactSpec::provider(
            "vendor_serial",
            "missing_provider",
            "GetSerial",
        ));
        let collector = InventoryCollector::new(plan, builtin_cache());

        let err = collector.collect(Box::new(backend)).unwrap_err();
        assert!(matches!(err, InventoryError::Environment { .. }));
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_empty_plan_is_empty_result() {
        let collector = InventoryCollector::new(InventoryPlan::empty(), builtin_cache());
        let result = collector
            .collect(Box::new(FixtureBackend::new(FixtureSnapshot::new())))
            .unwrap();
        assert!(result.facts.is_empty());
    }

    #[test]
    fn test_module_loaded_once_per_pass() {
        let plan = InventoryPlan::empty()
            .with_fact(FactSpec::provider("os", "host", "GetOsFamily"))
            .with_fact(FactSpec::provider("arch", "host", "GetArchitecture"))
            .with_fact(FactSpec::provider("bogus", "host", "GetNothing"));
        let cache = builtin_cache();
        let collector = InventoryCollector::new(plan, Arc::clone(&cache));

        let result = collector
            .collect(Box::new(FixtureBackend::new(FixtureSnapshot::new())))
            .unwrap();
        assert_eq!(cache.load_count(), 1);
        assert_eq!(result.available_count(), 2);
        assert!(matches!(
            result.fact("bogus"),
            Some(FactOutcome::Unavailable(reason)) if reason.contains("GetNothing")
        ));
    }

    #[test]
    fn test_session_not_opened_without_query_facts() {
        let backend = FixtureBackend::new(FixtureSnapshot::new());
        let ledger = backend.ledger();
        let plan = InventoryPlan::empty().with_fact(FactSpec::provider("os", "host", "GetOsFamily"));
        let collector = InventoryCollector::new(plan, builtin_cache());

        collector.collect(Box::new(backend)).unwrap();
        assert_eq!(ResourceLedger::count(&ledger.security_initialized), 0);
    }

    #[test]
    fn test_enumeration_failure_recorded_per_fact() {
        let backend = FixtureBackend::new(board(&["ABC123"])).fail_enumeration_after(0);
        let ledger = backend.ledger();
        let plan = serial_plan().with_fact(FactSpec::provider("os", "host", "GetOsFamily"));
        let collector = InventoryCollector::new(plan, builtin_cache());

        let result = collector.collect(Box::new(backend)).unwrap();
        assert!(!result.fact("serial").unwrap().is_available());
        assert!(result.fact("os").unwrap().is_available());
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_rejected_query_keeps_session_for_other_facts() {
        let backend = FixtureBackend::new(board(&["ABC123"])).fail_query("access denied");
        let ledger = backend.ledger();
        let plan = serial_plan().with_fact(FactSpec::provider("os", "host", "GetOsFamily"));
        let collector = InventoryCollector::new(plan, builtin_cache());

        let result = collector.collect(Box::new(backend)).unwrap();
        match result.fact("serial") {
            Some(FactOutcome::Unavailable(reason)) => assert!(reason.contains("access denied")),
            other => panic!("expected unavailable serial, got {other:?}"),
        }
        assert!(result.fact("os").unwrap().is_available());
        assert!(ledger.is_balanced());
    }

    // Cancels the pass from inside an entry point
    struct Canceller(CancellationToken);

    impl ProviderModule for Canceller {
        fn entry_points(&self) -> Vec<String> {
            vec!["Cancel".to_string()]
        }

        fn invoke(&self, _symbol: &str) -> Result<PropertyValue, ModuleError> {
            self.0.cancel();
            Ok(PropertyValue::from("cancelled"))
        }
    }

    #[test]
    fn test_cancellation_abandons_remaining_facts() {
        let token = CancellationToken::new();
        let module_token = token.clone();
        let loader: Arc<dyn ModuleLoader> = Arc::new(StaticLoader::new().with_module(
            "canceller",
            move || Ok(Box::new(Canceller(module_token.clone()))),
        ));
        let backend = FixtureBackend::new(board(&["ABC123"]));
        let ledger = backend.ledger();
        let plan = InventoryPlan::empty()
            .with_fact(FactSpec::provider("stop", "canceller", "Cancel"))
            .with_fact(FactSpec::query(
                "serial",
                QueryRequest::select("Win32_BaseBoard", "SerialNumber"),
            ));
        let collector = InventoryCollector::new(plan, Arc::new(ModuleCache::new(loader)))
            .with_cancellation(token);

        let result = collector.collect(Box::new(backend)).unwrap();
        assert!(result.fact("stop").unwrap().is_available());
        assert_eq!(
            result.fact("serial"),
            Some(&FactOutcome::unavailable(PASS_ABANDONED))
        );
        assert_eq!(ResourceLedger::count(&ledger.queries_executed), 0);
        assert!(ledger.is_balanced());
    }

    // Backend that counts cursor releases per query
    struct CountingBackend {
        releases: Arc<AtomicUsize>,
        queries: Arc<Mutex<Vec<String>>>,
    }

    struct CountingStream {
        inner: VecRecordStream,
        releases: Arc<AtomicUsize>,
    }

    impl RecordStream for CountingStream {
        fn next_record(&mut self) -> Result<Option<PropertyRecord>, BackendError> {
            self.inner.next_record()
        }
    }

    impl Drop for CountingStream {
        fn drop(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ManagementBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn initialize_security(&mut self) -> Result<SecurityContext, BackendError> {
            Ok(SecurityContext::new("counting"))
        }

        fn connect(&mut self, _namespace: &str) -> Result<(), BackendError> {
            Ok(())
        }

        fn exec_query<'a>(
            &'a mut self,
            request: &QueryRequest,
        ) -> Result<Box<dyn RecordStream + 'a>, BackendError> {
            self.queries
                .lock()
                .unwrap()
                .push(request.text.clone());
            Ok(Box::new(CountingStream {
                inner: VecRecordStream::new(vec![
                    PropertyRecord::new().with(request.field.clone(), 7u64),
                    PropertyRecord::new().with(request.field.clone(), 8u64),
                ]),
                releases: Arc::clone(&self.releases),
            }))
        }

        fn disconnect(&mut self) {}

        fn release_security(&mut self) {}
    }

    #[test]
    fn test_every_cursor_released() {
        let releases = Arc::new(AtomicUsize::new(0));
        let queries = Arc::new(Mutex::new(Vec::new()));
        let backend = CountingBackend {
            releases: Arc::clone(&releases),
            queries: Arc::clone(&queries),
        };
        let collector = InventoryCollector::new(InventoryPlan::default(), builtin_cache());

        let result = collector.collect(Box::new(backend)).unwrap();
        assert_eq!(result.available_count(), 6);
        assert_eq!(
            result.fact("processor_cores"),
            Some(&FactOutcome::Available(PropertyValue::Unsigned(7)))
        );
        assert_eq!(queries.lock().unwrap().len(), 6);
        assert_eq!(releases.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_default_plan_against_sysfs_tree() {
        use crate::backend::SysfsBackend;

        let root = crate::test_utils::host::fake_host();
        let backend = SysfsBackend::with_root(root.path()).with_arch("x86_64");
        let collector = InventoryCollector::new(InventoryPlan::default(), builtin_cache());

        let result = collector.collect(Box::new(backend)).unwrap();
        let value = |name: &str| result.fact(name).and_then(FactOutcome::value).cloned();
        assert_eq!(value("serial_number"), Some(PropertyValue::from("ABC123")));
        assert_eq!(value("processor_architecture"), Some(PropertyValue::Unsigned(9)));
        assert_eq!(value("processor_cores"), Some(PropertyValue::Unsigned(2)));
        assert_eq!(value("logical_processors"), Some(PropertyValue::Unsigned(4)));
        assert_eq!(
            value("total_physical_memory"),
            Some(PropertyValue::Unsigned(16_384_000 * 1024))
        );
        assert_eq!(
            value("free_physical_memory"),
            Some(PropertyValue::Unsigned(8_000_000))
        );
    }
}
