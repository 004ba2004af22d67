// ⚖️ Discount Reconciliation Scheduler
//
// One repeating timer. Each tick:
//   1. classify undiscount + discount candidates against the same instant
//   2. end the discount of every undiscount candidate
//   3. start the discount of every discount candidate
//   4. prune stale owners
//
// Price mutation is not idempotent, so ticks never overlap: a tick requested
// while another holds the guard is skipped. A failure on one car or one
// sub-job is recorded and the rest of the tick carries on; the next tick
// re-classifies from scratch and picks up whatever was left behind.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::entities::Car;
use crate::error::{CarError, CarResult, SchedulerError};
use crate::service::CarService;
use crate::store::AggregateStore;
use crate::windows::DiscountWindows;

/// Default time between two ticks (one hour)
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// TICK REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubJob {
    Undiscount,
    Discount,
    OwnerCleanup,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubJobFailure {
    pub job: SubJob,
    /// None when the whole sub-job failed (e.g. its classification query)
    pub car_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub undiscounted: Vec<String>,
    pub discounted: Vec<String>,
    pub owners_removed: usize,
    pub failures: Vec<SubJobFailure>,
}

impl TickReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        TickReport {
            started_at,
            undiscounted: Vec::new(),
            discounted: Vec::new(),
            owners_removed: 0,
            failures: Vec::new(),
        }
    }

    fn record_failure(&mut self, job: SubJob, car_id: Option<String>, error: &CarError) {
        warn!(?job, car_id = car_id.as_deref().unwrap_or("-"), %error, "reconciliation sub-job failed");
        self.failures.push(SubJobFailure {
            job,
            car_id,
            message: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Reconciliation at {}: {} undiscounted, {} discounted, {} owners removed, {} failures",
            self.started_at.to_rfc3339(),
            self.undiscounted.len(),
            self.discounted.len(),
            self.owners_removed,
            self.failures.len()
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick was still running
    Skipped,
}

impl TickOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            TickOutcome::Completed(report) => Some(report),
            TickOutcome::Skipped => None,
        }
    }
}

// ============================================================================
// TICK
// ============================================================================

async fn apply_all<F, Fut>(
    report: &mut TickReport,
    job: SubJob,
    candidates: CarResult<Vec<Car>>,
    mut transition: F,
) -> Vec<String>
where
    F: FnMut(Car) -> Fut,
    Fut: std::future::Future<Output = CarResult<Car>>,
{
    let mut applied = Vec::new();

    let cars = match candidates {
        Ok(cars) => cars,
        Err(e) => {
            report.record_failure(job, None, &e);
            return applied;
        }
    };

    for car in cars {
        let id = car.id.clone();
        match transition(car).await {
            Ok(_) => applied.push(id),
            Err(e) => report.record_failure(job, Some(id), &e),
        }
    }

    applied
}

/// One full reconciliation pass evaluated at `now`
pub async fn reconcile<S: AggregateStore>(service: &CarService<S>, now: DateTime<Utc>) -> TickReport {
    let windows = DiscountWindows::at(now);
    let mut report = TickReport::new(now);

    info!("processing car discounts");

    // Both sets come from the pre-tick state, so no car moves twice
    let to_undiscount = service.classify_to_undiscount_at(&windows).await;
    let to_discount = service.classify_to_discount_at(&windows).await;

    let undiscounted = apply_all(&mut report, SubJob::Undiscount, to_undiscount, move |car| {
        service.apply_undiscount(car)
    })
    .await;
    report.undiscounted = undiscounted;

    let discounted = apply_all(&mut report, SubJob::Discount, to_discount, move |car| {
        service.apply_discount(car)
    })
    .await;
    report.discounted = discounted;

    info!("processing owners removal");
    match service.cleanup_owners_at(&windows).await {
        Ok(removed) => report.owners_removed = removed,
        Err(e) => report.record_failure(SubJob::OwnerCleanup, None, &e),
    }

    report
}

async fn guarded_tick<S: AggregateStore>(
    service: &CarService<S>,
    guard: &Mutex<()>,
    now: DateTime<Utc>,
) -> TickOutcome {
    let Ok(_running) = guard.try_lock() else {
        debug!("previous reconciliation tick still running, skipping");
        return TickOutcome::Skipped;
    };

    let report = reconcile(service, now).await;
    if report.is_clean() {
        info!("{}", report.summary());
    } else {
        warn!("{}", report.summary());
    }

    TickOutcome::Completed(report)
}

// ============================================================================
// TICK HANDLE
// ============================================================================

/// Shareable trigger for on-demand ticks; respects the scheduler's guard
pub struct TickHandle<S> {
    service: CarService<S>,
    guard: Arc<Mutex<()>>,
}

impl<S> Clone for TickHandle<S> {
    fn clone(&self) -> Self {
        TickHandle {
            service: self.service.clone(),
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<S: AggregateStore> TickHandle<S> {
    pub async fn run_tick(&self) -> TickOutcome {
        guarded_tick(&self.service, &self.guard, Utc::now()).await
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

struct RunningJob {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct DiscountScheduler<S> {
    service: CarService<S>,
    interval: Duration,
    tick_guard: Arc<Mutex<()>>,
    running: Option<RunningJob>,
}

impl<S: AggregateStore + 'static> DiscountScheduler<S> {
    pub fn new(service: CarService<S>) -> Self {
        DiscountScheduler {
            service,
            interval: DEFAULT_TICK_INTERVAL,
            tick_guard: Arc::new(Mutex::new(())),
            running: None,
        }
    }

    pub fn with_interval(service: CarService<S>, interval: Duration) -> Result<Self, SchedulerError> {
        let mut scheduler = Self::new(service);
        scheduler.set_interval(interval)?;
        Ok(scheduler)
    }

    /// Takes effect on the next `start`
    pub fn set_interval(&mut self, interval: Duration) -> Result<(), SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }
        self.interval = interval;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn service(&self) -> &CarService<S> {
        &self.service
    }

    pub fn tick_handle(&self) -> TickHandle<S> {
        TickHandle {
            service: self.service.clone(),
            guard: Arc::clone(&self.tick_guard),
        }
    }

    /// Run one tick now, unless a tick is already in progress
    pub async fn run_tick(&self) -> TickOutcome {
        self.run_tick_at(Utc::now()).await
    }

    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        guarded_tick(&self.service, &self.tick_guard, now).await
    }

    /// Start the repeating timer. The first tick fires one interval from now.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.running.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let service = self.service.clone();
        let guard = Arc::clone(&self.tick_guard);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                // Shutdown wins over a tick that came due while the last one ran
                tokio::select! {
                    biased;
                    // Also fires when the sender is dropped
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                // Not raced against shutdown: an in-flight tick always completes
                guarded_tick(&service, &guard, Utc::now()).await;
            }

            debug!("discount scheduler loop exited");
        });

        info!(interval_secs = period.as_secs_f64(), "discount scheduler started");
        self.running = Some(RunningJob { shutdown, handle });
        Ok(())
    }

    /// Stop scheduling ticks and wait for an in-flight tick to finish
    pub async fn stop(&mut self) {
        let Some(job) = self.running.take() else {
            return;
        };

        let _ = job.shutdown.send(true);
        if let Err(e) = job.handle.await {
            warn!(error = %e, "discount scheduler task ended abnormally");
        }

        info!("discount scheduler stopped");
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Manufacturer, Owner};
    use crate::error::StoreResult;
    use crate::store::{Removal, SqliteStore};
    use crate::windows::RegistrationRange;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 15, 9, 0, 0).unwrap()
    }

    fn car(id: &str, price: f64, registered: DateTime<Utc>, discounted: bool) -> Car {
        let mut car = Car::new(id, Manufacturer::new("m-1", "Renault", "0102030405", 1), price, registered);
        car.discounted = discounted;
        car
    }

    fn service() -> CarService<SqliteStore> {
        CarService::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    /// Counts ticks and makes the owner cleanup slow
    struct SlowCleanupStore {
        inner: SqliteStore,
        ticks_started: AtomicUsize,
        cleanups_finished: AtomicUsize,
    }

    impl SlowCleanupStore {
        fn new() -> Self {
            SlowCleanupStore {
                inner: SqliteStore::open_in_memory().unwrap(),
                ticks_started: AtomicUsize::new(0),
                cleanups_finished: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AggregateStore for SlowCleanupStore {
        async fn find_by_id(&self, id: &str) -> StoreResult<Option<Car>> {
            self.inner.find_by_id(id).await
        }
        async fn find_all(&self) -> StoreResult<Vec<Car>> {
            self.inner.find_all().await
        }
        async fn find_where_discounted(&self, d: bool, r: RegistrationRange) -> StoreResult<Vec<Car>> {
            // Undiscount classification opens every tick
            if d {
                self.ticks_started.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.find_where_discounted(d, r).await
        }
        async fn save(&self, car: &Car) -> StoreResult<Car> {
            self.inner.save(car).await
        }
        async fn save_discount_state(&self, car: &Car, expected: bool) -> StoreResult<bool> {
            self.inner.save_discount_state(car, expected).await
        }
        async fn remove(&self, id: &str) -> StoreResult<Removal> {
            self.inner.remove(id).await
        }
        async fn delete_owners_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let removed = self.inner.delete_owners_older_than(cutoff).await;
            self.cleanups_finished.fetch_add(1, Ordering::SeqCst);
            removed
        }
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut scheduler = DiscountScheduler::new(service());

        assert_eq!(scheduler.interval(), DEFAULT_TICK_INTERVAL);
        assert_eq!(scheduler.set_interval(Duration::ZERO), Err(SchedulerError::ZeroInterval));
        assert_eq!(scheduler.interval(), DEFAULT_TICK_INTERVAL);
    }

    #[tokio::test]
    async fn test_tick_leaves_cars_outside_windows_alone() {
        let service = service();
        service
            .create(car("young", 1000.0, now() - ChronoDuration::days(60), false))
            .await
            .unwrap();
        service
            .create(car("old", 1000.0, now() - ChronoDuration::days(900), false))
            .await
            .unwrap();

        let report = reconcile(&service, now()).await;

        assert!(report.is_clean());
        assert!(report.discounted.is_empty());
        assert!(report.undiscounted.is_empty());
        for id in ["young", "old"] {
            let after = service.get(id).await.unwrap();
            assert_eq!(after.price, 1000.0);
            assert!(!after.discounted);
        }
    }

    #[tokio::test]
    async fn test_each_car_transitions_at_most_once_per_tick() {
        let service = service();
        // Discounted and inside the discount window: undiscounted, not re-discounted
        service
            .create(car("Car2", 800.0, now() - ChronoDuration::days(395), true))
            .await
            .unwrap();

        let report = reconcile(&service, now()).await;

        assert_eq!(report.undiscounted, vec!["Car2"]);
        assert!(report.discounted.is_empty());
        let after = service.get("Car2").await.unwrap();
        assert!(!after.discounted);
        assert_eq!(after.price, 1000.0);
    }

    #[tokio::test]
    async fn test_tick_is_skipped_while_another_holds_the_guard() {
        let scheduler = DiscountScheduler::new(service());
        let _held = scheduler.tick_guard.lock().await;

        let outcome = scheduler.run_tick_at(now()).await;

        assert!(matches!(outcome, TickOutcome::Skipped));
        assert!(outcome.report().is_none());
        assert!(matches!(scheduler.tick_handle().run_tick().await, TickOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_start_twice_is_refused_and_stop_is_idempotent() {
        let mut scheduler = DiscountScheduler::new(service());

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert_eq!(scheduler.start(), Err(SchedulerError::AlreadyStarted));

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_tick_and_starts_no_other() {
        for _ in 0..5 {
            let store = Arc::new(SlowCleanupStore::new());
            let service = CarService::new(Arc::clone(&store));
            let mut scheduler = DiscountScheduler::with_interval(service, Duration::from_millis(10)).unwrap();

            scheduler.start().unwrap();
            while store.ticks_started.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            scheduler.stop().await;

            // The running tick finished its cleanup; the overdue one never began
            assert_eq!(store.cleanups_finished.load(Ordering::SeqCst), 1);
            assert_eq!(store.ticks_started.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_timer_ends_expired_discounts_and_prunes_owners() {
        let service = service();
        service
            .create(
                car("CarDiscounted", 800.0, Utc::now() - ChronoDuration::days(800), true)
                    .with_owner(Owner::purchased_at("Old", "Old", Utc::now() - ChronoDuration::days(700))),
            )
            .await
            .unwrap();
        service
            .create(car("Young", 1000.0, Utc::now() - ChronoDuration::days(30), false))
            .await
            .unwrap();

        let mut scheduler = DiscountScheduler::with_interval(service.clone(), Duration::from_millis(50)).unwrap();
        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop().await;

        let restored = service.get("CarDiscounted").await.unwrap();
        assert!(!restored.discounted);
        assert_eq!(restored.price, 1000.0);
        assert!(restored.owners.is_empty());

        let young = service.get("Young").await.unwrap();
        assert_eq!(young.price, 1000.0);
        assert!(!young.discounted);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let json = serde_json::to_value(TickOutcome::Skipped).unwrap();
        assert_eq!(json["outcome"], "skipped");

        let json = serde_json::to_value(TickOutcome::Completed(TickReport::new(now()))).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["owners_removed"], 0);
    }
}
