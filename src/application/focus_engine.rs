use crate::domain::focus_timer::{FocusTimer, TimerTransition};
use crate::domain::models::{EndedFocusSession, RemoteFocusStatus, TimerSnapshot};
use crate::infrastructure::config::EndRetryConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::focus_api_client::{FocusApiClient, FocusEndResponse};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, sleep, MissedTickBehavior};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl From<&EndRetryConfig> for RetryPolicy {
    fn from(config: &EndRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
        }
    }
}

/// Counts live tick tasks; the count drops when the task future is dropped.
struct LiveTick {
    counter: Arc<AtomicUsize>,
}

impl LiveTick {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for LiveTick {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drives a [`FocusTimer`]: arms the periodic tick, talks to the focus API and
/// publishes every state change as a [`TimerSnapshot`].
///
/// Lock order is ticker slot, then timer. The timer lock is never held across
/// an await.
pub struct FocusTimerEngine<C>
where
    C: FocusApiClient + 'static,
{
    api_client: Arc<C>,
    timer: Arc<Mutex<FocusTimer>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    live_ticks: Arc<AtomicUsize>,
    snapshots: Arc<watch::Sender<TimerSnapshot>>,
    now_provider: NowProvider,
    tick_interval: Duration,
    retry_policy: RetryPolicy,
}

impl<C> FocusTimerEngine<C>
where
    C: FocusApiClient + 'static,
{
    pub fn new(api_client: Arc<C>, fallback_subject: impl Into<String>) -> Self {
        let (snapshots, _) = watch::channel(TimerSnapshot::default());
        Self {
            api_client,
            timer: Arc::new(Mutex::new(FocusTimer::new(fallback_subject))),
            ticker: Mutex::new(None),
            live_ticks: Arc::new(AtomicUsize::new(0)),
            snapshots: Arc::new(snapshots),
            now_provider: Arc::new(Utc::now),
            tick_interval: DEFAULT_TICK_INTERVAL,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Result<TimerSnapshot, InfraError> {
        let now = self.now();
        Ok(self.lock_timer()?.snapshot_at(now))
    }

    pub fn live_tick_count(&self) -> usize {
        self.live_ticks.load(Ordering::SeqCst)
    }

    pub fn reset(&self) -> Result<TimerSnapshot, InfraError> {
        self.transition(|timer, _| {
            timer.reset();
            Ok(TimerTransition::Unchanged)
        })
    }

    /// Starts a fresh session or resumes a paused one. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self, subject: &str) -> Result<TimerSnapshot, InfraError> {
        self.transition(|timer, now| timer.start(subject, now))
    }

    pub fn pause(&self) -> Result<TimerSnapshot, InfraError> {
        self.transition(|timer, now| Ok(timer.pause(now)))
    }

    pub fn toggle(&self, subject: &str) -> Result<TimerSnapshot, InfraError> {
        self.transition(|timer, now| timer.toggle(subject, now))
    }

    /// Closes the active session on the server. `Ok(None)` when there is no
    /// session. On failure the local elapsed time is kept so the call can be
    /// repeated.
    pub async fn end(&self) -> Result<Option<EndedFocusSession>, InfraError> {
        let pending = {
            let mut slot = self.lock_ticker()?;
            let now = self.now();
            let (pending, snapshot) = {
                let mut timer = self.lock_timer()?;
                let pending = timer.begin_end(now);
                (pending, timer.snapshot_at(now))
            };
            let Some(pending) = pending else {
                return Ok(None);
            };
            self.sync_ticker(&mut slot, false);
            self.publish(snapshot);
            pending
        };

        match self.end_with_retry().await {
            Ok(response) => {
                let ended_at = self.now();
                let snapshot = {
                    let mut timer = self.lock_timer()?;
                    timer
                        .complete_end(pending.generation)
                        .then(|| timer.snapshot_at(ended_at))
                };
                match snapshot {
                    Some(snapshot) => self.publish(snapshot),
                    None => log::warn!(
                        "focus close confirmed after the timer was reset; keeping the current session"
                    ),
                }
                log::info!(
                    "focus session closed subject={} duration_minutes={}",
                    pending.subject,
                    response.duration_minutes
                );
                Ok(Some(EndedFocusSession {
                    subject: pending.subject,
                    session_started_at: pending.session_started_at,
                    ended_at,
                    elapsed_seconds: pending.elapsed_seconds,
                    duration_minutes: response.duration_minutes,
                }))
            }
            Err(error) => {
                let now = self.now();
                let snapshot = {
                    let mut timer = self.lock_timer()?;
                    timer.abort_end(pending.generation).then(|| timer.snapshot_at(now))
                };
                if let Some(snapshot) = snapshot {
                    self.publish(snapshot);
                }
                log::error!("error ending focus session: {error}");
                Err(error)
            }
        }
    }

    pub async fn check_remote_session(&self) -> Result<RemoteFocusStatus, InfraError> {
        self.api_client.current_session().await
    }

    fn transition<F>(&self, operation: F) -> Result<TimerSnapshot, InfraError>
    where
        F: FnOnce(&mut FocusTimer, DateTime<Utc>) -> Result<TimerTransition, InfraError>,
    {
        let mut slot = self.lock_ticker()?;
        let now = self.now();
        let (transition, armed, snapshot) = {
            let mut timer = self.lock_timer()?;
            let transition = operation(&mut *timer, now)?;
            (transition, timer.is_tick_armed(), timer.snapshot_at(now))
        };

        self.sync_ticker(&mut slot, armed);
        drop(slot);

        match &transition {
            TimerTransition::Started { subject } => {
                log::info!("focus timer started subject={subject}");
                self.notify_start(subject.clone());
            }
            TimerTransition::Resumed => log::info!("focus timer resumed"),
            TimerTransition::Paused => {
                log::info!("focus timer paused elapsed_seconds={}", snapshot.elapsed_seconds)
            }
            TimerTransition::Unchanged => {}
        }

        self.publish(snapshot.clone());
        Ok(snapshot)
    }

    fn sync_ticker(&self, slot: &mut Option<JoinHandle<()>>, armed: bool) {
        if armed {
            let live = slot.as_ref().is_some_and(|handle| !handle.is_finished());
            if !live {
                *slot = Some(self.spawn_ticker());
            }
        } else if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let timer = Arc::clone(&self.timer);
        let snapshots = Arc::clone(&self.snapshots);
        let now_provider = Arc::clone(&self.now_provider);
        let period = self.tick_interval;
        let live_tick = LiveTick::new(Arc::clone(&self.live_ticks));

        tokio::spawn(async move {
            let _live_tick = live_tick;
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let snapshot = {
                    let Ok(mut state) = timer.lock() else {
                        break;
                    };
                    match state.tick(now_provider()) {
                        Some(snapshot) => snapshot,
                        None => break,
                    }
                };
                snapshots.send_replace(snapshot);
            }
        })
    }

    /// Fire-and-forget: a failed notification is logged and the local timer
    /// keeps running.
    fn notify_start(&self, subject: String) {
        let api_client = Arc::clone(&self.api_client);
        tokio::spawn(async move {
            match api_client.start_session(&subject).await {
                Ok(()) => log::debug!("focus start recorded subject={subject}"),
                Err(error) => log::error!("error starting focus session: {error}"),
            }
        });
    }

    async fn end_with_retry(&self) -> Result<FocusEndResponse, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.api_client.end_session().await {
                Ok(response) => return Ok(response),
                Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    log::warn!("retrying focus end in {delay}ms after: {error}");
                    sleep(Duration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn publish(&self, snapshot: TimerSnapshot) {
        self.snapshots.send_replace(snapshot);
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn lock_timer(&self) -> Result<MutexGuard<'_, FocusTimer>, InfraError> {
        self.timer
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("focus timer lock poisoned: {error}")))
    }

    fn lock_ticker(&self) -> Result<MutexGuard<'_, Option<JoinHandle<()>>>, InfraError> {
        self.ticker
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("ticker lock poisoned: {error}")))
    }
}

impl<C> Drop for FocusTimerEngine<C>
where
    C: FocusApiClient + 'static,
{
    fn drop(&mut self) {
        if let Ok(slot) = self.ticker.get_mut() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

fn should_retry(error: &InfraError) -> bool {
    match error {
        InfraError::Http(message) => {
            let message = message.to_ascii_lowercase();
            message.contains("network error")
                || message.contains("timed out")
                || message.contains("connection reset")
        }
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::models::FocusState;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicI64;

    const EPOCH_MS: i64 = 1_760_000_000_000;

    #[derive(Debug, Default)]
    pub(crate) struct FakeFocusApiClient {
        pub start_calls: AtomicUsize,
        pub end_calls: AtomicUsize,
        pub last_subject: Mutex<Option<String>>,
        pub fail_start: Mutex<Option<String>>,
        pub end_responses: Mutex<VecDeque<Result<i64, String>>>,
        pub current_response: Mutex<Option<RemoteFocusStatus>>,
    }

    impl FakeFocusApiClient {
        pub fn push_end_response(&self, response: Result<i64, String>) {
            self.end_responses
                .lock()
                .expect("end responses mutex poisoned")
                .push_back(response);
        }
    }

    #[async_trait]
    impl FocusApiClient for FakeFocusApiClient {
        async fn start_session(&self, subject: &str) -> Result<(), InfraError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_subject.lock().expect("subject mutex poisoned") = Some(subject.to_string());
            match self.fail_start.lock().expect("fail start mutex poisoned").clone() {
                Some(message) => Err(InfraError::Http(message)),
                None => Ok(()),
            }
        }

        async fn end_session(&self) -> Result<FocusEndResponse, InfraError> {
            self.end_calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .end_responses
                .lock()
                .expect("end responses mutex poisoned")
                .pop_front()
                .unwrap_or(Ok(25));
            next.map(|duration_minutes| FocusEndResponse { duration_minutes })
                .map_err(InfraError::Http)
        }

        async fn current_session(&self) -> Result<RemoteFocusStatus, InfraError> {
            self.current_response
                .lock()
                .expect("current mutex poisoned")
                .clone()
                .ok_or_else(|| InfraError::Http("network error while checking focus session".to_string()))
        }
    }

    #[derive(Clone)]
    pub(crate) struct ManualClock {
        millis: Arc<AtomicI64>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                millis: Arc::new(AtomicI64::new(EPOCH_MS)),
            }
        }

        pub fn set_seconds(&self, seconds: i64) {
            self.millis.store(EPOCH_MS + seconds * 1000, Ordering::SeqCst);
        }

        pub fn at_seconds(seconds: i64) -> DateTime<Utc> {
            Utc.timestamp_millis_opt(EPOCH_MS + seconds * 1000)
                .single()
                .expect("valid timestamp")
        }

        pub fn provider(&self) -> NowProvider {
            let millis = Arc::clone(&self.millis);
            Arc::new(move || {
                Utc.timestamp_millis_opt(millis.load(Ordering::SeqCst))
                    .single()
                    .expect("valid timestamp")
            })
        }
    }

    pub(crate) async fn wait_until<F>(condition: F)
    where
        F: Fn() -> bool,
    {
        for _ in 0..400 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition was not reached in time");
    }

    fn engine_with(client: &Arc<FakeFocusApiClient>, clock: &ManualClock) -> FocusTimerEngine<FakeFocusApiClient> {
        FocusTimerEngine::new(Arc::clone(client), "General Study")
            .with_now_provider(clock.provider())
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
            })
    }

    #[tokio::test]
    async fn double_start_arms_one_tick_and_notifies_once() {
        let client = Arc::new(FakeFocusApiClient::default());
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        engine.start("Calculus II").expect("first start");
        let second = engine.start("Calculus II").expect("second start");

        assert_eq!(second.state, FocusState::Running);
        assert_eq!(engine.live_tick_count(), 1);
        wait_until(|| client.start_calls.load(Ordering::SeqCst) == 1).await;
        sleep(Duration::from_millis(20)).await;
        assert_eq!(client.start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *client.last_subject.lock().expect("subject mutex poisoned"),
            Some("Calculus II".to_string())
        );
    }

    #[tokio::test]
    async fn resume_does_not_count_paused_wall_clock_time() {
        let client = Arc::new(FakeFocusApiClient::default());
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        engine.start("Linear Algebra").expect("start");
        clock.set_seconds(10);
        let paused = engine.pause().expect("pause");
        assert_eq!(paused.elapsed_seconds, 10);

        clock.set_seconds(100);
        engine.start("Linear Algebra").expect("resume");
        clock.set_seconds(105);
        assert_eq!(engine.snapshot().expect("snapshot").elapsed_seconds, 15);

        wait_until(|| client.start_calls.load(Ordering::SeqCst) == 1).await;
        sleep(Duration::from_millis(20)).await;
        assert_eq!(client.start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pause_cancels_the_tick_task() {
        let client = Arc::new(FakeFocusApiClient::default());
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        engine.start("Physics").expect("start");
        clock.set_seconds(30);
        let first = engine.pause().expect("pause");
        clock.set_seconds(60);
        let second = engine.pause().expect("pause again");

        assert_eq!(first.elapsed_seconds, 30);
        assert_eq!(second.elapsed_seconds, 30);
        assert_eq!(second.state, FocusState::Paused);
        wait_until(|| engine.live_tick_count() == 0).await;
    }

    #[tokio::test]
    async fn toggle_starts_then_pauses() {
        let client = Arc::new(FakeFocusApiClient::default());
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        let started = engine.toggle("Chemistry").expect("toggle start");
        assert_eq!(started.state, FocusState::Running);
        assert!(started.tick_armed);

        clock.set_seconds(7);
        let paused = engine.toggle("Chemistry").expect("toggle pause");
        assert_eq!(paused.state, FocusState::Paused);
        assert_eq!(paused.elapsed_seconds, 7);
        assert!(!paused.tick_armed);
    }

    #[tokio::test]
    async fn ticks_publish_clock_derived_snapshots() {
        let client = Arc::new(FakeFocusApiClient::default());
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock).with_tick_interval(Duration::from_millis(10));
        let receiver = engine.subscribe();

        engine.start("Biology").expect("start");
        clock.set_seconds(1805);

        wait_until(|| receiver.borrow().elapsed_seconds == 1805).await;
        let latest = receiver.borrow().clone();
        assert_eq!(latest.state, FocusState::Running);
        assert!((latest.progress_fraction - 1805.0 / 3600.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_start_notification_keeps_timer_running() {
        let client = Arc::new(FakeFocusApiClient::default());
        *client.fail_start.lock().expect("fail start mutex poisoned") =
            Some("network error while starting focus session".to_string());
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        engine.start("History").expect("start");
        wait_until(|| client.start_calls.load(Ordering::SeqCst) == 1).await;

        let snapshot = engine.snapshot().expect("snapshot");
        assert_eq!(snapshot.state, FocusState::Running);
        assert!(snapshot.tick_armed);
    }

    #[tokio::test]
    async fn successful_end_returns_server_duration_and_resets() {
        let client = Arc::new(FakeFocusApiClient::default());
        client.push_end_response(Ok(95));
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        engine.start("Literature").expect("start");
        clock.set_seconds(5700);
        let ended = engine.end().await.expect("end").expect("ended session");

        assert_eq!(ended.duration_minutes, 95);
        assert_eq!(ended.elapsed_seconds, 5700);
        assert_eq!(ended.subject, "Literature");
        assert_eq!(ended.session_started_at, ManualClock::at_seconds(0));
        assert_eq!(engine.snapshot().expect("snapshot"), TimerSnapshot::default());
        wait_until(|| engine.live_tick_count() == 0).await;
    }

    #[tokio::test]
    async fn failed_end_leaves_elapsed_and_anchor_untouched() {
        let client = Arc::new(FakeFocusApiClient::default());
        client.push_end_response(Err("focus api error: http 500".to_string()));
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        engine.start("Statistics").expect("start");
        clock.set_seconds(40);
        let before = engine.pause().expect("pause");

        clock.set_seconds(50);
        let result = engine.end().await;
        assert!(matches!(result, Err(InfraError::Http(_))));
        assert_eq!(client.end_calls.load(Ordering::SeqCst), 1);

        let after = engine.snapshot().expect("snapshot");
        assert_eq!(after.elapsed_seconds, before.elapsed_seconds);
        assert_eq!(after.started_at, before.started_at);
        assert_eq!(after.state, FocusState::Paused);

        let retried = engine.end().await.expect("retry end").expect("ended session");
        assert_eq!(retried.elapsed_seconds, 40);
    }

    #[tokio::test]
    async fn end_retries_network_failures() {
        let client = Arc::new(FakeFocusApiClient::default());
        client.push_end_response(Err("network error while ending focus session".to_string()));
        client.push_end_response(Ok(12));
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        engine.start("Geometry").expect("start");
        let ended = engine.end().await.expect("end").expect("ended session");

        assert_eq!(ended.duration_minutes, 12);
        assert_eq!(client.end_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn end_without_session_does_not_call_server() {
        let client = Arc::new(FakeFocusApiClient::default());
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        assert!(engine.end().await.expect("end").is_none());
        assert_eq!(client.end_calls.load(Ordering::SeqCst), 0);
    }

    /// Holds every close reply until `release` is notified.
    #[derive(Default)]
    struct HeldEndClient {
        inner: FakeFocusApiClient,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl FocusApiClient for HeldEndClient {
        async fn start_session(&self, subject: &str) -> Result<(), InfraError> {
            self.inner.start_session(subject).await
        }

        async fn end_session(&self) -> Result<FocusEndResponse, InfraError> {
            self.inner.end_calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(FocusEndResponse { duration_minutes: 40 })
        }

        async fn current_session(&self) -> Result<RemoteFocusStatus, InfraError> {
            self.inner.current_session().await
        }
    }

    #[tokio::test]
    async fn late_close_reply_keeps_session_started_after_reset() {
        let client = Arc::new(HeldEndClient::default());
        let clock = ManualClock::new();
        let engine = FocusTimerEngine::new(Arc::clone(&client), "General Study")
            .with_now_provider(clock.provider());

        engine.start("Old").expect("start old");
        clock.set_seconds(2400);

        let closing = engine.end();
        let restart = async {
            wait_until(|| client.inner.end_calls.load(Ordering::SeqCst) == 1).await;
            engine.reset().expect("reset");
            clock.set_seconds(2500);
            let started = engine.start("New").expect("start new");
            client.release.notify_one();
            started
        };
        let (ended, started) = tokio::join!(closing, restart);

        let ended = ended.expect("end").expect("ended session");
        assert_eq!(ended.subject, "Old");
        assert_eq!(ended.duration_minutes, 40);
        assert_eq!(started.state, FocusState::Running);

        clock.set_seconds(2530);
        let current = engine.snapshot().expect("snapshot");
        assert_eq!(current.state, FocusState::Running);
        assert_eq!(current.subject.as_deref(), Some("New"));
        assert_eq!(current.elapsed_seconds, 30);
        assert!(current.tick_armed);
        assert_eq!(engine.live_tick_count(), 1);
    }

    #[tokio::test]
    async fn dropping_engine_aborts_tick_task() {
        let client = Arc::new(FakeFocusApiClient::default());
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        engine.start("Astronomy").expect("start");
        let live_ticks = Arc::clone(&engine.live_ticks);
        assert_eq!(live_ticks.load(Ordering::SeqCst), 1);

        drop(engine);
        wait_until(|| live_ticks.load(Ordering::SeqCst) == 0).await;
    }

    #[tokio::test]
    async fn reset_clears_running_session() {
        let client = Arc::new(FakeFocusApiClient::default());
        let clock = ManualClock::new();
        let engine = engine_with(&client, &clock);

        engine.start("Art History").expect("start");
        clock.set_seconds(20);
        let snapshot = engine.reset().expect("reset");

        assert_eq!(snapshot, TimerSnapshot::default());
        wait_until(|| engine.live_tick_count() == 0).await;
    }
}
