use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{Local, NaiveDateTime};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{
    availability::parse,
    model::{HistoryEntry, MonitorConfig, MonitorSnapshot, HISTORY_CAPACITY},
};
use crate::{
    availability_client::AvailabilityFetcher,
    history::{format_error_line, format_summary_line, log_files::CycleLog},
    notifier::Notifier,
};

pub const NOTIFICATION_TITLE: &str = "Appointment available";

/// Runtime state of the monitor and the handle to its poll loop.
///
/// All fields sit behind one mutex that is only held for in-memory updates,
/// never across the fetch, the notification or the cycle log write.
pub struct MonitorState {
    inner: Mutex<RuntimeState>,
    fetcher: Arc<dyn AvailabilityFetcher>,
    notifier: Arc<dyn Notifier>,
    cycle_log: Arc<dyn CycleLog>,
}

struct RuntimeState {
    running: bool,
    config: MonitorConfig,
    last_checked_at: Option<NaiveDateTime>,
    last_available_count: usize,
    last_available_dates: Vec<String>,
    last_provider_code: Option<String>,
    last_error: Option<String>,
    history: VecDeque<HistoryEntry>,
    // Each run gets its own stop channel, so a loop from an earlier run
    // exits even if the monitor was restarted in the meantime.
    stop_signal: Option<watch::Sender<bool>>,
}

impl RuntimeState {
    fn new(config: MonitorConfig) -> Self {
        Self {
            running: false,
            config,
            last_checked_at: None,
            last_available_count: 0,
            last_available_dates: Vec::new(),
            last_provider_code: None,
            last_error: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            stop_signal: None,
        }
    }

    fn record(&mut self, entry: HistoryEntry) {
        self.last_checked_at = Some(entry.checked_at);
        match (&entry.error, entry.available_count) {
            (Some(error), _) => self.last_error = Some(error.clone()),
            (None, count) => {
                self.last_available_count = count.unwrap_or_default();
                self.last_available_dates = entry.available_dates.clone();
                self.last_provider_code = entry.provider_code.clone();
                self.last_error = None;
            }
        }

        self.history.push_back(entry);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }

    fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            running: self.running,
            config: self.config.clone(),
            last_checked_at: self.last_checked_at,
            last_available_count: self.last_available_count,
            last_available_dates: self.last_available_dates.clone(),
            last_provider_code: self.last_provider_code.clone(),
            last_error: self.last_error.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }
}

impl MonitorState {
    pub fn new(
        config: MonitorConfig,
        fetcher: Arc<dyn AvailabilityFetcher>,
        notifier: Arc<dyn Notifier>,
        cycle_log: Arc<dyn CycleLog>,
    ) -> Self {
        Self {
            inner: Mutex::new(RuntimeState::new(config)),
            fetcher,
            notifier,
            cycle_log,
        }
    }

    /// Spawns the poll loop unless it is already running. Returns whether a
    /// loop was started. Must be called inside a tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let stop = {
            let mut state = self.lock();
            if state.running {
                return false;
            }
            state.running = true;
            let (stop_tx, stop_rx) = watch::channel(false);
            state.stop_signal = Some(stop_tx);
            stop_rx
        };

        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.run(stop).await });
        info!("monitor started");
        true
    }

    /// Requests the loop to stop and returns immediately. A sleeping loop
    /// wakes at once; a fetch in flight completes but its result is dropped.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        let was_running = state.running;
        state.running = false;
        if let Some(stop_tx) = state.stop_signal.take() {
            stop_tx.send_replace(true);
        }
        drop(state);

        if was_running {
            info!("monitor stopped");
        }
        was_running
    }

    /// Takes effect from the next cycle.
    pub fn update_config(&self, config: MonitorConfig) {
        let mut state = self.lock();
        state.config = config;
        debug!(
            interval_seconds = state.config.interval_seconds,
            notify_on_available = state.config.notify_on_available,
            "monitor config updated"
        );
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.lock().snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        while let Some(config) = self.config_for_next_cycle(&stop) {
            self.run_cycle(&config, &stop).await;

            tokio::select! {
                _ = tokio::time::sleep(config.interval()) => {}
                _ = stop.wait_for(|stopped| *stopped) => {}
            }
        }
        debug!("poll loop exited");
    }

    fn config_for_next_cycle(&self, stop: &watch::Receiver<bool>) -> Option<MonitorConfig> {
        let state = self.lock();
        if !state.running || *stop.borrow() {
            return None;
        }
        Some(state.config.clone())
    }

    /// Stores the cycle outcome unless this run has been stopped meanwhile.
    fn record(&self, entry: HistoryEntry, stop: &watch::Receiver<bool>) -> bool {
        let mut state = self.lock();
        if *stop.borrow() {
            return false;
        }
        state.record(entry);
        true
    }

    async fn run_cycle(&self, config: &MonitorConfig, stop: &watch::Receiver<bool>) {
        let outcome = self.fetcher.fetch().await;
        let checked_at = Local::now().naive_local();

        match outcome {
            Ok(document) => {
                let (count, dates) = parse(&document, &config.filter);
                let entry = HistoryEntry::success(
                    checked_at,
                    count,
                    dates.clone(),
                    document.provider_code(),
                );
                if !self.record(entry, stop) {
                    debug!("discarding cycle result after stop");
                    return;
                }

                info!(available = count, dates = ?dates, "monitor cycle completed");
                self.append_log(&format_summary_line(&checked_at, count, &dates))
                    .await;

                if count > 0 && config.notify_on_available {
                    let body = format!(
                        "Available dates matching your criteria: {}",
                        dates.join(", ")
                    );
                    if self.notifier.notify(NOTIFICATION_TITLE, &body).await {
                        info!(dates = ?dates, "availability notification sent");
                    } else {
                        warn!(dates = ?dates, "availability notification was not delivered");
                    }
                }
            }
            Err(err) => {
                let message = err.to_string();
                if !self.record(HistoryEntry::failure(checked_at, message.clone()), stop) {
                    debug!("discarding cycle error after stop");
                    return;
                }

                error!(error = %message, "monitoring error");
                self.append_log(&format_error_line(&checked_at, &message)).await;
            }
        }
    }

    async fn append_log(&self, line: &str) {
        if let Err(err) = self.cycle_log.append_line(line).await {
            warn!(error = %err, "failed to append cycle log line");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            OnceLock,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        errors::FetchError,
        monitor::{availability::AvailabilityDocument, model::DateFilter},
    };

    fn sample_document() -> AvailabilityDocument {
        AvailabilityDocument::from_value(json!({
            "dateQuota": {"20260213": "A", "20260214": "F", "20260215": "A"},
            "eaiCode": "SUCCESS"
        }))
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<AvailabilityDocument, FetchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<AvailabilityDocument, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AvailabilityFetcher for ScriptedFetcher {
        async fn fetch(&self) -> Result<AvailabilityDocument, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| Ok(sample_document()))
        }
    }

    struct GatedFetcher {
        release: Notify,
    }

    #[async_trait]
    impl AvailabilityFetcher for GatedFetcher {
        async fn fetch(&self) -> Result<AvailabilityDocument, FetchError> {
            self.release.notified().await;
            Ok(sample_document())
        }
    }

    struct RecordingNotifier {
        delivered: bool,
        messages: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        fn new(delivered: bool) -> Arc<Self> {
            Arc::new(Self {
                delivered,
                messages: Mutex::new(Vec::new()),
            })
        }

        fn messages(&self) -> Vec<(String, String)> {
            self.messages.lock().expect("messages lock").clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, title: &str, body: &str) -> bool {
            self.messages
                .lock()
                .expect("messages lock")
                .push((title.to_string(), body.to_string()));
            self.delivered
        }
    }

    #[derive(Default)]
    struct MemoryLog {
        lines: Mutex<Vec<String>>,
    }

    impl MemoryLog {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().expect("log lock").clone()
        }
    }

    #[async_trait]
    impl CycleLog for MemoryLog {
        async fn append_line(&self, line: &str) -> std::io::Result<()> {
            self.lines.lock().expect("log lock").push(line.to_string());
            Ok(())
        }
    }

    struct Harness {
        monitor: Arc<MonitorState>,
        notifier: Arc<RecordingNotifier>,
        log: Arc<MemoryLog>,
    }

    fn harness(config: MonitorConfig, fetcher: Arc<dyn AvailabilityFetcher>) -> Harness {
        let notifier = RecordingNotifier::new(true);
        let log = Arc::new(MemoryLog::default());
        let monitor = Arc::new(MonitorState::new(
            config,
            fetcher,
            notifier.clone(),
            log.clone(),
        ));
        Harness {
            monitor,
            notifier,
            log,
        }
    }

    fn watch_all(interval_seconds: u64) -> MonitorConfig {
        MonitorConfig::new(DateFilter::All, interval_seconds, true)
    }

    async fn wait_for_cycles(monitor: &MonitorState, cycles: usize) {
        while monitor.snapshot().history.len() < cycles {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn successful_cycle_records_filtered_result_and_notifies() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let config = MonitorConfig::new(DateFilter::from_keys(["20260213", "20260214"]), 60, true);
        let h = harness(config, fetcher);

        assert!(h.monitor.start());
        wait_for_cycles(&h.monitor, 1).await;
        h.monitor.stop();

        let snapshot = h.monitor.snapshot();
        assert!(!snapshot.running);
        assert_eq!(snapshot.last_available_count, 1);
        assert_eq!(snapshot.last_available_dates, vec!["20260213"]);
        assert_eq!(snapshot.last_provider_code.as_deref(), Some("SUCCESS"));
        assert_eq!(snapshot.last_error, None);
        assert_eq!(snapshot.last_checked_at, Some(snapshot.history[0].checked_at));

        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, NOTIFICATION_TITLE);
        assert!(messages[0].1.ends_with("20260213"));

        let lines = h.log.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("INFO: Monitor cycle: 1 available dates: ['20260213']"));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_keeps_last_good_result() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(sample_document()),
            Err(FetchError::Transport("connection reset".to_string())),
        ]);
        let h = harness(watch_all(10), fetcher);

        h.monitor.start();
        wait_for_cycles(&h.monitor, 2).await;
        h.monitor.stop();

        let snapshot = h.monitor.snapshot();
        assert_eq!(snapshot.last_available_count, 2);
        assert_eq!(snapshot.last_available_dates, vec!["20260213", "20260215"]);
        assert_eq!(snapshot.last_provider_code.as_deref(), Some("SUCCESS"));
        assert!(snapshot
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("connection reset")));
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.history[1].available_count, None);
        assert_eq!(snapshot.last_checked_at, Some(snapshot.history[1].checked_at));

        let lines = h.log.lines();
        assert!(lines[1].contains("ERROR: Monitoring error: transport error: connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn error_cycles_never_stop_the_loop() {
        let fetcher = ScriptedFetcher::new(
            (0..5)
                .map(|_| Err(FetchError::Parse("not json".to_string())))
                .collect(),
        );
        let h = harness(watch_all(10), fetcher.clone());

        h.monitor.start();
        wait_for_cycles(&h.monitor, 6).await;
        h.monitor.stop();

        let snapshot = h.monitor.snapshot();
        assert_eq!(snapshot.history.iter().filter(|entry| entry.is_error()).count(), 5);
        assert_eq!(snapshot.last_error, None);
        assert_eq!(snapshot.last_available_count, 2);
        assert_eq!(fetcher.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_does_not_spawn_another_loop() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let h = harness(watch_all(10), fetcher.clone());

        assert!(h.monitor.start());
        assert!(!h.monitor.start());
        tokio::time::sleep(Duration::from_secs(25)).await;
        h.monitor.stop();

        assert_eq!(fetcher.calls(), 3);
        assert_eq!(h.monitor.snapshot().history.len(), 3);
        assert_eq!(h.notifier.messages().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_freezes_last_checked_at() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let h = harness(watch_all(10), fetcher.clone());

        h.monitor.start();
        wait_for_cycles(&h.monitor, 1).await;
        assert!(h.monitor.stop());
        assert!(!h.monitor.stop());

        let stopped = h.monitor.snapshot();
        assert!(!stopped.running);
        tokio::time::sleep(Duration::from_secs(35)).await;

        let later = h.monitor.snapshot();
        assert_eq!(later.last_checked_at, stopped.last_checked_at);
        assert_eq!(later.history.len(), 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quick_restart_leaves_a_single_loop() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let h = harness(watch_all(10), fetcher.clone());

        h.monitor.start();
        wait_for_cycles(&h.monitor, 1).await;
        h.monitor.stop();
        assert!(h.monitor.start());
        tokio::time::sleep(Duration::from_secs(25)).await;
        h.monitor.stop();

        assert_eq!(fetcher.calls(), 4);
        assert_eq!(h.monitor.snapshot().history.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn result_of_fetch_in_flight_at_stop_is_discarded() {
        let fetcher = Arc::new(GatedFetcher {
            release: Notify::new(),
        });
        let h = harness(watch_all(10), fetcher.clone());

        h.monitor.start();
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.monitor.stop();
        fetcher.release.notify_one();
        tokio::time::sleep(Duration::from_secs(15)).await;

        let snapshot = h.monitor.snapshot();
        assert!(snapshot.history.is_empty());
        assert_eq!(snapshot.last_checked_at, None);
        assert!(h.log.lines().is_empty());
        assert!(h.notifier.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn config_update_applies_from_next_cycle() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let h = harness(watch_all(10), fetcher.clone());

        h.monitor.start();
        wait_for_cycles(&h.monitor, 1).await;
        h.monitor.update_config(MonitorConfig::new(
            DateFilter::from_keys(["20260215"]),
            30,
            false,
        ));
        assert_eq!(h.monitor.snapshot().history[0].available_count, Some(2));

        tokio::time::sleep(Duration::from_secs(11)).await;
        let snapshot = h.monitor.snapshot();
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.last_available_dates, vec!["20260215"]);
        assert_eq!(snapshot.config.interval_seconds, 30);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.monitor.snapshot().history.len(), 2);
        h.monitor.stop();

        assert_eq!(h.notifier.messages().len(), 1);
    }

    /// Records, from inside the side effects, whether the state lock was free
    /// and what a snapshot showed at that moment.
    #[derive(Default)]
    struct LockObserver {
        monitor: OnceLock<Arc<MonitorState>>,
        seen: Mutex<Vec<(&'static str, bool, MonitorSnapshot)>>,
    }

    impl LockObserver {
        fn observe(&self, step: &'static str) {
            let monitor = self.monitor.get().expect("monitor attached");
            let unlocked = monitor.inner.try_lock().is_ok();
            let snapshot = monitor.snapshot();
            self.seen
                .lock()
                .expect("seen lock")
                .push((step, unlocked, snapshot));
        }
    }

    #[async_trait]
    impl Notifier for LockObserver {
        async fn notify(&self, _title: &str, _body: &str) -> bool {
            self.observe("notify");
            true
        }
    }

    #[async_trait]
    impl CycleLog for LockObserver {
        async fn append_line(&self, _line: &str) -> std::io::Result<()> {
            self.observe("append_line");
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn side_effects_run_without_the_state_lock() {
        let observer = Arc::new(LockObserver::default());
        let monitor = Arc::new(MonitorState::new(
            watch_all(10),
            ScriptedFetcher::new(vec![]),
            observer.clone(),
            observer.clone(),
        ));
        assert!(observer.monitor.set(monitor.clone()).is_ok());

        monitor.start();
        wait_for_cycles(&monitor, 2).await;
        monitor.stop();

        let seen = observer.seen.lock().expect("seen lock");
        let steps: Vec<&str> = seen.iter().map(|(step, _, _)| *step).collect();
        assert_eq!(steps, vec!["append_line", "notify", "append_line", "notify"]);

        for (cycle, pair) in seen.chunks(2).enumerate() {
            for (step, unlocked, snapshot) in pair {
                assert!(*unlocked, "{step} ran while the state lock was held");
                assert_eq!(snapshot.history.len(), cycle + 1);
                assert_eq!(snapshot.last_available_dates, vec!["20260213", "20260215"]);
                assert_eq!(
                    snapshot.last_checked_at,
                    Some(snapshot.history[cycle].checked_at)
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_notification_does_not_touch_last_error() {
        let notifier = RecordingNotifier::new(false);
        let monitor = Arc::new(MonitorState::new(
            watch_all(10),
            ScriptedFetcher::new(vec![]),
            notifier.clone(),
            Arc::new(MemoryLog::default()),
        ));

        monitor.start();
        wait_for_cycles(&monitor, 1).await;
        monitor.stop();

        assert_eq!(notifier.messages().len(), 1);
        assert_eq!(monitor.snapshot().last_error, None);
    }

    #[test]
    fn history_keeps_newest_entries_in_order() {
        let mut state = RuntimeState::new(watch_all(10));
        let start = NaiveDate::from_ymd_opt(2026, 2, 12)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("valid timestamp");

        for minute in 0..(HISTORY_CAPACITY as i64 + 5) {
            let checked_at = start + chrono::Duration::minutes(minute);
            state.record(HistoryEntry::success(checked_at, 0, vec![], None));
        }

        let snapshot = state.snapshot();
        assert_eq!(snapshot.history.len(), HISTORY_CAPACITY);
        assert_eq!(snapshot.history[0].checked_at, start + chrono::Duration::minutes(5));
        assert!(snapshot
            .history
            .windows(2)
            .all(|pair| pair[0].checked_at < pair[1].checked_at));
        assert_eq!(
            snapshot.last_checked_at,
            Some(start + chrono::Duration::minutes(HISTORY_CAPACITY as i64 + 4))
        );
    }
}
