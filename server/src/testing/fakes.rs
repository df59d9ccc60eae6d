//! In-memory collaborators that record how the pipeline drives them

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    calendar::{CalendarEvent, CalendarProvider, EventWindow},
    model::{
        enrichment::{EnrichmentResult, Priority},
        memory_store::MemoryResultStore,
    },
    pipeline::traits::{
        EnrichmentEngine, EnrichmentRequest, FetchedMessage, MailProvider, ProviderError,
        ResultStore,
    },
};

#[derive(Debug, Default)]
struct MailboxState {
    ids: Vec<String>,
    failing_fetch: HashSet<String>,
    fail_list: bool,
    queries: Vec<String>,
    fetched: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl FakeMailbox {
    pub fn with_messages(ids: Vec<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MailboxState {
                ids,
                ..Default::default()
            })),
        }
    }

    pub fn fail_fetch(&mut self, id: &str) {
        self.state.lock().unwrap().failing_fetch.insert(id.to_string());
    }

    pub fn fail_list(&mut self) {
        self.state.lock().unwrap().fail_list = true;
    }

    pub fn ids(&self) -> Vec<String> {
        self.state.lock().unwrap().ids.clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }
}

#[async_trait]
impl MailProvider for FakeMailbox {
    async fn list(&self, query: &str, max_results: u32) -> Result<Vec<String>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(query.to_string());
        if state.fail_list {
            return Err(ProviderError::Upstream(anyhow!("list unavailable")));
        }
        Ok(state
            .ids
            .iter()
            .take(max_results as usize)
            .cloned()
            .collect())
    }

    async fn fetch(&self, message_id: &str) -> Result<FetchedMessage, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.fetched.push(message_id.to_string());
        if state.failing_fetch.contains(message_id) {
            return Err(ProviderError::Upstream(anyhow!("fetch failed")));
        }
        if !state.ids.iter().any(|id| id == message_id) {
            return Err(ProviderError::NotFound(message_id.to_string()));
        }
        Ok(FetchedMessage {
            id: message_id.to_string(),
            subject: format!("Subject {message_id}"),
            snippet: format!("Snippet {message_id}"),
            body: format!("Body of {message_id}"),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EngineBehavior {
    AlwaysOk,
    /// Fail the first n calls, then succeed
    FailTimes(usize),
    AlwaysFail,
    /// Answers that never pass validation
    AlwaysInvalid,
}

#[derive(Debug, Default)]
struct EngineLog {
    subjects: Vec<String>,
    started: Vec<Instant>,
}

#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    behavior: EngineBehavior,
    delay: Duration,
    ready_delay: Duration,
    calls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    log: Arc<Mutex<EngineLog>>,
}

impl ScriptedEngine {
    pub fn new(behavior: EngineBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            ready_delay: Duration::ZERO,
            calls: Default::default(),
            active: Default::default(),
            peak: Default::default(),
            log: Default::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Not ready to take calls until `delay` has passed, like a backoff
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn subjects(&self) -> Vec<String> {
        self.log.lock().unwrap().subjects.clone()
    }

    /// Time between consecutive calls
    pub fn call_gaps(&self) -> Vec<Duration> {
        let log = self.log.lock().unwrap();
        log.started.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn answer(request: &EnrichmentRequest) -> EnrichmentResult {
        EnrichmentResult {
            summary: format!("Summary of {}", request.subject),
            category: "workshop".to_string(),
            tags: vec!["on-campus".to_string()],
            priority: Priority::Medium,
            company: Some("Acme Corp".to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl EnrichmentEngine for ScriptedEngine {
    async fn ready(&self) {
        if !self.ready_delay.is_zero() {
            sleep(self.ready_delay).await;
        }
    }

    async fn analyze(&self, request: &EnrichmentRequest) -> anyhow::Result<EnrichmentResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut log = self.log.lock().unwrap();
            log.subjects.push(request.subject.clone());
            log.started.push(Instant::now());
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match self.behavior {
            EngineBehavior::AlwaysOk => Ok(Self::answer(request)),
            EngineBehavior::FailTimes(n) if call < n => Err(anyhow!("engine unavailable")),
            EngineBehavior::FailTimes(_) => Ok(Self::answer(request)),
            EngineBehavior::AlwaysFail => Err(anyhow!("engine unavailable")),
            EngineBehavior::AlwaysInvalid => Ok(EnrichmentResult {
                category: String::new(),
                ..Self::answer(request)
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    inner: Arc<MemoryResultStore>,
    fail_puts: bool,
    cancel_on_put: Option<CancellationToken>,
    puts: Arc<AtomicUsize>,
}

impl RecordingStore {
    pub fn failing_puts() -> Self {
        Self {
            fail_puts: true,
            ..Default::default()
        }
    }

    /// Fires `cancel` right after the first write lands
    pub fn cancelling_on_put(cancel: CancellationToken) -> Self {
        Self {
            cancel_on_put: Some(cancel),
            ..Default::default()
        }
    }

    /// Store a result without counting it as a pipeline write
    pub async fn seed(&self, user_id: i32, message_id: &str, result: EnrichmentResult) {
        self.inner.put(user_id, message_id, &result).await.unwrap();
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultStore for RecordingStore {
    async fn get(&self, message_id: &str) -> anyhow::Result<Option<EnrichmentResult>> {
        self.inner.get(message_id).await
    }

    async fn put(
        &self,
        user_id: i32,
        message_id: &str,
        result: &EnrichmentResult,
    ) -> anyhow::Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts {
            return Err(anyhow!("database unavailable"));
        }
        self.inner.put(user_id, message_id, result).await?;
        if let Some(cancel) = &self.cancel_on_put {
            cancel.cancel();
        }
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: i32,
        query: Option<&str>,
        limit: u64,
    ) -> anyhow::Result<Vec<(String, EnrichmentResult)>> {
        self.inner.list_for_user(user_id, query, limit).await
    }
}

#[derive(Debug, Default)]
struct CalendarState {
    events: Vec<CalendarEvent>,
    windows: Vec<EventWindow>,
    fail: bool,
}

/// Calendar that keeps inserted events in memory
#[derive(Debug, Clone, Default)]
pub struct FakeCalendar {
    state: Arc<Mutex<CalendarState>>,
}

impl FakeCalendar {
    pub fn with_events(events: Vec<CalendarEvent>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CalendarState {
                events,
                ..Default::default()
            })),
        }
    }

    pub fn failing() -> Self {
        Self {
            state: Arc::new(Mutex::new(CalendarState {
                fail: true,
                ..Default::default()
            })),
        }
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn windows(&self) -> Vec<EventWindow> {
        self.state.lock().unwrap().windows.clone()
    }
}

#[async_trait]
impl CalendarProvider for FakeCalendar {
    async fn insert(&self, event: CalendarEvent) -> Result<CalendarEvent, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(ProviderError::Upstream(anyhow!("calendar unavailable")));
        }
        let id = format!("evt{}", state.events.len() + 1);
        let created = CalendarEvent {
            html_link: Some(format!("https://calendar.google.com/event?eid={id}")),
            id: Some(id),
            ..event
        };
        state.events.push(created.clone());
        Ok(created)
    }

    async fn delete(&self, event_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        let before = state.events.len();
        state.events.retain(|e| e.id.as_deref() != Some(event_id));
        if state.events.len() == before {
            return Err(ProviderError::NotFound(event_id.to_string()));
        }
        Ok(())
    }

    async fn list(&self, window: &EventWindow) -> Result<Vec<CalendarEvent>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(ProviderError::Upstream(anyhow!("calendar unavailable")));
        }
        state.windows.push(window.clone());
        Ok(state
            .events
            .iter()
            .take(window.max_results as usize)
            .cloned()
            .collect())
    }
}
