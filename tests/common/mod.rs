//! Shared test helpers: a scripted transport and a recording analytics sink.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use turnstream::analytics::{AnalyticsEvent, AnalyticsSink};
use turnstream::cancel::AttemptToken;
use turnstream::clock::{Clock, ManualClock};
use turnstream::config::EngineConfig;
use turnstream::engine::ConversationEngine;
use turnstream::error::{EngineError, Result};
use turnstream::quota::{InMemoryQuotaStore, QuotaStore};
use turnstream::transport::{ByteStream, Transport, TransportResponse};
use turnstream::types::{OneShotReply, RequestPayload};

/// What the transport does for one request.
pub enum Script {
    /// Stream these chunks, each after its delay, then close.
    Chunks(Vec<(Duration, Vec<u8>)>),
    /// Stream these chunks, then never close.
    Stall(Vec<Vec<u8>>),
    /// Never respond.
    Hang,
    /// Fail before any byte arrives.
    Fail(EngineError),
    /// Answer with a complete JSON reply.
    OneShot(OneShotReply),
}

/// A transport that answers requests from a queue of scripts.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<RequestPayload>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, script: Script) -> &Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    /// Queue an NDJSON body delivered in one chunk.
    pub fn push_lines(&self, lines: &[&str]) -> &Self {
        let body = lines.iter().map(|l| format!("{l}\n")).collect::<String>();
        self.push(Script::Chunks(vec![(Duration::ZERO, body.into_bytes())]))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RequestPayload> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn issue(
        &self,
        request: &RequestPayload,
        _token: &AttemptToken,
    ) -> Result<TransportResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Chunks(chunks)) => {
                let stream: ByteStream = Box::pin(async_stream::stream! {
                    for (delay, chunk) in chunks {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        yield Ok::<_, EngineError>(chunk);
                    }
                });
                Ok(TransportResponse::Stream(stream))
            }
            Some(Script::Stall(chunks)) => {
                let stream: ByteStream = Box::pin(async_stream::stream! {
                    for chunk in chunks {
                        yield Ok::<_, EngineError>(chunk);
                    }
                    std::future::pending::<()>().await;
                });
                Ok(TransportResponse::Stream(stream))
            }
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::Fail(error)) => Err(error),
            Some(Script::OneShot(reply)) => Ok(TransportResponse::Complete(reply)),
            None => Err(EngineError::Transport("no scripted response".into())),
        }
    }
}

/// Collects analytics events in memory.
#[derive(Default)]
pub struct RecordingAnalytics {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingAnalytics {
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalyticsSink for RecordingAnalytics {
    async fn emit(&self, event: AnalyticsEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Everything a test needs to drive one engine.
pub struct Harness {
    pub engine: Arc<ConversationEngine>,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
    pub quota: Arc<InMemoryQuotaStore>,
    pub analytics: Arc<RecordingAnalytics>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(EngineConfig::default(), |store| store)
    }

    pub fn with(
        config: EngineConfig,
        quota: impl FnOnce(InMemoryQuotaStore) -> InMemoryQuotaStore,
    ) -> Self {
        let clock = Arc::new(ManualClock::default());
        let transport = ScriptedTransport::new();
        let quota = Arc::new(quota(InMemoryQuotaStore::new(
            Arc::clone(&clock) as Arc<dyn Clock>
        )));
        let analytics = Arc::new(RecordingAnalytics::default());
        let engine = ConversationEngine::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .config(config)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .quota_store(Arc::clone(&quota) as Arc<dyn QuotaStore>)
            .analytics(Arc::clone(&analytics) as Arc<dyn AnalyticsSink>)
            .build();
        Self {
            engine: Arc::new(engine),
            transport,
            clock,
            quota,
            analytics,
        }
    }

    /// Move past the send throttle.
    pub fn wait_out_throttle(&self) {
        self.clock.advance_ms(1_000);
    }
}

/// Let spawned fire-and-forget tasks run.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn delta(text: &str) -> String {
    serde_json::json!({ "type": "delta", "text": text }).to_string()
}
