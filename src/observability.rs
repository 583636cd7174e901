//! Prometheus counters for conversation outcomes.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Started,
    Completed,
    Aborted,
    TimedOut,
    DispatchFailed,
    Rejected,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::TimedOut => "timed_out",
            Self::DispatchFailed => "dispatch_failed",
            Self::Rejected => "rejected",
        }
    }
}

pub struct Metrics {
    registry: Registry,
    conversations: IntCounterVec,
    active_sessions: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let conversations = IntCounterVec::new(
            Opts::new(
                "booker_conversations_total",
                "Conversation events by outcome",
            ),
            &["outcome"],
        )?;
        let active_sessions =
            IntGauge::new("booker_active_sessions", "Sessions currently in progress")?;
        registry.register(Box::new(conversations.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        Ok(Self {
            registry,
            conversations,
            active_sessions,
        })
    }

    pub fn record(&self, outcome: Outcome) {
        self.conversations
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn count(&self, outcome: Outcome) -> u64 {
        self.conversations
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn set_active_sessions(&self, n: usize) {
        self.active_sessions.set(i64::try_from(n).unwrap_or(i64::MAX));
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
