//! Usage-analytics event hook.
//!
//! # Responsibility
//! - Name the tracked repository operations.
//! - Hand successful-operation events to an optionally installed sink.
//!
//! # Invariants
//! - Emission is infallible and fire-and-forget: a missing sink is a
//!   no-op and a sink can never affect the outcome of the operation that
//!   produced the event.

use log::debug;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Tracked repository operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsEvent {
    InitializedRepository,
    RegisteredStack,
    DeregisteredStack,
    ActivatedStack,
    RegisteredStackComponent,
    DeregisteredStackComponent,
    FetchedPipelineRuns,
}

impl AnalyticsEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitializedRepository => "initialized_repository",
            Self::RegisteredStack => "registered_stack",
            Self::DeregisteredStack => "deregistered_stack",
            Self::ActivatedStack => "activated_stack",
            Self::RegisteredStackComponent => "registered_stack_component",
            Self::DeregisteredStackComponent => "deregistered_stack_component",
            Self::FetchedPipelineRuns => "fetched_pipeline_runs",
        }
    }
}

impl Display for AnalyticsEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Telemetry collaborator receiving tracked events.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: AnalyticsEvent, metadata: &BTreeMap<String, String>);
}

static SINK: OnceCell<Box<dyn AnalyticsSink>> = OnceCell::new();

/// Installs the process-wide analytics sink.
///
/// Returns the rejected sink when one is already installed.
pub fn set_analytics_sink(sink: Box<dyn AnalyticsSink>) -> Result<(), Box<dyn AnalyticsSink>> {
    SINK.set(sink)
}

/// Emits one tracked event to the installed sink, if any.
pub fn track_event(event: AnalyticsEvent, metadata: BTreeMap<String, String>) {
    debug!(
        "event=analytics_track module=analytics name={} fields={}",
        event,
        metadata.len()
    );
    if let Some(sink) = SINK.get() {
        sink.record(event, &metadata);
    }
}
