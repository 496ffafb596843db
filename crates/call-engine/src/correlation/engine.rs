//! Correlation engine
//!
//! Recovers transcripts for finished calls by matching them against
//! conversations reported by the AI voice-agent platform. Three triggers:
//!
//! - [`CorrelationEngine::schedule_after_completion`]: once per call, after a
//!   grace delay so the native transcription webhook can win
//! - [`CorrelationEngine::sync_call`]: on demand for one call
//! - [`CorrelationEngine::sweep`]: every transcript-less completed call with a
//!   non-zero duration, oldest first
//!
//! All candidate details are fetched concurrently and joined before matching
//! starts, so a sweep always sees the complete candidate set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::candidate::ExternalCandidate;
use super::scoring;
use crate::config::CallEngineConfig;
use crate::database::{CallDirection, CallRecord, CallStatus, DatabaseManager};
use crate::error::{CallEngineError, Result};
use crate::integration::{ConversationSource, Summarizer};
use crate::notify::{EngineEvent, NotificationSink, TranscriptSource};

/// Writes AI summaries for transcripts in the background
#[derive(Clone)]
pub struct SummaryWriter {
    db: DatabaseManager,
    summarizer: Arc<dyn Summarizer>,
    notifier: Arc<dyn NotificationSink>,
}

impl SummaryWriter {
    pub fn new(db: DatabaseManager, summarizer: Arc<dyn Summarizer>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            db,
            summarizer,
            notifier,
        }
    }

    pub fn spawn(&self, session_id: String, transcript: String, platform_summary: Option<String>) -> JoinHandle<()> {
        let writer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = writer.write(&session_id, &transcript, platform_summary).await {
                warn!("⚠️ Summary for {} failed: {}", session_id, e);
            }
        })
    }

    /// Summarize and store. The platform's own summary is used when the
    /// summarizer is unavailable.
    pub async fn write(&self, session_id: &str, transcript: &str, platform_summary: Option<String>) -> Result<bool> {
        let summary = match self.summarizer.summarize(transcript).await {
            Ok(summary) => summary,
            Err(e) => match platform_summary {
                Some(summary) => {
                    debug!("Using platform summary for {} ({})", session_id, e);
                    summary
                }
                None => return Err(e),
            },
        };

        self.store(session_id, &summary).await
    }

    /// Store a summary produced elsewhere
    pub async fn store(&self, session_id: &str, summary: &str) -> Result<bool> {
        let stored = self.db.set_ai_summary(session_id, summary).await?;
        if stored {
            self.notifier.publish(EngineEvent::SummaryAttached {
                session_id: session_id.to_string(),
                placeholder: false,
            });
        }
        Ok(stored)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    AlreadyTranscribed,
    Matched { conversation_id: String, score: i64 },
    Placeholder,
    /// Not completed yet, nothing written
    Unmatched,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: usize,
    pub candidates: usize,
    pub matched: usize,
    pub placeholders: usize,
}

pub struct CorrelationEngine {
    db: DatabaseManager,
    conversations: Arc<dyn ConversationSource>,
    summaries: SummaryWriter,
    notifier: Arc<dyn NotificationSink>,
    grace_delay: Duration,
    single_window_secs: i64,
    bulk_window_secs: i64,
    max_candidates: usize,
    pending: DashSet<String>,
}

impl CorrelationEngine {
    pub fn new(
        db: DatabaseManager,
        conversations: Arc<dyn ConversationSource>,
        summaries: SummaryWriter,
        notifier: Arc<dyn NotificationSink>,
        config: &CallEngineConfig,
    ) -> Self {
        Self {
            db,
            conversations,
            summaries,
            notifier,
            grace_delay: config.correlation.grace_delay(),
            single_window_secs: config.correlation.single_window_secs,
            bulk_window_secs: config.correlation.bulk_window_secs,
            max_candidates: config.ai_agent.max_candidates,
            pending: DashSet::new(),
        }
    }

    pub fn summaries(&self) -> &SummaryWriter {
        &self.summaries
    }

    /// Run [`Self::sync_call`] after the grace delay. A call already waiting
    /// is not scheduled twice; returns whether a new run was scheduled.
    pub fn schedule_after_completion(self: &Arc<Self>, session_id: &str) -> bool {
        if !self.pending.insert(session_id.to_string()) {
            debug!("Correlation for {} already pending", session_id);
            return false;
        }

        let engine = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(engine.grace_delay).await;
            match engine.sync_call(&session_id).await {
                Ok(outcome) => debug!("Correlation for {}: {:?}", session_id, outcome),
                Err(e) => warn!("⚠️ Correlation for {} failed: {}", session_id, e),
            }
            engine.pending.remove(&session_id);
        });
        true
    }

    pub fn is_pending(&self, session_id: &str) -> bool {
        self.pending.contains(session_id)
    }

    /// Correlate a single call against the current candidate set
    pub async fn sync_call(&self, session_id: &str) -> Result<SyncOutcome> {
        let call = self
            .db
            .get_call(session_id)
            .await?
            .ok_or_else(|| CallEngineError::not_found(format!("call {}", session_id)))?;
        if call.transcript.is_some() {
            return Ok(SyncOutcome::AlreadyTranscribed);
        }

        let candidates = self.candidates_or_empty().await;
        if let Some((idx, score)) =
            scoring::best_candidate(&call, &candidates, &HashSet::new(), self.single_window_secs)
        {
            if self.claim(&call, &candidates[idx]).await? {
                return Ok(SyncOutcome::Matched {
                    conversation_id: candidates[idx].conversation_id.clone(),
                    score: score.score,
                });
            }
        }

        // re-read, a transcription webhook may have landed meanwhile
        let call = self
            .db
            .get_call(session_id)
            .await?
            .ok_or_else(|| CallEngineError::not_found(format!("call {}", session_id)))?;
        if call.transcript.is_some() {
            return Ok(SyncOutcome::AlreadyTranscribed);
        }
        if call.status == CallStatus::Completed {
            self.write_placeholder(&call).await?;
            return Ok(SyncOutcome::Placeholder);
        }
        Ok(SyncOutcome::Unmatched)
    }

    /// Bulk correlation over every call still missing a transcript
    pub async fn sweep(&self) -> Result<SweepReport> {
        let calls = self.db.list_calls_needing_transcript().await?;
        let mut report = SweepReport {
            examined: calls.len(),
            ..Default::default()
        };
        if calls.is_empty() {
            return Ok(report);
        }

        let candidates = self.candidates_or_empty().await;
        report.candidates = candidates.len();
        info!(
            "🔄 Correlation sweep: {} calls, {} candidates",
            report.examined, report.candidates
        );

        let assignments = scoring::assign(&calls, &candidates, HashSet::new(), self.bulk_window_secs);
        let mut matched = HashSet::new();
        for assignment in &assignments {
            let Some(call) = calls.iter().find(|c| c.session_id == assignment.session_id) else {
                continue;
            };
            if self.claim(call, &candidates[assignment.candidate_index]).await? {
                matched.insert(assignment.session_id.as_str());
                report.matched += 1;
            }
        }

        for call in calls.iter().filter(|c| !matched.contains(c.session_id.as_str())) {
            if self.write_placeholder(call).await? {
                report.placeholders += 1;
            }
        }

        info!(
            "✅ Correlation sweep done: {} matched, {} placeholders",
            report.matched, report.placeholders
        );
        Ok(report)
    }

    /// Unassigned candidates with their details resolved
    pub async fn fetch_candidates(&self) -> Result<Vec<ExternalCandidate>> {
        let assigned: HashSet<String> = self.db.assigned_conversation_ids().await?.into_iter().collect();
        let listed = self.conversations.list_conversations(self.max_candidates).await?;
        let fresh: Vec<_> = listed
            .into_iter()
            .filter(|c| !assigned.contains(&c.conversation_id))
            .collect();

        let details = join_all(
            fresh
                .iter()
                .map(|c| self.conversations.fetch_conversation(&c.conversation_id)),
        )
        .await;

        let mut candidates = Vec::with_capacity(fresh.len());
        for (listed, detail) in fresh.iter().zip(details) {
            match detail {
                Ok(detail) => candidates.push(ExternalCandidate::from_detail(
                    &listed.conversation_id,
                    &detail,
                    listed.start_time_unix,
                )),
                Err(e) => warn!("⚠️ Skipping conversation {}: {}", listed.conversation_id, e),
            }
        }
        Ok(candidates)
    }

    async fn candidates_or_empty(&self) -> Vec<ExternalCandidate> {
        match self.fetch_candidates().await {
            Ok(candidates) => candidates,
            Err(CallEngineError::NotConfigured(what)) => {
                debug!("Correlation source not configured ({})", what);
                Vec::new()
            }
            Err(e) => {
                warn!("⚠️ Correlation source unavailable: {}", e);
                Vec::new()
            }
        }
    }

    async fn claim(&self, call: &CallRecord, candidate: &ExternalCandidate) -> Result<bool> {
        let Some(transcript) = candidate.transcript_text() else {
            return Ok(false);
        };
        if !self
            .db
            .assign_conversation(&call.session_id, &candidate.conversation_id, &transcript)
            .await?
        {
            return Ok(false);
        }

        info!("🔗 Call {} matched conversation {}", call.session_id, candidate.conversation_id);
        self.notifier.publish(EngineEvent::TranscriptAttached {
            session_id: call.session_id.clone(),
            source: TranscriptSource::Correlation,
        });
        self.summaries
            .spawn(call.session_id.clone(), transcript, candidate.platform_summary.clone());
        Ok(true)
    }

    async fn write_placeholder(&self, call: &CallRecord) -> Result<bool> {
        let written = self.db.set_placeholder_summary(&call.session_id, &placeholder_note(call)).await?;
        if written {
            self.notifier.publish(EngineEvent::SummaryAttached {
                session_id: call.session_id.clone(),
                placeholder: true,
            });
        }
        Ok(written)
    }
}

/// Human-readable note for a call nothing could be matched to
pub fn placeholder_note(call: &CallRecord) -> String {
    let counterparty = if call.counterparty_number.trim().is_empty() {
        "an unknown number"
    } else {
        call.counterparty_number.trim()
    };
    let (label, preposition) = match call.direction {
        CallDirection::Inbound => ("Inbound", "from"),
        CallDirection::Outbound => ("Outbound", "to"),
    };
    format!(
        "{} call {} {}, {}. No transcript was captured.",
        label,
        preposition,
        counterparty,
        format_duration(call.duration_seconds)
    )
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        format!("{}s", seconds)
    } else {
        format!("{}m {:02}s", seconds / 60, seconds % 60)
    }
}
