//! Recorded-traffic journal.
//!
//! An append-only ring of completed interactions. Sequence numbers are
//! assigned under the journal lock, so they are strictly increasing and
//! contiguous over the retained window. Verification queries count matching
//! entries, skipping proxied re-entries (forwards that looped back into
//! this same server).

use crate::matcher::CompiledRequestMatcher;
use crate::model::{ExpectationDef, HttpRequest, HttpResponse, VerificationTimes};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// One completed request/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectation_id: Option<String>,
    pub request: HttpRequest,
    /// Absent when the action aborted the connection without replying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_request: Option<HttpRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_response: Option<HttpResponse>,
    /// A forward that re-entered this same server; excluded from
    /// verification counts on the outer request.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub proxied: bool,
}

/// Interaction fields supplied by the dispatcher; sequence and timestamp
/// are assigned at append.
#[derive(Debug, Default)]
pub struct InteractionRecord {
    pub expectation_id: Option<String>,
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
    pub forwarded_request: Option<HttpRequest>,
    pub forwarded_response: Option<HttpResponse>,
    pub proxied: bool,
}

/// What `retrieve` returns.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Retrieved {
    Requests(Vec<HttpRequest>),
    Responses(Vec<HttpResponse>),
    Interactions(Vec<Interaction>),
    Expectations(Vec<ExpectationDef>),
    Messages(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetrieveType {
    Requests,
    Responses,
    RequestResponses,
    RecordedExpectations,
    LogMessages,
}

/// Verification failure with a rendered human-readable report.
#[derive(Debug, Clone)]
pub struct Mismatch {
    pub expected: String,
    pub actual: String,
    pub report: String,
}

struct JournalInner {
    next_sequence: u64,
    entries: VecDeque<Arc<Interaction>>,
    messages: VecDeque<String>,
}

pub struct Journal {
    inner: Mutex<JournalInner>,
    capacity: usize,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(JournalInner {
                next_sequence: 0,
                entries: VecDeque::new(),
                messages: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Append an interaction, assigning its sequence. Oldest entries are
    /// evicted once the ring is full.
    pub fn append(&self, record: InteractionRecord) -> u64 {
        let mut inner = self.inner.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        let message = match &record.expectation_id {
            Some(id) => format!(
                "request {} {} matched expectation {id}",
                record.request.method, record.request.path
            ),
            None => format!(
                "no expectation matched request {} {}",
                record.request.method, record.request.path
            ),
        };

        let interaction = Arc::new(Interaction {
            sequence,
            received_at: Utc::now(),
            expectation_id: record.expectation_id,
            request: record.request,
            response: record.response,
            forwarded_request: record.forwarded_request,
            forwarded_response: record.forwarded_response,
            proxied: record.proxied,
        });

        if inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(interaction);

        if inner.messages.len() >= self.capacity {
            inner.messages.pop_front();
        }
        inner.messages.push_back(message);

        sequence
    }

    /// Record a free-form log line for `retrieve?type=LOG_MESSAGES`.
    pub fn log_message(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        if inner.messages.len() >= self.capacity {
            inner.messages.pop_front();
        }
        inner.messages.push_back(message.into());
    }

    fn select(&self, matcher: Option<&CompiledRequestMatcher>) -> Vec<Arc<Interaction>> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|entry| matcher.map_or(true, |m| m.matches(&entry.request)))
            .cloned()
            .collect()
    }

    pub fn retrieve(
        &self,
        matcher: Option<&CompiledRequestMatcher>,
        retrieve_type: RetrieveType,
    ) -> Retrieved {
        match retrieve_type {
            RetrieveType::Requests => Retrieved::Requests(
                self.select(matcher)
                    .iter()
                    .map(|e| e.request.clone())
                    .collect(),
            ),
            RetrieveType::Responses => Retrieved::Responses(
                self.select(matcher)
                    .iter()
                    .filter_map(|e| e.response.clone())
                    .collect(),
            ),
            RetrieveType::RequestResponses => Retrieved::Interactions(
                self.select(matcher)
                    .iter()
                    .map(|e| e.as_ref().clone())
                    .collect(),
            ),
            RetrieveType::RecordedExpectations => Retrieved::Expectations(
                self.select(matcher)
                    .iter()
                    .filter(|e| e.expectation_id.is_some())
                    .filter_map(|e| synthesize_expectation(e))
                    .collect(),
            ),
            RetrieveType::LogMessages => {
                Retrieved::Messages(self.inner.lock().messages.iter().cloned().collect())
            }
        }
    }

    /// Assert the matcher was seen a number of times within the bounds.
    pub fn verify(
        &self,
        matcher: &CompiledRequestMatcher,
        times: &VerificationTimes,
    ) -> Result<(), Mismatch> {
        let matching: Vec<Arc<Interaction>> = self
            .select(Some(matcher))
            .into_iter()
            .filter(|e| !e.proxied)
            .collect();
        if times.satisfied_by(matching.len()) {
            return Ok(());
        }

        let expected = format!(
            "{} matching {}",
            times.describe(),
            render_matcher(matcher)
        );
        let actual = format!("{} times", matching.len());
        let recorded = self.render_recorded_requests();
        let report = format!(
            "Request not found {}, expected:{} but was:{}",
            times.describe(),
            render_matcher(matcher),
            recorded,
        );
        Err(Mismatch {
            expected,
            actual,
            report,
        })
    }

    /// Assert the matchers appear in the journal in order, not necessarily
    /// contiguously.
    pub fn verify_sequence(&self, matchers: &[CompiledRequestMatcher]) -> Result<(), Mismatch> {
        let entries: Vec<Arc<Interaction>> = self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|e| !e.proxied)
            .cloned()
            .collect();

        let mut cursor = entries.iter();
        for (index, matcher) in matchers.iter().enumerate() {
            if !cursor.any(|entry| matcher.matches(&entry.request)) {
                let report = format!(
                    "Request sequence not found, expected:{} at position {} but was:{}",
                    render_matcher(matcher),
                    index,
                    self.render_recorded_requests(),
                );
                return Err(Mismatch {
                    expected: format!("request {} in order", render_matcher(matcher)),
                    actual: format!("not found after position {index}"),
                    report,
                });
            }
        }
        Ok(())
    }

    /// Remove matching entries, or everything when no matcher is given.
    pub fn clear(&self, matcher: Option<&CompiledRequestMatcher>) {
        let mut inner = self.inner.lock();
        match matcher {
            Some(m) => inner.entries.retain(|e| !m.matches(&e.request)),
            None => {
                inner.entries.clear();
                inner.messages.clear();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    fn render_recorded_requests(&self) -> String {
        let requests: Vec<HttpRequest> = self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|e| !e.proxied)
            .map(|e| e.request.clone())
            .collect();
        serde_json::to_string_pretty(&requests).unwrap_or_else(|_| "[]".to_string())
    }
}

fn render_matcher(matcher: &CompiledRequestMatcher) -> String {
    serde_json::to_string_pretty(matcher.def()).unwrap_or_else(|_| "{}".to_string())
}

/// Turn a matched interaction into a replayable expectation: the recorded
/// request becomes an equality matcher, the recorded response the action.
fn synthesize_expectation(interaction: &Interaction) -> Option<ExpectationDef> {
    use crate::matcher::{BodyMatcherDef, RequestMatcherDef, StringPattern, TaggedPattern, TypedBodyMatcher};
    use base64::Engine;

    let request = &interaction.request;
    let response = interaction
        .forwarded_response
        .clone()
        .or_else(|| interaction.response.clone())?;

    let mut matcher = RequestMatcherDef {
        method: Some(StringPattern::Tagged(TaggedPattern::Equals(
            request.method.clone(),
        ))),
        path: Some(StringPattern::Tagged(TaggedPattern::Equals(
            request.path.clone(),
        ))),
        ..RequestMatcherDef::default()
    };
    if let Some(body) = &request.body {
        matcher.body = Some(match body.as_text() {
            Some(text) => BodyMatcherDef::Text(text.to_string()),
            None => BodyMatcherDef::Typed(TypedBodyMatcher::Binary {
                base64_bytes: base64::engine::general_purpose::STANDARD.encode(body.as_bytes()),
            }),
        });
    }

    Some(ExpectationDef::new(matcher).respond(response))
}
