//! Agent invocation: the reasoning boundary and its deadline wrapper.
//!
//! [`ReasoningAgent`] is the seam to the external reasoning capability.
//! [`AgentWrapper`] binds each invocation to the per-agent deadline and
//! converts every outcome — answer, failure, or timeout — into an
//! [`AgentResponse`], so the coordinator never loses track of a seat.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::types::{AgentId, AgentResponse, EvidenceBundle, Query};

/// Error from a wrapped reasoning capability.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// A successful answer from a reasoning agent.
#[derive(Debug, Clone)]
pub struct AgentAnswer {
    /// The produced claim text.
    pub claim: String,
    /// Self-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// Optional claim embedding for semantic clustering.
    pub embedding: Option<Vec<f32>>,
}

/// One independent reasoning agent. Implementations must not share mutable
/// state: concurrently running invocations see only the read-only evidence.
#[async_trait]
pub trait ReasoningAgent: Send + Sync {
    /// The seat this agent occupies.
    fn id(&self) -> AgentId;

    /// Produce a claim for the query, grounded in the evidence bundle.
    async fn answer(
        &self,
        query: &Query,
        evidence: &EvidenceBundle,
    ) -> Result<AgentAnswer, AgentError>;
}

/// Deadline-enforcing wrapper around one agent.
#[derive(Clone)]
pub struct AgentWrapper {
    agent: Arc<dyn ReasoningAgent>,
    timeout: Duration,
}

impl AgentWrapper {
    /// Wrap an agent with a per-invocation deadline.
    pub fn new(agent: Arc<dyn ReasoningAgent>, timeout: Duration) -> Self {
        Self { agent, timeout }
    }

    /// The wrapped seat.
    pub fn id(&self) -> AgentId {
        self.agent.id()
    }

    /// Invoke the agent once. Always returns a response: deadline expiry
    /// drops the in-flight future (cooperative cancellation, partial output
    /// discarded) and yields a `timeout` status; any other failure yields
    /// an `error` status.
    pub async fn invoke(&self, query: &Query, evidence: &EvidenceBundle) -> AgentResponse {
        let agent_id = self.agent.id();
        let start = Instant::now();

        match tokio::time::timeout(self.timeout, self.agent.answer(query, evidence)).await {
            Ok(Ok(answer)) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                debug!(agent = %agent_id, latency_ms, confidence = answer.confidence, "agent answered");
                AgentResponse::ok(
                    agent_id,
                    answer.claim,
                    answer.confidence,
                    answer.embedding,
                    latency_ms,
                )
            }
            Ok(Err(e)) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                warn!(agent = %agent_id, latency_ms, error = %e, "agent failed");
                AgentResponse::failed(agent_id, latency_ms)
            }
            Err(_) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                warn!(agent = %agent_id, latency_ms, "agent timed out");
                AgentResponse::timed_out(agent_id, latency_ms)
            }
        }
    }
}

/// Endpoint configuration for [`HttpAgent`].
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Chat-completions URL of the serving endpoint.
    pub url: String,
    /// Model name passed in the request body.
    pub model: String,
}

/// Reasoning agent backed by an OpenAI-style chat endpoint.
///
/// The prompt carries the query and the evidence excerpts; the model is
/// asked to end its answer with a `[confidence: X.XX]` marker, which is
/// parsed out of the claim text.
pub struct HttpAgent {
    id: AgentId,
    endpoint: EndpointConfig,
    client: reqwest::Client,
    temperature: f32,
}

impl HttpAgent {
    /// Create an HTTP agent for a seat.
    pub fn new(id: AgentId, endpoint: EndpointConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;
        Ok(Self {
            id,
            endpoint,
            client,
            temperature: 0.2,
        })
    }

    fn build_prompt(query: &Query, evidence: &EvidenceBundle) -> String {
        let mut prompt = String::new();
        prompt.push_str("Answer the question using only the evidence below.\n\n");
        for item in &evidence.items {
            prompt.push_str(&format!("[{}] {}\n", item.source_id, item.excerpt));
        }
        prompt.push_str("\nQuestion: ");
        prompt.push_str(&query.text);
        prompt.push_str(
            "\n\nEnd your answer with a confidence marker like [confidence: 0.85].",
        );
        prompt
    }

    /// Split a trailing `[confidence: X.XX]` marker off the response text.
    /// Answers without a marker default to 0.5.
    fn extract_confidence(text: &str) -> (String, f64) {
        if let Some(start) = text.rfind("[confidence:") {
            if let Some(end) = text[start..].find(']') {
                let marker = &text[start + 12..start + end];
                if let Ok(confidence) = marker.trim().parse::<f64>() {
                    let claim = text[..start].trim_end().to_string();
                    return (claim, confidence.clamp(0.0, 1.0));
                }
            }
        }
        (text.trim_end().to_string(), 0.5)
    }
}

#[async_trait]
impl ReasoningAgent for HttpAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    async fn answer(
        &self,
        query: &Query,
        evidence: &EvidenceBundle,
    ) -> Result<AgentAnswer, AgentError> {
        #[derive(Serialize)]
        struct ChatMessage {
            role: &'static str,
            content: String,
        }

        #[derive(Serialize)]
        struct ChatRequest {
            model: String,
            messages: Vec<ChatMessage>,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ResponseMessage,
        }

        #[derive(Deserialize)]
        struct ResponseMessage {
            content: Option<String>,
        }

        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: Self::build_prompt(query, evidence),
            }],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::MalformedResponse(e.to_string()))?;

        let content = chat
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| AgentError::MalformedResponse("empty choices".into()))?;

        let (claim, confidence) = Self::extract_confidence(&content);
        Ok(AgentAnswer {
            claim,
            confidence,
            embedding: None,
        })
    }
}

/// Deterministic scripted agent for tests and offline runs.
pub struct ScriptedAgent {
    id: AgentId,
    claim: String,
    confidence: f64,
    embedding: Option<Vec<f32>>,
    delay: Option<Duration>,
    fail: bool,
}

impl ScriptedAgent {
    /// Agent that always answers with the given claim and confidence.
    pub fn answering(id: AgentId, claim: impl Into<String>, confidence: f64) -> Self {
        Self {
            id,
            claim: claim.into(),
            confidence,
            embedding: None,
            delay: None,
            fail: false,
        }
    }

    /// Attach a claim embedding.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Delay the answer; useful for exercising deadlines.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Agent that always fails.
    pub fn failing(id: AgentId) -> Self {
        Self {
            id,
            claim: String::new(),
            confidence: 0.0,
            embedding: None,
            delay: None,
            fail: true,
        }
    }
}

#[async_trait]
impl ReasoningAgent for ScriptedAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    async fn answer(
        &self,
        _query: &Query,
        _evidence: &EvidenceBundle,
    ) -> Result<AgentAnswer, AgentError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AgentError::RequestFailed("scripted failure".into()));
        }
        Ok(AgentAnswer {
            claim: self.claim.clone(),
            confidence: self.confidence,
            embedding: self.embedding.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseStatus;

    fn bundle() -> EvidenceBundle {
        EvidenceBundle {
            fingerprint: "fp".into(),
            items: vec![],
            retrieved_at: chrono::Utc::now(),
            ttl: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn test_wrapper_ok_response() {
        let agent = Arc::new(ScriptedAgent::answering(AgentId::Analyst, "X=5", 0.9));
        let wrapper = AgentWrapper::new(agent, Duration::from_secs(1));

        let resp = wrapper.invoke(&Query::new("q", "test"), &bundle()).await;
        assert_eq!(resp.status, ResponseStatus::Ok);
        assert_eq!(resp.claim.as_deref(), Some("X=5"));
        assert!((resp.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrapper_timeout() {
        let agent = Arc::new(
            ScriptedAgent::answering(AgentId::Skeptic, "slow", 0.9)
                .with_delay(Duration::from_secs(10)),
        );
        let wrapper = AgentWrapper::new(agent, Duration::from_secs(3));

        let resp = wrapper.invoke(&Query::new("q", "test"), &bundle()).await;
        assert_eq!(resp.status, ResponseStatus::Timeout);
        assert!(resp.claim.is_none());
        assert_eq!(resp.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_wrapper_error() {
        let agent = Arc::new(ScriptedAgent::failing(AgentId::Empiricist));
        let wrapper = AgentWrapper::new(agent, Duration::from_secs(1));

        let resp = wrapper.invoke(&Query::new("q", "test"), &bundle()).await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert!(resp.claim.is_none());
    }

    #[test]
    fn test_extract_confidence_marker() {
        let (claim, conf) = HttpAgent::extract_confidence("X is 5.\n[confidence: 0.85]");
        assert_eq!(claim, "X is 5.");
        assert!((conf - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_extract_confidence_missing_marker() {
        let (claim, conf) = HttpAgent::extract_confidence("X is 5.");
        assert_eq!(claim, "X is 5.");
        assert!((conf - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_extract_confidence_clamped() {
        let (_, conf) = HttpAgent::extract_confidence("claim [confidence: 3.0]");
        assert!((conf - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prompt_includes_evidence() {
        let evidence = EvidenceBundle {
            fingerprint: "fp".into(),
            items: vec![crate::types::EvidenceItem {
                source_id: "kb:42".into(),
                excerpt: "X equals five".into(),
                relevance: 0.9,
            }],
            retrieved_at: chrono::Utc::now(),
            ttl: Duration::from_secs(300),
        };
        let prompt = HttpAgent::build_prompt(&Query::new("what is X?", "test"), &evidence);
        assert!(prompt.contains("[kb:42] X equals five"));
        assert!(prompt.contains("what is X?"));
    }
}
