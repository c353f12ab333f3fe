//! Deterministic in-process generation client.
//!
//! Replies are routed by request purpose and, optionally, by a substring of the system or
//! user prompt. Rules are consulted in insertion order; a sequence rule replays its replies
//! one per call and stops matching once drained. Every request is recorded.

use crate::decompose::labels::split_sections;
use crate::error::GenerationError;
use crate::problem::ATOMIC_ID;
use crate::provider::{parse_json_body, Generation, GenerationClient, GenerationRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

type Responder = Arc<dyn Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync>;

enum Replies {
    Sticky(Result<String, GenerationError>),
    Sequence(VecDeque<Result<String, GenerationError>>),
    Computed(Responder),
}

struct Rule {
    purpose: String,
    contains: Option<String>,
    replies: Replies,
}

impl Rule {
    fn matches(&self, request: &GenerationRequest) -> bool {
        if self.purpose != request.purpose {
            return false;
        }
        if let Replies::Sequence(queue) = &self.replies {
            if queue.is_empty() {
                return false;
            }
        }
        match &self.contains {
            Some(needle) => request.user.contains(needle) || request.system.contains(needle),
            None => true,
        }
    }

    fn next(&mut self, request: &GenerationRequest) -> Result<String, GenerationError> {
        match &mut self.replies {
            Replies::Sticky(reply) => reply.clone(),
            Replies::Sequence(queue) => queue
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Fatal("sequence drained".to_string()))),
            Replies::Computed(responder) => responder(request),
        }
    }
}

/// Scripted generation client for tests and offline runs.
#[derive(Default)]
pub struct ScriptedClient {
    rules: Mutex<Vec<Rule>>,
    default_reply: Option<String>,
    latency: Option<Duration>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, purpose: &str, contains: Option<&str>, replies: Replies) -> Self {
        self.rules.get_mut().push(Rule {
            purpose: purpose.to_string(),
            contains: contains.map(str::to_string),
            replies,
        });
        self
    }

    /// Always answer `purpose` with `text`.
    pub fn reply(self, purpose: &str, text: impl Into<String>) -> Self {
        self.push(purpose, None, Replies::Sticky(Ok(text.into())))
    }

    /// Always fail `purpose` with `error`.
    pub fn fail(self, purpose: &str, error: GenerationError) -> Self {
        self.push(purpose, None, Replies::Sticky(Err(error)))
    }

    /// Fail `purpose` with `error` when either prompt contains `needle`.
    pub fn fail_when(self, purpose: &str, needle: &str, error: GenerationError) -> Self {
        self.push(purpose, Some(needle), Replies::Sticky(Err(error)))
    }

    /// Replay `replies` in order for `purpose`.
    pub fn sequence(self, purpose: &str, replies: Vec<Result<String, GenerationError>>) -> Self {
        self.push(purpose, None, Replies::Sequence(replies.into()))
    }

    /// Compute the reply from the request.
    pub fn respond_with<F>(self, purpose: &str, responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync + 'static,
    {
        self.push(purpose, None, Replies::Computed(Arc::new(responder)))
    }

    /// Reply used when no rule matches.
    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(text.into());
        self
    }

    /// Simulated service latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, purpose: &str) -> Vec<GenerationRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.purpose == purpose)
            .cloned()
            .collect()
    }

    /// Client that produces structurally valid placeholder content without a network.
    ///
    /// Decomposition follows the problem's explicit labels (one sub-problem each) or
    /// falls back to a single atomic sub-problem; every other stage echoes a short
    /// digest of its prompt.
    pub fn offline() -> Self {
        Self::new().with_offline_rules()
    }

    /// Append the offline rules after any rules already configured, so earlier rules
    /// (injected failures, fixed replies) take precedence.
    pub fn with_offline_rules(self) -> Self {
        self.respond_with("decompose", |request| Ok(offline_decomposition(&request.user)))
            .reply("data_extraction", "")
            .respond_with("search", |request| {
                Ok(format!(
                    "Offline search report (no sources consulted).\n\n{}",
                    digest(&request.user)
                ))
            })
            .with_default("Offline mode: no generation service was contacted.")
    }

    fn next_reply(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut rules = self.rules.lock();
        if let Some(rule) = rules.iter_mut().find(|rule| rule.matches(request)) {
            return rule.next(request);
        }
        drop(rules);
        match &self.default_reply {
            Some(text) => Ok(format!("{}\n\n{}", text, digest(&request.user))),
            None => Err(GenerationError::Fatal(format!(
                "No scripted reply for purpose '{}'",
                request.purpose
            ))),
        }
    }
}

fn digest(text: &str) -> String {
    let cut: String = text.chars().take(400).collect();
    cut.trim().to_string()
}

fn offline_decomposition(prompt: &str) -> String {
    let sections = split_sections(prompt);
    let sub_problems: Vec<_> = if sections.len() >= 2 {
        sections
            .iter()
            .enumerate()
            .map(|(i, section)| {
                json!({
                    "id": format!("SUB_{:02}", i + 1),
                    "title": section.label,
                    "description": section.body,
                    "suggested_approach": "Address the labeled question directly.",
                    "data_flag": 0,
                    "data_list": []
                })
            })
            .collect()
    } else {
        vec![json!({
            "id": ATOMIC_ID,
            "title": "Problem",
            "description": digest(prompt),
            "suggested_approach": "Answer the problem as a single unit.",
            "data_flag": 0,
            "data_list": []
        })]
    };
    json!({
        "problem_id": "offline",
        "main_problem_definition": digest(prompt),
        "sub_problems": sub_problems
    })
    .to_string()
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        self.calls.lock().push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let text = self.next_reply(&request)?;
        let json = if request.expects_json() {
            parse_json_body(&text).ok()
        } else {
            None
        };
        Ok(Generation {
            text,
            model: request.model,
            json,
        })
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}
