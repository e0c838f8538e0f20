use crate::error::PvpError;
use crate::quiz::question::{validate_question_set, GeneratedQuestion, Question, QuestionSetShape};
use futures_util::future::BoxFuture;
use log::{debug, error, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of question sets. Slow and fallible; the output is never trusted as-is.
pub trait QuestionProvider: Send + Sync {
    fn generate<'a>(
        &'a self,
        topics: &'a [String],
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<GeneratedQuestion>, String>>;
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    topics: &'a [String],
    count: usize,
}

#[derive(Deserialize)]
struct GenerationResponse {
    questions: Vec<GeneratedQuestion>,
}

/// Calls an external generation service over HTTP.
pub struct HttpQuestionProvider {
    client: Client,
    url: String,
}

impl HttpQuestionProvider {
    pub fn new(url: String, timeout: Duration) -> Result<HttpQuestionProvider, String> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|x| x.to_string())?;

        Ok(HttpQuestionProvider { client, url })
    }
}

impl QuestionProvider for HttpQuestionProvider {
    fn generate<'a>(
        &'a self,
        topics: &'a [String],
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<GeneratedQuestion>, String>> {
        Box::pin(async move {
            debug!("Requesting {} questions from {}", count, self.url);

            let response = self
                .client
                .post(&self.url)
                .json(&GenerationRequest { topics, count })
                .send()
                .await
                .map_err(|x| x.to_string())?;

            if !response.status().is_success() {
                return Err(format!("generator responded with {}", response.status()));
            }

            let body = response
                .json::<GenerationResponse>()
                .await
                .map_err(|x| format!("malformed generator response: {}", x))?;

            Ok(body.questions)
        })
    }
}

/// Serves a fixed set of questions. Used when no generator is configured and in tests.
pub struct StaticQuestionProvider {
    questions: Vec<GeneratedQuestion>,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl StaticQuestionProvider {
    pub fn new(questions: Vec<GeneratedQuestion>) -> Self {
        StaticQuestionProvider {
            questions,
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        }
    }

    /// The next `times` calls report an upstream error instead of serving the set.
    pub fn fail_next(&self, times: usize) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn sample() -> Self {
        let question = |prompt: &str, choices: [&str; 4], answer_index: i64, explanation: &str| {
            GeneratedQuestion {
                id: None,
                prompt: prompt.to_string(),
                choices: choices.iter().map(|x| x.to_string()).collect(),
                answer_index,
                explanation: explanation.to_string(),
            }
        };

        Self::new(vec![
            question(
                "Which technique lets a write-heavy table scale horizontally?",
                ["Sharding", "Adding indexes", "Vertical scaling", "Read replicas"],
                0,
                "Sharding splits rows across nodes so writes spread out.",
            ),
            question(
                "What does an idempotency key protect against?",
                ["Slow queries", "Duplicate processing on retry", "Cache misses", "Schema drift"],
                1,
                "Retries carrying the same key are recognised and not applied twice.",
            ),
            question(
                "Which cache strategy writes to the cache and the store together?",
                ["Write-back", "Cache-aside", "Write-through", "Read-through"],
                2,
                "Write-through updates both synchronously on every write.",
            ),
            question(
                "What is the main purpose of a dead letter queue?",
                ["Prioritising messages", "Compressing payloads", "Encrypting messages", "Parking messages that keep failing"],
                3,
                "Poison messages are moved aside so the main queue keeps flowing.",
            ),
            question(
                "Optimistic concurrency control detects conflicts by comparing what?",
                ["A version read before the write", "Lock owners", "Wall clock time", "Request sizes"],
                0,
                "The commit fails if the version changed since it was read.",
            ),
        ])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QuestionProvider for StaticQuestionProvider {
    fn generate<'a>(
        &'a self,
        _topics: &'a [String],
        _count: usize,
    ) -> BoxFuture<'a, Result<Vec<GeneratedQuestion>, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |x| x.checked_sub(1))
            .is_ok();
        let questions = self.questions.clone();

        Box::pin(async move {
            if failing {
                return Err(String::from("generator returned no questions"));
            }
            Ok(questions)
        })
    }
}

/// Wraps a provider with shape validation. Invoked at most once per match.
pub struct QuestionSetGenerator {
    provider: Arc<dyn QuestionProvider>,
    shape: QuestionSetShape,
}

impl QuestionSetGenerator {
    pub fn new(provider: Arc<dyn QuestionProvider>, shape: QuestionSetShape) -> Self {
        QuestionSetGenerator { provider, shape }
    }

    pub async fn generate_question_set(&self, topics: &[String]) -> Result<Vec<Question>, PvpError> {
        let raw = self
            .provider
            .generate(topics, self.shape.question_count)
            .await
            .map_err(|x| {
                warn!("Question generator failed: {}", x);
                PvpError::Upstream(x)
            })?;

        validate_question_set(raw, self.shape).map_err(|x| {
            error!("Rejected generated question set: {}", x);
            PvpError::Upstream(x)
        })
    }
}
