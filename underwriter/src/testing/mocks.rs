//! Mock collaborators for tests and benches.

use crate::clients::{
    ClientError, InferenceClient, ModelInput, ModelOutput, Passage, RegistryClient,
    RetrievalClient,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// A scriptable inference collaborator.
///
/// Responses and persistent errors are keyed by model id; one-shot failures
/// are queued globally and consumed in order, which makes transient-failure
/// scripts (`fail twice, then succeed`) one line per failure.
#[derive(Debug, Default)]
pub struct MockInferenceClient {
    responses: Mutex<HashMap<String, ModelOutput>>,
    errors: Mutex<HashMap<String, ClientError>>,
    failures: Mutex<VecDeque<ClientError>>,
    calls: Mutex<Vec<(String, ModelInput)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockInferenceClient {
    /// Creates a mock that answers every call with a default text output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the canned response for a model id.
    pub fn set_response(&self, model_id: impl Into<String>, output: ModelOutput) {
        self.responses.lock().insert(model_id.into(), output);
    }

    /// Makes every call against a model id fail with the given error.
    pub fn set_error(&self, model_id: impl Into<String>, error: ClientError) {
        self.errors.lock().insert(model_id.into(), error);
    }

    /// Queues a one-shot failure consumed by the next call, regardless of
    /// model id.
    pub fn fail_next(&self, error: ClientError) {
        self.failures.lock().push_back(error);
    }

    /// Delays every call, e.g. to exercise timeouts.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of calls received for one model id.
    #[must_use]
    pub fn calls_for(&self, model_id: &str) -> usize {
        self.calls.lock().iter().filter(|(id, _)| id == model_id).count()
    }

    /// The most recent model input, if any call was made.
    #[must_use]
    pub fn last_input(&self) -> Option<ModelInput> {
        self.calls.lock().last().map(|(_, input)| input.clone())
    }
}

#[async_trait]
impl InferenceClient for MockInferenceClient {
    async fn invoke_model(
        &self,
        model_id: &str,
        input: ModelInput,
    ) -> Result<ModelOutput, ClientError> {
        self.calls.lock().push((model_id.to_string(), input));

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.errors.lock().get(model_id) {
            return Err(error.clone());
        }

        Ok(self
            .responses
            .lock()
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| ModelOutput::text("mock response")))
    }
}

/// A scriptable retrieval collaborator. Returns no passages by default.
#[derive(Debug, Default)]
pub struct MockRetrievalClient {
    passages: Mutex<Vec<Passage>>,
    failures: Mutex<VecDeque<ClientError>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockRetrievalClient {
    /// Creates a mock returning an empty passage list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the passages returned by every call.
    pub fn set_passages(&self, passages: Vec<Passage>) {
        *self.passages.lock() = passages;
    }

    /// Queues a one-shot failure.
    pub fn fail_next(&self, error: ClientError) {
        self.failures.lock().push_back(error);
    }

    /// Delays every call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// The most recent `(corpus_id, query)` pair.
    #[must_use]
    pub fn last_query(&self) -> Option<(String, String)> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl RetrievalClient for MockRetrievalClient {
    async fn retrieve(&self, corpus_id: &str, query: &str) -> Result<Vec<Passage>, ClientError> {
        self.calls
            .lock()
            .push((corpus_id.to_string(), query.to_string()));

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        Ok(self.passages.lock().clone())
    }
}

/// A scriptable registry collaborator. Returns no record by default.
#[derive(Debug, Default)]
pub struct MockRegistryClient {
    record: Mutex<Option<crate::clients::RegistryRecord>>,
    failures: Mutex<VecDeque<ClientError>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockRegistryClient {
    /// Creates a mock that finds no record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the record returned by every lookup.
    pub fn set_record(&self, record: Option<crate::clients::RegistryRecord>) {
        *self.record.lock() = record;
    }

    /// Queues a one-shot failure.
    pub fn fail_next(&self, error: ClientError) {
        self.failures.lock().push_back(error);
    }

    /// Delays every call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of lookups received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// The most recent `(name, license_number)` pair.
    #[must_use]
    pub fn last_lookup(&self) -> Option<(String, String)> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl RegistryClient for MockRegistryClient {
    async fn lookup(
        &self,
        name: &str,
        license_number: &str,
    ) -> Result<Option<crate::clients::RegistryRecord>, ClientError> {
        self.calls
            .lock()
            .push((name.to_string(), license_number.to_string()));

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        Ok(self.record.lock().clone())
    }
}
