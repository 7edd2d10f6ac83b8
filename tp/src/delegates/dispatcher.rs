//! Dispatcher - selects delegates by name and runs them with retries

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::builtin::{DraftingDelegate, PersonaDelegate, PlanningDelegate, ProfilingDelegate};
use super::{DelegateError, TaskContext, TaskDelegate, TaskResult};
use crate::llm::LlmClient;

/// Registry of delegates for one orchestrator
pub struct Dispatcher {
    delegates: HashMap<String, Arc<dyn TaskDelegate>>,
    retries: u32,
}

impl Dispatcher {
    /// Dispatcher with the four LLM-backed delegates
    pub fn standard(llm: Arc<dyn LlmClient>, timeout: Duration, retries: u32) -> Self {
        let mut dispatcher = Self::empty(retries);
        dispatcher.register(Arc::new(ProfilingDelegate::new(llm.clone(), timeout)));
        dispatcher.register(Arc::new(PersonaDelegate::new(llm.clone(), timeout)));
        dispatcher.register(Arc::new(PlanningDelegate::new(llm.clone(), timeout)));
        dispatcher.register(Arc::new(DraftingDelegate::new(llm, timeout)));
        dispatcher
    }

    /// Dispatcher with no delegates registered
    pub fn empty(retries: u32) -> Self {
        Self {
            delegates: HashMap::new(),
            retries,
        }
    }

    /// Register a delegate under its name, replacing any previous one
    pub fn register(&mut self, delegate: Arc<dyn TaskDelegate>) {
        self.delegates.insert(delegate.name().to_string(), delegate);
    }

    /// Run the named delegate
    ///
    /// A retryable failure is retried up to the configured number of times;
    /// a final one is returned at once. Either way the error carries the
    /// total attempt count.
    pub async fn dispatch(&self, name: &str, ctx: &TaskContext) -> Result<TaskResult, DelegateError> {
        debug!(%name, session_id = %ctx.session_id, turn = ctx.turn, "Dispatcher::dispatch: called");
        let delegate = self
            .delegates
            .get(name)
            .ok_or_else(|| DelegateError::Unknown { name: name.to_string() })?;

        let max_attempts = self.retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match delegate.run(ctx).await {
                Ok(result) => return Ok(result),
                Err(DelegateError::Failed { reason, retryable, .. }) => {
                    if retryable && attempt < max_attempts {
                        warn!(%name, attempt, %reason, "Dispatcher::dispatch: delegate failed, retrying");
                        continue;
                    }
                    warn!(%name, attempt, %reason, "Dispatcher::dispatch: delegate failed");
                    return Err(DelegateError::Failed {
                        task: name.to_string(),
                        attempts: attempt,
                        reason,
                        retryable,
                    });
                }
                Err(other) => return Err(other),
            }
        }
    }
}
