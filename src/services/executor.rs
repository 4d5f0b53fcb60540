use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::job::JobId;
use crate::models::parse::{ParseOptions, ParseResult};
use crate::services::omniparser::{ExecutionError, OmniparserClient};
use crate::services::registry::InstanceHandle;

/// What the executor needs to run one attempt of a job.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job_id: JobId,
    pub attempt: u32,
    pub payload: Arc<Vec<u8>>,
    pub options: ParseOptions,
}

/// Result of one attempt, reported back to the dispatcher.
#[derive(Debug)]
pub struct Outcome {
    pub job_id: JobId,
    pub attempt: u32,
    pub instance: String,
    pub result: Result<ParseResult, ExecutionError>,
}

/// Runs parse calls against instances.
///
/// The executor only reports outcomes. Job state and instance slots are left
/// to the dispatcher.
#[derive(Clone)]
pub struct JobExecutor {
    client: OmniparserClient,
}

impl JobExecutor {
    pub fn new(client: OmniparserClient) -> Self {
        Self { client }
    }

    /// Call `instance` for `request`, giving up after `budget`.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        instance: &InstanceHandle,
        budget: Duration,
    ) -> Outcome {
        tracing::debug!(
            job_id = %request.job_id,
            instance = %instance.name(),
            attempt = request.attempt,
            budget_ms = budget.as_millis() as u64,
            "Calling OmniParser instance"
        );

        let start = Instant::now();
        let result = if budget.is_zero() {
            Err(ExecutionError::Transient("no processing budget left".to_string()))
        } else {
            self.client
                .parse(instance.url(), &request.payload, &request.options, budget)
                .await
        };
        let elapsed = start.elapsed();

        match &result {
            Ok(parsed) => tracing::debug!(
                job_id = %request.job_id,
                instance = %instance.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                elements = parsed.elements.len(),
                "OmniParser call succeeded"
            ),
            Err(e) => tracing::debug!(
                job_id = %request.job_id,
                instance = %instance.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "OmniParser call failed"
            ),
        }

        Outcome {
            job_id: request.job_id,
            attempt: request.attempt,
            instance: instance.name().to_string(),
            result,
        }
    }
}
