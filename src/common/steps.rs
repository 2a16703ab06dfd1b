//! Sequential step runner used by every task façade.

use super::error::ResourceError;
use super::resource::ResourceFuture;

/// One labelled unit of work in a lifecycle sequence.
pub struct Step<'a> {
    description: String,
    action: ResourceFuture<'a>,
}

impl<'a> Step<'a> {
    /// Labels a pending resource operation.
    pub fn new(description: impl Into<String>, action: ResourceFuture<'a>) -> Self {
        Self {
            description: description.into(),
            action,
        }
    }

    /// Returns the progress label.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Awaits each step in order, logging `[i/n] <description>`.
///
/// Step futures are lazy, so steps after a failure never run.
///
/// # Errors
///
/// Returns the error of the first failing step.
pub async fn run_steps(steps: Vec<Step<'_>>) -> Result<(), ResourceError> {
    let total = steps.len();
    for (index, step) in steps.into_iter().enumerate() {
        tracing::info!("[{}/{}] {}", index + 1, total, step.description);
        step.action.await.map_err(|err| {
            tracing::warn!(step = %step.description, error = %err, "step failed");
            err
        })?;
    }
    Ok(())
}
