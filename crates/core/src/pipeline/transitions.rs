//! Pure state-machine rules for pipelines.
//!
//! Every function here validates and mutates an in-memory [`Pipeline`]; the
//! orchestrator persists the result with a compare-and-swap update.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{
    Pipeline, PipelineErrorEntry, PipelineStage, PipelineStatus, StageHistoryEntry, StageOutcome,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Cannot {action} pipeline in status {status}")]
    Terminal {
        action: &'static str,
        status: PipelineStatus,
    },

    #[error("Cannot move pipeline from {from} to {to}")]
    OutOfOrder {
        from: PipelineStage,
        to: PipelineStage,
    },

    #[error("Pipeline failed at {0}; retry the stage before advancing")]
    Failed(PipelineStage),
}

/// Result of checking an advancement request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvancePlan {
    /// The pipeline is already at the target stage (retried worker).
    AlreadyAt,
    /// The target is the immediate successor of the current stage.
    Advance,
}

pub fn check_advance(
    pipeline: &Pipeline,
    target: PipelineStage,
) -> Result<AdvancePlan, TransitionError> {
    if pipeline.is_terminal() {
        return Err(TransitionError::Terminal {
            action: "advance",
            status: pipeline.status,
        });
    }
    if target == pipeline.current_stage {
        return Ok(AdvancePlan::AlreadyAt);
    }
    if pipeline.status == PipelineStatus::Failed {
        return Err(TransitionError::Failed(pipeline.current_stage));
    }
    if pipeline.current_stage.next() == Some(target) {
        Ok(AdvancePlan::Advance)
    } else {
        Err(TransitionError::OutOfOrder {
            from: pipeline.current_stage,
            to: target,
        })
    }
}

/// Move to `target`, which must have passed [`check_advance`] with `Advance`.
pub fn apply_advance(
    pipeline: &mut Pipeline,
    target: PipelineStage,
    trigger: &str,
    now: DateTime<Utc>,
) {
    close_open_entry(pipeline, StageOutcome::Completed, now);
    pipeline.current_stage = target;

    if target.is_terminal() {
        pipeline.stage_history.push(StageHistoryEntry {
            stage: target,
            entered_at: now,
            exited_at: Some(now),
            outcome: Some(StageOutcome::Completed),
            trigger: trigger.to_string(),
        });
        pipeline.status = PipelineStatus::Completed;
        pipeline.completed_at = Some(now);
    } else {
        pipeline.stage_history.push(StageHistoryEntry {
            stage: target,
            entered_at: now,
            exited_at: None,
            outcome: None,
            trigger: trigger.to_string(),
        });
        pipeline.status = PipelineStatus::InProgress;
    }
}

/// PENDING -> IN_PROGRESS. Returns false when there was nothing to do.
pub fn apply_start(pipeline: &mut Pipeline) -> bool {
    if pipeline.status == PipelineStatus::Pending {
        pipeline.status = PipelineStatus::InProgress;
        true
    } else {
        false
    }
}

pub fn apply_failure(
    pipeline: &mut Pipeline,
    stage: PipelineStage,
    message: &str,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if pipeline.is_terminal() {
        return Err(TransitionError::Terminal {
            action: "fail",
            status: pipeline.status,
        });
    }
    pipeline.errors.push(PipelineErrorEntry {
        stage,
        message: message.to_string(),
        occurred_at: now,
    });
    close_open_entry(pipeline, StageOutcome::Failed, now);
    pipeline.status = PipelineStatus::Failed;
    Ok(())
}

/// Re-open the current stage. The stage itself never changes.
pub fn apply_retry(pipeline: &mut Pipeline, now: DateTime<Utc>) -> Result<(), TransitionError> {
    if pipeline.is_terminal() {
        return Err(TransitionError::Terminal {
            action: "retry",
            status: pipeline.status,
        });
    }
    close_open_entry(pipeline, StageOutcome::Retried, now);
    pipeline.stage_history.push(StageHistoryEntry {
        stage: pipeline.current_stage,
        entered_at: now,
        exited_at: None,
        outcome: None,
        trigger: "retry".to_string(),
    });
    pipeline.status = PipelineStatus::InProgress;
    Ok(())
}

pub fn apply_cancel(
    pipeline: &mut Pipeline,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if pipeline.is_terminal() {
        return Err(TransitionError::Terminal {
            action: "cancel",
            status: pipeline.status,
        });
    }
    close_open_entry(pipeline, StageOutcome::Cancelled, now);
    pipeline.status = PipelineStatus::Cancelled;
    pipeline.cancel_reason = Some(reason.to_string());
    pipeline.cancelled_at = Some(now);
    Ok(())
}

fn close_open_entry(pipeline: &mut Pipeline, outcome: StageOutcome, now: DateTime<Utc>) {
    if let Some(entry) = pipeline.stage_history.last_mut() {
        if entry.is_open() {
            entry.exited_at = Some(now);
            entry.outcome = Some(outcome);
        }
    }
}
