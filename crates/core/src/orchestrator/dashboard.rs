//! Operator dashboard aggregation.

use serde::Serialize;

use super::runner::PipelineOrchestrator;
use super::types::OrchestratorError;
use crate::pipeline::{Pipeline, PipelineFilter, PipelineStats, PipelineStatus};
use crate::queue::{QueueManager, QueueStatus};

const RECENT_PIPELINES: i64 = 10;
/// Failed pipelines listed individually before the feed stops.
const MAX_PIPELINE_ALERTS: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PipelineFailed,
    QueueFailedJobs,
    QueuePaused,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub stats: PipelineStats,
    pub queues: Vec<QueueStatus>,
    pub recent: Vec<Pipeline>,
    pub alerts: Vec<Alert>,
}

impl PipelineOrchestrator {
    /// Counts, queue depths, recent pipelines and alerts for one brand.
    ///
    /// Queues are shared across brands, so queue figures are global.
    pub fn get_dashboard(
        &self,
        brand_id: &str,
        queues: &QueueManager,
    ) -> Result<Dashboard, OrchestratorError> {
        let stats = self.pipelines.stats(Some(brand_id))?;
        let queue_status = queues.get_all_queues_status()?;
        let recent = self.pipelines.list(
            &PipelineFilter::new()
                .with_brand(brand_id)
                .with_limit(RECENT_PIPELINES),
        )?;

        let mut alerts = Vec::new();
        let failed = self.pipelines.list(
            &PipelineFilter::new()
                .with_brand(brand_id)
                .with_status(PipelineStatus::Failed)
                .with_limit(MAX_PIPELINE_ALERTS),
        )?;
        for p in failed {
            let message = match p.last_error() {
                Some(err) => format!("{} failed at {}: {}", p.order_id, err.stage, err.message),
                None => format!("{} failed at {}", p.order_id, p.current_stage),
            };
            alerts.push(Alert {
                kind: AlertKind::PipelineFailed,
                message,
                pipeline_id: Some(p.id),
                queue: None,
            });
        }
        for q in &queue_status {
            if q.counts.failed > 0 {
                alerts.push(Alert {
                    kind: AlertKind::QueueFailedJobs,
                    message: format!("{} has {} failed jobs", q.name, q.counts.failed),
                    pipeline_id: None,
                    queue: Some(q.name.clone()),
                });
            }
            if q.counts.is_paused {
                alerts.push(Alert {
                    kind: AlertKind::QueuePaused,
                    message: format!("{} is paused", q.name),
                    pipeline_id: None,
                    queue: Some(q.name.clone()),
                });
            }
        }

        Ok(Dashboard {
            stats,
            queues: queue_status,
            recent,
            alerts,
        })
    }
}
