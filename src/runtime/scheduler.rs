/// Cron rescheduler
///
/// Keeps tokio-cron-scheduler in sync with the cronTrigger nodes of active
/// workflows. Every reschedule drops all registered jobs and rebuilds the
/// set from scratch under one lock, so calling it repeatedly with the same
/// workflows always yields the same jobs.

use crate::runtime::engine::ExecutionEngine;
use crate::workflow::types::{NodeKind, Workflow};
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

struct SchedulerState {
    scheduler: JobScheduler,
    /// "workflowId:nodeId" -> scheduler job id
    jobs: BTreeMap<String, Uuid>,
}

/// Owns the job scheduler and the cron jobs derived from stored workflows
pub struct CronRescheduler {
    state: Mutex<SchedulerState>,
    engine: ExecutionEngine,
}

impl CronRescheduler {
    pub async fn new(engine: ExecutionEngine) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            state: Mutex::new(SchedulerState {
                scheduler,
                jobs: BTreeMap::new(),
            }),
            engine,
        })
    }

    /// Register jobs for every stored workflow and start ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting cron rescheduler");
        self.reschedule_from_store().await?;

        let state = self.state.lock().await;
        state.scheduler.start().await?;

        tracing::info!("✅ Cron rescheduler started with {} jobs", state.jobs.len());
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping cron rescheduler");
        let mut state = self.state.lock().await;
        state.jobs.clear();
        state.scheduler.shutdown().await?;
        Ok(())
    }

    /// Reload every workflow from the store and rebuild the job set
    ///
    /// Rows that no longer decode are skipped so they cannot block the rest.
    pub async fn reschedule_from_store(&self) -> Result<()> {
        let workflows = self.engine.store().list_loadable_workflows().await?;
        self.reschedule(&workflows).await
    }

    /// Drop every job and register one per cronTrigger of each active workflow
    ///
    /// Invalid expressions are logged and skipped.
    pub async fn reschedule(&self, workflows: &[Workflow]) -> Result<()> {
        let mut state = self.state.lock().await;

        let previous = std::mem::take(&mut state.jobs);
        for (key, job_id) in previous {
            if let Err(e) = state.scheduler.remove(&job_id).await {
                tracing::warn!("⚠️ Failed to remove cron job {}: {}", key, e);
            }
        }

        for workflow in workflows.iter().filter(|workflow| workflow.active) {
            let snapshot = Arc::new(workflow.clone());
            let cron_nodes = workflow
                .nodes
                .iter()
                .filter(|node| node.kind == NodeKind::CronTrigger);

            for node in cron_nodes {
                let Some(expression) = node.string_param("cronExpression") else {
                    tracing::debug!("📋 Cron node {} in {} has no expression", node.id, workflow.id);
                    continue;
                };

                let key = format!("{}:{}", workflow.id, node.id);
                let schedule = to_scheduler_expression(expression);
                let engine = self.engine.clone();
                let workflow = Arc::clone(&snapshot);

                let job = Job::new_async(schedule.as_str(), move |_uuid, _l| {
                    let engine = engine.clone();
                    let workflow = Arc::clone(&workflow);

                    Box::pin(async move {
                        tracing::info!("🔔 Cron trigger fired for workflow {}", workflow.id);
                        match engine.execute(&workflow, Vec::new()).await {
                            Ok(execution_id) => {
                                tracing::info!("✅ Cron execution {} completed", execution_id)
                            }
                            Err(e) => tracing::error!(
                                "❌ Cron execution of workflow {} failed: {}",
                                workflow.id,
                                e
                            ),
                        }
                    })
                });

                let job = match job {
                    Ok(job) => job,
                    Err(e) => {
                        tracing::warn!(
                            "⚠️ Skipping cron job {} with invalid expression '{}': {}",
                            key,
                            expression,
                            e
                        );
                        continue;
                    }
                };

                let job_id = state.scheduler.add(job).await?;
                tracing::debug!("📝 Registered cron job {} ({})", key, schedule);
                state.jobs.insert(key, job_id);
            }
        }

        tracing::info!("🔄 Rescheduled {} cron jobs", state.jobs.len());
        Ok(())
    }

    /// Keys ("workflowId:nodeId") of the currently registered jobs
    pub async fn job_keys(&self) -> Vec<String> {
        self.state.lock().await.jobs.keys().cloned().collect()
    }
}

/// Day names in standard cron order, Sunday first
const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Standard 5-field cron gains a leading seconds field; longer forms pass through
///
/// The scheduler numbers weekdays 1 (Sunday) to 7, standard cron 0 (or 7) to
/// 6, so a numeric day-of-week field is rewritten as day names.
fn to_scheduler_expression(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, day, month, weekday] => format!(
            "0 {} {} {} {} {}",
            minute,
            hour,
            day,
            month,
            weekday_names(weekday)
        ),
        _ => expression.trim().to_string(),
    }
}

/// Rewrite numeric weekdays (lists, ranges, steps) as a list of day names
///
/// Wildcards, named days and anything unparsable are returned unchanged.
fn weekday_names(field: &str) -> String {
    if field == "*" || field == "?" {
        return field.to_string();
    }

    let mut days = [false; 7];
    for part in field.split(',') {
        let Some(range) = weekday_range(part) else {
            return field.to_string();
        };
        for day in range {
            days[day % 7] = true;
        }
    }

    WEEKDAYS
        .iter()
        .zip(days)
        .filter_map(|(name, selected)| selected.then_some(*name))
        .collect::<Vec<_>>()
        .join(",")
}

fn weekday_range(part: &str) -> Option<std::iter::StepBy<std::ops::RangeInclusive<usize>>> {
    let (base, step) = match part.split_once('/') {
        Some((base, step)) => (base, step.parse::<usize>().ok().filter(|step| *step > 0)?),
        None => (part, 1),
    };

    let (start, end): (usize, usize) = match base.split_once('-') {
        _ if base == "*" => (0, 6),
        Some((start, end)) => (start.parse().ok()?, end.parse().ok()?),
        None => {
            let start = base.parse().ok()?;
            (start, if part.contains('/') { 7 } else { start })
        }
    };

    if start > end || end > 7 {
        return None;
    }
    Some((start..=end).step_by(step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::handlers::NodeRegistry;
    use crate::runtime::sandbox::ScriptRunner;
    use crate::workflow::storage::tests::{insert_corrupt_workflow, test_store};
    use chrono::{Datelike, Weekday};
    use serde_json::json;

    fn cron_workflow(id: &str, active: bool, expressions: &[&str]) -> Workflow {
        let nodes: Vec<_> = expressions
            .iter()
            .enumerate()
            .map(|(i, expression)| {
                json!({
                    "id": format!("cron{}", i),
                    "type": "cronTrigger",
                    "data": { "params": { "cronExpression": expression } }
                })
            })
            .collect();
        serde_json::from_value(json!({
            "id": id, "name": id, "active": active, "nodes": nodes
        }))
        .unwrap()
    }

    async fn rescheduler() -> (CronRescheduler, tempfile::TempDir) {
        let (store, dir) = test_store().await;
        let engine = ExecutionEngine::new(
            store,
            NodeRegistry::builtin(ScriptRunner::new("flowlite-sandbox")),
        );
        (CronRescheduler::new(engine).await.unwrap(), dir)
    }

    #[test]
    fn five_field_expressions_gain_seconds() {
        assert_eq!(to_scheduler_expression("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(to_scheduler_expression("30 0 9 * * Mon"), "30 0 9 * * Mon");
    }

    #[test]
    fn numeric_weekdays_become_names() {
        assert_eq!(to_scheduler_expression("0 9 * * 0"), "0 0 9 * * SUN");
        assert_eq!(to_scheduler_expression("0 9 * * 7"), "0 0 9 * * SUN");
        assert_eq!(to_scheduler_expression("0 9 * * 1-5"), "0 0 9 * * MON,TUE,WED,THU,FRI");
        assert_eq!(to_scheduler_expression("0 9 * * 6,0"), "0 0 9 * * SUN,SAT");
        assert_eq!(to_scheduler_expression("0 9 * * */2"), "0 0 9 * * SUN,TUE,THU,SAT");
        assert_eq!(to_scheduler_expression("0 9 * * 5-7"), "0 0 9 * * SUN,FRI,SAT");
        assert_eq!(to_scheduler_expression("0 9 * * Mon-Fri"), "0 0 9 * * Mon-Fri");
    }

    async fn next_weekday(expression: &str) -> Weekday {
        let mut scheduler = JobScheduler::new().await.unwrap();
        let job = Job::new_async(to_scheduler_expression(expression).as_str(), |_uuid, _l| {
            Box::pin(async {})
        })
        .unwrap();
        let job_id = scheduler.add(job).await.unwrap();
        scheduler
            .next_tick_for_job(job_id)
            .await
            .unwrap()
            .unwrap()
            .weekday()
    }

    #[tokio::test]
    async fn weekday_fields_fire_on_the_right_days() {
        assert_eq!(next_weekday("0 9 * * 0").await, Weekday::Sun);
        assert_eq!(next_weekday("0 9 * * 6").await, Weekday::Sat);
        assert_eq!(next_weekday("0 9 * * 3").await, Weekday::Wed);

        let weekday = next_weekday("0 9 * * 1-5").await;
        assert!(
            !matches!(weekday, Weekday::Sat | Weekday::Sun),
            "1-5 fired on {weekday:?}"
        );
    }

    #[tokio::test]
    async fn reschedule_is_idempotent() {
        let (rescheduler, _dir) = rescheduler().await;
        let workflows = vec![
            cron_workflow("wf-a", true, &["*/5 * * * *", "0 9 * * *"]),
            cron_workflow("wf-b", true, &["0 0 * * *"]),
        ];

        rescheduler.reschedule(&workflows).await.unwrap();
        let first = rescheduler.job_keys().await;
        rescheduler.reschedule(&workflows).await.unwrap();
        let second = rescheduler.job_keys().await;

        assert_eq!(first, vec!["wf-a:cron0", "wf-a:cron1", "wf-b:cron0"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn inactive_workflows_are_not_scheduled() {
        let (rescheduler, _dir) = rescheduler().await;
        rescheduler
            .reschedule(&[cron_workflow("wf-a", true, &["*/5 * * * *"])])
            .await
            .unwrap();
        rescheduler
            .reschedule(&[cron_workflow("wf-a", false, &["*/5 * * * *"])])
            .await
            .unwrap();
        assert!(rescheduler.job_keys().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_expressions_are_skipped() {
        let (rescheduler, _dir) = rescheduler().await;
        rescheduler
            .reschedule(&[cron_workflow("wf-a", true, &["not a cron", "*/5 * * * *", ""])])
            .await
            .unwrap();
        assert_eq!(rescheduler.job_keys().await, vec!["wf-a:cron1"]);
    }

    #[tokio::test]
    async fn start_loads_stored_workflows() {
        let (rescheduler, _dir) = rescheduler().await;
        let workflow = cron_workflow("wf-stored", true, &["0 3 * * *"]);
        rescheduler.engine.store().save_workflow(&workflow).await.unwrap();

        rescheduler.start().await.unwrap();
        assert_eq!(rescheduler.job_keys().await, vec!["wf-stored:cron0"]);
        rescheduler.stop().await.unwrap();
        assert!(rescheduler.job_keys().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_rows_do_not_block_rescheduling() {
        let (rescheduler, _dir) = rescheduler().await;
        let store = rescheduler.engine.store();
        store
            .save_workflow(&cron_workflow("wf-good", true, &["0 3 * * *"]))
            .await
            .unwrap();
        insert_corrupt_workflow(store, "wf-bad").await;

        rescheduler.reschedule_from_store().await.unwrap();
        assert_eq!(rescheduler.job_keys().await, vec!["wf-good:cron0"]);
    }
}
