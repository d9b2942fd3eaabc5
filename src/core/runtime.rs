//! 进程内宿主：实例存储、重放驱动与活动分派
//!
//! 每个实例一个驱动任务（tokio::spawn）：重放编排器 -> 记录新调度的任务 -> 交给 ActivityWorker 并发执行
//! -> 每收到一个结果就追加到历史并再次重放，直到进入终态。
//! 结果按到达顺序写入历史，编排器按调度顺序消费。实例之间除存储外不共享可变状态。
//! 持久定时器与活动一样在驱动任务中等待，到期后写入 TimerFired；外部事件写入历史后唤醒驱动任务。
//!
//! 存储在内存中，宿主重启后实例不会恢复。

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::RwLock;
use tokio::task::{AbortHandle, JoinSet};

use crate::activities::ActivityWorker;
use crate::core::error::{
    ActivityFailure, FailureReason, HostError, OrchestrationFailure,
};
use crate::core::history::{started_input, HistoryEvent, HistoryIndex};
use crate::core::orchestrator::{replay, Decision, OrchestrationInput, OrchestratorOptions};
use crate::core::session_supervisor::{InstanceHandle, SessionSupervisor};
use crate::core::state::{OrchestrationInstance, RuntimeStatus};
use crate::core::task_scheduler::{ActivityOutput, ActivityTask, TaskId};

/// 一个实例及其当前执行的历史
#[derive(Clone, Debug)]
pub struct InstanceRecord {
    pub instance: OrchestrationInstance,
    pub history: Vec<HistoryEvent>,
}

/// 内存实例存储；进入终态的实例拒绝任何修改
#[derive(Debug, Default)]
pub struct InstanceStore {
    records: RwLock<HashMap<String, InstanceRecord>>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, instance: OrchestrationInstance, history: Vec<HistoryEvent>) {
        let id = instance.instance_id.clone();
        self.records
            .write()
            .await
            .insert(id, InstanceRecord { instance, history });
    }

    pub async fn get(&self, instance_id: &str) -> Option<OrchestrationInstance> {
        self.records
            .read()
            .await
            .get(instance_id)
            .map(|r| r.instance.clone())
    }

    pub async fn history(&self, instance_id: &str) -> Option<Vec<HistoryEvent>> {
        self.records
            .read()
            .await
            .get(instance_id)
            .map(|r| r.history.clone())
    }

    /// 在实例仍在运行时修改记录；实例不存在或已终态时返回 false
    pub async fn update<F>(&self, instance_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut InstanceRecord),
    {
        let mut records = self.records.write().await;
        match records.get_mut(instance_id) {
            Some(record) if !record.instance.is_terminal() => {
                f(record);
                record.instance.last_updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// 删除保留期已过的终态实例，返回删除数量
    pub async fn purge_expired(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !(r.instance.is_terminal() && r.instance.last_updated_at < cutoff));
        before - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// 驱动任务中等待的一项完成
enum Completion {
    Activity(TaskId, Result<ActivityOutput, ActivityFailure>),
    Timer(TaskId),
}

/// 定时器到期时间；超出可表示范围时取最大值
fn fire_at(delay: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// 宿主运行时
pub struct DurableRuntime {
    store: Arc<InstanceStore>,
    worker: ActivityWorker,
    options: OrchestratorOptions,
    supervisor: SessionSupervisor,
}

impl DurableRuntime {
    pub fn new(worker: ActivityWorker, options: OrchestratorOptions) -> Self {
        Self {
            store: Arc::new(InstanceStore::new()),
            worker,
            options,
            supervisor: SessionSupervisor::new(),
        }
    }

    pub fn store(&self) -> &Arc<InstanceStore> {
        &self.store
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// 创建实例（状态 Running，立即可查询）并启动驱动任务
    pub async fn create_instance(self: &Arc<Self>, input: OrchestrationInput) -> String {
        let instance_id = uuid::Uuid::new_v4().simple().to_string();
        let instance = OrchestrationInstance::new(instance_id.clone(), input.clone());
        let history = vec![HistoryEvent::OrchestrationStarted {
            execution_id: instance.execution_id,
            input,
        }];
        self.store.insert(instance, history).await;
        let handle = self.supervisor.register(&instance_id).await;
        tracing::info!(instance = %instance_id, "orchestration started");

        let runtime = Arc::clone(self);
        let id = instance_id.clone();
        tokio::spawn(async move {
            runtime.drive(&id, handle).await;
            runtime.supervisor.release(&id).await;
        });
        instance_id
    }

    /// 终止实例：立即标记 Terminated 并取消驱动；已终态时不做修改
    pub async fn terminate(
        &self,
        instance_id: &str,
        reason: &str,
    ) -> Result<OrchestrationInstance, HostError> {
        let terminated = self
            .store
            .update(instance_id, |record| {
                record.history.push(HistoryEvent::TerminateRequested {
                    reason: reason.to_string(),
                });
                record.instance.runtime_status = RuntimeStatus::Terminated;
                record.instance.failure = Some(OrchestrationFailure::Terminated {
                    reason: reason.to_string(),
                });
            })
            .await;
        if terminated {
            self.supervisor.cancel(instance_id).await;
            tracing::info!(instance = %instance_id, reason = %reason, "orchestration terminated");
        }
        self.store
            .get(instance_id)
            .await
            .ok_or_else(|| HostError::InstanceNotFound(instance_id.to_string()))
    }

    /// 向运行中的实例发送外部事件；事件按到达顺序写入历史
    pub async fn raise_event(
        &self,
        instance_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), HostError> {
        let recorded = self
            .store
            .update(instance_id, |record| {
                record.history.push(HistoryEvent::EventRaised {
                    name: name.to_string(),
                    payload,
                });
            })
            .await;
        if !recorded {
            return Err(match self.store.get(instance_id).await {
                Some(_) => HostError::InstanceNotRunning(instance_id.to_string()),
                None => HostError::InstanceNotFound(instance_id.to_string()),
            });
        }
        tracing::info!(instance = %instance_id, event = %name, "external event raised");
        self.supervisor.wake(instance_id).await;
        Ok(())
    }

    /// 关闭宿主：取消所有驱动任务
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    fn spawn_activity(&self, in_flight: &mut JoinSet<Completion>, task: ActivityTask) {
        let worker = self.worker.clone();
        in_flight.spawn(async move {
            let result = AssertUnwindSafe(worker.execute(&task))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(ActivityFailure {
                        reason: FailureReason::Fatal,
                        message: format!("activity {} panicked", task.label()),
                        attempts: 1,
                    })
                });
            Completion::Activity(task.id, result)
        });
    }

    fn spawn_timer(
        in_flight: &mut JoinSet<Completion>,
        id: TaskId,
        fire_at: DateTime<Utc>,
    ) -> AbortHandle {
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        in_flight.spawn(async move {
            tokio::time::sleep(delay).await;
            Completion::Timer(id)
        })
    }

    /// 把终态写入实例；实例已终态（如已被终止）时忽略
    async fn finish(
        &self,
        instance_id: &str,
        status: RuntimeStatus,
        output: Option<String>,
        failure: Option<OrchestrationFailure>,
    ) {
        let applied = self
            .store
            .update(instance_id, |record| {
                record.instance.runtime_status = status;
                record.instance.output = output;
                record.instance.failure = failure;
            })
            .await;
        if applied {
            tracing::info!(instance = %instance_id, status = ?status, "orchestration finished");
        }
    }

    async fn drive(&self, instance_id: &str, handle: InstanceHandle) {
        let InstanceHandle { token, wake } = handle;
        let mut in_flight = JoinSet::new();
        let mut dispatched: HashSet<TaskId> = HashSet::new();
        let mut timers: HashMap<TaskId, AbortHandle> = HashMap::new();

        loop {
            let Some(history) = self.store.history(instance_id).await else {
                break;
            };
            let Some((execution_id, input)) = started_input(&history) else {
                tracing::error!(instance = %instance_id, "history has no start event");
                break;
            };
            let input = input.clone();

            let decision = match replay(&input, &history, &self.options) {
                Ok(decision) => decision,
                Err(err) => {
                    tracing::error!(instance = %instance_id, error = %err, "replay failed");
                    Decision::Fail {
                        failure: err.into(),
                    }
                }
            };

            match decision {
                Decision::Suspend {
                    state,
                    new_tasks,
                    new_timers,
                    awaiting,
                    custom_status,
                } => {
                    let recorded = self
                        .store
                        .update(instance_id, |record| {
                            record.history.extend(
                                new_tasks
                                    .into_iter()
                                    .map(|task| HistoryEvent::ActivityScheduled { task }),
                            );
                            record.history.extend(new_timers.into_iter().map(|timer| {
                                HistoryEvent::TimerCreated {
                                    id: timer.id,
                                    fire_at: fire_at(timer.delay),
                                }
                            }));
                            record.instance.custom_status =
                                Some(serde_json::Value::String(custom_status.clone()));
                        })
                        .await;
                    if !recorded {
                        break;
                    }
                    tracing::debug!(
                        instance = %instance_id,
                        execution = execution_id,
                        state = ?state,
                        status = %custom_status,
                        "orchestration suspended"
                    );

                    // 等待中的任务或定时器若尚未分派（如新调度），在此分派
                    let history = self.store.history(instance_id).await.unwrap_or_default();
                    let index = HistoryIndex::build(&history);
                    for &id in &awaiting {
                        if !dispatched.insert(id) {
                            continue;
                        }
                        if let Some(task) = index.scheduled(id) {
                            self.spawn_activity(&mut in_flight, task.clone());
                        } else if let Some(at) = index.timer(id) {
                            timers.insert(id, Self::spawn_timer(&mut in_flight, id, at));
                        }
                    }
                    // 竞争已有结论的定时器不再等待
                    timers.retain(|id, timer| {
                        let keep = awaiting.contains(id);
                        if !keep {
                            timer.abort();
                        }
                        keep
                    });

                    tokio::select! {
                        _ = token.cancelled() => {
                            tracing::info!(instance = %instance_id, "driver cancelled, discarding in-flight activities");
                            break;
                        }
                        _ = wake.notified() => {}
                        joined = in_flight.join_next() => match joined {
                            Some(Ok(completion)) => {
                                let event = match completion {
                                    Completion::Activity(id, Ok(output)) => {
                                        HistoryEvent::ActivityCompleted { id, output }
                                    }
                                    Completion::Activity(id, Err(error)) => {
                                        HistoryEvent::ActivityFailed { id, error }
                                    }
                                    Completion::Timer(id) => {
                                        timers.remove(&id);
                                        HistoryEvent::TimerFired { id }
                                    }
                                };
                                if !self.store.update(instance_id, |r| r.history.push(event)).await {
                                    break;
                                }
                            }
                            Some(Err(err)) if err.is_cancelled() => {}
                            Some(Err(err)) => {
                                tracing::error!(instance = %instance_id, error = %err, "activity task aborted");
                            }
                            None => {
                                tracing::error!(instance = %instance_id, "suspended with nothing in flight");
                                self.finish(
                                    instance_id,
                                    RuntimeStatus::Failed,
                                    None,
                                    Some(OrchestrationFailure::Nondeterminism {
                                        detail: "orchestration suspended without pending activities".to_string(),
                                    }),
                                )
                                .await;
                                break;
                            }
                        }
                    }
                }
                Decision::Complete { output, .. } => {
                    self.finish(instance_id, RuntimeStatus::Completed, Some(output), None)
                        .await;
                    break;
                }
                Decision::Fail { failure } => {
                    let status = match failure {
                        OrchestrationFailure::Terminated { .. } => RuntimeStatus::Terminated,
                        _ => RuntimeStatus::Failed,
                    };
                    tracing::warn!(instance = %instance_id, failure = %failure, "orchestration failed");
                    self.finish(instance_id, status, None, Some(failure)).await;
                    break;
                }
                Decision::ContinueAsNew { input } => {
                    let next_execution = execution_id + 1;
                    let restarted = self
                        .store
                        .update(instance_id, |record| {
                            record.instance.execution_id = next_execution;
                            record.history = vec![HistoryEvent::OrchestrationStarted {
                                execution_id: next_execution,
                                input,
                            }];
                        })
                        .await;
                    if !restarted {
                        break;
                    }
                    in_flight.abort_all();
                    dispatched.clear();
                    timers.clear();
                    tracing::info!(instance = %instance_id, execution = next_execution, "continued as new");
                }
            }
        }

        // FailFast 或终止后，在途活动的结果一律丢弃
        in_flight.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RetryPolicy;

    #[tokio::test]
    async fn test_store_rejects_updates_to_terminal_instances() {
        let store = InstanceStore::new();
        let mut instance = OrchestrationInstance::new("a", OrchestrationInput::new("hi"));
        instance.runtime_status = RuntimeStatus::Completed;
        store.insert(instance, Vec::new()).await;
        let changed = store
            .update("a", |r| r.instance.output = Some("late".to_string()))
            .await;
        assert!(!changed);
        assert_eq!(store.get("a").await.unwrap().output, None);
        assert!(!store.update("missing", |_| {}).await);
    }

    #[tokio::test]
    async fn test_purge_only_removes_expired_terminal_instances() {
        let store = InstanceStore::new();
        let mut done = OrchestrationInstance::new("done", OrchestrationInput::new("hi"));
        done.runtime_status = RuntimeStatus::Completed;
        done.last_updated_at = Utc::now() - chrono::Duration::seconds(120);
        store.insert(done, Vec::new()).await;
        let mut running = OrchestrationInstance::new("running", OrchestrationInput::new("hi"));
        running.last_updated_at = Utc::now() - chrono::Duration::seconds(120);
        store.insert(running, Vec::new()).await;

        assert_eq!(store.purge_expired(Duration::from_secs(60)).await, 1);
        assert!(store.get("done").await.is_none());
        assert!(store.get("running").await.is_some());
    }

    #[test]
    fn test_default_options_use_default_retry() {
        let options = OrchestratorOptions::default();
        assert_eq!(options.model_retry, RetryPolicy::default());
    }
}
