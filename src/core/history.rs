//! 编排历史：只追加的事件日志
//!
//! 宿主为每个实例的当前执行保存一份事件序列，每次重放时整体传给编排器。
//! 同一任务若重复收到结果（如确认丢失后的重投），以最先写入的为准。
//! 外部事件按名称排队，第 k 次等待消费该名称的第 k 个事件；与定时器竞争时以历史中先出现者为准。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::ActivityFailure;
use crate::core::orchestrator::OrchestrationInput;
use crate::core::task_scheduler::{ActivityOutput, ActivityTask, TaskId};

/// 历史事件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    OrchestrationStarted {
        execution_id: u64,
        input: OrchestrationInput,
    },
    ActivityScheduled {
        task: ActivityTask,
    },
    ActivityCompleted {
        id: TaskId,
        output: ActivityOutput,
    },
    ActivityFailed {
        id: TaskId,
        error: ActivityFailure,
    },
    /// 持久定时器；到期时间由宿主在首次记录时确定，重放时不再读取时钟
    TimerCreated {
        id: TaskId,
        fire_at: DateTime<Utc>,
    },
    TimerFired {
        id: TaskId,
    },
    /// 外部发给实例的事件
    EventRaised {
        name: String,
        payload: serde_json::Value,
    },
    TerminateRequested {
        reason: String,
    },
}

/// 已记录的任务结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RecordedResult<'a> {
    Completed(&'a ActivityOutput),
    Failed(&'a ActivityFailure),
}

/// 外部事件与超时定时器的竞争结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EventRace<'a> {
    Pending,
    Received(&'a serde_json::Value),
    TimedOut,
}

/// 按 TaskId 索引的历史视图，供重放查询
#[derive(Debug, Default)]
pub struct HistoryIndex<'a> {
    scheduled: HashMap<TaskId, &'a ActivityTask>,
    results: HashMap<TaskId, RecordedResult<'a>>,
    timers: HashMap<TaskId, DateTime<Utc>>,
    /// 定时器触发事件在历史中的位置
    fired: HashMap<TaskId, usize>,
    /// 事件名 -> (历史位置, 负载)，按到达顺序
    events: HashMap<&'a str, Vec<(usize, &'a serde_json::Value)>>,
}

impl<'a> HistoryIndex<'a> {
    pub fn build(history: &'a [HistoryEvent]) -> Self {
        let mut index = Self::default();
        for (position, event) in history.iter().enumerate() {
            match event {
                HistoryEvent::ActivityScheduled { task } => {
                    index.scheduled.entry(task.id).or_insert(task);
                }
                HistoryEvent::ActivityCompleted { id, output } => {
                    index
                        .results
                        .entry(*id)
                        .or_insert(RecordedResult::Completed(output));
                }
                HistoryEvent::ActivityFailed { id, error } => {
                    index
                        .results
                        .entry(*id)
                        .or_insert(RecordedResult::Failed(error));
                }
                HistoryEvent::TimerCreated { id, fire_at } => {
                    index.timers.entry(*id).or_insert(*fire_at);
                }
                HistoryEvent::TimerFired { id } => {
                    index.fired.entry(*id).or_insert(position);
                }
                HistoryEvent::EventRaised { name, payload } => {
                    index
                        .events
                        .entry(name.as_str())
                        .or_default()
                        .push((position, payload));
                }
                HistoryEvent::OrchestrationStarted { .. } | HistoryEvent::TerminateRequested { .. } => {}
            }
        }
        index
    }

    pub fn scheduled(&self, id: TaskId) -> Option<&'a ActivityTask> {
        self.scheduled.get(&id).copied()
    }

    pub fn result(&self, id: TaskId) -> Option<RecordedResult<'a>> {
        self.results.get(&id).copied()
    }

    pub fn timer(&self, id: TaskId) -> Option<DateTime<Utc>> {
        self.timers.get(&id).copied()
    }

    /// 第 `round` 次等待事件 `name`（从 0 计），与定时器 `timer` 竞争
    pub fn race(&self, name: &str, round: usize, timer: TaskId) -> EventRace<'a> {
        let event = self.events.get(name).and_then(|events| events.get(round)).copied();
        let fired = self.fired.get(&timer).copied();
        match (event, fired) {
            (Some((at, payload)), Some(fired_at)) if at < fired_at => EventRace::Received(payload),
            (Some(_), Some(_)) | (None, Some(_)) => EventRace::TimedOut,
            (Some((_, payload)), None) => EventRace::Received(payload),
            (None, None) => EventRace::Pending,
        }
    }
}

/// 历史中最后一次启动事件携带的输入
pub fn started_input(history: &[HistoryEvent]) -> Option<(u64, &OrchestrationInput)> {
    history.iter().rev().find_map(|event| match event {
        HistoryEvent::OrchestrationStarted {
            execution_id,
            input,
        } => Some((*execution_id, input)),
        _ => None,
    })
}
