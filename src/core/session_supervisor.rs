//! 实例监管：每个实例一个取消令牌与一个唤醒信号
//!
//! 终止实例时取消其令牌，驱动任务随即停止调度并丢弃在途活动的结果；
//! 关闭宿主时取消根令牌，所有实例令牌随之取消。
//! 外部事件写入历史后通过唤醒信号通知驱动任务重放。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

/// 驱动任务持有的实例句柄
#[derive(Clone, Debug)]
pub struct InstanceHandle {
    pub token: CancellationToken,
    /// 历史中出现外部写入（如事件）时触发
    pub wake: Arc<Notify>,
}

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    /// 宿主关闭时触发
    root: CancellationToken,
    instances: RwLock<HashMap<String, InstanceHandle>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为实例创建句柄（同一实例重复注册返回同一句柄）
    pub async fn register(&self, instance_id: &str) -> InstanceHandle {
        let mut instances = self.instances.write().await;
        instances
            .entry(instance_id.to_string())
            .or_insert_with(|| InstanceHandle {
                token: self.root.child_token(),
                wake: Arc::new(Notify::new()),
            })
            .clone()
    }

    /// 取消实例；返回该实例是否仍在监管中
    pub async fn cancel(&self, instance_id: &str) -> bool {
        match self.instances.read().await.get(instance_id) {
            Some(handle) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// 唤醒实例的驱动任务；驱动尚未等待时信号会保留到下一次等待
    pub async fn wake(&self, instance_id: &str) -> bool {
        match self.instances.read().await.get(instance_id) {
            Some(handle) => {
                handle.wake.notify_one();
                true
            }
            None => false,
        }
    }

    /// 实例结束后移除令牌
    pub async fn release(&self, instance_id: &str) {
        self.instances.write().await.remove(instance_id);
    }

    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_single_instance() {
        let supervisor = SessionSupervisor::new();
        let a = supervisor.register("a").await;
        let b = supervisor.register("b").await;
        assert!(supervisor.cancel("a").await);
        assert!(a.token.is_cancelled());
        assert!(!b.token.is_cancelled());
        assert!(!supervisor.cancel("missing").await);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_all() {
        let supervisor = SessionSupervisor::new();
        let a = supervisor.register("a").await;
        supervisor.shutdown();
        assert!(a.token.is_cancelled());
        assert!(supervisor.is_shutdown());
        supervisor.release("a").await;
        assert!(!supervisor.cancel("a").await);
    }

    #[tokio::test]
    async fn test_wake_is_not_lost_before_waiting() {
        let supervisor = SessionSupervisor::new();
        let handle = supervisor.register("a").await;
        assert!(supervisor.wake("a").await);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle.wake.notified())
            .await
            .unwrap();
        assert!(!supervisor.wake("missing").await);
    }
}
