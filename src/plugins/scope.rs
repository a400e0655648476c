// 插件并发作用域
// 作为插件后台任务的取消/生命期边界

use std::future::Future;
use std::time::Duration;

use pluginix_common::PluginId;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::errors::PluginHostError;

/// 插件并发作用域
///
/// 插件在启用期间通过它提交后台任务. 作用域只是取消/生命期边界,
/// 不保证任务与任何特定工作线程的亲和性. 禁用插件会取消令牌并在
/// 宽限期内等待所有任务结束.
pub struct PluginScope {
    plugin_id: PluginId,
    grace: Duration,
    inner: Mutex<ScopeInner>,
}

struct ScopeInner {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ScopeInner {
    fn fresh() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }
}

impl PluginScope {
    /// 创建新的作用域
    pub fn new(plugin_id: impl Into<PluginId>, grace: Duration) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            grace,
            inner: Mutex::new(ScopeInner::fresh()),
        }
    }

    /// 插件 ID
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// 在作用域内启动后台任务
    ///
    /// 任务被包装为在取消令牌触发时停止; 协作式任务也可以通过
    /// [`cancellation_token`](Self::cancellation_token) 自行观察令牌.
    pub async fn spawn<F>(&self, future: F) -> Result<(), PluginHostError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = self.inner.lock().await;

        if inner.token.is_cancelled() {
            return Err(PluginHostError::validation(
                "scope",
                format!("插件作用域已取消: {}", self.plugin_id),
            ));
        }

        let token = inner.token.clone();
        inner.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = future => {}
            }
        });

        Ok(())
    }

    /// 获取当前的取消令牌
    pub async fn cancellation_token(&self) -> CancellationToken {
        self.inner.lock().await.token.clone()
    }

    /// 作用域是否已被取消
    pub async fn is_cancelled(&self) -> bool {
        self.inner.lock().await.token.is_cancelled()
    }

    /// 当前未结束的任务数
    pub async fn task_count(&self) -> usize {
        self.inner.lock().await.tracker.len()
    }

    /// 复用或重建作用域
    ///
    /// 取消过的令牌无法复位, 重新启用插件时需要一个新的边界.
    pub async fn renew(&self) {
        let mut inner = self.inner.lock().await;
        if inner.token.is_cancelled() {
            debug!(plugin_id = %self.plugin_id, "重建插件作用域");
            *inner = ScopeInner::fresh();
        }
    }

    /// 取消作用域并等待所有任务结束
    ///
    /// 返回是否在宽限期内完全排空. 超过宽限期的任务被记录为异常,
    /// 但不会无限阻塞禁用流程.
    pub async fn cancel_and_drain(&self) -> bool {
        let (token, tracker) = {
            let inner = self.inner.lock().await;
            (inner.token.clone(), inner.tracker.clone())
        };

        token.cancel();
        tracker.close();

        match tokio::time::timeout(self.grace, tracker.wait()).await {
            Ok(()) => {
                debug!(plugin_id = %self.plugin_id, "插件作用域已排空");
                true
            }
            Err(_) => {
                warn!(
                    plugin_id = %self.plugin_id,
                    remaining = tracker.len(),
                    grace_ms = self.grace.as_millis() as u64,
                    "插件任务未在宽限期内结束"
                );
                false
            }
        }
    }
}
