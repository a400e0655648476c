// 插件持久化存储
// 实现按 (插件, 数据类型) 键控的自动保存存储槽

use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pluginix_common::{PluginId, StorageKey};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, warn};

use crate::errors::PluginHostError;

/// 可持久化的插件数据
///
/// `storage_key` 是数据类型的显式身份标签, 决定磁盘文件名,
/// 必须在插件内部唯一且在进程重启之间保持稳定.
pub trait PluginData: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// 存储键
    fn storage_key() -> &'static str;
}

/// 插件持久化存储
///
/// 每个 (插件, 存储键) 对至多存在一个活跃存储槽; 重复加载返回共享
/// 同一槽的句柄. 变更被按槽合并: 合并窗口内的多次变更只产生一次
/// 磁盘写入. 磁盘布局为 `<root>/<插件 ID>/<存储键>.json`.
pub struct PluginStorage {
    root: PathBuf,
    flush_delay: Duration,
    slots: RwLock<HashMap<(PluginId, StorageKey), Arc<dyn AnySlot>>>,
}

impl PluginStorage {
    /// 创建新的持久化存储
    pub fn new(root: impl Into<PathBuf>, flush_delay: Duration) -> Self {
        Self {
            root: root.into(),
            flush_delay,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// 存储根目录
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 读取一个持久化数据实例
    ///
    /// 首次调用时从磁盘反序列化已有数据, 不存在时构造默认值;
    /// 数据损坏时记录反序列化错误并回退到默认值, 插件可以继续运行.
    pub async fn load<T: PluginData>(
        &self,
        plugin_id: &str,
    ) -> Result<DataHandle<T>, PluginHostError> {
        let key = T::storage_key();
        let map_key = (plugin_id.to_string(), key.to_string());

        if let Some(slot) = self.slots.read().await.get(&map_key) {
            return Self::downcast::<T>(slot.clone());
        }

        let mut slots = self.slots.write().await;

        // 双重检查: 并发的首次加载只能有一个胜出
        if let Some(slot) = slots.get(&map_key) {
            return Self::downcast::<T>(slot.clone());
        }

        let path = self.root.join(plugin_id).join(format!("{}.json", key));
        let value = Self::read_initial::<T>(plugin_id, key, &path).await?;

        let slot = Arc::new(SlotInner::<T>::new(plugin_id, key, path, value));
        slots.insert(map_key, slot.clone());
        drop(slots);

        spawn_flusher(slot.clone(), self.flush_delay);

        debug!(plugin_id, key, "存储槽已创建");
        Ok(DataHandle { inner: slot })
    }

    /// 同步刷写并释放一个插件的全部存储槽
    ///
    /// 卸载路径调用: 最终保存是阻塞式的, 保证正常关闭不丢数据.
    /// 返回第一个保存错误（若有）, 其余槽仍会尽力保存.
    pub async fn flush_and_release(&self, plugin_id: &str) -> Result<(), PluginHostError> {
        let removed: Vec<Arc<dyn AnySlot>> = {
            let mut slots = self.slots.write().await;
            let keys: Vec<_> = slots
                .keys()
                .filter(|(pid, _)| pid == plugin_id)
                .cloned()
                .collect();
            keys.into_iter().filter_map(|k| slots.remove(&k)).collect()
        };

        let mut first_error = None;
        for slot in removed {
            slot.close();
            // 从未变更的槽不留下默认值文件
            if !slot.is_dirty() {
                continue;
            }
            if let Err(e) = slot.flush().await {
                error!(plugin_id, error = %e, "卸载时保存存储槽失败");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 刷写所有脏槽（宿主关闭路径）
    pub async fn flush_all(&self) -> Result<(), PluginHostError> {
        let slots: Vec<Arc<dyn AnySlot>> = self.slots.read().await.values().cloned().collect();

        let dirty: Vec<_> = slots.into_iter().filter(|s| s.is_dirty()).collect();
        let results = futures::future::join_all(dirty.iter().map(|s| s.flush())).await;

        for result in results {
            if let Err(e) = result {
                error!(error = %e, "刷写存储槽失败");
                return Err(e);
            }
        }

        Ok(())
    }

    /// 当前活跃的存储槽数量
    pub async fn slot_count(&self) -> usize {
        self.slots.read().await.len()
    }

    fn downcast<T: PluginData>(slot: Arc<dyn AnySlot>) -> Result<DataHandle<T>, PluginHostError> {
        slot.as_any()
            .downcast::<SlotInner<T>>()
            .map(|inner| DataHandle { inner })
            .map_err(|_| PluginHostError::internal("存储键与数据类型不匹配"))
    }

    async fn read_initial<T: PluginData>(
        plugin_id: &str,
        key: &str,
        path: &Path,
    ) -> Result<T, PluginHostError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Ok(value),
                Err(e) => {
                    // 损坏的数据降级为默认值, 错误只记录不致命
                    let error = PluginHostError::deserialization(plugin_id, key, e.to_string());
                    warn!(plugin_id, key, error = %error, "持久化数据损坏, 回退到默认值");
                    Ok(T::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(PluginHostError::io(format!("读取持久化数据失败: {}", e))),
        }
    }
}

/// 类型化存储槽句柄
///
/// 同一 (插件, 存储键) 的所有句柄共享同一个存储槽,
/// 可以用 [`ptr_eq`](Self::ptr_eq) 验证.
pub struct DataHandle<T: PluginData> {
    inner: Arc<SlotInner<T>>,
}

impl<T: PluginData> Clone for DataHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: PluginData> DataHandle<T> {
    /// 所属插件 ID
    pub fn plugin_id(&self) -> &str {
        &self.inner.plugin_id
    }

    /// 存储键
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// 两个句柄是否指向同一个存储槽
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// 读取当前值
    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.value.read().await;
        f(&guard)
    }

    /// 获取当前值的副本
    pub async fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.read().await.clone()
    }

    /// 变更当前值并标记存储槽为脏
    ///
    /// 实际写入由每槽的合并刷写任务完成, 变更方从不等待磁盘 IO.
    /// 槽释放后的变更被拒绝.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, PluginHostError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PluginHostError::inactive_plugin(&self.inner.plugin_id));
        }

        let result = {
            let mut guard = self.inner.value.write().await;
            f(&mut guard)
        };

        self.inner.mark_dirty();
        Ok(result)
    }

    /// 立即刷写当前值到磁盘
    pub async fn flush_now(&self) -> Result<(), PluginHostError> {
        self.inner.flush().await
    }
}

/// 类型擦除的存储槽视图, 供槽表和刷写路径使用
#[async_trait]
trait AnySlot: Send + Sync {
    async fn flush(&self) -> Result<(), PluginHostError>;
    fn close(&self);
    fn is_closed(&self) -> bool;
    fn is_dirty(&self) -> bool;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct SlotInner<T> {
    plugin_id: PluginId,
    key: StorageKey,
    path: PathBuf,
    value: RwLock<T>,
    dirty: AtomicBool,
    closed: AtomicBool,
    changed: Notify,
}

impl<T: PluginData> SlotInner<T> {
    fn new(plugin_id: &str, key: &str, path: PathBuf, value: T) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            key: key.to_string(),
            path,
            value: RwLock::new(value),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            changed: Notify::new(),
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.changed.notify_one();
    }
}

#[async_trait]
impl<T: PluginData> AnySlot for SlotInner<T> {
    /// 写出当前值的快照
    ///
    /// 快照在短读锁下序列化, 磁盘写入在锁外进行, 不阻塞变更方.
    /// 失败时恢复脏标记, 内存中的值永远不会被丢弃.
    async fn flush(&self) -> Result<(), PluginHostError> {
        self.dirty.store(false, Ordering::Release);

        let result: Result<(), PluginHostError> = async {
            let bytes = {
                let value = self.value.read().await;
                serde_json::to_vec_pretty(&*value).map_err(|e| {
                    PluginHostError::storage_io(
                        &self.plugin_id,
                        &self.key,
                        format!("序列化失败: {}", e),
                    )
                })?
            };

            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    PluginHostError::storage_io(
                        &self.plugin_id,
                        &self.key,
                        format!("创建存储目录失败: {}", e),
                    )
                })?;
            }

            tokio::fs::write(&self.path, bytes).await.map_err(|e| {
                PluginHostError::storage_io(&self.plugin_id, &self.key, format!("写入失败: {}", e))
            })?;

            Ok(())
        }
        .await;

        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }

        result
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.changed.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// 启动每槽的合并刷写任务
///
/// 第一个脏信号后等待一个合并窗口再写出快照, 窗口内的后续变更被
/// 合并为一次写入. 写入失败时保留脏标记并在下个窗口重试.
fn spawn_flusher<T: PluginData>(slot: Arc<SlotInner<T>>, delay: Duration) {
    tokio::spawn(async move {
        loop {
            slot.changed.notified().await;
            if slot.is_closed() {
                break;
            }

            // 合并窗口
            tokio::time::sleep(delay).await;
            if slot.is_closed() {
                // 最终保存由卸载路径负责
                break;
            }

            if !slot.is_dirty() {
                continue;
            }

            if let Err(e) = slot.flush().await {
                warn!(
                    plugin_id = %slot.plugin_id,
                    key = %slot.key,
                    error = %e,
                    "自动保存失败, 将在下个窗口重试"
                );
                slot.changed.notify_one();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Settings {
        debug: bool,
        greeting: String,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                debug: false,
                greeting: "hello".to_string(),
            }
        }
    }

    impl PluginData for Settings {
        fn storage_key() -> &'static str {
            "settings"
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct Counters {
        total: u64,
    }

    impl PluginData for Counters {
        fn storage_key() -> &'static str {
            "counters"
        }
    }

    fn storage(dir: &TempDir, delay_ms: u64) -> PluginStorage {
        PluginStorage::new(dir.path(), Duration::from_millis(delay_ms))
    }

    #[tokio::test]
    async fn test_load_returns_default_when_missing() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 50);

        let handle = storage.load::<Settings>("p1").await.unwrap();
        assert_eq!(handle.get().await, Settings::default());
    }

    #[tokio::test]
    async fn test_repeated_load_shares_slot() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 50);

        let first = storage.load::<Settings>("p1").await.unwrap();
        let second = storage.load::<Settings>("p1").await.unwrap();
        assert!(DataHandle::ptr_eq(&first, &second));

        // 变更通过任意一个句柄都可见
        first.update(|s| s.debug = true).await.unwrap();
        assert!(second.read(|s| s.debug).await);

        assert_eq!(storage.slot_count().await, 1);
    }

    #[tokio::test]
    async fn test_slots_are_isolated_per_plugin_and_key() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 50);

        let p1 = storage.load::<Settings>("p1").await.unwrap();
        let p2 = storage.load::<Settings>("p2").await.unwrap();
        let c1 = storage.load::<Counters>("p1").await.unwrap();

        p1.update(|s| s.debug = true).await.unwrap();
        assert!(!p2.read(|s| s.debug).await);

        c1.update(|c| c.total = 7).await.unwrap();
        assert_eq!(storage.slot_count().await, 3);
    }

    #[tokio::test]
    async fn test_unload_then_reload_keeps_final_value() {
        let dir = TempDir::new().unwrap();

        {
            let storage = storage(&dir, 10_000);
            let handle = storage.load::<Settings>("p1").await.unwrap();
            handle.update(|s| s.debug = true).await.unwrap();

            // 合并窗口远未到期, 最终保存必须由释放路径完成
            storage.flush_and_release("p1").await.unwrap();
            assert_eq!(storage.slot_count().await, 0);
        }

        let storage = storage(&dir, 10_000);
        let handle = storage.load::<Settings>("p1").await.unwrap();
        assert!(handle.read(|s| s.debug).await);
    }

    #[tokio::test]
    async fn test_corrupted_data_degrades_to_default() {
        let dir = TempDir::new().unwrap();

        let path = dir.path().join("p1");
        tokio::fs::create_dir_all(&path).await.unwrap();
        tokio::fs::write(path.join("settings.json"), b"{ not json")
            .await
            .unwrap();

        let storage = storage(&dir, 50);
        let handle = storage.load::<Settings>("p1").await.unwrap();
        assert_eq!(handle.get().await, Settings::default());
    }

    #[tokio::test]
    async fn test_coalesced_save() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 80);

        let handle = storage.load::<Counters>("p1").await.unwrap();
        for _ in 0..10 {
            handle.update(|c| c.total += 1).await.unwrap();
        }

        // 窗口未到期之前不应有任何写入
        let path = dir.path().join("p1").join("counters.json");
        assert!(!path.exists());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let bytes = tokio::fs::read(&path).await.unwrap();
        let on_disk: Counters = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(on_disk.total, 10);
    }

    #[tokio::test]
    async fn test_release_of_untouched_slot_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 50);

        storage.load::<Settings>("p1").await.unwrap();
        storage.flush_and_release("p1").await.unwrap();

        // 只读过默认值的槽不应在磁盘上留下文件
        let path = dir.path().join("p1").join("settings.json");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_update_after_release_is_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 50);

        let handle = storage.load::<Settings>("p1").await.unwrap();
        storage.flush_and_release("p1").await.unwrap();

        let result = handle.update(|s| s.debug = true).await;
        assert!(matches!(
            result,
            Err(PluginHostError::InactivePlugin { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_save_retries_and_keeps_value() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 30);

        let handle = storage.load::<Counters>("p1").await.unwrap();

        // 用同名文件挡住存储目录, 使 create_dir_all 失败
        let blocker = dir.path().join("p1");
        tokio::fs::write(&blocker, b"blocked").await.unwrap();

        handle.update(|c| c.total = 42).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        // 写入失败但内存值保持不变
        assert_eq!(handle.read(|c| c.total).await, 42);

        // 障碍移除后, 下一个重试窗口写出成功
        tokio::fs::remove_file(&blocker).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let path = dir.path().join("p1").join("counters.json");
        let bytes = tokio::fs::read(&path).await.unwrap();
        let on_disk: Counters = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(on_disk.total, 42);
    }

    #[tokio::test]
    async fn test_flush_all_writes_dirty_slots() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10_000);

        let settings = storage.load::<Settings>("p1").await.unwrap();
        let counters = storage.load::<Counters>("p2").await.unwrap();
        settings.update(|s| s.debug = true).await.unwrap();
        counters.update(|c| c.total = 3).await.unwrap();

        storage.flush_all().await.unwrap();

        let p1: Settings = serde_json::from_slice(
            &tokio::fs::read(dir.path().join("p1").join("settings.json"))
                .await
                .unwrap(),
        )
        .unwrap();
        assert!(p1.debug);

        let p2: Counters = serde_json::from_slice(
            &tokio::fs::read(dir.path().join("p2").join("counters.json"))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(p2.total, 3);
    }
}
