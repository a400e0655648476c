// 插件资源访问
// 捆绑包只读资源与插件私有可写目录

use std::path::{Component, Path, PathBuf};

use pluginix_common::PluginId;
use tracing::debug;

use crate::errors::PluginHostError;

/// 捆绑包只读资源访问器
///
/// 资源随插件捆绑包分发, 运行期只读. 路径相对于捆绑包根目录解析,
/// 拒绝绝对路径和越出根目录的相对路径.
pub struct ResourceContainer {
    plugin_id: PluginId,
    bundle_dir: PathBuf,
}

impl ResourceContainer {
    /// 创建新的资源访问器
    pub fn new(plugin_id: impl Into<PluginId>, bundle_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            bundle_dir: bundle_dir.into(),
        }
    }

    /// 捆绑包根目录
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// 资源是否存在
    pub async fn contains(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(resolved) => tokio::fs::try_exists(&resolved).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// 读取资源的全部字节
    pub async fn read(&self, path: &str) -> Result<Vec<u8>, PluginHostError> {
        let resolved = self.resolve(path)?;
        tokio::fs::read(&resolved).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PluginHostError::not_found(format!("资源 {}/{}", self.plugin_id, path))
            } else {
                PluginHostError::io(format!("读取资源 {} 失败: {}", path, e))
            }
        })
    }

    /// 打开资源文件用于流式读取
    pub async fn open(&self, path: &str) -> Result<tokio::fs::File, PluginHostError> {
        let resolved = self.resolve(path)?;
        tokio::fs::File::open(&resolved).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PluginHostError::not_found(format!("资源 {}/{}", self.plugin_id, path))
            } else {
                PluginHostError::io(format!("打开资源 {} 失败: {}", path, e))
            }
        })
    }

    /// 以 UTF-8 文本读取资源
    pub async fn read_to_string(&self, path: &str) -> Result<String, PluginHostError> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes)
            .map_err(|e| PluginHostError::io(format!("资源 {} 不是合法的 UTF-8: {}", path, e)))
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, PluginHostError> {
        let relative = sanitize_relative(path)?;
        Ok(self.bundle_dir.join(relative))
    }
}

/// 插件可写文件目录提供者
///
/// 每个插件拥有独立的私有目录, 首次访问时创建.
/// 目录之间互不重叠, 插件无法通过它触及其他插件的文件.
pub struct PluginFileExtensions {
    plugin_id: PluginId,
    root: PathBuf,
}

impl PluginFileExtensions {
    /// 创建新的文件目录提供者
    ///
    /// `folders_root` 是所有插件目录的公共父目录,
    /// 实际的插件目录是 `<folders_root>/<插件 ID>`.
    pub fn new(plugin_id: impl Into<PluginId>, folders_root: impl Into<PathBuf>) -> Self {
        let plugin_id = plugin_id.into();
        let root = folders_root.into().join(&plugin_id);
        Self { plugin_id, root }
    }

    /// 插件私有目录, 不存在时创建
    pub async fn root_directory(&self) -> Result<PathBuf, PluginHostError> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
                PluginHostError::io(format!(
                    "创建插件目录 {} 失败: {}",
                    self.root.display(),
                    e
                ))
            })?;
            debug!(plugin_id = %self.plugin_id, path = %self.root.display(), "插件目录已创建");
        }
        Ok(self.root.clone())
    }

    /// 解析插件目录内的相对路径
    pub async fn resolve(&self, path: &str) -> Result<PathBuf, PluginHostError> {
        let relative = sanitize_relative(path)?;
        let root = self.root_directory().await?;
        Ok(root.join(relative))
    }

    /// 读取插件目录内的文件
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, PluginHostError> {
        let resolved = self.resolve(path).await?;
        tokio::fs::read(&resolved).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PluginHostError::not_found(format!("文件 {}/{}", self.plugin_id, path))
            } else {
                PluginHostError::io(format!("读取文件 {} 失败: {}", path, e))
            }
        })
    }

    /// 写入插件目录内的文件, 父目录不存在时创建
    pub async fn write_file(
        &self,
        path: &str,
        contents: impl AsRef<[u8]>,
    ) -> Result<(), PluginHostError> {
        let resolved = self.resolve(path).await?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PluginHostError::io(format!("创建目录失败: {}", e)))?;
        }
        tokio::fs::write(&resolved, contents)
            .await
            .map_err(|e| PluginHostError::io(format!("写入文件 {} 失败: {}", path, e)))
    }
}

/// 校验相对路径, 拒绝绝对路径和 `..` 穿越
fn sanitize_relative(path: &str) -> Result<PathBuf, PluginHostError> {
    let candidate = Path::new(path);

    if candidate.is_absolute() {
        return Err(PluginHostError::validation(
            "path",
            format!("不允许绝对路径: {}", path),
        ));
    }

    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(PluginHostError::validation(
                    "path",
                    format!("路径越出根目录: {}", path),
                ));
            }
        }
    }

    Ok(candidate.to_path_buf())
}
