use crate::core::path::{join_remote, RemoteOs};
use crate::error::{Result, SyncError};
use crate::storage::{EntryKind, RemoteFs, TransportError};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 扫描得到的文件树节点
///
/// 每轮扫描重新构建，构建后不再修改，轮次结束即丢弃。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    File {
        name: String,
        size: u64,
    },
    Directory {
        name: String,
        children: BTreeMap<String, TreeNode>,
    },
}

impl TreeNode {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        TreeNode::File {
            name: name.into(),
            size,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        TreeNode::Directory {
            name: name.into(),
            children: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TreeNode::File { name, .. } | TreeNode::Directory { name, .. } => name,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, TreeNode>> {
        match self {
            TreeNode::Directory { children, .. } => Some(children),
            TreeNode::File { .. } => None,
        }
    }

    /// 递归统计文件数
    pub fn file_count(&self) -> usize {
        match self {
            TreeNode::File { .. } => 1,
            TreeNode::Directory { children, .. } => children.values().map(|c| c.file_count()).sum(),
        }
    }

    /// 添加子节点（仅目录有效）
    pub fn with_child(mut self, child: TreeNode) -> Self {
        if let TreeNode::Directory { children, .. } = &mut self {
            children.insert(child.name().to_string(), child);
        }
        self
    }

    /// 按相对路径插入节点，中间目录不存在时自动补齐
    fn insert_at(&mut self, components: &[String], node: TreeNode) {
        let TreeNode::Directory { children, .. } = self else {
            return;
        };
        match components {
            [] => {}
            [last] => {
                children.entry(last.clone()).or_insert(node);
            }
            [first, rest @ ..] => {
                children
                    .entry(first.clone())
                    .or_insert_with(|| TreeNode::dir(first.clone()))
                    .insert_at(rest, node);
            }
        }
    }
}

/// 文件扫描器
pub struct FileScanner {
    /// 最大递归深度（根目录的直接子项深度为 1）
    max_depth: usize,
    cancel: Option<CancellationToken>,
}

impl FileScanner {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            cancel: None,
        }
    }

    /// 创建带取消标志的扫描器
    pub fn with_cancel(max_depth: usize, cancel: CancellationToken) -> Self {
        Self {
            max_depth,
            cancel: Some(cancel),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(SyncError::Cancelled),
            _ => Ok(()),
        }
    }

    fn depth_exceeded(&self, path: &str) -> SyncError {
        SyncError::Other(format!("扫描深度超过上限 {}: {}", self.max_depth, path))
    }

    /// 扫描本地目录
    ///
    /// 根目录不存在时返回 `NotFound`；符号链接不跟随，直接跳过。
    pub async fn scan_local(&self, root: &Path) -> Result<TreeNode> {
        self.check_cancelled()?;

        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(SyncError::Other(format!("不是目录: {}", root.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound(root.display().to_string()))
            }
            Err(e) => return Err(SyncError::Other(format!("{}: {}", root.display(), e))),
        }

        info!("开始扫描本地目录: {}", root.display());

        let root_buf = root.to_path_buf();
        let max_depth = self.max_depth;
        // 使用 spawn_blocking 避免阻塞 async runtime
        let tree = tokio::task::spawn_blocking(move || walk_local(&root_buf, max_depth)).await??;

        info!("扫描完成: {} 个文件", tree.file_count());
        Ok(tree)
    }

    /// 扫描远程目录
    ///
    /// 先确认根目录存在：不存在时返回 `NotFound` 而不是空树。
    pub async fn scan_remote(
        &self,
        remote_fs: &dyn RemoteFs,
        root: &str,
        remote_os: RemoteOs,
    ) -> Result<TreeNode> {
        self.check_cancelled()?;

        let meta = remote_fs.stat(root).await.map_err(SyncError::from)?;
        if !meta.is_dir {
            return Err(SyncError::Other(format!("不是目录: {}", root)));
        }

        info!("开始扫描远程目录: {} ({})", root, remote_fs.name());

        let children = self.scan_remote_dir(remote_fs, root.to_string(), remote_os, 1).await?;
        let tree = TreeNode::Directory {
            name: root_name(root),
            children,
        };

        info!("扫描完成: {} 个文件", tree.file_count());
        Ok(tree)
    }

    fn scan_remote_dir<'a>(
        &'a self,
        remote_fs: &'a dyn RemoteFs,
        path: String,
        remote_os: RemoteOs,
        depth: usize,
    ) -> BoxFuture<'a, Result<BTreeMap<String, TreeNode>>> {
        Box::pin(async move {
            self.check_cancelled()?;

            let entries = match remote_fs.list(&path).await {
                Ok(entries) => entries,
                // 扫描期间目录被删除，按空目录处理
                Err(TransportError::NotFound(_)) if depth > 1 => {
                    debug!("目录已不存在: {}", path);
                    Vec::new()
                }
                Err(e) => return Err(e.into()),
            };

            if !entries.is_empty() && depth > self.max_depth {
                return Err(self.depth_exceeded(&path));
            }

            let mut children = BTreeMap::new();
            for entry in entries {
                if entry.name == "." || entry.name == ".." || entry.name.is_empty() {
                    continue;
                }
                let node = match entry.kind {
                    EntryKind::File => TreeNode::file(entry.name.clone(), entry.size),
                    EntryKind::Directory => {
                        let child_path = join_remote(&path, &entry.name, remote_os);
                        let grandchildren = self
                            .scan_remote_dir(remote_fs, child_path, remote_os, depth + 1)
                            .await?;
                        TreeNode::Directory {
                            name: entry.name.clone(),
                            children: grandchildren,
                        }
                    }
                };
                children.insert(entry.name, node);
            }
            Ok(children)
        })
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(64)
    }
}

fn root_name(root: &str) -> String {
    root.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(root)
        .to_string()
}

fn walk_local(root: &Path, max_depth: usize) -> Result<TreeNode> {
    let mut tree = TreeNode::dir(
        root.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string()),
    );

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .max_depth(max_depth.saturating_add(1))
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("读取目录项失败: {}", e);
                continue;
            }
        };

        if entry.depth() > max_depth {
            return Err(SyncError::Other(format!(
                "扫描深度超过上限 {}: {}",
                max_depth,
                entry.path().display()
            )));
        }

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            warn!("跳过符号链接: {}", entry.path().display());
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        let name = match components.last() {
            Some(n) => n.clone(),
            None => continue,
        };

        let node = if file_type.is_dir() {
            TreeNode::dir(name)
        } else if file_type.is_file() {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            TreeNode::file(name, size)
        } else {
            debug!("跳过特殊文件: {}", entry.path().display());
            continue;
        };

        tree.insert_at(&components, node);
    }

    Ok(tree)
}
