use serde::{Deserialize, Serialize};

/// 远程服务器的路径风格
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteOs {
    #[default]
    Unix,
    Windows,
}

impl RemoteOs {
    pub fn separator(self) -> char {
        match self {
            RemoteOs::Unix => '/',
            RemoteOs::Windows => '\\',
        }
    }
}

/// 将路径中的分隔符统一为远程服务器使用的风格
pub fn normalize(path: &str, target_os: RemoteOs) -> String {
    match target_os {
        RemoteOs::Unix => path.replace('\\', "/"),
        RemoteOs::Windows => path.replace('/', "\\"),
    }
}

/// 拼接远程路径并规范化分隔符
pub fn join_remote(root: &str, name: &str, target_os: RemoteOs) -> String {
    let sep = target_os.separator();
    let root = normalize(root, target_os);
    let trimmed = root.trim_end_matches(sep);
    let name = normalize(name, target_os);
    let name = name.trim_start_matches(sep);

    if trimmed.is_empty() && root.starts_with(sep) {
        // 根目录本身
        format!("{}{}", sep, name)
    } else if trimmed.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", trimmed, sep, name)
    }
}
