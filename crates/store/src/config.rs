use std::path::PathBuf;
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

const DEFAULT_DATA_DIR: &str = "data";

/// 设置存储层的数据根目录，仅首次调用生效。
///
/// # Arguments
/// * `path` - 由应用配置 `database.data_dir` 给出的目录。
pub fn set_root_dir(path: PathBuf) {
    if DATA_DIR.set(path).is_err() {
        tracing::warn!("Data directory already initialised, ignoring override");
    }
}

/// 当前数据根目录，未设置时为 `data`。
pub(crate) fn get_root_dir() -> PathBuf {
    DATA_DIR
        .get()
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}
