//! 公開記録ストア
//!
//! 公開済みの (registry, repository, tag, image digest) をJSONファイルに
//! 追記保存します。実行のたびにファイルから読み直すため、パイプライン
//! インスタンス間で共有するインメモリ状態はありません。
//!
//! 並行する複数のパイプラインが同じ記録を書く場合はlast-writer-winsに
//! なりますが、冪等性キーが内容を固定しているため安全です。

use crate::error::{RegistryError, RegistryResult};
use shipflow_core::digest::Digest;
use shipflow_core::model::PublishRecord;
use std::fs;
use std::path::PathBuf;

/// ディスク上の公開記録ログ
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 冪等性キーに一致する記録を探す
    pub fn lookup(
        &self,
        registry: &str,
        repository: &str,
        tag: &str,
        digest: &Digest,
    ) -> RegistryResult<Option<PublishRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .find(|r| r.matches(registry, repository, tag, digest)))
    }

    /// 記録を追記する
    ///
    /// 書き込みは一時ファイル + rename で行うため、途中失敗で
    /// ログ全体が壊れることはない。
    pub fn append(&self, record: PublishRecord) -> RegistryResult<()> {
        let mut records = self.load()?;
        records.push(record);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(&records)
            .map_err(|e| RegistryError::RecordStore(e.to_string()))?;
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }

    fn load(&self) -> RegistryResult<Vec<PublishRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            RegistryError::RecordStore(format!(
                "corrupt record log at {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// 公開記録ログの既定パスを解決
pub fn default_record_path() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("shipflow").join("publish-records.json"))
}
