//! コンテンツアドレス型のビルドキャッシュ
//!
//! キャッシュキーは (スナップショットダイジェスト, 参照パラメータの
//! 部分集合ダイジェスト, ステップ列ダイジェスト) から決まります。
//! 同じキーのビルドは同じイメージを返すことが保証されるため、
//! Publisherの冪等性はリトライをまたいでも成立します。

use crate::builder::BuildWarning;
use crate::error::BuildResult;
use serde::{Deserialize, Serialize};
use shipflow_core::digest::Digest;
use shipflow_core::model::Image;
use std::fs;
use std::path::PathBuf;

/// キャッシュに保存するビルド1回分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedBuild {
    pub image: Image,
    #[serde(default)]
    pub warnings: Vec<BuildWarning>,
}

/// ディスク上のビルドキャッシュ
pub struct BuildCache {
    root: PathBuf,
}

impl BuildCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// ビルドキャッシュキーを計算
    pub fn cache_key(
        snapshot_digest: &Digest,
        config_subset_digest: &Digest,
        steps_digest: &Digest,
    ) -> Digest {
        let mut builder = Digest::builder();
        builder.update_field(snapshot_digest.as_hex());
        builder.update_field(config_subset_digest.as_hex());
        builder.update_field(steps_digest.as_hex());
        builder.finish()
    }

    /// キャッシュ済みイメージを検索
    ///
    /// マニフェストが壊れている場合やレイヤー実体が欠けている場合は
    /// ヒット扱いにせず、再ビルドに任せる。
    pub fn lookup(&self, key: &Digest) -> Option<CachedBuild> {
        let manifest_path = self.manifest_path(key);
        let content = fs::read_to_string(&manifest_path).ok()?;

        let cached: CachedBuild = match serde_json::from_str(&content) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(
                    path = %manifest_path.display(),
                    error = %e,
                    "Discarding corrupt cache manifest"
                );
                return None;
            }
        };

        for layer in &cached.image.layers {
            if let Some(archive) = &layer.archive
                && !archive.exists()
            {
                tracing::warn!(
                    archive = %archive.display(),
                    "Cache manifest references a missing layer archive"
                );
                return None;
            }
        }

        Some(cached)
    }

    /// ビルド結果をキャッシュへ昇格させる
    ///
    /// ステージング領域のレイヤーアーカイブをキャッシュ配下へコピーし、
    /// パスを書き換えたイメージを返す。マニフェストは一時ファイル経由で
    /// 書き込むため、途中失敗で壊れたマニフェストが残ることはない。
    pub fn persist(
        &self,
        key: &Digest,
        mut image: Image,
        warnings: &[BuildWarning],
    ) -> BuildResult<Image> {
        let layers_dir = self.root.join("layers");
        let images_dir = self.root.join("images");
        fs::create_dir_all(&layers_dir)?;
        fs::create_dir_all(&images_dir)?;

        for layer in &mut image.layers {
            let (Some(staged), Some(archive_digest)) = (&layer.archive, &layer.archive_digest)
            else {
                continue;
            };
            let target = layers_dir.join(format!("{}.tar.gz", archive_digest.as_hex()));
            if !target.exists() {
                fs::copy(staged, &target)?;
            }
            layer.archive = Some(target);
        }

        let cached = CachedBuild {
            image,
            warnings: warnings.to_vec(),
        };

        let manifest_path = self.manifest_path(key);
        let tmp_path = manifest_path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&cached)?)?;
        fs::rename(&tmp_path, &manifest_path)?;

        tracing::debug!(key = %key, "Build cached");
        Ok(cached.image)
    }

    fn manifest_path(&self, key: &Digest) -> PathBuf {
        self.root.join("images").join(format!("{}.json", key.as_hex()))
    }
}

impl From<serde_json::Error> for crate::error::BuildError {
    fn from(e: serde_json::Error) -> Self {
        Self::Io(std::io::Error::other(e))
    }
}

/// キャッシュディレクトリの既定値を解決
pub fn default_cache_dir() -> Option<PathBuf> {
    shipflow_config::get_state_dir().ok().map(|d| d.join("cache"))
}
