//! イメージ公開処理
//!
//! ビルド済みイメージをタグごとにレジストリへ公開します。公開は
//! (registry, repository, tag, image digest) をキーとして冪等で、
//! 同じ内容の再実行はネットワークに触れずに完了します。

use crate::auth::{Credential, CredentialBroker};
use crate::client::{
    CONFIG_MEDIA_TYPE, IMAGE_DIGEST_ANNOTATION, LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE,
    RegistryClient,
};
use crate::error::{RegistryError, RegistryResult};
use crate::record::RecordStore;
use shipflow_core::digest::Digest;
use shipflow_core::model::{Image, PublishRecord};
use std::time::Duration;
use tokio::time::sleep;

/// プッシュリトライ設定（Exponential Backoff）
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大試行回数
    pub max_attempts: u32,
    /// 初期待機時間（ミリ秒）
    pub initial_delay_ms: u64,
    /// 最大待機時間（ミリ秒）
    pub max_delay_ms: u64,
    /// Exponential倍率
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// 指定回数目の待機時間を計算（ミリ秒）
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        (delay as u64).min(self.max_delay_ms)
    }
}

/// タグ1つ分の公開結果
#[derive(Debug)]
pub enum TagOutcome {
    /// 今回のプッシュで公開された
    Published(PublishRecord),
    /// 同一内容が既に公開済み（成功扱い、プッシュなし）
    AlreadyPublished(PublishRecord),
    /// リトライ上限まで失敗した（他タグには影響しない）
    Failed { cause: String },
}

impl TagOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// publish() 1回分のレポート
#[derive(Debug)]
pub struct PublishReport {
    pub registry: String,
    pub repository: String,
    pub image_digest: Digest,
    /// (タグ, 結果) の列。要求されたタグ順。
    pub outcomes: Vec<(String, TagOutcome)>,
}

impl PublishReport {
    /// 全タグが成功（公開済み含む）したか
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| !o.is_failure())
    }

    pub fn failed_tags(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_failure())
            .map(|(tag, _)| tag.as_str())
            .collect()
    }
}

/// イメージ公開を実行するハンドラ
pub struct Publisher<C: RegistryClient> {
    client: C,
    broker: CredentialBroker,
    records: RecordStore,
    retry: RetryConfig,
}

impl<C: RegistryClient> Publisher<C> {
    pub fn new(client: C, broker: CredentialBroker, records: RecordStore) -> Self {
        Self {
            client,
            broker,
            records,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// イメージを指定タグ群で公開
    ///
    /// タグごとに独立して処理し、あるタグの失敗は他のタグを止めない。
    pub async fn publish(
        &self,
        image: &Image,
        registry: &str,
        repository: &str,
        tags: &[String],
    ) -> PublishReport {
        let (host, namespace) = split_registry(registry);
        let repo_path = match namespace {
            Some(ns) => format!("{}/{}", ns, repository),
            None => repository.to_string(),
        };

        let mut outcomes = Vec::with_capacity(tags.len());
        for tag in tags {
            let outcome = self
                .publish_tag(image, registry, host, &repo_path, repository, tag)
                .await;
            outcomes.push((tag.clone(), outcome));
        }

        PublishReport {
            registry: registry.to_string(),
            repository: repository.to_string(),
            image_digest: image.digest.clone(),
            outcomes,
        }
    }

    async fn publish_tag(
        &self,
        image: &Image,
        registry: &str,
        host: &str,
        repo_path: &str,
        repository: &str,
        tag: &str,
    ) -> TagOutcome {
        if let Err(e) = validate_tag(tag) {
            return TagOutcome::Failed {
                cause: e.to_string(),
            };
        }

        // 1. ローカルの公開記録を確認（ネットワーク不要）
        match self
            .records
            .lookup(registry, repository, tag, &image.digest)
        {
            Ok(Some(record)) => {
                tracing::info!(tag, image = %image.digest, "Already published (record log)");
                return TagOutcome::AlreadyPublished(record);
            }
            Ok(None) => {}
            Err(e) => {
                return TagOutcome::Failed {
                    cause: e.to_string(),
                };
            }
        }

        // 2. 認証情報はこの公開1回分だけ解決・保持する
        let credential = match self.broker.resolve(host).await {
            Ok(credential) => credential,
            Err(e) => {
                return TagOutcome::Failed {
                    cause: e.to_string(),
                };
            }
        };

        // 3. レジストリ側に同一内容が既にあるか確認
        match self
            .client
            .manifest_image_digest(repo_path, tag, &credential)
            .await
        {
            Ok(Some(remote)) if remote == image.digest => {
                tracing::info!(tag, image = %image.digest, "Already published (registry)");
                let record =
                    PublishRecord::new(registry, repository, tag, image.digest.clone());
                if let Err(e) = self.records.append(record.clone()) {
                    tracing::warn!(error = %e, "Failed to backfill publish record");
                }
                return TagOutcome::AlreadyPublished(record);
            }
            Ok(_) => {}
            Err(e) => {
                // 事前確認は最適化なので、失敗してもプッシュ自体は試みる
                tracing::debug!(tag, error = %e, "Manifest pre-check failed");
            }
        }

        // 4. プッシュ本体（一時的な失敗はbackoff付きでリトライ）
        self.push_with_retry(image, registry, repo_path, repository, tag, &credential)
            .await
    }

    async fn push_with_retry(
        &self,
        image: &Image,
        registry: &str,
        repo_path: &str,
        repository: &str,
        tag: &str,
        credential: &Credential,
    ) -> TagOutcome {
        let mut attempt = 0;
        loop {
            match self.push_once(image, repo_path, tag, credential).await {
                Ok(manifest_digest) => {
                    tracing::info!(
                        tag,
                        manifest = %manifest_digest,
                        "Pushed image to registry"
                    );
                    let record =
                        PublishRecord::new(registry, repository, tag, image.digest.clone());
                    if let Err(e) = self.records.append(record.clone()) {
                        // 記録の書き込み失敗は公開自体を取り消さない。
                        // 次回はレジストリ側の事前確認で検出される。
                        tracing::warn!(error = %e, "Failed to write publish record");
                    }
                    return TagOutcome::Published(record);
                }
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay_ms = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        tag,
                        attempt = attempt + 1,
                        delay_ms,
                        error = %e,
                        "Transient push failure, retrying"
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => {
                    let failure = RegistryError::PublishFailed {
                        tag: tag.to_string(),
                        cause: e.to_string(),
                    };
                    return TagOutcome::Failed {
                        cause: failure.to_string(),
                    };
                }
            }
        }
    }

    /// 1回分のプッシュ: config blob → レイヤーblob群 → マニフェスト
    async fn push_once(
        &self,
        image: &Image,
        repo_path: &str,
        tag: &str,
        credential: &Credential,
    ) -> RegistryResult<Digest> {
        let config_bytes = image.metadata.canonical_json().into_bytes();
        let config_digest = Digest::of_bytes(&config_bytes);

        if !self
            .client
            .blob_exists(repo_path, &config_digest, credential)
            .await?
        {
            self.client
                .push_blob(repo_path, &config_digest, config_bytes.clone(), credential)
                .await?;
        }

        for layer in image.blob_layers() {
            let archive_digest = layer
                .archive_digest
                .as_ref()
                .expect("blob layer always carries an archive digest");
            if self
                .client
                .blob_exists(repo_path, archive_digest, credential)
                .await?
            {
                tracing::debug!(layer = %archive_digest, "Layer already exists");
                continue;
            }

            let archive_path = layer
                .archive
                .as_ref()
                .expect("blob layer always carries an archive path");
            let data = std::fs::read(archive_path)?;
            self.client
                .push_blob(repo_path, archive_digest, data, credential)
                .await?;
        }

        let manifest = build_manifest(image, &config_digest, config_bytes.len());
        self.client
            .put_manifest(repo_path, tag, manifest, credential)
            .await
    }
}

/// OCIマニフェストを組み立てる
fn build_manifest(image: &Image, config_digest: &Digest, config_size: usize) -> Vec<u8> {
    let layers: Vec<_> = image
        .blob_layers()
        .map(|layer| {
            serde_json::json!({
                "mediaType": LAYER_MEDIA_TYPE,
                "digest": layer.archive_digest.as_ref().map(|d| d.to_string()),
                "size": layer.size_bytes,
            })
        })
        .collect();

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MANIFEST_MEDIA_TYPE,
        "config": {
            "mediaType": CONFIG_MEDIA_TYPE,
            "digest": config_digest.to_string(),
            "size": config_size,
        },
        "layers": layers,
        "annotations": {
            IMAGE_DIGEST_ANNOTATION: image.digest.to_string(),
        },
    });

    serde_json::to_vec(&manifest).expect("manifest serialization cannot fail")
}

/// レジストリ指定をホストと名前空間に分離
///
/// # Examples
/// - `ghcr.io/acme` -> `("ghcr.io", Some("acme"))`
/// - `localhost:5000` -> `("localhost:5000", None)`
pub fn split_registry(registry: &str) -> (&str, Option<&str>) {
    match registry.split_once('/') {
        Some((host, namespace)) if !namespace.is_empty() => (host, Some(namespace)),
        _ => (registry, None),
    }
}

/// タグのバリデーション
///
/// タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_tag(tag: &str) -> RegistryResult<()> {
    if tag.is_empty() {
        return Err(RegistryError::InvalidTag {
            tag: "(empty)".to_string(),
        });
    }

    if tag.len() > 128 {
        return Err(RegistryError::InvalidTag {
            tag: format!("Tag too long ({} characters, max 128)", tag.len()),
        });
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(RegistryError::InvalidTag {
            tag: tag.to_string(),
        });
    }

    for c in tag.chars() {
        if !c.is_ascii_alphanumeric() && c != '.' && c != '-' && c != '_' {
            return Err(RegistryError::InvalidTag {
                tag: format!("Invalid character '{}' in tag: {}", c, tag),
            });
        }
    }

    Ok(())
}
