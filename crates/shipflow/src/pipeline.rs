//! パイプラインオーケストレーター
//!
//! 1トリガーにつき1インスタンスで、解決 → スナップショット → ビルド →
//! 公開を直列に進める状態機械です。リトライはPublisherの内部に
//! 閉じており、オーケストレーター自身はどのステージも再試行しません。
//! 実行をまたいで保持する状態もありません。

use shipflow_build::{BuildCache, BuildOptions, BuildWarning, ImageBuilder, Snapshotter};
use shipflow_config::{ConfigSources, ResolvedConfig};
use shipflow_core::model::{Image, Pipeline, TriggerEvent};
use shipflow_registry::{
    CredentialBroker, HttpRegistryClient, PublishReport, Publisher, RecordStore, split_registry,
};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// パイプラインのステージ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Resolving,
    Snapshotting,
    Building,
    Publishing,
}

impl PipelineStage {
    /// ステージごとの終了コード
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Resolving => 2,
            Self::Snapshotting => 3,
            Self::Building => 4,
            Self::Publishing => 5,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Snapshotting => "snapshotting",
            Self::Building => "building",
            Self::Publishing => "publishing",
        };
        write!(f, "{}", name)
    }
}

/// 状態機械の状態
///
/// `Idle → Resolving → Snapshotting → Building → Publishing → Succeeded`
/// で、どの非終端状態からも `Failed` に遷移しうる。
#[derive(Debug)]
pub enum PipelineState {
    Idle,
    Running(PipelineStage),
    Succeeded,
    Failed { stage: PipelineStage },
}

/// パイプラインの終端エラー
#[derive(Debug, Error)]
#[error("パイプラインが {stage} ステージで失敗しました: {source}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

/// 実行オプション
#[derive(Debug, Default)]
pub struct PipelineOptions {
    /// デフォルト値ファイル（--config-file）
    pub config_file: Option<PathBuf>,
    /// 宣言されていないパラメータをエラーにする
    pub strict: bool,
    /// ビルドキャッシュを無効化
    pub no_cache: bool,
    /// パイプライン全体のタイムアウト
    pub timeout: Option<Duration>,
    /// ビルドキャッシュの場所（省略時は状態ディレクトリ）
    pub cache_dir: Option<PathBuf>,
    /// 公開記録ログの場所（省略時は状態ディレクトリ）
    pub record_path: Option<PathBuf>,
}

/// 公開先
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub registry: String,
    pub repository: String,
    pub tags: Vec<String>,
}

/// 実行結果のサマリー
#[derive(Debug)]
pub struct PipelineSummary {
    pub image: Image,
    pub warnings: Vec<BuildWarning>,
    pub cache_hit: bool,
    /// 公開まで実行した場合のレポート
    pub report: Option<PublishReport>,
}

/// パイプライン1回分のオーケストレーター
pub struct Orchestrator {
    state: PipelineState,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    fn enter(&mut self, stage: PipelineStage) {
        tracing::debug!(stage = %stage, "Pipeline stage started");
        self.state = PipelineState::Running(stage);
    }

    fn fail(
        &mut self,
        stage: PipelineStage,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> PipelineError {
        self.state = PipelineState::Failed { stage };
        PipelineError {
            stage,
            source: source.into(),
        }
    }

    /// トリガーイベントを消費してパイプラインを実行
    ///
    /// `publish` がNoneならビルドまでで完了する（`ship build`）。
    pub async fn run(
        &mut self,
        pipeline: &Pipeline,
        trigger: &TriggerEvent,
        options: &PipelineOptions,
        publish: Option<&PublishTarget>,
    ) -> Result<PipelineSummary, PipelineError> {
        let deadline = options.timeout.map(|t| Instant::now() + t);

        // --- Resolving ---
        self.enter(PipelineStage::Resolving);
        let config = self.resolve_config(pipeline, trigger, options)?;

        // --- Snapshotting ---
        self.enter(PipelineStage::Snapshotting);
        let snapshotter = Snapshotter::new(&pipeline.source)
            .map_err(|e| self.fail(PipelineStage::Snapshotting, e))?;
        let snapshot = snapshotter
            .snapshot(&trigger.source_root)
            .map_err(|e| self.fail(PipelineStage::Snapshotting, e))?;
        tracing::info!(
            files = snapshot.entries.len(),
            digest = %snapshot.digest,
            "Source snapshot ready"
        );

        // --- Building ---
        self.enter(PipelineStage::Building);
        let cache_dir = match &options.cache_dir {
            Some(dir) => dir.clone(),
            None => shipflow_build::default_cache_dir()
                .ok_or_else(|| self.fail(PipelineStage::Building, "状態ディレクトリを解決できません"))?,
        };
        let builder = ImageBuilder::new(BuildCache::new(cache_dir));
        let build_options = BuildOptions {
            no_cache: options.no_cache,
            deadline,
        };
        let outcome = builder
            .build(pipeline, &snapshot, &config, &build_options)
            .await
            .map_err(|e| self.fail(PipelineStage::Building, e))?;

        // --- Publishing ---
        let report = if let Some(target) = publish {
            self.enter(PipelineStage::Publishing);
            let report = self.publish(&outcome.image, target, options).await;
            if !report.is_success() {
                let failed = report.failed_tags().join(", ");
                return Err(self.fail(
                    PipelineStage::Publishing,
                    format!("一部のタグの公開に失敗しました: {}", failed),
                ));
            }
            Some(report)
        } else {
            None
        };

        self.state = PipelineState::Succeeded;
        tracing::info!(image = %outcome.image.digest, "Pipeline succeeded");

        Ok(PipelineSummary {
            image: outcome.image,
            warnings: outcome.warnings,
            cache_hit: outcome.cache_hit,
            report,
        })
    }

    fn resolve_config(
        &mut self,
        pipeline: &Pipeline,
        trigger: &TriggerEvent,
        options: &PipelineOptions,
    ) -> Result<ResolvedConfig, PipelineError> {
        let file_defaults = match &options.config_file {
            Some(path) => shipflow_config::load_defaults_file(path)
                .map_err(|e| self.fail(PipelineStage::Resolving, e))?,
            None => Default::default(),
        };

        shipflow_config::warn_sensitive_args(&trigger.build_args);

        let sources = ConfigSources {
            args: trigger.build_args.clone(),
            env: std::env::vars().collect(),
            file_defaults,
            strict: options.strict,
        };

        shipflow_config::resolve(&pipeline.params, &sources)
            .map_err(|e| self.fail(PipelineStage::Resolving, e))
    }

    async fn publish(
        &self,
        image: &Image,
        target: &PublishTarget,
        options: &PipelineOptions,
    ) -> PublishReport {
        let (host, _) = split_registry(&target.registry);
        let record_path = options
            .record_path
            .clone()
            .or_else(shipflow_registry::default_record_path)
            .unwrap_or_else(|| PathBuf::from(".shipflow/publish-records.json"));

        let publisher = Publisher::new(
            HttpRegistryClient::new(host),
            CredentialBroker::new(),
            RecordStore::new(record_path),
        );

        publisher
            .publish(image, &target.registry, &target.repository, &target.tags)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipflow_core::model::{BuildStep, ParamSpec};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn pipeline() -> Pipeline {
        Pipeline {
            name: "test".to_string(),
            params: vec![ParamSpec {
                name: "VERSION".to_string(),
                default: None,
                required: true,
            }],
            steps: vec![
                BuildStep::Copy {
                    src: "input.txt".to_string(),
                    dest: "/input.txt".to_string(),
                },
                BuildStep::User {
                    name: "nonroot".to_string(),
                },
            ],
            ..Default::default()
        }
    }

    fn options(cache: &tempfile::TempDir) -> PipelineOptions {
        PipelineOptions {
            cache_dir: Some(cache.path().to_path_buf()),
            ..Default::default()
        }
    }

    fn trigger_with_version(dir: &tempfile::TempDir) -> TriggerEvent {
        let mut build_args = HashMap::new();
        build_args.insert("VERSION".to_string(), "1.0".to_string());
        TriggerEvent {
            source_root: dir.path().to_path_buf(),
            build_args,
        }
    }

    #[tokio::test]
    async fn test_run_build_only_succeeds() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("input.txt"), "data").unwrap();
        let cache = tempdir().unwrap();

        let mut orchestrator = Orchestrator::new();
        let summary = orchestrator
            .run(&pipeline(), &trigger_with_version(&source), &options(&cache), None)
            .await
            .unwrap();

        assert!(matches!(orchestrator.state(), PipelineState::Succeeded));
        assert!(summary.report.is_none());
        assert_eq!(summary.image.metadata.user.as_deref(), Some("nonroot"));
    }

    #[tokio::test]
    async fn test_missing_required_param_fails_in_resolving() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("input.txt"), "data").unwrap();
        let cache = tempdir().unwrap();

        let trigger = TriggerEvent::new(source.path());
        let mut orchestrator = Orchestrator::new();
        let err = orchestrator
            .run(&pipeline(), &trigger, &options(&cache), None)
            .await
            .unwrap_err();

        assert_eq!(err.stage, PipelineStage::Resolving);
        assert!(err.to_string().contains("VERSION"));
        assert!(matches!(
            orchestrator.state(),
            PipelineState::Failed {
                stage: PipelineStage::Resolving
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_source_fails_in_snapshotting() {
        let source = tempdir().unwrap();
        let cache = tempdir().unwrap();

        let mut orchestrator = Orchestrator::new();
        let err = orchestrator
            .run(
                &pipeline(),
                &trigger_with_version(&source),
                &options(&cache),
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(err.stage, PipelineStage::Snapshotting);
    }

    #[tokio::test]
    async fn test_failing_step_fails_in_building() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("input.txt"), "data").unwrap();
        let cache = tempdir().unwrap();

        let mut failing = pipeline();
        failing.steps.push(BuildStep::Run {
            command: "exit 7".to_string(),
        });

        let mut orchestrator = Orchestrator::new();
        let err = orchestrator
            .run(
                &failing,
                &trigger_with_version(&source),
                &options(&cache),
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(err.stage, PipelineStage::Building);
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            PipelineStage::Resolving.exit_code(),
            PipelineStage::Snapshotting.exit_code(),
            PipelineStage::Building.exit_code(),
            PipelineStage::Publishing.exit_code(),
        ];
        let mut unique = codes.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }
}
