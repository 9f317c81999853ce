//! イメージビルダー
//!
//! ビルドステップを宣言順に実行し、ステップごとのファイル差分を
//! コンテンツアドレス付きレイヤーとして積み上げます。ビルドが途中で
//! 失敗した場合、ステージング領域ごと破棄されるため、部分的なイメージが
//! Publisherから見えることはありません。

use crate::cache::BuildCache;
use crate::error::{BuildError, BuildResult};
use crate::layer::{hash_tree, tree_delta, write_layer_archive};
use crate::snapshot::SourceSnapshot;
use serde::{Deserialize, Serialize};
use shipflow_config::{ResolvedConfig, expand};
use shipflow_core::digest::Digest;
use shipflow_core::model::{BuildStep, Image, ImageMetadata, Layer, Pipeline};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tokio::time::Instant;

/// ビルド時の非致命的な警告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BuildWarning {
    /// 非rootユーザーが宣言されていない
    Security,
    /// マウントボリューム宣言先への書き込み
    PersistedWrite { step_index: usize, path: String },
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Security => write!(
                f,
                "非rootユーザーが設定されていません (user ステップの追加を推奨)"
            ),
            Self::PersistedWrite { step_index, path } => write!(
                f,
                "ステップ {} がボリューム宣言先 {} に書き込んでいます (コンテナ再作成で消えます)",
                step_index, path
            ),
        }
    }
}

/// ビルドオプション
#[derive(Debug, Default)]
pub struct BuildOptions {
    /// キャッシュを無視して全ステップを再実行
    pub no_cache: bool,
    /// パイプライン全体のデッドライン
    pub deadline: Option<Instant>,
}

/// ビルド結果
#[derive(Debug)]
pub struct BuildOutcome {
    pub image: Image,
    pub warnings: Vec<BuildWarning>,
    /// キャッシュからの返却だったか
    pub cache_hit: bool,
}

/// イメージビルダー
pub struct ImageBuilder {
    cache: BuildCache,
}

impl ImageBuilder {
    pub fn new(cache: BuildCache) -> Self {
        Self { cache }
    }

    /// イメージをビルド
    pub async fn build(
        &self,
        pipeline: &Pipeline,
        snapshot: &SourceSnapshot,
        config: &ResolvedConfig,
        options: &BuildOptions,
    ) -> BuildResult<BuildOutcome> {
        let referenced = pipeline.referenced_params();
        let config_digest = config.subset_digest(referenced.iter().map(|s| s.as_str()));
        let cache_key =
            BuildCache::cache_key(&snapshot.digest, &config_digest, &pipeline.steps_digest());

        if !options.no_cache
            && let Some(cached) = self.cache.lookup(&cache_key)
        {
            tracing::info!(
                image = %cached.image.digest,
                "Build cache hit, skipping step execution"
            );
            report_warnings(&cached.warnings);
            return Ok(BuildOutcome {
                image: cached.image,
                warnings: cached.warnings,
                cache_hit: true,
            });
        }

        // ステージング領域。失敗時はTempDirのdropで丸ごと消える。
        let staging = tempfile::tempdir()?;
        let rootfs = staging.path().join("rootfs");
        let layers_dir = staging.path().join("layers");
        fs::create_dir_all(&rootfs)?;
        fs::create_dir_all(&layers_dir)?;

        let mut metadata = ImageMetadata::default();
        let mut layers: Vec<Layer> = Vec::new();
        let mut warnings: Vec<BuildWarning> = Vec::new();
        let mut tree: BTreeMap<String, Digest> = BTreeMap::new();
        let mut prev_address = snapshot.digest.clone();

        for (step_index, step) in pipeline.steps.iter().enumerate() {
            tracing::info!(step = step_index, kind = step.kind(), "Executing build step");

            let refs = step.referenced_params();
            let subset = config.subset_digest(refs.iter().map(|s| s.as_str()));
            let mut address = Digest::builder();
            address.update_field(prev_address.as_hex());
            address.update_field(step.canonical_json());
            address.update_field(subset.as_hex());
            let address = address.finish();

            self.execute_step(
                step, step_index, snapshot, config, &rootfs, &mut metadata, options,
            )
            .await?;

            let layer = if step.writes_filesystem() {
                let after = hash_tree(&rootfs)?;
                let delta = tree_delta(&tree, &after);
                warn_persisted_writes(&pipeline.volumes, &delta, step_index, &mut warnings);
                tree = after;

                if delta.is_empty() {
                    metadata_layer(address.clone())
                } else {
                    let archive_path = layers_dir.join(format!("{:04}.tar.gz", step_index));
                    let archive = write_layer_archive(&rootfs, &delta, &archive_path)?;
                    Layer {
                        digest: address.clone(),
                        archive: Some(archive_path),
                        archive_digest: Some(archive.digest),
                        file_count: archive.file_count,
                        size_bytes: archive.size_bytes,
                    }
                }
            } else {
                metadata_layer(address.clone())
            };

            layers.push(layer);
            prev_address = address;
        }

        if !is_nonroot(metadata.user.as_deref()) {
            warnings.push(BuildWarning::Security);
        }
        report_warnings(&warnings);

        let image = Image::new(layers, metadata);
        // 成功したビルドだけがキャッシュへ昇格する
        let image = self.cache.persist(&cache_key, image, &warnings)?;

        tracing::info!(image = %image.digest, layers = image.layers.len(), "Image built");

        Ok(BuildOutcome {
            image,
            warnings,
            cache_hit: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        step: &BuildStep,
        step_index: usize,
        snapshot: &SourceSnapshot,
        config: &ResolvedConfig,
        rootfs: &Path,
        metadata: &mut ImageMetadata,
        options: &BuildOptions,
    ) -> BuildResult<()> {
        match step {
            BuildStep::Copy { src, dest } => {
                let src = expand(src, config)?;
                let dest = expand(dest, config)?;
                copy_from_snapshot(snapshot, &src, &dest, rootfs, step_index)
            }
            BuildStep::Run { command } => {
                let refs = step.referenced_params();
                let command = expand(command, config)?;
                run_command(
                    &command, step_index, &refs, config, rootfs, metadata, options,
                )
                .await
            }
            BuildStep::Env { key, value } => {
                let key = expand(key, config)?;
                let value = expand(value, config)?;
                metadata.env.insert(key, value);
                Ok(())
            }
            BuildStep::User { name } => {
                metadata.user = Some(expand(name, config)?);
                Ok(())
            }
            BuildStep::Expose { port } => {
                if !metadata.exposed_ports.contains(port) {
                    metadata.exposed_ports.push(*port);
                }
                Ok(())
            }
            BuildStep::Entrypoint { argv } => {
                metadata.entrypoint = Some(expand_argv(argv, config)?);
                Ok(())
            }
            BuildStep::Cmd { argv } => {
                metadata.cmd = Some(expand_argv(argv, config)?);
                Ok(())
            }
            BuildStep::Workdir { path } => {
                metadata.workdir = Some(expand(path, config)?);
                Ok(())
            }
        }
    }
}

fn metadata_layer(address: Digest) -> Layer {
    Layer {
        digest: address,
        archive: None,
        archive_digest: None,
        file_count: 0,
        size_bytes: 0,
    }
}

fn expand_argv(argv: &[String], config: &ResolvedConfig) -> BuildResult<Vec<String>> {
    argv.iter().map(|a| Ok(expand(a, config)?)).collect()
}

/// スナップショットからrootfsへのコピー
fn copy_from_snapshot(
    snapshot: &SourceSnapshot,
    src: &str,
    dest: &str,
    rootfs: &Path,
    step_index: usize,
) -> BuildResult<()> {
    let src = src.trim_end_matches('/');
    let matched: Vec<_> = snapshot.entries_under(src).collect();
    if matched.is_empty() {
        return Err(BuildError::BuildStepFailed {
            step_index,
            reason: format!("copy source '{}' is not part of the source snapshot", src),
        });
    }

    for entry in matched {
        let target_rel = if entry.path == src {
            // 単一ファイルのコピー。destが `/` 終わりならその配下へ。
            if dest.ends_with('/') {
                let file_name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
                format!("{}{}", dest, file_name)
            } else {
                dest.to_string()
            }
        } else {
            let sub = &entry.path[src.len() + 1..];
            format!("{}/{}", dest.trim_end_matches('/'), sub)
        };

        let target = rootfs.join(target_rel.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(snapshot.root.join(&entry.path), &target)?;

        #[cfg(target_family = "unix")]
        if entry.executable {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
        }
    }

    Ok(())
}

/// runステップの実行
///
/// 環境変数として見えるパラメータは、ステップが参照しているものに限る
/// （レイヤーアドレスの入力と実行時の入力を一致させるため）。
#[allow(clippy::too_many_arguments)]
async fn run_command(
    command: &str,
    step_index: usize,
    referenced: &std::collections::BTreeSet<String>,
    config: &ResolvedConfig,
    rootfs: &Path,
    metadata: &ImageMetadata,
    options: &BuildOptions,
) -> BuildResult<()> {
    let cwd = match &metadata.workdir {
        Some(workdir) => rootfs.join(workdir.trim_start_matches('/')),
        None => rootfs.to_path_buf(),
    };
    fs::create_dir_all(&cwd)?;

    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(&cwd)
        // デッドライン超過でfutureがdropされたら子プロセスも止める
        .kill_on_drop(true);

    for (key, value) in &metadata.env {
        cmd.env(key, value);
    }
    for name in referenced {
        if let Some(value) = config.get(name) {
            cmd.env(name, value);
        }
    }

    let output = match remaining_time(options.deadline) {
        RemainingTime::Unbounded => cmd.output().await,
        RemainingTime::Some(budget) => {
            match tokio::time::timeout(budget, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(BuildError::BuildStepFailed {
                        step_index,
                        reason: "pipeline deadline exceeded while running command".to_string(),
                    });
                }
            }
        }
        RemainingTime::Expired => {
            return Err(BuildError::BuildStepFailed {
                step_index,
                reason: "pipeline deadline exceeded before running command".to_string(),
            });
        }
    };

    let output = output.map_err(|e| BuildError::BuildStepFailed {
        step_index,
        reason: format!("failed to spawn shell: {}", e),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = if stderr.trim().is_empty() {
            format!("command exited with {}", output.status)
        } else {
            format!("{} ({})", stderr.trim(), output.status)
        };
        return Err(BuildError::BuildStepFailed { step_index, reason });
    }

    Ok(())
}

enum RemainingTime {
    Unbounded,
    Some(std::time::Duration),
    Expired,
}

fn remaining_time(deadline: Option<Instant>) -> RemainingTime {
    match deadline {
        None => RemainingTime::Unbounded,
        Some(deadline) => {
            let now = Instant::now();
            if deadline <= now {
                RemainingTime::Expired
            } else {
                RemainingTime::Some(deadline - now)
            }
        }
    }
}

fn warn_persisted_writes(
    volumes: &[String],
    delta: &[String],
    step_index: usize,
    warnings: &mut Vec<BuildWarning>,
) {
    for volume in volumes {
        let prefix = format!("{}/", volume.trim_matches('/'));
        for path in delta {
            if path.starts_with(&prefix) || path == volume.trim_matches('/') {
                warnings.push(BuildWarning::PersistedWrite {
                    step_index,
                    path: format!("/{}", path),
                });
            }
        }
    }
}

fn is_nonroot(user: Option<&str>) -> bool {
    match user {
        Some(user) => {
            let name = user.split(':').next().unwrap_or(user);
            !name.is_empty() && name != "root" && name != "0"
        }
        None => false,
    }
}

fn report_warnings(warnings: &[BuildWarning]) {
    for warning in warnings {
        tracing::warn!("{}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipflow_config::{ConfigSources, resolve};
    use shipflow_core::model::{ParamSpec, SourceRules};
    use tempfile::tempdir;

    fn snapshot_from(dir: &Path) -> SourceSnapshot {
        crate::snapshot::Snapshotter::new(&SourceRules::default())
            .unwrap()
            .snapshot(dir)
            .unwrap()
    }

    fn empty_config() -> ResolvedConfig {
        resolve(&[], &ConfigSources::default()).unwrap()
    }

    fn config_with(name: &str, value: &str) -> ResolvedConfig {
        let specs = vec![ParamSpec {
            name: name.to_string(),
            default: None,
            required: true,
        }];
        let mut sources = ConfigSources::default();
        sources.args.insert(name.to_string(), value.to_string());
        resolve(&specs, &sources).unwrap()
    }

    fn pipeline_with(steps: Vec<BuildStep>) -> Pipeline {
        Pipeline {
            name: "test".to_string(),
            steps,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_copy_run_user_expose() {
        let source = tempdir().unwrap();
        fs::create_dir_all(source.path().join("src")).unwrap();
        fs::write(source.path().join("src/app.txt"), "app").unwrap();

        let cache_dir = tempdir().unwrap();
        let builder = ImageBuilder::new(BuildCache::new(cache_dir.path()));

        let pipeline = pipeline_with(vec![
            BuildStep::Copy {
                src: "src".to_string(),
                dest: "/app/src".to_string(),
            },
            BuildStep::Run {
                command: "printf installed > install.log".to_string(),
            },
            BuildStep::User {
                name: "nonroot".to_string(),
            },
            BuildStep::Expose { port: 5000 },
        ]);

        let snapshot = snapshot_from(source.path());
        let outcome = builder
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.image.metadata.user.as_deref(), Some("nonroot"));
        assert_eq!(outcome.image.metadata.exposed_ports, vec![5000]);
        assert_eq!(outcome.image.layers.len(), 4);
        // copyとrunはファイルを生むのでblobレイヤー
        assert_eq!(outcome.image.blob_layers().count(), 2);
        // 非rootユーザーが宣言されているのでSecurity警告は出ない
        assert!(!outcome.warnings.contains(&BuildWarning::Security));
        assert!(!outcome.cache_hit);
    }

    #[tokio::test]
    async fn test_build_is_deterministic() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("input.txt"), "data").unwrap();

        let pipeline = pipeline_with(vec![
            BuildStep::Copy {
                src: "input.txt".to_string(),
                dest: "/input.txt".to_string(),
            },
            BuildStep::Env {
                key: "MODE".to_string(),
                value: "release".to_string(),
            },
        ]);

        let snapshot = snapshot_from(source.path());

        let cache_a = tempdir().unwrap();
        let first = ImageBuilder::new(BuildCache::new(cache_a.path()))
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap();

        let cache_b = tempdir().unwrap();
        let second = ImageBuilder::new(BuildCache::new(cache_b.path()))
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap();

        assert_eq!(first.image.digest, second.image.digest);
    }

    #[tokio::test]
    async fn test_build_cache_hit() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("input.txt"), "data").unwrap();

        let cache_dir = tempdir().unwrap();
        let builder = ImageBuilder::new(BuildCache::new(cache_dir.path()));
        let pipeline = pipeline_with(vec![BuildStep::Copy {
            src: "input.txt".to_string(),
            dest: "/input.txt".to_string(),
        }]);

        let snapshot = snapshot_from(source.path());
        let first = builder
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap();
        let second = builder
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.image.digest, second.image.digest);
    }

    #[tokio::test]
    async fn test_build_no_cache_forces_execution() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("input.txt"), "data").unwrap();

        let cache_dir = tempdir().unwrap();
        let builder = ImageBuilder::new(BuildCache::new(cache_dir.path()));
        let pipeline = pipeline_with(vec![BuildStep::Copy {
            src: "input.txt".to_string(),
            dest: "/input.txt".to_string(),
        }]);

        let snapshot = snapshot_from(source.path());
        builder
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap();

        let options = BuildOptions {
            no_cache: true,
            ..Default::default()
        };
        let rebuilt = builder
            .build(&pipeline, &snapshot, &empty_config(), &options)
            .await
            .unwrap();
        assert!(!rebuilt.cache_hit);
    }

    #[tokio::test]
    async fn test_failed_step_leaves_no_image() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("input.txt"), "data").unwrap();

        let cache_dir = tempdir().unwrap();
        let builder = ImageBuilder::new(BuildCache::new(cache_dir.path()));
        let pipeline = pipeline_with(vec![
            BuildStep::Copy {
                src: "input.txt".to_string(),
                dest: "/input.txt".to_string(),
            },
            BuildStep::Run {
                command: "echo boom >&2; exit 1".to_string(),
            },
        ]);

        let snapshot = snapshot_from(source.path());
        let err = builder
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap_err();

        match err {
            BuildError::BuildStepFailed { step_index, reason } => {
                assert_eq!(step_index, 1);
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // 失敗したビルドはキャッシュに何も残さない
        let config = empty_config();
        let referenced = pipeline.referenced_params();
        let key = BuildCache::cache_key(
            &snapshot.digest,
            &config.subset_digest(referenced.iter().map(|s| s.as_str())),
            &pipeline.steps_digest(),
        );
        assert!(BuildCache::new(cache_dir.path()).lookup(&key).is_none());
    }

    #[tokio::test]
    async fn test_security_warning_without_user() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("input.txt"), "data").unwrap();

        let cache_dir = tempdir().unwrap();
        let builder = ImageBuilder::new(BuildCache::new(cache_dir.path()));
        let pipeline = pipeline_with(vec![BuildStep::Copy {
            src: "input.txt".to_string(),
            dest: "/input.txt".to_string(),
        }]);

        let snapshot = snapshot_from(source.path());
        let outcome = builder
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap();
        assert!(outcome.warnings.contains(&BuildWarning::Security));
    }

    #[tokio::test]
    async fn test_security_warning_for_root_user() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("input.txt"), "data").unwrap();

        let cache_dir = tempdir().unwrap();
        let builder = ImageBuilder::new(BuildCache::new(cache_dir.path()));
        let pipeline = pipeline_with(vec![
            BuildStep::Copy {
                src: "input.txt".to_string(),
                dest: "/input.txt".to_string(),
            },
            BuildStep::User {
                name: "root".to_string(),
            },
        ]);

        let snapshot = snapshot_from(source.path());
        let outcome = builder
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap();
        assert!(outcome.warnings.contains(&BuildWarning::Security));
    }

    #[tokio::test]
    async fn test_persisted_write_warning() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("input.txt"), "data").unwrap();

        let cache_dir = tempdir().unwrap();
        let builder = ImageBuilder::new(BuildCache::new(cache_dir.path()));

        let mut pipeline = pipeline_with(vec![BuildStep::Run {
            command: "mkdir -p data && printf x > data/cache.db".to_string(),
        }]);
        pipeline.volumes = vec!["/data".to_string()];

        let snapshot = snapshot_from(source.path());
        let outcome = builder
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap();

        assert!(outcome.warnings.iter().any(|w| matches!(
            w,
            BuildWarning::PersistedWrite { step_index: 0, path } if path == "/data/cache.db"
        )));
    }

    #[tokio::test]
    async fn test_copy_missing_source_fails() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("present.txt"), "x").unwrap();

        let cache_dir = tempdir().unwrap();
        let builder = ImageBuilder::new(BuildCache::new(cache_dir.path()));
        let pipeline = pipeline_with(vec![BuildStep::Copy {
            src: "missing.txt".to_string(),
            dest: "/missing.txt".to_string(),
        }]);

        let snapshot = snapshot_from(source.path());
        let err = builder
            .build(&pipeline, &snapshot, &empty_config(), &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::BuildStepFailed { step_index: 0, .. }));
    }

    #[tokio::test]
    async fn test_run_respects_deadline() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("input.txt"), "data").unwrap();

        let cache_dir = tempdir().unwrap();
        let builder = ImageBuilder::new(BuildCache::new(cache_dir.path()));
        let pipeline = pipeline_with(vec![BuildStep::Run {
            command: "sleep 5".to_string(),
        }]);

        let options = BuildOptions {
            no_cache: false,
            deadline: Some(Instant::now() + std::time::Duration::from_millis(100)),
        };

        let snapshot = snapshot_from(source.path());
        let err = builder
            .build(&pipeline, &snapshot, &empty_config(), &options)
            .await
            .unwrap_err();

        match err {
            BuildError::BuildStepFailed { reason, .. } => {
                assert!(reason.contains("deadline"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_param_expansion_in_run() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("input.txt"), "data").unwrap();

        let cache_dir = tempdir().unwrap();
        let builder = ImageBuilder::new(BuildCache::new(cache_dir.path()));
        let mut pipeline = pipeline_with(vec![BuildStep::Run {
            command: "printf %s {VERSION} > version.txt && test -s version.txt".to_string(),
        }]);
        pipeline.params = vec![ParamSpec {
            name: "VERSION".to_string(),
            default: None,
            required: true,
        }];

        let snapshot = snapshot_from(source.path());
        let config = config_with("VERSION", "2.1.0");
        let outcome = builder
            .build(&pipeline, &snapshot, &config, &BuildOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.image.blob_layers().count(), 1);
    }

    #[tokio::test]
    async fn test_config_change_changes_image() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("input.txt"), "data").unwrap();

        let mut pipeline = pipeline_with(vec![BuildStep::Run {
            command: "printf %s {VERSION} > version.txt".to_string(),
        }]);
        pipeline.params = vec![ParamSpec {
            name: "VERSION".to_string(),
            default: None,
            required: true,
        }];

        let snapshot = snapshot_from(source.path());

        let cache_a = tempdir().unwrap();
        let first = ImageBuilder::new(BuildCache::new(cache_a.path()))
            .build(
                &pipeline,
                &snapshot,
                &config_with("VERSION", "1.0"),
                &BuildOptions::default(),
            )
            .await
            .unwrap();

        let cache_b = tempdir().unwrap();
        let second = ImageBuilder::new(BuildCache::new(cache_b.path()))
            .build(
                &pipeline,
                &snapshot,
                &config_with("VERSION", "2.0"),
                &BuildOptions::default(),
            )
            .await
            .unwrap();

        assert_ne!(first.image.digest, second.image.digest);
    }
}
