use crate::pipeline::{Orchestrator, PipelineError, PipelineOptions, PipelineStage};
use crate::utils;
use colored::Colorize;
use shipflow_core::model::TriggerEvent;
use std::path::PathBuf;
use std::time::Duration;

/// ビルドコマンドのオプション
pub struct BuildArgs {
    pub source: PathBuf,
    pub build_args: Vec<String>,
    pub config_file: Option<PathBuf>,
    pub no_cache: bool,
    pub strict: bool,
    pub timeout: Option<u64>,
}

/// ビルドコマンドを処理
///
/// 設定を解決し、スナップショットからイメージをビルドして
/// イメージダイジェストを表示する。公開は行わない。
pub async fn handle_build(args: BuildArgs) -> anyhow::Result<()> {
    let path = shipflow_config::find_pipeline_file()?;
    let pipeline = shipflow_core::parse_pipeline_file(&path).map_err(|e| PipelineError {
        stage: PipelineStage::Resolving,
        source: Box::new(e),
    })?;

    utils::print_pipeline_header(&path, &pipeline);

    let build_args = utils::parse_build_args(&args.build_args).map_err(|e| PipelineError {
        stage: PipelineStage::Resolving,
        source: e.into(),
    })?;
    let trigger = TriggerEvent {
        source_root: args.source,
        build_args,
    };

    let options = PipelineOptions {
        config_file: args.config_file,
        strict: args.strict,
        no_cache: args.no_cache,
        timeout: args.timeout.map(Duration::from_secs),
        ..Default::default()
    };

    println!();
    println!("{}", "🔨 イメージをビルド中...".green().bold());

    let progress = shipflow_build::BuildProgress::new(&pipeline.name);
    let mut orchestrator = Orchestrator::new();
    let summary = match orchestrator.run(&pipeline, &trigger, &options, None).await {
        Ok(summary) => {
            progress.finish_success(summary.image.digest.short());
            summary
        }
        Err(e) => {
            progress.finish_error(&e.to_string());
            return Err(e.into());
        }
    };

    utils::print_warnings(&summary.warnings);
    if summary.cache_hit {
        println!("  {} キャッシュから復元しました", "→".blue());
    }
    println!();
    println!("{}", "✓ ビルドが完了しました".green().bold());
    println!("{}", summary.image.digest);

    Ok(())
}
