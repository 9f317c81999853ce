use crate::pipeline::{
    Orchestrator, PipelineError, PipelineOptions, PipelineStage, PublishTarget,
};
use crate::utils;
use colored::Colorize;
use shipflow_core::model::TriggerEvent;
use shipflow_registry::TagOutcome;
use std::path::PathBuf;
use std::time::Duration;

/// 公開コマンドのオプション
pub struct PublishArgs {
    pub source: PathBuf,
    pub tags: Vec<String>,
    pub registry: Option<String>,
    pub repository: Option<String>,
    pub build_args: Vec<String>,
    pub config_file: Option<PathBuf>,
    pub no_cache: bool,
    pub strict: bool,
    pub timeout: Option<u64>,
}

/// パイプライン全体（ビルド + 公開）を処理
pub async fn handle_publish(args: PublishArgs) -> anyhow::Result<()> {
    let path = shipflow_config::find_pipeline_file()?;
    let pipeline = shipflow_core::parse_pipeline_file(&path).map_err(|e| PipelineError {
        stage: PipelineStage::Resolving,
        source: Box::new(e),
    })?;

    utils::print_pipeline_header(&path, &pipeline);

    // レジストリ優先順位: CLI > ship.kdl
    let registry = args
        .registry
        .or_else(|| pipeline.registry.clone())
        .ok_or_else(|| PipelineError {
            stage: PipelineStage::Resolving,
            source: "レジストリが指定されていません (--registry または ship.kdl の registry)"
                .into(),
        })?;
    let repository = args
        .repository
        .or_else(|| pipeline.repository.clone())
        .unwrap_or_else(|| pipeline.name.clone());
    let tags = if args.tags.is_empty() {
        vec!["latest".to_string()]
    } else {
        args.tags
    };

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

    let target = PublishTarget {
        registry: registry.clone(),
        repository: repository.clone(),
        tags,
    };

    println!("レジストリ: {}", registry.cyan());
    println!("リポジトリ: {}", repository.cyan());
    println!();
    println!("{}", "🔨 イメージをビルド中...".green().bold());

    let progress = shipflow_build::BuildProgress::new(&pipeline.name);
    let mut orchestrator = Orchestrator::new();
    let result = orchestrator
        .run(&pipeline, &trigger, &options, Some(&target))
        .await;

    let summary = match result {
        Ok(summary) => {
            progress.finish_success(summary.image.digest.short());
            summary
        }
        Err(e) => {
            // 公開ステージまで進んでいた場合もステージ名ごと報告される
            progress.finish_error(&e.to_string());
            return Err(e.into());
        }
    };

    utils::print_warnings(&summary.warnings);

    if let Some(report) = &summary.report {
        println!();
        println!("{}", "📤 公開結果:".blue().bold());
        for (tag, outcome) in &report.outcomes {
            match outcome {
                TagOutcome::Published(record) => {
                    println!(
                        "  {} {}:{} ({})",
                        "✓".green(),
                        repository,
                        tag.cyan(),
                        record.image_digest.short()
                    );
                }
                TagOutcome::AlreadyPublished(_) => {
                    println!(
                        "  {} {}:{} は公開済み（プッシュをスキップ）",
                        "✓".green(),
                        repository,
                        tag.cyan()
                    );
                }
                TagOutcome::Failed { cause } => {
                    eprintln!("  {} {}: {}", "✗".red().bold(), tag, cause);
                }
            }
        }
    }

    println!();
    println!("{}", "✓ パイプラインが完了しました".green().bold());
    println!("{}", summary.image.digest);

    Ok(())
}
