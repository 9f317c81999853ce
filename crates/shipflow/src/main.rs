mod commands;
mod pipeline;
mod utils;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ship")]
#[command(about = "ソースからイメージを組み立て、レジストリへ一度だけ届ける。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// イメージをビルドしてダイジェストを表示
    Build {
        /// ソースディレクトリ（省略時はカレントディレクトリ）
        #[arg(short, long, default_value = ".")]
        source: PathBuf,
        /// ビルド引数 KEY=VALUE（繰り返し指定可）
        #[arg(long = "build-arg", value_name = "KEY=VALUE")]
        build_arg: Vec<String>,
        /// デフォルト値ファイル（KDL）
        #[arg(long)]
        config_file: Option<PathBuf>,
        /// キャッシュを使用しない
        #[arg(long)]
        no_cache: bool,
        /// 宣言されていないパラメータをエラーにする
        #[arg(long)]
        strict: bool,
        /// パイプライン全体のタイムアウト（秒）
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// パイプライン全体を実行（ビルド + レジストリへ公開）
    Publish {
        /// ソースディレクトリ（省略時はカレントディレクトリ）
        #[arg(short, long, default_value = ".")]
        source: PathBuf,
        /// 公開するタグ（繰り返し指定可、省略時は latest）
        #[arg(short, long = "tag")]
        tag: Vec<String>,
        /// レジストリ（例: ghcr.io/acme。省略時はship.kdlのregistry）
        #[arg(long)]
        registry: Option<String>,
        /// リポジトリ名（省略時はship.kdlのrepository）
        #[arg(long)]
        repository: Option<String>,
        /// ビルド引数 KEY=VALUE（繰り返し指定可）
        #[arg(long = "build-arg", value_name = "KEY=VALUE")]
        build_arg: Vec<String>,
        /// デフォルト値ファイル（KDL）
        #[arg(long)]
        config_file: Option<PathBuf>,
        /// キャッシュを使用しない
        #[arg(long)]
        no_cache: bool,
        /// 宣言されていないパラメータをエラーにする
        #[arg(long)]
        strict: bool,
        /// パイプライン全体のタイムアウト（秒）
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// 設定を検証
    Validate,
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build {
            source,
            build_arg,
            config_file,
            no_cache,
            strict,
            timeout,
        } => {
            commands::build::handle_build(commands::build::BuildArgs {
                source,
                build_args: build_arg,
                config_file,
                no_cache,
                strict,
                timeout,
            })
            .await
        }
        Commands::Publish {
            source,
            tag,
            registry,
            repository,
            build_arg,
            config_file,
            no_cache,
            strict,
            timeout,
        } => {
            commands::publish::handle_publish(commands::publish::PublishArgs {
                source,
                tags: tag,
                registry,
                repository,
                build_args: build_arg,
                config_file,
                no_cache,
                strict,
                timeout,
            })
            .await
        }
        Commands::Validate => commands::validate::handle_validate(),
        Commands::Version => {
            println!("shipflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!();
        eprintln!("{} {}", "✗".red().bold(), e);

        // 失敗ステージごとに終了コードを分ける
        let code = e
            .downcast_ref::<pipeline::PipelineError>()
            .map(|p| p.stage.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}
