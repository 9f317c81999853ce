use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("ソースディレクトリが見つかりません: {0}")]
    SourceRootNotFound(PathBuf),

    #[error("サポートされないファイル種別です: {path}\nシンボリックリンクを取り込む場合は allow-symlinks #true を指定してください")]
    UnsupportedFileType { path: PathBuf },

    #[error("スナップショットにファイルが1つも含まれていません")]
    EmptySnapshot,

    #[error("無効なglobパターン: {pattern}\n理由: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("ビルドステップ {step_index} が失敗しました: {reason}")]
    BuildStepFailed { step_index: usize, reason: String },

    #[error("設定エラー: {0}")]
    Config(#[from] shipflow_config::ConfigError),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
