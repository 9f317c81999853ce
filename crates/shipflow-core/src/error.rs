use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("無効なパイプライン定義: {0}")]
    InvalidPipeline(String),

    #[error("無効なダイジェスト: {0}")]
    InvalidDigest(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
