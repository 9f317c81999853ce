use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "パイプライン定義ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: ship.kdl, ship.local.kdl, .ship.kdl, .ship.local.kdl\n\
        - ./.shipflow/ ディレクトリ\n\
        - ~/.config/shipflow/ship.kdl\n\
        または SHIP_CONFIG_PATH 環境変数で直接指定できます"
    )]
    PipelineFileNotFound,

    #[error("状態ディレクトリが見つかりません")]
    StateDirNotFound,

    #[error("必須パラメータ '{name}' の値がどのソースにもありません")]
    MissingRequiredParameter { name: String },

    #[error("宣言されていないパラメータ: {name}")]
    UnknownParameter { name: String },

    #[error("未解決の変数参照: {name}")]
    VariableNotFound { name: String },

    #[error("デフォルト値ファイルが不正です: {0}")]
    InvalidDefaults(String),

    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
