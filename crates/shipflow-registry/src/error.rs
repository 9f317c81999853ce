use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("レジストリ {registry} の認証情報が見つかりません")]
    CredentialNotFound { registry: String },

    #[error("レジストリ {registry} の認証情報の解決がタイムアウトしました")]
    CredentialTimeout { registry: String },

    #[error("認証エラー: {registry}\n理由: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("無効なタグ: {tag}")]
    InvalidTag { tag: String },

    #[error("タグ {tag} のプッシュに失敗しました: {cause}")]
    PublishFailed { tag: String, cause: String },

    #[error("レジストリ通信エラー: {message}")]
    Transport { message: String, transient: bool },

    #[error("公開記録の読み書きに失敗しました: {0}")]
    RecordStore(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// リトライで回復しうる一時的なエラーか
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { transient: true, .. })
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
