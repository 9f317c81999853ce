//! レジストリ認証処理
//!
//! レジストリホストに対応する認証情報をシークレット源から解決します。
//! 認証情報はプロセス全体で保持せず、resolve() のたびに読み直して
//! 呼び出し元のプッシュ1回分の間だけメモリに置きます。
//!
//! ## シークレット源（優先順）
//!
//! 1. SHIPFLOW_REGISTRY_USERNAME / SHIPFLOW_REGISTRY_PASSWORD 環境変数
//! 2. docker互換 config.json の auths エントリ
//! 3. config.json の credsStore が指す credential helper
//!
//! ビルド設定やスナップショットからは決して読みません。

use crate::error::{RegistryError, RegistryResult};
use base64::Engine;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// 1レジストリ分の認証情報
///
/// secretはsecrecyでラップされているため、Debug出力やログに
/// 平文が現れることはありません。
#[derive(Debug)]
pub struct Credential {
    pub username: String,
    pub secret: SecretString,
    /// この認証情報が有効なレジストリホスト
    pub registry: String,
}

/// docker互換 config.json の構造
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthConfig {
    /// 認証情報 (レジストリ -> AuthEntry)
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    /// credential helper 名 (例: "osxkeychain", "desktop")
    #[serde(default)]
    creds_store: Option<String>,
}

/// 認証エントリ
#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
}

/// credential helper からのレスポンス
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// レジストリ認証情報を解決するブローカー
#[derive(Debug)]
pub struct CredentialBroker {
    config_path: PathBuf,
    /// credential helper呼び出しのタイムアウト
    helper_timeout: Duration,
}

impl Default for CredentialBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialBroker {
    /// 新しい CredentialBroker を作成
    ///
    /// デフォルトで ~/.docker/config.json を使用
    pub fn new() -> Self {
        let config_path = std::env::var("SHIPFLOW_AUTH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
                    .join("config.json")
            });

        Self {
            config_path,
            helper_timeout: Duration::from_secs(10),
        }
    }

    /// 指定したパスの config.json を使用
    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self {
            config_path,
            helper_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_helper_timeout(mut self, timeout: Duration) -> Self {
        self.helper_timeout = timeout;
        self
    }

    /// レジストリホストの認証情報を解決
    ///
    /// 毎回シークレット源から読み直す。結果をキャッシュしないこと自体が
    /// 契約で、呼び出し元はpush 1回分の間だけ保持して破棄する。
    pub async fn resolve(&self, registry: &str) -> RegistryResult<Credential> {
        // 1. 環境変数ペア
        if let (Ok(username), Ok(password)) = (
            std::env::var("SHIPFLOW_REGISTRY_USERNAME"),
            std::env::var("SHIPFLOW_REGISTRY_PASSWORD"),
        ) {
            tracing::debug!(registry, "Using credentials from environment");
            return Ok(Credential {
                username,
                secret: SecretString::from(password),
                registry: registry.to_string(),
            });
        }

        // 2. config.json の auths セクション
        if self.config_path.exists() {
            let config = self.load_auth_config()?;

            if let Some(entry) = config.auths.get(registry)
                && let Some(auth_b64) = &entry.auth
                && let Some(credential) = self.decode_auth(auth_b64, registry)?
            {
                tracing::debug!(registry, "Found credentials in auths");
                return Ok(credential);
            }

            // 3. credential helper
            if let Some(helper) = &config.creds_store {
                tracing::debug!(registry, helper, "Trying credential helper");
                if let Some(credential) = self.resolve_from_helper(helper, registry).await? {
                    return Ok(credential);
                }
            }
        } else {
            tracing::debug!(path = %self.config_path.display(), "Auth config not found");
        }

        Err(RegistryError::CredentialNotFound {
            registry: registry.to_string(),
        })
    }

    /// config.json を読み込み
    fn load_auth_config(&self) -> RegistryResult<AuthConfig> {
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|e| RegistryError::AuthFailed {
                registry: self.config_path.display().to_string(),
                message: format!("Failed to read config.json: {}", e),
            })?;

        serde_json::from_str(&content).map_err(|e| RegistryError::AuthFailed {
            registry: self.config_path.display().to_string(),
            message: format!("Failed to parse config.json: {}", e),
        })
    }

    /// Base64エンコードされた認証情報をデコード
    fn decode_auth(&self, auth_b64: &str, registry: &str) -> RegistryResult<Option<Credential>> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth_b64)
            .map_err(|e| RegistryError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Failed to decode auth: {}", e),
            })?;

        let auth_str = String::from_utf8(decoded).map_err(|e| RegistryError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Invalid UTF-8 in auth: {}", e),
        })?;

        if let Some((username, password)) = auth_str.split_once(':') {
            Ok(Some(Credential {
                username: username.to_string(),
                secret: SecretString::from(password.to_string()),
                registry: registry.to_string(),
            }))
        } else {
            Ok(None)
        }
    }

    /// credential helper から認証情報を取得
    ///
    /// 外部プロセスに依存するためタイムアウトで打ち切り、
    /// 超過は CredentialTimeout として返す。
    async fn resolve_from_helper(
        &self,
        helper: &str,
        registry: &str,
    ) -> RegistryResult<Option<Credential>> {
        let helper_cmd = format!("docker-credential-{}", helper);

        let mut child = tokio::process::Command::new(&helper_cmd)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RegistryError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Failed to run {}: {}", helper_cmd, e),
            })?;

        // レジストリ名を stdin に渡す
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(registry.as_bytes()).await.ok();
        }

        let output = tokio::time::timeout(self.helper_timeout, child.wait_with_output())
            .await
            .map_err(|_| RegistryError::CredentialTimeout {
                registry: registry.to_string(),
            })?
            .map_err(|e| RegistryError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Credential helper failed: {}", e),
            })?;

        if !output.status.success() {
            // helperが認証情報を持っていない場合はNoneを返す
            tracing::debug!(
                registry,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Credential helper returned error"
            );
            return Ok(None);
        }

        let response: CredentialResponse =
            serde_json::from_slice(&output.stdout).map_err(|e| RegistryError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Failed to parse credential helper response: {}", e),
            })?;

        Ok(Some(Credential {
            username: response.username,
            secret: SecretString::from(response.secret),
            registry: registry.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;

    #[test]
    fn test_credential_debug_redacts_secret() {
        let credential = Credential {
            username: "user".to_string(),
            secret: SecretString::from("hunter2".to_string()),
            registry: "ghcr.io".to_string(),
        };
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_resolve_from_env() {
        temp_env::async_with_vars(
            [
                ("SHIPFLOW_REGISTRY_USERNAME", Some("ci-bot")),
                ("SHIPFLOW_REGISTRY_PASSWORD", Some("env-secret")),
            ],
            async {
                let broker =
                    CredentialBroker::with_config_path(PathBuf::from("/nonexistent/config.json"));
                let credential = broker.resolve("ghcr.io").await.unwrap();
                assert_eq!(credential.username, "ci-bot");
                assert_eq!(credential.secret.expose_secret(), "env-secret");
                assert_eq!(credential.registry, "ghcr.io");
            },
        )
        .await;
    }

    #[tokio::test]
    async fn test_resolve_from_config_json() {
        temp_env::async_with_vars(
            [
                ("SHIPFLOW_REGISTRY_USERNAME", None::<&str>),
                ("SHIPFLOW_REGISTRY_PASSWORD", None),
            ],
            async {
                let temp_dir = tempfile::tempdir().unwrap();
                let config_path = temp_dir.path().join("config.json");

                // base64("robot:tokenvalue")
                let auth = base64::engine::general_purpose::STANDARD.encode("robot:tokenvalue");
                fs::write(
                    &config_path,
                    format!(r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}}}}}"#, auth),
                )
                .unwrap();

                let broker = CredentialBroker::with_config_path(config_path);
                let credential = broker.resolve("ghcr.io").await.unwrap();
                assert_eq!(credential.username, "robot");
                assert_eq!(credential.secret.expose_secret(), "tokenvalue");
            },
        )
        .await;
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        temp_env::async_with_vars(
            [
                ("SHIPFLOW_REGISTRY_USERNAME", None::<&str>),
                ("SHIPFLOW_REGISTRY_PASSWORD", None),
            ],
            async {
                let broker =
                    CredentialBroker::with_config_path(PathBuf::from("/nonexistent/config.json"));
                let result = broker.resolve("ghcr.io").await;
                assert!(matches!(
                    result,
                    Err(RegistryError::CredentialNotFound { registry }) if registry == "ghcr.io"
                ));
            },
        )
        .await;
    }

    #[tokio::test]
    async fn test_resolve_fresh_every_call() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("config.json");

        temp_env::async_with_vars(
            [
                ("SHIPFLOW_REGISTRY_USERNAME", None::<&str>),
                ("SHIPFLOW_REGISTRY_PASSWORD", None),
            ],
            async {
                let first_auth = base64::engine::general_purpose::STANDARD.encode("robot:first");
                fs::write(
                    &config_path,
                    format!(r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}}}}}"#, first_auth),
                )
                .unwrap();

                let broker = CredentialBroker::with_config_path(config_path.clone());
                let first = broker.resolve("ghcr.io").await.unwrap();
                assert_eq!(first.secret.expose_secret(), "first");

                // シークレット源が更新されたら次のresolveは新しい値を返す
                let second_auth = base64::engine::general_purpose::STANDARD.encode("robot:second");
                fs::write(
                    &config_path,
                    format!(r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}}}}}"#, second_auth),
                )
                .unwrap();

                let second = broker.resolve("ghcr.io").await.unwrap();
                assert_eq!(second.secret.expose_secret(), "second");
            },
        )
        .await;
    }
}
