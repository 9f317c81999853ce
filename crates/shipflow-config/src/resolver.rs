//! ビルドパラメータの解決
//!
//! 宣言済みパラメータ（ParamSpec）と複数のソースから、単一の不変な
//! ResolvedConfigを生成します。解決は純粋で、同じ入力には常に同じ
//! 結果を返します。

use crate::error::{ConfigError, Result};
use shipflow_core::digest::Digest;
use shipflow_core::model::ParamSpec;
use std::collections::{BTreeMap, HashMap};

/// パラメータ値の候補ソース
///
/// 優先順位: 明示的なビルド引数 > 環境変数 > デフォルト値ファイル > 宣言時デフォルト
///
/// 環境変数はマップとして受け取る（プロセス環境を直接読まない）ため、
/// 解決は副作用なしで何度でも呼べます。
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// `--build-arg KEY=VALUE` 相当の明示的引数
    pub args: HashMap<String, String>,
    /// 環境変数のスナップショット
    pub env: HashMap<String, String>,
    /// デフォルト値ファイル（--config-file）の内容
    pub file_defaults: HashMap<String, String>,
    /// 宣言されていないキーをエラーにする
    pub strict: bool,
}

impl ConfigSources {
    /// プロセス環境を取り込んだソースを作成
    pub fn from_process_env() -> Self {
        Self {
            env: std::env::vars().collect(),
            ..Default::default()
        }
    }
}

/// 解決済みのビルド設定
///
/// 生成後は読み取り専用。内部はBTreeMapなので、イテレーション順と
/// ダイジェストは常に安定します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    values: BTreeMap<String, String>,
}

impl ResolvedConfig {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 指定した名前集合に対応する部分集合の正規化ダイジェスト
    ///
    /// レイヤーアドレスとビルドキャッシュキーの入力になります。
    /// 名前はソートして処理するため、呼び出し側の順序に依存しません。
    pub fn subset_digest<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Digest {
        let mut sorted: Vec<&str> = names.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut builder = Digest::builder();
        for name in sorted {
            builder.update_field(name);
            builder.update_field(self.values.get(name).map(|s| s.as_str()).unwrap_or(""));
        }
        builder.finish()
    }
}

/// パラメータを解決してResolvedConfigを生成
pub fn resolve(specs: &[ParamSpec], sources: &ConfigSources) -> Result<ResolvedConfig> {
    if sources.strict {
        reject_unknown(specs, sources)?;
    }

    let mut values = BTreeMap::new();
    for spec in specs {
        let value = sources
            .args
            .get(&spec.name)
            .or_else(|| sources.env.get(&spec.name))
            .or_else(|| sources.file_defaults.get(&spec.name))
            .cloned()
            .or_else(|| spec.default.clone());

        match value {
            Some(value) => {
                values.insert(spec.name.clone(), value);
            }
            None if spec.required => {
                return Err(ConfigError::MissingRequiredParameter {
                    name: spec.name.clone(),
                });
            }
            None => {
                // 任意パラメータで値なし: 設定に含めない
                // （{NAME} 参照があればビルド時にVariableNotFoundになる）
            }
        }
    }

    Ok(ResolvedConfig { values })
}

/// strictモード: 宣言されていないキーを持つソースを拒否
///
/// 環境変数は対象外（プロセス環境には常に無関係なキーが含まれるため、
/// 明示的引数とデフォルト値ファイルのみ検査する）。
fn reject_unknown(specs: &[ParamSpec], sources: &ConfigSources) -> Result<()> {
    for key in sources.args.keys().chain(sources.file_defaults.keys()) {
        if !specs.iter().any(|s| &s.name == key) {
            return Err(ConfigError::UnknownParameter { name: key.clone() });
        }
    }
    Ok(())
}

/// テンプレート文字列の変数展開
///
/// `{NAME}` を解決済みの値に置換します。未解決の参照はエラー。
pub fn expand(template: &str, config: &ResolvedConfig) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(close) = template[i + 1..].find('}') {
                let name = &template[i + 1..i + 1 + close];
                if is_param_name(name) {
                    match config.get(name) {
                        Some(value) => {
                            result.push_str(value);
                            i += close + 2;
                            continue;
                        }
                        None => {
                            return Err(ConfigError::VariableNotFound {
                                name: name.to_string(),
                            });
                        }
                    }
                }
            }
        }
        // 次のUTF-8文字をそのままコピー
        let ch = template[i..].chars().next().expect("index is on a char boundary");
        result.push(ch);
        i += ch.len_utf8();
    }

    Ok(result)
}

fn is_param_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// ビルド引数の検証（機密情報の警告）
///
/// ビルド引数はレイヤーアドレスの入力に含まれるため、機密情報を
/// 渡すべきではありません。
pub fn warn_sensitive_args(args: &HashMap<String, String>) {
    let sensitive_patterns = ["password", "token", "secret", "api_key", "private_key"];

    for key in args.keys() {
        let key_lower = key.to_lowercase();
        for pattern in &sensitive_patterns {
            if key_lower.contains(pattern) {
                tracing::warn!(
                    "警告: ビルド引数 '{}' は機密情報を含む可能性があります。\n\
                     ビルド引数はイメージのアドレス計算に使用されます。\n\
                     機密情報はビルド引数ではなく、レジストリ認証と同様のシークレット源を使用してください。",
                    key
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec {
                name: "VERSION".to_string(),
                default: None,
                required: true,
            },
            ParamSpec {
                name: "BASE_IMAGE".to_string(),
                default: Some("debian:bookworm-slim".to_string()),
                required: false,
            },
            ParamSpec {
                name: "FEATURES".to_string(),
                default: None,
                required: false,
            },
        ]
    }

    #[test]
    fn test_resolve_precedence_arg_over_env() {
        let mut sources = ConfigSources::default();
        sources.args.insert("VERSION".to_string(), "from-arg".to_string());
        sources.env.insert("VERSION".to_string(), "from-env".to_string());
        sources
            .file_defaults
            .insert("VERSION".to_string(), "from-file".to_string());

        let config = resolve(&specs(), &sources).unwrap();
        assert_eq!(config.get("VERSION"), Some("from-arg"));
    }

    #[test]
    fn test_resolve_precedence_env_over_file() {
        let mut sources = ConfigSources::default();
        sources.env.insert("VERSION".to_string(), "from-env".to_string());
        sources
            .file_defaults
            .insert("VERSION".to_string(), "from-file".to_string());

        let config = resolve(&specs(), &sources).unwrap();
        assert_eq!(config.get("VERSION"), Some("from-env"));
    }

    #[test]
    fn test_resolve_precedence_file_over_declared_default() {
        let mut sources = ConfigSources::default();
        sources.env.insert("VERSION".to_string(), "1.0".to_string());
        sources
            .file_defaults
            .insert("BASE_IMAGE".to_string(), "alpine:3.20".to_string());

        let config = resolve(&specs(), &sources).unwrap();
        assert_eq!(config.get("BASE_IMAGE"), Some("alpine:3.20"));
    }

    #[test]
    fn test_resolve_declared_default() {
        let mut sources = ConfigSources::default();
        sources.env.insert("VERSION".to_string(), "1.0".to_string());

        let config = resolve(&specs(), &sources).unwrap();
        assert_eq!(config.get("BASE_IMAGE"), Some("debian:bookworm-slim"));
    }

    #[test]
    fn test_resolve_missing_required() {
        let sources = ConfigSources::default();
        let err = resolve(&specs(), &sources).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequiredParameter { name } if name == "VERSION"
        ));
    }

    #[test]
    fn test_resolve_optional_without_value_is_absent() {
        let mut sources = ConfigSources::default();
        sources.env.insert("VERSION".to_string(), "1.0".to_string());

        let config = resolve(&specs(), &sources).unwrap();
        assert_eq!(config.get("FEATURES"), None);
        assert_eq!(config.len(), 2);
    }

    #[test]
    fn test_resolve_unknown_key_ignored_by_default() {
        let mut sources = ConfigSources::default();
        sources.env.insert("VERSION".to_string(), "1.0".to_string());
        sources
            .args
            .insert("TYPO_PARAM".to_string(), "x".to_string());

        assert!(resolve(&specs(), &sources).is_ok());
    }

    #[test]
    fn test_resolve_strict_rejects_unknown_arg() {
        let mut sources = ConfigSources::default();
        sources.strict = true;
        sources.env.insert("VERSION".to_string(), "1.0".to_string());
        sources
            .args
            .insert("TYPO_PARAM".to_string(), "x".to_string());

        let err = resolve(&specs(), &sources).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownParameter { name } if name == "TYPO_PARAM"
        ));
    }

    #[test]
    fn test_resolve_strict_ignores_unknown_env() {
        let mut sources = ConfigSources::default();
        sources.strict = true;
        sources.env.insert("VERSION".to_string(), "1.0".to_string());
        sources.env.insert("HOME".to_string(), "/root".to_string());

        assert!(resolve(&specs(), &sources).is_ok());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let mut sources = ConfigSources::default();
        sources.env.insert("VERSION".to_string(), "1.0".to_string());
        sources
            .args
            .insert("FEATURES".to_string(), "tls,json".to_string());

        let first = resolve(&specs(), &sources).unwrap();
        let second = resolve(&specs(), &sources).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.subset_digest(["VERSION", "FEATURES"]),
            second.subset_digest(["FEATURES", "VERSION"])
        );
    }

    #[test]
    fn test_subset_digest_changes_with_value() {
        let mut sources = ConfigSources::default();
        sources.env.insert("VERSION".to_string(), "1.0".to_string());
        let first = resolve(&specs(), &sources).unwrap();

        sources.env.insert("VERSION".to_string(), "2.0".to_string());
        let second = resolve(&specs(), &sources).unwrap();

        assert_ne!(
            first.subset_digest(["VERSION"]),
            second.subset_digest(["VERSION"])
        );
        // VERSIONを含まない部分集合は影響を受けない
        assert_eq!(
            first.subset_digest(["BASE_IMAGE"]),
            second.subset_digest(["BASE_IMAGE"])
        );
    }

    #[test]
    fn test_expand() {
        let mut sources = ConfigSources::default();
        sources.env.insert("VERSION".to_string(), "2.1".to_string());
        let config = resolve(&specs(), &sources).unwrap();

        let result = expand("build VERSION={VERSION} base={BASE_IMAGE}", &config).unwrap();
        assert_eq!(result, "build VERSION=2.1 base=debian:bookworm-slim");
    }

    #[test]
    fn test_expand_unknown_variable() {
        let mut sources = ConfigSources::default();
        sources.env.insert("VERSION".to_string(), "2.1".to_string());
        let config = resolve(&specs(), &sources).unwrap();

        let err = expand("echo {NOPE}", &config).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::VariableNotFound { name } if name == "NOPE"
        ));
    }

    #[test]
    fn test_expand_leaves_non_name_braces() {
        let mut sources = ConfigSources::default();
        sources.env.insert("VERSION".to_string(), "2.1".to_string());
        let config = resolve(&specs(), &sources).unwrap();

        let result = expand("awk '{print $1}' v{VERSION}", &config).unwrap();
        assert_eq!(result, "awk '{print $1}' v2.1");
    }
}
