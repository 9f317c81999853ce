//! ビルドステップ定義

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// ビルドステップ
///
/// KDL形式：
/// ```kdl
/// steps {
///     copy "src" "/app/src"
///     run "make build VERSION={VERSION}"
///     env "RUST_LOG" "info"
///     user "nonroot"
///     expose 5000
///     entrypoint "/app/bin/server"
/// }
/// ```
///
/// ステップは宣言順に実行されます。serialize結果はレイヤーアドレスの
/// 入力になるため、フィールドの追加・改名はダイジェスト互換性を壊します。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum BuildStep {
    /// スナップショット内のパスをイメージ内パスへコピー
    Copy { src: String, dest: String },
    /// シェルコマンドを実行
    Run { command: String },
    /// 環境変数を設定（メタデータのみ）
    Env { key: String, value: String },
    /// 実行ユーザーを設定（メタデータのみ）
    User { name: String },
    /// 公開ポートを宣言（メタデータのみ）
    Expose { port: u16 },
    /// エントリポイントを設定（メタデータのみ）
    Entrypoint { argv: Vec<String> },
    /// デフォルトコマンドを設定（メタデータのみ）
    Cmd { argv: Vec<String> },
    /// 作業ディレクトリを設定（メタデータのみ）
    Workdir { path: String },
}

impl BuildStep {
    /// 表示用のステップ種別名
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Copy { .. } => "copy",
            Self::Run { .. } => "run",
            Self::Env { .. } => "env",
            Self::User { .. } => "user",
            Self::Expose { .. } => "expose",
            Self::Entrypoint { .. } => "entrypoint",
            Self::Cmd { .. } => "cmd",
            Self::Workdir { .. } => "workdir",
        }
    }

    /// ファイルシステムに書き込む可能性のあるステップか
    pub fn writes_filesystem(&self) -> bool {
        matches!(self, Self::Copy { .. } | Self::Run { .. })
    }

    /// レイヤーアドレス計算に使う正規化JSON
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).expect("BuildStep serialization cannot fail")
    }

    /// ステップが参照するパラメータ名（`{NAME}` プレースホルダ）
    pub fn referenced_params(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        match self {
            Self::Copy { src, dest } => {
                collect_placeholders(src, &mut out);
                collect_placeholders(dest, &mut out);
            }
            Self::Run { command } => collect_placeholders(command, &mut out),
            Self::Env { key, value } => {
                collect_placeholders(key, &mut out);
                collect_placeholders(value, &mut out);
            }
            Self::User { name } => collect_placeholders(name, &mut out),
            Self::Expose { .. } => {}
            Self::Entrypoint { argv } | Self::Cmd { argv } => {
                for arg in argv {
                    collect_placeholders(arg, &mut out);
                }
            }
            Self::Workdir { path } => collect_placeholders(path, &mut out),
        }
        out
    }
}

/// `{NAME}` 形式のプレースホルダを収集
///
/// NAMEは `[A-Za-z_][A-Za-z0-9_]*` のみ。`{1.0}` のような波括弧は無視する。
fn collect_placeholders(text: &str, out: &mut BTreeSet<String>) {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end] != b'}' {
                end += 1;
            }
            if end < bytes.len() && end > start {
                let candidate = &text[start..end];
                if is_param_name(candidate) {
                    out.insert(candidate.to_string());
                }
            }
            i = end;
        }
        i += 1;
    }
}

fn is_param_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
