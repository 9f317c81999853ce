//! パイプライン定義

use crate::digest::Digest;
use crate::error::{CoreError, Result};
use crate::model::step::BuildStep;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// ビルドパラメータの宣言
///
/// KDL形式：
/// ```kdl
/// param "VERSION" required=#true
/// param "BASE_IMAGE" default="debian:bookworm-slim"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// ソースツリーの取り込みルール
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRules {
    /// 取り込むglobパターン（空なら全ファイル）
    #[serde(default)]
    pub include: Vec<String>,
    /// 除外するglobパターン
    #[serde(default)]
    pub exclude: Vec<String>,
    /// シンボリックリンクを許可するか（許可時はリンク先の内容を取り込む）
    #[serde(default)]
    pub allow_symlinks: bool,
}

impl Default for SourceRules {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            allow_symlinks: false,
        }
    }
}

/// パイプライン定義全体
///
/// `ship.kdl` のパース結果。パース後は読み取り専用で扱います。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    /// デフォルトのレジストリホスト（例: ghcr.io/acme）
    pub registry: Option<String>,
    /// レジストリ内のリポジトリ名
    pub repository: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub source: SourceRules,
    /// マウントボリュームとして宣言されたイメージ内パス
    #[serde(default)]
    pub volumes: Vec<String>,
    pub steps: Vec<BuildStep>,
}

impl Pipeline {
    /// 定義の静的検証
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidPipeline(
                "pipeline requires a name".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(CoreError::InvalidPipeline(format!(
                "pipeline '{}' has no build steps",
                self.name
            )));
        }

        let mut seen = BTreeSet::new();
        for param in &self.params {
            if !seen.insert(param.name.as_str()) {
                return Err(CoreError::InvalidPipeline(format!(
                    "duplicate param declaration: {}",
                    param.name
                )));
            }
            if param.required && param.default.is_some() {
                return Err(CoreError::InvalidPipeline(format!(
                    "param '{}' cannot be both required and defaulted",
                    param.name
                )));
            }
        }

        for step in &self.steps {
            if let BuildStep::Expose { port: 0 } = step {
                return Err(CoreError::InvalidPipeline(
                    "expose requires a non-zero port".to_string(),
                ));
            }
        }

        // 未宣言パラメータへの参照はここで弾く（ビルド前の安価な失敗）
        let declared: BTreeSet<_> = self.params.iter().map(|p| p.name.as_str()).collect();
        for (index, step) in self.steps.iter().enumerate() {
            for name in step.referenced_params() {
                if !declared.contains(name.as_str()) {
                    return Err(CoreError::InvalidPipeline(format!(
                        "step {} ({}) references undeclared param '{}'",
                        index,
                        step.kind(),
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// 全ステップが参照するパラメータ名の和集合
    pub fn referenced_params(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for step in &self.steps {
            out.extend(step.referenced_params());
        }
        out
    }

    /// ステップ列の正規化ダイジェスト（ビルドキャッシュキーの一部）
    pub fn steps_digest(&self) -> Digest {
        let mut builder = Digest::builder();
        for step in &self.steps {
            builder.update_field(step.canonical_json());
        }
        builder.finish()
    }
}

/// CIプラットフォームから受け取るトリガーイベント
///
/// Orchestratorが消費するだけで、パイプラインが生成することはありません。
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    /// ビルド対象のソースチェックアウト
    pub source_root: PathBuf,
    /// 明示的に与えられたビルド引数（最優先の設定ソース）
    pub build_args: HashMap<String, String>,
}

impl TriggerEvent {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            build_args: HashMap::new(),
        }
    }
}
