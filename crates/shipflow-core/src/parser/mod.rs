//! KDLパーサー
//!
//! Shipflowのパイプライン定義ファイル（ship.kdl）をパースします。
//! 各ノードタイプのパース処理はモジュールに分離されています。

mod source;
mod step;

use source::parse_source;
use step::parse_steps;

use crate::error::{CoreError, Result};
use crate::model::{ParamSpec, Pipeline};
use kdl::{KdlDocument, KdlNode};
use std::fs;
use std::path::Path;

/// KDLファイルをパースしてPipelineを生成
pub fn parse_pipeline_file<P: AsRef<Path>>(path: P) -> Result<Pipeline> {
    let content = fs::read_to_string(path.as_ref())?;
    let default_name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_pipeline_string(&content, default_name)
}

/// KDL文字列をパース
pub fn parse_pipeline_string(content: &str, default_name: String) -> Result<Pipeline> {
    let doc: KdlDocument = content.parse()?;

    // トップレベルは pipeline ノード1つ
    let pipeline_node = doc
        .nodes()
        .iter()
        .find(|n| n.name().value() == "pipeline")
        .ok_or_else(|| CoreError::InvalidPipeline("missing top-level pipeline node".to_string()))?;

    let mut pipeline = Pipeline {
        name: pipeline_node
            .entries()
            .first()
            .and_then(|e| e.value().as_string())
            .unwrap_or(&default_name)
            .to_string(),
        ..Default::default()
    };

    if let Some(children) = pipeline_node.children() {
        for node in children.nodes() {
            match node.name().value() {
                "registry" => {
                    pipeline.registry = node
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_string())
                        .map(|s| s.to_string());
                }
                "repository" => {
                    pipeline.repository = node
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_string())
                        .map(|s| s.to_string());
                }
                "param" => {
                    pipeline.params.push(parse_param(node)?);
                }
                "source" => {
                    pipeline.source = parse_source(node);
                }
                "volume" => {
                    if let Some(target) = node.entries().first().and_then(|e| e.value().as_string())
                    {
                        pipeline.volumes.push(target.to_string());
                    }
                }
                "steps" => {
                    if let Some(steps_doc) = node.children() {
                        pipeline.steps = parse_steps(steps_doc)?;
                    }
                }
                _ => {
                    // 不明なノードはスキップ（前方互換のため）
                }
            }
        }
    }

    pipeline.validate()?;
    tracing::debug!(
        pipeline = %pipeline.name,
        params = pipeline.params.len(),
        steps = pipeline.steps.len(),
        "Parsed pipeline definition"
    );
    Ok(pipeline)
}

/// param ノードをパース
///
/// `param "NAME" required=#true` / `param "NAME" default="value"`
fn parse_param(node: &KdlNode) -> Result<ParamSpec> {
    let name = node
        .entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| CoreError::InvalidPipeline("param requires a name".to_string()))?
        .to_string();

    let default = node
        .get("default")
        .and_then(|v| v.as_string())
        .map(|s| s.to_string());
    let required = node.get("required").and_then(|v| v.as_bool()).unwrap_or(false);

    Ok(ParamSpec {
        name,
        default,
        required,
    })
}
