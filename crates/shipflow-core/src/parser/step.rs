//! stepsノードのパース

use crate::error::{CoreError, Result};
use crate::model::BuildStep;
use kdl::{KdlDocument, KdlNode};

/// steps ブロックを宣言順にパース
pub fn parse_steps(doc: &KdlDocument) -> Result<Vec<BuildStep>> {
    let mut steps = Vec::new();
    for node in doc.nodes() {
        steps.push(parse_step(node)?);
    }
    Ok(steps)
}

fn parse_step(node: &KdlNode) -> Result<BuildStep> {
    match node.name().value() {
        "copy" => {
            let src = string_arg(node, 0)
                .ok_or_else(|| invalid(node, "copy requires a source path"))?;
            let dest = string_arg(node, 1)
                .ok_or_else(|| invalid(node, "copy requires a destination path"))?;
            Ok(BuildStep::Copy { src, dest })
        }
        "run" => {
            let command =
                string_arg(node, 0).ok_or_else(|| invalid(node, "run requires a command"))?;
            Ok(BuildStep::Run { command })
        }
        "env" => {
            let key = string_arg(node, 0).ok_or_else(|| invalid(node, "env requires a key"))?;
            let value =
                string_arg(node, 1).ok_or_else(|| invalid(node, "env requires a value"))?;
            Ok(BuildStep::Env { key, value })
        }
        "user" => {
            let name =
                string_arg(node, 0).ok_or_else(|| invalid(node, "user requires a name"))?;
            Ok(BuildStep::User { name })
        }
        "expose" => {
            let port = node
                .entries()
                .first()
                .and_then(|e| e.value().as_integer())
                .ok_or_else(|| invalid(node, "expose requires a port number"))?;
            let port = u16::try_from(port)
                .map_err(|_| invalid(node, "expose port must fit in 1-65535"))?;
            Ok(BuildStep::Expose { port })
        }
        "entrypoint" => {
            let argv = string_args(node);
            if argv.is_empty() {
                return Err(invalid(node, "entrypoint requires at least one argument"));
            }
            Ok(BuildStep::Entrypoint { argv })
        }
        "cmd" => {
            let argv = string_args(node);
            if argv.is_empty() {
                return Err(invalid(node, "cmd requires at least one argument"));
            }
            Ok(BuildStep::Cmd { argv })
        }
        "workdir" => {
            let path =
                string_arg(node, 0).ok_or_else(|| invalid(node, "workdir requires a path"))?;
            Ok(BuildStep::Workdir { path })
        }
        other => Err(CoreError::InvalidPipeline(format!(
            "unknown build step: {}",
            other
        ))),
    }
}

fn string_arg(node: &KdlNode, index: usize) -> Option<String> {
    node.entries()
        .get(index)
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
        .collect()
}

fn invalid(node: &KdlNode, message: &str) -> CoreError {
    CoreError::InvalidPipeline(format!("{} ({})", message, node.name().value()))
}
