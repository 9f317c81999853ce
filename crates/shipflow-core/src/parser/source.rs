//! sourceノードのパース

use crate::model::SourceRules;
use kdl::KdlNode;

/// source ノードをパース
///
/// ```kdl
/// source {
///     include "src/**"
///     exclude "target/**"
///     allow-symlinks #true
/// }
/// ```
pub fn parse_source(node: &KdlNode) -> SourceRules {
    let mut rules = SourceRules::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "include" => {
                    for entry in child.entries() {
                        if let Some(pattern) = entry.value().as_string() {
                            rules.include.push(pattern.to_string());
                        }
                    }
                }
                "exclude" => {
                    for entry in child.entries() {
                        if let Some(pattern) = entry.value().as_string() {
                            rules.exclude.push(pattern.to_string());
                        }
                    }
                }
                // allow_symlinks も受け付ける（KDL v2移行前の定義との互換）
                "allow-symlinks" | "allow_symlinks" => {
                    if let Some(value) = child.entries().first().and_then(|e| e.value().as_bool()) {
                        rules.allow_symlinks = value;
                    }
                }
                _ => {}
            }
        }
    }

    rules
}
