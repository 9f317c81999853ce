//! デフォルト値ファイルの読み込み
//!
//! `--config-file` で渡される任意のKDLファイル。パラメータ名から
//! デフォルト値へのマッピングだけを持ちます。
//!
//! ```kdl
//! defaults {
//!     BASE_IMAGE "alpine:3.20"
//!     FEATURES "tls"
//! }
//! ```

use crate::error::{ConfigError, Result};
use kdl::KdlDocument;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// デフォルト値ファイルをパース
pub fn load_defaults_file<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let content = fs::read_to_string(path.as_ref())?;
    parse_defaults(&content)
}

/// デフォルト値ドキュメントをパース
pub fn parse_defaults(content: &str) -> Result<HashMap<String, String>> {
    let doc: KdlDocument = content.parse()?;

    let defaults_node = doc
        .nodes()
        .iter()
        .find(|n| n.name().value() == "defaults")
        .ok_or_else(|| ConfigError::InvalidDefaults("missing defaults node".to_string()))?;

    let mut values = HashMap::new();
    if let Some(children) = defaults_node.children() {
        for node in children.nodes() {
            let key = node.name().value().to_string();
            let value = node
                .entries()
                .first()
                .and_then(|e| e.value().as_string())
                .ok_or_else(|| {
                    ConfigError::InvalidDefaults(format!("'{}' requires a string value", key))
                })?
                .to_string();
            values.insert(key, value);
        }
    }

    Ok(values)
}
