pub mod defaults;
pub mod error;
pub mod resolver;

pub use defaults::{load_defaults_file, parse_defaults};
pub use error::*;
pub use resolver::{ConfigSources, ResolvedConfig, expand, resolve, warn_sensitive_args};

use std::path::PathBuf;

/// Shipflowの状態ディレクトリ（ビルドキャッシュ・公開記録）を取得
pub fn get_state_dir() -> Result<PathBuf> {
    let state_dir = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .ok_or(ConfigError::StateDirNotFound)?
        .join("shipflow");

    if !state_dir.exists() {
        std::fs::create_dir_all(&state_dir)?;
    }

    Ok(state_dir)
}

/// プロジェクトのship.kdlファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 SHIP_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: ship.local.kdl, .ship.local.kdl, ship.kdl, .ship.kdl
/// 3. ./.shipflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/shipflow/ship.kdl (グローバル設定)
pub fn find_pipeline_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var("SHIP_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    let candidates = ["ship.local.kdl", ".ship.local.kdl", "ship.kdl", ".ship.kdl"];

    // 2. カレントディレクトリで検索
    for filename in &candidates {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. ./.shipflow/ ディレクトリで検索
    let ship_dir = current_dir.join(".shipflow");
    if ship_dir.is_dir() {
        for filename in &candidates {
            let path = ship_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    // 4. グローバル設定ファイル (~/.config/shipflow/ship.kdl)
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("shipflow").join("ship.kdl");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    // どの設定ファイルも見つからなかった
    Err(ConfigError::PipelineFileNotFound)
}
