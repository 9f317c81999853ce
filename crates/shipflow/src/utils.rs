use colored::Colorize;
use shipflow_build::BuildWarning;
use shipflow_core::model::Pipeline;
use std::collections::HashMap;
use std::path::Path;

/// 読み込んだパイプライン定義の情報を表示
pub fn print_pipeline_header(path: &Path, pipeline: &Pipeline) {
    println!("設定ファイル: {}", path.display().to_string().cyan());
    println!("パイプライン: {}", pipeline.name.cyan());
}

/// ビルド警告を表示
pub fn print_warnings(warnings: &[BuildWarning]) {
    for warning in warnings {
        println!("  {} {}", "⚠".yellow(), warning);
    }
}

/// `KEY=VALUE` 形式のビルド引数をパース
pub fn parse_build_args(args: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for arg in args {
        let (key, value) = arg.split_once('=').ok_or_else(|| {
            anyhow::anyhow!("ビルド引数は KEY=VALUE 形式で指定してください: {}", arg)
        })?;
        out.insert(key.trim().to_string(), value.to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_args() {
        let args = vec![
            "VERSION=1.0".to_string(),
            "FEATURES=tls,json".to_string(),
        ];
        let parsed = parse_build_args(&args).unwrap();
        assert_eq!(parsed.get("VERSION").unwrap(), "1.0");
        assert_eq!(parsed.get("FEATURES").unwrap(), "tls,json");
    }

    #[test]
    fn test_parse_build_args_value_may_contain_equals() {
        let args = vec!["FLAGS=-C opt-level=3".to_string()];
        let parsed = parse_build_args(&args).unwrap();
        assert_eq!(parsed.get("FLAGS").unwrap(), "-C opt-level=3");
    }

    #[test]
    fn test_parse_build_args_rejects_missing_equals() {
        let args = vec!["VERSION".to_string()];
        assert!(parse_build_args(&args).is_err());
    }
}
