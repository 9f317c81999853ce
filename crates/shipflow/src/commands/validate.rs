use colored::Colorize;

/// 設定ファイルの検証
pub fn handle_validate() -> anyhow::Result<()> {
    let path = shipflow_config::find_pipeline_file()?;
    let pipeline = shipflow_core::parse_pipeline_file(&path)?;

    crate::utils::print_pipeline_header(&path, &pipeline);
    println!();
    println!("  パラメータ: {} 個", pipeline.params.len());
    println!("  ステップ: {} 個", pipeline.steps.len());
    if let Some(registry) = &pipeline.registry {
        println!("  レジストリ: {}", registry.cyan());
    }
    if !pipeline.volumes.is_empty() {
        println!("  ボリューム宣言: {}", pipeline.volumes.join(", "));
    }
    println!();
    println!("{}", "✓ 設定は有効です".green().bold());

    Ok(())
}
