//! CLI `doctor` command: database diagnostics and provider status.

use anyhow::{Context, Result};

use anamnesis::Manager;

pub async fn doctor(manager: &Manager) -> Result<()> {
    let config = manager.config();
    let db_path = config.resolved_db_path();
    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let report = manager.health().await.context("failed to run health check")?;
    let providers = manager.providers();

    println!("Anamnesis Health Report");
    println!("=======================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("sqlite-vec:        {}", report.sqlite_vec_version);
    println!();
    println!("Providers:");
    println!(
        "  Embedding:       {}",
        providers.active_model().unwrap_or("(disabled)")
    );
    println!(
        "  Extraction LLM:  {}",
        providers.chat.as_ref().map(|c| c.model()).unwrap_or("(disabled)")
    );
    println!();
    println!("Row counts:");
    println!("  Memories:        {}", report.memory_count);
    println!("  Associations:    {}", report.association_count);
    println!("  Ingested items:  {}", report.ingestion_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery: restore {} from a backup.", db_path.display());
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
