//! CLI maintenance commands: a single `maintain` pass and the long-running
//! `daemon` loop.

use std::sync::Arc;

use anyhow::Result;

use anamnesis::memory::maintenance::MaintenanceReport;
use anamnesis::Manager;

fn print_report(report: &MaintenanceReport) {
    println!("  Importance decayed:  {}", report.importance_decayed);
    println!("  Confidence decayed:  {}", report.confidence_decayed);
    println!("  Boosted:             {}", report.boosted);
    println!("  Forgotten:           {}", report.forgotten);
    println!("  Purged:              {}", report.purged);
    println!("  Triggers updated:    {}", report.triggers_updated);
    println!("  Duplicates merged:   {}", report.merged);
}

/// Run every maintenance pass once.
pub async fn maintain(manager: &Manager) -> Result<()> {
    println!("Running maintenance...");
    let report = manager.run_maintenance().await?;
    print_report(&report);
    println!("Maintenance complete.");
    Ok(())
}

/// Run the maintenance loop on the configured interval until Ctrl-C.
pub async fn daemon(manager: Manager) -> Result<()> {
    let manager = Arc::new(manager);
    if !manager.config().maintenance.enabled {
        println!("Maintenance is disabled in config; nothing to do.");
        return Ok(());
    }

    let handle = manager.start_maintenance();
    println!(
        "Maintenance loop running every {}h. Press Ctrl-C to stop.",
        manager.config().maintenance.interval_hours.max(1)
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    handle.stop().await;
    manager.close();
    Ok(())
}
