use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use anamnesis::ingest::IngestReport;
use anamnesis::Manager;

use super::ctrl_c_token;

#[derive(Subcommand)]
pub enum IngestTarget {
    /// Text files under a directory, filtered by the configured globs
    Files { root: PathBuf },
    /// `*.jsonl` chat transcripts in a directory
    Transcripts { dir: PathBuf },
}

pub async fn ingest(manager: &Manager, target: IngestTarget) -> Result<()> {
    let cancel = ctrl_c_token();
    let report = match target {
        IngestTarget::Files { root } => {
            println!("Ingesting files under {}...", root.display());
            manager.ingest_files(root, cancel).await?
        }
        IngestTarget::Transcripts { dir } => {
            println!("Ingesting transcripts in {}...", dir.display());
            manager.ingest_transcripts(dir, cancel).await?
        }
    };
    print_report(&report);
    Ok(())
}

fn print_report(report: &IngestReport) {
    println!("  Scanned:             {}", report.scanned);
    println!("  Skipped (unchanged): {}", report.skipped);
    println!("  Extracted:           {}", report.extracted);
    println!("  Memories created:    {}", report.memories_created);
    println!("  Errored:             {}", report.errored);
    if report.cancelled {
        println!("Cancelled; unprocessed items will be picked up next run.");
    } else {
        println!("Ingestion complete.");
    }
}
