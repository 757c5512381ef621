//! CLI `reembed` command: bring stored vectors in line with the configured model.

use anyhow::Result;

use anamnesis::Manager;

pub async fn re_embed(manager: &Manager) -> Result<()> {
    let providers = manager.providers();
    let Some(model) = providers.active_model() else {
        println!("No embedding provider configured; nothing to do.");
        return Ok(());
    };
    let model = model.to_string();

    let invalidated = manager.invalidate_stale_embeddings().await?;
    if invalidated > 0 {
        println!("Cleared {invalidated} vectors from other models.");
    }

    println!("Embedding memories with model '{model}'...");
    let embedded = manager.backfill_embeddings().await?;
    println!("Embedded {embedded} memories with model '{model}'.");
    Ok(())
}
