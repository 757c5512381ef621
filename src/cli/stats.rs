use anyhow::Result;

use anamnesis::Manager;

/// Display memory statistics in the terminal.
pub async fn stats(manager: &Manager, user: Option<&str>) -> Result<()> {
    let response = manager.stats(user).await?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Total memories:      {}", response.total_memories);
    println!("  Active:              {}", response.active_memories);
    println!("  Forgotten:           {}", response.forgotten_memories);
    println!("  With embedding:      {}", response.with_embedding);
    println!();

    println!("By Type (active):");
    for (t, count) in &response.by_type {
        if *count > 0 {
            println!("  {:<12} {}", t, count);
        }
    }
    println!();

    println!("Associations:          {}", response.associations);
    println!("Ingested items:        {}", response.ingested_items);
    println!("Database size:         {} bytes", response.db_size_bytes);

    if let Some(ref oldest) = response.oldest_memory {
        println!("Oldest memory:         {oldest}");
    }
    if let Some(ref newest) = response.newest_memory {
        println!("Newest memory:         {newest}");
    }

    Ok(())
}
