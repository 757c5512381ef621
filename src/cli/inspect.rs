//! CLI `inspect` command: full details for a single memory.

use anyhow::Result;

use anamnesis::Manager;

pub async fn inspect(manager: &Manager, uid: &str) -> Result<()> {
    let Some(m) = manager.get_memory(uid).await? else {
        println!("No memory with id {uid}.");
        return Ok(());
    };

    println!("Memory: {}", m.uid);
    println!("{}", "=".repeat(50));
    println!("  Type:           {}", m.memory_type);
    println!("  Importance:     {:.2}", m.importance);
    if let Some(confidence) = m.confidence {
        println!("  Confidence:     {confidence:.2}");
    }
    println!("  Access count:   {}", m.access_count);
    if let Some(ref la) = m.last_accessed_at {
        println!("  Last accessed:  {la}");
    }
    println!("  Created:        {}", m.created_at);
    println!("  Updated:        {}", m.updated_at);
    if let Some(ref next) = m.next_trigger_at {
        println!("  Next trigger:   {next}");
    }
    println!("  Source:         {}", m.provenance.source_kind.as_str());
    if let Some(ref user) = m.provenance.username {
        println!("  User:           {user}");
    }
    if let Some(ref channel) = m.provenance.channel {
        println!("  Channel:        {channel}");
    }
    println!(
        "  Embedding:      {}",
        m.embedding_model.as_deref().unwrap_or("(none)")
    );
    if m.forgotten {
        let when = m.forgotten_at.map(|t| t.to_string()).unwrap_or_default();
        println!("  Forgotten:      {when}");
    }
    if let Some(meta) = manager.get_metadata(uid).await? {
        println!("  Metadata:       {}", serde_json::to_string_pretty(&meta)?);
    }
    println!();
    println!("Content:");
    println!("  {}", m.content);

    let associations = manager.associations_for(uid).await?;
    if !associations.is_empty() {
        println!();
        println!("Associations:");
        for a in &associations {
            let (arrow, other) = if a.source_uid == m.uid {
                (if a.directed { "-->" } else { "---" }, &a.target_uid)
            } else {
                (if a.directed { "<--" } else { "---" }, &a.source_uid)
            };
            println!("  --[{}]{arrow} {other} (weight: {:.2})", a.relation, a.weight);
        }
    }

    Ok(())
}
