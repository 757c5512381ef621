//! CLI write commands: `remember`, `forget`, `relate`.

use anyhow::Result;
use clap::Args;

use anamnesis::memory::types::{MemoryType, NewAssociation, NewMemory, RelationType};
use anamnesis::Manager;

#[derive(Args)]
pub struct RememberArgs {
    content: String,
    #[arg(long = "type", default_value = "observation")]
    memory_type: String,
    /// 0.0 to 1.0; defaults by type
    #[arg(long)]
    importance: Option<f64>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    channel: Option<String>,
}

#[derive(Args)]
pub struct RelateArgs {
    source: String,
    /// related_to, updates, contradicts, caused_by, part_of, triggers, ...
    relation: String,
    target: String,
    #[arg(long)]
    weight: Option<f64>,
    /// Override the relation's default direction
    #[arg(long)]
    undirected: bool,
}

pub async fn remember(manager: &Manager, args: RememberArgs) -> Result<()> {
    let memory_type: MemoryType = args.memory_type.parse()?;
    let mut new = NewMemory::new(args.content, memory_type);
    if let Some(importance) = args.importance {
        new = new.with_importance(importance);
    }
    if let Some(user) = args.user {
        new = new.with_username(user);
    }
    if let Some(channel) = args.channel {
        new = new.with_channel(channel);
    }

    let memory = manager.create_memory(new).await?;
    println!("Stored {} [{}] (importance: {:.2})", memory.uid, memory.memory_type, memory.importance);
    if memory.embedding_model.is_none() {
        println!("  (no embedding; run `anamnesis reembed` once a provider is configured)");
    }
    Ok(())
}

pub async fn forget(manager: &Manager, uid: &str, hard: bool) -> Result<()> {
    let changed = if hard {
        manager.delete_memory(uid).await?
    } else {
        manager.forget_memory(uid).await?
    };
    match (changed, hard) {
        (true, true) => println!("Deleted {uid}."),
        (true, false) => println!("Forgot {uid}."),
        (false, _) => println!("No active memory with id {uid}."),
    }
    Ok(())
}

pub async fn relate(manager: &Manager, args: RelateArgs) -> Result<()> {
    let relation: RelationType = args.relation.parse()?;
    let mut new = NewAssociation::new(args.source, relation, args.target);
    if let Some(weight) = args.weight {
        new = new.with_weight(weight);
    }
    if args.undirected {
        new.directed = Some(false);
    }

    let result = manager.create_association(new).await?;
    let a = &result.association;
    let arrow = if a.directed { "-->" } else { "---" };
    if result.deduplicated {
        println!("Already linked: {} --[{}]{arrow} {} ({})", a.source_uid, a.relation, a.target_uid, a.uid);
    } else {
        println!("Linked: {} --[{}]{arrow} {} ({})", a.source_uid, a.relation, a.target_uid, a.uid);
    }
    Ok(())
}
