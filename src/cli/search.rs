use anyhow::Result;
use clap::Args;

use anamnesis::memory::query::{Direction, QueryBuilder, SortKey};
use anamnesis::memory::search::SearchQuery;
use anamnesis::memory::types::MemoryType;
use anamnesis::Manager;

use super::print_memory;

#[derive(Args)]
pub struct SearchArgs {
    query: String,
    /// Restrict to one user
    #[arg(long)]
    user: Option<String>,
    /// Restrict to memory types (repeatable)
    #[arg(long = "type")]
    types: Vec<String>,
    /// Related memory that enables graph search
    #[arg(long)]
    context: Option<String>,
    #[arg(short = 'n', long)]
    limit: Option<usize>,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long = "type")]
    types: Vec<String>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    channel: Option<String>,
    /// created, updated, last_accessed, last_activity, importance, confidence, access_count, next_trigger
    #[arg(long, default_value = "created")]
    sort: String,
    /// Ascending instead of newest/highest first
    #[arg(long)]
    asc: bool,
    #[arg(short = 'n', long, default_value_t = 20)]
    limit: usize,
    #[arg(long)]
    include_forgotten: bool,
}

fn parse_types(types: &[String]) -> Result<Vec<MemoryType>> {
    types
        .iter()
        .map(|t| t.parse::<MemoryType>().map_err(anyhow::Error::from))
        .collect()
}

fn base_filter(types: &[String], user: Option<String>, channel: Option<String>) -> Result<QueryBuilder> {
    let mut filter = QueryBuilder::new().types(parse_types(types)?);
    if let Some(user) = user {
        filter = filter.username(user);
    }
    if let Some(channel) = channel {
        filter = filter.channel(channel);
    }
    Ok(filter)
}

/// Run a hybrid search from the terminal.
pub async fn search(manager: &Manager, args: SearchArgs) -> Result<()> {
    let mut query = SearchQuery::new(args.query).with_filter(base_filter(&args.types, args.user, None)?);
    if let Some(n) = args.limit {
        query = query.max_results(n);
    }
    if let Some(context) = args.context {
        query = query.context(context);
    }

    let response = manager.search(query).await?;
    if !response.degraded.is_empty() {
        let names: Vec<_> = response.degraded.iter().map(|s| s.as_str()).collect();
        println!("(degraded: {} unavailable)\n", names.join(", "));
    }
    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", response.results.len());
    for result in &response.results {
        print_memory(result.rank, &result.memory, Some(result.score));
        let sources: Vec<String> = result
            .sources
            .iter()
            .map(|(source, score)| format!("{source}={score:.3}"))
            .collect();
        if !sources.is_empty() {
            println!("     sources: {}\n", sources.join(" "));
        }
    }
    Ok(())
}

/// List memories by filter, without ranking.
pub async fn list(manager: &Manager, args: ListArgs) -> Result<()> {
    let sort: SortKey = args.sort.parse()?;
    let direction = if args.asc { Direction::Asc } else { Direction::Desc };
    let filter = base_filter(&args.types, args.user, args.channel)?
        .include_forgotten(args.include_forgotten)
        .sort_by(sort, direction)
        .limit(args.limit);

    let total = manager.count(filter.clone()).await?;
    let memories = manager.query(filter).await?;
    if memories.is_empty() {
        println!("No memories found.");
        return Ok(());
    }

    println!("Showing {} of {total} memories\n", memories.len());
    for (i, memory) in memories.iter().enumerate() {
        print_memory(i + 1, memory, None);
    }
    Ok(())
}
