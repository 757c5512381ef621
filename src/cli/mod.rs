pub mod doctor;
pub mod ingest;
pub mod inspect;
pub mod maintenance;
pub mod memories;
pub mod re_embed;
pub mod search;
pub mod stats;

use anamnesis::memory::truncate_preview;
use anamnesis::memory::types::Memory;
use tokio_util::sync::CancellationToken;

/// Print one memory as a numbered two-line entry.
fn print_memory(index: usize, memory: &Memory, score: Option<f64>) {
    let score = score.map(|s| format!(", score: {s:.4}")).unwrap_or_default();
    println!(
        "  {index}. [{}] {} (importance: {:.2}{score})",
        memory.memory_type, memory.uid, memory.importance
    );
    println!("     {}", truncate_preview(&memory.content, 120));
    println!();
}

/// A token cancelled on the first Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, finishing current item...");
            child.cancel();
        }
    });
    token
}
