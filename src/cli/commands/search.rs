use crate::config::Config;
use crate::domain::SearchQuery;
use crate::state::SharedState;

pub async fn cmd_search(
    config: Config,
    query: &str,
    page: u32,
    page_size: u32,
) -> anyhow::Result<()> {
    let state = SharedState::new(config).await?;

    println!("Searching for: {query}");

    let outcome = state
        .search
        .search(SearchQuery::new(query.trim(), page, page_size), None)
        .await?;

    if outcome.page.hits.is_empty() {
        println!("No results for '{query}'");
        return Ok(());
    }

    let source = if outcome.cached { "cache" } else { "index" };
    println!();
    println!(
        "{} results, page {}/{} ({:.2} ms, from {source})",
        outcome.page.total,
        outcome.query.page,
        outcome.page.total_pages(outcome.query.page_size),
        outcome.search_time_ms(),
    );
    println!("{:-<70}", "");

    for hit in &outcome.page.hits {
        println!("• {} [{:.2}]", hit.title, hit.score);
        println!("  {}", hit.url);
        if !hit.snippet.is_empty() {
            println!("  {}", hit.snippet);
        }
        println!();
    }

    Ok(())
}
