use chrono::{Duration, Utc};
use linkgraph_core::{Edge, Graph, GraphIterator, Link, Range, RedbGraph};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("=== Link Graph Basic Usage Example ===\n");

    // 1. Open the graph
    println!("1. Opening database...");
    let graph = RedbGraph::open("./data/example.redb")?;
    println!("   ✓ Database opened at {}\n", graph.path().display());

    // 2. Register links
    println!("2. Upserting links...");
    let mut home = Link::new("https://example.com/");
    let mut about = Link::new("https://example.com/about");
    let mut blog = Link::new("https://example.com/blog");
    for link in [&mut home, &mut about, &mut blog] {
        graph.upsert_link(link)?;
        println!("   ✓ {} -> {}", link.id, link.url);
    }

    // Same URL again: merged into the existing link
    let mut again = Link::with_retrieved_at("https://example.com/", Utc::now());
    graph.upsert_link(&mut again)?;
    println!("   ✓ Re-upserted home page, id unchanged: {}\n", again.id == home.id);

    // 3. Record the home page's outgoing links
    println!("3. Upserting edges...");
    for dst in [&about, &blog] {
        let mut edge = Edge::new(home.id, dst.id);
        graph.upsert_edge(&mut edge)?;
        println!("   ✓ {} -> {}", home.url, dst.url);
    }

    // The blog link disappeared from the page on the next crawl
    let recrawl_started = Utc::now();
    graph.upsert_edge(&mut Edge::new(home.id, about.id))?;
    graph.remove_stale_edges(home.id, recrawl_started)?;
    println!("   ✓ Removed edges not seen since {}\n", recrawl_started);

    // 4. Scan partitions the way crawler workers do
    println!("4. Scanning 4 partitions for links not fetched in the last hour...");
    let cutoff = Utc::now() - Duration::hours(1);
    for (i, (from, to)) in Range::full(4)?.iter().enumerate() {
        let mut links = graph.links(from, to, cutoff)?;
        while links.advance() {
            if let Some(link) = links.current() {
                println!("   [partition {}] {}", i, link.url);
            }
        }
        if let Some(err) = links.take_error() {
            return Err(err.into());
        }
    }
    println!();

    // 5. Remaining edges
    println!("5. Edges from the home page...");
    let (from, to) = (home.id, linkgraph_core::MAX_ID);
    for edge in graph.edges(from, to, Utc::now())?.items() {
        let edge = edge?;
        if edge.src != home.id {
            break;
        }
        println!("   ✓ {} -> {}", edge.src, graph.find_link(edge.dst)?.url);
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
