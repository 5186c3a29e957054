//! Behaviour every `Graph` backend must share. Each backend's test module
//! instantiates these cases with `graph_conformance_tests!`.

use crate::error::Result;
use crate::graph::{Graph, GraphIterator};
use crate::partition::{Range, MAX_ID};
use crate::types::{Edge, Link, LinkId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use uuid::Uuid;

/// Generates one `#[test]` per conformance case. `$setup` must evaluate
/// to `(graph, guard)` where `guard` keeps any backing resources alive.
macro_rules! graph_conformance_tests {
    ($setup:expr) => {
        mod conformance {
            use super::*;
            use crate::graph::suite;

            fn with_graph(case: fn(&dyn crate::graph::Graph)) {
                suite::init_logging();
                let (graph, _guard) = $setup;
                case(&graph);
            }

            #[test]
            fn upsert_link_merges_by_url() {
                with_graph(suite::upsert_link_merges_by_url);
            }

            #[test]
            fn find_link() {
                with_graph(suite::find_link);
            }

            #[test]
            fn concurrent_link_upserts() {
                with_graph(suite::concurrent_link_upserts);
            }

            #[test]
            fn upsert_edge_refreshes_existing() {
                with_graph(suite::upsert_edge_refreshes_existing);
            }

            #[test]
            fn upsert_edge_unknown_links() {
                with_graph(suite::upsert_edge_unknown_links);
            }

            #[test]
            fn links_partitions_cover_space() {
                with_graph(suite::links_partitions_cover_space);
            }

            #[test]
            fn links_retrieved_before() {
                with_graph(suite::links_retrieved_before);
            }

            #[test]
            fn edges_partitions_cover_space() {
                with_graph(suite::edges_partitions_cover_space);
            }

            #[test]
            fn edges_updated_before() {
                with_graph(suite::edges_updated_before);
            }

            #[test]
            fn remove_stale_edges() {
                with_graph(suite::remove_stale_edges);
            }

            #[test]
            fn empty_and_inverted_ranges() {
                with_graph(suite::empty_and_inverted_ranges);
            }

            #[test]
            fn early_close_then_rescan() {
                with_graph(suite::early_close_then_rescan);
            }

            #[test]
            fn link_scan_membership_fixed_at_call() {
                with_graph(suite::link_scan_membership_fixed_at_call);
            }

            #[test]
            fn edge_scan_skips_removed_edges() {
                with_graph(suite::edge_scan_skips_removed_edges);
            }
        }
    };
}

pub(crate) use graph_conformance_tests;

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn far_future() -> DateTime<Utc> {
    Utc::now() + Duration::days(365)
}

/// The smallest range containing only `id`.
fn single(id: LinkId) -> (LinkId, LinkId) {
    (id, Uuid::from_u128(id.as_u128() + 1))
}

fn collect_links(
    graph: &dyn Graph,
    from: LinkId,
    to: LinkId,
    before: DateTime<Utc>,
) -> Vec<Link> {
    graph
        .links(from, to, before)
        .unwrap()
        .items()
        .collect::<Result<_>>()
        .unwrap()
}

fn collect_edges(
    graph: &dyn Graph,
    from: LinkId,
    to: LinkId,
    before: DateTime<Utc>,
) -> Vec<Edge> {
    graph
        .edges(from, to, before)
        .unwrap()
        .items()
        .collect::<Result<_>>()
        .unwrap()
}

fn add_link(graph: &dyn Graph, url: &str) -> Link {
    let mut link = Link::new(url);
    graph.upsert_link(&mut link).unwrap();
    link
}

fn add_edge(graph: &dyn Graph, src: LinkId, dst: LinkId) -> Edge {
    let mut edge = Edge::new(src, dst);
    graph.upsert_edge(&mut edge).unwrap();
    edge
}

pub(crate) fn upsert_link_merges_by_url(graph: &dyn Graph) {
    let t1 = Utc::now() - Duration::hours(1);
    let t0 = t1 - Duration::hours(1);
    let t2 = t1 + Duration::minutes(30);

    let mut original = Link::with_retrieved_at("https://a.test", t1);
    graph.upsert_link(&mut original).unwrap();
    assert!(!original.id.is_nil());
    assert_eq!(original.retrieved_at, t1);

    // Older timestamp: same ID, stored time unchanged
    let mut older = Link::with_retrieved_at("https://a.test", t0);
    graph.upsert_link(&mut older).unwrap();
    assert_eq!(older.id, original.id);
    assert_eq!(older.retrieved_at, t1);
    assert_eq!(graph.find_link(original.id).unwrap().retrieved_at, t1);

    // Newer timestamp: same ID, stored time moves forward
    let mut newer = Link::with_retrieved_at("https://a.test", t2);
    graph.upsert_link(&mut newer).unwrap();
    assert_eq!(newer.id, original.id);
    assert_eq!(newer.retrieved_at, t2);
    assert_eq!(graph.find_link(original.id).unwrap().retrieved_at, t2);

    // A different URL gets a different ID
    let other = add_link(graph, "https://b.test");
    assert_ne!(other.id, original.id);
}

pub(crate) fn find_link(graph: &dyn Graph) {
    let at = Utc::now() - Duration::minutes(5);
    let mut link = Link::with_retrieved_at("https://find.test/page", at);
    graph.upsert_link(&mut link).unwrap();

    let found = graph.find_link(link.id).unwrap();
    assert_eq!(found, link);

    let err = graph.find_link(Uuid::new_v4()).unwrap_err();
    assert!(err.is_not_found());
}

pub(crate) fn concurrent_link_upserts(graph: &dyn Graph) {
    let ids: Vec<LinkId> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                scope.spawn(move || {
                    (0..25)
                        .map(|i| add_link(graph, &format!("https://w{}.test/{}", worker, i)).id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<LinkId> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
    for id in ids {
        assert_eq!(graph.find_link(id).unwrap().id, id);
    }
}

pub(crate) fn upsert_edge_refreshes_existing(graph: &dyn Graph) {
    let a = add_link(graph, "https://a.test");
    let b = add_link(graph, "https://b.test");

    let first = add_edge(graph, a.id, b.id);
    assert!(!first.id.is_nil());
    assert_eq!(first.src, a.id);
    assert_eq!(first.dst, b.id);

    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = add_edge(graph, a.id, b.id);
    assert_eq!(second.id, first.id);
    assert!(second.updated_at >= first.updated_at);

    // Opposite direction is a distinct edge
    let reverse = add_edge(graph, b.id, a.id);
    assert_ne!(reverse.id, first.id);

    let edges = collect_edges(graph, Uuid::nil(), MAX_ID, far_future());
    assert_eq!(edges.len(), 2);
}

pub(crate) fn upsert_edge_unknown_links(graph: &dyn Graph) {
    let a = add_link(graph, "https://a.test");
    let b = add_link(graph, "https://b.test");
    add_edge(graph, a.id, b.id);

    let missing = Uuid::new_v4();
    let err = graph.upsert_edge(&mut Edge::new(a.id, missing)).unwrap_err();
    assert!(err.is_unknown_edge_links());

    let err = graph.upsert_edge(&mut Edge::new(missing, b.id)).unwrap_err();
    assert!(err.is_unknown_edge_links());

    let edges = collect_edges(graph, Uuid::nil(), MAX_ID, far_future());
    assert_eq!(edges.len(), 1);
}

pub(crate) fn links_partitions_cover_space(graph: &dyn Graph) {
    for i in 0..100 {
        add_link(graph, &format!("https://partition.test/{}", i));
    }
    let before = far_future();

    let all = collect_links(graph, Uuid::nil(), MAX_ID, before);
    assert_eq!(all.len(), 100);
    assert!(all.windows(2).all(|w| w[0].id < w[1].id), "links not in ID order");

    for partitions in [1, 3, 7, 16] {
        let range = Range::full(partitions).unwrap();
        let mut union = Vec::new();
        for (from, to) in range.iter() {
            let chunk = collect_links(graph, from, to, before);
            assert!(chunk.iter().all(|l| l.id >= from && l.id < to));
            union.extend(chunk);
        }
        assert_eq!(union, all, "{} partitions", partitions);
    }
}

pub(crate) fn links_retrieved_before(graph: &dyn Graph) {
    let base = Utc::now() - Duration::days(1);
    for i in 0..10 {
        let mut link =
            Link::with_retrieved_at(format!("https://time.test/{}", i), base + Duration::minutes(i));
        graph.upsert_link(&mut link).unwrap();
    }

    let cutoff = base + Duration::minutes(4);
    let older = collect_links(graph, Uuid::nil(), MAX_ID, cutoff);
    assert_eq!(older.len(), 4);
    assert!(older.iter().all(|l| l.retrieved_at < cutoff));

    // Exactly at the cutoff is excluded
    let at_base = collect_links(graph, Uuid::nil(), MAX_ID, base);
    assert!(at_base.is_empty());
}

pub(crate) fn edges_partitions_cover_space(graph: &dyn Graph) {
    let links: Vec<Link> = (0..20)
        .map(|i| add_link(graph, &format!("https://edges.test/{}", i)))
        .collect();
    for (i, link) in links.iter().enumerate() {
        add_edge(graph, link.id, links[(i + 1) % links.len()].id);
        add_edge(graph, link.id, links[(i + 3) % links.len()].id);
    }
    let before = far_future();

    let all = collect_edges(graph, Uuid::nil(), MAX_ID, before);
    assert_eq!(all.len(), 40);
    assert!(
        all.windows(2).all(|w| (w[0].src, w[0].dst) < (w[1].src, w[1].dst)),
        "edges not in (src, dst) order"
    );

    for partitions in [1, 4, 9] {
        let range = Range::full(partitions).unwrap();
        let mut union = Vec::new();
        for (from, to) in range.iter() {
            let chunk = collect_edges(graph, from, to, before);
            assert!(chunk.iter().all(|e| e.src >= from && e.src < to));
            union.extend(chunk);
        }
        assert_eq!(union, all, "{} partitions", partitions);
    }

    // A single-source range returns exactly that link's outgoing edges
    let (from, to) = single(links[0].id);
    let outgoing = collect_edges(graph, from, to, before);
    assert_eq!(outgoing.len(), 2);
    assert!(outgoing.iter().all(|e| e.src == links[0].id));
}

pub(crate) fn edges_updated_before(graph: &dyn Graph) {
    let a = add_link(graph, "https://a.test");
    let b = add_link(graph, "https://b.test");
    let c = add_link(graph, "https://c.test");

    let ab = add_edge(graph, a.id, b.id);
    std::thread::sleep(std::time::Duration::from_millis(5));
    let cutoff = Utc::now();
    std::thread::sleep(std::time::Duration::from_millis(5));
    add_edge(graph, a.id, c.id);

    let older = collect_edges(graph, Uuid::nil(), MAX_ID, cutoff);
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].id, ab.id);

    let everything = collect_edges(graph, Uuid::nil(), MAX_ID, far_future());
    assert_eq!(everything.len(), 2);
}

pub(crate) fn remove_stale_edges(graph: &dyn Graph) {
    let a = add_link(graph, "https://a.test");
    let b = add_link(graph, "https://b.test");
    let c = add_link(graph, "https://c.test");

    let ab = add_edge(graph, a.id, b.id);
    add_edge(graph, a.id, c.id);
    let ba = add_edge(graph, b.id, a.id);

    std::thread::sleep(std::time::Duration::from_millis(5));
    let cutoff = Utc::now();
    std::thread::sleep(std::time::Duration::from_millis(5));

    // Re-crawl of `a` only found the link to `b` again
    let refreshed = add_edge(graph, a.id, b.id);
    assert_eq!(refreshed.id, ab.id);
    assert!(refreshed.updated_at >= cutoff);

    graph.remove_stale_edges(a.id, cutoff).unwrap();
    // Idempotent
    graph.remove_stale_edges(a.id, cutoff).unwrap();
    // Unknown source is a no-op
    graph.remove_stale_edges(Uuid::new_v4(), cutoff).unwrap();

    let (from, to) = single(a.id);
    assert!(collect_edges(graph, from, to, cutoff).is_empty());

    let from_a = collect_edges(graph, from, to, far_future());
    assert_eq!(from_a.len(), 1);
    assert_eq!(from_a[0].id, ab.id);

    // Other sources are untouched even though their edges are older
    let (from, to) = single(b.id);
    let from_b = collect_edges(graph, from, to, far_future());
    assert_eq!(from_b.len(), 1);
    assert_eq!(from_b[0].id, ba.id);
}

pub(crate) fn empty_and_inverted_ranges(graph: &dyn Graph) {
    let a = add_link(graph, "https://a.test");
    let b = add_link(graph, "https://b.test");
    add_edge(graph, a.id, b.id);
    let before = far_future();

    assert!(collect_links(graph, a.id, a.id, before).is_empty());
    assert!(collect_links(graph, MAX_ID, Uuid::nil(), before).is_empty());
    assert!(collect_edges(graph, a.id, a.id, before).is_empty());
    assert!(collect_edges(graph, MAX_ID, Uuid::nil(), before).is_empty());
}

pub(crate) fn early_close_then_rescan(graph: &dyn Graph) {
    for i in 0..5 {
        add_link(graph, &format!("https://close.test/{}", i));
    }
    let before = far_future();

    let mut it = graph.links(Uuid::nil(), MAX_ID, before).unwrap();
    assert!(it.current().is_none());
    assert!(it.advance());
    let first = it.current().unwrap();
    it.close().unwrap();
    assert!(!it.advance());
    assert!(it.take_error().is_none());
    drop(it);

    // Writers are not blocked by the abandoned scan
    add_link(graph, "https://close.test/late");

    let all = collect_links(graph, Uuid::nil(), MAX_ID, before);
    assert_eq!(all.len(), 6);
    assert!(all.iter().any(|l| l.id == first.id));
}

pub(crate) fn link_scan_membership_fixed_at_call(graph: &dyn Graph) {
    let members: Vec<Link> = (0..20)
        .map(|i| add_link(graph, &format!("https://member.test/{}", i)))
        .collect();
    let cutoff = Utc::now() + Duration::hours(1);
    let refreshed_at = cutoff + Duration::hours(1);

    let mut it = graph.links(Uuid::nil(), MAX_ID, cutoff).unwrap();
    assert!(it.advance());
    let mut seen = vec![it.current().unwrap()];

    // Qualifying links added after the call are not members
    for i in 0..30 {
        add_link(graph, &format!("https://newcomer.test/{}", i));
    }
    // Members moved past the cutoff are still produced, with their new values
    for link in &members {
        let mut refreshed = Link::with_retrieved_at(link.url.clone(), refreshed_at);
        graph.upsert_link(&mut refreshed).unwrap();
    }

    while it.advance() {
        seen.push(it.current().unwrap());
    }
    assert!(it.take_error().is_none());

    let mut expected: Vec<LinkId> = members.iter().map(|l| l.id).collect();
    expected.sort();
    let ids: Vec<LinkId> = seen.iter().map(|l| l.id).collect();
    assert_eq!(ids, expected);
    assert!(seen[1..].iter().all(|l| l.retrieved_at == refreshed_at));
}

pub(crate) fn edge_scan_skips_removed_edges(graph: &dyn Graph) {
    let a = add_link(graph, "https://a.test");
    let b = add_link(graph, "https://b.test");
    let c = add_link(graph, "https://c.test");
    let ab = add_edge(graph, a.id, b.id);
    let ac = add_edge(graph, a.id, c.id);
    let ba = add_edge(graph, b.id, a.id);
    let cutoff = Utc::now() + Duration::hours(1);

    let mut it = graph.edges(Uuid::nil(), MAX_ID, cutoff).unwrap();

    graph.remove_stale_edges(a.id, cutoff).unwrap();
    add_edge(graph, c.id, a.id);

    let mut seen = Vec::new();
    while it.advance() {
        seen.push(it.current().unwrap().id);
    }
    assert!(it.take_error().is_none());
    assert_eq!(seen, vec![ba.id]);
    assert!(!seen.contains(&ab.id) && !seen.contains(&ac.id));
}
