//! Unary Operation Tests
//!
//! Best-score semantics, global ordering, rank, and boundary behavior
//! through the service façade over the in-memory store.

use std::sync::Arc;

use scorestack::{Error, Leaderboard, MemoryScoreStore, ScoreStore};

fn service() -> Leaderboard {
    Leaderboard::new(Arc::new(MemoryScoreStore::new()))
}

/// Scenario: best-score wins.
///
/// Upsert ("Alice", 100) -> applied, 100. Upsert ("Alice", 50) -> not
/// applied, still 100. Upsert ("Alice", 200) -> applied, 200.
#[tokio::test]
async fn best_score_wins() {
    let svc = service();

    let first = svc.submit_score("Alice", 100).await.unwrap();
    assert!(first.applied);
    assert_eq!(first.entry.score.as_i64(), 100);

    let lower = svc.submit_score("Alice", 50).await.unwrap();
    assert!(!lower.applied);
    assert_eq!(lower.entry.score.as_i64(), 100);

    let higher = svc.submit_score("Alice", 200).await.unwrap();
    assert!(higher.applied);
    assert_eq!(higher.entry.score.as_i64(), 200);
}

/// Scenario: ordering tiebreak. Equal scores order by player name ascending.
#[tokio::test]
async fn ordering_tiebreak() {
    let svc = service();

    svc.submit_score("Bob", 500).await.unwrap();
    svc.submit_score("Alice", 500).await.unwrap();
    svc.submit_score("Charlie", 500).await.unwrap();

    let top = svc.top(10, 0).await.unwrap();
    let players: Vec<&str> = top.iter().map(|e| e.player.as_str()).collect();
    assert_eq!(players, vec!["Alice", "Bob", "Charlie"]);
}

/// Top output is strictly decreasing in (score, reversed player), with no
/// duplicate players.
#[tokio::test]
async fn top_is_strictly_ordered_without_duplicates() {
    let svc = service();

    for (player, score) in [
        ("Dana", 900),
        ("Alice", 500),
        ("Bob", 500),
        ("Erin", 250),
        ("Frank", 0),
    ] {
        svc.submit_score(player, score).await.unwrap();
    }

    let top = svc.top(100, 0).await.unwrap();
    assert_eq!(top.len(), 5);
    for pair in top.windows(2) {
        assert!(
            pair[0].order_key() < pair[1].order_key(),
            "entries out of order: {} then {}",
            pair[0].player,
            pair[1].player
        );
    }
}

/// Rank matches its definition: 1 + |{q : q better than p}|, ties broken
/// lexicographically, so ranks are dense and deterministic.
#[tokio::test]
async fn rank_matches_definition() {
    let svc = service();

    svc.submit_score("Zed", 900).await.unwrap();
    svc.submit_score("Bob", 500).await.unwrap();
    svc.submit_score("Alice", 500).await.unwrap();
    svc.submit_score("Erin", 100).await.unwrap();

    for (player, expected) in [("Zed", 1), ("Alice", 2), ("Bob", 3), ("Erin", 4)] {
        let ranked = svc.rank(player).await.unwrap();
        assert_eq!(ranked.rank, expected, "rank of {}", player);
    }
}

/// Rank agrees with the player's position in the full top listing.
#[tokio::test]
async fn rank_agrees_with_top_position() {
    let svc = service();

    for (player, score) in [("A", 10), ("B", 30), ("C", 20), ("D", 30), ("E", 5)] {
        svc.submit_score(player, score).await.unwrap();
    }

    let top = svc.top(100, 0).await.unwrap();
    for (index, entry) in top.iter().enumerate() {
        let ranked = svc.rank(entry.player.as_str()).await.unwrap();
        assert_eq!(ranked.rank, index as i64 + 1, "rank of {}", entry.player);
    }
}

/// Upsert is idempotent: repeating a submission returns applied=false and
/// leaves the row untouched.
#[tokio::test]
async fn repeated_upsert_is_idempotent() {
    let svc = service();

    let first = svc.submit_score("Alice", 100).await.unwrap();
    let second = svc.submit_score("Alice", 100).await.unwrap();

    assert!(first.applied);
    assert!(!second.applied);
    assert_eq!(first.entry.score, second.entry.score);
    assert_eq!(first.entry.updated_at, second.entry.updated_at);
}

/// Delete then lookup reports the structured not-found result.
#[tokio::test]
async fn delete_then_rank_is_not_found() {
    let svc = service();

    svc.submit_score("Alice", 1000).await.unwrap();
    svc.delete("Alice").await.unwrap();

    assert!(matches!(
        svc.rank("Alice").await,
        Err(Error::PlayerNotFound { .. })
    ));

    // Deleting an absent player still succeeds.
    svc.delete("Alice").await.unwrap();
}

/// Boundary behavior for names, scores, and limits.
#[tokio::test]
async fn boundary_behavior() {
    let svc = service();

    // Name length 1 and 20 accept; 0 and 21 reject.
    assert!(svc.submit_score("A", 1).await.is_ok());
    assert!(svc.submit_score("12345678901234567890", 1).await.is_ok());
    assert!(matches!(
        svc.submit_score("", 1).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        svc.submit_score("123456789012345678901", 1).await,
        Err(Error::InvalidArgument(_))
    ));

    // score=0 accepted, score=-1 rejected.
    assert!(svc.submit_score("Zero", 0).await.is_ok());
    assert!(matches!(
        svc.submit_score("Minus", -1).await,
        Err(Error::InvalidArgument(_))
    ));

    // limit=0 clamps to the default, limit=200 clamps to the maximum.
    assert_eq!(svc.clamp_limit(0), 10);
    assert_eq!(svc.clamp_limit(200), 100);
}

/// The trait object seam works: the service runs over `Arc<dyn ScoreStore>`
/// without knowing the backend.
#[tokio::test]
async fn service_is_backend_agnostic() {
    let store: Arc<dyn ScoreStore> = Arc::new(MemoryScoreStore::new());
    let svc = Leaderboard::new(store);

    svc.submit_score("Alice", 42).await.unwrap();
    let top = svc.top(10, 0).await.unwrap();
    assert_eq!(top[0].player.as_str(), "Alice");
}

/// Pagination: offset skips leaders, limit bounds the page.
#[tokio::test]
async fn top_pagination() {
    let svc = service();

    for (player, score) in [("A", 50), ("B", 40), ("C", 30), ("D", 20), ("E", 10)] {
        svc.submit_score(player, score).await.unwrap();
    }

    let page = svc.top(2, 1).await.unwrap();
    let players: Vec<&str> = page.iter().map(|e| e.player.as_str()).collect();
    assert_eq!(players, vec!["B", "C"]);

    let past_end = svc.top(10, 100).await.unwrap();
    assert!(past_end.is_empty());
}
