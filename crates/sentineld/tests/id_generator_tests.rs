//! Alert-ID generation: format, monotonicity, scope isolation, and
//! uniqueness under concurrency.

mod common;

use std::collections::HashSet;

use common::{overspeeding_alert, stack};
use sentinel_common::{Database, SourceType};
use sentineld::alert_id::{is_valid_alert_id, parse_sequence, AlertIdGenerator};

#[tokio::test]
async fn test_generated_ids_match_published_format() {
    let db = Database::open_in_memory().await.unwrap();
    let ids = AlertIdGenerator::new(db.counters());
    for source in [
        SourceType::Overspeeding,
        SourceType::Compliance,
        SourceType::FeedbackNegative,
        SourceType::FeedbackPositive,
        SourceType::DocumentExpiry,
        SourceType::Safety,
    ] {
        let id = ids.generate(source).await.unwrap();
        assert!(is_valid_alert_id(&id), "bad id: {id}");
        assert!(id.starts_with(source.prefix()));
    }
}

#[tokio::test]
async fn test_sequence_is_strictly_monotonic() {
    let db = Database::open_in_memory().await.unwrap();
    let ids = AlertIdGenerator::new(db.counters());
    let mut previous = 0;
    for _ in 0..10 {
        let id = ids.generate(SourceType::Overspeeding).await.unwrap();
        let sequence = parse_sequence(&id).unwrap();
        assert!(sequence > previous);
        previous = sequence;
    }
}

#[tokio::test]
async fn test_prefix_scopes_are_isolated() {
    let db = Database::open_in_memory().await.unwrap();
    let ids = AlertIdGenerator::new(db.counters());
    for _ in 0..3 {
        ids.generate(SourceType::Overspeeding).await.unwrap();
    }
    let safety = ids.generate(SourceType::Safety).await.unwrap();
    // A busy OSP counter does not advance the SAF counter
    assert_eq!(parse_sequence(&safety), Some(1));
}

#[tokio::test]
async fn test_concurrent_generation_never_duplicates() {
    let db = Database::open_in_memory().await.unwrap();
    let mut handles = Vec::new();
    for _ in 0..24 {
        let ids = AlertIdGenerator::new(db.counters());
        handles.push(tokio::spawn(async move {
            ids.generate(SourceType::Safety).await.unwrap()
        }));
    }
    let mut seen = HashSet::new();
    for handle in handles {
        let id = handle.await.unwrap();
        assert!(seen.insert(id), "duplicate alert id generated");
    }
    let mut sequences: Vec<i64> = seen.iter().filter_map(|id| parse_sequence(id)).collect();
    sequences.sort_unstable();
    let expected: Vec<i64> = (1..=24).collect();
    assert_eq!(sequences, expected);
}

#[tokio::test]
async fn test_created_alerts_carry_increasing_sequences() {
    let stack = stack().await;
    let mut previous = 0;
    for _ in 0..5 {
        let alert = stack
            .alerts
            .create_alert(overspeeding_alert("DRV001"))
            .await
            .unwrap();
        let sequence = parse_sequence(&alert.alert_id).unwrap();
        assert!(sequence > previous);
        previous = sequence;
    }
}
