//! Multi-sink runs against real SQLite databases.

mod common;

use common::{count_rows, FeedBuilder, TestFixture};
use std::sync::Arc;
use stowage::config::SinkConfig;
use stowage::feed::{FeedSource, JsonLinesFeed};
use stowage::pipeline::{FailurePolicy, IngestError, MultiSinkCoordinator, SingleSinkOperator};
use stowage::storage::Backend;

fn feed(fixture: &TestFixture) -> Arc<dyn FeedSource> {
    let path = fixture.write_feed(
        &FeedBuilder::new()
            .race_schema()
            .race("Derby", &[Some("Arkle"), Some("Desert Orchid")])
            .file("RA1.txt")
            .race("Oaks", &[None, Some("Enable")])
            .file("RA2.txt"),
    );
    Arc::new(JsonLinesFeed::new(path))
}

fn operator(name: &str, data_source: impl Into<String>) -> SingleSinkOperator {
    SingleSinkOperator::new(
        SinkConfig::new(name, Backend::Sqlite, data_source),
        Arc::new(Backend::Sqlite),
    )
}

#[tokio::test]
async fn test_every_sink_gets_the_same_rows() {
    let fixture = TestFixture::new();
    let mirror = fixture.path("mirror.db");
    let coordinator = MultiSinkCoordinator::new(
        operator("primary", fixture.db_path_str()),
        vec![(
            operator("mirror", mirror.display().to_string()),
            FailurePolicy::Fatal,
        )],
    );

    let result = coordinator.ingest_all(feed(&fixture)).await.unwrap();

    assert!(result.success);
    assert_eq!(result.operation_name, "primary");
    for db in [fixture.db_path.as_path(), mirror.as_path()] {
        assert_eq!(count_rows(db, "race"), Some(2));
        assert_eq!(count_rows(db, "runner"), Some(3));
    }
}

#[tokio::test]
async fn test_continuing_secondary_failure_is_a_warning() {
    let fixture = TestFixture::new();
    let coordinator = MultiSinkCoordinator::new(
        operator("primary", fixture.db_path_str()),
        vec![(
            operator("mirror", fixture.unreachable_data_source()),
            FailurePolicy::WarnAndContinue,
        )],
    );

    let result = coordinator.ingest_all(feed(&fixture)).await.unwrap();

    assert!(result.success);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("mirror"));
    assert_eq!(count_rows(&fixture.db_path, "race"), Some(2));
}

#[tokio::test]
async fn test_fatal_secondary_failure_is_the_result() {
    let fixture = TestFixture::new();
    let coordinator = MultiSinkCoordinator::new(
        operator("primary", fixture.db_path_str()),
        vec![(
            operator("mirror", fixture.unreachable_data_source()),
            FailurePolicy::Fatal,
        )],
    );

    let err = coordinator.ingest_all(feed(&fixture)).await.unwrap_err();

    assert!(matches!(err, IngestError::Connect { ref sink, .. } if sink == "mirror"));
    // The primary committed independently.
    assert_eq!(count_rows(&fixture.db_path, "race"), Some(2));
}

#[tokio::test]
async fn test_primary_source_failure_is_reported_for_every_sink() {
    let fixture = TestFixture::new();
    let mirror = fixture.path("mirror.db");
    let path = fixture.write_feed(
        &FeedBuilder::new()
            .race_schema()
            .race("Derby", &[Some("Arkle")])
            .file("RA1.txt")
            .error(-502, "download interrupted", "RA2.txt"),
    );
    let coordinator = MultiSinkCoordinator::new(
        operator("primary", fixture.db_path_str()),
        vec![(
            operator("mirror", mirror.display().to_string()),
            FailurePolicy::WarnAndContinue,
        )],
    );

    let result = coordinator
        .ingest_all(Arc::new(JsonLinesFeed::new(path)))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.operation_name, "primary");
    assert_eq!(result.arguments, vec!["RA2.txt".to_string()]);
    assert_eq!(count_rows(&fixture.db_path, "race"), Some(1));
    assert_eq!(count_rows(&mirror, "race"), Some(1));
}
