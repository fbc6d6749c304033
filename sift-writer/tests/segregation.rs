//! End-to-end segregation scenarios.
//!
//! These tests drive the full engine through the public entry points with
//! in-memory sources and writers, and check the external invariants: every
//! output stream is well-formed on its own, order within a class matches the
//! source, and nothing is lost.

use bytes::Bytes;
use sift_core::{ClassId, ClusteringKey, MutationFragment, Timestamp, Tombstone};
use sift_keys::{DecoratedKey, PartitionKey, Token};
use sift_writer::{
    segregate_by_shard, segregate_by_timestamp, MemoryWriterFactory, SegregateError, VecSource,
    WriterFaultConfig,
};

fn dkey(token: i64) -> DecoratedKey {
    DecoratedKey::new(
        Token::new(token),
        PartitionKey::from_bytes(Bytes::from(token.to_be_bytes().to_vec())),
    )
}

fn start(token: i64) -> MutationFragment {
    MutationFragment::partition_start(dkey(token))
}

fn row(key: &'static [u8], ts: i64) -> MutationFragment {
    MutationFragment::clustering_row(
        ClusteringKey::from_static(key),
        Timestamp::from_micros(ts),
        Bytes::from_static(b"payload"),
    )
}

fn rtc_open(pos: &'static [u8], ts: i64) -> MutationFragment {
    MutationFragment::range_tombstone_change(
        ClusteringKey::from_static(pos),
        Some(Tombstone::new(Timestamp::from_micros(ts))),
    )
}

fn rtc_close(pos: &'static [u8]) -> MutationFragment {
    MutationFragment::range_tombstone_change(ClusteringKey::from_static(pos), None)
}

/// Asserts that a class's output is a well-formed mutation stream on its
/// own: balanced partition boundaries, rows only inside partitions,
/// deletions opened before rows under them and closed before partition-end.
fn assert_well_formed(fragments: &[MutationFragment]) {
    let mut in_partition = false;
    let mut deletion_open = false;
    for fragment in fragments {
        match fragment {
            MutationFragment::PartitionStart(_) => {
                assert!(!in_partition, "nested partition-start");
                in_partition = true;
            }
            MutationFragment::PartitionEnd => {
                assert!(in_partition, "partition-end without start");
                assert!(!deletion_open, "partition-end under open deletion");
                in_partition = false;
            }
            MutationFragment::StaticRow(_) | MutationFragment::ClusteringRow(_) => {
                assert!(in_partition, "row outside partition");
            }
            MutationFragment::RangeTombstoneChange(change) => {
                assert!(in_partition, "tombstone change outside partition");
                deletion_open = change.tombstone.is_some();
            }
        }
    }
    assert!(!in_partition, "stream ends inside a partition");
}

/// Asserts that `projected` appears within `source` in the same order.
fn assert_order_preserving(projected: &[MutationFragment], source: &[MutationFragment]) {
    let mut source_iter = source.iter();
    for fragment in projected {
        assert!(
            source_iter.any(|s| s == fragment),
            "fragment out of source order: {:?}",
            fragment.kind()
        );
    }
}

#[tokio::test]
async fn test_empty_input_creates_zero_writers() {
    let factory = MemoryWriterFactory::new();
    let inspect = factory.clone();

    segregate_by_shard(VecSource::new(vec![]), 4, Box::new(factory))
        .await
        .unwrap();

    assert!(inspect.created_classes().is_empty());
}

#[tokio::test]
async fn test_single_class_partition_passes_through_verbatim() {
    let input = vec![
        start(2),
        MutationFragment::static_row(Timestamp::from_micros(1), Bytes::from_static(b"s")),
        row(b"a", 10),
        rtc_open(b"b", 20),
        row(b"c", 30),
        rtc_close(b"d"),
        row(b"e", 40),
        MutationFragment::PartitionEnd,
    ];

    let factory = MemoryWriterFactory::new();
    let inspect = factory.clone();
    segregate_by_shard(VecSource::new(input.clone()), 2, Box::new(factory))
        .await
        .unwrap();

    // Token 2 mod 2 owns shard 0; nothing else is created.
    assert_eq!(inspect.created_classes(), vec![ClassId::new(0)]);
    assert_eq!(inspect.fragments(ClassId::new(0)), input);
    assert!(inspect.is_closed(ClassId::new(0)));
}

#[tokio::test]
async fn test_shard_split_routes_partitions_by_token() {
    let mut input = Vec::new();
    for token in [10, 21, 34, 45] {
        input.push(start(token));
        input.push(row(b"a", 1));
        input.push(MutationFragment::PartitionEnd);
    }

    let factory = MemoryWriterFactory::new();
    let inspect = factory.clone();
    segregate_by_shard(VecSource::new(input.clone()), 2, Box::new(factory))
        .await
        .unwrap();

    assert_eq!(
        inspect.created_classes(),
        vec![ClassId::new(0), ClassId::new(1)]
    );

    let shard0 = inspect.fragments(ClassId::new(0));
    let shard1 = inspect.fragments(ClassId::new(1));
    assert_well_formed(&shard0);
    assert_well_formed(&shard1);

    // Shard 0 sees tokens 10 then 34; shard 1 sees 21 then 45.
    let tokens = |fragments: &[MutationFragment]| -> Vec<i64> {
        fragments
            .iter()
            .filter_map(|f| f.partition_key().map(|k| k.token().get()))
            .collect()
    };
    assert_eq!(tokens(&shard0), vec![10, 34]);
    assert_eq!(tokens(&shard1), vec![21, 45]);

    // Shard mode never duplicates: the two outputs partition the input.
    assert_eq!(shard0.len() + shard1.len(), input.len());
    assert_order_preserving(&shard0, &input);
    assert_order_preserving(&shard1, &input);
}

#[tokio::test]
async fn test_timestamp_split_at_watermark() {
    let input = vec![
        start(1),
        row(b"a", 5),
        row(b"b", 15),
        row(b"c", 25),
        MutationFragment::PartitionEnd,
    ];

    let watermark = Timestamp::from_micros(10);
    let factory = MemoryWriterFactory::new();
    let inspect = factory.clone();
    segregate_by_timestamp(
        VecSource::new(input.clone()),
        move |ts| {
            Ok(if ts < watermark {
                ClassId::new(0)
            } else {
                ClassId::new(1)
            })
        },
        Box::new(factory),
    )
    .await
    .unwrap();

    assert_eq!(
        inspect.fragments(ClassId::new(0)),
        vec![start(1), row(b"a", 5), MutationFragment::PartitionEnd]
    );
    assert_eq!(
        inspect.fragments(ClassId::new(1)),
        vec![
            start(1),
            row(b"b", 15),
            row(b"c", 25),
            MutationFragment::PartitionEnd
        ]
    );
    assert!(inspect.is_closed(ClassId::new(0)));
    assert!(inspect.is_closed(ClassId::new(1)));
}

#[tokio::test]
async fn test_active_deletion_follows_rows_into_other_classes() {
    // A deletion over [a, z) at write time 100 covers both rows, but the
    // rows land in different classes: the deletion must reach both streams.
    let input = vec![
        start(1),
        rtc_open(b"a", 100),
        row(b"a", 5),
        row(b"m", 15),
        rtc_close(b"z"),
        MutationFragment::PartitionEnd,
    ];

    let watermark = Timestamp::from_micros(10);
    let factory = MemoryWriterFactory::new();
    let inspect = factory.clone();
    segregate_by_timestamp(
        VecSource::new(input),
        move |ts| {
            Ok(if ts < watermark {
                ClassId::new(0)
            } else {
                ClassId::new(1)
            })
        },
        Box::new(factory),
    )
    .await
    .unwrap();

    // The deletion itself (ts 100) classifies into class 1, which later
    // receives row m under it.
    assert_eq!(
        inspect.fragments(ClassId::new(1)),
        vec![
            start(1),
            rtc_open(b"a", 100),
            row(b"m", 15),
            rtc_close(b"z"),
            MutationFragment::PartitionEnd
        ]
    );

    // Class 0 received row a under the deletion, so it got the deletion
    // first even though the opening fragment classified elsewhere.
    assert_eq!(
        inspect.fragments(ClassId::new(0)),
        vec![
            start(1),
            rtc_open(b"a", 100),
            row(b"a", 5),
            rtc_close(b"z"),
            MutationFragment::PartitionEnd
        ]
    );

    assert_well_formed(&inspect.fragments(ClassId::new(0)));
    assert_well_formed(&inspect.fragments(ClassId::new(1)));
}

#[tokio::test]
async fn test_forwarded_deletion_never_outlives_its_source_extent() {
    // Two deletions, both classifying into class 1. Class 0 receives a row
    // under each; the first deletion must close in class 0 at its true end
    // position (c), not at the second deletion's start.
    let input = vec![
        start(1),
        rtc_open(b"a", 100),
        row(b"b", 5),
        rtc_close(b"c"),
        rtc_open(b"e", 200),
        row(b"f", 6),
        rtc_close(b"g"),
        MutationFragment::PartitionEnd,
    ];

    let watermark = Timestamp::from_micros(10);
    let factory = MemoryWriterFactory::new();
    let inspect = factory.clone();
    segregate_by_timestamp(
        VecSource::new(input),
        move |ts| {
            Ok(if ts < watermark {
                ClassId::new(0)
            } else {
                ClassId::new(1)
            })
        },
        Box::new(factory),
    )
    .await
    .unwrap();

    assert_eq!(
        inspect.fragments(ClassId::new(0)),
        vec![
            start(1),
            rtc_open(b"a", 100),
            row(b"b", 5),
            rtc_close(b"c"),
            rtc_open(b"e", 200),
            row(b"f", 6),
            rtc_close(b"g"),
            MutationFragment::PartitionEnd
        ]
    );
    assert_eq!(
        inspect.fragments(ClassId::new(1)),
        vec![
            start(1),
            rtc_open(b"a", 100),
            rtc_close(b"c"),
            rtc_open(b"e", 200),
            rtc_close(b"g"),
            MutationFragment::PartitionEnd
        ]
    );
}

#[tokio::test]
async fn test_deletion_change_without_close_is_split_correctly() {
    // The second opening fragment replaces the first deletion in place:
    // class 1 sees a change at c, class 0 (whose row precedes the change)
    // sees the first deletion end exactly at c.
    let input = vec![
        start(1),
        rtc_open(b"a", 100),
        row(b"b", 5),
        rtc_open(b"c", 200),
        row(b"d", 15),
        rtc_close(b"e"),
        MutationFragment::PartitionEnd,
    ];

    let watermark = Timestamp::from_micros(10);
    let factory = MemoryWriterFactory::new();
    let inspect = factory.clone();
    segregate_by_timestamp(
        VecSource::new(input),
        move |ts| {
            Ok(if ts < watermark {
                ClassId::new(0)
            } else {
                ClassId::new(1)
            })
        },
        Box::new(factory),
    )
    .await
    .unwrap();

    // Both deletions classify to class 1 (ts 100 and 200 are above the
    // watermark), so class 1 carries the change in place.
    assert_eq!(
        inspect.fragments(ClassId::new(1)),
        vec![
            start(1),
            rtc_open(b"a", 100),
            rtc_open(b"c", 200),
            row(b"d", 15),
            rtc_close(b"e"),
            MutationFragment::PartitionEnd
        ]
    );

    // Class 0's only row sits under the first deletion; the close it is
    // owed lands at the change position.
    assert_eq!(
        inspect.fragments(ClassId::new(0)),
        vec![
            start(1),
            rtc_open(b"a", 100),
            row(b"b", 5),
            rtc_close(b"c"),
            MutationFragment::PartitionEnd
        ]
    );

    assert_well_formed(&inspect.fragments(ClassId::new(0)));
    assert_well_formed(&inspect.fragments(ClassId::new(1)));
}

#[tokio::test]
async fn test_writer_failure_stops_run_and_closes_all_writers() {
    let input = vec![
        start(1),
        row(b"a", 5),
        row(b"b", 15),
        row(b"c", 25),
        MutationFragment::PartitionEnd,
    ];

    // Class 1 receives partition-start, row b, row c: fail on its third.
    let factory = MemoryWriterFactory::new()
        .with_fault(ClassId::new(1), WriterFaultConfig::none().with_fail_accept_at(3));
    let inspect = factory.clone();

    let watermark = Timestamp::from_micros(10);
    let err = segregate_by_timestamp(
        VecSource::new(input),
        move |ts| {
            Ok(if ts < watermark {
                ClassId::new(0)
            } else {
                ClassId::new(1)
            })
        },
        Box::new(factory),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err.primary(),
        SegregateError::Writer {
            operation: "accept",
            ..
        }
    ));
    assert!(inspect.is_closed(ClassId::new(0)));
    assert!(inspect.is_closed(ClassId::new(1)));
}

#[tokio::test]
async fn test_failed_cleanup_is_secondary_context() {
    // Accept fails on class 1 and, during cleanup, its close fails too: the
    // accept failure stays primary.
    let factory = MemoryWriterFactory::new().with_fault(
        ClassId::new(1),
        WriterFaultConfig::none()
            .with_fail_accept_at(1)
            .with_force_close_fail(),
    );
    let inspect = factory.clone();

    let input = vec![start(1), MutationFragment::PartitionEnd];
    let err = segregate_by_shard(VecSource::new(input), 2, Box::new(factory))
        .await
        .unwrap_err();

    match err {
        SegregateError::Cleanup { primary, cleanup } => {
            assert!(matches!(
                *primary,
                SegregateError::Writer {
                    operation: "accept",
                    ..
                }
            ));
            assert!(matches!(
                *cleanup,
                SegregateError::Writer {
                    operation: "close",
                    ..
                }
            ));
        }
        other => panic!("expected cleanup context, got {other}"),
    }
    assert!(inspect.is_closed(ClassId::new(1)));
}

#[tokio::test]
async fn test_rerun_is_deterministic() {
    let input = vec![
        start(1),
        rtc_open(b"a", 100),
        row(b"b", 5),
        row(b"m", 15),
        rtc_close(b"z"),
        MutationFragment::PartitionEnd,
        start(2),
        row(b"q", 7),
        MutationFragment::PartitionEnd,
    ];
    let watermark = Timestamp::from_micros(10);

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let factory = MemoryWriterFactory::new();
        let inspect = factory.clone();
        segregate_by_timestamp(
            VecSource::new(input.clone()),
            move |ts| {
                Ok(if ts < watermark {
                    ClassId::new(0)
                } else {
                    ClassId::new(1)
                })
            },
            Box::new(factory),
        )
        .await
        .unwrap();
        outputs.push((
            inspect.fragments(ClassId::new(0)),
            inspect.fragments(ClassId::new(1)),
        ));
    }

    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn test_multi_partition_projection_preserves_order() {
    let mut input = Vec::new();
    for token in [3, 8, 11, 24] {
        input.push(start(token));
        input.push(row(b"a", 1));
        input.push(row(b"b", 2));
        input.push(MutationFragment::PartitionEnd);
    }

    let factory = MemoryWriterFactory::new();
    let inspect = factory.clone();
    segregate_by_shard(VecSource::new(input.clone()), 4, Box::new(factory))
        .await
        .unwrap();

    let mut total = 0;
    for class in inspect.created_classes() {
        let fragments = inspect.fragments(class);
        assert_well_formed(&fragments);
        assert_order_preserving(&fragments, &input);
        total += fragments.len();
    }
    // Shard mode neither drops nor duplicates fragments.
    assert_eq!(total, input.len());
}
