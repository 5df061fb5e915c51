//! End-to-end scenarios over a real in-process cluster (§8 "End-to-end
//! scenarios" S1-S4), driven entirely through `GraphClient`.

mod common;

use graphdb::value::{FieldType, FieldValue};
use graphdb::{Direction, Row, Schema};

/// S1, scaled down from 1 000 vertices to keep the test fast: a ring where
/// vertex `i` gets edges `(i, i+1)` and `(i+1, i)` for every `i`.
#[tokio::test(flavor = "multi_thread")]
async fn s1_ring_graph_has_expected_vertex_and_edge_counts() {
    const N: u64 = 60;
    let client = common::spawn_cluster(9).await;

    for i in 0..N {
        let next = (i + 1) % N;
        client
            .add_edge(i, next, Row::empty(&Schema::new(), false))
            .await
            .unwrap();
        client
            .add_edge(next, i, Row::empty(&Schema::new(), false))
            .await
            .unwrap();
    }

    assert_eq!(client.num_vertices().await.unwrap(), N);
    assert_eq!(client.num_edges().await.unwrap(), N * 2);

    for i in 0..N {
        let out = client.get_vertex_adj(i, Direction::Outgoing).await.unwrap();
        let inn = client.get_vertex_adj(i, Direction::Incoming).await.unwrap();
        assert_eq!(out.len(), 2, "vertex {i} out-degree");
        assert_eq!(inn.len(), 2, "vertex {i} in-degree");
    }
}

/// S2: add a vertex field, add ten vertices, set the field on one of them.
#[tokio::test(flavor = "multi_thread")]
async fn s2_field_add_and_set_touches_only_the_target_vertex() {
    let client = common::spawn_cluster(4).await;
    let field = client
        .add_vertex_field("title".into(), FieldType::String, false)
        .await
        .unwrap();

    let mut schema = Schema::new();
    schema.add_field("title".into(), FieldType::String, false).unwrap();
    for v in 0..10u64 {
        client.add_vertex(v, Row::empty(&schema, true)).await.unwrap();
    }

    client
        .set_vertex_field(3, field, FieldValue::String(b"vertex3".to_vec()), false)
        .await
        .unwrap();

    for v in 0..10u64 {
        let row = client.get_vertex(v).await.unwrap();
        let f = row.field(field).unwrap();
        if v == 3 {
            assert_eq!(f.value(), Some(&FieldValue::String(b"vertex3".to_vec())));
        } else {
            assert!(f.is_null(), "vertex {v} should still be NULL");
        }
    }
}

/// S3: a delta-committed numeric edge field accumulates across four
/// successive `set(delta=true, 0.25)` calls to reach 1.00.
#[tokio::test(flavor = "multi_thread")]
async fn s3_delta_commit_accumulates_to_one() {
    let client = common::spawn_cluster(4).await;
    let field = client
        .add_edge_field("weight".into(), FieldType::DoubleF64, false)
        .await
        .unwrap();

    let mut schema = Schema::new();
    schema.add_field("weight".into(), FieldType::DoubleF64, false).unwrap();
    let e01 = client.add_edge(0, 1, Row::empty(&schema, false)).await.unwrap();
    let e10 = client.add_edge(1, 0, Row::empty(&schema, false)).await.unwrap();

    for _ in 0..4 {
        client
            .set_edge_field(e01, field, FieldValue::DoubleF64(0.25), true)
            .await
            .unwrap();
        client
            .set_edge_field(e10, field, FieldValue::DoubleF64(0.25), true)
            .await
            .unwrap();
    }

    for eid in [e01, e10] {
        let (_, _, row) = client.get_edge(eid).await.unwrap();
        match row.field(field).unwrap().value() {
            Some(FieldValue::DoubleF64(v)) => assert!((v - 1.0).abs() < 1e-9),
            other => panic!("expected a DoubleF64 weight, got {other:?}"),
        }
    }
}

/// S4: `client.add_edges(batch)` over a 3x3 grid lands every edge and maps
/// every reply back to its input position.
#[tokio::test(flavor = "multi_thread")]
async fn s4_batch_scatter_lands_every_edge() {
    const COUNT: u64 = 500;
    let client = common::spawn_cluster(9).await;

    let batch: Vec<(u64, u64, Row)> = (0..COUNT)
        .map(|i| {
            let dst = (i * 7 + 3) % (COUNT * 2);
            (i, dst.max(1), Row::empty(&Schema::new(), false))
        })
        .collect();

    let results = client.add_edges(batch).await.unwrap();
    assert_eq!(results.len(), COUNT as usize);
    for r in &results {
        assert!(r.is_ok());
    }

    assert_eq!(client.num_edges().await.unwrap(), COUNT);
}

/// A duplicate vertex in a batch only fails at its own position — the rest
/// of the batch still lands, proving per-position results aren't collapsed
/// into one pass/fail flag for the whole call.
#[tokio::test(flavor = "multi_thread")]
async fn add_vertices_reports_per_position_failure() {
    let client = common::spawn_cluster(4).await;
    let field = client
        .add_vertex_field("tag".into(), FieldType::String, false)
        .await
        .unwrap();
    let mut schema = Schema::new();
    schema.add_field("tag".into(), FieldType::String, false).unwrap();

    client.add_vertex(5, Row::empty(&schema, true)).await.unwrap();
    client
        .set_vertex_field(5, field, FieldValue::String(b"taken".to_vec()), false)
        .await
        .unwrap();

    let batch = vec![
        (1u64, Row::empty(&schema, true)),
        (5u64, Row::empty(&schema, true)), // collides: vertex 5 already has a non-NULL row
        (2u64, Row::empty(&schema, true)),
    ];
    let results = client.add_vertices(batch).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(graphdb::DbError::Duplicate(_))));
    assert!(results[2].is_ok());
}
