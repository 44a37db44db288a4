//! Conformance suite for `Backend` implementations.
//!
//! Run it against a new backend with `run_backend_test_suite!`. The suite is
//! the behavioral contract: backends that pass it are interchangeable
//! underneath storage, the log, and state, modulo durability.

use std::sync::Arc;

use errors::ErrorMetadataAnyhowExt;
use serde_json::json;

use crate::backend::{
    Backend,
    Filter,
    FilterOp,
    Ordering,
    RecordRef,
};

pub async fn create_and_get(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    let data = json!({"name": "solenoid", "turns": 40});
    let created = backend.create(data.clone()).await?;
    assert_eq!(created.record_ref, RecordRef::of(&data)?);
    assert_eq!(created.data, data);

    let fetched = backend.get(&created.record_ref).await?;
    assert_eq!(fetched, created);
    Ok(())
}

pub async fn get_missing_is_not_found(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    let missing = RecordRef::of(&json!("never stored"))?;
    let err = backend.get(&missing).await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    Ok(())
}

pub async fn create_is_idempotent(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    let data = json!({"kind": "payload", "value": [1, 2, 3]});
    let first = backend.create(data.clone()).await?;
    let second = backend.create(data).await?;
    assert_eq!(first, second);
    assert_eq!(backend.keys().await?.len(), 1);
    Ok(())
}

pub async fn distinct_data_gets_distinct_refs(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    let a = backend.create(json!({"n": 1})).await?;
    let b = backend.create(json!({"n": 2})).await?;
    assert_ne!(a.record_ref, b.record_ref);
    assert_eq!(backend.keys().await?.len(), 2);
    Ok(())
}

pub async fn key_order_is_insertion_order(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    let mut expected = Vec::new();
    // Refs hash the payload, so insertion order and ref order disagree with
    // overwhelming probability over ten records.
    for n in 0..10 {
        expected.push(backend.create(json!({"n": n})).await?.record_ref);
    }
    assert_eq!(backend.keys().await?, expected);
    let listed: Vec<RecordRef> = backend
        .list(None)
        .await?
        .into_iter()
        .map(|r| r.record_ref)
        .collect();
    assert_eq!(listed, expected);
    Ok(())
}

pub async fn bulk_read_preserves_order(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    let a = backend.create(json!({"n": 1})).await?;
    let b = backend.create(json!({"n": 2})).await?;
    let c = backend.create(json!({"n": 3})).await?;

    let refs = vec![
        c.record_ref.clone(),
        a.record_ref.clone(),
        b.record_ref.clone(),
    ];
    let records = backend.bulk_read(&refs).await?;
    assert_eq!(records, vec![c, a.clone(), b]);

    // Repeated refs are returned at each position.
    let records = backend
        .bulk_read(&[a.record_ref.clone(), a.record_ref.clone()])
        .await?;
    assert_eq!(records, vec![a.clone(), a]);
    Ok(())
}

pub async fn bulk_read_fails_on_any_missing_ref(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    let a = backend.create(json!({"n": 1})).await?;
    let missing = RecordRef::of(&json!("never stored"))?;
    let err = backend
        .bulk_read(&[a.record_ref, missing])
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    Ok(())
}

pub async fn query_filter_ops(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    for n in 1..=5 {
        backend.create(json!({"n": n, "parity": n % 2})).await?;
    }
    let ns = |records: Vec<crate::backend::Record>| -> Vec<serde_json::Value> {
        records.into_iter().map(|r| r.field("n")).collect()
    };

    let eq = backend
        .query(vec![Filter::new("n", FilterOp::Eq, json!(3))], None)
        .await?;
    assert_eq!(ns(eq), vec![json!(3)]);

    let within = backend
        .query(vec![Filter::new("n", FilterOp::In, json!([2, 5, 9]))], None)
        .await?;
    assert_eq!(ns(within), vec![json!(2), json!(5)]);

    let gt = backend
        .query(vec![Filter::new("n", FilterOp::Gt, json!(3))], None)
        .await?;
    assert_eq!(ns(gt), vec![json!(4), json!(5)]);

    let ge = backend
        .query(vec![Filter::new("n", FilterOp::Ge, json!(4))], None)
        .await?;
    assert_eq!(ns(ge), vec![json!(4), json!(5)]);

    let lt = backend
        .query(vec![Filter::new("n", FilterOp::Lt, json!(2))], None)
        .await?;
    assert_eq!(ns(lt), vec![json!(1)]);

    let le = backend
        .query(vec![Filter::new("n", FilterOp::Le, json!(2))], None)
        .await?;
    assert_eq!(ns(le), vec![json!(1), json!(2)]);

    // Conjunction of filters.
    let odd_and_big = backend
        .query(
            vec![
                Filter::new("parity", FilterOp::Eq, json!(1)),
                Filter::new("n", FilterOp::Gt, json!(1)),
            ],
            None,
        )
        .await?;
    assert_eq!(ns(odd_and_big), vec![json!(3), json!(5)]);

    // Absent fields read as null.
    let missing_field = backend
        .query(vec![Filter::new("absent", FilterOp::Eq, json!(null))], None)
        .await?;
    assert_eq!(missing_field.len(), 5);
    Ok(())
}

pub async fn query_with_ordering(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    for n in [3u64, 1, 2] {
        backend.create(json!({"n": n})).await?;
    }
    let asc = backend.query(vec![], Some(Ordering::asc("n"))).await?;
    let ns: Vec<_> = asc.into_iter().map(|r| r.field("n")).collect();
    assert_eq!(ns, vec![json!(1), json!(2), json!(3)]);

    let desc = backend.list(Some(Ordering::desc("n"))).await?;
    let ns: Vec<_> = desc.into_iter().map(|r| r.field("n")).collect();
    assert_eq!(ns, vec![json!(3), json!(2), json!(1)]);
    Ok(())
}

pub async fn delete_removes_record(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    let a = backend.create(json!({"n": 1})).await?;
    let b = backend.create(json!({"n": 2})).await?;
    backend.delete(&a.record_ref).await?;

    let err = backend.get(&a.record_ref).await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    assert_eq!(backend.keys().await?, vec![b.record_ref.clone()]);

    let err = backend.delete(&a.record_ref).await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    Ok(())
}

pub async fn clear_removes_everything(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    for n in 0..4 {
        backend.create(json!({"n": n})).await?;
    }
    backend.clear().await?;
    assert!(backend.keys().await?.is_empty());
    assert!(backend.list(None).await?.is_empty());
    // A cleared backend accepts new writes.
    backend.create(json!({"n": 0})).await?;
    assert_eq!(backend.keys().await?.len(), 1);
    Ok(())
}

#[macro_export]
macro_rules! run_backend_test_suite {
    ($db:ident, $create_db:expr, $create_backend:expr) => {
        #[tokio::test]
        async fn test_backend_create_and_get() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::create_and_get(b).await
        }

        #[tokio::test]
        async fn test_backend_get_missing_is_not_found() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::get_missing_is_not_found(b).await
        }

        #[tokio::test]
        async fn test_backend_create_is_idempotent() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::create_is_idempotent(b).await
        }

        #[tokio::test]
        async fn test_backend_distinct_data_gets_distinct_refs() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::distinct_data_gets_distinct_refs(b).await
        }

        #[tokio::test]
        async fn test_backend_key_order_is_insertion_order() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::key_order_is_insertion_order(b).await
        }

        #[tokio::test]
        async fn test_backend_bulk_read_preserves_order() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::bulk_read_preserves_order(b).await
        }

        #[tokio::test]
        async fn test_backend_bulk_read_fails_on_any_missing_ref() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::bulk_read_fails_on_any_missing_ref(b).await
        }

        #[tokio::test]
        async fn test_backend_query_filter_ops() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::query_filter_ops(b).await
        }

        #[tokio::test]
        async fn test_backend_query_with_ordering() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::query_with_ordering(b).await
        }

        #[tokio::test]
        async fn test_backend_delete_removes_record() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::delete_removes_record(b).await
        }

        #[tokio::test]
        async fn test_backend_clear_removes_everything() -> anyhow::Result<()> {
            let $db = $create_db;
            let b = $create_backend;
            backend_test_suite::clear_removes_everything(b).await
        }
    };
}
