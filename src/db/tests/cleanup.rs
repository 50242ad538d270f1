//! Tests for the Postgres CleanupRepo implementation

use std::time::Duration;

use chrono::{TimeZone, Utc};
use sqlx::PgPool;

use super::harness::postgres::{count_rows, create_events_table, insert_rows};
use crate::db::{DbError, repos::CleanupRepo};

/// Test context containing the repo and the pool it was built on
pub struct CleanupTestContext<'a> {
    pub repo: &'a dyn CleanupRepo,
    pub pool: &'a PgPool,
}

fn cutoff() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

// ============================================================================
// validate_table
// ============================================================================

pub async fn test_validate_existing_table(ctx: &CleanupTestContext<'_>) {
    create_events_table(ctx.pool, "events", true).await;
    ctx.repo
        .validate_table("events")
        .await
        .expect("existing table should validate");
}

pub async fn test_validate_unindexed_table_still_ok(ctx: &CleanupTestContext<'_>) {
    create_events_table(ctx.pool, "raw_events", false).await;
    ctx.repo
        .validate_table("raw_events")
        .await
        .expect("missing index should only warn");
}

pub async fn test_validate_missing_table(ctx: &CleanupTestContext<'_>) {
    let err = ctx.repo.validate_table("nope").await.unwrap_err();
    assert!(matches!(err, DbError::TableNotFound(name) if name == "nope"));
}

pub async fn test_validate_rejects_unsafe_name(ctx: &CleanupTestContext<'_>) {
    let err = ctx.repo.validate_table("events;--").await.unwrap_err();
    assert!(matches!(err, DbError::InvalidIdentifier(_)));
}

// ============================================================================
// delete_batch
// ============================================================================

pub async fn test_delete_batch_in_chunks(ctx: &CleanupTestContext<'_>) {
    create_events_table(ctx.pool, "events", true).await;
    // 250 stale rows, 10 fresh ones
    insert_rows(ctx.pool, "events", 250, cutoff() - chrono::Duration::seconds(1)).await;
    insert_rows(ctx.pool, "events", 10, cutoff() + chrono::Duration::hours(1)).await;

    let mut batches = Vec::new();
    loop {
        let deleted = ctx
            .repo
            .delete_batch("events", cutoff(), 100)
            .await
            .expect("delete_batch failed");
        batches.push(deleted);
        if deleted < 100 {
            break;
        }
    }

    assert_eq!(batches, vec![100, 100, 50]);
    assert_eq!(count_rows(ctx.pool, "events").await, 10);
}

pub async fn test_delete_batch_oldest_first(ctx: &CleanupTestContext<'_>) {
    create_events_table(ctx.pool, "events", true).await;
    insert_rows(ctx.pool, "events", 20, cutoff() - chrono::Duration::seconds(1)).await;

    let deleted = ctx.repo.delete_batch("events", cutoff(), 5).await.unwrap();
    assert_eq!(deleted, 5);

    // Rows are spaced one second apart, so the 5 oldest are gone.
    let oldest: chrono::DateTime<Utc> =
        sqlx::query_scalar(r#"SELECT MIN(created_at) FROM "events""#)
            .fetch_one(ctx.pool)
            .await
            .unwrap();
    assert_eq!(oldest, cutoff() - chrono::Duration::seconds(15));
}

pub async fn test_delete_batch_nothing_to_delete(ctx: &CleanupTestContext<'_>) {
    create_events_table(ctx.pool, "events", true).await;
    insert_rows(ctx.pool, "events", 5, cutoff() + chrono::Duration::hours(1)).await;

    let deleted = ctx.repo.delete_batch("events", cutoff(), 100).await.unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(count_rows(ctx.pool, "events").await, 5);
}

pub async fn test_delete_batch_skips_locked_rows(ctx: &CleanupTestContext<'_>) {
    create_events_table(ctx.pool, "events", true).await;
    insert_rows(ctx.pool, "events", 20, cutoff() - chrono::Duration::seconds(1)).await;

    // Hold row locks on the 5 oldest rows in a separate transaction.
    let mut blocker = ctx.pool.begin().await.unwrap();
    sqlx::query(r#"SELECT id FROM "events" ORDER BY created_at LIMIT 5 FOR UPDATE"#)
        .execute(&mut *blocker)
        .await
        .unwrap();

    let deleted = ctx.repo.delete_batch("events", cutoff(), 100).await.unwrap();
    assert_eq!(deleted, 15);

    blocker.rollback().await.unwrap();
    assert_eq!(count_rows(ctx.pool, "events").await, 5);
}

pub async fn test_delete_batch_rejects_unsafe_name(ctx: &CleanupTestContext<'_>) {
    let err = ctx
        .repo
        .delete_batch("drop_table", cutoff(), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidIdentifier(_)));
}

// ============================================================================
// Advisory locks
// ============================================================================

pub async fn test_lock_is_exclusive(ctx: &CleanupTestContext<'_>) {
    let first = ctx
        .repo
        .try_acquire_lock("events")
        .await
        .unwrap()
        .expect("first acquire should succeed");

    let second = ctx.repo.try_acquire_lock("events").await.unwrap();
    assert!(second.is_none(), "second acquire must report contention");

    first.release().await;

    let third = ctx.repo.try_acquire_lock("events").await.unwrap();
    assert!(third.is_some(), "lock should be free after release");
    third.unwrap().release().await;
}

pub async fn test_locks_are_per_table(ctx: &CleanupTestContext<'_>) {
    let a = ctx.repo.try_acquire_lock("events").await.unwrap();
    let b = ctx.repo.try_acquire_lock("sessions").await.unwrap();
    assert!(a.is_some());
    assert!(b.is_some());
    a.unwrap().release().await;
    b.unwrap().release().await;
}

pub async fn test_dropped_lock_is_freed(ctx: &CleanupTestContext<'_>) {
    let lock = ctx.repo.try_acquire_lock("events").await.unwrap();
    assert!(lock.is_some());
    drop(lock);

    // The backend notices the closed socket asynchronously.
    let mut reacquired = None;
    for _ in 0..50 {
        if let Some(lock) = ctx.repo.try_acquire_lock("events").await.unwrap() {
            reacquired = Some(lock);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let lock = reacquired.expect("lock should be freed once its session closes");
    lock.release().await;
}

mod postgres {
    use super::*;
    use crate::db::{postgres::PostgresCleanupRepo, tests::harness::postgres::create_isolated_postgres_pool};

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let pool = create_isolated_postgres_pool().await;
                let repo = PostgresCleanupRepo::new(pool.clone(), None, "created_at");
                let ctx = CleanupTestContext {
                    repo: &repo,
                    pool: &pool,
                };
                super::$name(&ctx).await;
            }
        };
    }

    postgres_test!(test_validate_existing_table);
    postgres_test!(test_validate_unindexed_table_still_ok);
    postgres_test!(test_validate_missing_table);
    postgres_test!(test_validate_rejects_unsafe_name);

    postgres_test!(test_delete_batch_in_chunks);
    postgres_test!(test_delete_batch_oldest_first);
    postgres_test!(test_delete_batch_nothing_to_delete);
    postgres_test!(test_delete_batch_skips_locked_rows);
    postgres_test!(test_delete_batch_rejects_unsafe_name);

    postgres_test!(test_lock_is_exclusive);
    postgres_test!(test_locks_are_per_table);
    postgres_test!(test_dropped_lock_is_freed);
}
