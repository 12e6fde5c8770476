//! Integration tests for transactions, savepoints, deadlock retries and
//! after-commit callbacks.
//!
//! Run with: cargo test -p quarry --test test_transaction

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{connection, deadlock, lost_connection, unique_violation, MockDriver};
use quarry::{QuarryError, Result, Value};

#[tokio::test]
async fn test_begin_and_commit() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    session.begin_transaction().await?;
    assert_eq!(session.transaction_level(), 1);
    session
        .statement("insert into \"users\" (\"a\") values (?)", &[Value::Int(1)])
        .await?;
    session.commit().await?;

    assert_eq!(session.transaction_level(), 0);
    assert_eq!(
        driver.journal(),
        vec![
            "begin",
            "tx.execute: insert into \"users\" (\"a\") values (?)",
            "commit",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_nested_levels_use_savepoints() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    session.begin_transaction().await?;
    session.begin_transaction().await?;
    session.begin_transaction().await?;
    assert_eq!(session.transaction_level(), 3);

    session.roll_back(None).await?;
    assert_eq!(session.transaction_level(), 2);
    session.commit().await?;
    assert_eq!(session.transaction_level(), 1);
    session.commit().await?;
    assert_eq!(session.transaction_level(), 0);

    assert_eq!(
        driver.journal(),
        vec![
            "begin",
            "tx.unprepared: SAVEPOINT trans2",
            "tx.unprepared: SAVEPOINT trans3",
            "tx.unprepared: ROLLBACK TO SAVEPOINT trans3",
            "commit",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_roll_back_to_level() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    for _ in 0..3 {
        session.begin_transaction().await?;
    }
    session.roll_back(Some(1)).await?;
    assert_eq!(session.transaction_level(), 1);
    session.roll_back(Some(0)).await?;
    assert_eq!(session.transaction_level(), 0);

    let journal = driver.journal();
    assert_eq!(
        &journal[3..],
        &[
            "tx.unprepared: ROLLBACK TO SAVEPOINT trans2".to_string(),
            "rollback".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_roll_back_outside_range_is_ignored() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    session.roll_back(None).await?;
    session.begin_transaction().await?;
    session.roll_back(Some(1)).await?;
    session.roll_back(Some(5)).await?;

    assert_eq!(session.transaction_level(), 1);
    assert_eq!(driver.journal(), vec!["begin"]);
    Ok(())
}

#[tokio::test]
async fn test_reads_inside_transaction_use_transaction_connection() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    session.begin_transaction().await?;
    session.select("select 1", &[]).await?;
    session.roll_back(None).await?;
    session.select("select 2", &[]).await?;

    assert_eq!(
        driver.journal(),
        vec!["begin", "tx.fetch: select 1", "rollback", "fetch[read]: select 2"]
    );
    Ok(())
}

#[tokio::test]
async fn test_transaction_commits_and_returns_value() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    let value = session
        .transaction(
            |s| {
                Box::pin(async move {
                    s.statement("update \"users\" set \"a\" = 1", &[]).await?;
                    Ok(41 + 1)
                })
            },
            1,
        )
        .await?;

    assert_eq!(value, 42);
    assert_eq!(session.transaction_level(), 0);
    assert_eq!(
        driver.journal(),
        vec!["begin", "tx.execute: update \"users\" set \"a\" = 1", "commit"]
    );
    Ok(())
}

#[tokio::test]
async fn test_transaction_retries_deadlocks_up_to_attempts() {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = calls.clone();
    let failing = driver.clone();
    let result: Result<()> = session
        .transaction(
            move |s| {
                let counter = counter.clone();
                let failing = failing.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    failing.fail_next_statement(deadlock());
                    s.statement("update \"stock\" set \"qty\" = \"qty\" - 1", &[])
                        .await?;
                    Ok(())
                })
            },
            3,
        )
        .await;

    let err = result.unwrap_err();
    assert!(err.is_concurrency_error());
    assert!(!matches!(err, QuarryError::Deadlock(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(driver.count("begin"), 3);
    assert_eq!(driver.count("rollback"), 3);
    assert_eq!(driver.count("commit"), 0);
    assert_eq!(session.transaction_level(), 0);
}

#[tokio::test]
async fn test_transaction_succeeds_after_deadlock() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    let calls = Arc::new(AtomicU32::new(0));

    driver.fail_next_statement(deadlock());
    let counter = calls.clone();
    session
        .transaction(
            move |s| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    s.statement("update \"stock\" set \"qty\" = 0", &[]).await?;
                    Ok(())
                })
            },
            3,
        )
        .await?;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        driver.journal(),
        vec![
            "begin",
            "tx.execute: update \"stock\" set \"qty\" = 0",
            "rollback",
            "begin",
            "tx.execute: update \"stock\" set \"qty\" = 0",
            "commit",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_transaction_does_not_retry_other_errors() {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    let calls = Arc::new(AtomicU32::new(0));

    driver.fail_next_statement(unique_violation());
    let counter = calls.clone();
    let result: Result<()> = session
        .transaction(
            move |s| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    s.statement("insert into \"users\" (\"id\") values (1)", &[])
                        .await?;
                    Ok(())
                })
            },
            5,
        )
        .await;

    assert!(matches!(result, Err(QuarryError::Query(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(driver.count("rollback"), 1);
    assert_eq!(session.transaction_level(), 0);
}

#[tokio::test]
async fn test_nested_deadlock_is_not_retried() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    let calls = Arc::new(AtomicU32::new(0));

    session.begin_transaction().await?;
    driver.fail_statement_containing("update \"stock\"", deadlock());

    let counter = calls.clone();
    let result: Result<()> = session
        .transaction(
            move |s| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    s.statement("update \"stock\" set \"qty\" = 0", &[]).await?;
                    Ok(())
                })
            },
            3,
        )
        .await;

    let err = result.unwrap_err();
    let QuarryError::Deadlock(inner) = &err else {
        panic!("expected a deadlock error, got {err:?}");
    };
    assert!(matches!(inner.as_ref(), QuarryError::Query(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.transaction_level(), 1);
    assert_eq!(
        driver.journal(),
        vec![
            "begin",
            "tx.unprepared: SAVEPOINT trans2",
            "tx.execute: update \"stock\" set \"qty\" = 0",
        ]
    );

    // The outer caller owns the real rollback
    session.roll_back(None).await?;
    assert_eq!(driver.count("rollback"), 1);
    Ok(())
}

#[tokio::test]
async fn test_deadlock_propagates_through_nested_levels_without_rewrapping() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    session.begin_transaction().await?;
    session.begin_transaction().await?;
    driver.fail_statement_containing("update \"stock\"", deadlock());

    let result: Result<()> = session
        .transaction(
            |s| {
                Box::pin(async move {
                    s.statement("update \"stock\" set \"qty\" = 0", &[]).await?;
                    Ok(())
                })
            },
            1,
        )
        .await;

    let err = result.unwrap_err();
    assert!(matches!(&err, QuarryError::Deadlock(inner) if !matches!(inner.as_ref(), QuarryError::Deadlock(_))));
    assert_eq!(session.transaction_level(), 2);
    Ok(())
}

#[tokio::test]
async fn test_commit_deadlock_is_retried() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    let calls = Arc::new(AtomicU32::new(0));

    driver.fail_next_commit(deadlock());
    let counter = calls.clone();
    session
        .transaction(
            move |s| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    s.statement("update \"stock\" set \"qty\" = 0", &[]).await?;
                    Ok(())
                })
            },
            2,
        )
        .await?;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(driver.count("commit"), 2);
    assert_eq!(session.transaction_level(), 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_commit_closes_transaction() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    session.begin_transaction().await?;
    driver.fail_next_commit(lost_connection());
    let err = session.commit().await.unwrap_err();

    assert!(matches!(err, QuarryError::Driver(_)));
    assert!(err.causes_lost_connection());
    assert_eq!(session.transaction_level(), 0);

    session.begin_transaction().await?;
    assert_eq!(driver.count("begin"), 2);
    Ok(())
}

#[tokio::test]
async fn test_begin_reconnects_after_lost_connection() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    driver.fail_next_begin(lost_connection());

    session.begin_transaction().await?;

    assert_eq!(session.transaction_level(), 1);
    assert_eq!(driver.journal(), vec!["begin", "reconnect", "begin"]);
    Ok(())
}

#[tokio::test]
async fn test_begin_failure_leaves_level_unchanged() {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    driver.fail_next_begin(unique_violation());

    assert!(session.begin_transaction().await.is_err());
    assert_eq!(session.transaction_level(), 0);
    assert_eq!(driver.count("reconnect"), 0);
}

#[tokio::test]
async fn test_after_commit_runs_at_outermost_commit() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    let ran = Arc::new(AtomicU32::new(0));

    let counter = ran.clone();
    session.after_commit(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(ran.load(Ordering::SeqCst), 1);

    session.begin_transaction().await?;
    session.begin_transaction().await?;
    let counter = ran.clone();
    session.after_commit(move || {
        counter.fetch_add(10, Ordering::SeqCst);
    });

    session.commit().await?;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    session.commit().await?;
    assert_eq!(ran.load(Ordering::SeqCst), 11);
    Ok(())
}

#[tokio::test]
async fn test_after_commit_is_dropped_with_its_savepoint() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    let ran = Arc::new(AtomicU32::new(0));

    session.begin_transaction().await?;
    let counter = ran.clone();
    session.after_commit(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    session.begin_transaction().await?;
    let counter = ran.clone();
    session.after_commit(move || {
        counter.fetch_add(100, Ordering::SeqCst);
    });
    session.roll_back(None).await?;

    session.commit().await?;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_after_commit_is_dropped_on_full_rollback() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    let ran = Arc::new(AtomicU32::new(0));

    session.begin_transaction().await?;
    let counter = ran.clone();
    session.after_commit(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    session.roll_back(None).await?;

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    Ok(())
}
