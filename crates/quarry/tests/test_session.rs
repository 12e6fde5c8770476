//! Integration tests for the session run wrapper, read routing, pretend mode,
//! the query log and event dispatch.
//!
//! These run against the scripted driver in `common`, so no database is needed.
//!
//! Run with: cargo test -p quarry --test test_session

mod common;

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::broadcast;

use common::{connection, connection_with, lost_connection, row, unique_violation, MockDriver};
use quarry::{
    BroadcastDispatcher, ConnectionConfig, Event, QuarryError, Record, Result, Target, Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_select_uses_read_handle() -> Result<()> {
    let driver = MockDriver::new();
    driver.push_rows(vec![row(vec![("id", 1)])]);
    let mut session = connection(&driver).session();

    let rows = session.select("select * from \"users\"", &[]).await?;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
    assert_eq!(driver.journal(), vec!["fetch[read]: select * from \"users\""]);
    Ok(())
}

#[tokio::test]
async fn test_lost_connection_is_retried_once() -> Result<()> {
    init_tracing();
    let driver = MockDriver::new();
    driver.fail_next_statement(lost_connection());
    driver.push_rows(vec![row(vec![("id", 7)])]);
    let mut session = connection(&driver).session();

    let rows = session.select("select * from \"users\"", &[]).await?;

    assert_eq!(rows.len(), 1);
    assert_eq!(
        driver.journal(),
        vec![
            "fetch[read]: select * from \"users\"",
            "reconnect",
            "fetch[read]: select * from \"users\"",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_second_lost_connection_is_returned() {
    let driver = MockDriver::new();
    driver.fail_next_statement(lost_connection());
    driver.fail_next_statement(lost_connection());
    let mut session = connection(&driver).session();

    let err = session
        .update("update \"users\" set \"a\" = ?", &[Value::Int(1)])
        .await
        .unwrap_err();

    assert!(err.causes_lost_connection());
    assert_eq!(driver.count("execute:"), 2);
    assert_eq!(driver.count("reconnect"), 1);
}

#[tokio::test]
async fn test_lost_connection_inside_transaction_is_not_retried() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    session.begin_transaction().await?;
    driver.fail_next_statement(lost_connection());

    let err = session
        .statement("update \"users\" set \"a\" = 1", &[])
        .await
        .unwrap_err();

    assert!(err.causes_lost_connection());
    assert_eq!(driver.count("reconnect"), 0);
    assert_eq!(driver.count("tx.execute:"), 1);
    Ok(())
}

#[tokio::test]
async fn test_query_error_carries_statement_details() {
    let driver = MockDriver::new();
    driver.fail_next_statement(unique_violation());
    let mut session = connection(&driver).session();

    let err = session
        .insert(
            "insert into \"users\" (\"email\") values (?)",
            &[Value::from("a@x.io")],
        )
        .await
        .unwrap_err();

    let QuarryError::Query(query_error) = &err else {
        panic!("expected a query error, got {err:?}");
    };
    assert_eq!(query_error.connection_name, "default");
    assert_eq!(query_error.sql, "insert into \"users\" (\"email\") values (?)");
    assert_eq!(query_error.bindings, vec![Value::from("a@x.io")]);
    assert_eq!(
        query_error.rendered_sql,
        "insert into \"users\" (\"email\") values ('a@x.io')"
    );
    assert_eq!(query_error.source.code.as_deref(), Some("23505"));
    assert!(err.to_string().contains("(Connection: default, SQL: insert into"));
    assert_eq!(driver.count("reconnect"), 0);
}

#[tokio::test]
async fn test_scalar() -> Result<()> {
    let driver = MockDriver::new();
    driver.push_rows(vec![row(vec![("total", 12)])]);
    driver.push_rows(vec![row(vec![("a", 1), ("b", 2)])]);
    let mut session = connection(&driver).session();

    assert_eq!(
        session.scalar("select count(*) as total", &[]).await?,
        Some(Value::Int(12))
    );

    let err = session.scalar("select 1 as a, 2 as b", &[]).await.unwrap_err();
    assert!(matches!(err, QuarryError::MultipleColumnsSelected));

    assert_eq!(session.scalar("select 1 where false", &[]).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_sticky_reads_after_write() -> Result<()> {
    let driver = MockDriver::new();
    let config = ConnectionConfig {
        sticky: true,
        ..ConnectionConfig::new("postgres://mock/quarry_test")
    };
    let mut session = connection_with(&driver, config).session();

    assert_eq!(session.read_target(), Target::Read);
    session
        .insert("insert into \"users\" (\"a\") values (?)", &[Value::Int(1)])
        .await?;
    assert!(session.has_modified_records());
    session.select("select * from \"users\"", &[]).await?;

    session.forget_record_modification_state();
    session.select("select * from \"users\"", &[]).await?;

    assert_eq!(
        driver.journal(),
        vec![
            "execute: insert into \"users\" (\"a\") values (?)",
            "fetch[write]: select * from \"users\"",
            "fetch[read]: select * from \"users\"",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_writes_do_not_stick_without_sticky_config() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    session.statement("delete from \"users\"", &[]).await?;
    assert!(session.has_modified_records());
    assert_eq!(session.read_target(), Target::Read);

    session.use_write_connection_when_reading(true);
    assert_eq!(session.read_target(), Target::Write);
    Ok(())
}

#[tokio::test]
async fn test_affecting_statement_marks_modified_only_when_rows_change() -> Result<()> {
    let driver = MockDriver::new();
    driver.push_affected(0);
    driver.push_affected(3);
    let mut session = connection(&driver).session();

    assert_eq!(session.update("update \"users\" set \"a\" = 1", &[]).await?, 0);
    assert!(!session.has_modified_records());

    assert_eq!(session.delete("delete from \"users\"", &[]).await?, 3);
    assert!(session.has_modified_records());
    Ok(())
}

#[tokio::test]
async fn test_insert_get_id_reads_sequence_column() -> Result<()> {
    let driver = MockDriver::new();
    driver.push_rows(vec![row(vec![("user_id", 42)])]);
    let mut session = connection(&driver).session();

    let id = session
        .insert_get_id(
            "insert into \"users\" (\"name\") values (?) returning \"user_id\"",
            &[Value::from("a")],
            "user_id",
        )
        .await?;

    assert_eq!(id, Value::Int(42));
    assert!(session.has_modified_records());
    assert_eq!(driver.count("fetch[write]:"), 1);
    Ok(())
}

#[tokio::test]
async fn test_unprepared() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    assert!(session.unprepared("create table t (id int); drop table t").await?);
    assert_eq!(
        driver.journal(),
        vec!["unprepared: create table t (id int); drop table t"]
    );
    Ok(())
}

#[tokio::test]
async fn test_pretend_collects_statements_without_running_them() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    session.enable_query_log();
    session.select("select 1", &[]).await?;

    let queries = session
        .pretend(|s| {
            Box::pin(async move {
                s.begin_transaction().await?;
                let rows = s.select("select * from \"users\"", &[]).await?;
                assert!(rows.is_empty());
                s.connection()
                    .table("users")
                    .where_("id", 1)?
                    .update(s, Record::new().set("name", "x"))
                    .await?;
                s.commit().await?;
                Ok(())
            })
        })
        .await?;

    let sql: Vec<&str> = queries.iter().map(|q| q.sql.as_str()).collect();
    assert_eq!(
        sql,
        vec![
            "select * from \"users\"",
            "update \"users\" set \"name\" = ? where \"id\" = ?",
        ]
    );
    assert_eq!(queries[1].bindings, vec![Value::from("x"), Value::Int(1)]);

    // Only the statement run before pretending reached the driver
    assert_eq!(driver.journal(), vec!["fetch[read]: select 1"]);
    assert_eq!(session.query_log().len(), 1);
    assert_eq!(session.query_log()[0].sql, "select 1");
    assert!(session.logging());
    assert!(!session.pretending());
    assert!(!session.has_modified_records());
    Ok(())
}

#[tokio::test]
async fn test_pretend_restores_state_on_error() {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    let result = session
        .pretend(|s| {
            Box::pin(async move {
                s.statement("delete from \"users\"", &[]).await?;
                Err(QuarryError::validation("stop"))
            })
        })
        .await;

    assert!(result.unwrap_err().is_validation());
    assert!(!session.pretending());
    assert!(!session.logging());
    assert!(session.query_log().is_empty());
    assert!(driver.journal().is_empty());
}

#[tokio::test]
async fn test_query_log() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();

    session.select("select 1", &[]).await?;
    assert!(session.query_log().is_empty());

    session.enable_query_log();
    session.select("select ?", &[Value::Int(2)]).await?;
    session.statement("select 3", &[]).await?;
    assert_eq!(session.query_log().len(), 2);
    assert_eq!(session.query_log()[0].bindings, vec![Value::Int(2)]);
    assert!(session.query_log()[0].time_ms >= 0.0);

    session.flush_query_log();
    assert!(session.query_log().is_empty());

    session.disable_query_log();
    session.select("select 4", &[]).await?;
    assert!(session.query_log().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_log_queries_config_enables_log_for_new_sessions() -> Result<()> {
    let driver = MockDriver::new();
    let config = ConnectionConfig {
        log_queries: true,
        ..ConnectionConfig::new("postgres://mock/quarry_test")
    };
    let mut session = connection_with(&driver, config).session();

    assert!(session.logging());
    session.select("select 1", &[]).await?;
    assert_eq!(session.query_log().len(), 1);

    session.reset_total_query_duration();
    assert!(session.total_query_duration().is_zero());
    Ok(())
}

#[tokio::test]
async fn test_before_executing_hooks_run_in_order() -> Result<()> {
    let driver = MockDriver::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let connection_seen = seen.clone();
    let connection = connection(&driver).before_executing(move |sql, bindings| {
        connection_seen
            .lock()
            .unwrap()
            .push(format!("connection: {sql} {}", bindings.len()));
    });

    let mut session = connection.session();
    let session_seen = seen.clone();
    session.before_executing(move |sql, _| {
        session_seen.lock().unwrap().push(format!("session: {sql}"));
    });

    session.select("select ?", &[Value::Int(1)]).await?;

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["connection: select ? 1".to_string(), "session: select ?".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_hooks_run_in_pretend_mode() -> Result<()> {
    let driver = MockDriver::new();
    let seen = Arc::new(Mutex::new(0));
    let mut session = connection(&driver).session();
    let counter = seen.clone();
    session.before_executing(move |_, _| *counter.lock().unwrap() += 1);

    session
        .pretend(|s| {
            Box::pin(async move {
                s.statement("delete from \"users\"", &[]).await?;
                Ok(())
            })
        })
        .await?;

    assert_eq!(*seen.lock().unwrap(), 1);
    Ok(())
}

#[tokio::test]
async fn test_query_events_outside_transaction() -> Result<()> {
    let driver = MockDriver::new();
    let dispatcher = BroadcastDispatcher::new(16);
    let mut rx = dispatcher.subscribe();
    let connection = connection(&driver).with_dispatcher(Arc::new(dispatcher.clone()));
    let mut session = connection.session();

    session.select("select ?", &[Value::Int(1)]).await?;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    let Event::QueryExecuted(executed) = &events[0] else {
        panic!("expected a query event, got {:?}", events[0]);
    };
    assert_eq!(executed.sql, "select ?");
    assert_eq!(executed.bindings, vec![Value::Int(1)]);
    assert_eq!(executed.session_id, session.id());
    assert_eq!(executed.connection_name, "default");
    assert!(!executed.in_transaction);
    Ok(())
}

#[tokio::test]
async fn test_query_events_wait_for_commit() -> Result<()> {
    let driver = MockDriver::new();
    let dispatcher = BroadcastDispatcher::new(16);
    let mut rx = dispatcher.subscribe();
    let connection = connection(&driver).with_dispatcher(Arc::new(dispatcher.clone()));
    let mut session = connection.session();

    session.begin_transaction().await?;
    session.statement("update \"users\" set \"a\" = 1", &[]).await?;
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [Event::TransactionBeginning(_)]
    ));

    session.commit().await?;
    let events = drain(&mut rx);
    assert!(matches!(
        events.as_slice(),
        [
            Event::TransactionCommitting(_),
            Event::QueryExecuted(executed),
            Event::TransactionCommitted(_),
        ] if executed.in_transaction
    ));
    Ok(())
}

#[tokio::test]
async fn test_query_events_are_dropped_on_rollback() -> Result<()> {
    let driver = MockDriver::new();
    let dispatcher = BroadcastDispatcher::new(16);
    let mut rx = dispatcher.subscribe();
    let connection = connection(&driver).with_dispatcher(Arc::new(dispatcher.clone()));
    let mut session = connection.session();

    session.begin_transaction().await?;
    session.statement("update \"users\" set \"a\" = 1", &[]).await?;
    session.roll_back(None).await?;

    let events = drain(&mut rx);
    assert!(matches!(
        events.as_slice(),
        [Event::TransactionBeginning(_), Event::TransactionRolledBack(_)]
    ));
    assert!(events.iter().all(|event| event.session_id() == session.id()));
    Ok(())
}

#[tokio::test]
async fn test_cursor_streams_from_driver() -> Result<()> {
    let driver = MockDriver::new();
    driver.push_rows(vec![row(vec![("id", 1)]), row(vec![("id", 2)])]);
    let mut session = connection(&driver).session();

    let rows: Vec<_> = session
        .cursor("select \"id\" from \"users\"", &[])
        .await?
        .collect()
        .await;

    let ids: Vec<Value> = rows
        .into_iter()
        .map(|row| row.map(|row| row.get("id").cloned().unwrap_or(Value::Null)))
        .collect::<Result<_>>()?;
    assert_eq!(ids, vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(driver.journal(), vec!["cursor[read]: select \"id\" from \"users\""]);
    Ok(())
}

#[tokio::test]
async fn test_cursor_errors_are_query_errors() -> Result<()> {
    let driver = MockDriver::new();
    driver.fail_next_statement(unique_violation());
    let mut session = connection(&driver).session();

    let mut rows = session.cursor("select ?", &[Value::Int(1)]).await?;
    let first = rows.next().await;

    match first {
        Some(Err(QuarryError::Query(err))) => assert_eq!(err.rendered_sql, "select 1"),
        other => panic!("expected a query error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_cursor_reopens_after_lost_connection() -> Result<()> {
    let driver = MockDriver::new();
    driver.fail_next_statement(lost_connection());
    driver.push_rows(vec![row(vec![("id", 1)]), row(vec![("id", 2)])]);
    let mut session = connection(&driver).session();

    let rows: Vec<_> = session
        .cursor("select \"id\" from \"users\"", &[])
        .await?
        .collect()
        .await;

    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.is_ok()));
    assert_eq!(
        driver.journal(),
        vec![
            "cursor[read]: select \"id\" from \"users\"",
            "reconnect",
            "cursor[read]: select \"id\" from \"users\"",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_cursor_second_lost_connection_is_yielded() -> Result<()> {
    let driver = MockDriver::new();
    driver.fail_next_statement(lost_connection());
    driver.fail_next_statement(lost_connection());
    let mut session = connection(&driver).session();

    let mut rows = session.cursor("select 1", &[]).await?;
    match rows.next().await {
        Some(Err(err)) => assert!(err.causes_lost_connection()),
        other => panic!("expected a lost connection error, got {other:?}"),
    }
    assert!(rows.next().await.is_none());
    assert_eq!(driver.count("reconnect"), 1);
    Ok(())
}

#[tokio::test]
async fn test_cursor_inside_transaction_uses_transaction_connection() -> Result<()> {
    let driver = MockDriver::new();
    let mut session = connection(&driver).session();
    session.begin_transaction().await?;
    driver.push_rows(vec![row(vec![("id", 1)])]);

    let count = session
        .cursor("select \"id\" from \"users\"", &[])
        .await?
        .count()
        .await;

    assert_eq!(count, 1);
    assert_eq!(
        driver.journal(),
        vec!["begin", "tx.fetch: select \"id\" from \"users\""]
    );
    Ok(())
}

#[tokio::test]
async fn test_column_listing() -> Result<()> {
    let driver = MockDriver::new();
    driver.push_rows(vec![
        row(vec![("column_name", "id")]),
        row(vec![("column_name", "email")]),
    ]);
    let mut session = connection(&driver).session();

    let columns = session.get_column_listing("users").await?;

    assert_eq!(columns, vec!["id".to_string(), "email".to_string()]);
    assert_eq!(driver.count("fetch[write]:"), 1);
    assert_eq!(driver.bindings()[0].last(), Some(&Value::from("users")));
    Ok(())
}
