//! Tests for the tandem transaction manager

use std::sync::Arc;

use tandem::context::TaskContext;
use tandem::prelude::*;
use tandem::testing::{MockConnectorBuilder, Outcome};

fn setup() -> (Arc<TransactionManager>, Arc<MockConnectorBuilder>) {
    let builder = Arc::new(MockConnectorBuilder::new());
    let pool = Pool::new(
        PoolConfig::default().with_size(2).with_overflow_factor(3),
        builder.clone(),
    );
    (Arc::new(TransactionManager::new(pool)), builder)
}

// ==================== Explicit transactions ====================

#[tokio::test]
async fn test_explicit_write_transaction_shares_one_connector() {
    let (manager, builder) = setup();
    let script = builder.script();
    script
        .on(
            "INSERT",
            Outcome::Exec {
                affected_rows: 1,
                last_insert_id: Some(42),
            },
        )
        .await;
    script
        .on(
            "UPDATE",
            Outcome::Exec {
                affected_rows: 1,
                last_insert_id: None,
            },
        )
        .await;

    let mut ctx = TaskContext::new();
    manager.begin(&mut ctx, Role::Write, false).await.unwrap();
    manager
        .command(&mut ctx, "INSERT INTO t (a) VALUES (?)", &[Value::Int64(42)])
        .await
        .unwrap();
    manager
        .command(
            &mut ctx,
            "UPDATE t SET a = ? WHERE id = ?",
            &[Value::Int64(1), Value::Int64(42)],
        )
        .await
        .unwrap();
    manager.commit(&mut ctx, false).await.unwrap();

    // Both statements ran on the single write connector
    assert_eq!(builder.built(Role::Write), 1);
    assert_eq!(builder.built(Role::Read), 0);
    let journal = script.journal().await;
    assert_eq!(journal[0], "BEGIN");
    assert!(journal[1].starts_with("INSERT"));
    assert!(journal[2].starts_with("UPDATE"));
    assert_eq!(journal[3], "COMMIT");

    // Insert id persists past the UPDATE; affected rows reflect the UPDATE
    let info = manager.last_exec(&mut ctx);
    assert_eq!(info.insert_id, Some(42));
    assert_eq!(info.affected_rows, 1);
    assert_eq!(info.errno, 0);

    // Released back to the write pool with its statement count intact
    assert_eq!(manager.pool().idle_count(Role::Write), 1);
    let conn = manager.pool().get(Role::Write).await.unwrap();
    assert!(conn.exec_count() >= 3, "BEGIN + 2 statements + COMMIT");
    manager.pool().put(conn).await;

    manager.pool().close().await;
}

#[tokio::test]
async fn test_commands_in_transaction_do_not_mint_more() {
    let (manager, builder) = setup();
    let mut ctx = TaskContext::new();

    manager.begin(&mut ctx, Role::Write, false).await.unwrap();
    for i in 0..5 {
        manager
            .command(&mut ctx, &format!("SELECT {i}"), &[])
            .await
            .unwrap();
    }
    manager.commit(&mut ctx, false).await.unwrap();

    assert_eq!(builder.built(Role::Write), 1);
    assert_eq!(builder.built(Role::Read), 0, "reads inside a write tx stay on the held connector");
    manager.pool().close().await;
}

#[tokio::test]
async fn test_failed_commit_rolls_back_and_releases() {
    let (manager, builder) = setup();
    let script = builder.script();
    script.fail_times("COMMIT", 1213, "deadlock found", 1).await;

    let mut ctx = TaskContext::new();
    manager.begin(&mut ctx, Role::Write, false).await.unwrap();
    manager
        .command(&mut ctx, "INSERT INTO t (a) VALUES (1)", &[])
        .await
        .unwrap();

    let err = manager.commit(&mut ctx, false).await.unwrap_err();
    assert_eq!(err.errno(), Some(1213));
    assert!(!manager.is_running(&mut ctx));
    assert_eq!(manager.last_exec(&mut ctx).errno, 1213);

    // A ROLLBACK went out and the connector came back to the pool
    assert_eq!(script.journal_matching("ROLLBACK").await.len(), 1);
    assert_eq!(manager.pool().idle_count(Role::Write), 1);

    // The released connector still passes the health check
    let conn = manager.pool().get(Role::Write).await.unwrap();
    assert!(manager.pool().is_healthy(&conn));
    assert_eq!(builder.built(Role::Write), 1);
    manager.pool().put(conn).await;

    manager.pool().close().await;
}

#[tokio::test]
async fn test_rollback_releases_and_always_succeeds() {
    let (manager, builder) = setup();
    builder
        .script()
        .fail_times("ROLLBACK", 2013, "lost connection", 1)
        .await;

    let mut ctx = TaskContext::new();
    manager.begin(&mut ctx, Role::Write, false).await.unwrap();

    // The wire ROLLBACK fails; rollback still reports success and releases
    manager.rollback(&mut ctx).await.unwrap();
    assert!(!manager.is_running(&mut ctx));
    assert_eq!(manager.pool().idle_count(Role::Write), 1);

    manager.pool().close().await;
}

#[tokio::test]
async fn test_begin_failure_surfaces_transaction_error() {
    let (manager, _builder) = setup();
    manager.pool().close().await;

    let mut ctx = TaskContext::new();
    let err = manager.begin(&mut ctx, Role::Write, false).await.unwrap_err();
    assert!(matches!(err, Error::Transaction { .. }));
    assert!(!manager.is_running(&mut ctx));
}

#[tokio::test]
async fn test_wire_begin_failure_releases_connector() {
    let (manager, builder) = setup();
    builder
        .script()
        .fail_times("BEGIN", 1045, "access denied", 1)
        .await;

    let mut ctx = TaskContext::new();
    let err = manager.begin(&mut ctx, Role::Write, false).await.unwrap_err();
    assert_eq!(err.errno(), Some(1045));
    assert!(!manager.is_running(&mut ctx));
    assert_eq!(manager.last_exec(&mut ctx).errno, 1045);
    assert_eq!(manager.pool().idle_count(Role::Write), 1);

    manager.pool().close().await;
}

// ==================== Implicit transactions ====================

#[tokio::test]
async fn test_implicit_read_mints_read_connector() {
    let (manager, builder) = setup();
    builder
        .script()
        .rows(
            "SELECT",
            vec![Row::new(vec!["id".into()], vec![Value::Int64(1)])],
        )
        .await;

    let mut ctx = TaskContext::new();
    let out = manager
        .command(&mut ctx, "SELECT * FROM t WHERE id = 1", &[])
        .await
        .unwrap();

    assert_eq!(out.rows.len(), 1);
    assert_eq!(builder.built(Role::Read), 1);
    assert_eq!(builder.built(Role::Write), 0);
    assert_eq!(manager.pool().read_connect_num(), 1);
    assert_eq!(manager.pool().write_connect_num(), 0);
    assert_eq!(manager.pool().idle_count(Role::Read), 1, "returned to the read pool");
    assert!(!manager.is_running(&mut ctx));

    manager.pool().close().await;
}

#[tokio::test]
async fn test_implicit_transaction_sends_no_wire_begin_commit() {
    let (manager, builder) = setup();
    let mut ctx = TaskContext::new();

    manager
        .command(&mut ctx, "DELETE FROM t WHERE id = 1", &[])
        .await
        .unwrap();

    let journal = builder.script().journal().await;
    assert_eq!(journal, vec!["DELETE FROM t WHERE id = 1".to_string()]);

    manager.pool().close().await;
}

#[tokio::test]
async fn test_implicit_failure_force_releases() {
    let (manager, builder) = setup();
    builder
        .script()
        .fail_times("UPDATE", 1062, "duplicate entry", 1)
        .await;

    let mut ctx = TaskContext::new();
    let err = manager
        .command(&mut ctx, "UPDATE t SET a = 1", &[])
        .await
        .unwrap_err();

    assert_eq!(err.errno(), Some(1062));
    assert!(!manager.is_running(&mut ctx));
    assert_eq!(manager.last_exec(&mut ctx).errno, 1062);
    // No wire ROLLBACK for an implicit transaction, but the connector is back
    assert!(builder.script().journal_matching("ROLLBACK").await.is_empty());
    assert_eq!(manager.pool().idle_count(Role::Write), 1);

    manager.pool().close().await;
}

// ==================== Idempotence ====================

#[tokio::test]
async fn test_begin_twice_is_one_begin() {
    let (manager, builder) = setup();
    let mut ctx = TaskContext::new();

    manager.begin(&mut ctx, Role::Write, false).await.unwrap();
    manager.begin(&mut ctx, Role::Read, false).await.unwrap();

    // Second begin is a no-op: same connector, same model
    assert_eq!(manager.model(&mut ctx), Some(Role::Write));
    assert_eq!(builder.script().journal_matching("BEGIN").await.len(), 1);

    manager.rollback(&mut ctx).await.unwrap();
    manager.pool().close().await;
}

#[tokio::test]
async fn test_commit_when_idle_is_noop() {
    let (manager, builder) = setup();
    let mut ctx = TaskContext::new();

    manager.commit(&mut ctx, false).await.unwrap();
    assert!(builder.script().journal().await.is_empty());

    manager.pool().close().await;
}

// ==================== Task isolation ====================

#[tokio::test]
async fn test_tasks_have_disjoint_transaction_state() {
    let (manager, builder) = setup();

    let mut ctx_a = TaskContext::new();
    let mut ctx_b = TaskContext::new();

    manager.begin(&mut ctx_a, Role::Write, false).await.unwrap();
    assert!(manager.is_running(&mut ctx_a));
    assert!(!manager.is_running(&mut ctx_b), "task B sees no transaction");

    manager.begin(&mut ctx_b, Role::Read, false).await.unwrap();
    assert_eq!(manager.model(&mut ctx_a), Some(Role::Write));
    assert_eq!(manager.model(&mut ctx_b), Some(Role::Read));
    assert_eq!(builder.built(Role::Write), 1);
    assert_eq!(builder.built(Role::Read), 1);

    manager.rollback(&mut ctx_a).await.unwrap();
    assert!(manager.is_running(&mut ctx_b), "task A's rollback leaves B running");
    manager.rollback(&mut ctx_b).await.unwrap();

    manager.pool().close().await;
}

#[tokio::test]
async fn test_concurrent_tasks_each_get_their_own_connector() {
    let (manager, _builder) = setup();

    let mut tasks = Vec::new();
    for i in 0..4 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            let mut ctx = TaskContext::new();
            manager.begin(&mut ctx, Role::Write, false).await.unwrap();
            manager
                .command(&mut ctx, &format!("INSERT INTO t (a) VALUES ({i})"), &[])
                .await
                .unwrap();
            tokio::task::yield_now().await;
            manager.commit(&mut ctx, false).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Everything came back; nothing leaked
    let pool = manager.pool();
    assert_eq!(pool.write_connect_num(), pool.idle_count(Role::Write));
    pool.close().await;
}
