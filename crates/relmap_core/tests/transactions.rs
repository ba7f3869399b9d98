use relmap_core::{
    open_session, open_session_in_memory, CommitFailure, DbError, Engine, EngineConfig, Executor,
    FieldSpec, FieldType, HookDispatcher, ModelDescriptor, OrmError, Record, SchemaRegistry,
    Session, SessionConfig, TxState, Value,
};
use std::sync::Arc;
use std::thread;

fn engine() -> Engine {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            ModelDescriptor::builder("Account")
                .field(FieldSpec::new("owner", FieldType::Text).unique())
                .field(FieldSpec::new("balance", FieldType::Integer).default_value(0))
                .build(),
        )
        .unwrap();
    Engine::new(registry, HookDispatcher::new(), EngineConfig::default()).unwrap()
}

fn setup() -> (Engine, Session) {
    let engine = engine();
    let session = open_session_in_memory(&SessionConfig::default()).unwrap();
    engine.auto_migrate(&session).unwrap();
    (engine, session)
}

fn account(owner: &str, balance: i64) -> Record {
    Record::new("Account")
        .with("owner", owner)
        .with("balance", balance)
}

#[test]
fn rollback_discards_every_operation() {
    let (engine, mut session) = setup();
    let mut existing = account("alice", 100);
    let alice = engine.records().create(&session, &mut existing).unwrap();

    let mut tx = session.begin().unwrap();
    let mut bob = account("bob", 5);
    engine.records().create(&tx, &mut bob).unwrap();
    engine
        .records()
        .update_field(&tx, &mut existing, "balance", 50)
        .unwrap();
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TxState::RolledBack);
    drop(tx);

    assert_eq!(engine.records().count(&session, "Account", None).unwrap(), 1);
    let stored = engine
        .records()
        .find_by_key(&session, "Account", alice)
        .unwrap();
    assert_eq!(stored.get("balance"), Some(&Value::Integer(100)));
}

#[test]
fn commit_makes_every_operation_visible() {
    let (engine, mut session) = setup();

    let mut tx = session.begin().unwrap();
    let mut alice = account("alice", 10);
    let mut bob = account("bob", 20);
    engine.records().create(&tx, &mut alice).unwrap();
    engine.records().create(&tx, &mut bob).unwrap();
    engine.records().delete(&tx, &mut bob).unwrap();
    tx.commit().unwrap();
    assert_eq!(tx.state(), TxState::Committed);
    drop(tx);

    assert_eq!(engine.records().count(&session, "Account", None).unwrap(), 1);
}

#[test]
fn failed_operation_inside_transaction_can_be_rolled_back() {
    let (engine, mut session) = setup();

    let mut tx = session.begin().unwrap();
    engine
        .records()
        .create(&tx, &mut account("alice", 1))
        .unwrap();
    let err = engine
        .records()
        .create(&tx, &mut account("alice", 2))
        .unwrap_err();
    assert!(matches!(err, OrmError::UniqueConstraint { .. }));
    assert_eq!(tx.state(), TxState::Active);
    tx.rollback().unwrap();
    drop(tx);

    assert_eq!(engine.records().count(&session, "Account", None).unwrap(), 0);
}

#[test]
fn terminal_handle_rejects_further_use() {
    let (engine, mut session) = setup();

    let mut tx = session.begin().unwrap();
    tx.commit().unwrap();

    let err = engine
        .records()
        .create(&tx, &mut account("late", 1))
        .unwrap_err();
    assert!(matches!(
        err,
        OrmError::TransactionClosed {
            state: TxState::Committed
        }
    ));
    let err = engine
        .records()
        .count(&tx, "Account", None)
        .unwrap_err();
    assert!(matches!(err, OrmError::TransactionClosed { .. }));

    assert!(matches!(
        tx.commit().unwrap_err(),
        OrmError::TransactionClosed { .. }
    ));
    assert!(matches!(
        tx.rollback().unwrap_err(),
        OrmError::TransactionClosed { .. }
    ));
    drop(tx);

    let mut tx = session.begin().unwrap();
    tx.rollback().unwrap();
    assert!(matches!(
        tx.commit().unwrap_err(),
        OrmError::TransactionClosed {
            state: TxState::RolledBack
        }
    ));
}

#[test]
fn storage_commit_failure_leaves_handle_rolled_back() {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            ModelDescriptor::builder("Account")
                .field(FieldSpec::new("owner", FieldType::Text).unique())
                .build(),
        )
        .unwrap();
    registry
        .register(
            ModelDescriptor::builder("Entry")
                .field(FieldSpec::new("account_id", FieldType::Integer).references("Account"))
                .field(FieldSpec::new("amount", FieldType::Integer))
                .build(),
        )
        .unwrap();
    let engine = Engine::new(registry, HookDispatcher::new(), EngineConfig::default()).unwrap();
    let mut session = open_session_in_memory(&SessionConfig::default()).unwrap();
    engine.auto_migrate(&session).unwrap();

    let mut tx = session.begin().unwrap();
    // Foreign keys are then checked at COMMIT instead of per statement.
    tx.connection()
        .unwrap()
        .execute_batch("PRAGMA defer_foreign_keys = ON;")
        .unwrap();
    let mut dangling = Record::new("Entry")
        .with("account_id", 404)
        .with("amount", 5);
    engine.records().create(&tx, &mut dangling).unwrap();

    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err,
        OrmError::Commit(CommitFailure::Storage(DbError::Sqlite(_)))
    ));
    assert_eq!(tx.state(), TxState::RolledBack);

    let err = engine
        .records()
        .create(&tx, &mut Record::new("Account").with("owner", "late"))
        .unwrap_err();
    assert!(matches!(
        err,
        OrmError::TransactionClosed {
            state: TxState::RolledBack
        }
    ));
    drop(tx);

    assert_eq!(engine.records().count(&session, "Entry", None).unwrap(), 0);
    assert_eq!(engine.records().count(&session, "Account", None).unwrap(), 0);
    let mut tx = session.begin().unwrap();
    tx.commit().unwrap();
}

#[test]
fn dropping_an_active_transaction_rolls_back() {
    let (engine, mut session) = setup();
    {
        let tx = session.begin().unwrap();
        engine
            .records()
            .create(&tx, &mut account("ghost", 1))
            .unwrap();
    }
    assert_eq!(engine.records().count(&session, "Account", None).unwrap(), 0);

    // The session is usable again afterwards.
    let mut tx = session.begin().unwrap();
    tx.commit().unwrap();
}

#[test]
fn sessions_on_separate_threads_share_one_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.db");
    let engine = Arc::new(engine());
    {
        let session = open_session(&path, &SessionConfig::default()).unwrap();
        engine.auto_migrate(&session).unwrap();
    }

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            let path = path.clone();
            thread::spawn(move || {
                let mut session = open_session(&path, &SessionConfig::default()).unwrap();
                let mut tx = session.begin().unwrap();
                for index in 0..5 {
                    let owner = format!("w{worker}-{index}");
                    engine
                        .records()
                        .create(&tx, &mut account(&owner, index))
                        .unwrap();
                }
                tx.commit().unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let session = open_session(&path, &SessionConfig::default()).unwrap();
    assert_eq!(engine.records().count(&session, "Account", None).unwrap(), 20);
}
