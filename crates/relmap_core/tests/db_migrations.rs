use relmap_core::{
    open_session, open_session_in_memory, Engine, EngineConfig, FieldSpec, FieldType,
    HookDispatcher, MigrationStep, ModelDescriptor, OrmError, Record, SchemaRegistry,
    SessionConfig, Value,
};
use rusqlite::Connection;

fn user_v1() -> ModelDescriptor {
    ModelDescriptor::builder("User")
        .field(FieldSpec::new("name", FieldType::Text))
        .field(FieldSpec::new("email", FieldType::Text).unique())
        .many_to_many("roles", "Role")
        .build()
}

fn engine_with(models: Vec<ModelDescriptor>) -> Engine {
    let mut registry = SchemaRegistry::new();
    for model in models {
        registry.register(model).unwrap();
    }
    Engine::new(registry, HookDispatcher::new(), EngineConfig::default()).unwrap()
}

fn role() -> ModelDescriptor {
    ModelDescriptor::builder("Role")
        .field(FieldSpec::new("label", FieldType::Text))
        .build()
}

fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table});"))
        .unwrap();
    stmt.query_map([], |row| row.get::<_, String>(1))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn auto_migrate_is_idempotent() {
    let engine = engine_with(vec![user_v1(), role()]);
    let session = open_session_in_memory(&SessionConfig::default()).unwrap();

    let applied = engine.auto_migrate(&session).unwrap();
    assert_eq!(applied, 3);
    assert_eq!(
        table_columns(session.connection(), "users"),
        ["id", "created_at", "updated_at", "deleted_at", "name", "email"]
    );
    assert_eq!(
        table_columns(session.connection(), "user_roles"),
        ["user_id", "role_id"]
    );

    assert_eq!(engine.auto_migrate(&session).unwrap(), 0);
    assert!(engine.migrations().plan_all(&session).unwrap().is_empty());
}

#[test]
fn migrated_file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relmap.db");
    let engine = engine_with(vec![user_v1(), role()]);

    let key = {
        let session = open_session(&path, &SessionConfig::default()).unwrap();
        engine.auto_migrate(&session).unwrap();
        let mut user = Record::new("User")
            .with("name", "张三")
            .with("email", "a@x.com");
        engine.records().create(&session, &mut user).unwrap()
    };

    let session = open_session(&path, &SessionConfig::default()).unwrap();
    assert!(engine.migrations().plan_all(&session).unwrap().is_empty());
    let loaded = engine.records().find_by_key(&session, "User", key).unwrap();
    assert_eq!(loaded.get("name"), Some(&Value::from("张三")));
}

#[test]
fn new_fields_are_added_without_touching_existing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relmap.db");

    let key = {
        let engine = engine_with(vec![user_v1(), role()]);
        let session = open_session(&path, &SessionConfig::default()).unwrap();
        engine.auto_migrate(&session).unwrap();
        let mut user = Record::new("User").with("name", "a").with("email", "a@x.com");
        engine.records().create(&session, &mut user).unwrap()
    };

    let user_v2 = ModelDescriptor::builder("User")
        .field(FieldSpec::new("name", FieldType::Text))
        .field(FieldSpec::new("email", FieldType::Text).unique())
        .field(FieldSpec::new("age", FieldType::Integer))
        .field(FieldSpec::new("nickname", FieldType::Text).nullable().unique())
        .many_to_many("roles", "Role")
        .build();
    let engine = engine_with(vec![user_v2, role()]);
    let session = open_session(&path, &SessionConfig::default()).unwrap();

    let plan = engine.migrations().plan(&session, "User").unwrap();
    let steps: Vec<String> = plan.steps().iter().map(ToString::to_string).collect();
    assert_eq!(
        steps,
        [
            "add_column users.age",
            "add_column users.nickname",
            "create_unique_index users.nickname"
        ]
    );
    assert_eq!(engine.migrations().apply(&session, &plan).unwrap(), 3);

    let loaded = engine.records().find_by_key(&session, "User", key).unwrap();
    assert_eq!(loaded.get("age"), Some(&Value::Integer(0)));
    assert_eq!(loaded.get("nickname"), Some(&Value::Null));
    assert!(engine.migrations().plan_all(&session).unwrap().is_empty());

    let mut first = Record::new("User")
        .with("name", "b")
        .with("email", "b@x.com")
        .with("age", 3)
        .with("nickname", "bee");
    engine.records().create(&session, &mut first).unwrap();
    let mut second = Record::new("User")
        .with("name", "c")
        .with("email", "c@x.com")
        .with("age", 4)
        .with("nickname", "bee");
    let err = engine.records().create(&session, &mut second).unwrap_err();
    assert!(matches!(
        err,
        OrmError::UniqueConstraint { ref field, .. } if field.as_deref() == Some("nickname")
    ));
}

#[test]
fn failing_step_is_reported_and_earlier_steps_stay_applied() {
    let session = open_session_in_memory(&SessionConfig::default()).unwrap();
    session
        .connection()
        .execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER,
                name INTEGER NOT NULL,
                email TEXT NOT NULL
            );
            INSERT INTO users (created_at, updated_at, name, email) VALUES (1, 1, 1, 'dup@x.com');
            INSERT INTO users (created_at, updated_at, name, email) VALUES (1, 1, 2, 'dup@x.com');",
        )
        .unwrap();

    let engine = engine_with(vec![ModelDescriptor::builder("User")
        .field(FieldSpec::new("name", FieldType::Text))
        .field(FieldSpec::new("age", FieldType::Integer).default_value(1))
        .field(FieldSpec::new("email", FieldType::Text).unique())
        .build()]);

    let plan = engine.migrations().plan_all(&session).unwrap();
    assert_eq!(plan.len(), 2);
    assert!(matches!(plan.steps()[0], MigrationStep::AddColumn { .. }));
    assert!(matches!(
        plan.steps()[1],
        MigrationStep::CreateUniqueIndex { .. }
    ));

    let err = engine.migrations().apply(&session, &plan).unwrap_err();
    match err {
        OrmError::Migration {
            step_index, step, ..
        } => {
            assert_eq!(step_index, 1);
            assert_eq!(step, "create_unique_index users.email");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(table_columns(session.connection(), "users").contains(&"age".to_string()));
}

#[test]
fn migration_inside_rolled_back_transaction_leaves_no_schema() {
    let engine = engine_with(vec![user_v1(), role()]);
    let mut session = open_session_in_memory(&SessionConfig::default()).unwrap();

    let mut tx = session.begin().unwrap();
    engine.auto_migrate(&tx).unwrap();
    tx.rollback().unwrap();
    drop(tx);

    assert_eq!(engine.migrations().plan_all(&session).unwrap().len(), 3);
}
