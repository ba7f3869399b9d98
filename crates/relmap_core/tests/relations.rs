use relmap_core::{
    open_session_in_memory, Engine, EngineConfig, FieldSpec, FieldType, FindQuery,
    HookDispatcher, ModelDescriptor, OrmError, Record, Related, RelatedRecords, SchemaRegistry,
    Session, SessionConfig, ValidationErrorKind, Value,
};

fn engine() -> Engine {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            ModelDescriptor::builder("User")
                .field(FieldSpec::new("name", FieldType::Text))
                .has_one("profile", "Profile", "user_id")
                .has_many("posts", "Post", "author_id")
                .many_to_many("roles", "Role")
                .has_many("ghosts", "Ghost", "user_id")
                .has_many("drafts", "Post", "owner_id")
                .build(),
        )
        .unwrap();
    registry
        .register(
            ModelDescriptor::builder("Profile")
                .field(FieldSpec::new("user_id", FieldType::Integer).references("User"))
                .field(FieldSpec::new("bio", FieldType::Text))
                .build(),
        )
        .unwrap();
    registry
        .register(
            ModelDescriptor::builder("Post")
                .field(FieldSpec::new("author_id", FieldType::Integer).references("User"))
                .field(FieldSpec::new("title", FieldType::Text))
                .build(),
        )
        .unwrap();
    registry
        .register(
            ModelDescriptor::builder("Role")
                .field(FieldSpec::new("label", FieldType::Text).unique())
                .build(),
        )
        .unwrap();
    Engine::new(
        registry,
        HookDispatcher::new(),
        EngineConfig {
            cursor_batch_size: 2,
            ..EngineConfig::default()
        },
    )
    .unwrap()
}

fn setup() -> (Engine, Session) {
    let engine = engine();
    let session = open_session_in_memory(&SessionConfig::default()).unwrap();
    engine.auto_migrate(&session).unwrap();
    (engine, session)
}

fn create(engine: &Engine, session: &Session, record: Record) -> Record {
    let mut record = record;
    engine.records().create(session, &mut record).unwrap();
    record
}

fn many(related: Related<'_>) -> Vec<Record> {
    match related {
        Related::Many(cursor) => cursor.collect::<Result<_, _>>().unwrap(),
        Related::One(_) => panic!("expected a to-many relation"),
    }
}

fn text(record: &Record, field: &str) -> String {
    record
        .get(field)
        .and_then(Value::as_str)
        .unwrap()
        .to_string()
}

#[test]
fn one_to_one_without_target_is_none() {
    let (engine, session) = setup();
    let user = create(&engine, &session, Record::new("User").with("name", "a"));

    match engine.relations().load(&session, &user, "profile").unwrap() {
        Related::One(profile) => assert!(profile.is_none()),
        Related::Many(_) => panic!("expected a to-one relation"),
    }

    let key = user.key().unwrap();
    create(
        &engine,
        &session,
        Record::new("Profile").with("user_id", key).with("bio", "hi"),
    );
    match engine.relations().load(&session, &user, "profile").unwrap() {
        Related::One(Some(profile)) => assert_eq!(text(&profile, "bio"), "hi"),
        other => panic!("expected the profile, got {other:?}"),
    }
}

#[test]
fn one_to_many_yields_live_targets_in_key_order() {
    let (engine, session) = setup();
    let author = create(&engine, &session, Record::new("User").with("name", "a"));
    let other = create(&engine, &session, Record::new("User").with("name", "b"));
    let author_key = author.key().unwrap();

    for title in ["first", "second", "third"] {
        create(
            &engine,
            &session,
            Record::new("Post")
                .with("author_id", author_key)
                .with("title", title),
        );
    }
    create(
        &engine,
        &session,
        Record::new("Post")
            .with("author_id", other.key().unwrap())
            .with("title", "foreign"),
    );
    let mut removed = engine
        .records()
        .first(
            &session,
            "Post",
            relmap_core::Predicate::eq("title", "second"),
        )
        .unwrap()
        .unwrap();
    engine.records().delete(&session, &mut removed).unwrap();

    let related = engine.relations().load(&session, &author, "posts").unwrap();
    let shown = format!("{related:?}");
    assert!(shown.starts_with("Many(RecordCursor {"), "{shown}");
    assert!(shown.contains("model: \"Post\""), "{shown}");
    let posts = many(related);
    let titles: Vec<String> = posts.iter().map(|post| text(post, "title")).collect();
    assert_eq!(titles, vec!["first", "third"]);
}

#[test]
fn many_to_many_deduplicates_repeated_join_rows() {
    let engine = engine();
    let session = open_session_in_memory(&SessionConfig::default()).unwrap();
    // A legacy join table without composite uniqueness.
    session
        .connection()
        .execute_batch(
            "CREATE TABLE user_roles (user_id INTEGER NOT NULL, role_id INTEGER NOT NULL);",
        )
        .unwrap();
    engine.auto_migrate(&session).unwrap();

    let user = create(&engine, &session, Record::new("User").with("name", "a"));
    let admin = create(&engine, &session, Record::new("Role").with("label", "admin"));
    let editor = create(&engine, &session, Record::new("Role").with("label", "editor"));

    let user_key = user.key().unwrap();
    for role_key in [
        admin.key().unwrap(),
        admin.key().unwrap(),
        editor.key().unwrap(),
        admin.key().unwrap(),
    ] {
        session
            .connection()
            .execute(
                "INSERT INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
                [user_key, role_key],
            )
            .unwrap();
    }

    let roles = many(engine.relations().load(&session, &user, "roles").unwrap());
    let labels: Vec<String> = roles.iter().map(|role| text(role, "label")).collect();
    assert_eq!(labels, vec!["admin", "editor"]);
}

#[test]
fn link_and_unlink_maintain_join_rows() {
    let (engine, session) = setup();
    let user = create(&engine, &session, Record::new("User").with("name", "a"));
    let admin = create(&engine, &session, Record::new("Role").with("label", "admin"));

    assert!(engine
        .relations()
        .link(&session, &user, "roles", &admin)
        .unwrap());
    assert!(!engine
        .relations()
        .link(&session, &user, "roles", &admin)
        .unwrap());
    assert_eq!(
        many(engine.relations().load(&session, &user, "roles").unwrap()).len(),
        1
    );

    assert!(engine
        .relations()
        .unlink(&session, &user, "roles", &admin)
        .unwrap());
    assert!(!engine
        .relations()
        .unlink(&session, &user, "roles", &admin)
        .unwrap());
    assert!(many(engine.relations().load(&session, &user, "roles").unwrap()).is_empty());

    let err = engine
        .relations()
        .link(&session, &user, "posts", &admin)
        .unwrap_err();
    assert!(matches!(
        err,
        OrmError::Validation(ref v) if matches!(v.kind, ValidationErrorKind::IncompleteRelation(_))
    ));
}

#[test]
fn eager_relations_are_attached_to_each_record() {
    let (engine, session) = setup();
    let author = create(&engine, &session, Record::new("User").with("name", "a"));
    let quiet = create(&engine, &session, Record::new("User").with("name", "b"));
    let author_key = author.key().unwrap();
    for title in ["x", "y", "z"] {
        create(
            &engine,
            &session,
            Record::new("Post")
                .with("author_id", author_key)
                .with("title", title),
        );
    }

    let query = FindQuery::new().eager("posts").eager("profile");
    let users: Vec<Record> = engine
        .records()
        .find(&session, "User", &query)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(users.len(), 2);

    match users[0].related("posts") {
        Some(RelatedRecords::Many(posts)) => assert_eq!(posts.len(), 3),
        other => panic!("unexpected posts: {other:?}"),
    }
    assert_eq!(users[0].related("profile"), Some(&RelatedRecords::One(None)));
    assert_eq!(users[1].key(), quiet.key());
    assert_eq!(users[1].related("posts"), Some(&RelatedRecords::Many(Vec::new())));

    let err = engine
        .records()
        .find(&session, "User", &FindQuery::new().eager("friends"))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        OrmError::Validation(ref v) if v.kind == ValidationErrorKind::UnknownRelation
    ));
}

#[test]
fn relation_problems_surface_on_first_use() {
    let (engine, session) = setup();
    let user = create(&engine, &session, Record::new("User").with("name", "a"));

    let err = engine
        .relations()
        .load(&session, &user, "ghosts")
        .err()
        .unwrap();
    assert!(matches!(err, OrmError::UnknownModel { ref model } if model == "Ghost"));

    let err = engine
        .relations()
        .load(&session, &user, "drafts")
        .err()
        .unwrap();
    assert!(matches!(
        err,
        OrmError::Validation(ref v)
            if v.kind == ValidationErrorKind::UnknownField
                && v.model == "Post"
                && v.field.as_deref() == Some("owner_id")
    ));

    let unsaved = Record::new("User").with("name", "b");
    let err = engine
        .relations()
        .load(&session, &unsaved, "posts")
        .err()
        .unwrap();
    assert!(matches!(
        err,
        OrmError::Validation(ref v) if v.kind == ValidationErrorKind::NotPersisted
    ));
}

#[test]
fn foreign_keys_are_enforced_by_storage() {
    let (engine, session) = setup();
    let mut orphan = Record::new("Post").with("author_id", 999).with("title", "t");
    let err = engine.records().create(&session, &mut orphan).unwrap_err();
    assert!(matches!(
        err,
        OrmError::Validation(ref v) if v.kind == ValidationErrorKind::ForeignKeyViolation
    ));
}
