use async_trait::async_trait;
use fireodm_core::codec::OnCodecError;
use fireodm_core::storage::{Driver, MemoryDriver, Record, SqliteDriver};
use fireodm_core::validation::ViolationKind;
use fireodm_core::{
    DocRef, Error, FieldDescriptor, ModelDescriptor, Relation, Rule, SchemaRegistry, StorageError,
    Value,
};
use fireodm_runtime::{Filter, Odm, OnMissing, Operation, PopulateOptions, Settings};
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register_model(
            ModelDescriptor::builder("User")
                .collection("users")
                .field(FieldDescriptor::string("name").required())
                .field(FieldDescriptor::reference("manager", "User"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register_model(
            ModelDescriptor::builder("Post")
                .collection("posts")
                .field(FieldDescriptor::string("title").required())
                .field(FieldDescriptor::reference("author", "User").required())
                .field(FieldDescriptor::references("likes", "User"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn test_user_example() {
    let odm = Odm::builder(registry()).build().unwrap();

    let mut ann = odm.create_from_json("User", &json!({"name": "Ann"})).unwrap();
    odm.save(&mut ann).await.unwrap();

    let mut empty = odm.create("User").unwrap();
    let Err(Error::Validation(err)) = odm.save(&mut empty).await else {
        panic!("expected a validation error");
    };
    assert_eq!(err.violations.len(), 1);
    assert_eq!(err.violations[0].path, "name");

    let mut bob = odm
        .create_from_json("User", &json!({"name": "Bob", "manager": "users/42"}))
        .unwrap();
    odm.save(&mut bob).await.unwrap();

    let err = odm
        .populate(
            &mut bob,
            &["manager"],
            Some(PopulateOptions::default().with_on_missing(OnMissing::Fail)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DanglingReference { target, .. } if target == DocRef::new("users", "42")
    ));

    odm.populate(&mut bob, &["manager"], None).await.unwrap();
    assert!(bob.related("manager").is_none());
}

#[tokio::test]
async fn test_failing_before_save_hook_rejects_write() {
    let h2_ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&h2_ran);
    let odm = Odm::builder(registry())
        .before("User", Operation::Save, "h1", |_| anyhow::bail!("not today"))
        .before("User", Operation::Save, "h2", move |_| {
            *flag.lock().unwrap() = true;
            Ok(())
        })
        .build()
        .unwrap();

    let mut doc = odm.create("User").unwrap().with("name", "Ann");
    let err = odm.save(&mut doc).await.unwrap_err();

    assert!(matches!(err, Error::HookAbort { ref hook, .. } if hook == "h1"));
    assert!(!*h2_ran.lock().unwrap());
    assert!(doc.id().is_none());
    assert!(odm.find_all("User").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_hooks_see_staged_and_committed_values() {
    let committed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&committed);
    let odm = Odm::builder(registry())
        .before("User", Operation::Save, "trim", |doc| {
            if let Some(name) = doc.get("name").and_then(Value::as_str) {
                let trimmed = name.trim().to_string();
                doc.set("name", trimmed);
            }
            Ok(())
        })
        .after("User", Operation::Save, "record", move |doc| {
            seen.lock()
                .unwrap()
                .push(doc.get("name").cloned().unwrap_or(Value::Null));
            Ok(())
        })
        .after("User", Operation::Save, "noisy", |_| anyhow::bail!("mail server down"))
        .build()
        .unwrap();

    let mut doc = odm.create("User").unwrap().with("name", "  Ann ");
    // A failing after-save hook cannot undo the commit.
    odm.save(&mut doc).await.unwrap();

    assert_eq!(doc.get("name"), Some(&Value::from("Ann")));
    assert_eq!(*committed.lock().unwrap(), vec![Value::from("Ann")]);
    let stored = odm.get("User", doc.id().unwrap()).await.unwrap();
    assert_eq!(stored.get("name"), Some(&Value::from("Ann")));
}

#[tokio::test]
async fn test_before_save_hook_output_is_validated() {
    let mut registry = SchemaRegistry::new();
    registry
        .register_model(
            ModelDescriptor::builder("Tag")
                .collection("tags")
                .field(
                    FieldDescriptor::string("name")
                        .required()
                        .with_rule(Rule::MaxLength(3)),
                )
                .strict()
                .build()
                .unwrap(),
        )
        .unwrap();
    let odm = Odm::builder(registry)
        .before("Tag", Operation::Save, "mangle", |doc| {
            let name = doc.get("name").and_then(Value::as_str).map(str::to_string);
            match name.as_deref() {
                Some("drop") => {
                    doc.remove("name");
                }
                Some("grow") => doc.set("name", "Annabelle"),
                Some("extra") => doc.set("color", "red"),
                _ => {}
            }
            Ok(())
        })
        .build()
        .unwrap();

    let cases = [
        ("drop", "name", "required"),
        ("grow", "name", "max_length"),
        ("extra", "color", "unknown"),
    ];
    for (name, path, expected) in cases {
        let mut doc = odm.create("Tag").unwrap().with("name", name);
        let Err(Error::Validation(err)) = odm.save(&mut doc).await else {
            panic!("hook output for `{name}` should fail validation");
        };
        assert_eq!(err.violations.len(), 1, "{name}");
        let violation = &err.violations[0];
        assert_eq!(violation.path, path);
        match (&violation.kind, expected) {
            (ViolationKind::Required, "required") | (ViolationKind::UnknownField, "unknown") => {}
            (ViolationKind::Rule { rule, .. }, "max_length") => assert_eq!(rule, "max_length"),
            (kind, _) => panic!("unexpected violation for `{name}`: {kind:?}"),
        }

        assert!(doc.id().is_none());
        assert_eq!(doc.get("name"), Some(&Value::from(name)));
    }
    assert!(odm.find_all("Tag").await.unwrap().is_empty());

    let mut ok = odm.create("Tag").unwrap().with("name", "ok");
    odm.save(&mut ok).await.unwrap();
    assert_eq!(odm.find_all("Tag").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_load_and_delete_hooks() {
    let odm = Odm::builder(registry())
        .before("User", Operation::Load, "deny-root", |doc| {
            if doc.id() == Some("root") {
                anyhow::bail!("root is hidden");
            }
            Ok(())
        })
        .before("User", Operation::Delete, "keep-admins", |doc| {
            if doc.get("name") == Some(&Value::from("admin")) {
                anyhow::bail!("admins cannot be deleted");
            }
            Ok(())
        })
        .build()
        .unwrap();

    let mut root = odm.create("User").unwrap().with_id("root").with("name", "Root");
    odm.save(&mut root).await.unwrap();
    assert!(matches!(
        odm.load("User", "root").await,
        Err(Error::HookAbort { .. })
    ));

    let mut admin = odm.create("User").unwrap().with("name", "admin");
    odm.save(&mut admin).await.unwrap();
    assert!(odm.delete(&mut admin).await.is_err());
    assert!(admin.is_persisted());

    let mut ann = odm.create("User").unwrap().with("name", "Ann");
    odm.save(&mut ann).await.unwrap();
    assert!(odm.delete(&mut ann).await.unwrap());
    assert!(!ann.is_persisted());
    assert!(odm.load("User", ann.id().unwrap()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_chain_with_max_depth_one() {
    let mut registry = SchemaRegistry::new();
    registry
        .register("A", vec![FieldDescriptor::reference("b", "B")])
        .unwrap();
    registry
        .register("B", vec![FieldDescriptor::reference("c", "C")])
        .unwrap();
    registry
        .register("C", vec![FieldDescriptor::string("label")])
        .unwrap();
    let odm = Odm::builder(registry).build().unwrap();

    let mut c = odm.create("C").unwrap().with_id("c1").with("label", "leaf");
    odm.save(&mut c).await.unwrap();
    let mut b = odm.create("B").unwrap().with_id("b1").with("c", "C/c1");
    odm.save(&mut b).await.unwrap();
    let mut a = odm.create("A").unwrap().with_id("a1").with("b", "B/b1");
    odm.save(&mut a).await.unwrap();

    odm.populate(
        &mut a,
        &["b.c"],
        Some(PopulateOptions::new(1, OnMissing::Fail)),
    )
    .await
    .unwrap();

    let b = a.related("b").unwrap();
    assert!(b.relation("c").unwrap().is_unresolved());
    assert_eq!(
        a.to_json(),
        json!({"id": "a1", "b": {"id": "b1", "c": {"$ref": "C/c1"}}})
    );

    let mut deep = odm.get("A", "a1").await.unwrap();
    odm.populate(&mut deep, &["b.c"], None).await.unwrap();
    let leaf = deep.related("b").unwrap().related("c").unwrap();
    assert_eq!(leaf.get("label"), Some(&Value::from("leaf")));
}

#[tokio::test]
async fn test_many_relation_and_filters() {
    let odm = Odm::builder(registry()).build().unwrap();
    let mut ids = Vec::new();
    for name in ["Ann", "Bob"] {
        let mut user = odm.create("User").unwrap().with("name", name);
        odm.save(&mut user).await.unwrap();
        ids.push(user.pointer().unwrap().to_string());
    }

    let mut post = odm
        .create_from_json(
            "Post",
            &json!({
                "title": "Hello",
                "author": ids[0],
                "likes": [ids[0], "users/ghost", ids[1]],
            }),
        )
        .unwrap();
    odm.save(&mut post).await.unwrap();

    odm.populate(&mut post, &["author", "likes"], None)
        .await
        .unwrap();
    let Some(Relation::Many(likes)) = post.relation("likes") else {
        panic!("expected likes to be populated");
    };
    let names: Vec<&Value> = likes
        .iter()
        .filter_map(|r| r.as_document())
        .filter_map(|d| d.get("name"))
        .collect();
    assert_eq!(names, vec![&Value::from("Ann"), &Value::from("Bob")]);

    let by_author = Filter::new().eq("author", ids[0].as_str());
    assert_eq!(odm.find_where("Post", &by_author).await.unwrap().len(), 1);
    let by_name = Filter::new().eq("name", "Bob");
    assert_eq!(odm.find_where("User", &by_name).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_saves_share_one_odm() {
    let odm = Odm::builder(registry()).build().unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let odm = odm.clone();
            tokio::spawn(async move {
                let mut doc = odm
                    .create("User")?
                    .with("name", format!("user-{i}"));
                odm.save(&mut doc).await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(odm.find_all("User").await.unwrap().len(), 20);
}

/// A driver whose writes never finish in time.
#[derive(Debug, Default)]
struct SlowDriver {
    inner: MemoryDriver,
}

#[async_trait]
impl Driver for SlowDriver {
    async fn put(
        &self,
        collection: &str,
        id: &str,
        body: &JsonValue,
    ) -> Result<(), StorageError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        self.inner.put(collection, id, body).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<JsonValue>, StorageError> {
        self.inner.get(collection, id).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        self.inner.delete(collection, id).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<Record>, StorageError> {
        self.inner.list(collection).await
    }
}

#[tokio::test]
async fn test_storage_timeout_rejects_write() {
    let after_ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&after_ran);
    let odm = Odm::builder(registry())
        .driver(SlowDriver::default())
        .settings(Settings {
            storage_timeout: Duration::from_millis(20),
            ..Settings::default()
        })
        .after("User", Operation::Save, "after", move |_| {
            *flag.lock().unwrap() = true;
            Ok(())
        })
        .build()
        .unwrap();

    let mut doc = odm.create("User").unwrap().with("name", "Ann");
    let err = odm.save(&mut doc).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Storage(StorageError::Timeout { operation: "put", .. })
    ));
    assert!(!doc.is_persisted());
    assert!(!*after_ran.lock().unwrap());
}

#[tokio::test]
async fn test_codec_policy_on_load() {
    let driver: Arc<dyn Driver> = Arc::new(MemoryDriver::new());
    driver
        .put("users", "u1", &json!({"name": 42, "manager": "users/u2"}))
        .await
        .unwrap();

    let strict = Odm::builder(registry())
        .shared_driver(Arc::clone(&driver))
        .build()
        .unwrap();
    assert!(matches!(
        strict.load("User", "u1").await,
        Err(Error::Codec(err)) if err.field == "name"
    ));

    let lenient = Odm::builder(registry())
        .shared_driver(driver)
        .settings(Settings {
            on_codec_error: OnCodecError::SkipField,
            ..Settings::default()
        })
        .build()
        .unwrap();
    let doc = lenient.get("User", "u1").await.unwrap();
    assert!(doc.get("name").is_none());
    assert_eq!(
        doc.get("manager"),
        Some(&Value::Reference(DocRef::new("users", "u2")))
    );
}

#[tokio::test]
async fn test_sqlite_round_trip_and_reload() {
    let dir = TempDir::new().unwrap();
    let driver = SqliteDriver::open(dir.path().join("fireodm.db")).unwrap();
    let odm = Odm::builder(registry()).driver(driver).build().unwrap();

    let mut boss = odm.create("User").unwrap().with_id("boss").with("name", "Bea");
    odm.save(&mut boss).await.unwrap();
    let mut ann = odm
        .create("User")
        .unwrap()
        .with("name", "Ann")
        .with("manager", "users/boss");
    odm.save(&mut ann).await.unwrap();
    odm.populate(&mut ann, &["manager"], None).await.unwrap();

    let mut copy = odm.get("User", ann.id().unwrap()).await.unwrap();
    odm.update(&mut copy, fireodm_runtime::odm::patch([("name", Value::from("Anna"))]))
        .await
        .unwrap();

    odm.reload(&mut ann).await.unwrap();
    assert_eq!(ann.get("name"), Some(&Value::from("Anna")));
    // The manager pointer did not change, so the cached relation survives.
    assert_eq!(
        ann.related("manager").and_then(|m| m.get("name")),
        Some(&Value::from("Bea"))
    );

    assert!(odm.delete_by_id("User", "boss").await.unwrap());
    assert!(matches!(
        odm.reload(&mut boss).await,
        Err(Error::NotFound { .. })
    ));
}
