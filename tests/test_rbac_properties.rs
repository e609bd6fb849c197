mod helpers;

use helpers::builders::seed_blog;
use helpers::{AssignmentBuilder, ItemBuilder, TestEngine};
use serde_json::{json, Value};
use warden::{Condition, ItemType, Params, RbacError, Snapshot};

fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => panic!("params must be an object"),
    }
}

#[tokio::test]
async fn test_end_to_end_grant_and_revoke() {
    for t in TestEngine::all().await {
        let engine = &t.engine;
        seed_blog(engine).await;
        AssignmentBuilder::new("alice", "admin").create(engine).await;

        assert!(
            engine.check_access("alice", "editPost", &Params::new()).await.unwrap(),
            "{} backend",
            t.backend()
        );

        assert!(engine.revoke("alice", "admin").await.unwrap());
        assert!(
            !engine.check_access("alice", "editPost", &Params::new()).await.unwrap(),
            "{} backend",
            t.backend()
        );
    }
}

#[tokio::test]
async fn test_predicate_gating() {
    for t in TestEngine::all().await {
        let engine = &t.engine;
        seed_blog(engine).await;
        AssignmentBuilder::new("alice", "admin").create(engine).await;

        let mut op = engine.get_item("editPost").await.unwrap().unwrap();
        op.condition = Some(Condition::parse("params.ownerId == params.userId").unwrap());
        engine.update_item("editPost", &op).await.unwrap();

        let bob_owns = params(json!({ "ownerId": "bob" }));
        let alice_owns = params(json!({ "ownerId": "alice" }));
        assert!(!engine.check_access("alice", "editPost", &bob_owns).await.unwrap());
        assert!(engine.check_access("alice", "editPost", &alice_owns).await.unwrap());
    }
}

#[tokio::test]
async fn test_no_cycles_and_failed_insert_leaves_edges_untouched() {
    for t in TestEngine::all().await {
        let engine = &t.engine;
        ItemBuilder::task("a").create(engine).await;
        ItemBuilder::task("b").child("a").create(engine).await;
        ItemBuilder::task("c").child("b").create(engine).await;
        ItemBuilder::role("r").child("c").create(engine).await;

        let before = engine.export_snapshot().await.unwrap();
        for (parent, child) in [("a", "c"), ("a", "b"), ("a", "a"), ("b", "c")] {
            let err = engine.add_item_child(parent, child).await.unwrap_err();
            assert!(
                matches!(err, RbacError::LoopDetected { .. }),
                "{} backend: {parent} -> {child} gave {err:?}",
                t.backend()
            );
        }
        assert_eq!(engine.export_snapshot().await.unwrap(), before);

        // A shortcut edge that keeps the graph acyclic is fine
        engine.add_item_child("c", "a").await.unwrap();
    }
}

#[tokio::test]
async fn test_type_ordering() {
    let types = [ItemType::Operation, ItemType::Task, ItemType::Role];
    for t in TestEngine::all().await {
        let engine = &t.engine;
        for parent in types {
            for child in types {
                let p = format!("p_{parent}_{child}");
                let c = format!("c_{parent}_{child}");
                engine
                    .create_item(warden::AuthItem::new(&p, parent))
                    .await
                    .unwrap();
                engine
                    .create_item(warden::AuthItem::new(&c, child))
                    .await
                    .unwrap();

                let result = engine.add_item_child(&p, &c).await;
                if parent >= child {
                    assert!(result.is_ok(), "{parent} should contain {child}");
                } else {
                    assert!(matches!(result, Err(RbacError::InvalidTypeOrdering { .. })));
                    assert!(!engine.has_item_child(&p, &c).await.unwrap());
                }
            }
        }
    }
}

#[tokio::test]
async fn test_default_roles_grant_everyone() {
    for t in TestEngine::all().await {
        let t = t.with_default_roles(&["guest"]);
        let engine = &t.engine;
        ItemBuilder::operation("readPost").create(engine).await;
        ItemBuilder::role("guest").child("readPost").create(engine).await;

        for user in ["alice", "bob", "anonymous"] {
            assert!(engine.check_access(user, "guest", &Params::new()).await.unwrap());
            assert!(engine.check_access(user, "readPost", &Params::new()).await.unwrap());
        }
        assert!(engine.get_assignments("alice").await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_default_role_condition_can_deny() {
    for t in TestEngine::all().await {
        let t = t.with_default_roles(&["guest"]);
        let engine = &t.engine;
        ItemBuilder::operation("readPost").create(engine).await;
        ItemBuilder::role("guest")
            .condition("params.allowed == true")
            .child("readPost")
            .create(engine)
            .await;

        let allowed = params(json!({ "allowed": true }));
        let refused = params(json!({ "allowed": false }));
        assert!(engine.check_access("alice", "readPost", &allowed).await.unwrap());
        assert!(!engine.check_access("alice", "readPost", &refused).await.unwrap());
        assert!(
            !engine.check_access("alice", "readPost", &Params::new()).await.unwrap(),
            "{} backend: a missing param must not satisfy the default role",
            t.backend()
        );
    }
}

#[tokio::test]
async fn test_failing_assignment_condition_falls_through_to_parent() {
    for t in TestEngine::all().await {
        let engine = &t.engine;
        seed_blog(engine).await;
        AssignmentBuilder::new("alice", "managePosts")
            .condition("params.ip == \"10.0.0.1\"")
            .create(engine)
            .await;
        AssignmentBuilder::new("alice", "admin").create(engine).await;

        let from_home = params(json!({ "ip": "192.168.1.5" }));
        assert!(
            engine.check_access("alice", "editPost", &from_home).await.unwrap(),
            "{} backend",
            t.backend()
        );

        engine.revoke("alice", "admin").await.unwrap();
        assert!(!engine.check_access("alice", "editPost", &from_home).await.unwrap());
    }
}

#[tokio::test]
async fn test_assignment_uniqueness() {
    for t in TestEngine::all().await {
        let engine = &t.engine;
        seed_blog(engine).await;
        AssignmentBuilder::new("alice", "admin")
            .data(json!({ "since": 2024 }))
            .create(engine)
            .await;

        let err = engine
            .assign("alice", "admin", None, json!({ "since": 2025 }))
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::DuplicateAssignment { .. }));

        let kept = engine.get_assignment("alice", "admin").await.unwrap().unwrap();
        assert_eq!(kept.data, json!({ "since": 2024 }));
    }
}

#[tokio::test]
async fn test_assign_unknown_item_fails() {
    // SQLite stores run in strict mode by default; the file store always checks
    for t in TestEngine::all().await {
        let err = t
            .engine
            .assign("alice", "ghost", None, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::ItemNotFound(name) if name == "ghost"));
    }
}

#[tokio::test]
async fn test_cascading_delete() {
    for t in TestEngine::all().await {
        let engine = &t.engine;
        ItemBuilder::task("T").create(engine).await;
        ItemBuilder::role("R").child("T").create(engine).await;
        ItemBuilder::role("super").child("R").create(engine).await;
        AssignmentBuilder::new("U", "R").create(engine).await;

        assert!(engine.remove_item("R").await.unwrap());
        assert!(!engine.remove_item("R").await.unwrap());

        assert!(engine.get_item("R").await.unwrap().is_none());
        assert!(!engine.has_item_child("R", "T").await.unwrap());
        assert!(!engine.has_item_child("super", "R").await.unwrap());
        assert!(engine.get_assignment("U", "R").await.unwrap().is_none());
        assert!(engine.get_item("T").await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_rename_cascade() {
    for t in TestEngine::all().await {
        let engine = &t.engine;
        ItemBuilder::operation("editPost").create(engine).await;
        ItemBuilder::task("A")
            .description("the task")
            .condition("data.enabled == true")
            .data(json!({ "enabled": true }))
            .child("editPost")
            .create(engine)
            .await;
        ItemBuilder::role("admin").child("A").create(engine).await;
        AssignmentBuilder::new("alice", "A")
            .condition("params.ip == \"10.0.0.1\"")
            .create(engine)
            .await;

        let before = engine.get_item("A").await.unwrap().unwrap();
        let mut renamed = before.clone();
        renamed.name = "B".to_string();
        engine.update_item("A", &renamed).await.unwrap();

        assert!(engine.get_item("A").await.unwrap().is_none());
        assert_eq!(engine.get_item("B").await.unwrap().unwrap(), renamed);
        assert!(engine.has_item_child("admin", "B").await.unwrap());
        assert!(engine.has_item_child("B", "editPost").await.unwrap());
        assert!(!engine.has_item_child("admin", "A").await.unwrap());

        let assignment = engine.get_assignment("alice", "B").await.unwrap().unwrap();
        assert_eq!(assignment.condition, before_assignment_condition());
        assert!(engine.get_assignment("alice", "A").await.unwrap().is_none());

        let from_office = params(json!({ "ip": "10.0.0.1" }));
        assert!(engine.check_access("alice", "editPost", &from_office).await.unwrap());
    }
}

fn before_assignment_condition() -> Option<Condition> {
    Some(Condition::parse("params.ip == \"10.0.0.1\"").unwrap())
}

#[tokio::test]
async fn test_database_changes_are_visible_immediately() {
    let t = TestEngine::database().await;
    seed_blog(&t.engine).await;
    AssignmentBuilder::new("alice", "admin").create(&t.engine).await;

    let other = t.reopen().await;
    assert!(other.check_access("alice", "editPost", &Params::new()).await.unwrap());

    t.engine.revoke("alice", "admin").await.unwrap();
    assert!(!other.check_access("alice", "editPost", &Params::new()).await.unwrap());
}

#[tokio::test]
async fn test_file_changes_need_save() {
    let t = TestEngine::file().await;
    seed_blog(&t.engine).await;
    AssignmentBuilder::new("alice", "admin").create(&t.engine).await;

    let other = t.reopen().await;
    assert!(other.get_item("admin").await.unwrap().is_none());

    t.engine.save().await.unwrap();
    let other = t.reopen().await;
    assert_eq!(
        other.get_item("admin").await.unwrap().unwrap().description,
        "Administrator"
    );
    assert!(other.check_access("alice", "editPost", &Params::new()).await.unwrap());
}

#[tokio::test]
async fn test_copy_policy_between_backends() {
    let db = TestEngine::database().await;
    seed_blog(&db.engine).await;
    AssignmentBuilder::new("alice", "admin")
        .data(json!({ "note": "founder" }))
        .create(&db.engine)
        .await;
    let snapshot = db.engine.export_snapshot().await.unwrap();

    let file = TestEngine::file().await;
    file.engine.import_snapshot(&snapshot).await.unwrap();
    file.engine.save().await.unwrap();

    let reopened = file.reopen().await;
    assert_eq!(reopened.export_snapshot().await.unwrap(), snapshot);
}

#[tokio::test]
async fn test_rejected_import_keeps_current_policy() {
    let rejected = [
        json!({
            "a": { "type": 1, "children": ["b"] },
            "b": { "type": 1, "children": ["a"] }
        }),
        json!({
            "editPost": { "type": 0, "children": ["admin"] },
            "admin": { "type": 2, "assignments": { "bob": {} } }
        }),
    ];

    for t in TestEngine::all().await {
        let engine = &t.engine;
        seed_blog(engine).await;
        AssignmentBuilder::new("alice", "admin").create(engine).await;
        let before = engine.export_snapshot().await.unwrap();

        for doc in &rejected {
            let snapshot: Snapshot = serde_json::from_value(doc.clone()).unwrap();
            assert!(engine.import_snapshot(&snapshot).await.is_err());
            assert_eq!(
                engine.export_snapshot().await.unwrap(),
                before,
                "{} backend",
                t.backend()
            );
        }
        assert!(engine.check_access("alice", "editPost", &Params::new()).await.unwrap());
    }
}

#[tokio::test]
async fn test_import_skips_unknown_children() {
    for t in TestEngine::all().await {
        let engine = &t.engine;
        let snapshot: Snapshot = serde_json::from_value(json!({
            "admin": {
                "type": 2,
                "children": ["ghost", "editPost"],
                "assignments": { "alice": {} }
            },
            "editPost": { "type": 0 }
        }))
        .unwrap();

        engine.import_snapshot(&snapshot).await.unwrap();
        assert!(engine.get_item("ghost").await.unwrap().is_none());
        assert_eq!(
            engine.get_item_children(&["admin"]).await.unwrap().len(),
            1,
            "{} backend",
            t.backend()
        );
        assert!(engine.check_access("alice", "editPost", &Params::new()).await.unwrap());
    }
}

#[tokio::test]
async fn test_clear_assignments_and_clear_all() {
    for t in TestEngine::all().await {
        let engine = &t.engine;
        seed_blog(engine).await;
        AssignmentBuilder::new("alice", "admin").create(engine).await;
        AssignmentBuilder::new("bob", "managePosts").create(engine).await;

        engine.clear_assignments().await.unwrap();
        assert!(engine.get_assignments("alice").await.unwrap().is_empty());
        assert!(engine.get_assignments("bob").await.unwrap().is_empty());
        assert_eq!(engine.get_items(None, None).await.unwrap().len(), 3);

        engine.clear_all().await.unwrap();
        assert!(engine.get_items(None, None).await.unwrap().is_empty());
    }
}
