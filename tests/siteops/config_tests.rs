//! Site operations: dynamic add/update/delete, reference rewiring, the
//! status snapshot, and action testing.

use crate::common;
use serde_json::json;
use sitewatch::core::FailState;
use tempfile::tempdir;

#[tokio::test]
async fn add_then_delete_restores_site() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {"a": common::disk_check(101, 1, true)}
    });
    let site = common::site_with_doc(&dir, &doc).await;
    let names_before = site.check_names().await;
    let jobs_before = site.scheduler().job_count();

    let cfg = json!({
        "type": "disk",
        "trigger": {"interval": {"minutes": 5}},
        "options": {"volume": "/", "level": 101}
    });
    site.add_check("b", &cfg).await.unwrap();
    assert!(site.check_names().await.contains(&"b".to_string()));
    assert!(site.scheduler().contains("b"));

    site.delete_check("b").await;
    assert_eq!(site.check_names().await, names_before);
    assert_eq!(site.scheduler().job_count(), jobs_before);
    assert!(!site.scheduler().contains("b"));
}

#[tokio::test]
async fn duplicate_add_is_rejected() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {"a": common::disk_check(101, 1, true)}
    });
    let site = common::site_with_doc(&dir, &doc).await;
    let err = site
        .add_check("a", &common::disk_check(101, 1, true))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn rename_rewrites_all_references() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {
            "a": common::disk_check(101, 1, true),
            "b": {
                "type": "disk",
                "options": {"volume": "/", "level": 101},
                "depends": ["a"],
                "data": {"failState": false}
            },
            "s": {
                "type": "sequence",
                "options": {"checks": ["a"]},
                "data": {"failState": ""}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;

    let cfg = json!({
        "type": "disk",
        "options": {"volume": "/", "level": 101},
        "trigger": {"interval": {"minutes": 5}}
    });
    site.update_check_config("a", "a2", &cfg).await.unwrap();

    assert!(!site.check_names().await.contains(&"a".to_string()));
    site.with_check("b", |c| assert_eq!(c.depends, vec!["a2".to_string()]))
        .await
        .unwrap();
    site.with_check("s", |c| {
        assert_eq!(c.members, vec!["a2".to_string()]);
        let list = c.options.get("checks").unwrap().as_array().unwrap();
        assert_eq!(list, &vec![json!("a2")]);
    })
    .await
    .unwrap();
    assert!(site.scheduler().contains("a2"));
    assert!(!site.scheduler().contains("a"));
}

#[tokio::test]
async fn delete_scrubs_references() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {
            "a": common::disk_check(101, 1, true),
            "b": {
                "type": "disk",
                "options": {"volume": "/", "level": 101},
                "depends": ["a"],
                "data": {"failState": false}
            },
            "s": {
                "type": "sequence",
                "options": {"checks": ["a"]},
                "data": {"failState": ""}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;
    site.delete_check("a").await;
    site.with_check("b", |c| assert!(c.depends.is_empty()))
        .await
        .unwrap();
    site.with_check("s", |c| {
        assert!(c.members.is_empty());
        assert!(c.options.get("checks").unwrap().as_array().unwrap().is_empty());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn unknown_action_reference_is_skipped() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "actions": {"real": {"type": "email", "options": {}}},
        "checks": {
            "a": {
                "type": "disk",
                "options": {"volume": "/", "level": 101},
                "actions": ["real", "ghost"],
                "data": {"failState": false}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;
    site.with_check("a", |c| assert_eq!(c.actions, vec!["real".to_string()]))
        .await
        .unwrap();
}

#[tokio::test]
async fn invalid_trigger_is_dropped_not_fatal() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {
            "a": {
                "type": "disk",
                "trigger": {"interval": {}},
                "options": {"volume": "/", "level": 101},
                "data": {"failState": false}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;
    site.with_check("a", |c| assert!(c.trigger.is_none()))
        .await
        .unwrap();
    assert!(!site.scheduler().contains("a"));
}

#[tokio::test]
async fn status_snapshot_orders_and_counts() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {
            "late": {
                "type": "disk",
                "priority": 5,
                "options": {"volume": "/", "level": 101},
                "data": {"failState": true}
            },
            "early": {
                "type": "disk",
                "priority": 0,
                "trigger": {"interval": {"minutes": 10}},
                "options": {"volume": "/", "level": 101},
                "data": {"failState": "degraded", "lastFail": "01 Mar 2025 10:30 AEDT"}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;
    let status = site.get_status().await;
    assert!(status.fail);
    assert_eq!(status.info.as_deref(), Some("2 checks in fail state"));
    let names: Vec<&String> = status.checks.keys().collect();
    assert_eq!(names, vec!["early", "late"]);

    let early = &status.checks["early"];
    assert_eq!(early.check_type, "disk");
    assert_eq!(early.fail_state, FailState::Named("degraded".into()));
    assert_eq!(early.last_fail, "01 Mar 2025 10:30 AEDT");
    assert!(early.trigger.is_some());
    assert_eq!(early.soft_fail, "");

    // single failure wording
    site.delete_check("late").await;
    let status = site.get_status().await;
    assert_eq!(status.info.as_deref(), Some("1 check in fail state"));
}

#[tokio::test]
async fn status_serializes_with_wire_names() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {"a": common::disk_check(101, 1, false)}
    });
    let site = common::site_with_doc(&dir, &doc).await;
    let status = site.get_status().await;
    let wire = serde_json::to_value(&status).unwrap();
    let a = &wire["checks"]["a"];
    assert_eq!(a["checkType"], "disk");
    assert_eq!(a["failState"], json!(true));
    assert!(a.get("softFail").is_some());
    assert!(a.get("lastFail").is_some());
    assert!(a.get("lastPass").is_some());
}

#[tokio::test]
async fn test_actions_requires_both_channels() {
    let dir = tempdir().unwrap();
    let (script, notify_log) = common::notify_script(dir.path());
    let doc = json!({
        "actions": {
            "email": {"type": "email", "options": {"command": script.display().to_string()}},
            "sms": {"type": "sms", "options": {"command": script.display().to_string()}}
        },
        "checks": {}
    });
    let site = common::site_with_doc(&dir, &doc).await;
    assert!(site.test_actions().await);
    assert_eq!(
        common::notify_lines(&notify_log),
        vec!["Notification PASS", "Notification PASS"]
    );

    // a site with only email configured reports failure
    let dir2 = tempdir().unwrap();
    let doc = json!({
        "actions": {
            "email": {"type": "email", "options": {}}
        },
        "checks": {}
    });
    let site = common::site_with_doc(&dir2, &doc).await;
    assert!(!site.test_actions().await);
}
