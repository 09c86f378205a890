//! Threshold hysteresis, retries, and dependency soft-fail through the
//! full site update path.

use crate::common;
use serde_json::json;
use sitewatch::core::FailState;
use tempfile::tempdir;

#[tokio::test]
async fn threshold_two_fails_then_recovers() {
    let dir = tempdir().unwrap();
    let (script, notify_log) = common::notify_script(dir.path());
    let doc = json!({
        "base": dir.path().display().to_string(),
        "actions": {
            "email": {"type": "email", "options": {"command": script.display().to_string()}}
        },
        "checks": {
            "web": {
                "type": "disk",
                "threshold": 2,
                "options": {"volume": "/", "level": 0},
                "actions": ["email"],
                "data": {"failState": false}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;

    // tick 1: one observed failure, no transition, no notification
    let state = site.run_check("web").await.unwrap();
    assert_eq!(state, FailState::Flag(false));
    site.with_check("web", |c| {
        assert_eq!(c.fail_count, 1);
        assert!(c.last_fail.is_none());
        assert!(c.last_check.is_some());
    })
    .await
    .unwrap();
    assert!(common::notify_lines(&notify_log).is_empty());

    // tick 2: threshold crossed, transition and one notification
    let state = site.run_check("web").await.unwrap();
    assert_eq!(state, FailState::Flag(true));
    site.with_check("web", |c| {
        assert_eq!(c.fail_count, 2);
        assert!(c.last_fail.is_some());
    })
    .await
    .unwrap();
    assert_eq!(common::notify_lines(&notify_log), vec!["web FAIL"]);

    // point at a passing target, carrying the runtime state across
    let carried = site
        .with_check("web", |c| {
            json!({
                "type": "disk",
                "threshold": 2,
                "options": {"volume": "/", "level": 101},
                "actions": ["email"],
                "data": {"failState": c.fail_state.clone(), "failCount": c.fail_count}
            })
        })
        .await
        .unwrap();
    site.update_check_config("web", "web", &carried).await.unwrap();

    // tick 3: recovery, count reset, one pass notification
    let state = site.run_check("web").await.unwrap();
    assert_eq!(state, FailState::Flag(false));
    site.with_check("web", |c| {
        assert_eq!(c.fail_count, 0);
        assert!(c.last_pass.is_some());
    })
    .await
    .unwrap();
    assert_eq!(
        common::notify_lines(&notify_log),
        vec!["web FAIL", "web PASS"]
    );
}

#[tokio::test]
async fn retries_count_as_one_failure() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {
            "flappy": {
                "type": "disk",
                "threshold": 10,
                "retries": 3,
                "options": {"volume": "/", "level": 0},
                "data": {"failState": false}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;
    site.run_check("flappy").await.unwrap();
    site.with_check("flappy", |c| assert_eq!(c.fail_count, 1))
        .await
        .unwrap();
}

#[tokio::test]
async fn repeat_failure_does_not_renotify() {
    let dir = tempdir().unwrap();
    let (script, notify_log) = common::notify_script(dir.path());
    let doc = json!({
        "actions": {
            "email": {"type": "sms", "options": {"command": script.display().to_string()}}
        },
        "checks": {
            "d": {
                "type": "disk",
                "threshold": 1,
                "options": {"volume": "/", "level": 0},
                "actions": ["email"],
                "data": {"failState": false}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;
    site.run_check("d").await.unwrap();
    site.run_check("d").await.unwrap();
    site.run_check("d").await.unwrap();
    // one transition, one notification, lastFail from the first tick only
    assert_eq!(common::notify_lines(&notify_log).len(), 1);
    site.with_check("d", |c| assert_eq!(c.fail_count, 3))
        .await
        .unwrap();
}

#[tokio::test]
async fn dependency_soft_fail_skips_run() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {
            "a": common::disk_check(0, 1, true),
            "b": {
                "type": "disk",
                "threshold": 1,
                "options": {"volume": "/", "level": 101},
                "depends": ["a"],
                "data": {"failState": false}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;

    // b runs normally once and logs a disk line
    site.run_check("b").await.unwrap();
    let first_log = site.with_check("b", |c| c.log.clone()).await.unwrap();
    assert!(!first_log.is_empty());

    // a fails, then b soft-fails without running
    site.run_check("a").await.unwrap();
    site.run_check("b").await.unwrap();
    site.with_check("b", |c| {
        assert_eq!(c.soft_fail.as_deref(), Some("a"));
        assert_eq!(c.log, vec!["SOFTFAIL (depends=a)".to_string()]);
        assert_eq!(c.fail_state, FailState::Flag(false));
        assert_eq!(c.fail_count, 0);
        assert!(c.last_fail.is_none());
        // prior report preserved through the outage
        assert_eq!(c.old_log, first_log);
    })
    .await
    .unwrap();

    // a recovers; b reverts to normal execution
    let recovered = json!({
        "type": "disk",
        "threshold": 1,
        "options": {"volume": "/", "level": 101},
        "data": {"failState": true}
    });
    site.update_check_config("a", "a", &recovered).await.unwrap();
    site.run_check("a").await.unwrap();
    site.run_check("b").await.unwrap();
    site.with_check("b", |c| {
        assert!(c.soft_fail.is_none());
        assert!(!c.log.is_empty());
        assert_ne!(c.log, vec!["SOFTFAIL (depends=a)".to_string()]);
        assert_eq!(c.old_log, first_log);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn https_probe_logs_connection_failure() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {
            "web": {
                "type": "https",
                "options": {"hostname": "127.0.0.1", "port": 1, "timeout": 2},
                "data": {"failState": false}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;
    let state = site.run_check("web").await.unwrap();
    assert!(state.is_fail());
    site.with_check("web", |c| {
        assert_eq!(c.fail_count, 1);
        assert!(!c.log.is_empty());
        assert!(c.log[0].starts_with("127.0.0.1"));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn run_check_unknown_name() {
    let dir = tempdir().unwrap();
    let site = common::site_with_doc(&dir, &json!({"checks": {}})).await;
    assert!(site.run_check("ghost").await.is_none());
}
