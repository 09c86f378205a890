//! Sequence composition: priority-ordered member runs and CSV fail states.

use crate::common;
use serde_json::json;
use sitewatch::core::FailState;
use tempfile::tempdir;

fn member(level: u64, priority: i64) -> serde_json::Value {
    json!({
        "type": "disk",
        "priority": priority,
        "options": {"volume": "/", "level": level},
        "data": {"failState": false}
    })
}

async fn repoint(site: &sitewatch::site::Site, name: &str, level: u64, priority: i64) {
    let carried = site
        .with_check(name, |c| {
            json!({
                "type": "disk",
                "priority": priority,
                "options": {"volume": "/", "level": level},
                "data": {"failState": c.fail_state.clone()}
            })
        })
        .await
        .unwrap();
    site.update_check_config(name, name, &carried).await.unwrap();
}

#[tokio::test]
async fn transitions_follow_membership_changes() {
    let dir = tempdir().unwrap();
    let (script, notify_log) = common::notify_script(dir.path());
    let doc = json!({
        "actions": {
            "email": {"type": "email", "options": {"command": script.display().to_string()}}
        },
        "checks": {
            "x": member(101, 0),
            "y": member(101, 1),
            "z": member(101, 2),
            "s": {
                "type": "sequence",
                "options": {"checks": ["x", "y", "z"]},
                "actions": ["email"],
                "data": {"failState": ""}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;

    // all pass: no transition from the seeded empty CSV
    let state = site.run_check("s").await.unwrap();
    assert_eq!(state, FailState::Named(String::new()));
    assert!(common::notify_lines(&notify_log).is_empty());

    // y fails
    repoint(&site, "y", 0, 1).await;
    let state = site.run_check("s").await.unwrap();
    assert_eq!(state, FailState::Named("y".into()));

    // z also fails: value change, another transition
    repoint(&site, "z", 0, 2).await;
    let state = site.run_check("s").await.unwrap();
    assert_eq!(state, FailState::Named("y,z".into()));

    // y recovers
    repoint(&site, "y", 101, 1).await;
    let state = site.run_check("s").await.unwrap();
    assert_eq!(state, FailState::Named("z".into()));

    // z recovers: back to pass with a passAction notification
    repoint(&site, "z", 101, 2).await;
    let state = site.run_check("s").await.unwrap();
    assert_eq!(state, FailState::Named(String::new()));
    site.with_check("s", |c| assert!(c.last_pass.is_some()))
        .await
        .unwrap();

    assert_eq!(
        common::notify_lines(&notify_log),
        vec!["s FAIL", "s FAIL", "s FAIL", "s PASS"]
    );
}

#[tokio::test]
async fn members_run_in_priority_order() {
    let dir = tempdir().unwrap();
    // declaration order z, y, x but priorities reverse it
    let doc = json!({
        "checks": {
            "z": member(0, 2),
            "y": member(0, 1),
            "x": member(0, 0),
            "s": {
                "type": "sequence",
                "options": {"checks": ["z", "y", "x"]},
                "data": {"failState": ""}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;
    let state = site.run_check("s").await.unwrap();
    assert_eq!(state, FailState::Named("x,y,z".into()));
}

#[tokio::test]
async fn sequence_log_reports_members() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {
            "ok": member(101, 0),
            "bad": member(0, 1),
            "s": {
                "type": "sequence",
                "options": {"checks": ["ok", "bad"]},
                "data": {"failState": ""}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;
    site.run_check("s").await.unwrap();
    let log = site.with_check("s", |c| c.log.clone()).await.unwrap();
    assert!(log.contains(&"ok (disk): PASS".to_string()));
    assert!(log.contains(&"bad (disk): FAIL".to_string()));
    // failing member log lines are folded into the sequence log
    assert!(log.iter().any(|l| l.contains("(disk) /:")));
}

#[tokio::test]
async fn member_state_machines_run_fully() {
    // a member's own threshold and lastFail move when the sequence runs it
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {
            "m": {
                "type": "disk",
                "threshold": 2,
                "options": {"volume": "/", "level": 0},
                "data": {"failState": false}
            },
            "s": {
                "type": "sequence",
                "options": {"checks": ["m"]},
                "data": {"failState": ""}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;

    // first run: member below threshold, still reported passing upstream
    let state = site.run_check("s").await.unwrap();
    assert_eq!(state, FailState::Named(String::new()));
    site.with_check("m", |c| assert_eq!(c.fail_count, 1))
        .await
        .unwrap();

    // second run crosses the member threshold
    let state = site.run_check("s").await.unwrap();
    assert_eq!(state, FailState::Named("m".into()));
    site.with_check("m", |c| assert!(c.last_fail.is_some()))
        .await
        .unwrap();
}

#[tokio::test]
async fn sequence_summary_lists_failures() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {
            "a": member(0, 0),
            "b": member(0, 1),
            "s": {
                "type": "sequence",
                "options": {"checks": ["a", "b"]},
                "data": {"failState": ""}
            }
        }
    });
    let site = common::site_with_doc(&dir, &doc).await;
    site.run_check("s").await.unwrap();
    let summary = site.with_check("s", |c| c.get_summary()).await.unwrap();
    assert_eq!(summary.lines().count(), 2);
    assert!(summary.contains('a'));
    assert!(summary.contains('b'));
}
