//! Remote checks: pushed state, transition notifications, staleness.

use crate::common;
use chrono::{Duration, Utc};
use serde_json::json;
use sitewatch::core::FailState;
use tempfile::tempdir;

fn remote_doc(script: Option<&std::path::Path>, timeout: u64) -> serde_json::Value {
    let mut doc = json!({
        "actions": {},
        "checks": {
            "agent": {
                "type": "remote",
                "options": {"timeout": timeout},
                "data": {"failState": false}
            }
        }
    });
    if let Some(script) = script {
        doc["actions"]["email"] =
            json!({"type": "email", "options": {"command": script.display().to_string()}});
        doc["checks"]["agent"]["actions"] = json!(["email"]);
    }
    doc
}

fn push(fail: bool, count: u64, threshold: u64, last_check: &str) -> serde_json::Value {
    json!({
        "failState": fail,
        "failCount": count,
        "threshold": threshold,
        "log": ["remote report"],
        "softFail": null,
        "lastCheck": last_check,
        "lastFail": null,
        "lastPass": null,
    })
}

#[tokio::test]
async fn remote_update_overwrites_state() {
    let dir = tempdir().unwrap();
    let site = common::site_with_doc(&dir, &remote_doc(None, 0)).await;
    let now = Utc::now().to_rfc3339();
    let data = push(false, 0, 1, &now);
    site.remote_update("agent", "disk", data.as_object().unwrap())
        .await;
    site.with_check("agent", |c| {
        assert_eq!(c.sub_type.as_deref(), Some("disk"));
        assert_eq!(c.fail_state, FailState::Flag(false));
        assert_eq!(c.log, vec!["remote report".to_string()]);
        assert_eq!(c.last_update.as_deref(), Some(now.as_str()));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn remote_transitions_notify() {
    let dir = tempdir().unwrap();
    let (script, notify_log) = common::notify_script(dir.path());
    let site = common::site_with_doc(&dir, &remote_doc(Some(&script), 0)).await;
    let now = Utc::now().to_rfc3339();

    // below remote threshold: state overwritten, no notification
    let data = push(true, 1, 2, &now);
    site.remote_update("agent", "disk", data.as_object().unwrap())
        .await;
    assert!(common::notify_lines(&notify_log).is_empty());

    // threshold met and value changed: FAIL notification
    let data = push(true, 2, 2, &now);
    site.remote_update("agent", "disk", data.as_object().unwrap())
        .await;
    assert_eq!(common::notify_lines(&notify_log), vec!["agent FAIL"]);

    // back to pass
    let data = push(false, 0, 2, &now);
    site.remote_update("agent", "disk", data.as_object().unwrap())
        .await;
    assert_eq!(
        common::notify_lines(&notify_log),
        vec!["agent FAIL", "agent PASS"]
    );
}

#[tokio::test]
async fn invalid_remote_timestamp_falls_back_to_local() {
    let dir = tempdir().unwrap();
    let site = common::site_with_doc(&dir, &remote_doc(None, 0)).await;
    let data = push(false, 0, 1, "whenever");
    site.remote_update("agent", "disk", data.as_object().unwrap())
        .await;
    site.with_check("agent", |c| {
        let stamp = c.last_update.clone().unwrap();
        assert_ne!(stamp, "whenever");
        assert!(!stamp.is_empty());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn fresh_remote_keeps_state_and_restores_log() {
    let dir = tempdir().unwrap();
    let site = common::site_with_doc(&dir, &remote_doc(None, 60)).await;
    let now = Utc::now().to_rfc3339();
    let data = push(false, 0, 1, &now);
    site.remote_update("agent", "disk", data.as_object().unwrap())
        .await;

    let state = site.run_check("agent").await.unwrap();
    assert_eq!(state, FailState::Flag(false));
    site.with_check("agent", |c| {
        // last remote report restored into the log
        assert_eq!(c.log, vec!["remote report".to_string()]);
        assert!(c.last_fail.is_none());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn stale_remote_forces_failure() {
    let dir = tempdir().unwrap();
    let site = common::site_with_doc(&dir, &remote_doc(None, 60)).await;
    let old = (Utc::now() - Duration::seconds(90)).to_rfc3339();
    let data = push(false, 0, 1, &old);
    site.remote_update("agent", "disk", data.as_object().unwrap())
        .await;

    let state = site.run_check("agent").await.unwrap();
    assert_eq!(state, FailState::Flag(true));
    site.with_check("agent", |c| {
        assert!(c
            .log
            .iter()
            .any(|l| l.starts_with("Timeout waiting for update")));
        assert!(c.last_fail.is_some());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn display_format_stamp_is_accepted_and_drives_staleness() {
    let dir = tempdir().unwrap();
    let site = common::site_with_doc(&dir, &remote_doc(None, 60)).await;
    // a peer stamps lastCheck the way time_string writes it
    let old = (Utc::now() - Duration::minutes(10))
        .with_timezone(&chrono_tz::UTC)
        .format(sitewatch::core::types::TIME_FORMAT)
        .to_string();
    let data = push(false, 0, 1, &old);
    site.remote_update("agent", "disk", data.as_object().unwrap())
        .await;
    // the stamp parsed and was kept verbatim, not replaced with local time
    site.with_check("agent", |c| {
        assert_eq!(c.last_update.as_deref(), Some(old.as_str()))
    })
    .await
    .unwrap();

    let state = site.run_check("agent").await.unwrap();
    assert_eq!(state, FailState::Flag(true));
    site.with_check("agent", |c| {
        assert!(c
            .log
            .iter()
            .any(|l| l.starts_with("Timeout waiting for update")));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn display_format_fresh_update_stays_passing() {
    let dir = tempdir().unwrap();
    let site = common::site_with_doc(&dir, &remote_doc(None, 600)).await;
    let now = Utc::now()
        .with_timezone(&chrono_tz::UTC)
        .format(sitewatch::core::types::TIME_FORMAT)
        .to_string();
    let data = push(false, 0, 1, &now);
    site.remote_update("agent", "disk", data.as_object().unwrap())
        .await;
    let state = site.run_check("agent").await.unwrap();
    assert_eq!(state, FailState::Flag(false));
    site.with_check("agent", |c| assert!(c.last_fail.is_none()))
        .await
        .unwrap();
}

#[tokio::test]
async fn remote_update_ignores_other_kinds() {
    let dir = tempdir().unwrap();
    let doc = json!({
        "checks": {"d": common::disk_check(101, 1, true)}
    });
    let site = common::site_with_doc(&dir, &doc).await;
    let data = push(true, 5, 1, "");
    site.remote_update("d", "disk", data.as_object().unwrap())
        .await;
    site.with_check("d", |c| assert_eq!(c.fail_state, FailState::Flag(false)))
        .await
        .unwrap();
}
