mod common;

use std::time::Duration;

use common::{harness, harness_with, reviewer};
use shield_core::error::AppError;
use shield_core::models::{
    Actor, GroupId, LogAction, SuspectStatus, UserId, AUTO_BAN_REASON, SUSPECT_REASON,
};
use shield_core::records::EntitySet;
use shield_engine::ScanMode;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn two_banned_members_never_flag() {
    let h = harness();
    h.seed_banned(&[10]).await;
    h.directory.set_group(50, "Fifty", &[1, 10, 20, 21]);
    h.service.submit_group(GroupId(50)).await.unwrap();

    let approval = h
        .service
        .approve_candidate(UserId(1), None, &reviewer())
        .await
        .unwrap();

    assert!(approval.flagged.is_empty());
    assert!(h.service.list_suspect_groups(None).await.is_empty());
}

#[tokio::test]
async fn three_banned_members_flag_exactly_once() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 2, 10, 11, 20]);
    h.service.submit_group(GroupId(50)).await.unwrap();

    let approval = h
        .service
        .approve_candidate(UserId(1), None, &reviewer())
        .await
        .unwrap();
    assert_eq!(approval.flagged.len(), 1);
    let flag = &approval.flagged[0];
    assert_eq!(flag.group_id, GroupId(50));
    assert_eq!(flag.triggered_by, UserId(1));
    assert_eq!(flag.banned_count, 3);
    assert_eq!(flag.status, SuspectStatus::Pending);
    assert_eq!(flag.reason, SUSPECT_REASON);

    // A fourth ban in the same group finds it already flagged.
    let again = h
        .service
        .approve_candidate(UserId(2), None, &reviewer())
        .await
        .unwrap();
    assert!(again.flagged.is_empty());
    assert_eq!(h.service.list_suspect_groups(None).await.len(), 1);
}

#[tokio::test]
async fn rejected_groups_are_never_reflagged() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 2, 10, 11]);
    h.service.submit_group(GroupId(50)).await.unwrap();
    h.service.approve_candidate(UserId(1), None, &reviewer()).await.unwrap();

    let rejected = h.service.reject_suspect_group(GroupId(50)).await.unwrap();
    assert_eq!(rejected.status, SuspectStatus::Rejected);

    let approval = h
        .service
        .approve_candidate(UserId(2), None, &reviewer())
        .await
        .unwrap();
    assert!(approval.flagged.is_empty());
    let suspects = h.service.list_suspect_groups(None).await;
    assert_eq!(suspects.len(), 1);
    assert_eq!(suspects[0].status, SuspectStatus::Rejected);
}

#[tokio::test]
async fn a_failing_group_does_not_abort_the_scan() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(60, "Broken", &[1, 10, 11]);
    h.directory.set_group(70, "Healthy", &[1, 10, 11]);
    h.directory.set_group(80, "Intake", &[1]);
    h.service.submit_group(GroupId(80)).await.unwrap();
    h.directory.fail_group(60, true);

    let approval = h
        .service
        .approve_candidate(UserId(1), None, &reviewer())
        .await
        .unwrap();

    let flagged: Vec<GroupId> = approval.flagged.iter().map(|s| s.group_id).collect();
    assert_eq!(flagged, vec![GroupId(70)]);
}

#[tokio::test]
async fn failing_group_lookup_still_commits_the_ban() {
    let h = harness();
    h.directory.set_group(1, "One", &[1]);
    h.service.submit_group(GroupId(1)).await.unwrap();
    h.directory.fail_user_lookup(1);

    let approval = h
        .service
        .approve_candidate(UserId(1), None, &reviewer())
        .await
        .unwrap();

    assert!(approval.newly_banned);
    assert!(approval.flagged.is_empty());
    assert_eq!(h.banned_ids().await, vec![1]);
}

#[tokio::test]
async fn suspect_group_transitions_are_guarded() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 10, 11]);
    h.service.submit_group(GroupId(50)).await.unwrap();
    h.service.approve_candidate(UserId(1), None, &reviewer()).await.unwrap();

    h.service.reject_suspect_group(GroupId(50)).await.unwrap();
    // Rejecting twice is a no-op; approving a rejected group is refused.
    h.service.reject_suspect_group(GroupId(50)).await.unwrap();
    let err = h.service.approve_suspect_group(GroupId(50)).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = h.service.approve_suspect_group(GroupId(404)).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("SuspectGroup", _)));
    let err = h.service.reject_suspect_group(GroupId(404)).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(..)));
}

#[tokio::test]
async fn end_to_end_flag_and_cascade() {
    let h = harness();
    h.directory.set_group(111, "Raiders", &[1, 2, 3]);
    assert_eq!(h.service.submit_group(GroupId(111)).await.unwrap(), 3);
    assert!(h
        .service
        .list_pending()
        .await
        .iter()
        .all(|c| c.group_id == GroupId(111)));

    // Two members banned elsewhere have since joined group 111.
    h.seed_banned(&[4, 5]).await;
    h.directory.set_group(111, "Raiders", &[1, 2, 3, 4, 5]);

    let approval = h
        .service
        .approve_candidate(UserId(1), Some("x".into()), &reviewer())
        .await
        .unwrap();
    assert_eq!(h.pending_ids().await, vec![2, 3]);
    assert_eq!(approval.flagged.len(), 1);
    assert_eq!(approval.flagged[0].group_id, GroupId(111));
    assert_eq!(
        h.service.list_suspect_groups(Some(SuspectStatus::Pending)).await.len(),
        1
    );

    let report = h.service.approve_suspect_group(GroupId(111)).await.unwrap();
    let mut new_ids: Vec<u64> = report.banned.iter().map(|r| r.user_id().0).collect();
    new_ids.sort();
    assert_eq!(new_ids, vec![2, 3]);
    assert!(report
        .banned
        .iter()
        .all(|r| r.reviewed_by == Actor::Auto && r.reason == AUTO_BAN_REASON));

    assert!(h.pending_ids().await.is_empty());
    assert_eq!(h.banned_ids().await, vec![1, 2, 3, 4, 5]);
    let suspects = h.service.list_suspect_groups(None).await;
    assert_eq!(suspects[0].status, SuspectStatus::Approved);

    let auto_logs = h
        .service
        .action_log()
        .await
        .into_iter()
        .filter(|e| e.action == LogAction::AutoBan)
        .count();
    assert_eq!(auto_logs, 2);

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("2 users auto-banned"));
    assert!(messages[0].contains("111"));
}

#[tokio::test]
async fn cascade_retry_adds_nothing() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 2, 3, 10, 11]);
    h.service.submit_group(GroupId(50)).await.unwrap();
    h.service.approve_candidate(UserId(1), None, &reviewer()).await.unwrap();

    let first = h.service.approve_suspect_group(GroupId(50)).await.unwrap();
    assert_eq!(first.banned.len(), 2);
    let banned_after_first = h.banned_ids().await;
    let log_after_first = h.service.action_log().await.len();

    let second = h.service.approve_suspect_group(GroupId(50)).await.unwrap();
    assert!(second.banned.is_empty());
    assert_eq!(h.banned_ids().await, banned_after_first);
    assert_eq!(h.service.action_log().await.len(), log_after_first);
    assert_eq!(h.notifier.messages().len(), 1);
}

#[tokio::test]
async fn cascade_uses_fresh_membership() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 2, 3, 10, 11]);
    h.service.submit_group(GroupId(50)).await.unwrap();
    h.service.approve_candidate(UserId(1), None, &reviewer()).await.unwrap();

    // 3 left the group and 30 joined after the flag was raised.
    h.directory.set_group(50, "Fifty", &[1, 2, 10, 11, 30]);
    let report = h.service.approve_suspect_group(GroupId(50)).await.unwrap();

    let new_ids: Vec<u64> = report.banned.iter().map(|r| r.user_id().0).collect();
    assert_eq!(new_ids, vec![2]);
    assert_eq!(h.pending_ids().await, vec![3]);
    assert_eq!(h.banned_ids().await, vec![1, 2, 10, 11]);
}

#[tokio::test]
async fn cascade_never_bans_members_who_were_not_submitted() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 10, 11]);
    assert_ok!(h.service.submit_group(GroupId(50)).await);
    assert_ok!(h.service.approve_candidate(UserId(1), None, &reviewer()).await);

    let joined: Vec<u64> = (500..1000).collect();
    let mut members = vec![1, 10, 11];
    members.extend(&joined);
    h.directory.set_group(50, "Fifty", &members);

    let report = assert_ok!(h.service.approve_suspect_group(GroupId(50)).await);
    assert!(report.banned.is_empty());
    assert_eq!(h.banned_ids().await, vec![1, 10, 11]);
    assert!(h.notifier.messages().is_empty());
}

#[tokio::test]
async fn cascade_leaves_candidates_queued_from_other_groups() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 2, 10, 11]);
    h.directory.set_group(60, "Sixty", &[7]);
    assert_ok!(h.service.submit_group(GroupId(60)).await);
    assert_ok!(h.service.submit_group(GroupId(50)).await);
    assert_ok!(h.service.approve_candidate(UserId(1), None, &reviewer()).await);

    // 7 was queued from group 60 and has since joined group 50.
    h.directory.set_group(50, "Fifty", &[1, 2, 7, 10, 11]);
    let report = assert_ok!(h.service.approve_suspect_group(GroupId(50)).await);

    let new_ids: Vec<u64> = report.banned.iter().map(|r| r.user_id().0).collect();
    assert_eq!(new_ids, vec![2]);
    assert_eq!(h.pending_ids().await, vec![7]);
}

#[tokio::test]
async fn cascade_interrupted_before_logging_is_finished_by_a_retry() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 2, 3, 10, 11]);
    assert_ok!(h.service.submit_group(GroupId(50)).await);
    assert_ok!(h.service.approve_candidate(UserId(1), None, &reviewer()).await);

    h.store.fail_next_write(EntitySet::ActionLog);
    let err = assert_err!(h.service.approve_suspect_group(GroupId(50)).await);
    assert!(matches!(err, AppError::Internal(_)));
    assert_eq!(h.banned_ids().await, vec![1, 2, 3, 10, 11]);
    assert_eq!(h.pending_ids().await, vec![2, 3]);
    assert_eq!(h.service.stats().await.auto_bans, 0);
    assert!(h.notifier.messages().is_empty());

    let report = assert_ok!(h.service.approve_suspect_group(GroupId(50)).await);
    let mut ids: Vec<u64> = report.banned.iter().map(|r| r.user_id().0).collect();
    ids.sort();
    assert_eq!(ids, vec![2, 3]);
    assert!(h.pending_ids().await.is_empty());
    assert_eq!(h.service.stats().await.auto_bans, 2);
    assert_eq!(h.notifier.messages().len(), 1);

    let again = assert_ok!(h.service.approve_suspect_group(GroupId(50)).await);
    assert!(again.banned.is_empty());
    assert_eq!(h.service.stats().await.auto_bans, 2);
}

#[tokio::test]
async fn detached_scan_flags_after_approval_returns() {
    let h = harness_with(ScanMode::Detached);
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 10, 11]);
    assert_ok!(h.service.submit_group(GroupId(50)).await);

    let approval = assert_ok!(h.service.approve_candidate(UserId(1), None, &reviewer()).await);
    assert!(approval.flagged.is_empty());

    let suspects = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let suspects = h.service.list_suspect_groups(None).await;
            if !suspects.is_empty() {
                break suspects;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("detached scan never flagged the group");

    assert_eq!(suspects.len(), 1);
    assert_eq!(suspects[0].group_id, GroupId(50));
    assert_eq!(suspects[0].triggered_by, UserId(1));
}

#[tokio::test]
async fn failed_cascade_stays_approved_and_can_be_retried() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 2, 10, 11]);
    h.service.submit_group(GroupId(50)).await.unwrap();
    h.service.approve_candidate(UserId(1), None, &reviewer()).await.unwrap();

    h.directory.fail_group(50, true);
    let err = h.service.approve_suspect_group(GroupId(50)).await.unwrap_err();
    assert!(matches!(err, AppError::ExternalDependency(msg) if msg.contains("50")));
    assert_eq!(
        h.service.list_suspect_groups(None).await[0].status,
        SuspectStatus::Approved
    );
    assert_eq!(h.pending_ids().await, vec![2]);
    assert!(h.notifier.messages().is_empty());

    h.directory.fail_group(50, false);
    let report = h.service.approve_suspect_group(GroupId(50)).await.unwrap();
    assert_eq!(report.banned.len(), 1);
    assert!(h.pending_ids().await.is_empty());
}

#[tokio::test]
async fn stats_track_suspects_and_auto_bans() {
    let h = harness();
    h.seed_banned(&[10, 11]).await;
    h.directory.set_group(50, "Fifty", &[1, 2, 10, 11]);
    h.service.submit_group(GroupId(50)).await.unwrap();
    h.service.approve_candidate(UserId(1), None, &reviewer()).await.unwrap();
    assert_eq!(h.service.stats().await.suspects_pending, 1);

    h.service.approve_suspect_group(GroupId(50)).await.unwrap();
    let stats = h.service.stats().await;
    assert_eq!(stats.suspects_pending, 0);
    assert_eq!(stats.auto_bans, 1);
    assert_eq!(stats.approvals, 1);
}
