mod common;

use std::collections::HashSet;

use chrono::Duration as ChronoDuration;
use common::*;
use ghblock::util::clock::Clock;
use ghblock::state::{NotificationPhase, PrStateManager, StateTimings, transition};

fn manager() -> (std::sync::Arc<ghblock::util::clock::ManualClock>, PrStateManager) {
    let clock = manual_clock();
    let manager = PrStateManager::new(StateTimings::default(), as_clock(&clock));
    (clock, manager)
}

fn no_hidden() -> HashSet<String> {
    HashSet::new()
}

fn urls(prs: &[ghblock::github::PullRequest]) -> Vec<String> {
    prs.iter().map(|pr| pr.url.clone()).collect()
}

#[test]
fn test_transition_table() {
    use NotificationPhase::*;
    assert_eq!(transition(Unseen, false, true), (Notified, false));
    assert_eq!(transition(Unseen, true, true), (Notified, false));
    assert_eq!(transition(Unseen, true, false), (PendingNotification, false));
    assert_eq!(transition(Unseen, false, false), (Notified, true));
    assert_eq!(transition(PendingNotification, true, false), (PendingNotification, false));
    assert_eq!(transition(PendingNotification, false, false), (Notified, true));
    assert_eq!(transition(Notified, false, false), (Notified, false));
    assert_eq!(transition(Notified, true, false), (Notified, false));
}

#[test]
fn test_identical_input_notifies_once() {
    let (clock, manager) = manager();
    clock.advance(secs(60));
    let prs = vec![blocked(pr("acme/api", 1, clock.now()))];

    let first = manager.reconcile(&prs, &[], &no_hidden());
    assert_eq!(urls(&first), vec![pr_url("acme/api", 1)]);

    let second = manager.reconcile(&prs, &[], &no_hidden());
    assert!(second.is_empty());
}

#[test]
fn test_reblocked_pr_notifies_again() {
    let (clock, manager) = manager();
    clock.advance(secs(60));
    let fresh = pr("acme/api", 7, clock.now());

    let notified = manager.reconcile(&[blocked(fresh.clone())], &[], &no_hidden());
    assert_eq!(notified.len(), 1);

    clock.advance(secs(60));
    let notified = manager.reconcile(&[fresh.clone()], &[], &no_hidden());
    assert!(notified.is_empty());
    assert!(manager.state(&fresh.url).is_none());

    clock.advance(secs(60));
    let notified = manager.reconcile(&[blocked(fresh.clone())], &[], &no_hidden());
    assert_eq!(urls(&notified), vec![fresh.url.clone()]);
}

#[test]
fn test_stale_pr_is_never_notified() {
    let (clock, manager) = manager();
    clock.advance(secs(60));
    let old = blocked(pr(
        "acme/api",
        3,
        clock.now() - ChronoDuration::hours(2),
    ));

    assert!(manager.reconcile(&[old.clone()], &[], &no_hidden()).is_empty());
    let state = manager.state(&old.url).unwrap();
    assert_eq!(state.phase, NotificationPhase::Notified);
    assert!(state.has_notified());

    clock.advance(secs(600));
    assert!(manager.reconcile(&[old], &[], &no_hidden()).is_empty());
}

#[test]
fn test_stale_pr_found_during_grace_is_never_notified() {
    let (clock, manager) = manager();
    clock.advance(secs(5));
    let old = blocked(pr(
        "acme/api",
        4,
        clock.now() - ChronoDuration::days(3),
    ));

    assert!(manager.reconcile(&[old.clone()], &[], &no_hidden()).is_empty());
    clock.advance(secs(60));
    assert!(manager.reconcile(&[old], &[], &no_hidden()).is_empty());
}

#[test]
fn test_first_blocked_at_is_preserved() {
    let (clock, manager) = manager();
    clock.advance(secs(60));
    let first_seen = clock.now();
    let prs = vec![blocked(pr("acme/web", 2, first_seen))];

    manager.reconcile(&prs, &[], &no_hidden());
    clock.advance(secs(120));
    manager.reconcile(&prs, &[], &no_hidden());
    clock.advance(secs(120));
    manager.reconcile(&prs, &[], &no_hidden());

    let state = manager.state(&prs[0].url).unwrap();
    assert_eq!(state.first_blocked_at, first_seen);
    assert_eq!(state.last_seen_blocked, clock.now());
}

#[test]
fn test_hidden_org_is_ignored_and_untracked() {
    let (clock, manager) = manager();
    clock.advance(secs(60));
    let now = clock.now();
    let visible = blocked(pr("visible-org/repo", 1, now));
    let hidden = blocked(pr("hidden-org/repo", 2, now));

    let notified = manager.reconcile(&[visible.clone(), hidden.clone()], &[], &no_hidden());
    assert_eq!(notified.len(), 2);

    let hidden_orgs: HashSet<String> = ["hidden-org".to_string()].into_iter().collect();
    let notified = manager.reconcile(&[visible.clone(), hidden.clone()], &[], &hidden_orgs);
    assert!(notified.is_empty());
    assert!(manager.state(&hidden.url).is_none());
    assert!(manager.state(&visible.url).is_some());
    assert_eq!(manager.blocked_prs().len(), 1);
}

#[test]
fn test_hidden_org_never_notifies() {
    let (clock, manager) = manager();
    clock.advance(secs(60));
    let hidden = blocked(pr("hidden-org/repo", 9, clock.now()));
    let hidden_orgs: HashSet<String> = ["hidden-org".to_string()].into_iter().collect();

    assert!(manager.reconcile(&[hidden], &[], &hidden_orgs).is_empty());
    assert!(manager.blocked_prs().is_empty());
}

#[test]
fn test_grace_period_end_to_end() {
    let (clock, manager) = manager();
    let prs = vec![blocked(pr("acme/api", 11, clock.now()))];

    clock.advance(secs(10));
    assert!(manager.reconcile(&prs, &[], &no_hidden()).is_empty());
    let state = manager.state(&prs[0].url).unwrap();
    assert_eq!(state.phase, NotificationPhase::PendingNotification);
    assert!(state.is_initial_discovery);

    clock.advance(secs(25));
    let notified = manager.reconcile(&prs, &[], &no_hidden());
    assert_eq!(urls(&notified), vec![prs[0].url.clone()]);

    clock.advance(secs(5));
    assert!(manager.reconcile(&prs, &[], &no_hidden()).is_empty());
}

#[test]
fn test_unobserved_records_are_dropped() {
    let (clock, manager) = manager();
    clock.advance(secs(60));
    let now = clock.now();
    let a = blocked(pr("acme/api", 1, now));
    let b = outgoing(blocked(pr("acme/api", 2, now)));

    manager.reconcile(&[a.clone()], &[b.clone()], &no_hidden());
    assert_eq!(manager.blocked_prs().len(), 2);

    manager.reconcile(&[a.clone()], &[], &no_hidden());
    assert!(manager.is_blocked(&a.url));
    assert!(!manager.is_blocked(&b.url));
}

#[test]
fn test_reset_notifications_renotifies() {
    let (clock, manager) = manager();
    clock.advance(secs(60));
    let prs = vec![blocked(pr("acme/api", 5, clock.now()))];

    assert_eq!(manager.reconcile(&prs, &[], &no_hidden()).len(), 1);
    manager.reset_notifications();
    assert_eq!(
        manager.state(&prs[0].url).unwrap().phase,
        NotificationPhase::PendingNotification
    );
    assert_eq!(manager.reconcile(&prs, &[], &no_hidden()).len(), 1);
    assert!(manager.reconcile(&prs, &[], &no_hidden()).is_empty());
}

#[test]
fn test_needs_review_alone_counts_as_blocked() {
    let (clock, manager) = manager();
    clock.advance(secs(60));
    let mut review = pr("acme/api", 8, clock.now());
    review.flags.needs_review = true;

    assert_eq!(manager.reconcile(&[review], &[], &no_hidden()).len(), 1);
}

#[test]
fn test_notification_recorded_elsewhere_is_not_repeated() {
    let (clock, manager) = manager();
    clock.advance(secs(60));
    let prs = vec![blocked(pr("acme/api", 9, clock.now()))];

    manager.record_notified(&prs[0]);
    let state = manager.state(&pr_url("acme/api", 9)).unwrap();
    assert_eq!(state.phase, NotificationPhase::Notified);
    assert_eq!(state.first_blocked_at, clock.now());

    clock.advance(secs(60));
    assert!(manager.reconcile(&prs, &[], &no_hidden()).is_empty());
    assert_eq!(
        manager.state(&pr_url("acme/api", 9)).unwrap().first_blocked_at,
        clock.now() - ChronoDuration::seconds(60)
    );
}

#[test]
fn test_recorded_notification_upgrades_pending_record() {
    let (clock, manager) = manager();
    let prs = vec![blocked(pr("acme/api", 3, clock.now()))];

    // Inside the grace period the record is only pending.
    assert!(manager.reconcile(&prs, &[], &no_hidden()).is_empty());
    assert_eq!(
        manager.state(&pr_url("acme/api", 3)).unwrap().phase,
        NotificationPhase::PendingNotification
    );

    manager.record_notified(&prs[0]);
    clock.advance(secs(60));

    assert!(manager.reconcile(&prs, &[], &no_hidden()).is_empty());
}
