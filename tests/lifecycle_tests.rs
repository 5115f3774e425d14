use chrono::Duration;
use escrowd::application::ledger::ResumeAt;
use escrowd::config::{EscrowPolicy, TiePolicy};
use escrowd::domain::dispute::{Dispute, DisputeState, Outcome, VoteChoice};
use escrowd::domain::escrow::{Actor, EscrowState, LedgerEventKind};
use escrowd::domain::ports::DisputeStore;
use escrowd::error::EscrowError;
use escrowd::infrastructure::in_memory::in_memory_stores;
use escrowd::infrastructure::reputation::ReputationBook;

mod common;
use common::{CLIENT, FREELANCER, Harness, dispute_request, t0, user};

async fn disputed_with_votes(h: &Harness, votes_for: usize, votes_against: usize) -> Dispute {
    h.pay("inv-1").await;
    h.clock.set(t0() + Duration::days(5));
    let dispute = h.engine.open(dispute_request("inv-1", CLIENT)).await.unwrap();
    assert_eq!(dispute.voting_closes_at, t0() + Duration::days(12));

    h.clock.set(t0() + Duration::days(6));
    let ballots = std::iter::repeat_n(VoteChoice::For, votes_for)
        .chain(std::iter::repeat_n(VoteChoice::Against, votes_against));
    for (i, choice) in ballots.enumerate() {
        h.engine
            .cast_vote(dispute.id, user(&format!("voter-{i}")), choice)
            .await
            .unwrap();
    }
    dispute
}

#[tokio::test]
async fn test_dispute_suspends_auto_release() {
    let h = Harness::new();
    let entry = h.pay("inv-1").await;
    assert_eq!(entry.auto_release_at, Some(t0() + Duration::days(14)));

    h.clock.set(t0() + Duration::days(5));
    h.engine.open(dispute_request("inv-1", FREELANCER)).await.unwrap();

    let entry = h.ledger.get(entry.id).await.unwrap();
    assert_eq!(entry.state, EscrowState::Held);
    assert_eq!(entry.auto_release_at, None);

    // Past the original deadline, the sweep leaves it alone.
    h.clock.set(t0() + Duration::days(15));
    let report = h.ledger.sweep().await.unwrap();
    assert!(report.released.is_empty());
    assert_eq!(h.ledger.get(entry.id).await.unwrap().state, EscrowState::Held);
}

#[tokio::test]
async fn test_majority_for_releases_funds() {
    let h = Harness::new();
    let dispute = disputed_with_votes(&h, 3, 1).await;

    h.clock.set(t0() + Duration::days(12));
    let resolved = h.engine.close_voting(dispute.id).await.unwrap();
    assert_eq!(resolved.state, DisputeState::Resolved);
    assert_eq!(resolved.outcome, Some(Outcome::For));

    let entry = h.ledger.get(dispute.escrow_entry_id).await.unwrap();
    assert_eq!(entry.state, EscrowState::Released);
    assert_eq!(entry.released_at, Some(t0() + Duration::days(12)));

    let events = h.ledger.events(entry.id).await.unwrap();
    assert!(matches!(
        events.last().map(|e| &e.kind),
        Some(LedgerEventKind::Released {
            actor: Actor::Resolution {
                outcome: Outcome::For,
                ..
            }
        })
    ));
}

#[tokio::test]
async fn test_majority_against_refunds_client() {
    let h = Harness::new();
    let dispute = disputed_with_votes(&h, 1, 2).await;

    h.clock.set(t0() + Duration::days(12));
    let resolved = h.engine.close_voting(dispute.id).await.unwrap();
    assert_eq!(resolved.outcome, Some(Outcome::Against));
    let entry = h.ledger.get(dispute.escrow_entry_id).await.unwrap();
    assert_eq!(entry.state, EscrowState::Refunded);
}

#[tokio::test]
async fn test_tie_returns_entry_to_held_with_fresh_deadline() {
    let h = Harness::new();
    let dispute = disputed_with_votes(&h, 2, 2).await;

    let close_time = t0() + Duration::days(12);
    h.clock.set(close_time);
    let resolved = h.engine.close_voting(dispute.id).await.unwrap();
    assert_eq!(resolved.outcome, Some(Outcome::Tied));

    let entry = h.ledger.get(dispute.escrow_entry_id).await.unwrap();
    assert_eq!(entry.state, EscrowState::Held);
    assert_eq!(entry.auto_release_at, Some(close_time + Duration::days(14)));
    assert_eq!(entry.released_at, None);
}

#[tokio::test]
async fn test_tie_policy_refund() {
    let h = Harness::with_policy(EscrowPolicy {
        tie_policy: TiePolicy::Refund,
        ..EscrowPolicy::default()
    });
    let dispute = disputed_with_votes(&h, 0, 0).await;

    h.clock.set(t0() + Duration::days(12));
    h.engine.close_voting(dispute.id).await.unwrap();
    let entry = h.ledger.get(dispute.escrow_entry_id).await.unwrap();
    assert_eq!(entry.state, EscrowState::Refunded);
}

#[tokio::test]
async fn test_quorum_shortfall_is_tied() {
    let h = Harness::with_policy(EscrowPolicy {
        quorum: Some(5),
        ..EscrowPolicy::default()
    });
    let dispute = disputed_with_votes(&h, 3, 1).await;

    h.clock.set(t0() + Duration::days(12));
    let resolved = h.engine.close_voting(dispute.id).await.unwrap();
    assert_eq!(resolved.outcome, Some(Outcome::Tied));
    assert_eq!(resolved.tally.map(|t| t.total()), Some(4));
}

#[tokio::test]
async fn test_sweep_releases_once() {
    let h = Harness::new();
    let entry = h.pay("inv-1").await;

    h.clock.set(t0() + Duration::days(14) + Duration::seconds(1));
    let report = h.ledger.sweep().await.unwrap();
    assert_eq!(report.released, vec![entry.id]);
    let released = h.ledger.get(entry.id).await.unwrap();
    assert_eq!(released.state, EscrowState::Released);

    h.clock.set(t0() + Duration::days(14) + Duration::hours(1));
    let report = h.ledger.sweep().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert!(report.released.is_empty());
    assert_eq!(h.ledger.get(entry.id).await.unwrap(), released);
}

#[tokio::test]
async fn test_dispute_after_deadline_is_window_closed_before_sweep() {
    let h = Harness::new();
    h.pay("inv-1").await;

    h.clock.set(t0() + Duration::days(14));
    let err = h
        .engine
        .open(dispute_request("inv-1", CLIENT))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::WindowClosed(_)));
}

#[tokio::test]
async fn test_close_voting_twice_moves_funds_once() {
    let h = Harness::new();
    let dispute = disputed_with_votes(&h, 3, 1).await;

    h.clock.set(t0() + Duration::days(12));
    let first = h.engine.close_voting(dispute.id).await.unwrap();
    h.clock.set(t0() + Duration::days(13));
    let second = h.engine.close_voting(dispute.id).await.unwrap();
    assert_eq!(first, second);

    let releases = h
        .ledger
        .events(dispute.escrow_entry_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| matches!(e.kind, LedgerEventKind::Released { .. }))
        .count();
    assert_eq!(releases, 1);
}

#[tokio::test]
async fn test_terminal_entries_never_change() {
    let h = Harness::new();
    let entry = h.pay("inv-1").await;
    let client = Actor::Client {
        user_id: user(CLIENT),
    };
    h.ledger.release(entry.id, client.clone()).await.unwrap();

    let again = h.ledger.release(entry.id, client).await.unwrap_err();
    assert!(matches!(again, EscrowError::NotHeld(_)));
    let dispute = h
        .engine
        .open(dispute_request("inv-1", FREELANCER))
        .await
        .unwrap_err();
    assert!(matches!(dispute, EscrowError::WindowClosed(_)));

    // The invoice can be held again once its previous entry is settled.
    let next = h.pay("inv-1").await;
    assert_ne!(next.id, entry.id);
    assert_eq!(h.ledger.get(entry.id).await.unwrap().state, EscrowState::Released);
}

#[tokio::test]
async fn test_withdraw_resumes_prior_deadline() {
    let h = Harness::new();
    let entry = h.pay("inv-1").await;
    h.clock.set(t0() + Duration::days(5));
    let dispute = h.engine.open(dispute_request("inv-1", CLIENT)).await.unwrap();

    let err = h.engine.withdraw(dispute.id, &user(FREELANCER)).await.unwrap_err();
    assert!(matches!(err, EscrowError::Unauthorized(_)));

    h.clock.set(t0() + Duration::days(6));
    let withdrawn = h.engine.withdraw(dispute.id, &user(CLIENT)).await.unwrap();
    assert_eq!(withdrawn.state, DisputeState::Withdrawn);

    let entry = h.ledger.get(entry.id).await.unwrap();
    assert_eq!(entry.auto_release_at, Some(t0() + Duration::days(14)));

    // Client release is allowed again.
    let released = h
        .ledger
        .release(
            entry.id,
            Actor::Client {
                user_id: user(CLIENT),
            },
        )
        .await
        .unwrap();
    assert_eq!(released.state, EscrowState::Released);
}

#[tokio::test]
async fn test_scheduler_tick_closes_expired_voting() {
    let h = Harness::new();
    let dispute = disputed_with_votes(&h, 0, 1).await;

    h.clock.set(t0() + Duration::days(12));
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.disputes_resolved, 1);
    assert_eq!(
        h.engine.get(dispute.id).await.unwrap().outcome,
        Some(Outcome::Against)
    );
}

#[tokio::test]
async fn test_interrupted_tie_close_resumes_once() {
    let stores = in_memory_stores();
    let h = Harness::with_stores(
        stores.clone(),
        EscrowPolicy::default(),
        ReputationBook::default(),
    );
    let dispute = disputed_with_votes(&h, 1, 1).await;

    // Voting closed and the hold restarted, but the dispute was never marked
    // resolved.
    let close_time = t0() + Duration::days(12);
    h.clock.set(close_time);
    let mut closed = h.engine.get(dispute.id).await.unwrap();
    let expected = closed.version;
    closed.close_voting(close_time).unwrap();
    assert!(stores.disputes.compare_and_swap(closed, expected).await.unwrap());
    h.ledger
        .resume_auto_release(dispute.escrow_entry_id, ResumeAt::FreshHoldPeriod)
        .await
        .unwrap();

    h.clock.set(close_time + Duration::hours(3));
    let resolved = h.engine.close_voting(dispute.id).await.unwrap();
    assert_eq!(resolved.state, DisputeState::Resolved);
    assert_eq!(resolved.outcome, Some(Outcome::Tied));

    let entry = h.ledger.get(dispute.escrow_entry_id).await.unwrap();
    assert_eq!(entry.auto_release_at, Some(close_time + Duration::days(14)));
    let resumes = h
        .ledger
        .events(entry.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| matches!(e.kind, LedgerEventKind::AutoReleaseResumed { .. }))
        .count();
    assert_eq!(resumes, 1);
}
