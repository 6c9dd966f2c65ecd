//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, Utc};
use uuid::Uuid;

use laurel_core::{
  id::{EntryId, ProgramId, UserId},
  ledger::{NewEntry, day_key},
  membership::{MemberStatus, NewMembership, ProgramLimits},
  pending::{NewPendingReward, PendingStatus},
  store::{
    AdmissionOutcome, ConsentStore, CountedAppend, LedgerStore, MembershipStore,
    PendingStore,
  },
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn user(id: &str) -> UserId { UserId::from(id) }

fn grant(user_id: &str, action: &str, context: &str, amount: i64) -> NewEntry {
  let user = user(user_id);
  NewEntry::grant(
    EntryId::for_action(action, &user, context),
    user,
    amount,
    action,
    Some(action.to_owned()),
    None,
  )
}

fn limits(capacity: u32) -> ProgramLimits {
  ProgramLimits { capacity, enforce_capacity: true }
}

// ─── Plain append ────────────────────────────────────────────────────────────

#[tokio::test]
async fn append_then_replay_is_idempotent() {
  let s = store().await;

  let first = s.append(grant("u-1", "comment.write", "c-1", 5)).await.unwrap();
  assert!(first.created);

  let replay = s.append(grant("u-1", "comment.write", "c-1", 5)).await.unwrap();
  assert!(!replay.created);

  let entries = s.entries_for_user(&user("u-1")).await.unwrap();
  assert_eq!(entries.len(), 1);
  assert_eq!(entries[0].amount, 5);
}

#[tokio::test]
async fn concurrent_appends_with_same_id_write_once() {
  let s = store().await;

  let mut tasks = tokio::task::JoinSet::new();
  for _ in 0..16 {
    let s = s.clone();
    tasks.spawn(async move {
      s.append(grant("u-1", "comment.write", "c-1", 5)).await.unwrap().created
    });
  }

  let mut created = 0;
  while let Some(result) = tasks.join_next().await {
    if result.unwrap() {
      created += 1;
    }
  }

  assert_eq!(created, 1);
  assert_eq!(s.balance(&user("u-1"), None).await.unwrap().total, 5);
}

// ─── Counted append ──────────────────────────────────────────────────────────

#[tokio::test]
async fn counted_append_increments_counter_once() {
  let s = store().await;
  let day = day_key(Utc::now());

  let first = s
    .append_counted(grant("u-1", "comment.write", "c-1", 5), Some(3))
    .await
    .unwrap();
  assert_eq!(first, CountedAppend::Created);

  let replay = s
    .append_counted(grant("u-1", "comment.write", "c-1", 5), Some(3))
    .await
    .unwrap();
  assert_eq!(replay, CountedAppend::Duplicate);

  // The duplicate must not have moved the counter.
  let count = s.daily_count(&user("u-1"), "comment.write", &day).await.unwrap();
  assert_eq!(count, 1);
}

#[tokio::test]
async fn counted_append_enforces_daily_cap() {
  let s = store().await;

  for i in 0..2 {
    let out = s
      .append_counted(grant("u-1", "comment.write", &format!("c-{i}"), 5), Some(2))
      .await
      .unwrap();
    assert_eq!(out, CountedAppend::Created);
  }

  let third = s
    .append_counted(grant("u-1", "comment.write", "c-9", 5), Some(2))
    .await
    .unwrap();
  assert_eq!(third, CountedAppend::CapExceeded);

  // The capped attempt wrote nothing.
  assert_eq!(s.entries_for_user(&user("u-1")).await.unwrap().len(), 2);
  assert_eq!(s.balance(&user("u-1"), None).await.unwrap().total, 10);
}

#[tokio::test]
async fn counter_is_per_user_and_per_action() {
  let s = store().await;
  let day = day_key(Utc::now());

  s.append_counted(grant("u-1", "comment.write", "c-1", 5), Some(2))
    .await
    .unwrap();
  s.append_counted(grant("u-1", "post.review", "p-1", 10), Some(2))
    .await
    .unwrap();
  s.append_counted(grant("u-2", "comment.write", "c-1", 5), Some(2))
    .await
    .unwrap();

  assert_eq!(s.daily_count(&user("u-1"), "comment.write", &day).await.unwrap(), 1);
  assert_eq!(s.daily_count(&user("u-1"), "post.review", &day).await.unwrap(), 1);
  assert_eq!(s.daily_count(&user("u-2"), "comment.write", &day).await.unwrap(), 1);
}

#[tokio::test]
async fn uncapped_counted_append_still_counts() {
  let s = store().await;
  let day = day_key(Utc::now());

  for i in 0..5 {
    s.append_counted(grant("u-1", "visit", &format!("v-{i}"), 1), None)
      .await
      .unwrap();
  }

  assert_eq!(s.daily_count(&user("u-1"), "visit", &day).await.unwrap(), 5);
}

// ─── Deduction ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn deduction_clamps_at_active_balance() {
  let s = store().await;
  s.append(grant("u-1", "comment.write", "c-1", 30)).await.unwrap();

  let out = s
    .append_deduction(NewEntry::deduction(
      EntryId::new("spend:o-1"),
      user("u-1"),
      100,
      "shop order",
    ))
    .await
    .unwrap();

  assert_eq!(out.deducted, 30);
  assert!(!out.duplicate);
  assert_eq!(s.balance(&user("u-1"), None).await.unwrap().total, 0);
}

#[tokio::test]
async fn duplicate_deduction_deducts_zero() {
  let s = store().await;
  s.append(grant("u-1", "comment.write", "c-1", 30)).await.unwrap();

  let first = s
    .append_deduction(NewEntry::deduction(
      EntryId::new("spend:o-1"),
      user("u-1"),
      10,
      "shop order",
    ))
    .await
    .unwrap();
  assert_eq!(first.deducted, 10);

  let replay = s
    .append_deduction(NewEntry::deduction(
      EntryId::new("spend:o-1"),
      user("u-1"),
      10,
      "shop order",
    ))
    .await
    .unwrap();
  assert!(replay.duplicate);
  assert_eq!(replay.deducted, 0);
  assert_eq!(s.balance(&user("u-1"), None).await.unwrap().total, 20);
}

#[tokio::test]
async fn zero_balance_deduction_burns_the_id() {
  let s = store().await;

  let out = s
    .append_deduction(NewEntry::deduction(
      EntryId::new("spend:o-1"),
      user("u-1"),
      10,
      "shop order",
    ))
    .await
    .unwrap();
  assert_eq!(out.deducted, 0);

  // Points arrive later; the same logical deduction must not fire again.
  s.append(grant("u-1", "comment.write", "c-1", 50)).await.unwrap();
  let replay = s
    .append_deduction(NewEntry::deduction(
      EntryId::new("spend:o-1"),
      user("u-1"),
      10,
      "shop order",
    ))
    .await
    .unwrap();
  assert!(replay.duplicate);
  assert_eq!(s.balance(&user("u-1"), None).await.unwrap().total, 50);
}

// ─── Expiration ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn expired_grant_is_excluded_but_still_stored() {
  let s = store().await;
  let u = user("u-1");

  let expired = NewEntry::grant(
    EntryId::new("bonus:u-1:old"),
    u.clone(),
    100,
    "old bonus",
    None,
    Some(Utc::now() - Duration::days(1)),
  );
  s.append(expired).await.unwrap();
  s.append(grant("u-1", "comment.write", "c-1", 5)).await.unwrap();

  // Only the live grant counts…
  assert_eq!(s.balance(&u, None).await.unwrap().total, 5);
  // …but the row physically remains.
  assert_eq!(s.entries_for_user(&u).await.unwrap().len(), 2);
}

#[tokio::test]
async fn balance_as_of_sees_grants_before_expiry() {
  let s = store().await;
  let u = user("u-1");

  let expires = Utc::now() + Duration::days(1);
  let entry = NewEntry::grant(
    EntryId::new("bonus:u-1:aug"),
    u.clone(),
    40,
    "bonus",
    None,
    Some(expires),
  );
  s.append(entry).await.unwrap();

  assert_eq!(s.balance(&u, None).await.unwrap().total, 40);
  let after = s.balance(&u, Some(expires + Duration::seconds(1))).await.unwrap();
  assert_eq!(after.total, 0);
}

#[tokio::test]
async fn sweep_stamps_expired_grants_only() {
  let s = store().await;
  let u = user("u-1");

  s.append(NewEntry::grant(
    EntryId::new("bonus:u-1:old"),
    u.clone(),
    10,
    "old",
    None,
    Some(Utc::now() - Duration::hours(2)),
  ))
  .await
  .unwrap();
  s.append(grant("u-1", "comment.write", "c-1", 5)).await.unwrap();

  let stamped = s.sweep_expired(&u, Utc::now()).await.unwrap();
  assert_eq!(stamped, 1);

  // Second sweep finds nothing new.
  assert_eq!(s.sweep_expired(&u, Utc::now()).await.unwrap(), 0);

  let entries = s.entries_for_user(&u).await.unwrap();
  let old = entries
    .iter()
    .find(|e| e.entry_id.as_str() == "bonus:u-1:old")
    .unwrap();
  assert!(old.consumed_at.is_some());
}

// ─── Memberships ─────────────────────────────────────────────────────────────

fn application(user_id: &str, nickname: &str) -> NewMembership {
  NewMembership {
    user_id:  user(user_id),
    nickname: nickname.to_owned(),
  }
}

#[tokio::test]
async fn apply_admits_as_pending() {
  let s = store().await;
  let program = ProgramId::from("supporters");

  let out = s.apply(&program, application("u-1", "alice"), &limits(10)).await.unwrap();
  let AdmissionOutcome::Admitted(m) = out else { panic!("expected admission") };
  assert_eq!(m.status, MemberStatus::Pending);

  let fetched = s.membership(&program, &user("u-1")).await.unwrap().unwrap();
  assert_eq!(fetched.nickname, "alice");
  assert!(fetched.approved_at.is_none());
}

#[tokio::test]
async fn apply_rejects_duplicate_user() {
  let s = store().await;
  let program = ProgramId::from("supporters");

  s.apply(&program, application("u-1", "alice"), &limits(10)).await.unwrap();
  let out = s.apply(&program, application("u-1", "alice2"), &limits(10)).await.unwrap();
  assert!(matches!(out, AdmissionOutcome::DuplicateApplication));
}

#[tokio::test]
async fn apply_rejects_taken_nickname() {
  let s = store().await;
  let program = ProgramId::from("supporters");

  s.apply(&program, application("u-1", "alice"), &limits(10)).await.unwrap();
  let out = s.apply(&program, application("u-2", "alice"), &limits(10)).await.unwrap();
  assert!(matches!(out, AdmissionOutcome::NicknameTaken));
}

#[tokio::test]
async fn rejected_membership_frees_nickname_and_slot() {
  let s = store().await;
  let program = ProgramId::from("supporters");

  s.apply(&program, application("u-1", "alice"), &limits(1)).await.unwrap();
  s.set_status(&program, &user("u-1"), MemberStatus::Rejected).await.unwrap();

  let out = s.apply(&program, application("u-2", "alice"), &limits(1)).await.unwrap();
  assert!(matches!(out, AdmissionOutcome::Admitted(_)));
}

#[tokio::test]
async fn apply_enforces_capacity() {
  let s = store().await;
  let program = ProgramId::from("supporters");

  for i in 0..3 {
    let out = s
      .apply(&program, application(&format!("u-{i}"), &format!("nick{i}")), &limits(3))
      .await
      .unwrap();
    assert!(matches!(out, AdmissionOutcome::Admitted(_)));
  }

  let out = s.apply(&program, application("u-9", "nick9"), &limits(3)).await.unwrap();
  assert!(matches!(out, AdmissionOutcome::CapacityReached));
  assert_eq!(s.members(&program).await.unwrap().len(), 3);
}

#[tokio::test]
async fn concurrent_applications_never_exceed_capacity() {
  let s = store().await;
  let program = ProgramId::from("supporters");

  let mut tasks = tokio::task::JoinSet::new();
  for i in 0..12 {
    let s = s.clone();
    let program = program.clone();
    tasks.spawn(async move {
      s.apply(&program, application(&format!("u-{i}"), &format!("nick{i}")), &limits(4))
        .await
        .unwrap()
    });
  }

  let mut admitted = 0;
  while let Some(result) = tasks.join_next().await {
    if matches!(result.unwrap(), AdmissionOutcome::Admitted(_)) {
      admitted += 1;
    }
  }

  assert_eq!(admitted, 4);
  assert_eq!(s.members(&program).await.unwrap().len(), 4);
}

#[tokio::test]
async fn capacity_ignored_when_not_enforced() {
  let s = store().await;
  let program = ProgramId::from("open-club");
  let open = ProgramLimits { capacity: 0, enforce_capacity: false };

  for i in 0..3 {
    let out = s
      .apply(&program, application(&format!("u-{i}"), &format!("nick{i}")), &open)
      .await
      .unwrap();
    assert!(matches!(out, AdmissionOutcome::Admitted(_)));
  }
}

#[tokio::test]
async fn set_status_stamps_transition_time() {
  let s = store().await;
  let program = ProgramId::from("supporters");
  s.apply(&program, application("u-1", "alice"), &limits(10)).await.unwrap();

  let approved = s
    .set_status(&program, &user("u-1"), MemberStatus::Approved)
    .await
    .unwrap();
  assert_eq!(approved.status, MemberStatus::Approved);
  assert!(approved.approved_at.is_some());
  assert!(approved.rejected_at.is_none());
}

#[tokio::test]
async fn set_status_unknown_membership_errors() {
  let s = store().await;
  let err = s
    .set_status(&ProgramId::from("supporters"), &user("ghost"), MemberStatus::Approved)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::MembershipNotFound(_)));
}

// ─── Pending rewards ─────────────────────────────────────────────────────────

fn pending(user_id: &str, action: &str) -> NewPendingReward {
  NewPendingReward {
    user_id:    user(user_id),
    action_key: action.to_owned(),
    metadata:   serde_json::json!({ "context_id": "c-1" }),
    error:      "store unavailable".into(),
    error_code: "unavailable".into(),
  }
}

#[tokio::test]
async fn record_and_list_open_pending() {
  let s = store().await;

  let first = s.record(pending("u-1", "comment.write")).await.unwrap();
  s.record(pending("u-2", "post.review")).await.unwrap();

  let open = s.open(10).await.unwrap();
  assert_eq!(open.len(), 2);
  // Oldest first.
  assert_eq!(open[0].pending_id, first.pending_id);
  assert_eq!(open[0].metadata["context_id"], "c-1");
  assert_eq!(open[0].status, PendingStatus::Open);
}

#[tokio::test]
async fn resolve_removes_from_open_set() {
  let s = store().await;
  let record = s.record(pending("u-1", "comment.write")).await.unwrap();

  let resolved = s.resolve(&record.pending_id).await.unwrap();
  assert_eq!(resolved.status, PendingStatus::Resolved);
  assert!(resolved.resolved_at.is_some());

  assert!(s.open(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn resolve_is_idempotent() {
  let s = store().await;
  let record = s.record(pending("u-1", "comment.write")).await.unwrap();

  let first = s.resolve(&record.pending_id).await.unwrap();
  let again = s.resolve(&record.pending_id).await.unwrap();
  assert_eq!(first.resolved_at, again.resolved_at);
}

#[tokio::test]
async fn resolve_unknown_pending_errors() {
  let s = store().await;
  let err = s.resolve(&Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, crate::Error::PendingNotFound(_)));
}

// ─── Consents ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_user_has_no_consent() {
  let s = store().await;
  assert!(!s.has_marketing_consent(&user("u-1")).await.unwrap());
}

#[tokio::test]
async fn consent_can_be_granted_and_withdrawn() {
  let s = store().await;
  let u = user("u-1");

  s.set_marketing_consent(&u, true).await.unwrap();
  assert!(s.has_marketing_consent(&u).await.unwrap());

  s.set_marketing_consent(&u, false).await.unwrap();
  assert!(!s.has_marketing_consent(&u).await.unwrap());
}
