//! Integration tests for the SeaORM repository against in-memory SQLite.

mod test_utils;

use ingest::domain::{Provider, epoch};
use ingest::repositories::{BatchReport, Repository};
use test_utils::{at_hour, make_email, make_user, setup_test_repository};
use uuid::Uuid;

#[tokio::test]
async fn init_schema_is_idempotent() {
    let repo = setup_test_repository().await.unwrap();
    repo.init_schema().await.unwrap();
    repo.init_schema().await.unwrap();

    let tenant_id = Uuid::new_v4();
    let users = vec![make_user(tenant_id, "u1", Provider::Google)];
    let report = repo.save_users(&users).await.unwrap();
    assert_eq!(report.inserted, 1);
}

#[tokio::test]
async fn watermark_starts_at_epoch_and_tracks_latest() {
    let repo = setup_test_repository().await.unwrap();
    let tenant_id = Uuid::new_v4();

    assert_eq!(
        repo.get_last_sync_time(tenant_id, Provider::Microsoft)
            .await
            .unwrap(),
        epoch()
    );

    let user = make_user(tenant_id, "u1", Provider::Microsoft);
    repo.save_users(std::slice::from_ref(&user)).await.unwrap();

    let (t1, t2, t3) = (at_hour(1), at_hour(2), at_hour(3));
    let emails = vec![
        make_email(tenant_id, user.id, "m2", t2, Provider::Microsoft),
        make_email(tenant_id, user.id, "m3", t3, Provider::Microsoft),
        make_email(tenant_id, user.id, "m1", t1, Provider::Microsoft),
    ];
    let report = repo.save_emails(&emails).await.unwrap();
    assert_eq!(report.inserted, 3);

    assert_eq!(
        repo.get_last_sync_time(tenant_id, Provider::Microsoft)
            .await
            .unwrap(),
        t3
    );
}

#[tokio::test]
async fn watermark_is_scoped_to_tenant_and_provider() {
    let repo = setup_test_repository().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let user = make_user(tenant_id, "u1", Provider::Microsoft);
    repo.save_users(std::slice::from_ref(&user)).await.unwrap();
    repo.save_emails(&[make_email(
        tenant_id,
        user.id,
        "m1",
        at_hour(5),
        Provider::Microsoft,
    )])
    .await
    .unwrap();

    assert_eq!(
        repo.get_last_sync_time(tenant_id, Provider::Google)
            .await
            .unwrap(),
        epoch()
    );
    assert_eq!(
        repo.get_last_sync_time(Uuid::new_v4(), Provider::Microsoft)
            .await
            .unwrap(),
        epoch()
    );
}

#[tokio::test]
async fn saved_users_read_back_for_tenant_only() {
    let repo = setup_test_repository().await.unwrap();
    let tenant_a = Uuid::new_v4();
    let tenant_b = Uuid::new_v4();

    let alice = make_user(tenant_a, "alice", Provider::Google);
    let bob = make_user(tenant_a, "bob", Provider::Microsoft);
    let carol = make_user(tenant_b, "carol", Provider::Google);
    repo.save_users(&[alice.clone(), bob.clone(), carol])
        .await
        .unwrap();

    let stored = repo.get_users_by_tenant(tenant_a).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.contains(&alice));
    assert!(stored.contains(&bob));
}

#[tokio::test]
async fn duplicate_users_in_one_batch_leave_one_row() {
    let repo = setup_test_repository().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let first = make_user(tenant_id, "dup", Provider::Google);
    let second = make_user(tenant_id, "dup", Provider::Google);

    let report = repo
        .save_users(&[first.clone(), second])
        .await
        .unwrap();
    assert_eq!(
        report,
        BatchReport {
            inserted: 1,
            skipped: 1,
            failed: 0
        }
    );

    let stored = repo.get_users_by_tenant(tenant_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, first.id);
}

#[tokio::test]
async fn canonical_user_id_survives_refetch() {
    let repo = setup_test_repository().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let original = make_user(tenant_id, "ext-42", Provider::Microsoft);
    repo.save_users(std::slice::from_ref(&original))
        .await
        .unwrap();

    // A later fetch carries a new placeholder id for the same external identity.
    let refetched = make_user(tenant_id, "ext-42", Provider::Microsoft);
    assert_ne!(refetched.id, original.id);
    let report = repo.save_users(&[refetched]).await.unwrap();
    assert_eq!(report.skipped, 1);

    let stored = repo.get_users_by_tenant(tenant_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, original.id);
}

#[tokio::test]
async fn same_external_id_under_two_providers_is_two_users() {
    let repo = setup_test_repository().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let report = repo
        .save_users(&[
            make_user(tenant_id, "shared", Provider::Google),
            make_user(tenant_id, "shared", Provider::Microsoft),
        ])
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);
}

#[tokio::test]
async fn blank_external_user_id_is_counted_as_failed() {
    let repo = setup_test_repository().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let report = repo
        .save_users(&[
            make_user(tenant_id, "", Provider::Google),
            make_user(tenant_id, "ok", Provider::Google),
        ])
        .await
        .unwrap();
    assert_eq!(
        report,
        BatchReport {
            inserted: 1,
            skipped: 0,
            failed: 1
        }
    );
}

#[tokio::test]
async fn duplicate_emails_are_skipped() {
    let repo = setup_test_repository().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let user = make_user(tenant_id, "u1", Provider::Google);
    repo.save_users(std::slice::from_ref(&user)).await.unwrap();

    let email = make_email(tenant_id, user.id, "m1", at_hour(1), Provider::Google);
    let mut same_message = make_email(tenant_id, user.id, "m1", at_hour(1), Provider::Google);
    same_message.subject = "different subject".to_string();

    let report = repo
        .save_emails(&[email.clone(), same_message])
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped, 1);

    let report = repo.save_emails(&[email]).await.unwrap();
    assert_eq!(
        report,
        BatchReport {
            inserted: 0,
            skipped: 1,
            failed: 0
        }
    );

    let stored = repo
        .get_emails_by_tenant(tenant_id, Provider::Google)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].subject, "Subject m1");
}

#[tokio::test]
async fn bad_email_row_does_not_poison_the_batch() {
    let repo = setup_test_repository().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let user = make_user(tenant_id, "u1", Provider::Google);
    repo.save_users(std::slice::from_ref(&user)).await.unwrap();

    let orphan = make_email(tenant_id, Uuid::new_v4(), "orphan", at_hour(1), Provider::Google);
    let blank = make_email(tenant_id, user.id, "", at_hour(1), Provider::Google);
    let good = make_email(tenant_id, user.id, "good", at_hour(2), Provider::Google);

    let report = repo.save_emails(&[orphan, blank, good]).await.unwrap();
    assert_eq!(
        report,
        BatchReport {
            inserted: 1,
            skipped: 0,
            failed: 2
        }
    );

    let stored = repo
        .get_emails_by_tenant(tenant_id, Provider::Google)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].external_message_id, "good");
    assert_eq!(stored[0].user_id, user.id);
}

#[tokio::test]
async fn stored_emails_round_trip_recipients() {
    let repo = setup_test_repository().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let user = make_user(tenant_id, "u1", Provider::Microsoft);
    repo.save_users(std::slice::from_ref(&user)).await.unwrap();

    let mut email = make_email(tenant_id, user.id, "m1", at_hour(4), Provider::Microsoft);
    email.cc = vec!["cc1@example.com".to_string(), "cc2@example.com".to_string()];
    email.bcc = vec!["hidden@example.com".to_string()];
    repo.save_emails(std::slice::from_ref(&email)).await.unwrap();

    let stored = repo
        .get_emails_by_tenant(tenant_id, Provider::Microsoft)
        .await
        .unwrap();
    assert_eq!(stored, vec![email]);
}

#[tokio::test]
async fn empty_email_batch_is_a_no_op() {
    let repo = setup_test_repository().await.unwrap();
    let report = repo.save_emails(&[]).await.unwrap();
    assert_eq!(report, BatchReport::default());
}
