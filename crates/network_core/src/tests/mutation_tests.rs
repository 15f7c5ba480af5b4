use shared::protocol::StatusReport;

use super::*;
use crate::{
    categories::LoadOutcome,
    test_support::{conflict, me, network_failure, not_found, summary, Call, Harness, Op},
};

async fn seed(harness: &Harness, category: CategoryView) {
    let outcome = harness
        .categories
        .load_category(&category)
        .await
        .expect("seed load");
    assert!(matches!(outcome, LoadOutcome::Replaced { .. }));
}

#[tokio::test]
async fn send_moves_suggestion_to_pending_sent() {
    let harness = Harness::new();
    harness
        .remote
        .set_category(CategoryView::Suggestions, vec![summary("u1")]);
    seed(&harness, CategoryView::Suggestions).await;
    harness
        .statuses
        .resolve_batch(vec![UserId::from("u1")])
        .await
        .expect("resolve");
    assert_eq!(
        harness.statuses.get_status(&"u1".into()),
        ConnectionStatus::None
    );

    let outcome = harness
        .gateway
        .send_connection_request(&"u1".into(), "hi")
        .await
        .expect("send");

    assert_eq!(outcome, MutationOutcome::Applied);
    assert_eq!(
        harness.statuses.get_status(&"u1".into()),
        ConnectionStatus::PendingSent
    );
    assert!(harness.user_ids(&CategoryView::Suggestions).is_empty());
    let edge = harness.statuses.edge_for(&"u1".into()).expect("edge");
    assert_eq!(edge.connection_id, Some(ConnectionId::from("conn-1")));
    assert_eq!(
        harness.remote.calls().last(),
        Some(&Call::Send {
            recipient: "u1".into(),
            message: "hi".to_string(),
        })
    );
}

#[tokio::test]
async fn accept_clears_pending_and_reloads_connections() {
    let harness = Harness::new();
    harness.remote.set_category(
        CategoryView::Pending,
        vec![summary("u2").with_connection("c1")],
    );
    seed(&harness, CategoryView::Pending).await;
    harness.remote.set_category(
        CategoryView::Connections,
        vec![summary("u2").with_connection("c1")],
    );

    let outcome = harness
        .gateway
        .accept_connection_request(&"c1".into())
        .await
        .expect("accept");

    assert_eq!(outcome, MutationOutcome::Applied);
    assert!(harness
        .categories
        .get(&CategoryView::Pending)
        .iter()
        .all(|entry| !entry.has_connection(&"c1".into())));
    assert_eq!(harness.user_ids(&CategoryView::Connections), vec!["u2"]);
    assert_eq!(
        harness.statuses.get_status(&"u2".into()),
        ConnectionStatus::Connected
    );
    assert_eq!(
        harness.remote.calls()[1..],
        [
            Call::Accept("c1".into()),
            Call::LoadCategory(CategoryView::Connections),
        ]
    );
}

#[tokio::test]
async fn decline_removes_edge_from_pending_and_sent() {
    let harness = Harness::new();
    harness.remote.set_category(
        CategoryView::Pending,
        vec![summary("u3").with_connection("c3"), summary("u4").with_connection("c4")],
    );
    harness
        .remote
        .set_category(CategoryView::Sent, vec![summary("u3").with_connection("c3")]);
    seed(&harness, CategoryView::Pending).await;
    seed(&harness, CategoryView::Sent).await;

    let outcome = harness
        .gateway
        .decline_connection_request(&"c3".into())
        .await
        .expect("decline");

    assert_eq!(outcome, MutationOutcome::Applied);
    assert_eq!(harness.user_ids(&CategoryView::Pending), vec!["u4"]);
    assert!(harness.user_ids(&CategoryView::Sent).is_empty());
    assert_eq!(
        harness.statuses.get_status(&"u3".into()),
        ConnectionStatus::None
    );
}

#[tokio::test]
async fn remove_drops_connection_and_resets_status() {
    let harness = Harness::new();
    harness.remote.set_category(
        CategoryView::Connections,
        vec![summary("u5").with_connection("c5")],
    );
    harness.remote.set_status("u5", StatusReport::connected("c5"));
    seed(&harness, CategoryView::Connections).await;
    harness
        .statuses
        .resolve_batch(vec![UserId::from("u5")])
        .await
        .expect("resolve");

    let outcome = harness
        .gateway
        .remove_connection(&"c5".into())
        .await
        .expect("remove");

    assert_eq!(outcome, MutationOutcome::Applied);
    assert!(harness.user_ids(&CategoryView::Connections).is_empty());
    assert_eq!(
        harness.statuses.get_status(&"u5".into()),
        ConnectionStatus::None
    );
}

#[tokio::test]
async fn loading_flag_spans_the_round_trip_and_blocks_duplicates() {
    let harness = Harness::new();
    let key = ActionKey::User("u1".into());
    let held = harness.remote.hold_next(Op::Send);

    let gateway = Arc::clone(&harness.gateway);
    let send = tokio::spawn(async move {
        gateway
            .send_connection_request(&"u1".into(), "hello")
            .await
    });
    held.entered.await.expect("send reached the store");
    assert!(harness.loading.is_loading(&key));

    let err = harness
        .gateway
        .send_connection_request(&"u1".into(), "hello again")
        .await
        .expect_err("second send is rejected");
    assert!(matches!(err, SyncError::ConcurrentAction { key: ref k } if *k == key));
    assert_eq!(harness.remote.count(Op::Send), 1);

    held.release.send(()).expect("release");
    send.await.expect("join").expect("send");
    assert!(!harness.loading.is_loading(&key));
}

#[tokio::test]
async fn failed_send_rolls_back_and_clears_loading() {
    let harness = Harness::new();
    let mut events = harness.events.subscribe();
    harness.remote.set_category(
        CategoryView::Suggestions,
        vec![summary("u0"), summary("u1"), summary("u2")],
    );
    seed(&harness, CategoryView::Suggestions).await;
    harness
        .statuses
        .resolve_batch(vec![UserId::from("u1")])
        .await
        .expect("resolve");
    harness.remote.fail_next(Op::Send, network_failure());

    let err = harness
        .gateway
        .send_connection_request(&"u1".into(), "hi")
        .await
        .expect_err("send fails");

    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(
        harness.user_ids(&CategoryView::Suggestions),
        vec!["u0", "u1", "u2"]
    );
    assert_eq!(
        harness.statuses.get_status(&"u1".into()),
        ConnectionStatus::None
    );
    assert!(!harness.loading.is_loading(&ActionKey::User("u1".into())));

    let mut rolled_back = None;
    while let Ok(event) = events.try_recv() {
        if let NetworkEvent::MutationRolledBack { action, .. } = event {
            rolled_back = Some(action);
        }
    }
    assert_eq!(rolled_back, Some(EdgeAction::Send));
}

#[tokio::test]
async fn send_to_already_requested_user_is_a_no_op() {
    let harness = Harness::new();
    harness.remote.set_status("u1", StatusReport::pending(true, "c1"));
    harness
        .statuses
        .resolve_batch(vec![UserId::from("u1")])
        .await
        .expect("resolve");

    let outcome = harness
        .gateway
        .send_connection_request(&"u1".into(), "hi")
        .await
        .expect("send");

    assert_eq!(outcome, MutationOutcome::AlreadyApplied);
    assert_eq!(harness.remote.count(Op::Send), 0);
}

#[tokio::test]
async fn send_to_connected_user_is_rejected_locally() {
    let harness = Harness::new();
    harness.remote.set_status("u1", StatusReport::connected("c1"));
    harness
        .statuses
        .resolve_batch(vec![UserId::from("u1")])
        .await
        .expect("resolve");

    let err = harness
        .gateway
        .send_connection_request(&"u1".into(), "hi")
        .await
        .expect_err("send to a connection");

    assert!(matches!(err, SyncError::InvalidTransition(_)));
    assert_eq!(harness.remote.count(Op::Send), 0);
    assert_eq!(
        harness.statuses.get_status(&"u1".into()),
        ConnectionStatus::Connected
    );
}

#[tokio::test]
async fn accepting_twice_changes_nothing_the_second_time() {
    let harness = Harness::new();
    harness.remote.set_category(
        CategoryView::Pending,
        vec![summary("u2").with_connection("c1")],
    );
    seed(&harness, CategoryView::Pending).await;
    harness.remote.set_category(
        CategoryView::Connections,
        vec![summary("u2").with_connection("c1")],
    );

    harness
        .gateway
        .accept_connection_request(&"c1".into())
        .await
        .expect("first accept");
    let connections = harness.user_ids(&CategoryView::Connections);
    let calls = harness.remote.calls().len();

    let outcome = harness
        .gateway
        .accept_connection_request(&"c1".into())
        .await
        .expect("second accept");

    assert_eq!(outcome, MutationOutcome::AlreadyApplied);
    assert_eq!(harness.remote.calls().len(), calls);
    assert_eq!(harness.user_ids(&CategoryView::Connections), connections);
    assert_eq!(
        harness.statuses.get_status(&"u2".into()),
        ConnectionStatus::Connected
    );
}

#[tokio::test]
async fn accept_conflict_counts_as_already_applied() {
    let harness = Harness::new();
    harness.remote.set_category(
        CategoryView::Pending,
        vec![summary("u2").with_connection("c1")],
    );
    seed(&harness, CategoryView::Pending).await;
    harness.remote.fail_next(Op::Accept, conflict());

    let outcome = harness
        .gateway
        .accept_connection_request(&"c1".into())
        .await
        .expect("accept");

    assert_eq!(outcome, MutationOutcome::AlreadyApplied);
    assert!(harness.user_ids(&CategoryView::Pending).is_empty());
    assert_eq!(
        harness.statuses.get_status(&"u2".into()),
        ConnectionStatus::Connected
    );
}

#[tokio::test]
async fn decline_of_missing_edge_counts_as_already_applied() {
    let harness = Harness::new();
    harness.remote.set_category(
        CategoryView::Pending,
        vec![summary("u3").with_connection("c3")],
    );
    seed(&harness, CategoryView::Pending).await;
    harness.remote.fail_next(Op::Decline, not_found());

    let outcome = harness
        .gateway
        .decline_connection_request(&"c3".into())
        .await
        .expect("decline");

    assert_eq!(outcome, MutationOutcome::AlreadyApplied);
    assert!(harness.user_ids(&CategoryView::Pending).is_empty());
}

#[tokio::test]
async fn failed_decline_restores_both_lists() {
    let harness = Harness::new();
    harness.remote.set_category(
        CategoryView::Pending,
        vec![summary("u3").with_connection("c3")],
    );
    harness
        .remote
        .set_category(CategoryView::Sent, vec![summary("u3").with_connection("c3")]);
    seed(&harness, CategoryView::Pending).await;
    seed(&harness, CategoryView::Sent).await;
    harness.remote.fail_next(Op::Decline, network_failure());

    harness
        .gateway
        .decline_connection_request(&"c3".into())
        .await
        .expect_err("decline fails");

    assert_eq!(harness.user_ids(&CategoryView::Pending), vec!["u3"]);
    assert_eq!(harness.user_ids(&CategoryView::Sent), vec!["u3"]);
    assert_eq!(
        harness.statuses.get_status(&"u3".into()),
        ConnectionStatus::Unknown
    );
}

#[tokio::test]
async fn removing_a_pending_edge_is_an_invalid_transition() {
    let harness = Harness::new();
    harness.remote.set_status("u2", StatusReport::pending(false, "c1"));
    harness
        .statuses
        .resolve_batch(vec![UserId::from("u2")])
        .await
        .expect("resolve");

    let err = harness
        .gateway
        .remove_connection(&"c1".into())
        .await
        .expect_err("remove on a pending edge");

    match err {
        SyncError::InvalidTransition(transition) => {
            assert_eq!(transition.action, EdgeAction::Remove);
            assert_eq!(transition.from, Some(EdgeState::Pending));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.remote.count(Op::Remove), 0);
    assert!(!harness.loading.is_loading(&ActionKey::Connection("c1".into())));
}

#[tokio::test]
async fn batch_issued_before_a_send_cannot_undo_it() {
    let harness = Harness::new();
    let held = harness.remote.hold_next(Op::BatchStatus);

    let resolver = harness.statuses.clone();
    let batch = tokio::spawn(async move { resolver.resolve_batch(vec![UserId::from("u1")]).await });
    held.entered.await.expect("batch reached the store");

    harness
        .gateway
        .send_connection_request(&"u1".into(), "hi")
        .await
        .expect("send");
    held.release.send(()).expect("release");
    batch.await.expect("join").expect("batch");

    assert_eq!(
        harness.statuses.get_status(&"u1".into()),
        ConnectionStatus::PendingSent
    );
    let edge = harness.statuses.edge_for(&"u1".into()).expect("edge");
    assert_eq!(edge.requester_id, me());
}

#[tokio::test]
async fn retried_send_after_lost_response_settles_as_already_applied() {
    let harness = Harness::new();
    harness
        .remote
        .set_category(CategoryView::Suggestions, vec![summary("u0"), summary("u1")]);
    seed(&harness, CategoryView::Suggestions).await;
    harness.remote.fail_next(Op::Send, network_failure());
    harness
        .gateway
        .send_connection_request(&"u1".into(), "hi")
        .await
        .expect_err("first attempt loses its response");
    assert_eq!(harness.user_ids(&CategoryView::Suggestions), vec!["u0", "u1"]);

    // The server kept the first request.
    harness.remote.set_status("u1", StatusReport::pending(true, "c7"));
    harness.remote.fail_next(Op::Send, conflict());

    let outcome = harness
        .gateway
        .send_connection_request(&"u1".into(), "hi")
        .await
        .expect("retry");

    assert_eq!(outcome, MutationOutcome::AlreadyApplied);
    assert_eq!(
        harness.statuses.get_status(&"u1".into()),
        ConnectionStatus::PendingSent
    );
    let edge = harness.statuses.edge_for(&"u1".into()).expect("edge");
    assert_eq!(edge.connection_id, Some(ConnectionId::from("c7")));
    assert_eq!(harness.user_ids(&CategoryView::Suggestions), vec!["u0"]);
    assert!(!harness.loading.is_loading(&ActionKey::User("u1".into())));
}

#[tokio::test]
async fn cancelled_send_restores_caches() {
    let harness = Harness::new();
    harness
        .remote
        .set_category(CategoryView::Suggestions, vec![summary("u0"), summary("u1")]);
    seed(&harness, CategoryView::Suggestions).await;
    harness
        .statuses
        .resolve_batch(vec![UserId::from("u1")])
        .await
        .expect("resolve");
    let held = harness.remote.hold_next(Op::Send);

    let gateway = Arc::clone(&harness.gateway);
    let send = tokio::spawn(async move { gateway.send_connection_request(&"u1".into(), "hi").await });
    held.entered.await.expect("send reached the store");
    assert_eq!(harness.user_ids(&CategoryView::Suggestions), vec!["u0"]);
    assert_eq!(
        harness.statuses.get_status(&"u1".into()),
        ConnectionStatus::PendingSent
    );

    send.abort();
    assert!(send.await.expect_err("aborted").is_cancelled());

    assert_eq!(harness.user_ids(&CategoryView::Suggestions), vec!["u0", "u1"]);
    assert_eq!(
        harness.statuses.get_status(&"u1".into()),
        ConnectionStatus::None
    );
    assert!(!harness.loading.is_loading(&ActionKey::User("u1".into())));
}

#[tokio::test]
async fn rollback_does_not_discard_a_reload_issued_after_the_patch() {
    let harness = Harness::new();
    harness
        .remote
        .set_category(CategoryView::Suggestions, vec![summary("u0"), summary("u1")]);
    seed(&harness, CategoryView::Suggestions).await;

    harness.remote.fail_next(Op::Send, network_failure());
    let held_send = harness.remote.hold_next(Op::Send);
    let gateway = Arc::clone(&harness.gateway);
    let send = tokio::spawn(async move { gateway.send_connection_request(&"u1".into(), "hi").await });
    held_send.entered.await.expect("send reached the store");

    harness
        .remote
        .set_category(CategoryView::Suggestions, vec![summary("u1"), summary("u7")]);
    let held_load = harness.remote.hold_next(Op::LoadCategory);
    let categories = Arc::clone(&harness.categories);
    let reload =
        tokio::spawn(async move { categories.load_category(&CategoryView::Suggestions).await });
    held_load.entered.await.expect("reload reached the store");

    held_send.release.send(()).expect("release send");
    send.await.expect("join").expect_err("send fails");
    assert_eq!(harness.user_ids(&CategoryView::Suggestions), vec!["u0", "u1"]);

    held_load.release.send(()).expect("release reload");
    let outcome = reload.await.expect("join").expect("reload");

    assert_eq!(outcome, LoadOutcome::Replaced { len: 2 });
    assert_eq!(harness.user_ids(&CategoryView::Suggestions), vec!["u1", "u7"]);
}

#[tokio::test]
async fn accept_without_cached_pending_row_still_marks_connected() {
    let harness = Harness::new();
    harness.remote.set_category(
        CategoryView::Connections,
        vec![summary("u2").with_connection("c1")],
    );

    let outcome = harness
        .gateway
        .accept_connection_request(&"c1".into())
        .await
        .expect("accept");

    assert_eq!(outcome, MutationOutcome::Applied);
    assert_eq!(harness.user_ids(&CategoryView::Connections), vec!["u2"]);
    assert_eq!(
        harness.statuses.get_status(&"u2".into()),
        ConnectionStatus::Connected
    );
    let edge = harness.statuses.edge_for(&"u2".into()).expect("edge");
    assert_eq!(edge.requester_id, UserId::from("u2"));
    assert_eq!(edge.connection_id, Some(ConnectionId::from("c1")));
}

#[tokio::test]
async fn accepting_own_sent_request_is_rejected_locally() {
    let harness = Harness::new();
    harness.remote.set_status("u2", StatusReport::pending(true, "c1"));
    harness
        .statuses
        .resolve_batch(vec![UserId::from("u2")])
        .await
        .expect("resolve");

    let err = harness
        .gateway
        .accept_connection_request(&"c1".into())
        .await
        .expect_err("requester cannot accept");

    match err {
        SyncError::InvalidTransition(transition) => {
            assert_eq!(transition.action, EdgeAction::Accept);
            assert_eq!(transition.from, Some(EdgeState::Pending));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.remote.count(Op::Accept), 0);
    assert_eq!(
        harness.statuses.get_status(&"u2".into()),
        ConnectionStatus::PendingSent
    );
}
