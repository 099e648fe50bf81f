//! End-to-end host checkout scenarios through the router.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use macbot_core::host::DebugDelays;
use macbot_core::testkit::RecordingConversation;
use macbot_core::{DebugBackend, HostCoordinator, Router, Services, register_commands};

const CONTENDED: &str =
    "Sorry, <@U2>! Someone is already trying to check in/out a host right now, try again later!";

/// Commands available without imaged, in registration order.
const COMMANDS: [&str; 9] = [
    "is checked out",
    "check out host",
    "check in host",
    "base images",
    "restore backup <image>",
    "list images in <env>",
    "list images",
    "register image <image> as <tag> in <env>",
    "register image <image> as <tag>",
];

fn router(delays: DebugDelays) -> Arc<Router> {
    let services = Services {
        hosts: Arc::new(HostCoordinator::new(Arc::new(DebugBackend::with_delays(
            "1.2.3.4", delays,
        )))),
        images: None,
        job_boards: Arc::new(HashMap::new()),
    };
    let mut router = Router::new();
    register_commands(&mut router, &services).unwrap();
    Arc::new(router)
}

fn chat(user: &str, command: &str) -> Arc<RecordingConversation> {
    Arc::new(
        RecordingConversation::new(command)
            .from_user(user)
            .in_channel("C-ops"),
    )
}

fn texts(conv: &RecordingConversation) -> Vec<String> {
    conv.replies().into_iter().map(|m| m.text).collect()
}

fn command_list() -> String {
    COMMANDS.iter().map(|c| format!("• `{}`\n", c)).collect()
}

async fn run(router: &Arc<Router>, user: &str, command: &str) -> Vec<String> {
    let conv = chat(user, command);
    router.dispatch(conv.clone()).unwrap().await.unwrap();
    texts(&conv)
}

fn slow_select() -> DebugDelays {
    DebugDelays {
        select: Duration::from_millis(300),
        check_out: Duration::ZERO,
        check_in: Duration::ZERO,
    }
}

#[tokio::test]
async fn check_out_and_in_round_trip() {
    let router = router(DebugDelays::none());

    assert_eq!(
        run(&router, "U1", "is checked out").await,
        vec!["<@U1>: :heavy_multiplication_x: There is no host checked out for building images."]
    );

    assert_eq!(
        run(&router, "U1", "check out host").await,
        vec![
            "Choosing a host to check out for <@U1>…",
            "Checking out host for <@U1>…",
            "Successfully checked out host for <@U1>!",
        ]
    );

    assert_eq!(
        run(&router, "U2", "is checked out").await,
        vec!["<@U2>: :white_check_mark: There is a host currently checked out for building images."]
    );

    assert_eq!(
        run(&router, "U2", "check out host").await,
        vec!["Sorry, <@U2>! Looks like there's already a host checked out for building images!"]
    );

    assert_eq!(
        run(&router, "U2", "check in host").await,
        vec![
            "Checking the host in for <@U2>…",
            "Successfully checked in host for <@U2>!",
        ]
    );

    assert_eq!(
        run(&router, "U1", "check in host").await,
        vec!["Sorry, <@U1>! Looks like there isn't a host checked out right now!"]
    );
}

#[tokio::test]
async fn checkout_during_checkout_is_turned_away() {
    let router = router(slow_select());

    let first = chat("U1", "check out host");
    let first_task = router.dispatch(first.clone()).unwrap();
    first.wait_for_replies(1).await;

    let second = chat("U2", "check out host");
    router.dispatch(second.clone()).unwrap().await.unwrap();
    assert_eq!(texts(&second), vec![CONTENDED]);

    first_task.await.unwrap();
    assert_eq!(
        texts(&first).last().map(String::as_str),
        Some("Successfully checked out host for <@U1>!")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simultaneous_checkouts_admit_exactly_one() {
    let router = router(slow_select());

    let first = chat("U2", "check out host");
    let second = chat("U2", "check out host");
    let (a, b) = tokio::join!(
        router.dispatch(first.clone()).unwrap(),
        router.dispatch(second.clone()).unwrap(),
    );
    a.unwrap();
    b.unwrap();

    let mut outcomes = vec![texts(&first), texts(&second)];
    outcomes.sort_by_key(Vec::len);
    assert_eq!(outcomes[0], vec![CONTENDED]);
    assert_eq!(
        outcomes[1],
        vec![
            "Choosing a host to check out for <@U2>…",
            "Checking out host for <@U2>…",
            "Successfully checked out host for <@U2>!",
        ]
    );
}

#[tokio::test]
async fn state_query_answers_during_checkout() {
    let router = router(DebugDelays {
        select: Duration::ZERO,
        check_out: Duration::from_millis(300),
        check_in: Duration::ZERO,
    });

    let checkout = chat("U1", "check out host");
    let task = router.dispatch(checkout.clone()).unwrap();
    assert_eq!(checkout.wait_for_replies(2).await.len(), 2);

    let query = chat("U2", "is checked out");
    let answered = tokio::time::timeout(
        Duration::from_millis(200),
        router.dispatch(query.clone()).unwrap(),
    )
    .await;
    assert!(answered.is_ok(), "query must not wait for the checkout");
    assert_eq!(
        texts(&query),
        vec!["<@U2>: :heavy_multiplication_x: There is no host checked out for building images."]
    );

    task.await.unwrap();
}

#[tokio::test]
async fn restore_backup_through_router() {
    let router = router(DebugDelays::none());

    assert_eq!(
        run(&router, "U1", "base images").await,
        vec!["<@U1>: \n• `debug-base-image-1`\n• `debug-base-image-2`\n• `debug-base-image-3`"]
    );
    assert_eq!(
        run(&router, "U1", "restore backup debug-base-image-3").await,
        vec![
            "Restoring backup for <@U1>…",
            "Successfully restored backup for <@U1>!",
        ]
    );
}

#[tokio::test]
async fn unknown_command_lists_everything() {
    let router = router(DebugDelays::none());

    assert_eq!(
        run(&router, "U1", "make coffee").await,
        vec![format!(
            "Sorry, <@U1>! I don't know how to answer that. I can respond to the following commands:\n\n{}",
            command_list()
        )]
    );
}

#[tokio::test]
async fn help_lists_one_line_per_command() {
    let router = router(DebugDelays::none());

    assert_eq!(
        run(&router, "U1", "help").await,
        vec![format!("<@U1>: \n{}", command_list())]
    );
}
