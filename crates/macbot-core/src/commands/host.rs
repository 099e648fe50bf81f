//! Checking hosts in and out of the image-development cluster.

use std::sync::Arc;
use tracing::info;

use crate::channel::COLOR_GOOD;
use crate::host::HostCoordinator;
use crate::message::reply_to;
use crate::router::Request;

const CONTENDED: &str =
    "Someone is already trying to check in/out a host right now, try again later!";

fn host_field(name: &str) -> String {
    format!(":desktop_computer: {}", name)
}

/// Report whether a host is currently in the development cluster.
pub(super) async fn is_checked_out(hosts: Arc<HostCoordinator>, request: Request) {
    let conv = request.conversation;

    match hosts.is_checked_out().await {
        Ok(true) => {
            reply_to(&conv)
                .text(":white_check_mark: There is a host currently checked out for building images.")
                .send()
                .await
        }
        Ok(false) => {
            reply_to(&conv)
                .text(":heavy_multiplication_x: There is no host checked out for building images.")
                .send()
                .await
        }
        Err(e) => {
            reply_to(&conv)
                .error_text("I couldn't determine if a host is checked out already.")
                .error(e)
                .send()
                .await
        }
    };
}

/// Move an available production host into the development cluster.
///
/// The checked-out state is checked before taking the operation permit, so
/// the check only protects against the common case of a repeated request.
pub(super) async fn check_out_host(hosts: Arc<HostCoordinator>, request: Request) {
    let conv = request.conversation;

    match hosts.is_checked_out().await {
        Ok(false) => {}
        Ok(true) => {
            reply_to(&conv)
                .error_text("Looks like there's already a host checked out for building images!")
                .send()
                .await;
            return;
        }
        Err(e) => {
            reply_to(&conv)
                .error_text("I couldn't determine if a host is currently checked out.")
                .error(e)
                .send()
                .await;
            return;
        }
    }

    let Some(permit) = hosts.try_begin_operation() else {
        reply_to(&conv).error_text(CONTENDED).send().await;
        return;
    };

    let status = reply_to(&conv)
        .attach_text(format!("Choosing a host to check out for <@{}>…", conv.user()))
        .send()
        .await;

    let host = match hosts.select_host(&permit).await {
        Ok(host) => host,
        Err(e) => {
            reply_to(&conv)
                .error_text("I couldn't choose a host to check out.")
                .error(e)
                .send()
                .await;
            return;
        }
    };

    status
        .attach_text(format!("Checking out host for <@{}>…", conv.user()))
        .field("Host", host_field(host.name()))
        .send()
        .await;

    if let Err(e) = hosts.check_out(&permit, &host).await {
        reply_to(&conv)
            .error_text("I couldn't check out the host.")
            .error(e)
            .send()
            .await;
        return;
    }

    info!(host = host.name(), user = conv.user(), "Host checked out");
    // A new message, so the user gets notified.
    reply_to(&conv)
        .text(format!("Successfully checked out host for <@{}>!", conv.user()))
        .field("Host", host_field(host.name()))
        .color(COLOR_GOOD)
        .send()
        .await;
}

/// Return the checked-out host to the production cluster.
pub(super) async fn check_in_host(hosts: Arc<HostCoordinator>, request: Request) {
    let conv = request.conversation;

    match hosts.is_checked_out().await {
        Ok(true) => {}
        Ok(false) => {
            reply_to(&conv)
                .error_text("Looks like there isn't a host checked out right now!")
                .send()
                .await;
            return;
        }
        Err(e) => {
            reply_to(&conv)
                .error_text("I couldn't determine if a host is currently checked out.")
                .error(e)
                .send()
                .await;
            return;
        }
    }

    let Some(permit) = hosts.try_begin_operation() else {
        reply_to(&conv).error_text(CONTENDED).send().await;
        return;
    };

    reply_to(&conv)
        .attach_text(format!("Checking the host in for <@{}>…", conv.user()))
        .send()
        .await;

    let host = match hosts.check_in(&permit).await {
        Ok(host) => host,
        Err(e) => {
            reply_to(&conv)
                .error_text("I couldn't check the host back in.")
                .error(e)
                .send()
                .await;
            return;
        }
    };

    info!(host = host.name(), user = conv.user(), "Host checked in");
    reply_to(&conv)
        .attach_text(format!("Successfully checked in host for <@{}>!", conv.user()))
        .color(COLOR_GOOD)
        .field("Host", host_field(host.name()))
        .send()
        .await;
}

/// List the base VM images in the datacenter, oldest first.
pub(super) async fn base_images(hosts: Arc<HostCoordinator>, request: Request) {
    let conv = request.conversation;

    let images = match hosts.base_images().await {
        Ok(images) => images,
        Err(e) => {
            reply_to(&conv)
                .error_text("I couldn't get the list of base images.")
                .error(e)
                .send()
                .await;
            return;
        }
    };

    let list: String = images
        .iter()
        .map(|image| format!("\n• `{}`", image.name()))
        .collect();
    reply_to(&conv).text(list).send().await;
}

/// Copy a backup image into the place of a production base image.
pub(super) async fn restore_backup(hosts: Arc<HostCoordinator>, request: Request) {
    let conv = request.conversation;
    let image = request.params.string("image");

    reply_to(&conv)
        .attach_text(format!("Restoring backup for <@{}>…", conv.user()))
        .field("Image", image)
        .send()
        .await;

    if let Err(e) = hosts.restore_backup(image).await {
        reply_to(&conv)
            .error_text("I couldn't restore that backup.")
            .error(e)
            .send()
            .await;
        return;
    }

    info!(image, user = conv.user(), "Backup restored");
    reply_to(&conv)
        .attach_text(format!("Successfully restored backup for <@{}>!", conv.user()))
        .color(COLOR_GOOD)
        .field("Image", image)
        .send()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageField;
    use crate::conversation::Conversation;
    use crate::host::{Backend, DebugBackend, DebugDelays};
    use crate::router::Params;
    use crate::testkit::{FailAt, FailingBackend, RecordingConversation};

    fn hosts(backend: impl Backend + 'static) -> Arc<HostCoordinator> {
        Arc::new(HostCoordinator::new(Arc::new(backend)))
    }

    fn debug_hosts() -> Arc<HostCoordinator> {
        hosts(DebugBackend::with_delays("1.2.3.4", DebugDelays::none()))
    }

    fn request(conv: &Arc<RecordingConversation>) -> Request {
        request_with(conv, Params::default())
    }

    fn request_with(conv: &Arc<RecordingConversation>, params: Params) -> Request {
        Request {
            conversation: conv.clone() as Arc<dyn Conversation>,
            params,
        }
    }

    #[tokio::test]
    async fn test_is_checked_out_reports_state() {
        let hosts = debug_hosts();

        let conv = Arc::new(RecordingConversation::new("is checked out"));
        is_checked_out(hosts.clone(), request(&conv)).await;
        assert_eq!(
            conv.replies()[0].text,
            "<@user>: :heavy_multiplication_x: There is no host checked out for building images."
        );

        let permit = hosts.try_begin_operation().unwrap();
        let host = hosts.select_host(&permit).await.unwrap();
        hosts.check_out(&permit, &host).await.unwrap();
        drop(permit);

        let conv = Arc::new(RecordingConversation::new("is checked out"));
        is_checked_out(hosts, request(&conv)).await;
        assert_eq!(
            conv.replies()[0].text,
            "<@user>: :white_check_mark: There is a host currently checked out for building images."
        );
    }

    #[tokio::test]
    async fn test_is_checked_out_backend_failure() {
        let conv = Arc::new(RecordingConversation::new("is checked out"));
        is_checked_out(
            hosts(FailingBackend::new(false, FailAt::Query)),
            request(&conv),
        )
        .await;

        let replies = conv.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].text,
            "Sorry, <@user>! I couldn't determine if a host is checked out already."
        );
        assert_eq!(
            replies[0].error.as_deref(),
            Some("backend unreachable: connection refused")
        );
    }

    #[tokio::test]
    async fn test_check_out_flow() {
        let conv = Arc::new(RecordingConversation::new("check out host"));
        check_out_host(debug_hosts(), request(&conv)).await;

        let replies = conv.replies();
        assert_eq!(replies.len(), 3);

        assert_eq!(replies[0].text, "Choosing a host to check out for <@user>…");
        assert!(replies[0].is_attachment);
        assert!(replies[0].update_ts.is_none());

        assert_eq!(replies[1].text, "Checking out host for <@user>…");
        assert_eq!(replies[1].update_ts.as_deref(), Some("ts-1"));
        assert_eq!(
            replies[1].fields,
            vec![MessageField::new("Host", ":desktop_computer: 1.2.3.4")]
        );

        assert_eq!(replies[2].text, "Successfully checked out host for <@user>!");
        assert!(replies[2].update_ts.is_none());
        assert_eq!(replies[2].color.as_deref(), Some("good"));
        assert_eq!(replies[2].fields, replies[1].fields);
    }

    #[tokio::test]
    async fn test_check_out_when_already_out() {
        let conv = Arc::new(RecordingConversation::new("check out host"));
        check_out_host(
            hosts(FailingBackend::new(true, FailAt::Select)),
            request(&conv),
        )
        .await;

        let replies = conv.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].text,
            "Sorry, <@user>! Looks like there's already a host checked out for building images!"
        );
    }

    #[tokio::test]
    async fn test_check_out_while_operation_in_flight() {
        let hosts = debug_hosts();
        let _permit = hosts.try_begin_operation().unwrap();

        let conv = Arc::new(RecordingConversation::new("check out host"));
        check_out_host(hosts.clone(), request(&conv)).await;

        let replies = conv.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text, format!("Sorry, <@user>! {}", CONTENDED));
        assert!(!hosts.is_checked_out().await.unwrap());
    }

    #[tokio::test]
    async fn test_check_out_failures() {
        let cases = [
            (FailAt::Query, "I couldn't determine if a host is currently checked out.", 1),
            (FailAt::Select, "I couldn't choose a host to check out.", 2),
            (FailAt::CheckOut, "I couldn't check out the host.", 3),
        ];

        for (fail_at, text, count) in cases {
            let hosts = hosts(FailingBackend::new(false, fail_at));
            let conv = Arc::new(RecordingConversation::new("check out host"));
            check_out_host(hosts.clone(), request(&conv)).await;

            let replies = conv.replies();
            assert_eq!(replies.len(), count, "{:?}", fail_at);
            let last = replies.last().unwrap();
            assert_eq!(last.text, format!("Sorry, <@user>! {}", text));
            assert!(last.error.is_some());

            // The permit is released after a failure.
            assert!(hosts.try_begin_operation().is_some());
        }
    }

    #[tokio::test]
    async fn test_check_in_flow() {
        let hosts = debug_hosts();
        check_out_host(
            hosts.clone(),
            request(&Arc::new(RecordingConversation::new("check out host"))),
        )
        .await;

        let conv = Arc::new(RecordingConversation::new("check in host").in_channel("D42"));
        check_in_host(hosts.clone(), request(&conv)).await;

        let replies = conv.replies();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].text, "Checking the host in for <@user>…");
        assert_eq!(replies[1].text, "Successfully checked in host for <@user>!");
        assert_eq!(replies[1].color.as_deref(), Some("good"));
        assert_eq!(
            replies[1].fields,
            vec![MessageField::new("Host", ":desktop_computer: 1.2.3.4")]
        );
        assert!(!hosts.is_checked_out().await.unwrap());
    }

    #[tokio::test]
    async fn test_check_in_when_nothing_out() {
        let conv = Arc::new(RecordingConversation::new("check in host"));
        check_in_host(debug_hosts(), request(&conv)).await;

        assert_eq!(
            conv.replies()[0].text,
            "Sorry, <@user>! Looks like there isn't a host checked out right now!"
        );
    }

    #[tokio::test]
    async fn test_check_in_failure() {
        let conv = Arc::new(RecordingConversation::new("check in host"));
        check_in_host(
            hosts(FailingBackend::new(true, FailAt::CheckIn)),
            request(&conv),
        )
        .await;

        let replies = conv.replies();
        assert_eq!(replies.len(), 2);
        assert_eq!(
            replies[1].text,
            "Sorry, <@user>! I couldn't check the host back in."
        );
        assert_eq!(
            replies[1].error.as_deref(),
            Some("check in failed: injected failure")
        );
    }

    #[tokio::test]
    async fn test_base_images_listed_oldest_first() {
        let conv = Arc::new(RecordingConversation::new("base images"));
        base_images(debug_hosts(), request(&conv)).await;

        let replies = conv.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].text,
            "<@user>: \n• `debug-base-image-1`\n• `debug-base-image-2`\n• `debug-base-image-3`"
        );
    }

    #[tokio::test]
    async fn test_base_images_backend_failure() {
        let conv = Arc::new(RecordingConversation::new("base images"));
        base_images(hosts(FailingBackend::new(false, FailAt::Query)), request(&conv)).await;

        let replies = conv.replies();
        assert_eq!(
            replies[0].text,
            "Sorry, <@user>! I couldn't get the list of base images."
        );
        assert!(replies[0].error.is_some());
    }

    #[tokio::test]
    async fn test_restore_backup_flow() {
        let conv = Arc::new(RecordingConversation::new("restore backup debug-base-image-2"));
        let params = Params::from([("image", "debug-base-image-2")]);
        restore_backup(debug_hosts(), request_with(&conv, params)).await;

        let replies = conv.replies();
        assert_eq!(replies.len(), 2);
        let field = vec![MessageField::new("Image", "debug-base-image-2")];

        assert_eq!(replies[0].text, "Restoring backup for <@user>…");
        assert!(replies[0].is_attachment);
        assert_eq!(replies[0].fields, field);

        assert_eq!(replies[1].text, "Successfully restored backup for <@user>!");
        assert_eq!(replies[1].fields, field);
        assert_eq!(replies[1].color.as_deref(), Some("good"));
        assert!(replies[1].update_ts.is_none());
    }

    #[tokio::test]
    async fn test_restore_backup_failure() {
        let conv = Arc::new(RecordingConversation::new("restore backup mac-base-1"));
        let params = Params::from([("image", "mac-base-1")]);
        restore_backup(
            hosts(FailingBackend::new(false, FailAt::Restore)),
            request_with(&conv, params),
        )
        .await;

        let replies = conv.replies();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1].text, "Sorry, <@user>! I couldn't restore that backup.");
        assert_eq!(
            replies[1].error.as_deref(),
            Some("restore backup failed: injected failure")
        );
    }
}
