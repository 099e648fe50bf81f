//! Starting and watching image builds.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::channel::{COLOR_DANGER, COLOR_GOOD};
use crate::images::{Build, BuildStatus, ImageBuilds};
use crate::message::{MessageBuilder, reply_to};
use crate::router::Request;

#[cfg(not(test))]
const BUILD_POLL_INTERVAL: Duration = Duration::from_secs(5);
#[cfg(test)]
const BUILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

const TEMPLATES_URL: &str = "https://github.com/travis-ci/packer-templates-mac";
const DEFAULT_BRANCH: &str = "master";

/// Show when an image template was last built.
pub(super) async fn last_build(builds: Arc<dyn ImageBuilds>, request: Request) {
    let conv = request.conversation;
    let image = request.params.string("image");

    let build = match builds.last_build(image).await {
        Ok(build) => build,
        Err(e) => {
            reply_to(&conv)
                .error_text("I couldn't load build info.")
                .error(e)
                .send()
                .await;
            return;
        }
    };

    let msg = match build.finished_time() {
        None => reply_to(&conv)
            .attach_text(format!("An {} image is currently building.", build.name))
            .footer("imaged", build.created_time()),
        Some(finished) => reply_to(&conv)
            .attach_text(format!(
                "The {} image was last built {}.",
                build.name,
                relative_time(finished, Utc::now())
            ))
            .footer("imaged", finished),
    };
    describe_build(msg, builds.as_ref(), &build)
        .await
        .send()
        .await;
}

/// Start a build and keep its message up to date until it finishes.
pub(super) async fn build_image(builds: Arc<dyn ImageBuilds>, request: Request) {
    let conv = request.conversation;
    let image = request.params.string("image");
    let branch = request
        .params
        .get("branch")
        .filter(|b| !b.is_empty())
        .unwrap_or(DEFAULT_BRANCH);

    let mut build = match builds.start_build(image, branch).await {
        Ok(build) => build,
        Err(e) => {
            reply_to(&conv)
                .error_text("I couldn't start the build.")
                .error(e)
                .send()
                .await;
            return;
        }
    };
    debug!(id = build.id, image, branch, "Started image build");

    let msg = reply_to(&conv).attach_text(format!(
        "Building {} image for <@{}>…",
        build.name,
        conv.user()
    ));
    let mut msg = describe_build(msg, builds.as_ref(), &build)
        .await
        .send()
        .await;

    loop {
        match builds.build(build.id).await {
            Ok(latest) => {
                build = latest;
                if build.status.is_finished() {
                    break;
                }
                msg = describe_build(msg, builds.as_ref(), &build)
                    .await
                    .send()
                    .await;
            }
            Err(e) => warn!(id = build.id, error = %e, "Failed to get build info while watching build"),
        }

        tokio::time::sleep(BUILD_POLL_INTERVAL).await;
    }

    // A new message, so the user gets notified.
    let text = if build.status == BuildStatus::Succeeded {
        format!("Successfully built {} image for <@{}>", build.name, conv.user())
    } else {
        format!("Failed to build {} image for <@{}>", build.name, conv.user())
    };
    describe_build(reply_to(&conv).attach_text(text), builds.as_ref(), &build)
        .await
        .send()
        .await;
}

/// Replace the message's fields and color with the build's current state.
async fn describe_build(
    msg: MessageBuilder,
    builds: &dyn ImageBuilds,
    build: &Build,
) -> MessageBuilder {
    let mut msg = msg
        .clear_fields()
        .short_field("Build ID", build.id.to_string())
        .short_field("Status", build_status(builds, build).await)
        .short_field("Branch", tree_link(&build.revision, &build.revision));

    let revision = build.short_revision();
    if !revision.is_empty() {
        msg = msg.short_field("Revision", tree_link(&build.full_revision, revision));
    }

    let color = match build.status {
        BuildStatus::Succeeded => COLOR_GOOD,
        BuildStatus::Failed => COLOR_DANGER,
        _ => "",
    };
    msg.color(color)
}

async fn build_status(builds: &dyn ImageBuilds, build: &Build) -> String {
    let text = match build.status {
        BuildStatus::Created => return "Waiting to start".to_string(),
        BuildStatus::Started => return "Building".to_string(),
        BuildStatus::Unknown => return "Unknown".to_string(),
        BuildStatus::Succeeded => "Succeeded",
        BuildStatus::Failed => "Failed",
    };

    match builds.record_url(build.id, "build.log").await {
        Ok(url) => format!("<{}|{}>", url, text),
        Err(e) => {
            debug!(id = build.id, error = %e, "No build log link");
            text.to_string()
        }
    }
}

fn tree_link(revision: &str, display: &str) -> String {
    format!("<{}/tree/{}|{}>", TEMPLATES_URL, revision, display)
}

/// Describe how long ago `then` was, e.g. `3 hours ago`.
fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    const WEEK: i64 = 7 * DAY;
    const MONTH: i64 = 30 * DAY;
    const YEAR: i64 = 12 * MONTH;

    let delta = (now - then).num_seconds();
    let (secs, suffix) = if delta < 0 {
        (-delta, "from now")
    } else {
        (delta, "ago")
    };

    let (count, unit) = match secs {
        0 => return "now".to_string(),
        s if s < MINUTE => (s, "second"),
        s if s < HOUR => (s / MINUTE, "minute"),
        s if s < DAY => (s / HOUR, "hour"),
        s if s < WEEK => (s / DAY, "day"),
        s if s < MONTH => (s / WEEK, "week"),
        s if s < YEAR => (s / MONTH, "month"),
        s => (s / YEAR, "year"),
    };

    if count == 1 {
        format!("1 {} {}", unit, suffix)
    } else {
        format!("{} {}s {}", count, unit, suffix)
    }
}
