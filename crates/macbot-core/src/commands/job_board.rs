//! Listing and registering macOS images in job board.

use std::fmt::Write;
use std::sync::Arc;

use crate::channel::COLOR_GOOD;
use crate::conversation::Conversation;
use crate::job_board::{ImageRegistry, JobBoards};
use crate::message::reply_to;
use crate::router::Request;

const DEFAULT_ENV: &str = "production";

/// Look up the job board for the requested environment, telling the user
/// if there is none.
async fn job_board_for(
    boards: &JobBoards,
    conv: &Arc<dyn Conversation>,
    env: &str,
) -> Option<Arc<dyn ImageRegistry>> {
    let board = boards.get(env).cloned();
    if board.is_none() {
        reply_to(conv)
            .error_text(format!(
                "No job board is configured for the {} environment.",
                env
            ))
            .send()
            .await;
    }
    board
}

fn env_param(request: &Request) -> String {
    request
        .params
        .get("env")
        .filter(|env| !env.is_empty())
        .unwrap_or(DEFAULT_ENV)
        .to_string()
}

pub(super) async fn list_images(boards: Arc<JobBoards>, request: Request) {
    let env = env_param(&request);
    let conv = request.conversation;
    let Some(board) = job_board_for(&boards, &conv, &env).await else {
        return;
    };

    let images = match board.list_images().await {
        Ok(images) => images,
        Err(e) => {
            reply_to(&conv)
                .error_text("I couldn't get the list of images from job board.")
                .error(e)
                .send()
                .await;
            return;
        }
    };

    let mut text = format!("macOS images registered in job-board-{}:\n", env);
    for image in &images {
        let _ = write!(text, "\n*{}*: `{}`", image.tag, image.name);
    }
    reply_to(&conv).text(text).send().await;
}

pub(super) async fn register_image(boards: Arc<JobBoards>, request: Request) {
    let env = env_param(&request);
    let image = request.params.string("image");
    let tag = request.params.string("tag");
    let conv = request.conversation;
    let Some(board) = job_board_for(&boards, &conv, &env).await else {
        return;
    };

    if let Err(e) = board.register_image(image, tag).await {
        reply_to(&conv)
            .error_text("I couldn't register the image with job board.")
            .error(e)
            .send()
            .await;
        return;
    }

    reply_to(&conv)
        .attach_text(format!("Successfully registered image for <@{}>", conv.user()))
        .color(COLOR_GOOD)
        .field("Image", image)
        .short_field("Tag", tag)
        .short_field("Environment", env)
        .send()
        .await;
}
