//! Chat commands
//!
//! Handlers for everything the bot understands, and the table that wires
//! them into a [`Router`].

mod host;
mod images;
mod job_board;

use std::future::Future;
use std::sync::Arc;

use crate::host::HostCoordinator;
use crate::images::ImageBuilds;
use crate::job_board::JobBoards;
use crate::router::{PatternError, Request, Router};

/// Collaborators the command handlers talk to.
pub struct Services {
    pub hosts: Arc<HostCoordinator>,
    /// Image build commands are only registered when imaged is configured.
    pub images: Option<Arc<dyn ImageBuilds>>,
    pub job_boards: Arc<JobBoards>,
}

/// Register every command, most specific patterns first.
pub fn register_commands(router: &mut Router, services: &Services) -> Result<(), PatternError> {
    router.register("is checked out", bind(&services.hosts, host::is_checked_out))?;
    router.register("check out host", bind(&services.hosts, host::check_out_host))?;
    router.register("check in host", bind(&services.hosts, host::check_in_host))?;
    router.register("base images", bind(&services.hosts, host::base_images))?;
    router.register(
        "restore backup <image>",
        bind(&services.hosts, host::restore_backup),
    )?;

    if let Some(builds) = &services.images {
        router.register("last build <image>", bind(builds, images::last_build))?;
        router.register(
            "build image <image> at <branch>",
            bind(builds, images::build_image),
        )?;
        router.register("build image <image>", bind(builds, images::build_image))?;
    }

    let boards = &services.job_boards;
    router.register("list images in <env>", bind(boards, job_board::list_images))?;
    router.register("list images", bind(boards, job_board::list_images))?;
    router.register(
        "register image <image> as <tag> in <env>",
        bind(boards, job_board::register_image),
    )?;
    router.register(
        "register image <image> as <tag>",
        bind(boards, job_board::register_image),
    )?;

    Ok(())
}

/// Turn a handler taking a shared collaborator into a router handler.
fn bind<D, F, Fut>(dep: &Arc<D>, handler: F) -> impl Fn(Request) -> Fut + Send + Sync + 'static
where
    D: ?Sized + Send + Sync + 'static,
    F: Fn(Arc<D>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let dep = dep.clone();
    move |request: Request| handler(dep.clone(), request)
}
