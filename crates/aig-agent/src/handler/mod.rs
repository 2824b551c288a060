pub mod jailbreak;
pub mod redteam_report;

use std::sync::Arc;

use aig_core::{TaskError, TaskRequest};
use aig_service::FileTransfer;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::callbacks::TaskCallbacks;
use crate::config::{ModelDefaults, ToolSettings};
use crate::plan::build_plan;
use crate::process;
use crate::progress::ProgressParser;

pub use jailbreak::JailbreakHandler;
pub use redteam_report::RedteamReportHandler;

/// A task type the agent knows how to execute.
///
/// Each handler encapsulates:
/// - How request parameters become the tool's argv
/// - Which files must be present locally before the tool starts
/// - The plan published for the run
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Task-type identifier this handler serves.
    fn name(&self) -> &str;

    /// Run one task to completion. Returns once the tool has exited or
    /// `cancel` fired and the tool was torn down.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: TaskRequest,
        callbacks: &dyn TaskCallbacks,
    ) -> Result<(), TaskError>;
}

/// Every handler the agent ships with.
pub fn default_handlers(
    transfer: Arc<dyn FileTransfer>,
    defaults: ModelDefaults,
    tool: ToolSettings,
) -> Vec<Arc<dyn TaskHandler>> {
    vec![
        Arc::new(JailbreakHandler::new(defaults.clone(), tool.clone())),
        Arc::new(RedteamReportHandler::new(transfer, defaults, tool)),
    ]
}

/// Publish the plan for `language`, run the tool and feed its stdout through
/// a fresh [`ProgressParser`].
///
/// If the tool fails the last-known step is marked failed. A clean exit
/// still fails the task when the tool reported an unrecoverable issue or
/// left a step unfinished.
pub(crate) async fn run_with_plan(
    tool: &ToolSettings,
    args: &[String],
    language: &str,
    cancel: &CancellationToken,
    callbacks: &dyn TaskCallbacks,
) -> Result<(), TaskError> {
    let mut parser = ProgressParser::new(build_plan(language));
    parser.publish_plan(callbacks);

    info!("running {} {}", tool.program.display(), redact(args).join(" "));
    let result = process::run_streaming(
        &tool.work_dir,
        &tool.program,
        args,
        cancel,
        tool.kill_grace,
        |line| {
            parser.feed(line, callbacks);
        },
    )
    .await;

    match result {
        Ok(()) => {
            if let Some(reason) = parser.failure() {
                return Err(TaskError::ToolFailure(reason.to_string()));
            }
            match parser.unfinished().map(|t| t.id) {
                Some(id) => {
                    let reason = format!("tool exited before finishing step {id}");
                    warn!("{reason}");
                    parser.fail_open(&reason, callbacks);
                    Err(TaskError::ToolFailure(reason))
                }
                None => Ok(()),
            }
        }
        Err(e) => {
            warn!("tool run failed: {e}");
            parser.fail_open(&e.to_string(), callbacks);
            Err(e)
        }
    }
}

/// Copy of `args` safe for logging: values of key flags are masked.
fn redact(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            out.push("***".to_string());
            mask_next = false;
            continue;
        }
        mask_next = arg == "--api_key" || arg == "--eval_api_key";
        out.push(arg.clone());
    }
    out
}
