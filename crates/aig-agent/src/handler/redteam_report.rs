use std::sync::Arc;

use aig_core::task::TASK_TYPE_MODEL_REDTEAM_REPORT;
use aig_core::{ModelParams, TaskError, TaskRequest};
use aig_service::FileTransfer;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{run_with_plan, TaskHandler};
use crate::callbacks::TaskCallbacks;
use crate::command::{
    attachment_path, base_args, dataset_path, dataset_scenario, eval_args, model_args,
    resolve_models, DatasetParams, BUILTIN_DATASET,
};
use crate::config::{ModelDefaults, ToolSettings};

#[derive(Debug, Default, Deserialize)]
struct RedteamParams {
    #[serde(default)]
    model: Option<Vec<ModelParams>>,
    #[serde(default)]
    eval_model: Option<ModelParams>,
    #[serde(default)]
    dataset: DatasetParams,
}

/// Evaluates target models against prompt datasets and produces a report.
///
/// Datasets come from the request's first attachment and/or named server
/// datasets; both are written locally before the tool starts.
pub struct RedteamReportHandler {
    transfer: Arc<dyn FileTransfer>,
    defaults: ModelDefaults,
    tool: ToolSettings,
}

impl RedteamReportHandler {
    pub fn new(transfer: Arc<dyn FileTransfer>, defaults: ModelDefaults, tool: ToolSettings) -> Self {
        Self {
            transfer,
            defaults,
            tool,
        }
    }

    /// Resolve parameters, materialize datasets and return the tool argv.
    ///
    /// Model resolution happens first, so a request without any usable
    /// model fails before downloading or writing anything.
    pub async fn build_command(&self, request: &TaskRequest) -> Result<Vec<String>, TaskError> {
        let params: RedteamParams = request
            .decode_params()
            .map_err(|e| TaskError::InvalidParams(e.to_string()))?;
        let models = resolve_models(params.model.unwrap_or_default(), &self.defaults)?;
        let dataset = params.dataset;
        let num_prompts = dataset.effective_num_prompts();
        let seed = dataset.effective_random_seed();

        let mut args = base_args();
        args.extend(model_args(&models));
        args.extend(eval_args(params.eval_model.as_ref(), &self.defaults));
        for flag in ["--techniques", "Raw", "--choice", "serial", "--lang"] {
            args.push(flag.to_string());
        }
        args.push(request.effective_language().to_string());
        args.push("--scenarios".to_string());

        if let Some(remote) = request.attachments.first() {
            tokio::fs::create_dir_all(&self.tool.upload_dir).await?;
            let local = attachment_path(&self.tool.upload_dir, remote)?;
            info!("downloading attachment {remote} to {}", local.display());
            self.transfer
                .download_file(&request.session_id, remote, &local)
                .await?;
            args.push(dataset_scenario(
                &local,
                num_prompts,
                seed,
                Some(dataset.prompt_column.as_str()),
            ));
        }

        let mut names = dataset.data_file;
        if names.is_empty() && request.attachments.is_empty() {
            names.push(BUILTIN_DATASET.to_string());
        }
        if !names.is_empty() {
            tokio::fs::create_dir_all(&self.tool.dataset_dir).await?;
        }
        for name in &names {
            let data = self.transfer.fetch_named_dataset(name).await?;
            let local = dataset_path(&self.tool.dataset_dir, name);
            tokio::fs::write(&local, &data).await?;
            info!(
                "dataset {name} ({} bytes) written to {}",
                data.len(),
                local.display()
            );
            args.push(dataset_scenario(&local, num_prompts, seed, None));
        }

        Ok(args)
    }
}

#[async_trait]
impl TaskHandler for RedteamReportHandler {
    fn name(&self) -> &str {
        TASK_TYPE_MODEL_REDTEAM_REPORT
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: TaskRequest,
        callbacks: &dyn TaskCallbacks,
    ) -> Result<(), TaskError> {
        let args = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("task {} cancelled while preparing inputs", request.session_id);
                return Err(TaskError::Cancelled);
            }
            args = self.build_command(&request) => args?,
        };
        run_with_plan(
            &self.tool,
            &args,
            request.effective_language(),
            cancel,
            callbacks,
        )
        .await
    }
}
