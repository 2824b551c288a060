use aig_core::task::TASK_TYPE_MODEL_JAILBREAK;
use aig_core::{ModelParams, TaskError, TaskRequest};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{run_with_plan, TaskHandler};
use crate::callbacks::TaskCallbacks;
use crate::command::{
    base_args, custom_prompt_scenario, eval_args, model_args, resolve_models,
    DEFAULT_JAILBREAK_PROMPT, JAILBREAK_TECHNIQUES,
};
use crate::config::{ModelDefaults, ToolSettings};

#[derive(Debug, Default, Deserialize)]
struct JailbreakParams {
    #[serde(default)]
    model: Option<Vec<ModelParams>>,
    #[serde(default)]
    eval_model: Option<ModelParams>,
    #[serde(default)]
    prompt: String,
}

/// Runs every jailbreak technique against a single prompt.
pub struct JailbreakHandler {
    defaults: ModelDefaults,
    tool: ToolSettings,
}

impl JailbreakHandler {
    pub fn new(defaults: ModelDefaults, tool: ToolSettings) -> Self {
        Self { defaults, tool }
    }

    /// The tool argv for `request`. Fails before anything touches disk.
    pub fn build_command(&self, request: &TaskRequest) -> Result<Vec<String>, TaskError> {
        let params: JailbreakParams = request
            .decode_params()
            .map_err(|e| TaskError::InvalidParams(e.to_string()))?;
        let models = resolve_models(params.model.unwrap_or_default(), &self.defaults)?;

        let prompt = [request.content.trim(), params.prompt.trim()]
            .into_iter()
            .find(|p| !p.is_empty())
            .unwrap_or(DEFAULT_JAILBREAK_PROMPT);

        let mut args = base_args();
        args.extend(model_args(&models));
        args.extend(eval_args(params.eval_model.as_ref(), &self.defaults));
        args.push("--lang".to_string());
        args.push(request.effective_language().to_string());
        args.push("--scenarios".to_string());
        args.push(custom_prompt_scenario(prompt));
        args.push("--choice".to_string());
        args.push("parallel".to_string());
        args.push("--techniques".to_string());
        args.extend(JAILBREAK_TECHNIQUES.iter().map(|t| t.to_string()));
        Ok(args)
    }
}

#[async_trait]
impl TaskHandler for JailbreakHandler {
    fn name(&self) -> &str {
        TASK_TYPE_MODEL_JAILBREAK
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: TaskRequest,
        callbacks: &dyn TaskCallbacks,
    ) -> Result<(), TaskError> {
        let args = self.build_command(&request)?;
        info!("jailbreak task {} prepared", request.session_id);
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
