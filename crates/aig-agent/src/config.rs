use std::path::PathBuf;
use std::time::Duration;

use aig_core::ModelParams;
use clap::Parser;
use url::Url;

const AGENT_WS_PATH: &str = "/api/v1/agents/ws";

#[derive(Debug, Parser)]
#[command(name = "aig-agent", about = "AI-Infra-Guard task agent")]
pub struct AgentConfig {
    /// Server address (host:port or URL)
    #[arg(long, env = "AIG_SERVER")]
    pub server: String,

    /// Agent id announced on register. Defaults to aig-agent-<hostname>.
    #[arg(long, env = "AIG_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Delay between reconnect attempts (milliseconds)
    #[arg(long, env = "AIG_RECONNECT_INTERVAL_MS", default_value = "1200")]
    pub reconnect_interval_ms: u64,

    /// Heartbeat interval while connected (seconds)
    #[arg(long, env = "AIG_HEARTBEAT_INTERVAL", default_value = "30")]
    pub heartbeat_interval: u64,

    /// Working directory of the evaluation tool
    #[arg(long, env = "AIG_TOOL_DIR", default_value = "/app/AIG-PromptSecurity")]
    pub tool_dir: PathBuf,

    /// Executable used to launch the evaluation tool
    #[arg(long, env = "AIG_TOOL_BIN", default_value = "/usr/local/bin/uv")]
    pub tool_bin: PathBuf,

    /// Where downloaded attachments are written
    #[arg(long, env = "AIG_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Where fetched datasets are written. Defaults to the system temp dir.
    #[arg(long, env = "AIG_DATASET_DIR")]
    pub dataset_dir: Option<PathBuf>,

    /// Grace period after SIGTERM before SIGKILL (seconds)
    #[arg(long, env = "AIG_KILL_GRACE", default_value = "5")]
    pub kill_grace: u64,

    /// Timeout for a single file or dataset transfer (seconds)
    #[arg(long, env = "AIG_TRANSFER_TIMEOUT", default_value = "300")]
    pub transfer_timeout: u64,

    /// Port for the health check endpoint
    #[arg(long, env = "AIG_HEALTH_PORT", default_value = "3721")]
    pub health_port: u16,

    /// Skip startup checks of the tool installation
    #[arg(long)]
    pub skip_preflight: bool,

    #[arg(long, env = "OPENAI_MODEL")]
    pub default_model: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub default_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL")]
    pub default_base_url: Option<String>,

    #[arg(long, env = "EVAL_MODEL")]
    pub eval_model: Option<String>,

    #[arg(long, env = "EVAL_API_KEY", hide_env_values = true)]
    pub eval_api_key: Option<String>,

    #[arg(long, env = "EVAL_BASE_URL")]
    pub eval_base_url: Option<String>,
}

/// Process-wide model configuration handed to the handlers.
#[derive(Debug, Clone, Default)]
pub struct ModelDefaults {
    /// Used when a request carries no target model.
    pub default_model: Option<ModelParams>,
    /// Overrides any evaluation model a request carries.
    pub eval_model: Option<ModelParams>,
}

/// Where and how the evaluation tool runs.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub work_dir: PathBuf,
    pub program: PathBuf,
    pub upload_dir: PathBuf,
    pub dataset_dir: PathBuf,
    pub kill_grace: Duration,
}

impl ToolSettings {
    /// Reject scratch directories whose absolute path would break a scenario
    /// descriptor or be split by a shell: whitespace and commas.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (flag, dir) in [
            ("--upload-dir", &self.upload_dir),
            ("--dataset-dir", &self.dataset_dir),
        ] {
            let abs = if dir.is_absolute() {
                dir.clone()
            } else {
                std::env::current_dir()?.join(dir)
            };
            let shown = abs.to_string_lossy();
            if shown.chars().any(|c| c.is_whitespace() || c == ',') {
                anyhow::bail!("{flag} {shown} must not contain whitespace or commas");
            }
        }
        Ok(())
    }
}

impl AgentConfig {
    pub fn agent_id(&self) -> String {
        match &self.agent_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("aig-agent-{}", local_hostname()),
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval.max(1))
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout.max(1))
    }

    pub fn model_defaults(&self) -> ModelDefaults {
        self.model_defaults_with(|key| std::env::var(key).ok())
    }

    /// Build the model defaults, reading the lowercase `eval_*` variables
    /// through `env` for any evaluation setting not given otherwise.
    pub fn model_defaults_with(&self, env: impl Fn(&str) -> Option<String>) -> ModelDefaults {
        let eval_model = self.eval_model.clone().or_else(|| env("eval_model"));
        let eval_base_url = self.eval_base_url.clone().or_else(|| env("eval_base_url"));
        let eval_api_key = self.eval_api_key.clone().or_else(|| env("eval_api_key"));
        ModelDefaults {
            default_model: ModelParams::from_parts(
                self.default_model.as_deref(),
                self.default_base_url.as_deref(),
                self.default_api_key.as_deref(),
            ),
            eval_model: ModelParams::from_parts(
                eval_model.as_deref(),
                eval_base_url.as_deref(),
                eval_api_key.as_deref(),
            ),
        }
    }

    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            work_dir: self.tool_dir.clone(),
            program: self.tool_bin.clone(),
            upload_dir: self.upload_dir.clone(),
            dataset_dir: self
                .dataset_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            kill_grace: Duration::from_secs(self.kill_grace),
        }
    }

    /// The agent socket URL, e.g. `ws://host:port/api/v1/agents/ws`.
    pub fn ws_url(&self) -> Result<Url, url::ParseError> {
        ws_url(&self.server)
    }

    /// Base URL for the file-transfer HTTP endpoints.
    pub fn http_base_url(&self) -> Result<String, url::ParseError> {
        http_base_url(&self.server)
    }
}

fn parse_server(server: &str) -> Result<Url, url::ParseError> {
    let server = server.trim().trim_end_matches('/');
    if server.contains("://") {
        Url::parse(server)
    } else {
        Url::parse(&format!("http://{server}"))
    }
}

pub fn ws_url(server: &str) -> Result<Url, url::ParseError> {
    let mut url = parse_server(server)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    // Switching between special schemes always succeeds.
    let _ = url.set_scheme(scheme);
    url.set_path(AGENT_WS_PATH);
    url.set_query(None);
    Ok(url)
}

pub fn http_base_url(server: &str) -> Result<String, url::ParseError> {
    let mut url = parse_server(server)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "https",
        _ => "http",
    };
    let _ = url.set_scheme(scheme);
    url.set_path("");
    url.set_query(None);
    Ok(url.as_str().trim_end_matches('/').to_string())
}

pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
