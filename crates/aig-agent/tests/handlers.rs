//! End-to-end handler runs against a scripted tool and an in-memory file
//! transfer.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aig_agent::callbacks::{CallbackEvent, RecordingCallbacks};
use aig_agent::config::ModelDefaults;
use aig_agent::handler::{JailbreakHandler, RedteamReportHandler, TaskHandler};
use aig_core::task::{TASK_TYPE_MODEL_JAILBREAK, TASK_TYPE_MODEL_REDTEAM_REPORT};
use aig_core::{ModelParams, SubTaskStatus, TaskError, TaskRequest};
use aig_service::mock::{MockTransfer, TransferCall};
use aig_service::{FileTransfer, ServiceError};
use async_trait::async_trait;
use common::{emit, recorded_args, sh_tool, RECORD_ARGS};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn with_default_model() -> ModelDefaults {
    ModelDefaults {
        default_model: Some(ModelParams::new("gpt-4o", "http://llm.local/v1", "sk-test")),
        eval_model: None,
    }
}

fn redteam_request(params: serde_json::Value) -> TaskRequest {
    TaskRequest {
        params,
        ..TaskRequest::new(TASK_TYPE_MODEL_REDTEAM_REPORT, "sess-1")
    }
}

fn plan_titles(cb: &RecordingCallbacks) -> Vec<String> {
    match cb.events().first() {
        Some(CallbackEvent::Plan(tasks)) => tasks.iter().map(|t| t.title.clone()).collect(),
        other => panic!("expected plan first, got {other:?}"),
    }
}

/// The values following `--scenarios`, up to the next flag.
fn scenarios(args: &[String]) -> Vec<String> {
    let start = args.iter().position(|a| a == "--scenarios").unwrap() + 1;
    args[start..]
        .iter()
        .take_while(|a| !a.starts_with("--"))
        .cloned()
        .collect()
}

/// Script that records its argv and runs every plan step to completion.
fn recording_full_run() -> String {
    let mut script = RECORD_ARGS.to_string();
    for id in 1..=3 {
        script.push_str(&emit("newPlanStep", json!({"stepId": id, "title": "t"})));
    }
    script.push_str(&emit(
        "statusUpdate",
        json!({"stepId": 3, "brief": "b", "description": "d", "status": "completed"}),
    ));
    script
}

/// Transfer whose calls do not finish within test time.
struct StalledTransfer;

#[async_trait]
impl FileTransfer for StalledTransfer {
    async fn download_file(
        &self,
        _session_id: &str,
        _remote_name: &str,
        _local_path: &Path,
    ) -> Result<(), ServiceError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }

    async fn fetch_named_dataset(&self, _name: &str) -> Result<Vec<u8>, ServiceError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }
}

fn happy_script() -> String {
    let mut script = RECORD_ARGS.to_string();
    script.push_str("echo 'Installed 42 packages'\n");
    script.push_str(&emit("newPlanStep", json!({"stepId": "1", "title": "init"})));
    script.push_str(&emit(
        "statusUpdate",
        json!({"stepId": "1", "brief": "b", "description": "Load model", "status": "completed"}),
    ));
    script.push_str(&emit("newPlanStep", json!({"stepId": "2", "title": "run"})));
    script.push_str(&emit("progress", json!({"progress": 50})));
    script.push_str(&emit("newPlanStep", json!({"stepId": "3", "title": "report"})));
    script.push_str(&emit(
        "statusUpdate",
        json!({"stepId": "3", "brief": "b", "description": "report", "status": "completed"}),
    ));
    script.push_str(&emit(
        "resultUpdate",
        json!({"msgType": "json", "content": {"total": 3, "jailbroken": 1}, "status": true}),
    ));
    script
}

#[tokio::test]
async fn missing_model_config_fails_before_side_effects() {
    let tmp = tempfile::tempdir().unwrap();
    let tool = sh_tool(tmp.path(), RECORD_ARGS);
    let transfer = Arc::new(MockTransfer::new().with_file("data.csv", b"prompt\nhi\n"));
    let handler = RedteamReportHandler::new(transfer.clone(), ModelDefaults::default(), tool);
    let cb = RecordingCallbacks::new();

    let mut req = redteam_request(json!({"model": []}));
    req.attachments = vec!["data.csv".into()];
    let err = handler
        .execute(&CancellationToken::new(), req, &cb)
        .await
        .unwrap_err();

    assert!(matches!(err, TaskError::MissingModelConfig));
    assert!(transfer.calls().is_empty());
    assert!(recorded_args(tmp.path()).is_none());
    assert!(!tmp.path().join("uploads").exists());
    assert!(cb.events().is_empty());
}

#[tokio::test]
async fn jailbreak_without_models_never_spawns() {
    let tmp = tempfile::tempdir().unwrap();
    let handler = JailbreakHandler::new(ModelDefaults::default(), sh_tool(tmp.path(), RECORD_ARGS));
    let cb = RecordingCallbacks::new();

    let req = TaskRequest::new(TASK_TYPE_MODEL_JAILBREAK, "sess-2");
    let err = handler
        .execute(&CancellationToken::new(), req, &cb)
        .await
        .unwrap_err();

    assert!(matches!(err, TaskError::MissingModelConfig));
    assert!(recorded_args(tmp.path()).is_none());
    assert!(cb.events().is_empty());
}

#[tokio::test]
async fn builtin_dataset_when_nothing_requested() {
    let tmp = tempfile::tempdir().unwrap();
    let tool = sh_tool(tmp.path(), RECORD_ARGS);
    let transfer = Arc::new(
        MockTransfer::new().with_dataset("JailbreakPrompts-Tiny", br#"[{"prompt":"p"}]"#),
    );
    let handler = RedteamReportHandler::new(transfer.clone(), with_default_model(), tool);

    let args = handler
        .build_command(&redteam_request(json!({"dataset": {"dataFile": []}})))
        .await
        .unwrap();

    assert_eq!(
        transfer.calls(),
        vec![TransferCall::FetchDataset {
            name: "JailbreakPrompts-Tiny".into()
        }]
    );
    let entries = scenarios(&args);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert!(entry.starts_with("MultiDataset:dataset_file="));
    assert!(entry.ends_with(",num_prompts=-1,random_seed=42"));

    let path = entry
        .trim_start_matches("MultiDataset:dataset_file=")
        .split(',')
        .next()
        .unwrap();
    assert!(path.contains("JailbreakPrompts-Tiny-"));
    assert!(!path.contains(' '));
    assert_eq!(std::fs::read(path).unwrap(), br#"[{"prompt":"p"}]"#);
}

#[tokio::test]
async fn attachment_is_downloaded_and_referenced() {
    let tmp = tempfile::tempdir().unwrap();
    let tool = sh_tool(tmp.path(), RECORD_ARGS);
    let transfer = Arc::new(MockTransfer::new().with_file("data.csv", b"prompt\nhello\n"));
    let handler = RedteamReportHandler::new(transfer.clone(), with_default_model(), tool);

    let mut req = redteam_request(serde_json::Value::Null);
    req.attachments = vec!["data.csv".into(), "ignored.csv".into()];
    let args = handler.build_command(&req).await.unwrap();

    let calls = transfer.calls();
    assert_eq!(calls.len(), 1, "only the first attachment is used");
    let local = match &calls[0] {
        TransferCall::Download {
            session_id,
            remote_name,
            local_path,
        } => {
            assert_eq!(session_id, "sess-1");
            assert_eq!(remote_name, "data.csv");
            local_path.clone()
        }
        other => panic!("expected download, got {other:?}"),
    };
    assert!(local.is_absolute());
    assert!(local.to_string_lossy().ends_with(".csv"));
    assert!(local.starts_with(tmp.path().join("uploads")));
    assert_eq!(std::fs::read_to_string(&local).unwrap(), "prompt\nhello\n");

    let entries = scenarios(&args);
    assert_eq!(
        entries,
        vec![format!(
            "MultiDataset:dataset_file={},num_prompts=-1,random_seed=42",
            local.display()
        )]
    );
}

#[tokio::test]
async fn attachment_and_named_datasets_combine() {
    let tmp = tempfile::tempdir().unwrap();
    let tool = sh_tool(tmp.path(), RECORD_ARGS);
    let transfer = Arc::new(
        MockTransfer::new()
            .with_file("q.json", b"[]")
            .with_dataset("Set A", b"[1]")
            .with_dataset("Set B", b"[2]"),
    );
    let handler = RedteamReportHandler::new(transfer.clone(), with_default_model(), tool);

    let mut req = redteam_request(json!({
        "dataset": {
            "dataFile": ["Set A", "Set B"],
            "numPrompts": 20,
            "randomSeed": 7,
            "promptColumn": "question"
        }
    }));
    req.attachments = vec!["q.json".into()];
    let args = handler.build_command(&req).await.unwrap();

    let entries = scenarios(&args);
    assert_eq!(entries.len(), 3);
    assert!(entries[0].ends_with(",num_prompts=20,random_seed=7,prompt_column=question"));
    assert!(entries[1].contains("Set_A-"));
    assert!(entries[2].contains("Set_B-"));
    assert!(entries[1].ends_with(",num_prompts=20,random_seed=7"));
    assert_eq!(transfer.calls().len(), 3);
}

#[tokio::test]
async fn failed_download_is_transport_error() {
    let tmp = tempfile::tempdir().unwrap();
    let tool = sh_tool(tmp.path(), RECORD_ARGS);
    let transfer = Arc::new(MockTransfer::new());
    let handler = RedteamReportHandler::new(transfer, with_default_model(), tool);
    let cb = RecordingCallbacks::new();

    let mut req = redteam_request(serde_json::Value::Null);
    req.attachments = vec!["gone.csv".into()];
    let err = handler
        .execute(&CancellationToken::new(), req, &cb)
        .await
        .unwrap_err();

    assert!(matches!(err, TaskError::Transport(_)));
    assert!(recorded_args(tmp.path()).is_none());
}

#[tokio::test]
async fn language_selects_plan_titles() {
    for (lang, first_title) in [("", "初始化越狱环境"), ("en", "Pre-Jailbreak Parameter Parsing")] {
        let tmp = tempfile::tempdir().unwrap();
        let handler = JailbreakHandler::new(
            with_default_model(),
            sh_tool(tmp.path(), &recording_full_run()),
        );
        let cb = RecordingCallbacks::new();
        let mut req = TaskRequest::new(TASK_TYPE_MODEL_JAILBREAK, "sess-3");
        req.language = lang.into();

        handler
            .execute(&CancellationToken::new(), req, &cb)
            .await
            .unwrap();

        assert_eq!(plan_titles(&cb)[0], first_title, "language {lang:?}");
        let args = recorded_args(tmp.path()).unwrap();
        let lang_pos = args.iter().position(|a| a == "--lang").unwrap();
        let expected = if lang.is_empty() { "zh" } else { lang };
        assert_eq!(args[lang_pos + 1], expected);
    }
}

#[tokio::test]
async fn full_run_reports_progress_and_result() {
    let tmp = tempfile::tempdir().unwrap();
    let tool = sh_tool(tmp.path(), &happy_script());
    let transfer = Arc::new(MockTransfer::new().with_dataset("JailbreakPrompts-Tiny", b"[]"));
    let handler = RedteamReportHandler::new(transfer, with_default_model(), tool);
    let cb = RecordingCallbacks::new();

    let mut req = redteam_request(serde_json::Value::Null);
    req.language = "en".into();
    handler
        .execute(&CancellationToken::new(), req, &cb)
        .await
        .unwrap();

    let events = cb.events();
    assert!(matches!(events[0], CallbackEvent::Plan(_)));
    let last = cb.last_snapshot().unwrap();
    assert!(last.iter().all(|t| t.status == SubTaskStatus::Done));
    assert!(matches!(
        events.last(),
        Some(CallbackEvent::Result(r)) if r.msg_type == "json" && r.content["jailbroken"] == 1
    ));
    // newPlanStep 1, completed 1, newPlanStep 2, progress, newPlanStep 3, completed 3
    assert_eq!(cb.status_count(), 6);

    let args = recorded_args(tmp.path()).unwrap();
    assert_eq!(&args[..2], &["cli_run.py", "--async_mode"]);
    assert!(args.windows(2).any(|w| w == ["--model", "gpt-4o"]));
    assert!(args.windows(2).any(|w| w == ["--max_concurrent", "1000"]));
    assert!(args.windows(2).any(|w| w == ["--techniques", "Raw"]));
    assert!(args.windows(2).any(|w| w == ["--choice", "serial"]));
}

#[tokio::test]
async fn non_zero_exit_fails_last_known_step() {
    let tmp = tempfile::tempdir().unwrap();
    let mut script = emit("newPlanStep", json!({"stepId": 1, "title": "init"}));
    script.push_str(&emit("newPlanStep", json!({"stepId": 2, "title": "run"})));
    script.push_str("exit 4\n");
    let handler = JailbreakHandler::new(with_default_model(), sh_tool(tmp.path(), &script));
    let cb = RecordingCallbacks::new();

    let err = handler
        .execute(
            &CancellationToken::new(),
            TaskRequest::new(TASK_TYPE_MODEL_JAILBREAK, "sess-4"),
            &cb,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TaskError::Exited { code: Some(4) }));
    let last = cb.last_snapshot().unwrap();
    let statuses: Vec<_> = last.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![SubTaskStatus::Done, SubTaskStatus::Failed, SubTaskStatus::Todo]
    );
}

#[tokio::test]
async fn critical_issue_fails_task_despite_clean_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let mut script = emit("newPlanStep", json!({"stepId": "1", "title": "init"}));
    script.push_str(&emit("criticalIssue", json!({"content": "target model unreachable"})));
    let handler = JailbreakHandler::new(with_default_model(), sh_tool(tmp.path(), &script));
    let cb = RecordingCallbacks::new();

    let err = handler
        .execute(
            &CancellationToken::new(),
            TaskRequest::new(TASK_TYPE_MODEL_JAILBREAK, "sess-5"),
            &cb,
        )
        .await
        .unwrap_err();

    match err {
        TaskError::ToolFailure(reason) => assert_eq!(reason, "target model unreachable"),
        other => panic!("expected ToolFailure, got {other:?}"),
    }
    assert_eq!(cb.last_snapshot().unwrap()[0].status, SubTaskStatus::Failed);
}

#[tokio::test]
async fn cancel_right_after_start_stops_tool() {
    let tmp = tempfile::tempdir().unwrap();
    let mut script = emit("newPlanStep", json!({"stepId": "1", "title": "init"}));
    script.push_str("sleep 30\n");
    let handler = JailbreakHandler::new(with_default_model(), sh_tool(tmp.path(), &script));
    let cb = RecordingCallbacks::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = handler
        .execute(
            &cancel,
            TaskRequest::new(TASK_TYPE_MODEL_JAILBREAK, "sess-6"),
            &cb,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TaskError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
    let last = cb.last_snapshot().unwrap();
    assert!(last.iter().any(|t| t.status == SubTaskStatus::Failed));
}

#[tokio::test]
async fn configured_eval_model_reaches_tool() {
    let tmp = tempfile::tempdir().unwrap();
    let defaults = ModelDefaults {
        default_model: None,
        eval_model: Some(ModelParams::new("judge", "http://judge.local", "jk")),
    };
    let handler = JailbreakHandler::new(defaults, sh_tool(tmp.path(), &recording_full_run()));
    let cb = RecordingCallbacks::new();
    let req = TaskRequest {
        params: json!({
            "model": [{"model": "target", "base_url": "http://t", "token": "tk", "limit": 3}],
            "eval_model": {"model": "ignored", "base_url": "http://x", "token": "x"}
        }),
        ..TaskRequest::new(TASK_TYPE_MODEL_JAILBREAK, "sess-7")
    };

    handler
        .execute(&CancellationToken::new(), req, &cb)
        .await
        .unwrap();

    let args = recorded_args(tmp.path()).unwrap();
    assert!(args.windows(2).any(|w| w == ["--evaluate_model", "judge"]));
    assert!(args.windows(2).any(|w| w == ["--max_concurrent", "3"]));
    assert!(!args.iter().any(|a| a == "ignored"));
    assert!(!Path::new(&tmp.path().join("uploads")).exists());
}

#[tokio::test]
async fn clean_exit_with_unfinished_plan_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let mut script = emit("newPlanStep", json!({"stepId": "1", "title": "init"}));
    script.push_str(&emit("newPlanStep", json!({"stepId": "2", "title": "run"})));
    let handler = JailbreakHandler::new(with_default_model(), sh_tool(tmp.path(), &script));
    let cb = RecordingCallbacks::new();

    let err = handler
        .execute(
            &CancellationToken::new(),
            TaskRequest::new(TASK_TYPE_MODEL_JAILBREAK, "sess-8"),
            &cb,
        )
        .await
        .unwrap_err();

    match err {
        TaskError::ToolFailure(reason) => assert!(reason.contains("step 2"), "{reason}"),
        other => panic!("expected ToolFailure, got {other:?}"),
    }
    let statuses: Vec<_> = cb.last_snapshot().unwrap().iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![SubTaskStatus::Done, SubTaskStatus::Failed, SubTaskStatus::Todo]
    );
}

#[tokio::test]
async fn cancel_during_dataset_fetch_returns_promptly() {
    let tmp = tempfile::tempdir().unwrap();
    let tool = sh_tool(tmp.path(), RECORD_ARGS);
    let handler = RedteamReportHandler::new(Arc::new(StalledTransfer), with_default_model(), tool);
    let cb = RecordingCallbacks::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = handler
        .execute(&cancel, redteam_request(serde_json::Value::Null), &cb)
        .await
        .unwrap_err();

    assert!(matches!(err, TaskError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(recorded_args(tmp.path()).is_none());
    assert!(cb.events().is_empty());
}

#[tokio::test]
async fn cancel_during_attachment_download_returns_promptly() {
    let tmp = tempfile::tempdir().unwrap();
    let tool = sh_tool(tmp.path(), RECORD_ARGS);
    let handler = RedteamReportHandler::new(Arc::new(StalledTransfer), with_default_model(), tool);
    let cb = RecordingCallbacks::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let mut req = redteam_request(serde_json::Value::Null);
    req.attachments = vec!["data.csv".into()];
    let started = Instant::now();
    let err = handler.execute(&cancel, req, &cb).await.unwrap_err();

    assert!(matches!(err, TaskError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}
