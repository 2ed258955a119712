//! End-to-end dispatcher scenarios over real child processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cligate::config::GatewayConfig;
use cligate::health::{HealthTracker, ModelState};
use cligate::jobs::{JobManager, JobSnapshot, JobStatus};
use cligate::provider::ModelProvider;
use cligate::registry::ProviderRegistry;
use cligate::types::{ChatMessage, FinishReason, IncomingRequest, Role, ToolDefinition};
use cligate::GatewayError;

fn build_registry(yaml: &str) -> (ProviderRegistry, Arc<HealthTracker>) {
    let config: GatewayConfig = serde_yaml::from_str(yaml).expect("test config parses");
    config.validate().expect("test config is valid");
    let tracker = Arc::new(HealthTracker::new());
    let registry = ProviderRegistry::from_config(config.providers, Arc::clone(&tracker))
        .expect("registry builds");
    (registry, tracker)
}

fn user_request(content: &str) -> IncomingRequest {
    IncomingRequest {
        request_id: "req-test".to_string(),
        messages: vec![ChatMessage {
            role: Role::User,
            content: content.to_string(),
            name: None,
            tool_call_id: None,
        }],
        tools: vec![],
        metadata: HashMap::new(),
    }
}

fn search_tool(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: None,
        parameters: Some(serde_json::json!({
            "type": "object",
            "properties": { "q": { "type": "string" } }
        })),
    }
}

async fn wait_for_finish(jobs: &JobManager, id: &str) -> JobSnapshot {
    for _ in 0..200 {
        let job = jobs.get_job(id).await.expect("job exists");
        if job.status != JobStatus::Running {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} did not finish in time");
}

#[tokio::test]
async fn text_happy_path() {
    let (registry, tracker) = build_registry(
        r#"
providers:
  - id: echo
    models:
      - id: m1
    responseCommand:
      executable: /bin/sh
      args: ["-c", "printf hello"]
      timeoutMs: 5000
      output: text
"#,
    );

    let result = registry.run_model("m1", user_request("hi")).await.unwrap();
    assert_eq!(result.output_text, "hello");
    assert!(result.tool_calls.is_empty());
    assert_eq!(result.finish_reason, FinishReason::Stop);

    let stats = tracker.snapshot_model("m1").await.unwrap();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn json_contract_with_tool_call() {
    let (registry, _tracker) = build_registry(
        r#"
providers:
  - id: contract
    models:
      - id: m2
    responseCommand:
      executable: /bin/sh
      args:
        - "-c"
        - |
          cat <<'EOF'
          {"output_text":"","tool_calls":[{"id":"c1","name":"search","arguments":"{\"q\":\"x\"}"}],"finish_reason":"tool_calls"}
          EOF
      timeoutMs: 5000
      output: json_contract
"#,
    );

    let mut request = user_request("find x");
    request.tools = vec![search_tool("search")];

    let result = registry.run_model("m2", request).await.unwrap();
    assert_eq!(result.output_text, "");
    assert_eq!(result.finish_reason, FinishReason::ToolCalls);
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].id, "c1");
    assert_eq!(result.tool_calls[0].name, "search");
    assert_eq!(result.tool_calls[0].arguments, "{\"q\":\"x\"}");
}

#[tokio::test]
async fn fallback_on_timeout() {
    let (registry, tracker) = build_registry(
        r#"
providers:
  - id: slow
    models:
      - id: m3
        fallbackModels: [m4]
    responseCommand:
      executable: /bin/sleep
      args: ["30"]
      timeoutMs: 200
      output: text
  - id: fast
    models:
      - id: m4
    responseCommand:
      executable: /bin/sh
      args: ["-c", "printf ok"]
      timeoutMs: 5000
      output: text
"#,
    );

    let result = registry.run_model("m3", user_request("hi")).await.unwrap();
    assert_eq!(result.output_text, "ok");

    let snapshot = tracker.snapshot().await;
    assert_eq!(snapshot.fallback_transitions, 1);
    let m3 = snapshot.models.iter().find(|m| m.model_id == "m3").unwrap();
    let m4 = snapshot.models.iter().find(|m| m.model_id == "m4").unwrap();
    assert_eq!(m3.failures_by_kind.get("timeout"), Some(&1));
    assert_eq!(m3.fallback_out, 1);
    assert_eq!(m4.successes, 1);
    assert_eq!(m4.fallback_in, 1);
}

#[tokio::test]
async fn tool_names_are_canonicalized_and_unknown_calls_dropped() {
    let yaml = r#"
providers:
  - id: contract
    models:
      - id: m5
    responseCommand:
      executable: /bin/sh
      args:
        - "-c"
        - |
          cat <<'EOF'
          {"tool_calls":[{"id":"c1","name":"Search-Docs","arguments":"{\"q\":\"x\"}"},{"id":"c2","name":"unknown_tool","arguments":"{}"}],"finish_reason":"tool_calls"}
          EOF
      timeoutMs: 5000
      output: json_contract
"#;
    let (registry, _) = build_registry(yaml);

    let mut request = user_request("find docs");
    request.tools = vec![search_tool("searchDocs")];

    let result = registry.run_model("m5", request).await.unwrap();
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].name, "searchDocs");
    assert_eq!(result.finish_reason, FinishReason::ToolCalls);
}

#[tokio::test]
async fn dropping_every_tool_call_downgrades_to_stop() {
    let yaml = r#"
providers:
  - id: contract
    models:
      - id: m6
    responseCommand:
      executable: /bin/sh
      args:
        - "-c"
        - |
          cat <<'EOF'
          {"tool_calls":[{"id":"c1","name":"unknown_tool","arguments":"{}"}],"finish_reason":"tool_calls"}
          EOF
      timeoutMs: 5000
      output: json_contract
"#;
    let (registry, _) = build_registry(yaml);

    let mut request = user_request("hi");
    request.tools = vec![search_tool("searchDocs")];

    let result = registry.run_model("m6", request).await.unwrap();
    assert!(result.tool_calls.is_empty());
    assert_eq!(result.finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn classifier_routes_http_429_to_rate_limited() {
    let (registry, tracker) = build_registry(
        r#"
providers:
  - id: limited
    models:
      - id: m7
    responseCommand:
      executable: /bin/sh
      args: ["-c", "echo 'HTTP 429 Too Many Requests' 1>&2; exit 1"]
      timeoutMs: 5000
      output: text
"#,
    );

    let err = registry.run_model("m7", user_request("hi")).await.unwrap_err();
    assert!(matches!(err, GatewayError::ProviderExit { .. }));

    let stats = tracker.snapshot_model("m7").await.unwrap();
    assert_eq!(stats.consecutive_rate_limited, 1);
    assert_eq!(stats.failures_by_kind.get("rate_limited"), Some(&1));
    assert_eq!(stats.state, ModelState::RateLimited);
    assert!(stats.cooldown_seconds_remaining >= 60);
}

#[tokio::test]
async fn empty_stdout_in_json_contract_mode_is_a_parse_failure() {
    let (registry, tracker) = build_registry(
        r#"
providers:
  - id: silent
    models:
      - id: m8
    responseCommand:
      executable: /bin/true
      timeoutMs: 5000
      output: json_contract
"#,
    );

    let err = registry.run_model("m8", user_request("hi")).await.unwrap_err();
    assert!(matches!(err, GatewayError::Parse(_)));

    // parse failures classify like provider exits
    let stats = tracker.snapshot_model("m8").await.unwrap();
    assert_eq!(stats.failures_by_kind.get("provider_exit"), Some(&1));
}

#[tokio::test]
async fn login_job_captures_device_code_url() {
    let (registry, _) = build_registry(
        r#"
providers:
  - id: acme
    models:
      - id: m9
    responseCommand:
      executable: /bin/true
      timeoutMs: 5000
    auth:
      loginCommand:
        executable: /bin/sh
        args: ["-c", "echo 'Visit https://auth.example/activate?user_code=ABCD' 1>&2"]
        timeoutMs: 5000
"#,
    );
    let jobs = JobManager::new(300, 50);

    let provider = registry.provider("acme").unwrap();
    let job = provider.start_login_job(&jobs).await.unwrap();
    assert_eq!(job.kind, "login:acme");

    let finished = wait_for_finish(&jobs, &job.id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert!(finished
        .urls
        .contains(&"https://auth.example/activate?user_code=ABCD".to_string()));
    assert!(finished
        .logs
        .iter()
        .any(|line| line.starts_with("[stderr] Visit ")));
}

#[tokio::test]
async fn concurrent_requests_share_the_tracker_safely() {
    let (registry, tracker) = build_registry(
        r#"
providers:
  - id: echo
    models:
      - id: m10
    responseCommand:
      executable: /bin/sh
      args: ["-c", "printf hello"]
      timeoutMs: 5000
      output: text
"#,
    );
    let registry = Arc::new(registry);

    let mut handles = Vec::new();
    for i in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let mut request = user_request("hi");
            request.request_id = format!("req-{i}");
            registry.run_model("m10", request).await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.output_text, "hello");
    }

    let stats = tracker.snapshot_model("m10").await.unwrap();
    assert_eq!(stats.attempts, 8);
    assert_eq!(stats.successes, 8);
}
