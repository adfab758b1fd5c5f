mod gateway_harness;

use gateway_harness::{user_message, GatewayHarness, TestResult};

const CONFIG: &str = r#"
agent:
  name: "test-agent"
  url: "http://127.0.0.1:__PORT__"
mock_tools: true
port: __PORT__
policy:
  guardrails:
    - type: content_filter
      mode: enforce
      config:
        blocked_words: ["FORBIDDEN"]
"#;

#[tokio::test]
async fn enforce_mode_content_filter_fails_the_task() -> TestResult<()> {
    let gateway = GatewayHarness::spawn(CONFIG).await?;

    let sent = gateway
        .rpc(
            "tasks/send",
            serde_json::json!({"id": "blocked-1", "message": user_message("this is FORBIDDEN content")}),
        )
        .await?;

    let result = &sent["result"];
    assert_eq!(result["status"]["state"], "failed");
    let text = result["status"]["message"]["parts"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Guardrail violation:"), "unexpected message: {text}");
    Ok(())
}

#[tokio::test]
async fn clean_text_passes_through_the_same_guardrails() -> TestResult<()> {
    let gateway = GatewayHarness::spawn(CONFIG).await?;

    let sent = gateway
        .rpc(
            "tasks/send",
            serde_json::json!({"id": "clean-1", "message": user_message("perfectly fine text")}),
        )
        .await?;

    assert_eq!(sent["result"]["status"]["state"], "completed");
    Ok(())
}
