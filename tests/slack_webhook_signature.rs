mod gateway_harness;

use gateway_harness::{find_free_port, GatewayHarness, TestResult};
use hmac::Mac;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = hmac::Hmac<Sha256>;

const SIGNING_SECRET: &str = "test-signing-secret";

fn config(slack_port: u16) -> String {
    format!(
        r#"
agent:
  name: "test-agent"
  url: "http://127.0.0.1:__PORT__"
mock_tools: true
port: __PORT__
channels:
  - name: slack
    port: {slack_port}
    agent_url: "http://127.0.0.1:__PORT__"
    settings:
      bot_token: "xoxb-test"
      signing_secret: "{SIGNING_SECRET}"
"#
    )
}

fn config_with_empty_signing_secret(slack_port: u16) -> String {
    format!(
        r#"
agent:
  name: "test-agent"
  url: "http://127.0.0.1:__PORT__"
mock_tools: true
port: __PORT__
channels:
  - name: slack
    port: {slack_port}
    agent_url: "http://127.0.0.1:__PORT__"
    settings:
      bot_token: "xoxb-test"
      signing_secret: ""
"#
    )
}

fn sign(timestamp: &str, body: &str) -> String {
    let basestring = format!("v0:{timestamp}:{body}");
    let mut mac = HmacSha256::new_from_slice(SIGNING_SECRET.as_bytes()).unwrap();
    mac.update(basestring.as_bytes());
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn stale_timestamp_is_rejected_even_with_a_valid_signature() -> TestResult<()> {
    let slack_port = find_free_port()?;
    let yaml = config(slack_port);
    let gateway = GatewayHarness::spawn(&yaml).await?;

    // Give the slack listener a moment to bind after the main server
    // reports healthy; both are spawned off main() concurrently.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let _ = &gateway;

    let body = r#"{"type":"event_callback","event":{"type":"message","text":"hi","user":"u1","channel":"c1"}}"#;
    let stale_timestamp = (SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() - 3600).to_string();
    let signature = sign(&stale_timestamp, body);

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{slack_port}/slack/events"))
        .header("x-slack-request-timestamp", stale_timestamp)
        .header("x-slack-signature", signature)
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await?;

    assert_eq!(response.status().as_u16(), 401);
    Ok(())
}

#[tokio::test]
async fn url_verification_challenge_is_echoed_back() -> TestResult<()> {
    let slack_port = find_free_port()?;
    let yaml = config(slack_port);
    let gateway = GatewayHarness::spawn(&yaml).await?;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let _ = &gateway;

    let body = r#"{"type":"url_verification","challenge":"abc123"}"#;
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs().to_string();
    let signature = sign(&timestamp, body);

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{slack_port}/slack/events"))
        .header("x-slack-request-timestamp", timestamp)
        .header("x-slack-signature", signature)
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await?;

    assert_eq!(response.status().as_u16(), 200);
    let parsed: serde_json::Value = response.json().await?;
    assert_eq!(parsed["challenge"], "abc123");
    Ok(())
}

#[tokio::test]
async fn empty_signing_secret_channel_is_never_bound() -> TestResult<()> {
    let slack_port = find_free_port()?;
    let yaml = config_with_empty_signing_secret(slack_port);
    let gateway = GatewayHarness::spawn(&yaml).await?;

    // The main gateway still starts fine; `build_channels` just logs and
    // skips a channel that fails construction, so give it the same grace
    // period as the other tests before checking the slack port.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let _ = &gateway;

    let result = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{slack_port}/slack/events"))
        .body("{}")
        .send()
        .await;

    assert!(
        result.is_err(),
        "slack listener should never have bound its port with an empty signing_secret"
    );
    Ok(())
}
