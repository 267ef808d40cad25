use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use oaichat::storage::SqliteStorage;

#[allow(dead_code)]
pub fn create_temp_storage() -> (SqliteStorage, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("history.db");
    let storage =
        SqliteStorage::new_with_path(db_path).expect("failed to create sqlite storage with path");
    (storage, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Config with a single default profile `mock` pointing at `base_url`
#[allow(dead_code)]
pub fn mock_profile_config(base_url: &str) -> String {
    format!(
        "default_profile: mock\nprofiles:\n  mock:\n    base_url: {}\n    api_key: test-key\n    default_model: test-model\n",
        base_url
    )
}

/// SSE body streaming `deltas`, then a usage event and `[DONE]`
#[allow(dead_code)]
pub fn sse_body(deltas: &[&str], usage: Option<(u32, u32)>) -> String {
    let mut body = String::new();
    for delta in deltas {
        let event = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": delta}}]
        });
        body.push_str(&format!("data: {}\n\n", event));
    }
    if let Some((prompt, completion)) = usage {
        let event = serde_json::json!({
            "choices": [],
            "usage": {
                "prompt_tokens": prompt,
                "completion_tokens": completion,
                "total_tokens": prompt + completion
            }
        });
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Non-streaming completion body
#[allow(dead_code)]
pub fn completion_body(content: &str, usage: (u32, u32)) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": usage.0,
            "completion_tokens": usage.1,
            "total_tokens": usage.0 + usage.1
        }
    })
}

/// The `oaichat` binary with environment overrides cleared
#[allow(dead_code)]
pub fn oaichat_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("oaichat").expect("binary builds");
    for var in [
        "OAICHAT_CONFIG",
        "OAICHAT_DB_PATH",
        "OAICHAT_API_KEY",
        "OAICHAT_BASE_URL",
        "OAICHAT_MODEL",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}
