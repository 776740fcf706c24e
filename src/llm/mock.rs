//! 离线 LLM 客户端（无需 API）
//!
//! - MockLlmClient：按 system prompt 中列出的工具顺序逐个调用，最后调用 finish；用于本地跑通整条流水线。
//! - ScriptedLlmClient：按队列返回预置回复并记录每次请求，供测试精确控制模型行为。

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::llm::{LlmClient, Message, Role};
use crate::react::planner::{
    AVAILABLE_TOOLS_PREFIX, COMPLETION_MARKERS_PREFIX, SESSION_ID_PREFIX, TOOL_RESULTS_PREFIX,
    TRANSCRIPT_PREFIX,
};

/// 没有来源 URL 时跳过的导入类工具
const IMPORT_TOOLS: &[&str] = &["delegate_import", "fetch_source", "transcribe_audio"];

/// Mock 客户端：确定性地走完当前阶段的工具清单
#[derive(Debug, Default)]
pub struct MockLlmClient;

fn line_value<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|l| l.trim().strip_prefix(prefix))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let request = messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let tools = split_list(line_value(system, AVAILABLE_TOOLS_PREFIX));
        let markers = split_list(line_value(system, COMPLETION_MARKERS_PREFIX));
        let url = request
            .split_whitespace()
            .find(|w| w.starts_with("http://") || w.starts_with("https://"));

        let transcript = line_value(request, TRANSCRIPT_PREFIX);
        let mut session_id = line_value(request, SESSION_ID_PREFIX).map(String::from);
        let mut media_uri: Option<String> = None;
        let mut attempted: HashSet<String> = HashSet::new();
        for m in messages.iter().filter(|m| m.role == Role::User) {
            let Some(body) = m.content.strip_prefix(TOOL_RESULTS_PREFIX) else {
                continue;
            };
            let Ok(results) = serde_json::from_str::<Vec<Value>>(body.trim()) else {
                continue;
            };
            for r in results {
                if let Some(tool) = r.get("tool").and_then(Value::as_str) {
                    attempted.insert(tool.to_string());
                }
                if r.get("status").and_then(Value::as_str) != Some("ok") {
                    continue;
                }
                let output = r.get("output").cloned().unwrap_or(Value::Null);
                if session_id.is_none() {
                    session_id = output
                        .get("session_id")
                        .and_then(Value::as_str)
                        .map(String::from);
                }
                if let Some(uri) = output.get("media_uri").and_then(Value::as_str) {
                    media_uri = Some(uri.to_string());
                }
            }
        }

        let next = tools
            .iter()
            .filter(|t| t.as_str() != "finish")
            .filter(|t| url.is_some() || !IMPORT_TOOLS.contains(&t.as_str()))
            .find(|t| !attempted.contains(t.as_str()));

        let reply = match next {
            Some(tool) => {
                let mut args = Map::new();
                let headline = request.lines().next().unwrap_or("").trim().to_string();
                args.insert("topic".into(), json!(headline));
                args.insert("instruction".into(), json!(headline));
                if let Some(sid) = &session_id {
                    args.insert("session_id".into(), json!(sid));
                }
                if let Some(u) = url {
                    args.insert("url".into(), json!(u));
                }
                if let Some(uri) = &media_uri {
                    args.insert("media_uri".into(), json!(uri));
                }
                if let Some(t) = transcript {
                    args.insert("transcript".into(), json!(t));
                }
                json!({ "tool": tool, "args": Value::Object(args) })
            }
            None => json!({
                "tool": "finish",
                "args": {
                    "summary": "Mock run finished every available tool.",
                    "markers": markers,
                    "session_id": session_id,
                }
            }),
        };
        Ok(reply.to_string())
    }
}

/// 脚本化客户端：依次返回预置回复；脚本耗尽时返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply.into());
    }

    /// 已收到的请求次数
    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 每次请求的完整消息（含 system）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| "scripted replies exhausted".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_walks_tools_then_finishes() {
        let system = Message::system(format!(
            "stage prompt\n{AVAILABLE_TOOLS_PREFIX} plan_sfx, finish\n{COMPLETION_MARKERS_PREFIX} sfx_plan"
        ));
        let request = Message::user(format!("make it loud\n{SESSION_ID_PREFIX} prod_1"));
        let first = MockLlmClient
            .complete(&[system.clone(), request.clone()])
            .await
            .unwrap();
        let v: Value = serde_json::from_str(&first).unwrap();
        assert_eq!(v["tool"], "plan_sfx");
        assert_eq!(v["args"]["session_id"], "prod_1");

        let results = Message::user(format!(
            "{TOOL_RESULTS_PREFIX}\n[{{\"call_id\":\"c1\",\"tool\":\"plan_sfx\",\"status\":\"ok\",\"output\":{{}}}}]"
        ));
        let second = MockLlmClient
            .complete(&[system, request, Message::assistant(first), results])
            .await
            .unwrap();
        let v: Value = serde_json::from_str(&second).unwrap();
        assert_eq!(v["tool"], "finish");
        assert_eq!(v["args"]["markers"][0], "sfx_plan");
    }

    #[tokio::test]
    async fn test_mock_skips_import_without_url() {
        let system = Message::system(format!(
            "{AVAILABLE_TOOLS_PREFIX} delegate_import, delegate_content, finish"
        ));
        let out = MockLlmClient
            .complete(&[system, Message::user("a song about rain")])
            .await
            .unwrap();
        assert!(out.contains("delegate_content"));
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let llm = ScriptedLlmClient::new(["one", "two"]);
        assert_eq!(llm.complete(&[]).await.unwrap(), "one");
        assert_eq!(llm.complete(&[]).await.unwrap(), "two");
        assert!(llm.complete(&[]).await.is_err());
        assert_eq!(llm.calls(), 3);
    }
}
