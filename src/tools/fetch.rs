//! Fetch 工具：抓取外部数据（域名白名单、超时、结果大小限制）
//!
//! 只发 GET 请求，视为幂等。HTML 响应用 html2text 提取可读文本；
//! 超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;

use crate::tools::{Tool, ToolError};

const USER_AGENT: &str = concat!("bee-durable/", env!("CARGO_PKG_VERSION"));

pub struct FetchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

/// 解析 URL 并返回 host（小写，不含端口）
///
/// 只接受 http/https；带 userinfo 的 URL 一律拒绝，白名单检查的 host 与实际连接的 host 必须一致。
fn extract_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return None;
    }
    let host = parsed.host_str()?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_lowercase())
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!") || s.starts_with("<html") || s.starts_with("<HTML")
}

fn truncate_chars(body: String, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

impl FetchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/json,text/plain;q=0.9,*/*;q=0.8"),
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains: allowed_domains.into_iter().map(|s| s.to_lowercase()).collect(),
            max_result_chars,
        }
    }

    fn check_allowed(&self, url: &str) -> Result<(), ToolError> {
        let domain = extract_domain(url)
            .ok_or_else(|| ToolError::Domain("Invalid or unsupported URL".to_string()))?;
        if self.allowed_domains.contains(&domain) {
            Ok(())
        } else {
            Err(ToolError::Domain(format!("Domain not in allowlist: {domain}")))
        }
    }

    /// 连接失败、超时、上游 5xx/429 为瞬时错误；其余非 2xx 状态作为业务错误交还给模型
    async fn fetch(&self, url: &str) -> Result<String, ToolError> {
        self.check_allowed(url)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Transient(format!("Request failed: {e}")))?;
        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ToolError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ToolError::Domain(format!("HTTP {status}")));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::Transient(format!("Read body: {e}")))?;
        let body = body.trim_start_matches('\u{FEFF}').to_string();

        let body = if looks_like_html(&body) {
            match from_read(body.as_bytes(), 120) {
                Ok(text) if !text.trim().is_empty() => text,
                _ => body,
            }
        } else {
            body
        };
        Ok(truncate_chars(body, self.max_result_chars))
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch external data from an allowlisted URL (HTTP GET). Args: {\"url\": \"https://...\"}."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if url.is_empty() {
            return Err(ToolError::Domain("Missing url".to_string()));
        }
        tracing::info!(url = %url, "fetch tool request");
        self.fetch(url).await
    }
}
