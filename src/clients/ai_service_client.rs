use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::clients::{AssistantBackend, CodeAnalyzer};
use crate::error::CollabError;
use crate::models::{AnalyzeRequest, ChatPayload, QnaRequest, QnaResponse};
use crate::BoxFuture;

/// HTTP client for the AI service (`/analyze-code`, `/technical-qna`)
#[derive(Debug, Clone)]
pub struct AiServiceClient {
    client: Client,
    base_url: String,
}

impl AiServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollabError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST /analyze-code. Any JSON body is returned as is.
    pub async fn analyze_code(&self, code: &str) -> Result<Value, CollabError> {
        let url = format!("{}/analyze-code", self.base_url);
        debug!("POST {} ({} bytes of code)", url, code.len());
        let resp = self
            .client
            .post(&url)
            .json(&AnalyzeRequest { code })
            .send()
            .await
            .map_err(map_reqwest)?;
        if !resp.status().is_success() {
            return Err(CollabError::Status(resp.status().as_u16()));
        }
        let body = resp.bytes().await.map_err(map_reqwest)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// POST /technical-qna. A body without `answer` is malformed.
    pub async fn technical_qna(&self, question: &str) -> Result<ChatPayload, CollabError> {
        let url = format!("{}/technical-qna", self.base_url);
        debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .json(&QnaRequest { question })
            .send()
            .await
            .map_err(map_reqwest)?;
        if !resp.status().is_success() {
            return Err(CollabError::Status(resp.status().as_u16()));
        }
        let body = resp.bytes().await.map_err(map_reqwest)?;
        let parsed: QnaResponse = serde_json::from_slice(&body)?;
        parsed
            .answer
            .ok_or_else(|| CollabError::Malformed("response has no answer".to_string()))
    }
}

fn map_reqwest(e: reqwest::Error) -> CollabError {
    if e.is_timeout() {
        CollabError::Timeout
    } else {
        CollabError::Http(e)
    }
}

impl CodeAnalyzer for AiServiceClient {
    fn analyze<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<Value, CollabError>> {
        Box::pin(self.analyze_code(code))
    }
}

impl AssistantBackend for AiServiceClient {
    fn ask<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<ChatPayload, CollabError>> {
        Box::pin(self.technical_qna(question))
    }
}
