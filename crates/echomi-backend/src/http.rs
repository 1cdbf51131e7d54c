//! reqwest-backed implementation of [`Backend`]

use crate::identity::Credential;
use crate::types::{
    ApprovalAck, ApprovalDecision, OtpQuery, OtpReport, OtpResponse, OtpResult,
    PushTokenRegistration, SmsBatch,
};
use crate::{Backend, BackendError};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;

const APPROVAL_PATH: &[&str] = &["approval"];
const OTP_PATH: &[&str] = &["delivery", "otp"];
const SMS_STORE_PATH: &[&str] = &["api", "sms", "call", "store"];
const PUSH_TOKEN_PATH: &[&str] = &["api", "settings", "fcm-token"];

/// HTTP client for the Echomi backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    /// Create a client rooted at `base_url`.
    ///
    /// `timeout` bounds every request, including approval submission.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base })
    }

    /// The normalized base URL
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Turn a non-2xx response into [`BackendError::Status`]
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Backend for HttpBackend {
    async fn submit_approval(
        &self,
        decision: &ApprovalDecision,
    ) -> Result<ApprovalAck, BackendError> {
        let url = self.endpoint(APPROVAL_PATH)?;
        let resp = self.client.post(url).json(decision).send().await?;
        let ack: ApprovalAck = check_status(resp).await?.json().await?;

        if !ack.success {
            return Err(BackendError::Rejected(
                ack.message.unwrap_or_else(|| "approval not accepted".into()),
            ));
        }
        Ok(ack)
    }

    async fn fetch_otp(&self, query: &OtpQuery) -> Result<OtpResult, BackendError> {
        let mut segments = OTP_PATH.to_vec();
        segments.push(query.identity.as_str());
        let url = self.endpoint(&segments)?;

        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(ref sender) = query.sender {
            params.push(("sender", sender.as_str()));
        }
        if let Some(ref order_id) = query.order_id {
            params.push(("orderId", order_id.as_str()));
        }

        let mut request = self.client.get(url);
        if !params.is_empty() {
            request = request.query(&params);
        }
        let resp = request.send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(OtpResult::not_found());
        }
        let raw: OtpResponse = check_status(resp).await?.json().await?;
        Ok(raw.into())
    }

    async fn upload_sms_batch(
        &self,
        credential: &Credential,
        batch: &SmsBatch,
    ) -> Result<(), BackendError> {
        if credential.is_empty() {
            return Err(BackendError::AuthUnavailable);
        }
        let url = self.endpoint(SMS_STORE_PATH)?;
        let resp = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .json(batch)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn relay_otp(&self, report: &OtpReport) -> Result<(), BackendError> {
        let url = self.endpoint(OTP_PATH)?;
        let resp = self.client.post(url).json(report).send().await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn register_push_token(
        &self,
        credential: &Credential,
        push_token: &str,
    ) -> Result<(), BackendError> {
        if credential.is_empty() {
            return Err(BackendError::AuthUnavailable);
        }
        let url = self.endpoint(PUSH_TOKEN_PATH)?;
        let body = PushTokenRegistration {
            fcm_token: push_token.to_string(),
        };
        let resp = self
            .client
            .put(url)
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .json(&body)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let resp = self.client.get(self.base.clone()).send().await?;
        check_status(resp).await?;
        Ok(())
    }
}
