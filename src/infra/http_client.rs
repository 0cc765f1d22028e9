use crate::app::ports::{HttpClientPort, HttpResponse};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use std::time::Duration;

use crate::common::constants::DEFAULT_HTTP_TIMEOUT_SECS;

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("score_ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Default for ReqwestHttp {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT_SECS).unwrap_or_else(|_| Self {
            client: reqwest::Client::new(),
        })
    }
}

async fn into_response(resp: reqwest::Response) -> Result<HttpResponse, String> {
    let status = resp.status().as_u16();
    let bytes = resp.bytes().await.map_err(|e| e.to_string())?.to_vec();
    Ok(HttpResponse { status, bytes })
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse, String> {
        let mut req = self.client.get(url).header(ACCEPT, "application/json");
        if let Some(token) = bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        into_response(resp).await
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, String> {
        let resp = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        into_response(resp).await
    }
}
