//! HTTP helpers for the daemon's local API.

use anyhow::{Context, Result};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/api")
}

pub async fn get_json<T: DeserializeOwned>(url: &str) -> Result<T> {
    fetch(reqwest::Client::new().get(url), url).await
}

pub async fn post_json<T: DeserializeOwned>(url: &str) -> Result<T> {
    fetch(reqwest::Client::new().post(url), url).await
}

pub async fn delete_json<T: DeserializeOwned>(url: &str) -> Result<T> {
    fetch(reqwest::Client::new().delete(url), url).await
}

/// Send, reject non-2xx answers, and decode the JSON body.
async fn fetch<T: DeserializeOwned>(request: RequestBuilder, url: &str) -> Result<T> {
    let response = request
        .send()
        .await
        .with_context(|| format!("could not reach parleyd at {url}; is it running?"))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("parleyd answered {status}: {}", body.trim());
    }
    response
        .json::<T>()
        .await
        .with_context(|| format!("unexpected response from {url}"))
}
