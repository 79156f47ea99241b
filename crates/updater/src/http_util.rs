//! Small shared JSON request helpers for the controller client.

use flynn_core::{HostError, HostResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub async fn get_json<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> HostResult<T> {
    let resp = http.get(url).send().await.map_err(|e| HostError::Transient(format!("GET {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(HostError::Transient(format!("GET {url} returned {}", resp.status())));
    }
    resp.json().await.map_err(|e| HostError::Transient(format!("decoding response from {url}: {e}")))
}

pub async fn get_json_optional<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> HostResult<Option<T>> {
    let resp = http.get(url).send().await.map_err(|e| HostError::Transient(format!("GET {url}: {e}")))?;
    if resp.status().as_u16() == 404 {
        return Ok(None);
    }
    if !resp.status().is_success() {
        return Err(HostError::Transient(format!("GET {url} returned {}", resp.status())));
    }
    resp.json().await.map(Some).map_err(|e| HostError::Transient(format!("decoding response from {url}: {e}")))
}

pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    body: &B,
) -> HostResult<T> {
    let resp = http.post(url).json(body).send().await.map_err(|e| HostError::Transient(format!("POST {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(HostError::Transient(format!("POST {url} returned {}", resp.status())));
    }
    resp.json().await.map_err(|e| HostError::Transient(format!("decoding response from {url}: {e}")))
}

pub async fn post_json_with_timeout<B: Serialize + ?Sized>(
    http: &reqwest::Client,
    url: &str,
    body: &B,
    timeout: Duration,
) -> HostResult<()> {
    let resp = http
        .post(url)
        .json(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| HostError::Transient(format!("POST {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(HostError::Transient(format!("POST {url} returned {}", resp.status())));
    }
    Ok(())
}
