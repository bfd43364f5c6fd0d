//! Blocking JSON GET over libcurl. Call from `spawn_blocking` in async code.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT: &str = concat!("droidup/", env!("CARGO_PKG_VERSION"));

pub(super) fn get_json<T: DeserializeOwned>(url: &str, timeout: Duration) -> Result<T> {
    let mut body = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.follow_location(true)?;
    easy.useragent(USER_AGENT)?;
    easy.connect_timeout(timeout.min(Duration::from_secs(15)))?;
    easy.timeout(timeout)?;

    let mut list = curl::easy::List::new();
    list.append("Accept: application/json")?;
    easy.http_headers(list)?;

    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer
            .perform()
            .with_context(|| format!("GET {} failed", url))?;
    }

    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("GET {} returned HTTP {}", url, code);
    }

    serde_json::from_slice(&body).with_context(|| format!("unexpected JSON from {}", url))
}
