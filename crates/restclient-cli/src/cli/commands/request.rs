//! `restclient get|delete|put|post|patch` – one request on one connection.

use anyhow::{Context, Result};
use restclient_core::config::RestClientConfig;
use restclient_core::host::HostInfo;
use restclient_core::http::{HttpConnection, HttpError, Request};
use restclient_core::retry::run_with_retry;
use restclient_core::services::Services;
use restclient_core::storage;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Delete,
    Put,
    Post,
    Patch,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Delete => "DELETE",
            Verb::Put => "PUT",
            Verb::Post => "POST",
            Verb::Patch => "PATCH",
        }
    }
}

enum Reply {
    Body(String),
    Saved(u64),
}

pub async fn run_request(
    cfg: &RestClientConfig,
    verb: Verb,
    url: &str,
    data: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    let (host, target) = HostInfo::split_url(url)?;
    let services = Arc::new(Services::new(cfg)?);
    let policy = cfg.retry_policy();
    let (target, data) = (target.as_str(), data.as_deref());

    // Each attempt gets its own connection; a failed one is already closed.
    let reply = run_with_retry(&policy, |attempt| {
        let conn = HttpConnection::new(host.clone(), Arc::clone(&services));
        async move {
            tracing::debug!(attempt, "{} {}", verb.as_str(), url);
            send_once(conn, verb, target, data, output)
                .await
                .with_context(|| format!("{} {}", verb.as_str(), url))
        }
    })
    .await?;

    match reply {
        Reply::Body(text) => print!("{text}"),
        Reply::Saved(n) => {
            if let Some(path) = output {
                println!("saved {} bytes to {}", n, path.display());
            }
        }
    }
    Ok(())
}

async fn send_once(
    mut conn: HttpConnection,
    verb: Verb,
    target: &str,
    data: Option<&str>,
    output: Option<&Path>,
) -> Result<Reply, HttpError> {
    let mut req = Request::new(verb.as_str(), target);
    if let Some(data) = data {
        req = req.with_body(data.to_string());
    }
    let mut resp = conn.action(&mut req).await?;
    tracing::info!(status = %resp.status_line(), "{} {}", verb.as_str(), target);
    let reply = match output {
        Some(path) => Reply::Saved(storage::save_body(&mut resp, path).await?),
        None => Reply::Body(resp.text().await?),
    };
    conn.shutdown().await;
    Ok(reply)
}
