//! `restclient smoke` – queue a fixed set of request jobs and run them.

use anyhow::{ensure, Result};
use restclient_core::config::RestClientConfig;
use restclient_core::host::HostInfo;
use restclient_core::scheduler::{Job, JobRunner};
use restclient_core::services::Services;
use restclient_core::source::{alphabet_block, AlphabetSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const RANGE_LEN: usize = 1024;
const STREAM_LEN: u64 = 4000;

/// Names of the jobs `smoke` knows, in queue order.
pub const JOB_NAMES: &[&str] = &[
    "get",
    "range",
    "delete",
    "put",
    "post",
    "post-stream",
    "patch",
    "save",
];

/// True when `name` should run for the given filters (empty means all).
pub fn selected(name: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|f| name.contains(f.as_str()))
}

fn build_job(name: &'static str, host: &HostInfo, save_dir: Option<&PathBuf>) -> Option<Job> {
    let host = host.clone();
    let job = match name {
        "get" => Job::new(name, host, |_, _, conn| {
            Box::pin(async move {
                let text = conn.get("/get").await?.text().await?;
                ensure!(text.contains("\"url\""), "unexpected /get body");
                anyhow::Ok(())
            })
        }),
        "range" => Job::new(name, host, |_, _, conn| {
            Box::pin(async move {
                let path = format!("/range/{RANGE_LEN}?chunk_size=80");
                let body = conn.get(&path).await?.bytes().await?;
                ensure!(
                    body[..] == alphabet_block(RANGE_LEN)[..],
                    "range body mismatch ({} bytes)",
                    body.len()
                );
                anyhow::Ok(())
            })
        }),
        "delete" => Job::new(name, host, |_, _, conn| {
            Box::pin(async move {
                conn.del("/delete").await?.drain().await?;
                anyhow::Ok(())
            })
        }),
        "put" => Job::new(name, host, |_, _, conn| {
            Box::pin(async move {
                let text = conn.put("/put", "put from restclient").await?.text().await?;
                ensure!(text.contains("put from restclient"), "PUT body not echoed");
                anyhow::Ok(())
            })
        }),
        "post" => Job::new(name, host, |_, _, conn| {
            Box::pin(async move {
                let text = conn.post("/post", "post from restclient").await?.text().await?;
                ensure!(text.contains("post from restclient"), "POST body not echoed");
                anyhow::Ok(())
            })
        }),
        "post-stream" => Job::new(name, host, |_, _, conn| {
            Box::pin(async move {
                let reader = AlphabetSource::new().reader(STREAM_LEN);
                conn.post_stream("/post", reader).await?.drain().await?;
                anyhow::Ok(())
            })
        }),
        "patch" => Job::new(name, host, |_, _, conn| {
            Box::pin(async move {
                let text = conn.patch("/patch", "patch from restclient").await?.text().await?;
                ensure!(text.contains("patch from restclient"), "PATCH body not echoed");
                anyhow::Ok(())
            })
        }),
        "save" => {
            let file = save_dir?.join("range.bin");
            Job::new(name, host, move |_, _, conn| {
                let file = file.clone();
                Box::pin(async move {
                    let path = format!("/range/{RANGE_LEN}");
                    let n = conn.get_to_file(&path, &file).await?;
                    ensure!(n as usize == RANGE_LEN, "saved {n} bytes");
                    anyhow::Ok(())
                })
            })
        }
        _ => return None,
    };
    Some(job)
}

pub async fn run_smoke(
    cfg: RestClientConfig,
    base: &str,
    save_dir: Option<PathBuf>,
    filters: &[String],
) -> Result<()> {
    let host = HostInfo::parse(base)?;
    let services = Arc::new(Services::new(&cfg)?);
    let runner = JobRunner::new(cfg, services);

    let mut queued = 0usize;
    for name in JOB_NAMES.iter().copied().filter(|n| selected(n, filters)) {
        match build_job(name, &host, save_dir.as_ref()) {
            Some(job) => {
                runner.enqueue(job);
                queued += 1;
            }
            None => tracing::debug!(job = name, "skipped"),
        }
    }
    ensure!(queued > 0, "no jobs match {:?}", filters);

    let started = Instant::now();
    let summary = runner.run().await?;
    runner.close_idle();

    println!(
        "{} job(s) on {}: {} ok, {} failed in {:.2}s",
        summary.total(),
        host,
        summary.completed,
        summary.failed.len(),
        started.elapsed().as_secs_f64()
    );
    if let Some(stats) = runner.host_stats(&host.key()) {
        println!(
            "  connections opened: {}  errors: {}  throttled: {}",
            stats.connections_opened, stats.error_events, stats.throttled_events
        );
    }
    for failure in &summary.failed {
        println!("  {failure}");
    }
    ensure!(summary.is_success(), "{} job(s) failed", summary.failed.len());
    Ok(())
}
