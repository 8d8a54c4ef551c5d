//! Local fact collectors
//!
//! Each collector probes one aspect of the host (release file, tool
//! versions, kernel identification) and reports it as a tagged document.
//! Probes either run once at startup or loop on their own cadence. A failed
//! probe logs and produces nothing for that cycle; it never takes the agent
//! down.

use crate::models::Datum;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Command;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often a collector produces data.
#[derive(Debug, Clone, Copy)]
pub enum Cadence {
    /// Probe once at startup.
    Once,
    /// Probe on a fixed ticker.
    Every(Duration),
}

/// A source of host facts. Probes run on the blocking pool; they may read
/// files or shell out to short-lived commands.
pub trait Collector: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn cadence(&self) -> Cadence {
        Cadence::Once
    }
    /// Returns the collected document, or `None` when the probe failed.
    fn probe(&self) -> Option<Value>;
}

/// The probes shipped with the agent.
pub fn default_collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(OsRelease),
        Box::new(Uname),
        Box::new(DockerVersion),
        Box::new(EtcdctlVersion),
    ]
}

/// Starts one task per collector, all feeding the same aggregator channel.
pub fn spawn_collectors(
    collectors: Vec<Box<dyn Collector>>,
    out: mpsc::Sender<Datum>,
    cancel: CancellationToken,
) {
    for collector in collectors {
        let out = out.clone();
        let cancel = cancel.clone();
        match collector.cadence() {
            Cadence::Once => {
                tokio::spawn(run_once(collector, out));
            }
            Cadence::Every(period) => {
                tokio::spawn(run_periodic(collector, period, out, cancel));
            }
        }
    }
}

async fn run_once(collector: Box<dyn Collector>, out: mpsc::Sender<Datum>) {
    let name = collector.name();
    let Some(value) = probe_blocking(collector).await else {
        warn!(collector = name, "probe failed, no data this cycle");
        return;
    };
    info!(collector = name, "probe succeeded");
    let _ = out.send(Datum { source: name.to_string(), value }).await;
}

async fn run_periodic(
    collector: Box<dyn Collector>,
    period: Duration,
    out: mpsc::Sender<Datum>,
    cancel: CancellationToken,
) {
    let name = collector.name();
    info!(collector = name, ?period, "periodic probe started");
    let collector = std::sync::Arc::new(collector);
    let mut ticker = tokio::time::interval(period);
    // The immediate first tick would race startup; skip it
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(collector = name, "probe cancelled");
                return;
            }
            _ = ticker.tick() => {
                let collector = collector.clone();
                let probed = tokio::task::spawn_blocking(move || collector.probe()).await;
                match probed {
                    Ok(Some(value)) => {
                        debug!(collector = name, "probe tick produced data");
                        if out.send(Datum { source: name.to_string(), value }).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => warn!(collector = name, "probe failed, no data this cycle"),
                    Err(e) => warn!(collector = name, error = %e, "probe panicked"),
                }
            }
        }
    }
}

async fn probe_blocking(collector: Box<dyn Collector>) -> Option<Value> {
    tokio::task::spawn_blocking(move || collector.probe())
        .await
        .ok()
        .flatten()
}

// --- line parsing helpers ---

/// Splits each line on `sep` into a key/value pair; lines without both
/// halves are skipped.
fn split_kv_lines(text: &str, sep: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some((k, v)) = line.split_once(sep) {
            if !k.is_empty() && !v.is_empty() {
                map.insert(k.to_string(), v.to_string());
            }
        }
    }
    map
}

/// Finds the first line containing `pattern` and returns that line with the
/// pattern removed.
fn match_and_strip(text: &str, pattern: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.contains(pattern))
        .map(|line| line.replacen(pattern, "", 1))
}

fn map_to_value(map: HashMap<String, String>) -> Value {
    Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

// --- shipped probes ---

/// Reads `/etc/os-release` as key=value pairs.
struct OsRelease;

impl Collector for OsRelease {
    fn name(&self) -> &'static str {
        "os-release"
    }

    fn probe(&self) -> Option<Value> {
        let text = std::fs::read_to_string("/etc/os-release").ok()?;
        Some(map_to_value(split_kv_lines(&text, "=")))
    }
}

/// Kernel identification via `uname` flags.
struct Uname;

impl Collector for Uname {
    fn name(&self) -> &'static str {
        "uname"
    }

    fn probe(&self) -> Option<Value> {
        const FIELDS: &[(&str, &str)] = &[
            ("hostname", "-n"),
            ("arch", "-m"),
            ("kernel_name", "-s"),
            ("kernel_release", "-r"),
        ];
        let mut map = HashMap::new();
        for (key, flag) in FIELDS {
            // No uname at all means no data this cycle, not empty facts
            let value = command_stdout("uname", &[flag])?;
            map.insert(key.to_string(), value.trim().to_string());
        }
        Some(map_to_value(map))
    }
}

/// Parses `docker version` output.
struct DockerVersion;

impl Collector for DockerVersion {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn probe(&self) -> Option<Value> {
        let out = command_stdout("docker", &["version"])?;
        Some(map_to_value(split_kv_lines(&out, ": ")))
    }
}

/// Parses `etcdctl --version` output.
struct EtcdctlVersion;

impl Collector for EtcdctlVersion {
    fn name(&self) -> &'static str {
        "etcd"
    }

    fn probe(&self) -> Option<Value> {
        let out = command_stdout("etcdctl", &["--version"])?;
        let mut map = HashMap::new();
        if let Some(version) = match_and_strip(&out, "etcdctl version ") {
            map.insert("version".to_string(), version);
        }
        Some(map_to_value(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn split_kv_lines_cases() {
        let cases: &[(&str, &str, &[(&str, &str)])] = &[
            ("", "=", &[]),
            ("one", "=", &[]),
            ("one=two", "=", &[("one", "two")]),
            ("one: two", ": ", &[("one", "two")]),
            ("one=two\nthree=four\nbad\n\n", "=", &[("one", "two"), ("three", "four")]),
        ];
        for (input, sep, expected) in cases {
            let got = split_kv_lines(input, sep);
            assert_eq!(got.len(), expected.len(), "input {input:?}");
            for (k, v) in *expected {
                assert_eq!(got.get(*k).map(String::as_str), Some(*v), "input {input:?}");
            }
        }
    }

    #[test]
    fn match_and_strip_cases() {
        assert_eq!(
            match_and_strip("etcdctl version 2.3.7\n", "etcdctl version "),
            Some("2.3.7".to_string())
        );
        assert_eq!(match_and_strip("no match here\n", "etcdctl version "), None);
        assert_eq!(match_and_strip("", "etcdctl version "), None);
    }

    #[test]
    fn missing_program_fails_the_probe() {
        assert_eq!(command_stdout("definitely-not-a-real-binary", &["--version"]), None);
    }

    struct StaticProbe;

    impl Collector for StaticProbe {
        fn name(&self) -> &'static str {
            "static"
        }
        fn probe(&self) -> Option<Value> {
            Some(serde_json::json!({"answer": "42"}))
        }
    }

    struct FailingProbe;

    impl Collector for FailingProbe {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn probe(&self) -> Option<Value> {
            None
        }
    }

    #[tokio::test]
    async fn one_shot_probe_delivers_one_datum() {
        let (tx, mut rx) = mpsc::channel(4);
        run_once(Box::new(StaticProbe), tx).await;
        let datum = rx.recv().await.unwrap();
        assert_eq!(datum.source, "static");
        assert_eq!(datum.value["answer"], "42");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn failed_probe_delivers_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        run_once(Box::new(FailingProbe), tx).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn periodic_probe_ticks() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        tokio::spawn(run_periodic(
            Box::new(StaticProbe),
            Duration::from_millis(10),
            tx,
            cancel.clone(),
        ));
        let datum = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(datum.source, "static");
        cancel.cancel();
    }
}
