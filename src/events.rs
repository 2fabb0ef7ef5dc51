//! Event Fabric (C14, spec sections 4.9 and 5).
//!
//! `emit` enqueues an event and returns immediately; a fixed pool of
//! worker threads drains the queue FIFO and fans each event out to
//! every enabled sink. A sink failure is logged and swallowed — it
//! never reaches the caller. Queue overflow drops the oldest event and
//! logs a warning. Events are fire-and-forget (at-most-once) and are
//! not buffered across process restarts.
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::config::{Config, EventsConfig};

/// The closed event type set (spec section 6 "Event taxonomy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    InstanceInstallationStarted,
    InstanceInstallationFinished,
    InstanceDirectoriesCreated,
    InstanceDirectoriesRemoved,
    InstanceFilesCreated,
    InstanceFilesRemoved,
    InstanceDownloadStarted,
    InstanceDownloadFinished,
    InstanceDownloaded,
    InstanceDeployStarted,
    InstanceDeployFinished,
    InstanceDeployed,
    InstanceVersionUpdated,
    InstanceUpdateStarted,
    InstanceUpdateFinished,
    InstanceUpdateFailed,
    InstanceUpdated,
    InstanceInstalled,
    InstanceUninstallStarted,
    InstanceUninstallFinished,
    InstanceRemoved,
    InstanceUninstalled,
    InstanceStarted,
    InstanceReady,
    InstanceStopped,
    InstanceBackupCreated,
    InstanceBackupRestored,
}

impl EventType {
    fn as_str(self) -> &'static str {
        match self {
            EventType::InstanceInstallationStarted => "instance_installation_started",
            EventType::InstanceInstallationFinished => "instance_installation_finished",
            EventType::InstanceDirectoriesCreated => "instance_directories_created",
            EventType::InstanceDirectoriesRemoved => "instance_directories_removed",
            EventType::InstanceFilesCreated => "instance_files_created",
            EventType::InstanceFilesRemoved => "instance_files_removed",
            EventType::InstanceDownloadStarted => "instance_download_started",
            EventType::InstanceDownloadFinished => "instance_download_finished",
            EventType::InstanceDownloaded => "instance_downloaded",
            EventType::InstanceDeployStarted => "instance_deploy_started",
            EventType::InstanceDeployFinished => "instance_deploy_finished",
            EventType::InstanceDeployed => "instance_deployed",
            EventType::InstanceVersionUpdated => "instance_version_updated",
            EventType::InstanceUpdateStarted => "instance_update_started",
            EventType::InstanceUpdateFinished => "instance_update_finished",
            EventType::InstanceUpdateFailed => "instance_update_failed",
            EventType::InstanceUpdated => "instance_updated",
            EventType::InstanceInstalled => "instance_installed",
            EventType::InstanceUninstallStarted => "instance_uninstall_started",
            EventType::InstanceUninstallFinished => "instance_uninstall_finished",
            EventType::InstanceRemoved => "instance_removed",
            EventType::InstanceUninstalled => "instance_uninstalled",
            EventType::InstanceStarted => "instance_started",
            EventType::InstanceReady => "instance_ready",
            EventType::InstanceStopped => "instance_stopped",
            EventType::InstanceBackupCreated => "instance_backup_created",
            EventType::InstanceBackupRestored => "instance_backup_restored",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EventEnvelope {
    #[serde(rename = "EventType")]
    event_type: &'static str,
    #[serde(rename = "Data")]
    data: EventData,
}

#[derive(Debug, Clone, Serialize)]
struct EventData {
    #[serde(rename = "Instance")]
    instance: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

struct Queue {
    items: Mutex<VecDeque<EventEnvelope>>,
    condvar: Condvar,
    capacity: usize,
}

pub struct EventFabric {
    queue: Arc<Queue>,
    config: Arc<EventsConfig>,
    _workers: Vec<std::thread::JoinHandle<()>>,
}

impl EventFabric {
    pub fn new(config: Config) -> Self {
        let events_config = Arc::new(config.events);
        let queue = Arc::new(Queue {
            items: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            capacity: events_config.event_queue_capacity,
        });

        let mut workers = Vec::new();
        let pool_size = events_config.event_worker_pool_size.max(1);
        for _ in 0..pool_size {
            let queue = Arc::clone(&queue);
            let cfg = Arc::clone(&events_config);
            workers.push(std::thread::spawn(move || worker_loop(queue, cfg)));
        }

        Self {
            queue,
            config: events_config,
            _workers: workers,
        }
    }

    /// A handle sharing the same queue and worker pool; the worker
    /// threads are independent of any single handle's lifetime, so
    /// dropping one handle never stops dispatch for the others.
    pub fn shallow_clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            config: Arc::clone(&self.config),
            _workers: Vec::new(),
        }
    }

    /// Enqueues an event for asynchronous fan-out; returns immediately.
    /// A no-op when broadcasting is disabled. `data` carries fields
    /// beyond the mandatory `Instance`/`Timestamp`.
    pub fn emit(&self, event_type: EventType, instance: &str, data: HashMap<String, serde_json::Value>) {
        if !self.config.enable_event_broadcasting {
            return;
        }
        let envelope = EventEnvelope {
            event_type: event_type.as_str(),
            data: EventData {
                instance: instance.to_string(),
                timestamp: Utc::now().to_rfc3339(),
                extra: data,
            },
        };

        let mut items = self.queue.items.lock().unwrap();
        if items.len() >= self.queue.capacity {
            if let Some(dropped) = items.pop_front() {
                tracing::warn!(event_type = dropped.event_type, "event queue full, dropping oldest event");
            }
        }
        items.push_back(envelope);
        self.queue.condvar.notify_one();
    }
}

fn worker_loop(queue: Arc<Queue>, config: Arc<EventsConfig>) {
    let http_client = reqwest::blocking::Client::new();
    loop {
        let envelope = {
            let mut items = queue.items.lock().unwrap();
            while items.is_empty() {
                items = queue.condvar.wait(items).unwrap();
            }
            items.pop_front()
        };
        let Some(envelope) = envelope else { continue };

        let body = match serde_json::to_vec(&envelope) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event");
                continue;
            }
        };

        for socket_path in &config.event_socket_paths {
            dispatch_socket(socket_path, &body);
        }
        for url in &config.webhook_urls {
            dispatch_webhook(&http_client, url, &body, &config);
        }
    }
}

fn dispatch_socket(path: &std::path::Path, body: &[u8]) {
    let connect = UnixStream::connect(path);
    let mut stream = match connect {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "socket sink connect failed, dropping event");
            return;
        }
    };
    let _ = stream.set_write_timeout(Some(Duration::from_millis(500)));
    if let Err(e) = stream.write_all(body).and_then(|_| stream.write_all(b"\n")) {
        tracing::warn!(path = %path.display(), error = %e, "socket sink write failed, dropping event");
    }
}

fn dispatch_webhook(client: &reqwest::blocking::Client, url: &str, body: &[u8], config: &EventsConfig) {
    let signature = hmac_signature(body, &config.webhook_secret);
    let timeout = Duration::from_secs(config.webhook_timeout_seconds as u64);
    let mut backoff = Duration::from_millis(250);
    let max_backoff = Duration::from_secs(5);

    for attempt in 0..=config.webhook_retry_count {
        let mut request = client
            .post(url)
            .timeout(timeout)
            .header("content-type", "application/json")
            .body(body.to_vec());
        if let Some(sig) = &signature {
            request = request.header("X-KGSM-Signature", format!("sha256={sig}"));
        }
        match request.send() {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) => {
                tracing::warn!(url, status = %resp.status(), attempt, "webhook sink non-2xx response");
            }
            Err(e) => {
                tracing::warn!(url, error = %e, attempt, "webhook sink request failed");
            }
        }
        if attempt < config.webhook_retry_count {
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(max_backoff);
        }
    }
    tracing::warn!(url, "webhook sink exhausted retries, dropping event");
}

fn hmac_signature(body: &[u8], secret: &str) -> Option<String> {
    if secret.is_empty() {
        return None;
    }
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_signature_matches_known_vector() {
        let sig = hmac_signature(b"{\"Instance\":\"x\"}", "s").unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(b"s").unwrap();
        mac.update(b"{\"Instance\":\"x\"}");
        assert_eq!(sig, hex::encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn empty_secret_yields_no_signature() {
        assert_eq!(hmac_signature(b"body", ""), None);
    }

    #[test]
    fn emit_is_a_no_op_without_broadcasting_enabled() {
        let config = Config::default();
        assert!(!config.events.enable_event_broadcasting);
        let fabric = EventFabric::new(config);
        fabric.emit(EventType::InstanceStarted, "x", HashMap::new());
    }
}
