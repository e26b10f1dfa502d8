//! End-to-end pipeline tests: tailer -> parser -> engine -> ban manager.

mod common;

use common::{nginx_line, scratch_dir, single_rule_config, BackendCall, RecordingBackend};
use foxhole_fw::config::ConfigStore;
use foxhole_fw::firewall::{Backend, BanManager};
use foxhole_fw::pipeline::{start_log_pipeline, CHANNEL_CAPACITY};
use foxhole_fw::rules::Engine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Pipeline {
    backend: Arc<RecordingBackend>,
    token: CancellationToken,
    log_path: std::path::PathBuf,
}

impl Pipeline {
    async fn start(name: &str, max_errors: u32, window: &str, whitelist: &[&str]) -> Self {
        let dir = scratch_dir(name);
        let log_path = dir.join("access.log");
        std::fs::write(&log_path, "").unwrap();

        let config = single_rule_config(log_path.to_str().unwrap(), max_errors, window, whitelist);
        let token = CancellationToken::new();
        let store = Arc::new(ConfigStore::new(config.clone()));

        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (decisions_tx, decisions_rx) = mpsc::channel(CHANNEL_CAPACITY);

        start_log_pipeline(token.clone(), &config, events_tx).unwrap();

        let backend = Arc::new(RecordingBackend::default());
        let engine = Engine::new(Arc::clone(&store));
        let manager = BanManager::new(Arc::clone(&backend) as Arc<dyn Backend>, &config.backend);

        tokio::spawn({
            let token = token.clone();
            async move { engine.run(token, events_rx, decisions_tx).await }
        });
        tokio::spawn({
            let token = token.clone();
            async move { manager.run(token, decisions_rx).await }
        });

        Self {
            backend,
            token,
            log_path,
        }
    }

    async fn append(&self, line: &str) {
        append_line(&self.log_path, line).await;
    }

    /// Wait until the backend has seen `count` bans, or panic.
    async fn wait_for_bans(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.backend.ban_count() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} ban call(s), saw {:?}",
                self.backend.calls()
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Give the pipeline time to drain everything already appended.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(1500)).await;
    }
}

async fn append_line(path: &Path, line: &str) {
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .await
        .unwrap();
    file.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    file.flush().await.unwrap();
}

#[tokio::test]
async fn bans_after_threshold_and_dedups_repeat_offender() {
    let pipeline = Pipeline::start("basic-ban", 3, "60s", &[]).await;

    for i in 0..3 {
        pipeline
            .append(&nginx_line("1.2.3.4", "POST", "/login", 401, i))
            .await;
    }

    pipeline.wait_for_bans(1).await;
    assert_eq!(
        pipeline.backend.calls(),
        vec![BackendCall::Ban {
            ip: "1.2.3.4".to_string(),
            rule_id: "login".to_string(),
        }]
    );

    // A fourth error re-trips the rule, but the active ban absorbs it.
    pipeline
        .append(&nginx_line("1.2.3.4", "POST", "/login", 401, 3))
        .await;
    pipeline.settle().await;
    assert_eq!(pipeline.backend.ban_count(), 1);

    pipeline.token.cancel();
}

#[tokio::test]
async fn whitelisted_source_is_never_banned() {
    let pipeline = Pipeline::start("whitelist", 3, "60s", &["1.2.3.0/24"]).await;

    for i in 0..5 {
        pipeline
            .append(&nginx_line("1.2.3.4", "POST", "/login", 500, i))
            .await;
    }

    pipeline.settle().await;
    assert!(pipeline.backend.calls().is_empty());

    pipeline.token.cancel();
}

#[tokio::test]
async fn errors_outside_window_do_not_accumulate() {
    let pipeline = Pipeline::start("window-expiry", 3, "10s", &[]).await;

    // Two errors at T and T+1, a third only at T+20: by then the first
    // two are outside the 10s window.
    pipeline
        .append(&nginx_line("9.9.9.9", "POST", "/login", 401, 0))
        .await;
    pipeline
        .append(&nginx_line("9.9.9.9", "POST", "/login", 401, 1))
        .await;
    pipeline
        .append(&nginx_line("9.9.9.9", "POST", "/login", 401, 20))
        .await;

    pipeline.settle().await;
    assert!(pipeline.backend.calls().is_empty());

    pipeline.token.cancel();
}

#[tokio::test]
async fn distinct_sources_are_tracked_independently() {
    let pipeline = Pipeline::start("independent", 3, "60s", &[]).await;

    for i in 0..3 {
        pipeline
            .append(&nginx_line("10.0.0.1", "POST", "/login", 401, i))
            .await;
        pipeline
            .append(&nginx_line("10.0.0.2", "POST", "/login", 401, i))
            .await;
    }

    pipeline.wait_for_bans(2).await;
    let banned: Vec<String> = pipeline
        .backend
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            BackendCall::Ban { ip, .. } => Some(ip),
            BackendCall::Unban { .. } => None,
        })
        .collect();
    assert!(banned.contains(&"10.0.0.1".to_string()));
    assert!(banned.contains(&"10.0.0.2".to_string()));

    pipeline.token.cancel();
}

#[tokio::test]
async fn unparsable_lines_are_dropped() {
    let pipeline = Pipeline::start("bad-lines", 2, "60s", &[]).await;

    pipeline.append("garbage that matches no format").await;
    pipeline
        .append(&nginx_line("8.8.4.4", "POST", "/login", 403, 0))
        .await;
    pipeline.append("more garbage").await;
    pipeline
        .append(&nginx_line("8.8.4.4", "POST", "/login", 403, 1))
        .await;

    pipeline.wait_for_bans(1).await;
    pipeline.token.cancel();
}
