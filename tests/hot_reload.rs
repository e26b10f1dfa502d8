//! Hot-reload behavior: the engine re-reads rules per event, and the file
//! watcher publishes new snapshots without a restart.

mod common;

use common::{base_time, scratch_dir, single_rule_config};
use chrono::TimeDelta;
use foxhole_fw::config::{Config, ConfigStore, ConfigWatcher};
use foxhole_fw::parser::Event;
use foxhole_fw::rules::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn login_event(ip: &str, offset_secs: i64) -> Event {
    Event {
        remote_addr: ip.to_string(),
        method: "POST".to_string(),
        path: "/login".to_string(),
        status: 401,
        timestamp: Some(base_time() + TimeDelta::seconds(offset_secs)),
        raw: String::new(),
    }
}

#[tokio::test]
async fn engine_picks_up_tightened_threshold() {
    let store = Arc::new(ConfigStore::new(single_rule_config(
        "/tmp/access.log",
        10,
        "60s",
        &[],
    )));
    let engine = Engine::new(Arc::clone(&store));
    let (events_tx, events_rx) = mpsc::channel(16);
    let (decisions_tx, mut decisions_rx) = mpsc::channel(16);
    let token = CancellationToken::new();
    tokio::spawn(engine.run(token.clone(), events_rx, decisions_tx));

    // Three errors under the original threshold of 10: no decision.
    for i in 0..3 {
        events_tx.send(login_event("5.6.7.8", i)).await.unwrap();
    }
    assert!(timeout(Duration::from_millis(300), decisions_rx.recv())
        .await
        .is_err());

    // Tighten the threshold to 3 and feed one more error.
    store.update(single_rule_config("/tmp/access.log", 3, "60s", &[]));
    events_tx.send(login_event("5.6.7.8", 3)).await.unwrap();

    let decision = timeout(Duration::from_secs(5), decisions_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decision.ip, "5.6.7.8");
    assert_eq!(decision.rule_id, "login");
    assert!(decision.violation && decision.ban);

    token.cancel();
}

#[tokio::test]
async fn watcher_publishes_valid_config_and_keeps_old_on_failure() {
    let dir = scratch_dir("watcher");
    let config_path = dir.join("config.yaml");
    let yaml = |max_errors: u32| {
        format!(
            r#"
log:
  path: /tmp/access.log
rules:
  - id: login
    method: POST
    path: /login
    max_errors: {max_errors}
    window: 60s
    ban_duration: 5m
backend:
  type: iptables
  iptables:
    table: filter
    chain: INPUT
"#
        )
    };
    std::fs::write(&config_path, yaml(10)).unwrap();

    let initial = Config::load(&config_path).unwrap();
    let store = Arc::new(ConfigStore::new(initial));
    let watcher = ConfigWatcher::spawn(config_path.clone(), Arc::clone(&store)).unwrap();

    assert_eq!(store.current().rules[0].max_errors, 10);

    // A valid rewrite is published after the debounce window.
    std::fs::write(&config_path, yaml(3)).unwrap();
    wait_for(Duration::from_secs(5), || {
        store.current().rules[0].max_errors == 3
    })
    .await;

    // Let the debounce window pass before the next change.
    tokio::time::sleep(Duration::from_millis(700)).await;

    // A broken rewrite is rejected; the previous snapshot stays in force.
    std::fs::write(&config_path, "rules: [").unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.current().rules[0].max_errors, 3);

    watcher.stop().await;
}

async fn wait_for(limit: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
