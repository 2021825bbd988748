//! Drop detection, reconnect backoff, circuit breaker and heartbeat
//! scenarios against mock collaborators.

use std::sync::atomic::Ordering;

use voicekeeper::gateway::{ChannelId, GuildId};
use voicekeeper::resilience::CircuitState;
use voicekeeper::supervisor::ConnectionState;

mod common;

use common::{fast_config, harness, wait_for, ConnectScript};

#[tokio::test]
async fn test_external_drop_triggers_reconnect() {
    let h = harness(fast_config());
    h.gateway.add_channel("g1", "c1");
    h.supervisor.initialize().await;

    let guild = GuildId::from("g1");
    h.supervisor
        .join(&ChannelId::from("c1"), true, true)
        .await
        .expect("join");

    h.gateway.kick_from_voice("g1");

    // The drop enters the reconnect pipeline, then the backoff timer fires
    // and the rejoin succeeds.
    assert!(
        wait_for(
            || h.supervisor.is_connected(&guild) && h.gateway.connect_count() == 2,
            2_000,
        )
        .await,
        "should reconnect after an external drop"
    );
    assert_eq!(h.supervisor.circuit_state(&guild), CircuitState::Closed);
}

#[tokio::test]
async fn test_drop_enters_reconnecting_state() {
    let mut config = fast_config();
    // Stretch the backoff so the intermediate state is observable.
    config.reconnect.base_delay_ms = 300;
    let h = harness(config);
    h.gateway.add_channel("g1", "c1");
    h.supervisor.initialize().await;

    let guild = GuildId::from("g1");
    h.supervisor
        .join(&ChannelId::from("c1"), true, true)
        .await
        .expect("join");

    h.gateway.kick_from_voice("g1");

    assert!(
        wait_for(
            || h.supervisor.connection_state(&guild) == ConnectionState::Reconnecting,
            1_000,
        )
        .await
    );
    assert_eq!(h.supervisor.reconnect_attempts(&guild), 1);
    assert!(!h.supervisor.is_connected(&guild));
}

#[tokio::test]
async fn test_reconnect_abandons_when_channel_deleted() {
    let h = harness(fast_config());
    h.gateway.add_channel("g1", "c1");
    h.supervisor.initialize().await;

    let guild = GuildId::from("g1");
    h.supervisor
        .join(&ChannelId::from("c1"), true, true)
        .await
        .expect("join");
    assert!(h.store.contains("g1"));

    // Kicked while the channel still exists, so a reconnect is scheduled;
    // the channel disappears before the backoff timer fires.
    h.gateway.kick_from_voice("g1");
    assert!(
        wait_for(
            || h.supervisor.connection_state(&guild) == ConnectionState::Reconnecting,
            1_000,
        )
        .await
    );
    h.gateway.delete_channel("c1");

    assert!(
        wait_for(|| !h.supervisor.has_group_state(&guild), 2_000).await,
        "cycle should terminate with full cleanup"
    );
    assert_eq!(h.supervisor.connection_state(&guild), ConnectionState::Idle);
    assert!(!h.store.contains("g1"), "persisted target removed");
}

#[tokio::test]
async fn test_drop_with_deleted_channel_cleans_up_immediately() {
    let h = harness(fast_config());
    h.gateway.add_channel("g1", "c1");
    h.supervisor.initialize().await;

    let guild = GuildId::from("g1");
    h.supervisor
        .join(&ChannelId::from("c1"), true, true)
        .await
        .expect("join");

    // Channel gone before the drop is even noticed.
    h.gateway.delete_channel("c1");
    h.gateway.kick_from_voice("g1");

    assert!(wait_for(|| !h.supervisor.has_group_state(&guild), 1_000).await);
    assert_eq!(h.gateway.connect_count(), 1, "no reconnect attempted");
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let mut config = fast_config();
    config.reconnect.max_attempts = 2;
    let h = harness(config);
    h.gateway.add_channel("g1", "c1");
    h.supervisor.initialize().await;

    let guild = GuildId::from("g1");
    h.supervisor
        .join(&ChannelId::from("c1"), true, true)
        .await
        .expect("join");

    for _ in 0..4 {
        h.gateway.script_connect(ConnectScript::Fail);
    }
    h.gateway.kick_from_voice("g1");

    assert!(
        wait_for(|| !h.supervisor.has_group_state(&guild), 3_000).await,
        "exhausted cycle should clean up completely"
    );
    // Initial join plus exactly max_attempts reconnects.
    assert_eq!(h.gateway.connect_count(), 3);
    assert!(h.store.contains("g1"), "target kept for a future restart");
}

#[tokio::test]
async fn test_circuit_breaker_pauses_reconnects() {
    let mut config = fast_config();
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.cooldown_ms = 60_000;
    config.reconnect.max_attempts = 10;
    let h = harness(config);
    h.gateway.add_channel("g1", "c1");
    h.supervisor.initialize().await;

    let guild = GuildId::from("g1");
    h.supervisor
        .join(&ChannelId::from("c1"), true, true)
        .await
        .expect("join");

    for _ in 0..8 {
        h.gateway.script_connect(ConnectScript::Fail);
    }
    h.gateway.kick_from_voice("g1");

    assert!(
        wait_for(
            || h.supervisor.circuit_state(&guild) == CircuitState::Open,
            3_000,
        )
        .await,
        "breaker should open after the failure threshold"
    );

    // Two reconnect attempts failed, the third is deferred by the breaker.
    let calls_when_open = h.gateway.connect_count();
    assert_eq!(calls_when_open, 3);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(
        h.gateway.connect_count(),
        calls_when_open,
        "open breaker must hold reconnects back"
    );
    assert_eq!(
        h.supervisor.connection_state(&guild),
        ConnectionState::Reconnecting
    );

    h.supervisor.shutdown(true).await;
}

#[tokio::test]
async fn test_heartbeat_drop_threshold() {
    let mut config = fast_config();
    // A wide probe interval keeps the "two misses only" window observable.
    config.heartbeat.interval_ms = 150;
    let h = harness(config);
    h.gateway.add_channel("g1", "c1");
    h.gateway.add_channel("g1", "c2");
    h.supervisor.initialize().await;

    let guild = GuildId::from("g1");
    h.supervisor
        .join(&ChannelId::from("c1"), true, true)
        .await
        .expect("join");

    // Silently move the bot elsewhere: no event, only the roster changes.
    h.gateway.set_own_channel("g1", Some("c2"));

    // At most two probes can have run by now; below the threshold of three.
    tokio::time::sleep(std::time::Duration::from_millis(180)).await;
    assert!(
        h.supervisor.is_connected(&guild),
        "two mismatches must not trigger a reconnect"
    );

    // The third mismatch trips the drop path.
    assert!(
        wait_for(|| !h.supervisor.is_connected(&guild), 3_000).await,
        "third mismatch should trigger the drop path"
    );
}

#[tokio::test]
async fn test_heartbeat_probe_errors_are_not_mismatches() {
    let h = harness(fast_config());
    h.gateway.add_channel("g1", "c1");
    h.supervisor.initialize().await;

    let guild = GuildId::from("g1");
    h.supervisor
        .join(&ChannelId::from("c1"), true, true)
        .await
        .expect("join");

    h.gateway.roster_errors.store(true, Ordering::SeqCst);

    // Many probe intervals of lookup failures change nothing.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(h.supervisor.is_connected(&guild));

    h.gateway.roster_errors.store(false, Ordering::SeqCst);
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert!(h.supervisor.is_connected(&guild));
}

#[tokio::test]
async fn test_stability_resets_attempts_and_breaker() {
    let h = harness(fast_config());
    h.gateway.add_channel("g1", "c1");
    h.supervisor.initialize().await;

    let guild = GuildId::from("g1");
    h.supervisor
        .join(&ChannelId::from("c1"), true, true)
        .await
        .expect("join");

    // Two failed reconnects, then recovery on the third.
    h.gateway.script_connect(ConnectScript::Fail);
    h.gateway.script_connect(ConnectScript::Fail);
    h.gateway.kick_from_voice("g1");

    assert!(
        wait_for(|| h.supervisor.is_connected(&guild), 3_000).await,
        "should recover on the third attempt"
    );
    assert_eq!(h.supervisor.reconnect_attempts(&guild), 3);

    // Clean heartbeats past the stability threshold forgive the attempts.
    assert!(
        wait_for(|| h.supervisor.reconnect_attempts(&guild) == 0, 2_000).await,
        "stable connection should reset the attempt counter"
    );
    assert_eq!(h.supervisor.circuit_state(&guild), CircuitState::Closed);
}
