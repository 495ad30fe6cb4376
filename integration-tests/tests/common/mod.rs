#![allow(dead_code)]

use panel_client::{
    PanelClient,
    test_helpers::MockPanel,
};
use std::{
    sync::Mutex,
    time::Duration,
};
use tracker::{
    CacheKey,
    EffectSink,
    Notification,
    SweepConfig,
    TrackOptions,
};

pub const PHONE: &str = "9990001111";

#[derive(Default)]
pub struct RecordingSink {
    pub notifications: Mutex<Vec<Notification>>,
    pub invalidated: Mutex<Vec<CacheKey>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.message.clone())
            .collect()
    }
}

impl EffectSink for RecordingSink {
    fn notify(&self, notification: &Notification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }

    fn invalidate(&self, key: CacheKey) {
        self.invalidated.lock().unwrap().push(key);
    }
}

pub async fn logged_in(panel: &MockPanel) -> PanelClient {
    let client = PanelClient::new(panel.base_url()).unwrap();
    client.login(PHONE, "secret").await.unwrap();
    client
}

pub fn fast_track(max_attempts: u32) -> TrackOptions {
    TrackOptions::default()
        .with_interval(Duration::from_millis(10))
        .with_max_attempts(max_attempts)
}

pub fn fast_sweep(max_attempts: u32) -> SweepConfig {
    SweepConfig {
        interval: Duration::from_millis(50),
        track: fast_track(max_attempts),
    }
}

/// Polls `condition` every 10ms for up to five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
