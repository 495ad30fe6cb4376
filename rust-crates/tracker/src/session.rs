use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    LoggedOut,
}

/// Shared authentication gate. Poll loops and the sweep stop as soon as it flips to
/// `LoggedOut`.
#[derive(Clone, Debug)]
pub struct Session {
    state: Arc<watch::Sender<SessionState>>,
}

impl Session {
    pub fn authenticated() -> Self {
        Self::with_state(SessionState::Authenticated)
    }

    pub fn logged_out() -> Self {
        Self::with_state(SessionState::LoggedOut)
    }

    fn with_state(state: SessionState) -> Self {
        let (sender, _) = watch::channel(state);
        Self {
            state: Arc::new(sender),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    pub fn log_in(&self) {
        self.state.send_replace(SessionState::Authenticated);
    }

    pub fn log_out(&self) {
        let previous = self.state.send_replace(SessionState::LoggedOut);
        if previous == SessionState::Authenticated {
            tracing::info!("session logged out; stopping status polling");
        }
    }

    pub async fn wait_logged_out(&self) {
        let mut receiver = self.state.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot fail here.
        let _ = receiver
            .wait_for(|state| *state == SessionState::LoggedOut)
            .await;
    }
}
