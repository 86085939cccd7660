//! Authentication state as seen by the rest of the app. Sign-in flows
//! themselves belong to an external provider that calls into this handle.

use log::info;
use tokio::sync::watch;

use crate::remote::AuthUser;

#[derive(Clone)]
pub struct AuthHandle {
    state: watch::Sender<Option<AuthUser>>,
}

impl Default for AuthHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthHandle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    pub fn sign_in(&self, user: AuthUser) {
        info!("signed in as {}", user.uid);
        self.state.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        if self.state.send_replace(None).is_some() {
            info!("signed out");
        }
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }
}
