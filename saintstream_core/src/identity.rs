//! Current user identity as seen by the assistant.

use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

impl Identity {
    #[must_use]
    pub const fn guest() -> Self {
        Self {
            user_id: None,
            display_name: None,
        }
    }

    pub fn signed_in(user_id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            display_name,
        }
    }

    #[must_use]
    pub const fn is_signed_in(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Pull-based access to the authenticated identity plus a change channel.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Identity;
    fn subscribe(&self) -> watch::Receiver<Identity>;
}

/// Identity source backed by a watch channel; sign-in flows push into it.
#[derive(Debug)]
pub struct IdentityHandle {
    tx: watch::Sender<Identity>,
}

impl IdentityHandle {
    #[must_use]
    pub fn new(initial: Identity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn sign_in(&self, user_id: impl Into<String>, display_name: Option<String>) {
        let identity = Identity::signed_in(user_id, display_name);
        info!("Identity changed: signed in as {:?}", identity.user_id);
        self.tx.send_replace(identity);
    }

    pub fn sign_out(&self) {
        info!("Identity changed: signed out");
        self.tx.send_replace(Identity::guest());
    }

    /// Number of live change subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for IdentityHandle {
    fn default() -> Self {
        Self::new(Identity::guest())
    }
}

impl IdentityProvider for IdentityHandle {
    fn current(&self) -> Identity {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Identity> {
        self.tx.subscribe()
    }
}
