use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::UserProfile;

/// Request-scoped context handed to login listeners. None of the built-in
/// listeners read it today.
#[derive(Debug, Clone, Default)]
pub struct LoginContext {
    pub remote_addr: Option<String>,
    pub auth_provider: Option<String>,
}

/// A participant in the login lifecycle. `user` is `None` when the platform
/// could not resolve a persisted record for the session.
#[async_trait]
pub trait LoginListener: Send + Sync {
    async fn on_user_logged_in(&self, _user: Option<&UserProfile>, _ctx: &LoginContext) {}

    /// Fired only when this login is known to be the user's first visit, so
    /// listeners can skip their own first-visit detection.
    async fn on_user_first_logged_in(&self, _user: Option<&UserProfile>) {}
}

/// Fans login events out to registered listeners, in registration order, on
/// the caller's task. Listeners are infallible by signature; anything that can
/// go wrong inside one must be handled there.
#[derive(Default)]
pub struct LoginDispatcher {
    listeners: Vec<Arc<dyn LoginListener>>,
}

impl LoginDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn LoginListener>) {
        self.listeners.push(listener);
    }

    pub async fn user_logged_in(&self, user: Option<&UserProfile>, ctx: &LoginContext) {
        for listener in &self.listeners {
            listener.on_user_logged_in(user, ctx).await;
        }
    }

    pub async fn user_first_logged_in(&self, user: Option<&UserProfile>) {
        for listener in &self.listeners {
            listener.on_user_first_logged_in(user).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingListener {
        logins: AtomicUsize,
        first_logins: AtomicUsize,
    }

    #[async_trait]
    impl LoginListener for CountingListener {
        async fn on_user_logged_in(&self, _user: Option<&UserProfile>, _ctx: &LoginContext) {
            self.logins.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_user_first_logged_in(&self, _user: Option<&UserProfile>) {
            self.first_logins.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct DefaultListener;

    #[async_trait]
    impl LoginListener for DefaultListener {}

    #[tokio::test]
    async fn dispatches_to_every_registered_listener() {
        let first = Arc::new(CountingListener::default());
        let second = Arc::new(CountingListener::default());

        let mut dispatcher = LoginDispatcher::new();
        dispatcher.register(first.clone());
        dispatcher.register(second.clone());

        dispatcher.user_logged_in(None, &LoginContext::default()).await;
        dispatcher.user_first_logged_in(None).await;

        assert_eq!(first.logins.load(Ordering::SeqCst), 1);
        assert_eq!(second.logins.load(Ordering::SeqCst), 1);
        assert_eq!(first.first_logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_listener_methods_are_no_ops() {
        let mut dispatcher = LoginDispatcher::new();
        dispatcher.register(Arc::new(DefaultListener));

        dispatcher.user_logged_in(None, &LoginContext::default()).await;
        dispatcher.user_first_logged_in(None).await;
    }
}
