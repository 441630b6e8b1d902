use std::sync::Arc;

use shared::route::Route;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::{ClientEvent, SessionStore};

/// Owns the active [`Route`] and applies the authentication gate.
///
/// The requested route is always recorded as asked; the gate is applied when
/// the effective route is read, so the two can differ while signed out.
pub struct NavigationController {
    session: Arc<SessionStore>,
    requested: RwLock<Route>,
    events: broadcast::Sender<ClientEvent>,
}

impl NavigationController {
    pub fn new(
        session: Arc<SessionStore>,
        initial: Route,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            session,
            requested: RwLock::new(initial),
            events,
        }
    }

    /// Starting route once session restore has finished.
    pub async fn initial_route(session: &SessionStore) -> Route {
        if session.is_authenticated().await {
            Route::Dashboard
        } else {
            Route::Auth
        }
    }

    /// Records `route` and returns what will actually be rendered.
    pub async fn navigate(&self, route: Route) -> Route {
        debug!("navigation: requested route={route}");
        *self.requested.write().await = route;
        let effective = self.current_route().await;
        let _ = self.events.send(ClientEvent::RouteChanged(effective.clone()));
        effective
    }

    pub async fn requested_route(&self) -> Route {
        self.requested.read().await.clone()
    }

    pub async fn current_route(&self) -> Route {
        let requested = self.requested.read().await.clone();
        if requested.requires_session() && !self.session.is_authenticated().await {
            return Route::Auth;
        }
        requested
    }

    /// A fresh sign-in always lands on the dashboard; earlier requests are dropped.
    pub async fn on_authenticated(&self) -> Route {
        info!("navigation: authenticated, showing dashboard");
        self.navigate(Route::Dashboard).await
    }

    pub async fn on_logged_out(&self) -> Route {
        info!("navigation: logged out, showing auth");
        self.navigate(Route::Auth).await
    }
}

#[cfg(test)]
#[path = "tests/navigation_tests.rs"]
mod tests;
