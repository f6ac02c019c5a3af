//! ConfigService — validated CRUD over the store with change notification.
//!
//! The service is the only writer of configuration. Readers that cache
//! config (the engine's route index) subscribe to [`ConfigChange`]
//! events and reload on change, which makes settings and pipelines
//! hot-reloadable without a restart.

use std::sync::{Arc, RwLock};

use tracing::{debug, info};
use uuid::Uuid;

use shunt_state::{
    HealthCheckConfig, Layer, Pipeline, Route, Settings, Store, now_millis,
};

use crate::error::{ConfigError, ConfigResult};
use crate::validate::{validate_layers, validate_route_name};

/// A configuration change, delivered to subscribers after the store
/// write has committed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    RouteCreated { route_id: String },
    RouteUpdated { route_id: String },
    RouteDeleted { route_id: String },
    PipelineUpdated { route_id: String },
    SettingsUpdated,
    HealthConfigUpdated,
}

type ChangeHandler = Arc<dyn Fn(&ConfigChange) + Send + Sync>;

/// Configuration service, cheap to clone and share across tasks.
#[derive(Clone)]
pub struct ConfigService {
    store: Store,
    handlers: Arc<RwLock<Vec<ChangeHandler>>>,
}

impl ConfigService {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a change handler. Handlers run synchronously after the
    /// store write commits; they must not block.
    pub fn subscribe(&self, handler: impl Fn(&ConfigChange) + Send + Sync + 'static) {
        self.handlers.write().expect("handlers lock").push(Arc::new(handler));
    }

    fn notify(&self, change: ConfigChange) {
        let handlers = self.handlers.read().expect("handlers lock").clone();
        for handler in handlers {
            handler(&change);
        }
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Global settings; defaults apply until something is saved.
    pub fn settings(&self) -> ConfigResult<Settings> {
        Ok(self.store.load_settings()?.unwrap_or_default())
    }

    pub fn update_settings(&self, settings: &Settings) -> ConfigResult<()> {
        self.store.save_settings(settings)?;
        info!(
            enabled = settings.enabled,
            hide_upstream_models = settings.hide_upstream_models,
            "routing settings updated"
        );
        self.notify(ConfigChange::SettingsUpdated);
        Ok(())
    }

    /// Health-check config; defaults apply until something is saved.
    pub fn health_config(&self) -> ConfigResult<HealthCheckConfig> {
        Ok(self.store.load_health_config()?.unwrap_or_default())
    }

    pub fn update_health_config(&self, config: &HealthCheckConfig) -> ConfigResult<()> {
        self.store.save_health_config(config)?;
        info!(
            default_cooldown_seconds = config.default_cooldown_seconds,
            check_interval_seconds = config.check_interval_seconds,
            "health-check config updated"
        );
        self.notify(ConfigChange::HealthConfigUpdated);
        Ok(())
    }

    // ── Routes ─────────────────────────────────────────────────────

    pub fn list_routes(&self) -> ConfigResult<Vec<Route>> {
        Ok(self.store.list_routes()?)
    }

    pub fn get_route(&self, route_id: &str) -> ConfigResult<Route> {
        self.store
            .get_route(route_id)?
            .ok_or_else(|| ConfigError::RouteNotFound(route_id.to_string()))
    }

    /// Create a route with an empty pipeline. Route names are unique
    /// case-insensitively (they double as model aliases).
    pub fn create_route(
        &self,
        name: &str,
        description: &str,
        enabled: bool,
    ) -> ConfigResult<Route> {
        let issues = validate_route_name(name);
        if !issues.is_empty() {
            return Err(ConfigError::Validation(issues));
        }
        let lowered = name.trim().to_lowercase();
        for existing in self.store.list_routes()? {
            if existing.name.to_lowercase() == lowered {
                return Err(ConfigError::RouteAlreadyExists(existing.name));
            }
        }

        let now = now_millis();
        let route = Route {
            id: format!("route-{}", short_id()),
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            enabled,
            created_at: now,
            updated_at: now,
        };
        self.store.put_route(&route)?;
        self.store.put_pipeline(&Pipeline::empty(&route.id))?;
        info!(route_id = %route.id, name = %route.name, "route created");
        self.notify(ConfigChange::RouteCreated {
            route_id: route.id.clone(),
        });
        Ok(route)
    }

    /// Update a route's name/description/enabled flag.
    pub fn update_route(&self, route: &Route) -> ConfigResult<Route> {
        let existing = self.get_route(&route.id)?;

        let issues = validate_route_name(&route.name);
        if !issues.is_empty() {
            return Err(ConfigError::Validation(issues));
        }
        let lowered = route.name.trim().to_lowercase();
        for other in self.store.list_routes()? {
            if other.id != route.id && other.name.to_lowercase() == lowered {
                return Err(ConfigError::RouteAlreadyExists(other.name));
            }
        }

        let updated = Route {
            id: existing.id,
            name: route.name.trim().to_string(),
            description: route.description.trim().to_string(),
            enabled: route.enabled,
            created_at: existing.created_at,
            updated_at: now_millis(),
        };
        self.store.put_route(&updated)?;
        debug!(route_id = %updated.id, "route updated");
        self.notify(ConfigChange::RouteUpdated {
            route_id: updated.id.clone(),
        });
        Ok(updated)
    }

    pub fn delete_route(&self, route_id: &str) -> ConfigResult<()> {
        if !self.store.delete_route(route_id)? {
            return Err(ConfigError::RouteNotFound(route_id.to_string()));
        }
        info!(%route_id, "route deleted");
        self.notify(ConfigChange::RouteDeleted {
            route_id: route_id.to_string(),
        });
        Ok(())
    }

    // ── Pipelines ──────────────────────────────────────────────────

    /// Pipeline for a route; an empty one if none was ever saved.
    pub fn get_pipeline(&self, route_id: &str) -> ConfigResult<Pipeline> {
        // Ensure the route exists so missing routes don't masquerade
        // as empty pipelines.
        self.get_route(route_id)?;
        Ok(self
            .store
            .get_pipeline(route_id)?
            .unwrap_or_else(|| Pipeline::empty(route_id)))
    }

    /// Replace a route's pipeline layers.
    pub fn update_pipeline(&self, route_id: &str, layers: Vec<Layer>) -> ConfigResult<Pipeline> {
        self.get_route(route_id)?;
        let issues = validate_layers(&layers);
        if !issues.is_empty() {
            return Err(ConfigError::Validation(issues));
        }

        let pipeline = Pipeline {
            route_id: route_id.to_string(),
            layers,
        };
        self.store.put_pipeline(&pipeline)?;
        debug!(%route_id, layers = pipeline.layers.len(), "pipeline updated");
        self.notify(ConfigChange::PipelineUpdated {
            route_id: route_id.to_string(),
        });
        Ok(pipeline)
    }
}

/// 8-hex-char id fragment, enough at config scale.
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
