//! Runnable roles and the static registry that names them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::NodeId;
use fleetwire_settings::FleetSettings;

pub mod relay;
pub mod rig;

/// What every module gets at start.
#[derive(Clone, Debug)]
pub struct ModuleContext {
    /// Identity of this process.
    pub node_id: NodeId,
    /// Loaded settings.
    pub settings: Arc<FleetSettings>,
}

/// A role this process can run.
#[async_trait]
pub trait Module: Send {
    /// Registry identifier.
    fn name(&self) -> &'static str;

    /// Start the module's tasks.
    async fn start(&mut self, ctx: &ModuleContext) -> anyhow::Result<()>;

    /// Stop the module's tasks. Safe to call when not started.
    async fn stop(&mut self);
}

/// Builds a fresh, unstarted module.
pub type ModuleConstructor = fn() -> Box<dyn Module>;

/// Identifier → constructor for every module compiled into the binary.
pub struct ModuleRegistry {
    constructors: BTreeMap<&'static str, ModuleConstructor>,
}

impl ModuleRegistry {
    /// Registry of the built-in modules.
    pub fn builtin() -> Self {
        let mut constructors: BTreeMap<&'static str, ModuleConstructor> = BTreeMap::new();
        let _ = constructors.insert(relay::NAME, new_relay);
        let _ = constructors.insert(rig::NAME, new_rig);
        Self { constructors }
    }

    /// Construct the module registered as `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn Module>> {
        self.constructors.get(name).map(|construct| construct())
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }
}

fn new_relay() -> Box<dyn Module> {
    Box::new(relay::RelayModule::default())
}

fn new_rig() -> Box<dyn Module> {
    Box::new(rig::RigModule::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_modules() {
        let registry = ModuleRegistry::builtin();
        assert_eq!(registry.names(), vec!["relay", "rig"]);
        assert_eq!(registry.create("relay").map(|m| m.name()), Some("relay"));
        assert_eq!(registry.create("rig").map(|m| m.name()), Some("rig"));
    }

    #[test]
    fn unknown_module() {
        assert!(ModuleRegistry::builtin().create("overclock").is_none());
    }
}
