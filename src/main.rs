//! # fleetwire
//!
//! Fleet messaging node: loads settings, starts the configured modules
//! (`relay`, `rig`), and runs until interrupted.

#![deny(unsafe_code)]

mod modules;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fleetwire_core::NodeId;
use fleetwire_settings::FleetSettings;
use tracing::{error, info};

use crate::modules::{Module, ModuleContext, ModuleRegistry};

/// Fleet messaging node.
#[derive(Parser, Debug)]
#[command(name = "fleetwire", about = "Mining fleet relay and rig agent", version)]
struct Cli {
    /// Settings file (defaults to `~/.fleetwire/settings.json`).
    #[arg(long, env = "FLEETWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Module to start; repeat to start several. Overrides `modules` in
    /// settings.
    #[arg(long = "module", value_name = "NAME")]
    modules: Vec<String>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Settings with command-line overrides applied.
    fn settings(&self) -> Result<FleetSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(fleetwire_settings::settings_path);
        let mut settings = fleetwire_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if !self.modules.is_empty() {
            settings.modules.clone_from(&self.modules);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        Ok(settings)
    }
}

/// Build every requested module before starting any, so a typo fails fast.
fn build_modules(registry: &ModuleRegistry, names: &[String]) -> Result<Vec<Box<dyn Module>>> {
    names
        .iter()
        .map(|name| {
            registry.create(name).with_context(|| {
                format!(
                    "Unknown module `{name}` (available: {})",
                    registry.names().join(", ")
                )
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    fleetwire_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let node_id = settings
        .node
        .id
        .clone()
        .map_or_else(NodeId::generate, NodeId::from_raw);
    let mut modules = build_modules(&ModuleRegistry::builtin(), &settings.modules)?;
    let ctx = ModuleContext {
        node_id,
        settings: Arc::new(settings),
    };
    info!(node_id = %ctx.node_id, modules = ?ctx.settings.modules, "fleetwire starting");

    let mut started: Vec<Box<dyn Module>> = Vec::new();
    let mut startup = Ok(());
    for mut module in modules.drain(..) {
        if let Err(err) = module.start(&ctx).await {
            startup = Err(err.context(format!("Failed to start module `{}`", module.name())));
            break;
        }
        info!(module = module.name(), "module started");
        started.push(module);
    }

    if startup.is_ok() {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(err) => error!(error = %err, "failed to listen for interrupt, shutting down"),
        }
    }

    for mut module in started.into_iter().rev() {
        module.stop().await;
        info!(module = module.name(), "module stopped");
    }
    startup
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("fleetwire").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn modules_flag_is_repeatable() {
        let cli = cli(&["--module", "relay", "--module", "rig"]);
        assert_eq!(cli.modules, vec!["relay", "rig"]);
    }

    #[test]
    fn settings_file_and_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"modules": ["relay"], "relay": {{"priority": 3}}}}"#).unwrap();
        let path = file.path().to_str().unwrap();

        let settings = cli(&["--config", path]).settings().unwrap();
        assert_eq!(settings.modules, vec!["relay"]);
        assert_eq!(settings.relay.priority, 3);

        let settings = cli(&["--config", path, "--module", "rig", "--log-level", "debug"])
            .settings()
            .unwrap();
        assert_eq!(settings.modules, vec!["rig"]);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let path = file.path().to_str().unwrap();
        assert!(cli(&["--config", path]).settings().is_err());
    }

    #[test]
    fn unknown_module_fails_before_start() {
        let registry = ModuleRegistry::builtin();
        let err = build_modules(&registry, &["relay".into(), "overclock".into()])
            .err()
            .unwrap();
        assert!(err.to_string().contains("overclock"));
    }
}
