//! Controller variants and their registry
//!
//! A variant supplies the controller-specific behaviour of a run: a
//! synchronous [`ControllerVariant::init`] checked before anything starts, and
//! an async [`ControllerVariant::start`] activity driving robots through a
//! [`GatewayHandle`]. Variants are selected by name from a
//! [`ControllerRegistry`].
//!
//! ```rust
//! use dotbot_gateway::{ControllerRegistry, ControllerSettings};
//!
//! let registry = ControllerRegistry::with_builtin();
//! let variant = registry.create("led-cycle", &ControllerSettings::default()).unwrap();
//! assert_eq!(variant.name(), "led-cycle");
//! assert!(registry.create("joystick", &ControllerSettings::default()).is_err());
//! ```

mod variants;

pub use variants::{IdleController, LED_PALETTE, LedCycleController};

use std::collections::BTreeMap;
use tracing::debug;

use crate::handle::GatewayHandle;
use crate::settings::ControllerSettings;
use crate::{GatewayError, Result};

/// Controller-specific behaviour plugged into a run.
#[async_trait::async_trait]
pub trait ControllerVariant: Send + 'static {
    /// Registry name of this variant.
    fn name(&self) -> &'static str;

    /// Prepare the variant. Failures abort the run before any activity starts.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run the variant's activity.
    ///
    /// Returning `Ok` does not end the run. Returning a fatal error cancels
    /// every other activity.
    async fn start(&mut self, gateway: GatewayHandle) -> Result<()>;
}

/// Builds a variant from the controller settings.
pub type VariantConstructor = fn(&ControllerSettings) -> Box<dyn ControllerVariant>;

/// Name to constructor mapping for controller variants.
#[derive(Debug, Clone, Default)]
pub struct ControllerRegistry {
    constructors: BTreeMap<String, VariantConstructor>,
}

impl ControllerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `idle` and `led-cycle` variants.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(IdleController::NAME, |_| Box::new(IdleController));
        registry.register(LedCycleController::NAME, |settings| {
            Box::new(LedCycleController::new(settings))
        });
        registry
    }

    /// Add a variant, replacing any earlier one with the same name.
    pub fn register(&mut self, name: impl Into<String>, constructor: VariantConstructor) {
        let name = name.into();
        if self.constructors.insert(name.clone(), constructor).is_some() {
            debug!(variant = %name, "Controller variant replaced");
        }
    }

    /// Build the variant registered as `name`.
    pub fn create(
        &self,
        name: &str,
        settings: &ControllerSettings,
    ) -> Result<Box<dyn ControllerVariant>> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            GatewayError::configuration(format!(
                "unknown controller '{}', expected one of: {}",
                name,
                self.names().join(", ")
            ))
        })?;
        Ok(constructor(settings))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait::async_trait]
    impl ControllerVariant for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn init(&mut self) -> Result<()> {
            Err(GatewayError::configuration("no joystick attached"))
        }

        async fn start(&mut self, _gateway: GatewayHandle) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn builtin_variants_are_registered() {
        let registry = ControllerRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["idle", "led-cycle"]);
        let idle = registry.create("idle", &ControllerSettings::default()).unwrap();
        assert_eq!(idle.name(), "idle");
    }

    #[test]
    fn unknown_variant_is_a_configuration_error() {
        let registry = ControllerRegistry::with_builtin();
        let err = registry.create("keyboard", &ControllerSettings::default()).err().unwrap();
        assert!(matches!(err, GatewayError::Configuration { .. }));
        assert!(err.to_string().contains("keyboard"));
        assert!(err.to_string().contains("led-cycle"));
    }

    #[test]
    fn custom_variant_can_be_registered() {
        let mut registry = ControllerRegistry::new();
        registry.register("failing", |_| Box::new(Failing));
        let mut variant = registry.create("failing", &ControllerSettings::default()).unwrap();
        assert!(variant.init().unwrap_err().is_fatal());
    }
}
