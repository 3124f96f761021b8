//! The adapter contract and its optional capabilities.
//!
//! An adapter opts into each lifecycle step by returning `Some(self)` from
//! the matching `as_*` probe. The registry only ever asks; anything an
//! adapter doesn't expose is skipped.
//!
//! ```
//! use adapta::{overlay, Adapter, Configurable};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Serialize, Deserialize)]
//! struct Spec {
//!     region: String,
//! }
//!
//! #[derive(Default)]
//! struct Bucket {
//!     spec: Spec,
//! }
//!
//! impl Configurable for Bucket {
//!     fn configure(&mut self, spec: &serde_json::Value) -> serde_json::Result<()> {
//!         overlay(&mut self.spec, spec)
//!     }
//! }
//!
//! impl Adapter for Bucket {
//!     fn as_configurable(&mut self) -> Option<&mut dyn Configurable> {
//!         Some(self)
//!     }
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::deps::Fields;
use crate::HookError;

/// Zero-cost constructor for an adapter kind. Must not do I/O.
pub type Factory = Arc<dyn Fn() -> Box<dyn Adapter> + Send + Sync>;

/// Conversions to [`Any`] for adapters, implemented for every sized type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A component the registry can construct, configure and wire.
pub trait Adapter: AsAny + Send + Sync {
    fn as_configurable(&mut self) -> Option<&mut dyn Configurable> {
        None
    }

    fn as_item_configurable(&mut self) -> Option<&mut dyn ItemConfigurable> {
        None
    }

    fn as_contextual(&mut self) -> Option<&mut dyn Contextual> {
        None
    }

    fn as_depender(&mut self) -> Option<&mut dyn Depender> {
        None
    }

    fn as_hydratable(&mut self) -> Option<&mut dyn Hydratable> {
        None
    }

    /// Typed dependency fields of this adapter.
    ///
    /// Called once when the adapter is registered; the table is reused for
    /// every instance.
    fn fields() -> Fields<Self>
    where
        Self: Sized,
    {
        Fields::new()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Accepts the adapter-level `spec` payload.
pub trait Configurable {
    fn configure(&mut self, spec: &Value) -> serde_json::Result<()>;
}

/// Accepts the `spec` payload of a named item config.
///
/// Called whenever an item document was found, with `Value::Null` when it
/// has no payload, so adapters can capture `name`. Runs after
/// [`Configurable::configure`].
pub trait ItemConfigurable {
    fn configure_item(&mut self, name: &str, spec: &Value) -> serde_json::Result<()>;
}

/// Accepts the resolved working context.
///
/// Context-aware adapters get one instance per distinct context.
pub trait Contextual {
    fn set_context(&mut self, path: &Path);
}

/// Receives dependencies by name, for open-ended dependency sets.
pub trait Depender {
    fn add_dependency(&mut self, name: &str, adapter: Arc<dyn Adapter>);
}

/// First-use initialization, run once after wiring and before caching.
pub trait Hydratable {
    fn hydrate(&mut self) -> Result<(), HookError>;
}

/// Which optional capabilities an adapter exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub configurable: bool,
    pub item_configurable: bool,
    pub contextual: bool,
    pub depender: bool,
    pub hydratable: bool,
}

impl Capabilities {
    pub fn probe(adapter: &mut dyn Adapter) -> Self {
        Self {
            configurable: adapter.as_configurable().is_some(),
            item_configurable: adapter.as_item_configurable().is_some(),
            contextual: adapter.as_contextual().is_some(),
            depender: adapter.as_depender().is_some(),
            hydratable: adapter.as_hydratable().is_some(),
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.configurable, "Configurable"),
            (self.item_configurable, "ItemConfigurable"),
            (self.contextual, "Contextual"),
            (self.depender, "Depender"),
            (self.hydratable, "Hydratable"),
        ];
        let present: Vec<_> = names
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&present.join(","))
    }
}

/// Decodes `patch` on top of `target`.
///
/// Keys present in `patch` replace the current values (objects merge
/// recursively), keys it omits keep their current values. `null` is a no-op.
pub fn overlay<T>(target: &mut T, patch: &Value) -> serde_json::Result<()>
where
    T: Serialize + DeserializeOwned,
{
    if patch.is_null() {
        return Ok(());
    }
    let mut current = serde_json::to_value(&*target)?;
    merge_json(&mut current, patch);
    *target = serde_json::from_value(current)?;
    Ok(())
}

fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Spec {
        foo: String,
        label: String,
        limits: Limits,
    }

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Limits {
        cpu: u32,
        mem: u32,
    }

    #[test]
    fn test_overlay_shadows_and_keeps() {
        let mut spec = Spec::default();
        overlay(&mut spec, &json!({"foo": "global-foo", "limits": {"cpu": 2, "mem": 4}})).unwrap();
        overlay(&mut spec, &json!({"foo": "item-foo", "label": "instance-1", "limits": {"mem": 8}}))
            .unwrap();

        assert_eq!(spec.foo, "item-foo");
        assert_eq!(spec.label, "instance-1");
        assert_eq!(spec.limits, Limits { cpu: 2, mem: 8 });
    }

    #[test]
    fn test_overlay_null_is_noop() {
        let mut spec = Spec {
            foo: "kept".into(),
            ..Spec::default()
        };
        overlay(&mut spec, &Value::Null).unwrap();
        assert_eq!(spec.foo, "kept");
    }

    #[test]
    fn test_overlay_type_error() {
        let mut spec = Spec::default();
        assert!(overlay(&mut spec, &json!({"limits": {"cpu": "lots"}})).is_err());
    }

    struct Plain;
    impl Adapter for Plain {}

    struct Aware(Option<std::path::PathBuf>);
    impl Contextual for Aware {
        fn set_context(&mut self, path: &Path) {
            self.0 = Some(path.to_path_buf());
        }
    }
    impl Adapter for Aware {
        fn as_contextual(&mut self) -> Option<&mut dyn Contextual> {
            Some(self)
        }
    }

    #[test]
    fn test_capability_probe() {
        assert_eq!(Capabilities::probe(&mut Plain), Capabilities::default());

        let caps = Capabilities::probe(&mut Aware(None));
        assert!(caps.contextual);
        assert!(!caps.configurable);
        assert_eq!(caps.to_string(), "Contextual");
    }
}
