//! The adapter registry: factories, instance cache and construction lifecycle.

mod cache;

use std::any::type_name;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde_json::Value;

use crate::adapter::{Adapter, Capabilities, Factory};
use crate::deps::{self, FieldTable};
use crate::index::{FileSystem, OsFs, SearchIndex};
use crate::meta::{ContextOverrides, MetaHeader, MetaLoader};
use crate::settings::{RegistrySettings, DEFAULT_CONTEXT_MAP_VAR, DEFAULT_EXTENSION};
use crate::{Error, Result};

use cache::{cache_key, InstanceCache, Probe};

#[derive(Clone)]
struct Registration {
    factory: Factory,
    fields: Arc<dyn FieldTable>,
}

/// Constructs, configures, wires and caches adapters.
///
/// Each distinct (adapter, item, context) triple is built at most once; every
/// later request for it gets the same `Arc`.
///
/// ```no_run
/// use adapta::{Adapter, Registry};
///
/// #[derive(Default)]
/// struct Gcs;
/// impl Adapter for Gcs {}
///
/// let registry = Registry::builder().config_root("deploy/configs").build()?;
/// registry.register_default::<Gcs>("gcs");
///
/// let bucket = registry.get_as::<Gcs>("gcs", &["buckets/assets"])?;
/// # Ok::<(), adapta::Error>(())
/// ```
pub struct Registry {
    factories: RwLock<HashMap<String, Registration>>,
    cache: InstanceCache,
    loader: RwLock<Option<Arc<MetaLoader>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = factories.keys().collect();
        ids.sort();
        f.debug_struct("Registry")
            .field("factories", &ids)
            .field("cached", &self.cache.ready_keys())
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry with no config root; every config lookup comes back absent.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            cache: InstanceCache::default(),
            loader: RwLock::new(None),
        }
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Builds a registry from loaded [`RegistrySettings`].
    pub fn from_settings(settings: &RegistrySettings) -> Result<Self> {
        Self::builder()
            .config_root(&settings.config_root)
            .extension(&settings.extension)
            .context_map_var(&settings.context_map_var)
            .build()
    }

    /// Process-wide registry for callers that don't thread one through.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Indexes `root` and uses it for all subsequent config lookups.
    pub fn set_config_root(&self, root: impl AsRef<Path>) -> Result<()> {
        let overrides = ContextOverrides::from_env(DEFAULT_CONTEXT_MAP_VAR)?;
        let loader = build_loader(Arc::new(OsFs), root.as_ref(), DEFAULT_EXTENSION, overrides)?;
        self.set_loader(loader);
        Ok(())
    }

    pub fn set_loader(&self, loader: MetaLoader) {
        *self.loader.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(loader));
    }

    fn loader(&self) -> Option<Arc<MetaLoader>> {
        self.loader
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registers a factory under a case-insensitive id, replacing any previous one.
    ///
    /// The factory must be cheap: it is called on every request to probe
    /// capabilities, and its result is kept only on a cache miss.
    pub fn register<T, F>(&self, adapter_id: &str, factory: F)
    where
        T: Adapter,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let registration = Registration {
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Adapter>),
            fields: Arc::new(T::fields()),
        };
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(adapter_id.to_lowercase(), registration);
    }

    pub fn register_default<T: Adapter + Default>(&self, adapter_id: &str) {
        self.register(adapter_id, T::default);
    }

    pub fn is_registered(&self, adapter_id: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&adapter_id.to_lowercase())
    }

    fn registration(&self, adapter_id: &str) -> Result<Registration> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&adapter_id.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::UnknownAdapter(adapter_id.to_string()))
    }

    /// Constructs or reuses the adapter `adapter_id`.
    ///
    /// For item-configurable adapters the first argument names the item
    /// config to load.
    pub fn get(&self, adapter_id: &str, args: &[&str]) -> Result<Arc<dyn Adapter>> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.build(adapter_id, &args, None, &mut Vec::new())
    }

    /// Like [`get`](Self::get), downcast to the concrete adapter type.
    pub fn get_as<T: Adapter>(&self, adapter_id: &str, args: &[&str]) -> Result<Arc<T>> {
        self.get(adapter_id, args)?
            .into_any()
            .downcast::<T>()
            .map_err(|_| Error::AdapterType {
                adapter: adapter_id.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Headers of every config document targeting `adapter_id`, sorted by full key.
    pub fn load_all_meta(&self, adapter_id: &str) -> Result<Vec<MetaHeader>> {
        let Some(loader) = self.loader() else {
            return Ok(Vec::new());
        };
        Ok(loader
            .load_all(Some(adapter_id))?
            .into_iter()
            .map(|(_, header)| header)
            .collect())
    }

    /// Constructs an instance for every config document targeting `adapter_id`.
    ///
    /// Items that fail to construct are logged and left out.
    pub fn load_all<T: Adapter>(&self, adapter_id: &str) -> Result<Vec<Arc<T>>> {
        let Some(loader) = self.loader() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for (key, _) in loader.load_all(Some(adapter_id))? {
            match self.get_as::<T>(adapter_id, &[key.as_str()]) {
                Ok(adapter) => out.push(adapter),
                Err(err) => {
                    tracing::error!(adapter = adapter_id, item = %key, error = %err, "skipping item");
                }
            }
        }
        Ok(out)
    }

    /// Cache keys of every ready instance, sorted.
    pub fn cached_keys(&self) -> Vec<String> {
        self.cache.ready_keys()
    }

    /// Forgets every cached instance; the next request builds afresh.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn build(
        &self,
        adapter_id: &str,
        args: &[String],
        parent_context: Option<&Path>,
        chain: &mut Vec<String>,
    ) -> Result<Arc<dyn Adapter>> {
        let registration = self.registration(adapter_id)?;
        let mut adapter = (registration.factory)();
        let caps = Capabilities::probe(&mut *adapter);
        tracing::debug!(adapter = adapter_id, capabilities = %caps, ?args, "request adapter");

        let loader = self.loader();
        let meta = match &loader {
            Some(loader) => loader.load_optional(adapter_id, true)?,
            None => None,
        };
        let item_meta = match (&loader, args.first()) {
            (Some(loader), Some(item)) if caps.item_configurable => {
                loader.load_optional(item, true)?
            }
            _ => None,
        };

        let context = resolve_context(parent_context, [meta.as_ref(), item_meta.as_ref()]);
        let key = cache_key(
            adapter_id,
            item_meta.as_ref().map(|m| m.key.as_str()),
            caps.contextual,
            context.as_deref(),
        );

        if chain.contains(&key) {
            let mut cycle = chain.clone();
            cycle.push(key);
            return Err(Error::CyclicDependency { chain: cycle });
        }

        let reservation = match self.cache.probe_or_reserve(&key) {
            Probe::Ready(existing) => {
                tracing::debug!(adapter = adapter_id, key = %key, "reusing adapter");
                return Ok(existing);
            }
            Probe::Reserved(reservation) => reservation,
        };
        tracing::debug!(adapter = adapter_id, key = %reservation.key(), "creating adapter");

        chain.push(key);
        let built = self.construct(
            adapter_id,
            &mut *adapter,
            &registration,
            Plan {
                meta: meta.as_ref(),
                item_meta: item_meta.as_ref(),
                context: context.as_deref(),
            },
            chain,
        );
        chain.pop();
        built?;

        let adapter: Arc<dyn Adapter> = Arc::from(adapter);
        reservation.fulfill(Arc::clone(&adapter));
        Ok(adapter)
    }

    fn construct(
        &self,
        adapter_id: &str,
        adapter: &mut dyn Adapter,
        registration: &Registration,
        plan: Plan<'_>,
        chain: &mut Vec<String>,
    ) -> Result<()> {
        apply_config(adapter_id, adapter, plan.meta, plan.item_meta)?;

        if let (Some(context), Some(contextual)) = (plan.context, adapter.as_contextual()) {
            tracing::debug!(adapter = adapter_id, context = %context.display(), "setting context");
            contextual.set_context(context);
        }

        let mut declared = BTreeMap::new();
        for meta in [plan.meta, plan.item_meta].into_iter().flatten() {
            declared.extend(meta.dependencies.clone());
        }
        let wanted = deps::merge(&declared, registration.fields.inferred());

        let resolved = deps::resolve(adapter_id, &wanted, |dep| {
            self.build(&dep.adapter_id, &dep.construction_args(), plan.context, chain)
        })?;
        let has_sink = deps::inject_by_name(adapter, &resolved);
        deps::inject_by_field(adapter_id, adapter, registration.fields.as_ref(), &resolved, !has_sink)?;

        deps::validate_required(adapter_id, adapter, registration.fields.as_ref())?;

        if let Some(hydratable) = adapter.as_hydratable() {
            tracing::debug!(adapter = adapter_id, "hydrating adapter");
            hydratable.hydrate().map_err(|source| Error::Hydration {
                adapter: adapter_id.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Config documents and context that drive one construction.
#[derive(Clone, Copy)]
struct Plan<'a> {
    meta: Option<&'a MetaHeader>,
    item_meta: Option<&'a MetaHeader>,
    context: Option<&'a Path>,
}

/// Parent context, overridden by the adapter document, overridden by the item document.
fn resolve_context<'a>(
    parent: Option<&Path>,
    metas: impl IntoIterator<Item = Option<&'a MetaHeader>>,
) -> Option<PathBuf> {
    metas
        .into_iter()
        .flatten()
        .filter_map(|m| m.context.clone())
        .last()
        .or_else(|| parent.map(Path::to_path_buf))
}

/// Adapter-level payload first, then the item payload into the same state.
fn apply_config(
    adapter_id: &str,
    adapter: &mut dyn Adapter,
    meta: Option<&MetaHeader>,
    item_meta: Option<&MetaHeader>,
) -> Result<()> {
    if let (Some(spec), Some(configurable)) = (meta.and_then(MetaHeader::spec), adapter.as_configurable()) {
        tracing::debug!(adapter = adapter_id, "setting config");
        configurable.configure(spec).map_err(|source| Error::Spec {
            adapter: adapter_id.to_string(),
            target: adapter_id.to_string(),
            source,
        })?;
    }

    if let (Some(item), Some(configurable)) = (item_meta, adapter.as_item_configurable()) {
        tracing::debug!(adapter = adapter_id, item = %item.name, "setting item config");
        configurable
            .configure_item(&item.name, item.spec().unwrap_or(&Value::Null))
            .map_err(|source| Error::Spec {
                adapter: adapter_id.to_string(),
                target: item.name.clone(),
                source,
            })?;
    }
    Ok(())
}

fn build_loader(
    fs: Arc<dyn FileSystem>,
    root: &Path,
    extension: &str,
    overrides: ContextOverrides,
) -> Result<MetaLoader> {
    let index = SearchIndex::build(fs.as_ref(), root, extension)?;
    Ok(MetaLoader::new(index, fs, overrides))
}

/// Builder for [`Registry`].
#[derive(Debug)]
#[must_use = "builders do nothing until .build() is called"]
pub struct RegistryBuilder {
    config_root: Option<PathBuf>,
    extension: String,
    context_map_var: String,
    overrides: Option<ContextOverrides>,
    fs: Arc<dyn FileSystem>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            config_root: None,
            extension: DEFAULT_EXTENSION.to_string(),
            context_map_var: DEFAULT_CONTEXT_MAP_VAR.to_string(),
            overrides: None,
            fs: Arc::new(OsFs),
        }
    }
}

impl RegistryBuilder {
    /// Directory holding the config documents. Without one, configs are absent.
    pub fn config_root(mut self, root: impl AsRef<Path>) -> Self {
        self.config_root = Some(root.as_ref().to_path_buf());
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Environment variable to read context overrides from, unless
    /// [`context_overrides`](Self::context_overrides) is given.
    pub fn context_map_var(mut self, var: impl Into<String>) -> Self {
        self.context_map_var = var.into();
        self
    }

    pub fn context_overrides(mut self, overrides: ContextOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn filesystem(mut self, fs: impl FileSystem + 'static) -> Self {
        self.fs = Arc::new(fs);
        self
    }

    pub fn build(self) -> Result<Registry> {
        let registry = Registry::new();
        if let Some(root) = &self.config_root {
            let overrides = match self.overrides {
                Some(overrides) => overrides,
                None => ContextOverrides::from_env(&self.context_map_var)?,
            };
            registry.set_loader(build_loader(self.fs, root, &self.extension, overrides)?);
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Configurable, Contextual, Hydratable};
    use crate::overlay;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    static SLOW_HYDRATIONS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Slow;

    impl Hydratable for Slow {
        fn hydrate(&mut self) -> Result<(), crate::HookError> {
            thread::sleep(Duration::from_millis(30));
            SLOW_HYDRATIONS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Adapter for Slow {
        fn as_hydratable(&mut self) -> Option<&mut dyn Hydratable> {
            Some(self)
        }
    }

    #[derive(Default, Serialize, Deserialize)]
    struct Knobs {
        level: u8,
    }

    #[derive(Default)]
    struct Tuned {
        knobs: Knobs,
        context: Option<PathBuf>,
    }

    impl Configurable for Tuned {
        fn configure(&mut self, spec: &Value) -> serde_json::Result<()> {
            overlay(&mut self.knobs, spec)
        }
    }

    impl Contextual for Tuned {
        fn set_context(&mut self, path: &Path) {
            self.context = Some(path.to_path_buf());
        }
    }

    impl Adapter for Tuned {
        fn as_configurable(&mut self) -> Option<&mut dyn Configurable> {
            Some(self)
        }

        fn as_contextual(&mut self) -> Option<&mut dyn Contextual> {
            Some(self)
        }
    }

    #[test]
    fn test_unknown_adapter() {
        let registry = Registry::new();
        let err = registry.get("nope", &[]).err().unwrap();
        assert!(matches!(err, Error::UnknownAdapter(id) if id == "nope"));
    }

    #[test]
    fn test_ids_are_case_insensitive() {
        let registry = Registry::new();
        registry.register_default::<Tuned>("Tuned");

        assert!(registry.is_registered("TUNED"));
        let a = registry.get_as::<Tuned>("tuned", &[]).unwrap();
        let b = registry.get_as::<Tuned>("TUNED", &[]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.cached_keys(), vec!["tuned"]);
    }

    #[test]
    fn test_wrong_type_requested() {
        let registry = Registry::new();
        registry.register_default::<Tuned>("tuned");

        let err = registry.get_as::<Slow>("tuned", &[]).err().unwrap();
        assert!(matches!(err, Error::AdapterType { adapter, .. } if adapter == "tuned"));
    }

    #[test]
    fn test_without_config_root_configs_are_absent() {
        let registry = Registry::new();
        registry.register_default::<Tuned>("tuned");

        let tuned = registry.get_as::<Tuned>("tuned", &["anything"]).unwrap();
        assert_eq!(tuned.knobs.level, 0);
        assert_eq!(tuned.context, None);
        assert!(registry.load_all::<Tuned>("tuned").unwrap().is_empty());
        assert!(registry.load_all_meta("tuned").unwrap().is_empty());
    }

    #[test]
    fn test_clear_cache_rebuilds() {
        let registry = Registry::new();
        registry.register_default::<Tuned>("tuned");

        let first = registry.get_as::<Tuned>("tuned", &[]).unwrap();
        registry.clear_cache();
        assert!(registry.cached_keys().is_empty());
        let second = registry.get_as::<Tuned>("tuned", &[]).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_concurrent_requests_build_once() {
        let registry = Registry::new();
        registry.register_default::<Slow>("slow");

        let instances: Vec<Arc<Slow>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| registry.get_as::<Slow>("slow", &[]).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(SLOW_HYDRATIONS.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_from_settings_and_set_config_root() {
        let configs = tempfile::TempDir::new().unwrap();
        std::fs::write(
            configs.path().join("tuned.cfg"),
            r#"{"spec": {"level": 3}, "context": "work"}"#,
        )
        .unwrap();

        let settings_file = configs.path().join("settings.toml");
        std::fs::write(
            &settings_file,
            format!(
                "config_root = {:?}\nextension = \"cfg\"\n",
                configs.path().display().to_string()
            ),
        )
        .unwrap();

        let settings = RegistrySettings::load(&settings_file).unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        registry.register_default::<Tuned>("tuned");

        let tuned = registry.get_as::<Tuned>("tuned", &[]).unwrap();
        assert_eq!(tuned.knobs.level, 3);
        assert!(tuned.context.as_ref().unwrap().ends_with("work"));

        // Plain `.json` lookups see nothing in this tree.
        let json_only = Registry::new();
        json_only.set_config_root(configs.path()).unwrap();
        assert!(json_only.load_all_meta("tuned").unwrap().is_empty());
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(Registry::global(), Registry::global()));
    }

    #[test]
    fn test_resolve_context_precedence() {
        let parent = PathBuf::from("/parent");
        let adapter_level = MetaHeader {
            context: Some(PathBuf::from("/adapter")),
            ..MetaHeader::default()
        };
        let item_level = MetaHeader {
            context: Some(PathBuf::from("/item")),
            ..MetaHeader::default()
        };
        let silent = MetaHeader::default();

        assert_eq!(resolve_context(Some(parent.as_path()), [None, None]), Some(parent.clone()));
        assert_eq!(
            resolve_context(Some(parent.as_path()), [Some(&adapter_level), Some(&silent)]),
            Some(PathBuf::from("/adapter"))
        );
        assert_eq!(
            resolve_context(Some(parent.as_path()), [Some(&adapter_level), Some(&item_level)]),
            Some(PathBuf::from("/item"))
        );
        assert_eq!(resolve_context(None, [Some(&silent), None]), None);
    }
}
