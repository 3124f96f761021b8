//! Dependency declaration, merging and injection.
//!
//! Adapters declare typed dependency slots once per type with [`Fields`].
//! Each slot carries a tag with the grammar:
//!
//! - `"lister-adp"`: infer a dependency on adapter `lister-adp`
//! - `"required"`: no inferred adapter, but the slot must be filled
//! - `"lister-adp,required"`: both
//!
//! With two or more comma-separated tokens the first token is always the
//! adapter id. Dependencies declared in config take precedence over inferred
//! ones for the same slot.

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use heck::ToSnakeCase;

use crate::adapter::Adapter;
use crate::meta::DepRef;
use crate::{Error, Result};

/// Parsed form of a field tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    pub adapter_id: Option<String>,
    pub required: bool,
}

impl Tag {
    pub fn parse(tag: &str) -> Self {
        let tokens: Vec<&str> = tag.split(',').map(str::trim).collect();
        match tokens.as_slice() {
            [] | [""] => Self::default(),
            [single] if single.eq_ignore_ascii_case("required") => Self {
                adapter_id: None,
                required: true,
            },
            [single] => Self {
                adapter_id: Some(single.to_string()),
                required: false,
            },
            [first, rest @ ..] => Self {
                adapter_id: Some(first.to_string()).filter(|id| !id.is_empty()),
                required: rest.iter().any(|t| t.eq_ignore_ascii_case("required")),
            },
        }
    }
}

/// Maps a dependency key to the field it fills: `ListerProvider`,
/// `lister-provider` and `lister_provider` all name `lister_provider`.
pub fn field_key(dependency: &str) -> String {
    dependency.to_snake_case()
}

type Assign<T> = Box<dyn Fn(&mut T, Arc<dyn Adapter>) -> bool + Send + Sync>;
type IsSet<T> = Box<dyn Fn(&mut T) -> bool + Send + Sync>;

struct Slot<T> {
    name: &'static str,
    tag: Tag,
    expected: &'static str,
    assign: Assign<T>,
    is_set: IsSet<T>,
}

/// Typed dependency slots of adapter type `T`.
///
/// ```
/// use std::sync::Arc;
/// use adapta::{Adapter, Fields};
///
/// struct Store;
/// impl Adapter for Store {}
///
/// #[derive(Default)]
/// struct Api {
///     store: Option<Arc<Store>>,
/// }
///
/// impl Adapter for Api {
///     fn fields() -> Fields<Self> {
///         Fields::<Self>::new().field("store", "store,required", |api| &mut api.store)
///     }
/// }
/// ```
pub struct Fields<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Default for Fields<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> fmt::Debug for Fields<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|s| (s.name, &s.tag, s.expected)))
            .finish()
    }
}

impl<T: Adapter> Fields<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot holding a concrete adapter type.
    pub fn field<D: Adapter>(
        self,
        name: &'static str,
        tag: &str,
        slot: fn(&mut T) -> &mut Option<Arc<D>>,
    ) -> Self {
        self.field_as(name, tag, slot, |dep| dep.into_any().downcast::<D>().ok())
    }

    /// A slot holding any type reachable from an adapter through `cast`,
    /// typically a trait object such as `Arc<dyn Lister>`.
    pub fn field_as<D: ?Sized + 'static>(
        mut self,
        name: &'static str,
        tag: &str,
        slot: fn(&mut T) -> &mut Option<Arc<D>>,
        cast: fn(Arc<dyn Adapter>) -> Option<Arc<D>>,
    ) -> Self {
        self.slots.push(Slot {
            name,
            tag: Tag::parse(tag),
            expected: type_name::<Arc<D>>(),
            assign: Box::new(move |target, dep| match cast(dep) {
                Some(value) => {
                    *slot(target) = Some(value);
                    true
                }
                None => false,
            }),
            is_set: Box::new(move |target| slot(target).is_some()),
        });
        self
    }
}

/// Type-erased view of a [`Fields`] table, as stored by the registry.
pub(crate) trait FieldTable: Send + Sync {
    fn inferred(&self) -> BTreeMap<String, DepRef>;

    fn has_field(&self, field: &str) -> bool;

    /// Fills `field`. `Err(expected)` names the slot type when `dep` doesn't fit.
    fn assign(
        &self,
        target: &mut dyn Adapter,
        field: &str,
        dep: Arc<dyn Adapter>,
    ) -> Result<(), &'static str>;

    /// First required slot still empty, if any.
    fn first_unset_required(&self, target: &mut dyn Adapter) -> Option<&'static str>;
}

impl<T: Adapter> Fields<T> {
    /// Slot names compare after the same normalization as dependency keys.
    fn slot(&self, field: &str) -> Option<&Slot<T>> {
        self.slots.iter().find(|s| field_key(s.name) == field)
    }
}

impl<T: Adapter> FieldTable for Fields<T> {
    fn inferred(&self) -> BTreeMap<String, DepRef> {
        self.slots
            .iter()
            .filter_map(|s| {
                let id = s.tag.adapter_id.as_ref()?;
                Some((field_key(s.name), DepRef::new(id.clone())))
            })
            .collect()
    }

    fn has_field(&self, field: &str) -> bool {
        self.slot(field).is_some()
    }

    fn assign(
        &self,
        target: &mut dyn Adapter,
        field: &str,
        dep: Arc<dyn Adapter>,
    ) -> Result<(), &'static str> {
        let (Some(slot), Some(target)) = (self.slot(field), target.as_any_mut().downcast_mut::<T>())
        else {
            return Err(type_name::<T>());
        };
        if (slot.assign)(target, dep) {
            Ok(())
        } else {
            Err(slot.expected)
        }
    }

    fn first_unset_required(&self, target: &mut dyn Adapter) -> Option<&'static str> {
        let target = target.as_any_mut().downcast_mut::<T>()?;
        self.slots
            .iter()
            .filter(|s| s.tag.required)
            .find(|s| !(s.is_set)(target))
            .map(|s| s.name)
    }
}

/// Declared dependencies win; inferred ones fill slots nothing declared.
pub fn merge(
    declared: &BTreeMap<String, DepRef>,
    inferred: BTreeMap<String, DepRef>,
) -> BTreeMap<String, DepRef> {
    let mut out = declared.clone();
    for (name, dep) in inferred {
        let covered = declared.keys().any(|k| field_key(k) == field_key(&name));
        if !covered {
            out.entry(name).or_insert(dep);
        }
    }
    out
}

/// A dependency after construction.
#[derive(Clone)]
pub struct Resolved {
    pub name: String,
    pub adapter_id: String,
    pub adapter: Arc<dyn Adapter>,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("name", &self.name)
            .field("adapter_id", &self.adapter_id)
            .field("type", &self.adapter.type_name())
            .finish()
    }
}

/// Constructs every dependency through `construct`, in key order.
pub fn resolve<F>(owner: &str, deps: &BTreeMap<String, DepRef>, mut construct: F) -> Result<Vec<Resolved>>
where
    F: FnMut(&DepRef) -> Result<Arc<dyn Adapter>>,
{
    deps.iter()
        .map(|(name, dep)| {
            let adapter = construct(dep).map_err(|source| Error::Dependency {
                adapter: owner.to_string(),
                name: name.clone(),
                source: Box::new(source),
            })?;
            Ok(Resolved {
                name: name.clone(),
                adapter_id: dep.adapter_id.clone(),
                adapter,
            })
        })
        .collect()
}

/// Hands each dependency to the adapter's name-keyed sink, if it has one.
/// Returns whether a sink was present.
pub fn inject_by_name(target: &mut dyn Adapter, deps: &[Resolved]) -> bool {
    let Some(depender) = target.as_depender() else {
        return false;
    };
    for dep in deps {
        depender.add_dependency(&dep.name, Arc::clone(&dep.adapter));
    }
    true
}

/// Assigns each dependency to its typed field.
///
/// With `strict`, a dependency without a matching field is an error;
/// otherwise it is left to the name-keyed sink.
pub(crate) fn inject_by_field(
    owner: &str,
    target: &mut dyn Adapter,
    table: &dyn FieldTable,
    deps: &[Resolved],
    strict: bool,
) -> Result<()> {
    for dep in deps {
        let field = field_key(&dep.name);
        if !table.has_field(&field) {
            if strict {
                return Err(Error::FieldNotFound {
                    adapter: owner.to_string(),
                    field,
                });
            }
            continue;
        }

        table
            .assign(target, &field, Arc::clone(&dep.adapter))
            .map_err(|expected| Error::TypeMismatch {
                adapter: owner.to_string(),
                field: field.clone(),
                expected,
                actual: dep.adapter.type_name().to_string(),
            })?;
        tracing::debug!(
            adapter = owner,
            field = %field,
            dependency = %dep.adapter_id,
            "assigned dependency"
        );
    }
    Ok(())
}

/// Fails on the first required field still empty after injection.
pub(crate) fn validate_required(
    owner: &str,
    target: &mut dyn Adapter,
    table: &dyn FieldTable,
) -> Result<()> {
    match table.first_unset_required(target) {
        Some(field) => Err(Error::MissingRequired {
            adapter: owner.to_string(),
            field: field_key(field),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    #[derive(Default)]
    struct English;
    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }
    impl Adapter for English {}

    #[derive(Default)]
    struct Other;
    impl Adapter for Other {}

    fn as_greeter(dep: Arc<dyn Adapter>) -> Option<Arc<dyn Greeter>> {
        dep.into_any()
            .downcast::<English>()
            .ok()
            .map(|g| g as Arc<dyn Greeter>)
    }

    #[derive(Default)]
    struct Host {
        greeter: Option<Arc<dyn Greeter>>,
        other: Option<Arc<Other>>,
        extra: Option<Arc<Other>>,
        named: Vec<String>,
    }

    impl crate::adapter::Depender for Host {
        fn add_dependency(&mut self, name: &str, _adapter: Arc<dyn Adapter>) {
            self.named.push(name.to_string());
        }
    }

    impl Adapter for Host {
        fn as_depender(&mut self) -> Option<&mut dyn crate::adapter::Depender> {
            Some(self)
        }

        fn fields() -> Fields<Self> {
            Fields::<Self>::new()
                .field_as("greeter", "english,required", |h| &mut h.greeter, as_greeter)
                .field("other", "required", |h| &mut h.other)
                .field("extra", "other", |h| &mut h.extra)
        }
    }

    fn resolved(name: &str, adapter: Arc<dyn Adapter>) -> Resolved {
        Resolved {
            name: name.into(),
            adapter_id: "test".into(),
            adapter,
        }
    }

    #[test]
    fn test_tag_grammar() {
        assert_eq!(Tag::parse(""), Tag::default());
        assert_eq!(
            Tag::parse("required"),
            Tag {
                adapter_id: None,
                required: true
            }
        );
        assert_eq!(
            Tag::parse("lister-adp"),
            Tag {
                adapter_id: Some("lister-adp".into()),
                required: false
            }
        );
        assert_eq!(
            Tag::parse(" lister-adp , required "),
            Tag {
                adapter_id: Some("lister-adp".into()),
                required: true
            }
        );
        assert_eq!(Tag::parse("required,x").adapter_id.as_deref(), Some("required"));
    }

    #[test]
    fn test_field_key_normalization() {
        assert_eq!(field_key("ListerProvider"), "lister_provider");
        assert_eq!(field_key("lister-provider"), "lister_provider");
        assert_eq!(field_key("lister_provider"), "lister_provider");
    }

    #[test]
    fn test_inferred_from_tags() {
        let inferred = Host::fields().inferred();
        assert_eq!(inferred.len(), 2);
        assert_eq!(inferred["greeter"], DepRef::new("english"));
        assert_eq!(inferred["extra"], DepRef::new("other"));
    }

    #[test]
    fn test_merge_declared_wins() {
        let mut declared = BTreeMap::new();
        declared.insert("Greeter".to_string(), DepRef::new("english").named("formal"));
        let inferred = Host::fields().inferred();

        let merged = merge(&declared, inferred);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["Greeter"].name.as_deref(), Some("formal"));
        assert!(!merged.contains_key("greeter"));
        assert_eq!(merged["extra"], DepRef::new("other"));
    }

    #[test]
    fn test_inject_by_field_and_validate() {
        let table = Host::fields();
        let mut host = Host::default();
        let deps = vec![
            resolved("greeter", Arc::new(English)),
            resolved("Other", Arc::new(Other)),
        ];

        inject_by_field("host", &mut host, &table, &deps, true).unwrap();
        validate_required("host", &mut host, &table).unwrap();
        assert_eq!(host.greeter.as_ref().unwrap().greet(), "hello");
        assert!(host.other.is_some());
    }

    #[test]
    fn test_type_mismatch() {
        let table = Host::fields();
        let mut host = Host::default();
        let deps = vec![resolved("greeter", Arc::new(Other))];

        let err = inject_by_field("host", &mut host, &table, &deps, true).unwrap_err();
        match err {
            Error::TypeMismatch { field, actual, .. } => {
                assert_eq!(field, "greeter");
                assert!(actual.ends_with("Other"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_field_strict_vs_lenient() {
        let table = Host::fields();
        let mut host = Host::default();
        let deps = vec![resolved("cache", Arc::new(Other))];

        let err = inject_by_field("host", &mut host, &table, &deps, true).unwrap_err();
        assert!(matches!(err, Error::FieldNotFound { field, .. } if field == "cache"));

        inject_by_field("host", &mut host, &table, &deps, false).unwrap();
        assert!(inject_by_name(&mut host, &deps));
        assert_eq!(host.named, vec!["cache"]);
    }

    #[derive(Default)]
    struct Camel {
        helper: Option<Arc<Other>>,
    }

    impl Adapter for Camel {
        fn fields() -> Fields<Self> {
            Fields::<Self>::new().field("Helper", "other,required", |c| &mut c.helper)
        }
    }

    #[test]
    fn test_slot_names_normalized_like_keys() {
        let table = Camel::fields();
        let inferred = table.inferred();
        assert_eq!(inferred["helper"], DepRef::new("other"));

        let mut camel = Camel::default();
        let err = validate_required("camel", &mut camel, &table).unwrap_err();
        assert!(matches!(err, Error::MissingRequired { field, .. } if field == "helper"));

        let wanted = merge(&BTreeMap::new(), inferred);
        let deps = resolve("camel", &wanted, |_| Ok(Arc::new(Other) as Arc<dyn Adapter>)).unwrap();
        inject_by_field("camel", &mut camel, &table, &deps, true).unwrap();
        validate_required("camel", &mut camel, &table).unwrap();
        assert!(camel.helper.is_some());
    }

    #[test]
    fn test_missing_required_names_field() {
        let table = Host::fields();
        let mut host = Host::default();
        host.greeter = Some(Arc::new(English) as Arc<dyn Greeter>);

        let err = validate_required("host", &mut host, &table).unwrap_err();
        assert!(matches!(err, Error::MissingRequired { field, .. } if field == "other"));
    }

    #[test]
    fn test_resolve_wraps_failures() {
        let mut deps = BTreeMap::new();
        deps.insert("db".to_string(), DepRef::new("pg"));

        let err = resolve("host", &deps, |dep| Err(Error::UnknownAdapter(dep.adapter_id.clone())))
            .unwrap_err();
        match err {
            Error::Dependency { adapter, name, source } => {
                assert_eq!(adapter, "host");
                assert_eq!(name, "db");
                assert!(matches!(*source, Error::UnknownAdapter(_)));
            }
            other => panic!("expected dependency error, got {other:?}"),
        }
    }
}
