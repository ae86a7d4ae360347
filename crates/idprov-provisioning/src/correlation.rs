//! Correlation of external objects with internal entities.
//!
//! A correlation rule turns an inbound change into a search condition over
//! internal entities. Rules see the change together with its values already
//! mapped to internal names and transformed for pull.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use idprov_connector::operation::AttributeValue;
use idprov_connector::traits::SyncChange;
use idprov_core::{Any, ConflictResolutionAction, Provision};
use idprov_expression::{ComparisonOp, Expression, Value};

use crate::catalog::CompiledCorrelationPolicy;
use crate::error::{ProvisioningError, Result};
use crate::mapping::AttributeMapper;
use crate::search::SearchMatcher;

/// Internal attribute name to pulled values.
pub type PulledValues = BTreeMap<String, Vec<String>>;

pub trait CorrelationRule: Send + Sync + fmt::Debug {
    /// Search condition locating the internal counterpart of the change;
    /// `None` when the change carries nothing to correlate on.
    fn condition(
        &self,
        delta: &SyncChange,
        provision: &Provision,
        pulled: &PulledValues,
    ) -> Result<Option<Expression>>;
}

/// Equality on the internal attribute mapped to the connector key.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCorrelationRule;

impl CorrelationRule for DefaultCorrelationRule {
    fn condition(
        &self,
        _delta: &SyncChange,
        provision: &Provision,
        pulled: &PulledValues,
    ) -> Result<Option<Expression>> {
        let Some(item) = provision.conn_object_key_item() else {
            debug!(any_type = %provision.any_type, "Provision has no connector key item");
            return Ok(None);
        };
        Ok(pulled
            .get(&item.int_attr_name)
            .and_then(|values| values.first())
            .map(|value| Expression::equals(item.int_attr_name.clone(), value.as_str())))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AttributeCorrelationConf {
    schemas: Vec<String>,
}

/// Conjunction of equalities over a configured list of internal attributes.
///
/// An attribute the change carries no value for must be empty internally.
#[derive(Debug, Clone)]
pub struct AttributeCorrelationRule {
    schemas: Vec<String>,
}

impl AttributeCorrelationRule {
    pub fn new(schemas: Vec<String>) -> Result<Self> {
        if schemas.is_empty() {
            return Err(ProvisioningError::configuration(
                "attribute correlation needs at least one schema",
            ));
        }
        Ok(Self { schemas })
    }
}

impl CorrelationRule for AttributeCorrelationRule {
    fn condition(
        &self,
        _delta: &SyncChange,
        _provision: &Provision,
        pulled: &PulledValues,
    ) -> Result<Option<Expression>> {
        let conditions = self.schemas.iter().map(|schema| {
            match pulled.get(schema).and_then(|values| values.first()) {
                Some(value) => Expression::equals(schema.clone(), value.as_str()),
                None => Expression::comparison(schema.clone(), ComparisonOp::Equal, Value::Null),
            }
        });
        Ok(Some(Expression::all(conditions)))
    }
}

pub const DEFAULT_CORRELATION_RULE: &str = "DefaultCorrelationRule";
pub const ATTRIBUTE_CORRELATION_RULE: &str = "AttributeCorrelationRule";

pub type CorrelationRuleFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn CorrelationRule>> + Send + Sync>;

/// Name-to-factory registry of correlation rules.
#[derive(Clone, Default)]
pub struct CorrelationRuleRegistry {
    factories: HashMap<String, CorrelationRuleFactory>,
}

impl fmt::Debug for CorrelationRuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("CorrelationRuleRegistry")
            .field("rules", &names)
            .finish()
    }
}

impl CorrelationRuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_CORRELATION_RULE, |_| {
            Ok(Arc::new(DefaultCorrelationRule) as Arc<dyn CorrelationRule>)
        });
        registry.register(ATTRIBUTE_CORRELATION_RULE, |conf| {
            let conf: AttributeCorrelationConf = serde_json::from_value(conf.clone())
                .map_err(|e| ProvisioningError::configuration(format!("invalid correlation conf: {e}")))?;
            Ok(Arc::new(AttributeCorrelationRule::new(conf.schemas)?) as Arc<dyn CorrelationRule>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn CorrelationRule>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// `None` when nothing is registered under the name.
    #[must_use]
    pub fn build(
        &self,
        name: &str,
        conf: &serde_json::Value,
    ) -> Option<Result<Arc<dyn CorrelationRule>>> {
        self.factories.get(name).map(|factory| factory(conf))
    }
}

/// Outcome of correlating one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// No internal entity matches: the change creates one.
    NoMatch,
    /// Exactly one entity matches: the change updates it.
    Match(Box<Any>),
    /// Several entities match.
    Conflict(Vec<Any>),
}

impl CorrelationOutcome {
    /// Entities to act on under the conflict resolution action.
    #[must_use]
    pub fn targets(self, action: ConflictResolutionAction) -> Vec<Any> {
        match self {
            Self::NoMatch => Vec::new(),
            Self::Match(any) => vec![*any],
            Self::Conflict(mut matches) => match action {
                ConflictResolutionAction::Ignore => Vec::new(),
                ConflictResolutionAction::FirstMatch => {
                    matches.truncate(1);
                    matches
                }
                ConflictResolutionAction::LastMatch => matches.pop().into_iter().collect(),
                ConflictResolutionAction::All => matches,
            },
        }
    }
}

#[derive(Clone)]
pub struct CorrelationResolver {
    mapper: AttributeMapper,
    matcher: Arc<dyn SearchMatcher>,
}

impl CorrelationResolver {
    pub fn new(mapper: AttributeMapper, matcher: Arc<dyn SearchMatcher>) -> Self {
        Self { mapper, matcher }
    }

    /// Values of the change mapped to internal names.
    ///
    /// The connector key item falls back to the change's uid when the
    /// change carries no attribute for it.
    #[must_use]
    pub fn pulled_values(&self, delta: &SyncChange, provision: &Provision) -> PulledValues {
        let mut pulled = PulledValues::new();
        let key_item = provision.conn_object_key_item();
        let items = provision
            .pull_items()
            .chain(key_item.filter(|item| !item.purpose.allows_pull()));

        for item in items {
            let external = delta
                .attributes
                .as_ref()
                .and_then(|attrs| attrs.get(&item.ext_attr_name))
                .filter(|value| !value.is_null())
                .cloned()
                .or_else(|| {
                    item.conn_object_key
                        .then(|| AttributeValue::from(delta.uid.value()))
                });
            if let Some(external) = external {
                let values = self.mapper.pull_values(item, &external);
                if !values.is_empty() {
                    pulled.insert(item.int_attr_name.clone(), values);
                }
            }
        }
        pulled
    }

    /// Search condition for the change, from the policy's rule for the any
    /// type or the default rule.
    pub fn resolve(
        &self,
        delta: &SyncChange,
        provision: &Provision,
        policy: Option<&CompiledCorrelationPolicy>,
    ) -> Result<Option<Expression>> {
        let pulled = self.pulled_values(delta, provision);
        match policy.and_then(|p| p.rule(&provision.any_type)) {
            Some(rule) => rule.condition(delta, provision, &pulled),
            None => DefaultCorrelationRule.condition(delta, provision, &pulled),
        }
    }

    /// Condition locating the entity stored under the change's previous
    /// connector key, for changes that renamed the remote object.
    #[must_use]
    pub fn resolve_previous(&self, delta: &SyncChange, provision: &Provision) -> Option<Expression> {
        let previous = delta.previous_uid.as_ref()?;
        let item = provision.conn_object_key_item()?;
        let values = self
            .mapper
            .pull_values(item, &AttributeValue::from(previous.value()));
        values
            .first()
            .map(|value| Expression::equals(item.int_attr_name.clone(), value.as_str()))
    }

    /// Searches internal entities for the change.
    ///
    /// A renamed object is first looked up under its previous connector
    /// key; the configured rule applies when that finds nothing.
    #[instrument(skip(self, delta, provision, policy), fields(uid = %delta.uid))]
    pub async fn classify(
        &self,
        delta: &SyncChange,
        provision: &Provision,
        policy: Option<&CompiledCorrelationPolicy>,
    ) -> Result<CorrelationOutcome> {
        if let Some(condition) = self.resolve_previous(delta, provision) {
            let mut matches = self.matcher.search(&condition, &provision.any_type).await?;
            if matches.len() == 1 {
                debug!(condition = %condition, "Matched on previous connector key");
                return Ok(CorrelationOutcome::Match(Box::new(matches.remove(0))));
            }
        }

        let Some(condition) = self.resolve(delta, provision, policy)? else {
            debug!("Nothing to correlate on");
            return Ok(CorrelationOutcome::NoMatch);
        };

        let mut matches = self.matcher.search(&condition, &provision.any_type).await?;
        debug!(condition = %condition, matches = matches.len(), "Correlation search done");
        Ok(match matches.len() {
            0 => CorrelationOutcome::NoMatch,
            1 => CorrelationOutcome::Match(Box::new(matches.remove(0))),
            _ => CorrelationOutcome::Conflict(matches),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogBuilder;
    use crate::search::ExpressionSearchMatcher;
    use crate::store::{AnyStore, InMemoryAnyStore};
    use idprov_connector::operation::{AttributeSet, Uid};
    use idprov_core::{ItemTransformer, MappingItem, PlainSchema, SchemaType};
    use serde_json::json;

    fn provision() -> Provision {
        Provision::new("USER", "__ACCOUNT__")
            .with_item(
                MappingItem::conn_object_key("username", "uid").with_transformer(
                    ItemTransformer::Prefix {
                        value: "ext_".to_string(),
                    },
                ),
            )
            .with_item(MappingItem::new("email", "mail"))
    }

    async fn resolver() -> (CorrelationResolver, Arc<InMemoryAnyStore>) {
        let catalog = CatalogBuilder::new()
            .with_schema(PlainSchema::new("email", SchemaType::String))
            .build_default()
            .unwrap();
        let store = Arc::new(InMemoryAnyStore::new());
        let matcher = Arc::new(ExpressionSearchMatcher::new(store.clone()));
        (
            CorrelationResolver::new(AttributeMapper::new(Arc::new(catalog)), matcher),
            store,
        )
    }

    #[tokio::test]
    async fn test_default_rule_matches_connector_key() {
        let (resolver, store) = resolver().await;
        let rossini = store.save(Any::user("rossini", "/")).await.unwrap();
        store.save(Any::user("verdi", "/")).await.unwrap();

        let delta = SyncChange::upsert(
            Uid::new("uid", "ext_rossini"),
            "__ACCOUNT__",
            AttributeSet::new().with("uid", "ext_rossini"),
        );
        let condition = resolver.resolve(&delta, &provision(), None).unwrap().unwrap();
        assert_eq!(condition, Expression::equals("username", "rossini"));

        match resolver.classify(&delta, &provision(), None).await.unwrap() {
            CorrelationOutcome::Match(found) => assert_eq!(found.key, rossini.key),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_renamed_object_matches_previous_key() {
        let (resolver, store) = resolver().await;
        let rossini = store.save(Any::user("rossini", "/")).await.unwrap();

        let delta = SyncChange::upsert(
            Uid::new("uid", "ext_gioacchino"),
            "__ACCOUNT__",
            AttributeSet::new().with("uid", "ext_gioacchino"),
        )
        .with_previous_uid(Uid::new("uid", "ext_rossini"));
        assert_eq!(
            resolver.resolve_previous(&delta, &provision()),
            Some(Expression::equals("username", "rossini"))
        );

        match resolver.classify(&delta, &provision(), None).await.unwrap() {
            CorrelationOutcome::Match(found) => assert_eq!(found.key, rossini.key),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_uid_fallback_and_no_match() {
        let (resolver, _) = resolver().await;
        let delta = SyncChange::deleted(Uid::new("uid", "ext_nobody"), "__ACCOUNT__");

        let condition = resolver.resolve(&delta, &provision(), None).unwrap().unwrap();
        assert_eq!(condition, Expression::equals("username", "nobody"));
        assert_eq!(
            resolver.classify(&delta, &provision(), None).await.unwrap(),
            CorrelationOutcome::NoMatch
        );
    }

    #[tokio::test]
    async fn test_attribute_rule_and_conflicts() {
        let (resolver, store) = resolver().await;
        store
            .save(Any::user("a", "/").with_attr("email", ["shared@example.org"]))
            .await
            .unwrap();
        store
            .save(Any::user("b", "/").with_attr("email", ["shared@example.org"]))
            .await
            .unwrap();

        let rule = CorrelationRuleRegistry::with_defaults()
            .build(ATTRIBUTE_CORRELATION_RULE, &json!({"schemas": ["email"]}))
            .unwrap()
            .unwrap();
        let policy = CompiledCorrelationPolicy {
            key: idprov_core::PolicyKey::new(),
            name: "pull".to_string(),
            conflict_resolution_action: ConflictResolutionAction::FirstMatch,
            rules: BTreeMap::from([("USER".to_string(), rule)]),
        };

        let delta = SyncChange::upsert(
            Uid::from_value("ext_c"),
            "__ACCOUNT__",
            AttributeSet::new().with("mail", "shared@example.org"),
        );
        let outcome = resolver
            .classify(&delta, &provision(), Some(&policy))
            .await
            .unwrap();
        assert!(matches!(&outcome, CorrelationOutcome::Conflict(m) if m.len() == 2));

        assert_eq!(outcome.clone().targets(ConflictResolutionAction::Ignore).len(), 0);
        assert_eq!(outcome.clone().targets(ConflictResolutionAction::FirstMatch).len(), 1);
        assert_eq!(outcome.clone().targets(ConflictResolutionAction::LastMatch).len(), 1);
        assert_eq!(outcome.targets(ConflictResolutionAction::All).len(), 2);
    }

    #[test]
    fn test_attribute_rule_requires_schemas() {
        let built = CorrelationRuleRegistry::with_defaults()
            .build(ATTRIBUTE_CORRELATION_RULE, &json!({"schemas": []}))
            .unwrap();
        assert!(built.is_err());
        assert!(CorrelationRuleRegistry::with_defaults()
            .build("Missing", &json!({}))
            .is_none());
    }
}
