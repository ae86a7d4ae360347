//! Search-condition matching.
//!
//! Conditions address entity data the same way mapping items do: plain
//! attributes by schema name, derived and virtual ones as `der:<schema>` and
//! `virt:<schema>`, plus the fields `key`, `name`, `username`, `realm`,
//! `status` and `anyType`. Computed multi-valued attributes are `$resources`,
//! `$groups` (group keys) and `$auxClasses`.

use std::sync::Arc;

use async_trait::async_trait;

use idprov_core::Any;
use idprov_expression::{EvalContext, Evaluator, Expression};

use crate::error::Result;
use crate::store::AnyStore;

/// Builds the evaluation context for an entity.
#[must_use]
pub fn eval_context(any: &Any) -> EvalContext {
    let mut ctx = EvalContext::new()
        .with_attribute("key", any.key.to_string())
        .with_attribute("realm", any.realm.clone())
        .with_attribute("anyType", any.any_type.clone())
        .with_values("$resources", any.resources.iter().cloned())
        .with_values("$groups", any.memberships.iter().map(ToString::to_string))
        .with_values("$auxClasses", any.aux_classes.iter().cloned());

    if let Some(name) = &any.name {
        ctx.insert_values("name", [name.clone()]);
        if any.is_user() {
            ctx.insert_values("username", [name.clone()]);
        }
    }
    if let Some(status) = &any.status {
        ctx.insert_values("status", [status.clone()]);
    }
    for (schema, values) in &any.plain_attrs {
        ctx.insert_values(schema.clone(), values.iter().cloned());
    }
    for (schema, values) in &any.der_attrs {
        ctx.insert_values(format!("der:{schema}"), values.iter().cloned());
    }
    for (schema, values) in &any.virtual_attrs {
        ctx.insert_values(format!("virt:{schema}"), values.iter().cloned());
    }
    ctx
}

/// Search-matching engine.
#[async_trait]
pub trait SearchMatcher: Send + Sync {
    async fn matches(&self, any: &Any, condition: &Expression) -> Result<bool>;

    /// Entities of the type satisfying the condition.
    async fn search(&self, condition: &Expression, any_type: &str) -> Result<Vec<Any>>;
}

/// Evaluates conditions in process, scanning the store for searches.
pub struct ExpressionSearchMatcher {
    store: Arc<dyn AnyStore>,
}

impl ExpressionSearchMatcher {
    pub fn new(store: Arc<dyn AnyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SearchMatcher for ExpressionSearchMatcher {
    async fn matches(&self, any: &Any, condition: &Expression) -> Result<bool> {
        Ok(Evaluator::evaluate(condition, &eval_context(any))?)
    }

    async fn search(&self, condition: &Expression, any_type: &str) -> Result<Vec<Any>> {
        let mut found = Vec::new();
        for any in self.store.find_all(any_type).await? {
            if Evaluator::evaluate(condition, &eval_context(&any))? {
                found.push(any);
            }
        }
        Ok(found)
    }
}
