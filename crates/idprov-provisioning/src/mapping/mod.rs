//! Translation between internal attribute values and connector attributes.
//!
//! Mapping items name internal attributes as follows:
//!
//! | name | source |
//! |---|---|
//! | `key` | entity key |
//! | `username`, `name` | username (users) or name |
//! | `realm` | realm full path |
//! | `status` | workflow status |
//! | `password` | clear-text password, only via [`AttributeMapper::prepare_attributes`] |
//! | `der:<schema>` | derived attribute |
//! | `virt:<schema>` | virtual attribute |
//! | anything else | plain attribute, typed by its schema |

pub mod binder;
pub mod transform;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use idprov_connector::operation::{AttributeSet, AttributeValue, ENABLE_ATTRIBUTE, PASSWORD_ATTRIBUTE};
use idprov_core::{Any, MappingItem, PlainSchema, Provision, SchemaType};
use idprov_expression::eval_expression;

use crate::catalog::ConfigurationCatalog;
use crate::error::{ValidationErrors, ValidationKind};
use crate::search::eval_context;

pub use binder::{AnyBinder, BoundUpdate};
pub use transform::{Direction, ScriptLimits, TransformEngine};

const DERIVED_PREFIX: &str = "der:";
const VIRTUAL_PREFIX: &str = "virt:";

/// Internal values of one mapping item, with the type they carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntValues {
    pub schema_type: SchemaType,
    pub values: Vec<String>,
}

impl IntValues {
    fn strings(values: Vec<String>) -> Self {
        Self {
            schema_type: SchemaType::String,
            values,
        }
    }

    fn empty() -> Self {
        Self::strings(Vec::new())
    }
}

/// Evaluates a mandatory condition; unparsable conditions count as false.
pub(crate) fn condition_holds(condition: &str, any: &Any) -> bool {
    match eval_expression(condition, &eval_context(any)) {
        Ok(holds) => holds,
        Err(e) => {
            debug!(condition = %condition, error = %e, "Invalid mandatory condition, treated as false");
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttributeMapper {
    catalog: Arc<ConfigurationCatalog>,
    engine: TransformEngine,
}

impl AttributeMapper {
    pub fn new(catalog: Arc<ConfigurationCatalog>) -> Self {
        Self {
            catalog,
            engine: TransformEngine::new(),
        }
    }

    #[must_use]
    pub fn with_engine(mut self, engine: TransformEngine) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &ConfigurationCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn engine(&self) -> &TransformEngine {
        &self.engine
    }

    /// Plain schema usable on this entity through this provision.
    fn plain_schema(&self, provision: &Provision, any: &Any, name: &str) -> Option<&PlainSchema> {
        let Some(schema) = self.catalog.schema(name) else {
            debug!(schema = %name, "Unknown schema in mapping, ignoring");
            return None;
        };
        match &schema.any_type_class {
            Some(class)
                if !any.aux_classes.contains(class)
                    && !provision.aux_classes.contains(class)
                    && class != &any.any_type =>
            {
                debug!(schema = %name, class = %class, "Schema not available on entity, ignoring");
                None
            }
            _ => Some(schema),
        }
    }

    /// Reads the internal values a mapping item refers to.
    ///
    /// Values are returned untransformed.
    #[must_use]
    pub fn get_int_values(&self, provision: &Provision, item: &MappingItem, any: &Any) -> IntValues {
        let name = item.int_attr_name.as_str();
        match name {
            "key" => IntValues::strings(vec![any.key.to_string()]),
            "username" | "name" => IntValues::strings(any.name.iter().cloned().collect()),
            "realm" => IntValues::strings(vec![any.realm.clone()]),
            "status" => IntValues::strings(any.status.iter().cloned().collect()),
            "password" => IntValues::empty(),
            _ => {
                if let Some(schema) = name.strip_prefix(DERIVED_PREFIX) {
                    IntValues::strings(any.der_attrs.get(schema).cloned().unwrap_or_default())
                } else if let Some(schema) = name.strip_prefix(VIRTUAL_PREFIX) {
                    IntValues::strings(any.virtual_attrs.get(schema).cloned().unwrap_or_default())
                } else {
                    match self.plain_schema(provision, any, name) {
                        Some(schema) => IntValues {
                            schema_type: schema.schema_type,
                            values: any.attr(name).map(<[String]>::to_vec).unwrap_or_default(),
                        },
                        None => IntValues::empty(),
                    }
                }
            }
        }
    }

    /// Outbound values of an item: internal values run through its
    /// transformers.
    #[must_use]
    pub fn get_ext_values(&self, provision: &Provision, item: &MappingItem, any: &Any) -> IntValues {
        let IntValues {
            schema_type,
            values,
        } = self.get_int_values(provision, item, any);
        IntValues {
            schema_type,
            values: self
                .engine
                .apply(&item.transformers, Direction::Propagation, values),
        }
    }

    /// Inbound values of an external attribute, transformed for pull.
    #[must_use]
    pub fn pull_values(&self, item: &MappingItem, value: &AttributeValue) -> Vec<String> {
        self.engine
            .apply(&item.transformers, Direction::Pull, value.to_strings())
    }

    /// Writes an external attribute into the entity through a mapping item.
    ///
    /// Values that do not fit the target schema are dropped.
    pub fn set_int_values(&self, item: &MappingItem, value: &AttributeValue, target: &mut Any) {
        let values = self.pull_values(item, value);
        let name = item.int_attr_name.as_str();

        match name {
            "key" => debug!("Entity key is not pulled"),
            "username" | "name" => {
                if let Some(first) = values.into_iter().next() {
                    target.name = Some(first);
                }
            }
            "realm" => {
                if let Some(first) = values.into_iter().next() {
                    target.realm = first;
                }
            }
            "status" => target.status = values.into_iter().next(),
            "password" => {
                if target.is_user() {
                    if let Some(first) = values.into_iter().next() {
                        target
                            .credentials
                            .get_or_insert_with(Default::default)
                            .set_clear_password(Some(first));
                    }
                }
            }
            _ => {
                if name.starts_with(DERIVED_PREFIX) {
                    debug!(attribute = %name, "Derived attributes are computed, not pulled");
                } else if let Some(schema) = name.strip_prefix(VIRTUAL_PREFIX) {
                    if values.is_empty() {
                        target.virtual_attrs.remove(schema);
                    } else {
                        target.virtual_attrs.insert(schema.to_string(), values);
                    }
                } else {
                    let Some(schema) = self.catalog.schema(name) else {
                        debug!(schema = %name, "Unknown schema in mapping, ignoring");
                        return;
                    };
                    let mut valid: Vec<String> = values
                        .into_iter()
                        .filter(|v| {
                            let ok = schema.is_valid_value(v);
                            if !ok {
                                debug!(schema = %name, value = %v, "Value does not fit schema, dropped");
                            }
                            ok
                        })
                        .collect();
                    if !schema.multivalue {
                        valid.truncate(1);
                    }
                    target.set_attr(name, valid);
                }
            }
        }
    }

    /// Outbound connector key of the entity on a provision.
    #[must_use]
    pub fn get_conn_object_key_value(&self, any: &Any, provision: &Provision) -> Option<String> {
        let item = provision.conn_object_key_item()?;
        self.get_ext_values(provision, item, any)
            .values
            .into_iter()
            .find(|v| !v.is_empty())
    }

    /// Builds the connector attributes for the entity.
    ///
    /// The password is sent only when the provision has a password item.
    /// `enable` adds the enabled flag when a status change is propagated.
    #[must_use]
    pub fn prepare_attributes(
        &self,
        provision: &Provision,
        any: &Any,
        password: Option<&str>,
        enable: Option<bool>,
    ) -> (Option<String>, AttributeSet) {
        let mut attributes = AttributeSet::new();
        for item in provision.propagation_items() {
            let IntValues {
                schema_type,
                values,
            } = self.get_ext_values(provision, item, any);
            attributes.set(item.ext_attr_name.clone(), to_attribute_value(schema_type, values));
        }

        if let (Some(_), Some(password)) = (provision.password_item(), password) {
            attributes.set(PASSWORD_ATTRIBUTE, password);
        }
        if let Some(enable) = enable {
            attributes.set(ENABLE_ATTRIBUTE, enable);
        }

        (self.get_conn_object_key_value(any, provision), attributes)
    }

    /// Internal names of items whose condition holds but whose outbound
    /// value is empty.
    #[must_use]
    pub fn evaluate_mandatory_condition(&self, provision: &Provision, any: &Any) -> Vec<String> {
        provision
            .propagation_items()
            .filter(|item| condition_holds(&item.mandatory_condition, any))
            .filter(|item| {
                self.get_ext_values(provision, item, any)
                    .values
                    .iter()
                    .all(String::is_empty)
            })
            .map(|item| item.int_attr_name.clone())
            .collect()
    }

    /// Collects mandatory and value violations of the entity.
    ///
    /// Resources are checked only when they enforce mandatory conditions;
    /// plain schemas available to the entity are always checked. A base
    /// schema (one with no any type class) is mandatory for users only;
    /// groups and any objects need a class naming them.
    #[must_use]
    pub fn check_mandatory(&self, any: &Any, resources: &BTreeSet<String>) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        for key in resources {
            let Some(resource) = self.catalog.resource(key) else {
                continue;
            };
            if !resource.enforce_mandatory_condition {
                continue;
            }
            if let Some(provision) = resource.provision(&any.any_type) {
                for missing in self.evaluate_mandatory_condition(provision, any) {
                    errors.add(ValidationKind::RequiredValuesMissing, missing);
                }
            }
        }

        for schema in self.catalog.schemas() {
            let applies = match &schema.any_type_class {
                None => true,
                Some(class) => any.aux_classes.contains(class) || class == &any.any_type,
            };
            if !applies {
                continue;
            }

            let values = any.attr(&schema.key).unwrap_or_default();
            if values.is_empty() {
                let scoped = schema.any_type_class.is_some() || any.is_user();
                if scoped && condition_holds(&schema.mandatory_condition, any) {
                    errors.add(ValidationKind::RequiredValuesMissing, schema.key.clone());
                }
                continue;
            }
            if values.iter().any(|v| !schema.is_valid_value(v))
                || (!schema.multivalue && values.len() > 1)
            {
                errors.add(ValidationKind::InvalidValues, schema.key.clone());
            }
        }

        errors
    }
}

/// Converts string values to a connector value of the schema type.
fn to_attribute_value(schema_type: SchemaType, values: Vec<String>) -> AttributeValue {
    let mut converted: Vec<AttributeValue> = values
        .into_iter()
        .map(|value| match schema_type {
            SchemaType::Long => value
                .trim()
                .parse::<i64>()
                .map_or(AttributeValue::String(value), AttributeValue::Integer),
            SchemaType::Double => value
                .trim()
                .parse::<f64>()
                .map_or(AttributeValue::String(value), AttributeValue::Float),
            SchemaType::Boolean => match value.trim().to_ascii_lowercase().as_str() {
                "true" => AttributeValue::Boolean(true),
                "false" => AttributeValue::Boolean(false),
                _ => AttributeValue::String(value),
            },
            _ => AttributeValue::String(value),
        })
        .collect();

    match converted.len() {
        0 => AttributeValue::Null,
        1 => converted.remove(0),
        _ => AttributeValue::Array(converted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogBuilder;
    use idprov_core::{ExternalResource, ItemTransformer};

    fn provision() -> Provision {
        Provision::new("USER", "__ACCOUNT__")
            .with_item(MappingItem::conn_object_key("username", "uid"))
            .with_item(
                MappingItem::new("email", "mail").with_mandatory_condition("true"),
            )
            .with_item(MappingItem::new("loginCount", "logins"))
            .with_item(MappingItem::new("der:cn", "cn"))
            .with_item(MappingItem::password("userPassword"))
    }

    fn mapper() -> AttributeMapper {
        let catalog = CatalogBuilder::new()
            .with_schema(PlainSchema::new("email", SchemaType::String))
            .with_schema(PlainSchema::new("loginCount", SchemaType::Long))
            .with_schema(PlainSchema::new("gender", SchemaType::Enum).with_enum_values(["M", "F"]))
            .with_resource(
                ExternalResource::new("resource-ldap", "connector-ldap")
                    .with_provision(provision())
                    .with_enforce_mandatory_condition(true),
            )
            .build_default()
            .unwrap();
        AttributeMapper::new(Arc::new(catalog))
    }

    #[test]
    fn test_prepare_attributes_types_values() {
        let mapper = mapper();
        let mut user = Any::user("rossini", "/")
            .with_attr("email", ["rossini@example.org"])
            .with_attr("loginCount", ["3"]);
        user.der_attrs.insert("cn".to_string(), vec!["Gioacchino Rossini".to_string()]);

        let (key, attrs) = mapper.prepare_attributes(&provision(), &user, Some("Password123"), Some(true));

        assert_eq!(key.as_deref(), Some("rossini"));
        assert_eq!(attrs.get_string("uid"), Some("rossini"));
        assert_eq!(attrs.get("logins"), Some(&AttributeValue::Integer(3)));
        assert_eq!(attrs.get_string("cn"), Some("Gioacchino Rossini"));
        assert_eq!(attrs.get_string(PASSWORD_ATTRIBUTE), Some("Password123"));
        assert_eq!(attrs.get(ENABLE_ATTRIBUTE), Some(&AttributeValue::Boolean(true)));
        assert!(!attrs.has("userPassword"));
    }

    #[test]
    fn test_missing_value_is_null_and_password_optional() {
        let mapper = mapper();
        let user = Any::user("verdi", "/");
        let (_, attrs) = mapper.prepare_attributes(&provision(), &user, None, None);

        assert_eq!(attrs.get("mail"), Some(&AttributeValue::Null));
        assert!(!attrs.has(PASSWORD_ATTRIBUTE));
        assert!(!attrs.has(ENABLE_ATTRIBUTE));
    }

    #[test]
    fn test_mandatory_condition_reports_missing_email() {
        let mapper = mapper();
        let user = Any::user("verdi", "/");
        assert_eq!(mapper.evaluate_mandatory_condition(&provision(), &user), vec!["email"]);

        let resources = BTreeSet::from(["resource-ldap".to_string()]);
        let errors = mapper.check_mandatory(&user, &resources);
        assert!(errors.contains(ValidationKind::RequiredValuesMissing, "email"));
    }

    #[test]
    fn test_conditional_mandatory() {
        let mapper = mapper();
        let provision = Provision::new("USER", "__ACCOUNT__").with_item(
            MappingItem::new("email", "mail").with_mandatory_condition("realm LIKE '/even%'"),
        );
        assert!(mapper
            .evaluate_mandatory_condition(&provision, &Any::user("a", "/odd"))
            .is_empty());
        assert_eq!(
            mapper.evaluate_mandatory_condition(&provision, &Any::user("b", "/even/two")),
            vec!["email"]
        );
    }

    #[test]
    fn test_base_mandatory_schema_binds_users_only() {
        let mut printer_serial =
            PlainSchema::new("serial", SchemaType::String).with_mandatory_condition("true");
        printer_serial.any_type_class = Some("PRINTER".to_string());
        let catalog = CatalogBuilder::new()
            .with_schema(PlainSchema::new("email", SchemaType::String).with_mandatory_condition("true"))
            .with_schema(printer_serial)
            .build_default()
            .unwrap();
        let mapper = AttributeMapper::new(Arc::new(catalog));

        let user = mapper.check_mandatory(&Any::user("rossini", "/"), &BTreeSet::new());
        assert!(user.contains(ValidationKind::RequiredValuesMissing, "email"));
        assert!(!user.contains(ValidationKind::RequiredValuesMissing, "serial"));

        assert!(mapper
            .check_mandatory(&Any::group("singers", "/"), &BTreeSet::new())
            .is_empty());

        let printer = mapper.check_mandatory(&Any::any_object("PRINTER", "hp", "/"), &BTreeSet::new());
        assert!(printer.contains(ValidationKind::RequiredValuesMissing, "serial"));
        assert!(!printer.contains(ValidationKind::RequiredValuesMissing, "email"));
    }

    #[test]
    fn test_invalid_enum_value_is_reported() {
        let mapper = mapper();
        let user = Any::user("puccini", "/").with_attr("gender", ["X"]);
        let errors = mapper.check_mandatory(&user, &BTreeSet::new());
        assert!(errors.contains(ValidationKind::InvalidValues, "gender"));
    }

    #[test]
    fn test_set_int_values_coerces_and_transforms() {
        let mapper = mapper();
        let mut user = Any::user("placeholder", "/");

        let login = MappingItem::new("loginCount", "logins");
        mapper.set_int_values(&login, &AttributeValue::from("not a number"), &mut user);
        assert!(user.attr("loginCount").is_none());
        mapper.set_int_values(&login, &AttributeValue::Integer(7), &mut user);
        assert_eq!(user.attr("loginCount"), Some(&["7".to_string()][..]));

        let name = MappingItem::conn_object_key("username", "uid").with_transformer(
            ItemTransformer::Prefix {
                value: "ext_".to_string(),
            },
        );
        mapper.set_int_values(&name, &AttributeValue::from("ext_rossini"), &mut user);
        assert_eq!(user.name.as_deref(), Some("rossini"));
    }

    #[test]
    fn test_unknown_schema_is_empty() {
        let mapper = mapper();
        let item = MappingItem::new("nickname", "nick");
        let values = mapper.get_int_values(&provision(), &item, &Any::user("a", "/").with_attr("nickname", ["x"]));
        assert!(values.values.is_empty());
    }

    #[test]
    fn test_multiple_values_become_array() {
        assert_eq!(
            to_attribute_value(SchemaType::String, vec!["a".into(), "b".into()]),
            AttributeValue::Array(vec!["a".into(), "b".into()])
        );
        assert_eq!(to_attribute_value(SchemaType::Boolean, vec!["TRUE".into()]), AttributeValue::Boolean(true));
    }
}
