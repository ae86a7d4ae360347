//! Value transformers of mapping items.
//!
//! Transformers run in order on outbound values and in reverse order on
//! inbound values. A transformer that cannot run (invalid pattern, failing
//! script) is skipped and the values pass through unchanged.

use std::fmt;

use regex::Regex;
use rhai::{Dynamic, Engine, Scope};
use tracing::{debug, info, warn};

use idprov_core::ItemTransformer;

const DEFAULT_MAX_OPERATIONS: u64 = 10_000;
const DEFAULT_MAX_CALL_LEVELS: usize = 16;
const DEFAULT_MAX_STRING_SIZE: usize = 65536;
const DEFAULT_MAX_ARRAY_SIZE: usize = 1_000;
const DEFAULT_MAX_MAP_SIZE: usize = 1_000;

/// Direction values are travelling in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Internal to external.
    Propagation,
    /// External to internal.
    Pull,
}

impl Direction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Propagation => "propagation",
            Self::Pull => "pull",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sandbox limits for script transformers.
#[derive(Debug, Clone)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_call_levels: DEFAULT_MAX_CALL_LEVELS,
            max_string_size: DEFAULT_MAX_STRING_SIZE,
            max_array_size: DEFAULT_MAX_ARRAY_SIZE,
            max_map_size: DEFAULT_MAX_MAP_SIZE,
        }
    }
}

/// Applies [`ItemTransformer`] chains to attribute values.
#[derive(Debug, Clone, Default)]
pub struct TransformEngine {
    limits: ScriptLimits,
}

impl TransformEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    fn script_engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(self.limits.max_call_levels);
        engine.set_max_string_size(self.limits.max_string_size);
        engine.set_max_array_size(self.limits.max_array_size);
        engine.set_max_map_size(self.limits.max_map_size);
        engine.set_strict_variables(true);

        engine.register_fn("log_info", |msg: &str| {
            info!(script_log = %msg, "Transformer script log");
        });
        engine.register_fn("log_debug", |msg: &str| {
            debug!(script_log = %msg, "Transformer script debug");
        });
        engine
    }

    /// Runs the chain over the values in the given direction.
    #[must_use]
    pub fn apply(
        &self,
        transformers: &[ItemTransformer],
        direction: Direction,
        values: Vec<String>,
    ) -> Vec<String> {
        let chain: Box<dyn Iterator<Item = &ItemTransformer>> = match direction {
            Direction::Propagation => Box::new(transformers.iter()),
            Direction::Pull => Box::new(transformers.iter().rev()),
        };
        chain.fold(values, |values, transformer| {
            self.apply_one(transformer, direction, values)
        })
    }

    fn apply_one(
        &self,
        transformer: &ItemTransformer,
        direction: Direction,
        values: Vec<String>,
    ) -> Vec<String> {
        match transformer {
            ItemTransformer::Lowercase => values.into_iter().map(|v| v.to_lowercase()).collect(),
            ItemTransformer::Uppercase => values.into_iter().map(|v| v.to_uppercase()).collect(),
            ItemTransformer::Trim => values.into_iter().map(|v| v.trim().to_string()).collect(),
            ItemTransformer::Prefix { value: prefix } => match direction {
                Direction::Propagation => values.into_iter().map(|v| format!("{prefix}{v}")).collect(),
                Direction::Pull => values
                    .into_iter()
                    .map(|v| match v.strip_prefix(prefix.as_str()) {
                        Some(stripped) => stripped.to_string(),
                        None => v,
                    })
                    .collect(),
            },
            ItemTransformer::Replace {
                pattern,
                replacement,
            } => values
                .into_iter()
                .map(|v| v.replace(pattern.as_str(), replacement))
                .collect(),
            ItemTransformer::Regex {
                pattern,
                replacement,
            } => match Regex::new(pattern) {
                Ok(re) => values
                    .into_iter()
                    .map(|v| re.replace_all(&v, replacement.as_str()).into_owned())
                    .collect(),
                Err(e) => {
                    debug!(pattern = %pattern, error = %e, "Invalid transformer pattern, skipping");
                    values
                }
            },
            ItemTransformer::Default { value } => {
                if values.is_empty() {
                    vec![value.clone()]
                } else {
                    values
                }
            }
            ItemTransformer::Script { source } => self.run_script(source, direction, values),
        }
    }

    fn run_script(&self, source: &str, direction: Direction, values: Vec<String>) -> Vec<String> {
        let engine = self.script_engine();
        let mut scope = Scope::new();
        scope.push("value", String::new());
        scope.push("direction", direction.as_str().to_string());

        let ast = match engine.compile_with_scope(&scope, source) {
            Ok(ast) => ast,
            Err(e) => {
                debug!(error = %e, "Transformer script does not compile, skipping");
                return values;
            }
        };

        let mut output = Vec::with_capacity(values.len());
        for value in &values {
            let mut scope = Scope::new();
            scope.push("value", value.clone());
            scope.push("direction", direction.as_str().to_string());

            match engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast) {
                Ok(result) => output.extend(dynamic_to_strings(result)),
                Err(e) => {
                    warn!(error = %e, "Transformer script failed, skipping");
                    return values;
                }
            }
        }
        output
    }
}

/// A string yields one value, an array one value per element, unit none.
fn dynamic_to_strings(result: Dynamic) -> Vec<String> {
    if result.is_unit() {
        Vec::new()
    } else if result.is_array() {
        result
            .into_array()
            .map(|items| {
                items
                    .into_iter()
                    .filter(|item| !item.is_unit())
                    .map(|item| item.to_string())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        vec![result.to_string()]
    }
}
