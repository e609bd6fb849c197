//! Condition evaluation: compiled expressions plus named native rules.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::condition::{self, Condition};
use crate::errors::RbacError;
use crate::types::Params;

type RuleFn = dyn Fn(&Params, &Value) -> Result<bool, String> + Send + Sync;

/// Native predicates referenced from conditions as `@name`.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, Arc<RuleFn>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rule` under `name`, replacing any previous rule of that name.
    pub fn register<F>(&mut self, name: impl Into<String>, rule: F)
    where
        F: Fn(&Params, &Value) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.rules.insert(name.into(), Arc::new(rule));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&Arc<RuleFn>> {
        self.rules.get(name)
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.rules.keys().collect();
        names.sort();
        f.debug_struct("RuleRegistry").field("rules", &names).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    rules: RuleRegistry,
    surface_errors: bool,
}

impl Evaluator {
    pub fn new(rules: RuleRegistry, surface_errors: bool) -> Self {
        Self {
            rules,
            surface_errors,
        }
    }

    pub fn rules_mut(&mut self) -> &mut RuleRegistry {
        &mut self.rules
    }

    pub fn set_surface_errors(&mut self, surface_errors: bool) {
        self.surface_errors = surface_errors;
    }

    /// Evaluate an optional condition. A missing condition always passes.
    ///
    /// Failures become `false` unless `surface_errors` is set, in which case
    /// they are returned as [`RbacError::PredicateEvaluation`].
    pub fn evaluate(
        &self,
        condition: Option<&Condition>,
        params: &Params,
        data: &Value,
    ) -> Result<bool, RbacError> {
        let Some(condition) = condition else {
            return Ok(true);
        };

        let outcome = match condition {
            Condition::Expression { expr, .. } => {
                let mut ctx = Map::with_capacity(2);
                ctx.insert("params".into(), Value::Object(params.clone()));
                ctx.insert("data".into(), data.clone());
                condition::evaluate(expr, &Value::Object(ctx)).map_err(|e| e.to_string())
            }
            Condition::Rule(name) => match self.rules.get(name) {
                Some(rule) => rule(params, data),
                None => Err(format!("no rule registered under `{name}`")),
            },
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(reason) if self.surface_errors => Err(RbacError::PredicateEvaluation {
                condition: condition.to_string(),
                reason,
            }),
            Err(reason) => {
                tracing::warn!(%condition, %reason, "condition failed to evaluate, treating as false");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    #[test]
    fn test_missing_condition_passes() {
        let eval = Evaluator::default();
        assert!(eval.evaluate(None, &Params::new(), &Value::Null).unwrap());
    }

    #[test]
    fn test_expression_sees_params_and_data() {
        let eval = Evaluator::default();
        let cond = Condition::parse("params.hour >= data.opens && params.hour < data.closes").unwrap();
        let data = json!({ "opens": 9, "closes": 17 });

        assert!(eval
            .evaluate(Some(&cond), &params(json!({ "hour": 10 })), &data)
            .unwrap());
        assert!(!eval
            .evaluate(Some(&cond), &params(json!({ "hour": 20 })), &data)
            .unwrap());
    }

    #[test]
    fn test_registered_rule() {
        let mut rules = RuleRegistry::new();
        rules.register("is_owner", |p: &Params, _: &Value| {
            Ok(p.get("ownerId").is_some() && p.get("ownerId") == p.get("userId"))
        });
        assert!(rules.contains("is_owner"));

        let eval = Evaluator::new(rules, false);
        let cond = Condition::Rule("is_owner".into());
        assert!(eval
            .evaluate(
                Some(&cond),
                &params(json!({ "ownerId": "alice", "userId": "alice" })),
                &Value::Null
            )
            .unwrap());
        assert!(!eval
            .evaluate(
                Some(&cond),
                &params(json!({ "ownerId": "bob", "userId": "alice" })),
                &Value::Null
            )
            .unwrap());
    }

    #[test]
    fn test_fail_closed_by_default() {
        let eval = Evaluator::default();
        let unknown = Condition::Rule("nope".into());
        assert!(!eval.evaluate(Some(&unknown), &Params::new(), &Value::Null).unwrap());

        let bad_type = Condition::parse("params.name > 1").unwrap();
        let p = params(json!({ "name": "x" }));
        assert!(!eval.evaluate(Some(&bad_type), &p, &Value::Null).unwrap());
    }

    #[test]
    fn test_surface_errors() {
        let mut rules = RuleRegistry::new();
        rules.register("broken", |_: &Params, _: &Value| Err("upstream unavailable".to_string()));
        let eval = Evaluator::new(rules, true);

        let err = eval
            .evaluate(Some(&Condition::Rule("broken".into())), &Params::new(), &Value::Null)
            .unwrap_err();
        match err {
            RbacError::PredicateEvaluation { condition, reason } => {
                assert_eq!(condition, "@broken");
                assert_eq!(reason, "upstream unavailable");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
