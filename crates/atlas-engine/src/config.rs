//! Generator configuration: decorator arguments, JSON and TOML files.
//!
//! The same [`GeneratorConfig`] is produced by a `@generator(...)` decorator
//! and by a configuration file:
//!
//! ```toml
//! name = "bits"
//! group = "strings"
//! strategy = { kind = "randomized", seed = 7 }
//!
//! [metadata]
//! owner = "search"
//! ```

use std::path::Path;

use atlas_core::{Decorator, Expr, Literal, Spanned, UnaryOp, Value};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AtlasError, AtlasResult};
use crate::strategy::{RandomizedStrategy, StrategyHandle};

/// Keys accepted by the call form of the `@generator` decorator.
pub const DECORATOR_KEYS: &[&str] = &["strategy", "name", "group", "metadata"];

/// How a generator is registered and which strategy it starts with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Initial strategy. Defaults to depth-first search.
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,
    /// Registry name.
    #[serde(default)]
    pub name: Option<String>,
    /// Group sharing one strategy.
    #[serde(default)]
    pub group: Option<String>,
    /// Free-form user data.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A strategy by name, or with options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StrategyConfig {
    Name(String),
    Detailed {
        kind: String,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl StrategyConfig {
    pub fn kind(&self) -> &str {
        match self {
            StrategyConfig::Name(kind) | StrategyConfig::Detailed { kind, .. } => kind,
        }
    }

    /// Instantiate the configured strategy.
    pub fn build(&self) -> AtlasResult<StrategyHandle> {
        match self {
            StrategyConfig::Detailed {
                kind,
                seed: Some(seed),
            } if kind == "randomized" => Ok(StrategyHandle::new(RandomizedStrategy::with_seed(*seed))),
            StrategyConfig::Detailed { kind, seed: Some(_) } => Err(AtlasError::Config(format!(
                "strategy `{}` does not take a seed",
                kind
            ))),
            other => StrategyHandle::named(other.kind()),
        }
    }
}

impl GeneratorConfig {
    pub fn from_json_str(json: &str) -> AtlasResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_toml_str(toml: &str) -> AtlasResult<Self> {
        Ok(toml::from_str(toml)?)
    }

    /// Load a `.json` or `.toml` file.
    pub fn load(path: &Path) -> AtlasResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content)?,
            Some("toml") => Self::from_toml_str(&content)?,
            _ => {
                return Err(AtlasError::Config(format!(
                    "unsupported config file {} (expected .json or .toml)",
                    path.display()
                )))
            }
        };
        info!(path = %path.display(), "generator_config_loaded");
        Ok(config)
    }

    /// Read the arguments of a registration decorator.
    ///
    /// `@generator` yields the defaults. The call form accepts the keywords
    /// in [`DECORATOR_KEYS`] with literal values; `metadata` is a list of
    /// `[key, value]` pairs.
    pub fn from_decorator(decorator: &Decorator, file: &str) -> AtlasResult<Self> {
        let error = |message: String| AtlasError::InvalidDecorator {
            decorator: decorator.to_string(),
            file: file.to_string(),
            line: decorator.span.line,
            message,
        };
        let Some(args) = &decorator.args else {
            return Ok(Self::default());
        };
        if !args.positional.is_empty() {
            return Err(error("positional arguments are not supported".to_string()));
        }
        if args.keywords.is_empty() {
            return Err(error(
                "use the bare form or pass keyword arguments".to_string(),
            ));
        }

        let mut config = Self::default();
        for kw in &args.keywords {
            let value = const_value(&kw.value)
                .ok_or_else(|| error(format!("value of `{}` must be a literal", kw.name)))?;
            let text = |value: Value| match value {
                Value::Str(s) => Ok(s),
                other => Err(error(format!(
                    "`{}` must be a string, got {}",
                    kw.name,
                    other.type_name()
                ))),
            };
            match kw.name.as_str() {
                "strategy" => config.strategy = Some(StrategyConfig::Name(text(value)?)),
                "name" => config.name = Some(text(value)?),
                "group" => config.group = Some(text(value)?),
                "metadata" => config.metadata = metadata_pairs(value).map_err(error)?,
                other => {
                    return Err(error(format!(
                        "unknown argument `{}` (expected one of: {})",
                        other,
                        DECORATOR_KEYS.join(", ")
                    )))
                }
            }
        }
        Ok(config)
    }
}

fn metadata_pairs(value: Value) -> Result<serde_json::Map<String, serde_json::Value>, String> {
    let Value::List(pairs) = value else {
        return Err("`metadata` must be a list of [key, value] pairs".to_string());
    };
    let mut map = serde_json::Map::new();
    for pair in pairs {
        match pair {
            Value::List(kv) if kv.len() == 2 => match (&kv[0], &kv[1]) {
                (Value::Str(key), value) => {
                    map.insert(key.clone(), value.to_json());
                }
                _ => return Err("metadata keys must be strings".to_string()),
            },
            _ => return Err("`metadata` must be a list of [key, value] pairs".to_string()),
        }
    }
    Ok(map)
}

/// Evaluate a constant expression: literals, lists of constants and
/// negated numbers.
fn const_value(expr: &Spanned<Expr>) -> Option<Value> {
    match &expr.node {
        Expr::Literal(lit) => Some(lit.to_value()),
        Expr::List(items) => items.iter().map(const_value).collect::<Option<Vec<_>>>().map(Value::List),
        Expr::Unary {
            op: UnaryOp::Neg,
            expr,
        } => match &expr.node {
            Expr::Literal(Literal::Int(i)) => i.checked_neg().map(Value::Int),
            Expr::Literal(Literal::Float(f)) => Some(Value::Float(-f)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::parse_function;
    use std::io::Write;

    fn decorator(src: &str) -> Decorator {
        let def = parse_function("<test>", &format!("{}\nfn g() {{ return 1; }}", src)).unwrap();
        def.decorators.into_iter().next().unwrap()
    }

    #[test]
    fn test_bare_decorator_is_default() {
        let config = GeneratorConfig::from_decorator(&decorator("@generator"), "<test>").unwrap();
        assert_eq!(config, GeneratorConfig::default());
    }

    #[test]
    fn test_keyword_decorator() {
        let config = GeneratorConfig::from_decorator(
            &decorator(r#"@generator(strategy="randomized", name="bits", group="g1", metadata=[["n", 2]])"#),
            "<test>",
        )
        .unwrap();
        assert_eq!(config.strategy, Some(StrategyConfig::Name("randomized".into())));
        assert_eq!(config.name.as_deref(), Some("bits"));
        assert_eq!(config.group.as_deref(), Some("g1"));
        assert_eq!(config.metadata["n"], serde_json::json!(2));
    }

    #[test]
    fn test_decorator_misuse() {
        for src in [
            r#"@generator("dfs")"#,
            "@generator()",
            r#"@generator(strategy="dfs", caching=true)"#,
            "@generator(name=other)",
            "@generator(name=3)",
        ] {
            let err = GeneratorConfig::from_decorator(&decorator(src), "<test>").unwrap_err();
            assert!(
                matches!(err, AtlasError::InvalidDecorator { line: 1, .. }),
                "{}: {}",
                src,
                err
            );
        }
    }

    #[test]
    fn test_strategy_config_build() {
        assert_eq!(StrategyConfig::Name("dfs".into()).build().unwrap().name(), "dfs");
        let seeded = StrategyConfig::Detailed {
            kind: "randomized".into(),
            seed: Some(3),
        };
        assert_eq!(seeded.build().unwrap().name(), "randomized");
        assert!(StrategyConfig::Name("bfs".into()).build().is_err());
        let bad_seed = StrategyConfig::Detailed {
            kind: "dfs".into(),
            seed: Some(3),
        };
        assert!(bad_seed.build().is_err());
    }

    #[test]
    fn test_load_files_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("gen.toml");
        let mut file = std::fs::File::create(&toml_path).unwrap();
        writeln!(file, "name = \"bits\"\nstrategy = {{ kind = \"randomized\", seed = 7 }}").unwrap();
        let config = GeneratorConfig::load(&toml_path).unwrap();
        assert_eq!(config.name.as_deref(), Some("bits"));
        assert_eq!(
            config.strategy,
            Some(StrategyConfig::Detailed {
                kind: "randomized".into(),
                seed: Some(7)
            })
        );

        let json_path = dir.path().join("gen.json");
        std::fs::write(&json_path, r#"{"group": "g", "strategy": "dfs"}"#).unwrap();
        let config = GeneratorConfig::load(&json_path).unwrap();
        assert_eq!(config.group.as_deref(), Some("g"));

        std::fs::write(&json_path, r#"{"caching": true}"#).unwrap();
        assert!(matches!(GeneratorConfig::load(&json_path), Err(AtlasError::Json(_))));

        let yaml_path = dir.path().join("gen.yaml");
        std::fs::write(&yaml_path, "name: x").unwrap();
        assert!(matches!(GeneratorConfig::load(&yaml_path), Err(AtlasError::Config(_))));
    }
}
