//! Aggregate function and time grain registry
//!
//! Closed lookup table from user-facing names (and the aliases people and models
//! tend to use) to `AggFunc`/`TimeGrain`, plus role compatibility per function.

use serde::Serialize;
use std::collections::HashMap;
use tally_ir::{AggFunc, ColumnRole, TimeGrain};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Time grain not found: {0}")]
    GrainNotFound(String),

    #[error("Function {func} cannot aggregate {role} column '{column}'")]
    RoleMismatch {
        func: AggFunc,
        column: String,
        role: ColumnRole,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSignature {
    pub func: AggFunc,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Roles the target column may have; `None` accepts any column
    pub accepts: Option<&'static [ColumnRole]>,
    pub description: &'static str,
}

impl FunctionSignature {
    pub fn accepts(&self, role: ColumnRole) -> bool {
        self.accepts.map_or(true, |roles| roles.contains(&role))
    }
}

pub struct FunctionRegistry {
    functions: HashMap<AggFunc, FunctionSignature>,
    names: HashMap<String, AggFunc>,
    grains: HashMap<String, TimeGrain>,
}

const MEASURE_ONLY: &[ColumnRole] = &[ColumnRole::Measure];

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
            names: HashMap::new(),
            grains: HashMap::new(),
        };
        registry.register_builtins();
        registry.register_grains();
        registry
    }

    fn register_builtins(&mut self) {
        self.register(FunctionSignature {
            func: AggFunc::Sum,
            name: "sum",
            aliases: &["total", "add"],
            accepts: Some(MEASURE_ONLY),
            description: "total of non-missing values, 0 when none",
        });

        self.register(FunctionSignature {
            func: AggFunc::Mean,
            name: "mean",
            aliases: &["avg", "average"],
            accepts: Some(MEASURE_ONLY),
            description: "arithmetic mean of non-missing values",
        });

        // Counting rows works on any column, missing values included
        self.register(FunctionSignature {
            func: AggFunc::Count,
            name: "count",
            aliases: &["n", "number"],
            accepts: None,
            description: "number of rows in the group",
        });

        self.register(FunctionSignature {
            func: AggFunc::Min,
            name: "min",
            aliases: &["minimum", "lowest"],
            accepts: Some(MEASURE_ONLY),
            description: "smallest non-missing value",
        });

        self.register(FunctionSignature {
            func: AggFunc::Max,
            name: "max",
            aliases: &["maximum", "highest"],
            accepts: Some(MEASURE_ONLY),
            description: "largest non-missing value",
        });
    }

    fn register_grains(&mut self) {
        for (grain, names) in [
            (TimeGrain::None, &["none", "all", "total"][..]),
            (TimeGrain::Daily, &["daily", "day", "days", "d"][..]),
            (TimeGrain::Weekly, &["weekly", "week", "weeks", "w"][..]),
            (TimeGrain::Monthly, &["monthly", "month", "months", "m"][..]),
            (TimeGrain::Quarterly, &["quarterly", "quarter", "quarters", "q"][..]),
        ] {
            for name in names {
                self.grains.insert(name.to_string(), grain);
            }
        }
    }

    pub fn register(&mut self, sig: FunctionSignature) {
        self.names.insert(sig.name.to_string(), sig.func);
        for alias in sig.aliases {
            self.names.insert(alias.to_string(), sig.func);
        }
        self.functions.insert(sig.func, sig);
    }

    /// Resolve a function name or alias, case-insensitively
    pub fn lookup(&self, name: &str) -> Result<&FunctionSignature, RegistryError> {
        let key = name.trim().to_lowercase();
        self.names
            .get(&key)
            .and_then(|func| self.functions.get(func))
            .ok_or_else(|| RegistryError::FunctionNotFound(name.to_string()))
    }

    pub fn signature(&self, func: AggFunc) -> &FunctionSignature {
        // Every AggFunc variant is registered in register_builtins
        &self.functions[&func]
    }

    /// Resolve a grain name or alias, case-insensitively
    pub fn grain(&self, name: &str) -> Result<TimeGrain, RegistryError> {
        let key = name.trim().to_lowercase();
        self.grains
            .get(&key)
            .copied()
            .ok_or_else(|| RegistryError::GrainNotFound(name.to_string()))
    }

    /// Check that `func` may aggregate a column with the given role
    pub fn check_role(&self, func: AggFunc, column: &str, role: ColumnRole) -> Result<(), RegistryError> {
        if self.signature(func).accepts(role) {
            Ok(())
        } else {
            Err(RegistryError::RoleMismatch {
                func,
                column: column.to_string(),
                role,
            })
        }
    }

    /// Canonical signatures in declaration order
    pub fn signatures(&self) -> impl Iterator<Item = &FunctionSignature> {
        AggFunc::ALL.iter().map(|f| self.signature(*f))
    }

    /// Function catalog as JSON, for prompts and the HTTP schema endpoint
    pub fn catalog_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.signatures()
                .map(|sig| {
                    serde_json::json!({
                        "name": sig.name,
                        "applies_to": match sig.accepts {
                            Some(_) => "measure columns",
                            None => "any column",
                        },
                        "description": sig.description,
                    })
                })
                .collect(),
        )
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
