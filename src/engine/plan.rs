//! Call-plan resolution.
//!
//! Turns a procedure name plus HTTP parameters into an invocation text
//! and a typed bind set. Resolution order, first match wins: configured
//! path alias, `!`-prefixed variable-argument mode, fixed-argument mode
//! with catalog-driven array detection.

use std::collections::HashMap;

use crate::db::{Bind, BindSet, BindValue, Connection, OutSpec};
use crate::engine::error::GatewayError;

/// One HTTP argument: scalar, or array when the parameter repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Single(String),
    Multi(Vec<String>),
}

impl ArgValue {
    /// Append another occurrence of the same parameter, upgrading a
    /// scalar to an array.
    pub fn push(&mut self, value: String) {
        match self {
            ArgValue::Single(first) => {
                *self = ArgValue::Multi(vec![std::mem::take(first), value]);
            }
            ArgValue::Multi(values) => values.push(value),
        }
    }

    pub fn values(&self) -> Vec<String> {
        match self {
            ArgValue::Single(v) => vec![v.clone()],
            ArgValue::Multi(v) => v.clone(),
        }
    }
}

/// Resolved invocation: the call text and its bindings.
///
/// Invariant: every placeholder referenced in `invocation` has exactly
/// one entry in `binds` and vice versa.
#[derive(Debug, Clone, PartialEq)]
pub struct CallPlan {
    /// Target procedure as it will be called.
    pub target: String,
    /// Call statement, placeholders as `:name`, terminated by `;`.
    pub invocation: String,
    pub binds: BindSet,
}

/// Marker for variable-argument mode.
const FLEX_PREFIX: char = '!';

/// Plan-reserved placeholder names. Fixed-argument placeholders carry the
/// `a_` prefix and envelope placeholders end in `__`, so the three name
/// families can never collide.
const ALIAS_BIND: &str = "a_path";
const NAME_ARRAY_BIND: &str = "arg_names";
const VALUE_ARRAY_BIND: &str = "arg_values";

/// Catalog types that require array-shaped binding.
fn is_indexed_table(data_type: &str) -> bool {
    matches!(data_type, "PL/SQL TABLE" | "TABLE")
}

/// Procedure names may be schema-qualified; everything that reaches the
/// invocation text must pass this filter, since it is spliced into SQL.
fn valid_procedure_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && !name.contains("..")
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#' | '.'))
}

/// Argument names appear as `name=>` in the call text: identifier
/// characters only, no qualification.
fn valid_argument_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'))
}

/// Deterministic placeholder for an argument name. The `a_` prefix keeps
/// it clear of reserved envelope names.
fn placeholder(arg: &str) -> String {
    let mut p = String::with_capacity(arg.len() + 2);
    p.push_str("a_");
    for c in arg.chars() {
        if c.is_ascii_alphanumeric() {
            p.push(c.to_ascii_lowercase());
        } else {
            p.push('_');
        }
    }
    p
}

/// Builds call plans against a configured alias table.
pub struct CallPlanBuilder<'a> {
    aliases: &'a HashMap<String, String>,
}

impl<'a> CallPlanBuilder<'a> {
    pub fn new(aliases: &'a HashMap<String, String>) -> Self {
        Self { aliases }
    }

    /// Resolve a plan for `procedure` with the given ordered arguments.
    /// Catalog lookups run on `conn` in fixed-argument mode only.
    pub async fn build(
        &self,
        procedure: &str,
        args: &[(String, ArgValue)],
        conn: &mut dyn Connection,
    ) -> Result<CallPlan, GatewayError> {
        if let Some(target) = self.aliases.get(procedure) {
            return alias_plan(target, procedure);
        }

        if let Some(target) = procedure.strip_prefix(FLEX_PREFIX) {
            return flexible_plan(target, args);
        }

        let types = if args.is_empty() {
            HashMap::new()
        } else {
            resolve_argument_types(conn, procedure).await?
        };
        fixed_plan(procedure, args, &types)
    }
}

/// Path alias: call the configured target with the original request name
/// as its single argument.
pub(crate) fn alias_plan(target: &str, original: &str) -> Result<CallPlan, GatewayError> {
    if !valid_procedure_name(target) {
        return Err(GatewayError::request(format!(
            "invalid alias target procedure: {}",
            target
        )));
    }
    let mut binds = BindSet::new();
    binds.insert(ALIAS_BIND, Bind::In(BindValue::Str(original.to_string())));
    Ok(CallPlan {
        target: target.to_string(),
        invocation: format!("{}(:{});", target, ALIAS_BIND),
        binds,
    })
}

/// Variable-argument mode: two parallel arrays, multi-valued arguments
/// flattened into repeated (name, value) pairs in encounter order.
pub(crate) fn flexible_plan(
    target: &str,
    args: &[(String, ArgValue)],
) -> Result<CallPlan, GatewayError> {
    if !valid_procedure_name(target) {
        return Err(GatewayError::request(format!(
            "invalid procedure name: {}",
            target
        )));
    }

    let mut names = Vec::new();
    let mut values = Vec::new();
    for (name, value) in args {
        for v in value.values() {
            names.push(name.clone());
            values.push(v);
        }
    }

    let mut binds = BindSet::new();
    binds.insert(NAME_ARRAY_BIND, Bind::In(BindValue::StrArray(names)));
    binds.insert(VALUE_ARRAY_BIND, Bind::In(BindValue::StrArray(values)));
    Ok(CallPlan {
        target: target.to_string(),
        invocation: format!("{}(:{}, :{});", target, NAME_ARRAY_BIND, VALUE_ARRAY_BIND),
        binds,
    })
}

/// Fixed-argument mode: one named parameter per argument, array-shaped
/// when the HTTP value repeated or the declared type is an indexed table.
pub(crate) fn fixed_plan(
    target: &str,
    args: &[(String, ArgValue)],
    types: &HashMap<String, String>,
) -> Result<CallPlan, GatewayError> {
    if !valid_procedure_name(target) {
        return Err(GatewayError::request(format!(
            "invalid procedure name: {}",
            target
        )));
    }

    let mut binds = BindSet::new();
    let mut parts = Vec::with_capacity(args.len());

    for (name, value) in args {
        if !valid_argument_name(name) {
            return Err(GatewayError::request(format!(
                "invalid argument name: {}",
                name
            )));
        }
        let ph = placeholder(name);
        let table_typed = types
            .get(&name.to_lowercase())
            .is_some_and(|t| is_indexed_table(t));

        let bind_value = match value {
            ArgValue::Single(v) if !table_typed => BindValue::Str(v.clone()),
            ArgValue::Single(v) => BindValue::StrArray(vec![v.clone()]),
            ArgValue::Multi(vs) => BindValue::StrArray(vs.clone()),
        };

        if !binds.insert(&ph, Bind::In(bind_value)) {
            return Err(GatewayError::request(format!(
                "arguments collide on placeholder :{}",
                ph
            )));
        }
        parts.push(format!("{}=>:{}", name, ph));
    }

    let invocation = if parts.is_empty() {
        format!("{};", target)
    } else {
        format!("{}({});", target, parts.join(", "))
    };

    Ok(CallPlan {
        target: target.to_string(),
        invocation,
        binds,
    })
}

/// Anonymous block resolving a name to (schema, package, object).
const NAME_RESOLVE_BLOCK: &str = "\
begin
  dbms_utility.name_resolve(:name, 1, :schema, :part1, :part2, :dblink, :part1_type, :object_number);
end;";

const ARGUMENTS_SQL_PACKAGED: &str = "\
select argument_name, data_type
  from all_arguments
 where owner = :1
   and package_name = :2
   and object_name = :3
 order by overload, sequence";

const ARGUMENTS_SQL_STANDALONE: &str = "\
select argument_name, data_type
  from all_arguments
 where owner = :1
   and package_name is null
   and object_name = :2
 order by overload, sequence";

/// Resolve the declared argument types of a procedure from the system
/// catalog. Overloads fold into one mapping; the last declared type for
/// a name wins. Any failure here is a configuration fault, not a
/// transient one.
pub async fn resolve_argument_types(
    conn: &mut dyn Connection,
    procedure: &str,
) -> Result<HashMap<String, String>, GatewayError> {
    if !valid_procedure_name(procedure) {
        return Err(GatewayError::request(format!(
            "invalid procedure name: {}",
            procedure
        )));
    }

    let mut binds = BindSet::new();
    binds.insert("name", Bind::In(BindValue::Str(procedure.to_string())));
    for out in ["schema", "part1", "part2", "dblink"] {
        binds.insert(out, Bind::Out(OutSpec::Str { max_len: 128 }));
    }
    binds.insert("part1_type", Bind::Out(OutSpec::Int));
    binds.insert("object_number", Bind::Out(OutSpec::Int));

    let outcome = match conn.execute(NAME_RESOLVE_BLOCK, &binds).await {
        Ok(outcome) => outcome,
        Err(e) => {
            crate::engine::discard_if_fatal(&e, conn);
            return Err(GatewayError::request(format!(
                "cannot resolve procedure {}: {}",
                procedure, e
            )));
        }
    };

    let schema = outcome
        .str_out("schema")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            GatewayError::request(format!("catalog returned no schema for {}", procedure))
        })?
        .to_string();
    let part1 = outcome.str_out("part1").filter(|s| !s.is_empty());
    let part2 = outcome.str_out("part2").filter(|s| !s.is_empty());

    // For a packaged subprogram part1 is the package and part2 the
    // procedure; standalone procedures report the object in part1 alone.
    let rows = match (part1, part2) {
        (Some(package), Some(object)) => {
            conn.query(
                ARGUMENTS_SQL_PACKAGED,
                &[
                    BindValue::Str(schema),
                    BindValue::Str(package.to_string()),
                    BindValue::Str(object.to_string()),
                ],
            )
            .await
        }
        (Some(object), None) | (None, Some(object)) => {
            conn.query(
                ARGUMENTS_SQL_STANDALONE,
                &[BindValue::Str(schema), BindValue::Str(object.to_string())],
            )
            .await
        }
        (None, None) => {
            return Err(GatewayError::request(format!(
                "catalog returned no object name for {}",
                procedure
            )))
        }
    };
    let rows = match rows {
        Ok(rows) => rows,
        Err(e) => {
            crate::engine::discard_if_fatal(&e, conn);
            return Err(GatewayError::request(format!(
                "argument lookup failed for {}: {}",
                procedure, e
            )));
        }
    };

    let mut types = HashMap::with_capacity(rows.len());
    for row in rows {
        if row.len() < 2 {
            return Err(GatewayError::request(format!(
                "malformed catalog row for {}",
                procedure
            )));
        }
        let name = match &row[0] {
            Some(n) => n.to_lowercase(),
            // Function return values have a null argument name
            None => continue,
        };
        let data_type = row[1].clone().ok_or_else(|| {
            GatewayError::request(format!("catalog row missing data type for {}", procedure))
        })?;
        types.insert(name, data_type);
    }
    Ok(types)
}
