//! Static query validation against the clause vocabulary and a schema
//!
//! Validates:
//! - Grammar (known top-level keys, clause names and parameters)
//! - Field existence
//! - Field type compatibility (ranges, literals, patterns, sorting, aggregations)
//!
//! Every check runs; issues come back in pre-order document order.

use nlq_dsl::{InputFormatError, Object, Query};
use nlq_registry::{
    AggregationKind, ClauseRegistry, ClauseShape, ClauseSignature, ValueKind, LEAF_META_KEYS,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::schema::{FieldType, SchemaMapping, TypeFamily};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    UnknownField,
    TypeMismatch,
    MalformedClause,
    UnsupportedOperator,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueKind::UnknownField => "UnknownField",
            IssueKind::TypeMismatch => "TypeMismatch",
            IssueKind::MalformedClause => "MalformedClause",
            IssueKind::UnsupportedOperator => "UnsupportedOperator",
        };
        f.write_str(name)
    }
}

/// A structured finding; not an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: Vec<String>,
    pub kind: IssueKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: Vec<String>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            message: message.into(),
        }
    }

    pub fn dotted_path(&self) -> String {
        if self.path.is_empty() {
            "<root>".to_string()
        } else {
            self.path.join(".")
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.dotted_path(), self.message)
    }
}

/// Numbered list of issues, used as generation feedback and error text
pub fn describe_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .enumerate()
        .map(|(i, issue)| format!("{}. {}", i + 1, issue))
        .collect::<Vec<_>>()
        .join("\n")
}

fn standard_registry() -> &'static ClauseRegistry {
    static REGISTRY: OnceLock<ClauseRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ClauseRegistry::new)
}

/// Validate `query` against `schema` with the standard clause vocabulary
pub fn validate(query: &Query, schema: &SchemaMapping) -> Result<Vec<ValidationIssue>, InputFormatError> {
    Validator::new(standard_registry(), schema).validate(query)
}

pub struct Validator<'a> {
    registry: &'a ClauseRegistry,
    schema: &'a SchemaMapping,
}

impl<'a> Validator<'a> {
    pub fn new(registry: &'a ClauseRegistry, schema: &'a SchemaMapping) -> Self {
        Self { registry, schema }
    }

    /// Fails only when the document is not an object at the root
    pub fn validate(&self, query: &Query) -> Result<Vec<ValidationIssue>, InputFormatError> {
        let root = query
            .as_object()
            .ok_or(InputFormatError::NotAnObject(query.kind_name()))?;

        let mut walk = Walk {
            registry: self.registry,
            schema: self.schema,
            issues: Vec::new(),
        };
        walk.document(root);

        tracing::trace!(issues = walk.issues.len(), "Validated query");
        Ok(walk.issues)
    }
}

/// How a field reference resolved
enum Resolution {
    Known(FieldType),
    /// No schema, meta field, or under an undeclared subtree
    Tolerated,
    Missing,
}

struct Walk<'a> {
    registry: &'a ClauseRegistry,
    schema: &'a SchemaMapping,
    issues: Vec<ValidationIssue>,
}

fn child(path: &[String], key: &str) -> Vec<String> {
    let mut next = path.to_vec();
    next.push(key.to_string());
    next
}

fn index(path: &[String], i: usize) -> Vec<String> {
    child(path, &i.to_string())
}

impl Walk<'_> {
    fn report(&mut self, path: Vec<String>, kind: IssueKind, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(path, kind, message));
    }

    fn document(&mut self, root: &Object) {
        for (key, value) in root {
            let path = vec![key.clone()];
            if !self.registry.is_top_level_key(key) {
                self.report(path, IssueKind::MalformedClause, format!("Unknown top-level key '{}'", key));
                continue;
            }

            match key.as_str() {
                "query" | "post_filter" => self.query_clause(value, &path),
                "from" | "size" | "terminate_after" => {
                    if value.as_u64().is_none() {
                        self.report(
                            path,
                            IssueKind::MalformedClause,
                            format!("'{}' must be a non-negative integer, got {}", key, value),
                        );
                    }
                }
                "sort" => self.sort(value, &path),
                "aggs" | "aggregations" => self.aggregations(value, &path),
                _ => {}
            }
        }
    }

    fn query_clause(&mut self, node: &Query, path: &[String]) {
        let Some(clause) = node.as_object() else {
            self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("Query clause must be a JSON object, got {}", node.kind_name()),
            );
            return;
        };

        if clause.is_empty() {
            self.report(path.to_vec(), IssueKind::MalformedClause, "Query clause cannot be empty");
            return;
        }
        if clause.len() > 1 {
            let names: Vec<&str> = clause.keys().map(String::as_str).collect();
            self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("Query clause must contain exactly one query type, found: {}", names.join(", ")),
            );
        }

        let registry = self.registry;
        for (name, body) in clause {
            let clause_path = child(path, name);
            match registry.lookup(name) {
                Ok(sig) => self.clause(sig, body, &clause_path),
                Err(e) => self.report(clause_path, IssueKind::MalformedClause, e.to_string()),
            }
        }
    }

    fn clause(&mut self, sig: &ClauseSignature, body: &Query, path: &[String]) {
        tracing::trace!(clause = %sig.name, path = %path.join("."), "Checking clause");

        if sig.shape == ClauseShape::FieldLeaf {
            self.leaf(sig, body, path);
            return;
        }

        let Some(obj) = body.as_object() else {
            self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("'{}' query must be a JSON object", sig.name),
            );
            return;
        };

        match sig.shape {
            ClauseShape::FieldLeaf | ClauseShape::Opaque => {}
            ClauseShape::MatchAll => self.unknown_params(sig, obj, path),
            ClauseShape::Exists => {
                self.unknown_params(sig, obj, path);
                match obj.get("field") {
                    Some(Query::String(field)) => {
                        self.resolve(&child(path, "field"), field);
                    }
                    _ => self.report(
                        path.to_vec(),
                        IssueKind::MalformedClause,
                        "'exists' query must have a string 'field'",
                    ),
                }
            }
            ClauseShape::FieldList => {
                self.unknown_params(sig, obj, path);
                if !obj.contains_key("query") {
                    self.report(
                        path.to_vec(),
                        IssueKind::MalformedClause,
                        format!("'{}' query must have a 'query'", sig.name),
                    );
                }
                if let Some(fields) = obj.get("fields") {
                    self.field_list(fields, &child(path, "fields"));
                }
            }
            ClauseShape::Nested => {
                self.unknown_params(sig, obj, path);
                match obj.get("path") {
                    Some(Query::String(nested_path)) => {
                        let at = child(path, "path");
                        if let Resolution::Known(ty) = self.resolve(&at, nested_path) {
                            if ty != FieldType::Nested {
                                self.report(
                                    at,
                                    IssueKind::TypeMismatch,
                                    format!("'nested' path '{}' is of type '{}', not 'nested'", nested_path, ty),
                                );
                            }
                        }
                    }
                    _ => self.report(
                        path.to_vec(),
                        IssueKind::MalformedClause,
                        "'nested' query must have a string 'path'",
                    ),
                }
                match obj.get("query") {
                    Some(inner) => self.query_clause(inner, &child(path, "query")),
                    None => self.report(
                        path.to_vec(),
                        IssueKind::MalformedClause,
                        "'nested' query must have a 'query'",
                    ),
                }
            }
            ClauseShape::Compound => {
                for (key, value) in obj {
                    let slot = child(path, key);
                    if sig.is_child_slot(key) {
                        match value {
                            Query::Array(items) => {
                                for (i, item) in items.iter().enumerate() {
                                    self.query_clause(item, &index(&slot, i));
                                }
                            }
                            Query::Object(_) => self.query_clause(value, &slot),
                            other => self.report(
                                slot,
                                IssueKind::MalformedClause,
                                format!("'{}' clause must be a JSON object or array, got {}", key, other.kind_name()),
                            ),
                        }
                    } else if !sig.accepts_param(key) {
                        self.report(
                            slot,
                            IssueKind::MalformedClause,
                            format!("Unknown '{}' clause '{}'", sig.name, key),
                        );
                    }
                }
            }
        }
    }

    fn unknown_params(&mut self, sig: &ClauseSignature, obj: &Object, path: &[String]) {
        for key in obj.keys() {
            if !sig.accepts_param(key) {
                self.report(
                    child(path, key),
                    IssueKind::MalformedClause,
                    format!("Unknown parameter '{}' in '{}' query", key, sig.name),
                );
            }
        }
    }

    fn field_list(&mut self, fields: &Query, path: &[String]) {
        let Some(items) = fields.as_array() else {
            self.report(path.to_vec(), IssueKind::MalformedClause, "'fields' must be an array of field names");
            return;
        };

        for (i, item) in items.iter().enumerate() {
            let at = index(path, i);
            match item.as_str() {
                Some(raw) => {
                    let name = raw.split('^').next().unwrap_or(raw);
                    if !name.contains('*') {
                        self.resolve(&at, name);
                    }
                }
                None => self.report(at, IssueKind::MalformedClause, "Field names must be strings"),
            }
        }
    }

    /// Resolve a field reference, reporting `UnknownField` when it is absent
    fn resolve(&mut self, path: &[String], field: &str) -> Resolution {
        if self.schema.is_empty() || field.starts_with('_') || self.schema.is_tolerated(field) {
            return Resolution::Tolerated;
        }

        match self.schema.lookup(field) {
            Some(ty) => Resolution::Known(ty),
            None => {
                self.report(
                    path.to_vec(),
                    IssueKind::UnknownField,
                    format!("Field '{}' does not exist in the mapping", field),
                );
                Resolution::Missing
            }
        }
    }

    fn leaf(&mut self, sig: &ClauseSignature, body: &Query, path: &[String]) {
        let Some(obj) = body.as_object() else {
            self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("'{}' query must map a field to its value", sig.name),
            );
            return;
        };

        let fields: Vec<(&String, &Query)> = obj
            .iter()
            .filter(|(k, _)| !LEAF_META_KEYS.contains(&k.as_str()))
            .collect();

        if fields.is_empty() {
            self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("'{}' query must reference a field", sig.name),
            );
            return;
        }
        if fields.len() > 1 {
            let names: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
            self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("'{}' query must reference exactly one field, found: {}", sig.name, names.join(", ")),
            );
        }

        for (field, value) in fields {
            let field_path = child(path, field);
            let field_type = match self.resolve(&field_path, field) {
                Resolution::Known(FieldType::Unknown) => None,
                Resolution::Known(ty) if ty.family() == TypeFamily::Object => {
                    self.report(
                        field_path.clone(),
                        IssueKind::TypeMismatch,
                        format!("'{}' is an {} field; reference one of its sub-fields", field, ty),
                    );
                    None
                }
                Resolution::Known(ty) => Some(ty),
                Resolution::Tolerated | Resolution::Missing => None,
            };

            match sig.value_kind {
                ValueKind::Range => self.range(sig, field, value, &field_path, field_type),
                ValueKind::FullText => self.full_text(sig, field, value, &field_path),
                ValueKind::Literal => self.literal(sig, field, value, &field_path, field_type),
                ValueKind::Pattern => self.pattern(sig, field, value, &field_path, field_type),
                ValueKind::None => {}
            }
        }
    }

    fn range(
        &mut self,
        sig: &ClauseSignature,
        field: &str,
        value: &Query,
        path: &[String],
        field_type: Option<FieldType>,
    ) {
        let Some(bounds) = value.as_object() else {
            self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("'range' on '{}' must be an object of bounds", field),
            );
            return;
        };

        let comparable = match field_type {
            Some(ty) if !range_compatible(ty) => {
                self.report(
                    path.to_vec(),
                    IssueKind::TypeMismatch,
                    format!("'range' is not supported on field '{}' of type '{}'", field, ty),
                );
                None
            }
            other => other,
        };

        let custom_format = bounds.contains_key("format");
        for (op, bound) in bounds {
            let op_path = child(path, op);
            if !sig.accepts_param(op) {
                self.report(
                    op_path,
                    IssueKind::UnsupportedOperator,
                    format!("Unsupported range operator '{}'; expected gt, gte, lt or lte", op),
                );
                continue;
            }
            if !matches!(op.as_str(), "gt" | "gte" | "lt" | "lte" | "from" | "to") {
                continue;
            }
            if let Some(ty) = comparable {
                if let Some(problem) = check_bound(ty, bound, custom_format) {
                    self.report(
                        op_path,
                        IssueKind::TypeMismatch,
                        format!("{} for field '{}' of type '{}'", problem, field, ty),
                    );
                }
            }
        }
    }

    fn full_text(&mut self, sig: &ClauseSignature, field: &str, value: &Query, path: &[String]) {
        match value {
            Query::String(_) | Query::Number(_) | Query::Bool(_) => {}
            Query::Object(params) => {
                self.leaf_params(sig, params, path);
                if !params.contains_key("query") {
                    self.report(
                        path.to_vec(),
                        IssueKind::MalformedClause,
                        format!("'{}' on '{}' must have a 'query'", sig.name, field),
                    );
                }
                if let Some(operator) = params.get("operator") {
                    let ok = operator
                        .as_str()
                        .is_some_and(|op| op.eq_ignore_ascii_case("and") || op.eq_ignore_ascii_case("or"));
                    if !ok {
                        self.report(
                            child(path, "operator"),
                            IssueKind::UnsupportedOperator,
                            format!("'operator' must be \"and\" or \"or\", got {}", operator),
                        );
                    }
                }
            }
            other => self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("'{}' value for '{}' must be a string or object, got {}", sig.name, field, other.kind_name()),
            ),
        }
    }

    fn literal(
        &mut self,
        sig: &ClauseSignature,
        field: &str,
        value: &Query,
        path: &[String],
        field_type: Option<FieldType>,
    ) {
        if sig.name == "terms" {
            match value {
                Query::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        self.check_literal(field, item, &index(path, i), field_type);
                    }
                }
                // Terms lookup: {"index": ..., "id": ..., "path": ...}
                Query::Object(_) => {}
                other => self.report(
                    path.to_vec(),
                    IssueKind::MalformedClause,
                    format!("'terms' on '{}' requires an array of values, got {}", field, other.kind_name()),
                ),
            }
            return;
        }

        match value {
            Query::Object(params) => {
                self.leaf_params(sig, params, path);
                match params.get("value") {
                    Some(literal) => self.check_literal(field, literal, &child(path, "value"), field_type),
                    None => self.report(
                        path.to_vec(),
                        IssueKind::MalformedClause,
                        format!("'{}' on '{}' must have a 'value'", sig.name, field),
                    ),
                }
            }
            Query::Array(_) | Query::Null => self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("'{}' on '{}' requires a single value; use 'terms' for several", sig.name, field),
            ),
            scalar => self.check_literal(field, scalar, path, field_type),
        }
    }

    fn check_literal(&mut self, field: &str, literal: &Query, path: &[String], field_type: Option<FieldType>) {
        let Some(ty) = field_type else { return };
        let fits = match ty.family() {
            TypeFamily::Numeric => match literal {
                Query::Number(_) => true,
                Query::String(s) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            },
            TypeFamily::Boolean => match literal {
                Query::Bool(_) => true,
                Query::String(s) => s == "true" || s == "false",
                _ => false,
            },
            TypeFamily::Date => match literal {
                Query::Number(_) => true,
                Query::String(s) => is_date_literal(s),
                _ => false,
            },
            _ => !matches!(literal, Query::Object(_) | Query::Array(_)),
        };

        if !fits {
            self.report(
                path.to_vec(),
                IssueKind::TypeMismatch,
                format!("Value {} does not match field '{}' of type '{}'", literal, field, ty),
            );
        }
    }

    fn pattern(
        &mut self,
        sig: &ClauseSignature,
        field: &str,
        value: &Query,
        path: &[String],
        field_type: Option<FieldType>,
    ) {
        if let Some(ty) = field_type {
            if !matches!(ty.family(), TypeFamily::Text | TypeFamily::Keyword | TypeFamily::Ip | TypeFamily::Other) {
                self.report(
                    path.to_vec(),
                    IssueKind::TypeMismatch,
                    format!("'{}' requires a string field; '{}' is of type '{}'", sig.name, field, ty),
                );
            }
        }

        match value {
            Query::String(_) => {}
            Query::Object(params) => {
                self.leaf_params(sig, params, path);
                if !params.contains_key("value") && !params.contains_key("wildcard") {
                    self.report(
                        path.to_vec(),
                        IssueKind::MalformedClause,
                        format!("'{}' on '{}' must have a 'value'", sig.name, field),
                    );
                }
            }
            other => self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("'{}' value for '{}' must be a string or object, got {}", sig.name, field, other.kind_name()),
            ),
        }
    }

    fn leaf_params(&mut self, sig: &ClauseSignature, params: &Object, path: &[String]) {
        for key in params.keys() {
            if !sig.accepts_param(key) {
                self.report(
                    child(path, key),
                    IssueKind::UnsupportedOperator,
                    format!("Unsupported parameter '{}' for '{}'", key, sig.name),
                );
            }
        }
    }

    fn sort(&mut self, value: &Query, path: &[String]) {
        match value {
            Query::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.sort_entry(item, &index(path, i));
                }
            }
            other => self.sort_entry(other, path),
        }
    }

    fn sort_entry(&mut self, entry: &Query, path: &[String]) {
        match entry {
            Query::String(field) => self.sort_field(field, &child(path, field)),
            Query::Object(obj) => {
                for field in obj.keys() {
                    self.sort_field(field, &child(path, field));
                }
            }
            other => self.report(
                path.to_vec(),
                IssueKind::MalformedClause,
                format!("Sort entries must be field names or objects, got {}", other.kind_name()),
            ),
        }
    }

    fn sort_field(&mut self, field: &str, path: &[String]) {
        if let Resolution::Known(ty) = self.resolve(path, field) {
            if matches!(ty.family(), TypeFamily::Text | TypeFamily::Object) {
                self.report(
                    path.to_vec(),
                    IssueKind::TypeMismatch,
                    format!("Cannot sort on '{}' of type '{}'; use a keyword, numeric or date field", field, ty),
                );
            }
        }
    }

    fn aggregations(&mut self, value: &Query, path: &[String]) {
        let Some(aggs) = value.as_object() else {
            self.report(path.to_vec(), IssueKind::MalformedClause, "Aggregations must be a JSON object");
            return;
        };

        for (name, definition) in aggs {
            let agg_path = child(path, name);
            let Some(def) = definition.as_object() else {
                self.report(
                    agg_path,
                    IssueKind::MalformedClause,
                    format!("Aggregation '{}' must be a JSON object", name),
                );
                continue;
            };

            let types: Vec<&String> = def
                .keys()
                .filter(|k| !matches!(k.as_str(), "aggs" | "aggregations" | "meta"))
                .collect();
            if types.len() != 1 {
                self.report(
                    agg_path.clone(),
                    IssueKind::MalformedClause,
                    format!("Aggregation '{}' must declare exactly one aggregation type", name),
                );
            }

            for (key, body) in def {
                let at = child(&agg_path, key);
                match key.as_str() {
                    "aggs" | "aggregations" => self.aggregations(body, &at),
                    "meta" => {}
                    agg_type => match self.registry.lookup_aggregation(agg_type) {
                        Ok(sig) => {
                            let kind = sig.kind;
                            self.aggregation_body(agg_type, kind, body, &at);
                        }
                        Err(e) => self.report(at, IssueKind::MalformedClause, e.to_string()),
                    },
                }
            }
        }
    }

    fn aggregation_body(&mut self, agg_type: &str, kind: AggregationKind, body: &Query, path: &[String]) {
        match kind {
            AggregationKind::QueryFilter => self.query_clause(body, path),
            AggregationKind::Metric | AggregationKind::Bucket => {
                let Some(Query::String(field)) = body.get("field") else {
                    return;
                };
                let at = child(path, "field");
                if let Resolution::Known(ty) = self.resolve(&at, field) {
                    let family = ty.family();
                    let numeric_only = matches!(
                        agg_type,
                        "avg" | "sum" | "min" | "max" | "stats" | "extended_stats" | "percentiles"
                            | "percentile_ranks" | "median_absolute_deviation" | "histogram" | "boxplot"
                    );
                    let problem = if matches!(family, TypeFamily::Text | TypeFamily::Object) {
                        Some("use a keyword sub-field for aggregations")
                    } else if numeric_only
                        && !matches!(family, TypeFamily::Numeric | TypeFamily::Date | TypeFamily::Boolean | TypeFamily::Unknown)
                    {
                        Some("a numeric field is required")
                    } else {
                        None
                    };
                    if let Some(problem) = problem {
                        self.report(
                            at,
                            IssueKind::TypeMismatch,
                            format!("'{}' aggregation on '{}' of type '{}': {}", agg_type, field, ty, problem),
                        );
                    }
                }
            }
            AggregationKind::Pipeline | AggregationKind::Opaque => {}
        }
    }
}

fn range_compatible(ty: FieldType) -> bool {
    matches!(
        ty.family(),
        TypeFamily::Numeric | TypeFamily::Date | TypeFamily::Keyword | TypeFamily::Ip | TypeFamily::Unknown
    )
}

fn check_bound(ty: FieldType, bound: &Query, custom_format: bool) -> Option<String> {
    match (ty.family(), bound) {
        (_, Query::Null) => None,
        (TypeFamily::Date, Query::Number(_)) => None,
        (TypeFamily::Date, Query::String(s)) => {
            if custom_format || is_date_literal(s) {
                None
            } else {
                Some(format!("'{}' is not a valid date", s))
            }
        }
        (TypeFamily::Numeric, Query::Number(_)) => None,
        (TypeFamily::Numeric, Query::String(s)) if s.trim().parse::<f64>().is_ok() => None,
        (TypeFamily::Keyword | TypeFamily::Ip, Query::String(_) | Query::Number(_)) => None,
        (_, other) => Some(format!("Bound {} is not comparable", other)),
    }
}

/// Dates the cluster accepts with its default format
/// (`strict_date_optional_time||epoch_millis`), plus date math.
pub fn is_date_literal(s: &str) -> bool {
    use chrono::{DateTime, NaiveDate, NaiveDateTime};

    let s = s.trim();
    if s.is_empty() {
        return false;
    }
    if let Some(math) = s.strip_prefix("now") {
        return is_date_math(math);
    }
    if let Some((anchor, math)) = s.split_once("||") {
        return is_date_literal(anchor) && is_date_math(math);
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    if DateTime::parse_from_rfc3339(s).is_ok() {
        return true;
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if NaiveDateTime::parse_from_str(s, format).is_ok() {
            return true;
        }
    }
    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        return true;
    }
    NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").is_ok()
}

/// Sequence of `+N<unit>`, `-N<unit>` and `/<unit>` steps, possibly empty
fn is_date_math(math: &str) -> bool {
    const UNITS: &[u8] = b"yMwdhHms";

    let bytes = math.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' | b'-' => {
                let digits = bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
                i += 1 + digits;
                if digits == 0 || i >= bytes.len() || !UNITS.contains(&bytes[i]) {
                    return false;
                }
                i += 1;
            }
            b'/' => {
                if i + 1 >= bytes.len() || !UNITS.contains(&bytes[i + 1]) {
                    return false;
                }
                i += 2;
            }
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> SchemaMapping {
        SchemaMapping::build(&json!({
            "properties": {
                "title": {"type": "text", "fields": {"keyword": {"type": "keyword"}}},
                "date": {"type": "date"},
                "views": {"type": "long"},
                "published": {"type": "boolean"},
                "status": {"type": "keyword"},
                "location": {"type": "geo_point"},
                "extra": {"type": "dense_vector"},
                "comments": {"type": "nested", "properties": {"author": {"type": "keyword"}, "stars": {"type": "integer"}}}
            }
        }))
        .unwrap()
    }

    fn check(query: serde_json::Value) -> Vec<ValidationIssue> {
        validate(&Query::from(query), &schema()).unwrap()
    }

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_query_names_inside_field_bodies() {
        let issues = check(json!({
            "query": {
                "bool": {
                    "must": [{"match": {"title": {"query": "x", "_name": "q1"}}}],
                    "filter": [
                        {"term": {"status": {"value": "open", "_name": "q2"}}},
                        {"range": {"date": {"gte": "2020-01-01", "_name": "q3"}}},
                        {"prefix": {"status": {"value": "op", "_name": "q4"}}}
                    ]
                }
            }
        }));
        assert!(issues.is_empty(), "{:?}", issues);

        let issues = check(json!({"query": {"match": {"title": {"query": "x", "name": "q1"}}}}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UnsupportedOperator);
        assert_eq!(issues[0].path, path(&["query", "match", "title", "name"]));
    }

    #[test]
    fn test_date_math() {
        for ok in ["now", "now-1d", "now/d", "now-1M/M+2h", "2020-01-01||+1M/d", "2020-01-01||"] {
            assert!(is_date_literal(ok), "{}", ok);
        }
        for bad in ["nowhere", "now-", "now-1", "now+1x", "now/", "2020-01-01||soon"] {
            assert!(!is_date_literal(bad), "{}", bad);
        }
    }

    #[test]
    fn test_valid_query_has_no_issues() {
        let issues = check(json!({
            "query": {
                "bool": {
                    "must": [{"match": {"title": {"query": "rust", "operator": "and"}}}],
                    "filter": [
                        {"range": {"date": {"gte": "2020-01-01", "lt": "now/d"}}},
                        {"range": {"views": {"gt": 100}}},
                        {"term": {"published": true}},
                        {"terms": {"status": ["open", "closed"]}},
                        {"exists": {"field": "title"}}
                    ],
                    "must_not": {"prefix": {"title.keyword": "draft"}},
                    "minimum_should_match": 1
                }
            },
            "sort": [{"date": {"order": "desc"}}, "_score"],
            "size": 10,
            "from": 0,
            "aggs": {"by_status": {"terms": {"field": "status"}, "aggs": {"avg_views": {"avg": {"field": "views"}}}}}
        }));
        assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    }

    #[test]
    fn test_range_on_invalid_date_literal() {
        let schema = SchemaMapping::build(&json!({
            "properties": {"title": {"type": "text"}, "date": {"type": "date"}}
        }))
        .unwrap();
        let query = Query::from(json!({"query": {"range": {"date": {"gt": "not-a-date"}}}}));

        let issues = validate(&query, &schema).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::TypeMismatch);
        assert_eq!(issues[0].path, path(&["query", "range", "date", "gt"]));
    }

    #[test]
    fn test_unknown_field_path() {
        let issues = check(json!({"query": {"match": {"author": "alice"}}}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UnknownField);
        assert_eq!(issues[0].path, path(&["query", "match", "author"]));
    }

    #[test]
    fn test_unknown_field_inside_bool_array() {
        let issues = check(json!({
            "query": {"bool": {"should": [{"match": {"title": "a"}}, {"term": {"owner": "b"}}]}}
        }));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, path(&["query", "bool", "should", "1", "term", "owner"]));
    }

    #[test]
    fn test_unknown_clause_and_bool_key() {
        let issues = check(json!({
            "query": {"bool": {"musts": [], "must": {"matches": {"title": "x"}}}}
        }));
        let kinds: Vec<IssueKind> = issues.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IssueKind::MalformedClause, IssueKind::MalformedClause]);
        assert_eq!(issues[0].path, path(&["query", "bool", "musts"]));
        assert_eq!(issues[1].path, path(&["query", "bool", "must", "matches"]));
    }

    #[test]
    fn test_range_on_text_field() {
        let issues = check(json!({"query": {"range": {"title": {"gte": "a"}}}}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::TypeMismatch);
        assert_eq!(issues[0].path, path(&["query", "range", "title"]));
    }

    #[test]
    fn test_range_unsupported_operator() {
        let issues = check(json!({"query": {"range": {"date": {"after": "2020-01-01"}}}}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UnsupportedOperator);
        assert_eq!(issues[0].path, path(&["query", "range", "date", "after"]));
    }

    #[test]
    fn test_numeric_bounds_and_literals() {
        let issues = check(json!({
            "query": {"bool": {"filter": [
                {"range": {"views": {"gte": "ten"}}},
                {"term": {"published": "maybe"}},
                {"range": {"views": {"lte": "100"}}}
            ]}}
        }));
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].path, path(&["query", "bool", "filter", "0", "range", "views", "gte"]));
        assert_eq!(issues[1].path, path(&["query", "bool", "filter", "1", "term", "published"]));
        assert!(issues.iter().all(|i| i.kind == IssueKind::TypeMismatch));
    }

    #[test]
    fn test_all_checks_run_in_document_order() {
        let issues = check(json!({
            "query": {"bool": {"must": [
                {"match": {"nope": "x"}},
                {"range": {"date": {"gt": "yesterday-ish"}}},
                {"frobnicate": {}}
            ]}},
            "limit": 10
        }));
        let kinds: Vec<IssueKind> = issues.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![IssueKind::UnknownField, IssueKind::TypeMismatch, IssueKind::MalformedClause, IssueKind::MalformedClause]
        );
        assert_eq!(issues[3].path, path(&["limit"]));
    }

    #[test]
    fn test_unknown_typed_fields_are_tolerated() {
        let issues = check(json!({"query": {"range": {"extra": {"gt": "whatever"}}}}));
        assert!(issues.is_empty());
    }

    #[test]
    fn test_empty_schema_skips_field_checks() {
        let query = Query::from(json!({"query": {"range": {"anything": {"gt": "not-a-date"}}}}));
        let issues = validate(&query, &SchemaMapping::empty()).unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn test_nested_query() {
        let ok = check(json!({
            "query": {"nested": {"path": "comments", "query": {"range": {"comments.stars": {"gte": 4}}}}}
        }));
        assert!(ok.is_empty(), "{:?}", ok);

        let issues = check(json!({"query": {"nested": {"path": "title", "query": {"match_all": {}}}}}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::TypeMismatch);
        assert_eq!(issues[0].path, path(&["query", "nested", "path"]));

        let missing = check(json!({"query": {"nested": {"path": "comments"}}}));
        assert_eq!(missing[0].kind, IssueKind::MalformedClause);
    }

    #[test]
    fn test_multi_match_fields() {
        let issues = check(json!({
            "query": {"multi_match": {"query": "rust", "fields": ["title^2", "summary", "comments.*"]}}
        }));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UnknownField);
        assert_eq!(issues[0].path, path(&["query", "multi_match", "fields", "1"]));
    }

    #[test]
    fn test_top_level_grammar() {
        let issues = check(json!({"size": -1, "from": "zero", "query": {}}));
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().all(|i| i.kind == IssueKind::MalformedClause));
    }

    #[test]
    fn test_multiple_clauses_in_one_object() {
        let issues = check(json!({"query": {"match": {"title": "a"}, "term": {"status": "b"}}}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, path(&["query"]));
    }

    #[test]
    fn test_pattern_on_numeric_field() {
        let issues = check(json!({"query": {"wildcard": {"views": "1*"}}}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::TypeMismatch);
    }

    #[test]
    fn test_sort_and_aggregation_types() {
        let issues = check(json!({
            "sort": ["title"],
            "aggs": {
                "titles": {"terms": {"field": "title"}},
                "avg_status": {"avg": {"field": "status"}},
                "ghost": {"max": {"field": "ghost"}},
                "weird": {"averages": {"field": "views"}}
            }
        }));
        let got: Vec<(IssueKind, String)> = issues.iter().map(|i| (i.kind, i.dotted_path())).collect();
        assert_eq!(
            got,
            vec![
                (IssueKind::TypeMismatch, "sort.0.title".to_string()),
                (IssueKind::TypeMismatch, "aggs.titles.terms.field".to_string()),
                (IssueKind::TypeMismatch, "aggs.avg_status.avg.field".to_string()),
                (IssueKind::UnknownField, "aggs.ghost.max.field".to_string()),
                (IssueKind::MalformedClause, "aggs.weird.averages".to_string()),
            ]
        );
    }

    #[test]
    fn test_filter_aggregation_descends_into_query() {
        let issues = check(json!({
            "aggs": {"recent": {"filter": {"range": {"date": {"gte": "last tuesday"}}}}}
        }));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, path(&["aggs", "recent", "filter", "range", "date", "gte"]));
    }

    #[test]
    fn test_match_operator_and_params() {
        let issues = check(json!({
            "query": {"match": {"title": {"query": "x", "operator": "xor", "slop": 2}}}
        }));
        let kinds: Vec<IssueKind> = issues.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IssueKind::UnsupportedOperator, IssueKind::UnsupportedOperator]);
    }

    #[test]
    fn test_non_object_root_is_input_error() {
        let result = validate(&Query::from(json!([{"query": {}}])), &schema());
        assert!(matches!(result, Err(InputFormatError::NotAnObject("array"))));
    }

    #[test]
    fn test_date_literals() {
        for ok in ["2020", "2020-05", "2020-05-17", "2020-05-17T10:00:00Z", "2020-05-17 10:00:00", "now-1d/d", "2020-01-01||+1M", "1589709600000"] {
            assert!(is_date_literal(ok), "{} should parse", ok);
        }
        for bad in ["not-a-date", "yesterday", "2020-13-01", ""] {
            assert!(!is_date_literal(bad), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_describe_issues() {
        let issues = check(json!({"query": {"match": {"author": "x"}}, "limit": 1}));
        let text = describe_issues(&issues);
        assert!(text.starts_with("1. [UnknownField] query.match.author"));
        assert!(text.contains("\n2. [MalformedClause] limit"));
    }
}
