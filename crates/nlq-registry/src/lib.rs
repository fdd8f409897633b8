//! Clause vocabulary of the Elasticsearch query DSL
//!
//! The validator only accepts clause and aggregation names registered here,
//! and uses each signature's shape to know where field references and
//! sub-queries live.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown query clause: {0}")]
    ClauseNotFound(String),

    #[error("Unknown aggregation type: {0}")]
    AggregationNotFound(String),
}

/// Where a clause keeps its field references and children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClauseShape {
    /// `{"term": {"<field>": value | {params}}}`
    FieldLeaf,
    /// `{"multi_match": {"query": ..., "fields": [...]}}`
    FieldList,
    /// `{"exists": {"field": "<field>"}}`
    Exists,
    /// Boolean and scoring wrappers; sub-queries live under `children`
    Compound,
    /// `{"nested": {"path": ..., "query": {...}}}`
    Nested,
    /// `match_all` / `match_none`, body may be empty
    MatchAll,
    /// Recognized but not descended into (scripts, geo, query_string, ...)
    Opaque,
}

/// What a leaf clause compares its field against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Analyzed full-text input
    FullText,
    /// Exact literal(s)
    Literal,
    /// Comparison bounds
    Range,
    /// String patterns (prefix, wildcard, regexp, fuzzy)
    Pattern,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseSignature {
    pub name: String,
    pub shape: ClauseShape,
    pub value_kind: ValueKind,
    /// Accepted keys in the clause body (or in the per-field body for leaves)
    pub params: Vec<String>,
    /// Body keys holding a sub-query or an array of sub-queries
    pub children: Vec<String>,
}

impl ClauseSignature {
    pub fn accepts_param(&self, key: &str) -> bool {
        self.params.iter().any(|p| p == key)
    }

    pub fn is_child_slot(&self, key: &str) -> bool {
        self.children.iter().any(|c| c == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationKind {
    /// Computes a value over a `field`
    Metric,
    /// Buckets documents, usually by `field`
    Bucket,
    /// Body is itself a query clause (`filter` aggregation)
    QueryFilter,
    /// Reads other aggregations, no document fields
    Pipeline,
    /// Recognized, body not inspected
    Opaque,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSignature {
    pub name: String,
    pub kind: AggregationKind,
}

/// Keys that may appear next to a field inside leaf clause bodies
pub const LEAF_META_KEYS: &[&str] = &["boost", "_name"];

pub struct ClauseRegistry {
    clauses: HashMap<String, ClauseSignature>,
    aggregations: HashMap<String, AggregationSignature>,
    top_level: HashSet<String>,
}

impl ClauseRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            clauses: HashMap::new(),
            aggregations: HashMap::new(),
            top_level: HashSet::new(),
        };
        registry.register_builtins();
        registry
    }

    fn register_builtins(&mut self) {
        for key in [
            "query", "from", "size", "sort", "aggs", "aggregations", "_source", "fields",
            "script_fields", "stored_fields", "docvalue_fields", "highlight", "post_filter",
            "rescore", "explain", "version", "seq_no_primary_term", "track_total_hits",
            "min_score", "track_scores", "timeout", "terminate_after", "search_after", "pit",
            "runtime_mappings", "collapse", "indices_boost", "suggest",
        ] {
            self.top_level.insert(key.to_string());
        }

        // Full-text leaves
        self.leaf("match", ValueKind::FullText, &[
            "query", "operator", "minimum_should_match", "analyzer", "fuzziness", "boost",
            "lenient", "zero_terms_query", "prefix_length", "max_expansions",
            "fuzzy_transpositions", "fuzzy_rewrite", "auto_generate_synonyms_phrase_query",
            "cutoff_frequency",
        ]);
        self.leaf("match_phrase", ValueKind::FullText, &[
            "query", "analyzer", "slop", "boost", "zero_terms_query",
        ]);
        self.leaf("match_phrase_prefix", ValueKind::FullText, &[
            "query", "analyzer", "slop", "max_expansions", "boost", "zero_terms_query",
        ]);
        self.leaf("match_bool_prefix", ValueKind::FullText, &[
            "query", "analyzer", "operator", "minimum_should_match", "fuzziness",
            "prefix_length", "max_expansions", "fuzzy_transpositions", "fuzzy_rewrite", "boost",
        ]);

        // Term-level leaves
        self.leaf("term", ValueKind::Literal, &["value", "boost", "case_insensitive"]);
        self.leaf("terms", ValueKind::Literal, &[]);
        self.leaf("range", ValueKind::Range, &[
            "gt", "gte", "lt", "lte", "from", "to", "include_lower", "include_upper",
            "format", "time_zone", "boost", "relation",
        ]);
        self.leaf("prefix", ValueKind::Pattern, &["value", "rewrite", "case_insensitive", "boost"]);
        self.leaf("wildcard", ValueKind::Pattern, &[
            "value", "wildcard", "rewrite", "case_insensitive", "boost",
        ]);
        self.leaf("regexp", ValueKind::Pattern, &[
            "value", "flags", "case_insensitive", "max_determinized_states", "rewrite", "boost",
        ]);
        self.leaf("fuzzy", ValueKind::Pattern, &[
            "value", "fuzziness", "max_expansions", "prefix_length", "transpositions",
            "rewrite", "boost",
        ]);

        self.register(ClauseSignature {
            name: "multi_match".to_string(),
            shape: ClauseShape::FieldList,
            value_kind: ValueKind::FullText,
            params: strings(&[
                "query", "fields", "type", "operator", "minimum_should_match", "analyzer",
                "boost", "fuzziness", "fuzzy_rewrite", "tie_breaker", "lenient", "slop",
                "prefix_length", "max_expansions", "zero_terms_query",
                "auto_generate_synonyms_phrase_query", "_name",
            ]),
            children: vec![],
        });

        self.register(ClauseSignature {
            name: "exists".to_string(),
            shape: ClauseShape::Exists,
            value_kind: ValueKind::None,
            params: strings(&["field", "boost", "_name"]),
            children: vec![],
        });

        for name in ["match_all", "match_none"] {
            self.register(ClauseSignature {
                name: name.to_string(),
                shape: ClauseShape::MatchAll,
                value_kind: ValueKind::None,
                params: strings(&["boost", "_name"]),
                children: vec![],
            });
        }

        // Compound clauses
        self.compound("bool", &["must", "should", "filter", "must_not"], &[
            "minimum_should_match", "boost", "_name",
        ]);
        self.compound("constant_score", &["filter"], &["boost", "_name"]);
        self.compound("dis_max", &["queries"], &["tie_breaker", "boost", "_name"]);
        self.compound("boosting", &["positive", "negative"], &["negative_boost", "boost", "_name"]);
        self.compound("function_score", &["query"], &[
            "functions", "score_mode", "boost_mode", "max_boost", "min_score", "boost",
            "random_score", "field_value_factor", "script_score", "weight", "_name",
        ]);
        self.compound("has_child", &["query"], &[
            "type", "score_mode", "min_children", "max_children", "ignore_unmapped",
            "inner_hits", "_name",
        ]);
        self.compound("has_parent", &["query"], &[
            "parent_type", "score", "ignore_unmapped", "inner_hits", "_name",
        ]);

        self.register(ClauseSignature {
            name: "nested".to_string(),
            shape: ClauseShape::Nested,
            value_kind: ValueKind::None,
            params: strings(&[
                "path", "query", "score_mode", "ignore_unmapped", "inner_hits", "boost", "_name",
            ]),
            children: strings(&["query"]),
        });

        for name in [
            "ids", "query_string", "simple_query_string", "geo_shape", "geo_bounding_box",
            "geo_distance", "geo_polygon", "more_like_this", "script", "script_score",
            "wrapper", "pinned", "distance_feature", "rank_feature", "percolate", "intervals",
            "parent_id", "terms_set", "span_term", "span_near", "span_or", "span_not",
            "span_first", "span_multi", "span_containing", "span_within", "knn",
            "combined_fields", "semantic", "sparse_vector", "text_expansion",
        ] {
            self.register(ClauseSignature {
                name: name.to_string(),
                shape: ClauseShape::Opaque,
                value_kind: ValueKind::None,
                params: vec![],
                children: vec![],
            });
        }

        for name in [
            "avg", "sum", "min", "max", "stats", "extended_stats", "value_count",
            "cardinality", "percentiles", "percentile_ranks", "median_absolute_deviation",
            "geo_bounds", "geo_centroid", "boxplot", "string_stats",
        ] {
            self.register_aggregation(name, AggregationKind::Metric);
        }
        for name in [
            "terms", "histogram", "date_histogram", "range", "date_range", "ip_range",
            "significant_terms", "significant_text", "missing", "rare_terms",
            "variable_width_histogram", "auto_date_histogram", "multi_terms",
        ] {
            self.register_aggregation(name, AggregationKind::Bucket);
        }
        self.register_aggregation("filter", AggregationKind::QueryFilter);
        for name in [
            "avg_bucket", "max_bucket", "min_bucket", "sum_bucket", "stats_bucket",
            "extended_stats_bucket", "percentiles_bucket", "bucket_script", "bucket_selector",
            "bucket_sort", "cumulative_sum", "derivative", "moving_fn", "serial_diff",
        ] {
            self.register_aggregation(name, AggregationKind::Pipeline);
        }
        for name in [
            "filters", "composite", "nested", "reverse_nested", "global", "sampler",
            "diversified_sampler", "top_hits", "top_metrics", "scripted_metric",
            "weighted_avg", "geohash_grid", "geotile_grid", "geo_distance", "adjacency_matrix",
        ] {
            self.register_aggregation(name, AggregationKind::Opaque);
        }
    }

    /// Per-field bodies of every leaf also accept a query name
    fn leaf(&mut self, name: &str, value_kind: ValueKind, params: &[&str]) {
        let mut params = strings(params);
        params.push("_name".to_string());
        self.register(ClauseSignature {
            name: name.to_string(),
            shape: ClauseShape::FieldLeaf,
            value_kind,
            params,
            children: vec![],
        });
    }

    fn compound(&mut self, name: &str, children: &[&str], params: &[&str]) {
        let mut all = strings(children);
        all.extend(strings(params));
        self.register(ClauseSignature {
            name: name.to_string(),
            shape: ClauseShape::Compound,
            value_kind: ValueKind::None,
            params: all,
            children: strings(children),
        });
    }

    pub fn register(&mut self, sig: ClauseSignature) {
        self.clauses.insert(sig.name.clone(), sig);
    }

    pub fn register_aggregation(&mut self, name: &str, kind: AggregationKind) {
        self.aggregations.insert(
            name.to_string(),
            AggregationSignature {
                name: name.to_string(),
                kind,
            },
        );
    }

    pub fn lookup(&self, name: &str) -> Result<&ClauseSignature, RegistryError> {
        self.clauses
            .get(name)
            .ok_or_else(|| RegistryError::ClauseNotFound(name.to_string()))
    }

    pub fn lookup_aggregation(&self, name: &str) -> Result<&AggregationSignature, RegistryError> {
        self.aggregations
            .get(name)
            .ok_or_else(|| RegistryError::AggregationNotFound(name.to_string()))
    }

    pub fn is_top_level_key(&self, key: &str) -> bool {
        self.top_level.contains(key)
    }
}

impl Default for ClauseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
