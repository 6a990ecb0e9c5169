//! Declarative document queries.
//!
//! A [`QueryDescription`] is an immutable, serializable, fingerprintable
//! filter+sort+limit specification over the document store. It is both the
//! request shape (compiled to SQL by the store) and the cache/status key:
//! two descriptions are fingerprint-equal iff they would always select the
//! same documents given the same store state.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use crate::fingerprint::{Fingerprint, Fingerprinted};

/// Sort direction over (date, title). Title is always the tie-break, never
/// the primary key; documents without dates order deterministically after
/// dated ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Ancestor-scoped descendant filter: path-prefix plus a depth range
/// relative to the ancestor path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DescendantScope {
    /// Ancestor output path, e.g. `/posts`.
    pub ancestor: String,
    /// Minimum depth below the ancestor (1 = direct children).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
}

/// Declarative filter/sort/limit over the document table. Every active
/// field contributes one conjunctive predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescription {
    /// Category allow-list; membership is a disjunction of equality tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_source_path: Option<String>,
    /// Set-membership test against the document's metadata tag list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descendants: Option<DescendantScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<SortOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl QueryDescription {
    /// The unfiltered query: every document, default order.
    pub fn all() -> Self {
        QueryDescription::default()
    }

    pub fn with_categories<S: Into<String>>(categories: impl IntoIterator<Item = S>) -> Self {
        QueryDescription {
            include_categories: Some(categories.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn with_parent(parent: impl Into<String>) -> Self {
        QueryDescription {
            parent: Some(parent.into()),
            ..Default::default()
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        QueryDescription {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn ordered(mut self, order: SortOrder) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limited(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Append this query's full SELECT to `qb`, projecting `columns` from
    /// the documents table. All active predicates are ANDed; ordering and
    /// limit follow.
    pub fn push_select(&self, columns: &str, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(format!("SELECT {columns} FROM documents"));
        self.push_predicates(qb);
        self.push_order(qb);
        if let Some(limit) = self.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }
    }

    fn push_predicates(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        let mut sep = Separator::new();

        if let Some(categories) = &self.include_categories {
            sep.push_and(qb);
            // An empty allow-list selects nothing, matching the disjunction
            // of zero equality tests.
            if categories.is_empty() {
                qb.push("0 = 1");
            } else {
                qb.push("category IN (");
                let last = categories.len() - 1;
                for (idx, category) in categories.iter().enumerate() {
                    qb.push_bind(category.clone());
                    if idx < last {
                        qb.push(", ");
                    }
                }
                qb.push(")");
            }
        }
        if let Some(url) = &self.url {
            sep.push_and(qb);
            qb.push("url = ");
            qb.push_bind(url.clone());
        }
        if let Some(parent) = &self.parent {
            sep.push_and(qb);
            qb.push("parent = ");
            qb.push_bind(parent.clone());
        }
        if let Some(source) = &self.relative_source_path {
            sep.push_and(qb);
            qb.push("relative_source_path = ");
            qb.push_bind(source.clone());
        }
        if let Some(tag) = &self.tag {
            sep.push_and(qb);
            qb.push(
                "EXISTS (SELECT 1 FROM json_each(documents.metadata, '$.tags') \
                 WHERE json_each.value = ",
            );
            qb.push_bind(tag.clone());
            qb.push(")");
        }
        if let Some(scope) = &self.descendants {
            let ancestor = scope.ancestor.trim_end_matches('/');
            sep.push_and(qb);
            qb.push("url GLOB concat(");
            qb.push_bind(ancestor.to_string());
            qb.push(", '/*')");

            // Depth of a url relative to the ancestor is the difference in
            // path-separator counts; 1 means a direct child.
            let ancestor_depth = ancestor.matches('/').count() as i64;
            let depth_expr = "(LENGTH(url) - LENGTH(REPLACE(url, '/', '')))";
            if let Some(min_depth) = scope.min_depth {
                sep.push_and(qb);
                qb.push(format!("{depth_expr} >= "));
                qb.push_bind(ancestor_depth + min_depth as i64);
            }
            if let Some(max_depth) = scope.max_depth {
                sep.push_and(qb);
                qb.push(format!("{depth_expr} <= "));
                qb.push_bind(ancestor_depth + max_depth as i64);
            }
        }
    }

    fn push_order(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        match self.order {
            Some(SortOrder::Ascending) => {
                qb.push(" ORDER BY (date IS NULL) ASC, date ASC, title ASC");
            }
            Some(SortOrder::Descending) => {
                qb.push(" ORDER BY (date IS NULL) ASC, date DESC, title ASC");
            }
            // Unordered queries still need a deterministic result order for
            // fingerprint comparison across builds.
            None => {
                qb.push(" ORDER BY url ASC");
            }
        }
    }
}

impl Fingerprinted for QueryDescription {
    fn fingerprint_into(&self, fp: &mut Fingerprint) {
        match &self.include_categories {
            Some(categories) => fp.push_seq(categories.iter()),
            None => fp.push_none(),
        }
        fp.push_opt_str(self.url.as_deref());
        fp.push_opt_str(self.parent.as_deref());
        fp.push_opt_str(self.relative_source_path.as_deref());
        fp.push_opt_str(self.tag.as_deref());
        match &self.descendants {
            Some(scope) => {
                fp.push_str(&scope.ancestor);
                match scope.min_depth {
                    Some(d) => fp.push_u64(d as u64),
                    None => fp.push_none(),
                }
                match scope.max_depth {
                    Some(d) => fp.push_u64(d as u64),
                    None => fp.push_none(),
                }
            }
            None => fp.push_none(),
        }
        match self.order {
            Some(SortOrder::Ascending) => fp.push_str("asc"),
            Some(SortOrder::Descending) => fp.push_str("desc"),
            None => fp.push_none(),
        }
        match self.limit {
            Some(limit) => fp.push_u64(limit as u64),
            None => fp.push_none(),
        }
    }
}

/// WHERE/AND separator state for predicate pushing.
struct Separator {
    any: bool,
}

impl Separator {
    fn new() -> Self {
        Separator { any: false }
    }

    fn push_and(&mut self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if self.any {
            qb.push(" AND ");
        } else {
            qb.push(" WHERE ");
            self.any = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Execute;

    fn sql_of(query: &QueryDescription) -> String {
        let mut qb = QueryBuilder::new("");
        query.push_select("url", &mut qb);
        qb.build().sql().to_string()
    }

    #[test]
    fn empty_query_selects_everything_in_url_order() {
        let sql = sql_of(&QueryDescription::all());
        assert_eq!(sql, "SELECT url FROM documents ORDER BY url ASC");
    }

    #[test]
    fn filters_are_conjoined() {
        let query = QueryDescription {
            include_categories: Some(vec!["post".into(), "page".into()]),
            parent: Some("/posts".into()),
            tag: Some("rust".into()),
            ..Default::default()
        };
        let sql = sql_of(&query);
        assert!(sql.contains("category IN ("));
        assert!(sql.contains(" AND parent = "));
        assert!(sql.contains("json_each"));
    }

    #[test]
    fn descendant_scope_bounds_depth() {
        let query = QueryDescription {
            descendants: Some(DescendantScope {
                ancestor: "/posts/".into(),
                min_depth: Some(1),
                max_depth: Some(2),
            }),
            ..Default::default()
        };
        let sql = sql_of(&query);
        assert!(sql.contains("url GLOB concat("));
        assert!(sql.contains(">= "));
        assert!(sql.contains("<= "));
    }

    #[test]
    fn ordering_and_limit_are_appended() {
        let query = QueryDescription::with_categories(["post"])
            .ordered(SortOrder::Descending)
            .limited(5);
        let sql = sql_of(&query);
        assert!(sql.ends_with("ORDER BY (date IS NULL) ASC, date DESC, title ASC LIMIT ?"));
    }

    #[test]
    fn fingerprint_tracks_every_field() {
        let base = QueryDescription::all();
        let variants = vec![
            QueryDescription::with_categories(["post"]),
            QueryDescription::with_url("/a"),
            QueryDescription::with_parent("/"),
            QueryDescription {
                relative_source_path: Some("a.md".into()),
                ..Default::default()
            },
            QueryDescription {
                tag: Some("rust".into()),
                ..Default::default()
            },
            QueryDescription {
                descendants: Some(DescendantScope {
                    ancestor: "/posts".into(),
                    min_depth: None,
                    max_depth: None,
                }),
                ..Default::default()
            },
            QueryDescription::all().ordered(SortOrder::Ascending),
            QueryDescription::all().limited(3),
        ];
        for variant in variants {
            assert_ne!(base.fingerprint(), variant.fingerprint(), "{variant:?}");
        }
    }

    #[test]
    fn fingerprint_distinguishes_sort_directions() {
        let asc = QueryDescription::all().ordered(SortOrder::Ascending);
        let desc = QueryDescription::all().ordered(SortOrder::Descending);
        assert_ne!(asc.fingerprint(), desc.fingerprint());
    }

    #[test]
    fn fingerprint_is_stable_across_clones() {
        let query = QueryDescription {
            include_categories: Some(vec!["post".into()]),
            tag: Some("rust".into()),
            order: Some(SortOrder::Ascending),
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(query.fingerprint(), query.clone().fingerprint());
    }
}
