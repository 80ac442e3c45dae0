use rayon::prelude::*;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, trace};

use crate::filter::{
    ColumnFilters, FacetOption, build_searchable_text, compute_facet_options,
    matches_column_filters, matches_tokens, query_tokens,
};
use crate::value::{Row, Value};

/// A loaded table. Rows are immutable once loaded, so each row's search text is
/// built once up front.
pub struct Dataset {
    pub name: String,
    pub columns: Vec<String>,
    rows: Vec<Row>,
    searchable: Vec<String>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        let start_time = Instant::now();
        let searchable: Vec<String> = rows.par_iter().map(build_searchable_text).collect();
        debug!(
            "Built search text for {} rows in {}ms",
            rows.len(),
            start_time.elapsed().as_millis()
        );
        Dataset {
            name: name.into(),
            columns,
            rows,
            searchable,
        }
    }

    pub fn empty() -> Self {
        Dataset::new("", Vec::new(), Vec::new())
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> &Value {
        self.columns
            .get(column)
            .and_then(|name| self.rows.get(row).and_then(|r| r.get(name)))
            .unwrap_or(&Value::Null)
    }

    /// Indices of rows passing both the search query and every column filter, in
    /// source order.
    pub fn visible_rows(&self, query: &str, filters: &ColumnFilters) -> Vec<usize> {
        let tokens = query_tokens(query);
        let visible: Vec<usize> = self
            .rows
            .par_iter()
            .zip(self.searchable.par_iter())
            .enumerate()
            .filter(|(_, (row, text))| {
                matches_tokens(text, &tokens) && matches_column_filters(row, filters)
            })
            .map(|(idx, _)| idx)
            .collect();
        trace!(
            "{} of {} rows visible for query {:?} and {} column filters",
            visible.len(),
            self.rows.len(),
            query,
            filters.active_count()
        );
        visible
    }

    /// Facet options over the full row set, independent of any active filter.
    pub fn facet_options(&self, column: &str) -> Vec<FacetOption> {
        compute_facet_options(&self.rows, column)
    }

    pub fn observed_tokens(&self, column: &str) -> HashSet<String> {
        self.facet_options(column)
            .into_iter()
            .map(|o| o.token)
            .collect()
    }
}
