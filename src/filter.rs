use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::iter::Peekable;
use std::str::Chars;

use tracing::trace;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::value::{
    Row, Value, format_grouped_number, iso_datetime, localized_date, number_to_string,
};

/// Filter token shared by null cells, missing cells and blank strings.
pub const EMPTY_TOKEN: &str = "__EMPTY__";
pub const EMPTY_LABEL: &str = "Vacío";

/// Lower-case, strip diacritics and drop everything but `[a-z0-9]`.
///
/// Whitespace survives as a single separating space, so `"Montó  Total-2026"` becomes
/// `"monto total2026"`. Applying it twice gives the same result.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.to_lowercase().nfd() {
        if is_combining_mark(c) {
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }
    out
}

fn serialized(value: &Value) -> String {
    value.to_json().to_string()
}

/// Normalized search text contributed by a single cell.
pub fn searchable_fragment(value: &Value) -> String {
    match value {
        Value::String(s) => normalize(s),
        Value::Number(n) => normalize(&number_to_string(*n)),
        Value::Bool(b) => b.to_string(),
        Value::Date(d) => normalize(&format!("{} {}", value.coerce_to_string(), localized_date(d))),
        Value::Null => String::new(),
        Value::Sequence(items) => join_fragments(items.iter().map(searchable_fragment)),
        Value::Mapping(_) => normalize(&serialized(value)),
    }
}

fn join_fragments(fragments: impl Iterator<Item = String>) -> String {
    fragments
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Everything a search query is matched against for one row.
pub fn build_searchable_text(row: &Row) -> String {
    join_fragments(row.values().map(searchable_fragment))
}

/// Whitespace separated tokens of the normalized query.
pub fn query_tokens(query: &str) -> Vec<String> {
    normalize(query)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// AND of substring checks; no tokens matches everything.
pub fn matches_tokens(searchable: &str, tokens: &[String]) -> bool {
    tokens.iter().all(|t| searchable.contains(t.as_str()))
}

pub fn matches_query(row: &Row, query: &str) -> bool {
    let tokens = query_tokens(query);
    if tokens.is_empty() {
        return true;
    }
    matches_tokens(&build_searchable_text(row), &tokens)
}

fn collapse_lowercase(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Comparable token of a cell, used for column filter membership.
pub fn normalize_column_filter_token(value: &Value) -> String {
    if value.is_empty() {
        return EMPTY_TOKEN.to_string();
    }
    match value {
        Value::Number(n) => number_to_string(*n),
        Value::Date(d) => iso_datetime(d),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => collapse_lowercase(s),
        Value::Sequence(_) | Value::Mapping(_) => collapse_lowercase(&serialized(value)),
        Value::Null => EMPTY_TOKEN.to_string(),
    }
}

fn sentence_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Human readable label of a facet option.
pub fn format_column_filter_option_label(token: &str, value: &Value) -> String {
    if token == EMPTY_TOKEN {
        return EMPTY_LABEL.to_string();
    }
    match value {
        Value::Number(n) => format_grouped_number(*n),
        Value::Date(d) => localized_date(d),
        Value::Bool(true) => "Sí".to_string(),
        Value::Bool(false) => "No".to_string(),
        Value::String(_) => sentence_case(token),
        Value::Sequence(_) | Value::Mapping(_) | Value::Null => token.to_string(),
    }
}

/// One distinct value of a column and how many rows carry it.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetOption {
    pub token: String,
    pub label: String,
    pub count: usize,
}

fn take_number(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(c);
            chars.next();
        } else if c == ',' && !digits.is_empty() {
            // Grouping separator only when a digit follows.
            let mut ahead = chars.clone();
            ahead.next();
            if ahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                chars.next();
            } else {
                break;
            }
        } else {
            break;
        }
    }
    digits
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let xs = take_number(&mut ai);
                let ys = take_number(&mut bi);
                let xt = xs.trim_start_matches('0');
                let yt = ys.trim_start_matches('0');
                let ord = xt.len().cmp(&yt.len()).then_with(|| xt.cmp(yt));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                ai.next();
                bi.next();
                if x != y {
                    return x.cmp(&y);
                }
            }
        }
    }
}

fn collation_key(s: &str) -> String {
    s.to_lowercase().nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Case and accent insensitive ordering with numeric digit runs.
///
/// Accents, then case, only break ties: `"Vacío"` sorts between `"Activo"` and
/// `"Vencido"`, and `"vacio"` comes before `"vacío"`.
pub fn collate(a: &str, b: &str) -> Ordering {
    natural_cmp(&collation_key(a), &collation_key(b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| b.cmp(a))
}

/// Facet options of `column` over all given rows, sorted by label.
///
/// Always computed from scratch so the options track the rows handed in.
pub fn compute_facet_options<'a>(
    rows: impl IntoIterator<Item = &'a Row>,
    column: &str,
) -> Vec<FacetOption> {
    let mut options: Vec<FacetOption> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let value = row.get(column).unwrap_or(&Value::Null);
        let token = normalize_column_filter_token(value);
        match positions.get(&token) {
            Some(&idx) => options[idx].count += 1,
            None => {
                let label = format_column_filter_option_label(&token, value);
                positions.insert(token.clone(), options.len());
                options.push(FacetOption {
                    token,
                    label,
                    count: 1,
                });
            }
        }
    }

    options.sort_by(|a, b| collate(&a.label, &b.label).then_with(|| a.token.cmp(&b.token)));
    trace!("Computed {} facet options for column {}", options.len(), column);
    options
}

/// Where a single column's filter control stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Unrestricted,
    PartiallyRestricted,
    FullyExcluding,
}

/// Explicit token selections per column. A column without an entry is unrestricted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnFilters {
    selections: HashMap<String, HashSet<String>>,
}

impl ColumnFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self, column: &str) -> Option<&HashSet<String>> {
        self.selections.get(column)
    }

    pub fn selections(&self) -> impl Iterator<Item = (&String, &HashSet<String>)> {
        self.selections.iter()
    }

    /// Store an explicit selection, or drop it with `None`.
    pub fn set_selection(&mut self, column: &str, selection: Option<HashSet<String>>) {
        match selection {
            Some(tokens) => {
                self.selections.insert(column.to_string(), tokens);
            }
            None => {
                self.selections.remove(column);
            }
        }
    }

    /// Flip one token of `column`.
    ///
    /// Without an explicit selection the baseline is every observed token. Stored
    /// tokens no longer observed are dropped, and a selection covering every observed
    /// token collapses back to unrestricted.
    pub fn toggle_token(
        &mut self,
        column: &str,
        token: &str,
        observed: &HashSet<String>,
    ) -> FilterState {
        let mut selection: HashSet<String> = match self.selections.get(column) {
            Some(explicit) => explicit.intersection(observed).cloned().collect(),
            None => observed.clone(),
        };
        if !selection.remove(token) {
            selection.insert(token.to_string());
        }

        if &selection == observed {
            self.selections.remove(column);
        } else {
            self.selections.insert(column.to_string(), selection);
        }
        let state = self.state(column);
        trace!("Toggled {token} on {column}: {state:?}");
        state
    }

    pub fn select_all(&mut self, column: &str) {
        self.selections.remove(column);
    }

    pub fn clear_column(&mut self, column: &str) {
        self.select_all(column);
    }

    pub fn deselect_all(&mut self, column: &str) {
        self.selections.insert(column.to_string(), HashSet::new());
    }

    pub fn clear_all(&mut self) {
        self.selections.clear();
    }

    pub fn state(&self, column: &str) -> FilterState {
        match self.selections.get(column) {
            None => FilterState::Unrestricted,
            Some(tokens) if tokens.is_empty() => FilterState::FullyExcluding,
            Some(_) => FilterState::PartiallyRestricted,
        }
    }

    pub fn is_selected(&self, column: &str, token: &str) -> bool {
        self.selections
            .get(column)
            .is_none_or(|tokens| tokens.contains(token))
    }

    /// Number of columns carrying an explicit selection.
    pub fn active_count(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

impl FromIterator<(String, Option<HashSet<String>>)> for ColumnFilters {
    fn from_iter<T: IntoIterator<Item = (String, Option<HashSet<String>>)>>(iter: T) -> Self {
        let mut filters = ColumnFilters::new();
        for (column, selection) in iter {
            filters.set_selection(&column, selection);
        }
        filters
    }
}

pub fn matches_column_filters(row: &Row, filters: &ColumnFilters) -> bool {
    filters.selections.iter().all(|(column, tokens)| {
        let value = row.get(column).unwrap_or(&Value::Null);
        tokens.contains(&normalize_column_filter_token(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(fields: &[(&str, Value)]) -> Row {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn status_rows() -> Vec<Row> {
        vec![
            row(&[("status", Value::from("ACTIVO"))]),
            row(&[("status", Value::from("VENCIDO"))]),
            row(&[("status", Value::Null)]),
        ]
    }

    fn observed(rows: &[Row], column: &str) -> HashSet<String> {
        compute_facet_options(rows, column)
            .into_iter()
            .map(|o| o.token)
            .collect()
    }

    #[test]
    fn normalize_strips_accents_and_punctuation() {
        assert_eq!(normalize("Montó  Total-2026"), "monto total2026");
        assert_eq!(normalize("  AÉREO\tÑandú "), "aereo nandu");
        assert_eq!(normalize("¿?!"), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["Vacío", "Monto Anteproyecto 2026", " a\u{0301}  b ", "İstanbul", "ß-x"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        for r in status_rows() {
            assert!(matches_query(&r, ""));
            assert!(matches_query(&r, "   \t"));
        }
    }

    #[test]
    fn query_tokens_are_prefix_friendly_substrings() {
        let r = row(&[("concept", Value::from("Monto Anteproyecto 2026"))]);
        assert!(matches_query(&r, "mont 2026"));
        assert!(matches_query(&r, "2026 mont"));
        assert!(matches_query(&r, "MONTÓ"));
        assert!(!matches_query(&r, "mont 2025"));
    }

    #[test]
    fn token_order_does_not_matter() {
        let rows = [
            row(&[("a", Value::from("foo")), ("b", Value::from("bar"))]),
            row(&[("a", Value::from("foo"))]),
        ];
        for r in &rows {
            assert_eq!(matches_query(r, "foo bar"), matches_query(r, "bar foo"));
        }
    }

    #[test]
    fn searchable_text_covers_every_value_kind() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let r = row(&[
            ("monto", Value::from(1500.5)),
            ("vigente", Value::from(true)),
            ("inicio", Value::from(date)),
            ("tags", Value::Sequence(vec![Value::from("Obra"), Value::Null])),
            (
                "proveedor",
                Value::Mapping(row(&[("nombre", Value::from("Constructora Ávila"))])),
            ),
        ]);
        let text = build_searchable_text(&r);
        for needle in ["15005", "true", "20260301", "01032026", "obra", "nombre", "avila"] {
            assert!(text.contains(needle), "{needle} missing from {text}");
        }
    }

    #[test]
    fn nested_integral_numbers_match_like_top_level_ones() {
        let r = row(&[(
            "partidas",
            Value::from(serde_json::json!([{"clave": "P-1", "monto": 600000}])),
        )]);
        assert_eq!(build_searchable_text(&r), "clavep1monto600000");
        assert!(matches_query(&r, "600000"));
        assert!(!matches_query(&r, "6000000"));
        assert_eq!(
            normalize_column_filter_token(&r["partidas"]),
            r#"[{"clave":"p-1","monto":600000}]"#
        );
    }

    #[test]
    fn facet_example_from_status_column() {
        let options = compute_facet_options(&status_rows(), "status");
        let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["Activo", "Vacío", "Vencido"]);

        let tokens: Vec<&str> = options.iter().map(|o| o.token.as_str()).collect();
        assert_eq!(tokens, vec!["activo", EMPTY_TOKEN, "vencido"]);
        assert!(options.iter().all(|o| o.count == 1));
    }

    #[test]
    fn facet_counts_sum_to_row_count() {
        let rows = vec![
            row(&[("status", Value::from("Activo"))]),
            row(&[("status", Value::from(" activo "))]),
            row(&[("status", Value::from(""))]),
            row(&[("other", Value::from("x"))]),
            row(&[("status", Value::from(12.0))]),
        ];
        let options = compute_facet_options(&rows, "status");
        assert_eq!(options.iter().map(|o| o.count).sum::<usize>(), rows.len());

        let empty = options.iter().find(|o| o.token == EMPTY_TOKEN).unwrap();
        assert_eq!(empty.count, 2);
        let activo = options.iter().find(|o| o.token == "activo").unwrap();
        assert_eq!(activo.count, 2);
    }

    #[test]
    fn tokens_and_labels_per_value_kind() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let cases = [
            (Value::from(1234567.0), "1234567", "1,234,567"),
            (Value::from(date), "2026-01-15T00:00:00.000Z", "15/01/2026"),
            (Value::from(false), "false", "No"),
            (Value::from("  EN   Proceso "), "en proceso", "En proceso"),
            (Value::from("   "), EMPTY_TOKEN, EMPTY_LABEL),
        ];
        for (value, token, label) in cases {
            let t = normalize_column_filter_token(&value);
            assert_eq!(t, token);
            assert_eq!(format_column_filter_option_label(&t, &value), label);
        }
    }

    #[test]
    fn collation_is_numeric_and_accent_aware() {
        let mut labels = vec!["10", "9", "1,234", "b", "Á", "a", "vacío", "vacio"];
        labels.sort_by(|a, b| collate(a, b));
        assert_eq!(labels, vec!["9", "10", "1,234", "a", "Á", "b", "vacio", "vacío"]);
    }

    #[test]
    fn toggling_every_token_reaches_fully_excluding_and_back() {
        let rows = status_rows();
        let seen = observed(&rows, "status");
        let mut filters = ColumnFilters::new();
        assert_eq!(filters.state("status"), FilterState::Unrestricted);

        let tokens: Vec<String> = seen.iter().cloned().collect();
        for t in &tokens[..tokens.len() - 1] {
            assert_eq!(
                filters.toggle_token("status", t, &seen),
                FilterState::PartiallyRestricted
            );
        }
        assert_eq!(
            filters.toggle_token("status", &tokens[tokens.len() - 1], &seen),
            FilterState::FullyExcluding
        );
        assert_eq!(filters.active_count(), 1);

        for (idx, t) in tokens.iter().enumerate() {
            let state = filters.toggle_token("status", t, &seen);
            if idx + 1 == tokens.len() {
                assert_eq!(state, FilterState::Unrestricted);
            } else {
                assert_eq!(state, FilterState::PartiallyRestricted);
            }
        }
        assert_eq!(filters.active_count(), 0);
    }

    #[test]
    fn stale_tokens_are_dropped_on_toggle() {
        let rows = status_rows();
        let seen = observed(&rows, "status");
        let mut filters = ColumnFilters::new();
        let stale: HashSet<String> = ["activo", "cancelado"].iter().map(|s| s.to_string()).collect();
        filters.set_selection("status", Some(stale));

        filters.toggle_token("status", "vencido", &seen);
        let selection = filters.selection("status").unwrap();
        assert!(selection.contains("vencido"));
        assert!(!selection.contains("cancelado"));
    }

    #[test]
    fn explicit_empty_selection_hides_every_row() {
        let filters: ColumnFilters = [("status".to_string(), Some(HashSet::new()))]
            .into_iter()
            .collect();
        assert_eq!(filters.state("status"), FilterState::FullyExcluding);
        for r in status_rows() {
            assert!(!matches_column_filters(&r, &filters));
        }
    }

    #[test]
    fn absent_or_unset_columns_impose_nothing() {
        let filters: ColumnFilters = [("status".to_string(), None)].into_iter().collect();
        assert!(filters.is_empty());
        for r in status_rows() {
            assert!(matches_column_filters(&r, &filters));
        }
    }

    #[test]
    fn selection_membership_uses_tokens() {
        let mut filters = ColumnFilters::new();
        let selection: HashSet<String> = ["activo".to_string(), EMPTY_TOKEN.to_string()].into();
        filters.set_selection("status", Some(selection));

        let visible: Vec<bool> = status_rows()
            .iter()
            .map(|r| matches_column_filters(r, &filters))
            .collect();
        assert_eq!(visible, vec![true, false, true]);
        assert!(filters.is_selected("status", "activo"));
        assert!(!filters.is_selected("status", "vencido"));
        assert!(filters.is_selected("other", "anything"));
    }

    #[test]
    fn select_all_and_deselect_all() {
        let mut filters = ColumnFilters::new();
        filters.deselect_all("status");
        assert_eq!(filters.state("status"), FilterState::FullyExcluding);
        filters.select_all("status");
        assert_eq!(filters.state("status"), FilterState::Unrestricted);
        filters.deselect_all("a");
        filters.deselect_all("b");
        filters.clear_all();
        assert_eq!(filters.active_count(), 0);
    }
}
