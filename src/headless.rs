use std::collections::HashSet;
use std::fmt::Write;
use tracing::debug;

use crate::dataset::Dataset;
use crate::domain::TVError;
use crate::filter::{ColumnFilters, EMPTY_TOKEN, normalize_column_filter_token};
use crate::model::wrap_cell_content;
use crate::value::{Value, iso_datetime, parse_iso_datetime};

/// Parse a `column=token,token` argument. An empty token list selects nothing.
pub fn parse_filter_arg(arg: &str) -> Result<(String, HashSet<String>), TVError> {
    let Some((column, tokens)) = arg.split_once('=') else {
        return Err(TVError::InvalidArgument(format!(
            "filter \"{arg}\" is not of the form column=token,token"
        )));
    };
    let column = column.trim();
    if column.is_empty() {
        return Err(TVError::InvalidArgument(format!(
            "filter \"{arg}\" has no column"
        )));
    }
    let tokens = if tokens.trim().is_empty() {
        HashSet::new()
    } else {
        tokens.split(',').map(filter_token).collect()
    };
    Ok((column.to_string(), tokens))
}

// Typed tokens are matched the way cell values are tokenized
fn filter_token(raw: &str) -> String {
    let raw = raw.trim();
    if raw == EMPTY_TOKEN {
        return raw.to_string();
    }
    match parse_iso_datetime(raw) {
        Some(date) => iso_datetime(&date),
        None => normalize_column_filter_token(&Value::from(raw)),
    }
}

pub fn build_filters(args: &[String]) -> Result<ColumnFilters, TVError> {
    let mut filters = ColumnFilters::new();
    for arg in args {
        let (column, tokens) = parse_filter_arg(arg)?;
        debug!("Filter {column}: {tokens:?}");
        filters.set_selection(&column, Some(tokens));
    }
    Ok(filters)
}

/// Visible rows as CSV, header first.
pub fn render_rows(dataset: &Dataset, query: &str, filters: &ColumnFilters) -> String {
    let mut out = dataset
        .columns
        .iter()
        .map(|c| wrap_cell_content(c))
        .collect::<Vec<String>>()
        .join(",");
    out.push('\n');
    for row in dataset.visible_rows(query, filters) {
        let line = (0..dataset.columns.len())
            .map(|c| wrap_cell_content(&dataset.cell(row, c).coerce_to_string()))
            .collect::<Vec<String>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Facet options of `column`, one per line: selection mark, label, count and token.
pub fn render_facets(
    dataset: &Dataset,
    column: &str,
    filters: &ColumnFilters,
) -> Result<String, TVError> {
    if !dataset.columns.iter().any(|c| c == column) {
        return Err(TVError::InvalidArgument(format!(
            "unknown column \"{column}\""
        )));
    }
    let mut out = String::new();
    for option in dataset.facet_options(column) {
        let mark = if filters.is_selected(column, &option.token) {
            "x"
        } else {
            " "
        };
        // Writing into a String cannot fail
        let _ = writeln!(
            out,
            "[{mark}]\t{}\t{}\t{}",
            option.label, option.count, option.token
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Row;

    fn dataset() -> Dataset {
        let rows: Vec<Row> = [
            ("Monto Anteproyecto 2026", Value::from("ACTIVO")),
            ("Mantenimiento, pista", Value::from("VENCIDO")),
            ("Limpieza", Value::Null),
        ]
        .into_iter()
        .map(|(concepto, estatus)| {
            [
                ("concepto".to_string(), Value::from(concepto)),
                ("estatus".to_string(), estatus),
            ]
            .into_iter()
            .collect()
        })
        .collect();
        Dataset::new(
            "contratos",
            vec!["concepto".to_string(), "estatus".to_string()],
            rows,
        )
    }

    #[test]
    fn parses_filter_arguments() {
        let (column, tokens) = parse_filter_arg("estatus=ACTIVO, En  Proceso,__EMPTY__").unwrap();
        assert_eq!(column, "estatus");
        assert_eq!(
            tokens,
            HashSet::from([
                "activo".to_string(),
                "en proceso".to_string(),
                EMPTY_TOKEN.to_string()
            ])
        );
        assert!(parse_filter_arg("estatus=").unwrap().1.is_empty());
        assert!(parse_filter_arg("estatus").is_err());
        assert!(parse_filter_arg("=a").is_err());
    }

    #[test]
    fn date_tokens_keep_iso_form() {
        let (_, tokens) = parse_filter_arg("fecha=2026-01-15").unwrap();
        assert_eq!(tokens, HashSet::from(["2026-01-15T00:00:00.000Z".to_string()]));
    }

    #[test]
    fn prints_visible_rows_as_csv() {
        let data = dataset();
        let filters = build_filters(&["estatus=vencido,__EMPTY__".to_string()]).unwrap();
        assert_eq!(
            render_rows(&data, "", &filters),
            "concepto,estatus\n\"Mantenimiento, pista\",VENCIDO\nLimpieza,\n"
        );
        assert_eq!(
            render_rows(&data, "limp", &filters),
            "concepto,estatus\nLimpieza,\n"
        );
    }

    #[test]
    fn empty_selection_prints_only_the_header() {
        let data = dataset();
        let filters = build_filters(&["estatus=".to_string()]).unwrap();
        assert_eq!(render_rows(&data, "", &filters), "concepto,estatus\n");
    }

    #[test]
    fn prints_facets_with_selection_marks() {
        let data = dataset();
        let filters = build_filters(&["estatus=activo".to_string()]).unwrap();
        let out = render_facets(&data, "estatus", &filters).unwrap();
        assert_eq!(
            out,
            "[x]\tActivo\t1\tactivo\n[ ]\tVacío\t1\t__EMPTY__\n[ ]\tVencido\t1\tvencido\n"
        );
        assert!(render_facets(&data, "nope", &filters).is_err());
    }
}
