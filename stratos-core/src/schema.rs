//! Schema Detector (C1): classifies the columns of a tabular artifact into
//! dimensions, identifiers, and metric roles, and computes per-metric
//! summary statistics.
//!
//! `detect` is a pure function: given the same rows it always produces the
//! same `DataSchema`, with no I/O and no reliance on LLM output.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The role a column was classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricRole {
    Efficiency,
    Cost,
    Volume,
    Comparative,
}

/// Summary statistics for a numeric column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: usize,
}

/// A classified metric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub role: MetricRole,
    pub stats: Stats,
}

/// The data dictionary produced by the schema detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSchema {
    pub primary_dimension: String,
    pub row_count: usize,
    pub identifiers: Vec<String>,
    pub efficiency_metrics: Vec<Metric>,
    pub cost_metrics: Vec<Metric>,
    pub volume_metrics: Vec<Metric>,
    pub comparative_metrics: Vec<Metric>,
}

impl DataSchema {
    /// Render a human-readable data dictionary for injection into prompts:
    /// every column with its detected role and up to three example values.
    pub fn to_dictionary_string(&self, examples: &BTreeMap<String, Vec<String>>) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "primary_dimension: {}\nrow_count: {}\n",
            self.primary_dimension, self.row_count
        ));
        for name in &self.identifiers {
            push_column_line(&mut out, name, "identifier", examples);
        }
        for group in [
            ("efficiency", &self.efficiency_metrics),
            ("cost", &self.cost_metrics),
            ("volume", &self.volume_metrics),
            ("comparative", &self.comparative_metrics),
        ] {
            for metric in group.1 {
                push_column_line(&mut out, &metric.name, group.0, examples);
            }
        }
        out
    }
}

fn push_column_line(
    out: &mut String,
    name: &str,
    role: &str,
    examples: &BTreeMap<String, Vec<String>>,
) {
    let sample = examples
        .get(name)
        .map(|values| values.iter().take(3).cloned().collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
    out.push_str(&format!("- {name} ({role}): {sample}\n"));
}

/// A single cell value from a parsed tabular artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Empty,
}

impl CellValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// A parsed tabular artifact: column names plus row-major cell values.
///
/// `currency_hints` records the indices of columns where at least one raw
/// cell carried a `$` prefix or a `USD` marker before numeric parsing
/// stripped it — the signal `classify_by_values` needs to recognize a cost
/// column whose magnitudes don't happen to have a fractional cents part.
#[derive(Debug, Clone, Default)]
pub struct TabularInput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub currency_hints: HashSet<usize>,
}

impl TabularInput {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            columns,
            rows,
            currency_hints: HashSet::new(),
        }
    }

    fn column_values(&self, index: usize) -> Vec<&CellValue> {
        self.rows
            .iter()
            .filter_map(|row| row.get(index))
            .collect()
    }

    /// Up to three rendered example values for a column, used for prompt
    /// dictionary generation.
    pub fn examples(&self) -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        for (idx, name) in self.columns.iter().enumerate() {
            let values: Vec<String> = self
                .column_values(idx)
                .into_iter()
                .filter(|v| !matches!(v, CellValue::Empty))
                .take(3)
                .map(|v| match v {
                    CellValue::Number(n) => format!("{n}"),
                    CellValue::Text(s) => s.clone(),
                    CellValue::Empty => String::new(),
                })
                .collect();
            map.insert(name.clone(), values);
        }
        map
    }
}

fn parse_cell(raw: &str) -> CellValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    let stripped = trimmed.trim_start_matches('$').replace(',', "");
    match stripped.parse::<f64>() {
        Ok(n) => CellValue::Number(n),
        Err(_) => CellValue::Text(trimmed.to_string()),
    }
}

/// True if the raw cell text carries a currency marker (`$` prefix or a
/// `USD` token) that numeric parsing is about to strip. Checked before
/// `parse_cell` discards the symbol, so the hint survives for
/// `classify_by_values` even on columns with no fractional cents.
fn has_currency_marker(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.starts_with('$') || trimmed.to_ascii_uppercase().contains("USD")
}

/// Parse a CSV artifact into a `TabularInput`. Cells are read as numbers
/// when they parse as such (after stripping `$` and thousands separators),
/// otherwise kept as text; blank cells become `CellValue::Empty`. Columns
/// where any raw cell carried a `$`/`USD` marker are recorded in
/// `currency_hints` before that marker is stripped.
pub fn parse_csv(text: &str) -> Result<TabularInput> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| Error::parse(format!("invalid csv header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    let mut currency_hints = HashSet::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::parse(format!("invalid csv row: {e}")))?;
        let row: Vec<CellValue> = record
            .iter()
            .enumerate()
            .map(|(idx, raw)| {
                if has_currency_marker(raw) {
                    currency_hints.insert(idx);
                }
                parse_cell(raw)
            })
            .collect();
        rows.push(row);
    }

    Ok(TabularInput {
        columns,
        rows,
        currency_hints,
    })
}

struct RoleRule {
    role: MetricRole,
    pattern: &'static str,
}

fn name_rules() -> Vec<RoleRule> {
    vec![
        RoleRule { role: MetricRole::Efficiency, pattern: r"roas|ctr|cvr|rate" },
        RoleRule { role: MetricRole::Cost, pattern: r"cpc|cpa|cpm|spend|cost|bid" },
        RoleRule {
            role: MetricRole::Volume,
            pattern: r"impressions|clicks|orders|sales|revenue|conversions",
        },
    ]
}

fn comparative_pattern() -> Regex {
    Regex::new(r"suggested|recommended|target").expect("static regex is valid")
}

fn normalize(name: &str) -> String {
    name.to_lowercase().replace([' ', '-'], "_")
}

/// Classify a single column name against the ordered keyword rule table
/// (step 1 of the detection algorithm). Comparative columns additionally
/// need a cost/efficiency sibling name to be paired against; that pairing
/// is resolved by the caller in `detect`, since it needs the full column
/// list.
fn classify_by_name(name: &str) -> Option<MetricRole> {
    let normalized = normalize(name);
    if comparative_pattern().is_match(&normalized) {
        return Some(MetricRole::Comparative);
    }
    for rule in name_rules() {
        let re = Regex::new(rule.pattern).expect("static regex is valid");
        if re.is_match(&normalized) {
            return Some(rule.role);
        }
    }
    None
}

/// Value-range fallback (step 2): used only for columns whose name didn't
/// match any keyword rule. `currency_hint` is true when the raw CSV carried
/// a `$`/`USD` marker on this column before numeric parsing stripped it.
fn classify_by_values(values: &[&CellValue], currency_hint: bool) -> Option<MetricRole> {
    let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if numbers.is_empty() {
        return None;
    }

    let has_fraction = numbers.iter().any(|n| n.fract().abs() > f64::EPSILON);
    let all_unit_or_percent = numbers
        .iter()
        .all(|n| (0.0..=1.0).contains(n) || (0.0..=100.0).contains(n));
    if all_unit_or_percent && has_fraction {
        return Some(MetricRole::Efficiency);
    }

    let all_large_ints = numbers
        .iter()
        .all(|n| n.fract().abs() < f64::EPSILON && *n >= 100.0);
    if all_large_ints {
        return Some(MetricRole::Volume);
    }

    // Rounds cleanly to two decimal places (cents) with at least one
    // fractional value, or the raw column carried an explicit $/USD marker.
    let rounds_to_cents = numbers
        .iter()
        .all(|n| *n >= 0.0 && *n == (n * 100.0).round() / 100.0)
        && has_fraction;
    if currency_hint || rounds_to_cents {
        return Some(MetricRole::Cost);
    }

    None
}

fn compute_stats(values: &[&CellValue]) -> Stats {
    let mut numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if numbers.is_empty() {
        return Stats::default();
    }
    numbers.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let count = numbers.len();
    let sum: f64 = numbers.iter().sum();
    let mean = sum / count as f64;
    let median = if count % 2 == 0 {
        (numbers[count / 2 - 1] + numbers[count / 2]) / 2.0
    } else {
        numbers[count / 2]
    };
    let min = numbers[0];
    let max = numbers[count - 1];

    Stats { mean, median, min, max, sum, count }
}

/// Tie-break order for choosing `primary_dimension` among the columns
/// classified as dimensions (step 3).
fn pick_primary_dimension(
    dimensions: &[String],
    input: &TabularInput,
) -> String {
    if dimensions.is_empty() {
        return String::new();
    }
    for preferred in ["keyword", "campaign"] {
        if let Some(name) = dimensions.iter().find(|d| normalize(d) == preferred) {
            return name.clone();
        }
    }
    if let Some(name) = dimensions
        .iter()
        .find(|d| matches!(normalize(d).as_str(), "ad_group" | "adset"))
    {
        return name.clone();
    }

    let mut best: Option<(&String, usize)> = None;
    for name in dimensions {
        let idx = input.columns.iter().position(|c| c == name).unwrap_or(0);
        let cardinality: HashSet<String> = input
            .column_values(idx)
            .into_iter()
            .filter_map(|v| match v {
                CellValue::Text(s) => Some(s.clone()),
                CellValue::Number(n) => Some(n.to_string()),
                CellValue::Empty => None,
            })
            .collect();
        let card = cardinality.len();
        match &best {
            Some((_, best_card)) if *best_card >= card => {}
            _ => best = Some((name, card)),
        }
    }

    best.map(|(name, _)| name.clone())
        .unwrap_or_else(|| dimensions[0].clone())
}

/// Classify every column of `input` and compute the resulting `DataSchema`.
pub fn detect(input: &TabularInput) -> DataSchema {
    if input.rows.is_empty() {
        return DataSchema {
            row_count: 0,
            ..Default::default()
        };
    }

    let mut efficiency_metrics = Vec::new();
    let mut cost_metrics = Vec::new();
    let mut volume_metrics = Vec::new();
    let mut comparative_metrics = Vec::new();
    let mut dimensions = Vec::new();

    for (idx, name) in input.columns.iter().enumerate() {
        let values = input.column_values(idx);
        let currency_hint = input.currency_hints.contains(&idx);
        let role = classify_by_name(name).or_else(|| classify_by_values(&values, currency_hint));

        match role {
            Some(role) => {
                let metric = Metric {
                    name: name.clone(),
                    role,
                    stats: compute_stats(&values),
                };
                match role {
                    MetricRole::Efficiency => efficiency_metrics.push(metric),
                    MetricRole::Cost => cost_metrics.push(metric),
                    MetricRole::Volume => volume_metrics.push(metric),
                    MetricRole::Comparative => comparative_metrics.push(metric),
                }
            }
            None => dimensions.push(name.clone()),
        }
    }

    // Columns that are entirely non-numeric text and look like row
    // identifiers (unique per row) are treated as identifiers rather than
    // dimensions; everything else non-numeric is a dimension.
    let row_count = input.rows.len();
    let (identifiers, dims): (Vec<String>, Vec<String>) = dimensions.into_iter().partition(|name| {
        let idx = input.columns.iter().position(|c| c == name).unwrap_or(0);
        let values: HashSet<String> = input
            .column_values(idx)
            .into_iter()
            .filter_map(|v| match v {
                CellValue::Text(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        !values.is_empty() && values.len() == row_count && normalize(name).contains("id")
    });

    let primary_dimension = pick_primary_dimension(&dims, input);

    DataSchema {
        primary_dimension,
        row_count,
        identifiers,
        efficiency_metrics,
        cost_metrics,
        volume_metrics,
        comparative_metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(values: Vec<CellValue>) -> Vec<CellValue> {
        values
    }

    #[test]
    fn empty_input_yields_zero_row_schema() {
        let input = TabularInput::new(vec!["keyword".into(), "roas".into()], vec![]);
        let schema = detect(&input);
        assert_eq!(schema.row_count, 0);
        assert_eq!(schema.primary_dimension, "");
        assert!(schema.efficiency_metrics.is_empty());
    }

    #[test]
    fn classifies_known_columns_by_name() {
        let columns = vec![
            "keyword".to_string(),
            "roas".to_string(),
            "cpc".to_string(),
            "clicks".to_string(),
            "suggested_bid".to_string(),
        ];
        let rows = vec![
            vec![
                CellValue::Text("fanny pack men".into()),
                CellValue::Number(3.74),
                CellValue::Number(0.46),
                CellValue::Number(120.0),
                CellValue::Number(0.78),
            ],
            vec![
                CellValue::Text("socks".into()),
                CellValue::Number(1.2),
                CellValue::Number(0.30),
                CellValue::Number(200.0),
                CellValue::Number(0.40),
            ],
        ];
        let input = TabularInput::new(columns, rows);
        let schema = detect(&input);

        assert_eq!(schema.row_count, 2);
        assert_eq!(schema.primary_dimension, "keyword");
        assert_eq!(schema.efficiency_metrics.len(), 1);
        assert_eq!(schema.efficiency_metrics[0].name, "roas");
        assert_eq!(schema.cost_metrics.len(), 1);
        assert_eq!(schema.volume_metrics.len(), 1);
        assert_eq!(schema.comparative_metrics.len(), 1);
    }

    #[test]
    fn primary_dimension_prefers_keyword_over_campaign() {
        let columns = vec!["campaign".into(), "keyword".into(), "clicks".into()];
        let rows = vec![vec![
            CellValue::Text("c1".into()),
            CellValue::Text("k1".into()),
            CellValue::Number(10.0),
        ]];
        let input = TabularInput::new(columns, rows);
        let schema = detect(&input);
        assert_eq!(schema.primary_dimension, "keyword");
    }

    #[test]
    fn stats_ignore_non_numeric_cells() {
        let columns = vec!["dim".into(), "clicks".into()];
        let rows = vec![
            vec![CellValue::Text("a".into()), CellValue::Number(100.0)],
            vec![CellValue::Text("b".into()), CellValue::Empty],
            vec![CellValue::Text("c".into()), CellValue::Number(300.0)],
        ];
        let input = TabularInput::new(columns, rows);
        let schema = detect(&input);
        let clicks = &schema.volume_metrics[0];
        assert_eq!(clicks.stats.count, 2);
        assert_eq!(clicks.stats.sum, 400.0);
        assert_eq!(clicks.stats.mean, 200.0);
    }

    #[test]
    fn parse_csv_reads_headers_and_numeric_cells() {
        let csv_text = "keyword,roas,spend\nfanny pack men,3.74,$120.50\nwidgets,,200\n";
        let input = parse_csv(csv_text).unwrap();
        assert_eq!(input.columns, vec!["keyword", "roas", "spend"]);
        assert_eq!(input.rows.len(), 2);
        assert_eq!(input.rows[0][1], CellValue::Number(3.74));
        assert_eq!(input.rows[1][1], CellValue::Empty);
        assert_eq!(input.rows[0][2], CellValue::Number(120.50));
    }

    #[test]
    fn value_range_fallback_classifies_unnamed_efficiency_column() {
        let columns = vec!["dim".into(), "mystery_ratio".into()];
        let rows = vec![
            col(vec![CellValue::Text("a".into()), CellValue::Number(0.12)]),
            col(vec![CellValue::Text("b".into()), CellValue::Number(0.87)]),
        ];
        let input = TabularInput::new(columns, rows);
        let schema = detect(&input);
        assert_eq!(schema.efficiency_metrics.len(), 1);
        assert_eq!(schema.efficiency_metrics[0].name, "mystery_ratio");
    }

    #[test]
    fn fractional_but_non_cent_values_do_not_look_like_currency() {
        // 3.333... never rounds cleanly to cents, so this must not trip the
        // currency fallback just because it has a fractional part.
        let columns = vec!["dim".into(), "mystery_index".into()];
        let rows = vec![
            col(vec![CellValue::Text("a".into()), CellValue::Number(3.33333)]),
            col(vec![CellValue::Text("b".into()), CellValue::Number(7.77777)]),
        ];
        let input = TabularInput::new(columns, rows);
        let schema = detect(&input);
        assert!(schema.cost_metrics.is_empty());
    }

    #[test]
    fn dollar_marker_classifies_unnamed_column_as_cost_without_fractional_cents() {
        // Whole-dollar amounts carry no fractional signal at all; only the
        // `$` marker recovered from the raw CSV can classify this as cost.
        // The column name is deliberately generic so name-based classification
        // (step 1) can't short-circuit this and mask a broken value fallback.
        let csv_text = "dim,mystery_amount\na,$45\nb,$67\n";
        let input = parse_csv(csv_text).unwrap();
        let schema = detect(&input);
        assert_eq!(schema.cost_metrics.len(), 1);
        assert_eq!(schema.cost_metrics[0].name, "mystery_amount");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn roas_rows() -> impl Strategy<Value = Vec<f64>> {
            prop::collection::vec(0.0f64..10.0, 1..20)
        }

        proptest! {
            /// `detect` is a pure function: running it twice over the same
            /// input always yields the same schema.
            #[test]
            fn detect_is_deterministic(values in roas_rows()) {
                let columns = vec!["keyword".to_string(), "roas".to_string()];
                let rows: Vec<Vec<CellValue>> = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| vec![CellValue::Text(format!("k{i}")), CellValue::Number(*v)])
                    .collect();
                let input = TabularInput::new(columns, rows);

                let first = detect(&input);
                let second = detect(&input);
                prop_assert_eq!(first, second);
            }

            /// `row_count` always matches the number of input rows.
            #[test]
            fn row_count_matches_input(values in roas_rows()) {
                let columns = vec!["keyword".to_string(), "roas".to_string()];
                let rows: Vec<Vec<CellValue>> = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| vec![CellValue::Text(format!("k{i}")), CellValue::Number(*v)])
                    .collect();
                let expected = rows.len();
                let input = TabularInput::new(columns, rows);
                let schema = detect(&input);
                prop_assert_eq!(schema.row_count, expected);
            }
        }
    }
}
