use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use super::ReportKind;

/// Title line: `8 July` for a day, `June 2023` for a month.
pub fn report_title(kind: ReportKind, period: NaiveDate) -> String {
    match kind {
        ReportKind::Daily => period.format("%-d %B").to_string(),
        ReportKind::Monthly => period.format("%B %Y").to_string(),
    }
}

/// Render zero-filled totals as a report message.
///
/// Ancestor rows read 0, so summing every row equals summing the leaves.
pub fn render_report(title: &str, totals: &HashMap<String, f64>) -> String {
    let sorted: BTreeMap<&str, f64> = totals.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    let mut out = String::with_capacity(title.len() + sorted.len() * 16 + 16);
    out.push_str(title);
    out.push('\n');
    for (path, amount) in &sorted {
        out.push_str(&format!("{path} - {amount:.2}\n"));
    }
    let total: f64 = sorted.values().sum();
    out.push('\n');
    out.push_str(&format!("Total - {total:.2}"));
    out
}
