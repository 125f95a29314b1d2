//! The one line reported back per processed image.

use chrono::NaiveDate;

pub const SUMMARY_DATE_FORMAT: &str = "%d/%m/%Y";

/// Success form when at least one account was recorded, failure form otherwise.
pub fn summarize(date: NaiveDate, identity: &str, recorded: usize) -> String {
    let date = date.format(SUMMARY_DATE_FORMAT);
    let identity = identity.to_uppercase();
    if recorded == 0 {
        format!("{} – {} – Analyse OCR impossible", date, identity)
    } else {
        format!(
            "{} – {} – {} compte(s) détecté(s) et ajouté(s)",
            date, identity, recorded
        )
    }
}
