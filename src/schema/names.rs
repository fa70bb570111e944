use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Column every survey table keys rows on.
pub const IDENTIFIER_COLUMN: &str = "unitid";

/// Injected collection-year column.
pub const YEAR_COLUMN: &str = "year";

/// Suffixes that mark a column as coded-categorical, stored integral.
pub const CODED_SUFFIXES: &[&str] = &["code", "flag", "level", "status"];

/// Header spellings that drifted across collection years, folded to one
/// canonical name. Applied after normalization, so keys are already
/// lowercase/underscored.
static COLUMN_SYNONYMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("unit_id", "unitid"),
        ("institution_name", "instnm"),
        ("inst_name", "instnm"),
        ("survey_year", "year"),
        ("academic_year", "year"),
    ])
});

static FOUR_DIGIT_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(19|20)\d{2}").unwrap()
});

static TWO_DIGIT_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9])(\d{2})(?:[^0-9]|$)").unwrap()
});

/// Normalize a raw header cell to its canonical column name:
/// trim + strip outer quotes, lowercase, squash non-alphanumeric runs
/// to `_`, then fold known synonym spellings.
pub fn canonical_column(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };

    let mut out = String::with_capacity(unquoted.len());
    let mut last_was_sep = true;
    for c in unquoted.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }

    match COLUMN_SYNONYMS.get(out.as_str()) {
        Some(canon) => (*canon).to_string(),
        None => out,
    }
}

/// Canonical table names are lowercase, so catalog lookups stay exact.
pub fn canonical_table(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Derive the collection year carried in a table name.
///
/// Tries a 4-digit year token first (`enr2004_a` → 2004), then a lone
/// 2-digit token read as 20XX (`vartable02_hd` → 2002). Returns `None`
/// when the name carries neither.
pub fn year_from_table_name(name: &str) -> Option<i32> {
    if let Some(m) = FOUR_DIGIT_YEAR.find(name) {
        return m.as_str().parse().ok();
    }
    let caps = TWO_DIGIT_TOKEN.captures(name)?;
    let short: i32 = caps[1].parse().ok()?;
    Some(2000 + short)
}

/// Whether a canonical column name marks a coded-categorical field.
pub fn is_coded_column(name: &str) -> bool {
    CODED_SUFFIXES.iter().any(|s| name.ends_with(s))
}
