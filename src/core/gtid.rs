//! Pure counting over the MySQL GTID-set grammar.
//!
//! ```text
//! set      := entry ("," entry)*
//! entry    := uuid ":" range (":" range)*
//! range    := n | n "-" m       (m >= n >= 1)
//! ```
//!
//! `SHOW`-style output sometimes wraps a set across multiple lines with the
//! continuation indented; we tolerate embedded whitespace by stripping it
//! before parsing rather than by complicating the grammar.

use crate::errors::ArbiterError;

/// Counts the total number of distinct transaction identifiers in `gtid_set`.
pub fn count_gtids(gtid_set: &str) -> Result<u64, ArbiterError> {
    let cleaned: String = gtid_set.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Ok(0);
    }

    let mut total: u64 = 0;
    for entry in cleaned.split(',') {
        if entry.is_empty() {
            continue;
        }
        total += count_entry(entry)?;
    }
    Ok(total)
}

/// Counts one `uuid:range(:range)*` entry.
fn count_entry(entry: &str) -> Result<u64, ArbiterError> {
    let mut parts = entry.split(':');
    let _uuid = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ArbiterError::PermanentParse(format!("entry missing uuid: '{entry}'")))?;

    let mut count = 0u64;
    let mut saw_range = false;
    for range in parts {
        saw_range = true;
        count += count_range(range, entry)?;
    }

    if !saw_range {
        return Err(ArbiterError::PermanentParse(format!(
            "entry has no ranges: '{entry}'"
        )));
    }
    Ok(count)
}

/// Counts one `n` or `n-m` range token.
fn count_range(range: &str, entry: &str) -> Result<u64, ArbiterError> {
    match range.split_once('-') {
        Some((lo, hi)) => {
            let lo: u64 = lo
                .parse()
                .map_err(|_| ArbiterError::PermanentParse(format!("bad range start in '{entry}'")))?;
            let hi: u64 = hi
                .parse()
                .map_err(|_| ArbiterError::PermanentParse(format!("bad range end in '{entry}'")))?;
            if hi < lo || lo < 1 {
                return Err(ArbiterError::PermanentParse(format!(
                    "invalid range '{range}' in '{entry}'"
                )));
            }
            Ok(hi - lo + 1)
        }
        None => {
            let n: u64 = range
                .parse()
                .map_err(|_| ArbiterError::PermanentParse(format!("bad value in '{entry}'")))?;
            if n < 1 {
                return Err(ArbiterError::PermanentParse(format!(
                    "invalid value '{range}' in '{entry}'"
                )));
            }
            Ok(1)
        }
    }
}
