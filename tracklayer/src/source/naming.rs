//! Natural ordering for range identifiers.
//!
//! Sources enumerate contigs in file order, which is rarely the order a
//! human expects. Lexicographic sorting is worse: it puts `"chr10"` before
//! `"chr2"`. The comparator here treats digit runs as numbers and compares
//! everything else case-insensitively, so `chr1 < chr2 < chr10 < chrX`.

use std::cmp::Ordering;

/// Compares two identifiers numerically where they contain digit runs and
/// case-insensitively elsewhere.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();

    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let na = take_number(&mut ai);
                    let nb = take_number(&mut bi);
                    match na.cmp(&nb) {
                        Ordering::Equal => continue,
                        unequal => return unequal,
                    }
                }
                let la = ca.to_ascii_lowercase();
                let lb = cb.to_ascii_lowercase();
                match la.cmp(&lb) {
                    Ordering::Equal => {
                        ai.next();
                        bi.next();
                    }
                    unequal => return unequal,
                }
            }
        }
    }
}

/// Consumes a digit run and returns its numeric value.
///
/// Saturates rather than overflowing on absurdly long runs; ties between two
/// saturated values fall back to the remaining character comparison.
fn take_number(iter: &mut std::iter::Peekable<std::str::Chars<'_>>) -> u64 {
    let mut value: u64 = 0;
    while let Some(c) = iter.peek() {
        match c.to_digit(10) {
            Some(d) => {
                value = value.saturating_mul(10).saturating_add(d as u64);
                iter.next();
            }
            None => break,
        }
    }
    value
}
