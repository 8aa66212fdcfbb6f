//! Multi-value header folding with a custom separator.
//!
//! Generic header merging joins values with a comma. Cookies must be joined
//! with `;`, so this module carries its own fold.

use thiserror::Error;

use crate::headers::list::HeaderList;
use crate::headers::name::{split_line, HeaderName};
use crate::headers::workspace::Workspace;
use crate::observability::metrics;

/// The fold ran out of scratch space and was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("lost header {name}: {needed} bytes needed, {available} available")]
pub struct FoldError {
    pub name: String,
    pub needed: usize,
    pub available: usize,
}

/// What a successful fold did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folded {
    /// No header with that name.
    Absent,
    /// Exactly one occurrence; nothing allocated.
    Single,
    /// `count` occurrences merged into the first one.
    Merged { count: usize },
}

/// Merge every occurrence of `name` into the first one, joining values with
/// `sep`. Other headers keep their relative order.
///
/// The merged line is bounded by the workspace. When it does not fit, the
/// collection is left exactly as it was and a lost-header diagnostic is
/// emitted.
pub fn fold(
    headers: &mut HeaderList,
    name: &HeaderName,
    sep: char,
    ws: &mut Workspace,
) -> Result<Folded, FoldError> {
    let lines = headers.lines();
    let Some(first) = lines.iter().position(|line| name.matches(line)) else {
        return Ok(Folded::Absent);
    };

    let limit = ws.remaining();
    let mut merged: Option<String> = None;
    let mut kept: Vec<usize> = Vec::with_capacity(lines.len());
    let mut count = 1;

    for (idx, line) in lines.iter().enumerate().skip(first + 1) {
        if !name.matches(line) {
            kept.push(idx);
            continue;
        }

        let buf = merged.get_or_insert_with(|| lines[first].clone());
        let value = split_line(line).map(|(_, v)| v).unwrap_or_default();

        // One byte is kept back for the terminator the header table expects.
        let needed = buf.len() + sep.len_utf8() + value.len() + 1;
        if needed > limit {
            tracing::warn!(header = %name, needed, available = limit, "lost header");
            metrics::record_lost_header(name.as_str());
            return Err(FoldError {
                name: name.as_str().to_string(),
                needed,
                available: limit,
            });
        }
        buf.push(sep);
        buf.push_str(value);
        count += 1;
    }

    let Some(merged) = merged else {
        return Ok(Folded::Single);
    };

    if let Err(e) = ws.alloc(merged.len() + 1) {
        // Bounded by `limit` above.
        return Err(FoldError {
            name: name.as_str().to_string(),
            needed: e.requested,
            available: e.available,
        });
    }

    let mut out = Vec::with_capacity(first + 1 + kept.len());
    out.extend(lines[..first].iter().cloned());
    out.push(merged);
    out.extend(kept.into_iter().map(|idx| lines[idx].clone()));
    headers.replace_lines(out);

    Ok(Folded::Merged { count })
}
