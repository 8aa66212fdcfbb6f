//! Directive document interpreter.
//!
//! The document shape is fixed by nesting depth:
//!
//! ```text
//! depth 0   { ... }                     root object
//! depth 1     "vcl_recv": [ ... ]       section: phase key → array
//! depth 2       "X-Geo: UK"             directive: "Name: value" string
//! depth 3+      anything                walked, never applied
//! ```
//!
//! Interpretation is split in two. [`plan`] is a pure walk of the token
//! array for one phase and yields the directives that phase should apply.
//! [`apply`] then runs them against the phase's header collection.

use thiserror::Error;

use crate::directive::token::{Token, TokenKind};
use crate::headers::name::{split_line, H_COOKIE};
use crate::headers::{fold, FoldError, HeaderList, HeaderName, HeaderTarget, Workspace, WorkspaceOverflow};
use crate::observability::metrics;
use crate::phase::{Phase, PhaseContext};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpretError {
    #[error("json error: root not object {tokens}")]
    RootNotObject { tokens: usize },

    #[error("json error: {0} not array")]
    SectionNotArray(Phase),

    #[error("json error: header not in \"name: value\" format")]
    HeaderFormat,

    #[error("json error: token array truncated")]
    Truncated,

    #[error("{0}")]
    Workspace(#[from] WorkspaceOverflow),

    #[error("{0}")]
    LostHeader(#[from] FoldError),
}

/// The header whose directives accumulate and are folded into one line
/// instead of overwriting each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectRule {
    pub name: HeaderName,
    pub separator: char,
}

impl Default for CollectRule {
    fn default() -> Self {
        Self {
            name: H_COOKIE,
            separator: ';',
        }
    }
}

/// One `Name: value` directive, already unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub line: String,
    /// Length of the escaped source text.
    raw_len: usize,
}

/// What a phase should do with a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub target: Option<HeaderTarget>,
    pub directives: Vec<Directive>,
    /// Grammar violation that ended the walk early. Directives found before
    /// it are still applied.
    pub error: Option<InterpretError>,
}

/// The section a phase invocation acts on, if any.
fn active_section(phase: Phase, esi_level: u32) -> Option<(Phase, HeaderTarget)> {
    let target = phase.target()?;
    if phase == Phase::Deliver && esi_level > 0 {
        return None;
    }
    Some((phase, target))
}

/// Walk the token array and collect the directives for `phase`.
pub fn plan(body: &str, tokens: &[Token], phase: Phase, esi_level: u32) -> Plan {
    let active = active_section(phase, esi_level);
    let mut plan = Plan {
        target: active.map(|(_, target)| target),
        ..Plan::default()
    };
    if let Err(e) = walk_root(body, tokens, active.map(|(p, _)| p), &mut plan.directives) {
        plan.error = Some(e);
    }
    plan
}

fn walk_root(
    body: &str,
    tokens: &[Token],
    active: Option<Phase>,
    out: &mut Vec<Directive>,
) -> Result<(), InterpretError> {
    let Some(root) = tokens.first() else {
        return Ok(());
    };
    if root.kind != TokenKind::Object {
        if tokens.len() > 1 {
            return Err(InterpretError::RootNotObject { tokens: tokens.len() });
        }
        return Ok(());
    }

    // Keys and values are siblings, so a root with k sections has 2k children.
    let mut idx = 1;
    for _ in 0..root.size / 2 {
        let key = token(tokens, idx)?;
        let value = idx + 1;
        if let Some(section) = Phase::from_directive_key(key.text(body)) {
            walk_section(body, tokens, value, section, active == Some(section), out)?;
        }
        idx = subtree_end(tokens, value)?;
    }
    Ok(())
}

fn walk_section(
    body: &str,
    tokens: &[Token],
    idx: usize,
    section: Phase,
    active: bool,
    out: &mut Vec<Directive>,
) -> Result<(), InterpretError> {
    let array = token(tokens, idx)?;
    if array.kind != TokenKind::Array {
        return Err(InterpretError::SectionNotArray(section));
    }

    let mut child = idx + 1;
    for _ in 0..array.size {
        let element = token(tokens, child)?;
        if element.kind != TokenKind::String {
            return Err(InterpretError::HeaderFormat);
        }
        let raw = element.text(body);
        // Elements without a colon are not headers; skip them quietly.
        if active && raw.contains(':') {
            out.push(Directive {
                line: unescape(raw),
                raw_len: raw.len(),
            });
        }
        child += 1;
    }
    Ok(())
}

fn token(tokens: &[Token], idx: usize) -> Result<&Token, InterpretError> {
    tokens.get(idx).ok_or(InterpretError::Truncated)
}

/// Index just past the subtree rooted at `idx`.
fn subtree_end(tokens: &[Token], idx: usize) -> Result<usize, InterpretError> {
    let mut pending = 1;
    let mut i = idx;
    while pending > 0 {
        pending += token(tokens, i)?.size;
        pending -= 1;
        i += 1;
    }
    Ok(i)
}

/// Drop the backslash in front of `"`, `/` and `\`. Every other byte,
/// including other escape sequences, is copied as is.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next @ ('"' | '/' | '\\')) = chars.peek().copied() {
                out.push(next);
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Apply `plan` to the phase's header collection.
///
/// Ordinary directives overwrite any header of the same name. Directives for
/// the collect header are appended and folded once at the end, including
/// after a grammar error. Returns how many directives were applied.
pub fn apply(plan: Plan, ctx: &mut PhaseContext, collect: &CollectRule) -> Result<usize, InterpretError> {
    let phase = ctx.phase;
    let Some(target) = plan.target else {
        return plan.error.map_or(Ok(0), Err);
    };

    let (headers, ws) = ctx.headers_mut(target);
    let (applied, collected, overflow) = apply_directives(&plan.directives, headers, ws, collect);

    let folded = if collected {
        fold(headers, &collect.name, collect.separator, ws).err()
    } else {
        None
    };

    metrics::record_directives(phase, applied);
    tracing::debug!(phase = %phase, applied, planned = plan.directives.len(), "Directives applied");

    if let Some(e) = plan.error {
        return Err(e);
    }
    if let Some(e) = overflow {
        return Err(e.into());
    }
    if let Some(e) = folded {
        return Err(e.into());
    }
    Ok(applied)
}

fn apply_directives(
    directives: &[Directive],
    headers: &mut HeaderList,
    ws: &mut Workspace,
    collect: &CollectRule,
) -> (usize, bool, Option<WorkspaceOverflow>) {
    let mut applied = 0;
    let mut collected = false;

    for directive in directives {
        let Some((name, _)) = split_line(&directive.line) else {
            continue;
        };
        // `None` marks the collect header.
        let replace = if collect.name.is(name) {
            None
        } else {
            match HeaderName::new(name) {
                Ok(name) => Some(name),
                Err(e) => {
                    tracing::debug!(line = %directive.line, error = %e, "Skipping directive");
                    continue;
                }
            }
        };

        if let Err(e) = ws.alloc(directive.raw_len + 1) {
            tracing::warn!(line = %directive.line, error = %e, "Out of workspace applying directives");
            return (applied, collected, Some(e));
        }
        match replace {
            Some(name) => headers.replace(&name, directive.line.clone()),
            None => {
                headers.set(directive.line.clone());
                collected = true;
            }
        }
        applied += 1;
    }
    (applied, collected, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::token::tokenize;

    fn run(doc: &str, ctx: &mut PhaseContext) -> Result<usize, InterpretError> {
        let tokens = tokenize(doc, 128).unwrap();
        let plan = plan(doc, &tokens, ctx.phase, ctx.esi_level);
        apply(plan, ctx, &CollectRule::default())
    }

    fn lines(headers: &HeaderList) -> Vec<&str> {
        headers.iter().collect()
    }

    #[test]
    fn test_dispatch_by_phase() {
        let doc = r#"{"vcl_recv": ["X-A: 1"], "vcl_deliver": ["X-B: 2"]}"#;

        let mut ctx = PhaseContext::new(Phase::Receive);
        assert_eq!(run(doc, &mut ctx).unwrap(), 1);
        assert_eq!(lines(&ctx.req), vec!["X-A: 1"]);
        assert!(ctx.resp.is_empty());

        let mut ctx = PhaseContext::new(Phase::Deliver);
        assert_eq!(run(doc, &mut ctx).unwrap(), 1);
        assert_eq!(lines(&ctx.resp), vec!["X-B: 2"]);
        assert!(ctx.req.is_empty());
    }

    #[test]
    fn test_backend_phases_target_backend_collections() {
        let doc = r#"{"vcl_backend_fetch": ["X-F: 1"], "vcl_backend_response": ["Cache-Control: no-store"]}"#;

        let mut ctx = PhaseContext::new(Phase::BackendFetch);
        run(doc, &mut ctx).unwrap();
        assert_eq!(lines(&ctx.bereq), vec!["X-F: 1"]);

        let mut ctx = PhaseContext::new(Phase::BackendResponse);
        ctx.beresp.set("Cache-Control: max-age=60");
        run(doc, &mut ctx).unwrap();
        assert_eq!(lines(&ctx.beresp), vec!["Cache-Control: no-store"]);
    }

    #[test]
    fn test_overwrite_semantics_and_idempotence() {
        let doc = r#"{"vcl_recv": ["X-A: 1", "x-a: 2", "X-B: 3"]}"#;
        let mut ctx = PhaseContext::new(Phase::Receive);
        ctx.req.set("X-A: client");

        run(doc, &mut ctx).unwrap();
        let first = ctx.req.clone();
        assert_eq!(lines(&first), vec!["x-a: 2", "X-B: 3"]);

        run(doc, &mut ctx).unwrap();
        assert_eq!(ctx.req, first);
    }

    #[test]
    fn test_collect_header_is_folded() {
        let doc = r#"{"vcl_recv": ["Cookie: geo=UK", "X-A: 1", "Cookie: ab=1"]}"#;
        let mut ctx = PhaseContext::new(Phase::Receive);
        ctx.req = HeaderList::from_lines(["Host: example.test", "Cookie: session=abc"]);

        assert_eq!(run(doc, &mut ctx).unwrap(), 3);
        assert_eq!(
            lines(&ctx.req),
            vec!["Host: example.test", "Cookie: session=abc;geo=UK;ab=1", "X-A: 1"]
        );
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r#"Name: a\"b\\c"#), "Name: a\"b\\c");
        assert_eq!(unescape(r#"X: http:\/\/a"#), "X: http://a");
        assert_eq!(unescape(r#"X: \nA"#), r#"X: \nA"#);
        assert_eq!(unescape(r#"X: end\"#), r#"X: end\"#);

        let doc = r#"{"vcl_recv": ["Name: a\"b\\c"]}"#;
        let mut ctx = PhaseContext::new(Phase::Receive);
        run(doc, &mut ctx).unwrap();
        assert_eq!(ctx.req.get(&HeaderName::new("Name").unwrap()), Some("a\"b\\c"));
    }

    #[test]
    fn test_elements_without_colon_are_skipped() {
        let doc = r#"{"vcl_recv": ["garbage", "X-A: 1", "Bad Name: x"]}"#;
        let mut ctx = PhaseContext::new(Phase::Receive);
        assert_eq!(run(doc, &mut ctx).unwrap(), 1);
        assert_eq!(lines(&ctx.req), vec!["X-A: 1"]);
    }

    #[test]
    fn test_unknown_sections_and_deep_nesting_are_ignored() {
        let doc = r#"{"meta": {"a": [1, {"b": [2, 3]}]}, "vcl_recv": ["X-A: 1"], "extra": [[["X-Z: 9"]]]}"#;
        let mut ctx = PhaseContext::new(Phase::Receive);
        assert_eq!(run(doc, &mut ctx).unwrap(), 1);
        assert_eq!(lines(&ctx.req), vec!["X-A: 1"]);
    }

    #[test]
    fn test_grammar_errors() {
        let mut ctx = PhaseContext::new(Phase::Receive);
        assert_eq!(
            run(r#"[1, 2]"#, &mut ctx),
            Err(InterpretError::RootNotObject { tokens: 3 })
        );
        assert_eq!(run(r#"[]"#, &mut ctx), Ok(0));
        assert_eq!(
            run(r#"{"vcl_recv": "X-A: 1"}"#, &mut ctx),
            Err(InterpretError::SectionNotArray(Phase::Receive))
        );
        assert_eq!(
            run(r#"{"vcl_deliver": [["X-A: 1"]]}"#, &mut ctx),
            Err(InterpretError::HeaderFormat)
        );
        assert!(ctx.req.is_empty());
    }

    #[test]
    fn test_grammar_error_keeps_earlier_directives() {
        let doc = r#"{"vcl_recv": ["X-A: 1", "Cookie: a=1", "Cookie: b=2"], "vcl_deliver": {"x": 1}}"#;
        let mut ctx = PhaseContext::new(Phase::Receive);
        assert_eq!(
            run(doc, &mut ctx),
            Err(InterpretError::SectionNotArray(Phase::Deliver))
        );
        assert_eq!(lines(&ctx.req), vec!["X-A: 1", "Cookie: a=1;b=2"]);
    }

    #[test]
    fn test_esi_subrequests_skip_deliver() {
        let doc = r#"{"vcl_deliver": ["X-B: 2"]}"#;
        let mut ctx = PhaseContext::new(Phase::Deliver);
        ctx.esi_level = 1;
        assert_eq!(run(doc, &mut ctx).unwrap(), 0);
        assert!(ctx.resp.is_empty());
    }

    #[test]
    fn test_terminal_phases_apply_nothing() {
        let doc = r#"{"vcl_synth": ["X-S: 1"], "vcl_recv": ["X-A: 1"]}"#;
        for phase in [Phase::Pipe, Phase::Synth, Phase::BackendError] {
            let mut ctx = PhaseContext::new(phase);
            assert_eq!(run(doc, &mut ctx).unwrap(), 0);
            assert!(ctx.req.is_empty() && ctx.resp.is_empty());
        }
    }

    #[test]
    fn test_workspace_exhaustion_stops_walk() {
        let doc = r#"{"vcl_recv": ["X-A: 1", "X-B: 2"]}"#;
        let mut ctx = PhaseContext::new(Phase::Receive);
        ctx.workspace = Workspace::new(10);
        let err = run(doc, &mut ctx).unwrap_err();
        assert!(matches!(err, InterpretError::Workspace(_)));
        assert_eq!(lines(&ctx.req), vec!["X-A: 1"]);
    }

    #[test]
    fn test_skipped_directives_use_no_workspace() {
        let doc = r#"{"vcl_recv": ["Bad Name: xxxxxxxx", "X-A: 1"]}"#;
        let mut ctx = PhaseContext::new(Phase::Receive);
        ctx.workspace = Workspace::new(7);
        assert_eq!(run(doc, &mut ctx).unwrap(), 1);
        assert_eq!(lines(&ctx.req), vec!["X-A: 1"]);
        assert_eq!(ctx.workspace.remaining(), 0);
    }
}
