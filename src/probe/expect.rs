//! Expectation Evaluator
//!
//! Decides pass/fail for a probe output against a declarative expect
//! expression: pipe-separated alternatives, each either a literal substring
//! or a `$count` comparison. Any passing alternative passes the whole
//! expression.

/// Evaluates `expect` against the captured value (command output, or the
/// decimal HTTP status). Returns the human-readable failure reason when no
/// alternative matches.
///
/// An empty expression always passes. Content that does not parse as an
/// integer counts as `0` for `$count` comparisons.
pub fn evaluate(content: &str, expect: &str) -> Result<(), String> {
    if expect.is_empty() {
        return Ok(());
    }

    let mut last_reason = String::new();
    for alternative in expect.split('|') {
        match check_alternative(content, alternative, expect) {
            Ok(()) => return Ok(()),
            Err(reason) => last_reason = reason,
        }
    }

    Err(last_reason)
}

fn check_alternative(content: &str, alternative: &str, expression: &str) -> Result<(), String> {
    if let Some(comparison) = parse_count(alternative) {
        return comparison.check(content);
    }

    if content.contains(alternative) {
        Ok(())
    } else {
        Err(format!("expect: {} but res: {}", expression, content))
    }
}

/// A `$count` relation in one of its four spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountCheck {
    /// `$count < N` / `N > $count`: fails when the content exceeds N.
    AtMost(i64),
    /// `$count > N` / `N < $count`: fails when the content is below N.
    AtLeast(i64),
}

impl CountCheck {
    fn check(self, content: &str) -> Result<(), String> {
        let actual: i64 = content.trim().parse().unwrap_or(0);
        match self {
            CountCheck::AtMost(target) if actual > target => Err(format!(
                "expect: $count < {} but res: {}",
                target, actual
            )),
            CountCheck::AtLeast(target) if actual < target => Err(format!(
                "expect: $count > {} but res: {}",
                target, actual
            )),
            _ => Ok(()),
        }
    }
}

/// Recognizes the four count spellings; anything else is a substring
/// alternative. The integer operand sits on the side opposite `$count`.
fn parse_count(alternative: &str) -> Option<CountCheck> {
    if let Some(rest) = split_after(alternative, "$count <") {
        return rest.trim().parse().ok().map(CountCheck::AtMost);
    }
    if let Some(head) = split_before(alternative, "> $count") {
        return head.trim().parse().ok().map(CountCheck::AtMost);
    }
    if let Some(rest) = split_after(alternative, "$count >") {
        return rest.trim().parse().ok().map(CountCheck::AtLeast);
    }
    if let Some(head) = split_before(alternative, "< $count") {
        return head.trim().parse().ok().map(CountCheck::AtLeast);
    }
    None
}

fn split_after<'a>(s: &'a str, marker: &str) -> Option<&'a str> {
    s.find(marker).map(|idx| &s[idx + marker.len()..])
}

fn split_before<'a>(s: &'a str, marker: &str) -> Option<&'a str> {
    s.find(marker).map(|idx| &s[..idx])
}
