//! Pattern matching primitives
//!
//! Rules and approvals describe targets with two pattern flavours:
//!
//! - **Glob** (default): shell-style, not path-aware. `*` matches any run of
//!   characters including `/`, `?` matches exactly one character and
//!   `[...]` matches a character class. Everything else is literal.
//! - **Regex** (rules only): the pattern must match at the *start* of the
//!   target, but does not have to consume all of it.

use glob::Pattern;
use regex::Regex;

use crate::core::{GovernanceError, GovernanceResult};

/// Check a target against a shell-style glob
///
/// A `[` with no closing `]` is a literal character, as in the shell. Any
/// pattern the glob compiler still rejects falls back to a literal
/// comparison, so it only ever matches itself.
pub fn glob_match(pattern: &str, target: &str) -> bool {
    match compile_glob(pattern) {
        Ok(compiled) => compiled.matches(target),
        Err(e) => {
            tracing::warn!("Glob pattern falls back to literal comparison: {}", e);
            pattern == target
        }
    }
}

/// Compile a shell-style glob
///
/// Runs of `*` are collapsed first: `**` has path-component semantics in the
/// glob compiler, while targets here are flat strings. Unclosed `[` are
/// escaped so the rest of the pattern keeps its wildcards.
pub fn compile_glob(pattern: &str) -> GovernanceResult<Pattern> {
    let normalized = escape_unclosed_brackets(&collapse_stars(pattern));
    Pattern::new(&normalized)
        .map_err(|e| GovernanceError::InvalidPattern(format!("{}: {}", pattern, e)))
}

/// Compile a regex that is anchored at the start of the input
pub fn compile_prefix_regex(pattern: &str) -> GovernanceResult<Regex> {
    Regex::new(&format!("^(?:{})", pattern))
        .map_err(|e| GovernanceError::InvalidPattern(format!("{}: {}", pattern, e)))
}

/// Check a target against a start-anchored regex
///
/// Returns false when the pattern does not compile.
pub fn regex_prefix_match(pattern: &str, target: &str) -> bool {
    compile_prefix_regex(pattern)
        .map(|re| re.is_match(target))
        .unwrap_or(false)
}

fn collapse_stars(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut previous_star = false;
    for c in pattern.chars() {
        if c == '*' {
            if !previous_star {
                out.push(c);
            }
            previous_star = true;
        } else {
            out.push(c);
            previous_star = false;
        }
    }
    out
}

fn escape_unclosed_brackets(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '[' {
            match class_end(&chars, i) {
                Some(end) => {
                    out.extend(&chars[i..=end]);
                    i = end + 1;
                }
                None => {
                    out.push_str("[[]");
                    i += 1;
                }
            }
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Index of the `]` closing the class opened at `open`
fn class_end(chars: &[char], open: usize) -> Option<usize> {
    let mut first = open + 1;
    if chars.get(first) == Some(&'!') {
        first += 1;
    }
    // a `]` directly after the opening is a member, not the end
    (first + 1..chars.len()).find(|&k| chars[k] == ']')
}
