//! Line-oriented script parser.
//!
//! Turns raw script text into an ordered queue of instruction blocks in three
//! deterministic passes:
//!
//! 1. Extract `BEGIN_FUNCTION name` … `END_FUNCTION` bodies into a mapping.
//! 2. Splice `INJECT_FUNCTION name` bodies in place (single pass, not recursive).
//! 3. Collate contiguous lines into blocks; `RUN_FUNCTION name` contributes the
//!    whole body as a standalone block.

use std::collections::{BTreeMap, VecDeque};

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::types::Instruction;

pub const BEGIN_FUNCTION: &str = "BEGIN_FUNCTION";
pub const END_FUNCTION: &str = "END_FUNCTION";
pub const INJECT_FUNCTION: &str = "INJECT_FUNCTION";
pub const RUN_FUNCTION: &str = "RUN_FUNCTION";

/// Compile-time failures. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: unknown function `{name}`")]
    UnknownFunction { name: String, line: usize },
    #[error("line {line}: `{marker}` requires a function name")]
    MissingFunctionName { marker: &'static str, line: usize },
    #[error("line {line}: function `{name}` is never closed with `END_FUNCTION`")]
    UnterminatedFunction { name: String, line: usize },
    #[error("line {line}: `BEGIN_FUNCTION` inside function `{name}` (functions do not nest)")]
    NestedFunction { name: String, line: usize },
    #[error("line {line}: `END_FUNCTION` without a matching `BEGIN_FUNCTION`")]
    UnexpectedEndFunction { line: usize },
}

/// Parsed script: the instruction queue plus the registered function bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub queue: VecDeque<Instruction>,
    pub functions: BTreeMap<String, String>,
}

/// A source line tagged with its 1-based position in the raw script.
///
/// Spliced function lines keep the number of the marker that pulled them in.
#[derive(Debug, Clone, Copy)]
struct SourceLine<'a> {
    number: usize,
    text: &'a str,
}

/// Parse raw script text into an instruction queue.
pub fn parse_script(raw: &str) -> Result<Script, ParseError> {
    let lines: Vec<SourceLine<'_>> = raw
        .lines()
        .enumerate()
        .map(|(idx, text)| SourceLine {
            number: idx + 1,
            text,
        })
        .collect();

    let (residual, functions) = extract_functions(&lines)?;
    let expanded = expand_inline(residual, &functions)?;
    let queue = collate(expanded, &functions)?;
    debug!(
        blocks = queue.len(),
        functions = functions.len(),
        "parsed script"
    );
    Ok(Script { queue, functions })
}

fn extract_functions<'a>(
    lines: &[SourceLine<'a>],
) -> Result<(Vec<SourceLine<'a>>, BTreeMap<String, String>), ParseError> {
    let mut residual = Vec::with_capacity(lines.len());
    let mut functions = BTreeMap::new();
    let mut iter = lines.iter();

    while let Some(line) = iter.next() {
        if is_comment(line.text) {
            continue;
        }
        match marker(line.text) {
            Some(BEGIN_FUNCTION) => {
                let name = function_name(line, BEGIN_FUNCTION)?;
                let mut body = Vec::new();
                let mut closed = false;
                for inner in iter.by_ref() {
                    if is_comment(inner.text) {
                        continue;
                    }
                    match marker(inner.text) {
                        Some(END_FUNCTION) => {
                            closed = true;
                            break;
                        }
                        Some(BEGIN_FUNCTION) => {
                            return Err(ParseError::NestedFunction {
                                name,
                                line: inner.number,
                            });
                        }
                        _ => body.push(inner.text.trim_end()),
                    }
                }
                if !closed {
                    return Err(ParseError::UnterminatedFunction {
                        name,
                        line: line.number,
                    });
                }
                if functions.insert(name.clone(), body.join("\n")).is_some() {
                    warn!(function = %name, line = line.number, "function redefined, keeping the last body");
                }
            }
            Some(END_FUNCTION) => {
                return Err(ParseError::UnexpectedEndFunction { line: line.number });
            }
            _ => residual.push(*line),
        }
    }

    Ok((residual, functions))
}

fn expand_inline<'a>(
    residual: Vec<SourceLine<'a>>,
    functions: &'a BTreeMap<String, String>,
) -> Result<Vec<SourceLine<'a>>, ParseError> {
    let mut expanded = Vec::with_capacity(residual.len());
    for line in residual {
        if marker(line.text) != Some(INJECT_FUNCTION) {
            expanded.push(line);
            continue;
        }
        let body = lookup(functions, &line, INJECT_FUNCTION)?;
        // Spliced lines go straight to the output so nested markers are not re-expanded.
        expanded.extend(non_blank_lines(body).map(|text| SourceLine {
            number: line.number,
            text,
        }));
    }
    Ok(expanded)
}

fn collate(
    lines: Vec<SourceLine<'_>>,
    functions: &BTreeMap<String, String>,
) -> Result<VecDeque<Instruction>, ParseError> {
    let mut queue = VecDeque::new();
    let mut block: Vec<&str> = Vec::new();

    for line in &lines {
        if marker(line.text) == Some(RUN_FUNCTION) {
            flush_block(&mut block, &mut queue);
            let body = lookup(functions, line, RUN_FUNCTION)?;
            let body_lines: Vec<&str> = non_blank_lines(body).collect();
            if !body_lines.is_empty() {
                queue.push_back(Instruction::new(body_lines.join("\n")));
            }
            continue;
        }
        if line.text.trim().is_empty() {
            continue;
        }
        block.push(line.text.trim_end());
    }
    flush_block(&mut block, &mut queue);

    Ok(queue)
}

fn flush_block(block: &mut Vec<&str>, queue: &mut VecDeque<Instruction>) {
    if block.is_empty() {
        return;
    }
    queue.push_back(Instruction::new(block.join("\n")));
    block.clear();
}

fn lookup<'f>(
    functions: &'f BTreeMap<String, String>,
    line: &SourceLine<'_>,
    marker: &'static str,
) -> Result<&'f str, ParseError> {
    let name = function_name(line, marker)?;
    functions
        .get(&name)
        .map(String::as_str)
        .ok_or(ParseError::UnknownFunction {
            name,
            line: line.number,
        })
}

fn non_blank_lines(body: &str) -> impl Iterator<Item = &str> {
    body.split('\n')
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("# ") || trimmed.trim_end() == "#"
}

/// Return the marker keyword when the first token of `line` is one.
fn marker(line: &str) -> Option<&'static str> {
    let first = line.split_whitespace().next()?;
    [BEGIN_FUNCTION, END_FUNCTION, INJECT_FUNCTION, RUN_FUNCTION]
        .into_iter()
        .find(|candidate| *candidate == first)
}

/// The function name is the last whitespace-delimited token of the marker line.
fn function_name(line: &SourceLine<'_>, marker: &'static str) -> Result<String, ParseError> {
    let mut tokens = line.text.split_whitespace();
    let _marker = tokens.next();
    tokens
        .last()
        .map(str::to_string)
        .ok_or(ParseError::MissingFunctionName {
            marker,
            line: line.number,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(script: &Script) -> Vec<&str> {
        script.queue.iter().map(Instruction::as_str).collect()
    }

    #[test]
    fn plain_lines_collate_into_one_block() {
        let script = parse_script("Go to google.com\n\nType 'rust' in the search box\nPress enter\n")
            .expect("parse");
        assert_eq!(
            blocks(&script),
            vec!["Go to google.com\nType 'rust' in the search box\nPress enter"]
        );
    }

    #[test]
    fn run_function_becomes_standalone_block() {
        let raw = "BEGIN_FUNCTION foo\nfoo one\nfoo two\nEND_FUNCTION\nline1\nRUN_FUNCTION foo\nline2";
        let script = parse_script(raw).expect("parse");
        assert_eq!(blocks(&script), vec!["line1", "foo one\nfoo two", "line2"]);
        assert_eq!(script.functions["foo"], "foo one\nfoo two");
    }

    #[test]
    fn inject_function_merges_with_surrounding_lines() {
        let raw = "BEGIN_FUNCTION login\nType user\nType password\nEND_FUNCTION\nGo to site\nINJECT_FUNCTION login\nClick submit";
        let script = parse_script(raw).expect("parse");
        assert_eq!(
            blocks(&script),
            vec!["Go to site\nType user\nType password\nClick submit"]
        );
    }

    #[test]
    fn inject_is_not_recursive() {
        let raw = "BEGIN_FUNCTION inner\nInner step\nEND_FUNCTION\nBEGIN_FUNCTION outer\nINJECT_FUNCTION inner\nOuter step\nEND_FUNCTION\nINJECT_FUNCTION outer";
        let script = parse_script(raw).expect("parse");
        assert_eq!(
            blocks(&script),
            vec!["INJECT_FUNCTION inner\nOuter step"]
        );
    }

    #[test]
    fn injected_run_marker_still_splits_blocks() {
        let raw = "BEGIN_FUNCTION a\nA body\nEND_FUNCTION\nBEGIN_FUNCTION b\nbefore\nRUN_FUNCTION a\nEND_FUNCTION\nstart\nINJECT_FUNCTION b\nend";
        let script = parse_script(raw).expect("parse");
        assert_eq!(blocks(&script), vec!["start\nbefore", "A body", "end"]);
    }

    #[test]
    fn comments_are_dropped_everywhere() {
        let raw = "# header\nBEGIN_FUNCTION f\n# inside\nbody\nEND_FUNCTION\nstep\n#\nRUN_FUNCTION f";
        let script = parse_script(raw).expect("parse");
        assert_eq!(blocks(&script), vec!["step", "body"]);
    }

    #[test]
    fn function_name_is_last_token() {
        let raw = "BEGIN_FUNCTION the search\nSearch\nEND_FUNCTION\nRUN_FUNCTION please run search";
        let script = parse_script(raw).expect("parse");
        assert!(script.functions.contains_key("search"));
        assert_eq!(blocks(&script), vec!["Search"]);
    }

    #[test]
    fn unknown_inline_function_reports_line() {
        let err = parse_script("step\nINJECT_FUNCTION missing").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownFunction {
                name: "missing".to_string(),
                line: 2,
            }
        );
    }

    #[test]
    fn unknown_run_function_reports_line() {
        let err = parse_script("a\nb\nRUN_FUNCTION nope").unwrap_err();
        assert!(matches!(err, ParseError::UnknownFunction { line: 3, .. }));
    }

    #[test]
    fn malformed_markers_are_errors() {
        assert!(matches!(
            parse_script("BEGIN_FUNCTION f\nbody").unwrap_err(),
            ParseError::UnterminatedFunction { line: 1, .. }
        ));
        assert!(matches!(
            parse_script("step\nEND_FUNCTION").unwrap_err(),
            ParseError::UnexpectedEndFunction { line: 2 }
        ));
        assert!(matches!(
            parse_script("BEGIN_FUNCTION\nEND_FUNCTION").unwrap_err(),
            ParseError::MissingFunctionName { line: 1, .. }
        ));
        assert!(matches!(
            parse_script("BEGIN_FUNCTION a\nBEGIN_FUNCTION b\nEND_FUNCTION").unwrap_err(),
            ParseError::NestedFunction { line: 2, .. }
        ));
    }

    #[test]
    fn empty_run_body_produces_no_block() {
        let raw = "BEGIN_FUNCTION empty\n\nEND_FUNCTION\nfirst\nRUN_FUNCTION empty\nsecond";
        let script = parse_script(raw).expect("parse");
        assert_eq!(blocks(&script), vec!["first", "second"]);
    }

    #[test]
    fn parsing_expanded_output_is_idempotent() {
        let raw = "Open the page\n\nScroll down\nClick the first link\n";
        let first = parse_script(raw).expect("parse");
        let rejoined: Vec<&str> = blocks(&first);
        let second = parse_script(&rejoined.join("\n")).expect("reparse");
        assert_eq!(first.queue, second.queue);
    }

    #[test]
    fn blank_script_yields_empty_queue() {
        let script = parse_script("\n  \n# only a comment\n").expect("parse");
        assert!(script.queue.is_empty());
    }
}
