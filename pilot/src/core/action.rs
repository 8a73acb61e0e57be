//! The action language: a small statement grammar over a fixed dispatch table.
//!
//! A synthesized action is one statement per line:
//!
//! ```text
//! let box = find_element("xpath", "//input[@name='q']")
//! send_keys(box, "rust lang\n")
//! save(retrieve_information("Summarize:"), "summary.txt")
//! ```
//!
//! Only operations in [`Operation`] can be called, so parsing doubles as the
//! allow-list check. Nothing here touches a browser; see `crate::interpret`.

use std::fmt;

use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use thiserror::Error;

/// Rejected action text. `line` is 1-based within the action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ActionSyntaxError {
    pub line: usize,
    pub source_line: String,
    pub message: String,
}

/// Runtime type expected for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    Number,
    Bool,
    Element,
    /// An element handle or `none`.
    MaybeElement,
}

/// One formal parameter of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: ParamKind) -> Param {
    Param {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: ParamKind) -> Param {
    Param {
        name,
        kind,
        required: false,
    }
}

/// The capability surface callable from an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Navigate,
    FindElements,
    FindElement,
    FindNearest,
    SendKeys,
    Click,
    Wait,
    Scroll,
    QueryLlm,
    QueryMemory,
    RetrieveInformation,
    FindElementByDescription,
    Screenshot,
    Save,
    Text,
    PageText,
}

impl Operation {
    pub const ALL: [Operation; 16] = [
        Operation::Navigate,
        Operation::FindElements,
        Operation::FindElement,
        Operation::FindNearest,
        Operation::SendKeys,
        Operation::Click,
        Operation::Wait,
        Operation::Scroll,
        Operation::QueryLlm,
        Operation::QueryMemory,
        Operation::RetrieveInformation,
        Operation::FindElementByDescription,
        Operation::Screenshot,
        Operation::Save,
        Operation::Text,
        Operation::PageText,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Navigate => "navigate",
            Operation::FindElements => "find_elements",
            Operation::FindElement => "find_element",
            Operation::FindNearest => "find_nearest",
            Operation::SendKeys => "send_keys",
            Operation::Click => "click",
            Operation::Wait => "wait",
            Operation::Scroll => "scroll",
            Operation::QueryLlm => "query_llm",
            Operation::QueryMemory => "query_memory",
            Operation::RetrieveInformation => "retrieve_information",
            Operation::FindElementByDescription => "find_element_by_description",
            Operation::Screenshot => "screenshot",
            Operation::Save => "save",
            Operation::Text => "text",
            Operation::PageText => "page_text",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// Formal parameters in positional order.
    pub fn params(self) -> &'static [Param] {
        match self {
            Operation::Navigate => NAVIGATE_PARAMS,
            Operation::FindElements | Operation::FindElement => FIND_PARAMS,
            Operation::FindNearest => FIND_NEAREST_PARAMS,
            Operation::SendKeys => SEND_KEYS_PARAMS,
            Operation::Click | Operation::Text => ELEMENT_PARAMS,
            Operation::Wait => WAIT_PARAMS,
            Operation::Scroll => SCROLL_PARAMS,
            Operation::QueryLlm | Operation::QueryMemory => QUERY_PARAMS,
            Operation::RetrieveInformation => RETRIEVE_PARAMS,
            Operation::FindElementByDescription => DESCRIPTION_PARAMS,
            Operation::Screenshot => SCREENSHOT_PARAMS,
            Operation::Save => SAVE_PARAMS,
            Operation::PageText => PAGE_TEXT_PARAMS,
        }
    }
}

const NAVIGATE_PARAMS: &[Param] = &[required("url", ParamKind::Text)];
const FIND_PARAMS: &[Param] = &[
    required("by", ParamKind::Text),
    required("value", ParamKind::Text),
    optional("within", ParamKind::MaybeElement),
];
const FIND_NEAREST_PARAMS: &[Param] = &[
    required("anchor", ParamKind::Element),
    required("xpath", ParamKind::Text),
    optional("direction", ParamKind::Text),
];
const SEND_KEYS_PARAMS: &[Param] = &[
    required("element", ParamKind::MaybeElement),
    required("text", ParamKind::Text),
];
const ELEMENT_PARAMS: &[Param] = &[required("element", ParamKind::Element)];
const WAIT_PARAMS: &[Param] = &[required("seconds", ParamKind::Number)];
const SCROLL_PARAMS: &[Param] = &[
    required("direction", ParamKind::Text),
    optional("frame", ParamKind::MaybeElement),
];
const QUERY_PARAMS: &[Param] = &[required("text", ParamKind::Text)];
const RETRIEVE_PARAMS: &[Param] = &[
    required("prompt", ParamKind::Text),
    optional("entire_page", ParamKind::Bool),
];
const DESCRIPTION_PARAMS: &[Param] = &[required("description", ParamKind::Text)];
const SCREENSHOT_PARAMS: &[Param] = &[
    required("element", ParamKind::Element),
    required("filename", ParamKind::Text),
];
const SAVE_PARAMS: &[Param] = &[
    required("text", ParamKind::Text),
    required("filename", ParamKind::Text),
];
const PAGE_TEXT_PARAMS: &[Param] = &[optional("entire_page", ParamKind::Bool)];

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An expression appearing in a statement or argument position.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Call(Call),
    Text(String),
    Number(f64),
    Bool(bool),
    None,
    Var(String),
    Index(String, usize),
}

/// A call with arguments bound to the operation's parameter slots.
///
/// `args[i]` is `None` when optional parameter `i` was omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: Operation,
    pub args: Vec<Option<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// 1-based line within the action text.
    pub line: usize,
    pub source: String,
    pub binding: Option<String>,
    pub expr: Expr,
}

/// A parsed action, ready for interpretation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    /// Every operation the program calls, including nested calls, in source order.
    pub fn operations(&self) -> Vec<Operation> {
        fn walk(expr: &Expr, out: &mut Vec<Operation>) {
            if let Expr::Call(call) = expr {
                out.push(call.op);
                for arg in call.args.iter().flatten() {
                    walk(arg, out);
                }
            }
        }
        let mut out = Vec::new();
        for statement in &self.statements {
            walk(&statement.expr, &mut out);
        }
        out
    }
}

/// Remove markdown code-fence lines a model may wrap its answer in.
pub fn strip_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[derive(pest_derive::Parser)]
#[grammar = "core/action.pest"]
struct ActionParser;

/// Parse action text into a [`Program`].
pub fn parse_action(text: &str) -> Result<Program, ActionSyntaxError> {
    let mut statements = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with("```") {
            continue;
        }
        let fail = |message: String| ActionSyntaxError {
            line,
            source_line: trimmed.to_string(),
            message,
        };
        let (binding, expr) = parse_statement(trimmed).map_err(fail)?;
        statements.push(Statement {
            line,
            source: trimmed.to_string(),
            binding,
            expr,
        });
    }
    Ok(Program { statements })
}

fn parse_statement(line: &str) -> Result<(Option<String>, Expr), String> {
    let statement = ActionParser::parse(Rule::statement, line)
        .map_err(describe_error)?
        .next()
        .ok_or_else(|| "expected a statement".to_string())?;

    let mut binding = None;
    let mut expr = None;
    for pair in statement.into_inner() {
        match pair.as_rule() {
            Rule::binding => binding = Some(build_binding(pair)?),
            Rule::expr => expr = Some(build_expr(pair)?),
            _ => {}
        }
    }
    let expr = expr.ok_or_else(|| "expected an expression".to_string())?;
    Ok((binding, expr))
}

fn describe_error(err: pest::error::Error<Rule>) -> String {
    let column = match err.line_col {
        LineColLocation::Pos((_, col)) | LineColLocation::Span((_, col), _) => col,
    };
    let err = err.renamed_rules(|rule| match rule {
        Rule::EOI => "end of line".to_string(),
        Rule::expr | Rule::arg => "an expression".to_string(),
        Rule::call | Rule::callee => "a call".to_string(),
        Rule::ident | Rule::var => "a name".to_string(),
        Rule::integer => "a non-negative integer".to_string(),
        Rule::string | Rule::dq_inner | Rule::sq_inner => "a string".to_string(),
        other => format!("{other:?}"),
    });
    format!("column {column}: {}", err.variant.message())
}

fn build_binding(pair: Pair<'_, Rule>) -> Result<String, String> {
    let name = pair
        .into_inner()
        .find(|inner| inner.as_rule() == Rule::ident)
        .map(|inner| inner.as_str().to_string())
        .ok_or_else(|| "expected a name before `=`".to_string())?;
    if Operation::from_name(&name).is_some() || is_literal_keyword(&name) {
        return Err(format!("`{name}` cannot be used as a variable name"));
    }
    Ok(name)
}

fn build_expr(pair: Pair<'_, Rule>) -> Result<Expr, String> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| "expected an expression".to_string())?;
    match inner.as_rule() {
        Rule::call => build_call(inner).map(Expr::Call),
        Rule::string => Ok(Expr::Text(unescape(inner))),
        Rule::number => inner
            .as_str()
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| format!("invalid number `{}`", inner.as_str())),
        Rule::boolean => Ok(Expr::Bool(inner.as_str().eq_ignore_ascii_case("true"))),
        Rule::none => Ok(Expr::None),
        Rule::index => {
            let mut parts = inner.into_inner();
            let name = parts.next().map(|p| p.as_str().to_string()).unwrap_or_default();
            let index = parts
                .next()
                .and_then(|p| p.as_str().parse::<usize>().ok())
                .ok_or_else(|| format!("index into `{name}` must be a non-negative integer"))?;
            Ok(Expr::Index(name, index))
        }
        Rule::var => Ok(Expr::Var(inner.as_str().to_string())),
        other => Err(format!("unexpected {other:?}")),
    }
}

fn build_call(pair: Pair<'_, Rule>) -> Result<Call, String> {
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .map(|callee| callee.as_str())
        .ok_or_else(|| "expected a call".to_string())?;
    let bare = name.strip_prefix("env.").unwrap_or(name);
    let op = Operation::from_name(bare).ok_or_else(|| format!("unknown operation `{name}`"))?;
    let params = op.params();
    let mut args: Vec<Option<Expr>> = vec![None; params.len()];
    let mut positional = 0usize;
    let mut seen_keyword = false;

    for arg in inner {
        let Some(arg) = arg.into_inner().next() else {
            continue;
        };
        if arg.as_rule() == Rule::kwarg {
            let mut parts = arg.into_inner();
            let key = parts.next().map(|p| p.as_str()).unwrap_or_default();
            let slot = params
                .iter()
                .position(|param| param.name == key)
                .ok_or_else(|| format!("`{op}` has no parameter `{key}`"))?;
            if args[slot].is_some() {
                return Err(format!("`{op}` parameter `{key}` given twice"));
            }
            let value = parts
                .next()
                .ok_or_else(|| format!("`{op}` parameter `{key}` has no value"))?;
            args[slot] = Some(build_expr(value)?);
            seen_keyword = true;
        } else {
            if seen_keyword {
                return Err(format!("`{op}`: positional argument after keyword argument"));
            }
            if positional >= params.len() {
                return Err(format!(
                    "`{op}` takes at most {} argument(s)",
                    params.len()
                ));
            }
            args[positional] = Some(build_expr(arg)?);
            positional += 1;
        }
    }

    for (param, arg) in params.iter().zip(&args) {
        if param.required && arg.is_none() {
            return Err(format!("`{op}` is missing argument `{}`", param.name));
        }
    }
    Ok(Call { op, args })
}

/// String contents with `\n` and `\t` expanded; any other escaped char is literal.
fn unescape(string: Pair<'_, Rule>) -> String {
    let raw = string
        .into_inner()
        .next()
        .map(|body| body.as_str())
        .unwrap_or_default();
    let mut value = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => value.push('\n'),
            Some('t') => value.push('\t'),
            Some(other) => value.push(other),
            None => {}
        }
    }
    value
}

fn is_literal_keyword(name: &str) -> bool {
    matches!(
        name,
        "true" | "True" | "false" | "False" | "none" | "None" | "null" | "let"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bindings_and_nested_calls() {
        let program = parse_action(
            "let box = find_element(\"xpath\", \"//input\")\nsend_keys(box, 'rust\\n')\nsave(retrieve_information(\"Summarize:\"), \"out.txt\")",
        )
        .expect("parse");
        assert_eq!(program.statements.len(), 3);
        assert_eq!(program.statements[0].binding.as_deref(), Some("box"));
        assert_eq!(
            program.operations(),
            vec![
                Operation::FindElement,
                Operation::SendKeys,
                Operation::Save,
                Operation::RetrieveInformation
            ]
        );
        let Expr::Call(send) = &program.statements[1].expr else {
            panic!("expected call");
        };
        assert_eq!(send.args[1], Some(Expr::Text("rust\n".to_string())));
    }

    #[test]
    fn keyword_arguments_bind_to_slots() {
        let program =
            parse_action("results = find_elements(value=\"//a\", by=\"xpath\")").expect("parse");
        let Expr::Call(call) = &program.statements[0].expr else {
            panic!("expected call");
        };
        assert_eq!(call.args[0], Some(Expr::Text("xpath".to_string())));
        assert_eq!(call.args[1], Some(Expr::Text("//a".to_string())));
        assert_eq!(call.args[2], None);
    }

    #[test]
    fn env_prefix_and_trailing_semicolon_are_accepted() {
        let program = parse_action("env.wait(2);\nclick(links[0])").expect("parse");
        let Expr::Call(call) = &program.statements[1].expr else {
            panic!("expected call");
        };
        assert_eq!(call.args[0], Some(Expr::Index("links".to_string(), 0)));
    }

    #[test]
    fn unknown_operation_names_the_line() {
        let err = parse_action("navigate(\"a.com\")\nexec(\"rm -rf /\")").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unknown operation `exec`"));
        assert_eq!(err.source_line, "exec(\"rm -rf /\")");
    }

    #[test]
    fn arity_is_checked() {
        assert!(parse_action("click()").unwrap_err().message.contains("missing argument"));
        assert!(
            parse_action("wait(1, 2)")
                .unwrap_err()
                .message
                .contains("at most 1")
        );
        assert!(
            parse_action("scroll(\"down\", speed=3)")
                .unwrap_err()
                .message
                .contains("no parameter `speed`")
        );
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(parse_action("navigate(\"a.com\"").is_err());
        assert!(parse_action("navigate('a.com) ").is_err());
        assert!(parse_action("let click = wait(1)").is_err());
        assert!(parse_action("wait(1) wait(2)").is_err());
    }

    #[test]
    fn grammar_errors_carry_line_and_column() {
        let err = parse_action("wait(1)\nnavigate(\"a.com\"").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.source_line, "navigate(\"a.com\"");
        assert!(err.message.starts_with("column "), "{}", err.message);
    }

    #[test]
    fn literals_parse() {
        let program = parse_action(
            "wait(-1.5)\nretrieve_information(\"x\", entire_page=True)\nsend_keys(None, 'it\\'s')",
        )
        .expect("parse");
        let args: Vec<_> = program
            .statements
            .iter()
            .map(|statement| match &statement.expr {
                Expr::Call(call) => call.args.clone(),
                other => panic!("expected call, got {other:?}"),
            })
            .collect();
        assert_eq!(args[0], vec![Some(Expr::Number(-1.5))]);
        assert_eq!(args[1][1], Some(Expr::Bool(true)));
        assert_eq!(args[2][0], Some(Expr::None));
        assert_eq!(args[2][1], Some(Expr::Text("it's".to_string())));
    }

    #[test]
    fn fences_and_comments_are_skipped() {
        let program = parse_action("```\n// go home\nnavigate(\"example.com\")\n```").expect("parse");
        assert_eq!(program.statements.len(), 1);
        assert_eq!(program.statements[0].line, 3);
        assert_eq!(strip_fences("```text\nwait(1)\n```"), "wait(1)");
    }
}
