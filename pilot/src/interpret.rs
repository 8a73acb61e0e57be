//! Runs a parsed action against a [`Browser`].
//!
//! Statements execute in order. `let` results are bound by name and can be
//! referenced (or indexed, for element lists) by later statements. Arguments
//! are type-checked against the dispatch table before each call, and calls
//! that address an element run inside that element's frame.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, instrument};

use crate::core::action::{ActionSyntaxError, Call, Expr, Operation, ParamKind, Program};
use crate::io::surface::{
    Browser, ElementHandle, Locator, LocatorStrategy, NearDirection, ScrollDirection,
    with_element_frame,
};

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Text(String),
    Number(f64),
    Bool(bool),
    Element(ElementHandle),
    Elements(Vec<ElementHandle>),
}

impl Value {
    fn describe(&self) -> String {
        match self {
            Value::None => "none".to_string(),
            Value::Text(_) => "text".to_string(),
            Value::Number(_) => "number".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Element(_) => "element".to_string(),
            Value::Elements(list) => format!("list of {} elements", list.len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("none"),
            Value::Text(text) => f.write_str(text),
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Element(element) => write!(f, "{element}"),
            Value::Elements(list) => write!(f, "[{} elements]", list.len()),
        }
    }
}

pub type Bindings = BTreeMap<String, Value>;

/// The statement an action stopped at, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    /// 1-based line within the action text.
    pub line: usize,
    pub source_line: String,
    pub message: String,
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.source_line, self.message)
    }
}

impl std::error::Error for ExecutionFailure {}

impl From<ActionSyntaxError> for ExecutionFailure {
    fn from(err: ActionSyntaxError) -> Self {
        Self {
            line: err.line,
            source_line: err.source_line,
            message: format!("syntax error: {}", err.message),
        }
    }
}

/// Execute every statement of `program`.
#[instrument(skip_all, fields(statements = program.statements.len()))]
pub fn execute<B: Browser + ?Sized>(
    program: &Program,
    browser: &mut B,
) -> Result<Bindings, ExecutionFailure> {
    let mut bindings = Bindings::new();
    for statement in &program.statements {
        debug!(line = statement.line, source = %statement.source, "execute statement");
        let value = eval(&statement.expr, &bindings, browser).map_err(|message| {
            ExecutionFailure {
                line: statement.line,
                source_line: statement.source.clone(),
                message,
            }
        })?;
        if let Some(name) = &statement.binding {
            bindings.insert(name.clone(), value);
        }
    }
    Ok(bindings)
}

fn eval<B: Browser + ?Sized>(
    expr: &Expr,
    bindings: &Bindings,
    browser: &mut B,
) -> Result<Value, String> {
    match expr {
        Expr::Text(text) => Ok(Value::Text(text.clone())),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::None => Ok(Value::None),
        Expr::Var(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| format!("`{name}` is not defined")),
        Expr::Index(name, index) => match bindings.get(name) {
            Some(Value::Elements(list)) => list
                .get(*index)
                .cloned()
                .map(Value::Element)
                .ok_or_else(|| {
                    format!(
                        "index {index} out of range: `{name}` holds {} elements",
                        list.len()
                    )
                }),
            Some(other) => Err(format!("`{name}` is {}, not a list", other.describe())),
            None => Err(format!("`{name}` is not defined")),
        },
        Expr::Call(call) => dispatch(call, bindings, browser),
    }
}

/// Evaluated arguments for one call, checked against the parameter kinds.
struct Args {
    op: Operation,
    values: Vec<Value>,
}

impl Args {
    fn text(&self, slot: usize) -> Result<Option<String>, String> {
        match &self.values[slot] {
            Value::None => Ok(None),
            Value::Text(text) => Ok(Some(text.clone())),
            Value::Number(n) => Ok(Some(n.to_string())),
            other => Err(self.mismatch(slot, "text", other)),
        }
    }

    fn required_text(&self, slot: usize) -> Result<String, String> {
        self.text(slot)?
            .ok_or_else(|| self.mismatch(slot, "text", &Value::None))
    }

    fn element(&self, slot: usize) -> Result<Option<&ElementHandle>, String> {
        match &self.values[slot] {
            Value::None => Ok(None),
            Value::Element(element) => Ok(Some(element)),
            other => Err(self.mismatch(slot, "element", other)),
        }
    }

    fn required_element(&self, slot: usize) -> Result<&ElementHandle, String> {
        self.element(slot)?
            .ok_or_else(|| self.mismatch(slot, "element", &Value::None))
    }

    fn flag(&self, slot: usize) -> Result<bool, String> {
        match &self.values[slot] {
            Value::None => Ok(false),
            Value::Bool(b) => Ok(*b),
            other => Err(self.mismatch(slot, "bool", other)),
        }
    }

    fn number(&self, slot: usize) -> Result<f64, String> {
        match &self.values[slot] {
            Value::Number(n) => Ok(*n),
            Value::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| self.mismatch(slot, "number", &self.values[slot])),
            other => Err(self.mismatch(slot, "number", other)),
        }
    }

    fn mismatch(&self, slot: usize, expected: &str, got: &Value) -> String {
        let name = self.op.params()[slot].name;
        format!(
            "{}: argument `{name}` expects {expected}, got {}",
            self.op,
            got.describe()
        )
    }
}

fn evaluate_args<B: Browser + ?Sized>(
    call: &Call,
    bindings: &Bindings,
    browser: &mut B,
) -> Result<Args, String> {
    let params = call.op.params();
    let mut values = Vec::with_capacity(params.len());
    for (slot, param) in params.iter().enumerate() {
        let value = match call.args.get(slot).and_then(Option::as_ref) {
            Some(expr) => eval(expr, bindings, browser)?,
            None if param.required => {
                return Err(format!("{}: missing argument `{}`", call.op, param.name));
            }
            None => Value::None,
        };
        let accepted = match (param.kind, &value) {
            (_, Value::None) => !param.required || param.kind == ParamKind::MaybeElement,
            (ParamKind::Text, Value::Text(_) | Value::Number(_)) => true,
            (ParamKind::Number, Value::Number(_) | Value::Text(_)) => true,
            (ParamKind::Bool, Value::Bool(_)) => true,
            (ParamKind::Element | ParamKind::MaybeElement, Value::Element(_)) => true,
            _ => false,
        };
        if !accepted {
            let hint = match &value {
                Value::Elements(_) => " (use find_element or index the list, e.g. `links[0]`)",
                _ => "",
            };
            return Err(format!(
                "{}: argument `{}` got {}{hint}",
                call.op,
                param.name,
                value.describe()
            ));
        }
        values.push(value);
    }
    Ok(Args {
        op: call.op,
        values,
    })
}

fn dispatch<B: Browser + ?Sized>(
    call: &Call,
    bindings: &Bindings,
    browser: &mut B,
) -> Result<Value, String> {
    let args = evaluate_args(call, bindings, browser)?;
    let op = call.op;
    let failed = |err: anyhow::Error| format!("{op} failed: {err:#}");

    match op {
        Operation::Navigate => {
            let url = args.required_text(0)?;
            browser.navigate(&url).map_err(failed)?;
            Ok(Value::None)
        }
        Operation::FindElements | Operation::FindElement => {
            let locator = Locator {
                by: LocatorStrategy::parse(&args.required_text(0)?).map_err(failed)?,
                value: args.required_text(1)?,
            };
            let found = match args.element(2)? {
                Some(within) => with_element_frame(browser, within, |b| {
                    b.find_elements(&locator, Some(within))
                }),
                None => browser.find_elements(&locator, None),
            }
            .map_err(failed)?;
            if op == Operation::FindElements {
                return Ok(Value::Elements(found));
            }
            found
                .into_iter()
                .next()
                .map(Value::Element)
                .ok_or_else(|| {
                    format!(
                        "{op}: no elements found for {} `{}`",
                        locator.by, locator.value
                    )
                })
        }
        Operation::FindNearest => {
            let anchor = args.required_element(0)?;
            let xpath = args.required_text(1)?;
            let direction = match args.text(2)? {
                Some(direction) => NearDirection::parse(&direction).map_err(failed)?,
                None => NearDirection::Above,
            };
            with_element_frame(browser, anchor, |b| b.find_nearest(anchor, &xpath, direction))
                .map(Value::Element)
                .map_err(failed)
        }
        Operation::SendKeys => {
            let text = args.required_text(1)?;
            match args.element(0)? {
                Some(element) => {
                    with_element_frame(browser, element, |b| b.send_keys(Some(element), &text))
                }
                None => browser.send_keys(None, &text),
            }
            .map_err(failed)?;
            Ok(Value::None)
        }
        Operation::Click => {
            let element = args.required_element(0)?;
            with_element_frame(browser, element, |b| b.click(element)).map_err(failed)?;
            Ok(Value::None)
        }
        Operation::Wait => {
            let seconds = args.number(0)?;
            let duration = Duration::try_from_secs_f64(seconds)
                .map_err(|err| format!("{op}: invalid duration {seconds}: {err}"))?;
            browser.wait(duration).map_err(failed)?;
            Ok(Value::None)
        }
        Operation::Scroll => {
            let direction = ScrollDirection::parse(&args.required_text(0)?).map_err(failed)?;
            match args.element(1)? {
                Some(frame) => with_element_frame(browser, frame, |b| b.scroll(direction, Some(frame))),
                None => browser.scroll(direction, None),
            }
            .map_err(failed)?;
            Ok(Value::None)
        }
        Operation::QueryLlm => browser
            .query_llm(&args.required_text(0)?)
            .map(Value::Text)
            .map_err(failed),
        Operation::QueryMemory => browser
            .query_memory(&args.required_text(0)?)
            .map(Value::Text)
            .map_err(failed),
        Operation::RetrieveInformation => browser
            .retrieve_information(&args.required_text(0)?, args.flag(1)?)
            .map(Value::Text)
            .map_err(failed),
        Operation::FindElementByDescription => {
            let found = browser
                .find_element_by_description(&args.required_text(0)?)
                .map_err(failed)?;
            Ok(found.map_or(Value::None, Value::Element))
        }
        Operation::Screenshot => {
            let element = args.required_element(0)?;
            let filename = args.required_text(1)?;
            with_element_frame(browser, element, |b| b.screenshot(element, &filename))
                .map_err(failed)?;
            Ok(Value::None)
        }
        Operation::Save => {
            let text = args.required_text(0)?;
            let filename = args.required_text(1)?;
            if filename.trim().is_empty() {
                return Err(failed(anyhow!("filename is empty")));
            }
            browser.save(&text, &filename).map_err(failed)?;
            Ok(Value::None)
        }
        Operation::Text => {
            let element = args.required_element(0)?;
            with_element_frame(browser, element, |b| b.element_text(element))
                .map(Value::Text)
                .map_err(failed)
        }
        Operation::PageText => browser.page_text(args.flag(0)?).map(Value::Text).map_err(failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::parse_action;
    use crate::test_support::FakeBrowser;

    fn run(action: &str, browser: &mut FakeBrowser) -> Result<Bindings, ExecutionFailure> {
        let program = parse_action(action).expect("parse");
        execute(&program, browser)
    }

    #[test]
    fn bindings_flow_between_statements() {
        let mut browser = FakeBrowser::new();
        let bindings = run(
            "navigate(\"example.com\")\nlet links = find_elements(\"xpath\", \"//a\")\nclick(links[0])",
            &mut browser,
        )
        .expect("execute");
        assert!(matches!(bindings.get("links"), Some(Value::Elements(list)) if list.len() == 1));
        assert_eq!(
            browser.calls(),
            ["navigate(example.com)", "find_elements(xpath, //a)", "click(e1)"]
        );
    }

    #[test]
    fn failure_names_the_statement() {
        let mut browser = FakeBrowser::new();
        browser.fail_next("click", "element not interactable");
        let failure = run("wait(1)\nclick(find_element(\"css\", \"#go\"))", &mut browser)
            .unwrap_err();
        assert_eq!(failure.line, 2);
        assert_eq!(failure.source_line, "click(find_element(\"css\", \"#go\"))");
        assert!(failure.message.contains("element not interactable"));
    }

    #[test]
    fn find_element_with_no_match_fails() {
        let mut browser = FakeBrowser::new();
        browser.set_matches(0);
        let failure = run("find_element(\"id\", \"missing\")", &mut browser).unwrap_err();
        assert!(failure.message.contains("no elements found"));
    }

    #[test]
    fn list_where_element_expected_is_a_type_error() {
        let mut browser = FakeBrowser::new();
        let failure = run(
            "let links = find_elements(\"tag\", \"a\")\nclick(links)",
            &mut browser,
        )
        .unwrap_err();
        assert_eq!(failure.line, 2);
        assert!(failure.message.contains("index the list"));
        assert!(!browser.calls().iter().any(|call| call.starts_with("click")));
    }

    #[test]
    fn undefined_variable_and_bad_index_fail() {
        let mut browser = FakeBrowser::new();
        let failure = run("click(button)", &mut browser).unwrap_err();
        assert!(failure.message.contains("`button` is not defined"));

        let failure = run(
            "let links = find_elements(\"tag\", \"a\")\nclick(links[3])",
            &mut browser,
        )
        .unwrap_err();
        assert!(failure.message.contains("out of range"));
    }

    #[test]
    fn invalid_strategy_and_direction_are_rejected() {
        let mut browser = FakeBrowser::new();
        let failure = run("find_element(\"label\", \"x\")", &mut browser).unwrap_err();
        assert!(failure.message.contains("invalid LocatorStrategy"));
        let failure = run("scroll(\"sideways\")", &mut browser).unwrap_err();
        assert!(failure.message.contains("invalid ScrollDirection"));
    }

    #[test]
    fn element_calls_run_inside_their_frame() {
        let mut browser = FakeBrowser::new();
        browser.set_frame("f1");
        browser.fail_next("click", "stale element");
        let failure = run(
            "let box = find_element(\"name\", \"q\")\nclick(box)",
            &mut browser,
        )
        .unwrap_err();
        assert!(failure.message.contains("stale element"));
        assert_eq!(
            browser.calls(),
            [
                "find_elements(name, q)",
                "enter_frame(f1)",
                "click(e1)",
                "exit_frame",
            ]
        );
        assert!(browser.current_frame().is_none());
    }

    #[test]
    fn send_keys_without_element_types_into_focus() {
        let mut browser = FakeBrowser::new();
        run("send_keys(none, \"hello\\n\")", &mut browser).expect("execute");
        assert_eq!(browser.calls(), ["send_keys(none, hello\n)"]);
    }

    #[test]
    fn missing_description_match_binds_none() {
        let mut browser = FakeBrowser::new();
        browser.set_matches(0);
        let bindings = run(
            "let pick = find_element_by_description(\"the login button\")",
            &mut browser,
        )
        .expect("execute");
        assert_eq!(bindings.get("pick"), Some(&Value::None));
    }

    #[test]
    fn retrieved_text_feeds_save() {
        let mut browser = FakeBrowser::new();
        browser.set_text("Buffalo are large bovines.");
        run(
            "save(retrieve_information(\"Summarize\", entire_page=true), \"out.txt\")",
            &mut browser,
        )
        .expect("execute");
        assert_eq!(
            browser.calls(),
            [
                "retrieve_information(Summarize, true)",
                "save(Buffalo are large bovines., out.txt)",
            ]
        );
    }
}
