//! Test doubles for the model and the browser surface.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::io::model::{CompletionRequest, LanguageModel, ModelError};
use crate::io::surface::{
    Browser, ElementHandle, FrameId, Locator, NearDirection, ScrollDirection,
};

/// Model that replays queued completions in order.
///
/// An exhausted queue answers with a fatal error so a test never hangs on an
/// unexpected extra request.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: RefCell<VecDeque<Result<String, ModelError>>>,
    prompts: RefCell<Vec<String>>,
    calls: Cell<usize>,
}

impl ScriptedModel {
    pub fn new<I, S>(completions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::default();
        for completion in completions {
            model.push(completion);
        }
        model
    }

    pub fn push(&self, completion: impl Into<String>) {
        self.responses
            .borrow_mut()
            .push_back(Ok(completion.into()));
    }

    pub fn push_transient(&self, message: &str) {
        self.responses
            .borrow_mut()
            .push_back(Err(ModelError::Transient(message.to_string())));
    }

    pub fn push_fatal(&self, message: &str) {
        self.responses
            .borrow_mut()
            .push_back(Err(ModelError::Fatal(message.to_string())));
    }

    /// Requests received, including ones answered with an error.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        self.calls.set(self.calls.get() + 1);
        self.prompts.borrow_mut().push(request.prompt.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Fatal("no scripted completion left".to_string())))
    }
}

/// Browser that records calls as short strings and fails on demand.
#[derive(Debug)]
pub struct FakeBrowser {
    calls: Vec<String>,
    failures: BTreeMap<String, VecDeque<String>>,
    matches: usize,
    next_element: u64,
    element_frame: Option<FrameId>,
    current_frame: Option<FrameId>,
    text: String,
}

impl Default for FakeBrowser {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            failures: BTreeMap::new(),
            matches: 1,
            next_element: 0,
            element_frame: None,
            current_frame: None,
            text: String::new(),
        }
    }
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call to `op` with `message`. Queued failures stack.
    pub fn fail_next(&mut self, op: &str, message: &str) {
        self.failures
            .entry(op.to_string())
            .or_default()
            .push_back(message.to_string());
    }

    /// Number of elements each lookup returns.
    pub fn set_matches(&mut self, matches: usize) {
        self.matches = matches;
    }

    /// Place elements found from now on inside `frame`.
    pub fn set_frame(&mut self, frame: &str) {
        self.element_frame = Some(FrameId(frame.to_string()));
    }

    /// Text returned by every text-producing call.
    pub fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
    }

    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    pub fn current_frame(&self) -> Option<&FrameId> {
        self.current_frame.as_ref()
    }

    fn record(&mut self, op: &str, call: String) -> Result<()> {
        self.calls.push(call);
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }

    fn element(&mut self) -> ElementHandle {
        self.next_element += 1;
        ElementHandle {
            id: format!("e{}", self.next_element),
            frame: self.element_frame.clone(),
        }
    }
}

fn element_id(element: Option<&ElementHandle>) -> &str {
    element.map_or("none", |e| e.id.as_str())
}

impl Browser for FakeBrowser {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.record("navigate", format!("navigate({url})"))
    }

    fn find_elements(
        &mut self,
        locator: &Locator,
        within: Option<&ElementHandle>,
    ) -> Result<Vec<ElementHandle>> {
        let call = match within {
            Some(within) => format!(
                "find_elements({}, {}, within={})",
                locator.by, locator.value, within.id
            ),
            None => format!("find_elements({}, {})", locator.by, locator.value),
        };
        self.record("find_elements", call)?;
        Ok((0..self.matches).map(|_| self.element()).collect())
    }

    fn find_nearest(
        &mut self,
        anchor: &ElementHandle,
        xpath: &str,
        direction: NearDirection,
    ) -> Result<ElementHandle> {
        self.record(
            "find_nearest",
            format!("find_nearest({}, {xpath}, {direction})", anchor.id),
        )?;
        Ok(self.element())
    }

    fn send_keys(&mut self, element: Option<&ElementHandle>, text: &str) -> Result<()> {
        self.record(
            "send_keys",
            format!("send_keys({}, {text})", element_id(element)),
        )
    }

    fn click(&mut self, element: &ElementHandle) -> Result<()> {
        self.record("click", format!("click({})", element.id))
    }

    fn wait(&mut self, duration: Duration) -> Result<()> {
        self.record("wait", format!("wait({})", duration.as_secs_f64()))
    }

    fn scroll(&mut self, direction: ScrollDirection, frame: Option<&ElementHandle>) -> Result<()> {
        self.record(
            "scroll",
            format!("scroll({direction}, {})", element_id(frame)),
        )
    }

    fn query_llm(&mut self, text: &str) -> Result<String> {
        self.record("query_llm", format!("query_llm({text})"))?;
        Ok(self.text.clone())
    }

    fn query_memory(&mut self, text: &str) -> Result<String> {
        self.record("query_memory", format!("query_memory({text})"))?;
        Ok(self.text.clone())
    }

    fn retrieve_information(&mut self, prompt: &str, entire_page: bool) -> Result<String> {
        self.record(
            "retrieve_information",
            format!("retrieve_information({prompt}, {entire_page})"),
        )?;
        Ok(self.text.clone())
    }

    fn find_element_by_description(
        &mut self,
        description: &str,
    ) -> Result<Option<ElementHandle>> {
        self.record(
            "find_element_by_description",
            format!("find_element_by_description({description})"),
        )?;
        Ok((self.matches > 0).then(|| self.element()))
    }

    fn screenshot(&mut self, element: &ElementHandle, filename: &str) -> Result<()> {
        self.record(
            "screenshot",
            format!("screenshot({}, {filename})", element.id),
        )
    }

    fn save(&mut self, text: &str, filename: &str) -> Result<()> {
        self.record("save", format!("save({text}, {filename})"))
    }

    fn element_text(&mut self, element: &ElementHandle) -> Result<String> {
        self.record("text", format!("text({})", element.id))?;
        Ok(self.text.clone())
    }

    fn page_text(&mut self, entire_page: bool) -> Result<String> {
        self.record("page_text", format!("page_text({entire_page})"))?;
        Ok(self.text.clone())
    }

    fn enter_frame(&mut self, frame: &FrameId) -> Result<()> {
        self.current_frame = Some(frame.clone());
        self.record("enter_frame", format!("enter_frame({})", frame.0))
    }

    fn exit_frame(&mut self) -> Result<()> {
        self.current_frame = None;
        self.record("exit_frame", "exit_frame".to_string())
    }
}
