//! Capability surface consumed by interpreted actions.
//!
//! [`Browser`] mirrors the dispatch table in `core::action` one-to-one: every
//! operation a prompt promises has a method here with the same arity. Live
//! drivers implement the trait; [`TranscriptBrowser`] is a recording surface
//! used for dry runs.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

/// Opaque identifier of a frame (iframe) an element lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FrameId(pub String);

/// Handle to an element on the live page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ElementHandle {
    pub id: String,
    /// Frame that must be active to address the element; `None` for the top document.
    pub frame: Option<FrameId>,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frame: None,
        }
    }

    pub fn in_frame(id: impl Into<String>, frame: FrameId) -> Self {
        Self {
            id: id.into(),
            frame: Some(frame),
        }
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.frame {
            Some(frame) => write!(f, "<element {} in frame {}>", self.id, frame.0),
            None => write!(f, "<element {}>", self.id),
        }
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Result<Self> {
                let lowered = value.trim().to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|candidate| candidate.as_str() == lowered)
                    .ok_or_else(|| {
                        let allowed: Vec<&str> = Self::ALL.iter().map(|v| v.as_str()).collect();
                        anyhow!(
                            "invalid {} `{}` (expected one of: {})",
                            stringify!($name),
                            value,
                            allowed.join(", ")
                        )
                    })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Locator strategy for element lookup.
    LocatorStrategy {
        Xpath => "xpath",
        Css => "css",
        Id => "id",
        Name => "name",
        Tag => "tag",
        Class => "class",
        LinkText => "link_text",
    }
);

string_enum!(
    /// Relative position for `find_nearest`.
    NearDirection {
        Near => "near",
        Above => "above",
        Below => "below",
        Left => "left",
        Right => "right",
    }
);

string_enum!(
    /// Scroll target for `scroll`.
    ScrollDirection {
        Up => "up",
        Down => "down",
        Top => "top",
        Bottom => "bottom",
        Left => "left",
        Right => "right",
    }
);

/// A locator strategy paired with its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locator {
    pub by: LocatorStrategy,
    pub value: String,
}

/// Browser-automation capabilities exposed to actions.
pub trait Browser {
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Find visible elements. `within` scopes the search to one element's children.
    fn find_elements(
        &mut self,
        locator: &Locator,
        within: Option<&ElementHandle>,
    ) -> Result<Vec<ElementHandle>>;

    fn find_nearest(
        &mut self,
        anchor: &ElementHandle,
        xpath: &str,
        direction: NearDirection,
    ) -> Result<ElementHandle>;

    /// Type into `element`, or into the focused element when `None`.
    fn send_keys(&mut self, element: Option<&ElementHandle>, text: &str) -> Result<()>;

    fn click(&mut self, element: &ElementHandle) -> Result<()>;

    fn wait(&mut self, duration: Duration) -> Result<()>;

    /// Scroll the page, or the given frame element.
    fn scroll(&mut self, direction: ScrollDirection, frame: Option<&ElementHandle>) -> Result<()>;

    fn query_llm(&mut self, text: &str) -> Result<String>;

    fn query_memory(&mut self, text: &str) -> Result<String>;

    fn retrieve_information(&mut self, prompt: &str, entire_page: bool) -> Result<String>;

    fn find_element_by_description(&mut self, description: &str)
    -> Result<Option<ElementHandle>>;

    fn screenshot(&mut self, element: &ElementHandle, filename: &str) -> Result<()>;

    fn save(&mut self, text: &str, filename: &str) -> Result<()>;

    fn element_text(&mut self, element: &ElementHandle) -> Result<String>;

    fn page_text(&mut self, entire_page: bool) -> Result<String>;

    /// Make `frame` the addressing context for subsequent calls.
    fn enter_frame(&mut self, frame: &FrameId) -> Result<()>;

    /// Return to the top-level document.
    fn exit_frame(&mut self) -> Result<()>;
}

/// Run `f` with the element's frame as the addressing context.
///
/// The default context is restored on every exit path. When both `f` and the
/// restore fail, the error from `f` wins.
pub fn with_element_frame<B, T, F>(browser: &mut B, element: &ElementHandle, f: F) -> Result<T>
where
    B: Browser + ?Sized,
    F: FnOnce(&mut B) -> Result<T>,
{
    let Some(frame) = &element.frame else {
        return f(browser);
    };
    browser
        .enter_frame(frame)
        .with_context(|| format!("switch to frame {}", frame.0))?;
    let result = f(browser);
    let restored = browser.exit_frame().context("restore default frame");
    match (result, restored) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(err), _) => Err(err),
        (Ok(_), Err(err)) => Err(err),
    }
}

/// Recording surface: performs no real browsing.
///
/// Each call is logged and, when a transcript path is set, appended as one
/// JSON line. Lookups return synthetic handles so actions run end to end.
/// `save` writes nothing to disk; the text lands in the transcript line.
pub struct TranscriptBrowser {
    writer: Option<BufWriter<File>>,
    transcript_path: Option<PathBuf>,
    next_element: u64,
    current_frame: Option<FrameId>,
    current_url: Option<String>,
}

impl TranscriptBrowser {
    pub fn new() -> Self {
        Self {
            writer: None,
            transcript_path: None,
            next_element: 0,
            current_frame: None,
            current_url: None,
        }
    }

    /// Append every call to `path` as JSON lines.
    pub fn with_transcript(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create transcript dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open transcript {}", path.display()))?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            transcript_path: Some(path.to_path_buf()),
            ..Self::new()
        })
    }

    fn record(&mut self, op: &str, args: serde_json::Value) -> Result<()> {
        info!(op, args = %args, frame = ?self.current_frame.as_ref().map(|f| f.0.as_str()), "browser call");
        if let Some(writer) = self.writer.as_mut() {
            let line = json!({
                "op": op,
                "args": args,
                "frame": self.current_frame.as_ref().map(|f| f.0.clone()),
                "url": self.current_url,
            });
            serde_json::to_writer(&mut *writer, &line).context("encode transcript line")?;
            writer.write_all(b"\n").context("write transcript")?;
            writer.flush().with_context(|| {
                format!(
                    "flush transcript {}",
                    self.transcript_path
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                )
            })?;
        }
        Ok(())
    }

    fn synthetic_element(&mut self) -> ElementHandle {
        self.next_element += 1;
        ElementHandle {
            id: format!("e{}", self.next_element),
            frame: self.current_frame.clone(),
        }
    }
}

impl Default for TranscriptBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl Browser for TranscriptBrowser {
    fn navigate(&mut self, url: &str) -> Result<()> {
        let url = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("http://{url}")
        };
        self.record("navigate", json!({ "url": url }))?;
        self.current_url = Some(url);
        Ok(())
    }

    fn find_elements(
        &mut self,
        locator: &Locator,
        within: Option<&ElementHandle>,
    ) -> Result<Vec<ElementHandle>> {
        self.record(
            "find_elements",
            json!({ "by": locator.by, "value": locator.value, "within": within.map(|e| &e.id) }),
        )?;
        Ok(vec![self.synthetic_element()])
    }

    fn find_nearest(
        &mut self,
        anchor: &ElementHandle,
        xpath: &str,
        direction: NearDirection,
    ) -> Result<ElementHandle> {
        self.record(
            "find_nearest",
            json!({ "anchor": anchor.id, "xpath": xpath, "direction": direction }),
        )?;
        Ok(self.synthetic_element())
    }

    fn send_keys(&mut self, element: Option<&ElementHandle>, text: &str) -> Result<()> {
        self.record(
            "send_keys",
            json!({ "element": element.map(|e| &e.id), "text": text }),
        )
    }

    fn click(&mut self, element: &ElementHandle) -> Result<()> {
        self.record("click", json!({ "element": element.id }))
    }

    fn wait(&mut self, duration: Duration) -> Result<()> {
        debug!(secs = duration.as_secs_f64(), "wait skipped in transcript mode");
        self.record("wait", json!({ "seconds": duration.as_secs_f64() }))
    }

    fn scroll(&mut self, direction: ScrollDirection, frame: Option<&ElementHandle>) -> Result<()> {
        self.record(
            "scroll",
            json!({ "direction": direction, "frame": frame.map(|e| &e.id) }),
        )
    }

    fn query_llm(&mut self, text: &str) -> Result<String> {
        self.record("query_llm", json!({ "text": text }))?;
        Ok(String::new())
    }

    fn query_memory(&mut self, text: &str) -> Result<String> {
        self.record("query_memory", json!({ "text": text }))?;
        Ok(String::new())
    }

    fn retrieve_information(&mut self, prompt: &str, entire_page: bool) -> Result<String> {
        self.record(
            "retrieve_information",
            json!({ "prompt": prompt, "entire_page": entire_page }),
        )?;
        Ok(String::new())
    }

    fn find_element_by_description(
        &mut self,
        description: &str,
    ) -> Result<Option<ElementHandle>> {
        self.record(
            "find_element_by_description",
            json!({ "description": description }),
        )?;
        Ok(Some(self.synthetic_element()))
    }

    fn screenshot(&mut self, element: &ElementHandle, filename: &str) -> Result<()> {
        self.record(
            "screenshot",
            json!({ "element": element.id, "filename": filename }),
        )
    }

    fn save(&mut self, text: &str, filename: &str) -> Result<()> {
        self.record("save", json!({ "filename": filename, "text": text }))
    }

    fn element_text(&mut self, element: &ElementHandle) -> Result<String> {
        self.record("text", json!({ "element": element.id }))?;
        Ok(String::new())
    }

    fn page_text(&mut self, entire_page: bool) -> Result<String> {
        self.record("page_text", json!({ "entire_page": entire_page }))?;
        Ok(String::new())
    }

    fn enter_frame(&mut self, frame: &FrameId) -> Result<()> {
        self.current_frame = Some(frame.clone());
        Ok(())
    }

    fn exit_frame(&mut self) -> Result<()> {
        self.current_frame = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_enums_parse_case_insensitively() {
        assert_eq!(LocatorStrategy::parse("XPath").expect("parse"), LocatorStrategy::Xpath);
        assert_eq!(NearDirection::parse("below").expect("parse"), NearDirection::Below);
        let err = ScrollDirection::parse("sideways").unwrap_err();
        assert!(err.to_string().contains("expected one of: up, down, top, bottom, left, right"));
    }

    #[test]
    fn frame_is_restored_after_failure() {
        let mut browser = TranscriptBrowser::new();
        let element = ElementHandle::in_frame("e1", FrameId("f1".to_string()));
        let err = with_element_frame(&mut browser, &element, |b| -> Result<()> {
            assert_eq!(b.current_frame, Some(FrameId("f1".to_string())));
            Err(anyhow!("boom"))
        })
        .unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(browser.current_frame, None);
    }

    #[test]
    fn top_level_elements_skip_frame_switch() {
        let mut browser = TranscriptBrowser::new();
        let element = ElementHandle::new("e1");
        let value = with_element_frame(&mut browser, &element, |b| {
            assert!(b.current_frame.is_none());
            Ok(7)
        })
        .expect("ok");
        assert_eq!(value, 7);
    }

    #[test]
    fn transcript_records_one_json_line_per_call() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("transcript.jsonl");
        let mut browser = TranscriptBrowser::with_transcript(&path).expect("open");
        browser.navigate("example.com").expect("navigate");
        let found = browser
            .find_elements(
                &Locator {
                    by: LocatorStrategy::Xpath,
                    value: "//a".to_string(),
                },
                None,
            )
            .expect("find");
        browser.click(&found[0]).expect("click");
        drop(browser);

        let contents = fs::read_to_string(&path).expect("read transcript");
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["args"]["url"], "http://example.com");
        assert_eq!(lines[1]["args"]["by"], "xpath");
        assert_eq!(lines[2]["op"], "click");
        assert_eq!(lines[2]["url"], "http://example.com");
    }

    #[test]
    fn save_is_recorded_without_touching_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("transcript.jsonl");
        let target = temp.path().join("nested").join("..").join("escaped.txt");
        let target = target.to_string_lossy().into_owned();
        let mut browser = TranscriptBrowser::with_transcript(&path).expect("open");
        browser.save("secret", &target).expect("save");
        browser.save("other", "../outside.txt").expect("save");
        drop(browser);

        assert!(!temp.path().join("escaped.txt").exists());
        assert!(!Path::new("../outside.txt").exists());
        let contents = fs::read_to_string(&path).expect("read transcript");
        let first: serde_json::Value =
            serde_json::from_str(contents.lines().next().expect("line")).expect("json line");
        assert_eq!(first["op"], "save");
        assert_eq!(first["args"]["filename"], target.as_str());
        assert_eq!(first["args"]["text"], "secret");
    }
}
