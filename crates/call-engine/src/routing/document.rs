//! Call-control documents
//!
//! The declarative XML the telephony provider executes after each webhook.
//! Only the verbs the engine emits are modelled.

use std::io::Cursor;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::error;

use crate::error::{CallEngineError, Result};

/// Who a `<Dial>` rings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    /// Browser softphone identity
    Client(String),
    /// PSTN number
    Number(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dial {
    pub target: DialTarget,
    pub timeout_secs: Option<u32>,
    pub action_url: Option<String>,
    pub caller_id: Option<String>,
    pub record_from_answer: bool,
    pub recording_status_callback: Option<String>,
}

impl Dial {
    pub fn new(target: DialTarget) -> Self {
        Self {
            target,
            timeout_secs: None,
            action_url: None,
            caller_id: None,
            record_from_answer: false,
            recording_status_callback: None,
        }
    }

    pub fn timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn action(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    pub fn caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }

    /// Record from answer and report the recording to `callback`
    pub fn record(mut self, callback: impl Into<String>) -> Self {
        self.record_from_answer = true;
        self.recording_status_callback = Some(callback.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Say(String),
    Dial(Dial),
    Record {
        max_length_secs: u32,
        recording_status_callback: Option<String>,
    },
    Redirect(String),
    Hangup,
}

/// An ordered list of verbs wrapped in `<Response>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallControlDocument {
    verbs: Vec<Verb>,
}

impl CallControlDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say(text.into()));
        self
    }

    pub fn dial(mut self, dial: Dial) -> Self {
        self.verbs.push(Verb::Dial(dial));
        self
    }

    pub fn record(mut self, max_length_secs: u32, recording_status_callback: Option<String>) -> Self {
        self.verbs.push(Verb::Record {
            max_length_secs,
            recording_status_callback,
        });
        self
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Redirect(url.into()));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    /// The first `<Dial>`, if the document rings anyone
    pub fn dial_verb(&self) -> Option<&Dial> {
        self.verbs.iter().find_map(|v| match v {
            Verb::Dial(dial) => Some(dial),
            _ => None,
        })
    }

    pub fn is_voicemail(&self) -> bool {
        self.verbs.iter().any(|v| matches!(v, Verb::Record { .. }))
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.verbs.iter().find_map(|v| match v {
            Verb::Redirect(url) => Some(url.as_str()),
            _ => None,
        })
    }

    /// Serialize as the provider's XML dialect
    pub fn render(&self) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        emit(&mut writer, Event::Start(BytesStart::new("Response")))?;

        for verb in &self.verbs {
            match verb {
                Verb::Say(text) => text_element(&mut writer, BytesStart::new("Say"), text)?,
                Verb::Dial(dial) => write_dial(&mut writer, dial)?,
                Verb::Record {
                    max_length_secs,
                    recording_status_callback,
                } => {
                    let mut record = BytesStart::new("Record");
                    record.push_attribute(("maxLength", max_length_secs.to_string().as_str()));
                    record.push_attribute(("playBeep", "true"));
                    if let Some(cb) = recording_status_callback {
                        record.push_attribute(("recordingStatusCallback", cb.as_str()));
                    }
                    emit(&mut writer, Event::Empty(record))?;
                }
                Verb::Redirect(url) => {
                    let mut redirect = BytesStart::new("Redirect");
                    redirect.push_attribute(("method", "POST"));
                    text_element(&mut writer, redirect, url)?;
                }
                Verb::Hangup => emit(&mut writer, Event::Empty(BytesStart::new("Hangup")))?,
            }
        }

        emit(&mut writer, Event::End(BytesEnd::new("Response")))?;
        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| CallEngineError::internal(format!("call-control XML is not UTF-8: {}", e)))
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn emit(writer: &mut XmlWriter, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| CallEngineError::internal(format!("call-control XML: {}", e)))
}

/// `<name attrs>text</name>`, with the text escaped
fn text_element(writer: &mut XmlWriter, start: BytesStart<'_>, text: &str) -> Result<()> {
    let end = start.to_end().into_owned();
    emit(writer, Event::Start(start))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(end))
}

fn write_dial(writer: &mut XmlWriter, dial: &Dial) -> Result<()> {
    let mut start = BytesStart::new("Dial");
    if let Some(timeout) = dial.timeout_secs {
        start.push_attribute(("timeout", timeout.to_string().as_str()));
    }
    if let Some(action) = &dial.action_url {
        start.push_attribute(("action", action.as_str()));
        start.push_attribute(("method", "POST"));
    }
    if let Some(caller_id) = &dial.caller_id {
        start.push_attribute(("callerId", caller_id.as_str()));
    }
    if dial.record_from_answer {
        start.push_attribute(("record", "record-from-answer"));
    }
    if let Some(cb) = &dial.recording_status_callback {
        start.push_attribute(("recordingStatusCallback", cb.as_str()));
    }
    emit(writer, Event::Start(start))?;

    match &dial.target {
        DialTarget::Client(identity) => text_element(writer, BytesStart::new("Client"), identity)?,
        DialTarget::Number(number) => text_element(writer, BytesStart::new("Number"), number)?,
    }

    emit(writer, Event::End(BytesEnd::new("Dial")))
}

impl IntoResponse for CallControlDocument {
    fn into_response(self) -> Response {
        match self.render() {
            Ok(xml) => ([(header::CONTENT_TYPE, "text/xml; charset=utf-8")], xml).into_response(),
            Err(e) => {
                error!("❌ Could not render call-control document: {}", e);
                e.into_response()
            }
        }
    }
}
