use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity tag on a single status entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Info,
    Success,
    Warning,
}

/// One formatted line inside a status message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: EntryKind,
    pub text: String,
}

/// Audience a status message is addressed to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Any presentation client may render this message.
    Any,
    /// Only the named presentation client should render it.
    Client(String),
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum StatusError {
    #[error("invalid formatting state: {0}")]
    InvalidState(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FormatState {
    New,
    Open,
    Sealed,
}

// Deserialized messages arrive sealed; the mutation window never
// crosses a process or wire boundary.
impl Default for FormatState {
    fn default() -> Self {
        Self::Sealed
    }
}

/// A titled, formatted group of status entries addressed to an audience.
///
/// Entries may only be appended between `begin_formatting()` and
/// `end_formatting()`; once ended the message is immutable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub source: String,
    pub destination: Option<Destination>,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    entries: Vec<Entry>,
    #[serde(skip)]
    state: FormatState,
}

impl StatusMessage {
    /// Create an empty, unaddressed message. Call `begin_formatting()`
    /// before appending entries.
    pub fn new(source: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: None,
            title: title.into(),
            timestamp: Utc::now(),
            entries: Vec::new(),
            state: FormatState::New,
        }
    }

    /// Build a sealed single-entry message in one call.
    pub fn single(
        kind: EntryKind,
        source: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::formatted(source, title, [(kind, text.into())])
    }

    /// Build a sealed message from an ordered set of entries.
    pub fn formatted(
        source: impl Into<String>,
        title: impl Into<String>,
        entries: impl IntoIterator<Item = (EntryKind, String)>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: None,
            title: title.into(),
            timestamp: Utc::now(),
            entries: entries
                .into_iter()
                .map(|(kind, text)| Entry { kind, text })
                .collect(),
            state: FormatState::Sealed,
        }
    }

    /// Address the message to an audience.
    pub fn addressed_to(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Open the mutation window.
    pub fn begin_formatting(&mut self) -> Result<(), StatusError> {
        match self.state {
            FormatState::New => {
                self.state = FormatState::Open;
                Ok(())
            }
            FormatState::Open => Err(StatusError::InvalidState("formatting already open")),
            FormatState::Sealed => Err(StatusError::InvalidState("message is sealed")),
        }
    }

    /// Close the mutation window. The message is immutable afterwards.
    pub fn end_formatting(&mut self) -> Result<(), StatusError> {
        match self.state {
            FormatState::Open => {
                self.state = FormatState::Sealed;
                Ok(())
            }
            _ => Err(StatusError::InvalidState("formatting not open")),
        }
    }

    pub fn info(&mut self, text: impl Into<String>) -> Result<(), StatusError> {
        self.append(EntryKind::Info, text.into())
    }

    pub fn success(&mut self, text: impl Into<String>) -> Result<(), StatusError> {
        self.append(EntryKind::Success, text.into())
    }

    pub fn warn(&mut self, text: impl Into<String>) -> Result<(), StatusError> {
        self.append(EntryKind::Warning, text.into())
    }

    fn append(&mut self, kind: EntryKind, text: String) -> Result<(), StatusError> {
        if self.state != FormatState::Open {
            return Err(StatusError::InvalidState(
                "entries may only be appended inside the formatting window",
            ));
        }
        self.entries.push(Entry { kind, text });
        Ok(())
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_sealed(&self) -> bool {
        self.state == FormatState::Sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_require_open_window() {
        let mut msg = StatusMessage::new("test", "Title");
        assert!(msg.info("too early").is_err());

        msg.begin_formatting().unwrap();
        msg.info("first").unwrap();
        msg.success("second").unwrap();
        msg.warn("third").unwrap();
        msg.end_formatting().unwrap();

        assert!(msg.is_sealed());
        assert_eq!(msg.entries().len(), 3);
        assert_eq!(msg.entries()[0].kind, EntryKind::Info);
        assert_eq!(msg.entries()[2].kind, EntryKind::Warning);
    }

    #[test]
    fn sealed_message_is_immutable() {
        let mut msg = StatusMessage::new("test", "Title");
        msg.begin_formatting().unwrap();
        msg.info("only").unwrap();
        msg.end_formatting().unwrap();

        assert!(msg.info("late").is_err());
        assert!(msg.begin_formatting().is_err());
        assert_eq!(msg.entries().len(), 1);
    }

    #[test]
    fn double_begin_rejected() {
        let mut msg = StatusMessage::new("test", "Title");
        msg.begin_formatting().unwrap();
        assert!(msg.begin_formatting().is_err());
    }

    #[test]
    fn end_without_begin_rejected() {
        let mut msg = StatusMessage::new("test", "Title");
        assert!(msg.end_formatting().is_err());
    }

    #[test]
    fn single_builds_sealed() {
        let msg = StatusMessage::single(EntryKind::Success, "orchestrator", "Hotword", "detected");
        assert!(msg.is_sealed());
        assert_eq!(msg.entries().len(), 1);
        assert_eq!(msg.entries()[0].text, "detected");
        assert!(msg.destination.is_none());
    }

    #[test]
    fn addressed_to_sets_destination() {
        let msg = StatusMessage::single(EntryKind::Info, "a", "b", "c")
            .addressed_to(Destination::Client("console".into()));
        assert_eq!(msg.destination, Some(Destination::Client("console".into())));
    }

    #[test]
    fn serde_roundtrip_arrives_sealed() {
        let msg = StatusMessage::formatted(
            "startup",
            "Module status",
            [
                (EntryKind::Success, "chat: Okay".to_string()),
                (EntryKind::Warning, "speech: Unavailable".to_string()),
            ],
        )
        .addressed_to(Destination::Any);

        let json = serde_json::to_string(&msg).unwrap();
        let mut parsed: StatusMessage = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_sealed());
        assert!(parsed.info("late").is_err());
        assert_eq!(parsed.entries().len(), 2);
        assert_eq!(parsed.title, "Module status");
    }
}
