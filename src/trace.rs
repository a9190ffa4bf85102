//! Tracing targets and the command events emitted by the executors.

use std::time::Duration;

use crate::{
    bson::{Bson, Document},
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::Error,
};

pub(crate) const COMMAND_TRACING_EVENT_TARGET: &str = "mongodb_opcore::command";
pub(crate) const RETRY_TRACING_EVENT_TARGET: &str = "mongodb_opcore::retry";
pub(crate) const CURSOR_TRACING_EVENT_TARGET: &str = "mongodb_opcore::cursor";

/// Commands and replies longer than this are truncated in events.
pub(crate) const DEFAULT_MAX_DOCUMENT_LENGTH_BYTES: usize = 1000;

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for Document {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        Bson::Document(self.clone())
            .into_relaxed_extjson()
            .to_string()
    }
}

impl TracingRepresentation for Error {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

/// Serializes a command or reply to relaxed extended JSON, truncated to `max_length_bytes` on a
/// character boundary.
pub(crate) fn serialize_command_or_reply(doc: &Document, max_length_bytes: usize) -> String {
    let mut serialized = doc.tracing_representation();
    truncate_on_char_boundary(&mut serialized, max_length_bytes);
    serialized
}

pub(crate) fn truncate_on_char_boundary(s: &mut String, new_len: usize) {
    let original_len = s.len();
    if original_len > new_len {
        let mut truncate_index = new_len;
        while !s.is_char_boundary(truncate_index) {
            truncate_index += 1;
        }
        s.truncate(truncate_index);
        if s.len() < original_len {
            s.push_str("...");
        }
    }
}

pub(crate) fn command_started(command: &Command, description: &StreamDescription) {
    if !tracing::enabled!(target: COMMAND_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
        return;
    }
    let serialized = if command.should_redact() {
        "{}".to_string()
    } else {
        command
            .to_document()
            .map(|doc| serialize_command_or_reply(&doc, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES))
            .unwrap_or_default()
    };
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        command = serialized,
        databaseName = command.target_db.as_str(),
        commandName = command.name.as_str(),
        serverHost = description.server_address.host.as_str(),
        serverPort = description.server_address.port.unwrap_or(27017),
        txnNumber = command.txn_number,
        "Command started"
    );
}

pub(crate) fn command_succeeded(
    command_name: &str,
    redact: bool,
    response: &RawCommandResponse,
    duration: Duration,
) {
    if !tracing::enabled!(target: COMMAND_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
        return;
    }
    let reply = serialize_reply(response, redact);
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        reply = reply,
        commandName = command_name,
        serverHost = response.source_address().host.as_str(),
        durationMS = duration.as_millis(),
        "Command succeeded"
    );
}

fn serialize_reply(response: &RawCommandResponse, redact: bool) -> String {
    if redact {
        return "{}".to_string();
    }
    Document::try_from(response.raw_body())
        .map(|doc| serialize_command_or_reply(&doc, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES))
        .unwrap_or_default()
}

pub(crate) fn command_failed(command_name: &str, error: &Error, duration: Duration) {
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        failure = error.tracing_representation(),
        commandName = command_name,
        durationMS = duration.as_millis(),
        "Command failed"
    );
}

#[cfg(test)]
mod test {
    use super::{serialize_reply, truncate_on_char_boundary};
    use crate::{binding::ServerAddress, bson::doc, cmap::RawCommandResponse};

    #[test]
    fn replies_are_serialized_unless_redacted() {
        let response = RawCommandResponse::from_document(
            ServerAddress::new("localhost", 27017_u16),
            &doc! { "n": 2 },
        )
        .unwrap();
        assert_eq!(serialize_reply(&response, false), r#"{"n":2}"#);
        assert_eq!(serialize_reply(&response, true), "{}");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = "héllo".to_string();
        truncate_on_char_boundary(&mut s, 2);
        assert_eq!(s, "hé...");

        let mut short = "abc".to_string();
        truncate_on_char_boundary(&mut short, 10);
        assert_eq!(short, "abc");
    }
}
