//! Scripted stand-ins for the pool and topology layers.
//!
//! A [`MockDeployment`] replays queued replies to whatever commands reach it and records every
//! command it was sent. Each server selection hands out a source with the next queued
//! description, falling back to the deployment's default.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use futures_util::FutureExt;

use crate::{
    binding::{ReadBinding, ReadPreference, ServerDescription, WriteBinding},
    bson::{doc, Bson, Document},
    cmap::{Channel, ChannelSource, Command, RawCommandResponse, StreamDescription},
    error::{Error, Result},
    session::{ClientSession, Session},
    BoxFuture,
};

#[derive(Default)]
struct DeploymentState {
    replies: VecDeque<Result<Document>>,
    selections: VecDeque<Result<StreamDescription>>,
    commands: Vec<SentCommand>,
}

/// A command as it reached a channel.
#[derive(Clone, Debug)]
pub(crate) struct SentCommand {
    pub(crate) command: Command,
}

impl SentCommand {
    pub(crate) fn document(&self) -> Document {
        self.command.to_document().unwrap()
    }
}

#[derive(Clone)]
pub(crate) struct MockDeployment {
    default_description: StreamDescription,
    state: Arc<Mutex<DeploymentState>>,
}

impl MockDeployment {
    pub(crate) fn new(description: StreamDescription) -> Self {
        Self {
            default_description: description,
            state: Default::default(),
        }
    }

    pub(crate) fn reply(&self, reply: Document) -> &Self {
        self.state.lock().unwrap().replies.push_back(Ok(reply));
        self
    }

    pub(crate) fn fail(&self, error: Error) -> &Self {
        self.state.lock().unwrap().replies.push_back(Err(error));
        self
    }

    /// Queues the description the next server selection hands out.
    pub(crate) fn select(&self, description: StreamDescription) -> &Self {
        self.state
            .lock()
            .unwrap()
            .selections
            .push_back(Ok(description));
        self
    }

    pub(crate) fn fail_selection(&self, error: Error) -> &Self {
        self.state.lock().unwrap().selections.push_back(Err(error));
        self
    }

    pub(crate) fn sent(&self) -> Vec<SentCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    pub(crate) fn sent_names(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|sent| sent.command.name)
            .collect()
    }

    pub(crate) fn remaining_replies(&self) -> usize {
        self.state.lock().unwrap().replies.len()
    }

    fn next_source(&self) -> Result<Arc<dyn ChannelSource>> {
        let selection = self.state.lock().unwrap().selections.pop_front();
        let description = selection.unwrap_or_else(|| Ok(self.default_description.clone()))?;
        Ok(Arc::new(MockChannelSource::new(self.clone(), description)))
    }

    pub(crate) fn binding(&self) -> MockBinding {
        MockBinding {
            deployment: self.clone(),
            session: Some(Arc::new(ClientSession::new())),
            read_preference: ReadPreference::Primary,
        }
    }
}

pub(crate) struct MockChannelSource {
    deployment: MockDeployment,
    server: ServerDescription,
    description: StreamDescription,
}

impl MockChannelSource {
    fn new(deployment: MockDeployment, description: StreamDescription) -> Self {
        Self {
            server: ServerDescription {
                address: description.server_address.clone(),
                server_type: description.initial_server_type,
                max_wire_version: description.max_wire_version,
            },
            deployment,
            description,
        }
    }
}

impl ChannelSource for MockChannelSource {
    fn server(&self) -> &ServerDescription {
        &self.server
    }

    fn get_channel(&self) -> BoxFuture<'_, Result<Box<dyn Channel>>> {
        let channel: Box<dyn Channel> = Box::new(MockChannel {
            deployment: self.deployment.clone(),
            description: self.description.clone(),
        });
        async move { Ok(channel) }.boxed()
    }
}

struct MockChannel {
    deployment: MockDeployment,
    description: StreamDescription,
}

impl Channel for MockChannel {
    fn description(&self) -> &StreamDescription {
        &self.description
    }

    fn send_command(&mut self, command: Command) -> BoxFuture<'_, Result<RawCommandResponse>> {
        let reply = {
            let mut state = self.deployment.state.lock().unwrap();
            let name = command.name.clone();
            state.commands.push(SentCommand { command });
            state
                .replies
                .pop_front()
                .unwrap_or_else(|| Err(Error::internal(format!("no reply scripted for {name}"))))
        };
        let address = self.description.server_address.clone();
        async move { RawCommandResponse::from_document(address, &reply?) }.boxed()
    }
}

pub(crate) struct MockBinding {
    deployment: MockDeployment,
    pub(crate) session: Option<Arc<ClientSession>>,
    pub(crate) read_preference: ReadPreference,
}

impl MockBinding {
    pub(crate) fn without_session(mut self) -> Self {
        self.session = None;
        self
    }

    pub(crate) fn client_session(&self) -> &ClientSession {
        self.session.as_deref().unwrap()
    }
}

impl ReadBinding for MockBinding {
    fn read_preference(&self) -> &ReadPreference {
        &self.read_preference
    }

    fn session(&self) -> Option<Arc<dyn Session>> {
        self.session
            .clone()
            .map(|session| session as Arc<dyn Session>)
    }

    fn get_read_channel_source(&self) -> BoxFuture<'_, Result<Arc<dyn ChannelSource>>> {
        let source = self.deployment.next_source();
        async move { source }.boxed()
    }
}

impl WriteBinding for MockBinding {
    fn session(&self) -> Option<Arc<dyn Session>> {
        ReadBinding::session(self)
    }

    fn get_write_channel_source(&self) -> BoxFuture<'_, Result<Arc<dyn ChannelSource>>> {
        let source = self.deployment.next_source();
        async move { source }.boxed()
    }
}

pub(crate) fn network_error() -> Error {
    Error::from(std::io::ErrorKind::ConnectionReset)
}

pub(crate) fn command_error(code: i32, code_name: &str) -> Document {
    doc! { "ok": 0, "code": code, "codeName": code_name, "errmsg": "scripted failure" }
}

pub(crate) fn cursor_reply(id: i64, ns: &str, docs: Vec<Document>) -> Document {
    let docs: Vec<Bson> = docs.into_iter().map(Bson::Document).collect();
    doc! { "ok": 1, "cursor": { "id": id, "ns": ns, "firstBatch": docs } }
}

pub(crate) fn get_more_reply(id: i64, ns: &str, docs: Vec<Document>) -> Document {
    let docs: Vec<Bson> = docs.into_iter().map(Bson::Document).collect();
    doc! { "ok": 1, "cursor": { "id": id, "ns": ns, "nextBatch": docs } }
}
