use serde::Deserialize;

use crate::{
    bson::{rawdoc, RawArrayBuf},
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::{Error, Result},
    operation::{ExecutionContext, OperationWithDefaults},
    Namespace,
};

/// Releases server-side cursors.
#[derive(Debug)]
pub struct KillCursors {
    ns: Namespace,
    cursor_ids: Vec<i64>,
}

impl KillCursors {
    pub(crate) fn new(ns: Namespace, cursor_ids: Vec<i64>) -> Self {
        Self { ns, cursor_ids }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KillCursorsResponse {
    #[serde(default)]
    cursors_killed: Vec<i64>,

    #[serde(default)]
    cursors_not_found: Vec<i64>,
}

impl OperationWithDefaults for KillCursors {
    type O = ();

    const NAME: &'static str = "killCursors";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut cursors = RawArrayBuf::new();
        for id in &self.cursor_ids {
            cursors.push(*id);
        }
        let body = rawdoc! {
            Self::NAME: self.ns.coll.clone(),
            "cursors": cursors,
        };
        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let response: KillCursorsResponse = response.body()?;
        if !response.cursors_not_found.is_empty() {
            return Err(Error::invalid_response(format!(
                "server did not find cursors {:?}",
                response.cursors_not_found
            )));
        }
        if let Some(id) = self
            .cursor_ids
            .iter()
            .find(|id| !response.cursors_killed.contains(id))
        {
            return Err(Error::invalid_response(format!(
                "server did not report cursor {id} as killed"
            )));
        }
        Ok(())
    }
}
