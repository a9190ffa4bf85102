use std::{collections::VecDeque, time::Duration};

use crate::{
    bson::{rawdoc, Bson, RawBson, RawDocumentBuf},
    change_stream::event::ResumeToken,
    cmap::{Command, RawCommandResponse, StreamDescription},
    cursor::CursorInformation,
    error::Result,
    operation::{CursorBody, ExecutionContext, OperationWithDefaults, SERVER_4_4_0_WIRE_VERSION},
    Namespace,
};

/// Fetches the next batch of an open cursor.
#[derive(Debug)]
pub struct GetMore {
    ns: Namespace,
    cursor_id: i64,
    batch_size: u32,
    max_time: Option<Duration>,
    comment: Option<Bson>,
}

/// The batch returned by a [`GetMore`].
#[derive(Debug)]
#[non_exhaustive]
pub struct GetMoreResult {
    /// The documents of the batch.
    pub batch: VecDeque<RawDocumentBuf>,

    /// The id of the cursor after this batch. Zero when the cursor is exhausted.
    pub id: i64,

    /// The resume token for change stream cursors.
    pub post_batch_resume_token: Option<ResumeToken>,

    /// The namespace the server reported for the cursor.
    pub ns: Namespace,
}

impl GetMore {
    /// A `batch_size` of zero lets the server pick the batch size.
    pub(crate) fn new(info: CursorInformation, batch_size: u32) -> Self {
        Self {
            ns: info.ns,
            cursor_id: info.id,
            batch_size,
            max_time: info.max_await_time,
            comment: info.comment,
        }
    }
}

impl OperationWithDefaults for GetMore {
    type O = GetMoreResult;

    const NAME: &'static str = "getMore";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        let mut body = rawdoc! {
            Self::NAME: self.cursor_id,
            "collection": self.ns.coll.clone(),
        };

        if self.batch_size != 0 {
            body.append("batchSize", i32::try_from(self.batch_size).unwrap_or(i32::MAX));
        }

        if let Some(ref max_time) = self.max_time {
            body.append(
                "maxTimeMS",
                i32::try_from(max_time.as_millis()).unwrap_or(i32::MAX),
            );
        }

        if let Some(ref comment) = self.comment {
            if description
                .max_wire_version
                .is_some_and(|version| version >= SERVER_4_4_0_WIRE_VERSION)
            {
                let raw_comment: RawBson = comment.clone().try_into()?;
                body.append("comment", raw_comment);
            }
        }

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let response: CursorBody = response.body()?;
        Ok(GetMoreResult {
            batch: response.cursor.first_batch,
            id: response.cursor.id,
            post_batch_resume_token: ResumeToken::from_raw(response.cursor.post_batch_resume_token),
            ns: response.cursor.ns,
        })
    }
}
