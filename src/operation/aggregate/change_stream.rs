use crate::{
    bson::{self, doc, Document, RawBsonRef, RawDocumentBuf},
    change_stream::{event::ResumeToken, ChangeStreamData, ChangeStreamTarget},
    cmap::{Command, RawCommandResponse, StreamDescription},
    concern::WriteConcern,
    cursor::Cursor,
    error::{Error, Result},
    operation::{ExecutionContext, Operation, Retryability, SERVER_4_0_0_WIRE_VERSION},
    options::ChangeStreamOptions,
};

use super::Aggregate;

/// The `aggregate` that opens or resumes a change stream: the caller's pipeline behind a
/// `$changeStream` stage.
#[derive(Debug)]
pub(crate) struct ChangeStreamAggregate {
    inner: Aggregate<RawDocumentBuf>,
    target: ChangeStreamTarget,
    pipeline: Vec<Document>,
    options: Option<ChangeStreamOptions>,
    resume_data: Option<ChangeStreamData>,
}

impl ChangeStreamAggregate {
    /// `resume_data` is the state of the stream being resumed, if any.
    pub(crate) fn new(
        target: ChangeStreamTarget,
        pipeline: Vec<Document>,
        options: Option<ChangeStreamOptions>,
        resume_data: Option<ChangeStreamData>,
    ) -> Result<Self> {
        let inner = Self::build_inner(&target, &pipeline, options.as_ref())?;
        Ok(Self {
            inner,
            target,
            pipeline,
            options,
            resume_data,
        })
    }

    fn build_inner(
        target: &ChangeStreamTarget,
        pipeline: &[Document],
        options: Option<&ChangeStreamOptions>,
    ) -> Result<Aggregate<RawDocumentBuf>> {
        let mut stage_options = match options {
            Some(options) => bson::to_document(options)?,
            None => Document::new(),
        };
        if matches!(target, ChangeStreamTarget::Cluster) {
            stage_options.insert("allChangesForCluster", true);
        }

        let mut agg_pipeline = vec![doc! { "$changeStream": stage_options }];
        agg_pipeline.extend(pipeline.iter().cloned());
        Ok(Aggregate::new(
            target.aggregate_target(),
            agg_pipeline,
            options.map(ChangeStreamOptions::aggregate_options),
        ))
    }

    /// The options of a resumed stream: the cached token replaces the original starting point,
    /// or, without a token, the operation time the stream started at is reused.
    fn resume_options(
        &self,
        data: &ChangeStreamData,
        description: &StreamDescription,
    ) -> ChangeStreamOptions {
        let mut options = self.options.clone().unwrap_or_default();
        if let Some(ref token) = data.resume_token {
            if options.start_after.is_some() && !data.document_returned {
                options.start_after = Some(token.clone());
            } else {
                options.resume_after = Some(token.clone());
                options.start_after = None;
            }
            options.start_at_operation_time = None;
        } else {
            let saved_time = options
                .start_at_operation_time
                .or(data.initial_operation_time);
            if saved_time.is_some()
                && description
                    .max_wire_version
                    .is_some_and(|version| version >= SERVER_4_0_0_WIRE_VERSION)
            {
                options.start_at_operation_time = saved_time;
            }
        }
        options
    }

    fn has_start_point(&self) -> bool {
        self.options.as_ref().is_some_and(|options| {
            options.start_at_operation_time.is_some()
                || options.resume_after.is_some()
                || options.start_after.is_some()
        })
    }
}

impl Operation for ChangeStreamAggregate {
    type O = (Cursor<RawDocumentBuf>, ChangeStreamData);

    const NAME: &'static str = Aggregate::<RawDocumentBuf>::NAME;

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        if let Some(ref data) = self.resume_data {
            let options = self.resume_options(data, description);
            self.inner = Self::build_inner(&self.target, &self.pipeline, Some(&options))?;
        }
        self.inner.build(description)
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let operation_time = response
            .raw_body()
            .get("operationTime")?
            .and_then(RawBsonRef::as_timestamp);
        let description = context.description;

        let cursor = self.inner.handle_response(response, context)?;

        let first_batch_token = cursor
            .post_batch_resume_token()
            .filter(|_| cursor.was_first_batch_empty());
        let mut data = ChangeStreamData {
            resume_token: ResumeToken::initial(self.options.as_ref(), first_batch_token),
            ..ChangeStreamData::default()
        };

        if !self.has_start_point()
            && description
                .max_wire_version
                .is_some_and(|version| version >= SERVER_4_0_0_WIRE_VERSION)
            && cursor.was_first_batch_empty()
            && cursor.post_batch_resume_token().is_none()
        {
            data.initial_operation_time = operation_time;
        }

        Ok((cursor, data))
    }

    fn handle_error(&self, error: Error) -> Result<Self::O> {
        Err(error)
    }

    fn is_acknowledged(&self) -> bool {
        self.inner.is_acknowledged()
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.inner.write_concern()
    }

    fn retryability(&self) -> Retryability {
        self.inner.retryability()
    }

    fn update_for_retry(&mut self) {
        self.inner.update_for_retry();
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

impl ResumeToken {
    /// The token a freshly opened stream would resume from before it returns any event.
    pub(crate) fn initial(
        options: Option<&ChangeStreamOptions>,
        post_batch_resume_token: Option<&ResumeToken>,
    ) -> Option<ResumeToken> {
        post_batch_resume_token.cloned().or_else(|| {
            options.and_then(|options| {
                options
                    .start_after
                    .clone()
                    .or_else(|| options.resume_after.clone())
            })
        })
    }
}
