mod change_stream;

use std::marker::PhantomData;

use derive_more::From;
use derive_where::derive_where;
use serde::de::DeserializeOwned;

use crate::{
    bson::{rawdoc, Document, RawBson},
    bson_util,
    cmap::{Command, RawCommandResponse, StreamDescription},
    concern::WriteConcern,
    cursor::{Cursor, CursorSpecification},
    error::Result,
    operation::{
        append_options_to_raw_document,
        append_write_concern,
        CursorBody,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
        WriteConcernOnlyBody,
        SERVER_4_4_0_WIRE_VERSION,
    },
    options::AggregateOptions,
    Namespace,
};

pub(crate) use change_stream::ChangeStreamAggregate;

/// What an aggregation pipeline runs against.
#[derive(Clone, Debug, PartialEq, From)]
pub enum AggregateTarget {
    /// A database-level aggregation, such as one starting with `$currentOp`.
    Database(String),

    /// A collection.
    Collection(Namespace),
}

impl AggregateTarget {
    fn db_name(&self) -> &str {
        match self {
            AggregateTarget::Database(db) => db,
            AggregateTarget::Collection(ns) => &ns.db,
        }
    }

    fn to_raw_bson(&self) -> RawBson {
        match self {
            AggregateTarget::Database(_) => RawBson::Int32(1),
            AggregateTarget::Collection(ns) => RawBson::String(ns.coll.clone()),
        }
    }
}


/// Runs an aggregation pipeline, returning a cursor over its output.
#[derive_where(Debug)]
pub struct Aggregate<T = Document> {
    target: AggregateTarget,
    pipeline: Vec<Document>,
    options: Option<AggregateOptions>,
    #[derive_where(skip)]
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Aggregate<T> {
    /// Runs `pipeline` against `target`.
    pub fn new(
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Self {
        Self {
            target: target.into(),
            pipeline: pipeline.into_iter().collect(),
            options: options.into(),
            _phantom: PhantomData,
        }
    }

    /// Returns whether this is a $out or $merge aggregation operation.
    fn is_out_or_merge(&self) -> bool {
        self.pipeline
            .last()
            .map(|stage| {
                let stage = bson_util::first_key(stage);
                stage == Some("$out") || stage == Some("$merge")
            })
            .unwrap_or(false)
    }
}

impl<T: DeserializeOwned> OperationWithDefaults for Aggregate<T> {
    type O = Cursor<T>;

    const NAME: &'static str = "aggregate";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut cursor = rawdoc! {};
        if !self.is_out_or_merge() {
            if let Some(batch_size) = self.options.as_ref().and_then(|opts| opts.batch_size) {
                cursor.append("batchSize", i32::try_from(batch_size).unwrap_or(i32::MAX));
            }
        }

        let mut body = rawdoc! {
            Self::NAME: self.target.to_raw_bson(),
            "pipeline": bson_util::to_raw_document_array(&self.pipeline)?,
            "cursor": cursor,
        };
        append_options_to_raw_document(&mut body, self.options.as_ref())?;
        if self.is_out_or_merge() {
            append_write_concern(&mut body, self.write_concern())?;
        }

        Ok(Command::new(Self::NAME, self.target.db_name(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        if self.is_out_or_merge() {
            let wc_error_info: WriteConcernOnlyBody = response.body()?;
            wc_error_info.validate()?;
        }

        let body: CursorBody = response.body()?;

        // The comment should only be propagated to getMore calls on 4.4+.
        let comment = if context.description.max_wire_version.unwrap_or(0)
            < SERVER_4_4_0_WIRE_VERSION
        {
            None
        } else {
            self.options.as_ref().and_then(|opts| opts.comment.clone())
        };

        let spec = CursorSpecification::new(
            body.cursor,
            response.source_address().clone(),
            self.options.as_ref().and_then(|opts| opts.batch_size),
            self.options.as_ref().and_then(|opts| opts.max_await_time),
            comment,
        );
        Cursor::new(
            spec,
            context.channel_source.clone(),
            context.session.cloned(),
        )
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        if self.is_out_or_merge() {
            Retryability::None
        } else {
            Retryability::Read
        }
    }
}
