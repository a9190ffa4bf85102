use serde::Deserialize;

use crate::{
    bson::{self, doc, Document},
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::{Error, Result},
    operation::{
        aggregate::Aggregate,
        CursorBody,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
    },
    options::{AggregateOptions, CountDocumentsOptions},
    Namespace,
};

/// Counts the documents matching a filter by running a `$match`/`$group` aggregation.
#[derive(Debug)]
pub struct CountDocuments {
    aggregate: Aggregate<Document>,
}

impl CountDocuments {
    /// Counts the documents matching `filter` with an aggregation. Fails if `skip` or `limit`
    /// does not fit into a BSON integer.
    pub fn new(
        ns: Namespace,
        filter: Document,
        options: impl Into<Option<CountDocumentsOptions>>,
    ) -> Result<Self> {
        let options = options.into();
        let mut pipeline = vec![doc! {
            "$match": filter,
        }];

        if let Some(skip) = options.as_ref().and_then(|opts| opts.skip) {
            let s = i64::try_from(skip).map_err(|_| {
                Error::invalid_argument(format!("skip exceeds range of i64: {skip}"))
            })?;
            pipeline.push(doc! {
                "$skip": s
            });
        }

        if let Some(limit) = options.as_ref().and_then(|opts| opts.limit) {
            let l = i64::try_from(limit).map_err(|_| {
                Error::invalid_argument(format!("limit exceeds range of i64: {limit}"))
            })?;
            pipeline.push(doc! {
                "$limit": l
            });
        }

        pipeline.push(doc! {
            "$group": {
                "_id": 1,
                "n": { "$sum": 1 },
            }
        });

        let aggregate_options = options.map(|opts| {
            AggregateOptions::builder()
                .hint(opts.hint)
                .max_time(opts.max_time)
                .collation(opts.collation)
                .comment(opts.comment)
                .build()
        });

        Ok(Self {
            aggregate: Aggregate::new(ns, pipeline, aggregate_options),
        })
    }
}

impl OperationWithDefaults for CountDocuments {
    type O = u64;

    const NAME: &'static str = "aggregate";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        OperationWithDefaults::build(&mut self.aggregate, description)
    }

    /// An empty result means no document matched. The `$group` stage cannot produce more than
    /// one document, so more than one is a malformed reply.
    fn handle_response(
        &self,
        response: RawCommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let body: CursorBody = response.body()?;
        let mut batch = body.cursor.first_batch;
        if batch.len() > 1 {
            return Err(Error::invalid_response(format!(
                "expected at most one result document from count aggregation, got {}",
                batch.len()
            )));
        }
        match batch.pop_front() {
            Some(document) => {
                let result: Body = bson::from_slice(document.as_bytes())
                    .map_err(|e| Error::invalid_response(e.to_string()))?;
                Ok(result.n)
            }
            None => Ok(0),
        }
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

#[derive(Debug, Deserialize)]
struct Body {
    n: u64,
}
