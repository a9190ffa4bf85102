//! Runs operations against the channels a binding provides, retrying a failed attempt once when
//! the failure, the operation and the server all allow it.

mod context;

use std::{sync::Arc, time::Instant};

use tokio_util::sync::CancellationToken;

use crate::{
    binding::{ReadBinding, ReadPreference, ServerType, WriteBinding},
    bson_util::get_int_raw,
    cmap::{Channel, ChannelSource, RawCommandResponse, StreamDescription},
    error::{Error, ErrorClass, Result, RETRYABLE_WRITE_ERROR},
    operation::{
        CommandErrorBody,
        ExecutionContext,
        Operation,
        Retryability,
        WriteConcernOnlyBody,
    },
    session::Session,
    trace::{self, RETRY_TRACING_EVENT_TARGET},
};

pub use context::{RetryableReadContext, RetryableWriteContext};

/// Executes a read operation, retrying it once on a freshly selected server if the first attempt
/// fails with a retryable error and `retry_requested` is set.
///
/// When both attempts fail, the error of the first attempt is returned unless the second failed
/// with a network error or was cancelled.
pub async fn execute_read<T: Operation>(
    op: &mut T,
    binding: &dyn ReadBinding,
    retry_requested: bool,
    cancellation: &CancellationToken,
) -> Result<T::O> {
    let mut context = RetryableReadContext::create(binding, retry_requested, cancellation).await?;
    execute_read_with_context(op, &mut context, cancellation).await
}

/// Executes a write operation. A retryable write is sent with a transaction number, and a retry
/// reuses that number so the server applies the write at most once.
pub async fn execute_write<T: Operation>(
    op: &mut T,
    binding: &dyn WriteBinding,
    retry_requested: bool,
    cancellation: &CancellationToken,
) -> Result<T::O> {
    let mut context = RetryableWriteContext::create(binding, retry_requested, cancellation).await?;
    execute_write_with_context(op, &mut context, cancellation).await
}

/// Executes a read operation on the channel bound to `context`.
pub async fn execute_read_with_context<T: Operation>(
    op: &mut T,
    context: &mut RetryableReadContext<'_>,
    cancellation: &CancellationToken,
) -> Result<T::O> {
    let retry_eligible = context.retry_requested()
        && op.retryability() == Retryability::Read
        && !in_transaction(context.session())
        && context.description().supports_retryable_reads();
    let first_wire_version = context.description().max_wire_version;

    let first_error = match read_attempt(op, context, cancellation).await {
        Ok(output) => return Ok(output),
        Err(error) => error,
    };
    if !retry_eligible || first_error.classify(Retryability::Read) != ErrorClass::Retryable {
        return Err(first_error);
    }

    if let Err(error) = context.rebind(cancellation).await {
        abandon_retry(op.name(), &error, "server selection for the retry failed");
        return Err(first_error);
    }
    if context.description().max_wire_version < first_wire_version
        || !context.description().supports_retryable_reads()
    {
        abandon_retry(op.name(), &first_error, "the new server cannot retry the read");
        return Err(first_error);
    }

    log_retry(op.name(), &first_error);
    op.update_for_retry();
    let retry_result = read_attempt(op, context, cancellation).await;
    resolve_retry(op.name(), first_error, retry_result)
}

/// Executes a write operation on the channel bound to `context`. Bulk writes run every batch
/// through one context so a retry's new channel is kept for the batches that follow.
pub async fn execute_write_with_context<T: Operation>(
    op: &mut T,
    context: &mut RetryableWriteContext<'_>,
    cancellation: &CancellationToken,
) -> Result<T::O> {
    let session = context.session().cloned();
    let retry_eligible = context.retry_requested()
        && op.retryability() == Retryability::Write
        && op.is_acknowledged()
        && session.is_some()
        && !in_transaction(session.as_ref())
        && context.description().supports_retryable_writes();
    let txn_number = match session {
        Some(ref session) if retry_eligible => Some(session.advance_transaction_number()),
        _ => None,
    };
    let first_wire_version = context.description().max_wire_version;

    let first_error =
        match write_attempt(op, context, session.as_ref(), txn_number, retry_eligible, cancellation)
            .await
        {
            Ok(output) => return Ok(output),
            Err(error) => error,
        };
    if !retry_eligible || first_error.classify(Retryability::Write) != ErrorClass::Retryable {
        return Err(first_error);
    }

    if let Err(error) = context.rebind(cancellation).await {
        abandon_retry(op.name(), &error, "server selection for the retry failed");
        return Err(first_error);
    }
    if context.description().max_wire_version < first_wire_version
        || !context.description().supports_retryable_writes()
    {
        abandon_retry(op.name(), &first_error, "the new server cannot retry the write");
        return Err(first_error);
    }

    log_retry(op.name(), &first_error);
    op.update_for_retry();
    let retry_result =
        write_attempt(op, context, session.as_ref(), txn_number, false, cancellation).await;
    resolve_retry(op.name(), first_error, retry_result)
}

/// Sends one attempt of `op` over a channel checked out of `source`, without retrying. Used for
/// follow-up commands that must reach the server owning a cursor.
pub(crate) async fn execute_on_source<T: Operation>(
    op: &mut T,
    source: &Arc<dyn ChannelSource>,
    session: Option<&Arc<dyn Session>>,
    cancellation: &CancellationToken,
) -> Result<T::O> {
    if cancellation.is_cancelled() {
        return Err(Error::cancelled());
    }
    let mut channel = tokio::select! {
        biased;
        _ = cancellation.cancelled() => return Err(Error::cancelled()),
        channel = source.get_channel() => channel?,
    };
    let retryability = op.retryability();
    let attempt = Attempt {
        source,
        channel: channel.as_mut(),
        session,
        txn_number: None,
        read_preference: None,
        retryability,
        fail_on_retryable_write_concern_error: false,
    };
    send_attempt(op, attempt, cancellation).await
}

async fn read_attempt<T: Operation>(
    op: &mut T,
    context: &mut RetryableReadContext<'_>,
    cancellation: &CancellationToken,
) -> Result<T::O> {
    let session = context.session().cloned();
    let read_preference = context.read_preference().clone();
    let attempt = Attempt {
        source: &context.bound.source,
        channel: context.bound.channel.as_mut(),
        session: session.as_ref(),
        txn_number: None,
        read_preference: Some(&read_preference),
        retryability: Retryability::Read,
        fail_on_retryable_write_concern_error: false,
    };
    send_attempt(op, attempt, cancellation).await
}

async fn write_attempt<T: Operation>(
    op: &mut T,
    context: &mut RetryableWriteContext<'_>,
    session: Option<&Arc<dyn Session>>,
    txn_number: Option<i64>,
    fail_on_retryable_write_concern_error: bool,
    cancellation: &CancellationToken,
) -> Result<T::O> {
    let retryability = op.retryability();
    let attempt = Attempt {
        source: &context.bound.source,
        channel: context.bound.channel.as_mut(),
        session,
        txn_number,
        read_preference: None,
        retryability,
        fail_on_retryable_write_concern_error,
    };
    send_attempt(op, attempt, cancellation).await
}

/// Everything one attempt needs besides the operation.
struct Attempt<'a> {
    source: &'a Arc<dyn ChannelSource>,
    channel: &'a mut dyn Channel,
    session: Option<&'a Arc<dyn Session>>,
    txn_number: Option<i64>,
    read_preference: Option<&'a ReadPreference>,
    retryability: Retryability,

    /// Set on the first attempt of a retryable write, so that a write concern error the server
    /// labelled retryable leads to a retry instead of being reported with the result.
    fail_on_retryable_write_concern_error: bool,
}

async fn send_attempt<T: Operation>(
    op: &mut T,
    attempt: Attempt<'_>,
    cancellation: &CancellationToken,
) -> Result<T::O> {
    if cancellation.is_cancelled() {
        return Err(Error::cancelled());
    }

    let description = attempt.channel.description().clone();
    let mut command = op.build(&description)?;
    if let Some(session) = attempt.session {
        command.set_session(session.as_ref());
    }
    if let Some(txn_number) = attempt.txn_number {
        command.set_txn_number(txn_number);
    }
    if let Some(read_preference) = attempt.read_preference {
        if description.initial_server_type == ServerType::Mongos
            && *read_preference != ReadPreference::Primary
        {
            command.set_read_preference(read_preference.clone());
        }
    }

    let command_name = command.name.clone();
    let should_redact = command.should_redact();
    trace::command_started(&command, &description);

    let start_time = Instant::now();
    let channel = attempt.channel;
    let result = tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(Error::cancelled()),
        response = channel.send_command(command) => response,
    };
    let result = result.and_then(|response| {
        check_response(
            &response,
            &description,
            attempt.retryability,
            attempt.fail_on_retryable_write_concern_error,
        )?;
        Ok(response)
    });
    let duration = start_time.elapsed();

    match result {
        Ok(response) => {
            trace::command_succeeded(&command_name, should_redact, &response, duration);
            let context = ExecutionContext {
                channel_source: attempt.source,
                description: &description,
                session: attempt.session,
            };
            op.handle_response(response, context).map_err(|mut error| {
                label_error(&mut error, &description, attempt.retryability);
                error
            })
        }
        Err(mut error) => {
            label_error(&mut error, &description, attempt.retryability);
            trace::command_failed(&command_name, &error, duration);
            op.handle_error(error)
        }
    }
}

/// Turns a reply with `ok: 0` into a command error. Also turns a write concern error into an error
/// when the caller asked for that and the error is retryable.
fn check_response(
    response: &RawCommandResponse,
    description: &StreamDescription,
    retryability: Retryability,
    fail_on_retryable_write_concern_error: bool,
) -> Result<()> {
    let ok = response.raw_body().get("ok")?.and_then(get_int_raw);
    if ok != Some(1) {
        let body: CommandErrorBody = response.body()?;
        let mut error = Error::from(body);
        error.rewrite_unsupported_retryable_write();
        return Err(error);
    }

    if fail_on_retryable_write_concern_error {
        let body: WriteConcernOnlyBody = response.body()?;
        if let Err(mut error) = body.validate() {
            label_error(&mut error, description, retryability);
            if error.is_write_retryable() {
                return Err(error);
            }
        }
    }
    Ok(())
}

fn label_error(error: &mut Error, description: &StreamDescription, retryability: Retryability) {
    error.wire_version = description.max_wire_version;
    if retryability == Retryability::Write
        && error.should_add_retryable_write_label(description.max_wire_version.unwrap_or(0))
    {
        error.add_label(RETRYABLE_WRITE_ERROR);
    }
}

fn in_transaction(session: Option<&Arc<dyn Session>>) -> bool {
    session.is_some_and(|session| session.is_in_transaction())
}

/// The outcome of a retried operation. A failed retry reports the first attempt's error, which
/// says more about what went wrong, unless the retry itself lost its connection or was cancelled.
fn resolve_retry<O>(name: &str, first_error: Error, retry_result: Result<O>) -> Result<O> {
    match retry_result {
        Ok(output) => Ok(output),
        Err(error) if error.is_network_error() || error.is_cancelled() => Err(error),
        Err(error) => {
            tracing::debug!(
                target: RETRY_TRACING_EVENT_TARGET,
                commandName = name,
                retryError = %error,
                "Retry failed; reporting the error of the first attempt"
            );
            Err(first_error)
        }
    }
}

fn log_retry(name: &str, error: &Error) {
    tracing::debug!(
        target: RETRY_TRACING_EVENT_TARGET,
        commandName = name,
        error = %error,
        "Retrying operation"
    );
}

fn abandon_retry(name: &str, error: &Error, reason: &str) {
    tracing::warn!(
        target: RETRY_TRACING_EVENT_TARGET,
        commandName = name,
        error = %error,
        reason,
        "Not retrying operation"
    );
}
