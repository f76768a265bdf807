use std::marker::PhantomData;

use crate::{Aggregate, AggregateId, EventId};

/// A request to change the state of one aggregate.
pub trait Command: Send + 'static {
    /// The id type of the targeted aggregate.
    type AggregateId: AggregateId;

    /// Name under which a handler for this command is registered.
    fn command_type(&self) -> &'static str;

    /// The targeted aggregate.
    fn aggregate_id(&self) -> &Self::AggregateId;
}

/// Decides which events a command produces, given the current state of its
/// aggregate.
///
/// Handlers are pure: loading the history and appending the events is done by
/// the [`EventSourcingSystem`](crate::EventSourcingSystem).
pub trait CommandHandler<A, C>: Send + Sync
where
    A: Aggregate,
{
    /// The command type this handler is registered for.
    fn command_type(&self) -> &'static str;

    /// Validates `command` against `aggregate` and returns the resulting
    /// events.
    ///
    /// Event ids must be taken from `ctx` so that they continue the
    /// aggregate's history. Returning no events is a successful no-op.
    fn handle(
        &self,
        ctx: &mut Context<'_, A::Id>,
        aggregate: &A,
        command: C,
    ) -> Result<Vec<A::Event>, A::Error>;
}

/// Per-dispatch state handed to a [`CommandHandler`].
#[derive(Debug)]
pub struct Context<'a, I> {
    aggregate_id: &'a I,
    next_event_id: EventId,
}

impl<'a, I> Context<'a, I> {
    /// Creates a context whose first allocated id is `next_event_id`.
    pub fn new(aggregate_id: &'a I, next_event_id: EventId) -> Self {
        Context {
            aggregate_id,
            next_event_id,
        }
    }

    /// The aggregate the command targets.
    pub fn aggregate_id(&self) -> &'a I {
        self.aggregate_id
    }

    /// Allocates the id of the next emitted event.
    pub fn next_event_id(&mut self) -> EventId {
        let event_id = self.next_event_id;
        self.next_event_id = event_id.next();
        event_id
    }

    /// The id the next emitted event would get, without allocating it.
    pub fn peek_event_id(&self) -> EventId {
        self.next_event_id
    }
}

/// A [`CommandHandler`] backed by a function.
pub struct HandlerFn<A, C, F> {
    command_type: &'static str,
    f: F,
    _marker: PhantomData<fn(&A, C)>,
}

/// Creates a [`CommandHandler`] from a function.
pub fn handler_fn<A, C, F>(command_type: &'static str, f: F) -> HandlerFn<A, C, F>
where
    A: Aggregate,
    F: Fn(&mut Context<'_, A::Id>, &A, C) -> Result<Vec<A::Event>, A::Error> + Send + Sync,
{
    HandlerFn {
        command_type,
        f,
        _marker: PhantomData,
    }
}

impl<A, C, F> CommandHandler<A, C> for HandlerFn<A, C, F>
where
    A: Aggregate,
    F: Fn(&mut Context<'_, A::Id>, &A, C) -> Result<Vec<A::Event>, A::Error> + Send + Sync,
{
    fn command_type(&self) -> &'static str {
        self.command_type
    }

    fn handle(
        &self,
        ctx: &mut Context<'_, A::Id>,
        aggregate: &A,
        command: C,
    ) -> Result<Vec<A::Event>, A::Error> {
        (self.f)(ctx, aggregate, command)
    }
}
