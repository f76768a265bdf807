use std::fmt;

use mailbox_es::{Aggregate, CommandHandler, Context, History, NonEmpty};

/// An aggregate given past events.
pub struct GivenTest<A>
where
    A: Aggregate,
{
    id: A::Id,
    aggregate: A,
    history: History<A::Event>,
}

/// An aggregate after a command was handled.
pub struct WhenTest<A>
where
    A: Aggregate,
{
    given: GivenTest<A>,
    result: Result<Vec<A::Event>, A::Error>,
}

/// Given events for an aggregate.
pub trait Given: Aggregate {
    /// Given a single event for an aggregate.
    fn given(id: impl Into<Self::Id>, event: Self::Event) -> GivenTest<Self> {
        Self::given_events(id, vec![event])
    }

    /// Given events for an aggregate.
    ///
    /// # Panics
    ///
    /// Panics if the events do not form a valid history.
    fn given_events(id: impl Into<Self::Id>, events: Vec<Self::Event>) -> GivenTest<Self> {
        let id = id.into();
        let history = History::of(events).expect("given events must form a valid history");
        GivenTest {
            aggregate: Self::load(id.clone(), &history),
            id,
            history,
        }
    }

    /// Given no events for an aggregate.
    fn given_no_events(id: impl Into<Self::Id>) -> GivenTest<Self> {
        let id = id.into();
        GivenTest {
            aggregate: Self::new(id.clone()),
            id,
            history: History::empty(),
        }
    }
}

impl<A> Given for A where A: Aggregate {}

impl<A> GivenTest<A>
where
    A: Aggregate,
{
    /// When a command is handled by `handler`.
    pub fn when<C>(self, handler: &impl CommandHandler<A, C>, command: C) -> WhenTest<A> {
        let mut ctx = Context::new(&self.id, self.history.next_event_id());
        let result = handler.handle(&mut ctx, &self.aggregate, command);
        WhenTest {
            given: self,
            result,
        }
    }

    /// Given previous events, the aggregate should equal the given state.
    pub fn should_eq<S>(self, state: S) -> Self
    where
        A: fmt::Debug + PartialEq<S>,
        S: fmt::Debug,
    {
        assert_eq!(self.aggregate, state);
        self
    }

    /// The folded aggregate.
    pub fn state(&self) -> &A {
        &self.aggregate
    }

    /// Consumes the test, returning the folded aggregate.
    pub fn into_state(self) -> A {
        self.aggregate
    }

    /// The events the aggregate was folded from.
    pub fn history(&self) -> &History<A::Event> {
        &self.history
    }
}

impl<A> WhenTest<A>
where
    A: Aggregate,
{
    /// Get the inner result from the previous when() action.
    pub fn into_result(self) -> Result<Vec<A::Event>, A::Error> {
        self.result
    }

    /// Then the result of the previous when() action should equal `result`.
    pub fn then(self, result: Result<Vec<A::Event>, A::Error>) -> Self
    where
        A::Error: PartialEq,
    {
        assert_eq!(self.result, result);
        self
    }

    /// Then the command should succeed with `events`. The events are applied
    /// so further commands can be chained.
    ///
    /// # Panics
    ///
    /// Panics if the result differs, or if the events do not continue the
    /// history.
    pub fn then_ok(self, events: Vec<A::Event>) -> GivenTest<A>
    where
        A::Error: fmt::Debug,
    {
        match self.result {
            Ok(emitted) => {
                assert_eq!(emitted, events);
                self.given.apply(emitted)
            }
            Err(err) => panic!("expected events {events:?}, got error {err:?}"),
        }
    }

    /// Then the command should succeed, whatever it emitted. The events are
    /// applied so further commands can be chained.
    pub fn then_apply(self) -> GivenTest<A>
    where
        A::Error: fmt::Debug,
    {
        match self.result {
            Ok(emitted) => self.given.apply(emitted),
            Err(err) => panic!("expected events, got error {err:?}"),
        }
    }

    /// Then the command should be rejected with `error`, leaving the
    /// aggregate unchanged.
    pub fn then_err(self, error: A::Error) -> GivenTest<A>
    where
        A::Error: fmt::Debug + PartialEq,
    {
        match self.result {
            Ok(events) => panic!("expected error {error:?}, got events {events:?}"),
            Err(err) => assert_eq!(err, error),
        }
        self.given
    }

    /// Then the command should succeed without emitting anything.
    pub fn then_no_events(self) -> GivenTest<A>
    where
        A::Error: fmt::Debug,
    {
        self.then_ok(Vec::new())
    }
}

impl<A> GivenTest<A>
where
    A: Aggregate,
{
    fn apply(mut self, events: Vec<A::Event>) -> Self {
        if let Some(events) = NonEmpty::new(events) {
            self.history = self
                .history
                .append(&events)
                .expect("emitted events must continue the history");
            self.aggregate = A::load(self.id.clone(), &self.history);
        }
        self
    }
}
