//! Lifecycle callbacks.
//!
//! Callbacks are registered per [`Phase`] on a schema and run in registration order.
//! Every invocation returns a [`Flow`]; a `Halt` from a before-phase callback makes the
//! surrounding save or destroy return `false` without raising an error.
//!
//! Around callbacks wrap the create, update, save and destroy phases. They receive a
//! [`Continuation`] and must call it once to proceed:
//!
//! ```ignore
//! use futures::FutureExt;
//! use docmapper::callbacks::{AroundPhase, Flow};
//!
//! let schema = Schema::builder("Post")
//!     .around(AroundPhase::Save, |doc, proceed| async move {
//!         doc.write("saving", true);
//!         let flow = proceed(&mut *doc).await?;
//!         doc.write("saving", false);
//!         Ok(flow)
//!     }.boxed())
//!     .build();
//! ```

use futures::future::BoxFuture;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{document::Document, error::MapperResult};

/// Result of a callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

impl Flow {
    pub fn is_halt(self) -> bool {
        self == Flow::Halt
    }
}

impl From<()> for Flow {
    fn from(_: ()) -> Self {
        Flow::Continue
    }
}

/// `false` halts, `true` continues.
impl From<bool> for Flow {
    fn from(proceed: bool) -> Self {
        if proceed { Flow::Continue } else { Flow::Halt }
    }
}

/// Callback phases, listed in the order a save runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    BeforeValidation,
    AfterValidation,
    BeforeSave,
    BeforeCreate,
    BeforeUpdate,
    AfterCreate,
    AfterUpdate,
    AfterSave,
    BeforeDestroy,
    AfterDestroy,
    BeforeTouch,
    AfterTouch,
    AfterInitialize,
    AfterFind,
}

impl Phase {
    /// Whether a halt in this phase fails the operation.
    pub fn is_before(self) -> bool {
        matches!(
            self,
            Phase::BeforeValidation
                | Phase::BeforeSave
                | Phase::BeforeCreate
                | Phase::BeforeUpdate
                | Phase::BeforeDestroy
                | Phase::BeforeTouch
        )
    }
}

/// Phases an around callback can wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AroundPhase {
    Save,
    Create,
    Update,
    Destroy,
}

pub type Guard = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

type Handler = Arc<dyn Fn(&mut Document) -> Flow + Send + Sync>;

/// The rest of a wrapped phase. Call it once to proceed.
pub type Continuation =
    Box<dyn for<'d> FnOnce(&'d mut Document) -> BoxFuture<'d, MapperResult<Flow>> + Send>;

type AroundHandler = Arc<
    dyn for<'d> Fn(&'d mut Document, Continuation) -> BoxFuture<'d, MapperResult<Flow>> + Send + Sync,
>;

/// Wraps a closure as a [`Continuation`].
pub fn continuation<F>(next: F) -> Continuation
where
    F: for<'d> FnOnce(&'d mut Document) -> BoxFuture<'d, MapperResult<Flow>> + Send + 'static,
{
    Box::new(next)
}

#[derive(Clone, Default)]
struct Guards {
    when: Vec<Guard>,
    unless: Vec<Guard>,
}

impl Guards {
    fn allow(&self, document: &Document) -> bool {
        self.when.iter().all(|guard| guard(document))
            && !self.unless.iter().any(|guard| guard(document))
    }
}

/// A registered callback with its guards.
#[derive(Clone)]
pub struct Callback {
    handler: Handler,
    guards: Guards,
}

impl Callback {
    pub fn new<F, R>(handler: F) -> Self
    where
        F: Fn(&mut Document) -> R + Send + Sync + 'static,
        R: Into<Flow>,
    {
        Self {
            handler: Arc::new(move |document: &mut Document| handler(document).into()),
            guards: Guards::default(),
        }
    }

    /// Runs the callback only when the predicate holds.
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.guards.when.push(Arc::new(predicate));
        self
    }

    /// Skips the callback when the predicate holds.
    pub fn unless<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.guards.unless.push(Arc::new(predicate));
        self
    }

    fn invoke(&self, document: &mut Document) -> Flow {
        if self.guards.allow(document) {
            (self.handler)(document)
        } else {
            Flow::Continue
        }
    }
}

/// A registered around callback with its guards.
#[derive(Clone)]
pub struct AroundCallback {
    handler: AroundHandler,
    guards: Guards,
}

impl AroundCallback {
    pub fn new<F>(handler: F) -> Self
    where
        F: for<'d> Fn(&'d mut Document, Continuation) -> BoxFuture<'d, MapperResult<Flow>>
            + Send
            + Sync
            + 'static,
    {
        Self { handler: Arc::new(handler), guards: Guards::default() }
    }

    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.guards.when.push(Arc::new(predicate));
        self
    }

    pub fn unless<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.guards.unless.push(Arc::new(predicate));
        self
    }
}

/// Every callback of a schema, by phase.
#[derive(Clone, Default)]
pub struct CallbackChain {
    callbacks: HashMap<Phase, Vec<Callback>>,
    around: HashMap<AroundPhase, Vec<AroundCallback>>,
}

impl CallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, phase: Phase, callback: Callback) {
        self.callbacks
            .entry(phase)
            .or_default()
            .push(callback);
    }

    pub fn register_around(&mut self, phase: AroundPhase, callback: AroundCallback) {
        self.around
            .entry(phase)
            .or_default()
            .push(callback);
    }

    /// Runs the callbacks of a phase in registration order.
    ///
    /// Only before-phases halt: the first `Flow::Halt` there stops the chain. Every
    /// other phase runs all of its callbacks and always continues.
    pub fn run(&self, phase: Phase, document: &mut Document) -> Flow {
        for callback in self.callbacks.get(&phase).into_iter().flatten() {
            if callback.invoke(document).is_halt() && phase.is_before() {
                tracing::debug!(?phase, schema = document.schema().name(), "callback chain halted");
                return Flow::Halt;
            }
        }

        Flow::Continue
    }

    /// Nests the around callbacks of a phase around `inner`.
    ///
    /// The first registered callback is the outermost. A callback whose guards reject
    /// the document is skipped and the chain proceeds straight to the next layer.
    pub fn wrap(&self, phase: AroundPhase, inner: Continuation) -> Continuation {
        self.around
            .get(&phase)
            .into_iter()
            .flatten()
            .rev()
            .cloned()
            .fold(inner, |next, around| {
                continuation(move |document| {
                    if around.guards.allow(document) {
                        (around.handler)(document, next)
                    } else {
                        next(document)
                    }
                })
            })
    }

    pub fn len(&self, phase: Phase) -> usize {
        self.callbacks.get(&phase).map_or(0, Vec::len)
    }
}

impl fmt::Debug for CallbackChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self
            .callbacks
            .iter()
            .map(|(phase, callbacks)| (*phase, callbacks.len()))
            .collect();
        counts.sort_by_key(|(phase, _)| *phase as u8);

        f.debug_struct("CallbackChain")
            .field("callbacks", &counts)
            .field("around", &self.around.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::MapperError, schema::Schema, types::KeyType};
    use bson::Bson;
    use futures::{FutureExt, executor::block_on};
    use std::sync::Mutex;

    fn document() -> Document {
        let schema = Schema::builder("Note").key("body", KeyType::String).build();
        Document::new(&schema)
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, entry: &'static str) -> Callback {
        let log = log.clone();
        Callback::new(move |_: &mut Document| log.lock().unwrap().push(entry))
    }

    #[test]
    fn flow_conversions() {
        assert_eq!(Flow::from(()), Flow::Continue);
        assert_eq!(Flow::from(true), Flow::Continue);
        assert_eq!(Flow::from(false), Flow::Halt);
        assert!(Flow::Halt.is_halt());
    }

    #[test]
    fn run_stops_at_the_first_halt() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CallbackChain::new();
        chain.register(Phase::BeforeSave, recorder(&log, "first"));
        chain.register(Phase::BeforeSave, Callback::new(|_: &mut Document| false));
        chain.register(Phase::BeforeSave, recorder(&log, "never"));

        let mut note = document();
        assert_eq!(chain.run(Phase::BeforeSave, &mut note), Flow::Halt);
        assert_eq!(chain.run(Phase::AfterSave, &mut note), Flow::Continue);
        assert_eq!(*log.lock().unwrap(), ["first"]);
        assert_eq!(chain.len(Phase::BeforeSave), 3);
    }

    #[test]
    fn after_phases_ignore_halts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CallbackChain::new();
        chain.register(Phase::AfterCreate, Callback::new(|_: &mut Document| Flow::Halt));
        chain.register(Phase::AfterCreate, recorder(&log, "after_create"));

        let mut note = document();
        assert_eq!(chain.run(Phase::AfterCreate, &mut note), Flow::Continue);
        assert_eq!(*log.lock().unwrap(), ["after_create"]);
    }

    #[test]
    fn guards_skip_callbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CallbackChain::new();
        chain.register(
            Phase::BeforeSave,
            recorder(&log, "with_body").when(|note| note.read("body") != Bson::Null),
        );
        chain.register(
            Phase::BeforeSave,
            recorder(&log, "without_body").unless(|note| note.read("body") != Bson::Null),
        );

        let mut note = document();
        chain.run(Phase::BeforeSave, &mut note);
        note.write("body", "hello");
        chain.run(Phase::BeforeSave, &mut note);
        assert_eq!(*log.lock().unwrap(), ["without_body", "with_body"]);
    }

    #[test]
    fn wrap_nests_the_first_registered_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CallbackChain::new();
        for (before, after) in [("outer_in", "outer_out"), ("inner_in", "inner_out")] {
            let log = log.clone();
            chain.register_around(
                AroundPhase::Save,
                AroundCallback::new(move |document, proceed| {
                    let log = log.clone();
                    async move {
                        log.lock().unwrap().push(before);
                        let flow = proceed(&mut *document).await?;
                        log.lock().unwrap().push(after);
                        Ok::<_, MapperError>(flow)
                    }
                    .boxed()
                }),
            );
        }

        let core = log.clone();
        let wrapped = chain.wrap(
            AroundPhase::Save,
            continuation(move |_| {
                core.lock().unwrap().push("core");
                async { Ok::<_, MapperError>(Flow::Continue) }.boxed()
            }),
        );

        let mut note = document();
        let flow = block_on(wrapped(&mut note)).unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            *log.lock().unwrap(),
            ["outer_in", "inner_in", "core", "inner_out", "outer_out"]
        );
    }

    #[test]
    fn a_guarded_around_callback_is_bypassed() {
        let mut chain = CallbackChain::new();
        chain.register_around(
            AroundPhase::Destroy,
            AroundCallback::new(|_, _| async { Ok::<_, MapperError>(Flow::Halt) }.boxed()).unless(|_| true),
        );

        let wrapped = chain.wrap(
            AroundPhase::Destroy,
            continuation(|_| async { Ok::<_, MapperError>(Flow::Continue) }.boxed()),
        );

        let mut note = document();
        assert_eq!(block_on(wrapped(&mut note)).unwrap(), Flow::Continue);
    }
}
