// Evaluation context and host-supplied collaborators

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::value::JValue;

/// A failure reported by the host while answering a lookup.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct HostError(pub String);

/// Source of the current time for `date.now` and `ics`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Source of randomness for the `random.*` operators and `ics` identifiers.
pub trait Entropy: Send + Sync {
    /// A uniformly distributed float in `[0, 1)`.
    fn next_f64(&self) -> f64;
}

/// Translated messages for `string.format` and `translate`.
pub trait MessageSource: Send + Sync {
    /// Look up a message by id.
    ///
    /// `Ok(None)` means the id is unknown; `Err` means the lookup itself
    /// failed, for instance because no table exists for the app's locale.
    fn message(&self, id: &str) -> Result<Option<String>, HostError>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A lazily-initialized, thread-local CSPRNG seeded by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadEntropy;

impl Entropy for ThreadEntropy {
    fn next_f64(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// A deterministic generator for reproducible evaluations.
pub struct SeededEntropy(Mutex<StdRng>);

impl SeededEntropy {
    pub fn new(seed: u64) -> Self {
        SeededEntropy(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl fmt::Debug for SeededEntropy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SeededEntropy").finish()
    }
}

impl Entropy for SeededEntropy {
    fn next_f64(&self) -> f64 {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random::<f64>()
    }
}

/// A message source that knows no messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMessages;

impl MessageSource for NoMessages {
    fn message(&self, _id: &str) -> Result<Option<String>, HostError> {
        Ok(None)
    }
}

/// An in-memory message table for one locale.
#[derive(Debug, Default, Clone)]
pub struct StaticMessages(pub IndexMap<String, String>);

impl StaticMessages {
    pub fn new() -> Self {
        StaticMessages(IndexMap::new())
    }

    pub fn with(mut self, id: impl Into<String>, message: impl Into<String>) -> Self {
        self.0.insert(id.into(), message.into());
        self
    }
}

impl MessageSource for StaticMessages {
    fn message(&self, id: &str) -> Result<Option<String>, HostError> {
        Ok(self.0.get(id).cloned())
    }
}

/// Read-only data supplied by the host for one evaluation request.
///
/// `user`, `app`, `page`, `context` and `steps` are opaque JSON objects
/// looked up by key. The clock, entropy and message collaborators are
/// injectable so tests can make evaluation reproducible.
#[derive(Clone)]
pub struct External {
    user: JValue,
    app: JValue,
    page: JValue,
    context: JValue,
    steps: JValue,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn Entropy>,
    messages: Arc<dyn MessageSource>,
}

impl External {
    pub fn new() -> Self {
        External {
            user: JValue::Undefined,
            app: JValue::Undefined,
            page: JValue::Undefined,
            context: JValue::Undefined,
            steps: JValue::Undefined,
            clock: Arc::new(SystemClock),
            entropy: Arc::new(ThreadEntropy),
            messages: Arc::new(NoMessages),
        }
    }

    /// User profile fields read by `user`.
    pub fn with_user(mut self, user: impl Into<JValue>) -> Self {
        self.user = user.into();
        self
    }

    /// App metadata read by `app`: `id`, `locale` and `url`.
    pub fn with_app(mut self, app: impl Into<JValue>) -> Self {
        self.app = app.into();
        self
    }

    /// Page metadata read by `page`: `data` and `url`.
    pub fn with_page(mut self, page: impl Into<JValue>) -> Self {
        self.page = page.into();
        self
    }

    /// Action-scoped data read by `context`.
    pub fn with_context(mut self, context: impl Into<JValue>) -> Self {
        self.context = context.into();
        self
    }

    /// Flow step data read by `step`.
    pub fn with_steps(mut self, steps: impl Into<JValue>) -> Self {
        self.steps = steps.into();
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_entropy(mut self, entropy: impl Entropy + 'static) -> Self {
        self.entropy = Arc::new(entropy);
        self
    }

    /// Share an entropy source with the caller, e.g. to inspect it afterwards.
    pub fn with_shared_entropy(mut self, entropy: Arc<dyn Entropy>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn with_messages(mut self, messages: impl MessageSource + 'static) -> Self {
        self.messages = Arc::new(messages);
        self
    }

    pub fn user(&self) -> &JValue {
        &self.user
    }

    pub fn app(&self) -> &JValue {
        &self.app
    }

    pub fn page(&self) -> &JValue {
        &self.page
    }

    pub fn context(&self) -> &JValue {
        &self.context
    }

    pub fn steps(&self) -> &JValue {
        &self.steps
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn entropy(&self) -> &dyn Entropy {
        self.entropy.as_ref()
    }

    pub fn messages(&self) -> &dyn MessageSource {
        self.messages.as_ref()
    }
}

impl Default for External {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for External {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("External")
            .field("user", &self.user)
            .field("app", &self.app)
            .field("page", &self.page)
            .field("context", &self.context)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

/// Position inside the innermost enclosing `array.map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayFrame {
    pub index: usize,
    pub length: usize,
}

/// Evaluation context
///
/// An immutable snapshot for one evaluation step. Operators that need a
/// different input derive a new context; the parent is never mutated, so
/// sibling iterations of `array.map` cannot observe each other's frames.
#[derive(Debug, Clone)]
pub struct EvaluationContext<'a> {
    input: JValue,
    root: JValue,
    history: &'a [JValue],
    array: Option<ArrayFrame>,
    external: &'a External,
}

impl<'a> EvaluationContext<'a> {
    /// Start a top-level evaluation. The root is the input itself and the
    /// history is empty.
    pub fn new(input: impl Into<JValue>, external: &'a External) -> Self {
        let input = input.into();
        EvaluationContext {
            root: input.clone(),
            input,
            history: &[],
            array: None,
            external,
        }
    }

    /// Attach the history recorded by the action chain so far, oldest first.
    pub fn with_history(mut self, history: &'a [JValue]) -> Self {
        self.history = history;
        self
    }

    /// Override the root of the evaluation chain.
    pub fn with_root(mut self, root: impl Into<JValue>) -> Self {
        self.root = root.into();
        self
    }

    /// A child context evaluating against `input`, keeping every other field.
    pub fn derive(&self, input: JValue) -> Self {
        EvaluationContext {
            input,
            root: self.root.clone(),
            history: self.history,
            array: self.array,
            external: self.external,
        }
    }

    /// A child context for one `array.map` element, shadowing any outer frame.
    pub fn derive_frame(&self, input: JValue, frame: ArrayFrame) -> Self {
        EvaluationContext {
            array: Some(frame),
            ..self.derive(input)
        }
    }

    pub fn input(&self) -> &JValue {
        &self.input
    }

    pub fn root(&self) -> &JValue {
        &self.root
    }

    pub fn history(&self) -> &'a [JValue] {
        self.history
    }

    /// History entry `index`, where 0 is the oldest. Out of range is undefined.
    pub fn history_at(&self, index: usize) -> JValue {
        self.history.get(index).cloned().unwrap_or(JValue::Undefined)
    }

    pub fn array_frame(&self) -> Option<ArrayFrame> {
        self.array
    }

    pub fn external(&self) -> &'a External {
        self.external
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_context_roots_at_input() {
        let external = External::new();
        let ctx = EvaluationContext::new(JValue::from(5i64), &external);
        assert_eq!(ctx.input(), &JValue::from(5i64));
        assert_eq!(ctx.root(), &JValue::from(5i64));
        assert!(ctx.history().is_empty());
        assert_eq!(ctx.array_frame(), None);
    }

    #[test]
    fn test_derive_keeps_root_and_history() {
        let external = External::new();
        let history = vec![JValue::from(1i64), JValue::from(2i64)];
        let ctx = EvaluationContext::new(JValue::from("root"), &external).with_history(&history);

        let child = ctx.derive(JValue::from("child"));
        assert_eq!(child.input(), &JValue::from("child"));
        assert_eq!(child.root(), &JValue::from("root"));
        assert_eq!(child.history_at(1), JValue::from(2i64));
        assert_eq!(child.history_at(2), JValue::Undefined);
    }

    #[test]
    fn test_frames_shadow_without_mutating_parent() {
        let external = External::new();
        let ctx = EvaluationContext::new(JValue::Null, &external);
        let outer = ctx.derive_frame(JValue::Null, ArrayFrame { index: 1, length: 3 });
        let inner = outer.derive_frame(JValue::Null, ArrayFrame { index: 0, length: 2 });

        assert_eq!(inner.array_frame(), Some(ArrayFrame { index: 0, length: 2 }));
        assert_eq!(outer.array_frame(), Some(ArrayFrame { index: 1, length: 3 }));
        assert_eq!(ctx.array_frame(), None);
    }

    #[test]
    fn test_seeded_entropy_is_reproducible() {
        let a = SeededEntropy::new(7);
        let b = SeededEntropy::new(7);
        for _ in 0..5 {
            let x = a.next_f64();
            assert_eq!(x, b.next_f64());
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_fixed_clock() {
        let at = Utc.with_ymd_and_hms(2020, 5, 17, 8, 30, 0).unwrap();
        let external = External::new().with_clock(FixedClock(at));
        assert_eq!(external.clock().now(), at);
    }

    #[test]
    fn test_static_messages() {
        let messages = StaticMessages::new().with("greeting", "Hello {name}");
        assert_eq!(
            messages.message("greeting"),
            Ok(Some("Hello {name}".to_string()))
        );
        assert_eq!(messages.message("missing"), Ok(None));
    }

    #[test]
    fn test_external_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<External>();
    }
}
