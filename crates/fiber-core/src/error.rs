//! Error values produced by the reconciler.
//!
//! Three layers exist: [`NodeError`] for host-tree lookups, [`CapturedError`]
//! for failures raised by user components (render, lifecycles, effects), and
//! [`ReconcileError`] for everything that escapes a root and surfaces to the
//! embedding application.

use std::fmt;
use std::rc::Rc;

use crate::applier::HostId;
use crate::thenable::Thenable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    Missing { id: HostId },
    TypeMismatch { id: HostId, expected: &'static str },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Missing { id } => write!(f, "host node {} missing", id.raw()),
            NodeError::TypeMismatch { id, expected } => {
                write!(f, "host node {} type mismatch; expected {expected}", id.raw())
            }
        }
    }
}

impl std::error::Error for NodeError {}

/// A failure raised by user code, together with the component stack that was
/// being rendered when it was captured.
#[derive(Clone)]
pub struct CapturedError {
    inner: Rc<CapturedErrorInner>,
}

struct CapturedErrorInner {
    message: String,
    component_stack: Vec<String>,
}

impl CapturedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(CapturedErrorInner {
                message: message.into(),
                component_stack: Vec::new(),
            }),
        }
    }

    pub(crate) fn with_component_stack(&self, component_stack: Vec<String>) -> Self {
        Self {
            inner: Rc::new(CapturedErrorInner {
                message: self.inner.message.clone(),
                component_stack,
            }),
        }
    }

    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Innermost component first.
    pub fn component_stack(&self) -> &[String] {
        &self.inner.component_stack
    }

    pub fn ptr_eq(&self, other: &CapturedError) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedError")
            .field("message", &self.inner.message)
            .field("component_stack", &self.inner.component_stack)
            .finish()
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.message)?;
        for name in &self.inner.component_stack {
            write!(f, "\n    in {name}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CapturedError {}

impl From<&str> for CapturedError {
    fn from(message: &str) -> Self {
        CapturedError::new(message)
    }
}

impl From<String> for CapturedError {
    fn from(message: String) -> Self {
        CapturedError::new(message)
    }
}

/// Control-flow value a component hands back instead of children.
///
/// `Suspend` asks the nearest Suspense boundary to show its fallback until the
/// thenable settles. `Error` is routed to the nearest error boundary.
#[derive(Clone, Debug)]
pub enum Thrown {
    Suspend(Thenable),
    Error(CapturedError),
}

impl Thrown {
    pub fn error(message: impl Into<String>) -> Self {
        Thrown::Error(CapturedError::new(message))
    }
}

impl From<CapturedError> for Thrown {
    fn from(error: CapturedError) -> Self {
        Thrown::Error(error)
    }
}

impl From<Thenable> for Thrown {
    fn from(thenable: Thenable) -> Self {
        Thrown::Suspend(thenable)
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileError {
    /// Too many synchronous updates were scheduled from within commit.
    NestedUpdateLimit { limit: u32 },
    /// An error reached a root without an error boundary to handle it.
    Uncaught(CapturedError),
    /// The render entry point was re-entered while already rendering or committing.
    AlreadyWorking,
    UnknownRoot,
    Host(NodeError),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::NestedUpdateLimit { limit } => write!(
                f,
                "maximum update depth exceeded ({limit} nested synchronous updates); \
                 a component repeatedly schedules updates from its lifecycle or layout effects"
            ),
            ReconcileError::Uncaught(error) => write!(f, "uncaught error: {error}"),
            ReconcileError::AlreadyWorking => {
                f.write_str("should not already be working: render or commit was re-entered")
            }
            ReconcileError::UnknownRoot => f.write_str("root is not mounted"),
            ReconcileError::Host(error) => write!(f, "host error: {error}"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Uncaught(error) => Some(error),
            ReconcileError::Host(error) => Some(error),
            _ => None,
        }
    }
}

impl From<NodeError> for ReconcileError {
    fn from(error: NodeError) -> Self {
        ReconcileError::Host(error)
    }
}

pub(crate) const SUSPENDED_WITHOUT_FALLBACK: &str =
    "a component suspended while rendering, but no fallback UI was specified; \
     add a Suspense boundary higher in the tree to provide a loading indicator";

pub(crate) fn invalid_element_type(description: &str) -> CapturedError {
    CapturedError::new(format!(
        "element type is invalid: lazy element resolved to {description}; \
         a lazy element type must resolve to a class or function"
    ))
}
