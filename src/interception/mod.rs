//! Interceptor chains for the around-construct and around-invoke extension points.
//!
//! A [`ChainBuilder`] orders bindings by ascending [`Priority`]; the resulting
//! [`Chain`] runs each link with an [`Invocation`] whose
//! [`proceed`](Invocation::proceed) continues from the next link and ends in
//! the [`Target`].

mod chain;
mod invocation;
mod registry;

pub use chain::{Chain, ChainBuilder, InterceptionKind, InterceptorBinding, Priority};
pub use invocation::{ChainReport, ChainState, Interceptor, Invocation, InvocationData, Target};
pub use registry::{InterceptionRegistry, QualifierAttributes, TargetId};
