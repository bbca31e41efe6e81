//! Domain model (invocations, outcomes, error records).
//!
//! I/O を持たない純粋な型だけを置きます。

pub mod errors;
pub mod invocation;
pub mod outcome;

pub use errors::{ErrorRecord, Failure, format_failure, format_stack};
pub use invocation::{Invocation, InvocationContext, RequestId};
pub use outcome::{Outcome, OutcomeKind};
