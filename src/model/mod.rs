//! Wire-level data model: request fingerprints, responses, expectations.

mod body;
mod expectation;
mod request;
mod response;
mod times;

pub use body::Body;

pub use expectation::{
    Action, ClassCallbackDef, ErrorAction, ExpectationDef, ForwardTarget, ObjectCallbackDef,
    OverrideForwardDef, RequestOverride, ResponseDefinition, TemplateDef,
};
pub use request::{parse_query, HttpRequest};
pub use response::{Delay, HttpResponse};
pub use times::{Times, VerificationTimes};
