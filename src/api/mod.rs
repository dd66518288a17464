//! Management API: expectation registration, journal queries, verification,
//! and lifecycle operations over HTTP.

mod handlers;
mod router;
mod types;

pub use router::{parse_management_path, route, ManagementOp};
pub use types::{
    ClearType, PortBindingBody, RetrieveFormat, VerifyBody, VerifySequenceBody,
};
