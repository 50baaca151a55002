//! Role, scope and principal types shared between the auth gate, the project
//! authorization checks and the admin gate.

mod principal;
mod role;
mod scope;

pub use principal::Principal;
pub use role::{Role, UnknownRole};
pub use scope::{parse_scope_list, AdminResource, Scope, UnknownScope};
