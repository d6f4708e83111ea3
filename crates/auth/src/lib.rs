//! `almox-auth`: pure authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage. Token
//! decoding/verification happens in a `ClaimsProvider` collaborator; business
//! logic only ever sees a typed `ClaimsModel`.

pub mod claims;
pub mod resolver;
pub mod roles;
pub mod template;

pub use claims::{ClaimsError, ClaimsModel, ClaimsProvider, validate_claims};
pub use resolver::{PermissionScope, resolve};
pub use roles::Role;
pub use template::{ResourceId, TemplateCode, TemplateGrant};
