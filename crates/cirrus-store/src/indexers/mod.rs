//! Concrete cross-account indexes.

mod account_orgs;
mod principal_trusts;
mod resource_accounts;

pub use account_orgs::{AccountOrganizationIndexer, OrgMembership, ACCOUNTS_TO_ORGS};
pub use principal_trusts::{
    PrincipalTrustIndexer, TrustIndex, PRINCIPALS_TO_TRUSTING_ROLES, TRUST_POLICY_ASPECT,
};
pub use resource_accounts::{KeyBy, ResourceAccountIndexer, ResourceOwner, BUCKETS_TO_ACCOUNTS};
