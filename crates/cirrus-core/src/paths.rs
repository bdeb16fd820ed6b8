//! Logical path layout for the metadata store.
//!
//! Every path-backed store writes under a partition root using the layout
//! below. Resource identifiers are percent-encoded into a single segment so
//! that `/` and `:` in resource names never introduce extra directory levels;
//! the mapping from `(account, arn, aspect)` to a path is therefore injective.
//!
//! ```text
//! {partition}/accounts/{account}/{aspect}.json
//! {partition}/accounts/{account}/resources/{service}/{region}/{type}/{arn}/{aspect}.json
//! {partition}/accounts/{account}/ram/{region}/{arn}.json
//! {partition}/organizations/{org}/{aspect}.json
//! {partition}/organizations/{org}/policies/{policy_type}/{policy_id}/{aspect}.json
//! {partition}/indexes/{name}.json
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arn::Arn;
use crate::error::{Error, Result};
use crate::storage::Segment;

/// Region segment used for resources whose identifier has no region.
pub const GLOBAL_REGION: &str = "global";

/// Type segment used for resources whose identifier has no type.
pub const UNTYPED: &str = "_";

/// Extension appended to every stored blob.
pub const JSON_EXT: &str = ".json";

/// Identifies a slice of the resource space.
///
/// `None` fields act as wildcards for listing and searching. Deleting or
/// syncing a scope only ever touches resources whose path falls under it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeParts {
    /// Service namespace, e.g. `s3`.
    pub service: String,
    /// Resource type, e.g. `role`. `Some("")` selects untyped resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Account scope; `None` matches every account where supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Region; `Some("")` or `Some("global")` selects global resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Equality selectors applied to top-level fields of the `metadata` aspect.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ResourceTypeParts {
    /// Scope covering every resource of a service.
    #[must_use]
    pub fn service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    /// Restricts the scope to a resource type.
    #[must_use]
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Restricts the scope to an account.
    #[must_use]
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Restricts the scope to a region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Adds a metadata equality selector.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the storage segment for the scope's region, if fixed.
    #[must_use]
    pub fn region_segment(&self) -> Option<&str> {
        self.region.as_deref().map(region_segment)
    }

    /// Returns the storage segment for the scope's resource type, if fixed.
    #[must_use]
    pub fn type_segment(&self) -> Option<&str> {
        self.resource_type.as_deref().map(type_segment)
    }

    /// Returns true if `arn` falls inside this scope (ignoring account and
    /// metadata selectors).
    #[must_use]
    pub fn contains(&self, arn: &Arn) -> bool {
        arn.service() == self.service
            && self
                .region_segment()
                .is_none_or(|r| r == region_segment(arn.region()))
            && self
                .type_segment()
                .is_none_or(|t| t == type_segment(arn.resource_type()))
    }

    /// Returns true if a `metadata` aspect value satisfies every selector.
    #[must_use]
    pub fn matches_metadata(&self, metadata: &serde_json::Value) -> bool {
        self.metadata.iter().all(|(key, expected)| match metadata.get(key) {
            Some(serde_json::Value::String(actual)) => actual == expected,
            Some(other) => other.to_string() == *expected,
            None => false,
        })
    }
}

/// Maps an ARN region to its storage segment.
#[must_use]
pub fn region_segment(region: &str) -> &str {
    if region.is_empty() {
        GLOBAL_REGION
    } else {
        region
    }
}

/// Maps an ARN resource type to its storage segment.
#[must_use]
pub fn type_segment(resource_type: &str) -> &str {
    if resource_type.is_empty() {
        UNTYPED
    } else {
        resource_type
    }
}

/// Encodes a resource identifier into a single path segment.
#[must_use]
pub fn encode_id(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

/// Decodes a segment produced by [`encode_id`].
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the segment is not valid UTF-8 after decoding.
pub fn decode_id(segment: &str) -> Result<String> {
    urlencoding::decode(segment)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| Error::InvalidInput(format!("undecodable path segment {segment}: {e}")))
}

/// Validates a caller-supplied value for use as a single path segment.
///
/// # Errors
///
/// Returns [`Error::InvalidId`] if the value is empty, contains separators or
/// control characters, is a traversal segment, or starts with `.` (reserved
/// for backend bookkeeping files).
pub fn validate_segment(value: &str, field: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidId {
            message: format!("{field} cannot be empty"),
        });
    }

    if value.contains('/') || value.contains('\\') {
        return Err(Error::InvalidId {
            message: format!("{field} cannot contain path separators: {value}"),
        });
    }

    if value.chars().any(char::is_control) {
        return Err(Error::InvalidId {
            message: format!("{field} cannot contain control characters"),
        });
    }

    if value.starts_with('.') {
        return Err(Error::InvalidId {
            message: format!("{field} cannot start with '.': {value}"),
        });
    }

    Ok(())
}

/// Joins path segments with `/`, skipping empty segments.
#[must_use]
pub fn join<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for segment in segments {
        let segment = segment.as_ref().trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// Path builder for one partition of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    partition: String,
}

impl StorePaths {
    /// Creates the layout for `partition`.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition is not a valid path segment.
    pub fn new(partition: impl Into<String>) -> Result<Self> {
        let partition = partition.into();
        validate_segment(&partition, "partition")?;
        Ok(Self { partition })
    }

    /// Returns the partition name.
    #[must_use]
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Root directory holding one child per account.
    #[must_use]
    pub fn accounts_dir(&self) -> String {
        join([self.partition.as_str(), "accounts"])
    }

    /// Directory for one account.
    ///
    /// # Errors
    ///
    /// Returns an error if the account id is not a valid segment.
    pub fn account_dir(&self, account: &str) -> Result<String> {
        validate_segment(account, "account")?;
        Ok(join([self.accounts_dir().as_str(), account]))
    }

    /// Path of an account-level aspect.
    ///
    /// # Errors
    ///
    /// Returns an error if the account or aspect is not a valid segment.
    pub fn account_aspect(&self, account: &str, aspect: &str) -> Result<String> {
        validate_segment(aspect, "aspect")?;
        Ok(join([self.account_dir(account)?, aspect_file(aspect)]))
    }

    /// Root of all resources owned by an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the account id is not a valid segment.
    pub fn resources_dir(&self, account: &str) -> Result<String> {
        Ok(join([self.account_dir(account)?.as_str(), "resources"]))
    }

    /// Directory holding every aspect of one resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the account or the ARN's service, region or type
    /// is not a valid segment.
    pub fn resource_dir(&self, account: &str, arn: &Arn) -> Result<String> {
        validate_segment(arn.service(), "service")?;
        validate_segment(region_segment(arn.region()), "region")?;
        validate_segment(type_segment(arn.resource_type()), "resource type")?;
        Ok(join([
            self.resources_dir(account)?.as_str(),
            arn.service(),
            region_segment(arn.region()),
            type_segment(arn.resource_type()),
            encode_id(arn.as_str()).as_str(),
        ]))
    }

    /// Path of one resource aspect.
    ///
    /// # Errors
    ///
    /// Returns an error if any component is not a valid segment.
    pub fn resource_aspect(&self, account: &str, arn: &Arn, aspect: &str) -> Result<String> {
        validate_segment(aspect, "aspect")?;
        Ok(join([self.resource_dir(account, arn)?, aspect_file(aspect)]))
    }

    /// Base directory and segment pattern matching every resource directory
    /// in `scope` for `account` (or every account when `account` is `None`).
    ///
    /// The returned pattern's last segment matches the encoded resource id.
    ///
    /// # Errors
    ///
    /// Returns an error if any fixed component is not a valid segment.
    pub fn resource_pattern(
        &self,
        account: Option<&str>,
        scope: &ResourceTypeParts,
    ) -> Result<(String, Vec<Segment>)> {
        validate_segment(&scope.service, "service")?;
        let mut pattern = Vec::with_capacity(6);
        let base = match account {
            Some(account) => self.resources_dir(account)?,
            None => {
                pattern.push(Segment::Wildcard);
                pattern.push(Segment::literal("resources"));
                self.accounts_dir()
            }
        };
        pattern.push(Segment::literal(scope.service.as_str()));
        pattern.push(fixed_or_wildcard(scope.region_segment(), "region")?);
        pattern.push(fixed_or_wildcard(scope.type_segment(), "resource type")?);
        pattern.push(Segment::Wildcard);
        Ok((base, pattern))
    }

    /// Directory holding RAM share records for one account and region.
    ///
    /// # Errors
    ///
    /// Returns an error if the account or region is not a valid segment.
    pub fn ram_dir(&self, account: &str, region: &str) -> Result<String> {
        let region = region_segment(region);
        validate_segment(region, "region")?;
        Ok(join([self.account_dir(account)?.as_str(), "ram", region]))
    }

    /// Path of one RAM share record.
    ///
    /// # Errors
    ///
    /// Returns an error if the account or region is not a valid segment.
    pub fn ram_resource(&self, account: &str, arn: &Arn) -> Result<String> {
        let file = format!("{}{JSON_EXT}", encode_id(arn.as_str()));
        Ok(join([self.ram_dir(account, arn.region())?, file]))
    }

    /// Directory for one organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the organization id is not a valid segment.
    pub fn organization_dir(&self, org: &str) -> Result<String> {
        validate_segment(org, "organization")?;
        Ok(join([self.partition.as_str(), "organizations", org]))
    }

    /// Path of an organization-level aspect.
    ///
    /// # Errors
    ///
    /// Returns an error if the organization or aspect is not a valid segment.
    pub fn organization_aspect(&self, org: &str, aspect: &str) -> Result<String> {
        validate_segment(aspect, "aspect")?;
        Ok(join([self.organization_dir(org)?, aspect_file(aspect)]))
    }

    /// Directory holding every policy of one type in an organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the organization or policy type is invalid.
    pub fn organization_policies_dir(&self, org: &str, policy_type: &str) -> Result<String> {
        validate_segment(policy_type, "policy type")?;
        Ok(join([
            self.organization_dir(org)?.as_str(),
            "policies",
            policy_type,
        ]))
    }

    /// Path of one organization policy aspect.
    ///
    /// # Errors
    ///
    /// Returns an error if any component is not a valid segment.
    pub fn organization_policy_aspect(
        &self,
        org: &str,
        policy_type: &str,
        policy_id: &str,
        aspect: &str,
    ) -> Result<String> {
        validate_segment(policy_id, "policy id")?;
        validate_segment(aspect, "aspect")?;
        Ok(join([
            self.organization_policies_dir(org, policy_type)?.as_str(),
            policy_id,
            aspect_file(aspect).as_str(),
        ]))
    }

    /// Path of a named index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index name is not a valid segment.
    pub fn index(&self, name: &str) -> Result<String> {
        validate_segment(name, "index name")?;
        Ok(join([
            self.partition.as_str(),
            "indexes",
            format!("{name}{JSON_EXT}").as_str(),
        ]))
    }
}

/// File name for an aspect blob.
#[must_use]
pub fn aspect_file(aspect: &str) -> String {
    format!("{aspect}{JSON_EXT}")
}

fn fixed_or_wildcard(value: Option<&str>, field: &str) -> Result<Segment> {
    match value {
        Some(value) => {
            validate_segment(value, field)?;
            Ok(Segment::literal(value))
        }
        None => Ok(Segment::Wildcard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> StorePaths {
        StorePaths::new("aws").unwrap()
    }

    #[test]
    fn resource_aspect_layout() {
        let arn = Arn::parse("arn:aws:iam::111111111111:role/admin").unwrap();
        let path = paths()
            .resource_aspect("111111111111", &arn, "trust-policy")
            .unwrap();
        assert_eq!(
            path,
            "aws/accounts/111111111111/resources/iam/global/role/\
             arn%3Aaws%3Aiam%3A%3A111111111111%3Arole%2Fadmin/trust-policy.json"
        );
    }

    #[test]
    fn arn_region_must_be_a_single_segment() {
        for raw in ["arn:aws:sqs:..:1:queue", "arn:aws:sqs:a/b:1:queue", "arn:aws:sqs:.hidden:1:queue"] {
            let arn = Arn::parse(raw).unwrap();
            let err = paths().resource_dir("1", &arn).unwrap_err();
            assert!(matches!(err, Error::InvalidId { .. }), "{raw}");
            assert!(paths().resource_aspect("1", &arn, "metadata").is_err(), "{raw}");
        }
    }

    #[test]
    fn slashes_in_resource_names_do_not_add_levels() {
        let a = Arn::parse("arn:aws:iam::1:role/a/b").unwrap();
        let b = Arn::parse("arn:aws:iam::1:role/a%2Fb").unwrap();
        let pa = paths().resource_dir("1", &a).unwrap();
        let pb = paths().resource_dir("1", &b).unwrap();
        assert_ne!(pa, pb);
        assert_eq!(pa.split('/').count(), pb.split('/').count());
    }

    #[test]
    fn encoded_ids_round_trip() {
        let id = "arn:aws:sqs:us-east-1:1:queue/with space";
        assert_eq!(decode_id(&encode_id(id)).unwrap(), id);
    }

    #[test]
    fn untyped_resources_get_reserved_segment() {
        let arn = Arn::parse("arn:aws:s3:::bucket").unwrap();
        let dir = paths().resource_dir("222", &arn).unwrap();
        assert!(dir.starts_with("aws/accounts/222/resources/s3/global/_/"));
    }

    #[test]
    fn resource_pattern_uses_wildcards_for_open_fields() {
        let scope = ResourceTypeParts::service("s3").with_resource_type("");
        let (base, pattern) = paths().resource_pattern(Some("1"), &scope).unwrap();
        assert_eq!(base, "aws/accounts/1/resources");
        assert_eq!(
            pattern,
            vec![
                Segment::literal("s3"),
                Segment::Wildcard,
                Segment::literal("_"),
                Segment::Wildcard,
            ]
        );

        let (base, pattern) = paths().resource_pattern(None, &scope).unwrap();
        assert_eq!(base, "aws/accounts");
        assert_eq!(pattern.len(), 6);
    }

    #[test]
    fn scope_contains_checks_service_region_and_type() {
        let role = Arn::parse("arn:aws:iam::1:role/admin").unwrap();
        assert!(ResourceTypeParts::service("iam").contains(&role));
        assert!(ResourceTypeParts::service("iam")
            .with_region("")
            .with_resource_type("role")
            .contains(&role));
        assert!(!ResourceTypeParts::service("iam")
            .with_resource_type("user")
            .contains(&role));
        assert!(!ResourceTypeParts::service("s3").contains(&role));
    }

    #[test]
    fn metadata_selectors_compare_top_level_fields() {
        let scope = ResourceTypeParts::service("s3").with_metadata("region", "us-east-1");
        assert!(scope.matches_metadata(&serde_json::json!({"region": "us-east-1", "x": 1})));
        assert!(!scope.matches_metadata(&serde_json::json!({"region": "eu-west-1"})));
        assert!(!scope.matches_metadata(&serde_json::json!({})));
    }

    #[test]
    fn rejects_traversal_and_reserved_segments() {
        assert!(paths().account_dir("..").is_err());
        assert!(paths().account_dir("a/b").is_err());
        assert!(paths().index(".hidden").is_err());
        assert!(StorePaths::new("").is_err());
    }

    #[test]
    fn index_path_is_partition_scoped() {
        assert_eq!(
            paths().index("buckets-to-accounts").unwrap(),
            "aws/indexes/buckets-to-accounts.json"
        );
    }
}
