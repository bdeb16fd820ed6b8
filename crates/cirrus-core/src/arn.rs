//! Resource identifier parsing.
//!
//! Resource identifiers follow the ARN shape
//! `arn:{partition}:{service}:{region}:{account}:{resource}`. The resource
//! segment is split into a type (text before the first `/` or `:`) and a
//! path; identifiers without a delimiter have an empty type.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A parsed resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arn {
    raw: String,
    partition: String,
    service: String,
    region: String,
    account: String,
    resource_type: String,
    resource_path: String,
}

impl Arn {
    /// Parses an ARN string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the string does not have the
    /// six colon-separated ARN fields or the partition/service is empty.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut parts = raw.splitn(6, ':');
        let (Some(prefix), Some(partition), Some(service), Some(region), Some(account), Some(resource)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(Error::InvalidInput(format!("not an ARN: {raw}")));
        };

        if prefix != "arn" || partition.is_empty() || service.is_empty() || resource.is_empty() {
            return Err(Error::InvalidInput(format!("not an ARN: {raw}")));
        }

        let (resource_type, resource_path) = match resource.find(['/', ':']) {
            Some(idx) => (&resource[..idx], &resource[idx + 1..]),
            None => ("", resource),
        };

        Ok(Self {
            raw: raw.to_string(),
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account: account.to_string(),
            resource_type: resource_type.to_string(),
            resource_path: resource_path.to_string(),
        })
    }

    /// Returns the original string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the partition (e.g. `aws`).
    #[must_use]
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Returns the service namespace (e.g. `s3`, `iam`).
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the region, empty for global resources.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns the account embedded in the ARN; empty for S3 buckets.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Returns the resource type, empty when the resource has no delimiter.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the resource path after the type delimiter.
    #[must_use]
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// Returns the last segment of the resource path (role name, bucket name).
    #[must_use]
    pub fn resource_name(&self) -> &str {
        self.resource_path
            .rsplit(['/', ':'])
            .next()
            .unwrap_or(&self.resource_path)
    }
}

impl FromStr for Arn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iam_role_with_path() {
        let arn = Arn::parse("arn:aws:iam::123456789012:role/service-role/Lambda").unwrap();
        assert_eq!(arn.partition(), "aws");
        assert_eq!(arn.service(), "iam");
        assert_eq!(arn.region(), "");
        assert_eq!(arn.account(), "123456789012");
        assert_eq!(arn.resource_type(), "role");
        assert_eq!(arn.resource_path(), "service-role/Lambda");
        assert_eq!(arn.resource_name(), "Lambda");
    }

    #[test]
    fn parses_bucket_without_type() {
        let arn = Arn::parse("arn:aws:s3:::my-bucket").unwrap();
        assert_eq!(arn.service(), "s3");
        assert_eq!(arn.account(), "");
        assert_eq!(arn.resource_type(), "");
        assert_eq!(arn.resource_name(), "my-bucket");
    }

    #[test]
    fn parses_colon_delimited_resource() {
        let arn = Arn::parse("arn:aws:lambda:us-east-1:123456789012:function:handler:live").unwrap();
        assert_eq!(arn.resource_type(), "function");
        assert_eq!(arn.resource_path(), "handler:live");
        assert_eq!(arn.region(), "us-east-1");
    }

    #[test]
    fn rejects_non_arns() {
        assert!(Arn::parse("my-bucket").is_err());
        assert!(Arn::parse("arn:aws:s3:::").is_err());
        assert!(Arn::parse("urn:aws:s3:::bucket").is_err());
    }
}
