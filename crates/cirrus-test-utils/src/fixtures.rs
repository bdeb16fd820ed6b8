//! Factory functions for collected resource data.

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// Aspect map for one collected resource.
pub type Aspects = BTreeMap<String, Value>;

/// ARN of an S3 bucket.
pub fn bucket_arn(name: &str) -> String {
    format!("arn:aws:s3:::{name}")
}

/// ARN of an IAM role.
pub fn role_arn(account: &str, name: &str) -> String {
    format!("arn:aws:iam::{account}:role/{name}")
}

/// ARN of an SQS queue.
pub fn queue_arn(account: &str, region: &str, name: &str) -> String {
    format!("arn:aws:sqs:{region}:{account}:{name}")
}

/// Aspects of a bucket: `metadata` plus a bucket `policy`.
pub fn bucket_aspects(name: &str, region: &str) -> Aspects {
    let mut aspects = Aspects::new();
    aspects.insert("arn".into(), Value::String(bucket_arn(name)));
    aspects.insert(
        "metadata".into(),
        json!({ "name": name, "region": region }),
    );
    aspects.insert(
        "policy".into(),
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "AWS": "arn:aws:iam::999999999999:root" },
                "Action": "s3:GetObject",
                "Resource": format!("arn:aws:s3:::{name}/*"),
            }]
        }),
    );
    aspects
}

/// Aspects of a role trusting `principals` (AWS principal ARNs or service names).
pub fn role_aspects(account: &str, name: &str, principals: &[&str]) -> Aspects {
    let (services, aws): (Vec<&str>, Vec<&str>) = principals
        .iter()
        .partition(|p| p.ends_with(".amazonaws.com"));

    let mut principal = serde_json::Map::new();
    if !aws.is_empty() {
        principal.insert("AWS".into(), json!(aws));
    }
    if !services.is_empty() {
        principal.insert("Service".into(), json!(services));
    }

    let mut aspects = Aspects::new();
    aspects.insert("arn".into(), Value::String(role_arn(account, name)));
    aspects.insert("metadata".into(), json!({ "name": name, "path": "/" }));
    aspects.insert(
        "trust-policy".into(),
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": Value::Object(principal),
                "Action": "sts:AssumeRole",
            }]
        }),
    );
    aspects
}

/// Account `metadata` aspect linking an account to an organization.
pub fn account_metadata(account: &str, org_id: &str, org_path: &str) -> Value {
    json!({
        "accountId": account,
        "name": format!("account-{account}"),
        "orgId": org_id,
        "orgPath": org_path,
    })
}
