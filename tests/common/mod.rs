// Shared fixture builders for integration tests.
#![allow(dead_code)]

use serde_json::{Value, json};
use std::path::{Path, PathBuf};

pub const ADMIN_TOKEN: &str = "t-admin";
pub const DEV_TOKEN: &str = "t-dev";
pub const NOBODY_TOKEN: &str = "t-nobody";

/// Org 10 owns accounts 1..=3 (prod, prod, dev badges); org 20 owns account 4.
/// Each account holds `per_account` instances plus one bucket.
pub fn fixture(per_account: usize) -> Value {
    let accounts = json!([
        {"organization_service_id": 1, "organization_id": 10, "resource_id": "divvyorganizationservice:1",
         "account_id": "100000000001", "name": "Prod East", "cloud_type_id": "AWS",
         "badges": [{"key": "env", "value": "prod"}, {"key": "team", "value": "core"}]},
        {"organization_service_id": 2, "organization_id": 10, "resource_id": "divvyorganizationservice:2",
         "account_id": "100000000002", "name": "Prod West", "cloud_type_id": "AWS",
         "badges": [{"key": "env", "value": "prod"}]},
        {"organization_service_id": 3, "organization_id": 10, "resource_id": "divvyorganizationservice:3",
         "account_id": "100000000003", "name": "Dev", "cloud_type_id": "AWS",
         "badges": [{"key": "env", "value": "dev"}, {"key": "team", "value": "core"}]},
        {"organization_service_id": 4, "organization_id": 20, "resource_id": "divvyorganizationservice:4",
         "account_id": "200000000004", "name": "Elsewhere", "cloud_type_id": "AWS"}
    ]);

    let mut resources = Vec::new();
    for account in 1..=4u64 {
        for index in 0..per_account {
            resources.push(json!({
                "organization_service_id": account,
                "provider_id": format!("i-{account}-{index:06}"),
                "name": format!("host {account}/{index}"),
                "region_name": "us-east-1",
                "resource_type": "instance",
                "namespace_id": format!("vpc-{account}"),
                "discovered_timestamp": "2021-01-19T10:00:00Z"
            }));
        }
        resources.push(json!({
            "organization_service_id": account,
            "provider_id": format!("bucket-{account}"),
            "name": "logs, \"archived\"\nsecond line",
            "region_name": "us-east-1",
            "resource_type": "bucket"
        }));
    }

    json!({
        "accounts": accounts,
        "resource_types": [
            {"cloud_type_id": "AWS", "resource_type": "instance", "name": "Instance"},
            {"cloud_type_id": "AWS", "resource_type": "bucket", "name": "Storage Container"}
        ],
        "resources": resources,
        "users": [
            {"user_id": "admin", "organization_id": 10, "token": ADMIN_TOKEN, "admin": true},
            {"user_id": "dev", "organization_id": 10, "token": DEV_TOKEN, "viewable": [3]},
            {"user_id": "nobody", "organization_id": 10, "token": NOBODY_TOKEN, "viewable": []}
        ]
    })
}

pub fn write_fixture(dir: &Path, per_account: usize) -> PathBuf {
    let path = dir.join("inventory.json");
    std::fs::write(&path, serde_json::to_vec(&fixture(per_account)).expect("encode"))
        .expect("write fixture");
    path
}

pub fn header_line() -> &'static str {
    "ID,Name,Region,Resource Type,Cloud Resource Type,Cloud Account,Account ID,Namespace ID,Discovered Timestamp,Creation Timestamp"
}

/// Parses a CSV body, checking the header, and returns the data rows.
pub fn parse_rows(body: &[u8]) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_reader(body);
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(headers.iter().collect::<Vec<_>>().join(","), header_line());
    reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .expect("rows")
}
