//! Amazon Web Services provisioner driver.

use serde::Deserialize;
use serde_json::Value;

use kismet_db::models::{ProvisionerCredentials, ProvisionerOptions};

use crate::plan::PlanBuildError;
use crate::request::RequestOptions;

use super::trait_def::{Provider, ProviderSettings};

pub const AWS: &str = "aws";

const ACCESS_KEY_ID: &str = "accessKeyID";
const SECRET_ACCESS_KEY: &str = "secretAccessKey";

/// Options an AWS request may carry. The first two are credentials.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AwsRequestOptions {
    #[serde(rename = "accessKeyID")]
    access_key_id: String,
    #[serde(rename = "secretAccessKey")]
    secret_access_key: String,
    region: String,
    #[serde(rename = "vpcID")]
    vpc_id: String,
    #[serde(rename = "instanceType")]
    instance_type: String,
    image: String,
}

impl AwsRequestOptions {
    fn decode(options: Option<&RequestOptions>) -> Result<Self, serde_json::Error> {
        match options {
            Some(map) => serde_json::from_value(Value::Object(map.clone())),
            None => Ok(Self::default()),
        }
    }

    /// Non-secret settings, skipping the ones left empty.
    fn plan_options(&self) -> ProvisionerOptions {
        [
            ("region", &self.region),
            ("vpcID", &self.vpc_id),
            ("instanceType", &self.instance_type),
            ("image", &self.image),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AwsProvider;

impl Provider for AwsProvider {
    fn name(&self) -> &str {
        AWS
    }

    fn validate(&self, options: Option<&RequestOptions>) -> Vec<String> {
        let decoded = match AwsRequestOptions::decode(options) {
            Ok(decoded) => decoded,
            Err(e) => return vec![format!("provisioner.options could not be decoded: {e}")],
        };

        let mut errors = Vec::new();
        if decoded.access_key_id.is_empty() {
            errors.push(format!("provisioner.options.{ACCESS_KEY_ID} cannot be empty"));
        }
        if decoded.secret_access_key.is_empty() {
            errors.push(format!("provisioner.options.{SECRET_ACCESS_KEY} cannot be empty"));
        }
        errors
    }

    fn build_options(
        &self,
        options: Option<&RequestOptions>,
    ) -> Result<ProviderSettings, PlanBuildError> {
        let decoded =
            AwsRequestOptions::decode(options).map_err(|source| PlanBuildError::Options {
                provider: AWS.to_string(),
                source,
            })?;

        let mut credentials = ProvisionerCredentials::new();
        if !decoded.access_key_id.is_empty() {
            credentials.insert(ACCESS_KEY_ID, decoded.access_key_id.clone());
        }
        if !decoded.secret_access_key.is_empty() {
            credentials.insert(SECRET_ACCESS_KEY, decoded.secret_access_key.clone());
        }

        Ok(ProviderSettings {
            options: decoded.plan_options(),
            credentials,
        })
    }
}
