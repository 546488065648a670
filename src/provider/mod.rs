//! Provider control-plane integration.
//!
//! The engine talks to the cloud provider exclusively through the
//! [`StackProvider`] and [`ObjectStore`] traits. Production code uses the
//! CloudFormation and S3 adapters; tests use the in-memory fakes.

mod cloudformation;
mod retry;
mod s3;
mod store;
mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use cloudformation::CloudFormationProvider;
pub use retry::RetryPolicy;
pub use s3::S3TemplateStore;
pub use store::{ObjectStore, StackProvider};
pub use types::{ChangeSetRequest, EventPage, TemplateSource};

use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Loads the AWS SDK configuration from the default credential chain.
///
/// The returned handle is passed explicitly to every client constructor.
pub async fn load_sdk_config(region: Option<&str>) -> SdkConfig {
    let loader = aws_config::defaults(BehaviorVersion::latest());
    match region {
        Some(region) => loader.region(Region::new(region.to_string())).load().await,
        None => loader.load().await,
    }
}
