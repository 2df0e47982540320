//! Infrastructure for the traced S3 listing function.
//!
//! The stack is described as a typed resource graph and rendered to a
//! CloudFormation template:
//!
//! - [`network`]: VPC, subnets, gateways and routes
//! - [`cluster`]: ECS cluster and private DNS namespace
//! - [`collector`]: ADOT collector task, security group and Fargate service
//! - [`storage`]: the bucket the function lists
//! - [`function`]: the container-image Lambda function and its role
//!
//! [`synthesize`] assembles them from a [`StackConfig`]; [`deploy`](deploy::deploy)
//! hands the result to CloudFormation.

pub mod cluster;
pub mod collector;
pub mod config;
pub mod deploy;
mod error;
pub mod function;
pub mod iam;
pub mod network;
mod stack;
pub mod storage;
pub mod template;

pub use config::StackConfig;
pub use error::{ConfigError, SynthError};
pub use stack::{synthesize, DEFAULT_DESCRIPTION};
pub use template::Template;
