//! Stack configuration.
//!
//! Every field has a default, so an empty file (or no file at all) describes
//! the reference deployment: a two-AZ VPC with one NAT gateway, the ADOT
//! collector on Fargate behind `collector.sample.com`, and the `samplefunc`
//! container-image function exporting to it.
//!
//! ```toml
//! [network]
//! nat-gateways = 1
//!
//! [collector]
//! cpu = 512
//! memory-mib = 1024
//!
//! [function]
//! attach-to-vpc = false
//! ```

use crate::error::ConfigError;
use crate::network::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

pub const DEFAULT_ADOT_LAYER_ARN: &str =
    "arn:aws:lambda:ap-northeast-1:901920570463:layer:aws-otel-nodejs-arm64-ver-1-7-0:2";

/// Most availability zones `Fn::GetAZs` returns in any region.
const MAX_AZS: u8 = 6;

/// Retention values CloudWatch Logs accepts.
const LOG_RETENTION_DAYS: [u32; 22] = [
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    pub description: Option<String>,
    pub network: NetworkConfig,
    pub cluster: ClusterConfig,
    pub collector: CollectorConfig,
    pub bucket: BucketConfig,
    pub function: FunctionConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct NetworkConfig {
    pub vpc_name: String,
    pub cidr: String,
    pub max_azs: u8,
    pub subnet_prefix: u8,
    pub nat_gateways: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            vpc_name: "SampleVpc".to_string(),
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            subnet_prefix: 18,
            nat_gateways: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ClusterConfig {
    pub cluster_name: String,
    /// Private DNS namespace the collector registers in.
    pub namespace: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_name: "SampleCluster".to_string(),
            namespace: "sample.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CollectorConfig {
    pub family: String,
    pub cpu: u32,
    pub memory_mib: u32,
    pub container_name: String,
    pub image: String,
    pub grpc_port: u16,
    pub http_port: u16,
    pub log_group_name: String,
    pub log_stream_prefix: String,
    pub log_retention_days: u32,
    pub security_group_name: String,
    pub service_name: String,
    /// Cloud Map service name, the host part of the collector DNS name.
    pub discovery_name: String,
    pub desired_count: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            family: "SampleTask".to_string(),
            cpu: 512,
            memory_mib: 1024,
            container_name: "collector".to_string(),
            image: "amazon/aws-otel-collector".to_string(),
            grpc_port: 4317,
            http_port: 4318,
            log_group_name: "sample-adot-log".to_string(),
            log_stream_prefix: "adot".to_string(),
            log_retention_days: 731,
            security_group_name: "container-sg".to_string(),
            service_name: "SampleService".to_string(),
            discovery_name: "collector".to_string(),
            desired_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct BucketConfig {
    /// The account id is appended to make the name globally unique.
    pub name_prefix: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            name_prefix: "sample-bucket".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct FunctionConfig {
    pub function_name: String,
    pub memory_mb: u32,
    pub timeout_seconds: u32,
    pub architecture: String,
    pub attach_to_vpc: bool,
    pub exec_wrapper: String,
    pub adot_layer_arn: String,
    /// Build context of the function image, relative to the repository root.
    pub asset_path: String,
    /// Dockerfile of the function image, relative to the repository root.
    pub dockerfile: String,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            function_name: "samplefunc".to_string(),
            memory_mb: 1024,
            timeout_seconds: 3,
            architecture: "arm64".to_string(),
            attach_to_vpc: false,
            exec_wrapper: "/opt/otel-handler".to_string(),
            adot_layer_arn: DEFAULT_ADOT_LAYER_ARN.to_string(),
            asset_path: ".".to_string(),
            dockerfile: "functions/list-bucket/Dockerfile".to_string(),
        }
    }
}

impl StackConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StackConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded stack config");
        Ok(config)
    }

    /// Load `path` if given, the defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.collector.validate()?;
        self.function.validate()?;

        require_name("cluster.cluster-name", &self.cluster.cluster_name)?;
        require_name("cluster.namespace", &self.cluster.namespace)?;
        require_name("bucket.name-prefix", &self.bucket.name_prefix)?;
        Ok(())
    }

    /// URL the function exports to, resolved through Cloud Map.
    pub fn collector_endpoint(&self) -> String {
        format!(
            "http://{}.{}:{}",
            self.collector.discovery_name, self.cluster.namespace, self.collector.http_port
        )
    }
}

impl NetworkConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_name("network.vpc-name", &self.vpc_name)?;
        let cidr: Ipv4Cidr = self.cidr.parse()?;

        if self.max_azs == 0 || self.max_azs > MAX_AZS {
            return Err(ConfigError::invalid(
                "network.max-azs",
                format!("must be between 1 and {MAX_AZS}"),
            ));
        }
        if self.nat_gateways > self.max_azs {
            return Err(ConfigError::invalid(
                "network.nat-gateways",
                format!(
                    "{} NAT gateways need as many availability zones, only {} requested",
                    self.nat_gateways, self.max_azs
                ),
            ));
        }

        let subnets = u32::from(self.max_azs) * 2;
        cidr.split(self.subnet_prefix, subnets)
            .map_err(|reason| ConfigError::invalid("network.subnet-prefix", reason))?;
        Ok(())
    }
}

impl CollectorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_name("collector.family", &self.family)?;
        require_name("collector.container-name", &self.container_name)?;
        require_name("collector.image", &self.image)?;
        require_name("collector.log-group-name", &self.log_group_name)?;
        require_name("collector.log-stream-prefix", &self.log_stream_prefix)?;
        require_name("collector.security-group-name", &self.security_group_name)?;
        require_name("collector.service-name", &self.service_name)?;
        require_name("collector.discovery-name", &self.discovery_name)?;

        if !fargate_memory_options(self.cpu).contains(&self.memory_mib) {
            return Err(ConfigError::invalid(
                "collector.memory-mib",
                format!(
                    "{} MiB is not a valid Fargate size for {} CPU units",
                    self.memory_mib, self.cpu
                ),
            ));
        }
        if self.grpc_port == 0 || self.http_port == 0 {
            return Err(ConfigError::invalid("collector.ports", "ports must be non-zero"));
        }
        if self.grpc_port == self.http_port {
            return Err(ConfigError::invalid(
                "collector.ports",
                format!("gRPC and HTTP both use port {}", self.grpc_port),
            ));
        }
        if !LOG_RETENTION_DAYS.contains(&self.log_retention_days) {
            return Err(ConfigError::invalid(
                "collector.log-retention-days",
                format!("{} is not a CloudWatch retention period", self.log_retention_days),
            ));
        }
        Ok(())
    }
}

impl FunctionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_name("function.function-name", &self.function_name)?;
        require_name("function.asset-path", &self.asset_path)?;
        require_name("function.dockerfile", &self.dockerfile)?;

        if !(128..=10240).contains(&self.memory_mb) {
            return Err(ConfigError::invalid(
                "function.memory-mb",
                format!("{} is outside 128..=10240", self.memory_mb),
            ));
        }
        if !(1..=900).contains(&self.timeout_seconds) {
            return Err(ConfigError::invalid(
                "function.timeout-seconds",
                format!("{} is outside 1..=900", self.timeout_seconds),
            ));
        }
        if !matches!(self.architecture.as_str(), "arm64" | "x86_64") {
            return Err(ConfigError::invalid(
                "function.architecture",
                format!("unsupported architecture {}", self.architecture),
            ));
        }
        Ok(())
    }
}

fn require_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    Ok(())
}

/// Memory sizes Fargate accepts for a CPU value, in MiB.
fn fargate_memory_options(cpu: u32) -> Vec<u32> {
    match cpu {
        256 => vec![512, 1024, 2048],
        512 => (1..=4).map(|gb| gb * 1024).collect(),
        1024 => (2..=8).map(|gb| gb * 1024).collect(),
        2048 => (4..=16).map(|gb| gb * 1024).collect(),
        4096 => (8..=30).map(|gb| gb * 1024).collect(),
        8192 => (16..=60).step_by(4).map(|gb| gb * 1024).collect(),
        16384 => (32..=120).step_by(8).map(|gb| gb * 1024).collect(),
        _ => Vec::new(),
    }
}
