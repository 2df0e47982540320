use crate::config::StackConfig;
use crate::error::SynthError;
use crate::template::{reference, Template};
use crate::{cluster, collector, function, network, storage};
use serde_json::Value;

pub const DEFAULT_DESCRIPTION: &str =
    "ADOT collector on Fargate with a traced container-image Lambda function";

/// Build the full template for `config`.
///
/// The config is validated first. Building is pure: the same config always
/// yields the same template.
pub fn synthesize(config: &StackConfig) -> Result<Template, SynthError> {
    config.validate()?;

    let description = config
        .description
        .clone()
        .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    let mut template = Template::new(Some(description));

    let network = network::build(&mut template, &config.network)?;
    let cluster = cluster::build(&mut template, &config.cluster, &network)?;
    collector::build(&mut template, &config.collector, &network, &cluster)?;
    let bucket = storage::build(&mut template, &config.bucket)?;

    let endpoint = config.collector_endpoint();
    let function = function::build(&mut template, &config.function, &endpoint, &bucket, &network)?;

    template.add_output("BucketName", bucket.name, "Bucket listed by the function");
    template.add_output("FunctionName", function, "Traced Lambda function");
    template.add_output("ClusterName", cluster.cluster, "ECS cluster running the collector");
    template.add_output(
        "CollectorEndpoint",
        Value::from(endpoint.as_str()),
        "OTLP/HTTP endpoint of the collector inside the VPC",
    );
    template.add_output(
        "VpcId",
        reference(network::VPC_ID),
        "VPC hosting the collector",
    );

    tracing::info!(resources = template.resources.len(), "template synthesized");
    Ok(template)
}
