//! The traced container-image Lambda function.
//!
//! The function exports spans to the collector's HTTP port through its Cloud
//! Map name, writes X-Ray segments for active tracing and may read and write
//! the sample bucket. The image itself is built outside the template; its URI
//! arrives through the `ImageUri` parameter.

use crate::config::FunctionConfig;
use crate::error::SynthError;
use crate::iam::{allow, assume_role_policy, role_policy, BUCKET_READ_WRITE_ACTIONS, XRAY_WRITE_ACTIONS};
use crate::network::Network;
use crate::storage::Bucket;
use crate::template::{get_att, managed_policy_arn, reference, Resource, Template};
use serde_json::{json, Map, Value};

pub const ROLE_ID: &str = "DockerImageFunctionServiceRole";
pub const POLICY_ID: &str = "DockerImageFunctionServiceRoleDefaultPolicy";
pub const SECURITY_GROUP_ID: &str = "DockerImageFunctionSecurityGroup";
pub const FUNCTION_ID: &str = "DockerImageFunction";
pub const IMAGE_URI_PARAMETER: &str = "ImageUri";

pub const ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const BUCKET_VAR: &str = "BUCKET_NAME";
pub const EXEC_WRAPPER_VAR: &str = "AWS_LAMBDA_EXEC_WRAPPER";

const LAMBDA_PRINCIPAL: &str = "lambda.amazonaws.com";
const BASIC_EXECUTION_POLICY: &str = "service-role/AWSLambdaBasicExecutionRole";
const VPC_ACCESS_POLICY: &str = "service-role/AWSLambdaVPCAccessExecutionRole";

pub fn build(
    template: &mut Template,
    config: &FunctionConfig,
    collector_endpoint: &str,
    bucket: &Bucket,
    network: &Network,
) -> Result<Value, SynthError> {
    template.add_parameter(
        IMAGE_URI_PARAMETER,
        "String",
        "URI of the function container image in ECR",
    );

    let mut managed_policies = vec![managed_policy_arn(BASIC_EXECUTION_POLICY)];
    if config.attach_to_vpc {
        managed_policies.push(managed_policy_arn(VPC_ACCESS_POLICY));
    }
    template.add(
        ROLE_ID,
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume_role_policy(LAMBDA_PRINCIPAL),
                "ManagedPolicyArns": managed_policies
            }),
        ),
    )?;

    let bucket_objects = json!({ "Fn::Join": ["", [bucket.arn, "/*"]] });
    template.add(
        POLICY_ID,
        Resource::new(
            "AWS::IAM::Policy",
            role_policy(
                POLICY_ID,
                ROLE_ID,
                vec![
                    allow(&XRAY_WRITE_ACTIONS, json!("*")),
                    allow(&BUCKET_READ_WRITE_ACTIONS, json!([bucket.arn, bucket_objects])),
                ],
            ),
        ),
    )?;

    let mut environment = Map::new();
    environment.insert(ENDPOINT_VAR.to_string(), json!(collector_endpoint));
    environment.insert(BUCKET_VAR.to_string(), bucket.name.clone());
    environment.insert(EXEC_WRAPPER_VAR.to_string(), json!(config.exec_wrapper));

    let mut properties = json!({
        "Architectures": [config.architecture],
        "Code": { "ImageUri": reference(IMAGE_URI_PARAMETER) },
        "Environment": { "Variables": environment },
        "FunctionName": config.function_name,
        "MemorySize": config.memory_mb,
        "PackageType": "Image",
        "Role": get_att(ROLE_ID, "Arn"),
        "Timeout": config.timeout_seconds,
        "TracingConfig": { "Mode": "Active" }
    });

    if config.attach_to_vpc {
        template.add(
            SECURITY_GROUP_ID,
            Resource::new(
                "AWS::EC2::SecurityGroup",
                json!({
                    "GroupDescription": format!("Security group for {}", config.function_name),
                    "SecurityGroupEgress": [{
                        "CidrIp": "0.0.0.0/0",
                        "Description": "Allow all outbound traffic by default",
                        "IpProtocol": "-1"
                    }],
                    "VpcId": network.vpc
                }),
            ),
        )?;
        properties["VpcConfig"] = json!({
            "SecurityGroupIds": [get_att(SECURITY_GROUP_ID, "GroupId")],
            "SubnetIds": network.private_subnets
        });
    }

    template.add(
        FUNCTION_ID,
        Resource::new("AWS::Lambda::Function", properties)
            .depends_on(POLICY_ID)
            .depends_on(ROLE_ID)
            .with_metadata(asset_metadata(config)),
    )?;

    tracing::debug!(
        function = %config.function_name,
        vpc = config.attach_to_vpc,
        endpoint = collector_endpoint,
        "function resources added"
    );
    Ok(reference(FUNCTION_ID))
}

/// How to build the image. Only the layer ARN is passed as a build
/// argument; registry credentials come from the build environment.
fn asset_metadata(config: &FunctionConfig) -> Value {
    json!({
        "aws:asset:path": config.asset_path,
        "aws:asset:dockerfile-path": config.dockerfile,
        "aws:asset:docker-build-args": { "ADOT_LAYER_ARN": config.adot_layer_arn },
        "aws:asset:property": "Code.ImageUri"
    })
}
