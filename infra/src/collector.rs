//! The ADOT collector running as a Fargate service.
//!
//! The collector listens for OTLP on gRPC and HTTP, accepts traffic from the
//! VPC only and is reachable at `<discovery-name>.<namespace>` through Cloud
//! Map A records.

use crate::cluster::Cluster;
use crate::config::CollectorConfig;
use crate::error::SynthError;
use crate::iam::{allow, assume_role_policy, role_policy, LOG_WRITE_ACTIONS};
use crate::network::Network;
use crate::template::{get_att, managed_policy_arn, reference, Resource, Template};
use serde_json::{json, Value};

pub const LOG_GROUP_ID: &str = "ADOTLogGroup";
pub const EXECUTION_ROLE_ID: &str = "TaskDefinitionExecutionRole";
pub const EXECUTION_POLICY_ID: &str = "TaskDefinitionExecutionRoleDefaultPolicy";
pub const TASK_ROLE_ID: &str = "TaskDefinitionTaskRole";
pub const TASK_DEFINITION_ID: &str = "TaskDefinition";
pub const SECURITY_GROUP_ID: &str = "ContainerSg";
pub const DISCOVERY_SERVICE_ID: &str = "SampleServiceCloudmapService";
pub const SERVICE_ID: &str = "SampleService";

const ECS_TASKS_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
const XRAY_DAEMON_POLICY: &str = "AWSXRayDaemonWriteAccess";

pub fn build(
    template: &mut Template,
    config: &CollectorConfig,
    network: &Network,
    cluster: &Cluster,
) -> Result<(), SynthError> {
    template.add(
        LOG_GROUP_ID,
        Resource::new(
            "AWS::Logs::LogGroup",
            json!({
                "LogGroupName": config.log_group_name,
                "RetentionInDays": config.log_retention_days
            }),
        )
        .delete_with_stack(),
    )?;

    add_roles(template)?;
    add_task_definition(template, config)?;
    add_security_group(template, config, network)?;

    template.add(
        DISCOVERY_SERVICE_ID,
        Resource::new(
            "AWS::ServiceDiscovery::Service",
            json!({
                "DnsConfig": {
                    "DnsRecords": [{ "TTL": 60, "Type": "A" }],
                    "NamespaceId": cluster.namespace_id,
                    "RoutingPolicy": "MULTIVALUE"
                },
                "HealthCheckCustomConfig": { "FailureThreshold": 1 },
                "Name": config.discovery_name,
                "NamespaceId": cluster.namespace_id
            }),
        ),
    )?;

    template.add(
        SERVICE_ID,
        Resource::new(
            "AWS::ECS::Service",
            json!({
                "Cluster": cluster.cluster,
                "DeploymentConfiguration": {
                    "MaximumPercent": 200,
                    "MinimumHealthyPercent": 50
                },
                "DesiredCount": config.desired_count,
                "EnableECSManagedTags": false,
                "LaunchType": "FARGATE",
                "NetworkConfiguration": {
                    "AwsvpcConfiguration": {
                        "AssignPublicIp": "DISABLED",
                        "SecurityGroups": [get_att(SECURITY_GROUP_ID, "GroupId")],
                        "Subnets": network.private_subnets
                    }
                },
                "ServiceName": config.service_name,
                "ServiceRegistries": [{ "RegistryArn": get_att(DISCOVERY_SERVICE_ID, "Arn") }],
                "TaskDefinition": reference(TASK_DEFINITION_ID)
            }),
        )
        .depends_on(TASK_ROLE_ID),
    )?;

    tracing::debug!(
        image = %config.image,
        cpu = config.cpu,
        memory_mib = config.memory_mib,
        "collector resources added"
    );
    Ok(())
}

fn add_roles(template: &mut Template) -> Result<(), SynthError> {
    template.add(
        EXECUTION_ROLE_ID,
        Resource::new(
            "AWS::IAM::Role",
            json!({ "AssumeRolePolicyDocument": assume_role_policy(ECS_TASKS_PRINCIPAL) }),
        ),
    )?;
    template.add(
        EXECUTION_POLICY_ID,
        Resource::new(
            "AWS::IAM::Policy",
            role_policy(
                EXECUTION_POLICY_ID,
                EXECUTION_ROLE_ID,
                vec![allow(&LOG_WRITE_ACTIONS, get_att(LOG_GROUP_ID, "Arn"))],
            ),
        ),
    )?;
    template.add(
        TASK_ROLE_ID,
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume_role_policy(ECS_TASKS_PRINCIPAL),
                "ManagedPolicyArns": [managed_policy_arn(XRAY_DAEMON_POLICY)]
            }),
        ),
    )?;
    Ok(())
}

fn add_task_definition(template: &mut Template, config: &CollectorConfig) -> Result<(), SynthError> {
    let port_mappings: Vec<Value> = [config.grpc_port, config.http_port]
        .into_iter()
        .map(|port| json!({ "ContainerPort": port, "Protocol": "tcp" }))
        .collect();

    template.add(
        TASK_DEFINITION_ID,
        Resource::new(
            "AWS::ECS::TaskDefinition",
            json!({
                "ContainerDefinitions": [{
                    "Essential": true,
                    "Image": config.image,
                    "LogConfiguration": {
                        "LogDriver": "awslogs",
                        "Options": {
                            "awslogs-group": reference(LOG_GROUP_ID),
                            "awslogs-region": reference("AWS::Region"),
                            "awslogs-stream-prefix": config.log_stream_prefix
                        }
                    },
                    "Name": config.container_name,
                    "PortMappings": port_mappings
                }],
                "Cpu": config.cpu.to_string(),
                "ExecutionRoleArn": get_att(EXECUTION_ROLE_ID, "Arn"),
                "Family": config.family,
                "Memory": config.memory_mib.to_string(),
                "NetworkMode": "awsvpc",
                "RequiresCompatibilities": ["FARGATE"],
                "TaskRoleArn": get_att(TASK_ROLE_ID, "Arn")
            }),
        )
        .depends_on(EXECUTION_POLICY_ID),
    )?;
    Ok(())
}

fn add_security_group(
    template: &mut Template,
    config: &CollectorConfig,
    network: &Network,
) -> Result<(), SynthError> {
    let ingress = |port: u16, description: &str| {
        json!({
            "CidrIp": network.vpc_cidr,
            "Description": description,
            "FromPort": port,
            "IpProtocol": "tcp",
            "ToPort": port
        })
    };

    template.add(
        SECURITY_GROUP_ID,
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "OTLP ingress for the collector",
                "GroupName": config.security_group_name,
                "SecurityGroupEgress": [{
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                    "IpProtocol": "-1"
                }],
                "SecurityGroupIngress": [
                    ingress(config.grpc_port, "allow OTEL/gRPC"),
                    ingress(config.http_port, "allow OTEL/HTTP")
                ],
                "VpcId": network.vpc
            }),
        ),
    )?;
    Ok(())
}
