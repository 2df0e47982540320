use collector_stack::{synthesize, StackConfig, SynthError};
use serde_json::{json, Value};
use std::path::Path;

fn default_template() -> Value {
    let template = synthesize(&StackConfig::default()).unwrap();
    serde_json::from_str(&template.to_json().unwrap()).unwrap()
}

fn resources_of_type<'a>(template: &'a Value, kind: &str) -> Vec<&'a Value> {
    template["Resources"]
        .as_object()
        .unwrap()
        .values()
        .filter(|r| r["Type"] == kind)
        .collect()
}

#[test]
fn synthesis_is_deterministic() {
    let config = StackConfig::default();
    let first = synthesize(&config).unwrap();
    let second = synthesize(&config).unwrap();

    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    assert_eq!(first.to_yaml().unwrap(), second.to_yaml().unwrap());
}

#[test]
fn checked_in_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("stack.toml");
    let config = StackConfig::load(&path).unwrap();
    assert_eq!(config, StackConfig::default());
}

#[test]
fn collector_ingress_is_limited_to_otlp_ports_from_the_vpc() {
    let template = default_template();
    let sg = &template["Resources"]["ContainerSg"];
    assert_eq!(sg["Properties"]["GroupName"], "container-sg");

    let ingress = sg["Properties"]["SecurityGroupIngress"].as_array().unwrap();
    let ports: Vec<(i64, &str)> = ingress
        .iter()
        .map(|rule| {
            assert_eq!(rule["CidrIp"], json!({ "Fn::GetAtt": ["Vpc", "CidrBlock"] }));
            assert_eq!(rule["FromPort"], rule["ToPort"]);
            (
                rule["FromPort"].as_i64().unwrap(),
                rule["Description"].as_str().unwrap(),
            )
        })
        .collect();
    assert_eq!(ports, [(4317, "allow OTEL/gRPC"), (4318, "allow OTEL/HTTP")]);

    // no other security group opens ingress
    let open: Vec<_> = resources_of_type(&template, "AWS::EC2::SecurityGroup")
        .into_iter()
        .filter(|sg| sg["Properties"].get("SecurityGroupIngress").is_some())
        .collect();
    assert_eq!(open.len(), 1);
}

#[test]
fn task_role_has_xray_daemon_policy() {
    let template = default_template();
    let role = &template["Resources"]["TaskDefinitionTaskRole"];
    assert_eq!(
        role["Properties"]["ManagedPolicyArns"],
        json!([{ "Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/AWSXRayDaemonWriteAccess" }])
    );

    let task = &template["Resources"]["TaskDefinition"]["Properties"];
    assert_eq!(task["Cpu"], "512");
    assert_eq!(task["Memory"], "1024");
    assert_eq!(task["NetworkMode"], "awsvpc");
    assert_eq!(task["Family"], "SampleTask");
    let container = &task["ContainerDefinitions"][0];
    assert_eq!(container["Name"], "collector");
    assert_eq!(container["Image"], "amazon/aws-otel-collector");
    assert_eq!(
        container["LogConfiguration"]["Options"]["awslogs-stream-prefix"],
        "adot"
    );
}

#[test]
fn function_environment_points_at_collector_and_bucket() {
    let template = default_template();
    let function = &template["Resources"]["DockerImageFunction"];
    let props = &function["Properties"];

    assert_eq!(props["FunctionName"], "samplefunc");
    assert_eq!(props["PackageType"], "Image");
    assert_eq!(props["Architectures"], json!(["arm64"]));
    assert_eq!(props["MemorySize"], 1024);
    assert_eq!(props["TracingConfig"]["Mode"], "Active");
    assert!(props.get("VpcConfig").is_none());

    let env = &props["Environment"]["Variables"];
    assert_eq!(env["OTEL_EXPORTER_OTLP_ENDPOINT"], "http://collector.sample.com:4318");
    assert_eq!(env["BUCKET_NAME"], json!({ "Ref": "SampleBucket" }));
    assert_eq!(env["AWS_LAMBDA_EXEC_WRAPPER"], "/opt/otel-handler");

    let build_args = &function["Metadata"]["aws:asset:docker-build-args"];
    assert_eq!(build_args.as_object().unwrap().len(), 1);
    assert!(build_args.get("ADOT_LAYER_ARN").is_some());
}

#[test]
fn function_role_grants_bucket_read_write() {
    let template = default_template();
    let statements = template["Resources"]["DockerImageFunctionServiceRoleDefaultPolicy"]
        ["Properties"]["PolicyDocument"]["Statement"]
        .as_array()
        .unwrap();

    let s3 = statements
        .iter()
        .find(|s| s["Action"].as_array().unwrap().contains(&json!("s3:GetObject*")))
        .unwrap();
    assert!(s3["Action"].as_array().unwrap().contains(&json!("s3:PutObject")));
    assert_eq!(
        s3["Resource"][0],
        json!({ "Fn::GetAtt": ["SampleBucket", "Arn"] })
    );

    let bucket = &template["Resources"]["SampleBucket"];
    assert_eq!(
        bucket["Properties"]["BucketName"],
        json!({ "Fn::Sub": "sample-bucket-${AWS::AccountId}" })
    );
    assert_eq!(bucket["DeletionPolicy"], "Delete");
}

#[test]
fn collector_service_registers_in_cloud_map() {
    let template = default_template();
    let service = &template["Resources"]["SampleService"]["Properties"];
    assert_eq!(service["LaunchType"], "FARGATE");
    assert_eq!(
        service["NetworkConfiguration"]["AwsvpcConfiguration"]["AssignPublicIp"],
        "DISABLED"
    );
    assert_eq!(
        service["ServiceRegistries"][0]["RegistryArn"],
        json!({ "Fn::GetAtt": ["SampleServiceCloudmapService", "Arn"] })
    );

    let discovery = &template["Resources"]["SampleServiceCloudmapService"]["Properties"];
    assert_eq!(discovery["Name"], "collector");
    assert_eq!(discovery["DnsConfig"]["DnsRecords"][0]["Type"], "A");

    let namespace = &template["Resources"]["EcsClusterDefaultServiceDiscoveryNamespace"];
    assert_eq!(namespace["Properties"]["Name"], "sample.com");
}

#[test]
fn outputs_are_declared() {
    let template = default_template();
    let outputs = template["Outputs"].as_object().unwrap();
    for name in ["BucketName", "FunctionName", "ClusterName", "CollectorEndpoint"] {
        assert!(outputs.contains_key(name), "missing output {name}");
    }
    assert_eq!(
        template["Outputs"]["CollectorEndpoint"]["Value"],
        "http://collector.sample.com:4318"
    );
}

#[test]
fn vpc_attachment_adds_network_config_and_policy() {
    let mut config = StackConfig::default();
    config.function.attach_to_vpc = true;
    let template: Value =
        serde_json::from_str(&synthesize(&config).unwrap().to_json().unwrap()).unwrap();

    let props = &template["Resources"]["DockerImageFunction"]["Properties"];
    assert_eq!(
        props["VpcConfig"]["SubnetIds"],
        json!([{ "Ref": "VpcPrivateSubnet1" }, { "Ref": "VpcPrivateSubnet2" }])
    );
    let policies = template["Resources"]["DockerImageFunctionServiceRole"]["Properties"]
        ["ManagedPolicyArns"]
        .as_array()
        .unwrap();
    assert_eq!(policies.len(), 2);
}

#[test]
fn invalid_config_is_rejected_before_building() {
    let mut config = StackConfig::default();
    config.collector.memory_mib = 300;
    assert!(matches!(synthesize(&config), Err(SynthError::Config(_))));
}

#[test]
fn endpoint_follows_configured_names() {
    let mut config = StackConfig::default();
    config.cluster.namespace = "otel.internal".to_string();
    config.collector.http_port = 14318;
    let template: Value =
        serde_json::from_str(&synthesize(&config).unwrap().to_json().unwrap()).unwrap();

    assert_eq!(
        template["Resources"]["DockerImageFunction"]["Properties"]["Environment"]["Variables"]
            ["OTEL_EXPORTER_OTLP_ENDPOINT"],
        "http://collector.otel.internal:14318"
    );
}

#[test]
fn function_dockerfile_builds_from_the_workspace() {
    let config = StackConfig::default();
    let context = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(&config.function.asset_path);
    let dockerfile = std::fs::read_to_string(context.join(&config.function.dockerfile)).unwrap();

    assert!(dockerfile.contains("-p list-bucket --bin bootstrap"));
    if !context.join("Cargo.lock").exists() {
        assert!(
            !dockerfile.contains("--locked"),
            "--locked needs a checked-in Cargo.lock"
        );
    }
}
