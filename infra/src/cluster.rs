//! ECS cluster and the private DNS namespace services register in.

use crate::config::ClusterConfig;
use crate::error::SynthError;
use crate::network::Network;
use crate::template::{get_att, reference, Resource, Template};
use serde_json::{json, Value};

pub const CLUSTER_ID: &str = "EcsCluster";
pub const NAMESPACE_ID: &str = "EcsClusterDefaultServiceDiscoveryNamespace";

#[derive(Debug, Clone)]
pub struct Cluster {
    pub cluster: Value,
    pub namespace_id: Value,
}

pub fn build(
    template: &mut Template,
    config: &ClusterConfig,
    network: &Network,
) -> Result<Cluster, SynthError> {
    template.add(
        CLUSTER_ID,
        Resource::new(
            "AWS::ECS::Cluster",
            json!({ "ClusterName": config.cluster_name }),
        ),
    )?;
    template.add(
        NAMESPACE_ID,
        Resource::new(
            "AWS::ServiceDiscovery::PrivateDnsNamespace",
            json!({ "Name": config.namespace, "Vpc": network.vpc }),
        ),
    )?;

    Ok(Cluster {
        cluster: reference(CLUSTER_ID),
        namespace_id: get_att(NAMESPACE_ID, "Id"),
    })
}
