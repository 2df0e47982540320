//! VPC with one public and one private subnet per availability zone.
//!
//! Subnets are carved from the VPC block in order: every public subnet first,
//! then every private one. Private subnets route through the NAT gateways,
//! which sit in the first public subnets; with fewer gateways than zones the
//! gateways are shared round-robin.

use crate::config::NetworkConfig;
use crate::error::{ConfigError, SynthError};
use crate::template::{get_att, reference, select_az, tags, Resource, Template};
use serde_json::{json, Value};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

pub const VPC_ID: &str = "Vpc";
const IGW_ID: &str = "VpcIGW";
const GATEWAY_ATTACHMENT_ID: &str = "VpcVPCGW";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    base: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Split into `count` consecutive blocks of length `prefix`.
    pub fn split(&self, prefix: u8, count: u32) -> Result<Vec<Ipv4Cidr>, String> {
        if prefix < self.prefix || prefix > 28 {
            return Err(format!(
                "/{prefix} subnets cannot be carved from a /{} block",
                self.prefix
            ));
        }
        let available = 1u64 << (prefix - self.prefix);
        if u64::from(count) > available {
            return Err(format!(
                "{count} /{prefix} subnets do not fit in /{} ({available} available)",
                self.prefix
            ));
        }
        let size = 1u32 << (32 - prefix);
        Ok((0..count)
            .map(|i| Ipv4Cidr {
                base: self.base + i * size,
                prefix,
            })
            .collect())
    }
}

impl FromStr for Ipv4Cidr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::invalid("network.cidr", format!("{s}: {reason}"));

        let (addr, prefix) = s.split_once('/').ok_or_else(|| invalid("missing prefix length"))?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("bad address"))?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
        if !(16..=28).contains(&prefix) {
            return Err(invalid("VPC prefix must be between /16 and /28"));
        }

        let base = u32::from(addr);
        let mask = u32::MAX << (32 - prefix);
        if base & !mask != 0 {
            return Err(invalid("host bits are set"));
        }
        Ok(Self { base, prefix })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.base), self.prefix)
    }
}

/// References to network resources used by the rest of the stack.
#[derive(Debug, Clone)]
pub struct Network {
    pub vpc: Value,
    pub vpc_cidr: Value,
    pub public_subnets: Vec<Value>,
    pub private_subnets: Vec<Value>,
}

pub fn build(template: &mut Template, config: &NetworkConfig) -> Result<Network, SynthError> {
    let cidr: Ipv4Cidr = config.cidr.parse()?;
    let azs = usize::from(config.max_azs);
    let blocks = cidr
        .split(config.subnet_prefix, u32::from(config.max_azs) * 2)
        .map_err(|reason| ConfigError::invalid("network.subnet-prefix", reason))?;
    let (public_blocks, private_blocks) = blocks.split_at(azs);

    template.add(
        VPC_ID,
        Resource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": cidr.to_string(),
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": tags(&[("Name", config.vpc_name.as_str())])
            }),
        ),
    )?;
    template.add(
        IGW_ID,
        Resource::new(
            "AWS::EC2::InternetGateway",
            json!({ "Tags": tags(&[("Name", config.vpc_name.as_str())]) }),
        ),
    )?;
    template.add(
        GATEWAY_ATTACHMENT_ID,
        Resource::new(
            "AWS::EC2::VPCGatewayAttachment",
            json!({ "InternetGatewayId": reference(IGW_ID), "VpcId": reference(VPC_ID) }),
        ),
    )?;

    let mut public_subnets = Vec::with_capacity(azs);
    let mut nat_gateways = Vec::new();
    for (i, block) in public_blocks.iter().enumerate() {
        let n = i + 1;
        let subnet = add_subnet(template, "Public", n, i, block, &config.vpc_name)?;
        add_default_route(
            template,
            &subnet,
            json!({ "GatewayId": reference(IGW_ID) }),
            Some(GATEWAY_ATTACHMENT_ID),
        )?;

        if i < usize::from(config.nat_gateways) {
            let eip = template.add(
                &format!("{subnet}EIP"),
                Resource::new(
                    "AWS::EC2::EIP",
                    json!({ "Domain": "vpc", "Tags": tags(&[("Name", format!("{}/{subnet}", config.vpc_name).as_str())]) }),
                ),
            )?;
            let nat = template.add(
                &format!("{subnet}NATGateway"),
                Resource::new(
                    "AWS::EC2::NatGateway",
                    json!({
                        "AllocationId": get_att(&eip, "AllocationId"),
                        "SubnetId": reference(&subnet),
                        "Tags": tags(&[("Name", format!("{}/{subnet}", config.vpc_name).as_str())])
                    }),
                )
                .depends_on(&format!("{subnet}DefaultRoute"))
                .depends_on(&format!("{subnet}RouteTableAssociation")),
            )?;
            nat_gateways.push(nat);
        }
        public_subnets.push(reference(&subnet));
    }

    let mut private_subnets = Vec::with_capacity(azs);
    for (i, block) in private_blocks.iter().enumerate() {
        let subnet = add_subnet(template, "Private", i + 1, i, block, &config.vpc_name)?;
        // without NAT gateways the private subnets stay isolated
        if !nat_gateways.is_empty() {
            let nat = &nat_gateways[i % nat_gateways.len()];
            add_default_route(template, &subnet, json!({ "NatGatewayId": reference(nat) }), None)?;
        }
        private_subnets.push(reference(&subnet));
    }

    tracing::debug!(
        cidr = %cidr,
        azs,
        nat_gateways = nat_gateways.len(),
        "network resources added"
    );

    Ok(Network {
        vpc: reference(VPC_ID),
        vpc_cidr: get_att(VPC_ID, "CidrBlock"),
        public_subnets,
        private_subnets,
    })
}

fn add_subnet(
    template: &mut Template,
    kind: &str,
    number: usize,
    az_index: usize,
    block: &Ipv4Cidr,
    vpc_name: &str,
) -> Result<String, SynthError> {
    let subnet = format!("Vpc{kind}Subnet{number}");
    let public = kind == "Public";
    template.add(
        &subnet,
        Resource::new(
            "AWS::EC2::Subnet",
            json!({
                "AvailabilityZone": select_az(az_index),
                "CidrBlock": block.to_string(),
                "MapPublicIpOnLaunch": public,
                "Tags": tags(&[
                    ("Name", format!("{vpc_name}/{subnet}").as_str()),
                    ("SubnetType", kind),
                ]),
                "VpcId": reference(VPC_ID)
            }),
        ),
    )?;
    let route_table = template.add(
        &format!("{subnet}RouteTable"),
        Resource::new(
            "AWS::EC2::RouteTable",
            json!({
                "Tags": tags(&[("Name", format!("{vpc_name}/{subnet}").as_str())]),
                "VpcId": reference(VPC_ID)
            }),
        ),
    )?;
    template.add(
        &format!("{subnet}RouteTableAssociation"),
        Resource::new(
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({ "RouteTableId": reference(&route_table), "SubnetId": reference(&subnet) }),
        ),
    )?;
    Ok(subnet)
}

fn add_default_route(
    template: &mut Template,
    subnet: &str,
    target: Value,
    depends_on: Option<&str>,
) -> Result<(), SynthError> {
    let mut properties = json!({
        "DestinationCidrBlock": "0.0.0.0/0",
        "RouteTableId": reference(&format!("{subnet}RouteTable"))
    });
    if let (Some(props), Value::Object(target)) = (properties.as_object_mut(), target) {
        props.extend(target);
    }

    let mut route = Resource::new("AWS::EC2::Route", properties);
    if let Some(id) = depends_on {
        route = route.depends_on(id);
    }
    template.add(&format!("{subnet}DefaultRoute"), route)?;
    Ok(())
}
