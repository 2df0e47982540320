//! Hand-off of a synthesized template to CloudFormation.
//!
//! CloudFormation does all reconciliation. This module only validates the
//! template, picks create or update, and optionally waits for the stack to
//! settle.

use crate::function::IMAGE_URI_PARAMETER;
use crate::template::Template;
use anyhow::{bail, Context, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::types::{Capability, Parameter};
use aws_sdk_cloudformation::Client as CfnClient;
use std::fmt;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const MAX_TEMPLATE_BODY_BYTES: usize = 51_200;

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub stack_name: String,
    pub image_uri: String,
    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,
    pub wait: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for DeployOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployOutcome::Created => write!(f, "created"),
            DeployOutcome::Updated => write!(f, "updated"),
            DeployOutcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

pub async fn cloudformation_client(
    aws_region: Option<String>,
    aws_profile: Option<String>,
) -> CfnClient {
    let region_provider = RegionProviderChain::first_try(aws_region.map(aws_config::Region::new))
        .or_default_provider()
        .or_else(aws_config::Region::new("ap-northeast-1"));

    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region_provider);
    if let Some(profile) = aws_profile {
        config_loader = config_loader.profile_name(profile);
    }

    let aws_config = config_loader.load().await;
    tracing::debug!(region = ?aws_config.region(), "loaded AWS config");
    CfnClient::new(&aws_config)
}

/// Create or update the stack from `template`.
pub async fn deploy(template: &Template, options: &DeployOptions) -> Result<DeployOutcome> {
    let body = serde_json::to_string(template).context("Failed to render template")?;
    if body.len() > MAX_TEMPLATE_BODY_BYTES {
        bail!(
            "Template is {} bytes, CloudFormation accepts at most {} inline",
            body.len(),
            MAX_TEMPLATE_BODY_BYTES
        );
    }

    let client = cloudformation_client(options.aws_region.clone(), options.aws_profile.clone()).await;

    client
        .validate_template()
        .template_body(&body)
        .send()
        .await
        .context("CloudFormation rejected the template")?;
    tracing::debug!("template validated");

    let parameter = Parameter::builder()
        .parameter_key(IMAGE_URI_PARAMETER)
        .parameter_value(&options.image_uri)
        .build();

    let outcome = if stack_exists(&client, &options.stack_name).await? {
        let result = client
            .update_stack()
            .stack_name(&options.stack_name)
            .template_body(&body)
            .parameters(parameter)
            .capabilities(Capability::CapabilityIam)
            .send()
            .await;
        match result {
            Ok(_) => DeployOutcome::Updated,
            Err(e) if is_no_update(e.as_service_error().and_then(|se| se.message())) => {
                tracing::info!(stack = %options.stack_name, "stack is already up to date");
                return Ok(DeployOutcome::Unchanged);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to update stack '{}'", options.stack_name)
                })
            }
        }
    } else {
        client
            .create_stack()
            .stack_name(&options.stack_name)
            .template_body(&body)
            .parameters(parameter)
            .capabilities(Capability::CapabilityIam)
            .send()
            .await
            .with_context(|| format!("Failed to create stack '{}'", options.stack_name))?;
        DeployOutcome::Created
    };
    tracing::info!(stack = %options.stack_name, %outcome, "stack operation started");

    if options.wait {
        let status = wait_for_stack(&client, &options.stack_name).await?;
        if !is_success(&status) {
            bail!("Stack '{}' ended in {}", options.stack_name, status);
        }
        tracing::info!(stack = %options.stack_name, %status, "stack settled");
    }
    Ok(outcome)
}

async fn stack_exists(client: &CfnClient, stack_name: &str) -> Result<bool> {
    match client.describe_stacks().stack_name(stack_name).send().await {
        Ok(output) => Ok(!output.stacks().is_empty()),
        Err(e) if is_missing_stack(e.as_service_error().and_then(|se| se.message())) => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to describe stack '{stack_name}'")),
    }
}

async fn wait_for_stack(client: &CfnClient, stack_name: &str) -> Result<String> {
    loop {
        let output = client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
            .with_context(|| format!("Failed to describe stack '{stack_name}'"))?;
        let status = output
            .stacks()
            .first()
            .and_then(|stack| stack.stack_status())
            .map(|status| status.as_str().to_string())
            .unwrap_or_default();

        if is_terminal(&status) {
            return Ok(status);
        }
        tracing::debug!(stack = stack_name, %status, "waiting for stack");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn is_missing_stack(message: Option<&str>) -> bool {
    message.is_some_and(|m| m.contains("does not exist"))
}

fn is_no_update(message: Option<&str>) -> bool {
    message.is_some_and(|m| m.contains("No updates are to be performed"))
}

fn is_terminal(status: &str) -> bool {
    !status.is_empty() && !status.ends_with("_IN_PROGRESS")
}

fn is_success(status: &str) -> bool {
    matches!(status, "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "IMPORT_COMPLETE")
}
