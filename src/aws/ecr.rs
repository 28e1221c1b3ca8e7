//! ECR-backed registry API
//!
//! Every SDK response is mapped onto the typed model right here; nothing untyped leaves
//! this module.

use super::context::AwsSession;
use super::error::from_sdk_error;
use crate::error::ApiError;
use crate::resource::{Image, ImageDescription, Page, PolicyState, RegistryApi, Resource};
use async_trait::async_trait;
use aws_sdk_ecr::types::{ImageDetail, ImageIdentifier, ImageTagMutability, Repository};
use aws_sdk_ecr::Client;
use std::collections::BTreeMap;

/// Container registry reached through the ECR control plane
#[derive(Clone, Debug)]
pub struct EcrRegistry {
    client: Client,
}

impl EcrRegistry {
    pub fn from_session(session: &AwsSession) -> Self {
        Self {
            client: session.ecr_client(),
        }
    }

    /// Wrap a preconfigured client (custom endpoint, test credentials)
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// Map an SDK repository onto a [`Resource`]
///
/// Name and ARN are mandatory. A missing mutability means the service default, `MUTABLE`.
pub fn resource_from_repository(repo: &Repository) -> Result<Resource, ApiError> {
    let name = repo
        .repository_name()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::MalformedResponse("repository without name".to_string()))?;
    let arn = repo
        .repository_arn()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::MalformedResponse(format!("repository '{name}' without ARN")))?;
    let policy_state = repo
        .image_tag_mutability()
        .map(|m| PolicyState::from(m.as_str()))
        .unwrap_or(PolicyState::Mutable);

    Ok(Resource::new(name, arn, policy_state))
}

/// Map a `ListImages` entry; the digest is mandatory
pub fn image_from_identifier(id: &ImageIdentifier) -> Result<Image, ApiError> {
    let digest = id
        .image_digest()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::MalformedResponse("image without digest".to_string()))?;

    Ok(Image {
        digest: digest.to_string(),
        tag: id.image_tag().map(str::to_string),
    })
}

/// Map a `DescribeImages` entry; a negative size is treated as unknown
pub fn description_from_detail(detail: &ImageDetail) -> Result<ImageDescription, ApiError> {
    let digest = detail
        .image_digest()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::MalformedResponse("image detail without digest".to_string()))?;

    Ok(ImageDescription {
        digest: digest.to_string(),
        tags: detail.image_tags().to_vec(),
        size_bytes: detail
            .image_size_in_bytes()
            .and_then(|s| u64::try_from(s).ok()),
    })
}

#[async_trait]
impl RegistryApi for EcrRegistry {
    async fn list_repositories(
        &self,
        next_token: Option<String>,
        page_size: Option<i32>,
    ) -> Result<Page<Resource>, ApiError> {
        tracing::debug!(token = ?next_token, "DescribeRepositories");

        let output = self
            .client
            .describe_repositories()
            .set_next_token(next_token)
            .set_max_results(page_size)
            .send()
            .await
            .map_err(from_sdk_error)?;

        let items = output
            .repositories()
            .iter()
            .map(resource_from_repository)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, output.next_token().map(str::to_string)))
    }

    async fn list_images(
        &self,
        repository: &str,
        next_token: Option<String>,
        page_size: Option<i32>,
    ) -> Result<Page<Image>, ApiError> {
        tracing::debug!(repository, token = ?next_token, "ListImages");

        let output = self
            .client
            .list_images()
            .repository_name(repository)
            .set_next_token(next_token)
            .set_max_results(page_size)
            .send()
            .await
            .map_err(from_sdk_error)?;

        let items = output
            .image_ids()
            .iter()
            .map(image_from_identifier)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, output.next_token().map(str::to_string)))
    }

    async fn describe_images(
        &self,
        repository: &str,
        next_token: Option<String>,
        page_size: Option<i32>,
    ) -> Result<Page<ImageDescription>, ApiError> {
        tracing::debug!(repository, token = ?next_token, "DescribeImages");

        let output = self
            .client
            .describe_images()
            .repository_name(repository)
            .set_next_token(next_token)
            .set_max_results(page_size)
            .send()
            .await
            .map_err(from_sdk_error)?;

        let items = output
            .image_details()
            .iter()
            .map(description_from_detail)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, output.next_token().map(str::to_string)))
    }

    async fn set_policy_state(
        &self,
        repository: &str,
        state: &PolicyState,
    ) -> Result<PolicyState, ApiError> {
        tracing::info!(repository, state = %state, "PutImageTagMutability");

        let output = self
            .client
            .put_image_tag_mutability()
            .repository_name(repository)
            .image_tag_mutability(ImageTagMutability::from(state.as_str()))
            .send()
            .await
            .map_err(from_sdk_error)?;

        Ok(output
            .image_tag_mutability()
            .map(|m| PolicyState::from(m.as_str()))
            .unwrap_or_else(|| state.clone()))
    }

    async fn list_tags(&self, arn: &str) -> Result<BTreeMap<String, String>, ApiError> {
        tracing::debug!(arn, "ListTagsForResource");

        let output = self
            .client
            .list_tags_for_resource()
            .resource_arn(arn)
            .send()
            .await
            .map_err(from_sdk_error)?;

        Ok(output
            .tags()
            .iter()
            .map(|tag| (tag.key().to_string(), tag.value().to_string()))
            .collect())
    }
}
