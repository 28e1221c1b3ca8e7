//! Sub-resource counter
//!
//! Counts the images of one repository by walking its image listing. Cost is one call per
//! page, so large repositories are slow; each count is independent and read-only.
//! [`describe_all_images`] is the heavier variant used when image sizes are wanted.

use super::fetcher::paginate;
use super::{ImageDescription, RegistryApi};
use crate::error::PageError;
use crate::retry::{with_retry, RetryPolicy};
use futures::TryStreamExt;

/// Total number of images across all pages of `repository`'s image listing
pub async fn count_images<A>(
    api: &A,
    retry: &RetryPolicy,
    repository: &str,
    page_size: Option<i32>,
) -> Result<u64, PageError>
where
    A: RegistryApi + ?Sized,
{
    let count = paginate(move |token| async move {
        with_retry(retry, "ListImages", || {
            api.list_images(repository, token.clone(), page_size)
        })
        .await
    })
    .try_fold(0u64, |acc, _| async move { Ok(acc + 1) })
    .await?;

    tracing::debug!(repository, count, "Counted images");
    Ok(count)
}

/// All image metadata of `repository`, in listing order
pub async fn describe_all_images<A>(
    api: &A,
    retry: &RetryPolicy,
    repository: &str,
    page_size: Option<i32>,
) -> Result<Vec<ImageDescription>, PageError>
where
    A: RegistryApi + ?Sized,
{
    let images: Vec<ImageDescription> = paginate(move |token| async move {
        with_retry(retry, "DescribeImages", || {
            api.describe_images(repository, token.clone(), page_size)
        })
        .await
    })
    .try_collect()
    .await?;

    tracing::debug!(repository, images = images.len(), "Described images");
    Ok(images)
}
