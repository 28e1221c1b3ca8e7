//! Run driver
//!
//! `list -> filter -> (tags) -> enrich -> assemble`. Listing is all-or-nothing, the pattern is
//! compiled before the first call, and per-resource failures end up in the report instead of
//! aborting the run.

use crate::config::RunConfig;
use crate::error::RunError;
use crate::remediate::PolicyRemediator;
use crate::report::{Enrichment, ImageRecord, Report, RunMode};
use crate::resource::{
    collect_all, count_images, describe_all_images, MatchResult, PatternFilter, RegistryApi,
};
use crate::retry::with_retry;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Reason recorded for resources left uncounted after cancellation
const CANCELLED_COUNT: &str = "run cancelled";

/// Execute one run against `api`
pub async fn run<A>(
    api: &A,
    config: &RunConfig,
    cancel: &CancellationToken,
) -> Result<Report, RunError>
where
    A: RegistryApi + ?Sized,
{
    let run_id = Uuid::new_v4();
    let span = info_span!(
        "run",
        %run_id,
        mode = %config.mode,
        region = %config.region,
        dry_run = config.dry_run
    );

    execute(api, config, cancel, run_id).instrument(span).await
}

async fn execute<A>(
    api: &A,
    config: &RunConfig,
    cancel: &CancellationToken,
    run_id: Uuid,
) -> Result<Report, RunError>
where
    A: RegistryApi + ?Sized,
{
    let filter = PatternFilter::new(&config.pattern)?;
    let retry = &config.retry;
    let page_size = config.page_size;

    info!(pattern = %config.pattern, "Listing repositories");
    let resources = collect_all("DescribeRepositories", move |token| async move {
        with_retry(retry, "DescribeRepositories", || {
            api.list_repositories(token.clone(), page_size)
        })
        .await
    })
    .await?;

    let mut matches = filter.select(resources);

    if config.include_tags {
        attach_tags(api, config, &mut matches, cancel).await;
    }

    let (enrichments, images) = match config.mode {
        RunMode::Inventory => count_all(api, config, &matches, cancel).await?,
        RunMode::Remediate => {
            let outcomes = PolicyRemediator::new(api, retry, &config.exclusions, config.dry_run)
                .remediate_all(&matches, cancel)
                .await;
            (outcomes.into_iter().map(Enrichment::Remediation).collect(), Vec::new())
        }
    };

    let mut report = Report::assemble(
        run_id,
        config.mode,
        config.dry_run,
        &config.pattern,
        matches,
        enrichments,
    );
    if config.include_images {
        report = report.with_images(images);
    }
    info!(records = report.records.len(), "Run complete");
    Ok(report)
}

/// Fetch tags of the matched repositories; a failed lookup leaves the tags empty
async fn attach_tags<A>(
    api: &A,
    config: &RunConfig,
    matches: &mut [MatchResult],
    cancel: &CancellationToken,
) where
    A: RegistryApi + ?Sized,
{
    for matched in matches.iter_mut() {
        if cancel.is_cancelled() {
            break;
        }

        let arn = matched.resource.arn.clone();
        match with_retry(&config.retry, "ListTagsForResource", || api.list_tags(&arn)).await {
            Ok(tags) => matched.resource.tags = tags,
            Err(error) => {
                warn!(resource = %matched.resource.name, error = %error, "Tag lookup failed")
            }
        }
    }
}

/// Count the images of every match, at most `config.concurrency` at a time
///
/// Results keep the order of `matches`; image lines are concatenated in the same order.
async fn count_all<A>(
    api: &A,
    config: &RunConfig,
    matches: &[MatchResult],
    cancel: &CancellationToken,
) -> Result<(Vec<Enrichment>, Vec<ImageRecord>), RunError>
where
    A: RegistryApi + ?Sized,
{
    let counted: Vec<(Enrichment, Vec<ImageRecord>)> = stream::iter(matches)
        .map(|matched| count_one(api, config, &matched.resource.name, cancel))
        .buffered(config.concurrency.max(1))
        .try_collect()
        .await?;

    let mut enrichments = Vec::with_capacity(counted.len());
    let mut images = Vec::new();
    for (enrichment, lines) in counted {
        enrichments.push(enrichment);
        images.extend(lines);
    }
    Ok((enrichments, images))
}

async fn count_one<A>(
    api: &A,
    config: &RunConfig,
    name: &str,
    cancel: &CancellationToken,
) -> Result<(Enrichment, Vec<ImageRecord>), RunError>
where
    A: RegistryApi + ?Sized,
{
    if cancel.is_cancelled() {
        return Ok((
            Enrichment::CountUnavailable(CANCELLED_COUNT.to_string()),
            Vec::new(),
        ));
    }

    let counted = if config.include_images {
        describe_all_images(api, &config.retry, name, config.page_size)
            .await
            .map(|described| {
                let total_bytes = described.iter().filter_map(|i| i.size_bytes).sum();
                let lines: Vec<ImageRecord> = described
                    .iter()
                    .flat_map(|i| ImageRecord::from_description(name, i))
                    .collect();
                let enrichment = Enrichment::ImageInventory {
                    count: lines.len() as u64,
                    total_bytes,
                };
                (enrichment, lines)
            })
    } else {
        count_images(api, &config.retry, name, config.page_size)
            .await
            .map(|count| (Enrichment::ImageCount(count), Vec::new()))
    };

    match counted {
        Ok((enrichment, lines)) => {
            info!(resource = name, count = %enrichment, "Images counted");
            Ok((enrichment, lines))
        }
        Err(err) if err.source.is_not_found() => {
            warn!(resource = name, error = %err.source, "Repository vanished while counting");
            Ok((Enrichment::CountUnavailable(err.source.to_string()), Vec::new()))
        }
        Err(source) => Err(RunError::PartialPage {
            listing: if config.include_images {
                format!("DescribeImages({name})")
            } else {
                format!("ListImages({name})")
            },
            source,
        }),
    }
}
