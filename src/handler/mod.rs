//! The webhook dispatcher.
//!
//! [`WebhookHandler::handle_event`] turns one parsed delivery into comments,
//! status checks and cluster operations, and returns the HTTP response for it.
//!
//! # Flows
//!
//! | Event | Action |
//! |-------|--------|
//! | pull request opened | help, then diff, over every covered cluster |
//! | pull request synchronized | diff over every covered cluster |
//! | `kubeapply <command>` comment | the command over the selected clusters |
//! | apply-result comment | automerge check |
//!
//! Cluster operations run one cluster at a time in coverage order and stop at
//! the first failure. Every failure is reported on the pull request before the
//! 500 response is returned.

mod automerge;
mod gate;
mod response;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cluster::{ClusterClient, ClusterClientConfig, ClusterClientFactory};
use crate::commands::{Command, CommandKind, parse_command};
use crate::config::{ClusterConfig, HandlerSettings};
use crate::pullreq::{
    ClusterApply, ClusterDiff, ClusterStatus, PullRequestClient, format_apply_comment,
    format_diff_comment, format_help_comment, format_status_comment,
};
use crate::status::{
    StatusOutcome, StatusState, command_context, hashed_cluster_names,
    non_apply_green, status_description,
};
use crate::types::Sha;
use crate::webhooks::WebhookEvent;

pub use automerge::{AUTOMERGE_COMMENT, PreMergeCondition, first_unmet, pre_merge_conditions};
pub use gate::{GateInputs, apply_gate_failures};
pub use response::{ClusterAction, HandlerError, HandlerResponse};

/// Upper bound on a single apply, diff or summary in one cluster.
pub const CLUSTER_OP_TIMEOUT: Duration = Duration::from_secs(600);

/// Error comment posted when a `kubeapply` comment does not parse.
pub const HELP_HINT: &str = "Sorry, I didn't understand; post \"kubeapply help\" for usage.";

/// Response body when no cluster is affected.
pub const NO_CLUSTERS: &str = "No clusters affected by this change";

/// Dispatches webhook events for one environment.
#[derive(Debug)]
pub struct WebhookHandler<F> {
    settings: HandlerSettings,
    factory: F,
}

impl<F> WebhookHandler<F>
where
    F: ClusterClientFactory + Sync,
{
    pub fn new(settings: HandlerSettings, factory: F) -> Self {
        WebhookHandler { settings, factory }
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    /// Processes one event against its pull request.
    ///
    /// The caller owns `client` and is responsible for closing it afterwards.
    pub async fn handle_event<P>(&self, event: &WebhookEvent, client: &mut P) -> HandlerResponse
    where
        P: PullRequestClient + Send + Sync,
    {
        info!(
            event = event.kind(),
            repo = %event.repo(),
            pr = event.pr().0,
            env = %self.settings.env,
            "handling webhook event"
        );

        match event {
            WebhookEvent::PullRequestOpened { .. } => {
                self.handle_pull_request(event, client, true).await
            }
            WebhookEvent::PullRequestSynchronized { .. } => {
                self.handle_pull_request(event, client, false).await
            }
            WebhookEvent::CommentCommand { body, .. } => {
                self.handle_command(event, body, client).await
            }
            WebhookEvent::CommentApplyResult { .. } => self.handle_apply_result(event, client).await,
        }
    }

    // ========================================================================
    // Event flows
    // ========================================================================

    async fn handle_pull_request<P>(
        &self,
        event: &WebhookEvent,
        client: &mut P,
        opened: bool,
    ) -> HandlerResponse
    where
        P: PullRequestClient + Send + Sync,
    {
        if let Err(err) = self.init(client).await {
            record_stat("handler.pull_request.error", event, None);
            return err.into();
        }

        let clusters = match self.cluster_clients(&*client, &[], None).await {
            Ok(clusters) => clusters,
            Err(err) => {
                record_stat("handler.pull_request.error", event, None);
                return err.into();
            }
        };
        if clusters.is_empty() {
            return HandlerResponse::ok(NO_CLUSTERS);
        }

        let result = self
            .pull_request_commands(event, &*client, &clusters, opened)
            .await;
        close_clusters(&clusters).await;

        match result {
            Ok(()) => HandlerResponse::ok("OK"),
            Err(err) => err.into(),
        }
    }

    async fn pull_request_commands<P>(
        &self,
        event: &WebhookEvent,
        client: &P,
        clusters: &[F::Client],
        opened: bool,
    ) -> Result<(), HandlerError>
    where
        P: PullRequestClient + Sync,
    {
        if opened {
            if let Err(err) = self.run_help(client, clusters).await {
                record_stat("handler.pull_request.error", event, Some(CommandKind::Help));
                return Err(err);
            }
            record_stat("handler.pull_request.success", event, Some(CommandKind::Help));
        }

        if let Err(err) = self.run_diffs(client, clusters).await {
            record_stat("handler.pull_request.error", event, Some(CommandKind::Diff));
            return Err(err);
        }
        record_stat("handler.pull_request.success", event, Some(CommandKind::Diff));
        Ok(())
    }

    async fn handle_command<P>(
        &self,
        event: &WebhookEvent,
        body: &str,
        client: &mut P,
    ) -> HandlerResponse
    where
        P: PullRequestClient + Send + Sync,
    {
        if let Err(err) = self.init(client).await {
            record_stat("handler.comment.error", event, None);
            return err.into();
        }

        let command = match parse_command(body) {
            Ok(command) => command,
            Err(err) => {
                debug!(error = %err, "could not parse command comment");
                record_stat("handler.comment.error", event, None);
                self.post_error(&*client, HELP_HINT).await;
                return HandlerError::UnrecognizedCommand.into();
            }
        };

        let clusters = match self
            .cluster_clients(&*client, &command.args, command.subpath_override())
            .await
        {
            Ok(clusters) => clusters,
            Err(err) => return err.into(),
        };
        if clusters.is_empty() {
            return HandlerResponse::ok(NO_CLUSTERS);
        }

        let result = match command.kind {
            CommandKind::Apply => self.run_apply(&*client, &clusters, &command).await,
            CommandKind::Diff => self.run_diffs(&*client, &clusters).await,
            CommandKind::Status => self.run_status(&*client, &clusters).await,
            CommandKind::Help => self.run_help(&*client, &clusters).await,
        };
        close_clusters(&clusters).await;

        match result {
            Ok(()) => {
                record_stat("handler.comment.success", event, Some(command.kind));
                HandlerResponse::ok("OK")
            }
            Err(err) => {
                record_stat("handler.comment.error", event, Some(command.kind));
                err.into()
            }
        }
    }

    async fn handle_apply_result<P>(&self, event: &WebhookEvent, client: &mut P) -> HandlerResponse
    where
        P: PullRequestClient + Send + Sync,
    {
        if !self.settings.automerge {
            info!("not automerging because automerge is disabled");
            return HandlerResponse::ok("OK");
        }

        if let Err(err) = self.init(client).await {
            record_stat("handler.automerge.error", event, None);
            return err.into();
        }

        let statuses = match client.statuses().await {
            Ok(statuses) => statuses,
            Err(e) => {
                warn!(error = %e, "could not read statuses, treating as not green");
                Vec::new()
            }
        };
        let conditions = pre_merge_conditions(
            &statuses,
            client.is_draft(),
            client.is_merged(),
            client.is_mergeable(),
        );
        if let Some(unmet) = first_unmet(&conditions) {
            warn!(
                condition = unmet.description,
                "not automerging because a required condition is not met"
            );
            return HandlerResponse::ok("OK");
        }

        if let Err(e) = client.post_comment(AUTOMERGE_COMMENT).await {
            return HandlerError::Comment(e.to_string()).into();
        }
        if let Err(e) = client.merge().await {
            record_stat("handler.automerge.error", event, None);
            return HandlerError::Merge(e.to_string()).into();
        }

        record_stat("handler.automerge.success", event, None);
        HandlerResponse::ok("OK")
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    /// Initializes the client, reporting a failure as an error comment.
    async fn init<P>(&self, client: &mut P) -> Result<(), HandlerError>
    where
        P: PullRequestClient + Send + Sync,
    {
        match client.init().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                self.post_error(&*client, &message).await;
                Err(HandlerError::Init(message))
            }
        }
    }

    /// Resolves the covered clusters and builds a client for each.
    async fn cluster_clients<P>(
        &self,
        client: &P,
        selectors: &[String],
        subpath_override: Option<&str>,
    ) -> Result<Vec<F::Client>, HandlerError>
    where
        P: PullRequestClient + Sync,
    {
        let configs = match client
            .covered_clusters(&self.settings.env, selectors, subpath_override)
            .await
        {
            Ok(configs) => configs,
            Err(e) => {
                let err = HandlerError::Coverage(e.to_string());
                self.post_error(client, &err.to_string()).await;
                return Err(err);
            }
        };
        debug!(count = configs.len(), "resolved covered clusters");

        let head_sha = Sha::new(client.head_sha());
        let mut clusters = Vec::with_capacity(configs.len());

        for cluster_config in configs {
            let name = cluster_config.descriptive_name();
            let config = ClusterClientConfig {
                cluster_config,
                head_sha: head_sha.clone(),
                debug: self.settings.debug,
            };

            match self.factory.create(config).await {
                Ok(cluster) => clusters.push(cluster),
                Err(e) => {
                    close_clusters(&clusters).await;
                    let err = HandlerError::ClientCreation {
                        cluster: name,
                        message: e.to_string(),
                    };
                    self.post_error(client, &err.to_string()).await;
                    return Err(err);
                }
            }
        }

        Ok(clusters)
    }

    async fn post_error<P>(&self, client: &P, message: &str)
    where
        P: PullRequestClient + Sync,
    {
        if let Err(e) = client.post_error_comment(&self.settings.env, message).await {
            warn!(error = %e, "error posting error comment");
        }
    }

    async fn set_status<P>(
        &self,
        client: &P,
        state: StatusState,
        kind: CommandKind,
        outcome: StatusOutcome,
        hashed_names: &str,
    ) where
        P: PullRequestClient + Sync,
    {
        let context = command_context(kind, &self.settings.env);
        let description = status_description(outcome, hashed_names);
        if !description.contains(hashed_names) {
            debug!(context = %context, description = %description, "truncated cluster ids in status");
        }

        if let Err(e) = client
            .update_status(state, &context, &description, &self.settings.logs_url)
            .await
        {
            warn!(error = %e, context = %context, "error updating status");
        }
    }

    /// Reports a failed command: error comment plus a terminal status.
    ///
    /// `status` failures leave a success status so they never block apply or
    /// merge.
    async fn report_failure<P>(
        &self,
        client: &P,
        kind: CommandKind,
        hashed_names: &str,
        err: HandlerError,
    ) -> HandlerError
    where
        P: PullRequestClient + Sync,
    {
        self.post_error(client, &err.to_string()).await;

        let (state, outcome) = match kind {
            CommandKind::Status => (StatusState::Success, StatusOutcome::Ran),
            _ => (StatusState::Failure, StatusOutcome::Errored),
        };
        self.set_status(client, state, kind, outcome, hashed_names)
            .await;
        err
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn run_apply<P>(
        &self,
        client: &P,
        clusters: &[F::Client],
        command: &Command,
    ) -> Result<(), HandlerError>
    where
        P: PullRequestClient + Sync,
    {
        let hashed = hashed_names(clusters);
        self.set_status(
            client,
            StatusState::Pending,
            CommandKind::Apply,
            StatusOutcome::Running,
            &hashed,
        )
        .await;

        let statuses_green = if self.settings.strict_check {
            match client.statuses().await {
                Ok(statuses) => non_apply_green(&statuses),
                Err(e) => {
                    warn!(error = %e, "could not read statuses, treating as not green");
                    false
                }
            }
        } else {
            true
        };

        let reasons = apply_gate_failures(&GateInputs {
            strict_check: self.settings.strict_check,
            statuses_green,
            approved: client.approved(),
            base: client.base(),
            behind_by: client.behind_by(),
        });

        let outcome = if reasons.is_empty() {
            apply_all(clusters).await
        } else {
            Err(HandlerError::Precondition(reasons.join("\n")))
        };

        let applies = match outcome {
            Ok(applies) => applies,
            Err(err) => {
                return Err(self
                    .report_failure(client, CommandKind::Apply, &hashed, err)
                    .await);
            }
        };

        let body = format_apply_comment(&self.settings.env, &applies);
        if let Err(e) = client.post_comment(&body).await {
            warn!(error = %e, "error posting apply comment");
        }

        // A failing apply status keeps automerge from firing.
        let state = if command.flag_enabled("no-auto-merge") {
            StatusState::Failure
        } else {
            StatusState::Success
        };
        self.set_status(
            client,
            state,
            CommandKind::Apply,
            StatusOutcome::Succeeded,
            &hashed,
        )
        .await;

        Ok(())
    }

    async fn run_diffs<P>(&self, client: &P, clusters: &[F::Client]) -> Result<(), HandlerError>
    where
        P: PullRequestClient + Sync,
    {
        let hashed = hashed_names(clusters);
        self.set_status(
            client,
            StatusState::Pending,
            CommandKind::Diff,
            StatusOutcome::Running,
            &hashed,
        )
        .await;

        let diffs = match diff_all(clusters).await {
            Ok(diffs) => diffs,
            Err(err) => {
                return Err(self
                    .report_failure(client, CommandKind::Diff, &hashed, err)
                    .await);
            }
        };

        let body = format_diff_comment(
            &self.settings.env,
            &diffs,
            client.base(),
            client.behind_by(),
        );
        if let Err(e) = client.post_comment(&body).await {
            warn!(error = %e, "error posting diff comment");
        }

        self.set_status(
            client,
            StatusState::Success,
            CommandKind::Diff,
            StatusOutcome::Succeeded,
            &hashed,
        )
        .await;
        Ok(())
    }

    async fn run_status<P>(&self, client: &P, clusters: &[F::Client]) -> Result<(), HandlerError>
    where
        P: PullRequestClient + Sync,
    {
        let hashed = hashed_names(clusters);
        self.set_status(
            client,
            StatusState::Pending,
            CommandKind::Status,
            StatusOutcome::Running,
            &hashed,
        )
        .await;

        let statuses = match summarize_all(clusters).await {
            Ok(statuses) => statuses,
            Err(err) => {
                return Err(self
                    .report_failure(client, CommandKind::Status, &hashed, err)
                    .await);
            }
        };

        let body = format_status_comment(&self.settings.env, &statuses);
        if let Err(e) = client.post_comment(&body).await {
            warn!(error = %e, "error posting status comment");
        }

        self.set_status(
            client,
            StatusState::Success,
            CommandKind::Status,
            StatusOutcome::Succeeded,
            &hashed,
        )
        .await;
        Ok(())
    }

    async fn run_help<P>(&self, client: &P, clusters: &[F::Client]) -> Result<(), HandlerError>
    where
        P: PullRequestClient + Sync,
    {
        let configs: Vec<ClusterConfig> = clusters.iter().map(|c| c.config().clone()).collect();
        let body = format_help_comment(&self.settings.env, &configs);

        client
            .post_comment(&body)
            .await
            .map_err(|e| HandlerError::Comment(e.to_string()))
    }
}

// ============================================================================
// Per-cluster fan-out
// ============================================================================

async fn apply_all<C>(clusters: &[C]) -> Result<Vec<ClusterApply>, HandlerError>
where
    C: ClusterClient + Sync,
{
    let mut applies = Vec::with_capacity(clusters.len());

    for cluster in clusters {
        let config = cluster.config();
        info!(cluster = %config.descriptive_name(), "applying");

        let results = with_timeout(cluster.apply_structured(&config.abs_subpaths()))
            .await
            .map_err(|message| cluster_failure(ClusterAction::Applying, config, message))?;

        applies.push(ClusterApply {
            cluster_config: config.clone(),
            results,
        });
    }

    Ok(applies)
}

async fn diff_all<C>(clusters: &[C]) -> Result<Vec<ClusterDiff>, HandlerError>
where
    C: ClusterClient + Sync,
{
    let mut diffs = Vec::with_capacity(clusters.len());

    for cluster in clusters {
        let config = cluster.config();
        info!(cluster = %config.descriptive_name(), "diffing");

        let results = with_timeout(cluster.diff_structured(&config.abs_subpaths()))
            .await
            .map_err(|message| cluster_failure(ClusterAction::Diffing, config, message))?;

        diffs.push(ClusterDiff {
            cluster_config: config.clone(),
            results,
        });
    }

    Ok(diffs)
}

async fn summarize_all<C>(clusters: &[C]) -> Result<Vec<ClusterStatus>, HandlerError>
where
    C: ClusterClient + Sync,
{
    let mut statuses = Vec::with_capacity(clusters.len());

    for cluster in clusters {
        let config = cluster.config();
        info!(cluster = %config.descriptive_name(), "getting status");

        let health_summary = with_timeout(cluster.summary())
            .await
            .map_err(|message| cluster_failure(ClusterAction::GettingStatus, config, message))?;

        statuses.push(ClusterStatus {
            cluster_config: config.clone(),
            health_summary,
        });
    }

    Ok(statuses)
}

/// Runs one cluster operation under [`CLUSTER_OP_TIMEOUT`].
async fn with_timeout<T, E, Fut>(operation: Fut) -> Result<T, String>
where
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(CLUSTER_OP_TIMEOUT, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!(
            "timed out after {}s",
            CLUSTER_OP_TIMEOUT.as_secs()
        )),
    }
}

fn cluster_failure(action: ClusterAction, config: &ClusterConfig, message: String) -> HandlerError {
    warn!(
        cluster = %config.descriptive_name(),
        action = action.as_str(),
        error = %message,
        "cluster operation failed"
    );
    HandlerError::ClusterOperation {
        action,
        cluster: config.descriptive_name(),
        message,
    }
}

fn hashed_names<C: ClusterClient>(clusters: &[C]) -> String {
    hashed_cluster_names(clusters.iter().map(|c| c.config().descriptive_name()))
}

async fn close_clusters<C>(clusters: &[C])
where
    C: ClusterClient + Sync,
{
    for cluster in clusters {
        if let Err(e) = cluster.close().await {
            warn!(cluster = %cluster.config().descriptive_name(), error = %e, "error closing cluster client");
        }
    }
}

/// Counter-style event for dashboards.
fn record_stat(name: &'static str, event: &WebhookEvent, command: Option<CommandKind>) {
    let repo = event.repo();
    info!(
        stat = name,
        owner = %repo.owner,
        repo = %repo.repo,
        pr = event.pr().0,
        command = command.map(CommandKind::as_str).unwrap_or(""),
        "stat"
    );
}
