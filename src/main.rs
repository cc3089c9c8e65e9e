use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kubeapply::cluster::KubectlFactory;
use kubeapply::config::HandlerSettings;
use kubeapply::github::{GitHubClientSource, octocrab_from_token};
use kubeapply::handler::WebhookHandler;
use kubeapply::server::{AppState, build_router};

#[derive(Parser)]
#[command(name = "kubeapply-server", about = "Diffs and applies Kubernetes manifests from pull request comments", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "KUBEAPPLY_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    listen_addr: SocketAddr,

    /// Token for the GitHub API and for cloning pull request branches.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: String,

    /// Shared secret for webhook signatures.
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: String,

    /// Environment served by this instance. Empty covers every environment.
    #[arg(long, env = "KUBEAPPLY_ENV", default_value = "")]
    env: String,

    /// Target URL attached to status checks.
    #[arg(long, env = "KUBEAPPLY_LOGS_URL", default_value = "")]
    logs_url: String,

    #[arg(long, env = "KUBEAPPLY_STRICT_CHECK")]
    strict_check: bool,

    #[arg(long, env = "KUBEAPPLY_AUTOMERGE")]
    automerge: bool,

    #[arg(long, env = "KUBEAPPLY_DEBUG")]
    debug: bool,

    /// kubectl binary.
    #[arg(long, env = "KUBEAPPLY_KUBECTL", default_value = "kubectl")]
    kubectl: PathBuf,

    /// Kubeconfig used for clusters whose config names none.
    #[arg(long, env = "KUBEAPPLY_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kubeapply=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let octocrab = match octocrab_from_token(args.github_token.clone()) {
        Ok(octocrab) => octocrab,
        Err(e) => {
            error!(error = %e, "could not build GitHub client");
            return ExitCode::FAILURE;
        }
    };

    let settings = HandlerSettings {
        env: args.env,
        logs_url: args.logs_url,
        strict_check: args.strict_check,
        automerge: args.automerge,
        debug: args.debug,
    };
    info!(
        env = %settings.env,
        strict_check = settings.strict_check,
        automerge = settings.automerge,
        "starting kubeapply"
    );

    let handler = WebhookHandler::new(settings, KubectlFactory::new(args.kubectl, args.kubeconfig));
    let source = GitHubClientSource::new(octocrab, args.github_token);
    let app = build_router(AppState::new(args.webhook_secret.into_bytes(), source, handler));

    let listener = match tokio::net::TcpListener::bind(args.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %args.listen_addr, error = %e, "could not bind");
            return ExitCode::FAILURE;
        }
    };
    info!("listening on {}", args.listen_addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
