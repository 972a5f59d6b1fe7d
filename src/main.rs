use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alupass::cli;
use alupass::config::{self, Config};
use alupass::credential;
use alupass::jobs;
use alupass::middleware::audit::PgAuditSink;
use alupass::middleware::auth::JwtKeys;
use alupass::middleware::rate_limit::RateLimiter;
use alupass::middleware::rbac::{Actor, Role};
use alupass::models::approval::Decision;
use alupass::models::user::NewUser;
use alupass::notification::inbox::InboxNotifier;
use alupass::notification::slack::SlackNotifier;
use alupass::notification::webhook::WebhookNotifier;
use alupass::notification::FanoutNotifier;
use alupass::store::{ApprovalStore, PgStore};
use alupass::workflow::{ApprovalEngine, ListParams};
use alupass::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(cli::Commands::Approval { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_approval_command(&db, command).await
        }
        Some(cli::Commands::Token { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_token_command(&db, &cfg, command).await
        }
        Some(cli::Commands::User { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_user_command(&db, command).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Structured logs to stdout, plus an OTLP exporter when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "alupass"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json_logs = std::env::var("ALUPASS_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);
    let (plain, json) = if json_logs {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "alupass=debug,tower_http=debug".into()),
        ))
        .with(plain)
        .with(json)
        .with(telemetry_layer)
        .init();
    Ok(())
}

/// Engine wired to Postgres with the configured notification channels.
fn build_engine(db: &PgStore, cfg: &Config) -> anyhow::Result<ApprovalEngine> {
    let mut fanout = FanoutNotifier::new().with_sink(Arc::new(InboxNotifier::new(db.clone())));
    if cfg.slack_webhook_url.is_some() {
        fanout = fanout.with_sink(Arc::new(SlackNotifier::new(cfg.slack_webhook_url.clone())));
    }
    if !cfg.webhook_urls.is_empty() {
        fanout = fanout.with_sink(Arc::new(WebhookNotifier::new(
            cfg.webhook_urls.clone(),
            cfg.webhook_secret.clone(),
        )?));
    }
    tracing::info!(channels = fanout.len(), "notification channels configured");

    Ok(ApprovalEngine::new(Arc::new(db.clone()))
        .with_notifier(Arc::new(fanout))
        .with_audit(Arc::new(PgAuditSink::new(db.clone()))))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let engine = build_engine(&db, &cfg)?;
    let state = AppState::new(
        engine,
        JwtKeys::new(cfg.jwt_secret.as_bytes(), cfg.token_ttl_secs),
        RateLimiter::new(cfg.default_rate_limit, cfg.default_rate_limit_window),
    )
    .with_db(db)
    .into_shared();

    let app = alupass::api::app(state.clone()).layer({
        use axum::http::{HeaderName, Method};
        use tower_http::cors::AllowOrigin;
        let dashboard_origin = std::env::var("DASHBOARD_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(move |origin, _| {
                let origin_str = origin.to_str().unwrap_or("");
                origin_str == dashboard_origin
                    || origin_str.starts_with("http://localhost:")
                    || origin_str.starts_with("http://127.0.0.1:")
            }))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                HeaderName::from_static("content-type"),
                HeaderName::from_static("authorization"),
                HeaderName::from_static("x-request-id"),
            ])
    });

    if jobs::expiry::spawn(state.clone(), cfg.expiry_sweep_secs).is_some() {
        tracing::info!(
            every_secs = cfg.expiry_sweep_secs,
            "background expiry sweep started"
        );
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("alupass listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    opentelemetry::global::shutdown_tracer_provider();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

/// Resolve `--as-user` into the actor the engine should see.
async fn actor_for(db: &PgStore, user_id: i64) -> anyhow::Result<Actor> {
    let user = db
        .get_user(user_id)
        .await?
        .with_context(|| format!("user {} not found", user_id))?;
    if !user.is_active {
        anyhow::bail!("user {} is not active", user_id);
    }
    Ok(Actor::new(user.id, user.role))
}

async fn handle_approval_command(db: &PgStore, cmd: cli::ApprovalCommands) -> anyhow::Result<()> {
    // Inline sinks: the process exits as soon as the command returns.
    let engine = ApprovalEngine::new(Arc::new(db.clone()))
        .with_notifier(Arc::new(InboxNotifier::new(db.clone())))
        .with_audit(Arc::new(PgAuditSink::inline(db.clone())));
    match cmd {
        cli::ApprovalCommands::List {
            as_user,
            status,
            request_type,
            for_approval,
            page,
            limit,
        } => {
            let actor = actor_for(db, as_user).await?;
            let page = engine
                .list_requests(
                    &actor,
                    ListParams {
                        page: Some(page),
                        limit: Some(limit),
                        status,
                        request_type,
                        for_approval,
                    },
                )
                .await?;

            if page.requests.is_empty() {
                println!("No approval requests.");
                return Ok(());
            }

            println!(
                "{:<8} {:<22} {:<10} {:<12} {:<30} EXPIRES",
                "ID", "TYPE", "STATUS", "APPROVER", "TITLE"
            );
            for r in &page.requests {
                let title = if r.title.chars().count() > 30 {
                    format!("{}...", r.title.chars().take(27).collect::<String>())
                } else {
                    r.title.clone()
                };
                println!(
                    "{:<8} {:<22} {:<10} {:<12} {:<30} {}",
                    r.id, r.request_type, r.status, r.approver_role, title, r.expires_at
                );
            }
            println!(
                "page {}/{} ({} total)",
                page.page, page.total_pages, page.total
            );
        }
        cli::ApprovalCommands::Approve {
            request_id,
            as_user,
            reason,
        } => {
            let actor = actor_for(db, as_user).await?;
            let outcome = engine
                .decide(&actor, request_id, Decision::Approve, reason)
                .await?;
            println!("Request {} approved.", outcome.request.id);
            println!("{}", serde_json::to_string_pretty(&outcome.effect)?);
        }
        cli::ApprovalCommands::Reject {
            request_id,
            as_user,
            reason,
        } => {
            let actor = actor_for(db, as_user).await?;
            let outcome = engine
                .decide(&actor, request_id, Decision::Reject, reason)
                .await?;
            println!("Request {} rejected.", outcome.request.id);
        }
    }
    Ok(())
}

async fn handle_token_command(
    db: &PgStore,
    cfg: &Config,
    cmd: cli::TokenCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Issue { user_id } => {
            let actor = actor_for(db, user_id).await?;
            let keys = JwtKeys::new(cfg.jwt_secret.as_bytes(), cfg.token_ttl_secs);
            let token = keys.issue(actor.user_id, &actor.role)?;
            println!("{}", token);
        }
    }
    Ok(())
}

async fn handle_user_command(db: &PgStore, cmd: cli::UserCommands) -> anyhow::Result<()> {
    match cmd {
        cli::UserCommands::Create {
            username,
            role,
            password,
            wallet,
            company,
        } => {
            let role = Role::parse(&role).with_context(|| format!("unknown role '{}'", role))?;
            if role.requires_super_admin_approval() {
                anyhow::bail!(
                    "'{}' is a supplier role; onboard it through an approval request",
                    role
                );
            }
            let (password, generated) = match password {
                Some(p) => (p, false),
                None => (credential::generate_temporary_credential(), true),
            };
            let user = db
                .insert_user(&NewUser {
                    username,
                    wallet_address: wallet.map(|w| w.to_lowercase()),
                    role: role.as_str().to_string(),
                    password_hash: credential::hash_credential(&password),
                    company_name: company,
                })
                .await?;
            tracing::info!(user_id = user.id, role = %user.role, "user created from CLI");
            println!("Created user {} ({}) with id {}.", user.username, user.role, user.id);
            if generated {
                println!("Password: {}", password);
            }
        }
    }
    Ok(())
}
