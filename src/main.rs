use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use quorumd::config::Config;
use quorumd::core::arbitrator::Arbitrator;
use quorumd::core::node::Node;
use quorumd::core::pool::ConnectionPool;
use quorumd::core::state::ArbitratorState;
use quorumd::errors::ArbiterError;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::parse(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("quorumd: {e}");
            return ExitCode::from(1);
        }
    };

    init_logging(config.debug);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "unrecoverable runtime error");
            ExitCode::from(100)
        }
    }
}

fn init_logging(debug: bool) {
    let filter = std::env::var("RUST_LOG").ok().map(EnvFilter::new).unwrap_or_else(|| {
        let level = if debug { "debug" } else { "info" };
        EnvFilter::new(format!("quorumd={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .compact()
        .init();
}

async fn run(config: Config) -> Result<(), ArbiterError> {
    let pool = Arc::new(ConnectionPool::new());
    let seed = Node::new(
        config.seed_host.clone(),
        config.seed_port,
        config.mysql_user.clone(),
        config.mysql_password.clone(),
        pool.clone(),
    );

    let state = Arc::new(ArbitratorState::new(seed.clone()));
    let started_at = Utc::now();

    let http_state = state.clone();
    let http_port = config.http_port;
    let http_task = tokio::spawn(async move {
        let app = quorumd::http::router(http_state, started_at);
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port))
            .await
            .map_err(|e| ArbiterError::PermanentConfig(format!("binding :{http_port}: {e}")))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| ArbiterError::Transient(e.to_string()))
    });

    let loop_task = tokio::spawn(async move {
        let mut arbitrator = Arbitrator::new(state, seed);
        let mut last_view = Vec::new();
        arbitrator.run(&mut last_view).await;
    });

    tokio::select! {
        res = http_task => {
            res.map_err(|e| ArbiterError::Transient(e.to_string()))??;
        }
        _ = loop_task => {}
    }

    Ok(())
}
