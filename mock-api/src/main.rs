use clap::Parser;
use mock_api::{MockState, LOGIN_PATH, MEASUREMENTS_PATH, SOCKET_PATH};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(about = "Local stand-in for the weather station backend")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "MOCK_API_ADDR", default_value = "127.0.0.1:8080")]
    addr: String,

    /// Accepted login
    #[arg(long, env = "API_USER", default_value = "sensors")]
    user: String,

    /// Accepted password
    #[arg(long, env = "API_PASSWORD", default_value = "123456")]
    password: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting mock API");
    info!(
        "Login: {}, measurements: {}/<kind>, socket: {}",
        LOGIN_PATH, MEASUREMENTS_PATH, SOCKET_PATH
    );

    let state = MockState::new(args.user, args.password);
    let server_handle = match mock_api::spawn(state, &args.addr).await {
        Ok((_, handle)) => handle,
        Err(e) => {
            error!("Failed to bind to {}: {}", args.addr, e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = server_handle => {
            error!("Mock API server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}
