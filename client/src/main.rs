use clap::Parser;
use client::network::Client;
use log::{error, info};
use shared::{SERVER_HOST, SERVER_PORT};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = SERVER_HOST)]
    server: String,

    /// Server port
    #[arg(short = 'p', long, default_value_t = SERVER_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.server, args.port);

    info!("Starting client...");
    let client = match Client::connect(&address).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to {}: {}", address, e);
            return Err(e);
        }
    };

    client.run().await?;

    Ok(())
}
