use clap::Parser;
use log::{error, info};
use server::console::{help_text, OperatorCommand};
use server::error::CommandError;
use server::network::Server;
use shared::{SERVER_HOST, SERVER_PORT};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = SERVER_HOST)]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = SERVER_PORT)]
    port: u16,
    /// Maximum number of connected clients
    #[clap(short, long, default_value = "32")]
    max_clients: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, args.max_clients).await?;
    let handle = server.handle();
    let server_task = tokio::spawn(server.run());

    println!("Tank server running on {}", address);
    println!("{}", help_text());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match OperatorCommand::parse(&line) {
            Ok(OperatorCommand::Quit) => break,
            Ok(command) => match handle.execute(command).await {
                Some(report) => println!("{}", report),
                None => break,
            },
            Err(CommandError::Empty) => {}
            Err(e) => println!("{}", e),
        }
    }

    info!("Stopping server");
    handle.shutdown();
    if let Err(e) = server_task.await {
        error!("Server task panicked: {}", e);
    }

    println!("Server stopped");
    Ok(())
}
