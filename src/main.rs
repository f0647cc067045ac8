use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use order_book_server::server::{Server, ServerConfig};

/// Limit order book matching service over TCP.
#[derive(Parser)]
#[command(name = "order-book-server", version, about)]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 5555)]
    port: u16,

    /// Worker threads; one concurrent session per worker.
    #[arg(long, default_value_t = 8)]
    workers: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // A failed engine invariant is a bug in the matching loop; take the
    // whole process down rather than limping on with a corrupt book.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::abort();
    }));

    let args = Args::parse();
    let config = ServerConfig {
        bind: args.bind,
        port: args.port,
        workers: args.workers,
    };
    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    server.run();
}
