use clap::Parser;

use order_book_server::cli::run_repl;

/// Interactive client for the order book server.
#[derive(Parser)]
#[command(name = "order-book-client", version, about)]
struct Args {
    /// Server host to connect to on startup; without it, use `connect`
    /// inside the session.
    host: Option<String>,

    /// Server port.
    #[arg(default_value_t = 5555)]
    port: u16,
}

fn main() {
    let args = Args::parse();
    let initial = args.host.map(|host| (host, args.port));
    std::process::exit(run_repl(initial));
}
