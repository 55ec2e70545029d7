#[tokio::main]
async fn main() {
    if let Err(err) = tabwright_cli::cli::app::run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
