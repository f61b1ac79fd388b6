use history_ingest_lib::{cli::parse_args, commands};

#[tokio::main]
async fn main() {
    let cli = parse_args();
    let exit_code = commands::run(cli).await;
    std::process::exit(exit_code);
}
