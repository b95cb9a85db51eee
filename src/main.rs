use vm_fleet_manager::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
