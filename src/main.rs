#[tokio::main]
async fn main() -> anyhow::Result<()> {
    screencast_lib::run().await
}
