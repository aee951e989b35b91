mod flash_file;
mod host;
mod link;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
