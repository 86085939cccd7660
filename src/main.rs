#[tokio::main]
async fn main() -> anyhow::Result<()> {
    learnflow::run().await
}
