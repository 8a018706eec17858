#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crm_inbox::app::run().await
}
