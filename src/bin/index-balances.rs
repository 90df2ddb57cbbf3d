#[tokio::main]
pub async fn main() -> Result<(), anyhow::Error> {
    balance_indexer::index_balances().await?;
    Ok(())
}
