use chain_fallback::{Address, CircuitState, FallbackConfig, FallbackManager, FallbackPolicy};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = FallbackConfig::default_networks().with_policy(
        FallbackPolicy::default()
            .with_health_check_interval(Duration::from_secs(30))
            .with_request_timeout(Duration::from_secs(15))
            .with_start_health_check_on_init(true),
    );

    let manager = FallbackManager::new(config)?;
    manager.run_health_check().await;

    for network in manager.networks() {
        println!(
            "{}: {} providers healthy out of {} total",
            network,
            manager.healthy_provider_count(&network),
            manager.provider_count(&network)
        );
    }

    println!("\nProvider Health Status:");
    println!("{:-<72}", "");
    for report in manager.get_provider_health(None) {
        let status_str = match (report.enabled, report.circuit) {
            (false, _) => "- Disabled",
            (true, CircuitState::Open | CircuitState::HalfOpen) => "✗ Circuit open",
            (true, CircuitState::Closed) if report.is_healthy() => "✓ Healthy",
            (true, CircuitState::Closed) => "⚠ Degraded",
        };
        println!(
            "  {:<16} {:<10} score {:>3}  {}",
            report.network, report.provider, report.health_score, status_str
        );
    }
    println!("{:-<72}", "");

    let block_number = manager
        .execute_with_fallback(
            "ethereum",
            |client| async move { client.get_block_number().await },
            "get_block_number",
        )
        .await?;
    println!("Current block number: {}", block_number);

    let gas_price = manager
        .execute_with_fallback(
            "ethereum",
            |client| async move { client.get_gas_price().await },
            "get_gas_price",
        )
        .await?;
    println!("Gas price: {} gwei", gas_price / 1_000_000_000);

    // vitalik.eth
    let address: Address = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".parse()?;
    println!("\nFetching balance of {}...", address);
    let balance = manager
        .execute_with_fallback(
            "ethereum",
            move |client| async move { client.get_balance(address).await },
            "get_balance",
        )
        .await?;
    println!(
        "Balance: {} ETH",
        balance.to_string().parse::<f64>().unwrap_or(0.0) / 1e18
    );

    if let Some(selected) = manager.get_client_with_fallback("ethereum") {
        let chain_id = selected.client.get_chain_id().await?;
        println!("Chain ID {} via {}", chain_id, selected.provider);
    }

    manager.shutdown();
    println!("\nShutdown complete!");

    Ok(())
}
