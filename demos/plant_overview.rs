use serde_json::Value;
use solarmon_http::{ApiClient, ClientConfig, SOLAREDGE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let site_id = std::env::var("SOLAREDGE_SITE_ID")?;
    let config = ClientConfig::from_env(&SOLAREDGE).map_err(anyhow::Error::msg)?;
    let client = ApiClient::new(config)?;

    let endpoint = format!("/site/{site_id}/overview");
    for _ in 0..2 {
        let response = client.get::<Value>(&endpoint).await?;
        println!(
            "status={} cached={} duration={:?}",
            response.status, response.cached, response.duration
        );
        println!("{:#}", response.data);
    }

    let report = client.health_check();
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
