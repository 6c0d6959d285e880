#![allow(clippy::uninlined_format_args)]

use mailsift::cache::TtlCache;
use mailsift::domain_age::{registrable_domain, DomainAge, DomainAgeAssessor, RegistryClient, WhoisClient};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("Testing REAL WHOIS lookups...");

    let client = Arc::new(WhoisClient::new(Duration::from_secs(10))?);
    let assessor = DomainAgeAssessor::new(
        client.clone(),
        30,
        Duration::from_secs(20),
        TtlCache::new(100, Duration::from_secs(3600)),
    );

    let test_domains = vec!["google.com", "example.com", "github.com", "mail.bbc.co.uk"];

    for domain in test_domains {
        let root = registrable_domain(domain);
        println!("\n=== Testing domain: {} (registry name: {}) ===", domain, root);

        match client.creation_dates(&root).await {
            Ok(dates) if dates.is_empty() => println!("  No creation date in the record"),
            Ok(dates) => println!("  Creation dates: {:?}", dates),
            Err(e) => println!("  ❌ Lookup failed: {:#}", e),
        }

        match assessor.assess(domain).await {
            DomainAge::Established { age_days } => {
                println!("  ✅ Established, {} days old", age_days)
            }
            DomainAge::New { age_days } => {
                println!("  🚨 New domain, {} days old", age_days)
            }
            DomainAge::Unknown { detail } => {
                println!("  ⚠️  Age unknown ({}), treated as new", detail)
            }
        }
    }

    Ok(())
}
