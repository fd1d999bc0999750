//! Certificate revocation checking example.
//!
//! This example demonstrates how to check certificate revocation status
//! by cross-checking CRL and OCSP.
//!
//! Run with: cargo run --example revocation_check

use tlsprobe::{ChainRetriever, OcspStatus, Resolver, Settings};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== TLS Certificate Revocation Check ===\n");

    let settings = Settings::default();
    let retriever = ChainRetriever::new(settings.clone());
    let resolver = Resolver::new(&settings)?;

    let hosts = vec![
        "google.com",
        "github.com",
        // Note: revoked.badssl.com provides a revoked certificate for testing
        "revoked.badssl.com",
    ];

    for host in hosts {
        println!("Checking {}...", host);

        let leaf = match retriever.retrieve(host) {
            Ok(Some(leaf)) => leaf,
            Ok(None) => {
                println!("  No certificates presented\n");
                continue;
            }
            Err(e) => {
                println!("  Error: {}\n", e);
                continue;
            }
        };

        match resolver.resolve(&leaf, leaf.issuer_certificate()) {
            Ok(status) => {
                print!("  Status: ");
                if status.is_revoked {
                    println!("✗ REVOKED");
                } else {
                    println!("✓ Valid (not revoked)");
                }
                if let Some(ocsp) = status.ocsp {
                    match ocsp.status {
                        OcspStatus::Revoked => println!(
                            "  OCSP: revoked ({})",
                            ocsp.revocation_reason.unwrap_or_default()
                        ),
                        other => println!("  OCSP: {}", other),
                    }
                }
            }
            Err(e) => {
                println!("  ? Unknown: {}", e);
            }
        }

        println!("  Expires {}", leaf.not_after);
        println!();
    }

    Ok(())
}
