//! Protocol/cipher matrix example.
//!
//! This example probes which TLS 1.2 and TLS 1.3 suites a server accepts and
//! whether it enforces TLS_FALLBACK_SCSV and negotiates ALPN.
//!
//! Run with: cargo run --example probe_matrix -- example.com:443

use std::env;
use tlsprobe::{ProbeRequest, Prober, Settings};

fn main() {
    let address = env::args()
        .nth(1)
        .unwrap_or_else(|| "example.com:443".to_string());
    println!("=== Protocol/Cipher Matrix for {} ===\n", address);

    let request = ProbeRequest::new(address.as_str()).protocols(vec!["TLS v1.3", "TLS v1.2"]);
    let report = Prober::new(Settings::default()).probe_all(&request);

    println!("{:<10} {:<50} {:<8} {}", "Version", "Cipher Suite", "ID", "Result");
    println!("{}", "=".repeat(80));
    for row in report.results.iter().filter(|r| r.supported) {
        let result = if row.succeeded() { "accepted" } else { "rejected" };
        println!(
            "{:<10} {:<50} {:<8} {}",
            row.version, row.cipher_suite_name, row.cipher_suite_id, result
        );
    }

    println!();
    for check in &[&report.fallback_scsv, &report.alpn] {
        match check.supported {
            Some(supported) => println!("{}: {} {}", check.check, supported, check.detail),
            None => println!("{}: unknown ({})", check.check, check.error),
        }
    }
}
