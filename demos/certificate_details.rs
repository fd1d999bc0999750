//! Detailed certificate information example.
//!
//! This example shows how to retrieve a certificate chain and display the
//! normalized leaf fields and its issuers.
//!
//! Run with: cargo run --example certificate_details

use tlsprobe::{ChainRetriever, Settings};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Detailed Certificate Information ===\n");

    let cert = match ChainRetriever::new(Settings::default()).retrieve("github.com")? {
        Some(cert) => cert,
        None => {
            println!("github.com presented no certificates");
            return Ok(());
        }
    };

    println!("┌─ Certificate Information");
    println!("│");
    println!("├─ Domain: {} ({})", cert.domain, cert.ip_address);
    println!("├─ Serial Number: {}", cert.serial_number);
    println!("├─ Signature Algorithm: {}", cert.signature_algorithm);
    println!(
        "├─ Public Key: {} ({} bits)",
        cert.public_key_algorithm, cert.public_key_length
    );
    println!("│");

    println!("├─ Subject:");
    println!("│  ├─ Common Name: {}", cert.common_name);
    println!("│  ├─ Organization: {}", cert.organization);
    println!("│  ├─ Org Unit: {}", cert.organizational_unit);
    println!("│  ├─ Locality: {}", cert.locality);
    println!("│  ├─ State: {}", cert.state);
    println!("│  └─ Country: {}", cert.country);
    println!("│");

    println!("├─ Issuer: {}", cert.issuer_name);
    println!("│");

    println!("├─ Validity:");
    println!("│  ├─ From: {}", cert.not_before);
    println!("│  └─ To: {}", cert.not_after);
    println!("│");

    println!("├─ Subject Alternative Names:");
    for (i, san) in cert.dns_names.iter().enumerate() {
        let prefix = if i == cert.dns_names.len() - 1 { "└─" } else { "├─" };
        println!("│  {} {}", prefix, san);
    }
    println!("│");

    println!("├─ Revocation Endpoints:");
    println!("│  ├─ OCSP: {}", cert.ocsp_server.join(", "));
    println!("│  └─ CRL: {}", cert.crl_distribution_points.join(", "));
    println!("│");

    println!("└─ Certificate Chain ({} certificates):", cert.chain.len());
    for (i, chain_cert) in cert.chain.iter().enumerate() {
        let prefix = if i == cert.chain.len() - 1 { "└─" } else { "├─" };
        println!("   {} Certificate #{}", prefix, i + 1);
        println!("      ├─ Subject: {}", chain_cert.subject);
        println!("      ├─ Issuer: {}", chain_cert.issuer);
        println!("      └─ Valid Until: {}", chain_cert.not_after);
    }

    Ok(())
}
