use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::{Path, PathBuf};
use std::process::exit;
use tlsprobe::{
    check_transparency, AuxiliaryCheck, Certificate, ChainRetriever, Config, HttpTransport,
    ProbeReport, ProbeRequest, Prober, Resolver, Settings,
};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "tlsprobe.toml";

#[derive(Parser)]
#[command(name = "tlsprobe")]
#[command(version, author, about = env!("CARGO_PKG_DESCRIPTION"), long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Per-handshake timeout in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Maximum attempts for operations failing with I/O timeouts
    #[arg(long, global = true, value_name = "N")]
    max_attempts: Option<u32>,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Enumerate the protocol/cipher pairs an endpoint accepts
    Probe {
        /// Target as host:port
        address: String,

        /// Protocol to probe, e.g. "TLS v1.2" (repeatable, default: all)
        #[arg(short = 'p', long = "protocol")]
        protocols: Vec<String>,

        /// Cipher suite to probe, IANA name (repeatable, default: all)
        #[arg(short = 'c', long = "cipher")]
        ciphers: Vec<String>,

        /// Only show pairs the server accepted
        #[arg(long)]
        accepted_only: bool,
    },
    /// Retrieve and inspect the certificate chain of a domain
    Cert {
        domain: String,

        /// Port to connect to (default: 443)
        #[arg(long)]
        port: Option<u16>,

        /// Check revocation status through CRL and OCSP
        #[arg(long)]
        revocation: bool,

        /// Check presence in certificate transparency logs (crt.sh)
        #[arg(long)]
        transparency: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.example_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let command = match cli.command {
        Some(ref command) => command,
        None => {
            eprintln!("Error: a subcommand is required (see --help)");
            exit(2);
        }
    };

    let port = match command {
        Command::Cert { port, .. } => *port,
        Command::Probe { .. } => None,
    };
    let settings = match load_settings(cli.config.as_deref(), cli.timeout_ms, port, cli.max_attempts)
    {
        Ok(settings) => settings,
        Err(message) => {
            eprintln!("Error: {}", message);
            exit(2);
        }
    };

    let code = match command {
        Command::Probe {
            address,
            protocols,
            ciphers,
            accepted_only,
        } => run_probe(settings, address, protocols, ciphers, *accepted_only, cli.json),
        Command::Cert {
            domain,
            revocation,
            transparency,
            ..
        } => run_cert(settings, domain, *revocation, *transparency, cli.json),
    };
    exit(code);
}

fn load_settings(
    path: Option<&Path>,
    timeout_ms: Option<u64>,
    port: Option<u16>,
    max_attempts: Option<u32>,
) -> Result<Settings, String> {
    let file_config = match path {
        Some(path) => Config::from_file(path)
            .map_err(|e| format!("failed to load config file {}: {}", path.display(), e))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            debug!(file = DEFAULT_CONFIG_FILE, "loading default config file");
            Config::from_file(DEFAULT_CONFIG_FILE).map_err(|e| {
                format!("failed to load config file {}: {}", DEFAULT_CONFIG_FILE, e)
            })?
        }
        None => Config::default(),
    };
    let cli_config = Config::from_cli_args(timeout_ms, port, max_attempts);
    file_config
        .merge_with(cli_config)
        .resolve()
        .map_err(|e| e.to_string())
}

fn run_probe(
    settings: Settings,
    address: &str,
    protocols: &[String],
    ciphers: &[String],
    accepted_only: bool,
    json: bool,
) -> i32 {
    let mut request = ProbeRequest::new(address);
    if !protocols.is_empty() {
        request = request.protocols(protocols.iter().cloned());
    }
    if !ciphers.is_empty() {
        request = request.ciphers(ciphers.iter().cloned());
    }

    let mut report = Prober::new(settings).probe_all(&request);
    if accepted_only {
        report.results.retain(|r| r.succeeded());
    }

    if json {
        return print_json(&report);
    }
    print_probe_table(&report);
    0
}

fn print_probe_table(report: &ProbeReport) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Version", "Cipher Suite", "ID", "Accepted", "Error"]);
    for row in &report.results {
        let accepted = if row.succeeded() { "yes" } else { "no" };
        table.add_row(vec![
            row.version.as_str(),
            row.cipher_suite_name.as_str(),
            row.cipher_suite_id.as_str(),
            accepted,
            row.error.as_str(),
        ]);
    }
    println!("{}", table);

    let mut checks = Table::new();
    checks
        .load_preset(UTF8_FULL)
        .set_header(vec!["Check", "Supported", "Detail"]);
    for check in &[&report.fallback_scsv, &report.alpn] {
        checks.add_row(vec![check.check.to_string(), verdict(check), detail(check)]);
    }
    println!("{}", checks);
}

fn verdict(check: &AuxiliaryCheck) -> String {
    match check.supported {
        Some(true) => "yes".to_string(),
        Some(false) => "no".to_string(),
        None => "unknown".to_string(),
    }
}

fn detail(check: &AuxiliaryCheck) -> String {
    if check.error.is_empty() {
        check.detail.clone()
    } else {
        check.error.clone()
    }
}

fn run_cert(settings: Settings, domain: &str, revocation: bool, transparency: bool, json: bool) -> i32 {
    let mut leaf = match ChainRetriever::new(settings.clone()).retrieve(domain) {
        Ok(Some(leaf)) => leaf,
        Ok(None) => {
            eprintln!("{} presented no certificates", domain);
            return 0;
        }
        Err(e) => {
            error!(domain, error = %e, "certificate retrieval failed");
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    if revocation {
        let status = Resolver::new(&settings)
            .and_then(|resolver| resolver.resolve(&leaf, leaf.issuer_certificate()));
        leaf.attach_revocation(status);
    }
    if transparency {
        let logged = HttpTransport::new(&settings).and_then(|t| check_transparency(&t, &leaf));
        match logged {
            Ok(logged) => leaf.transparent = logged,
            Err(e) => eprintln!("Warning: transparency check failed: {}", e),
        }
    }

    if json {
        return print_json(&leaf);
    }
    print_certificate_table(&leaf);
    0
}

fn print_certificate_table(leaf: &Certificate) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Field", "Value"]);

    let optional = |value: Option<bool>| match value {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    };
    let rows: Vec<(&str, String)> = vec![
        ("Domain", leaf.domain.clone()),
        ("IP Address", leaf.ip_address.clone()),
        ("Common Name", leaf.common_name.clone()),
        ("Subject", leaf.subject.clone()),
        ("Issuer", leaf.issuer_name.clone()),
        ("Serial Number", leaf.serial_number.clone()),
        ("Not Before", leaf.not_before.to_rfc3339()),
        ("Not After", leaf.not_after.to_rfc3339()),
        ("Signature Algorithm", leaf.signature_algorithm.clone()),
        (
            "Public Key",
            format!("{} {}", leaf.public_key_algorithm, leaf.public_key_length),
        ),
        ("DNS Names", leaf.dns_names.join("\n")),
        ("OCSP Server", leaf.ocsp_server.join("\n")),
        ("CRL Distribution Points", leaf.crl_distribution_points.join("\n")),
        ("Revoked", optional(leaf.is_revoked)),
        (
            "OCSP Status",
            leaf.ocsp
                .as_ref()
                .map(|o| o.status.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        (
            "Revocation Error",
            leaf.revocation_error.clone().unwrap_or_default(),
        ),
        ("Transparent", optional(leaf.transparent)),
    ];
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value]);
    }
    println!("{}", table);

    if !leaf.chain.is_empty() {
        let mut chain = Table::new();
        chain
            .load_preset(UTF8_FULL)
            .set_header(vec!["#", "Subject", "Issuer", "Not After", "CA"]);
        for (i, cert) in leaf.chain.iter().enumerate() {
            chain.add_row(vec![
                (i + 1).to_string(),
                cert.common_name.clone(),
                cert.issuer_name.clone(),
                cert.not_after.to_rfc3339(),
                cert.is_ca.to_string(),
            ]);
        }
        println!("{}", chain);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: failed to serialize output: {}", e);
            1
        }
    }
}
