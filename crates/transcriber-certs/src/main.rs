//! Transcriber certificate bootstrap CLI.
//!
//! Provisions the CA, backend and worker identities used for mutual TLS.
//! Running it without arguments bootstraps `certs/` with the defaults.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use transcriber_pki::naming::is_plain_file_name;
use transcriber_pki::verify::VerifyReport;
use transcriber_pki::{
    bootstrap, issue_client, verify_directory, BootstrapConfig, ConfigFile, KeySize, LeafProfile,
    NamingScheme, PemCertificate, SubjectName,
};

/// Transcriber mTLS certificate bootstrap
#[derive(Parser, Debug)]
#[command(name = "transcriber-certs")]
#[command(about = "Provision the Transcriber backend/worker mTLS certificates", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new CA plus server and worker certificates
    Init {
        #[command(flatten)]
        layout: LayoutArgs,

        /// RSA key size (2048, 3072 or 4096)
        #[arg(long)]
        key_bits: Option<u32>,

        /// Delete CSR and serial files after a successful run
        #[arg(long)]
        discard_intermediates: bool,
    },

    /// Verify that the server and worker certificates chain to the CA
    Verify {
        #[command(flatten)]
        layout: LayoutArgs,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Issue an extra client identity (e.g. a third-party integration)
    Issue {
        /// Identity name, used for the file names
        name: String,

        /// Subject Common Name of the new certificate
        #[arg(long)]
        common_name: String,

        /// Validity in days
        #[arg(long, default_value = "365")]
        days: u32,

        #[command(flatten)]
        layout: LayoutArgs,
    },

    /// Print a certificate's subject DN in RFC 2253 form
    #[command(name = "show-dn")]
    ShowDn {
        /// Path to a PEM certificate
        cert: PathBuf,
    },
}

#[derive(clap::Args, Debug, Default)]
struct LayoutArgs {
    /// Output directory
    #[arg(long = "dir", visible_alias = "out-dir")]
    dir: Option<PathBuf>,

    /// File naming scheme
    #[arg(long, value_enum)]
    naming: Option<NamingArg>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NamingArg {
    /// ca.key, ca.crt, server.crt, worker.crt, ...
    Classic,
    /// transcriber_ca.pem, transcriber_server.pem, ...
    Transcriber,
}

impl From<NamingArg> for NamingScheme {
    fn from(arg: NamingArg) -> Self {
        match arg {
            NamingArg::Classic => NamingScheme::Classic,
            NamingArg::Transcriber => NamingScheme::Transcriber,
        }
    }
}

impl LayoutArgs {
    /// Defaults, overlaid by the config file, overlaid by flags.
    fn resolve(&self) -> Result<BootstrapConfig, Box<dyn std::error::Error>> {
        let mut file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        if let Some(naming) = self.naming {
            file.naming = Some(naming.into());
        }
        if let Some(dir) = &self.dir {
            file.out_dir = Some(dir.clone());
        }
        Ok(file.into_config())
    }

    fn scheme(&self) -> Result<NamingScheme, Box<dyn std::error::Error>> {
        if let Some(naming) = self.naming {
            return Ok(naming.into());
        }
        match &self.config {
            Some(path) => Ok(ConfigFile::load(path)?.naming_scheme()),
            None => Ok(NamingScheme::default()),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.unwrap_or(Commands::Init {
        layout: LayoutArgs::default(),
        key_bits: None,
        discard_intermediates: false,
    });

    match run(command) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Init {
            layout,
            key_bits,
            discard_intermediates,
        } => {
            let mut config = layout.resolve()?;
            if let Some(bits) = key_bits {
                config.key_size = KeySize::try_from(bits)?;
            }
            if discard_intermediates {
                config.retain_intermediates = false;
            }
            init(&config)
        }
        Commands::Verify { layout, json } => {
            let config = layout.resolve()?;
            let report = verify_directory(&config.out_dir, &config.names)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(if report.all_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Issue {
            name,
            common_name,
            days,
            layout,
        } => {
            let config = layout.resolve()?;
            let scheme = layout.scheme()?;
            issue(&config, scheme, &name, common_name, days)
        }
        Commands::ShowDn { cert } => {
            let summary = PemCertificate::read(&cert)?.summary()?;
            println!("{}", summary.subject);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init(config: &BootstrapConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    info!(out_dir = %config.out_dir.display(), "Bootstrapping certificate authority");

    let report = match bootstrap(config) {
        Ok(report) => report,
        Err(e) if e.is_conflict() => {
            eprintln!("{e}");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    println!("Certificates written to {}", report.out_dir.display());
    println!("  CA certificate:     {}", report.paths.ca_cert.display());
    println!("  CA key:             {}", report.paths.ca_key.display());
    println!("  Server certificate: {}", report.paths.server.cert.display());
    println!("  Server key:         {}", report.paths.server.key.display());
    println!("  Worker certificate: {}", report.paths.worker.cert.display());
    println!("  Worker key:         {}", report.paths.worker.key.display());
    println!();
    println!("Worker client DN: {}", config.worker.subject.to_rfc2253());
    println!(
        "Leaf certificates expire {}",
        report.worker.not_after.format("%Y-%m-%d %H:%M:%S UTC")
    );

    Ok(ExitCode::SUCCESS)
}

fn issue(
    config: &BootstrapConfig,
    scheme: NamingScheme,
    name: &str,
    common_name: String,
    days: u32,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if days == 0 {
        return Err("validity must be at least one day".into());
    }
    if !is_plain_file_name(name) {
        return Err(format!("identity name '{name}' must not contain path separators").into());
    }

    // Extra identities share the organisation fields of the worker.
    let profile = LeafProfile {
        subject: SubjectName {
            common_name,
            ..config.worker.subject.clone()
        },
        validity_days: days,
        subject_alt_names: Vec::new(),
    };

    let leaf_paths = scheme.client_names(name).resolve(&config.out_dir);
    let issued = match issue_client(
        &config.out_dir,
        &config.names,
        &leaf_paths,
        &profile,
        config.key_size,
    ) {
        Ok(issued) => issued,
        Err(e) if e.is_conflict() => {
            eprintln!("{e}");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    println!("Issued {}", issued.paths.cert.display());
    println!("  Key:       {}", issued.paths.key.display());
    println!("  Client DN: {}", profile.subject.to_rfc2253());
    println!("  Serial:    {:X}", issued.certificate.serial);
    println!(
        "  Expires:   {}",
        issued.certificate.not_after.format("%Y-%m-%d %H:%M:%S UTC")
    );

    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &VerifyReport) {
    println!("CA: {}", report.ca.subject);
    println!("    {}", report.ca_path.display());
    println!("    sha256 {}", report.ca.fingerprint_sha256);
    println!(
        "    valid {} .. {}",
        report.ca.not_before.format("%Y-%m-%d"),
        report.ca.not_after.format("%Y-%m-%d")
    );
    println!("{}", "-".repeat(72));
    println!("{:<8}  {:<6}  {:<20}  {}", "ROLE", "STATUS", "SERIAL", "SUBJECT");
    for leaf in &report.leaves {
        let status = if leaf.is_valid() { "ok" } else { "FAILED" };
        println!(
            "{:<8}  {:<6}  {:<20}  {}",
            leaf.role, status, leaf.certificate.serial, leaf.certificate.subject
        );
        if let Some(reason) = &leaf.error {
            println!("          {reason}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments_means_default_init() {
        let cli = Cli::try_parse_from(["transcriber-certs"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_layout_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "transcriber-certs",
            "init",
            "--out-dir",
            "pki",
            "--naming",
            "transcriber",
            "--key-bits",
            "2048",
        ])
        .unwrap();

        let Some(Commands::Init { layout, key_bits, .. }) = cli.command else {
            panic!("expected init");
        };
        let config = layout.resolve().unwrap();
        assert_eq!(config.out_dir, PathBuf::from("pki"));
        assert_eq!(config.names.ca_cert, "transcriber_ca.pem");
        assert_eq!(key_bits, Some(2048));
    }

    #[test]
    fn test_flags_override_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("certs.toml");
        std::fs::write(&path, "out_dir = \"from-file\"\nnaming = \"transcriber\"\n").unwrap();

        let layout = LayoutArgs {
            dir: Some(PathBuf::from("from-flag")),
            naming: None,
            config: Some(path),
        };
        let config = layout.resolve().unwrap();
        assert_eq!(config.out_dir, PathBuf::from("from-flag"));
        assert_eq!(config.names.server.cert, "transcriber_server.pem");
        assert_eq!(layout.scheme().unwrap(), NamingScheme::Transcriber);
    }

    #[test]
    fn test_issue_requires_common_name() {
        assert!(Cli::try_parse_from(["transcriber-certs", "issue", "kaltura"]).is_err());
        assert!(Cli::try_parse_from([
            "transcriber-certs",
            "issue",
            "kaltura",
            "--common-name",
            "transcriber-kaltura"
        ])
        .is_ok());
    }

    #[test]
    fn test_issue_rejects_path_like_names() {
        let tmp = tempfile::tempdir().unwrap();
        let config = BootstrapConfig {
            out_dir: tmp.path().join("certs"),
            ..BootstrapConfig::default()
        };

        for name in ["../kaltura", "nested/kaltura", "/tmp/kaltura"] {
            let result = issue(
                &config,
                NamingScheme::Classic,
                name,
                "transcriber-kaltura".to_string(),
                30,
            );
            assert!(result.is_err(), "accepted {name}");
        }
        assert!(!tmp.path().join("kaltura.key").exists());
    }

    #[test]
    fn test_init_then_issue_and_verify() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("certs");
        let layout = LayoutArgs {
            dir: Some(dir.clone()),
            ..LayoutArgs::default()
        };
        let mut config = layout.resolve().unwrap();
        config.key_size = KeySize::Rsa2048;

        assert_eq!(init(&config).unwrap(), ExitCode::SUCCESS);
        assert_eq!(init(&config).unwrap(), ExitCode::FAILURE);

        let code = issue(
            &config,
            NamingScheme::Classic,
            "kaltura",
            "transcriber-kaltura".to_string(),
            30,
        )
        .unwrap();
        assert_eq!(code, ExitCode::SUCCESS);

        let summary = PemCertificate::read(dir.join("kaltura.crt"))
            .unwrap()
            .summary()
            .unwrap();
        assert_eq!(
            summary.subject,
            "CN=transcriber-kaltura,O=Transcriber,ST=Uusimaa,C=FI"
        );
        assert_eq!(summary.validity_days(), 30);

        let report = verify_directory(&config.out_dir, &config.names).unwrap();
        assert!(report.all_valid());
    }
}
