use anyhow::{anyhow, Context, Result};
use vext_cli::{Cli, CliSignaturePolicy};
use vext_core::current_unix_timestamp;
use vext_signing::{
    apply_trust_store_mutations, authorize_certificate, load_trust_store,
    render_signature_verify_report, save_trust_store, verify_package_dir, verify_package_with, SignatureVerifyReport,
    SigningCertificate, PACKAGE_CERTIFICATE_FILE_NAME,
};

use crate::{
    install::{install_package, render_install_report, InstallOptions, SignaturePolicy},
    pack::{pack_extension, render_pack_report},
    package::{render_inspect_report, ExtensionPackage},
};

impl From<CliSignaturePolicy> for SignaturePolicy {
    fn from(value: CliSignaturePolicy) -> Self {
        match value {
            CliSignaturePolicy::Skip => Self::Skip,
            CliSignaturePolicy::VerifyIfSigned => Self::VerifyIfSigned,
            CliSignaturePolicy::RequireSigned => Self::RequireSigned,
        }
    }
}

pub fn execute_extension_package_command(cli: &Cli) -> Result<()> {
    let Some(source) = cli.extension_package.as_deref() else {
        return Ok(());
    };
    let report = pack_extension(source, cli.extension_sign.as_deref())
        .with_context(|| format!("failed to pack extension {}", source.display()))?;
    println!("{}", render_pack_report(&report));
    Ok(())
}

pub fn execute_extension_verify_command(cli: &Cli) -> Result<()> {
    let Some(root) = cli.extension_verify.as_deref() else {
        return Ok(());
    };
    let certificate_path = cli
        .extension_certificate
        .clone()
        .unwrap_or_else(|| root.join(PACKAGE_CERTIFICATE_FILE_NAME));
    let certificate = SigningCertificate::load(&certificate_path)?;

    let report = match cli.extension_trust_store.as_deref() {
        Some(store_path) => {
            let records = load_trust_store(store_path)?;
            let key = authorize_certificate(&records, &certificate, current_unix_timestamp())?;
            let files = verify_package_with(root, &key)?;
            SignatureVerifyReport {
                package_root: root.to_path_buf(),
                files,
                certificate_id: certificate.id.clone(),
                fingerprint: certificate.fingerprint(),
            }
        }
        None => verify_package_dir(root, &certificate)?,
    };
    println!("{}", render_signature_verify_report(&report));
    Ok(())
}

pub fn execute_extension_install_command(cli: &Cli) -> Result<()> {
    let Some(archive) = cli.extension_install.as_deref() else {
        return Ok(());
    };
    let trust_records = match cli.extension_trust_store.as_deref() {
        Some(path) => load_trust_store(path)?,
        None => Vec::new(),
    };
    let policy = if cli.extension_require_signed {
        SignaturePolicy::RequireSigned
    } else {
        cli.extension_signature_policy.into()
    };
    let options = InstallOptions {
        root: cli.extension_install_root.clone(),
        host_product: Some(cli.extension_product.clone()),
        policy,
        trust_records,
        now_unix: current_unix_timestamp(),
    };

    let package = ExtensionPackage::open(
        archive,
        &options.root,
        cli.extension_install_revision,
    )
    .with_context(|| format!("failed to load extension archive {}", archive.display()))?;
    let report = install_package(package, &options)
        .with_context(|| format!("failed to install {}", archive.display()))?;
    println!("{}", render_install_report(&report));
    Ok(())
}

pub fn execute_extension_inspect_command(cli: &Cli) -> Result<()> {
    let Some(target) = cli.extension_inspect.as_deref() else {
        return Ok(());
    };
    let scratch = tempfile::tempdir().context("failed to create inspection dir")?;
    let package = if target.is_dir() {
        ExtensionPackage::from_dir(target, cli.extension_install_revision)
    } else {
        ExtensionPackage::open(target, scratch.path(), cli.extension_install_revision)
    }
    .with_context(|| format!("failed to inspect {}", target.display()))?;

    if cli.extension_inspect_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&package.manifest)
                .context("failed to render extension inspect json")?
        );
    } else {
        println!("{}", render_inspect_report(&package));
    }
    Ok(())
}

pub fn execute_extension_trust_command(cli: &Cli) -> Result<()> {
    if cli.extension_trust_add.is_empty()
        && cli.extension_trust_revoke.is_empty()
        && cli.extension_trust_rotate.is_empty()
    {
        return Ok(());
    }
    let store_path = cli
        .extension_trust_store
        .as_deref()
        .ok_or_else(|| anyhow!("--extension-trust-store is required for trust mutations"))?;
    let mut records = load_trust_store(store_path)?;
    let report = apply_trust_store_mutations(
        &mut records,
        &cli.extension_trust_add,
        &cli.extension_trust_revoke,
        &cli.extension_trust_rotate,
    )?;
    save_trust_store(store_path, &records)?;
    println!(
        "extension trust: store={} added={} updated={} revoked={} rotated={} total={}",
        store_path.display(),
        report.added,
        report.updated,
        report.revoked,
        report.rotated,
        records.len()
    );
    Ok(())
}
