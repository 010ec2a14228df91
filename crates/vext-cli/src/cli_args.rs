use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::{CliDebugLevel, CliSignaturePolicy};

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "vext",
    about = "Package, sign, install, and run version-control client extensions",
    version
)]
/// Public struct `Cli` used across vext components.
pub struct Cli {
    #[arg(
        long = "extension-search",
        env = "P4EXTENSIONS",
        help = "Comma-separated loose extension script patterns (name.53.lua style files)"
    )]
    pub extension_search: Vec<String>,

    #[arg(
        long = "extension-search-parents",
        env = "VEXT_EXTENSION_SEARCH_PARENTS",
        default_value_t = false,
        help = "Also search every ancestor of the start directory for relative patterns"
    )]
    pub extension_search_parents: bool,

    #[arg(
        long = "extension-start-dir",
        env = "VEXT_EXTENSION_START_DIR",
        help = "Directory relative search patterns start from (defaults to the working directory)"
    )]
    pub extension_start_dir: Option<PathBuf>,

    #[arg(
        long = "extension-max-time-secs",
        env = "VEXT_EXTENSION_MAX_TIME_SECS",
        default_value_t = 0,
        help = "Wall-clock budget per extension in seconds (0 = unlimited)"
    )]
    pub extension_max_time_secs: u64,

    #[arg(
        long = "extension-max-memory-mb",
        env = "VEXT_EXTENSION_MAX_MEMORY_MB",
        default_value_t = 0,
        help = "Memory budget per extension in megabytes (0 = unlimited)"
    )]
    pub extension_max_memory_mb: u64,

    #[arg(
        long = "extension-debug-hooks",
        env = "VEXT_EXTENSION_DEBUG_HOOKS",
        default_value_t = false,
        help = "Honor PRE_DEBUG, ABORT, and EARLY_RETURN results from extension callbacks"
    )]
    pub extension_debug_hooks: bool,

    #[arg(
        long = "extension-debug-level",
        env = "VEXT_EXTENSION_DEBUG_LEVEL",
        value_enum,
        default_value = "none",
        help = "Script debug level (tracing requires --extension-trace-dir)"
    )]
    pub extension_debug_level: CliDebugLevel,

    #[arg(
        long = "extension-trace-dir",
        env = "VEXT_EXTENSION_TRACE_DIR",
        help = "Directory receiving the per-line script trace log"
    )]
    pub extension_trace_dir: Option<PathBuf>,

    #[arg(
        long = "extension-package",
        env = "VEXT_EXTENSION_PACKAGE",
        conflicts_with = "extension_install",
        help = "Pack an extension source directory into <dir>.p4-extension and exit"
    )]
    pub extension_package: Option<PathBuf>,

    #[arg(
        long = "extension-sign",
        env = "VEXT_EXTENSION_SIGN",
        requires = "extension_package",
        help = "Key directory (privatekey.txt, certificate.txt) used to sign --extension-package"
    )]
    pub extension_sign: Option<PathBuf>,

    #[arg(
        long = "extension-verify",
        env = "VEXT_EXTENSION_VERIFY",
        help = "Verify the signature of an unpacked extension directory and exit"
    )]
    pub extension_verify: Option<PathBuf>,

    #[arg(
        long = "extension-certificate",
        env = "VEXT_EXTENSION_CERTIFICATE",
        help = "Certificate used by --extension-verify (defaults to the package's embedded certificate)"
    )]
    pub extension_certificate: Option<PathBuf>,

    #[arg(
        long = "extension-install",
        env = "VEXT_EXTENSION_INSTALL",
        help = "Install a .p4-extension archive and exit"
    )]
    pub extension_install: Option<PathBuf>,

    #[arg(
        long = "extension-install-root",
        env = "VEXT_EXTENSION_INSTALL_ROOT",
        default_value = ".vext/extensions",
        help = "Root directory for installed extensions (<root>/<key>/<revision>-arch)"
    )]
    pub extension_install_root: PathBuf,

    #[arg(
        long = "extension-install-revision",
        env = "VEXT_EXTENSION_INSTALL_REVISION",
        default_value_t = 1,
        value_parser = parse_positive_u32,
        help = "Revision number assigned to the installed extension"
    )]
    pub extension_install_revision: u32,

    #[arg(
        long = "extension-product",
        env = "VEXT_EXTENSION_PRODUCT",
        default_value = "p4d",
        help = "Host product tag checked against the manifest's compatible_products"
    )]
    pub extension_product: String,

    #[arg(
        long = "extension-trust-store",
        env = "VEXT_EXTENSION_TRUST_STORE",
        help = "JSON trust store of certificates accepted for signed installs"
    )]
    pub extension_trust_store: Option<PathBuf>,

    #[arg(
        long = "extension-signature-policy",
        env = "VEXT_EXTENSION_SIGNATURE_POLICY",
        value_enum,
        default_value = "verify-if-signed",
        help = "Signature handling before install"
    )]
    pub extension_signature_policy: CliSignaturePolicy,

    #[arg(
        long = "extension-require-signed",
        env = "VEXT_EXTENSION_REQUIRE_SIGNED",
        default_value_t = false,
        help = "Reject unsigned packages on install (overrides --extension-signature-policy)"
    )]
    pub extension_require_signed: bool,

    #[arg(
        long = "extension-inspect",
        env = "VEXT_EXTENSION_INSPECT",
        help = "Validate an extension archive or directory and print its manifest report"
    )]
    pub extension_inspect: Option<PathBuf>,

    #[arg(
        long = "extension-inspect-json",
        env = "VEXT_EXTENSION_INSPECT_JSON",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        requires = "extension_inspect",
        help = "Emit --extension-inspect output as pretty JSON"
    )]
    pub extension_inspect_json: bool,

    #[arg(
        long = "extension-trust-add",
        env = "VEXT_EXTENSION_TRUST_ADD",
        value_delimiter = ',',
        requires = "extension_trust_store",
        help = "Add or update trusted certificate file(s) in --extension-trust-store"
    )]
    pub extension_trust_add: Vec<PathBuf>,

    #[arg(
        long = "extension-trust-revoke",
        env = "VEXT_EXTENSION_TRUST_REVOKE",
        value_delimiter = ',',
        requires = "extension_trust_store",
        help = "Revoke trusted certificate id(s) in --extension-trust-store"
    )]
    pub extension_trust_revoke: Vec<String>,

    #[arg(
        long = "extension-trust-rotate",
        env = "VEXT_EXTENSION_TRUST_ROTATE",
        value_delimiter = ',',
        requires = "extension_trust_store",
        help = "Rotate trusted certificates in --extension-trust-store using old_id:certificate_path"
    )]
    pub extension_trust_rotate: Vec<String>,

    #[arg(
        long = "extension-load",
        env = "VEXT_EXTENSION_LOAD",
        value_delimiter = ',',
        help = "Installed or unpacked extension directories loaded before loose scripts"
    )]
    pub extension_load: Vec<PathBuf>,

    #[arg(
        long = "extension-run-hook",
        env = "VEXT_EXTENSION_RUN_HOOK",
        help = "Run a hook across discovered extensions and print the dispatch report"
    )]
    pub extension_run_hook: Option<String>,

    #[arg(
        long = "extension-hook-func",
        env = "VEXT_EXTENSION_HOOK_FUNC",
        requires = "extension_run_hook",
        help = "Command name exposed to callbacks as GetVar(\"func\") (defaults to the hook name)"
    )]
    pub extension_hook_func: Option<String>,

    #[arg(
        long = "extension-hook-no-replace",
        env = "VEXT_EXTENSION_HOOK_NO_REPLACE",
        default_value_t = false,
        requires = "extension_run_hook",
        help = "Treat REPLACE results from callbacks as coding errors"
    )]
    pub extension_hook_no_replace: bool,

    #[arg(
        long = "extension-hook-arg",
        env = "VEXT_EXTENSION_HOOK_ARG",
        value_delimiter = ',',
        requires = "extension_run_hook",
        help = "Command arguments exposed to callbacks as argv"
    )]
    pub extension_hook_arg: Vec<String>,

    #[arg(long = "extension-port", env = "P4PORT", default_value = "")]
    pub extension_port: String,

    #[arg(long = "extension-user", env = "P4USER", default_value = "")]
    pub extension_user: String,

    #[arg(long = "extension-client", env = "P4CLIENT", default_value = "")]
    pub extension_client: String,

    #[arg(long = "extension-host", env = "P4HOST", default_value = "")]
    pub extension_host: String,

    #[arg(long = "extension-charset", env = "P4CHARSET", default_value = "")]
    pub extension_charset: String,

    #[arg(long = "extension-language", env = "P4LANGUAGE", default_value = "")]
    pub extension_language: String,

    #[arg(
        long = "extension-client-version",
        env = "VEXT_EXTENSION_CLIENT_VERSION",
        default_value = concat!("vext/", env!("CARGO_PKG_VERSION")),
        help = "Client version string exposed to callbacks"
    )]
    pub extension_client_version: String,
}
