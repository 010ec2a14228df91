use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliSignaturePolicy {
    Skip,
    VerifyIfSigned,
    RequireSigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliDebugLevel {
    None,
    Tracing,
    CrystalBall,
}
