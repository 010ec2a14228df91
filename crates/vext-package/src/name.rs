//! Extension identity tokens: namespace, name, and `namespace::name#revision`.

use std::fmt;

use crate::PackageError;

const NAME_DELIMITER: &str = "::";
const REVISION_DELIMITER: char = '#';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which part of an identity a token is validated as.
pub enum ExtensionNameKind {
    /// `namespace::name`.
    FullName,
    /// The namespace alone.
    Prefix,
    /// The name alone.
    Name,
}

impl ExtensionNameKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::FullName => "full name",
            Self::Prefix => "namespace",
            Self::Name => "name",
        }
    }
}

/// Validates `raw` as `kind` and returns the validated token.
///
/// For `Prefix` the namespace portion is returned; for the other kinds the
/// input is returned unchanged.
pub fn parse_extension_name(raw: &str, kind: ExtensionNameKind) -> Result<String, PackageError> {
    let invalid = || PackageError::InvalidName {
        kind: kind.as_str(),
        value: raw.to_string(),
    };
    let has_delimiter = raw.contains(NAME_DELIMITER);
    if kind == ExtensionNameKind::FullName && !has_delimiter {
        return Err(invalid());
    }
    if raw.is_empty() || (has_delimiter && raw.len() <= 3) || raw.starts_with('-') {
        return Err(invalid());
    }

    let (prefix, rest) = if has_delimiter || kind == ExtensionNameKind::Prefix {
        match raw.split_once(':') {
            Some((prefix, after)) => {
                let Some(rest) = after.strip_prefix(':') else {
                    return Err(invalid());
                };
                (prefix, Some(rest))
            }
            None => (raw, None),
        }
    } else {
        ("", Some(raw))
    };

    if (has_delimiter || kind == ExtensionNameKind::Prefix)
        && (prefix.is_empty() || !prefix.chars().all(|ch| ch.is_ascii_alphanumeric()))
    {
        return Err(invalid());
    }
    if kind == ExtensionNameKind::Prefix {
        return Ok(prefix.to_string());
    }

    let name = rest.unwrap_or_default();
    if name.is_empty()
        || name.chars().all(|ch| ch.is_ascii_digit())
        || name.contains('/')
        || name.contains("...")
        || name.contains(NAME_DELIMITER)
    {
        return Err(invalid());
    }
    Ok(raw.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// `namespace::name#revision` identity of an installed extension.
pub struct ExtensionIdentity {
    pub namespace: String,
    pub name: String,
    pub revision: u32,
}

impl ExtensionIdentity {
    pub fn new(namespace: &str, name: &str, revision: u32) -> Result<Self, PackageError> {
        let namespace = parse_extension_name(namespace, ExtensionNameKind::Prefix)?;
        parse_extension_name(name, ExtensionNameKind::Name)?;
        if revision == 0 {
            return Err(PackageError::InvalidName {
                kind: "revision",
                value: revision.to_string(),
            });
        }
        Ok(Self {
            namespace,
            name: name.to_string(),
            revision,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, PackageError> {
        let invalid_revision = || PackageError::InvalidName {
            kind: "revision",
            value: raw.to_string(),
        };
        let (full_name, revision) = raw
            .rsplit_once(REVISION_DELIMITER)
            .ok_or_else(invalid_revision)?;
        let revision = revision
            .parse::<u32>()
            .map_err(|_| invalid_revision())?;
        parse_extension_name(full_name, ExtensionNameKind::FullName)?;
        let (namespace, name) = full_name
            .split_once(NAME_DELIMITER)
            .ok_or_else(|| PackageError::InvalidName {
                kind: ExtensionNameKind::FullName.as_str(),
                value: full_name.to_string(),
            })?;
        Self::new(namespace, name, revision)
    }

    pub fn full_name(&self) -> String {
        format!("{}{NAME_DELIMITER}{}", self.namespace, self.name)
    }
}

impl fmt::Display for ExtensionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{NAME_DELIMITER}{}{REVISION_DELIMITER}{}",
            self.namespace, self.name, self.revision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_extension_name, ExtensionIdentity, ExtensionNameKind};

    #[test]
    fn unit_full_name_requires_single_delimiter_with_both_sides() {
        for valid in ["Acme::lint", "acme2::pre-submit.check", "X::ab", "a::b"] {
            parse_extension_name(valid, ExtensionNameKind::FullName)
                .unwrap_or_else(|error| panic!("{valid}: {error}"));
        }
        for invalid in [
            "lint",
            "a::",
            "::b",
            "-acme::lint",
            "ac-me::lint",
            "acme:lint",
            "acme::123",
            "acme::lint/sub",
            "acme::lint...x",
            "acme::lint::extra",
        ] {
            assert!(
                parse_extension_name(invalid, ExtensionNameKind::FullName).is_err(),
                "{invalid} should be rejected"
            );
        }
    }

    #[test]
    fn unit_prefix_returns_alphanumeric_namespace() {
        assert_eq!(
            parse_extension_name("ExampleInc", ExtensionNameKind::Prefix).expect("namespace"),
            "ExampleInc"
        );
        assert_eq!(
            parse_extension_name("Acme::lint", ExtensionNameKind::Prefix).expect("namespace"),
            "Acme"
        );
        assert!(parse_extension_name("Example_Inc", ExtensionNameKind::Prefix).is_err());
        assert!(parse_extension_name("", ExtensionNameKind::Prefix).is_err());
    }

    #[test]
    fn unit_bare_name_rejects_numeric_and_path_like_tokens() {
        parse_extension_name("pre-submit_check.v2", ExtensionNameKind::Name).expect("name");
        for invalid in ["42", "a/b", "x...y", "-lead", ""] {
            assert!(
                parse_extension_name(invalid, ExtensionNameKind::Name).is_err(),
                "{invalid} should be rejected"
            );
        }
    }

    #[test]
    fn functional_identity_round_trips_through_display() {
        let identity = ExtensionIdentity::parse("Acme::lint#3").expect("identity");
        assert_eq!(identity.namespace, "Acme");
        assert_eq!(identity.name, "lint");
        assert_eq!(identity.revision, 3);
        assert_eq!(identity.full_name(), "Acme::lint");
        assert_eq!(identity.to_string(), "Acme::lint#3");
        assert!(ExtensionIdentity::parse("Acme::lint#0").is_err());
        assert!(ExtensionIdentity::parse("Acme::lint").is_err());
        assert!(ExtensionIdentity::parse("Acme::lint#x").is_err());
    }
}
